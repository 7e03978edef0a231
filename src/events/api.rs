//! Event API Endpoints
//! Public registration, admin review, tickets and QR check-in

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::events::{
    models::{
        CheckInRequest, Event, EventInput, EventRegistration, EventStats, RegisterRequest,
        RegistrationResponse, RegistrationStatus, Ticket,
    },
    qr::{now_ms, QrTokenError},
    store::EventError,
};
use crate::mailer::{self, ticket_mail};
use axum::{
    extract::{Path, Query, State},
    http::{StatusCode, Uri},
    Json,
};
use serde::Deserialize;
use tracing::warn;

impl From<EventError> for ApiError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::NotFound(msg) => ApiError::NotFound(msg.to_string()),
            EventError::Invalid(msg) => ApiError::BadRequest(msg),
            EventError::Conflict(msg) => ApiError::Conflict(msg),
            EventError::Forbidden(msg) => ApiError::Forbidden(msg),
            EventError::Storage(e) => ApiError::Internal(e),
        }
    }
}

impl From<QrTokenError> for ApiError {
    fn from(err: QrTokenError) -> Self {
        match err {
            QrTokenError::InvalidFormat => ApiError::BadRequest(err.to_string()),
            QrTokenError::InvalidSignature | QrTokenError::Expired => {
                ApiError::Unauthorized(err.to_string())
            }
            QrTokenError::SecretTooShort => ApiError::Internal(anyhow::Error::new(err)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegistrationQuery {
    pub status: Option<String>,
}

fn issue_ticket(state: &AppState, registration: &EventRegistration) -> ApiResult<Ticket> {
    let token = state
        .qr
        .issue(&registration.id, &registration.event_id, now_ms())?;
    let check_in_url = format!(
        "{}/check-in?token={}",
        state.config.public_base_url.trim_end_matches('/'),
        token
    );
    Ok(Ticket {
        token,
        check_in_url,
    })
}

fn mail_ticket(
    state: &AppState,
    event: &Event,
    registration: &EventRegistration,
    ticket: &Ticket,
) {
    mailer::dispatch(
        state.mailer.clone(),
        ticket_mail(
            &registration.attendee_email,
            &registration.attendee_name,
            &event.title,
            &ticket.check_in_url,
        ),
    );
}

/// GET /api/events
pub async fn list_events(State(state): State<AppState>) -> ApiResult<Json<Vec<Event>>> {
    Ok(Json(state.events.list_events()?))
}

/// GET /api/events/:id
pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Event>> {
    state
        .events
        .get_event(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Event not found"))
}

/// GET /api/events/code/:code
pub async fn get_event_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<Event>> {
    state
        .events
        .get_event_by_code(&code)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Event not found"))
}

/// POST /api/admin/events
pub async fn create_event(
    State(state): State<AppState>,
    Json(input): Json<EventInput>,
) -> ApiResult<(StatusCode, Json<Event>)> {
    let event = state.events.create_event(&input)?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// PUT /api/admin/events/:id
pub async fn update_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<EventInput>,
) -> ApiResult<Json<Event>> {
    Ok(Json(state.events.update_event(&id, &input)?))
}

/// DELETE /api/admin/events/:id
pub async fn delete_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.events.delete_event(&id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Event not found"))
    }
}

/// POST /api/events/:id/register - public sign-up
///
/// Events without an approval step answer with the ticket straight away.
pub async fn register(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegistrationResponse>)> {
    let (event, registration) = state.events.register(&event_id, &payload)?;

    let ticket = if registration.status == RegistrationStatus::Approved {
        let ticket = issue_ticket(&state, &registration)?;
        mail_ticket(&state, &event, &registration, &ticket);
        Some(ticket)
    } else {
        None
    };

    Ok((
        StatusCode::CREATED,
        Json(RegistrationResponse {
            registration,
            ticket,
        }),
    ))
}

/// GET /api/admin/events/:id/registrations?status=pending
pub async fn list_registrations(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Query(params): Query<RegistrationQuery>,
) -> ApiResult<Json<Vec<EventRegistration>>> {
    if state.events.get_event(&event_id)?.is_none() {
        return Err(ApiError::not_found("Event not found"));
    }
    let status = match params.status.as_deref().filter(|s| !s.is_empty()) {
        None => None,
        Some(raw) => Some(
            RegistrationStatus::from_str(raw)
                .ok_or_else(|| ApiError::bad_request(format!("Unknown status: {}", raw)))?,
        ),
    };
    Ok(Json(state.events.list_registrations(&event_id, status)?))
}

/// POST /api/admin/registrations/:id/approve
///
/// Mails a fresh ticket; delivery failures are only logged.
pub async fn approve_registration(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RegistrationResponse>> {
    let (event, registration) = state.events.approve_registration(&id)?;
    let ticket = issue_ticket(&state, &registration)?;
    mail_ticket(&state, &event, &registration, &ticket);

    Ok(Json(RegistrationResponse {
        registration,
        ticket: Some(ticket),
    }))
}

/// POST /api/admin/registrations/:id/reject
pub async fn reject_registration(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<EventRegistration>> {
    Ok(Json(state.events.reject_registration(&id)?))
}

/// GET /api/admin/registrations/:id/ticket
pub async fn get_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Ticket>> {
    let registration = state
        .events
        .get_registration(&id)?
        .ok_or_else(|| ApiError::not_found("Registration not found"))?;
    if registration.status != RegistrationStatus::Approved {
        return Err(ApiError::conflict(format!(
            "Registration is {}",
            registration.status.as_str()
        )));
    }
    Ok(Json(issue_ticket(&state, &registration)?))
}

/// POST /api/events/:id/check-in - admin scans a ticket at the door
///
/// Accepts the bare token or the whole check-in URL the QR code encodes.
pub async fn check_in(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Json(payload): Json<CheckInRequest>,
) -> ApiResult<Json<EventRegistration>> {
    let token = ticket_token(&payload.token)
        .ok_or_else(|| ApiError::bad_request("Ticket token missing"))?;
    let claims = state.qr.verify(&token, now_ms()).map_err(|e| {
        warn!(event_id = %event_id, "Rejected check-in ticket: {}", e);
        ApiError::from(e)
    })?;
    if claims.event_id != event_id {
        return Err(ApiError::bad_request("Ticket is for a different event"));
    }
    Ok(Json(state.events.check_in(&event_id, &claims.attendee_id)?))
}

#[derive(Debug, Deserialize)]
struct TicketQuery {
    token: String,
}

/// Scanners send either the bare token or the whole check-in URL, possibly
/// percent-encoded and with extra query parameters.
fn ticket_token(scanned: &str) -> Option<String> {
    let scanned = scanned.trim();
    let query = match scanned.split_once('?') {
        Some((_, query)) => query.split('#').next().unwrap_or_default().to_string(),
        None => format!("token={}", scanned),
    };
    let uri: Uri = format!("/?{}", query).parse().ok()?;
    let Query(ticket) = Query::<TicketQuery>::try_from_uri(&uri).ok()?;
    Some(ticket.token.trim().to_string()).filter(|t| !t.is_empty())
}

/// GET /api/admin/events/:id/stats
pub async fn event_stats(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> ApiResult<Json<EventStats>> {
    Ok(Json(state.events.stats(&event_id)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    const TOKEN: &str = "a1:e1:00ff:1700000000000:abcdef";

    #[test]
    fn test_ticket_token_forms() {
        assert_eq!(ticket_token(TOKEN).as_deref(), Some(TOKEN));
        assert_eq!(
            ticket_token(&format!("https://x.test/check-in?token={TOKEN}")).as_deref(),
            Some(TOKEN)
        );
        // Encoded separators, extra parameters and a fragment
        assert_eq!(
            ticket_token(
                "https://x.test/check-in?lang=en&token=a1%3Ae1%3A00ff%3A1700000000000%3Aabcdef&src=qr#top"
            )
            .as_deref(),
            Some(TOKEN)
        );
        assert_eq!(ticket_token("a1%3Ae1%3A00ff%3A1700000000000%3Aabcdef").as_deref(), Some(TOKEN));

        assert_eq!(ticket_token(""), None);
        assert_eq!(ticket_token("https://x.test/check-in?lang=en"), None);
        assert_eq!(ticket_token("https://x.test/check-in?token="), None);
    }

    #[test]
    fn test_qr_error_statuses() {
        assert_eq!(
            ApiError::from(QrTokenError::InvalidFormat).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(QrTokenError::Expired).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(EventError::Forbidden("pending".to_string()))
                .into_response()
                .status(),
            StatusCode::FORBIDDEN
        );
    }
}
