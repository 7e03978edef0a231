//! Event Storage
//! Mission: Events, capacity-checked registrations and single-use check-in

use crate::auth::models::normalize_email;
use crate::db::{is_unique_violation, optional, Db};
use crate::events::models::{
    Event, EventInput, EventRegistration, EventStats, RegisterRequest, RegistrationStatus,
};
use crate::short_code;
use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use tracing::{info, warn};
use uuid::Uuid;

const EVENT_COLUMNS: &str = "id, short_code, title, description, location, starts_at, ends_at, \
     capacity, requires_approval, created_at";
const REGISTRATION_COLUMNS: &str =
    "id, event_id, attendee_name, attendee_email, company, status, checked_in_at, created_at";

/// Attempts at finding a free generated short code before giving up.
const SHORT_CODE_ATTEMPTS: usize = 8;

#[derive(Debug)]
pub enum EventError {
    NotFound(&'static str),
    Invalid(String),
    Conflict(String),
    Forbidden(String),
    Storage(anyhow::Error),
}

impl From<anyhow::Error> for EventError {
    fn from(err: anyhow::Error) -> Self {
        EventError::Storage(err)
    }
}

impl From<rusqlite::Error> for EventError {
    fn from(err: rusqlite::Error) -> Self {
        EventError::Storage(err.into())
    }
}

pub struct EventStore {
    db: Db,
}

impl EventStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    // ===== Events =====

    /// Upcoming and past events, soonest start first.
    pub fn list_events(&self) -> Result<Vec<Event>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events ORDER BY starts_at ASC"
        ))?;
        let rows = stmt.query_map([], map_event)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_event(&self, id: &str) -> Result<Option<Event>> {
        let conn = self.db.conn();
        load_event(&conn, id)
    }

    /// Case-insensitive short code lookup.
    pub fn get_event_by_code(&self, code: &str) -> Result<Option<Event>> {
        let Some(code) = short_code::normalize(code) else {
            return Ok(None);
        };
        let conn = self.db.conn();
        optional(conn.query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM events WHERE short_code = ?1"),
            params![code],
            map_event,
        ))
    }

    pub fn create_event(&self, input: &EventInput) -> Result<Event, EventError> {
        let window = input.validate().map_err(EventError::Invalid)?;
        let requested_code = match input.short_code.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(raw) => Some(short_code::normalize(raw).ok_or_else(|| {
                EventError::Invalid(format!("Invalid short code: {}", raw))
            })?),
            None => None,
        };

        let mut event = Event {
            id: Uuid::new_v4().to_string(),
            short_code: String::new(),
            title: input.title.trim().to_string(),
            description: input.description.trim().to_string(),
            location: input.location.clone().filter(|l| !l.trim().is_empty()),
            starts_at: window.starts_at.to_rfc3339(),
            ends_at: window.ends_at.to_rfc3339(),
            capacity: input.capacity,
            requires_approval: input.requires_approval.unwrap_or(true),
            created_at: Utc::now().to_rfc3339(),
        };

        let conn = self.db.conn();
        let attempts = if requested_code.is_some() { 1 } else { SHORT_CODE_ATTEMPTS };
        for _ in 0..attempts {
            event.short_code = requested_code.clone().unwrap_or_else(short_code::generate);
            match insert_event(&conn, &event) {
                Ok(()) => {
                    info!(
                        event_id = %event.id,
                        short_code = %event.short_code,
                        title = %event.title,
                        "Event created"
                    );
                    return Ok(event);
                }
                Err(e) if is_unique_violation(&e) => {
                    if requested_code.is_some() {
                        return Err(EventError::Conflict(format!(
                            "Short code {} is already in use",
                            event.short_code
                        )));
                    }
                    warn!(short_code = %event.short_code, "Short code collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EventError::Storage(anyhow::anyhow!(
            "could not allocate a unique short code"
        )))
    }

    /// Keeps the current short code unless a new one is supplied.
    pub fn update_event(&self, id: &str, input: &EventInput) -> Result<Event, EventError> {
        let window = input.validate().map_err(EventError::Invalid)?;
        let code = match input.short_code.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(raw) => Some(short_code::normalize(raw).ok_or_else(|| {
                EventError::Invalid(format!("Invalid short code: {}", raw))
            })?),
            None => None,
        };

        let conn = self.db.conn();
        let changed = conn
            .execute(
                "UPDATE events
                 SET short_code = COALESCE(?2, short_code), title = ?3, description = ?4,
                     location = ?5, starts_at = ?6, ends_at = ?7, capacity = ?8,
                     requires_approval = COALESCE(?9, requires_approval)
                 WHERE id = ?1",
                params![
                    id,
                    code,
                    input.title.trim(),
                    input.description.trim(),
                    input.location.clone().filter(|l| !l.trim().is_empty()),
                    window.starts_at.to_rfc3339(),
                    window.ends_at.to_rfc3339(),
                    input.capacity,
                    input.requires_approval
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    EventError::Conflict("Short code is already in use".to_string())
                } else {
                    e.into()
                }
            })?;
        if changed == 0 {
            return Err(EventError::NotFound("Event not found"));
        }

        load_event(&conn, id)?.ok_or(EventError::NotFound("Event not found"))
    }

    /// Registrations go with the event.
    pub fn delete_event(&self, id: &str) -> Result<bool> {
        let changed = self
            .db
            .conn()
            .execute("DELETE FROM events WHERE id = ?1", params![id])?;
        if changed > 0 {
            info!(event_id = %id, "Event deleted");
        }
        Ok(changed > 0)
    }

    // ===== Registrations =====

    /// Sign up an attendee. Events that do not require approval approve at once.
    pub fn register(
        &self,
        event_id: &str,
        req: &RegisterRequest,
    ) -> Result<(Event, EventRegistration), EventError> {
        let email = normalize_email(&req.email)
            .ok_or_else(|| EventError::Invalid("Invalid email address".to_string()))?;
        let name = req.name.trim();
        if name.is_empty() {
            return Err(EventError::Invalid("Name is required".to_string()));
        }

        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        let event = load_event(&tx, event_id)?.ok_or(EventError::NotFound("Event not found"))?;

        let existing: Option<i64> = optional(tx.query_row(
            "SELECT 1 FROM event_registrations WHERE event_id = ?1 AND attendee_email = ?2",
            params![event_id, email],
            |row| row.get(0),
        ))?;
        if existing.is_some() {
            return Err(EventError::Conflict(
                "This email is already registered for the event".to_string(),
            ));
        }

        if let Some(capacity) = event.capacity {
            let taken = count_active(&tx, event_id)?;
            if taken >= capacity {
                return Err(EventError::Conflict("Event is full".to_string()));
            }
        }

        let status = if event.requires_approval {
            RegistrationStatus::Pending
        } else {
            RegistrationStatus::Approved
        };
        let registration = EventRegistration {
            id: Uuid::new_v4().to_string(),
            event_id: event_id.to_string(),
            attendee_name: name.to_string(),
            attendee_email: email,
            company: req.company.clone().filter(|c| !c.trim().is_empty()),
            status,
            checked_in_at: None,
            created_at: Utc::now().to_rfc3339(),
        };

        tx.execute(
            "INSERT INTO event_registrations
                 (id, event_id, attendee_name, attendee_email, company, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                registration.id,
                registration.event_id,
                registration.attendee_name,
                registration.attendee_email,
                registration.company,
                registration.status.as_str(),
                registration.created_at
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                EventError::Conflict("This email is already registered for the event".to_string())
            } else {
                e.into()
            }
        })?;
        tx.commit()?;

        info!(
            registration_id = %registration.id,
            event_id = %event_id,
            status = registration.status.as_str(),
            "Attendee registered"
        );
        Ok((event, registration))
    }

    pub fn get_registration(&self, id: &str) -> Result<Option<EventRegistration>> {
        let conn = self.db.conn();
        load_registration(&conn, id)
    }

    pub fn list_registrations(
        &self,
        event_id: &str,
        status: Option<RegistrationStatus>,
    ) -> Result<Vec<EventRegistration>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM event_registrations
             WHERE event_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at ASC"
        ))?;
        let rows = stmt
            .query_map(params![event_id, status.map(|s| s.as_str())], map_registration)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `pending -> approved`. Approving an already approved registration is allowed
    /// so a lost ticket can be re-issued.
    pub fn approve_registration(
        &self,
        id: &str,
    ) -> Result<(Event, EventRegistration), EventError> {
        let conn = self.db.conn();
        let registration =
            load_registration(&conn, id)?.ok_or(EventError::NotFound("Registration not found"))?;

        match registration.status {
            RegistrationStatus::Pending => {
                let updated = conn.execute(
                    "UPDATE event_registrations SET status = 'approved'
                     WHERE id = ?1 AND status = 'pending'",
                    params![id],
                )?;
                if updated != 1 {
                    return Err(EventError::Conflict(
                        "Registration was reviewed concurrently".to_string(),
                    ));
                }
                info!(registration_id = %id, event_id = %registration.event_id, "Registration approved");
            }
            RegistrationStatus::Approved => {}
            other => {
                return Err(EventError::Conflict(format!(
                    "Registration is already {}",
                    other.as_str()
                )))
            }
        }

        let event = load_event(&conn, &registration.event_id)?
            .ok_or(EventError::NotFound("Event not found"))?;
        let registration =
            load_registration(&conn, id)?.ok_or(EventError::NotFound("Registration not found"))?;
        Ok((event, registration))
    }

    /// `pending -> rejected` only.
    pub fn reject_registration(&self, id: &str) -> Result<EventRegistration, EventError> {
        let conn = self.db.conn();
        let updated = conn.execute(
            "UPDATE event_registrations SET status = 'rejected'
             WHERE id = ?1 AND status = 'pending'",
            params![id],
        )?;
        let registration =
            load_registration(&conn, id)?.ok_or(EventError::NotFound("Registration not found"))?;
        if updated != 1 {
            return Err(EventError::Conflict(format!(
                "Registration is already {}",
                registration.status.as_str()
            )));
        }

        info!(registration_id = %id, event_id = %registration.event_id, "Registration rejected");
        Ok(registration)
    }

    /// `approved -> checked_in`. The registration must belong to `event_id`.
    pub fn check_in(
        &self,
        event_id: &str,
        registration_id: &str,
    ) -> Result<EventRegistration, EventError> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        let registration = load_registration(&tx, registration_id)?
            .filter(|r| r.event_id == event_id)
            .ok_or(EventError::NotFound("Registration not found"))?;

        match registration.status {
            RegistrationStatus::Approved => {}
            RegistrationStatus::CheckedIn => {
                return Err(EventError::Conflict(format!(
                    "Already checked in at {}",
                    registration.checked_in_at.as_deref().unwrap_or("an earlier time")
                )))
            }
            other => {
                return Err(EventError::Forbidden(format!(
                    "Registration is {}",
                    other.as_str()
                )))
            }
        }

        let now = Utc::now().to_rfc3339();
        let updated = tx.execute(
            "UPDATE event_registrations SET status = 'checked_in', checked_in_at = ?2
             WHERE id = ?1 AND status = 'approved'",
            params![registration_id, now],
        )?;
        if updated != 1 {
            return Err(EventError::Conflict("Already checked in".to_string()));
        }
        let registration = load_registration(&tx, registration_id)?
            .ok_or(EventError::NotFound("Registration not found"))?;
        tx.commit()?;

        info!(
            registration_id = %registration_id,
            event_id = %event_id,
            attendee = %registration.attendee_email,
            "Attendee checked in"
        );
        Ok(registration)
    }

    pub fn stats(&self, event_id: &str) -> Result<EventStats, EventError> {
        let conn = self.db.conn();
        let event = load_event(&conn, event_id)?.ok_or(EventError::NotFound("Event not found"))?;

        let mut stats = EventStats {
            event_id: event_id.to_string(),
            capacity: event.capacity,
            ..Default::default()
        };
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM event_registrations WHERE event_id = ?1 GROUP BY status",
        )?;
        let counts = stmt
            .query_map(params![event_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        for (status, n) in counts {
            stats.total += n;
            match RegistrationStatus::from_str(&status) {
                Some(RegistrationStatus::Pending) => stats.pending += n,
                Some(RegistrationStatus::Approved) => stats.approved += n,
                Some(RegistrationStatus::Rejected) => stats.rejected += n,
                Some(RegistrationStatus::CheckedIn) => stats.checked_in += n,
                None => warn!(status = %status, "Unknown registration status in database"),
            }
        }
        stats.remaining = event
            .capacity
            .map(|c| (c - (stats.total - stats.rejected)).max(0));
        Ok(stats)
    }
}

fn insert_event(conn: &Connection, event: &Event) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO events (id, short_code, title, description, location, starts_at, ends_at,
             capacity, requires_approval, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            event.id,
            event.short_code,
            event.title,
            event.description,
            event.location,
            event.starts_at,
            event.ends_at,
            event.capacity,
            event.requires_approval,
            event.created_at
        ],
    )?;
    Ok(())
}

fn load_event(conn: &Connection, id: &str) -> Result<Option<Event>> {
    optional(conn.query_row(
        &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
        params![id],
        map_event,
    ))
}

fn load_registration(conn: &Connection, id: &str) -> Result<Option<EventRegistration>> {
    optional(conn.query_row(
        &format!("SELECT {REGISTRATION_COLUMNS} FROM event_registrations WHERE id = ?1"),
        params![id],
        map_registration,
    ))
}

/// Registrations holding a seat: everything except rejected ones.
fn count_active(conn: &Connection, event_id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM event_registrations WHERE event_id = ?1 AND status != 'rejected'",
        params![event_id],
        |row| row.get(0),
    )?)
}

fn map_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        short_code: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        location: row.get(4)?,
        starts_at: row.get(5)?,
        ends_at: row.get(6)?,
        capacity: row.get(7)?,
        requires_approval: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn map_registration(row: &Row<'_>) -> rusqlite::Result<EventRegistration> {
    let status: String = row.get(5)?;
    Ok(EventRegistration {
        id: row.get(0)?,
        event_id: row.get(1)?,
        attendee_name: row.get(2)?,
        attendee_email: row.get(3)?,
        company: row.get(4)?,
        status: RegistrationStatus::from_str(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                format!("unknown registration status {}", status).into(),
            )
        })?,
        checked_in_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> EventStore {
        EventStore::new(Db::in_memory().unwrap())
    }

    fn event_input(capacity: Option<i64>, requires_approval: bool) -> EventInput {
        EventInput {
            short_code: None,
            title: "Wellness Day".to_string(),
            description: "Talks and yoga".to_string(),
            location: Some("Hall A".to_string()),
            starts_at: "2025-06-01T09:00:00Z".to_string(),
            ends_at: "2025-06-01T17:00:00Z".to_string(),
            capacity,
            requires_approval: Some(requires_approval),
        }
    }

    fn attendee(email: &str) -> RegisterRequest {
        RegisterRequest {
            name: "Sam Doe".to_string(),
            email: email.to_string(),
            company: Some("Acme".to_string()),
        }
    }

    #[test]
    fn test_create_and_resolve_short_code() {
        let store = store();
        let event = store.create_event(&event_input(None, true)).unwrap();
        assert_eq!(event.short_code.len(), short_code::SHORT_CODE_LEN);

        let found = store
            .get_event_by_code(&event.short_code.to_lowercase())
            .unwrap()
            .unwrap();
        assert_eq!(found.id, event.id);
        assert!(store.get_event_by_code("??").unwrap().is_none());
    }

    #[test]
    fn test_explicit_short_code_must_be_unique() {
        let store = store();
        let mut input = event_input(None, true);
        input.short_code = Some("run-25".to_string());
        let event = store.create_event(&input).unwrap();
        assert_eq!(event.short_code, "RUN-25");

        input.short_code = Some("RUN-25".to_string());
        assert!(matches!(
            store.create_event(&input),
            Err(EventError::Conflict(_))
        ));
    }

    #[test]
    fn test_update_keeps_code_and_checks_window() {
        let store = store();
        let event = store.create_event(&event_input(None, true)).unwrap();
        let mut input = event_input(Some(10), false);
        input.title = "Wellness Day 2".to_string();
        let updated = store.update_event(&event.id, &input).unwrap();
        assert_eq!(updated.short_code, event.short_code);
        assert_eq!(updated.capacity, Some(10));
        assert!(!updated.requires_approval);

        input.ends_at = "2025-05-01T00:00:00Z".to_string();
        assert!(matches!(
            store.update_event(&event.id, &input),
            Err(EventError::Invalid(_))
        ));
        assert!(matches!(
            store.update_event("missing", &event_input(None, true)),
            Err(EventError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_registration_conflicts() {
        let store = store();
        let event = store.create_event(&event_input(None, true)).unwrap();
        store.register(&event.id, &attendee("sam@acme.com")).unwrap();
        assert!(matches!(
            store.register(&event.id, &attendee("SAM@acme.com ")),
            Err(EventError::Conflict(_))
        ));
    }

    #[test]
    fn test_capacity_ignores_rejected() {
        let store = store();
        let event = store.create_event(&event_input(Some(1), true)).unwrap();
        let (_, first) = store.register(&event.id, &attendee("a@x.com")).unwrap();
        assert!(matches!(
            store.register(&event.id, &attendee("b@x.com")),
            Err(EventError::Conflict(_))
        ));

        store.reject_registration(&first.id).unwrap();
        let (_, second) = store.register(&event.id, &attendee("b@x.com")).unwrap();
        assert_eq!(second.status, RegistrationStatus::Pending);
    }

    #[test]
    fn test_auto_approval() {
        let store = store();
        let event = store.create_event(&event_input(None, false)).unwrap();
        let (_, reg) = store.register(&event.id, &attendee("a@x.com")).unwrap();
        assert_eq!(reg.status, RegistrationStatus::Approved);
    }

    #[test]
    fn test_review_transitions() {
        let store = store();
        let event = store.create_event(&event_input(None, true)).unwrap();
        let (_, reg) = store.register(&event.id, &attendee("a@x.com")).unwrap();

        let (_, approved) = store.approve_registration(&reg.id).unwrap();
        assert_eq!(approved.status, RegistrationStatus::Approved);
        // Re-approval re-issues, it does not fail
        assert!(store.approve_registration(&reg.id).is_ok());
        assert!(matches!(
            store.reject_registration(&reg.id),
            Err(EventError::Conflict(_))
        ));

        let (_, other) = store.register(&event.id, &attendee("b@x.com")).unwrap();
        store.reject_registration(&other.id).unwrap();
        assert!(matches!(
            store.approve_registration(&other.id),
            Err(EventError::Conflict(_))
        ));
        assert!(matches!(
            store.approve_registration("missing"),
            Err(EventError::NotFound(_))
        ));
    }

    #[test]
    fn test_check_in_rules() {
        let store = store();
        let event = store.create_event(&event_input(None, true)).unwrap();
        let (_, reg) = store.register(&event.id, &attendee("a@x.com")).unwrap();

        assert!(matches!(
            store.check_in(&event.id, &reg.id),
            Err(EventError::Forbidden(_))
        ));

        store.approve_registration(&reg.id).unwrap();
        let other = store.create_event(&event_input(None, true)).unwrap();
        assert!(matches!(
            store.check_in(&other.id, &reg.id),
            Err(EventError::NotFound(_))
        ));

        let checked = store.check_in(&event.id, &reg.id).unwrap();
        assert_eq!(checked.status, RegistrationStatus::CheckedIn);
        assert!(checked.checked_in_at.is_some());

        assert!(matches!(
            store.check_in(&event.id, &reg.id),
            Err(EventError::Conflict(_))
        ));
    }

    #[test]
    fn test_stats_and_filtering() {
        let store = store();
        let event = store.create_event(&event_input(Some(10), true)).unwrap();
        let (_, a) = store.register(&event.id, &attendee("a@x.com")).unwrap();
        let (_, b) = store.register(&event.id, &attendee("b@x.com")).unwrap();
        store.register(&event.id, &attendee("c@x.com")).unwrap();
        store.approve_registration(&a.id).unwrap();
        store.check_in(&event.id, &a.id).unwrap();
        store.reject_registration(&b.id).unwrap();

        let stats = store.stats(&event.id).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.checked_in, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.remaining, Some(8));

        let pending = store
            .list_registrations(&event.id, Some(RegistrationStatus::Pending))
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(store.list_registrations(&event.id, None).unwrap().len(), 3);

        assert!(store.delete_event(&event.id).unwrap());
        assert!(store.get_registration(&a.id).unwrap().is_none());
        assert!(!store.delete_event(&event.id).unwrap());
    }

    #[test]
    fn test_unknown_registration_status_is_an_error() {
        let store = store();
        let event = store.create_event(&event_input(None, false)).unwrap();
        let (_, registration) = store.register(&event.id, &attendee("sam@acme.com")).unwrap();
        store
            .db
            .conn()
            .execute(
                "UPDATE event_registrations SET status = 'waitlisted' WHERE id = ?1",
                params![registration.id],
            )
            .unwrap();

        assert!(store.get_registration(&registration.id).is_err());
        assert!(store.list_registrations(&event.id, None).is_err());
    }
}
