//! Event Models
//! Events, attendee registrations and check-in tickets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Pending,
    Approved,
    Rejected,
    CheckedIn,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Pending => "pending",
            RegistrationStatus::Approved => "approved",
            RegistrationStatus::Rejected => "rejected",
            RegistrationStatus::CheckedIn => "checked_in",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(RegistrationStatus::Pending),
            "approved" => Some(RegistrationStatus::Approved),
            "rejected" => Some(RegistrationStatus::Rejected),
            "checked_in" | "checked-in" => Some(RegistrationStatus::CheckedIn),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub short_code: String,
    pub title: String,
    pub description: String,
    pub location: Option<String>,
    pub starts_at: String,
    pub ends_at: String,
    pub capacity: Option<i64>,
    pub requires_approval: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRegistration {
    pub id: String,
    pub event_id: String,
    pub attendee_name: String,
    pub attendee_email: String,
    pub company: Option<String>,
    pub status: RegistrationStatus,
    pub checked_in_at: Option<String>,
    pub created_at: String,
}

/// Create/update body for events.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    pub short_code: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub location: Option<String>,
    pub starts_at: String,
    pub ends_at: String,
    pub capacity: Option<i64>,
    pub requires_approval: Option<bool>,
}

/// Parsed and normalized event times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventWindow {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl EventInput {
    pub fn validate(&self) -> Result<EventWindow, String> {
        if self.title.trim().is_empty() {
            return Err("Event title is required".to_string());
        }
        if matches!(self.capacity, Some(c) if c < 1) {
            return Err("Capacity must be at least 1".to_string());
        }
        let starts_at = parse_timestamp("startsAt", &self.starts_at)?;
        let ends_at = parse_timestamp("endsAt", &self.ends_at)?;
        if ends_at < starts_at {
            return Err("endsAt must not precede startsAt".to_string());
        }
        Ok(EventWindow { starts_at, ends_at })
    }
}

fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| format!("{} must be an RFC 3339 timestamp", field))
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub token: String,
    pub check_in_url: String,
}

#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    pub registration: EventRegistration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<Ticket>,
}

#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    pub event_id: String,
    pub total: i64,
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    pub checked_in: i64,
    pub capacity: Option<i64>,
    /// Seats left, counting every non-rejected registration.
    pub remaining: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(starts: &str, ends: &str) -> EventInput {
        EventInput {
            short_code: None,
            title: "Spring Run".to_string(),
            description: String::new(),
            location: None,
            starts_at: starts.to_string(),
            ends_at: ends.to_string(),
            capacity: Some(50),
            requires_approval: None,
        }
    }

    #[test]
    fn test_window_validation() {
        let window = input("2025-04-01T09:00:00+02:00", "2025-04-01T12:00:00Z")
            .validate()
            .unwrap();
        assert_eq!(window.starts_at.to_rfc3339(), "2025-04-01T07:00:00+00:00");

        assert!(input("2025-04-01T12:00:00Z", "2025-04-01T09:00:00Z")
            .validate()
            .is_err());
        assert!(input("tomorrow", "2025-04-01T09:00:00Z").validate().is_err());
        // Zero-length events are allowed
        assert!(input("2025-04-01T09:00:00Z", "2025-04-01T09:00:00Z")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_capacity_must_be_positive() {
        let mut i = input("2025-04-01T09:00:00Z", "2025-04-01T10:00:00Z");
        i.capacity = Some(0);
        assert!(i.validate().is_err());
        i.capacity = None;
        assert!(i.validate().is_ok());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&RegistrationStatus::CheckedIn).unwrap(),
            r#""checked_in""#
        );
        assert_eq!(
            RegistrationStatus::from_str("Checked_In"),
            Some(RegistrationStatus::CheckedIn)
        );
        assert_eq!(RegistrationStatus::from_str("waitlisted"), None);
    }
}
