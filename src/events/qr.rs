//! QR Check-in Tickets
//! Mission: Sign `attendeeId:eventId:nonce:timestamp` so a scanned code can be
//! trusted without a database lookup of the ticket itself

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

pub const MIN_SECRET_LEN: usize = 32;
/// Tickets are valid for seven days after issue.
pub const TICKET_TTL_MS: i64 = 7 * 24 * 60 * 60 * 1000;
/// Tolerated clock drift for timestamps in the future.
pub const MAX_CLOCK_SKEW_MS: i64 = 5 * 60 * 1000;
const NONCE_BYTES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrTokenError {
    SecretTooShort,
    InvalidFormat,
    InvalidSignature,
    Expired,
}

impl fmt::Display for QrTokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QrTokenError::SecretTooShort => {
                write!(f, "QR secret is too short (min {} bytes)", MIN_SECRET_LEN)
            }
            QrTokenError::InvalidFormat => write!(f, "Invalid ticket format"),
            QrTokenError::InvalidSignature => write!(f, "Ticket signature is invalid"),
            QrTokenError::Expired => write!(f, "Ticket has expired"),
        }
    }
}

impl std::error::Error for QrTokenError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrClaims {
    pub attendee_id: String,
    pub event_id: String,
    pub nonce: String,
    pub issued_at_ms: i64,
}

#[derive(Clone)]
pub struct QrTokenService {
    secret: Arc<[u8]>,
}

impl QrTokenService {
    pub fn new(secret: &[u8]) -> Result<Self, QrTokenError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(QrTokenError::SecretTooShort);
        }
        Ok(Self {
            secret: Arc::from(secret),
        })
    }

    pub fn issue(
        &self,
        attendee_id: &str,
        event_id: &str,
        now_ms: i64,
    ) -> Result<String, QrTokenError> {
        let mut nonce = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);
        let payload = format!(
            "{}:{}:{}:{}",
            attendee_id,
            event_id,
            hex::encode(nonce),
            now_ms
        );
        let signature = hex::encode(self.mac(payload.as_bytes())?.finalize().into_bytes());
        Ok(format!("{}:{}", payload, signature))
    }

    pub fn verify(&self, token: &str, now_ms: i64) -> Result<QrClaims, QrTokenError> {
        let (payload, signature_hex) = token
            .trim()
            .rsplit_once(':')
            .ok_or(QrTokenError::InvalidFormat)?;

        let parts: Vec<&str> = payload.split(':').collect();
        if parts.len() != 4 || parts.iter().any(|p| p.is_empty()) {
            return Err(QrTokenError::InvalidFormat);
        }
        let issued_at_ms: i64 = parts[3].parse().map_err(|_| QrTokenError::InvalidFormat)?;
        let signature = hex::decode(signature_hex).map_err(|_| QrTokenError::InvalidFormat)?;

        // verify_slice compares in constant time
        self.mac(payload.as_bytes())?
            .verify_slice(&signature)
            .map_err(|_| QrTokenError::InvalidSignature)?;

        if issued_at_ms > now_ms + MAX_CLOCK_SKEW_MS {
            return Err(QrTokenError::InvalidFormat);
        }
        if now_ms - issued_at_ms > TICKET_TTL_MS {
            return Err(QrTokenError::Expired);
        }

        Ok(QrClaims {
            attendee_id: parts[0].to_string(),
            event_id: parts[1].to_string(),
            nonce: parts[2].to_string(),
            issued_at_ms,
        })
    }

    fn mac(&self, bytes: &[u8]) -> Result<HmacSha256, QrTokenError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .map_err(|_| QrTokenError::InvalidSignature)?;
        mac.update(bytes);
        Ok(mac)
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;

    fn service() -> QrTokenService {
        QrTokenService::new(b"01234567890123456789012345678901").unwrap()
    }

    #[test]
    fn test_issue_and_verify() {
        let svc = service();
        let token = svc.issue("reg-1", "evt-1", T0).unwrap();
        assert_eq!(token.split(':').count(), 5);

        let claims = svc.verify(&token, T0 + 1000).unwrap();
        assert_eq!(claims.attendee_id, "reg-1");
        assert_eq!(claims.event_id, "evt-1");
        assert_eq!(claims.nonce.len(), NONCE_BYTES * 2);
        assert_eq!(claims.issued_at_ms, T0);
    }

    #[test]
    fn test_nonce_makes_tokens_unique() {
        let svc = service();
        assert_ne!(
            svc.issue("a", "e", T0).unwrap(),
            svc.issue("a", "e", T0).unwrap()
        );
    }

    #[test]
    fn test_tampered_token_rejected() {
        let svc = service();
        let token = svc.issue("reg-1", "evt-1", T0).unwrap();
        let forged = token.replacen("reg-1", "reg-2", 1);
        assert_eq!(svc.verify(&forged, T0), Err(QrTokenError::InvalidSignature));

        let other = QrTokenService::new(b"abcdefghijabcdefghijabcdefghij-x").unwrap();
        assert_eq!(other.verify(&token, T0), Err(QrTokenError::InvalidSignature));
    }

    #[test]
    fn test_expiry_window() {
        let svc = service();
        let token = svc.issue("reg-1", "evt-1", T0).unwrap();
        assert!(svc.verify(&token, T0 + TICKET_TTL_MS).is_ok());
        assert_eq!(
            svc.verify(&token, T0 + TICKET_TTL_MS + 1),
            Err(QrTokenError::Expired)
        );
        // Issued too far in the future relative to the verifier's clock
        assert_eq!(
            svc.verify(&token, T0 - MAX_CLOCK_SKEW_MS - 1),
            Err(QrTokenError::InvalidFormat)
        );
    }

    #[test]
    fn test_malformed_tokens() {
        let svc = service();
        for bad in ["", "abc", "a:b:c:d", "a:b:c:notanumber:00", "a::c:1:00", "a:b:c:1:zz"] {
            assert_eq!(svc.verify(bad, T0), Err(QrTokenError::InvalidFormat), "{bad}");
        }
    }

    #[test]
    fn test_short_secret_rejected() {
        assert_eq!(
            QrTokenService::new(b"short").err(),
            Some(QrTokenError::SecretTooShort)
        );
    }
}
