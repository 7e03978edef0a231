//! Short codes: human-shareable aliases for events and poll subjects.

use rand::Rng;

/// No 0/O, 1/I/L: codes get read aloud and typed from slides.
const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

pub const SHORT_CODE_LEN: usize = 6;

pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..SHORT_CODE_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Canonical form for lookups and storage. Returns `None` for codes that could
/// never have been issued or supplied by an admin.
pub fn normalize(raw: &str) -> Option<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() < 3 || code.len() > 16 {
        return None;
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return None;
    }
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_use_alphabet() {
        for _ in 0..100 {
            let code = generate();
            assert_eq!(code.len(), SHORT_CODE_LEN);
            assert!(code.bytes().all(|b| ALPHABET.contains(&b)));
            assert_eq!(normalize(&code).as_deref(), Some(code.as_str()));
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  abc123 ").as_deref(), Some("ABC123"));
        assert_eq!(normalize("team-day").as_deref(), Some("TEAM-DAY"));
        assert_eq!(normalize("ab"), None);
        assert_eq!(normalize("has space"), None);
        assert_eq!(normalize("../etc"), None);
    }
}
