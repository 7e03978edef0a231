//! Poll Models
//! Poll subjects, their options and live result snapshots

use serde::{Deserialize, Serialize};

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 20;
const MAX_LABEL_LEN: usize = 200;
const MAX_VOTER_KEY_LEN: usize = 128;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub id: String,
    pub label: String,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSubject {
    pub id: String,
    pub event_id: Option<String>,
    pub short_code: String,
    pub question: String,
    pub is_open: bool,
    pub created_at: String,
    pub options: Vec<PollOption>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OptionTally {
    pub option_id: String,
    pub label: String,
    pub votes: i64,
}

/// What dashboards render; also the payload pushed over `/ws/polls`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PollResults {
    pub subject_id: String,
    pub short_code: String,
    pub question: String,
    pub is_open: bool,
    pub total_votes: i64,
    pub options: Vec<OptionTally>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    pub question: String,
    pub options: Vec<String>,
    pub event_id: Option<String>,
    pub short_code: Option<String>,
}

impl CreatePollRequest {
    /// Trimmed option labels, in order.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        if self.question.trim().is_empty() {
            return Err("Question is required".to_string());
        }
        let labels: Vec<String> = self
            .options
            .iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        if labels.len() < MIN_OPTIONS {
            return Err(format!("A poll needs at least {} options", MIN_OPTIONS));
        }
        if labels.len() > MAX_OPTIONS {
            return Err(format!("A poll can have at most {} options", MAX_OPTIONS));
        }
        if labels.iter().any(|l| l.len() > MAX_LABEL_LEN) {
            return Err("Option label is too long".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        if !labels.iter().all(|l| seen.insert(l.to_lowercase())) {
            return Err("Option labels must be unique".to_string());
        }
        Ok(labels)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub option_id: String,
    /// Stable per-voter identifier chosen by the client (device id, session id).
    pub voter_key: String,
}

pub fn validate_voter_key(key: &str) -> Result<&str, String> {
    let key = key.trim();
    if key.is_empty() || key.len() > MAX_VOTER_KEY_LEN {
        return Err("voterKey must be 1-128 characters".to_string());
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(options: &[&str]) -> CreatePollRequest {
        CreatePollRequest {
            question: "Best activity?".to_string(),
            options: options.iter().map(|s| s.to_string()).collect(),
            event_id: None,
            short_code: None,
        }
    }

    #[test]
    fn test_option_validation() {
        assert_eq!(
            request(&[" Yoga ", "Running", ""]).validate().unwrap(),
            vec!["Yoga".to_string(), "Running".to_string()]
        );
        assert!(request(&["Only one"]).validate().is_err());
        assert!(request(&["Yoga", "yoga"]).validate().is_err());

        let mut r = request(&["A", "B"]);
        r.question = " ".to_string();
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_voter_key() {
        assert_eq!(validate_voter_key(" device-1 ").unwrap(), "device-1");
        assert!(validate_voter_key("").is_err());
        assert!(validate_voter_key(&"k".repeat(129)).is_err());
    }

    #[test]
    fn test_results_wire_format() {
        let results = PollResults {
            subject_id: "p1".to_string(),
            short_code: "ABC234".to_string(),
            question: "Q".to_string(),
            is_open: true,
            total_votes: 1,
            options: vec![OptionTally {
                option_id: "o1".to_string(),
                label: "Yes".to_string(),
                votes: 1,
            }],
        };
        let json = serde_json::to_value(&results).unwrap();
        assert_eq!(json["subjectId"], "p1");
        assert_eq!(json["totalVotes"], 1);
        assert_eq!(json["options"][0]["optionId"], "o1");
    }
}
