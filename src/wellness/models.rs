//! Wellness Models
//! Companies, tasks, task proofs and the leaderboard

use serde::{Deserialize, Serialize};

/// Minimum number of photos/videos a proof must carry.
pub const MIN_PROOF_ITEMS: usize = 6;
pub const MAX_PROOF_ITEMS: usize = 30;
const MAX_URL_LEN: usize = 2048;

/// Review state shared by proofs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(ReviewStatus::Pending),
            "approved" => Some(ReviewStatus::Approved),
            "rejected" => Some(ReviewStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: String,
    pub name: String,
    pub contact_email: String,
    pub points: i64,
    pub calories: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub points: i64,
    pub calories: i64,
    pub active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProof {
    pub id: String,
    pub task_id: String,
    pub company_id: String,
    pub content_urls: Vec<String>,
    pub notes: Option<String>,
    pub status: ReviewStatus,
    pub review_note: Option<String>,
    pub reviewed_by: Option<String>,
    pub awarded_points: i64,
    pub awarded_calories: i64,
    pub submitted_at: String,
    pub reviewed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub company_id: String,
    pub name: String,
    pub points: i64,
    pub calories: i64,
}

/// Create/update body for tasks.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskInput {
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub points: i64,
    pub calories: i64,
    pub active: Option<bool>,
}

impl TaskInput {
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Task title is required".to_string());
        }
        if self.points < 0 || self.calories < 0 {
            return Err("Points and calories must not be negative".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitProofRequest {
    pub task_id: String,
    pub content_urls: Vec<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReviewRequest {
    pub note: Option<String>,
}

/// Checks count, scheme and uniqueness of proof media URLs.
pub fn validate_content_urls(urls: &[String]) -> Result<(), String> {
    if urls.len() < MIN_PROOF_ITEMS {
        return Err(format!(
            "A proof needs at least {} photos or videos (got {})",
            MIN_PROOF_ITEMS,
            urls.len()
        ));
    }
    if urls.len() > MAX_PROOF_ITEMS {
        return Err(format!(
            "A proof can carry at most {} items",
            MAX_PROOF_ITEMS
        ));
    }

    let mut seen = std::collections::HashSet::with_capacity(urls.len());
    for url in urls {
        let url = url.trim();
        if url.len() > MAX_URL_LEN
            || !(url.starts_with("https://") || url.starts_with("http://"))
        {
            return Err(format!("Invalid content URL: {}", url));
        }
        if !seen.insert(url) {
            return Err(format!("Duplicate content URL: {}", url));
        }
    }
    Ok(())
}

/// Standard competition ranking ("1224"): companies with equal points and calories
/// share a rank. Input must already be sorted.
pub fn rank_companies(companies: Vec<Company>) -> Vec<LeaderboardEntry> {
    let mut out: Vec<LeaderboardEntry> = Vec::with_capacity(companies.len());
    for (idx, c) in companies.into_iter().enumerate() {
        let rank = match out.last() {
            Some(prev) if prev.points == c.points && prev.calories == c.calories => prev.rank,
            _ => idx + 1,
        };
        out.push(LeaderboardEntry {
            rank,
            company_id: c.id,
            name: c.name,
            points: c.points,
            calories: c.calories,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("https://cdn.example.com/proof/{i}.jpg"))
            .collect()
    }

    fn company(name: &str, points: i64, calories: i64) -> Company {
        Company {
            id: name.to_lowercase(),
            name: name.to_string(),
            contact_email: format!("{}@x.com", name.to_lowercase()),
            points,
            calories,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_fewer_than_six_urls_rejected() {
        assert!(validate_content_urls(&urls(5)).is_err());
        assert!(validate_content_urls(&urls(0)).is_err());
        assert!(validate_content_urls(&urls(6)).is_ok());
    }

    #[test]
    fn test_bad_and_duplicate_urls_rejected() {
        let mut list = urls(6);
        list[2] = "ftp://files/x.jpg".to_string();
        assert!(validate_content_urls(&list).is_err());

        let mut list = urls(6);
        list[5] = list[0].clone();
        let err = validate_content_urls(&list).unwrap_err();
        assert!(err.contains("Duplicate"));

        assert!(validate_content_urls(&urls(MAX_PROOF_ITEMS + 1)).is_err());
    }

    #[test]
    fn test_competition_ranking() {
        let ranked = rank_companies(vec![
            company("A", 100, 500),
            company("B", 80, 300),
            company("C", 80, 300),
            company("D", 80, 200),
            company("E", 10, 0),
        ]);
        let ranks: Vec<usize> = ranked.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 2, 4, 5]);
    }

    #[test]
    fn test_review_status_round_trip() {
        for s in [
            ReviewStatus::Pending,
            ReviewStatus::Approved,
            ReviewStatus::Rejected,
        ] {
            assert_eq!(ReviewStatus::from_str(s.as_str()), Some(s));
        }
        assert_eq!(ReviewStatus::from_str("done"), None);
        assert_eq!(
            serde_json::to_string(&ReviewStatus::Approved).unwrap(),
            r#""approved""#
        );
    }

    #[test]
    fn test_task_input_validation() {
        let mut input = TaskInput {
            title: "Walk 10k steps".to_string(),
            description: String::new(),
            category: None,
            points: 10,
            calories: 400,
            active: None,
        };
        assert!(input.validate().is_ok());
        input.points = -1;
        assert!(input.validate().is_err());
        input.points = 1;
        input.title = "  ".to_string();
        assert!(input.validate().is_err());
    }
}
