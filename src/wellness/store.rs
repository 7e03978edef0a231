//! Wellness Storage
//! Mission: Tasks, proofs and point awarding with review transitions that cannot
//! double-award

use crate::db::{optional, Db};
use crate::wellness::models::{
    rank_companies, validate_content_urls, Company, LeaderboardEntry, ReviewStatus,
    SubmitProofRequest, Task, TaskInput, TaskProof,
};
use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Row};
use tracing::info;
use uuid::Uuid;

const COMPANY_COLUMNS: &str = "id, name, contact_email, points, calories, created_at";
const TASK_COLUMNS: &str = "id, title, description, category, points, calories, active, created_at";
const PROOF_COLUMNS: &str = "id, task_id, company_id, content_urls_json, notes, status, review_note, \
     reviewed_by, awarded_points, awarded_calories, submitted_at, reviewed_at";

#[derive(Debug)]
pub enum WellnessError {
    NotFound(&'static str),
    Invalid(String),
    Conflict(String),
    Storage(anyhow::Error),
}

impl From<anyhow::Error> for WellnessError {
    fn from(err: anyhow::Error) -> Self {
        WellnessError::Storage(err)
    }
}

impl From<rusqlite::Error> for WellnessError {
    fn from(err: rusqlite::Error) -> Self {
        WellnessError::Storage(err.into())
    }
}

/// What `delete_task` actually did.
#[derive(Debug, PartialEq, Eq)]
pub enum TaskRemoval {
    Deleted,
    /// Proofs reference the task, so it was only deactivated.
    Deactivated,
}

pub struct WellnessStore {
    db: Db,
}

impl WellnessStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    // ===== Companies =====

    pub fn list_companies(&self) -> Result<Vec<Company>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COMPANY_COLUMNS} FROM companies ORDER BY name COLLATE NOCASE ASC"
        ))?;
        let rows = stmt
            .query_map([], map_company)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_company(&self, id: &str) -> Result<Option<Company>> {
        let conn = self.db.conn();
        optional(conn.query_row(
            &format!("SELECT {COMPANY_COLUMNS} FROM companies WHERE id = ?1"),
            params![id],
            map_company,
        ))
    }

    /// Companies ordered by points, then calories, then name.
    pub fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COMPANY_COLUMNS} FROM companies
             ORDER BY points DESC, calories DESC, name COLLATE NOCASE ASC
             LIMIT ?1"
        ))?;
        let companies = stmt
            .query_map(params![limit as i64], map_company)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rank_companies(companies))
    }

    // ===== Tasks =====

    pub fn list_tasks(&self, include_inactive: bool) -> Result<Vec<Task>> {
        let conn = self.db.conn();
        let sql = if include_inactive {
            format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at ASC")
        } else {
            format!("SELECT {TASK_COLUMNS} FROM tasks WHERE active = 1 ORDER BY created_at ASC")
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_task)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let conn = self.db.conn();
        optional(conn.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            params![id],
            map_task,
        ))
    }

    pub fn create_task(&self, input: &TaskInput) -> Result<Task, WellnessError> {
        input.validate().map_err(WellnessError::Invalid)?;

        let task = Task {
            id: Uuid::new_v4().to_string(),
            title: input.title.trim().to_string(),
            description: input.description.trim().to_string(),
            category: input.category.clone().filter(|c| !c.trim().is_empty()),
            points: input.points,
            calories: input.calories,
            active: input.active.unwrap_or(true),
            created_at: Utc::now().to_rfc3339(),
        };

        self.db.conn().execute(
            "INSERT INTO tasks (id, title, description, category, points, calories, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                task.id,
                task.title,
                task.description,
                task.category,
                task.points,
                task.calories,
                task.active,
                task.created_at
            ],
        )?;

        info!(task_id = %task.id, title = %task.title, "Task created");
        Ok(task)
    }

    /// Changing points only affects future approvals; already awarded points stay.
    pub fn update_task(&self, id: &str, input: &TaskInput) -> Result<Task, WellnessError> {
        input.validate().map_err(WellnessError::Invalid)?;

        let changed = self.db.conn().execute(
            "UPDATE tasks SET title = ?2, description = ?3, category = ?4, points = ?5,
                 calories = ?6, active = COALESCE(?7, active)
             WHERE id = ?1",
            params![
                id,
                input.title.trim(),
                input.description.trim(),
                input.category.clone().filter(|c| !c.trim().is_empty()),
                input.points,
                input.calories,
                input.active
            ],
        )?;
        if changed == 0 {
            return Err(WellnessError::NotFound("Task not found"));
        }

        self.get_task(id)?
            .ok_or(WellnessError::NotFound("Task not found"))
    }

    pub fn delete_task(&self, id: &str) -> Result<TaskRemoval, WellnessError> {
        let conn = self.db.conn();
        let proofs: i64 = conn.query_row(
            "SELECT COUNT(*) FROM task_proofs WHERE task_id = ?1",
            params![id],
            |row| row.get(0),
        )?;

        let (changed, outcome) = if proofs > 0 {
            (
                conn.execute("UPDATE tasks SET active = 0 WHERE id = ?1", params![id])?,
                TaskRemoval::Deactivated,
            )
        } else {
            (
                conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?,
                TaskRemoval::Deleted,
            )
        };

        if changed == 0 {
            return Err(WellnessError::NotFound("Task not found"));
        }
        Ok(outcome)
    }

    // ===== Proofs =====

    pub fn submit_proof(
        &self,
        company_id: &str,
        req: &SubmitProofRequest,
    ) -> Result<TaskProof, WellnessError> {
        validate_content_urls(&req.content_urls).map_err(WellnessError::Invalid)?;

        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        let active: Option<bool> = optional(tx.query_row(
            "SELECT active FROM tasks WHERE id = ?1",
            params![req.task_id],
            |row| row.get(0),
        ))?;
        match active {
            None => return Err(WellnessError::NotFound("Task not found")),
            Some(false) => {
                return Err(WellnessError::Invalid(
                    "Task is no longer accepting proofs".to_string(),
                ))
            }
            Some(true) => {}
        }

        let open: i64 = tx.query_row(
            "SELECT COUNT(*) FROM task_proofs
             WHERE task_id = ?1 AND company_id = ?2 AND status IN ('pending', 'approved')",
            params![req.task_id, company_id],
            |row| row.get(0),
        )?;
        if open > 0 {
            return Err(WellnessError::Conflict(
                "A proof for this task is already pending or approved".to_string(),
            ));
        }

        let content_urls: Vec<String> = req
            .content_urls
            .iter()
            .map(|u| u.trim().to_string())
            .collect();

        let proof = TaskProof {
            id: Uuid::new_v4().to_string(),
            task_id: req.task_id.clone(),
            company_id: company_id.to_string(),
            content_urls,
            notes: req.notes.clone().filter(|n| !n.trim().is_empty()),
            status: ReviewStatus::Pending,
            review_note: None,
            reviewed_by: None,
            awarded_points: 0,
            awarded_calories: 0,
            submitted_at: Utc::now().to_rfc3339(),
            reviewed_at: None,
        };

        tx.execute(
            "INSERT INTO task_proofs (id, task_id, company_id, content_urls_json, notes, status, submitted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                proof.id,
                proof.task_id,
                proof.company_id,
                serde_json::to_string(&proof.content_urls).map_err(anyhow::Error::from)?,
                proof.notes,
                proof.status.as_str(),
                proof.submitted_at
            ],
        )?;
        tx.commit()?;

        info!(
            proof_id = %proof.id,
            task_id = %proof.task_id,
            company_id = %proof.company_id,
            items = proof.content_urls.len(),
            "Proof submitted"
        );
        Ok(proof)
    }

    pub fn get_proof(&self, id: &str) -> Result<Option<TaskProof>> {
        let conn = self.db.conn();
        optional(conn.query_row(
            &format!("SELECT {PROOF_COLUMNS} FROM task_proofs WHERE id = ?1"),
            params![id],
            map_proof,
        ))
    }

    pub fn list_company_proofs(&self, company_id: &str) -> Result<Vec<TaskProof>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROOF_COLUMNS} FROM task_proofs WHERE company_id = ?1 ORDER BY submitted_at DESC"
        ))?;
        let rows = stmt
            .query_map(params![company_id], map_proof)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Review queue; oldest first.
    pub fn list_proofs(&self, status: Option<ReviewStatus>) -> Result<Vec<TaskProof>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROOF_COLUMNS} FROM task_proofs
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY submitted_at ASC"
        ))?;
        let rows = stmt
            .query_map(params![status.map(|s| s.as_str())], map_proof)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `pending -> approved`, crediting the task's points and calories to the
    /// company in the same transaction. The status guard in the UPDATE makes a
    /// second approval a no-op that reports a conflict.
    pub fn approve_proof(
        &self,
        id: &str,
        reviewer: &str,
        note: Option<&str>,
    ) -> Result<TaskProof, WellnessError> {
        {
            let mut conn = self.db.conn();
            let tx = conn.transaction()?;

            let (status, company_id, task_points, task_calories) = tx
                .query_row(
                    "SELECT p.status, p.company_id, t.points, t.calories
                     FROM task_proofs p JOIN tasks t ON t.id = p.task_id
                     WHERE p.id = ?1",
                    params![id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => {
                        WellnessError::NotFound("Proof not found")
                    }
                    other => other.into(),
                })?;

            if status != ReviewStatus::Pending.as_str() {
                return Err(WellnessError::Conflict(format!(
                    "Proof is already {}",
                    status
                )));
            }

            let updated = tx.execute(
                "UPDATE task_proofs
                 SET status = 'approved', review_note = ?2, reviewed_by = ?3, reviewed_at = ?4,
                     awarded_points = ?5, awarded_calories = ?6
                 WHERE id = ?1 AND status = 'pending'",
                params![
                    id,
                    note,
                    reviewer,
                    Utc::now().to_rfc3339(),
                    task_points,
                    task_calories
                ],
            )?;
            if updated != 1 {
                return Err(WellnessError::Conflict(
                    "Proof was reviewed concurrently".to_string(),
                ));
            }

            tx.execute(
                "UPDATE companies SET points = points + ?2, calories = calories + ?3 WHERE id = ?1",
                params![company_id, task_points, task_calories],
            )?;
            tx.commit()?;

            info!(
                proof_id = %id,
                company_id = %company_id,
                points = task_points,
                calories = task_calories,
                reviewer = %reviewer,
                "Proof approved"
            );
        }

        self.get_proof(id)?
            .ok_or(WellnessError::NotFound("Proof not found"))
    }

    /// `pending -> rejected`, or `approved -> rejected` which takes back exactly
    /// what the approval awarded (floored at zero).
    pub fn reject_proof(
        &self,
        id: &str,
        reviewer: &str,
        note: Option<&str>,
    ) -> Result<TaskProof, WellnessError> {
        {
            let mut conn = self.db.conn();
            let tx = conn.transaction()?;

            let row: Option<(String, String, i64, i64)> = optional(tx.query_row(
                "SELECT status, company_id, awarded_points, awarded_calories
                 FROM task_proofs WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            ))?;
            let (status, company_id, awarded_points, awarded_calories) =
                row.ok_or(WellnessError::NotFound("Proof not found"))?;

            let previous = ReviewStatus::from_str(&status).ok_or_else(|| {
                WellnessError::Storage(anyhow::anyhow!("unknown proof status {}", status))
            })?;
            if previous == ReviewStatus::Rejected {
                return Err(WellnessError::Conflict(
                    "Proof is already rejected".to_string(),
                ));
            }

            let updated = tx.execute(
                "UPDATE task_proofs
                 SET status = 'rejected', review_note = ?3, reviewed_by = ?4, reviewed_at = ?5,
                     awarded_points = 0, awarded_calories = 0
                 WHERE id = ?1 AND status = ?2",
                params![id, status, note, reviewer, Utc::now().to_rfc3339()],
            )?;
            if updated != 1 {
                return Err(WellnessError::Conflict(
                    "Proof was reviewed concurrently".to_string(),
                ));
            }

            if previous == ReviewStatus::Approved {
                tx.execute(
                    "UPDATE companies
                     SET points = MAX(points - ?2, 0), calories = MAX(calories - ?3, 0)
                     WHERE id = ?1",
                    params![company_id, awarded_points, awarded_calories],
                )?;
            }
            tx.commit()?;

            info!(
                proof_id = %id,
                company_id = %company_id,
                previous = previous.as_str(),
                revoked_points = if previous == ReviewStatus::Approved { awarded_points } else { 0 },
                reviewer = %reviewer,
                "Proof rejected"
            );
        }

        self.get_proof(id)?
            .ok_or(WellnessError::NotFound("Proof not found"))
    }
}

fn map_company(row: &Row<'_>) -> rusqlite::Result<Company> {
    Ok(Company {
        id: row.get(0)?,
        name: row.get(1)?,
        contact_email: row.get(2)?,
        points: row.get(3)?,
        calories: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        points: row.get(4)?,
        calories: row.get(5)?,
        active: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn map_proof(row: &Row<'_>) -> rusqlite::Result<TaskProof> {
    let urls_json: String = row.get(3)?;
    let status: String = row.get(5)?;
    Ok(TaskProof {
        id: row.get(0)?,
        task_id: row.get(1)?,
        company_id: row.get(2)?,
        content_urls: serde_json::from_str(&urls_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?,
        notes: row.get(4)?,
        status: ReviewStatus::from_str(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                format!("unknown proof status {}", status).into(),
            )
        })?,
        review_note: row.get(6)?,
        reviewed_by: row.get(7)?,
        awarded_points: row.get(8)?,
        awarded_calories: row.get(9)?,
        submitted_at: row.get(10)?,
        reviewed_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        store: WellnessStore,
        company_id: String,
        task: Task,
    }

    fn setup() -> Fixture {
        let db = Db::in_memory().unwrap();
        db.conn()
            .execute(
                "INSERT INTO companies (id, name, contact_email, points, calories, created_at)
                 VALUES ('acme', 'Acme', 'hr@acme.com', 0, 0, '2025-01-01T00:00:00Z')",
                [],
            )
            .unwrap();
        let store = WellnessStore::new(db);
        let task = store
            .create_task(&TaskInput {
                title: "Team walk".to_string(),
                description: "30 minutes outside".to_string(),
                category: Some("movement".to_string()),
                points: 50,
                calories: 200,
                active: None,
            })
            .unwrap();
        Fixture {
            store,
            company_id: "acme".to_string(),
            task,
        }
    }

    fn submit(f: &Fixture) -> TaskProof {
        f.store
            .submit_proof(
                &f.company_id,
                &SubmitProofRequest {
                    task_id: f.task.id.clone(),
                    content_urls: (0..6)
                        .map(|i| format!("https://cdn.example.com/{i}.jpg"))
                        .collect(),
                    notes: Some("done".to_string()),
                },
            )
            .unwrap()
    }

    fn points(f: &Fixture) -> (i64, i64) {
        let c = f.store.get_company(&f.company_id).unwrap().unwrap();
        (c.points, c.calories)
    }

    #[test]
    fn test_approve_awards_once() {
        let f = setup();
        let proof = submit(&f);

        let approved = f.store.approve_proof(&proof.id, "admin", Some("nice")).unwrap();
        assert_eq!(approved.status, ReviewStatus::Approved);
        assert_eq!(approved.awarded_points, 50);
        assert_eq!(points(&f), (50, 200));

        let again = f.store.approve_proof(&proof.id, "admin", None);
        assert!(matches!(again, Err(WellnessError::Conflict(_))));
        assert_eq!(points(&f), (50, 200));
    }

    #[test]
    fn test_reject_after_approve_revokes() {
        let f = setup();
        let proof = submit(&f);
        f.store.approve_proof(&proof.id, "admin", None).unwrap();

        let rejected = f
            .store
            .reject_proof(&proof.id, "admin", Some("blurry"))
            .unwrap();
        assert_eq!(rejected.status, ReviewStatus::Rejected);
        assert_eq!(rejected.review_note.as_deref(), Some("blurry"));
        assert_eq!(points(&f), (0, 0));

        assert!(matches!(
            f.store.reject_proof(&proof.id, "admin", None),
            Err(WellnessError::Conflict(_))
        ));
        // A rejected proof cannot be approved afterwards either.
        assert!(matches!(
            f.store.approve_proof(&proof.id, "admin", None),
            Err(WellnessError::Conflict(_))
        ));
    }

    #[test]
    fn test_revocation_uses_awarded_amount() {
        let f = setup();
        let proof = submit(&f);
        f.store.approve_proof(&proof.id, "admin", None).unwrap();

        let mut input = TaskInput {
            title: f.task.title.clone(),
            description: f.task.description.clone(),
            category: None,
            points: 500,
            calories: 1,
            active: None,
        };
        f.store.update_task(&f.task.id, &input).unwrap();
        f.store.reject_proof(&proof.id, "admin", None).unwrap();
        assert_eq!(points(&f), (0, 0));

        input.title = String::new();
        assert!(matches!(
            f.store.update_task(&f.task.id, &input),
            Err(WellnessError::Invalid(_))
        ));
    }

    #[test]
    fn test_duplicate_submission_blocked_until_rejected() {
        let f = setup();
        let proof = submit(&f);

        let dup = f.store.submit_proof(
            &f.company_id,
            &SubmitProofRequest {
                task_id: f.task.id.clone(),
                content_urls: (0..6).map(|i| format!("https://x.com/{i}.png")).collect(),
                notes: None,
            },
        );
        assert!(matches!(dup, Err(WellnessError::Conflict(_))));

        f.store.reject_proof(&proof.id, "admin", None).unwrap();
        let resubmitted = submit(&f);
        assert_eq!(resubmitted.status, ReviewStatus::Pending);
        assert_eq!(f.store.list_company_proofs("acme").unwrap().len(), 2);
    }

    #[test]
    fn test_submit_validation() {
        let f = setup();
        let short = f.store.submit_proof(
            &f.company_id,
            &SubmitProofRequest {
                task_id: f.task.id.clone(),
                content_urls: vec!["https://x.com/1.jpg".to_string()],
                notes: None,
            },
        );
        assert!(matches!(short, Err(WellnessError::Invalid(_))));

        let missing = f.store.submit_proof(
            &f.company_id,
            &SubmitProofRequest {
                task_id: "nope".to_string(),
                content_urls: (0..6).map(|i| format!("https://x.com/{i}.png")).collect(),
                notes: None,
            },
        );
        assert!(matches!(missing, Err(WellnessError::NotFound(_))));
    }

    #[test]
    fn test_delete_task_with_proofs_deactivates() {
        let f = setup();
        submit(&f);
        assert_eq!(
            f.store.delete_task(&f.task.id).unwrap(),
            TaskRemoval::Deactivated
        );
        assert!(f.store.list_tasks(false).unwrap().is_empty());
        assert_eq!(f.store.list_tasks(true).unwrap().len(), 1);

        let inactive = f.store.submit_proof(
            &f.company_id,
            &SubmitProofRequest {
                task_id: f.task.id.clone(),
                content_urls: (0..6).map(|i| format!("https://y.com/{i}.png")).collect(),
                notes: None,
            },
        );
        assert!(matches!(inactive, Err(WellnessError::Invalid(_))));

        let lone = f
            .store
            .create_task(&TaskInput {
                title: "Stretch".to_string(),
                description: String::new(),
                category: None,
                points: 5,
                calories: 10,
                active: Some(true),
            })
            .unwrap();
        assert_eq!(f.store.delete_task(&lone.id).unwrap(), TaskRemoval::Deleted);
        assert!(matches!(
            f.store.delete_task(&lone.id),
            Err(WellnessError::NotFound(_))
        ));
    }

    #[test]
    fn test_review_queue_filter() {
        let f = setup();
        let proof = submit(&f);
        assert_eq!(
            f.store
                .list_proofs(Some(ReviewStatus::Pending))
                .unwrap()
                .len(),
            1
        );
        f.store.approve_proof(&proof.id, "admin", None).unwrap();
        assert!(f
            .store
            .list_proofs(Some(ReviewStatus::Pending))
            .unwrap()
            .is_empty());
        assert_eq!(f.store.list_proofs(None).unwrap().len(), 1);
        assert_eq!(f.store.leaderboard(10).unwrap()[0].points, 50);
    }

    #[test]
    fn test_unknown_proof_status_is_an_error() {
        let f = setup();
        let proof = submit(&f);
        f.store
            .db
            .conn()
            .execute(
                "UPDATE task_proofs SET status = 'escalated' WHERE id = ?1",
                params![proof.id],
            )
            .unwrap();

        assert!(f.store.get_proof(&proof.id).is_err());
        assert!(f.store.list_company_proofs(&f.company_id).is_err());
    }
}
