//! Poll Storage
//! Mission: Poll subjects, options and one upserted vote per voter key
//!
//! Every change that alters results is published to the hub while the database
//! lock is still held, so subscribers see tallies in commit order.

use crate::db::{is_unique_violation, optional, Db};
use crate::polls::hub::PollHub;
use crate::polls::models::{
    validate_voter_key, CreatePollRequest, OptionTally, PollOption, PollResults, PollSubject,
};
use crate::short_code;
use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const SUBJECT_COLUMNS: &str = "id, event_id, short_code, question, is_open, created_at";
const SHORT_CODE_ATTEMPTS: usize = 8;

#[derive(Debug)]
pub enum PollError {
    NotFound(&'static str),
    Invalid(String),
    Conflict(String),
    Closed,
    Storage(anyhow::Error),
}

impl From<anyhow::Error> for PollError {
    fn from(err: anyhow::Error) -> Self {
        PollError::Storage(err)
    }
}

impl From<rusqlite::Error> for PollError {
    fn from(err: rusqlite::Error) -> Self {
        PollError::Storage(err.into())
    }
}

/// Row of `poll_subjects` before options are attached.
struct SubjectRow {
    id: String,
    event_id: Option<String>,
    short_code: String,
    question: String,
    is_open: bool,
    created_at: String,
}

pub struct PollStore {
    db: Db,
    hub: Arc<PollHub>,
}

impl PollStore {
    pub fn new(db: Db, hub: Arc<PollHub>) -> Self {
        Self { db, hub }
    }

    pub fn hub(&self) -> &Arc<PollHub> {
        &self.hub
    }

    pub fn create_poll(&self, req: &CreatePollRequest) -> Result<PollSubject, PollError> {
        let labels = req.validate().map_err(PollError::Invalid)?;
        let requested_code = match req.short_code.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(raw) => Some(
                short_code::normalize(raw)
                    .ok_or_else(|| PollError::Invalid(format!("Invalid short code: {}", raw)))?,
            ),
            None => None,
        };
        let event_id = req.event_id.clone().filter(|e| !e.trim().is_empty());

        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        if let Some(event_id) = &event_id {
            let exists: Option<i64> = optional(tx.query_row(
                "SELECT 1 FROM events WHERE id = ?1",
                params![event_id],
                |row| row.get(0),
            ))?;
            if exists.is_none() {
                return Err(PollError::NotFound("Event not found"));
            }
        }

        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339();
        let attempts = if requested_code.is_some() { 1 } else { SHORT_CODE_ATTEMPTS };
        let mut code = None;
        for _ in 0..attempts {
            let candidate = requested_code.clone().unwrap_or_else(short_code::generate);
            match tx.execute(
                "INSERT INTO poll_subjects (id, event_id, short_code, question, is_open, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                params![id, event_id, candidate, req.question.trim(), created_at],
            ) {
                Ok(_) => {
                    code = Some(candidate);
                    break;
                }
                Err(e) if is_unique_violation(&e) => {
                    if requested_code.is_some() {
                        return Err(PollError::Conflict(format!(
                            "Short code {} is already in use",
                            candidate
                        )));
                    }
                    warn!(short_code = %candidate, "Short code collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        let short_code = code.ok_or_else(|| {
            PollError::Storage(anyhow::anyhow!("could not allocate a unique short code"))
        })?;

        let mut options = Vec::with_capacity(labels.len());
        for (position, label) in labels.into_iter().enumerate() {
            let option = PollOption {
                id: Uuid::new_v4().to_string(),
                label,
                position: position as i64,
            };
            tx.execute(
                "INSERT INTO poll_options (id, subject_id, label, position) VALUES (?1, ?2, ?3, ?4)",
                params![option.id, id, option.label, option.position],
            )?;
            options.push(option);
        }
        tx.commit()?;

        info!(poll_id = %id, short_code = %short_code, options = options.len(), "Poll created");
        Ok(PollSubject {
            id,
            event_id,
            short_code,
            question: req.question.trim().to_string(),
            is_open: true,
            created_at,
            options,
        })
    }

    /// Resolve a short code to its subject id.
    pub fn resolve_code(&self, code: &str) -> Result<Option<String>> {
        let Some(code) = short_code::normalize(code) else {
            return Ok(None);
        };
        let conn = self.db.conn();
        optional(conn.query_row(
            "SELECT id FROM poll_subjects WHERE short_code = ?1",
            params![code],
            |row| row.get(0),
        ))
    }

    /// All polls, or those attached to one event. Newest first.
    pub fn list_polls(&self, event_id: Option<&str>) -> Result<Vec<PollSubject>> {
        let conn = self.db.conn();
        let rows = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SUBJECT_COLUMNS} FROM poll_subjects
                 WHERE (?1 IS NULL OR event_id = ?1)
                 ORDER BY created_at DESC"
            ))?;
            let rows = stmt
                .query_map(params![event_id], map_subject)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        rows.into_iter()
            .map(|row| attach_options(&conn, row))
            .collect()
    }

    pub fn set_open(&self, id: &str, open: bool) -> Result<PollResults, PollError> {
        let conn = self.db.conn();
        let changed = conn.execute(
            "UPDATE poll_subjects SET is_open = ?2 WHERE id = ?1",
            params![id, open],
        )?;
        if changed == 0 {
            return Err(PollError::NotFound("Poll not found"));
        }
        let results = tally(&conn, id)?.ok_or(PollError::NotFound("Poll not found"))?;
        let reached = self.hub.publish(results.clone());
        drop(conn);

        info!(poll_id = %id, open, reached, "Poll state changed");
        Ok(results)
    }

    pub fn delete_poll(&self, id: &str) -> Result<bool> {
        let changed = self
            .db
            .conn()
            .execute("DELETE FROM poll_subjects WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Record a vote; a repeat vote from the same key replaces the earlier choice.
    pub fn vote(
        &self,
        subject_id: &str,
        option_id: &str,
        voter_key: &str,
    ) -> Result<PollResults, PollError> {
        let voter_key = validate_voter_key(voter_key).map_err(PollError::Invalid)?;

        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        let subject = load_subject(&tx, subject_id)?.ok_or(PollError::NotFound("Poll not found"))?;
        if !subject.is_open {
            return Err(PollError::Closed);
        }

        let belongs: Option<i64> = optional(tx.query_row(
            "SELECT 1 FROM poll_options WHERE id = ?1 AND subject_id = ?2",
            params![option_id, subject_id],
            |row| row.get(0),
        ))?;
        if belongs.is_none() {
            return Err(PollError::Invalid(
                "Option does not belong to this poll".to_string(),
            ));
        }

        tx.execute(
            "INSERT INTO poll_votes (subject_id, voter_key, option_id, voted_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (subject_id, voter_key)
             DO UPDATE SET option_id = excluded.option_id, voted_at = excluded.voted_at",
            params![subject_id, voter_key, option_id, Utc::now().to_rfc3339()],
        )?;
        let results = tally(&tx, subject_id)?.ok_or(PollError::NotFound("Poll not found"))?;
        tx.commit()?;
        let reached = self.hub.publish(results.clone());
        drop(conn);

        info!(
            poll_id = %subject_id,
            option_id = %option_id,
            total_votes = results.total_votes,
            reached,
            "Vote cast"
        );
        Ok(results)
    }

    pub fn results(&self, subject_id: &str) -> Result<Option<PollResults>> {
        let conn = self.db.conn();
        tally(&conn, subject_id)
    }
}

fn load_subject(conn: &Connection, id: &str) -> Result<Option<SubjectRow>> {
    optional(conn.query_row(
        &format!("SELECT {SUBJECT_COLUMNS} FROM poll_subjects WHERE id = ?1"),
        params![id],
        map_subject,
    ))
}

fn attach_options(conn: &Connection, row: SubjectRow) -> Result<PollSubject> {
    let mut stmt = conn.prepare(
        "SELECT id, label, position FROM poll_options WHERE subject_id = ?1 ORDER BY position ASC",
    )?;
    let options = stmt
        .query_map(params![row.id], |r| {
            Ok(PollOption {
                id: r.get(0)?,
                label: r.get(1)?,
                position: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PollSubject {
        id: row.id,
        event_id: row.event_id,
        short_code: row.short_code,
        question: row.question,
        is_open: row.is_open,
        created_at: row.created_at,
        options,
    })
}

/// Vote counts per option, zero-vote options included, in display order.
fn tally(conn: &Connection, subject_id: &str) -> Result<Option<PollResults>> {
    let Some(subject) = load_subject(conn, subject_id)? else {
        return Ok(None);
    };
    let mut stmt = conn.prepare(
        "SELECT o.id, o.label, COUNT(v.voter_key)
         FROM poll_options o
         LEFT JOIN poll_votes v ON v.option_id = o.id AND v.subject_id = o.subject_id
         WHERE o.subject_id = ?1
         GROUP BY o.id, o.label, o.position
         ORDER BY o.position ASC",
    )?;
    let options = stmt
        .query_map(params![subject_id], |r| {
            Ok(OptionTally {
                option_id: r.get(0)?,
                label: r.get(1)?,
                votes: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(PollResults {
        total_votes: options.iter().map(|o| o.votes).sum(),
        subject_id: subject.id,
        short_code: subject.short_code,
        question: subject.question,
        is_open: subject.is_open,
        options,
    }))
}

fn map_subject(row: &Row<'_>) -> rusqlite::Result<SubjectRow> {
    Ok(SubjectRow {
        id: row.get(0)?,
        event_id: row.get(1)?,
        short_code: row.get(2)?,
        question: row.get(3)?,
        is_open: row.get(4)?,
        created_at: row.get(5)?,
    })
}
