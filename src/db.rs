//! SQLite Connection & Schema
//! Mission: Single shared connection for every store, schema applied on open
//!
//! All stores share one `Db` so cross-table writes (proof review awarding company
//! points, registration check-in) can run inside one transaction.

use anyhow::{Context, Result};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OpenFlags};
use std::sync::Arc;
use tracing::info;

const SCHEMA_SQL: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS companies (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    contact_email TEXT NOT NULL,
    points INTEGER NOT NULL DEFAULT 0 CHECK (points >= 0),
    calories INTEGER NOT NULL DEFAULT 0 CHECK (calories >= 0),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT UNIQUE NOT NULL COLLATE NOCASE,
    name TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL,
    company_id TEXT REFERENCES companies(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS password_reset_tokens (
    token TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    expires_at INTEGER NOT NULL,
    used INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    category TEXT,
    points INTEGER NOT NULL CHECK (points >= 0),
    calories INTEGER NOT NULL CHECK (calories >= 0),
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_proofs (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL REFERENCES tasks(id),
    company_id TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    content_urls_json TEXT NOT NULL,
    notes TEXT,
    status TEXT NOT NULL,
    review_note TEXT,
    reviewed_by TEXT,
    awarded_points INTEGER NOT NULL DEFAULT 0,
    awarded_calories INTEGER NOT NULL DEFAULT 0,
    submitted_at TEXT NOT NULL,
    reviewed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_task_proofs_company
    ON task_proofs(company_id, submitted_at DESC);
CREATE INDEX IF NOT EXISTS idx_task_proofs_status
    ON task_proofs(status, submitted_at ASC);

CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    short_code TEXT UNIQUE NOT NULL COLLATE NOCASE,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    location TEXT,
    starts_at TEXT NOT NULL,
    ends_at TEXT NOT NULL,
    capacity INTEGER,
    requires_approval INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS event_registrations (
    id TEXT PRIMARY KEY,
    event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
    attendee_name TEXT NOT NULL,
    attendee_email TEXT NOT NULL COLLATE NOCASE,
    company TEXT,
    status TEXT NOT NULL,
    checked_in_at TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (event_id, attendee_email)
);

CREATE INDEX IF NOT EXISTS idx_event_registrations_event
    ON event_registrations(event_id, created_at ASC);

CREATE TABLE IF NOT EXISTS poll_subjects (
    id TEXT PRIMARY KEY,
    event_id TEXT REFERENCES events(id) ON DELETE SET NULL,
    short_code TEXT UNIQUE NOT NULL COLLATE NOCASE,
    question TEXT NOT NULL,
    is_open INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS poll_options (
    id TEXT PRIMARY KEY,
    subject_id TEXT NOT NULL REFERENCES poll_subjects(id) ON DELETE CASCADE,
    label TEXT NOT NULL,
    position INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS poll_votes (
    subject_id TEXT NOT NULL REFERENCES poll_subjects(id) ON DELETE CASCADE,
    voter_key TEXT NOT NULL,
    option_id TEXT NOT NULL REFERENCES poll_options(id) ON DELETE CASCADE,
    voted_at TEXT NOT NULL,
    PRIMARY KEY (subject_id, voter_key)
);
"#;

/// Shared database handle.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open (or create) the database file and apply the schema.
    pub fn open(db_path: &str) -> Result<Self> {
        if db_path == ":memory:" {
            return Self::in_memory();
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        let db = Self::from_connection(conn)?;
        info!("Database ready at {}", db_path);
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to apply schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Lock the connection. Keep the guard short-lived; never hold it across `.await`.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

/// Map `QueryReturnedNoRows` to `None`.
pub fn optional<T>(result: rusqlite::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// True when the error is a UNIQUE / PRIMARY KEY violation.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_schema_applies_twice() {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().to_str().unwrap();
        Db::open(path).unwrap();
        // Re-opening an existing file must not fail on CREATE statements.
        let db = Db::open(path).unwrap();

        let count: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(count >= 10);
    }

    #[test]
    fn test_unique_violation_detection() {
        let db = Db::in_memory().unwrap();
        let conn = db.conn();
        conn.execute(
            "INSERT INTO companies (id, name, contact_email, created_at) VALUES ('c1', 'A', 'a@x', 'now')",
            [],
        )
        .unwrap();
        let err = conn
            .execute(
                "INSERT INTO companies (id, name, contact_email, created_at) VALUES ('c1', 'B', 'b@x', 'now')",
                [],
            )
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn test_optional_maps_no_rows() {
        let db = Db::in_memory().unwrap();
        let conn = db.conn();
        let res: Option<String> = optional(conn.query_row(
            "SELECT name FROM companies WHERE id = 'missing'",
            [],
            |row| row.get(0),
        ))
        .unwrap();
        assert!(res.is_none());
    }
}
