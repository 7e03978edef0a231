//! User Storage
//! Mission: Store accounts, company sign-ups and password-reset tokens in SQLite

use crate::auth::models::{
    normalize_email, NewUser, ResetTokenError, User, UserRole, MIN_PASSWORD_LEN,
};
use crate::db::{is_unique_violation, optional, Db};
use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use rand::RngCore;
use rusqlite::{params, types::Type, Row};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, name, password_hash, role, company_id, created_at";

/// Lowest bcrypt cost the hasher accepts.
pub const MIN_HASH_COST: u32 = 4;

/// Account operation failures that map to client errors.
#[derive(Debug)]
pub enum AccountError {
    InvalidEmail,
    WeakPassword,
    EmailTaken,
    MissingCompany,
    ResetToken(ResetTokenError),
    Storage(anyhow::Error),
}

impl From<anyhow::Error> for AccountError {
    fn from(err: anyhow::Error) -> Self {
        AccountError::Storage(err)
    }
}

impl From<rusqlite::Error> for AccountError {
    fn from(err: rusqlite::Error) -> Self {
        AccountError::Storage(err.into())
    }
}

impl std::fmt::Display for AccountError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountError::InvalidEmail => write!(f, "Invalid email address"),
            AccountError::WeakPassword => write!(
                f,
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            ),
            AccountError::EmailTaken => write!(f, "Email already registered"),
            AccountError::MissingCompany => write!(f, "Company accounts need an existing company"),
            AccountError::ResetToken(e) => write!(f, "{}", e),
            AccountError::Storage(e) => write!(f, "storage error: {}", e),
        }
    }
}

/// User storage backed by the shared database
pub struct UserStore {
    db: Db,
    hash_cost: u32,
}

impl UserStore {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            hash_cost: DEFAULT_COST,
        }
    }

    /// Override the bcrypt cost; tests pass `MIN_HASH_COST`.
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost.max(MIN_HASH_COST);
        self
    }

    fn hash_password(&self, password: &str) -> Result<String, AccountError> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AccountError::WeakPassword);
        }
        Ok(hash(password, self.hash_cost).context("Failed to hash password")?)
    }

    /// Create the bootstrap admin when no admin exists. Returns true if one was created.
    pub fn ensure_admin(&self, email: &str, password: &str) -> Result<bool> {
        let count: i64 = self
            .db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM users WHERE role = 'admin'",
                [],
                |row| row.get(0),
            )
            .context("Failed to check for admin users")?;

        if count > 0 {
            return Ok(false);
        }

        self.create_user(NewUser {
            email,
            name: "Administrator",
            password,
            role: UserRole::Admin,
            company_id: None,
        })
        .map_err(|e| anyhow::anyhow!("Failed to create bootstrap admin: {}", e))?;

        info!("Bootstrap admin created ({})", email);
        warn!("Change the bootstrap admin password in production");
        Ok(true)
    }

    /// Get user by email (case-insensitive)
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let Some(email) = normalize_email(email) else {
            return Ok(None);
        };
        let conn = self.db.conn();
        optional(conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
            params![email],
            map_user,
        ))
    }

    pub fn get_user(&self, id: &Uuid) -> Result<Option<User>> {
        let conn = self.db.conn();
        optional(conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id.to_string()],
            map_user,
        ))
    }

    /// Returns the user when email and password match.
    pub fn verify_credentials(&self, email: &str, password: &str) -> Result<Option<User>> {
        match self.get_user_by_email(email)? {
            Some(user) => {
                let valid =
                    verify(password, &user.password_hash).context("Failed to verify password")?;
                Ok(valid.then_some(user))
            }
            None => Ok(None),
        }
    }

    /// Create a new user
    pub fn create_user(&self, new: NewUser<'_>) -> Result<User, AccountError> {
        let email = normalize_email(new.email).ok_or(AccountError::InvalidEmail)?;
        let password_hash = self.hash_password(new.password)?;

        if new.role == UserRole::Company && new.company_id.is_none() {
            return Err(AccountError::MissingCompany);
        }

        let user = User {
            id: Uuid::new_v4(),
            email,
            name: new.name.trim().to_string(),
            password_hash,
            role: new.role,
            company_id: new.company_id.map(str::to_string),
            created_at: Utc::now().to_rfc3339(),
        };

        let conn = self.db.conn();
        if let Some(company_id) = &user.company_id {
            let exists: Option<i64> = optional(conn.query_row(
                "SELECT 1 FROM companies WHERE id = ?1",
                params![company_id],
                |row| row.get(0),
            ))?;
            if exists.is_none() {
                return Err(AccountError::MissingCompany);
            }
        }
        insert_user(&conn, &user)?;

        info!("Created user: {} ({})", user.email, user.role.as_str());
        Ok(user)
    }

    /// Company sign-up: creates the company and its first user atomically.
    pub fn register_company(
        &self,
        company_name: &str,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<User, AccountError> {
        let email = normalize_email(email).ok_or(AccountError::InvalidEmail)?;
        let password_hash = self.hash_password(password)?;
        let now = Utc::now().to_rfc3339();
        let company_id = Uuid::new_v4().to_string();

        let user = User {
            id: Uuid::new_v4(),
            email,
            name: name.trim().to_string(),
            password_hash,
            role: UserRole::Company,
            company_id: Some(company_id.clone()),
            created_at: now.clone(),
        };

        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO companies (id, name, contact_email, points, calories, created_at)
             VALUES (?1, ?2, ?3, 0, 0, ?4)",
            params![company_id, company_name.trim(), user.email, now],
        )?;
        insert_user(&tx, &user)?;
        tx.commit()?;

        info!(
            company = %company_name.trim(),
            email = %user.email,
            "Company registered"
        );
        Ok(user)
    }

    /// List all users (admin only)
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"
        ))?;
        let users = stmt
            .query_map([], map_user)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Delete a user by ID. Returns false when no such user exists.
    pub fn delete_user(&self, user_id: &Uuid) -> Result<bool> {
        let rows_affected = self.db.conn().execute(
            "DELETE FROM users WHERE id = ?1",
            params![user_id.to_string()],
        )?;

        if rows_affected > 0 {
            info!("Deleted user: {}", user_id);
        }
        Ok(rows_affected > 0)
    }

    /// Issue a single-use reset token. Only its SHA-256 digest is stored.
    pub fn issue_reset_token(&self, user_id: &Uuid, ttl: Duration) -> Result<String> {
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = hex::encode(raw);
        let expires_at = Utc::now().timestamp() + ttl.as_secs() as i64;

        self.db.conn().execute(
            "INSERT INTO password_reset_tokens (token, user_id, expires_at, used, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![
                token_digest(&token),
                user_id.to_string(),
                expires_at,
                Utc::now().to_rfc3339()
            ],
        )?;

        Ok(token)
    }

    /// Consume a reset token and set a new password. Every outstanding token of the
    /// user is invalidated.
    pub fn reset_password(&self, token: &str, new_password: &str) -> Result<Uuid, AccountError> {
        let password_hash = self.hash_password(new_password)?;
        let digest = token_digest(token.trim());

        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        let row: Option<(String, i64, bool)> = optional(tx.query_row(
            "SELECT user_id, expires_at, used FROM password_reset_tokens WHERE token = ?1",
            params![digest],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        ))?;

        let (user_id, expires_at, used) =
            row.ok_or(AccountError::ResetToken(ResetTokenError::Unknown))?;
        if used {
            return Err(AccountError::ResetToken(ResetTokenError::Used));
        }
        if expires_at <= Utc::now().timestamp() {
            return Err(AccountError::ResetToken(ResetTokenError::Expired));
        }

        tx.execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            params![password_hash, user_id],
        )?;
        tx.execute(
            "UPDATE password_reset_tokens SET used = 1 WHERE user_id = ?1",
            params![user_id],
        )?;
        tx.commit()?;

        info!("Password reset for user {}", user_id);
        Uuid::parse_str(&user_id).map_err(|e| AccountError::Storage(e.into()))
    }
}

fn insert_user(conn: &rusqlite::Connection, user: &User) -> Result<(), AccountError> {
    conn.execute(
        "INSERT INTO users (id, email, name, password_hash, role, company_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            user.id.to_string(),
            user.email,
            user.name,
            user.password_hash,
            user.role.as_str(),
            user.company_id,
            user.created_at,
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AccountError::EmailTaken
        } else {
            AccountError::Storage(e.into())
        }
    })?;
    Ok(())
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let role_str: String = row.get(4)?;
    Ok(User {
        id: Uuid::parse_str(&id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?,
        email: row.get(1)?,
        name: row.get(2)?,
        password_hash: row.get(3)?,
        role: UserRole::from_str(&role_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                Type::Text,
                format!("unknown role {}", role_str).into(),
            )
        })?,
        company_id: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> UserStore {
        let store = UserStore::new(Db::in_memory().unwrap()).with_hash_cost(MIN_HASH_COST);
        store.ensure_admin("admin@wellness.local", "admin12345").unwrap();
        store
    }

    #[test]
    fn test_bootstrap_admin_created_once() {
        let store = create_test_store();

        let admin = store
            .get_user_by_email("ADMIN@wellness.local")
            .unwrap()
            .unwrap();
        assert_eq!(admin.role, UserRole::Admin);

        assert!(!store.ensure_admin("other@wellness.local", "password1").unwrap());
        assert_eq!(store.list_users().unwrap().len(), 1);
    }

    #[test]
    fn test_credentials() {
        let store = create_test_store();

        assert!(store
            .verify_credentials("admin@wellness.local", "admin12345")
            .unwrap()
            .is_some());
        assert!(store
            .verify_credentials("admin@wellness.local", "wrongpassword")
            .unwrap()
            .is_none());
        assert!(store
            .verify_credentials("nobody@wellness.local", "admin12345")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_register_company_creates_both_rows() {
        let store = create_test_store();
        let user = store
            .register_company("Acme", "Jane", "jane@acme.com", "password123")
            .unwrap();

        assert_eq!(user.role, UserRole::Company);
        let company_id = user.company_id.clone().unwrap();
        let name: String = store
            .db
            .conn()
            .query_row(
                "SELECT name FROM companies WHERE id = ?1",
                params![company_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(name, "Acme");
    }

    #[test]
    fn test_duplicate_email_rolls_back_company() {
        let store = create_test_store();
        store
            .register_company("Acme", "Jane", "jane@acme.com", "password123")
            .unwrap();
        let err = store
            .register_company("Other", "Jane", "JANE@acme.com", "password123")
            .unwrap_err();
        assert!(matches!(err, AccountError::EmailTaken));

        let companies: i64 = store
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM companies", [], |row| row.get(0))
            .unwrap();
        assert_eq!(companies, 1);
    }

    #[test]
    fn test_validation() {
        let store = create_test_store();
        assert!(matches!(
            store.register_company("Acme", "J", "not-an-email", "password123"),
            Err(AccountError::InvalidEmail)
        ));
        assert!(matches!(
            store.register_company("Acme", "J", "j@acme.com", "short"),
            Err(AccountError::WeakPassword)
        ));
        assert!(matches!(
            store.create_user(NewUser {
                email: "x@acme.com",
                name: "X",
                password: "password123",
                role: UserRole::Company,
                company_id: Some("missing"),
            }),
            Err(AccountError::MissingCompany)
        ));
    }

    #[test]
    fn test_delete_user() {
        let store = create_test_store();
        let user = store
            .create_user(NewUser {
                email: "temp@wellness.local",
                name: "Temp",
                password: "password123",
                role: UserRole::Admin,
                company_id: None,
            })
            .unwrap();

        assert!(store.delete_user(&user.id).unwrap());
        assert!(store.get_user(&user.id).unwrap().is_none());
        assert!(!store.delete_user(&user.id).unwrap());
    }

    #[test]
    fn test_reset_token_single_use() {
        let store = create_test_store();
        let admin = store
            .get_user_by_email("admin@wellness.local")
            .unwrap()
            .unwrap();

        let token = store
            .issue_reset_token(&admin.id, Duration::from_secs(3600))
            .unwrap();
        let user_id = store.reset_password(&token, "new-password-1").unwrap();
        assert_eq!(user_id, admin.id);

        assert!(store
            .verify_credentials("admin@wellness.local", "new-password-1")
            .unwrap()
            .is_some());

        let again = store.reset_password(&token, "new-password-2");
        assert!(matches!(
            again,
            Err(AccountError::ResetToken(ResetTokenError::Used))
        ));
    }

    #[test]
    fn test_reset_token_expired_and_unknown() {
        let store = create_test_store();
        let admin = store
            .get_user_by_email("admin@wellness.local")
            .unwrap()
            .unwrap();

        let token = store
            .issue_reset_token(&admin.id, Duration::from_secs(0))
            .unwrap();
        assert!(matches!(
            store.reset_password(&token, "new-password-1"),
            Err(AccountError::ResetToken(ResetTokenError::Expired))
        ));
        assert!(matches!(
            store.reset_password("deadbeef", "new-password-1"),
            Err(AccountError::ResetToken(ResetTokenError::Unknown))
        ));
    }
}
