//! Outgoing Mail
//! Mission: Deliver welcome, password-reset and ticket mails without ever blocking
//! the request that triggered them.
//!
//! Handlers hand mail to [`dispatch`], which sends on a background task.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> Result<()>;
}

/// Logs mail instead of sending it. Used when no relay is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<()> {
        info!(to = %mail.to, subject = %mail.subject, "Mail (log only)");
        Ok(())
    }
}

/// Posts mail as JSON to an HTTP relay.
pub struct WebhookMailer {
    client: reqwest::Client,
    url: String,
    from: String,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

impl WebhookMailer {
    pub fn new(client: reqwest::Client, url: String, from: String) -> Self {
        Self { client, url, from }
    }
}

#[async_trait]
impl Mailer for WebhookMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<()> {
        let payload = WebhookPayload {
            from: &self.from,
            to: &mail.to,
            subject: &mail.subject,
            text: &mail.body,
        };

        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .context("Mail relay unreachable")?;

        if !resp.status().is_success() {
            anyhow::bail!("Mail relay returned {}", resp.status());
        }

        info!(to = %mail.to, subject = %mail.subject, "Mail sent");
        Ok(())
    }
}

/// Keeps every mail in memory. Handy for tests and local demos.
#[derive(Default)]
pub struct MemoryMailer {
    outbox: Mutex<Vec<OutgoingMail>>,
    fail: bool,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer whose every send fails.
    pub fn failing() -> Self {
        Self {
            outbox: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.outbox.lock().clone()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<()> {
        if self.fail {
            anyhow::bail!("mail delivery disabled");
        }
        self.outbox.lock().push(mail);
        Ok(())
    }
}

/// Send mail on a non-critical path: failures are logged, never returned.
pub async fn send_best_effort(mailer: &Arc<dyn Mailer>, mail: OutgoingMail) {
    let to = mail.to.clone();
    let subject = mail.subject.clone();
    if let Err(e) = mailer.send(mail).await {
        warn!(to = %to, subject = %subject, "Mail delivery failed: {:#}", e);
    }
}

/// Send in the background so a slow relay never holds up the response.
pub fn dispatch(mailer: Arc<dyn Mailer>, mail: OutgoingMail) -> JoinHandle<()> {
    tokio::spawn(async move { send_best_effort(&mailer, mail).await })
}

pub fn welcome_mail(to: &str, name: &str, login_url: &str) -> OutgoingMail {
    OutgoingMail {
        to: to.to_string(),
        subject: "Your wellness admin account".to_string(),
        body: format!(
            "Hi {name},\n\nAn administrator account has been created for you.\nSign in at {login_url} with this email address.\n"
        ),
    }
}

pub fn password_reset_mail(to: &str, reset_url: &str) -> OutgoingMail {
    OutgoingMail {
        to: to.to_string(),
        subject: "Reset your password".to_string(),
        body: format!(
            "A password reset was requested for this account.\nOpen {reset_url} within one hour to choose a new password.\nIf you did not ask for this, ignore this mail.\n"
        ),
    }
}

pub fn ticket_mail(to: &str, name: &str, event_title: &str, check_in_url: &str) -> OutgoingMail {
    OutgoingMail {
        to: to.to_string(),
        subject: format!("Your ticket for {event_title}"),
        body: format!(
            "Hi {name},\n\nYour registration for {event_title} is approved.\nShow this code at the entrance: {check_in_url}\n"
        ),
    }
}
