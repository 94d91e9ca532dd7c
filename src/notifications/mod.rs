//! Outbound email.
//!
//! The rest of the crate only sees the [`Mailer`] capability; delivery goes
//! through SMTP in production and through an in-memory recorder in tests.

pub mod email;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use email::SmtpMailer;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()>;
}

/// Send with a caller-enforced deadline
pub async fn send_with_timeout(
    mailer: &dyn Mailer,
    timeout: Duration,
    to: &str,
    subject: &str,
    html: &str,
) -> Result<()> {
    match tokio::time::timeout(timeout, mailer.send(to, subject, html)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "email delivery timed out after {}s",
            timeout.as_secs()
        )),
    }
}

/// Captures outgoing mail for assertions
#[cfg(test)]
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: std::sync::Mutex<Vec<SentEmail>>,
}

#[cfg(test)]
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[cfg(test)]
impl RecordingMailer {
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()> {
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
        });
        Ok(())
    }
}
