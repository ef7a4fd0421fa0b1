//! Guardian notifications.
//!
//! A notifier delivers a text message to a guardian's contact number. The
//! daemon builds exactly one channel at startup and hands it to the
//! attendance service; delivery failures are logged and never retried.

use chrono::{DateTime, Local};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("invalid destination '{0}': no digits")]
    InvalidDestination(String),
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Events a guardian is told about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Registered { name: String },
    CheckedIn { name: String, at: DateTime<Local> },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Registered { .. } => "registration",
            Notification::CheckedIn { .. } => "check-in",
        }
    }

    /// Human-readable message body.
    pub fn message(&self) -> String {
        match self {
            Notification::Registered { name } => format!(
                "Registration successful! {name} has been enrolled in the attendance system. \
                 Their face is now on file."
            ),
            Notification::CheckedIn { name, at } => format!(
                "Check-in recorded: {name} checked in at {}.",
                at.format("%H:%M")
            ),
        }
    }
}

/// Delivery channel for guardian messages.
pub trait Notifier: Send + Sync + 'static {
    /// Short name for status output.
    fn kind(&self) -> &'static str;

    fn notify(
        &self,
        destination: &str,
        message: &str,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// Reduce a phone number to its digits (`+62 812-3456` → `628123456`).
pub fn normalize_contact(contact: &str) -> Result<String, NotifyError> {
    let digits: String = contact.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(NotifyError::InvalidDestination(contact.to_string()));
    }
    Ok(digits)
}

/// Writes messages to the daemon log instead of sending them.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn kind(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, destination: &str, message: &str) -> Result<(), NotifyError> {
        let to = normalize_contact(destination)?;
        tracing::info!(to = %to, message, "guardian notification (log only)");
        Ok(())
    }
}

/// Posts messages to an HTTP messaging gateway as `{"to": ..., "message": ...}`.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn kind(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, destination: &str, message: &str) -> Result<(), NotifyError> {
        let to = normalize_contact(destination)?;
        let body = serde_json::json!({ "to": to, "message": message });
        self.http
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        tracing::debug!(to = %to, url = %self.url, "gateway accepted message");
        Ok(())
    }
}

/// The channel selected by configuration.
pub enum NotifyChannel {
    Log(LogNotifier),
    Webhook(WebhookNotifier),
}

impl NotifyChannel {
    pub fn from_config(config: &Config) -> Result<Self, NotifyError> {
        match &config.notify_webhook_url {
            Some(url) => {
                let timeout = Duration::from_secs(config.notify_timeout_secs);
                tracing::info!(url = %url, "guardian notifications via webhook");
                Ok(Self::Webhook(WebhookNotifier::new(url.clone(), timeout)?))
            }
            None => {
                tracing::info!("no notify webhook configured; notifications go to the log");
                Ok(Self::Log(LogNotifier))
            }
        }
    }
}

impl Notifier for NotifyChannel {
    fn kind(&self) -> &'static str {
        match self {
            NotifyChannel::Log(n) => n.kind(),
            NotifyChannel::Webhook(n) => n.kind(),
        }
    }

    async fn notify(&self, destination: &str, message: &str) -> Result<(), NotifyError> {
        match self {
            NotifyChannel::Log(n) => n.notify(destination, message).await,
            NotifyChannel::Webhook(n) => n.notify(destination, message).await,
        }
    }
}
