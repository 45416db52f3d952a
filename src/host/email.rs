// src/host/email.rs
//! Email adapter contract

use crate::host::HostError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Message as passed by `email.send({...})`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    /// Recipient(s), comma separated
    pub to: String,

    pub subject: String,

    pub body: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Send `body` as HTML instead of plain text
    #[serde(default)]
    pub html: bool,
}

impl EmailMessage {
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to.split(',').map(str::trim).filter(|r| !r.is_empty())
    }

    pub fn validate(&self) -> Result<(), HostError> {
        if self.recipients().next().is_none() {
            return Err(HostError::InvalidArguments("email has no recipients".to_string()));
        }
        if self.recipients().any(|r| !r.contains('@')) {
            return Err(HostError::InvalidArguments(format!(
                "invalid recipient list: {}",
                self.to
            )));
        }
        Ok(())
    }
}

/// Outgoing mail
#[async_trait]
pub trait Emailer: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), HostError>;
}

/// Emailer that records messages in the log instead of delivering them
#[derive(Debug, Default, Clone)]
pub struct LogEmailer;

impl LogEmailer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Emailer for LogEmailer {
    async fn send(&self, message: EmailMessage) -> Result<(), HostError> {
        message.validate()?;
        info!(
            to = %message.to,
            subject = %message.subject,
            html = message.html,
            "Email accepted (log delivery)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(to: &str) -> EmailMessage {
        EmailMessage {
            to: to.to_string(),
            subject: "Hi".to_string(),
            body: "Hello".to_string(),
            from: None,
            html: false,
        }
    }

    #[test]
    fn test_recipients() {
        let msg = message("a@example.com, b@example.com");
        let recipients: Vec<&str> = msg.recipients().collect();
        assert_eq!(recipients, vec!["a@example.com", "b@example.com"]);
    }

    #[test]
    fn test_deserialize_script_shape() {
        let msg: EmailMessage =
            serde_json::from_str(r#"{"to":"a@example.com","subject":"s","body":"b","html":true}"#)
                .unwrap();
        assert!(msg.html);
        assert!(msg.from.is_none());
    }

    #[tokio::test]
    async fn test_log_emailer_validates() {
        let emailer = LogEmailer::new();
        assert!(emailer.send(message("a@example.com")).await.is_ok());
        assert!(emailer.send(message("")).await.is_err());
        assert!(emailer.send(message("not-an-address")).await.is_err());
    }
}
