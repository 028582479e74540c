use crate::config::SmtpConfig;
use crate::dkim::Verification;
use crate::error::{MailError, Result};
use crate::model::domain_part;
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use uuid::Uuid;

/// Intake limits applied before a message enters a chain
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_message_size: usize,
    pub max_recipients: usize,
}

impl From<&SmtpConfig> for Limits {
    fn from(config: &SmtpConfig) -> Self {
        Self {
            max_message_size: config.max_message_size,
            max_recipients: config.max_recipients,
        }
    }
}

/// A message travelling through a pipeline
///
/// Stages may rewrite `content` (signing) and fill `verifications`; the
/// envelope itself is fixed once the message is accepted.
#[derive(Debug, Clone)]
pub struct ReceivedMsg {
    /// Correlates log lines of one message across stages
    pub id: Uuid,
    pub from: String,
    pub to: Vec<String>,
    pub content: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    /// DKIM results, set by the verifier stage
    pub verifications: Vec<Verification>,
}

impl ReceivedMsg {
    pub fn new(from: impl Into<String>, to: Vec<String>, content: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.into(),
            to,
            content,
            timestamp: Utc::now(),
            verifications: Vec::new(),
        }
    }

    /// Build a message after enforcing the intake limits
    pub fn checked(from: &str, to: Vec<String>, content: Vec<u8>, limits: &Limits) -> Result<Self> {
        if to.is_empty() {
            return Err(MailError::Validation("no recipients".to_string()));
        }
        if to.len() > limits.max_recipients {
            return Err(MailError::Validation(format!(
                "too many recipients: {} (max {})",
                to.len(),
                limits.max_recipients
            )));
        }
        if let Some(bad) = to.iter().find(|rcpt| domain_part(rcpt).is_none()) {
            return Err(MailError::InvalidEmail(bad.clone()));
        }
        if content.is_empty() {
            return Err(MailError::Validation("empty message".to_string()));
        }
        if content.len() > limits.max_message_size {
            return Err(MailError::Validation(format!(
                "message too large: {} bytes (max {})",
                content.len(),
                limits.max_message_size
            )));
        }

        let parsed = MessageParser::default()
            .parse(&content)
            .ok_or_else(|| MailError::Validation("message is not parseable".to_string()))?;
        if parsed.headers().is_empty() {
            return Err(MailError::Validation("message has no headers".to_string()));
        }

        Ok(Self::new(from, to, content))
    }
}
