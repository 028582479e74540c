//! Persisted entities handed out by the [`Store`](crate::storage::Store)

use chrono::{DateTime, Utc};

/// Name of the mailbox that receives local deliveries and bounces
pub const INBOX: &str = "INBOX";

/// Flag counted by [`Mailbox::recent`]
pub const FLAG_RECENT: &str = "\\Recent";

/// Flag whose absence is counted by [`Mailbox::unseen`]
pub const FLAG_SEEN: &str = "\\Seen";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    /// Login name, usually the full email address
    pub identity: String,
    pub admin: bool,
}

/// A mailbox row plus counts derived from its messages at read time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub uid_next: u32,
    pub uid_validity: u32,
    pub subscribed: bool,
    pub messages: u32,
    pub recent: u32,
    pub unseen: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub mailbox_id: i64,
    /// Raw RFC 5322 bytes
    pub content: Vec<u8>,
    pub uid: u32,
    pub flags: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

/// One (message, recipient) pair awaiting remote delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub id: i64,
    pub from: String,
    pub to: String,
    pub content: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub retries: u32,
}

/// Domain part of an address, `None` when the address has no usable `@`
pub fn domain_part(address: &str) -> Option<&str> {
    let (local, domain) = address.trim().rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    Some(domain.trim_end_matches('>'))
}

/// Collapse duplicate flags while keeping their first-seen order
pub(crate) fn dedup_flags<S: AsRef<str>>(flags: &[S]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(flags.len());
    for flag in flags {
        let flag = flag.as_ref();
        if !unique.iter().any(|f| f == flag) {
            unique.push(flag.to_string());
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_part() {
        assert_eq!(domain_part("bob@remote.example"), Some("remote.example"));
        assert_eq!(domain_part("odd@local@remote.example"), Some("remote.example"));
        assert_eq!(domain_part("bob"), None);
        assert_eq!(domain_part("@remote.example"), None);
        assert_eq!(domain_part("bob@"), None);
    }

    #[test]
    fn test_dedup_flags_keeps_order() {
        let flags = dedup_flags(&["\\Seen", "\\Flagged", "\\Seen"]);
        assert_eq!(flags, vec!["\\Seen".to_string(), "\\Flagged".to_string()]);
    }
}
