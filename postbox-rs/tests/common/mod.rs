//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use postbox_rs::delivery::Relay;
use postbox_rs::{Config, MailError, Postbox, Result, Store};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Relay that refuses a configurable set of recipients and records the rest
#[derive(Default)]
pub struct FakeRelay {
    unreachable: Mutex<HashSet<String>>,
    delivered: Mutex<Vec<(String, String, Vec<u8>)>>,
}

impl FakeRelay {
    pub fn refusing(recipients: &[&str]) -> Arc<Self> {
        let relay = Self::default();
        relay
            .unreachable
            .lock()
            .unwrap()
            .extend(recipients.iter().map(|r| r.to_string()));
        Arc::new(relay)
    }

    pub fn make_reachable(&self, recipient: &str) {
        self.unreachable.lock().unwrap().remove(recipient);
    }

    /// (from, to, content) of every accepted delivery
    pub fn delivered(&self) -> Vec<(String, String, Vec<u8>)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Relay for FakeRelay {
    async fn relay(&self, from: &str, to: &str, content: &[u8]) -> Result<()> {
        if self.unreachable.lock().unwrap().contains(to) {
            return Err(MailError::Delivery(format!("no reachable exchanger for {}", to)));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((from.to_string(), to.to_string(), content.to_vec()));
        Ok(())
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.domain = "local.example".to_string();
    config.server.hostname = "mail.local.example".to_string();
    config.storage.database_url = "sqlite::memory:".to_string();
    config.dkim.sign = false;
    config.dkim.verify = false;
    config.delivery.max_retries = 3;
    config
}

pub async fn postbox_with(config: Config, relay: Arc<FakeRelay>) -> Postbox {
    let store = Store::in_memory().await.unwrap();
    Postbox::assemble(config, store, relay, None).await.unwrap()
}

pub fn message(from: &str, to: &str, subject: &str) -> Vec<u8> {
    format!(
        "From: <{from}>\r\nTo: <{to}>\r\nSubject: {subject}\r\nMessage-ID: <{subject}@local.example>\r\n\r\nHello from {from}\r\n"
    )
    .into_bytes()
}
