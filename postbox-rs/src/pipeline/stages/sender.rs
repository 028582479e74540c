use crate::delivery::Relay;
use crate::error::{MailError, Result};
use crate::pipeline::{Flow, ReceivedMsg, Stage};
use crate::storage::Store;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Relays outbound mail, queueing each recipient that cannot be reached
///
/// Recipients are independent: one failing recipient is queued alone and
/// never causes a resend to the others. The submission only fails when a
/// failed recipient could not be queued either.
pub struct Sender {
    store: Store,
    relay: Arc<dyn Relay>,
}

impl Sender {
    pub fn new(store: Store, relay: Arc<dyn Relay>) -> Self {
        Self { store, relay }
    }
}

#[async_trait]
impl Stage for Sender {
    fn name(&self) -> &'static str {
        "sender"
    }

    async fn process(&self, msg: &mut ReceivedMsg) -> Result<Flow> {
        let mut delivered = 0;
        let mut queued = 0;
        let mut failures = Vec::new();

        for rcpt in &msg.to {
            let err = match self.relay.relay(&msg.from, rcpt, &msg.content).await {
                Ok(()) => {
                    delivered += 1;
                    continue;
                }
                Err(e) => e,
            };

            warn!(msg_id = %msg.id, "Immediate delivery to {} failed, queueing: {}", rcpt, err);
            match self.store.insert_queue(&msg.from, rcpt, &msg.content, Utc::now()).await {
                Ok(entry) => {
                    queued += 1;
                    info!(msg_id = %msg.id, queue_id = entry.id, "Queued message for {}", rcpt);
                }
                Err(e) => {
                    error!(msg_id = %msg.id, "Failed to queue message for {}: {}", rcpt, e);
                    failures.push(format!("{}: {}", rcpt, e));
                }
            }
        }

        info!(msg_id = %msg.id, delivered, queued, failed = failures.len(), "Submission handled");
        if !failures.is_empty() {
            return Err(MailError::Storage(failures.join("\n")));
        }
        Ok(Flow::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailFor(&'static str);

    #[async_trait]
    impl Relay for FailFor {
        async fn relay(&self, _from: &str, to: &str, _content: &[u8]) -> Result<()> {
            if to == self.0 {
                Err(MailError::Delivery("unreachable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_only_failed_recipient_is_queued() {
        let store = Store::in_memory().await.unwrap();
        let sender = Sender::new(store.clone(), Arc::new(FailFor("c@remote.example")));
        let mut msg = ReceivedMsg::new(
            "a@local.example",
            vec![
                "b@remote.example".to_string(),
                "c@remote.example".to_string(),
                "d@remote.example".to_string(),
            ],
            b"Subject: hi\r\n\r\nbody\r\n".to_vec(),
        );

        assert_eq!(sender.process(&mut msg).await.unwrap(), Flow::Done);

        let queue = store.get_queue().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].to, "c@remote.example");
        assert_eq!(queue[0].from, "a@local.example");
        assert_eq!(queue[0].retries, 0);
        assert_eq!(queue[0].content, msg.content);
    }
}
