use crate::error::Result;
use crate::model::FLAG_RECENT;
use crate::pipeline::{Flow, ReceivedMsg, Stage};
use crate::storage::Store;
use async_trait::async_trait;
use tracing::{info, warn};

/// Delivers inbound mail into the INBOX of every recipient
///
/// All inboxes are resolved before anything is written, and the copies are
/// inserted in a single transaction: recipients get the message together or
/// not at all.
pub struct Saver {
    store: Store,
}

impl Saver {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Stage for Saver {
    fn name(&self) -> &'static str {
        "saver"
    }

    async fn process(&self, msg: &mut ReceivedMsg) -> Result<Flow> {
        let mut inboxes = Vec::with_capacity(msg.to.len());
        for rcpt in &msg.to {
            match self.store.get_inbox_id(rcpt).await {
                Ok(id) => inboxes.push(id),
                Err(e) => {
                    warn!(msg_id = %msg.id, "No local inbox for {}: {}", rcpt, e);
                    return Err(e);
                }
            }
        }

        let stored = self
            .store
            .deliver_to_mailboxes(&inboxes, &msg.content, &[FLAG_RECENT], msg.timestamp)
            .await?;

        info!(msg_id = %msg.id, copies = stored.len(), "Delivered message locally");
        Ok(Flow::Done)
    }
}
