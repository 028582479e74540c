use crate::error::Result;
use crate::pipeline::{Flow, ReceivedMsg, Stage};
use async_trait::async_trait;
use tracing::info;

/// Logs the envelope and forwards the message untouched
pub struct Logger;

#[async_trait]
impl Stage for Logger {
    fn name(&self) -> &'static str {
        "logger"
    }

    async fn process(&self, msg: &mut ReceivedMsg) -> Result<Flow> {
        info!(
            msg_id = %msg.id,
            from = %msg.from,
            to = ?msg.to,
            size = msg.content.len(),
            verified = msg.verifications.iter().any(|v| v.passed()),
            "Processing message"
        );
        Ok(Flow::Continue)
    }
}
