use crate::error::Result;
use crate::pipeline::{Flow, ReceivedMsg, Stage};
use async_trait::async_trait;
use tracing::debug;

/// Accepts every message and discards it
pub struct Hole;

#[async_trait]
impl Stage for Hole {
    fn name(&self) -> &'static str {
        "hole"
    }

    async fn process(&self, msg: &mut ReceivedMsg) -> Result<Flow> {
        debug!(msg_id = %msg.id, "Discarding message");
        Ok(Flow::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::pipeline::stages::Logger;

    #[tokio::test]
    async fn test_hole_terminates_chain() {
        let pipeline = Pipeline::new("discard").stage(Logger).stage(Hole);
        let mut msg = ReceivedMsg::new("a@local", vec!["b@remote".to_string()], b"Subject: x\r\n\r\n".to_vec());

        pipeline.process(&mut msg).await.unwrap();
        assert_eq!(pipeline.stage_names(), vec!["logger", "hole"]);
    }
}
