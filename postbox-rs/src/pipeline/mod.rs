//! Message processing pipeline
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s composed once at startup.
//! Each stage either hands the message on ([`Flow::Continue`]), consumes it
//! ([`Flow::Done`]) or rejects it with an error, which stops the chain and is
//! returned to the caller unchanged.
//!
//! Two chains are assembled by [`crate::app::Postbox`]:
//! - submission: DKIM signer, logger, sender
//! - transfer: DKIM verifier, logger, saver

mod message;
pub mod stages;

pub use message::{Limits, ReceivedMsg};

use crate::error::{MailError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info_span, Instrument};

/// What the driver does after a stage returns successfully
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Pass the message to the next stage
    Continue,
    /// The message has been fully handled
    Done,
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, msg: &mut ReceivedMsg) -> Result<Flow>;
}

#[derive(Clone, Default)]
pub struct Pipeline {
    name: &'static str,
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            stages: Vec::new(),
        }
    }

    /// Append a stage to the chain
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run `msg` through every stage until one consumes or rejects it
    ///
    /// A chain that never reaches a consuming stage is a wiring mistake and
    /// fails rather than silently dropping the message.
    pub async fn process(&self, msg: &mut ReceivedMsg) -> Result<()> {
        let span = info_span!("pipeline", chain = self.name, msg_id = %msg.id);

        async {
            for stage in &self.stages {
                debug!(stage = stage.name(), "Running stage");
                match stage.process(msg).await? {
                    Flow::Continue => continue,
                    Flow::Done => return Ok(()),
                }
            }

            Err(MailError::Config(format!(
                "pipeline {} ended without a terminal stage",
                self.name
            )))
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: Arc<AtomicUsize>,
        flow: Flow,
    }

    #[async_trait]
    impl Stage for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn process(&self, _msg: &mut ReceivedMsg) -> Result<Flow> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.flow)
        }
    }

    struct Rejecting;

    #[async_trait]
    impl Stage for Rejecting {
        fn name(&self) -> &'static str {
            "rejecting"
        }

        async fn process(&self, _msg: &mut ReceivedMsg) -> Result<Flow> {
            Err(MailError::Policy("nope".to_string()))
        }
    }

    fn msg() -> ReceivedMsg {
        ReceivedMsg::new("a@local", vec!["b@remote".to_string()], b"Subject: x\r\n\r\n".to_vec())
    }

    fn counting(flow: Flow) -> (Counting, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Counting { calls: calls.clone(), flow }, calls)
    }

    #[tokio::test]
    async fn test_done_stops_the_chain() {
        let (first, first_calls) = counting(Flow::Continue);
        let (sink, sink_calls) = counting(Flow::Done);
        let (after, after_calls) = counting(Flow::Done);

        let pipeline = Pipeline::new("test").stage(first).stage(sink).stage(after);
        pipeline.process(&mut msg()).await.unwrap();

        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink_calls.load(Ordering::SeqCst), 1);
        assert_eq!(after_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_is_propagated_unchanged() {
        let (after, after_calls) = counting(Flow::Done);
        let pipeline = Pipeline::new("test").stage(Rejecting).stage(after);

        let result = pipeline.process(&mut msg()).await;
        assert!(matches!(result, Err(MailError::Policy(_))));
        assert_eq!(after_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chain_without_sink_fails() {
        let (pass, _) = counting(Flow::Continue);
        let pipeline = Pipeline::new("test").stage(pass);
        assert!(matches!(pipeline.process(&mut msg()).await, Err(MailError::Config(_))));
        assert!(Pipeline::new("empty").process(&mut msg()).await.is_err());
    }
}
