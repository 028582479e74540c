use crate::dkim::SignatureVerifier;
use crate::error::{MailError, Result};
use crate::pipeline::{Flow, ReceivedMsg, Stage};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Records DKIM results on inbound mail
///
/// With `mandatory` set, mail without a single passing signature is
/// rejected; otherwise it is forwarded whatever the outcome.
pub struct DkimVerify {
    verifier: Arc<dyn SignatureVerifier>,
    mandatory: bool,
}

impl DkimVerify {
    pub fn new(verifier: Arc<dyn SignatureVerifier>, mandatory: bool) -> Self {
        Self { verifier, mandatory }
    }
}

#[async_trait]
impl Stage for DkimVerify {
    fn name(&self) -> &'static str {
        "dkim-verify"
    }

    async fn process(&self, msg: &mut ReceivedMsg) -> Result<Flow> {
        let verifications = self.verifier.verify(&msg.content).await?;
        let passed = verifications.iter().filter(|v| v.passed()).count();
        info!(
            msg_id = %msg.id,
            signatures = verifications.len(),
            passed,
            "DKIM verification finished"
        );
        msg.verifications = verifications;

        if self.mandatory && passed == 0 {
            warn!(msg_id = %msg.id, from = %msg.from, "Rejecting message without valid DKIM signature");
            return Err(MailError::Policy(
                "DKIM verification is mandatory and no signature passed".to_string(),
            ));
        }

        Ok(Flow::Continue)
    }
}
