use crate::dkim::DkimSigner;
use crate::error::Result;
use crate::pipeline::{Flow, ReceivedMsg, Stage};
use async_trait::async_trait;
use tracing::debug;

/// Signs outbound mail; a signing failure aborts the submission
pub struct DkimSign {
    signer: DkimSigner,
}

impl DkimSign {
    pub fn new(signer: DkimSigner) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl Stage for DkimSign {
    fn name(&self) -> &'static str {
        "dkim-sign"
    }

    async fn process(&self, msg: &mut ReceivedMsg) -> Result<Flow> {
        msg.content = self.signer.sign(&msg.content)?;
        debug!(msg_id = %msg.id, domain = self.signer.domain(), "Signed message");
        Ok(Flow::Continue)
    }
}
