//! Wiring of the store, identity layer, chains and retry worker
//!
//! Protocol front-ends hand fully received messages to [`Postbox::submit`]
//! (authenticated local senders) or [`Postbox::receive`] (remote servers).

use crate::config::Config;
use crate::delivery::{self, Relay, RetryWorker, ScheduledTask};
use crate::dkim::{self, DkimSigner, MailAuthVerifier, SignatureVerifier};
use crate::error::Result;
use crate::identity::{Login, TokenIssuer};
use crate::pipeline::stages::{DkimSign, DkimVerify, Logger, Saver, Sender};
use crate::pipeline::{Limits, Pipeline, ReceivedMsg};
use crate::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct Postbox {
    config: Arc<Config>,
    store: Store,
    login: Login,
    tokens: TokenIssuer,
    submission: Pipeline,
    transfer: Pipeline,
    retries: Arc<RetryWorker>,
}

impl Postbox {
    /// Open the configured store and assemble production components
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let store = Store::open(&config.storage.database_url).await?;
        let relay = Arc::new(delivery::remote_relay(&config.server, &config.delivery));

        let verifier: Option<Arc<dyn SignatureVerifier>> = if config.dkim.verify {
            match MailAuthVerifier::new() {
                Ok(verifier) => Some(Arc::new(verifier)),
                Err(e) if config.dkim.mandatory => return Err(e),
                Err(e) => {
                    warn!("DKIM verification disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self::assemble(config, store, relay, verifier).await
    }

    /// Build from explicit parts; tests inject fake relays and verifiers here
    pub async fn assemble(
        config: Config,
        store: Store,
        relay: Arc<dyn Relay>,
        verifier: Option<Arc<dyn SignatureVerifier>>,
    ) -> Result<Self> {
        let config = Arc::new(config);

        let mut submission = Pipeline::new("submission");
        if config.dkim.sign {
            let pem = dkim::load_or_generate_key(&store, config.dkim.key_bits).await?;
            let signer = DkimSigner::new(&config.server.domain, &config.dkim.selector, &pem)?;
            submission = submission.stage(DkimSign::new(signer));
        }
        let submission = submission
            .stage(Logger)
            .stage(Sender::new(store.clone(), relay.clone()));

        let mut transfer = Pipeline::new("transfer");
        if let Some(verifier) = verifier {
            transfer = transfer.stage(DkimVerify::new(verifier, config.dkim.mandatory));
        }
        let transfer = transfer.stage(Logger).stage(Saver::new(store.clone()));

        info!(
            submission = ?submission.stage_names(),
            transfer = ?transfer.stage_names(),
            "Pipelines assembled"
        );

        let login = Login::new(store.clone(), config.accounts.default_mailboxes.clone());
        let tokens = TokenIssuer::new(
            store.clone(),
            Duration::from_secs(config.accounts.session_ttl_secs),
        );
        let retries = Arc::new(RetryWorker::new(
            store.clone(),
            relay,
            config.delivery.max_retries,
            config.server.hostname.clone(),
        ));

        Ok(Self {
            config,
            store,
            login,
            tokens,
            submission,
            transfer,
            retries,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn login(&self) -> &Login {
        &self.login
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn retries(&self) -> &Arc<RetryWorker> {
        &self.retries
    }

    /// Outbound mail from an authenticated local user
    pub async fn submit(&self, from: &str, to: Vec<String>, content: Vec<u8>) -> Result<()> {
        let mut msg = ReceivedMsg::checked(from, to, content, &self.limits())?;
        self.submission.process(&mut msg).await
    }

    /// Inbound mail from a remote server
    pub async fn receive(&self, from: &str, to: Vec<String>, content: Vec<u8>) -> Result<()> {
        let mut msg = ReceivedMsg::checked(from, to, content, &self.limits())?;
        self.transfer.process(&mut msg).await
    }

    /// Start the background queue sweep on the configured schedule
    pub fn start_retries(&self) -> Result<ScheduledTask> {
        let schedule = self.config.delivery.schedule()?;
        info!("Queue sweep scheduled with {:?}", self.config.delivery.retry_schedule);
        Ok(self.retries.clone().spawn(schedule))
    }

    fn limits(&self) -> Limits {
        Limits::from(&self.config.smtp)
    }
}
