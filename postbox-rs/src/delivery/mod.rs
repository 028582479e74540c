//! Remote delivery and retries
//!
//! # Flow
//! 1. The sender stage relays each recipient independently through
//!    [`Relay`]; a failure queues that (message, recipient) pair
//! 2. [`RetryWorker`] sweeps the queue on a [`Schedule`], deleting rows that
//!    get through and counting failures
//! 3. A row that reaches the retry ceiling is bounced into its sender's INBOX
//!    and removed

pub mod bounce;
mod client;
mod dns;
mod remote;
mod retry;
mod schedule;

pub use client::{tls_connector, SmtpClient, Transport};
pub use dns::{spf_record, DnsMxResolver, MxResolver};
pub use remote::{Relay, RemoteDelivery};
pub use retry::{RetryWorker, SweepReport};
pub use schedule::{CronSpec, Schedule, ScheduledTask};

use crate::config::{DeliveryConfig, ServerConfig};
use std::sync::Arc;

/// Production relay: system DNS for MX lookups and SMTP with opportunistic
/// STARTTLS
pub fn remote_relay(server: &ServerConfig, delivery: &DeliveryConfig) -> RemoteDelivery {
    let resolver = DnsMxResolver::new(delivery.dns_timeout());
    let transport = SmtpClient::new(
        server.hostname.clone(),
        delivery.relay_port,
        delivery.connect_timeout(),
        delivery.command_timeout(),
        tls_connector(delivery.tls_ca_file.as_deref()),
    );
    RemoteDelivery::new(Arc::new(resolver), Arc::new(transport))
}
