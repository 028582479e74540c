use super::dns::MxResolver;
use super::client::Transport;
use crate::error::{MailError, Result};
use crate::model::domain_part;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Delivers one message to one remote recipient
#[async_trait]
pub trait Relay: Send + Sync {
    async fn relay(&self, from: &str, to: &str, content: &[u8]) -> Result<()>;
}

/// Relay through the recipient domain's exchangers, in preference order,
/// until one accepts the message
pub struct RemoteDelivery {
    resolver: Arc<dyn MxResolver>,
    transport: Arc<dyn Transport>,
}

impl RemoteDelivery {
    pub fn new(resolver: Arc<dyn MxResolver>, transport: Arc<dyn Transport>) -> Self {
        Self { resolver, transport }
    }
}

#[async_trait]
impl Relay for RemoteDelivery {
    async fn relay(&self, from: &str, to: &str, content: &[u8]) -> Result<()> {
        let domain = domain_part(to).ok_or_else(|| MailError::InvalidEmail(to.to_string()))?;

        let hosts = self.resolver.lookup_mx(domain).await?;
        if hosts.is_empty() {
            return Err(MailError::Delivery(format!("no mail exchanger for {}", domain)));
        }

        let mut failures = Vec::with_capacity(hosts.len());
        for host in &hosts {
            match self.transport.send(host, from, to, content).await {
                Ok(()) => {
                    info!("Relayed message for {} via {}", to, host);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Exchanger {} failed for {}: {}", host, to, e);
                    failures.push(format!("{}: {}", host, e));
                }
            }
        }

        Err(MailError::Delivery(format!(
            "all exchangers for {} failed ({})",
            domain,
            failures.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::client::MockTransport;
    use crate::delivery::dns::MockMxResolver;

    fn resolver_returning(hosts: &[&str]) -> Arc<dyn MxResolver> {
        let hosts: Vec<String> = hosts.iter().map(|h| h.to_string()).collect();
        let mut resolver = MockMxResolver::new();
        resolver
            .expect_lookup_mx()
            .withf(|domain| domain.to_string() == "remote.example")
            .times(1)
            .returning(move |_| Ok(hosts.clone()));
        Arc::new(resolver)
    }

    #[tokio::test]
    async fn test_falls_through_to_next_exchanger() {
        let mut transport = MockTransport::new();
        transport.expect_send().times(2).returning(|host, _, _, _| {
            if host == "mx1.remote.example" {
                Err(MailError::Delivery("connection refused".to_string()))
            } else {
                Ok(())
            }
        });

        let relay = RemoteDelivery::new(
            resolver_returning(&["mx1.remote.example", "mx2.remote.example"]),
            Arc::new(transport),
        );
        relay.relay("a@local.example", "b@remote.example", b"hi").await.unwrap();
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let mut transport = MockTransport::new();
        transport.expect_send().times(1).returning(|_, _, _, _| Ok(()));

        let relay = RemoteDelivery::new(
            resolver_returning(&["mx1.remote.example", "mx2.remote.example"]),
            Arc::new(transport),
        );
        relay.relay("a@local.example", "b@remote.example", b"hi").await.unwrap();
    }

    #[tokio::test]
    async fn test_all_exchangers_failing_is_delivery_error() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(2)
            .returning(|host, _, _, _| Err(MailError::SmtpProtocol(format!("{} said no", host))));

        let relay = RemoteDelivery::new(
            resolver_returning(&["mx1.remote.example", "mx2.remote.example"]),
            Arc::new(transport),
        );
        match relay.relay("a@local.example", "b@remote.example", b"hi").await {
            Err(MailError::Delivery(msg)) => {
                assert!(msg.contains("mx1.remote.example said no"));
                assert!(msg.contains("mx2.remote.example said no"));
            }
            other => panic!("expected delivery error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_exchanger_is_delivery_error() {
        let mut transport = MockTransport::new();
        transport.expect_send().never();

        let relay = RemoteDelivery::new(resolver_returning(&[]), Arc::new(transport));
        let result = relay.relay("a@local.example", "b@remote.example", b"hi").await;
        assert!(matches!(result, Err(MailError::Delivery(_))));
    }

    #[tokio::test]
    async fn test_recipient_without_domain() {
        let relay = RemoteDelivery::new(Arc::new(MockMxResolver::new()), Arc::new(MockTransport::new()));
        let result = relay.relay("a@local.example", "nobody", b"hi").await;
        assert!(matches!(result, Err(MailError::InvalidEmail(_))));
    }
}
