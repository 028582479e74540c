//! MX resolution and the records this server asks to be published

use crate::error::{MailError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::{system_conf, TokioAsyncResolver};

/// Finds the mail exchangers of a domain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MxResolver: Send + Sync {
    /// Exchanger host names, most preferred first; empty when the domain
    /// publishes no MX records
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<String>>;
}

/// [`MxResolver`] backed by the system resolver configuration
pub struct DnsMxResolver {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl DnsMxResolver {
    pub fn new(timeout: Duration) -> Self {
        let (config, mut opts) = system_conf::read_system_conf().unwrap_or_else(|e| {
            warn!("Failed to read system DNS config ({}), using defaults", e);
            (ResolverConfig::default(), ResolverOpts::default())
        });
        opts.timeout = timeout;

        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
            timeout,
        }
    }
}

#[async_trait]
impl MxResolver for DnsMxResolver {
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<String>> {
        info!("Looking up MX records for {}", domain);

        let lookup = tokio::time::timeout(self.timeout, self.resolver.mx_lookup(domain))
            .await
            .map_err(|_| MailError::DnsLookup(format!("MX lookup for {} timed out", domain)))?;

        let lookup = match lookup {
            Ok(lookup) => lookup,
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => {
                warn!("No MX records found for {}", domain);
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(MailError::DnsLookup(format!("MX lookup for {} failed: {}", domain, e)))
            }
        };

        let mut records: Vec<(u16, String)> = lookup
            .iter()
            .map(|mx| {
                let host = mx.exchange().to_string().trim_end_matches('.').to_string();
                (mx.preference(), host)
            })
            .collect();
        sort_by_preference(&mut records);

        for (preference, host) in &records {
            debug!("  MX {} preference {}", host, preference);
        }
        Ok(records.into_iter().map(|(_, host)| host).collect())
    }
}

/// SPF TXT value authorizing only the address of `hostname` to send
pub fn spf_record(hostname: &str) -> String {
    format!("v=spf1 a:{} -all", hostname)
}

/// Lowest preference first; equal preferences keep resolver order.
/// A null MX (RFC 7505) is dropped.
fn sort_by_preference(records: &mut Vec<(u16, String)>) {
    records.retain(|(_, host)| !host.is_empty());
    records.sort_by_key(|(preference, _)| *preference);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_by_preference() {
        let mut records = vec![
            (20, "mx2.example.com".to_string()),
            (10, "mx1.example.com".to_string()),
            (20, "mx3.example.com".to_string()),
            (0, String::new()),
        ];
        sort_by_preference(&mut records);

        let hosts: Vec<&str> = records.iter().map(|(_, h)| h.as_str()).collect();
        assert_eq!(hosts, vec!["mx1.example.com", "mx2.example.com", "mx3.example.com"]);
    }

    #[test]
    fn test_spf_record() {
        assert_eq!(spf_record("mail.example.com"), "v=spf1 a:mail.example.com -all");
    }
}
