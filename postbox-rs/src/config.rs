use crate::delivery::Schedule;
use crate::error::{MailError, Result};
use crate::model::INBOX;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub smtp: SmtpConfig,
    pub accounts: AccountsConfig,
    pub dkim: DkimConfig,
    pub delivery: DeliveryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Domain of the addresses this server is responsible for
    pub domain: String,
    /// Canonical name of the server, used in EHLO and bounces
    pub hostname: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub max_message_size: usize,
    pub max_recipients: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccountsConfig {
    /// Mailboxes provisioned together with every new user
    pub default_mailboxes: Vec<String>,
    pub session_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DkimConfig {
    pub sign: bool,
    pub verify: bool,
    /// Reject inbound mail without at least one passing signature
    pub mandatory: bool,
    pub selector: String,
    pub key_bits: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub relay_port: u16,
    /// Cron expression driving the retry sweep
    pub retry_schedule: String,
    pub max_retries: u32,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub dns_timeout_secs: u64,
    /// PEM bundle used to verify exchangers during STARTTLS
    pub tls_ca_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty`, `compact` or `json`
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().to_string();
        Self {
            domain: "localhost".to_string(),
            hostname: if hostname.is_empty() {
                "mail.localhost".to_string()
            } else {
                hostname
            },
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://postbox.db".to_string(),
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            max_message_size: 10 * 1024 * 1024, // 10MB
            max_recipients: 50,
        }
    }
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            default_mailboxes: ["INBOX", "Trash", "Sent", "Drafts"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            session_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl Default for DkimConfig {
    fn default() -> Self {
        Self {
            sign: true,
            verify: true,
            mandatory: false,
            selector: "mx".to_string(),
            key_bits: 2048,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            relay_port: 25,
            retry_schedule: "* * * * *".to_string(),
            max_retries: 3,
            connect_timeout_secs: 30,
            command_timeout_secs: 60,
            dns_timeout_secs: 10,
            tls_ca_file: Some("/etc/ssl/certs/ca-certificates.crt".to_string()),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl DeliveryConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_secs(self.dns_timeout_secs)
    }

    pub fn schedule(&self) -> Result<Schedule> {
        self.retry_schedule.parse()
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MailError::Config(e.to_string()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| MailError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Effective settings, defaults filled in, as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| MailError::Config(e.to_string()))
    }

    /// Reject settings the core cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.server.domain.trim().is_empty() {
            return Err(MailError::Config("server.domain must not be empty".to_string()));
        }
        if self.server.hostname.trim().is_empty() {
            return Err(MailError::Config("server.hostname must not be empty".to_string()));
        }
        if !self.accounts.default_mailboxes.iter().any(|m| m == INBOX) {
            return Err(MailError::Config(format!(
                "accounts.default_mailboxes must contain {}",
                INBOX
            )));
        }
        if self.smtp.max_recipients == 0 {
            return Err(MailError::Config("smtp.max_recipients must be positive".to_string()));
        }
        if self.delivery.relay_port == 0 {
            return Err(MailError::Config("delivery.relay_port must not be 0".to_string()));
        }
        if self.dkim.key_bits < 1024 {
            return Err(MailError::Config(
                "dkim.key_bits must be at least 1024".to_string(),
            ));
        }
        self.delivery.schedule()?;
        Ok(())
    }
}
