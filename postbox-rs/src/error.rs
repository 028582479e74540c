use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SMTP protocol error: {0}")]
    SmtpProtocol(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("DNS lookup failed: {0}")]
    DnsLookup(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Policy violation: {0}")]
    Policy(String),

    #[error("DKIM error: {0}")]
    Dkim(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Invalid schedule: {0}")]
    Schedule(String),
}

impl MailError {
    /// True for lookups and one-row mutations that matched nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MailError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, MailError>;
