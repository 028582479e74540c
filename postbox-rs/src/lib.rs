//! postbox-rs: self-hosted mail transfer and storage core
//!
//! Accepts outbound mail from local users, relays it to remote exchangers,
//! accepts inbound mail for local users and files it into per-user
//! mailboxes.
//!
//! # Components
//!
//! - [`storage`]: the only component touching durable state; hands out
//!   strictly increasing per-mailbox UIDs
//! - [`pipeline`]: submission and transfer chains of processing stages
//! - [`delivery`]: MX resolution, SMTP relay, durable retry queue, bounces
//! - [`identity`]: password hashing, login, account provisioning, sessions
//! - [`dkim`]: signing, verification and key lifecycle
//!
//! # Example
//!
//! ```no_run
//! use postbox_rs::{Config, Postbox};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let postbox = Postbox::open(Config::default()).await?;
//!     postbox.login().new_user("alice@example.com", "secret", false).await?;
//!
//!     postbox
//!         .submit(
//!             "alice@example.com",
//!             vec!["bob@remote.example".to_string()],
//!             b"From: alice@example.com\r\nSubject: Hi\r\n\r\nHello Bob\r\n".to_vec(),
//!         )
//!         .await?;
//!
//!     let sweeper = postbox.start_retries()?;
//!     tokio::signal::ctrl_c().await?;
//!     sweeper.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod config;
pub mod delivery;
pub mod dkim;
pub mod error;
pub mod identity;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod storage;

// Re-export commonly used types
pub use app::Postbox;
pub use config::Config;
pub use error::{MailError, Result};
pub use storage::Store;
