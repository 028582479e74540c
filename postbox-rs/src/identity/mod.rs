//! Login and account provisioning
//!
//! Thin layer over the [`Store`]: passwords are hashed with Argon2 before
//! they reach storage and never leave this module in clear.
//!
//! # Example
//! ```no_run
//! # use postbox_rs::{identity::Login, storage::Store};
//! # async fn example() -> postbox_rs::Result<()> {
//! let store = Store::open("sqlite://postbox.db").await?;
//! let login = Login::new(store, vec!["INBOX".to_string()]);
//!
//! login.new_user("alice@example.com", "secret", false).await?;
//! let user = login.login("alice@example.com", "secret").await?;
//! # Ok(())
//! # }
//! ```

mod password;
mod tokens;

pub use password::{hash_password, verify_password};
pub use tokens::{Claims, TokenIssuer, JWT_KEY_NAME};

use crate::error::{MailError, Result};
use crate::model::User;
use crate::storage::Store;
use tracing::{info, warn};

#[derive(Clone)]
pub struct Login {
    store: Store,
    default_mailboxes: Vec<String>,
}

impl Login {
    pub fn new(store: Store, default_mailboxes: Vec<String>) -> Self {
        Self {
            store,
            default_mailboxes,
        }
    }

    /// Authenticate a user
    ///
    /// Unknown identities and wrong passwords fail identically.
    pub async fn login(&self, identity: &str, password: &str) -> Result<User> {
        let (user, stored_hash) = match self.store.get_user_and_password(identity).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => {
                warn!("Authentication failed: user not found: {}", identity);
                return Err(MailError::AuthenticationFailed);
            }
            Err(e) => return Err(e),
        };

        if !verify_password(password, &stored_hash)? {
            warn!("Authentication failed: invalid password for {}", identity);
            return Err(MailError::AuthenticationFailed);
        }

        info!("Authentication successful for {}", identity);
        Ok(user)
    }

    /// Create a user together with the default mailbox set
    pub async fn new_user(&self, identity: &str, password: &str, admin: bool) -> Result<User> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(MailError::Validation("identity must not be empty".to_string()));
        }
        if password.is_empty() {
            return Err(MailError::Validation("password must not be empty".to_string()));
        }

        let password_hash = hash_password(password)?;
        self.store
            .create_account(identity, &password_hash, admin, &self.default_mailboxes)
            .await
    }

    /// Set a new password after checking it against its confirmation
    pub async fn change_password(&self, identity: &str, password: &str, confirmation: &str) -> Result<()> {
        if password.is_empty() {
            return Err(MailError::Validation("password must not be empty".to_string()));
        }
        if password != confirmation {
            return Err(MailError::Validation("passwords do not match".to_string()));
        }

        let password_hash = hash_password(password)?;
        self.store.set_user_password(identity, &password_hash).await?;
        info!("Password changed for {}", identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn login() -> Login {
        let store = Store::in_memory().await.unwrap();
        Login::new(store, vec!["INBOX".to_string(), "Sent".to_string()])
    }

    #[tokio::test]
    async fn test_new_user_and_login() {
        let login = login().await;
        let user = login.new_user("alice@example.com", "pw", true).await.unwrap();
        assert!(user.admin);

        assert_eq!(login.login("alice@example.com", "pw").await.unwrap(), user);

        let names: Vec<String> = login
            .store
            .get_mailboxes(false, user.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["INBOX", "Sent"]);
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let login = login().await;
        login.new_user("alice@example.com", "pw", false).await.unwrap();

        assert!(matches!(
            login.login("alice@example.com", "nope").await,
            Err(MailError::AuthenticationFailed)
        ));
        assert!(matches!(
            login.login("bob@example.com", "pw").await,
            Err(MailError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn test_new_user_validation() {
        let login = login().await;
        assert!(matches!(login.new_user("  ", "pw", false).await, Err(MailError::Validation(_))));
        assert!(matches!(login.new_user("a@b.c", "", false).await, Err(MailError::Validation(_))));

        login.new_user("a@b.c", "pw", false).await.unwrap();
        assert!(matches!(
            login.new_user("a@b.c", "pw", false).await,
            Err(MailError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_change_password() {
        let login = login().await;
        login.new_user("alice@example.com", "old", false).await.unwrap();

        let mismatch = login.change_password("alice@example.com", "new", "neww").await;
        assert!(matches!(mismatch, Err(MailError::Validation(_))));
        let empty = login.change_password("alice@example.com", "", "").await;
        assert!(matches!(empty, Err(MailError::Validation(_))));

        // Rejected changes leave the old password working
        login.login("alice@example.com", "old").await.unwrap();

        login.change_password("alice@example.com", "new", "new").await.unwrap();
        login.login("alice@example.com", "new").await.unwrap();
        assert!(login.login("alice@example.com", "old").await.is_err());

        let missing = login.change_password("ghost@example.com", "x", "x").await;
        assert!(missing.unwrap_err().is_not_found());
    }
}
