//! Session tokens
//!
//! HS256 JWTs signed with a secret kept in the store's keys table. The secret
//! is generated on first use; rotating it invalidates every issued token.

use crate::error::{MailError, Result};
use crate::model::User;
use crate::storage::Store;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Key under which the signing secret is stored
pub const JWT_KEY_NAME: &str = "jwt";

const SECRET_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User identity
    pub sub: String,
    pub uid: i64,
    pub admin: bool,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    pub iat: u64,
}

pub struct TokenIssuer {
    store: Store,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(store: Store, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Issue a session token for an authenticated user
    pub async fn issue(&self, user: &User) -> Result<String> {
        let secret = self.secret().await?;
        let now = now_secs();

        let claims = Claims {
            sub: user.identity.clone(),
            uid: user.id,
            admin: user.admin,
            exp: now + self.ttl.as_secs(),
            iat: now,
        };

        encode(&Header::default(), &claims, &EncodingKey::from_secret(&secret))
            .map_err(|e| MailError::Crypto(format!("Failed to sign token: {}", e)))
    }

    /// Validate signature and expiry, returning the claims
    pub async fn verify(&self, token: &str) -> Result<Claims> {
        let secret = self.secret().await?;

        let data = decode::<Claims>(token, &DecodingKey::from_secret(&secret), &Validation::default())
            .map_err(|e| {
                debug!("Rejected session token: {}", e);
                MailError::AuthenticationFailed
            })?;

        Ok(data.claims)
    }

    /// Replace the signing secret
    pub async fn rotate(&self) -> Result<()> {
        self.store.put_key(JWT_KEY_NAME, &random_secret()).await?;
        info!("Rotated session token secret");
        Ok(())
    }

    async fn secret(&self) -> Result<Vec<u8>> {
        match self.store.get_key(JWT_KEY_NAME).await {
            Ok(secret) => Ok(secret),
            Err(e) if e.is_not_found() => {
                self.store
                    .insert_key_if_absent(JWT_KEY_NAME, &random_secret())
                    .await
            }
            Err(e) => Err(e),
        }
    }
}

fn random_secret() -> Vec<u8> {
    let mut secret = vec![0u8; SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}

fn now_secs() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}
