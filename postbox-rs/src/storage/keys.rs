use super::Store;
use crate::error::{MailError, Result};
use tracing::info;

impl Store {
    /// Named secret (DKIM private key, token secret)
    pub async fn get_key(&self, name: &str) -> Result<Vec<u8>> {
        let _guard = self.read().await;
        let key = sqlx::query_scalar::<_, Vec<u8>>("SELECT key FROM keys WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        key.ok_or_else(|| MailError::NotFound(format!("key {}", name)))
    }

    /// Store a secret, replacing any previous value under the same name
    pub async fn put_key(&self, name: &str, key: &[u8]) -> Result<()> {
        let _guard = self.write().await;
        sqlx::query(
            r#"
            INSERT INTO keys (name, key) VALUES (?, ?)
            ON CONFLICT(name) DO UPDATE SET key = excluded.key
            "#,
        )
        .bind(name)
        .bind(key)
        .execute(&self.pool)
        .await?;

        info!("Stored key {}", name);
        Ok(())
    }

    /// Store `key` unless one already exists, returning whichever value won
    pub async fn insert_key_if_absent(&self, name: &str, key: &[u8]) -> Result<Vec<u8>> {
        let _guard = self.write().await;
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query("INSERT OR IGNORE INTO keys (name, key) VALUES (?, ?)")
            .bind(name)
            .bind(key)
            .execute(&mut *tx)
            .await?;

        let stored = sqlx::query_scalar::<_, Vec<u8>>("SELECT key FROM keys WHERE name = ?")
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        if inserted.rows_affected() == 1 {
            info!("Generated key {}", name);
        }
        Ok(stored)
    }
}
