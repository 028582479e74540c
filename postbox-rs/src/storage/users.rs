use super::{conflict, expect_one_row, Store};
use crate::error::{MailError, Result};
use crate::model::User;
use sqlx::SqliteConnection;
use tracing::info;

impl Store {
    /// Insert a user; fails with AlreadyExists on a duplicate identity
    pub async fn insert_user(&self, identity: &str, password_hash: &str, admin: bool) -> Result<User> {
        let _guard = self.write().await;
        let mut conn = self.pool.acquire().await?;
        insert_user_in(&mut conn, identity, password_hash, admin).await
    }

    /// Insert a user and its default mailboxes as one unit
    pub async fn create_account(
        &self,
        identity: &str,
        password_hash: &str,
        admin: bool,
        mailboxes: &[String],
    ) -> Result<User> {
        let _guard = self.write().await;
        let mut tx = self.pool.begin().await?;

        let user = insert_user_in(&mut tx, identity, password_hash, admin).await?;
        for name in mailboxes {
            super::mailboxes::insert_mailbox_in(&mut tx, name, user.id).await?;
        }

        tx.commit().await?;
        info!(user_id = user.id, "Provisioned account {} with {} mailboxes", identity, mailboxes.len());
        Ok(user)
    }

    pub async fn get_user_and_password(&self, identity: &str) -> Result<(User, String)> {
        let _guard = self.read().await;
        let row = sqlx::query_as::<_, (i64, String, String, bool)>(
            r#"
            SELECT id, identity, password_hash, admin
            FROM users
            WHERE identity = ?
            "#,
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;

        let (id, identity, password_hash, admin) =
            row.ok_or_else(|| MailError::NotFound(format!("user {}", identity)))?;
        Ok((User { id, identity, admin }, password_hash))
    }

    pub async fn get_users(&self) -> Result<Vec<User>> {
        let _guard = self.read().await;
        let rows = sqlx::query_as::<_, (i64, String, bool)>(
            "SELECT id, identity, admin FROM users ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, identity, admin)| User { id, identity, admin })
            .collect())
    }

    /// Delete a user; mailboxes and their messages go with it
    pub async fn delete_user(&self, identity: &str) -> Result<()> {
        let _guard = self.write().await;
        let result = sqlx::query("DELETE FROM users WHERE identity = ?")
            .bind(identity)
            .execute(&self.pool)
            .await?;
        expect_one_row(result, || format!("user {}", identity))
    }

    pub async fn set_user_password(&self, identity: &str, password_hash: &str) -> Result<()> {
        let _guard = self.write().await;
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE identity = ?")
            .bind(password_hash)
            .bind(identity)
            .execute(&self.pool)
            .await?;
        expect_one_row(result, || format!("user {}", identity))
    }
}

async fn insert_user_in(
    conn: &mut SqliteConnection,
    identity: &str,
    password_hash: &str,
    admin: bool,
) -> Result<User> {
    let result = sqlx::query(
        r#"
        INSERT INTO users (identity, password_hash, admin)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(identity)
    .bind(password_hash)
    .bind(admin)
    .execute(&mut *conn)
    .await
    .map_err(|e| conflict(e, || format!("user {}", identity)))?;

    Ok(User {
        id: result.last_insert_rowid(),
        identity: identity.to_string(),
        admin,
    })
}
