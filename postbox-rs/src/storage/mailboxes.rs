use super::{conflict, expect_one_row, to_u32, Store};
use crate::error::{MailError, Result};
use crate::model::{Mailbox, FLAG_RECENT, FLAG_SEEN, INBOX};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::debug;

/// Mailbox columns plus the counts derived from messages and flags
const MAILBOX_SELECT: &str = r#"
    SELECT mb.id, mb.user_id, mb.name, mb.uidnext, mb.uidvalidity, mb.subscribed,
        (SELECT COUNT(*) FROM messages m WHERE m.mailbox_id = mb.id) AS messages,
        (SELECT COUNT(DISTINCT m.id)
            FROM messages m
            JOIN messageflags f ON f.message_id = m.id
            WHERE m.mailbox_id = mb.id AND f.flag = "#;

const MAILBOX_SELECT_UNSEEN: &str = r#") AS recent,
        (SELECT COUNT(*)
            FROM messages m
            WHERE m.mailbox_id = mb.id
            AND NOT EXISTS (
                SELECT 1 FROM messageflags f
                WHERE f.message_id = m.id AND f.flag = "#;

const MAILBOX_SELECT_FROM: &str = r#")) AS unseen
    FROM mailboxes mb
    WHERE "#;

#[derive(sqlx::FromRow)]
struct MailboxRow {
    id: i64,
    user_id: i64,
    name: String,
    uidnext: i64,
    uidvalidity: i64,
    subscribed: bool,
    messages: i64,
    recent: i64,
    unseen: i64,
}

impl TryFrom<MailboxRow> for Mailbox {
    type Error = MailError;

    fn try_from(row: MailboxRow) -> Result<Self> {
        Ok(Mailbox {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            uid_next: to_u32(row.uidnext, "uidnext")?,
            uid_validity: to_u32(row.uidvalidity, "uidvalidity")?,
            subscribed: row.subscribed,
            messages: to_u32(row.messages, "message count")?,
            recent: to_u32(row.recent, "recent count")?,
            unseen: to_u32(row.unseen, "unseen count")?,
        })
    }
}

/// Start a mailbox query; the caller appends the WHERE clause
fn mailbox_query<'a>() -> QueryBuilder<'a, Sqlite> {
    let mut qb = QueryBuilder::new(MAILBOX_SELECT);
    qb.push_bind(FLAG_RECENT);
    qb.push(MAILBOX_SELECT_UNSEEN);
    qb.push_bind(FLAG_SEEN);
    qb.push(MAILBOX_SELECT_FROM);
    qb
}

impl Store {
    /// Create a mailbox with `uidnext = 1`, `uidvalidity = 1`, subscribed
    pub async fn insert_mailbox(&self, name: &str, user_id: i64) -> Result<Mailbox> {
        let _guard = self.write().await;
        let mut conn = self.pool.acquire().await?;
        insert_mailbox_in(&mut conn, name, user_id).await
    }

    pub async fn get_mailboxes(&self, subscribed_only: bool, user_id: i64) -> Result<Vec<Mailbox>> {
        let _guard = self.read().await;
        let mut qb = mailbox_query();
        qb.push("mb.user_id = ").push_bind(user_id);
        if subscribed_only {
            qb.push(" AND mb.subscribed = 1");
        }
        qb.push(" ORDER BY mb.id");

        let rows = qb.build_query_as::<MailboxRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(Mailbox::try_from).collect()
    }

    pub async fn get_mailbox_by_name(&self, name: &str, user_id: i64) -> Result<Mailbox> {
        let _guard = self.read().await;
        let mut qb = mailbox_query();
        qb.push("mb.user_id = ")
            .push_bind(user_id)
            .push(" AND mb.name = ")
            .push_bind(name);

        let row = qb.build_query_as::<MailboxRow>().fetch_optional(&self.pool).await?;
        row.ok_or_else(|| MailError::NotFound(format!("mailbox {}", name)))?
            .try_into()
    }

    pub async fn get_mailbox_by_id(&self, id: i64) -> Result<Mailbox> {
        let _guard = self.read().await;
        let mut qb = mailbox_query();
        qb.push("mb.id = ").push_bind(id);

        let row = qb.build_query_as::<MailboxRow>().fetch_optional(&self.pool).await?;
        row.ok_or_else(|| MailError::NotFound(format!("mailbox {}", id)))?
            .try_into()
    }

    /// Id of the INBOX belonging to `identity`
    pub async fn get_inbox_id(&self, identity: &str) -> Result<i64> {
        let _guard = self.read().await;
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT mb.id
            FROM mailboxes mb
            JOIN users u ON u.id = mb.user_id
            WHERE u.identity = ?
            AND mb.name = ?
            "#,
        )
        .bind(identity)
        .bind(INBOX)
        .fetch_optional(&self.pool)
        .await?;

        id.ok_or_else(|| MailError::NotFound(format!("inbox for {}", identity)))
    }

    pub async fn set_mailbox_subscribed(&self, mailbox_id: i64, subscribed: bool) -> Result<()> {
        let _guard = self.write().await;
        let result = sqlx::query("UPDATE mailboxes SET subscribed = ? WHERE id = ?")
            .bind(subscribed)
            .bind(mailbox_id)
            .execute(&self.pool)
            .await?;
        expect_one_row(result, || format!("mailbox {}", mailbox_id))
    }

    /// Rename a mailbox; UID state is untouched
    pub async fn rename_mailbox(&self, user_id: i64, original_name: &str, new_name: &str) -> Result<()> {
        let _guard = self.write().await;
        let result = sqlx::query("UPDATE mailboxes SET name = ? WHERE user_id = ? AND name = ?")
            .bind(new_name)
            .bind(user_id)
            .bind(original_name)
            .execute(&self.pool)
            .await
            .map_err(|e| conflict(e, || format!("mailbox {}", new_name)))?;
        expect_one_row(result, || format!("mailbox {}", original_name))
    }

    /// Delete a mailbox and, by cascade, its messages
    pub async fn delete_mailbox(&self, name: &str, user_id: i64) -> Result<()> {
        let _guard = self.write().await;
        let result = sqlx::query("DELETE FROM mailboxes WHERE name = ? AND user_id = ?")
            .bind(name)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        expect_one_row(result, || format!("mailbox {}", name))
    }
}

pub(super) async fn insert_mailbox_in(
    conn: &mut SqliteConnection,
    name: &str,
    user_id: i64,
) -> Result<Mailbox> {
    let result = sqlx::query(
        r#"
        INSERT INTO mailboxes (user_id, name, uidnext, uidvalidity, subscribed)
        VALUES (?, ?, 1, 1, 1)
        "#,
    )
    .bind(user_id)
    .bind(name)
    .execute(&mut *conn)
    .await
    .map_err(|e| conflict(e, || format!("mailbox {}", name)))?;

    debug!(user_id, "Created mailbox {}", name);

    Ok(Mailbox {
        id: result.last_insert_rowid(),
        user_id,
        name: name.to_string(),
        uid_next: 1,
        uid_validity: 1,
        subscribed: true,
        messages: 0,
        recent: 0,
        unseen: 0,
    })
}
