use super::{decode_ts, encode_ts, expect_one_row, to_u32, Store};
use crate::error::Result;
use crate::model::{Message, QueuedMessage};
use chrono::{DateTime, Utc};
use tracing::debug;

impl Store {
    /// Persist one undelivered (message, recipient) pair with zero retries
    pub async fn insert_queue(
        &self,
        from: &str,
        to: &str,
        content: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<QueuedMessage> {
        let _guard = self.write().await;
        let result = sqlx::query(
            r#"
            INSERT INTO queue (msgfrom, msgto, ts, retries, content)
            VALUES (?, ?, ?, 0, ?)
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(encode_ts(&timestamp))
        .bind(content)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(queue_id = id, "Queued message from {} to {}", from, to);

        Ok(QueuedMessage {
            id,
            from: from.to_string(),
            to: to.to_string(),
            content: content.to_vec(),
            timestamp,
            retries: 0,
        })
    }

    /// Snapshot of the whole queue in insertion order
    pub async fn get_queue(&self) -> Result<Vec<QueuedMessage>> {
        let _guard = self.read().await;
        let rows = sqlx::query_as::<_, (i64, String, String, String, i64, Vec<u8>)>(
            r#"
            SELECT id, msgfrom, msgto, ts, retries, content
            FROM queue
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, from, to, ts, retries, content)| {
                Ok(QueuedMessage {
                    id,
                    from,
                    to,
                    content,
                    timestamp: decode_ts(&ts)?,
                    retries: to_u32(retries, "retries")?,
                })
            })
            .collect()
    }

    pub async fn increment_retries(&self, queue_id: i64) -> Result<()> {
        let _guard = self.write().await;
        let result = sqlx::query("UPDATE queue SET retries = retries + 1 WHERE id = ?")
            .bind(queue_id)
            .execute(&self.pool)
            .await?;
        expect_one_row(result, || format!("queue entry {}", queue_id))
    }

    /// Store a bounce in `inbox_id` and drop queue row `queue_id` as one unit
    ///
    /// A missing row is NotFound and nothing is stored, so a row can never
    /// produce a second bounce.
    pub async fn bounce_queued(
        &self,
        queue_id: i64,
        inbox_id: i64,
        content: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<Message> {
        let _guard = self.write().await;
        let mut tx = self.pool.begin().await?;

        let message = super::messages::insert_message_in(&mut tx, content, &[], inbox_id, timestamp).await?;

        let result = sqlx::query("DELETE FROM queue WHERE id = ?")
            .bind(queue_id)
            .execute(&mut *tx)
            .await?;
        expect_one_row(result, || format!("queue entry {}", queue_id))?;

        tx.commit().await?;
        debug!(queue_id, mailbox_id = inbox_id, uid = message.uid, "Bounced queue entry");
        Ok(message)
    }

    pub async fn delete_queue(&self, queue_id: i64) -> Result<()> {
        let _guard = self.write().await;
        let result = sqlx::query("DELETE FROM queue WHERE id = ?")
            .bind(queue_id)
            .execute(&self.pool)
            .await?;
        expect_one_row(result, || format!("queue entry {}", queue_id))
    }
}
