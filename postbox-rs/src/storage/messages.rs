use super::{decode_ts, encode_ts, expect_one_row, to_u32, Store};
use crate::error::{MailError, Result};
use crate::model::{dedup_flags, Message};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::HashMap;
use tracing::debug;

impl Store {
    /// Append a message to a mailbox, assigning it the mailbox's `uidnext`
    ///
    /// UID read, row insert, flag inserts and the `uidnext` bump commit
    /// together or not at all.
    pub async fn insert_message<S: AsRef<str>>(
        &self,
        content: &[u8],
        flags: &[S],
        mailbox_id: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<Message> {
        let flags = dedup_flags(flags);

        let _guard = self.write().await;
        let mut tx = self.pool.begin().await?;
        let message = insert_message_in(&mut tx, content, &flags, mailbox_id, timestamp).await?;
        tx.commit().await?;

        Ok(message)
    }

    /// Append the same content to several mailboxes in one transaction
    ///
    /// Either every mailbox receives its copy or none does. Repeated ids are
    /// delivered to once.
    pub async fn deliver_to_mailboxes<S: AsRef<str>>(
        &self,
        mailbox_ids: &[i64],
        content: &[u8],
        flags: &[S],
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let flags = dedup_flags(flags);
        let mut targets: Vec<i64> = Vec::with_capacity(mailbox_ids.len());
        for id in mailbox_ids {
            if !targets.contains(id) {
                targets.push(*id);
            }
        }

        let _guard = self.write().await;
        let mut tx = self.pool.begin().await?;
        let mut delivered = Vec::with_capacity(targets.len());
        for mailbox_id in targets {
            delivered.push(insert_message_in(&mut tx, content, &flags, mailbox_id, timestamp).await?);
        }
        tx.commit().await?;

        Ok(delivered)
    }

    /// Messages of a mailbox with `lower <= uid <= upper`, ordered by UID
    ///
    /// `None` leaves that side of the range open.
    pub async fn get_messages(
        &self,
        mailbox_id: i64,
        lower: Option<u32>,
        upper: Option<u32>,
    ) -> Result<Vec<Message>> {
        let _guard = self.read().await;

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT m.id, m.mailbox_id, m.content, m.uid, m.ts FROM messages m");
        push_range(&mut qb, mailbox_id, lower, upper);
        qb.push(" ORDER BY m.uid");
        let rows = qb
            .build_query_as::<(i64, i64, Vec<u8>, i64, String)>()
            .fetch_all(&self.pool)
            .await?;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT f.message_id, f.flag FROM messageflags f JOIN messages m ON m.id = f.message_id",
        );
        push_range(&mut qb, mailbox_id, lower, upper);
        qb.push(" ORDER BY f.id");
        let flag_rows = qb
            .build_query_as::<(i64, String)>()
            .fetch_all(&self.pool)
            .await?;

        let mut flags: HashMap<i64, Vec<String>> = HashMap::new();
        for (message_id, flag) in flag_rows {
            flags.entry(message_id).or_default().push(flag);
        }

        rows.into_iter()
            .map(|(id, mailbox_id, content, uid, ts)| {
                Ok(Message {
                    id,
                    mailbox_id,
                    content,
                    uid: to_u32(uid, "uid")?,
                    flags: flags.get(&id).map(|f| dedup_flags(f)).unwrap_or_default(),
                    timestamp: decode_ts(&ts)?,
                })
            })
            .collect()
    }

    /// Replace the whole flag set of a message
    pub async fn set_message_flags<S: AsRef<str>>(&self, message_id: i64, flags: &[S]) -> Result<()> {
        let flags = dedup_flags(flags);

        let _guard = self.write().await;
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM messages WHERE id = ?")
            .bind(message_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(MailError::NotFound(format!("message {}", message_id)));
        }

        sqlx::query("DELETE FROM messageflags WHERE message_id = ?")
            .bind(message_id)
            .execute(&mut *tx)
            .await?;
        insert_flags_in(&mut tx, message_id, &flags).await?;

        tx.commit().await?;
        debug!(message_id, "Replaced flags with {:?}", flags);
        Ok(())
    }

    /// Delete a message and its flags
    pub async fn delete_message(&self, message_id: i64) -> Result<()> {
        let _guard = self.write().await;
        let result = sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        expect_one_row(result, || format!("message {}", message_id))
    }
}

fn push_range(qb: &mut QueryBuilder<'_, Sqlite>, mailbox_id: i64, lower: Option<u32>, upper: Option<u32>) {
    qb.push(" WHERE m.mailbox_id = ").push_bind(mailbox_id);
    if let Some(lower) = lower {
        qb.push(" AND m.uid >= ").push_bind(i64::from(lower));
    }
    if let Some(upper) = upper {
        qb.push(" AND m.uid <= ").push_bind(i64::from(upper));
    }
}

pub(super) async fn insert_message_in(
    conn: &mut SqliteConnection,
    content: &[u8],
    flags: &[String],
    mailbox_id: i64,
    timestamp: DateTime<Utc>,
) -> Result<Message> {
    let uid = sqlx::query_scalar::<_, i64>("SELECT uidnext FROM mailboxes WHERE id = ?")
        .bind(mailbox_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| MailError::NotFound(format!("mailbox {}", mailbox_id)))?;
    let uid = to_u32(uid, "uidnext")?;

    let result = sqlx::query(
        r#"
        INSERT INTO messages (mailbox_id, content, uid, ts)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(mailbox_id)
    .bind(content)
    .bind(i64::from(uid))
    .bind(encode_ts(&timestamp))
    .execute(&mut *conn)
    .await?;
    let message_id = result.last_insert_rowid();

    insert_flags_in(conn, message_id, flags).await?;

    sqlx::query("UPDATE mailboxes SET uidnext = uidnext + 1 WHERE id = ?")
        .bind(mailbox_id)
        .execute(&mut *conn)
        .await?;

    debug!(mailbox_id, uid, "Stored message {} ({} bytes)", message_id, content.len());

    Ok(Message {
        id: message_id,
        mailbox_id,
        content: content.to_vec(),
        uid,
        flags: flags.to_vec(),
        timestamp,
    })
}

async fn insert_flags_in(conn: &mut SqliteConnection, message_id: i64, flags: &[String]) -> Result<()> {
    for flag in flags {
        sqlx::query("INSERT INTO messageflags (message_id, flag) VALUES (?, ?)")
            .bind(message_id)
            .bind(flag)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FLAG_RECENT, FLAG_SEEN};

    const NO_FLAGS: &[&str] = &[];

    async fn store_with_inbox() -> (Store, i64) {
        let store = Store::in_memory().await.unwrap();
        let user = store.insert_user("blah@test.com", "hash", false).await.unwrap();
        let inbox = store.insert_mailbox("INBOX", user.id).await.unwrap();
        (store, inbox.id)
    }

    #[tokio::test]
    async fn test_uids_are_sequential() {
        let (store, inbox) = store_with_inbox().await;

        for expected in 1..=3u32 {
            let message = store.insert_message(b"hi", NO_FLAGS, inbox, Utc::now()).await.unwrap();
            assert_eq!(message.uid, expected);
        }
        assert_eq!(store.get_mailbox_by_id(inbox).await.unwrap().uid_next, 4);
    }

    #[tokio::test]
    async fn test_insert_into_missing_mailbox_leaves_nothing() {
        let (store, inbox) = store_with_inbox().await;

        let result = store.insert_message(b"hi", &[FLAG_SEEN], 9999, Utc::now()).await;
        assert!(result.unwrap_err().is_not_found());

        assert!(store.get_messages(inbox, None, None).await.unwrap().is_empty());
        assert_eq!(store.get_mailbox_by_id(inbox).await.unwrap().uid_next, 1);
    }

    #[tokio::test]
    async fn test_get_messages_range() {
        let (store, inbox) = store_with_inbox().await;
        for body in [b"one", b"two", b"six"] {
            store.insert_message(body, &[FLAG_RECENT], inbox, Utc::now()).await.unwrap();
        }

        let uids = |messages: Vec<Message>| messages.iter().map(|m| m.uid).collect::<Vec<_>>();

        assert_eq!(uids(store.get_messages(inbox, None, None).await.unwrap()), vec![1, 2, 3]);
        assert_eq!(uids(store.get_messages(inbox, Some(2), None).await.unwrap()), vec![2, 3]);
        assert_eq!(uids(store.get_messages(inbox, None, Some(2)).await.unwrap()), vec![1, 2]);
        assert_eq!(uids(store.get_messages(inbox, Some(2), Some(2)).await.unwrap()), vec![2]);
        assert!(store.get_messages(inbox, Some(3), Some(1)).await.unwrap().is_empty());

        let all = store.get_messages(inbox, None, None).await.unwrap();
        assert_eq!(all[1].content, b"two");
        assert!(all.iter().all(|m| m.flags == vec![FLAG_RECENT.to_string()]));
    }

    #[tokio::test]
    async fn test_flag_replace_is_idempotent() {
        let (store, inbox) = store_with_inbox().await;
        let message = store
            .insert_message(b"hi", &[FLAG_RECENT, "\\Draft"], inbox, Utc::now())
            .await
            .unwrap();

        let replacement = [FLAG_SEEN, "\\Flagged", FLAG_SEEN];
        store.set_message_flags(message.id, &replacement).await.unwrap();
        store.set_message_flags(message.id, &replacement).await.unwrap();

        let stored = &store.get_messages(inbox, None, None).await.unwrap()[0];
        assert_eq!(stored.flags, vec![FLAG_SEEN.to_string(), "\\Flagged".to_string()]);

        store.set_message_flags(message.id, NO_FLAGS).await.unwrap();
        let stored = &store.get_messages(inbox, None, None).await.unwrap()[0];
        assert!(stored.flags.is_empty());
    }

    #[tokio::test]
    async fn test_flag_update_on_missing_message() {
        let (store, _) = store_with_inbox().await;
        let result = store.set_message_flags(42, &[FLAG_SEEN]).await;
        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_message() {
        let (store, inbox) = store_with_inbox().await;
        let message = store.insert_message(b"hi", &[FLAG_SEEN], inbox, Utc::now()).await.unwrap();

        store.delete_message(message.id).await.unwrap();
        assert!(store.get_messages(inbox, None, None).await.unwrap().is_empty());
        assert!(store.delete_message(message.id).await.unwrap_err().is_not_found());

        // UIDs are never reused
        let next = store.insert_message(b"again", NO_FLAGS, inbox, Utc::now()).await.unwrap();
        assert_eq!(next.uid, 2);
    }

    #[tokio::test]
    async fn test_deliver_to_mailboxes_is_all_or_nothing() {
        let store = Store::in_memory().await.unwrap();
        let a = store.insert_user("a@test.com", "hash", false).await.unwrap();
        let b = store.insert_user("b@test.com", "hash", false).await.unwrap();
        let inbox_a = store.insert_mailbox("INBOX", a.id).await.unwrap().id;
        let inbox_b = store.insert_mailbox("INBOX", b.id).await.unwrap().id;

        let result = store
            .deliver_to_mailboxes(&[inbox_a, 9999, inbox_b], b"hi", NO_FLAGS, Utc::now())
            .await;
        assert!(result.is_err());
        assert!(store.get_messages(inbox_a, None, None).await.unwrap().is_empty());
        assert_eq!(store.get_mailbox_by_id(inbox_a).await.unwrap().uid_next, 1);

        let delivered = store
            .deliver_to_mailboxes(&[inbox_a, inbox_b, inbox_a], b"hi", &[FLAG_RECENT], Utc::now())
            .await
            .unwrap();
        assert_eq!(delivered.len(), 2);
        assert!(delivered.iter().all(|m| m.uid == 1));
    }

    #[tokio::test]
    async fn test_concurrent_inserts_get_distinct_uids() {
        let (store, inbox) = store_with_inbox().await;

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let body = format!("message {}", i);
                store
                    .insert_message(body.as_bytes(), &[FLAG_RECENT], inbox, Utc::now())
                    .await
                    .unwrap()
                    .uid
            }));
        }

        let mut uids = Vec::new();
        for handle in handles {
            uids.push(handle.await.unwrap());
        }
        uids.sort_unstable();
        assert_eq!(uids, (1..=20).collect::<Vec<u32>>());
        assert_eq!(store.get_mailbox_by_id(inbox).await.unwrap().uid_next, 21);
    }
}
