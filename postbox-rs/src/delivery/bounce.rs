//! Non-delivery reports
//!
//! A bounce is a `multipart/mixed` message: a plain-text report followed by
//! the undelivered message attached verbatim as `message/rfc822`. It is
//! stored straight into the sender's INBOX, never relayed.

use crate::error::Result;
use crate::model::QueuedMessage;
use crate::storage::Store;
use chrono::Utc;
use mail_parser::MessageParser;
use tracing::{info, warn};
use uuid::Uuid;

const REPORT_TEMPLATE: &str = "\
This is the mail system at host {hostname}.

Your message could not be delivered to the following recipient
after {attempts} delivery attempts:

    <{recipient}>

Delivery has been abandoned. The original message is attached.
";

/// Render the multipart report for an undeliverable queue entry
pub fn compose(hostname: &str, entry: &QueuedMessage) -> Vec<u8> {
    let boundary = format!("----=_Bounce_{}", Uuid::new_v4().simple());
    let date = Utc::now().format("%a, %d %b %Y %H:%M:%S %z");
    let subject = original_subject(&entry.content)
        .map(|s| format!("Undelivered Mail Returned to Sender: {}", s))
        .unwrap_or_else(|| "Undelivered Mail Returned to Sender".to_string());
    let report = REPORT_TEMPLATE
        .replace("{hostname}", hostname)
        .replace("{attempts}", &(entry.retries + 1).to_string())
        .replace("{recipient}", &entry.to)
        .replace('\n', "\r\n");

    let mut out = format!(
        "From: Mail Delivery System <postmaster@{hostname}>\r\n\
         To: <{from}>\r\n\
         Subject: {subject}\r\n\
         Date: {date}\r\n\
         Message-ID: <{id}@{hostname}>\r\n\
         Auto-Submitted: auto-replied\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\
         \r\n\
         --{boundary}\r\n\
         Content-Type: text/plain; charset=\"UTF-8\"\r\n\
         Content-Transfer-Encoding: 8bit\r\n\
         \r\n\
         {report}\
         --{boundary}\r\n\
         Content-Type: message/rfc822\r\n\
         Content-Disposition: attachment\r\n\
         \r\n",
        from = entry.from,
        id = Uuid::new_v4().simple(),
    )
    .into_bytes();

    out.extend_from_slice(&entry.content);
    if !entry.content.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    out
}

/// Store a bounce for `entry` in its sender's INBOX and retire its queue row
///
/// Both happen in one transaction. Returns `false` when the sender has no
/// local inbox; the row is then deleted and the bounce dropped.
pub async fn deliver(store: &Store, hostname: &str, entry: &QueuedMessage) -> Result<bool> {
    let inbox = match store.get_inbox_id(&entry.from).await {
        Ok(id) => id,
        Err(e) if e.is_not_found() => {
            warn!(queue_id = entry.id, "Cannot bounce to {}: no local inbox", entry.from);
            store.delete_queue(entry.id).await?;
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    let bounce = compose(hostname, entry);
    let message = store.bounce_queued(entry.id, inbox, &bounce, Utc::now()).await?;

    info!(
        queue_id = entry.id,
        mailbox_id = inbox,
        uid = message.uid,
        "Bounced message for {} back to {}",
        entry.to,
        entry.from
    );
    Ok(true)
}

fn original_subject(content: &[u8]) -> Option<String> {
    let parsed = MessageParser::default().parse(content)?;
    parsed
        .subject()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
