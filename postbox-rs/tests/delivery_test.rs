//! Submission, queueing, retry sweeps and bounces end to end

mod common;

use common::{message, postbox_with, test_config, FakeRelay};
use mail_parser::{MessageParser, PartType};
use postbox_rs::delivery::SweepReport;

#[tokio::test]
async fn test_failed_recipient_queued_retried_and_bounced() {
    let relay = FakeRelay::refusing(&["bob@remote.example"]);
    let postbox = postbox_with(test_config(), relay.clone()).await;
    let store = postbox.store().clone();
    postbox.login().new_user("alice@local.example", "pw", false).await.unwrap();

    let original = message("alice@local.example", "bob@remote.example", "Lunch");
    postbox
        .submit("alice@local.example", vec!["bob@remote.example".to_string()], original.clone())
        .await
        .unwrap();

    let queue = store.get_queue().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].retries, 0);
    assert_eq!(queue[0].to, "bob@remote.example");

    let max = postbox.config().delivery.max_retries;
    for sweep in 1..=max {
        let report = postbox.retries().sweep().await.unwrap();
        if sweep < max {
            assert_eq!(report.retried, 1);
            assert_eq!(store.get_queue().await.unwrap()[0].retries, sweep);
        } else {
            assert_eq!(report.bounced, 1);
        }
    }
    assert!(store.get_queue().await.unwrap().is_empty());

    let inbox = store.get_inbox_id("alice@local.example").await.unwrap();
    let messages = store.get_messages(inbox, None, None).await.unwrap();
    assert_eq!(messages.len(), 1);

    let bounce = MessageParser::default().parse(&messages[0].content).unwrap();
    let report = bounce.body_text(0).unwrap();
    assert!(report.contains("bob@remote.example"));
    assert!(report.contains(&format!("after {} delivery attempts", max)));

    let embedded = bounce
        .parts
        .iter()
        .find_map(|part| match &part.body {
            PartType::Message(inner) => Some(inner),
            _ => None,
        })
        .expect("original message embedded as a sub-part");
    assert_eq!(embedded.subject(), Some("Lunch"));
    assert!(messages[0]
        .content
        .windows(original.len())
        .any(|w| w == original.as_slice()));

    // The bounce went to the mailbox, never through the relay
    assert!(relay.delivered().is_empty());
    assert_eq!(postbox.retries().sweep().await.unwrap(), SweepReport::default());
}

#[tokio::test]
async fn test_partial_multi_recipient_delivery() {
    let relay = FakeRelay::refusing(&["carol@remote.example"]);
    let postbox = postbox_with(test_config(), relay.clone()).await;
    let store = postbox.store().clone();

    let recipients = vec![
        "bob@remote.example".to_string(),
        "carol@remote.example".to_string(),
        "dave@other.example".to_string(),
    ];
    postbox
        .submit(
            "alice@local.example",
            recipients,
            message("alice@local.example", "bob@remote.example", "Meeting"),
        )
        .await
        .unwrap();

    let delivered: Vec<String> = relay.delivered().into_iter().map(|(_, to, _)| to).collect();
    assert_eq!(delivered, vec!["bob@remote.example", "dave@other.example"]);

    let queue = store.get_queue().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].to, "carol@remote.example");

    relay.make_reachable("carol@remote.example");
    let report = postbox.retries().sweep().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert!(store.get_queue().await.unwrap().is_empty());

    // The two immediate deliveries were not repeated
    let delivered: Vec<String> = relay.delivered().into_iter().map(|(_, to, _)| to).collect();
    assert_eq!(
        delivered,
        vec!["bob@remote.example", "dave@other.example", "carol@remote.example"]
    );
}

#[tokio::test]
async fn test_rows_queued_mid_life_keep_their_own_counters() {
    let relay = FakeRelay::refusing(&["bob@remote.example", "carol@remote.example"]);
    let postbox = postbox_with(test_config(), relay).await;
    let store = postbox.store().clone();

    postbox
        .submit(
            "alice@local.example",
            vec!["bob@remote.example".to_string()],
            message("alice@local.example", "bob@remote.example", "First"),
        )
        .await
        .unwrap();
    postbox.retries().sweep().await.unwrap();

    postbox
        .submit(
            "alice@local.example",
            vec!["carol@remote.example".to_string()],
            message("alice@local.example", "carol@remote.example", "Second"),
        )
        .await
        .unwrap();
    postbox.retries().sweep().await.unwrap();

    let retries: Vec<(String, u32)> = store
        .get_queue()
        .await
        .unwrap()
        .into_iter()
        .map(|q| (q.to, q.retries))
        .collect();
    assert_eq!(
        retries,
        vec![
            ("bob@remote.example".to_string(), 2),
            ("carol@remote.example".to_string(), 1)
        ]
    );
}

#[tokio::test]
async fn test_signed_submission_is_queued_signed() {
    let mut config = test_config();
    config.dkim.sign = true;
    config.dkim.key_bits = 1024;

    let relay = FakeRelay::refusing(&["bob@remote.example"]);
    let postbox = postbox_with(config, relay).await;

    postbox
        .submit(
            "alice@local.example",
            vec!["bob@remote.example".to_string()],
            message("alice@local.example", "bob@remote.example", "Signed"),
        )
        .await
        .unwrap();

    let queue = postbox.store().get_queue().await.unwrap();
    assert!(queue[0].content.starts_with(b"DKIM-Signature:"));
}
