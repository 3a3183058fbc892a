//! End-to-end delivery through the in-process change feed

use change_feed::{ChangeEvent, ChangeFeed, ChangeKind, ChannelScope, LocalChangeFeed, RowFilter};
use futures_util::StreamExt;
use serde_json::json;
use std::time::Duration;
use tokio_test::assert_ok;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("change_feed=debug")
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn scopes_are_isolated_per_subscription() {
    init_tracing();
    let feed = LocalChangeFeed::default();

    let mut alice = assert_ok!(
        feed.subscribe(ChannelScope::table("profiles").with_filter(RowFilter::eq("id", "alice")))
            .await
    );
    let mut bob = assert_ok!(
        feed.subscribe(ChannelScope::table("profiles").with_filter(RowFilter::eq("id", "bob")))
            .await
    );

    feed.publish(ChangeEvent::update("profiles", json!({"id": "alice", "bio": "a"})));
    feed.publish(ChangeEvent::update("profiles", json!({"id": "bob", "bio": "b"})));

    let a = alice.next().await.unwrap();
    let b = bob.next().await.unwrap();
    assert_eq!(a.new_row["bio"], "a");
    assert_eq!(b.new_row["bio"], "b");

    // Nothing else is pending for alice
    let pending = tokio::time::timeout(Duration::from_millis(20), alice.next()).await;
    assert!(pending.is_err());
}

#[tokio::test]
async fn subscription_is_a_stream() {
    init_tracing();
    let feed = LocalChangeFeed::default();
    let sub = assert_ok!(
        feed.subscribe(ChannelScope::table("messages").only(ChangeKind::Insert))
            .await
    );

    for n in 0..3 {
        feed.publish(ChangeEvent::insert("messages", json!({"id": n})));
        feed.publish(ChangeEvent::delete("messages", json!({"id": n})));
    }

    let ids: Vec<i64> = sub
        .take(3)
        .map(|event| event.row()["id"].as_i64().unwrap())
        .collect()
        .await;
    assert_eq!(ids, vec![0, 1, 2]);
}
