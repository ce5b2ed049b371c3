mod common;

use std::sync::Arc;

use common::*;
use tablechat::chat::subscribe_thread;
use tablechat::storage::StoreError;
use tablechat::{ChatError, ThreadSide};
use tokio::time::timeout;

const ADMIN: &str = "admin-1";
const OWNER: &str = "owner-7";

#[tokio::test]
async fn every_snapshot_emits_the_merged_thread() {
    let store = Arc::new(ScriptedStore::default());
    let (callback, mut updates) = collector();
    let _sub = subscribe_thread(store.as_ref(), ADMIN, OWNER, callback).unwrap();
    assert_eq!(store.subscription_count(), 2);

    store
        .push(ADMIN, OWNER, Ok(vec![message_doc("a1", ADMIN, OWNER, "hi", 100)]))
        .await;
    let first = next_update(&mut updates).await.unwrap();
    assert_eq!(contents(&first), vec!["hi"]);

    store
        .push(OWNER, ADMIN, Ok(vec![message_doc("o1", OWNER, ADMIN, "hello", 200)]))
        .await;
    let second = next_update(&mut updates).await.unwrap();
    assert_eq!(contents(&second), vec!["hi", "hello"]);
    assert_eq!(second[1].sender_name, "owner-7 name");
}

#[tokio::test]
async fn partial_update_keeps_other_side_unchanged() {
    let store = Arc::new(ScriptedStore::default());
    let (callback, mut updates) = collector();
    let _sub = subscribe_thread(store.as_ref(), ADMIN, OWNER, callback).unwrap();

    store
        .push(ADMIN, OWNER, Ok(vec![message_doc("a1", ADMIN, OWNER, "one", 1)]))
        .await;
    store
        .push(
            OWNER,
            ADMIN,
            Ok(vec![
                message_doc("o1", OWNER, ADMIN, "two", 2),
                message_doc("o2", OWNER, ADMIN, "four", 4),
            ]),
        )
        .await;
    let before = wait_for_len(&mut updates, 3).await;
    let incoming_before: Vec<_> = before.iter().filter(|m| m.sender_id == OWNER).cloned().collect();

    store
        .push(
            ADMIN,
            OWNER,
            Ok(vec![
                message_doc("a1", ADMIN, OWNER, "one", 1),
                message_doc("a2", ADMIN, OWNER, "three", 3),
            ]),
        )
        .await;
    let after = next_update(&mut updates).await.unwrap();
    let incoming_after: Vec<_> = after.iter().filter(|m| m.sender_id == OWNER).cloned().collect();

    assert_eq!(contents(&after), vec!["one", "two", "three", "four"]);
    assert_eq!(incoming_before, incoming_after);
}

#[tokio::test]
async fn scenario_order_does_not_depend_on_which_side_fired_last() {
    let hi = message_doc("x3", ADMIN, OWNER, "hi", 1_000);
    let hello = message_doc("x2", OWNER, ADMIN, "hello", 2_000);
    let how = message_doc("x1", ADMIN, OWNER, "how are you", 3_000);

    // Outgoing side fires last.
    let store = Arc::new(ScriptedStore::default());
    let (callback, mut updates) = collector();
    let _sub = subscribe_thread(store.as_ref(), ADMIN, OWNER, callback).unwrap();
    store.push(OWNER, ADMIN, Ok(vec![hello.clone()])).await;
    store
        .push(ADMIN, OWNER, Ok(vec![hi.clone(), how.clone()]))
        .await;
    let thread = wait_for_len(&mut updates, 3).await;
    assert_eq!(contents(&thread), vec!["hi", "hello", "how are you"]);

    // Incoming side fires last.
    let store = Arc::new(ScriptedStore::default());
    let (callback, mut updates) = collector();
    let _sub = subscribe_thread(store.as_ref(), ADMIN, OWNER, callback).unwrap();
    store.push(ADMIN, OWNER, Ok(vec![hi, how])).await;
    store.push(OWNER, ADMIN, Ok(vec![hello])).await;
    let thread = wait_for_len(&mut updates, 3).await;
    assert_eq!(contents(&thread), vec!["hi", "hello", "how are you"]);
}

#[tokio::test]
async fn identical_timestamps_fall_back_to_message_id() {
    let store = Arc::new(ScriptedStore::default());
    let (callback, mut updates) = collector();
    let _sub = subscribe_thread(store.as_ref(), ADMIN, OWNER, callback).unwrap();

    store
        .push(ADMIN, OWNER, Ok(vec![message_doc("m-2", ADMIN, OWNER, "b", 50)]))
        .await;
    store
        .push(
            OWNER,
            ADMIN,
            Ok(vec![
                message_doc("m-1", OWNER, ADMIN, "a", 50),
                message_doc("m-3", OWNER, ADMIN, "c", 50),
            ]),
        )
        .await;

    let thread = wait_for_len(&mut updates, 3).await;
    let ids: Vec<&str> = thread.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m-1", "m-2", "m-3"]);
}

#[tokio::test]
async fn side_error_is_surfaced_and_tears_down_both_queries() {
    let store = Arc::new(ScriptedStore::default());
    let (callback, mut updates) = collector();
    let sub = subscribe_thread(store.as_ref(), ADMIN, OWNER, callback).unwrap();
    let outgoing = store.feed(ADMIN, OWNER);
    let incoming = store.feed(OWNER, ADMIN);

    store
        .push(ADMIN, OWNER, Ok(vec![message_doc("a1", ADMIN, OWNER, "hi", 1)]))
        .await;
    next_update(&mut updates).await.unwrap();

    store
        .push(OWNER, ADMIN, Err(StoreError::PermissionDenied("rules".into())))
        .await;
    let failure = next_update(&mut updates).await;
    assert_eq!(
        failure,
        Err(ChatError::subscription(
            ThreadSide::Incoming,
            StoreError::PermissionDenied("rules".into())
        ))
    );

    timeout(WAIT, outgoing.closed()).await.unwrap();
    timeout(WAIT, incoming.closed()).await.unwrap();
    timeout(WAIT, async {
        while sub.is_active() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert!(stays_quiet(&mut updates).await);
}

#[tokio::test]
async fn malformed_document_fails_the_thread() {
    let store = Arc::new(ScriptedStore::default());
    let (callback, mut updates) = collector();
    let _sub = subscribe_thread(store.as_ref(), ADMIN, OWNER, callback).unwrap();

    let mut bad = message_doc("bad", ADMIN, OWNER, "hi", 1);
    bad.fields.remove("createdAt");
    store.push(ADMIN, OWNER, Ok(vec![bad])).await;

    match next_update(&mut updates).await {
        Err(ChatError::Subscription { side, source }) => {
            assert_eq!(side, ThreadSide::Outgoing);
            assert!(matches!(*source, ChatError::InvalidDocument { ref id, .. } if id == "bad"));
        }
        other => panic!("expected a subscription failure, got {other:?}"),
    }
}

#[tokio::test]
async fn closed_live_query_is_an_error() {
    let store = Arc::new(ScriptedStore::default());
    let (callback, mut updates) = collector();
    let _sub = subscribe_thread(store.as_ref(), ADMIN, OWNER, callback).unwrap();

    store.close_all();

    let failure = next_update(&mut updates).await;
    assert!(matches!(
        failure,
        Err(ChatError::Subscription { ref source, .. }) if **source == ChatError::Store(StoreError::Closed)
    ));
}

#[tokio::test]
async fn unsubscribe_stops_emissions_and_is_idempotent() {
    let store = Arc::new(ScriptedStore::default());
    let (callback, mut updates) = collector();
    let mut sub = subscribe_thread(store.as_ref(), ADMIN, OWNER, callback).unwrap();
    let outgoing = store.feed(ADMIN, OWNER);

    store
        .push(ADMIN, OWNER, Ok(vec![message_doc("a1", ADMIN, OWNER, "hi", 1)]))
        .await;
    next_update(&mut updates).await.unwrap();

    sub.unsubscribe();
    sub.unsubscribe();
    assert!(!sub.is_active());

    store
        .push_lossy(OWNER, ADMIN, vec![message_doc("o1", OWNER, ADMIN, "late", 2)])
        .await;
    assert!(stays_quiet(&mut updates).await);
    timeout(WAIT, outgoing.closed()).await.unwrap();
}

#[tokio::test]
async fn refused_live_query_fails_subscribe() {
    let store = ScriptedStore::refusing(StoreError::Unavailable("offline".into()));
    let (callback, _updates) = collector();

    match subscribe_thread(&store, ADMIN, OWNER, callback) {
        Err(ChatError::Subscription { side, source }) => {
            assert_eq!(side, ThreadSide::Outgoing);
            assert_eq!(*source, ChatError::Store(StoreError::Unavailable("offline".into())));
        }
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("subscribe should fail"),
    }
}
