#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tablechat::storage::{Document, DocumentStore, LiveQuery, Query, Snapshot, StoreError, WriteFields};
use tablechat::{ChatMessage, ThreadUpdate};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

type Feed = mpsc::Sender<Result<Snapshot, StoreError>>;

/// Store whose live queries are fed by the test: every `subscribe` registers
/// a feed, and `push` delivers a snapshot to the feed of one direction.
#[derive(Default)]
pub struct ScriptedStore {
    feeds: Mutex<Vec<(Query, Feed)>>,
    refuse_subscriptions: Mutex<Option<StoreError>>,
}

impl ScriptedStore {
    pub fn refusing(err: StoreError) -> Self {
        Self {
            feeds: Mutex::new(Vec::new()),
            refuse_subscriptions: Mutex::new(Some(err)),
        }
    }

    pub fn feed(&self, sender: &str, receiver: &str) -> Feed {
        let feeds = self.feeds.lock().unwrap();
        feeds
            .iter()
            .find(|(query, _)| {
                query.filters.iter().any(|f| f.field == "senderId" && f.value == sender)
                    && query.filters.iter().any(|f| f.field == "receiverId" && f.value == receiver)
            })
            .map(|(_, feed)| feed.clone())
            .expect("no live query for that direction")
    }

    pub async fn push(&self, sender: &str, receiver: &str, snapshot: Result<Snapshot, StoreError>) {
        let feed = self.feed(sender, receiver);
        feed.send(snapshot).await.expect("live query already closed");
    }

    /// Pushes without caring whether anyone is still listening.
    pub async fn push_lossy(&self, sender: &str, receiver: &str, snapshot: Snapshot) {
        let feed = self.feed(sender, receiver);
        let _ = feed.send(Ok(snapshot)).await;
    }

    /// Drops every producer, ending all live queries.
    pub fn close_all(&self) {
        self.feeds.lock().unwrap().clear();
    }

    pub fn subscription_count(&self) -> usize {
        self.feeds.lock().unwrap().len()
    }
}

fn unsupported() -> StoreError {
    StoreError::Backend("scripted store only serves live queries".to_string())
}

impl DocumentStore for ScriptedStore {
    async fn create(&self, _collection: &str, _fields: WriteFields) -> Result<String, StoreError> {
        Err(unsupported())
    }

    async fn set(
        &self,
        _collection: &str,
        _id: &str,
        _fields: WriteFields,
        _merge: bool,
    ) -> Result<(), StoreError> {
        Err(unsupported())
    }

    async fn get(&self, _collection: &str, _id: &str) -> Result<Document, StoreError> {
        Err(unsupported())
    }

    async fn query(&self, _query: &Query) -> Result<Snapshot, StoreError> {
        Err(unsupported())
    }

    async fn delete(&self, _collection: &str, _id: &str) -> Result<(), StoreError> {
        Err(unsupported())
    }

    fn subscribe(&self, query: Query) -> Result<LiveQuery, StoreError> {
        if let Some(err) = self.refuse_subscriptions.lock().unwrap().clone() {
            return Err(err);
        }
        let (sender, receiver) = mpsc::channel(16);
        self.feeds.lock().unwrap().push((query, sender));
        Ok(LiveQuery::new(receiver, None))
    }
}

pub fn message_doc(id: &str, sender: &str, receiver: &str, content: &str, at: i64) -> Document {
    let fields: Map<String, Value> = match json!({
        "senderId": sender,
        "senderName": format!("{sender} name"),
        "receiverId": receiver,
        "content": content,
        "createdAt": at,
    }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    };
    Document {
        id: id.to_string(),
        fields,
    }
}

/// Callback that forwards every emission into a channel the test can await.
pub fn collector() -> (
    impl FnMut(ThreadUpdate) + Send + 'static,
    mpsc::UnboundedReceiver<ThreadUpdate>,
) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let callback = move |update: ThreadUpdate| {
        let _ = sender.send(update);
    };
    (callback, receiver)
}

pub async fn next_update(updates: &mut mpsc::UnboundedReceiver<ThreadUpdate>) -> ThreadUpdate {
    timeout(WAIT, updates.recv())
        .await
        .expect("timed out waiting for a thread update")
        .expect("update channel closed")
}

/// Skips emissions until the thread holds `len` messages.
pub async fn wait_for_len(
    updates: &mut mpsc::UnboundedReceiver<ThreadUpdate>,
    len: usize,
) -> Vec<ChatMessage> {
    loop {
        let thread = next_update(updates).await.expect("thread failed");
        if thread.len() == len {
            return thread;
        }
    }
}

/// True if nothing arrives within a short grace period.
pub async fn stays_quiet(updates: &mut mpsc::UnboundedReceiver<ThreadUpdate>) -> bool {
    match timeout(Duration::from_millis(200), updates.recv()).await {
        Err(_) => true,
        Ok(None) => true,
        Ok(Some(_)) => false,
    }
}

pub fn contents(thread: &[ChatMessage]) -> Vec<&str> {
    thread.iter().map(|m| m.content.as_str()).collect()
}
