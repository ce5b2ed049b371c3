//! Two-party chat threads.
//!
//! The store can only express one direction of a conversation per live query,
//! so a thread is built from two of them: local→counterpart and
//! counterpart→local. Each side keeps its own cache; a snapshot from one side
//! replaces only that side's cache, then both caches are merged and the whole
//! ordered thread is handed to the subscriber.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use super::schema::{CHAT_MESSAGES, CREATED_AT, RECEIVER_ID, SENDER_ID, parse_snapshot};
use crate::common::{ChatError, ChatMessage, ThreadSide};
use crate::storage::{Direction, DocumentStore, LiveQuery, Query, StoreError};

/// One emission of a thread: the whole conversation so far, or the error that
/// ended the subscription.
pub type ThreadUpdate = Result<Vec<ChatMessage>, ChatError>;

type Callback = Box<dyn FnMut(ThreadUpdate) + Send>;

/// Messages sent by `sender` to `receiver`, oldest first.
pub fn direction_query(sender: &str, receiver: &str) -> Query {
    Query::collection(CHAT_MESSAGES)
        .where_eq(SENDER_ID, sender)
        .where_eq(RECEIVER_ID, receiver)
        .order_by(CREATED_AT, Direction::Ascending)
}

/// Per-side caches of one thread.
#[derive(Debug, Default)]
pub struct ThreadMerge {
    outgoing: Vec<ChatMessage>,
    incoming: Vec<ChatMessage>,
}

impl ThreadMerge {
    /// Replaces one side's cache and returns the merged thread.
    pub fn apply(&mut self, side: ThreadSide, messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
        match side {
            ThreadSide::Outgoing => self.outgoing = messages,
            ThreadSide::Incoming => self.incoming = messages,
        }
        self.merged()
    }

    /// Both sides ordered by creation time; equal timestamps order by id.
    pub fn merged(&self) -> Vec<ChatMessage> {
        let mut thread: Vec<ChatMessage> = self
            .outgoing
            .iter()
            .chain(self.incoming.iter())
            .cloned()
            .collect();
        thread.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        thread
    }
}

/// Live view of a thread. Dropping it unsubscribes.
pub struct ThreadSubscription {
    sink: Arc<Mutex<Option<Callback>>>,
    task: Option<JoinHandle<()>>,
}

impl ThreadSubscription {
    /// Stops both live queries. Once this returns the callback is never
    /// invoked again; a callback already running finishes first. Calling it
    /// again is a no-op. Must not be called from inside the callback itself.
    pub fn unsubscribe(&mut self) {
        let removed = match self.sink.lock() {
            Ok(mut sink) => sink.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if removed.is_some() {
            log::debug!("Thread subscription cancelled");
        }
    }

    /// False once unsubscribed or after the subscription ended with an error.
    pub fn is_active(&self) -> bool {
        self.task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for ThreadSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Opens the two directional live queries between `local` and `counterpart`
/// and feeds every merged view to `callback`.
///
/// Fails if either live query cannot be established. Later failures of
/// either side are delivered once as `Err(ChatError::Subscription)`, after
/// which both queries are torn down.
pub fn subscribe_thread<S, F>(
    store: &S,
    local: &str,
    counterpart: &str,
    callback: F,
) -> Result<ThreadSubscription, ChatError>
where
    S: DocumentStore,
    F: FnMut(ThreadUpdate) + Send + 'static,
{
    let outgoing = store
        .subscribe(direction_query(local, counterpart))
        .map_err(|err| ChatError::subscription(ThreadSide::Outgoing, err))?;
    let incoming = store
        .subscribe(direction_query(counterpart, local))
        .map_err(|err| ChatError::subscription(ThreadSide::Incoming, err))?;

    let callback: Callback = Box::new(callback);
    let sink = Arc::new(Mutex::new(Some(callback)));
    let task = tokio::spawn(run_thread(outgoing, incoming, Arc::clone(&sink)));
    log::debug!("Thread subscription opened between {local} and {counterpart}");

    Ok(ThreadSubscription {
        sink,
        task: Some(task),
    })
}

async fn run_thread(
    mut outgoing: LiveQuery,
    mut incoming: LiveQuery,
    sink: Arc<Mutex<Option<Callback>>>,
) {
    let mut merge = ThreadMerge::default();
    loop {
        let (side, item) = tokio::select! {
            item = outgoing.next_snapshot() => (ThreadSide::Outgoing, item),
            item = incoming.next_snapshot() => (ThreadSide::Incoming, item),
        };

        let update = match item {
            // Parse the whole snapshot before touching the cache.
            Some(Ok(documents)) => parse_snapshot(documents)
                .map(|messages| merge.apply(side, messages))
                .map_err(|err| ChatError::subscription(side, err)),
            Some(Err(err)) => Err(ChatError::subscription(side, err)),
            None => Err(ChatError::subscription(side, StoreError::Closed)),
        };

        let failed = update.is_err();
        if let Err(err) = &update {
            log::warn!("Thread subscription failed: {err}");
        }
        if !emit(&sink, update) || failed {
            break;
        }
    }
    // Dropping both handles stops their producers.
    outgoing.cancel();
    incoming.cancel();
}

/// Delivers an update unless the subscriber is gone.
fn emit(sink: &Mutex<Option<Callback>>, update: ThreadUpdate) -> bool {
    let Ok(mut sink) = sink.lock() else {
        return false;
    };
    match sink.as_mut() {
        Some(callback) => {
            callback(update);
            true
        }
        None => false,
    }
}
