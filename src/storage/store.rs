use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::document::{Document, Query, WriteFields};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("invalid field name `{0}`")]
    InvalidField(String),

    #[error("stored document {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("live query closed")]
    Closed,

    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Errors worth retrying after a short wait.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::ResourceExhausted(_)
        )
    }
}

pub type Snapshot = Vec<Document>;

/// Asynchronous document store over named collections.
///
/// `subscribe` does not wait for the initial snapshot: it registers the live
/// query and returns at once, and the first item of the returned stream is the
/// initial result set. Must be called from within a tokio runtime.
pub trait DocumentStore: Send + Sync + 'static {
    fn create(
        &self,
        collection: &str,
        fields: WriteFields,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    fn set(
        &self,
        collection: &str,
        id: &str,
        fields: WriteFields,
        merge: bool,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Document, StoreError>> + Send;

    fn query(&self, query: &Query) -> impl Future<Output = Result<Snapshot, StoreError>> + Send;

    fn delete(&self, collection: &str, id: &str)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    fn subscribe(&self, query: Query) -> Result<LiveQuery, StoreError>;
}

/// Handle on a live query. Yields full snapshots; an `Err` item is terminal.
/// Dropping the handle (or calling [`LiveQuery::cancel`]) stops the producer.
pub struct LiveQuery {
    receiver: mpsc::Receiver<Result<Snapshot, StoreError>>,
    producer: Option<JoinHandle<()>>,
}

impl LiveQuery {
    pub fn new(
        receiver: mpsc::Receiver<Result<Snapshot, StoreError>>,
        producer: Option<JoinHandle<()>>,
    ) -> Self {
        Self { receiver, producer }
    }

    pub async fn next_snapshot(&mut self) -> Option<Result<Snapshot, StoreError>> {
        self.receiver.recv().await
    }

    pub fn cancel(&mut self) {
        self.receiver.close();
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

impl Stream for LiveQuery {
    type Item = Result<Snapshot, StoreError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for LiveQuery {
    fn drop(&mut self) {
        self.cancel();
    }
}
