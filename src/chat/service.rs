use std::sync::Arc;

use super::schema::{CHAT_MESSAGES, draft_fields};
use super::thread::{ThreadSubscription, ThreadUpdate, subscribe_thread};
use crate::common::{ChatError, MessageDraft};
use crate::session::Session;
use crate::storage::{DocumentStore, Query, RetryPolicy, StoreError, with_retry};

/// Chat operations over the `chat-messages` collection.
pub struct ChatService<S> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S: DocumentStore> ChatService<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Stores one message and returns its id. Blank content is rejected
    /// before anything is written; the content itself is stored verbatim.
    pub async fn send_message(&self, draft: MessageDraft) -> Result<String, ChatError> {
        if draft.content.trim().is_empty() {
            log::warn!(
                "Rejected empty message from {} to {}",
                draft.sender_id,
                draft.receiver_id
            );
            return Err(ChatError::EmptyContent);
        }

        let id = self.store.create(CHAT_MESSAGES, draft_fields(&draft)).await?;
        log::info!(
            "Message {id} sent from {} to {}",
            draft.sender_id,
            draft.receiver_id
        );
        Ok(id)
    }

    /// Sends as the session's user.
    pub async fn send(
        &self,
        session: &Session,
        receiver_id: &str,
        content: &str,
    ) -> Result<String, ChatError> {
        self.send_message(MessageDraft {
            sender_id: session.user_id().to_string(),
            sender_name: session.display_name(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
        })
        .await
    }

    pub fn subscribe_thread<F>(
        &self,
        local: &str,
        counterpart: &str,
        callback: F,
    ) -> Result<ThreadSubscription, ChatError>
    where
        F: FnMut(ThreadUpdate) + Send + 'static,
    {
        subscribe_thread(self.store.as_ref(), local, counterpart, callback)
    }

    /// Thread between the session's user and `counterpart`.
    pub fn open_thread<F>(
        &self,
        session: &Session,
        counterpart: &str,
        callback: F,
    ) -> Result<ThreadSubscription, ChatError>
    where
        F: FnMut(ThreadUpdate) + Send + 'static,
    {
        self.subscribe_thread(session.user_id(), counterpart, callback)
    }

    /// Maintenance: deletes every chat message. Returns how many were removed.
    pub async fn clear_messages(&self) -> Result<usize, ChatError> {
        let documents = self.store.query(&Query::collection(CHAT_MESSAGES)).await?;
        let mut deleted = 0;
        for document in documents {
            let id = document.id;
            match with_retry(self.retry, || self.store.delete(CHAT_MESSAGES, &id)).await {
                Ok(()) => {
                    deleted += 1;
                    log::info!("Deleted message: {id}");
                }
                Err(StoreError::NotFound { .. }) => {
                    log::debug!("Message {id} already gone");
                }
                Err(err) => return Err(err.into()),
            }
        }
        log::info!("Cleared {deleted} chat messages");
        Ok(deleted)
    }
}
