use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::common::{ChatError, Notification, NotificationDraft, NotificationKind};
use crate::storage::{
    Direction, Document, DocumentStore, Fields, Query, RetryPolicy, WriteFields, with_retry,
};

pub const NOTIFICATIONS: &str = "notifications";

const USER_ID: &str = "userId";
const KIND: &str = "type";
const TITLE: &str = "title";
const MESSAGE: &str = "message";
const READ: &str = "read";
const DATA: &str = "data";
const CREATED_AT: &str = "createdAt";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredNotification {
    user_id: String,
    #[serde(rename = "type")]
    kind: NotificationKind,
    title: String,
    message: String,
    read: bool,
    #[serde(default)]
    data: Map<String, Value>,
    created_at: i64,
}

impl TryFrom<Document> for Notification {
    type Error = ChatError;

    fn try_from(document: Document) -> Result<Self, Self::Error> {
        let Document { id, fields } = document;
        let stored: StoredNotification = serde_json::from_value(Value::Object(fields))
            .map_err(|err| ChatError::invalid_document(&id, err.to_string()))?;
        Ok(Notification {
            id,
            user_id: stored.user_id,
            kind: stored.kind,
            title: stored.title,
            message: stored.message,
            read: stored.read,
            data: stored.data,
            created_at: stored.created_at,
        })
    }
}

fn draft_fields(draft: &NotificationDraft) -> WriteFields {
    let mut fields = Fields::new()
        .with(USER_ID, draft.user_id.as_str())
        .with(KIND, draft.kind.as_str())
        .with(TITLE, draft.title.as_str())
        .with(MESSAGE, draft.message.as_str())
        .with(READ, false)
        .with_server_timestamp(CREATED_AT);
    if !draft.data.is_empty() {
        fields = fields.with(DATA, Value::Object(draft.data.clone()));
    }
    fields.into_inner()
}

/// Per-user notifications, read by the notification bell and list.
pub struct Notifications<S> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S: DocumentStore> Notifications<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Stores an unread notification and returns its id.
    pub async fn create(&self, draft: &NotificationDraft) -> Result<String, ChatError> {
        let id = self.store.create(NOTIFICATIONS, draft_fields(draft)).await?;
        log::info!("Notification {id} ({}) for {}", draft.kind, draft.user_id);
        Ok(id)
    }

    /// Every notification of a user, newest first.
    pub async fn for_user(&self, user_id: &str) -> Result<Vec<Notification>, ChatError> {
        let query = Query::collection(NOTIFICATIONS)
            .where_eq(USER_ID, user_id)
            .order_by(CREATED_AT, Direction::Descending);
        self.store
            .query(&query)
            .await?
            .into_iter()
            .map(Notification::try_from)
            .collect()
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<usize, ChatError> {
        let query = Query::collection(NOTIFICATIONS)
            .where_eq(USER_ID, user_id)
            .where_eq(READ, false);
        Ok(self.store.query(&query).await?.len())
    }

    /// Fails with `NotFound` instead of creating a stub for an unknown id.
    pub async fn mark_read(&self, notification_id: &str) -> Result<(), ChatError> {
        self.store.get(NOTIFICATIONS, notification_id).await?;

        let patch = Fields::new().with(READ, true).into_inner();
        with_retry(self.retry, || {
            self.store
                .set(NOTIFICATIONS, notification_id, patch.clone(), true)
        })
        .await?;
        log::debug!("Notification {notification_id} marked as read");
        Ok(())
    }
}
