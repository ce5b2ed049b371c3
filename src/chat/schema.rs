use serde::Deserialize;
use serde_json::Value;

use crate::common::{ChatError, ChatMessage, MessageDraft};
use crate::storage::{Document, Fields, WriteFields};

pub const CHAT_MESSAGES: &str = "chat-messages";

pub const SENDER_ID: &str = "senderId";
pub const SENDER_NAME: &str = "senderName";
pub const RECEIVER_ID: &str = "receiverId";
pub const CONTENT: &str = "content";
pub const CREATED_AT: &str = "createdAt";

/// Stored shape of a chat message document.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredMessage {
    sender_id: String,
    #[serde(default)]
    sender_name: String,
    receiver_id: String,
    content: String,
    created_at: i64,
}

impl TryFrom<Document> for ChatMessage {
    type Error = ChatError;

    fn try_from(document: Document) -> Result<Self, Self::Error> {
        let Document { id, fields } = document;
        let stored: StoredMessage = serde_json::from_value(Value::Object(fields))
            .map_err(|err| ChatError::invalid_document(&id, err.to_string()))?;

        Ok(ChatMessage {
            id,
            sender_id: stored.sender_id,
            sender_name: stored.sender_name,
            receiver_id: stored.receiver_id,
            content: stored.content,
            created_at: stored.created_at,
        })
    }
}

/// Parses a whole snapshot; one bad document fails the snapshot.
pub fn parse_snapshot(documents: Vec<Document>) -> Result<Vec<ChatMessage>, ChatError> {
    documents.into_iter().map(ChatMessage::try_from).collect()
}

pub fn draft_fields(draft: &MessageDraft) -> WriteFields {
    Fields::new()
        .with(SENDER_ID, draft.sender_id.as_str())
        .with(SENDER_NAME, draft.sender_name.as_str())
        .with(RECEIVER_ID, draft.receiver_id.as_str())
        .with(CONTENT, draft.content.as_str())
        .with_server_timestamp(CREATED_AT)
        .into_inner()
}
