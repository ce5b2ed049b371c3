use thiserror::Error;

use super::types::ThreadSide;
use crate::storage::StoreError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    #[error("message content is empty")]
    EmptyContent,

    #[error("invalid document {id}: {reason}")]
    InvalidDocument { id: String, reason: String },

    #[error("unknown user {0}")]
    UnknownUser(String),

    #[error("{side} live query failed: {source}")]
    Subscription {
        side: ThreadSide,
        #[source]
        source: Box<ChatError>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChatError {
    pub fn subscription(side: ThreadSide, source: impl Into<ChatError>) -> Self {
        ChatError::Subscription {
            side,
            source: Box::new(source.into()),
        }
    }

    pub fn invalid_document(id: &str, reason: impl Into<String>) -> Self {
        ChatError::InvalidDocument {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}
