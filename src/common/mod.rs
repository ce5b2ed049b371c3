pub mod error;
pub mod types;

pub use error::ChatError;
pub use types::{
    ChatMessage, MessageDraft, Notification, NotificationDraft, NotificationKind, Role, ThreadSide,
    UserProfile,
};
