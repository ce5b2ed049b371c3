//! Owner/admin chat for the restaurant guide: a document store with live
//! queries, two-party message threads on top of it, per-user notifications,
//! and the user directory and session context that chat callers need.

pub mod chat;
pub mod common;
pub mod config;
pub mod directory;
pub mod notifications;
pub mod session;
pub mod storage;

pub use chat::{ChatService, ThreadSubscription, ThreadUpdate};
pub use common::{
    ChatError, ChatMessage, MessageDraft, Notification, NotificationDraft, NotificationKind, Role,
    ThreadSide, UserProfile,
};
pub use directory::Directory;
pub use notifications::Notifications;
pub use session::Session;
