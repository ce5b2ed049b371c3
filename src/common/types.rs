use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One message of a two-party conversation, as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub receiver_id: String,
    pub content: String,
    /// Server-assigned, epoch milliseconds.
    pub created_at: i64,
}

impl ChatMessage {
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.created_at)
    }
}

/// What a sender supplies; id and timestamp are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub sender_id: String,
    pub sender_name: String,
    pub receiver_id: String,
    pub content: String,
}

/// Which directional query of a thread an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadSide {
    /// Local user to counterpart.
    Outgoing,
    /// Counterpart to local user.
    Incoming,
}

impl fmt::Display for ThreadSide {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ThreadSide::Outgoing => write!(f, "outgoing"),
            ThreadSide::Incoming => write!(f, "incoming"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    RestaurantOwner,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::RestaurantOwner => "restaurant_owner",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Role::User),
            "restaurant_owner" => Ok(Role::RestaurantOwner),
            "admin" => Ok(Role::Admin),
            other => Err(format!(
                "unknown role `{other}` (expected user, restaurant_owner or admin)"
            )),
        }
    }
}

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PaymentVerification,
    RequestStatus,
    Message,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PaymentVerification => "payment_verification",
            NotificationKind::RequestStatus => "request_status",
            NotificationKind::Message => "message",
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "payment_verification" => Ok(NotificationKind::PaymentVerification),
            "request_status" => Ok(NotificationKind::RequestStatus),
            "message" => Ok(NotificationKind::Message),
            other => Err(format!("unknown notification type `{other}`")),
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored notification for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub read: bool,
    /// Free-form context, e.g. the request a status change refers to.
    pub data: Map<String, Value>,
    /// Server-assigned, epoch milliseconds.
    pub created_at: i64,
}

/// A notification before the store has assigned its id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub data: Map<String, Value>,
}
