use chrono::{DateTime, Utc};

use crate::common::{ChatError, UserProfile};
use crate::directory::Directory;
use crate::storage::DocumentStore;

/// The signed-in user, passed explicitly to anything that needs identity.
/// Created when the app starts, consumed by [`Session::end`] on logout.
#[derive(Debug, Clone)]
pub struct Session {
    user: UserProfile,
    started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user: UserProfile) -> Self {
        log::info!("Session started for {} ({})", user.id, user.role);
        Self {
            user,
            started_at: Utc::now(),
        }
    }

    /// Loads the profile for `user_id`; unknown ids are an error.
    pub async fn start<S: DocumentStore>(
        directory: &Directory<S>,
        user_id: &str,
    ) -> Result<Self, ChatError> {
        let user = directory.profile(user_id).await?;
        Ok(Self::new(user))
    }

    pub fn user(&self) -> &UserProfile {
        &self.user
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn display_name(&self) -> String {
        self.user.display_name()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn end(self) {
        let duration = Utc::now().signed_duration_since(self.started_at);
        log::info!(
            "Session for {} ended after {:.1}s",
            self.user.id,
            duration.num_milliseconds() as f64 / 1000.0
        );
    }
}
