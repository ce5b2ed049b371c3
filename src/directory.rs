use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::common::{ChatError, Role, UserProfile};
use crate::storage::{Document, DocumentStore, Fields, Query, RetryPolicy, StoreError, with_retry};

pub const USERS: &str = "users";

const ROLE: &str = "role";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredProfile {
    first_name: String,
    last_name: String,
    role: Role,
}

impl TryFrom<Document> for UserProfile {
    type Error = ChatError;

    fn try_from(document: Document) -> Result<Self, Self::Error> {
        let Document { id, fields } = document;
        let stored: StoredProfile = serde_json::from_value(Value::Object(fields))
            .map_err(|err| ChatError::invalid_document(&id, err.to_string()))?;
        Ok(UserProfile {
            id,
            first_name: stored.first_name,
            last_name: stored.last_name,
            role: stored.role,
        })
    }
}

/// User profiles, used to find who a user can chat with.
pub struct Directory<S> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S: DocumentStore> Directory<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Creates or updates a profile, keeping any other stored fields.
    pub async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), ChatError> {
        let fields = Fields::new()
            .with("firstName", profile.first_name.as_str())
            .with("lastName", profile.last_name.as_str())
            .with(ROLE, profile.role.as_str())
            .with_server_timestamp("updatedAt")
            .into_inner();

        with_retry(self.retry, || {
            self.store.set(USERS, &profile.id, fields.clone(), true)
        })
        .await?;
        log::info!("Saved profile {} ({})", profile.id, profile.role);
        Ok(())
    }

    pub async fn profile(&self, user_id: &str) -> Result<UserProfile, ChatError> {
        match self.store.get(USERS, user_id).await {
            Ok(document) => UserProfile::try_from(document),
            Err(StoreError::NotFound { .. }) => Err(ChatError::UnknownUser(user_id.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn with_role(&self, role: Role) -> Result<Vec<UserProfile>, ChatError> {
        let query = Query::collection(USERS).where_eq(ROLE, role.as_str());
        self.store
            .query(&query)
            .await?
            .into_iter()
            .map(UserProfile::try_from)
            .collect()
    }

    /// Everyone an administrator can chat with.
    pub async fn restaurant_owners(&self) -> Result<Vec<UserProfile>, ChatError> {
        self.with_role(Role::RestaurantOwner).await
    }

    /// The administrator restaurant owners talk to, if one exists.
    pub async fn support_admin(&self) -> Result<Option<UserProfile>, ChatError> {
        Ok(self.with_role(Role::Admin).await?.into_iter().next())
    }
}
