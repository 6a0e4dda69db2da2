//! Profile store boundary.
//!
//! The identity/profile system is an external collaborator; the engine
//! consumes it through [`ProfileStore`]. Location and online-status updates
//! arriving over a provider's session are written through the same seam.
//! [`MemoryProfileStore`] backs tests and the CLI gateway.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;

use super::snapshot::{ProviderSnapshot, UserContact};
use crate::location::LiveFix;

/// Errors from the profile store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The identity does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// The backing store could not be reached.
    #[error("profile store unavailable: {0}")]
    Unavailable(String),
}

/// Read-through access to provider and user profile records.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetches the current snapshot for a provider.
    ///
    /// Returns `Ok(None)` when the provider is unknown; `Err` only for
    /// store-level failures.
    async fn provider_snapshot(&self, provider_id: &str)
        -> Result<Option<ProviderSnapshot>, StoreError>;

    /// Fetches contact details for a user.
    async fn user_contact(&self, user_id: &str) -> Result<Option<UserContact>, StoreError>;

    /// Persists a provider's latest live tracking fix.
    async fn update_live_fix(&self, provider_id: &str, fix: LiveFix) -> Result<(), StoreError>;

    /// Persists a provider's online flag (mirrored onto availability, as the
    /// tracking clients treat them as one toggle).
    async fn update_online(&self, provider_id: &str, is_online: bool) -> Result<(), StoreError>;
}

/// In-memory profile store for tests and the CLI gateway.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    providers: DashMap<String, ProviderSnapshot>,
    users: DashMap<String, UserContact>,
}

impl MemoryProfileStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a provider record.
    pub fn insert_provider(&self, snapshot: ProviderSnapshot) {
        self.providers.insert(snapshot.id.clone(), snapshot);
    }

    /// Inserts or replaces a user contact record.
    pub fn insert_user(&self, user_id: impl Into<String>, contact: UserContact) {
        self.users.insert(user_id.into(), contact);
    }

    /// Number of provider records held.
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn provider_snapshot(
        &self,
        provider_id: &str,
    ) -> Result<Option<ProviderSnapshot>, StoreError> {
        Ok(self.providers.get(provider_id).map(|entry| entry.clone()))
    }

    async fn user_contact(&self, user_id: &str) -> Result<Option<UserContact>, StoreError> {
        Ok(self.users.get(user_id).map(|entry| entry.clone()))
    }

    async fn update_live_fix(&self, provider_id: &str, fix: LiveFix) -> Result<(), StoreError> {
        match self.providers.get_mut(provider_id) {
            Some(mut entry) => {
                entry.live = Some(fix);
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: "provider",
                id: provider_id.to_string(),
            }),
        }
    }

    async fn update_online(&self, provider_id: &str, is_online: bool) -> Result<(), StoreError> {
        match self.providers.get_mut(provider_id) {
            Some(mut entry) => {
                entry.is_online = is_online;
                entry.is_available = is_online;
                if let Some(fix) = &mut entry.live {
                    fix.last_updated = Utc::now();
                }
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: "provider",
                id: provider_id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ServiceCategory;

    fn sample_provider(id: &str) -> ProviderSnapshot {
        ProviderSnapshot {
            id: id.to_string(),
            name: "Asha".to_string(),
            phone: "555-0100".to_string(),
            rating: 4.8,
            experience: "5 years".to_string(),
            service_categories: [ServiceCategory::Electrician].into_iter().collect(),
            is_available: true,
            is_online: false,
            live: None,
            static_location: None,
        }
    }

    #[tokio::test]
    async fn snapshot_returns_inserted_provider() {
        let store = MemoryProfileStore::new();
        store.insert_provider(sample_provider("p-1"));

        let snapshot = store.provider_snapshot("p-1").await.unwrap().unwrap();
        assert_eq!(snapshot.name, "Asha");
        assert!(store.provider_snapshot("p-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn live_fix_update_is_visible_in_next_snapshot() {
        let store = MemoryProfileStore::new();
        store.insert_provider(sample_provider("p-1"));

        let fix = LiveFix {
            latitude: 19.08,
            longitude: 72.88,
            accuracy_m: Some(15.0),
            last_updated: Utc::now(),
        };
        store.update_live_fix("p-1", fix.clone()).await.unwrap();

        let snapshot = store.provider_snapshot("p-1").await.unwrap().unwrap();
        assert_eq!(snapshot.live, Some(fix));
    }

    #[tokio::test]
    async fn update_for_unknown_provider_is_not_found() {
        let store = MemoryProfileStore::new();
        let err = store.update_online("ghost", true).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn online_update_mirrors_availability() {
        let store = MemoryProfileStore::new();
        store.insert_provider(sample_provider("p-1"));

        store.update_online("p-1", true).await.unwrap();
        let snapshot = store.provider_snapshot("p-1").await.unwrap().unwrap();
        assert!(snapshot.is_online);
        assert!(snapshot.is_available);
    }
}
