use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Identity, IdentityStore, IdentityUpdate, NewIdentity, StoreResult};
use crate::error::StoreError;

/// Applies one deadline to every call of the wrapped store.
///
/// An elapsed deadline is `StoreError::Timeout`, never a success.
pub struct TimeoutIdentityStore {
    inner: Arc<dyn IdentityStore>,
    timeout: Duration,
}

impl TimeoutIdentityStore {
    pub fn new(inner: Arc<dyn IdentityStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn guard<T, F>(&self, operation: &'static str, call: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>> + Send,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    operation = operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Identity store call timed out"
                );
                Err(StoreError::Timeout)
            }
        }
    }
}

#[async_trait]
impl IdentityStore for TimeoutIdentityStore {
    async fn find_by_login(&self, username_or_email: &str) -> StoreResult<Option<Identity>> {
        self.guard("find_by_login", self.inner.find_by_login(username_or_email))
            .await
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Identity>> {
        self.guard("find_by_id", self.inner.find_by_id(id)).await
    }

    async fn find_by_refresh_digest(
        &self,
        digest: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Identity>> {
        self.guard(
            "find_by_refresh_digest",
            self.inner.find_by_refresh_digest(digest, now),
        )
        .await
    }

    async fn insert(&self, identity: NewIdentity) -> StoreResult<Uuid> {
        self.guard("insert", self.inner.insert(identity)).await
    }

    async fn update(&self, id: Uuid, update: IdentityUpdate) -> StoreResult<bool> {
        self.guard("update", self.inner.update(id, update)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryIdentityStore;

    /// Never answers
    struct HangingStore;

    #[async_trait]
    impl IdentityStore for HangingStore {
        async fn find_by_login(&self, _: &str) -> StoreResult<Option<Identity>> {
            futures::future::pending().await
        }

        async fn find_by_id(&self, _: Uuid) -> StoreResult<Option<Identity>> {
            futures::future::pending().await
        }

        async fn find_by_refresh_digest(
            &self,
            _: &str,
            _: DateTime<Utc>,
        ) -> StoreResult<Option<Identity>> {
            futures::future::pending().await
        }

        async fn insert(&self, _: NewIdentity) -> StoreResult<Uuid> {
            futures::future::pending().await
        }

        async fn update(&self, _: Uuid, _: IdentityUpdate) -> StoreResult<bool> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_hanging_store_times_out() {
        let store = TimeoutIdentityStore::new(Arc::new(HangingStore), Duration::from_millis(20));

        let result = store.find_by_id(Uuid::new_v4()).await;
        assert!(matches!(result, Err(StoreError::Timeout)));

        let result = store
            .update(Uuid::new_v4(), IdentityUpdate::clear_refresh_token())
            .await;
        assert!(matches!(result, Err(StoreError::Timeout)));
    }

    #[tokio::test]
    async fn test_fast_store_passes_through() {
        let store = TimeoutIdentityStore::new(
            Arc::new(InMemoryIdentityStore::new()),
            Duration::from_secs(1),
        );

        let id = store
            .insert(NewIdentity {
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap();
        assert!(store.find_by_id(id).await.unwrap().is_some());
    }
}
