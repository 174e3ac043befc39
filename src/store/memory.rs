use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    Identity, IdentityStore, IdentityUpdate, NewIdentity, RefreshTokenUpdate, StoreResult,
};
use crate::error::StoreError;

/// Process-local identity store.
///
/// Every write happens under a single write lock, so a refresh-token
/// replacement is observed either entirely or not at all.
#[derive(Default)]
pub struct InMemoryIdentityStore {
    identities: RwLock<HashMap<Uuid, Identity>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned<T>(_: T) -> StoreError {
        StoreError::Unavailable("identity map lock poisoned".to_string())
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find_by_login(&self, username_or_email: &str) -> StoreResult<Option<Identity>> {
        let identities = self.identities.read().map_err(Self::poisoned)?;
        Ok(identities
            .values()
            .find(|i| i.username == username_or_email || i.email == username_or_email)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Identity>> {
        let identities = self.identities.read().map_err(Self::poisoned)?;
        Ok(identities.get(&id).cloned())
    }

    async fn find_by_refresh_digest(
        &self,
        digest: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Identity>> {
        let identities = self.identities.read().map_err(Self::poisoned)?;
        Ok(identities
            .values()
            .find(|i| {
                i.refresh_token
                    .as_ref()
                    .map_or(false, |r| r.digest == digest && r.is_live_at(now))
            })
            .cloned())
    }

    async fn insert(&self, identity: NewIdentity) -> StoreResult<Uuid> {
        let mut identities = self.identities.write().map_err(Self::poisoned)?;

        let taken = identities
            .values()
            .any(|i| i.username == identity.username || i.email == identity.email);
        if taken {
            return Err(StoreError::Duplicate(
                "Username or email already in use".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        identities.insert(
            id,
            Identity {
                id,
                username: identity.username,
                email: identity.email,
                password_hash: identity.password_hash,
                refresh_token: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn update(&self, id: Uuid, update: IdentityUpdate) -> StoreResult<bool> {
        let mut identities = self.identities.write().map_err(Self::poisoned)?;

        let Some(identity) = identities.get_mut(&id) else {
            return Ok(false);
        };

        if let Some(expected) = &update.expected_refresh_digest {
            let current = identity.refresh_token.as_ref().map(|r| r.digest.as_str());
            if current != Some(expected.as_str()) {
                return Ok(false);
            }
        }

        match update.refresh_token {
            Some(RefreshTokenUpdate::Set(record)) => identity.refresh_token = Some(record),
            Some(RefreshTokenUpdate::Clear) => identity.refresh_token = None,
            None => {}
        }
        if let Some(password_hash) = update.password_hash {
            identity.password_hash = password_hash;
        }
        identity.updated_at = Utc::now();

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RefreshTokenRecord;
    use chrono::Duration;

    fn new_identity(username: &str) -> NewIdentity {
        NewIdentity {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            password_hash: "$2b$04$placeholder".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = InMemoryIdentityStore::new();
        let id = store.insert(new_identity("alice")).await.unwrap();

        let by_id = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(by_id.username, "alice");
        assert!(by_id.refresh_token.is_none());

        let by_name = store.find_by_login("alice").await.unwrap().unwrap();
        let by_email = store.find_by_login("alice@example.com").await.unwrap().unwrap();
        assert_eq!(by_name.id, id);
        assert_eq!(by_email.id, id);
    }

    #[tokio::test]
    async fn test_duplicate_username_or_email_is_rejected() {
        let store = InMemoryIdentityStore::new();
        store.insert(new_identity("alice")).await.unwrap();

        let result = store.insert(new_identity("alice")).await;
        assert!(matches!(result, Err(StoreError::Duplicate(_))));

        let mut same_email = new_identity("alice2");
        same_email.email = "alice@example.com".to_string();
        assert!(matches!(
            store.insert(same_email).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_digest_lookup_respects_expiry() {
        let store = InMemoryIdentityStore::new();
        let id = store.insert(new_identity("alice")).await.unwrap();
        let now = Utc::now();

        store
            .update(
                id,
                IdentityUpdate::set_refresh_token(RefreshTokenRecord {
                    digest: "d1".to_string(),
                    expires_at: now,
                }),
            )
            .await
            .unwrap();

        // expiry == now is already expired
        assert!(store.find_by_refresh_digest("d1", now).await.unwrap().is_none());
        assert!(store
            .find_by_refresh_digest("d1", now - Duration::seconds(1))
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_by_refresh_digest("other", now - Duration::seconds(1))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_clear_removes_both_fields() {
        let store = InMemoryIdentityStore::new();
        let id = store.insert(new_identity("alice")).await.unwrap();

        store
            .update(
                id,
                IdentityUpdate::set_refresh_token(RefreshTokenRecord {
                    digest: "d1".to_string(),
                    expires_at: Utc::now() + Duration::days(7),
                }),
            )
            .await
            .unwrap();
        store
            .update(id, IdentityUpdate::clear_refresh_token())
            .await
            .unwrap();

        let identity = store.find_by_id(id).await.unwrap().unwrap();
        assert!(identity.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_replace_requires_the_expected_digest() {
        let store = InMemoryIdentityStore::new();
        let id = store.insert(new_identity("alice")).await.unwrap();
        let record = |digest: &str| RefreshTokenRecord {
            digest: digest.to_string(),
            expires_at: Utc::now() + Duration::days(7),
        };

        store
            .update(id, IdentityUpdate::set_refresh_token(record("d1")))
            .await
            .unwrap();

        let stale = store
            .update(id, IdentityUpdate::replace_refresh_token("d0", record("d2")))
            .await
            .unwrap();
        assert!(!stale);
        let identity = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(identity.refresh_token.unwrap().digest, "d1");

        let current = store
            .update(id, IdentityUpdate::replace_refresh_token("d1", record("d2")))
            .await
            .unwrap();
        assert!(current);
        let identity = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(identity.refresh_token.unwrap().digest, "d2");

        // Nothing to replace once the token is cleared
        store
            .update(id, IdentityUpdate::clear_refresh_token())
            .await
            .unwrap();
        let cleared = store
            .update(id, IdentityUpdate::replace_refresh_token("d2", record("d3")))
            .await
            .unwrap();
        assert!(!cleared);
        assert!(store.find_by_id(id).await.unwrap().unwrap().refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_identity_returns_false() {
        let store = InMemoryIdentityStore::new();
        let updated = store
            .update(Uuid::new_v4(), IdentityUpdate::clear_refresh_token())
            .await
            .unwrap();
        assert!(!updated);
    }
}
