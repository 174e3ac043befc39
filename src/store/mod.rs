//! Identity store contract.
//!
//! The authentication core only ever talks to an `IdentityStore`. Two
//! implementations ship with the crate: an in-memory map used by tests and
//! local runs, and a Postgres store backed by `sqlx`.

mod memory;
mod postgres;
mod timeout;

pub use memory::InMemoryIdentityStore;
pub use postgres::PgIdentityStore;
pub use timeout::TimeoutIdentityStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Stored form of the single live refresh token of an identity.
///
/// Digest and expiry travel together so they can never be half set.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub digest: String,
    pub expires_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// Exclusive upper bound: a record expiring exactly at `now` is dead.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl std::fmt::Debug for RefreshTokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenRecord")
            .field("digest", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A user record as the authentication core sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub refresh_token: Option<RefreshTokenRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    pub fn to_public(&self) -> PublicIdentity {
        PublicIdentity {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            created_at: self.created_at,
        }
    }
}

/// The part of an identity that may leave the process.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublicIdentity {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Input for `IdentityStore::insert`; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub enum RefreshTokenUpdate {
    Set(RefreshTokenRecord),
    Clear,
}

/// Partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct IdentityUpdate {
    pub refresh_token: Option<RefreshTokenUpdate>,
    pub password_hash: Option<String>,
    /// Apply only while the stored refresh digest still equals this one
    pub expected_refresh_digest: Option<String>,
}

impl IdentityUpdate {
    pub fn set_refresh_token(record: RefreshTokenRecord) -> Self {
        Self {
            refresh_token: Some(RefreshTokenUpdate::Set(record)),
            ..Self::default()
        }
    }

    /// Swap the refresh token only if `previous_digest` is still the live one.
    pub fn replace_refresh_token(previous_digest: &str, record: RefreshTokenRecord) -> Self {
        Self {
            refresh_token: Some(RefreshTokenUpdate::Set(record)),
            expected_refresh_digest: Some(previous_digest.to_string()),
            ..Self::default()
        }
    }

    pub fn clear_refresh_token() -> Self {
        Self {
            refresh_token: Some(RefreshTokenUpdate::Clear),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Look up by username or email.
    async fn find_by_login(&self, username_or_email: &str) -> StoreResult<Option<Identity>>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Identity>>;

    /// Identity whose stored refresh digest equals `digest` and whose refresh
    /// expiry is strictly after `now`.
    async fn find_by_refresh_digest(
        &self,
        digest: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Identity>>;

    /// Fails with `StoreError::Duplicate` when the username or email is taken.
    async fn insert(&self, identity: NewIdentity) -> StoreResult<Uuid>;

    /// Apply `update` in one atomic write.
    ///
    /// Returns `false`, writing nothing, if `id` is unknown or
    /// `update.expected_refresh_digest` no longer matches the stored digest.
    async fn update(&self, id: Uuid, update: IdentityUpdate) -> StoreResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_record_expiry_is_exclusive() {
        let now = Utc::now();
        let record = RefreshTokenRecord {
            digest: "abc".to_string(),
            expires_at: now,
        };

        assert!(!record.is_live_at(now));
        assert!(record.is_live_at(now - Duration::seconds(1)));
    }

    #[test]
    fn test_record_debug_hides_digest() {
        let record = RefreshTokenRecord {
            digest: "deadbeef".to_string(),
            expires_at: Utc::now(),
        };

        assert!(!format!("{:?}", record).contains("deadbeef"));
    }
}
