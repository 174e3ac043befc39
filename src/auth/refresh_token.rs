/// Refresh Token Management
///
/// Refresh tokens are:
/// - 64 random alphanumeric characters (~380 bits of entropy)
/// - Stored only as a SHA-256 digest on the identity record
/// - Single-use: every successful refresh replaces the stored digest
/// - Valid for a fixed seven days from issue

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use uuid::Uuid;

use crate::auth::password::hash_lookup_token;
use crate::error::{AppError, AuthError};
use crate::store::{Identity, IdentityStore, IdentityUpdate, RefreshTokenRecord};

const REFRESH_TOKEN_LENGTH: usize = 64;

pub fn refresh_token_lifetime() -> Duration {
    Duration::days(7)
}

/// A freshly generated refresh token.
///
/// `plaintext` goes to the client exactly once. `record` is what gets stored.
#[derive(Clone)]
pub struct IssuedRefreshToken {
    pub plaintext: String,
    pub record: RefreshTokenRecord,
}

impl std::fmt::Debug for IssuedRefreshToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedRefreshToken")
            .field("plaintext", &"<redacted>")
            .field("record", &self.record)
            .finish()
    }
}

/// Generate a new cryptographically secure refresh token string
pub fn generate_refresh_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFRESH_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

pub struct RefreshTokenManager {
    store: Arc<dyn IdentityStore>,
}

impl RefreshTokenManager {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    pub fn issue(&self) -> IssuedRefreshToken {
        self.issue_at(Utc::now())
    }

    /// Generate a token and its stored form. Persisting it is up to the caller.
    pub fn issue_at(&self, now: DateTime<Utc>) -> IssuedRefreshToken {
        let plaintext = generate_refresh_token();
        let digest = hash_lookup_token(&plaintext);

        IssuedRefreshToken {
            plaintext,
            record: RefreshTokenRecord {
                digest,
                expires_at: now + refresh_token_lifetime(),
            },
        }
    }

    /// Replace the stored digest and expiry in a single store write,
    /// whatever was stored before. Used when a session starts.
    ///
    /// Concurrent rotations for one identity are last-writer-wins; the
    /// loser's token stops resolving immediately.
    pub async fn rotate(
        &self,
        identity_id: Uuid,
        record: RefreshTokenRecord,
    ) -> Result<(), AppError> {
        let updated = self
            .store
            .update(identity_id, IdentityUpdate::set_refresh_token(record))
            .await?;

        if !updated {
            tracing::warn!(user_id = %identity_id, "Refresh token rotation for unknown identity");
            return Err(AuthError::UnknownIdentity.into());
        }

        Ok(())
    }

    /// Trade a resolved refresh token for `record`.
    ///
    /// The write only lands if `previous_digest` is still the stored digest,
    /// so a revoke or another exchange that got there first wins and this
    /// call fails with `InvalidRefreshToken`.
    pub async fn exchange(
        &self,
        identity_id: Uuid,
        previous_digest: &str,
        record: RefreshTokenRecord,
    ) -> Result<(), AppError> {
        let updated = self
            .store
            .update(
                identity_id,
                IdentityUpdate::replace_refresh_token(previous_digest, record),
            )
            .await?;

        if !updated {
            tracing::warn!(user_id = %identity_id, "Refresh token changed during exchange");
            return Err(AuthError::InvalidRefreshToken.into());
        }

        Ok(())
    }

    pub async fn resolve(&self, plaintext: &str) -> Result<Identity, AppError> {
        self.resolve_at(plaintext, Utc::now()).await
    }

    /// Find the identity owning `plaintext`.
    ///
    /// Never issued, rotated away, revoked and expired are all reported as
    /// `InvalidRefreshToken`.
    pub async fn resolve_at(
        &self,
        plaintext: &str,
        now: DateTime<Utc>,
    ) -> Result<Identity, AppError> {
        let digest = hash_lookup_token(plaintext);

        let identity = self
            .store
            .find_by_refresh_digest(&digest, now)
            .await?
            .filter(|identity| {
                identity
                    .refresh_token
                    .as_ref()
                    .map_or(false, |r| r.digest == digest && r.is_live_at(now))
            });

        match identity {
            Some(identity) => Ok(identity),
            None => {
                tracing::warn!("Refresh token did not resolve to a live session");
                Err(AuthError::InvalidRefreshToken.into())
            }
        }
    }

    /// Clear the stored refresh token. Revoking twice, or revoking an
    /// unknown identity, is not an error.
    pub async fn revoke(&self, identity_id: Uuid) -> Result<(), AppError> {
        let updated = self
            .store
            .update(identity_id, IdentityUpdate::clear_refresh_token())
            .await?;

        if updated {
            tracing::info!(user_id = %identity_id, "Refresh token revoked");
        }
        Ok(())
    }
}
