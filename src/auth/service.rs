/// Session Service
///
/// Composes the password hasher, token codec and refresh token manager into
/// the operations handlers call: register, login, issue/refresh a token
/// pair, authenticate a request, and revoke a session.

use std::sync::Arc;

use actix_web::http::header::{HeaderMap, AUTHORIZATION};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::jwt::TokenCodec;
use crate::auth::password::{hash_lookup_token, validate_password_strength, PasswordHasher};
use crate::auth::refresh_token::RefreshTokenManager;
use crate::configuration::AuthSettings;
use crate::error::{AppError, AuthError};
use crate::store::{Identity, IdentityStore, NewIdentity, TimeoutIdentityStore};
use crate::validators::{is_valid_email, is_valid_username};

const BEARER_SCHEME: &str = "Bearer";

/// Access + refresh token pair handed to a client
#[derive(Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// The identity a request was authenticated as
#[derive(Debug, Clone)]
pub struct AuthenticatedIdentity(pub Identity);

impl AuthenticatedIdentity {
    pub fn id(&self) -> Uuid {
        self.0.id
    }

    pub fn identity(&self) -> &Identity {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
}

pub struct AuthService {
    store: Arc<dyn IdentityStore>,
    codec: TokenCodec,
    refresh_tokens: RefreshTokenManager,
    hasher: PasswordHasher,
    /// Verified against when the login identifier is unknown, so both
    /// failure paths pay for one bcrypt verification
    dummy_password_hash: String,
}

impl AuthService {
    /// Build the service. Every store call made through it is bounded by
    /// `settings.store_timeout_ms`.
    pub fn new(store: Arc<dyn IdentityStore>, settings: &AuthSettings) -> Result<Self, AppError> {
        let store: Arc<dyn IdentityStore> =
            Arc::new(TimeoutIdentityStore::new(store, settings.store_timeout()));
        let codec = TokenCodec::new(settings.secret.as_bytes(), settings.access_token_lifetime()?)?;
        let hasher = PasswordHasher::new(settings.password_cost);
        let dummy_password_hash = hasher.hash_password("dummy-password-for-timing")?;

        Ok(Self {
            refresh_tokens: RefreshTokenManager::new(store.clone()),
            store,
            codec,
            hasher,
            dummy_password_hash,
        })
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Mint an access token and a fresh refresh token, replacing whatever
    /// refresh token the identity held before.
    pub async fn issue_token_pair(&self, identity: &Identity) -> Result<TokenPair, AppError> {
        self.mint_token_pair(identity, None).await
    }

    /// With `previous_digest`, the new refresh token only replaces that one;
    /// anything else stored by then (a revoke, a racing refresh) wins.
    async fn mint_token_pair(
        &self,
        identity: &Identity,
        previous_digest: Option<&str>,
    ) -> Result<TokenPair, AppError> {
        let access_token = self.codec.issue_access_token(identity.id)?;
        let refresh = self.refresh_tokens.issue();
        match previous_digest {
            Some(previous) => {
                self.refresh_tokens
                    .exchange(identity.id, previous, refresh.record.clone())
                    .await?
            }
            None => {
                self.refresh_tokens
                    .rotate(identity.id, refresh.record.clone())
                    .await?
            }
        }

        Ok(TokenPair {
            access_token,
            refresh_token: refresh.plaintext,
            token_type: BEARER_SCHEME,
            expires_in: self.codec.lifetime().num_seconds(),
        })
    }

    /// Exchange a live refresh token for a new pair. The presented token
    /// stops working once this returns.
    pub async fn refresh_token_pair(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        let identity = self.refresh_tokens.resolve(refresh_token).await?;
        let previous_digest = hash_lookup_token(refresh_token);
        let pair = self
            .mint_token_pair(&identity, Some(&previous_digest))
            .await?;

        tracing::info!(user_id = %identity.id, "Token pair rotated");
        Ok(pair)
    }

    /// Map request headers to an identity.
    ///
    /// The token is verified cryptographically before the store is touched,
    /// so forged or expired tokens never cost a lookup.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthenticatedIdentity, AppError> {
        let header = headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingHeader)?
            .to_str()
            .map_err(|_| AuthError::MalformedHeader)?;
        if header.is_empty() {
            return Err(AuthError::MissingHeader.into());
        }

        let token = parse_bearer(header)?;

        let identity_id = self.codec.verify_access_token(token).map_err(|e| {
            tracing::debug!(reason = %e, "Access token verification failed");
            AuthError::InvalidToken
        })?;

        let identity = self.store.find_by_id(identity_id).await?.ok_or_else(|| {
            tracing::warn!(user_id = %identity_id, "Valid token for unknown identity");
            AuthError::UnknownIdentity
        })?;

        tracing::debug!(user_id = %identity.id, "Request authenticated");
        Ok(AuthenticatedIdentity(identity))
    }

    /// Log out: the identity's refresh token stops working. Idempotent.
    pub async fn revoke_session(&self, identity_id: Uuid) -> Result<(), AppError> {
        self.refresh_tokens.revoke(identity_id).await
    }

    /// Create an identity and start its first session.
    pub async fn register(&self, input: RegisterInput) -> Result<(Identity, TokenPair), AppError> {
        let username = is_valid_username(&input.username)?;
        let email = is_valid_email(&input.email)?;
        validate_password_strength(&input.password)?;

        let password_hash = self.hasher.hash_password(&input.password)?;
        let id = self
            .store
            .insert(NewIdentity {
                username,
                email,
                password_hash,
            })
            .await?;

        let identity = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Internal("Inserted identity not found".to_string()))?;
        let pair = self.issue_token_pair(&identity).await?;

        tracing::info!(user_id = %identity.id, "User registered successfully");
        Ok((identity, pair))
    }

    /// Check a username-or-email / password pair and start a session.
    ///
    /// Unknown identifier and wrong password are the same error.
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<(Identity, TokenPair), AppError> {
        // Emails are stored lowercased
        let identifier = identifier.trim();
        let identifier = if identifier.contains('@') {
            identifier.to_lowercase()
        } else {
            identifier.to_string()
        };
        let identity = self.store.find_by_login(&identifier).await?;

        let identity = match identity {
            Some(identity) if self.hasher.verify_password(password, &identity.password_hash) => {
                identity
            }
            Some(identity) => {
                tracing::warn!(user_id = %identity.id, "Login failed: wrong password");
                return Err(AuthError::InvalidCredentials.into());
            }
            None => {
                self.hasher.verify_password(password, &self.dummy_password_hash);
                tracing::warn!("Login failed: unknown identifier");
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        let pair = self.issue_token_pair(&identity).await?;

        tracing::info!(user_id = %identity.id, "User logged in successfully");
        Ok((identity, pair))
    }
}

/// `Bearer <token>`: exactly two space-separated parts, case-sensitive scheme
fn parse_bearer(header: &str) -> Result<&str, AuthError> {
    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(BEARER_SCHEME), Some(token), None) => Ok(token),
        _ => Err(AuthError::MalformedHeader),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{InMemoryIdentityStore, IdentityUpdate, StoreResult};
    use actix_web::http::header::HeaderValue;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};

    // Lowest cost bcrypt accepts
    const TEST_PASSWORD_COST: u32 = 4;

    fn settings(access_lifetime_secs: i64) -> AuthSettings {
        AuthSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            access_token_lifetime_secs: access_lifetime_secs,
            store_timeout_ms: 1_000,
            password_cost: TEST_PASSWORD_COST,
        }
    }

    /// Commits a logout right after the refresh digest lookup returns
    struct RevokeAfterLookup {
        inner: Arc<InMemoryIdentityStore>,
    }

    #[async_trait]
    impl IdentityStore for RevokeAfterLookup {
        async fn find_by_login(&self, login: &str) -> StoreResult<Option<Identity>> {
            self.inner.find_by_login(login).await
        }

        async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Identity>> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_refresh_digest(
            &self,
            digest: &str,
            now: DateTime<Utc>,
        ) -> StoreResult<Option<Identity>> {
            let found = self.inner.find_by_refresh_digest(digest, now).await?;
            if let Some(identity) = &found {
                self.inner
                    .update(identity.id, IdentityUpdate::clear_refresh_token())
                    .await?;
            }
            Ok(found)
        }

        async fn insert(&self, identity: NewIdentity) -> StoreResult<Uuid> {
            self.inner.insert(identity).await
        }

        async fn update(&self, id: Uuid, update: IdentityUpdate) -> StoreResult<bool> {
            self.inner.update(id, update).await
        }
    }

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

    fn is_timeout(result: Result<impl std::fmt::Debug, AppError>) -> bool {
        matches!(result, Err(AppError::Store(StoreError::Timeout)))
    }

    fn service_with(access_lifetime_secs: i64) -> (AuthService, Arc<InMemoryIdentityStore>) {
        let store = Arc::new(InMemoryIdentityStore::new());
        let service = AuthService::new(store.clone(), &settings(access_lifetime_secs))
            .expect("Failed to build service");
        (service, store)
    }

    fn alice() -> RegisterInput {
        RegisterInput {
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password: "SecurePass123".to_string(),
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        authorization(&format!("Bearer {}", token))
    }

    fn authorization(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer abc"), Ok("abc"));
        assert_eq!(parse_bearer("Token abc"), Err(AuthError::MalformedHeader));
        assert_eq!(parse_bearer("bearer abc"), Err(AuthError::MalformedHeader));
        assert_eq!(parse_bearer("Bearer"), Err(AuthError::MalformedHeader));
        assert_eq!(parse_bearer("Bearer a b"), Err(AuthError::MalformedHeader));
    }

    #[tokio::test]
    async fn test_register_then_authenticate_resolves_identity() {
        let (service, _) = service_with(3600);
        let (identity, pair) = service.register(alice()).await.unwrap();

        let authenticated = service.authenticate(&bearer(&pair.access_token)).await.unwrap();
        assert_eq!(authenticated.id(), identity.id);
        assert_eq!(authenticated.identity().username, "alice");
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 3600);
    }

    #[tokio::test]
    async fn test_refresh_token_is_stored_only_as_digest() {
        let (service, store) = service_with(3600);
        let (identity, pair) = service.register(alice()).await.unwrap();

        let stored = store.find_by_id(identity.id).await.unwrap().unwrap();
        let record = stored.refresh_token.expect("refresh token should be stored");
        assert_ne!(record.digest, pair.refresh_token);
        assert_eq!(
            record.digest,
            crate::auth::password::hash_lookup_token(&pair.refresh_token)
        );
    }

    #[tokio::test]
    async fn test_expired_access_token_then_refresh_rotation() {
        let (service, _) = service_with(1);
        let (_, pair) = service.register(alice()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(2_100)).await;

        let err = service.authenticate(&bearer(&pair.access_token)).await.unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::InvalidToken));

        let new_pair = service.refresh_token_pair(&pair.refresh_token).await.unwrap();
        assert_ne!(new_pair.refresh_token, pair.refresh_token);
        assert!(service.authenticate(&bearer(&new_pair.access_token)).await.is_ok());

        let reuse = service.refresh_token_pair(&pair.refresh_token).await.unwrap_err();
        assert_eq!(reuse.auth_kind(), Some(AuthError::InvalidRefreshToken));
    }

    #[tokio::test]
    async fn test_revoke_session_invalidates_refresh_token() {
        let (service, _) = service_with(3600);
        let (identity, pair) = service.register(alice()).await.unwrap();

        service.revoke_session(identity.id).await.unwrap();
        service.revoke_session(identity.id).await.unwrap();

        let err = service.refresh_token_pair(&pair.refresh_token).await.unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::InvalidRefreshToken));
    }

    #[tokio::test]
    async fn test_header_rejections() {
        let (service, _) = service_with(3600);
        let (_, pair) = service.register(alice()).await.unwrap();

        let missing = service.authenticate(&HeaderMap::new()).await.unwrap_err();
        assert_eq!(missing.auth_kind(), Some(AuthError::MissingHeader));

        let wrong_scheme = service.authenticate(&authorization("Token abc")).await.unwrap_err();
        assert_eq!(wrong_scheme.auth_kind(), Some(AuthError::MalformedHeader));

        let mut tampered = pair.access_token.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });
        let invalid = service.authenticate(&bearer(&tampered)).await.unwrap_err();
        assert_eq!(invalid.auth_kind(), Some(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_token_for_unknown_identity_is_rejected() {
        let (service, _) = service_with(3600);
        let token = service.codec().issue_access_token(Uuid::new_v4()).unwrap();

        let err = service.authenticate(&bearer(&token)).await.unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::UnknownIdentity));
    }

    #[tokio::test]
    async fn test_login_by_username_or_email() {
        let (service, _) = service_with(3600);
        let (identity, _) = service.register(alice()).await.unwrap();

        let (by_name, _) = service.login("alice", "SecurePass123").await.unwrap();
        let (by_email, _) = service.login("alice@example.com", "SecurePass123").await.unwrap();

        assert_eq!(by_name.id, identity.id);
        assert_eq!(by_email.id, identity.id);
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let (service, _) = service_with(3600);
        service.register(alice()).await.unwrap();

        let wrong_password = service.login("alice", "WrongPass123").await.unwrap_err();
        let unknown_user = service.login("bob", "SecurePass123").await.unwrap_err();

        assert_eq!(wrong_password.auth_kind(), Some(AuthError::InvalidCredentials));
        assert_eq!(unknown_user.auth_kind(), Some(AuthError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_user.to_string());
    }

    #[tokio::test]
    async fn test_second_login_replaces_first_refresh_token() {
        let (service, _) = service_with(3600);
        let (_, first) = service.register(alice()).await.unwrap();
        let (_, second) = service.login("alice", "SecurePass123").await.unwrap();

        assert!(service.refresh_token_pair(&first.refresh_token).await.is_err());
        assert!(service.refresh_token_pair(&second.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_bad_input() {
        let (service, _) = service_with(3600);
        service.register(alice()).await.unwrap();

        let duplicate = service.register(alice()).await.unwrap_err();
        assert!(matches!(duplicate, AppError::Store(crate::error::StoreError::Duplicate(_))));

        let mut weak = alice();
        weak.username = "bob".to_string();
        weak.email = "bob@example.com".to_string();
        weak.password = "weak".to_string();
        assert!(matches!(
            service.register(weak).await.unwrap_err(),
            AppError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_access_token_expiry_boundary_through_codec() {
        let (service, _) = service_with(60);
        let (identity, _) = service.register(alice()).await.unwrap();
        let issued = DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap();

        let token = service.codec().issue_access_token_at(identity.id, issued).unwrap();
        let codec = service.codec();
        assert!(codec
            .verify_access_token_at(&token, issued + Duration::seconds(59))
            .is_ok());
        assert!(codec
            .verify_access_token_at(&token, issued + Duration::seconds(60))
            .is_err());
    }

    #[tokio::test]
    async fn test_logout_during_refresh_keeps_session_revoked() {
        let inner = Arc::new(InMemoryIdentityStore::new());
        let store = Arc::new(RevokeAfterLookup {
            inner: inner.clone(),
        });
        let service = AuthService::new(store, &settings(3600)).unwrap();
        let (identity, pair) = service.register(alice()).await.unwrap();

        let err = service
            .refresh_token_pair(&pair.refresh_token)
            .await
            .unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::InvalidRefreshToken));

        let stored = inner.find_by_id(identity.id).await.unwrap().unwrap();
        assert!(stored.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_refreshing_one_token_twice_yields_one_pair() {
        let (service, _) = service_with(3600);
        let (_, pair) = service.register(alice()).await.unwrap();

        let (a, b) = tokio::join!(
            service.refresh_token_pair(&pair.refresh_token),
            service.refresh_token_pair(&pair.refresh_token)
        );

        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let winner = a.or(b).unwrap();
        assert!(service.refresh_token_pair(&winner.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_hanging_store_fails_closed_with_timeout() {
        let mut settings = settings(3600);
        settings.store_timeout_ms = 50;
        let service = AuthService::new(Arc::new(HangingStore), &settings).unwrap();
        let token = service.codec().issue_access_token(Uuid::new_v4()).unwrap();

        assert!(is_timeout(service.authenticate(&bearer(&token)).await));
        assert!(is_timeout(service.login("alice", "SecurePass123").await));
        assert!(is_timeout(service.refresh_token_pair("any-refresh-token").await));
        assert!(is_timeout(service.revoke_session(Uuid::new_v4()).await));
    }
}
