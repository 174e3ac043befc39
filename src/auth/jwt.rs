/// Access Token Codec
///
/// Creates and verifies HS256-signed access tokens. Stateless: the result
/// depends only on the inputs, the signing secret and the clock.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::Claims;
use crate::configuration::{MAX_ACCESS_TOKEN_LIFETIME_SECS, MIN_SECRET_BYTES};
use crate::error::{AppError, ConfigError, TokenError};

const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    lifetime: Duration,
}

impl TokenCodec {
    /// # Errors
    /// Returns error if the secret is shorter than 128 bits or the lifetime
    /// is not positive or longer than `MAX_ACCESS_TOKEN_LIFETIME_SECS`.
    pub fn new(secret: &[u8], lifetime: Duration) -> Result<Self, ConfigError> {
        if secret.len() < MIN_SECRET_BYTES {
            return Err(ConfigError::InvalidValue(format!(
                "signing secret must be at least {} bytes",
                MIN_SECRET_BYTES
            )));
        }
        if lifetime <= Duration::zero() || lifetime.num_seconds() > MAX_ACCESS_TOKEN_LIFETIME_SECS {
            return Err(ConfigError::InvalidValue(format!(
                "access token lifetime must be between 1 and {} seconds",
                MAX_ACCESS_TOKEN_LIFETIME_SECS
            )));
        }

        // Only HS256 is accepted; `exp` is checked by hand against the
        // caller's clock with no leeway.
        let mut validation = Validation::new(ALGORITHM);
        validation.validate_exp = false;
        validation.leeway = 0;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            lifetime,
        })
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn issue_access_token(&self, identity_id: Uuid) -> Result<String, AppError> {
        self.issue_access_token_at(identity_id, Utc::now())
    }

    /// Sub-second precision of `now` is dropped, see `Claims::new`.
    pub fn issue_access_token_at(
        &self,
        identity_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<String, AppError> {
        let claims = Claims::new(identity_id, now, self.lifetime);

        encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    pub fn verify_access_token(&self, token: &str) -> Result<Uuid, TokenError> {
        self.verify_access_token_at(token, Utc::now())
    }

    /// Check signature and algorithm, then expiry, then extract the subject.
    pub fn verify_access_token_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Uuid, TokenError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Access token rejected");
                match e.kind() {
                    ErrorKind::InvalidSignature
                    | ErrorKind::InvalidAlgorithm
                    | ErrorKind::InvalidAlgorithmName => TokenError::InvalidSignature,
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    _ => TokenError::MalformedClaims,
                }
            })?;

        if claims.is_expired_at(now) {
            return Err(TokenError::Expired);
        }

        claims.identity_id()
    }
}
