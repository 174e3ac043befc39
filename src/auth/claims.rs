/// Access token claims
///
/// `{sub, iat, exp}` with Unix-second timestamps (RFC 7519).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TokenError;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (identity id as UUID string)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    /// Timestamps are whole Unix seconds, so the issue instant is the start
    /// of the second containing `issued_at`. The token is valid for
    /// `lifetime` counted from that second: a token minted at `X.9` expires
    /// at `X + lifetime`.
    pub fn new(identity_id: Uuid, issued_at: DateTime<Utc>, lifetime: Duration) -> Self {
        let iat = issued_at.timestamp();
        Self {
            sub: identity_id.to_string(),
            iat,
            exp: iat + lifetime.num_seconds(),
        }
    }

    pub fn identity_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub).map_err(|_| TokenError::MalformedClaims)
    }

    /// Expired at exactly `exp`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}
