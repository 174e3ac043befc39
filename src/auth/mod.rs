/// Authentication module
///
/// Password hashing, access token signing/verification, refresh token
/// rotation, and the session service that composes them.

mod claims;
mod jwt;
mod password;
mod refresh_token;
mod service;

pub use claims::Claims;
pub use jwt::TokenCodec;
pub use password::{hash_lookup_token, validate_password_strength, PasswordHasher};
pub use refresh_token::{
    generate_refresh_token, refresh_token_lifetime, IssuedRefreshToken, RefreshTokenManager,
};
pub use service::{AuthService, AuthenticatedIdentity, RegisterInput, TokenPair};
