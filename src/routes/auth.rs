/// Authentication Routes
///
/// Registration, login, token refresh, logout and the current user.
/// All of the work happens in `AuthService`; these handlers only move JSON
/// in and out.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthService, AuthenticatedIdentity, RegisterInput, TokenPair};
use crate::error::AppError;
use crate::store::PublicIdentity;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// `login` may be a username or an email address
#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(alias = "email", alias = "username")]
    pub login: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    #[serde(alias = "refreshToken")]
    pub refresh_token: String,
}

/// Token pair plus the public profile of its owner
#[derive(Serialize)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: PublicIdentity,
}

#[derive(Serialize)]
pub struct RefreshResponse {
    pub success: bool,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub success: bool,
    pub data: PublicIdentity,
}

/// POST /auth/register
///
/// # Errors
/// - 400: invalid username, email or weak password
/// - 409: username or email already in use
/// - 503: identity store unavailable
pub async fn register(
    form: web::Json<RegisterRequest>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let form = form.into_inner();
    let (identity, tokens) = auth
        .register(RegisterInput {
            username: form.username,
            email: form.email,
            password: form.password,
        })
        .await?;

    Ok(HttpResponse::Created().json(AuthResponse {
        success: true,
        tokens,
        user: identity.to_public(),
    }))
}

/// POST /auth/login
///
/// # Errors
/// - 401: invalid credentials (unknown identifier and wrong password look alike)
/// - 503: identity store unavailable
pub async fn login(
    form: web::Json<LoginRequest>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let (identity, tokens) = auth.login(&form.login, &form.password).await?;

    Ok(HttpResponse::Ok().json(AuthResponse {
        success: true,
        tokens,
        user: identity.to_public(),
    }))
}

/// POST /auth/refresh-token
///
/// Rotation: the presented refresh token is replaced and cannot be used again.
///
/// # Errors
/// - 401: invalid, rotated, revoked or expired refresh token
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let tokens = auth.refresh_token_pair(&form.refresh_token).await?;

    Ok(HttpResponse::Ok().json(RefreshResponse {
        success: true,
        tokens,
    }))
}

/// POST /auth/logout
///
/// **Requires** `Authorization: Bearer <access_token>`.
pub async fn logout(
    identity: AuthenticatedIdentity,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    auth.revoke_session(identity.id()).await?;

    tracing::info!(user_id = %identity.id(), "User logged out");
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Logged out successfully",
    })))
}

/// GET /auth/me
///
/// **Requires** `Authorization: Bearer <access_token>`.
pub async fn get_current_user(identity: AuthenticatedIdentity) -> HttpResponse {
    HttpResponse::Ok().json(UserResponse {
        success: true,
        data: identity.identity().to_public(),
    })
}
