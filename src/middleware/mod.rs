/// Middleware module
///
/// Bearer authentication for protected routes.

mod auth_middleware;

pub use auth_middleware::BearerAuth;
