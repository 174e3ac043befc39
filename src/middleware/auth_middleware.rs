/// Bearer Authentication Middleware
///
/// Resolves the `Authorization` header to an identity via
/// `AuthService::authenticate` and stores the result in the request
/// extensions. Handlers behind it take `AuthenticatedIdentity` as an
/// argument instead of reading the extensions themselves.

use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error, FromRequest, HttpMessage, HttpRequest,
};
use futures::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;

use crate::auth::{AuthService, AuthenticatedIdentity};
use crate::error::{AppError, AuthError};
use crate::logger::RequestId;

/// Middleware for protecting routes
///
/// Requests that fail authentication never reach the wrapped service.
pub struct BearerAuth {
    auth: web::Data<AuthService>,
}

impl BearerAuth {
    pub fn new(auth: web::Data<AuthService>) -> Self {
        Self { auth }
    }
}

impl<S, B> Transform<S, ServiceRequest> for BearerAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = BearerAuthService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(BearerAuthService {
            service: Rc::new(service),
            auth: self.auth.clone(),
        }))
    }
}

pub struct BearerAuthService<S> {
    service: Rc<S>,
    auth: web::Data<AuthService>,
}

impl<S, B> Service<ServiceRequest> for BearerAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let auth = self.auth.clone();

        Box::pin(async move {
            let request_id = req
                .extensions()
                .get::<RequestId>()
                .map(|id| id.0.to_string())
                .unwrap_or_default();

            let identity = match auth.authenticate(req.headers()).await {
                Ok(identity) => identity,
                Err(e) => {
                    match &e {
                        AppError::Store(store_error) if store_error.is_unavailable() => {
                            tracing::error!(
                                request_id = %request_id,
                                path = %req.path(),
                                error = %store_error,
                                "Authentication aborted: identity store unavailable"
                            );
                        }
                        AppError::Store(store_error) => {
                            tracing::error!(
                                request_id = %request_id,
                                path = %req.path(),
                                error = %store_error,
                                "Authentication aborted: identity store failure"
                            );
                        }
                        _ => {}
                    }
                    return Err(e.into());
                }
            };

            req.extensions_mut().insert(identity);
            service.call(req).await
        })
    }
}

/// Extract the identity attached by `BearerAuth`.
///
/// On a route without the middleware this fails closed with
/// `MissingHeader` rather than serving the request anonymously.
impl FromRequest for AuthenticatedIdentity {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthenticatedIdentity>()
                .cloned()
                .ok_or(AppError::Auth(AuthError::MissingHeader)),
        )
    }
}
