use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    http::StatusCode,
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use std::time::Instant;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request correlation id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(pub Uuid);

/// Request logging middleware
///
/// One event per request with a fresh `request_id`, method, path, status
/// and latency. The id is also stored in the request extensions and echoed
/// in the `x-request-id` response header. Server
/// errors log at `error`, client errors at `warn`, the rest at `info`.
/// Headers and bodies are never logged: they carry credentials.
pub struct RequestLogger;

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggerService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RequestLoggerService {
            service: Rc::new(service),
        }))
    }
}

pub struct RequestLoggerService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerService<S>
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
        let start_time = Instant::now();
        let request_id = RequestId(Uuid::new_v4());
        req.extensions_mut().insert(request_id);
        let method = req.method().to_string();
        let path = req.path().to_string();
        let client_ip = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();

        let service = self.service.clone();

        Box::pin(async move {
            let mut result = service.call(req).await;

            if let Ok(res) = &mut result {
                if let Ok(value) = HeaderValue::from_str(&request_id.0.to_string()) {
                    res.headers_mut().insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
                }
            }

            // Middleware rejections arrive as Err; use their status code
            let status = match &result {
                Ok(res) => res.status(),
                Err(e) => e.as_response_error().status_code(),
            };
            log_request(
                request_id,
                &method,
                &path,
                &client_ip,
                status,
                start_time.elapsed().as_millis(),
            );

            result
        })
    }
}

fn log_request(
    request_id: RequestId,
    method: &str,
    path: &str,
    client_ip: &str,
    status: StatusCode,
    elapsed_ms: u128,
) {
    let request_id = request_id.0.to_string();
    let request_id = request_id.as_str();
    let status = status.as_u16();
    let elapsed_ms = elapsed_ms as u64;
    if status >= 500 {
        tracing::error!(request_id, method, path, client_ip, status, elapsed_ms, "Request completed");
    } else if status >= 400 {
        tracing::warn!(request_id, method, path, client_ip, status, elapsed_ms, "Request completed");
    } else {
        tracing::info!(request_id, method, path, client_ip, status, elapsed_ms, "Request completed");
    }
}
