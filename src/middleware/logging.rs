use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Paths polled by orchestrators; logged at debug to keep the info log useful.
const QUIET_PATHS: [&str; 3] = ["/health", "/api/v1/health", "/api/v1/metrics"];

pub struct RequestLogging;

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingMiddleware { service }))
    }
}

pub struct RequestLoggingMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLoggingMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let started = Instant::now();
        let request_id = Uuid::new_v4();
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let remote_addr = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();
        let quiet = QUIET_PATHS.contains(&path.as_str());

        if quiet {
            debug!(request_id = %request_id, method = %method, path = %path, "Request started");
        } else {
            info!(
                request_id = %request_id,
                method = %method,
                path = %path,
                remote_addr = %remote_addr,
                "Request started"
            );
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = started.elapsed().as_millis();

            match &result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if quiet {
                        debug!(request_id = %request_id, status = %status, duration_ms = %duration_ms, "Request completed");
                    } else {
                        info!(
                            request_id = %request_id,
                            method = %method,
                            path = %path,
                            status = %status,
                            duration_ms = %duration_ms,
                            "Request completed"
                        );
                    }
                }
                Err(err) => {
                    error!(
                        request_id = %request_id,
                        method = %method,
                        path = %path,
                        duration_ms = %duration_ms,
                        error = %err,
                        "Request failed"
                    );
                }
            }

            result
        })
    }
}
