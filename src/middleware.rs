//! Request-scoped logging (§5's "parallel request handling" runs under an
//! actix-web service stack rather than the host's `SyncArbiter`).
//!
//! Grounded on the host's `request_id` + `request_response_logger`
//! middleware pair, collapsed into one `Transform`/`Service` since
//! actix-web 4 middleware no longer needs a separate `log_initializer` to
//! stash state ahead of it -- a request-scoped `Logger` is inserted
//! directly into the request's extensions here.

use crate::time_helpers;

use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::Error;
use futures::future::{ready, LocalBoxFuture, Ready};
use slog::Logger;
use std::rc::Rc;
use std::time::Instant;
use uuid::Uuid;

pub struct RequestLogger {
    pub log: Logger,
}

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestLoggerMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggerMiddleware {
            service: Rc::new(service),
            log:     self.log.clone(),
        }))
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: Rc<S>,
    log:     Logger,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerMiddleware<S>
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
        let request_id = Uuid::new_v4().simple().to_string();
        let log = self.log.new(o!("request_id" => request_id));
        let method = req.method().to_string();
        let path = req.path().to_owned();
        req.extensions_mut().insert(log.clone());

        let start = Instant::now();
        let service = Rc::clone(&self.service);

        Box::pin(async move {
            debug!(log, "request started"; "method" => method.as_str(), "path" => path.as_str());
            let res = service.call(req).await?;
            let elapsed = start.elapsed().as_nanos() as u64;
            info!(log, "request finished";
                "method"  => method.as_str(),
                "path"    => path.as_str(),
                "status"  => res.status().as_u16(),
                "elapsed" => time_helpers::unit_str(elapsed),
            );
            Ok(res)
        })
    }
}

/// Shorthand for pulling the request-scoped logger out of a request's
/// extensions. Falls back to `default` if the middleware wasn't installed
/// (a handler unit test constructing a bare `HttpRequest`, for instance).
pub fn log(req: &actix_web::HttpRequest, default: &Logger) -> Logger {
    req.extensions().get::<Logger>().cloned().unwrap_or_else(|| default.clone())
}
