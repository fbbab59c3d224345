//! The JSON HTTP surface (§6): routing, shared application state, and error
//! translation from this crate's `Error` into gpodder-client-compatible HTTP
//! responses.
//!
//! Grounded on the host's `endpoints`/`StateImpl` split -- a single shared
//! state handle threaded through every handler -- generalized from the
//! host's actor-addressed `SyncExecutor` to actix-web 4's `web::block` for
//! offloading the blocking Diesel calls every handler here makes.

pub mod auth;
pub mod devices;
pub mod episodes;
pub mod lists;
pub mod opml;
pub mod settings;
pub mod simple_api;
pub mod subscriptions;
pub mod sync_devices;
pub mod updates;

use crate::config::Environment;
use crate::errors::Error;
use crate::feed_fetcher::FeedFetcher;
use crate::user_store::UserStore;

use actix_web::{web, HttpResponse, ResponseError};
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use std::fmt;
use std::sync::Arc;

/// Shared, cloneable handle to everything a handler needs: the pool (for a
/// per-request connection), the user/credential boundary, the feed
/// fetcher that subscription writes consult, and the running environment
/// (gates the `sessionid` cookie's `Secure` flag -- §4.1).
pub struct AppState {
    pub log:          slog::Logger,
    pub pool:         Pool<ConnectionManager<PgConnection>>,
    pub user_store:   Arc<dyn UserStore>,
    pub feed_fetcher: Arc<dyn FeedFetcher>,
    pub environment:  Environment,
}

pub type PooledConnection = diesel::r2d2::PooledConnection<ConnectionManager<PgConnection>>;

/// Wraps this crate's `Error` as an `actix_web::ResponseError`, translating
/// it to a status code and a short machine-readable tag via
/// `errors::http_status_and_tag` (§7's "stable error taxonomy" contract).
#[derive(Debug)]
pub struct WebError(pub Error);

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Error> for WebError {
    fn from(error: Error) -> Self {
        WebError(error)
    }
}

impl ResponseError for WebError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        let (status, _) = crate::errors::http_status_and_tag(&self.0);
        actix_web::http::StatusCode::from_u16(status)
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        let (status, tag) = crate::errors::http_status_and_tag(&self.0);
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": tag,
            "message": self.0.to_string(),
            "status": status,
        }))
    }
}

pub type WebResult<T> = std::result::Result<T, WebError>;

pub fn pooled_connection(state: &AppState) -> WebResult<PooledConnection> {
    state.pool.get().map_err(|e| WebError(Error::from(e)))
}

/// Runs a blocking closure on actix-web's blocking thread pool, the
/// modern equivalent of the host's `SyncExecutor` actor: every handler's
/// Diesel work happens here rather than on the async reactor thread.
pub async fn blocking<F, T>(f: F) -> WebResult<T>
where
    F: FnOnce() -> WebResult<T> + Send + 'static,
    T: Send + 'static,
{
    match web::block(f).await {
        Ok(result) => result,
        Err(_) => Err(WebError(Error::from_kind(crate::errors::ErrorKind::Backend(
            "background task was cancelled".to_owned(),
        )))),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(
            web::scope("/api/2")
                .service(web::resource("/auth/{user}/login.json").route(web::post().to(auth::login)))
                .service(web::resource("/auth/{user}/logout.json").route(web::post().to(auth::logout)))
                .service(web::resource("/devices/{user}.json").route(web::get().to(devices::list)))
                .service(web::resource("/devices/{user}/{device}.json").route(web::post().to(devices::upsert)))
                .service(
                    web::resource("/subscriptions/{user}/{device}.json")
                        .route(web::get().to(subscriptions::show))
                        .route(web::put().to(subscriptions::put))
                        .route(web::post().to(subscriptions::post)),
                )
                .service(web::resource("/subscriptions/{user}.json").route(web::get().to(subscriptions::all)))
                .service(
                    web::resource("/episodes/{user}.json")
                        .route(web::get().to(episodes::show))
                        .route(web::post().to(episodes::post)),
                )
                .service(web::resource("/updates/{user}/{device}.json").route(web::get().to(updates::show)))
                .service(
                    web::resource("/settings/{user}/{scope}.json")
                        .route(web::get().to(settings::show))
                        .route(web::post().to(settings::post)),
                )
                .service(web::resource("/favorites/{user}.json").route(web::get().to(settings::favorites)))
                .service(
                    web::resource("/lists/{user}")
                        .route(web::get().to(lists::index))
                        .route(web::post().to(lists::create)),
                )
                .service(
                    web::resource("/lists/{user}/list/{name}")
                        .route(web::get().to(lists::show))
                        .route(web::put().to(lists::update))
                        .route(web::delete().to(lists::destroy)),
                )
                .service(
                    web::resource("/sync-devices/{user}.json")
                        .route(web::get().to(sync_devices::show))
                        .route(web::post().to(sync_devices::post)),
                ),
        )
        .service(web::resource("/toplist/{n}.{fmt}").route(web::get().to(simple_api::toplist)))
        .service(web::resource("/search.{fmt}").route(web::get().to(simple_api::search)))
        .service(
            web::resource("/subscriptions/{user}/{device}.{fmt}")
                .route(web::get().to(simple_api::subscriptions))
                .route(web::put().to(simple_api::update_subscriptions)),
        );
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().finish()
}
