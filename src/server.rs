//! The HTTP server entry point: binds an actix-web `App` wired with
//! [`crate::web`]'s routes, the request-scoped [`crate::middleware::RequestLogger`],
//! and a permissive CORS layer, against a pooled Diesel connection.
//!
//! Grounded on the host's own `WebServer::run` (`actix::System::new` +
//! `HttpServer::new`), modernized from actix 0.5's actor-based
//! `Application`/`SyncArbiter` pair to actix-web 4's `App`/`HttpServer`,
//! which no longer needs a separate synchronous-executor actor since
//! blocking work is offloaded per-request via `actix_web::web::block`.

use crate::config::Environment;
use crate::errors::*;
use crate::feed_fetcher::FeedFetcher;
use crate::user_store::UserStore;
use crate::web::AppState;

use actix_cors::Cors;
use actix_web::{web as actix_web_mod, App, HttpServer};
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use slog::Logger;
use std::sync::Arc;

pub struct WebServer {
    pub log:          Logger,
    pub port:         u16,
    pub pool:         Pool<ConnectionManager<PgConnection>>,
    pub user_store:   Arc<dyn UserStore>,
    pub feed_fetcher: Arc<dyn FeedFetcher>,
    pub environment:  Environment,
}

impl WebServer {
    pub async fn run(self) -> Result<()> {
        let host = format!("0.0.0.0:{}", self.port);
        let log = self.log.clone();
        info!(log, "gpodder sync server starting"; "host" => host.as_str());

        let state = actix_web_mod::Data::new(AppState {
            log:          self.log.clone(),
            pool:         self.pool.clone(),
            user_store:   self.user_store.clone(),
            feed_fetcher: self.feed_fetcher.clone(),
            environment:  self.environment,
        });

        HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .wrap(Cors::permissive())
                .wrap(crate::middleware::RequestLogger { log: log.clone() })
                .configure(crate::web::configure)
        })
        .bind(&host)
        .chain_err(|| "error binding HTTP server")?
        .shutdown_timeout(5)
        .run()
        .await
        .chain_err(|| "error running HTTP server")
    }
}
