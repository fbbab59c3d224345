//! Binary entry point for the gpodder sync HTTP server.
//!
//! Grounded on the host's `bin/podcore/main.rs` `subcommand_api`/`pool`/`log`
//! trio, collapsed down to the one thing this core ships: a single HTTP API
//! process. There's no CLI subcommand dispatch here because this crate
//! doesn't carry the host's `add`/`crawl`/`clean` maintenance jobs -- just
//! `Config::from_env`, a migrated pool, and `WebServer::run`.

#[macro_use]
extern crate slog;

use gpodder_sync_core::config::Config;
use gpodder_sync_core::error_helpers;
use gpodder_sync_core::errors::*;
use gpodder_sync_core::feed_fetcher::LiveFeedFetcher;
use gpodder_sync_core::server::WebServer;
use gpodder_sync_core::user_store::LiveUserStore;

use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;

// Migrations get compiled into the binary so deploys don't need a separate
// `diesel migration run` step against whatever host happens to run this.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

const NUM_CONNECTIONS: u32 = 10;
const POOL_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

#[actix_web::main]
async fn main() {
    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("invalid configuration: {}", e);
        std::process::exit(1);
    });

    let log = root_logger(&config);

    if let Err(ref e) = run(&log, config).await {
        error_helpers::print_error(&log, e);
        std::process::exit(1);
    }
}

async fn run(log: &Logger, config: Config) -> Result<()> {
    let pool = pool(log, &config)?;

    {
        let mut conn = pool.get().chain_err(|| "error checking out connection for migrations")?;
        info!(log, "running pending migrations");
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| Error::from_kind(ErrorKind::Backend(format!("migration error: {}", e))))?;
    }

    let server = WebServer {
        log: log.clone(),
        port: config.server_port,
        pool,
        user_store: Arc::new(LiveUserStore),
        feed_fetcher: Arc::new(LiveFeedFetcher::new()),
        environment: config.environment,
    };
    server.run().await
}

/// Initializes a connection pool sized for a single web process. Mirrors the
/// host's `pool()` helper: a bounded `max_size`, `min_idle(0)` so startup
/// doesn't eagerly open every connection, and an idle timeout to release
/// unused connections back to Postgres.
fn pool(log: &Logger, config: &Config) -> Result<Pool<ConnectionManager<PgConnection>>> {
    debug!(log, "initializing connection pool"; "num_connections" => NUM_CONNECTIONS);

    let manager = ConnectionManager::<PgConnection>::new(config.database_url());
    Pool::builder()
        .connection_timeout(POOL_TIMEOUT)
        .idle_timeout(Some(IDLE_TIMEOUT))
        .max_size(NUM_CONNECTIONS)
        .min_idle(Some(0))
        .build(manager)
        .map_err(Error::from)
}

/// Full, human-readable term logging in development; compact async logging
/// in production, mirroring the host's `isatty`-conditioned choice between
/// a synchronous decorator (fine for an attached terminal) and an async
/// drain (what you want when stdout is being captured by a log collector).
fn root_logger(config: &Config) -> Logger {
    let decorator = slog_term::TermDecorator::new().build();

    if config.environment.is_production() {
        let drain = slog_term::CompactFormat::new(decorator).build().fuse();
        let async_drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(async_drain, o!("environment" => format!("{:?}", config.environment)))
    } else {
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        slog::Logger::root(drain.fuse(), o!("environment" => format!("{:?}", config.environment)))
    }
}

