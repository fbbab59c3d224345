//! Test-only plumbing: a per-test connection wrapped in
//! `begin_test_transaction` (so nothing a test does is ever actually
//! committed) and a `slog` logger, bundled as `CommonTestBootstrap` the way
//! the host bundles its own per-mediator test fixtures.

use diesel::pg::PgConnection;
use diesel::prelude::*;
use slog::{Drain, Logger};
use std::env;

pub fn connection() -> PgConnection {
    let database_url =
        env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set in order to run tests");
    let mut conn = PgConnection::establish(&database_url).unwrap();
    conn.begin_test_transaction().unwrap();
    conn
}

pub fn log() -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(std::io::stdout());
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let async_drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(async_drain, o!("env" => "test"))
}

/// Common per-test state every mediator test needs: a connection and a
/// logger. Individual mediator test modules build their own fixtures on
/// top via `test_data`.
pub struct CommonTestBootstrap {
    pub conn: PgConnection,
    pub log:  Logger,
}

impl CommonTestBootstrap {
    pub fn new() -> CommonTestBootstrap {
        CommonTestBootstrap {
            conn: connection(),
            log:  log(),
        }
    }
}

impl Default for CommonTestBootstrap {
    fn default() -> Self {
        Self::new()
    }
}
