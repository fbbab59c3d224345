#![recursion_limit = "128"]

#[macro_use]
extern crate diesel;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate slog;

pub mod config;
pub mod delta;
pub mod error_helpers;
pub mod errors;
pub mod feed_fetcher;
pub mod mediators;
pub mod middleware;
mod model;
pub mod server;
// Generated file: skip rustfmt
#[cfg_attr(rustfmt, rustfmt_skip)]
mod schema;
#[cfg(test)]
mod test_data;
#[cfg(test)]
mod test_helpers;
pub mod time_helpers;
pub mod url_canonicalizer;
pub mod user_store;
pub mod web;
