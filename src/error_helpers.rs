//! Error-to-log formatting, shared between the binary's top-level error
//! handling and any background task that can't otherwise report a failure.

use crate::errors::*;

use slog::Logger;

/// Prints an error and its causal chain to the log.
pub fn print_error(log: &Logger, error: &Error) {
    let error_strings = error_strings(error);
    error!(log, "Error: {}", error_strings[0]);
    for s in error_strings.iter().skip(1) {
        error!(log, "Chained error: {}", s);
    }

    // The backtrace is not always generated. Programs must be run with
    // `RUST_BACKTRACE=1`.
    if let Some(backtrace) = error.backtrace() {
        error!(log, "{:?}", backtrace);
    }
}
