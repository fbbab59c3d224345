//! The sync core's error taxonomy.
//!
//! Every mediator and web handler returns this crate's `Result<T>`. The
//! `ErrorKind` variants map directly onto the taxonomy kinds from the
//! component design: `AuthRequired`, `Forbidden`, `InvalidInput`, `NotFound`,
//! `Conflict`, and `Backend`. Anything that doesn't fit one of those (a
//! Diesel failure, a pool checkout failure, a JSON encode failure) flows in
//! through `foreign_links` and is treated as `Backend` by the web layer.

error_chain! {
    foreign_links {
        Database(diesel::result::Error);
        DatabaseConnectionPool(diesel::r2d2::PoolError);
        Io(std::io::Error);
        Json(serde_json::Error);
        UrlParse(url::ParseError);
    }

    errors {
        AuthRequired {
            description("authentication required")
            display("authentication required")
        }

        Forbidden(reason: String) {
            description("forbidden")
            display("forbidden: {}", reason)
        }

        InvalidInput(message: String) {
            description("invalid input")
            display("invalid input: {}", message)
        }

        NotFound(kind: String, id: String) {
            description("not found")
            display("{} not found: {}", kind, id)
        }

        Conflict(message: String) {
            description("conflict")
            display("conflict: {}", message)
        }

        Backend(message: String) {
            description("backend error")
            display("backend error: {}", message)
        }
    }
}

/// Constructor helpers so call sites read as intent ("this request is
/// missing a parameter") rather than as taxonomy trivia.
pub mod error {
    use super::ErrorKind;

    pub fn auth_required() -> ErrorKind {
        ErrorKind::AuthRequired
    }

    pub fn forbidden<S: Into<String>>(reason: S) -> ErrorKind {
        ErrorKind::Forbidden(reason.into())
    }

    pub fn invalid_input<S: Into<String>>(message: S) -> ErrorKind {
        ErrorKind::InvalidInput(message.into())
    }

    pub fn not_found<K: Into<String>, I: Into<String>>(kind: K, id: I) -> ErrorKind {
        ErrorKind::NotFound(kind.into(), id.into())
    }

    pub fn conflict<S: Into<String>>(message: S) -> ErrorKind {
        ErrorKind::Conflict(message.into())
    }

    pub fn bad_parameter<S: std::fmt::Display>(name: &str, value: &S) -> ErrorKind {
        ErrorKind::InvalidInput(format!("bad parameter `{}`: {}", name, value))
    }

    pub fn missing_parameter(name: &str) -> ErrorKind {
        ErrorKind::InvalidInput(format!("missing parameter `{}`", name))
    }
}

// Collect error strings together so that we can build a good error message
// to log. The original error is at the end of the iterator, but since it's
// the most relevant, we reverse the list.
pub fn error_strings(error: &Error) -> Vec<String> {
    error
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .iter()
        .cloned()
        .rev()
        .collect()
}

/// Classifies an error for the web layer: HTTP status code and a short,
/// stable machine-readable tag used as the JSON body's `error` field.
pub fn http_status_and_tag(error: &Error) -> (u16, &'static str) {
    match error.kind() {
        ErrorKind::AuthRequired => (401, "auth_required"),
        ErrorKind::Forbidden(_) => (403, "forbidden"),
        ErrorKind::InvalidInput(_) => (400, "invalid_input"),
        ErrorKind::NotFound(_, _) => (404, "not_found"),
        ErrorKind::Conflict(_) => (409, "conflict"),
        ErrorKind::Backend(_) => (500, "backend"),
        _ => (500, "backend"),
    }
}
