//! AuthN/Session (§4.1): the three credential paths, session issuance on
//! login, and lazy expiry on lookup.
//!
//! Grounded on `key_creator`'s `EntropyRng` + `Alphanumeric` token
//! generation, generalized from an API key to a session token, and on
//! `account_password_authenticator`'s password-verification shape (kept in
//! `user_store::verify_password`, since that's the narrow boundary to the
//! host's credential storage).

use crate::errors::*;
use crate::model;
use crate::model::insertable;
use crate::schema::session;
use crate::time_helpers;
use crate::user_store::UserStore;

use chrono::{Duration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use slog::Logger;

pub const SESSION_TTL_DAYS: i64 = 30;
const TOKEN_LENGTH: usize = 43;

/// Tries, in order: `X-GPodder-Token`, `sessionid` cookie, HTTP Basic.
/// Every path additionally requires the path username to match the
/// authenticated user case-insensitively and that the user's sync mode
/// permits gpodder access.
pub struct Credentials<'a> {
    pub path_username:  &'a str,
    pub token_header:   Option<&'a str>,
    pub session_cookie: Option<&'a str>,
    pub basic_auth:     Option<(&'a str, &'a str)>,
}

pub fn authenticate(
    log: &Logger,
    conn: &mut PgConnection,
    user_store: &dyn UserStore,
    creds: &Credentials,
) -> Result<i64> {
    let record = user_store
        .find_by_username(conn, creds.path_username)?
        .ok_or_else(|| Error::from(error::auth_required()))?;

    let authenticated = if let Some(token) = creds.token_header {
        record.api_token.as_deref() == Some(token)
    } else if let Some(session_token) = creds.session_cookie {
        match validate_session(conn, session_token)? {
            Some(session_user_id) => session_user_id == record.user_id,
            None => false,
        }
    } else if let Some((basic_user, basic_pass)) = creds.basic_auth {
        if !basic_user.eq_ignore_ascii_case(creds.path_username) {
            false
        } else if record.api_token.as_deref() == Some(basic_pass) {
            true
        } else {
            user_store.verify_password(&record, basic_pass)?
        }
    } else {
        return Err(error::auth_required().into());
    };

    if !authenticated {
        info!(log, "authentication failed"; "username" => creds.path_username);
        return Err(error::auth_required().into());
    }

    if !record.sync_mode.permits_gpodder() {
        return Err(error::forbidden("sync disabled for user").into());
    }

    Ok(record.user_id)
}

/// Looks up a session by token, lazily deleting it if expired. Any use
/// refreshes `last_active`.
fn validate_session(conn: &mut PgConnection, token: &str) -> Result<Option<i64>> {
    let existing: Option<model::Session> = session::table
        .filter(session::token.eq(token))
        .first(conn)
        .optional()
        .chain_err(|| "error looking up session")?;

    let Some(existing) = existing else {
        return Ok(None);
    };

    let now = Utc::now();
    if existing.is_expired(now) {
        diesel::delete(session::table.filter(session::token.eq(token)))
            .execute(conn)
            .chain_err(|| "error deleting expired session")?;
        return Ok(None);
    }

    diesel::update(session::table.filter(session::token.eq(token)))
        .set(session::last_active.eq(now))
        .execute(conn)
        .chain_err(|| "error refreshing session")?;

    Ok(Some(existing.user_id))
}

/// Creates a fresh session on successful login.
pub struct Login {
    pub user_id:    i64,
    pub user_agent: Option<String>,
    pub client_ip:  Option<String>,
}

impl Login {
    pub fn run(&self, log: &Logger, conn: &mut PgConnection) -> Result<String> {
        time_helpers::log_timed(&log.new(o!("step" => file!())), |_log| {
            let token = generate_token();
            let now = Utc::now();

            diesel::insert_into(session::table)
                .values(&insertable::Session {
                    token: token.clone(),
                    user_id: self.user_id,
                    expires_at: now + Duration::days(SESSION_TTL_DAYS),
                    last_active: now,
                    user_agent: self.user_agent.clone(),
                    client_ip: self.client_ip.clone(),
                })
                .execute(conn)
                .chain_err(|| "error inserting session")?;

            Ok(token)
        })
    }
}

/// Deletes a session; idempotent (deleting an already-gone token is not
/// an error).
pub fn logout(conn: &mut PgConnection, token: &str) -> Result<()> {
    diesel::delete(session::table.filter(session::token.eq(token)))
        .execute(conn)
        .chain_err(|| "error deleting session")?;
    Ok(())
}

fn generate_token() -> String {
    OsRng.sample_iter(&Alphanumeric).take(TOKEN_LENGTH).map(char::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_data;
    use crate::test_helpers;
    use crate::user_store::{PassThroughUserStore, SyncMode, UserRecord};

    fn fixture_store(user_id: i64, sync_mode: SyncMode) -> PassThroughUserStore {
        let store = PassThroughUserStore::new();
        store.insert(
            UserRecord {
                user_id,
                username: "alice".to_owned(),
                password_hash: "irrelevant".to_owned(),
                api_token: Some("tok".to_owned()),
                sync_mode,
            },
            "correcthorse",
        );
        store
    }

    #[test]
    fn test_s5_token_and_password_paths() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let store = fixture_store(1, SyncMode::Internal);

        let via_token = authenticate(
            log,
            conn,
            &store,
            &Credentials {
                path_username: "alice",
                token_header: Some("tok"),
                session_cookie: None,
                basic_auth: None,
            },
        );
        assert_eq!(1, via_token.unwrap());

        let via_basic_token = authenticate(
            log,
            conn,
            &store,
            &Credentials {
                path_username: "alice",
                token_header: None,
                session_cookie: None,
                basic_auth: Some(("alice", "tok")),
            },
        );
        assert_eq!(1, via_basic_token.unwrap());

        let via_basic_password = authenticate(
            log,
            conn,
            &store,
            &Credentials {
                path_username: "alice",
                token_header: None,
                session_cookie: None,
                basic_auth: Some(("alice", "correcthorse")),
            },
        );
        assert_eq!(1, via_basic_password.unwrap());

        let wrong_password = authenticate(
            log,
            conn,
            &store,
            &Credentials {
                path_username: "alice",
                token_header: None,
                session_cookie: None,
                basic_auth: Some(("alice", "wrong")),
            },
        );
        assert!(wrong_password.is_err());
    }

    #[test]
    fn test_forbidden_when_sync_disabled() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let store = fixture_store(1, SyncMode::None);

        let result = authenticate(
            log,
            conn,
            &store,
            &Credentials {
                path_username: "alice",
                token_header: Some("tok"),
                session_cookie: None,
                basic_auth: None,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_login_then_session_cookie_path() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);
        let store = fixture_store(user.user_id, SyncMode::Internal);

        let token = Login {
            user_id:    user.user_id,
            user_agent: None,
            client_ip:  None,
        }
        .run(log, conn)
        .unwrap();
        assert_eq!(TOKEN_LENGTH, token.len());

        let result = authenticate(
            log,
            conn,
            &store,
            &Credentials {
                path_username: "alice",
                token_header: None,
                session_cookie: Some(&token),
                basic_auth: None,
            },
        );
        assert_eq!(user.user_id, result.unwrap());

        logout(conn, &token).unwrap();
        let after_logout = validate_session(conn, &token).unwrap();
        assert!(after_logout.is_none());

        // Logout is idempotent.
        assert!(logout(conn, &token).is_ok());
    }
}
