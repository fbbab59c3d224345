//! The boundary between this core and user/credential storage.
//!
//! Credential storage and password hashing belong to the host application --
//! this core only ever reads a user's sync-relevant projection
//! `(userID, syncEnabled, passwordHash, apiToken)` and verifies a candidate
//! password against the hash with a fixed KDF (scrypt, matching the host's
//! existing choice of KDF family). The trait here is the narrow interface;
//! `LiveUserStore` is the thin Diesel-backed implementation against the
//! host's `users` table (read-only from this core's point of view), and
//! `PassThroughUserStore` is the in-memory fixture used by tests, following
//! the Factory/Live/PassThrough shape the host uses for `url_fetcher` and
//! `http_requester`.

use crate::errors::*;

use diesel::pg::PgConnection;
use diesel::prelude::*;
use scrypt::password_hash::{PasswordHash, PasswordVerifier};
use scrypt::Scrypt;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncMode {
    None,
    Internal,
    External,
    Both,
}

impl SyncMode {
    pub fn permits_gpodder(&self) -> bool {
        matches!(self, SyncMode::Internal | SyncMode::External | SyncMode::Both)
    }

    pub fn from_db(raw: &str) -> SyncMode {
        match raw {
            "internal" => SyncMode::Internal,
            "external" => SyncMode::External,
            "both" => SyncMode::Both,
            _ => SyncMode::None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct UserRecord {
    pub user_id:       i64,
    pub username:      String,
    pub password_hash: String,
    pub api_token:     Option<String>,
    pub sync_mode:     SyncMode,
}

pub trait UserStore: Send + Sync {
    /// Looks up a user by username, case-insensitively, as required by
    /// §4.1's "matches the authenticated user case-insensitively" rule.
    ///
    /// Takes the request's own connection: the host and this core share one
    /// database, so a "live" implementation reads the host's `users` table
    /// over the same connection rather than opening a second one.
    fn find_by_username(&self, conn: &mut PgConnection, username: &str) -> Result<Option<UserRecord>>;

    /// Verifies `candidate` against `record.password_hash` using the fixed
    /// KDF. Never returns an error for a merely-wrong password -- only for
    /// a malformed stored hash, which is a backend condition.
    fn verify_password(&self, record: &UserRecord, candidate: &str) -> Result<bool>;
}

table! {
    users (id) {
        id -> Int8,
        username -> Text,
        password_hash -> Text,
        api_token -> Nullable<Text>,
        sync_mode -> Text,
    }
}

pub struct LiveUserStore;

impl UserStore for LiveUserStore {
    fn find_by_username(&self, conn: &mut PgConnection, username: &str) -> Result<Option<UserRecord>> {
        let row: Option<(i64, String, String, Option<String>, String)> = users::table
            .filter(
                diesel::dsl::sql::<diesel::sql_types::Bool>("lower(username) = lower(")
                    .bind::<diesel::sql_types::Text, _>(username.to_owned())
                    .sql(")"),
            )
            .select((
                users::id,
                users::username,
                users::password_hash,
                users::api_token,
                users::sync_mode,
            ))
            .first(conn)
            .optional()
            .chain_err(|| "error looking up user")?;

        Ok(row.map(|(user_id, username, password_hash, api_token, sync_mode)| UserRecord {
            user_id,
            username,
            password_hash,
            api_token,
            sync_mode: SyncMode::from_db(&sync_mode),
        }))
    }

    fn verify_password(&self, record: &UserRecord, candidate: &str) -> Result<bool> {
        verify_scrypt(&record.password_hash, candidate)
    }
}

fn verify_scrypt(stored_hash: &str, candidate: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| error::invalid_input(format!("malformed password hash: {}", e)))?;
    Ok(Scrypt.verify_password(candidate.as_bytes(), &parsed).is_ok())
}

/// In-memory fixture store for tests: a fixed map of username -> record,
/// plaintext-equal-to-hash for simplicity (tests never exercise the real
/// KDF, only the auth-path branching that consumes `UserStore`).
pub struct PassThroughUserStore {
    records: Mutex<HashMap<String, (UserRecord, String)>>,
}

impl PassThroughUserStore {
    pub fn new() -> Self {
        PassThroughUserStore {
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, record: UserRecord, password: &str) {
        self.records
            .lock()
            .unwrap()
            .insert(record.username.to_lowercase(), (record, password.to_owned()));
    }
}

impl Default for PassThroughUserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStore for PassThroughUserStore {
    fn find_by_username(&self, _conn: &mut PgConnection, username: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&username.to_lowercase())
            .map(|(record, _)| record.clone()))
    }

    fn verify_password(&self, record: &UserRecord, candidate: &str) -> Result<bool> {
        let records = self.records.lock().unwrap();
        Ok(records
            .get(&record.username.to_lowercase())
            .map(|(_, password)| password == candidate)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (PassThroughUserStore, UserRecord) {
        let store = PassThroughUserStore::new();
        let record = UserRecord {
            user_id:       1,
            username:      "alice".to_owned(),
            password_hash: "irrelevant".to_owned(),
            api_token:     Some("tok".to_owned()),
            sync_mode:     SyncMode::Internal,
        };
        store.insert(record.clone(), "correcthorse");
        (store, record)
    }

    #[test]
    fn test_find_by_username_case_insensitive() {
        let (store, _) = fixture();
        let mut conn = crate::test_helpers::connection();
        assert!(store.find_by_username(&mut conn, "ALICE").unwrap().is_some());
    }

    #[test]
    fn test_verify_password() {
        let (store, record) = fixture();
        assert!(store.verify_password(&record, "correcthorse").unwrap());
        assert!(!store.verify_password(&record, "wrong").unwrap());
    }

    #[test]
    fn test_sync_mode_permits_gpodder() {
        assert!(!SyncMode::None.permits_gpodder());
        assert!(SyncMode::Internal.permits_gpodder());
        assert!(SyncMode::External.permits_gpodder());
        assert!(SyncMode::Both.permits_gpodder());
    }
}
