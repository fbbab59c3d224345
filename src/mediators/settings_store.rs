//! `SettingsStore` (§4.5): scoped key/value storage with per-scope locator
//! rules and per-key value validation.
//!
//! Grounded on `setting`'s upsert-by-identity shape, which mirrors
//! `account_podcast_subscriber`'s `ON CONFLICT` idiom applied to the
//! composite identity described in §3 ("the tuple of non-null locators for
//! a given scope is the setting's identity").

use crate::errors::*;
use crate::model::insertable;
use crate::schema::setting;
use crate::time_helpers;

use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use slog::Logger;
use std::collections::HashMap;

pub const MAX_KEY_LEN: usize = 255;
pub const MAX_VALUE_BYTES: usize = 8_192;
pub const MAX_BATCH_ENTRIES: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Account,
    Device,
    Podcast,
    Episode,
}

impl Scope {
    pub fn from_str(s: &str) -> Result<Scope> {
        match s {
            "account" => Ok(Scope::Account),
            "device" => Ok(Scope::Device),
            "podcast" => Ok(Scope::Podcast),
            "episode" => Ok(Scope::Episode),
            other => Err(error::invalid_input(format!("unrecognized scope: {}", other)).into()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Account => "account",
            Scope::Device => "device",
            Scope::Podcast => "podcast",
            Scope::Episode => "episode",
        }
    }
}

/// The locator tuple a scope's identity is built from, per §4.5's scope
/// matrix. Validated against the table before anything is written/read.
#[derive(Clone, Debug, Default)]
pub struct Locators {
    pub device_id:   Option<i64>,
    pub podcast_url: Option<String>,
    pub episode_url: Option<String>,
}

impl Locators {
    /// Checks the scope matrix: each scope requires exactly the locators
    /// listed and forbids the rest.
    pub fn validate(&self, scope: Scope) -> Result<()> {
        let (requires_device, requires_podcast, requires_episode) = match scope {
            Scope::Account => (false, false, false),
            Scope::Device => (true, false, false),
            Scope::Podcast => (false, true, false),
            Scope::Episode => (false, true, true),
        };

        if requires_device != self.device_id.is_some() {
            return Err(error::invalid_input(format!(
                "scope {} {} a device locator",
                scope.as_str(),
                if requires_device { "requires" } else { "forbids" }
            ))
            .into());
        }
        if requires_podcast != self.podcast_url.is_some() {
            return Err(error::invalid_input(format!(
                "scope {} {} a podcast locator",
                scope.as_str(),
                if requires_podcast { "requires" } else { "forbids" }
            ))
            .into());
        }
        if requires_episode != self.episode_url.is_some() {
            return Err(error::invalid_input(format!(
                "scope {} {} an episode locator",
                scope.as_str(),
                if requires_episode { "requires" } else { "forbids" }
            ))
            .into());
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
enum ValueKind {
    Bool,
    NonNegativeInt,
    BoundedInt(i64, i64),
    Enum(&'static [&'static str]),
}

fn key_rules(key: &str) -> Option<ValueKind> {
    Some(match key {
        "public_profile" | "is_favorite" | "auto_download" | "wifi_only_downloads"
        | "public_subscription" | "played" | "store_user_agent" | "public_subscriptions"
        | "default_subscribe_all" | "auto_update" => ValueKind::Bool,
        "current_position" => ValueKind::NonNegativeInt,
        "update_interval" => ValueKind::BoundedInt(10, 1440),
        "max_episodes_per_feed" => ValueKind::BoundedInt(1, 1000),
        "color_theme" => ValueKind::Enum(&["light", "dark", "system"]),
        "episode_sort" => ValueKind::Enum(&["newest_first", "oldest_first", "title"]),
        _ => return None,
    })
}

fn validate_key_value(key: &str, value: &Value) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(error::invalid_input(format!("key length out of bounds: {}", key)).into());
    }
    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(error::invalid_input(format!("key contains invalid characters: {}", key)).into());
    }

    let serialized = serde_json::to_vec(value).chain_err(|| "error serializing setting value")?;
    if serialized.len() > MAX_VALUE_BYTES {
        return Err(error::invalid_input(format!("value too large for key: {}", key)).into());
    }

    match key_rules(key) {
        Some(ValueKind::Bool) => {
            if !value.is_boolean() {
                return Err(error::invalid_input(format!("{} must be a boolean", key)).into());
            }
        }
        Some(ValueKind::NonNegativeInt) => match value.as_i64() {
            Some(n) if n >= 0 => {}
            _ => return Err(error::invalid_input(format!("{} must be a non-negative integer", key)).into()),
        },
        Some(ValueKind::BoundedInt(min, max)) => match value.as_i64() {
            Some(n) if n >= min && n <= max => {}
            _ => {
                return Err(error::invalid_input(format!(
                    "{} must be an integer in [{}, {}]",
                    key, min, max
                ))
                .into())
            }
        },
        Some(ValueKind::Enum(allowed)) => match value.as_str() {
            Some(s) if allowed.contains(&s) => {}
            _ => return Err(error::invalid_input(format!("{} must be one of {:?}", key, allowed)).into()),
        },
        // A key with no registered validator is accepted unvalidated,
        // subject only to the generic key-format/length/value-size checks
        // already performed above -- clients are free to stash custom
        // settings this store doesn't know the shape of.
        None => {}
    }

    Ok(())
}

/// Applies `{set, remove}` against a scope/locator and returns the full
/// current map for that scope/locator (§4.5's write contract). An empty
/// `{set: {}, remove: []}` body is a no-op read of the current map.
pub struct Writer {
    pub user_id:   i64,
    pub scope:     Scope,
    pub locators:  Locators,
    pub set:       HashMap<String, Value>,
    pub remove:    Vec<String>,
}

impl Writer {
    pub fn run(&self, log: &Logger, conn: &mut PgConnection) -> Result<HashMap<String, Value>> {
        self.locators.validate(self.scope)?;

        if self.set.len() + self.remove.len() > MAX_BATCH_ENTRIES {
            return Err(error::invalid_input(format!(
                "at most {} set/remove entries are accepted per request",
                MAX_BATCH_ENTRIES
            ))
            .into());
        }

        for (key, value) in &self.set {
            validate_key_value(key, value)?;
        }
        for key in &self.remove {
            if key.is_empty() || key.len() > MAX_KEY_LEN {
                return Err(error::invalid_input(format!("key length out of bounds: {}", key)).into());
            }
        }

        time_helpers::log_timed(&log.new(o!("step" => file!())), |_log| {
            conn.transaction::<_, Error, _>(|conn| self.run_inner(conn))
        })
    }

    fn run_inner(&self, conn: &mut PgConnection) -> Result<HashMap<String, Value>> {
        let now = Utc::now();

        for (key, value) in &self.set {
            let value_json = serde_json::to_string(value).chain_err(|| "error serializing setting value")?;
            upsert_one(conn, self.user_id, self.scope, &self.locators, key, &value_json, now)?;
        }

        for key in &self.remove {
            delete_one(conn, self.user_id, self.scope, &self.locators, key)?;
        }

        read_map(conn, self.user_id, self.scope, &self.locators)
    }
}

fn upsert_one(
    conn: &mut PgConnection,
    user_id: i64,
    scope: Scope,
    locators: &Locators,
    key: &str,
    value_json: &str,
    now: chrono::DateTime<Utc>,
) -> Result<()> {
    let existing: Option<i64> = scoped_query(user_id, scope, locators)
        .filter(setting::key.eq(key))
        .select(setting::id)
        .first(conn)
        .optional()
        .chain_err(|| "error checking existing setting")?;

    if let Some(id) = existing {
        diesel::update(setting::table.filter(setting::id.eq(id)))
            .set((setting::value_json.eq(value_json), setting::updated_at.eq(now)))
            .execute(conn)
            .chain_err(|| "error updating setting")?;
    } else {
        diesel::insert_into(setting::table)
            .values(&insertable::Setting {
                user_id,
                scope: scope.as_str().to_owned(),
                device_id: locators.device_id,
                podcast_url: locators.podcast_url.clone(),
                episode_url: locators.episode_url.clone(),
                key: key.to_owned(),
                value_json: value_json.to_owned(),
                updated_at: now,
            })
            .execute(conn)
            .chain_err(|| "error inserting setting")?;
    }
    Ok(())
}

fn delete_one(conn: &mut PgConnection, user_id: i64, scope: Scope, locators: &Locators, key: &str) -> Result<()> {
    diesel::delete(scoped_query(user_id, scope, locators).filter(setting::key.eq(key)))
        .execute(conn)
        .chain_err(|| "error removing setting")?;
    Ok(())
}

/// Reads the full current map for a scope/locator.
pub fn read_map(
    conn: &mut PgConnection,
    user_id: i64,
    scope: Scope,
    locators: &Locators,
) -> Result<HashMap<String, Value>> {
    let rows: Vec<(String, String)> = scoped_query(user_id, scope, locators)
        .select((setting::key, setting::value_json))
        .load(conn)
        .chain_err(|| "error reading settings")?;

    rows.into_iter()
        .map(|(key, value_json)| {
            serde_json::from_str(&value_json)
                .map(|v| (key, v))
                .chain_err(|| "error deserializing stored setting value")
        })
        .collect()
}

/// "all episodes with `episode`-scoped `is_favorite = true` for this
/// user" -- §4.5's definition of favorites, implemented as a direct query
/// rather than a separate mediator.
pub fn favorites(conn: &mut PgConnection, user_id: i64) -> Result<Vec<(String, String)>> {
    let rows: Vec<(Option<String>, Option<String>, String)> = setting::table
        .filter(setting::user_id.eq(user_id))
        .filter(setting::scope.eq("episode"))
        .filter(setting::key.eq("is_favorite"))
        .select((setting::podcast_url, setting::episode_url, setting::value_json))
        .load(conn)
        .chain_err(|| "error loading favorites")?;

    Ok(rows
        .into_iter()
        .filter(|(_, _, value_json)| value_json == "true")
        .filter_map(|(podcast_url, episode_url, _)| Some((podcast_url?, episode_url?)))
        .collect())
}

fn scoped_query<'a>(
    user_id: i64,
    scope: Scope,
    locators: &Locators,
) -> diesel::query_builder::BoxedSelectStatement<'a, setting::SqlType, setting::table, diesel::pg::Pg> {
    let mut query = setting::table
        .filter(setting::user_id.eq(user_id))
        .filter(setting::scope.eq(scope.as_str().to_owned()))
        .into_boxed();

    query = match locators.device_id {
        Some(id) => query.filter(setting::device_id.eq(id)),
        None => query.filter(setting::device_id.is_null()),
    };
    query = match &locators.podcast_url {
        Some(url) => query.filter(setting::podcast_url.eq(url.clone())),
        None => query.filter(setting::podcast_url.is_null()),
    };
    query = match &locators.episode_url {
        Some(url) => query.filter(setting::episode_url.eq(url.clone())),
        None => query.filter(setting::episode_url.is_null()),
    };

    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_data;
    use crate::test_helpers;
    use serde_json::json;

    #[test]
    fn test_s4_scope_guard() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);

        let mut set = HashMap::new();
        set.insert("is_favorite".to_owned(), json!(true));

        let ok = Writer {
            user_id: user.user_id,
            scope: Scope::Episode,
            locators: Locators {
                device_id: None,
                podcast_url: Some("https://p/a".to_owned()),
                episode_url: Some("https://p/a/e1".to_owned()),
            },
            set: set.clone(),
            remove: vec![],
        }
        .run(log, conn);
        assert!(ok.is_ok());

        let missing_episode = Writer {
            user_id: user.user_id,
            scope: Scope::Episode,
            locators: Locators {
                device_id: None,
                podcast_url: Some("https://p/a".to_owned()),
                episode_url: None,
            },
            set: set.clone(),
            remove: vec![],
        }
        .run(log, conn);
        assert!(missing_episode.is_err());

        let extra_device = Writer {
            user_id: user.user_id,
            scope: Scope::Episode,
            locators: Locators {
                device_id: Some(1),
                podcast_url: Some("https://p/a".to_owned()),
                episode_url: Some("https://p/a/e1".to_owned()),
            },
            set,
            remove: vec![],
        }
        .run(log, conn);
        assert!(extra_device.is_err());
    }

    #[test]
    fn test_rejects_out_of_range_bounded_int() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);

        let mut set = HashMap::new();
        set.insert("update_interval".to_owned(), json!(5));

        let result = Writer {
            user_id: user.user_id,
            scope: Scope::Account,
            locators: Locators::default(),
            set,
            remove: vec![],
        }
        .run(log, conn);
        assert!(result.is_err());
    }

    #[test]
    fn test_accepts_unrecognized_key_unvalidated() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);

        let mut set = HashMap::new();
        set.insert("custom_client_setting".to_owned(), json!("anything"));

        let map = Writer {
            user_id: user.user_id,
            scope: Scope::Account,
            locators: Locators::default(),
            set,
            remove: vec![],
        }
        .run(log, conn)
        .unwrap();
        assert_eq!(Some(&json!("anything")), map.get("custom_client_setting"));
    }

    #[test]
    fn test_upsert_replaces_prior_value_and_remove_deletes() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);

        let mut set = HashMap::new();
        set.insert("color_theme".to_owned(), json!("dark"));
        let map = Writer {
            user_id: user.user_id,
            scope: Scope::Account,
            locators: Locators::default(),
            set,
            remove: vec![],
        }
        .run(log, conn)
        .unwrap();
        assert_eq!(Some(&json!("dark")), map.get("color_theme"));

        let mut set2 = HashMap::new();
        set2.insert("color_theme".to_owned(), json!("light"));
        let map2 = Writer {
            user_id: user.user_id,
            scope: Scope::Account,
            locators: Locators::default(),
            set: set2,
            remove: vec![],
        }
        .run(log, conn)
        .unwrap();
        assert_eq!(Some(&json!("light")), map2.get("color_theme"));

        let map3 = Writer {
            user_id: user.user_id,
            scope: Scope::Account,
            locators: Locators::default(),
            set: HashMap::new(),
            remove: vec!["color_theme".to_owned()],
        }
        .run(log, conn)
        .unwrap();
        assert!(!map3.contains_key("color_theme"));
    }
}
