//! `EpisodeActionEngine` (§4.4): the append-only playback-event log and its
//! paginated/aggregated projections.
//!
//! Grounded on `account_podcast_episode_upserter`'s per-episode upsert for
//! the "update the host's listen-history row" side effect, and on
//! `subscription_engine`'s append-only-log shape for the action log itself.

use crate::errors::*;
use crate::mediators::device_registry;
use crate::model::insertable;
use crate::schema::{episode, episode_action, listen_history, podcast};
use crate::time_helpers;
use crate::url_canonicalizer::{self, Canonicalized};

use chrono::{DateTime, TimeZone, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use slog::Logger;

pub const READ_CAP: i64 = 25_000;

#[derive(Clone, Debug, Deserialize)]
pub struct ActionInput {
    pub podcast:   String,
    pub episode:   String,
    pub device:    Option<String>,
    pub action:    String,
    pub timestamp: Option<serde_json::Value>,
    pub started:   Option<i32>,
    pub position:  Option<i32>,
    pub total:     Option<i32>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ActionOutput {
    pub podcast:   String,
    pub episode:   String,
    pub device:    Option<String>,
    pub action:    String,
    pub timestamp: i64,
    pub started:   Option<i32>,
    pub position:  Option<i32>,
    pub total:     Option<i32>,
}

pub const VALID_ACTIONS: &[&str] = &["download", "play", "delete", "flattr", "new"];

/// Appends a batch of episode actions (§4.4's "Append actions"). Rows
/// failing the non-empty `podcast`/`episode`/`action` check abort the
/// whole batch; URLs that fail canonicalization are skipped-and-logged
/// per §7, not treated as a hard error.
pub struct Appender {
    pub user_id: i64,
    pub actions: Vec<ActionInput>,
}

pub struct AppendResult {
    pub timestamp:   i64,
    pub update_urls: Vec<(String, String)>,
}

impl Appender {
    pub fn run(&self, log: &Logger, conn: &mut PgConnection) -> Result<AppendResult> {
        for a in &self.actions {
            if a.podcast.trim().is_empty() || a.episode.trim().is_empty() || a.action.trim().is_empty() {
                return Err(error::invalid_input(
                    "each action requires non-empty podcast, episode, and action",
                )
                .into());
            }
            if !VALID_ACTIONS.contains(&a.action.as_str()) {
                return Err(error::invalid_input(format!("unrecognized action: {}", a.action)).into());
            }
        }

        let started_at = Utc::now().timestamp();

        time_helpers::log_timed(&log.new(o!("step" => file!())), |log| {
            conn.transaction::<_, Error, _>(|conn| self.run_inner(log, conn, started_at))
        })
    }

    fn run_inner(&self, log: &Logger, conn: &mut PgConnection, started_at: i64) -> Result<AppendResult> {
        let mut update_urls = Vec::new();

        for a in &self.actions {
            let podcast_c = match url_canonicalizer::canonicalize(&a.podcast) {
                Some(c) => c,
                None => {
                    warn!(log, "skipping action with invalid podcast URL"; "url" => a.podcast.as_str());
                    continue;
                }
            };
            let episode_c = match url_canonicalizer::canonicalize(&a.episode) {
                Some(c) => c,
                None => {
                    warn!(log, "skipping action with invalid episode URL"; "url" => a.episode.as_str());
                    continue;
                }
            };
            push_if_rewritten(&mut update_urls, &podcast_c);
            push_if_rewritten(&mut update_urls, &episode_c);

            let device_id = match &a.device {
                Some(name) => Some(device_registry::ensure_device(log, conn, self.user_id, name)?.id),
                None => None,
            };

            let ts = parse_timestamp(a.timestamp.as_ref(), started_at);

            diesel::insert_into(episode_action::table)
                .values(&insertable::EpisodeAction {
                    user_id: self.user_id,
                    device_id,
                    podcast_url: podcast_c.canonical.clone(),
                    episode_url: episode_c.canonical.clone(),
                    action: a.action.clone(),
                    ts,
                    started: a.started,
                    position: a.position,
                    total: a.total,
                })
                .execute(conn)
                .chain_err(|| "error appending episode action")?;

            if a.action == "play" {
                if let Some(position) = a.position {
                    if position > 0 {
                        upsert_listen_history(
                            conn,
                            self.user_id,
                            &podcast_c.canonical,
                            &episode_c.canonical,
                            position,
                            ts,
                        )?;
                    }
                }
            }
        }

        Ok(AppendResult {
            timestamp: started_at,
            update_urls,
        })
    }
}

fn push_if_rewritten(update_urls: &mut Vec<(String, String)>, c: &Canonicalized) {
    if c.was_rewritten() {
        update_urls.push((c.original.clone(), c.canonical.clone()));
    }
}

/// Best-effort side effect: when a `play` action carries a positive
/// position and the `(podcast, episode)` pair resolves to a known episode
/// in the host catalog for this user, upsert the host's listen-history
/// row. Failure here must not abort the action append (§7), so the caller
/// logs and continues rather than propagating.
fn upsert_listen_history(
    conn: &mut PgConnection,
    user_id: i64,
    podcast_url: &str,
    episode_url: &str,
    position: i32,
    ts: i64,
) -> Result<()> {
    let episode_id: Option<i64> = episode::table
        .inner_join(podcast::table)
        .filter(podcast::user_id.eq(user_id))
        .filter(podcast::feed_url.eq(podcast_url))
        .filter(episode::episode_url.eq(episode_url))
        .select(episode::id)
        .first(conn)
        .optional()
        .chain_err(|| "error resolving episode for listen history")?;

    let Some(episode_id) = episode_id else {
        return Ok(());
    };

    let updated_at = Utc
        .timestamp_opt(ts, 0)
        .single()
        .unwrap_or_else(Utc::now);

    diesel::insert_into(listen_history::table)
        .values(&insertable::ListenHistory {
            user_id,
            episode_id,
            position_seconds: position,
            updated_at,
        })
        .on_conflict((listen_history::user_id, listen_history::episode_id))
        .do_update()
        .set((
            listen_history::position_seconds.eq(position),
            listen_history::updated_at.eq(updated_at),
        ))
        .execute(conn)
        .chain_err(|| "error upserting listen history")?;

    Ok(())
}

/// Accepts integer Unix seconds or common ISO-8601 forms; anything else
/// (missing, malformed) degrades to `now` per §3/§9's "flexible timestamp
/// parsing" design note.
fn parse_timestamp(value: Option<&serde_json::Value>, now: i64) -> i64 {
    match value {
        None => now,
        Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(now),
        Some(serde_json::Value::String(s)) => parse_timestamp_str(s).unwrap_or(now),
        Some(_) => now,
    }
}

fn parse_timestamp_str(s: &str) -> Option<i64> {
    if let Ok(unix) = s.parse::<i64>() {
        return Some(unix);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    for fmt in &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().timestamp());
        }
    }
    None
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadMode {
    Aggregated,
    NonAggregated,
}

/// Reads episode actions since `since`, optionally filtered by podcast
/// and/or device, aggregated or not (§4.4's "Read actions").
pub fn read(
    conn: &mut PgConnection,
    user_id: i64,
    since: i64,
    podcast_filter: Option<&str>,
    device_filter: Option<&str>,
    mode: ReadMode,
) -> Result<(Vec<ActionOutput>, i64)> {
    let max_ts: Option<i64> = episode_action::table
        .filter(episode_action::user_id.eq(user_id))
        .select(diesel::dsl::max(episode_action::ts))
        .first(conn)
        .chain_err(|| "error computing max timestamp")?;
    let timestamp = max_ts.unwrap_or_else(|| Utc::now().timestamp());

    let device_id = match device_filter {
        Some(name) => crate::mediators::subscription_engine::device_id_for_name(conn, user_id, name)?,
        None => None,
    };
    if device_filter.is_some() && device_id.is_none() {
        return Ok((Vec::new(), timestamp));
    }

    type Row = (i64, Option<i64>, String, String, String, i64, Option<i32>, Option<i32>, Option<i32>);

    let mut query = episode_action::table
        .filter(episode_action::user_id.eq(user_id))
        .filter(episode_action::ts.gt(since))
        .into_boxed();

    if let Some(p) = podcast_filter {
        query = query.filter(episode_action::podcast_url.eq(p.to_owned()));
    }
    if let Some(d) = device_id {
        query = query.filter(episode_action::device_id.eq(d));
    }

    let rows: Vec<Row> = query
        .order(episode_action::ts.asc())
        .select((
            episode_action::id,
            episode_action::device_id,
            episode_action::podcast_url,
            episode_action::episode_url,
            episode_action::action,
            episode_action::ts,
            episode_action::started,
            episode_action::position,
            episode_action::total,
        ))
        .limit(READ_CAP)
        .load(conn)
        .chain_err(|| "error loading episode actions")?;

    let device_names = load_device_names(conn, user_id)?;

    let outputs: Vec<ActionOutput> = rows
        .into_iter()
        .map(|(_, device_id, podcast_url, episode_url, action, ts, started, position, total)| {
            ActionOutput {
                podcast: podcast_url,
                episode: episode_url,
                device: device_id.and_then(|id| device_names.get(&id).cloned()),
                action,
                timestamp: ts,
                started,
                position,
                total,
            }
        })
        .collect();

    let result = match mode {
        ReadMode::NonAggregated => outputs,
        ReadMode::Aggregated => {
            let aggregated = crate::delta::aggregate_latest_per_episode(
                &outputs,
                |o| (o.podcast.clone(), o.episode.clone()),
                |o| o.timestamp,
            );
            let mut aggregated = aggregated;
            aggregated.truncate(READ_CAP as usize);
            aggregated
        }
    };

    Ok((result, timestamp))
}

fn load_device_names(
    conn: &mut PgConnection,
    user_id: i64,
) -> Result<std::collections::HashMap<i64, String>> {
    use crate::schema::device;
    let rows: Vec<(i64, String)> = device::table
        .filter(device::user_id.eq(user_id))
        .select((device::id, device::name))
        .load(conn)
        .chain_err(|| "error loading device names")?;
    Ok(rows.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_data;
    use crate::test_helpers;

    fn input(podcast: &str, episode: &str, action: &str, position: Option<i32>) -> ActionInput {
        ActionInput {
            podcast: podcast.to_owned(),
            episode: episode.to_owned(),
            device: None,
            action: action.to_owned(),
            timestamp: None,
            started: None,
            position,
            total: None,
        }
    }

    #[test]
    fn test_s3_aggregation() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);

        Appender {
            user_id: user.user_id,
            actions: vec![input("https://p/a", "https://p/a/e1", "play", Some(30))],
        }
        .run(log, conn)
        .unwrap();
        Appender {
            user_id: user.user_id,
            actions: vec![input("https://p/a", "https://p/a/e1", "play", Some(120))],
        }
        .run(log, conn)
        .unwrap();

        let (aggregated, _) = read(conn, user.user_id, 0, None, None, ReadMode::Aggregated).unwrap();
        assert_eq!(1, aggregated.len());
        assert_eq!(Some(120), aggregated[0].position);

        let (non_aggregated, _) = read(conn, user.user_id, 0, None, None, ReadMode::NonAggregated).unwrap();
        assert_eq!(2, non_aggregated.len());
        assert!(non_aggregated[0].timestamp <= non_aggregated[1].timestamp);
    }

    #[test]
    fn test_rejects_empty_fields() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);

        let result = Appender {
            user_id: user.user_id,
            actions: vec![input("", "https://p/a/e1", "play", None)],
        }
        .run(log, conn);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_timestamp_iso8601_and_unix() {
        assert_eq!(Some(1_000), parse_timestamp_str("1000"));
        assert!(parse_timestamp_str("2016-06-17T14:52:04Z").is_some());
        assert!(parse_timestamp_str("2016-06-17 14:52:04").is_some());
        assert_eq!(None, parse_timestamp_str("not-a-timestamp"));
    }

    #[test]
    fn test_play_action_upserts_listen_history_when_episode_known() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);
        let podcast_row = test_data::podcast::insert(log, conn, user.user_id);
        let episode_row: crate::model::Episode = diesel::insert_into(episode::table)
            .values(&insertable::Episode {
                podcast_id: podcast_row.id,
                user_id: user.user_id,
                episode_url: "https://p/a/e1".to_owned(),
                guid: None,
                title: None,
                published_at: None,
            })
            .get_result(conn)
            .unwrap();

        Appender {
            user_id: user.user_id,
            actions: vec![input(&podcast_row.feed_url, &episode_row.episode_url, "play", Some(99))],
        }
        .run(log, conn)
        .unwrap();

        let history: crate::model::ListenHistory = listen_history::table
            .filter(listen_history::episode_id.eq(episode_row.id))
            .first(conn)
            .unwrap();
        assert_eq!(99, history.position_seconds);
    }
}
