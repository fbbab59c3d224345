//! `SubscriptionEngine` (§4.3): the append-only subscription log, its
//! projection onto the host's podcast catalog mirror, and the cascade
//! delete that keeps that mirror referentially intact on unsubscribe
//! (§4.9).
//!
//! Grounded on `account_podcast_subscriber`'s upsert-by-unique-key idiom for
//! the catalog row, generalized to a log-backed model: every subscribe/
//! unsubscribe additionally appends a `subscription_event` row, and the
//! "current state" the mediator computes a diff against is read from the
//! catalog mirror rather than a dedicated flag column.

use crate::errors::*;
use crate::feed_fetcher::FeedFetcher;
use crate::model;
use crate::model::insertable;
use crate::schema::{
    device, download_state, episode, episode_action, episode_favorite, listen_history,
    playlist_entry, podcast, subscription_event,
};
use crate::time_helpers;
use crate::url_canonicalizer::{self, Canonicalized};

use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use slog::Logger;
use std::collections::HashSet;

pub const MAX_URLS_PER_REQUEST: usize = 5_000;

/// Replaces the user's complete subscription set for `device` with the
/// given URLs (§4.3's "PUT full set").
pub struct Putter<'a> {
    pub user_id:      i64,
    pub device_id:    i64,
    pub urls:         Vec<String>,
    pub feed_fetcher: &'a dyn FeedFetcher,
}

pub struct PutResult {
    pub update_urls: Vec<(String, String)>,
}

impl<'a> Putter<'a> {
    pub fn run(&self, log: &Logger, conn: &mut PgConnection) -> Result<PutResult> {
        if self.urls.len() > MAX_URLS_PER_REQUEST {
            return Err(error::invalid_input(format!(
                "at most {} URLs are accepted per request",
                MAX_URLS_PER_REQUEST
            ))
            .into());
        }

        time_helpers::log_timed(&log.new(o!("step" => file!())), |log| {
            conn.transaction::<_, Error, _>(|conn| self.run_inner(log, conn))
        })
    }

    fn run_inner(&self, log: &Logger, conn: &mut PgConnection) -> Result<PutResult> {
        let canonicalized = canonicalize_skip_invalid(log, &self.urls);
        let update_urls = url_canonicalizer::update_url_pairs(&canonicalized);
        let desired: HashSet<String> = canonicalized.iter().map(|c| c.canonical.clone()).collect();

        let current: HashSet<String> = current_set(conn, self.user_id)?.into_iter().collect();

        let to_add: Vec<&String> = desired.difference(&current).collect();
        let to_remove: Vec<&String> = current.difference(&desired).collect();

        let ts = Utc::now().timestamp();

        for url in &to_add {
            append_event(conn, self.user_id, self.device_id, url, true, ts)?;
            ensure_podcast_row(log, conn, self.user_id, url, self.feed_fetcher)?;
        }
        for url in &to_remove {
            append_event(conn, self.user_id, self.device_id, url, false, ts)?;
            cascade_remove_podcast(conn, self.user_id, url)?;
        }

        Ok(PutResult { update_urls })
    }
}

/// Applies `{add, remove}` against the user's subscription set (§4.3's
/// "POST delta"). Rejects the whole request if a URL appears in both
/// lists; otherwise invalid URLs are individually skipped-and-logged.
pub struct Updater<'a> {
    pub user_id:      i64,
    pub device_id:    i64,
    pub add:          Vec<String>,
    pub remove:       Vec<String>,
    pub feed_fetcher: &'a dyn FeedFetcher,
}

pub struct UpdateResult {
    pub timestamp:   i64,
    pub update_urls: Vec<(String, String)>,
}

impl<'a> Updater<'a> {
    pub fn run(&self, log: &Logger, conn: &mut PgConnection) -> Result<UpdateResult> {
        if self.add.len() + self.remove.len() > MAX_URLS_PER_REQUEST {
            return Err(error::invalid_input(format!(
                "at most {} URLs are accepted per request",
                MAX_URLS_PER_REQUEST
            ))
            .into());
        }

        let add_set: HashSet<&str> = self.add.iter().map(String::as_str).collect();
        for url in &self.remove {
            if add_set.contains(url.as_str()) {
                return Err(error::invalid_input(format!(
                    "url present in both add and remove: {}",
                    url
                ))
                .into());
            }
        }

        time_helpers::log_timed(&log.new(o!("step" => file!())), |log| {
            conn.transaction::<_, Error, _>(|conn| self.run_inner(log, conn))
        })
    }

    fn run_inner(&self, log: &Logger, conn: &mut PgConnection) -> Result<UpdateResult> {
        let adds = canonicalize_skip_invalid(log, &self.add);
        let removes = canonicalize_skip_invalid(log, &self.remove);

        let mut update_urls = url_canonicalizer::update_url_pairs(&adds);
        update_urls.extend(url_canonicalizer::update_url_pairs(&removes));

        let ts = Utc::now().timestamp();

        for c in &adds {
            append_event(conn, self.user_id, self.device_id, &c.canonical, true, ts)?;
            ensure_podcast_row(log, conn, self.user_id, &c.canonical, self.feed_fetcher)?;
        }
        for c in &removes {
            append_event(conn, self.user_id, self.device_id, &c.canonical, false, ts)?;
            cascade_remove_podcast(conn, self.user_id, &c.canonical)?;
        }

        Ok(UpdateResult { timestamp: ts, update_urls })
    }
}

/// GET current set (§4.3): every `feed_url` currently in the user's
/// catalog mirror. Also serves the "all subscriptions across devices"
/// read, since subscription state is user-scoped, not device-scoped.
pub fn current_set(conn: &mut PgConnection, user_id: i64) -> Result<Vec<String>> {
    podcast::table
        .filter(podcast::user_id.eq(user_id))
        .select(podcast::feed_url)
        .load(conn)
        .chain_err(|| "error loading current subscription set")
}

/// GET changes since T (§4.3, §4.8): projects the user's full event log
/// through `delta::compute_subscription_delta` for `device`. `since = 0`
/// is treated as a bootstrap request per §9's resolved Open Question.
pub fn changes_since(
    conn: &mut PgConnection,
    user_id: i64,
    device_id: i64,
    since: i64,
) -> Result<crate::delta::SubscriptionDelta> {
    let rows: Vec<(i64, i64, String, String, i64)> = subscription_event::table
        .filter(subscription_event::user_id.eq(user_id))
        .select((
            subscription_event::id,
            subscription_event::device_id,
            subscription_event::podcast_url,
            subscription_event::action,
            subscription_event::ts,
        ))
        .load(conn)
        .chain_err(|| "error loading subscription events")?;

    let events: Vec<crate::delta::SubscriptionEventRow> = rows
        .into_iter()
        .map(|(id, dev, url, action, ts)| crate::delta::SubscriptionEventRow {
            id,
            device_id: dev,
            podcast_url: url,
            is_add: action == "add",
            ts,
        })
        .collect();

    Ok(crate::delta::compute_subscription_delta(&events, device_id, since))
}

fn canonicalize_skip_invalid(log: &Logger, urls: &[String]) -> Vec<Canonicalized> {
    urls.iter()
        .filter_map(|raw| match url_canonicalizer::canonicalize(raw) {
            Some(c) => Some(c),
            None => {
                warn!(log, "skipping invalid URL"; "url" => raw.as_str());
                None
            }
        })
        .collect()
}

fn append_event(
    conn: &mut PgConnection,
    user_id: i64,
    device_id: i64,
    podcast_url: &str,
    is_add: bool,
    ts: i64,
) -> Result<()> {
    diesel::insert_into(subscription_event::table)
        .values(&insertable::SubscriptionEvent {
            user_id,
            device_id,
            podcast_url: podcast_url.to_owned(),
            action: if is_add { "add" } else { "remove" }.to_owned(),
            ts,
        })
        .execute(conn)
        .chain_err(|| "error appending subscription event")?;
    Ok(())
}

fn ensure_podcast_row(
    log: &Logger,
    conn: &mut PgConnection,
    user_id: i64,
    feed_url: &str,
    feed_fetcher: &dyn FeedFetcher,
) -> Result<model::Podcast> {
    let existing: Option<model::Podcast> = podcast::table
        .filter(podcast::user_id.eq(user_id))
        .filter(podcast::feed_url.eq(feed_url))
        .first(conn)
        .optional()
        .chain_err(|| "error checking existing podcast row")?;

    if let Some(p) = existing {
        return Ok(p);
    }

    let (meta, fetched) = feed_fetcher.fetch(feed_url);
    if !fetched {
        info!(log, "feed fetch failed or timed out, inserting placeholder"; "url" => feed_url);
    }

    diesel::insert_into(podcast::table)
        .values(&insertable::Podcast {
            user_id,
            feed_url: feed_url.to_owned(),
            title: meta.title,
            description: meta.description,
            image_url: meta.image_url,
            link_url: meta.link_url,
            language: meta.language,
            last_retrieved_at: Utc::now(),
        })
        .get_result(conn)
        .chain_err(|| "error inserting podcast row")
}

/// Deletes a subscription's catalog mirror and every dependent row, in the
/// dependent-first order from §4.9: playlist entries, listen history,
/// download state, favorites/played flags, episodes, then the podcast row
/// itself.
fn cascade_remove_podcast(conn: &mut PgConnection, user_id: i64, feed_url: &str) -> Result<()> {
    let podcast_row: Option<model::Podcast> = podcast::table
        .filter(podcast::user_id.eq(user_id))
        .filter(podcast::feed_url.eq(feed_url))
        .first(conn)
        .optional()
        .chain_err(|| "error loading podcast row for cascade delete")?;

    let Some(podcast_row) = podcast_row else {
        return Ok(());
    };

    let episode_ids: Vec<i64> = episode::table
        .filter(episode::podcast_id.eq(podcast_row.id))
        .select(episode::id)
        .load(conn)
        .chain_err(|| "error loading episode ids for cascade delete")?;

    diesel::delete(playlist_entry::table.filter(playlist_entry::episode_id.eq_any(&episode_ids)))
        .execute(conn)
        .chain_err(|| "error deleting playlist entries")?;

    diesel::delete(listen_history::table.filter(listen_history::episode_id.eq_any(&episode_ids)))
        .execute(conn)
        .chain_err(|| "error deleting listen history")?;

    diesel::delete(download_state::table.filter(download_state::episode_id.eq_any(&episode_ids)))
        .execute(conn)
        .chain_err(|| "error deleting download state")?;

    diesel::delete(episode_favorite::table.filter(episode_favorite::episode_id.eq_any(&episode_ids)))
        .execute(conn)
        .chain_err(|| "error deleting favorite/played flags")?;

    diesel::delete(episode::table.filter(episode::podcast_id.eq(podcast_row.id)))
        .execute(conn)
        .chain_err(|| "error deleting episodes")?;

    diesel::delete(podcast::table.filter(podcast::id.eq(podcast_row.id)))
        .execute(conn)
        .chain_err(|| "error deleting podcast row")?;

    Ok(())
}

/// Loads the catalog row for each of `urls` that this user currently has,
/// keyed by `feed_url`. Used by the device-updates endpoint (§4.8) to
/// enrich the `add` side of a combined delta with catalog metadata.
pub fn catalog_for_urls(
    conn: &mut PgConnection,
    user_id: i64,
    urls: &[String],
) -> Result<std::collections::HashMap<String, model::Podcast>> {
    let rows: Vec<model::Podcast> = podcast::table
        .filter(podcast::user_id.eq(user_id))
        .filter(podcast::feed_url.eq_any(urls))
        .load(conn)
        .chain_err(|| "error loading catalog rows for enrichment")?;
    Ok(rows.into_iter().map(|p| (p.feed_url.clone(), p)).collect())
}

// Also used by the device-updates endpoint (§4.8) to resolve a device name
// to its id without going through the full registry module.
pub fn device_id_for_name(conn: &mut PgConnection, user_id: i64, name: &str) -> Result<Option<i64>> {
    device::table
        .filter(device::user_id.eq(user_id))
        .filter(device::name.eq(name))
        .select(device::id)
        .first(conn)
        .optional()
        .chain_err(|| "error looking up device id")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed_fetcher::PassThroughFeedFetcher;
    use crate::test_data;
    use crate::test_helpers;

    #[test]
    fn test_s1_cross_device_add_and_convergence() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);
        let phone = test_data::device::insert(log, conn, user.user_id);
        let laptop = test_data::device::insert(log, conn, user.user_id);
        let fetcher = PassThroughFeedFetcher::new();

        Updater {
            user_id: user.user_id,
            device_id: phone.id,
            add: vec!["https://p/a".to_owned()],
            remove: vec![],
            feed_fetcher: &fetcher,
        }
        .run(log, conn)
        .unwrap();

        let delta = changes_since(conn, user.user_id, laptop.id, 0).unwrap();
        assert_eq!(vec!["https://p/a".to_owned()], delta.add);

        let current: HashSet<String> = current_set(conn, user.user_id).unwrap().into_iter().collect();
        assert!(current.contains("https://p/a"));
    }

    #[test]
    fn test_rejects_url_in_both_add_and_remove() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);
        let device = test_data::device::insert(log, conn, user.user_id);
        let fetcher = PassThroughFeedFetcher::new();

        let result = Updater {
            user_id: user.user_id,
            device_id: device.id,
            add: vec!["https://p/a".to_owned()],
            remove: vec!["https://p/a".to_owned()],
            feed_fetcher: &fetcher,
        }
        .run(log, conn);
        assert!(result.is_err());
    }

    #[test]
    fn test_s2_url_canonicalization_reported_and_idempotent() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);
        let device = test_data::device::insert(log, conn, user.user_id);
        let fetcher = PassThroughFeedFetcher::new();

        let result = Updater {
            user_id: user.user_id,
            device_id: device.id,
            add: vec!["HTTP://Feed.Example.COM/rss".to_owned()],
            remove: vec![],
            feed_fetcher: &fetcher,
        }
        .run(log, conn)
        .unwrap();

        assert_eq!(1, result.update_urls.len());
        assert_eq!("HTTP://Feed.Example.COM/rss", result.update_urls[0].0);

        let current = current_set(conn, user.user_id).unwrap();
        assert_eq!(1, current.len());
        assert_eq!(current[0], result.update_urls[0].1);
    }

    #[test]
    fn test_put_full_set_computes_diff_and_cascades() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);
        let device = test_data::device::insert(log, conn, user.user_id);
        let fetcher = PassThroughFeedFetcher::new();

        Putter {
            user_id: user.user_id,
            device_id: device.id,
            urls: vec!["https://p/a".to_owned(), "https://p/b".to_owned()],
            feed_fetcher: &fetcher,
        }
        .run(log, conn)
        .unwrap();

        Putter {
            user_id: user.user_id,
            device_id: device.id,
            urls: vec!["https://p/b".to_owned(), "https://p/c".to_owned()],
            feed_fetcher: &fetcher,
        }
        .run(log, conn)
        .unwrap();

        let current: HashSet<String> = current_set(conn, user.user_id).unwrap().into_iter().collect();
        assert_eq!(2, current.len());
        assert!(current.contains("https://p/b"));
        assert!(current.contains("https://p/c"));
        assert!(!current.contains("https://p/a"));
    }

    #[test]
    fn test_cascade_integrity() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);
        let device = test_data::device::insert(log, conn, user.user_id);
        let fetcher = PassThroughFeedFetcher::new();

        Updater {
            user_id: user.user_id,
            device_id: device.id,
            add: vec!["https://p/a".to_owned()],
            remove: vec![],
            feed_fetcher: &fetcher,
        }
        .run(log, conn)
        .unwrap();

        let podcast_row: model::Podcast = podcast::table
            .filter(podcast::user_id.eq(user.user_id))
            .first(conn)
            .unwrap();
        let episode_row: model::Episode = diesel::insert_into(episode::table)
            .values(&insertable::Episode {
                podcast_id: podcast_row.id,
                user_id: user.user_id,
                episode_url: "https://p/a/ep1".to_owned(),
                guid: None,
                title: None,
                published_at: None,
            })
            .get_result(conn)
            .unwrap();
        diesel::insert_into(listen_history::table)
            .values(&insertable::ListenHistory {
                user_id: user.user_id,
                episode_id: episode_row.id,
                position_seconds: 42,
                updated_at: Utc::now(),
            })
            .execute(conn)
            .unwrap();

        Updater {
            user_id: user.user_id,
            device_id: device.id,
            add: vec![],
            remove: vec!["https://p/a".to_owned()],
            feed_fetcher: &fetcher,
        }
        .run(log, conn)
        .unwrap();

        let remaining_history: i64 = listen_history::table
            .filter(listen_history::episode_id.eq(episode_row.id))
            .count()
            .get_result(conn)
            .unwrap();
        assert_eq!(0, remaining_history);

        let remaining_episodes: i64 = episode::table
            .filter(episode::podcast_id.eq(podcast_row.id))
            .count()
            .get_result(conn)
            .unwrap();
        assert_eq!(0, remaining_episodes);
    }
}
