//! `ListsStore` (§4.6): named, ordered bags of podcast URLs per user.
//!
//! Grounded on `podcast_list`'s unique-slug-per-user identity and on
//! `subscription_engine`'s URL canonicalization for list entries; ordered
//! replacement of a list's entries follows the same
//! delete-then-reinsert-in-a-transaction shape as the cascade delete in
//! §4.9, just scoped to one list instead of one podcast.

use crate::errors::*;
use crate::model;
use crate::model::insertable;
use crate::schema::{podcast_list, podcast_list_entry};
use crate::time_helpers;
use crate::url_canonicalizer;

use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use slog::Logger;

/// Builds a URL-safe slug from a title: lowercase, spaces to `-`, strip
/// anything outside `[a-z0-9-]`, falling back to `"list"` if empty.
pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase().replace(' ', "-");
    let slug: String = lowered
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect();
    if slug.is_empty() {
        "list".to_owned()
    } else {
        slug
    }
}

pub struct Creator {
    pub user_id: i64,
    pub title:   String,
    pub urls:    Vec<String>,
}

pub struct CreateResult {
    pub list: model::PodcastList,
}

impl Creator {
    pub fn run(&self, log: &Logger, conn: &mut PgConnection) -> Result<CreateResult> {
        time_helpers::log_timed(&log.new(o!("step" => file!())), |log| {
            conn.transaction::<_, Error, _>(|conn| self.run_inner(log, conn))
        })
    }

    fn run_inner(&self, _log: &Logger, conn: &mut PgConnection) -> Result<CreateResult> {
        let name = slugify(&self.title);

        let conflict: bool = diesel::select(diesel::dsl::exists(
            podcast_list::table
                .filter(podcast_list::user_id.eq(self.user_id))
                .filter(podcast_list::name.eq(&name)),
        ))
        .get_result(conn)
        .chain_err(|| "error checking list name conflict")?;
        if conflict {
            return Err(error::conflict(format!("list name already in use: {}", name)).into());
        }

        let list: model::PodcastList = diesel::insert_into(podcast_list::table)
            .values(&insertable::PodcastList {
                user_id:    self.user_id,
                name,
                title:      self.title.clone(),
                created_at: Utc::now(),
            })
            .get_result(conn)
            .chain_err(|| "error inserting podcast list")?;

        replace_entries(conn, list.id, &self.urls)?;

        Ok(CreateResult { list })
    }
}

pub struct Updater {
    pub user_id: i64,
    pub name:    String,
    pub urls:    Vec<String>,
}

impl Updater {
    pub fn run(&self, log: &Logger, conn: &mut PgConnection) -> Result<model::PodcastList> {
        time_helpers::log_timed(&log.new(o!("step" => file!())), |_log| {
            conn.transaction::<_, Error, _>(|conn| self.run_inner(conn))
        })
    }

    fn run_inner(&self, conn: &mut PgConnection) -> Result<model::PodcastList> {
        let list = find(conn, self.user_id, &self.name)?
            .ok_or_else(|| Error::from(error::not_found("list", self.name.clone())))?;
        replace_entries(conn, list.id, &self.urls)?;
        Ok(list)
    }
}

pub struct Destroyer {
    pub user_id: i64,
    pub name:    String,
}

impl Destroyer {
    pub fn run(&self, log: &Logger, conn: &mut PgConnection) -> Result<()> {
        time_helpers::log_timed(&log.new(o!("step" => file!())), |_log| {
            conn.transaction::<_, Error, _>(|conn| self.run_inner(conn))
        })
    }

    fn run_inner(&self, conn: &mut PgConnection) -> Result<()> {
        let list = find(conn, self.user_id, &self.name)?
            .ok_or_else(|| Error::from(error::not_found("list", self.name.clone())))?;

        diesel::delete(podcast_list_entry::table.filter(podcast_list_entry::list_id.eq(list.id)))
            .execute(conn)
            .chain_err(|| "error deleting list entries")?;
        diesel::delete(podcast_list::table.filter(podcast_list::id.eq(list.id)))
            .execute(conn)
            .chain_err(|| "error deleting podcast list")?;
        Ok(())
    }
}

pub fn find(conn: &mut PgConnection, user_id: i64, name: &str) -> Result<Option<model::PodcastList>> {
    podcast_list::table
        .filter(podcast_list::user_id.eq(user_id))
        .filter(podcast_list::name.eq(name))
        .first(conn)
        .optional()
        .chain_err(|| "error loading podcast list")
}

pub fn list_for_user(conn: &mut PgConnection, user_id: i64) -> Result<Vec<model::PodcastList>> {
    podcast_list::table
        .filter(podcast_list::user_id.eq(user_id))
        .order(podcast_list::created_at.asc())
        .load(conn)
        .chain_err(|| "error listing podcast lists")
}

pub fn entries(conn: &mut PgConnection, list_id: i64) -> Result<Vec<String>> {
    podcast_list_entry::table
        .filter(podcast_list_entry::list_id.eq(list_id))
        .order(podcast_list_entry::position.asc())
        .select(podcast_list_entry::podcast_url)
        .load(conn)
        .chain_err(|| "error loading list entries")
}

fn replace_entries(conn: &mut PgConnection, list_id: i64, urls: &[String]) -> Result<()> {
    diesel::delete(podcast_list_entry::table.filter(podcast_list_entry::list_id.eq(list_id)))
        .execute(conn)
        .chain_err(|| "error clearing list entries")?;

    for (position, raw) in urls.iter().enumerate() {
        let canonical = url_canonicalizer::canonicalize(raw).map(|c| c.canonical).unwrap_or_else(|| raw.clone());
        diesel::insert_into(podcast_list_entry::table)
            .values(&insertable::PodcastListEntry {
                list_id,
                podcast_url: canonical,
                position: position as i32,
            })
            .execute(conn)
            .chain_err(|| "error inserting list entry")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_data;
    use crate::test_helpers;

    #[test]
    fn test_slugify() {
        assert_eq!("my-favorites", slugify("My Favorites"));
        assert_eq!("list", slugify("!!!"));
        assert_eq!("list", slugify(""));
    }

    #[test]
    fn test_create_conflict() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);

        Creator {
            user_id: user.user_id,
            title:   "Favorites".to_owned(),
            urls:    vec![],
        }
        .run(log, conn)
        .unwrap();

        let result = Creator {
            user_id: user.user_id,
            title:   "Favorites".to_owned(),
            urls:    vec![],
        }
        .run(log, conn);
        assert!(result.is_err());
    }

    #[test]
    fn test_update_replaces_entries_atomically() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);

        let created = Creator {
            user_id: user.user_id,
            title:   "Favorites".to_owned(),
            urls:    vec!["https://p/a".to_owned()],
        }
        .run(log, conn)
        .unwrap()
        .list;

        Updater {
            user_id: user.user_id,
            name:    created.name.clone(),
            urls:    vec!["https://p/b".to_owned(), "https://p/c".to_owned()],
        }
        .run(log, conn)
        .unwrap();

        let urls = entries(conn, created.id).unwrap();
        assert_eq!(vec!["https://p/b".to_owned(), "https://p/c".to_owned()], urls);
    }

    #[test]
    fn test_delete_removes_entries_then_list() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);

        let created = Creator {
            user_id: user.user_id,
            title:   "Favorites".to_owned(),
            urls:    vec!["https://p/a".to_owned()],
        }
        .run(log, conn)
        .unwrap()
        .list;

        Destroyer {
            user_id: user.user_id,
            name:    created.name.clone(),
        }
        .run(log, conn)
        .unwrap();

        assert!(find(conn, user.user_id, &created.name).unwrap().is_none());
    }
}
