//! The application's data layer: models queried from and inserted into the
//! database.
//!
//! Simple helper functions are allowed, but they should be kept extremely
//! simple, with preference for any and all domain logic to be offloaded to a
//! mediator.
//!
//! Insertable models live in the `insertable` submodule, distinct from their
//! queryable counterparts so that database-assigned defaults (mostly `id`
//! sequences and `DEFAULT`-valued columns) don't need to be faked on the
//! write side.

use crate::schema;

use chrono::{DateTime, Utc};

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::device)]
pub struct Device {
    pub id:         i64,
    pub user_id:    i64,
    pub name:       String,
    pub kind:       String,
    pub caption:    Option<String>,
    pub active:     bool,
    pub last_sync:  DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

pub const DEVICE_KINDS: &[&str] = &["desktop", "laptop", "mobile", "server", "other"];

impl Device {
    pub fn kind_is_valid(kind: &str) -> bool {
        DEVICE_KINDS.contains(&kind)
    }
}

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::subscription_event)]
pub struct SubscriptionEvent {
    pub id:          i64,
    pub user_id:     i64,
    pub device_id:   i64,
    pub podcast_url: String,
    pub action:      String,
    pub ts:          i64,
}

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::podcast)]
pub struct Podcast {
    pub id:                i64,
    pub user_id:           i64,
    pub feed_url:          String,
    pub title:             String,
    pub description:       Option<String>,
    pub image_url:         Option<String>,
    pub link_url:          Option<String>,
    pub language:          Option<String>,
    pub last_retrieved_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::episode)]
pub struct Episode {
    pub id:           i64,
    pub podcast_id:   i64,
    pub user_id:      i64,
    pub episode_url:  String,
    pub guid:         Option<String>,
    pub title:        Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::episode_action)]
pub struct EpisodeAction {
    pub id:          i64,
    pub user_id:     i64,
    pub device_id:   Option<i64>,
    pub podcast_url: String,
    pub episode_url: String,
    pub action:      String,
    pub ts:          i64,
    pub started:     Option<i32>,
    pub position:    Option<i32>,
    pub total:       Option<i32>,
}

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::setting)]
pub struct Setting {
    pub id:          i64,
    pub user_id:     i64,
    pub scope:       String,
    pub device_id:   Option<i64>,
    pub podcast_url: Option<String>,
    pub episode_url: Option<String>,
    pub key:         String,
    pub value_json:  String,
    pub updated_at:  DateTime<Utc>,
}

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::podcast_list)]
pub struct PodcastList {
    pub id:         i64,
    pub user_id:    i64,
    pub name:       String,
    pub title:      String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::podcast_list_entry)]
pub struct PodcastListEntry {
    pub id:          i64,
    pub list_id:     i64,
    pub podcast_url: String,
    pub position:    i32,
}

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::sync_group)]
pub struct SyncGroup {
    pub id:          i64,
    pub user_id:     i64,
    pub device_a_id: i64,
    pub device_b_id: i64,
}

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::session, primary_key(token))]
pub struct Session {
    pub token:       String,
    pub user_id:     i64,
    pub expires_at:  DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub user_agent:  Option<String>,
    pub client_ip:   Option<String>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::listen_history)]
pub struct ListenHistory {
    pub id:               i64,
    pub user_id:          i64,
    pub episode_id:       i64,
    pub position_seconds: i32,
    pub updated_at:       DateTime<Utc>,
}

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::download_state)]
pub struct DownloadState {
    pub id:         i64,
    pub user_id:    i64,
    pub episode_id: i64,
    pub downloaded: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::episode_favorite)]
pub struct EpisodeFavorite {
    pub id:         i64,
    pub user_id:    i64,
    pub episode_id: i64,
    pub favorited:  bool,
    pub played:     bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::playlist_entry)]
pub struct PlaylistEntry {
    pub id:         i64,
    pub user_id:    i64,
    pub episode_id: i64,
    pub position:   i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_kind_validity() {
        assert!(Device::kind_is_valid("mobile"));
        assert!(Device::kind_is_valid("other"));
        assert!(!Device::kind_is_valid("toaster"));
    }

    #[test]
    fn test_session_expiry() {
        let session = Session {
            token:       "t".to_owned(),
            user_id:     1,
            expires_at:  Utc::now() - chrono::Duration::seconds(1),
            last_active: Utc::now(),
            user_agent:  None,
            client_ip:   None,
        };
        assert!(session.is_expired(Utc::now()));
    }
}

pub mod insertable {
    use crate::schema::{
        device, download_state, episode, episode_action, episode_favorite, listen_history,
        playlist_entry, podcast, podcast_list, podcast_list_entry, session, setting,
        subscription_event, sync_group,
    };

    use chrono::{DateTime, Utc};

    #[derive(Insertable)]
    #[diesel(table_name = device)]
    pub struct Device {
        pub user_id:    i64,
        pub name:       String,
        pub kind:       String,
        pub caption:    Option<String>,
        pub active:     bool,
        pub last_sync:  DateTime<Utc>,
        pub created_at: DateTime<Utc>,
    }

    #[derive(Insertable)]
    #[diesel(table_name = subscription_event)]
    pub struct SubscriptionEvent {
        pub user_id:     i64,
        pub device_id:   i64,
        pub podcast_url: String,
        pub action:      String,
        pub ts:          i64,
    }

    #[derive(Insertable, AsChangeset)]
    #[diesel(table_name = podcast)]
    pub struct Podcast {
        pub user_id:           i64,
        pub feed_url:          String,
        pub title:             String,
        pub description:       Option<String>,
        pub image_url:         Option<String>,
        pub link_url:          Option<String>,
        pub language:          Option<String>,
        pub last_retrieved_at: DateTime<Utc>,
    }

    #[derive(Insertable)]
    #[diesel(table_name = episode)]
    pub struct Episode {
        pub podcast_id:   i64,
        pub user_id:      i64,
        pub episode_url:  String,
        pub guid:         Option<String>,
        pub title:        Option<String>,
        pub published_at: Option<DateTime<Utc>>,
    }

    #[derive(Insertable)]
    #[diesel(table_name = episode_action)]
    pub struct EpisodeAction {
        pub user_id:     i64,
        pub device_id:   Option<i64>,
        pub podcast_url: String,
        pub episode_url: String,
        pub action:      String,
        pub ts:          i64,
        pub started:     Option<i32>,
        pub position:    Option<i32>,
        pub total:       Option<i32>,
    }

    #[derive(Insertable, AsChangeset)]
    #[diesel(table_name = setting)]
    pub struct Setting {
        pub user_id:     i64,
        pub scope:       String,
        pub device_id:   Option<i64>,
        pub podcast_url: Option<String>,
        pub episode_url: Option<String>,
        pub key:         String,
        pub value_json:  String,
        pub updated_at:  DateTime<Utc>,
    }

    #[derive(Insertable)]
    #[diesel(table_name = podcast_list)]
    pub struct PodcastList {
        pub user_id:    i64,
        pub name:       String,
        pub title:      String,
        pub created_at: DateTime<Utc>,
    }

    #[derive(Insertable)]
    #[diesel(table_name = podcast_list_entry)]
    pub struct PodcastListEntry {
        pub list_id:     i64,
        pub podcast_url: String,
        pub position:    i32,
    }

    #[derive(Insertable)]
    #[diesel(table_name = sync_group)]
    pub struct SyncGroup {
        pub user_id:     i64,
        pub device_a_id: i64,
        pub device_b_id: i64,
    }

    #[derive(Insertable, AsChangeset)]
    #[diesel(table_name = session)]
    pub struct Session {
        pub token:       String,
        pub user_id:     i64,
        pub expires_at:  DateTime<Utc>,
        pub last_active: DateTime<Utc>,
        pub user_agent:  Option<String>,
        pub client_ip:   Option<String>,
    }

    #[derive(Insertable, AsChangeset)]
    #[diesel(table_name = listen_history)]
    pub struct ListenHistory {
        pub user_id:          i64,
        pub episode_id:       i64,
        pub position_seconds: i32,
        pub updated_at:       DateTime<Utc>,
    }

    #[derive(Insertable, AsChangeset)]
    #[diesel(table_name = download_state)]
    pub struct DownloadState {
        pub user_id:    i64,
        pub episode_id: i64,
        pub downloaded: bool,
        pub updated_at: DateTime<Utc>,
    }

    #[derive(Insertable, AsChangeset)]
    #[diesel(table_name = episode_favorite)]
    pub struct EpisodeFavorite {
        pub user_id:    i64,
        pub episode_id: i64,
        pub favorited:  bool,
        pub played:     bool,
        pub updated_at: DateTime<Utc>,
    }

    #[derive(Insertable)]
    #[diesel(table_name = playlist_entry)]
    pub struct PlaylistEntry {
        pub user_id:    i64,
        pub episode_id: i64,
        pub position:   i32,
    }
}
