//! Diesel table definitions for the tables this core owns outright (the
//! append-only logs, devices, settings, lists, sync groups, sessions) plus
//! the narrow mirror of the host's podcast/episode catalog that the
//! subscription and episode-action engines maintain referential integrity
//! against (see §4.9's cascade order).

table! {
    device (id) {
        id -> Int8,
        user_id -> Int8,
        name -> Text,
        kind -> Text,
        caption -> Nullable<Text>,
        active -> Bool,
        last_sync -> Timestamptz,
        created_at -> Timestamptz,
    }
}

table! {
    subscription_event (id) {
        id -> Int8,
        user_id -> Int8,
        device_id -> Int8,
        podcast_url -> Text,
        action -> Text,
        ts -> Int8,
    }
}

table! {
    podcast (id) {
        id -> Int8,
        user_id -> Int8,
        feed_url -> Text,
        title -> Text,
        description -> Nullable<Text>,
        image_url -> Nullable<Text>,
        link_url -> Nullable<Text>,
        language -> Nullable<Text>,
        last_retrieved_at -> Timestamptz,
    }
}

table! {
    episode (id) {
        id -> Int8,
        podcast_id -> Int8,
        user_id -> Int8,
        episode_url -> Text,
        guid -> Nullable<Text>,
        title -> Nullable<Text>,
        published_at -> Nullable<Timestamptz>,
    }
}

table! {
    episode_action (id) {
        id -> Int8,
        user_id -> Int8,
        device_id -> Nullable<Int8>,
        podcast_url -> Text,
        episode_url -> Text,
        action -> Text,
        ts -> Int8,
        started -> Nullable<Int4>,
        position -> Nullable<Int4>,
        total -> Nullable<Int4>,
    }
}

table! {
    setting (id) {
        id -> Int8,
        user_id -> Int8,
        scope -> Text,
        device_id -> Nullable<Int8>,
        podcast_url -> Nullable<Text>,
        episode_url -> Nullable<Text>,
        key -> Text,
        value_json -> Text,
        updated_at -> Timestamptz,
    }
}

table! {
    podcast_list (id) {
        id -> Int8,
        user_id -> Int8,
        name -> Text,
        title -> Text,
        created_at -> Timestamptz,
    }
}

table! {
    podcast_list_entry (id) {
        id -> Int8,
        list_id -> Int8,
        podcast_url -> Text,
        position -> Int4,
    }
}

table! {
    sync_group (id) {
        id -> Int8,
        user_id -> Int8,
        device_a_id -> Int8,
        device_b_id -> Int8,
    }
}

table! {
    session (token) {
        token -> Text,
        user_id -> Int8,
        expires_at -> Timestamptz,
        last_active -> Timestamptz,
        user_agent -> Nullable<Text>,
        client_ip -> Nullable<Text>,
    }
}

table! {
    listen_history (id) {
        id -> Int8,
        user_id -> Int8,
        episode_id -> Int8,
        position_seconds -> Int4,
        updated_at -> Timestamptz,
    }
}

table! {
    download_state (id) {
        id -> Int8,
        user_id -> Int8,
        episode_id -> Int8,
        downloaded -> Bool,
        updated_at -> Timestamptz,
    }
}

table! {
    episode_favorite (id) {
        id -> Int8,
        user_id -> Int8,
        episode_id -> Int8,
        favorited -> Bool,
        played -> Bool,
        updated_at -> Timestamptz,
    }
}

table! {
    playlist_entry (id) {
        id -> Int8,
        user_id -> Int8,
        episode_id -> Int8,
        position -> Int4,
    }
}

joinable!(subscription_event -> device (device_id));
joinable!(episode -> podcast (podcast_id));
joinable!(podcast_list_entry -> podcast_list (list_id));
joinable!(listen_history -> episode (episode_id));
joinable!(download_state -> episode (episode_id));
joinable!(episode_favorite -> episode (episode_id));
joinable!(playlist_entry -> episode (episode_id));

allow_tables_to_appear_in_same_query!(
    device,
    subscription_event,
    podcast,
    episode,
    episode_action,
    setting,
    podcast_list,
    podcast_list_entry,
    sync_group,
    session,
    listen_history,
    download_state,
    episode_favorite,
    playlist_entry,
);
