//! Fixture builders for mediator tests, following the host's
//! `test_data::account::insert` / `test_data::podcast::insert` convention.
//!
//! The host's `users` and catalog `podcast`/`episode` tables are owned
//! externally (§1's "ambient podcast catalog"), so fixtures here never
//! create real rows for them -- `user_id`/`podcast_id`/`episode_id` are
//! synthesized, which is sufficient since this crate's own schema carries
//! no foreign key back into those host tables at the Diesel level.

pub mod user {
    use crate::user_store::{SyncMode, UserRecord};
    use rand::Rng;
    use slog::Logger;

    pub fn insert(_log: &Logger, _conn: &mut diesel::pg::PgConnection) -> UserRecord {
        let mut rng = rand::thread_rng();
        let n: u32 = rng.gen();
        UserRecord {
            user_id:       rng.gen_range(1..1_000_000_000),
            username:      format!("user-{}", n),
            password_hash: "$scrypt$ln=15,r=8,p=1$test$test".to_owned(),
            api_token:     Some(format!("token-{}", n)),
            sync_mode:     SyncMode::Internal,
        }
    }
}

pub mod device {
    use crate::mediators::device_registry;
    use crate::model;
    use diesel::pg::PgConnection;
    use rand::Rng;
    use slog::Logger;

    pub fn insert(log: &Logger, conn: &mut PgConnection, user_id: i64) -> model::Device {
        let mut rng = rand::thread_rng();
        device_registry::Upserter {
            user_id,
            name: format!("device-{}", rng.gen::<u32>()),
            kind: None,
            caption: None,
        }
        .run(log, conn)
        .unwrap()
        .device
    }
}

pub mod podcast {
    use crate::model;
    use crate::model::insertable;
    use crate::schema::podcast;
    use chrono::Utc;
    use diesel::pg::PgConnection;
    use diesel::prelude::*;
    use rand::Rng;
    use slog::Logger;

    pub fn insert(_log: &Logger, conn: &mut PgConnection, user_id: i64) -> model::Podcast {
        let mut rng = rand::thread_rng();
        diesel::insert_into(podcast::table)
            .values(&insertable::Podcast {
                user_id,
                feed_url: format!("https://example.com/feed-{}.xml", rng.gen::<u64>()),
                title: "Test Podcast".to_owned(),
                description: None,
                image_url: None,
                link_url: None,
                language: None,
                last_retrieved_at: Utc::now(),
            })
            .get_result(conn)
            .unwrap()
    }
}
