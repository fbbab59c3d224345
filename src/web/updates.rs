//! `/updates/{user}/{device}.json` (§6, §4.8): the combined subscription
//! and (optionally) episode-action delta since a cursor.

use crate::mediators::episode_action_engine::{self, ReadMode};
use crate::mediators::{device_registry, session_manager, subscription_engine};
use crate::web::auth::credentials_from_request;
use crate::web::{blocking, pooled_connection, AppState, WebResult};

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::TimeZone;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct ShowQuery {
    since:           Option<i64>,
    include_actions: Option<bool>,
}

#[derive(Serialize)]
struct UpdateEntry {
    url:         String,
    title:       String,
    description: Option<String>,
    website:     Option<String>,
    #[serde(rename = "logo_url")]
    logo_url:    Option<String>,
}

#[derive(Serialize)]
struct EpisodeUpdate {
    podcast:  String,
    episode:  String,
    device:   Option<String>,
    action:   String,
    released: String,
    started:  Option<i32>,
    position: Option<i32>,
    total:    Option<i32>,
}

#[derive(Serialize)]
struct ShowResponse {
    add:       Vec<UpdateEntry>,
    remove:    Vec<String>,
    updates:   Vec<EpisodeUpdate>,
    timestamp: i64,
}

/// Projects both logs at once (§4.8), so a client doing its periodic sync
/// makes one round trip instead of two. `include_actions=true` adds the
/// episode-action side; the subscription delta is always present.
pub async fn show(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
    query: web::Query<ShowQuery>,
) -> WebResult<HttpResponse> {
    let (username, device_name) = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);
    let query = query.into_inner();
    let since = query.since.unwrap_or(0);
    let include_actions = query.include_actions.unwrap_or(false);

    let response = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let user_id =
            session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &owned.as_credentials())?;
        let device = device_registry::ensure_device(&log, &mut conn, user_id, &device_name)?;

        let sub_delta = subscription_engine::changes_since(&mut conn, user_id, device.id, since)?;

        let catalog = subscription_engine::catalog_for_urls(&mut conn, user_id, &sub_delta.add)?;
        let add = sub_delta
            .add
            .into_iter()
            .map(|url| match catalog.get(&url) {
                Some(podcast) => UpdateEntry {
                    title: podcast.title.clone(),
                    description: podcast.description.clone(),
                    website: podcast.link_url.clone(),
                    logo_url: podcast.image_url.clone(),
                    url,
                },
                None => UpdateEntry {
                    title: url.clone(),
                    description: None,
                    website: None,
                    logo_url: None,
                    url,
                },
            })
            .collect();

        let (updates, timestamp) = if include_actions {
            let (actions, ts) =
                episode_action_engine::read(&mut conn, user_id, since, None, None, ReadMode::Aggregated)?;
            let updates = actions
                .into_iter()
                .map(|a| EpisodeUpdate {
                    podcast: a.podcast,
                    episode: a.episode,
                    device: a.device,
                    action: a.action,
                    released: chrono::Utc
                        .timestamp_opt(a.timestamp, 0)
                        .single()
                        .unwrap_or_else(chrono::Utc::now)
                        .to_rfc3339(),
                    started: a.started,
                    position: a.position,
                    total: a.total,
                })
                .collect();
            (updates, ts)
        } else {
            (Vec::new(), chrono::Utc::now().timestamp())
        };

        Ok(ShowResponse {
            add,
            remove: sub_delta.remove,
            updates,
            timestamp,
        })
    })
    .await?;

    Ok(HttpResponse::Ok().json(response))
}
