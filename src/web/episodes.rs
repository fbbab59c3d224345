//! `/episodes/{user}.json` (§6, §4.4).

use crate::mediators::episode_action_engine::{self, ActionInput, ActionOutput, ReadMode};
use crate::mediators::session_manager;
use crate::web::auth::credentials_from_request;
use crate::web::{blocking, pooled_connection, AppState, WebResult};

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct ShowQuery {
    since:      Option<i64>,
    podcast:    Option<String>,
    device:     Option<String>,
    aggregated: Option<bool>,
}

#[derive(Serialize)]
struct ShowResponse {
    actions:   Vec<ActionOutput>,
    timestamp: i64,
}

/// `GET /episodes/{user}.json`: reads the action log since `since`
/// (default 0), optionally filtered by `podcast`/`device`, and either
/// every row (the default) or, with `aggregated=true`, the latest action
/// per episode.
pub async fn show(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    query: web::Query<ShowQuery>,
) -> WebResult<HttpResponse> {
    let username = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);
    let query = query.into_inner();

    let (actions, timestamp) = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let user_id =
            session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &owned.as_credentials())?;

        let mode = if query.aggregated.unwrap_or(false) {
            ReadMode::Aggregated
        } else {
            ReadMode::NonAggregated
        };

        Ok(episode_action_engine::read(
            &mut conn,
            user_id,
            query.since.unwrap_or(0),
            query.podcast.as_deref(),
            query.device.as_deref(),
            mode,
        )?)
    })
    .await?;

    Ok(HttpResponse::Ok().json(ShowResponse { actions, timestamp }))
}

/// `POST /episodes/{user}.json`: appends a batch of episode actions.
/// Accepts either a bare JSON array or `{"actions": [...]}` -- gpodder
/// clients in the wild send both shapes (§9's "flexible timestamp
/// parsing" note applies to the same leniency spirit here).
#[derive(Deserialize)]
#[serde(untagged)]
enum PostBody {
    Bare(Vec<ActionInput>),
    Wrapped { actions: Vec<ActionInput> },
}

pub async fn post(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<PostBody>,
) -> WebResult<HttpResponse> {
    let username = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);
    let actions = match body.into_inner() {
        PostBody::Bare(actions) => actions,
        PostBody::Wrapped { actions } => actions,
    };

    let result = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let user_id =
            session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &owned.as_credentials())?;

        episode_action_engine::Appender { user_id, actions }.run(&log, &mut conn)
    })
    .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "timestamp": result.timestamp,
        "update_urls": result.update_urls,
    })))
}
