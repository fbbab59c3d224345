//! `/settings/{user}/{scope}.json` and `/favorites/{user}.json` (§6, §4.5).

use crate::mediators::session_manager;
use crate::mediators::settings_store::{self, Locators, Scope, Writer};
use crate::mediators::subscription_engine;
use crate::web::auth::credentials_from_request;
use crate::web::{blocking, pooled_connection, AppState, WebResult};

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Deserialize)]
pub struct LocatorQuery {
    device:  Option<String>,
    podcast: Option<String>,
    episode: Option<String>,
}

fn resolve_locators(
    conn: &mut diesel::pg::PgConnection,
    user_id: i64,
    q: &LocatorQuery,
) -> crate::errors::Result<Locators> {
    let device_id = match &q.device {
        Some(name) => subscription_engine::device_id_for_name(conn, user_id, name)?,
        None => None,
    };
    Ok(Locators {
        device_id,
        podcast_url: q.podcast.clone(),
        episode_url: q.episode.clone(),
    })
}

#[derive(Deserialize, Default)]
pub struct WriteBody {
    #[serde(default)]
    set:    HashMap<String, Value>,
    #[serde(default)]
    remove: Vec<String>,
}

/// `GET /settings/{user}/{scope}.json`: the current map for a scope,
/// resolved via the `device`/`podcast`/`episode` query locators appropriate
/// to that scope (§4.5's scope matrix).
pub async fn show(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
    query: web::Query<LocatorQuery>,
) -> WebResult<HttpResponse> {
    let (username, scope) = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);
    let query = query.into_inner();

    let map = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let user_id =
            session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &owned.as_credentials())?;

        let scope = Scope::from_str(&scope)?;
        let locators = resolve_locators(&mut conn, user_id, &query)?;
        locators.validate(scope)?;

        Ok(settings_store::read_map(&mut conn, user_id, scope, &locators)?)
    })
    .await?;

    Ok(HttpResponse::Ok().json(map))
}

/// `POST /settings/{user}/{scope}.json`: applies `{set, remove}` against
/// the locator resolved the same way as the GET, returning the resulting
/// full map (§4.5's write contract).
pub async fn post(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
    query: web::Query<LocatorQuery>,
    body: web::Json<WriteBody>,
) -> WebResult<HttpResponse> {
    let (username, scope) = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);
    let query = query.into_inner();
    let body = body.into_inner();

    let map = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let user_id =
            session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &owned.as_credentials())?;

        let scope = Scope::from_str(&scope)?;
        let locators = resolve_locators(&mut conn, user_id, &query)?;

        Writer {
            user_id,
            scope,
            locators,
            set: body.set,
            remove: body.remove,
        }
        .run(&log, &mut conn)
    })
    .await?;

    Ok(HttpResponse::Ok().json(map))
}

#[derive(Serialize)]
struct FavoriteEntry {
    podcast: String,
    episode: String,
}

/// `GET /favorites/{user}.json`: every episode with `is_favorite = true`
/// at `episode` scope (§4.5's derived "favorites" view).
pub async fn favorites(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> WebResult<HttpResponse> {
    let username = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);

    let entries = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let user_id =
            session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &owned.as_credentials())?;

        let pairs = settings_store::favorites(&mut conn, user_id)?;
        Ok(pairs
            .into_iter()
            .map(|(podcast, episode)| FavoriteEntry { podcast, episode })
            .collect::<Vec<_>>())
    })
    .await?;

    Ok(HttpResponse::Ok().json(entries))
}
