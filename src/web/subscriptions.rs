//! `/subscriptions/{user}[/{device}].json` (§6, §4.3).

use crate::errors::*;
use crate::mediators::{device_registry, session_manager, subscription_engine};
use crate::web::auth::credentials_from_request;
use crate::web::{blocking, pooled_connection, AppState, WebResult};

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
#[serde(untagged)]
pub enum DeltaBody {
    /// `{add: [...], remove: [...]}` -- §4.3's "POST delta".
    Delta {
        #[serde(default)]
        add:    Vec<String>,
        #[serde(default)]
        remove: Vec<String>,
    },
}

#[derive(Serialize)]
struct DeltaResponse {
    timestamp:   i64,
    update_urls: Vec<(String, String)>,
}

#[derive(Serialize)]
struct ChangesResponse {
    add:       Vec<String>,
    remove:    Vec<String>,
    timestamp: i64,
}

#[derive(Deserialize)]
pub struct ShowQuery {
    since: Option<i64>,
}

/// `GET /subscriptions/{user}/{device}.json`: the current set, or -- with
/// `since=` -- the delta since that cursor (§4.3's two read shapes).
pub async fn show(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
    query: web::Query<ShowQuery>,
) -> WebResult<HttpResponse> {
    let (username, device_name) = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);
    let since = query.into_inner().since;

    let body = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let user_id =
            session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &owned.as_credentials())?;

        match since {
            None => {
                // Auto-create on reference (§4.2), even for a read-only
                // current-set fetch -- a client's first call for a device
                // it's never used before must not require registration.
                device_registry::ensure_device(&log, &mut conn, user_id, &device_name)?;
                let urls = subscription_engine::current_set(&mut conn, user_id)?;
                Ok(serde_json::to_value(urls).chain_err(|| "error encoding current set")?)
            }
            Some(since) => {
                let device = device_registry::ensure_device(&log, &mut conn, user_id, &device_name)?;
                let delta = subscription_engine::changes_since(&mut conn, user_id, device.id, since)?;
                let timestamp = chrono::Utc::now().timestamp();
                Ok(serde_json::to_value(ChangesResponse {
                    add: delta.add,
                    remove: delta.remove,
                    timestamp,
                })
                .chain_err(|| "error encoding subscription delta")?)
            }
        }
    })
    .await?;

    Ok(HttpResponse::Ok().json(body))
}

/// `PUT /subscriptions/{user}/{device}.json`: replace the full set (§4.3's
/// "PUT full set").
pub async fn put(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
    body: web::Json<Vec<String>>,
) -> WebResult<HttpResponse> {
    let (username, device_name) = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);
    let urls = body.into_inner();

    let result = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let user_id =
            session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &owned.as_credentials())?;
        let device = device_registry::ensure_device(&log, &mut conn, user_id, &device_name)?;

        subscription_engine::Putter {
            user_id,
            device_id: device.id,
            urls,
            feed_fetcher: state.feed_fetcher.as_ref(),
        }
        .run(&log, &mut conn)
    })
    .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "update_urls": result.update_urls })))
}

/// `POST /subscriptions/{user}/{device}.json`: apply `{add, remove}`
/// (§4.3's "POST delta").
pub async fn post(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
    body: web::Json<DeltaBody>,
) -> WebResult<HttpResponse> {
    let (username, device_name) = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);
    let DeltaBody::Delta { add, remove } = body.into_inner();

    let result = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let user_id =
            session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &owned.as_credentials())?;
        let device = device_registry::ensure_device(&log, &mut conn, user_id, &device_name)?;

        subscription_engine::Updater {
            user_id,
            device_id: device.id,
            add,
            remove,
            feed_fetcher: state.feed_fetcher.as_ref(),
        }
        .run(&log, &mut conn)
    })
    .await?;

    Ok(HttpResponse::Ok().json(DeltaResponse {
        timestamp:   result.timestamp,
        update_urls: result.update_urls,
    }))
}

/// `GET /subscriptions/{user}.json`: all current URLs across devices --
/// subscription state is user-scoped, not device-scoped (§3), so this is
/// the same projection as the per-device current-set read.
pub async fn all(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> WebResult<HttpResponse> {
    let username = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);

    let urls = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let user_id =
            session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &owned.as_credentials())?;
        subscription_engine::current_set(&mut conn, user_id)
    })
    .await?;

    Ok(HttpResponse::Ok().json(urls))
}
