//! `/devices/{user}.json` (§6, §4.2).

use crate::mediators::device_registry;
use crate::mediators::session_manager;
use crate::model;
use crate::web::auth::credentials_from_request;
use crate::web::{blocking, pooled_connection, AppState, WebResult};

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Serialize)]
struct DeviceView {
    id:            String,
    caption:       String,
    #[serde(rename = "type")]
    kind:          String,
    subscriptions: i64,
}

fn device_view(device: model::Device, subscriptions: i64) -> DeviceView {
    DeviceView {
        caption: device.caption.clone().unwrap_or_else(|| device.name.clone()),
        id: device.name,
        kind: device.kind,
        subscriptions,
    }
}

/// `GET /devices/{user}.json`: every active device, each annotated with the
/// user's (shared, device-independent) subscription count.
pub async fn list(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> WebResult<HttpResponse> {
    let username = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);

    let views = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let user_id =
            session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &owned.as_credentials())?;

        let devices = device_registry::list_active(&mut conn, user_id)?;
        let subscriptions = crate::mediators::subscription_engine::current_set(&mut conn, user_id)?.len() as i64;

        Ok(devices.into_iter().map(|d| device_view(d, subscriptions)).collect::<Vec<_>>())
    })
    .await?;

    Ok(HttpResponse::Ok().json(views))
}

#[derive(Deserialize)]
pub struct UpsertBody {
    caption: Option<String>,
    #[serde(rename = "type")]
    kind:    Option<String>,
}

/// `POST /devices/{user}/{device}.json`: upserts a device's kind/caption
/// (§4.2's auto-create-on-write contract applies everywhere else; this
/// endpoint is the explicit registration path).
pub async fn upsert(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
    body: web::Json<UpsertBody>,
) -> WebResult<HttpResponse> {
    let (username, device_name) = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);
    let body = body.into_inner();

    blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let user_id =
            session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &owned.as_credentials())?;

        device_registry::Upserter {
            user_id,
            name: device_name,
            kind: body.kind,
            caption: body.caption,
        }
        .run(&log, &mut conn)?;

        Ok(())
    })
    .await?;

    Ok(HttpResponse::Ok().json(HashMap::<String, String>::new()))
}
