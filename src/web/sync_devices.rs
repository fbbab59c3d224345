//! `/sync-devices/{user}.json` (§6, §4.7).

use crate::mediators::session_manager;
use crate::mediators::sync_group_store::{self, Updater};
use crate::web::auth::credentials_from_request;
use crate::web::{blocking, pooled_connection, AppState, WebResult};

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct MembershipView {
    synchronized: Vec<(String, String)>,
    #[serde(rename = "not-synchronized")]
    not_synchronized: Vec<String>,
}

/// `GET /sync-devices/{user}.json`: current pairwise sync membership
/// (§4.7's "no transitive closure" contract).
pub async fn show(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> WebResult<HttpResponse> {
    let username = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);

    let membership = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let user_id =
            session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &owned.as_credentials())?;
        Ok(sync_group_store::read(&mut conn, user_id)?)
    })
    .await?;

    Ok(HttpResponse::Ok().json(MembershipView {
        synchronized: membership.synchronized,
        not_synchronized: membership.not_synchronized,
    }))
}

#[derive(Deserialize, Default)]
pub struct PostBody {
    #[serde(default)]
    synchronize: Vec<(String, String)>,
    #[serde(default, rename = "stop-synchronize")]
    stop_synchronize: Vec<String>,
}

/// `POST /sync-devices/{user}.json`: applies `{synchronize, "stop-synchronize"}`
/// and returns the resulting membership.
pub async fn post(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<PostBody>,
) -> WebResult<HttpResponse> {
    let username = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);
    let body = body.into_inner();

    let membership = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let user_id =
            session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &owned.as_credentials())?;

        Updater {
            user_id,
            synchronize: body.synchronize,
            stop_sync: body.stop_synchronize,
        }
        .run(&log, &mut conn)?;

        Ok(sync_group_store::read(&mut conn, user_id)?)
    })
    .await?;

    Ok(HttpResponse::Ok().json(MembershipView {
        synchronized: membership.synchronized,
        not_synchronized: membership.not_synchronized,
    }))
}
