//! `/lists/{user}` and `/lists/{user}/list/{name}` (§6, §4.6).

use crate::mediators::lists_store::{self, Creator, Destroyer, Updater};
use crate::mediators::session_manager;
use crate::web::auth::credentials_from_request;
use crate::web::{blocking, pooled_connection, AppState, WebResult};

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct ListView {
    name:  String,
    title: String,
    urls:  Vec<String>,
}

/// `GET /lists/{user}`: every list the user owns, each with its current
/// entries.
pub async fn index(
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

        let lists = lists_store::list_for_user(&mut conn, user_id)?;
        let mut views = Vec::with_capacity(lists.len());
        for list in lists {
            let urls = lists_store::entries(&mut conn, list.id)?;
            views.push(ListView {
                name: list.name,
                title: list.title,
                urls,
            });
        }
        Ok(views)
    })
    .await?;

    Ok(HttpResponse::Ok().json(views))
}

#[derive(Deserialize)]
pub struct CreateQuery {
    title: String,
}

/// `POST /lists/{user}?title=...`: creates a list, with the body holding
/// its initial entries -- either a JSON array or newline-delimited plain
/// text, mirroring the Simple API's input leniency (§4.10).
pub async fn create(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    query: web::Query<CreateQuery>,
    body: web::Bytes,
) -> WebResult<HttpResponse> {
    let username = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);
    let title = query.into_inner().title;
    let urls = parse_url_list_body(&req, &body);

    let name = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let user_id =
            session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &owned.as_credentials())?;

        let result = Creator { user_id, title, urls: urls.clone() }.run(&log, &mut conn)?;
        Ok(result.list.name)
    })
    .await?;

    // §4.6: creation redirects to the list's canonical URL rather than
    // returning a body, matching the legacy gpodder.net Simple API's
    // list-creation response.
    Ok(HttpResponse::SeeOther()
        .append_header((
            actix_web::http::header::LOCATION,
            format!("/api/2/lists/{}/list/{}", username, name),
        ))
        .finish())
}

fn parse_url_list_body(req: &HttpRequest, body: &web::Bytes) -> Vec<String> {
    let is_json = req
        .headers()
        .get(actix_web::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("json"))
        .unwrap_or(false);

    let text = String::from_utf8_lossy(body);

    if is_json {
        if let Ok(urls) = serde_json::from_str::<Vec<String>>(&text) {
            return urls;
        }
    }

    text.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_owned).collect()
}

/// `GET /lists/{user}/list/{name}`: one list's entries.
pub async fn show(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
) -> WebResult<HttpResponse> {
    let (username, name) = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);

    let view = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let user_id =
            session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &owned.as_credentials())?;

        let list = lists_store::find(&mut conn, user_id, &name)?
            .ok_or_else(|| crate::errors::Error::from(crate::errors::error::not_found("list", name.clone())))?;
        let urls = lists_store::entries(&mut conn, list.id)?;

        Ok(ListView {
            name: list.name,
            title: list.title,
            urls,
        })
    })
    .await?;

    Ok(HttpResponse::Ok().json(view))
}

/// `PUT /lists/{user}/list/{name}`: replaces a list's entries wholesale.
pub async fn update(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
    body: web::Json<Vec<String>>,
) -> WebResult<HttpResponse> {
    let (username, name) = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);
    let urls = body.into_inner();

    let view = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let user_id =
            session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &owned.as_credentials())?;

        let list = Updater {
            user_id,
            name,
            urls: urls.clone(),
        }
        .run(&log, &mut conn)?;

        Ok(ListView {
            name: list.name,
            title: list.title,
            urls,
        })
    })
    .await?;

    Ok(HttpResponse::Ok().json(view))
}

/// `DELETE /lists/{user}/list/{name}`.
pub async fn destroy(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
) -> WebResult<HttpResponse> {
    let (username, name) = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);

    blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let user_id =
            session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &owned.as_credentials())?;

        Destroyer { user_id, name }.run(&log, &mut conn)?;
        Ok(())
    })
    .await?;

    Ok(HttpResponse::NoContent().finish())
}
