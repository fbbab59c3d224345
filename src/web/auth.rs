//! `/auth/{user}/{login,logout}.json` (§6) plus the shared credential
//! extraction every other handler in this module uses to build a
//! [`crate::mediators::session_manager::Credentials`] from a request.

use crate::mediators::session_manager::{self, Credentials, Login};
use crate::web::{blocking, pooled_connection, AppState, WebResult};

use actix_web::cookie::Cookie;
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use actix_web_httpauth::headers::authorization::{Authorization, Basic};

const SESSION_COOKIE: &str = "sessionid";
const TOKEN_HEADER: &str = "X-GPodder-Token";

/// Everything [`Credentials`] needs, owned so it can cross into a
/// `web::block` closure (`Credentials` itself borrows, which doesn't
/// survive a `'static` closure boundary).
pub struct OwnedCredentials {
    pub path_username:  String,
    pub token_header:   Option<String>,
    pub session_cookie:  Option<String>,
    pub basic_user:      Option<String>,
    pub basic_pass:      Option<String>,
}

impl OwnedCredentials {
    pub fn as_credentials(&self) -> Credentials<'_> {
        Credentials {
            path_username:  &self.path_username,
            token_header:   self.token_header.as_deref(),
            session_cookie: self.session_cookie.as_deref(),
            basic_auth:     match (&self.basic_user, &self.basic_pass) {
                (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
                _ => None,
            },
        }
    }
}

pub fn credentials_from_request(req: &HttpRequest, path_username: &str) -> OwnedCredentials {
    let token_header = req
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_owned());

    let session_cookie = req.cookie(SESSION_COOKIE).map(|c| c.value().to_owned());

    let (basic_user, basic_pass) = match Authorization::<Basic>::parse(req) {
        Ok(auth) => {
            let basic = auth.into_scheme();
            (Some(basic.user_id().to_string()), basic.password().map(|p| p.to_string()))
        }
        Err(_) => (None, None),
    };

    OwnedCredentials {
        path_username: path_username.to_owned(),
        token_header,
        session_cookie,
        basic_user,
        basic_pass,
    }
}

/// `POST /auth/{user}/login.json`: authenticates (Basic only -- there's no
/// session yet) and issues a fresh `sessionid` cookie (§4.1's "Login").
pub async fn login(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> WebResult<HttpResponse> {
    let username = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);
    let user_agent = req
        .headers()
        .get(actix_web::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_owned());
    let client_ip = req.peer_addr().map(|a| a.ip().to_string());

    let is_production = state.environment.is_production();

    let token = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let creds = owned.as_credentials();
        let user_id = session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &creds)?;
        let token = Login {
            user_id,
            user_agent,
            client_ip,
        }
        .run(&log, &mut conn)?;
        Ok(token)
    })
    .await?;

    let cookie = Cookie::build(SESSION_COOKIE, token)
        .path("/")
        .http_only(true)
        .secure(is_production)
        .finish();

    Ok(HttpResponse::Ok().cookie(cookie).json(serde_json::json!({})))
}

/// `POST /auth/{user}/logout.json`: deletes the session named by the
/// `sessionid` cookie, if any, and expires the cookie client-side.
pub async fn logout(
    state: web::Data<AppState>,
    req: HttpRequest,
    _path: web::Path<String>,
) -> WebResult<HttpResponse> {
    let token = req.cookie(SESSION_COOKIE).map(|c| c.value().to_owned());

    if let Some(token) = token {
        blocking(move || {
            let mut conn = pooled_connection(&state)?;
            session_manager::logout(&mut conn, &token)?;
            Ok(())
        })
        .await?;
    }

    let mut expired = Cookie::build(SESSION_COOKIE, "").path("/").finish();
    expired.make_removal();

    Ok(HttpResponse::Ok().cookie(expired).json(serde_json::json!({})))
}
