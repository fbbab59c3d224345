//! Legacy Simple API v1 (§6): `/toplist/{n}.{fmt}`, `/search.{fmt}`,
//! `/subscriptions/{user}/{dev}.{fmt}`, `fmt ∈ {json, jsonp, txt, opml,
//! xml}`. Directory/search/toplist are "thin database queries; not the
//! hard part" per spec.md §1, so this module stays a single aggregate
//! query per endpoint plus the shared format-dependent renderer.
//!
//! Grounded on the host's `podcast_crawler`/`podcast_reingester`
//! `diesel::sql_query` + `QueryableByName` idiom for the subselect/
//! aggregate the Diesel DSL can't express (a cross-user subscriber count
//! keyed by feed URL), translated to diesel 2.x's `#[diesel(...)]`
//! attribute syntax. Format dispatch (json/jsonp/txt/opml/xml) and the
//! `updateSubscriptionsSimple`/`getSubscriptionsSimple` behavior are
//! grounded on `original_source/gpodder-api/internal/api/directory.go` and
//! `subscriptions.go`.

use crate::errors::*;
use crate::mediators::{device_registry, session_manager, subscription_engine};
use crate::web::auth::credentials_from_request;
use crate::web::opml::{self, OutlineEntry};
use crate::web::{blocking, pooled_connection, AppState, WebError, WebResult};

use actix_web::http::header::ContentType;
use actix_web::{web, HttpRequest, HttpResponse};
use diesel::pg::PgConnection;
use diesel::sql_types::{BigInt, Text};
use serde::{Deserialize, Serialize};

pub const MAX_DIRECTORY_ITEMS: i64 = 100;
pub const MAX_SUBSCRIPTIONS: usize = subscription_engine::MAX_URLS_PER_REQUEST;

#[derive(Clone, Debug, QueryableByName, Serialize)]
struct DirectoryRow {
    #[diesel(sql_type = Text)]
    feed_url: String,
    #[diesel(sql_type = Text)]
    title: String,
    #[diesel(sql_type = BigInt)]
    subscribers: i64,
}

fn query_toplist(conn: &mut PgConnection, limit: i64) -> crate::errors::Result<Vec<DirectoryRow>> {
    use diesel::prelude::*;

    diesel::sql_query(
        "SELECT feed_url, max(title) AS title, count(DISTINCT user_id) AS subscribers \
         FROM podcast GROUP BY feed_url ORDER BY subscribers DESC, feed_url ASC LIMIT $1",
    )
    .bind::<BigInt, _>(limit)
    .load(conn)
    .chain_err(|| "error querying podcast toplist")
}

fn query_search(conn: &mut PgConnection, terms: &str, limit: i64) -> crate::errors::Result<Vec<DirectoryRow>> {
    use diesel::prelude::*;

    let pattern = format!("%{}%", terms.replace('%', "\\%").replace('_', "\\_"));
    diesel::sql_query(
        "SELECT feed_url, max(title) AS title, count(DISTINCT user_id) AS subscribers \
         FROM podcast WHERE title ILIKE $1 OR feed_url ILIKE $1 \
         GROUP BY feed_url ORDER BY subscribers DESC, feed_url ASC LIMIT $2",
    )
    .bind::<Text, _>(pattern)
    .bind::<BigInt, _>(limit)
    .load(conn)
    .chain_err(|| "error querying podcast search")
}

#[derive(Deserialize)]
pub struct ToplistQuery {
    scale_logo: Option<i32>,
}

/// `GET /toplist/{n}.{fmt}`: the `n` most-subscribed feeds across all
/// users, `n` clamped to `MAX_DIRECTORY_ITEMS`.
pub async fn toplist(
    state: web::Data<AppState>,
    path: web::Path<(i64, String)>,
    _query: web::Query<ToplistQuery>,
) -> WebResult<HttpResponse> {
    let (n, fmt) = path.into_inner();
    let limit = n.clamp(0, MAX_DIRECTORY_ITEMS);

    let rows = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        Ok(query_toplist(&mut conn, limit)?)
    })
    .await?;

    render_directory(&fmt, rows, None)
}

#[derive(Deserialize)]
pub struct SearchQuery {
    q:          Option<String>,
    scale_logo: Option<i32>,
}

/// `GET /search.{fmt}?q=...`: a substring search across feed title/URL,
/// ranked the same way as the toplist. The reference implementation
/// truncates an overlong query to 100 characters rather than rejecting it.
pub async fn search(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<SearchQuery>,
) -> WebResult<HttpResponse> {
    let fmt = path.into_inner();
    let mut terms = query.into_inner().q.unwrap_or_default();
    terms.truncate(100);

    let rows = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        Ok(query_search(&mut conn, &terms, MAX_DIRECTORY_ITEMS)?)
    })
    .await?;

    render_directory(&fmt, rows, None)
}

fn render_directory(fmt: &str, rows: Vec<DirectoryRow>, jsonp_callback: Option<&str>) -> WebResult<HttpResponse> {
    match fmt {
        "json" => Ok(HttpResponse::Ok().json(rows)),
        "jsonp" => render_jsonp(&rows, jsonp_callback),
        "txt" => {
            let body = rows.iter().map(|r| r.feed_url.as_str()).collect::<Vec<_>>().join("\n");
            Ok(HttpResponse::Ok().content_type(ContentType::plaintext()).body(body))
        }
        "opml" => {
            let entries: Vec<OutlineEntry> = rows
                .into_iter()
                .map(|r| OutlineEntry {
                    title:    r.title,
                    feed_url: r.feed_url,
                })
                .collect();
            Ok(HttpResponse::Ok().content_type("text/xml").body(opml::render(&entries)))
        }
        "xml" => {
            let body = render_xml(&rows);
            Ok(HttpResponse::Ok().content_type("text/xml").body(body))
        }
        other => Err(WebError(
            crate::errors::error::invalid_input(format!("unrecognized format: {}", other)).into(),
        )),
    }
}

fn render_jsonp(rows: &[DirectoryRow], callback: Option<&str>) -> WebResult<HttpResponse> {
    let callback = callback.unwrap_or("callback");
    if !is_valid_callback_name(callback) {
        return Err(WebError(
            crate::errors::error::invalid_input("invalid jsonp callback name").into(),
        ));
    }
    let payload = serde_json::to_string(rows).map_err(|e| WebError(crate::errors::Error::from(e)))?;
    let body = format!("{}({});", callback, payload);
    Ok(HttpResponse::Ok()
        .content_type("application/javascript")
        .body(body))
}

/// A callback name safe to splice into a `text/javascript` response
/// unescaped: identifier characters and dots only (for `a.b.callback`
/// forms), matching the reference's `isValidCallbackName`.
fn is_valid_callback_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$')
}

fn render_xml(rows: &[DirectoryRow]) -> String {
    use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
    use quick_xml::Writer;
    use std::io::Cursor;

    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Start(BytesStart::new("podcasts"))).unwrap();
    for row in rows {
        writer.write_event(Event::Start(BytesStart::new("podcast"))).unwrap();

        writer.write_event(Event::Start(BytesStart::new("title"))).unwrap();
        writer.write_event(Event::Text(BytesText::new(&row.title))).unwrap();
        writer.write_event(Event::End(BytesEnd::new("title"))).unwrap();

        writer.write_event(Event::Start(BytesStart::new("url"))).unwrap();
        writer.write_event(Event::Text(BytesText::new(&row.feed_url))).unwrap();
        writer.write_event(Event::End(BytesEnd::new("url"))).unwrap();

        writer.write_event(Event::Start(BytesStart::new("subscribers"))).unwrap();
        writer
            .write_event(Event::Text(BytesText::new(&row.subscribers.to_string())))
            .unwrap();
        writer.write_event(Event::End(BytesEnd::new("subscribers"))).unwrap();

        writer.write_event(Event::End(BytesEnd::new("podcast"))).unwrap();
    }
    writer.write_event(Event::End(BytesEnd::new("podcasts"))).unwrap();

    String::from_utf8(writer.into_inner().into_inner()).expect("quick_xml only ever writes UTF-8")
}

#[derive(Deserialize)]
pub struct SubscriptionsQuery {
    jsonp: Option<String>,
}

/// `GET /subscriptions/{user}/{dev}.{fmt}`: the legacy v1 read, which
/// auto-creates the device on first reference (matching the v2 auto-create
/// contract) and renders the current set in the requested format.
pub async fn subscriptions(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String, String)>,
    query: web::Query<SubscriptionsQuery>,
) -> WebResult<HttpResponse> {
    let (username, device_name, fmt) = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);
    let jsonp = query.into_inner().jsonp;

    let urls = blocking(move || {
        let mut conn = pooled_connection(&state)?;
        let user_id =
            session_manager::authenticate(&log, &mut conn, state.user_store.as_ref(), &owned.as_credentials())?;
        device_registry::ensure_device(&log, &mut conn, user_id, &device_name)?;
        Ok(subscription_engine::current_set(&mut conn, user_id)?)
    })
    .await?;

    match fmt.as_str() {
        "json" => Ok(HttpResponse::Ok().json(urls)),
        "jsonp" => {
            let callback = jsonp.unwrap_or_else(|| "callback".to_owned());
            if !is_valid_callback_name(&callback) {
                return Err(WebError(
                    crate::errors::error::invalid_input("invalid jsonp callback name").into(),
                ));
            }
            let payload =
                serde_json::to_string(&urls).map_err(|e| WebError(crate::errors::Error::from(e)))?;
            Ok(HttpResponse::Ok()
                .content_type("application/javascript")
                .body(format!("{}({});", callback, payload)))
        }
        "txt" => Ok(HttpResponse::Ok()
            .content_type(ContentType::plaintext())
            .body(urls.join("\n"))),
        "opml" => {
            let entries: Vec<OutlineEntry> = urls
                .into_iter()
                .map(|url| OutlineEntry {
                    title:    url.clone(),
                    feed_url: url,
                })
                .collect();
            Ok(HttpResponse::Ok().content_type("text/xml").body(opml::render(&entries)))
        }
        other => Err(WebError(
            crate::errors::error::invalid_input(format!("unrecognized format: {}", other)).into(),
        )),
    }
}

/// `PUT /subscriptions/{user}/{dev}.{fmt}`: the legacy v1 write -- replaces
/// the device's full subscription set, parsing the body per `fmt` (JSON
/// array, newline-delimited text, or an OPML document's `xmlUrl`
/// attributes), mirroring the reference's `updateSubscriptionsSimple`.
pub async fn update_subscriptions(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(String, String, String)>,
    body: web::Bytes,
) -> WebResult<HttpResponse> {
    let (username, device_name, fmt) = path.into_inner();
    let log = crate::middleware::log(&req, &state.log);
    let owned = credentials_from_request(&req, &username);
    let urls = parse_simple_body(&fmt, &body)?;

    if urls.len() > MAX_SUBSCRIPTIONS {
        return Err(WebError(
            crate::errors::error::invalid_input(format!(
                "at most {} URLs are accepted per request",
                MAX_SUBSCRIPTIONS
            ))
            .into(),
        ));
    }

    blocking(move || {
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

    Ok(HttpResponse::Ok().json(serde_json::json!({})))
}

fn parse_simple_body(fmt: &str, body: &web::Bytes) -> WebResult<Vec<String>> {
    let text = String::from_utf8_lossy(body);
    match fmt {
        "json" | "jsonp" => serde_json::from_str::<Vec<String>>(&text).map_err(|e| {
            WebError(crate::errors::error::invalid_input(format!("malformed JSON body: {}", e)).into())
        }),
        "txt" => Ok(text.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_owned).collect()),
        "opml" => Ok(extract_opml_xml_urls(&text)),
        other => Err(WebError(
            crate::errors::error::invalid_input(format!("unrecognized format: {}", other)).into(),
        )),
    }
}

/// Regex-extracts `xmlUrl="..."` attributes from an OPML body -- matching
/// the reference's `opmlOutlineRegex` rather than a full XML parse, since
/// Simple API clients' OPML bodies are not guaranteed well-formed.
fn extract_opml_xml_urls(text: &str) -> Vec<String> {
    lazy_static::lazy_static! {
        static ref XML_URL_RE: regex::Regex = regex::Regex::new(r#"xmlUrl="([^"]*)""#).unwrap();
    }
    XML_URL_RE
        .captures_iter(text)
        .map(|c| c[1].to_owned())
        .collect()
}
