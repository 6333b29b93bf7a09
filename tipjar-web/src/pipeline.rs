//! The per-request pipeline.
//!
//! Every request passes through the stages below, outermost first, before
//! reaching a route handler; responses travel back out in reverse order.
//!
//! 1. `log_request`: start the timer; log the outcome with elapsed time.
//! 2. `x_frame_options`: default `X-Frame-Options: SAMEORIGIN`.
//! 3. `delegate_error_to_template`: HTML error pages for non-JSON paths.
//! 4. `answer_options`: `OPTIONS` requests get an empty 200.
//! 5. `canonize`: redirect to the canonical scheme and host.
//! 6. `authenticate`: session cookie -> [`User`]; refresh the cookie.
//! 7. `csrf`: issue and check the CSRF token.
//! 8. `add_request_context`: locale and call-to-action range.
//! 9. `cache_static`: 304s and caching headers under `/assets/`.
//! 10. `set_misc_headers`: version and hardening headers.
//! 11. `report_errors`: forward 5xx causes to the error tracker.
//! 12. catch panics from handlers as 500s.

use std::any::Any;
use std::time::Instant;

use anyhow::anyhow;
use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{
    ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG, HOST, IF_NONE_MATCH,
    REFERER,
};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, TimeDelta, Utc};
use minijinja::context;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use tipjar::core::cta::{SuggestedRange, suggested_range};
use tipjar::core::locale::{DEFAULT_LOCALE, parse_accept_language, preferred_locale};
use tipjar::io::participants::Participant;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{info, warn};

use crate::error::{ApiError, ErrorPage, ReportedError};
use crate::response::{Cookie, read_cookie, redirect, set_cookie};
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "session";
pub const CSRF_COOKIE: &str = "csrf_token";
pub const CSRF_HEADER: &str = "x-csrf-token";
const CSRF_TOKEN_LENGTH: usize = 32;
const CSRF_COOKIE_DAYS: i64 = 365;

const VERSION_HEADER: HeaderName = HeaderName::from_static("x-tipjar-version");
const X_FRAME_OPTIONS: HeaderName = HeaderName::from_static("x-frame-options");
const X_CONTENT_TYPE_OPTIONS: HeaderName = HeaderName::from_static("x-content-type-options");
const X_XSS_PROTECTION: HeaderName = HeaderName::from_static("x-xss-protection");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// The signed-in participant, if any.
#[derive(Debug, Clone, Default)]
pub struct User {
    pub participant: Option<Participant>,
    session: Option<String>,
}

impl User {
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// The CSRF token in effect for this request.
#[derive(Debug, Clone)]
pub struct CsrfToken(pub String);

/// Template-facing values computed once per request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestContext {
    pub locale: String,
    pub accept_langs: Vec<String>,
    /// Suggested support range for participants who have not decided yet.
    pub cta: Option<SuggestedRange>,
}

/// Wrap `router` in the pipeline stages.
///
/// Layers added later wrap earlier ones, so they are applied innermost first.
pub fn apply(router: Router<AppState>, state: &AppState) -> Router<AppState> {
    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn_with_state(state.clone(), report_errors))
        .layer(middleware::from_fn_with_state(state.clone(), set_misc_headers))
        .layer(middleware::from_fn_with_state(state.clone(), cache_static))
        .layer(middleware::from_fn(add_request_context))
        .layer(middleware::from_fn_with_state(state.clone(), csrf))
        .layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .layer(middleware::from_fn_with_state(state.clone(), canonize))
        .layer(middleware::from_fn(answer_options))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            delegate_error_to_template,
        ))
        .layer(middleware::from_fn(x_frame_options))
        .layer(middleware::from_fn(log_request))
}

async fn log_request(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    if response.status().is_server_error() {
        warn!(%method, %path, status, elapsed_ms, "request failed");
    } else {
        info!(%method, %path, status, elapsed_ms, "request");
    }
    response
}

async fn x_frame_options(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    if !response.headers().contains_key(X_FRAME_OPTIONS) {
        response
            .headers_mut()
            .insert(X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));
    }
    response
}

/// Re-render JSON error responses as HTML pages unless a `.json` path was requested.
async fn delegate_error_to_template(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let wants_json = req.uri().path().ends_with(".json");
    let response = next.run(req).await;
    if wants_json {
        return response;
    }
    let Some(page) = response.extensions().get::<ErrorPage>().cloned() else {
        return response;
    };

    let html = state.templates.render(
        "error.html",
        context! {
            code => page.code,
            short => page.short,
            long => page.long,
            version => state.version(),
            asset_etag => &state.asset_etag,
            context => context! { locale => DEFAULT_LOCALE },
        },
    );
    match html {
        Ok(html) => {
            let (mut parts, _) = response.into_parts();
            parts.headers.remove(CONTENT_LENGTH);
            parts.headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
            Response::from_parts(parts, Body::from(html))
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "error page failed to render");
            response
        }
    }
}

async fn answer_options(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(req).await
}

/// Redirect requests that arrive on a non-canonical scheme or host.
async fn canonize(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let config = state.config();
    if config.canonical_host.is_empty() {
        return next.run(req).await;
    }

    let scheme = req
        .headers()
        .get(X_FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if scheme == config.canonical_scheme && host == config.canonical_host {
        return next.run(req).await;
    }

    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!(
        "{}://{}{}",
        config.canonical_scheme, config.canonical_host, path
    );
    info!(from_host = host, from_scheme = scheme, %url, "redirecting to canonical url");
    redirect(&url)
}

/// Resolve the session cookie to a participant and keep live sessions fresh.
async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let token = read_cookie(req.headers(), SESSION_COOKIE).map(str::to_string);
    let mut user = User::anonymous();
    let mut stale_cookie = false;

    if let Some(token) = token {
        match state.db().participant_for_session(&token) {
            Ok(Some(participant)) => {
                user = User {
                    participant: Some(participant),
                    session: Some(token),
                };
            }
            Ok(None) => stale_cookie = true,
            Err(err) => {
                let err = err.context("load session");
                state.tracker().report(&err);
                return ApiError::internal(err).into_response();
            }
        }
    }

    req.extensions_mut().insert(user.clone());
    let mut response = next.run(req).await;

    let days = state.config().session_days;
    if let Some(token) = &user.session {
        if let Err(err) = state.db().extend_session(token, days) {
            let err = err.context("extend session");
            state.tracker().report(&err);
        }
        set_cookie(
            response.headers_mut(),
            &Cookie {
                expires: days_from_now(i64::from(days)),
                secure: state.is_https(),
                ..Cookie::new(SESSION_COOKIE, token)
            },
        );
    } else if stale_cookie {
        set_cookie(
            response.headers_mut(),
            &Cookie {
                expires: days_from_now(-1),
                secure: state.is_https(),
                ..Cookie::new(SESSION_COOKIE, "")
            },
        );
    }
    response
}

/// `None` (a browser-session cookie) if the date is out of range.
fn days_from_now(days: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_days(days).and_then(|delta| Utc::now().checked_add_signed(delta))
}

fn is_valid_csrf_token(token: &str) -> bool {
    token.len() == CSRF_TOKEN_LENGTH && token.chars().all(|c| c.is_ascii_alphanumeric())
}

fn new_csrf_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CSRF_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// Issue a CSRF token cookie and require it back on unsafe methods.
async fn csrf(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let existing = read_cookie(req.headers(), CSRF_COOKIE)
        .filter(|token| is_valid_csrf_token(token))
        .map(str::to_string);
    let is_new = existing.is_none();
    let token = existing.unwrap_or_else(new_csrf_token);

    if !is_safe_method(req.method())
        && let Err(message) = check_csrf(&state, &req, &token, is_new)
    {
        warn!(path = %req.uri().path(), reason = %message, "csrf check failed");
        return ApiError::forbidden(message).into_response();
    }

    req.extensions_mut().insert(CsrfToken(token.clone()));
    let mut response = next.run(req).await;

    if is_new {
        set_cookie(
            response.headers_mut(),
            &Cookie {
                expires: days_from_now(CSRF_COOKIE_DAYS),
                http_only: false,
                secure: state.is_https(),
                ..Cookie::new(CSRF_COOKIE, &token)
            },
        );
    }
    response
}

fn check_csrf(state: &AppState, req: &Request, token: &str, is_new: bool) -> Result<(), String> {
    if state.is_https() {
        let referer = req
            .headers()
            .get(REFERER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| "Referer checking failed - no Referer.".to_string())?;
        let host = if state.config().canonical_host.is_empty() {
            req.headers()
                .get(HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        } else {
            state.config().canonical_host.clone()
        };
        let good = format!("https://{host}/");
        if !(referer == good.trim_end_matches('/') || referer.starts_with(&good)) {
            return Err(format!(
                "Referer checking failed - {referer} does not match {good}."
            ));
        }
    }

    if is_new {
        return Err("CSRF cookie not set.".to_string());
    }
    let provided = req
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if provided != token {
        return Err("CSRF token missing or incorrect.".to_string());
    }
    Ok(())
}

async fn add_request_context(mut req: Request, next: Next) -> Response {
    let header = req
        .headers()
        .get(ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok());
    let locale = preferred_locale(header);
    let accept_langs = header.map(parse_accept_language).unwrap_or_default();

    let cta = req
        .extensions()
        .get::<User>()
        .and_then(|user| user.participant.as_ref())
        .filter(|p| p.is_free_rider.is_none())
        .map(|p| suggested_range(p.usage_cents));

    req.extensions_mut().insert(RequestContext {
        locale,
        accept_langs,
        cta,
    });
    next.run(req).await
}

/// Serve 304s for unchanged assets and mark assets cacheable.
async fn cache_static(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !state.config().cache_static || !req.uri().path().starts_with("/assets/") {
        return next.run(req).await;
    }

    let etag = state.asset_etag.as_str();
    let matches = req
        .headers()
        .get(IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|tag| tag.trim() == etag || tag.trim() == "*"));
    let Ok(etag_value) = HeaderValue::from_str(etag) else {
        return next.run(req).await;
    };
    if matches {
        return (StatusCode::NOT_MODIFIED, [(ETAG, etag_value)]).into_response();
    }

    let versioned = req
        .uri()
        .query()
        .is_some_and(|q| q.split('&').any(|pair| pair.starts_with("etag=")));
    let mut response = next.run(req).await;
    if response.status() == StatusCode::OK {
        let cache_control = if versioned {
            "public, max-age=31536000, immutable"
        } else {
            "public, max-age=5"
        };
        let headers = response.headers_mut();
        headers.insert(ETAG, etag_value);
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(cache_control));
    }
    response
}

async fn set_misc_headers(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    if let Ok(version) = HeaderValue::from_str(state.version()) {
        headers.insert(VERSION_HEADER, version);
    }
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
    response
}

/// Forward the cause of every 5xx response to the error tracker.
async fn report_errors(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = next.run(req).await;

    if response.status().is_server_error() {
        warn!(%method, %path, status = response.status().as_u16(), "reporting server error");
        match response.extensions().get::<ReportedError>() {
            Some(ReportedError(err)) => state.tracker().report(err),
            None => {
                let err = anyhow!("{method} {path} returned {}", response.status());
                state.tracker().report(&err);
            }
        }
    }
    response
}

fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    };
    ApiError::internal(anyhow!("handler panicked: {message}")).into_response()
}
