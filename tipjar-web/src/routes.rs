//! HTTP route handlers.

use axum::Router;
use axum::extract::{Extension, Form, Path, State};
use axum::response::{Html, Json};
use axum::routing::{get, post};
use minijinja::context;
use serde::{Deserialize, Serialize};
use tipjar::io::participants::ChangeUsernameError;
use tipjar::io::stats::{GlobalStats, global_stats};
use tower_http::services::ServeDir;

use crate::error::ApiError;
use crate::pipeline::{self, CsrfToken, RequestContext, User};
use crate::state::AppState;

const BLURB: &str = "\
Tipjar is a way to give small, weekly amounts to the people who make the \
things you love. Read more at https://tipjar.example/about/.";

/// Build the full application: routes, static assets, and the request pipeline.
pub fn router(state: AppState) -> Router {
    let assets = ServeDir::new(state.config().www_root.join("assets"));
    let routes = Router::new()
        .route("/", get(homepage))
        .route("/health", get(health))
        .route("/about/stats.json", get(get_stats))
        .route("/{username}/public.json", get(get_public))
        .route("/{username}/username.json", post(change_username))
        .nest_service("/assets", assets)
        .fallback(not_found);
    pipeline::apply(routes, &state).with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn not_found() -> ApiError {
    ApiError::not_found("Sorry, there's nothing here.")
}

/// GET / - the homepage.
async fn homepage(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(ctx): Extension<RequestContext>,
    Extension(csrf): Extension<CsrfToken>,
) -> Result<Html<String>, ApiError> {
    let stats = global_stats(state.db())?;
    let html = state.templates.render(
        "index.html",
        context! {
            user => user.participant,
            context => ctx,
            csrf_token => csrf.0,
            stats => stats,
            blurb => BLURB,
            version => state.version(),
            asset_etag => &state.asset_etag,
        },
    )?;
    Ok(Html(html))
}

/// GET /about/stats.json - site-wide stats from the last refresh.
async fn get_stats(State(state): State<AppState>) -> Result<Json<GlobalStats>, ApiError> {
    global_stats(state.db())?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Stats have not been computed yet."))
}

#[derive(Serialize)]
struct PublicInfo {
    id: i64,
    username: String,
    claimed: bool,
}

/// GET /{username}/public.json - what anyone may know about a participant.
async fn get_public(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<PublicInfo>, ApiError> {
    let participant = state
        .db()
        .participant_by_username(&username)?
        .ok_or_else(|| ApiError::not_found(format!("No participant named '{username}'.")))?;
    Ok(Json(PublicInfo {
        id: participant.id,
        claimed: participant.is_claimed(),
        username: participant.username,
    }))
}

#[derive(Deserialize)]
struct UsernameForm {
    #[serde(default)]
    username: String,
}

#[derive(Debug, Serialize)]
struct UsernameChanged {
    username: String,
}

/// POST /{username}/username.json - rename the signed-in participant.
async fn change_username(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(user): Extension<User>,
    Form(form): Form<UsernameForm>,
) -> Result<Json<UsernameChanged>, ApiError> {
    let Some(signed_in) = user.participant else {
        return Err(ApiError::forbidden("You need to sign in first."));
    };
    let participant = state
        .db()
        .participant_by_username(&username)?
        .ok_or_else(|| ApiError::not_found(format!("No participant named '{username}'.")))?;
    if participant.id != signed_in.id {
        return Err(ApiError::forbidden(
            "You are not authorized to change this username.",
        ));
    }

    match state
        .db()
        .change_username(participant.id, &form.username, &state.website.restricted)
    {
        Ok(username) => Ok(Json(UsernameChanged { username })),
        Err(ChangeUsernameError::Invalid(err)) => Err(ApiError::bad_request(err.to_string())),
        Err(ChangeUsernameError::Other(err)) => Err(ApiError::internal(err)),
    }
}
