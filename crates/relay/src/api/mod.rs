//! The REST and websocket surface. All /api routes require an
//! authenticated user (bearer token or session cookie); the download-by-
//! token route and the websocket upgrade manage their own authentication.

use crate::app::App;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use std::sync::Arc;
use tracing::Instrument;

mod ask;
mod downloads;
mod error;
mod files;
mod imports;
mod invitations;
mod links;
mod mentions;
mod pages;
mod projects;

pub use error::ApiError;

/// Request wraps a JSON-deserialized request type T which also implements
/// the validator::Validate trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct Request<T>(pub T);

/// Rejection is an error type of reasons why an API request may fail.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    JsonError(#[from] axum::extract::rejection::JsonRejection),
}

#[axum::async_trait]
impl<T, S> axum::extract::FromRequest<S> for Request<T>
where
    T: serde::de::DeserializeOwned + validator::Validate,
    S: Send + Sync,
    axum::extract::Json<T>:
        axum::extract::FromRequest<S, Rejection = axum::extract::rejection::JsonRejection>,
{
    type Rejection = Rejection;

    async fn from_request(
        req: axum::extract::Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let axum::extract::Json(value) = axum::extract::Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Request(value))
    }
}

impl axum::response::IntoResponse for Rejection {
    fn into_response(self) -> axum::response::Response {
        let message = format!("Input validation error: [{self}]").replace('\n', ", ");
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            anyhow::anyhow!(message),
        )
        .into_response()
    }
}

/// The authenticated caller, attached to request extensions by the
/// `authenticate` middleware.
#[derive(Debug, Clone)]
pub struct AuthUser(pub relay_sql::users::User);

#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(ApiError::not_authenticated)
    }
}

/// Bearer token from the Authorization header, or the session cookie.
pub fn extract_token(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }
    let cookies = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        if parts.next() == Some("session") {
            return parts.next().map(str::to_string);
        }
    }
    None
}

pub async fn authenticate_request(
    app: &App,
    headers: &axum::http::HeaderMap,
) -> Option<relay_sql::users::User> {
    let token = extract_token(headers)?;
    match relay_sql::users::fetch_by_token(&token, &app.pool).await {
        Ok(user) => user,
        Err(err) => {
            tracing::error!(?err, "token lookup failed");
            None
        }
    }
}

/// Middleware which resolves the caller before proceeding, and attaches the
/// verified user to the request.
async fn authenticate(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let Some(user) = authenticate_request(&app, req.headers()).await else {
        return ApiError::not_authenticated().into_response();
    };
    req.extensions_mut().insert(AuthUser(user));
    next.run(req).await
}

fn generate_request_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Middleware giving every request a server-generated id. Log lines inside
/// the request span carry `[src:<deployment>] [req:<id>]`, and the id is
/// echoed back in the X-Request-ID header.
async fn request_id(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = generate_request_id();
    let span = tracing::info_span!(
        "request",
        src = %app.settings.deployment_id,
        req = %req_id,
    );

    let mut response = next.run(req).instrument(span).await;
    if let Ok(value) = req_id.parse() {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Build the relay's router.
pub fn build_router(app: Arc<App>, allow_origin: &[String]) -> anyhow::Result<axum::Router<()>> {
    use anyhow::Context;

    let allow_origin = allow_origin
        .iter()
        .map(|o| o.parse())
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse allowed origins")?;

    let allow_headers = [
        "Cache-Control",
        "Content-Language",
        "Content-Length",
        "Content-Type",
        "Expires",
        "Last-Modified",
        "Pragma",
        "Authorization",
    ]
    .into_iter()
    .map(|h| h.parse().unwrap())
    .collect::<Vec<_>>();

    let cors = tower_http::cors::CorsLayer::new()
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_origin(tower_http::cors::AllowOrigin::list(allow_origin))
        .allow_headers(allow_headers);

    let authed = axum::Router::new()
        .route("/api/ask/", post(ask::ask))
        .route("/api/pages/", get(pages::list_pages).post(pages::create_page))
        .route("/api/pages/autocomplete/", get(pages::autocomplete))
        .route(
            "/api/pages/:external_id/",
            get(pages::get_page)
                .put(pages::update_page)
                .delete(pages::delete_page),
        )
        .route("/api/pages/:external_id/download/", get(pages::download_page))
        .route(
            "/api/pages/:external_id/access-code/",
            post(pages::create_access_code).delete(pages::remove_access_code),
        )
        .route("/api/pages/:external_id/links/", get(links::page_links))
        .route("/api/pages/:external_id/links/sync/", post(links::sync_links))
        .route("/api/pages/:external_id/editors/", post(invitations::invite_page_editor))
        .route("/api/mentions/", get(mentions::list_mentions))
        .route(
            "/api/projects/",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/api/projects/:external_id/",
            axum::routing::delete(projects::delete_project),
        )
        .route(
            "/api/projects/:external_id/editors/",
            get(projects::list_editors).post(invitations::invite_project_editor),
        )
        .route(
            "/api/projects/:external_id/editors/:user_id/",
            put(invitations::update_editor_role).delete(invitations::remove_editor),
        )
        .route(
            "/api/invitations/:token/accept/",
            post(invitations::accept_invitation),
        )
        .route("/api/files/", post(files::create_upload))
        .route("/api/files/:external_id/download/", get(files::download_file))
        .route("/api/files/:external_id/finalize/", post(files::finalize_upload))
        .route("/api/imports/notion/", post(imports::start_notion_import))
        .route_layer(axum::middleware::from_fn_with_state(
            app.clone(),
            authenticate,
        ));

    let public = axum::Router::new()
        .route(
            "/files/:project_id/:file_id/:access_token/",
            get(downloads::download_by_token),
        )
        .route(
            "/ws/pages/:page_external_id/",
            get(crate::collab::connection::ws_pages),
        )
        .route("/healthz", get(healthz));

    let router = axum::Router::new()
        .merge(authed)
        .merge(public)
        .layer(axum::middleware::from_fn_with_state(app.clone(), request_id))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app);

    Ok(router)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
