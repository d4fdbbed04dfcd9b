use super::{ApiError, AuthUser, Request};
use crate::app::App;
use crate::authz::{self, Action};
use crate::pages;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use models::Id;
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, serde::Serialize)]
pub struct PageOut {
    pub id: Id,
    pub title: String,
    pub details: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<relay_sql::pages::Page> for PageOut {
    fn from(page: relay_sql::pages::Page) -> Self {
        Self {
            id: page.external_id,
            title: page.title,
            details: page.details,
            created_at: page.created_at,
            updated_at: page.updated_at,
        }
    }
}

/// All pages editable by the caller, most recently updated first.
pub async fn list_pages(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
) -> Result<axum::Json<Vec<PageOut>>, ApiError> {
    let pages = relay_sql::pages::editable_pages(user.id, None, 200, &app.pool).await?;
    Ok(axum::Json(pages.into_iter().map(PageOut::from).collect()))
}

#[derive(Debug, serde::Deserialize)]
pub struct AutocompleteParams {
    #[serde(default)]
    q: String,
}

/// Case-insensitive title search over the caller's editable pages.
pub async fn autocomplete(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Query(params): Query<AutocompleteParams>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let q = (!params.q.is_empty()).then_some(params.q.as_str());
    let pages = relay_sql::pages::editable_pages(user.id, q, 10, &app.pool).await?;
    let items: Vec<serde_json::Value> = pages
        .into_iter()
        .map(|p| serde_json::json!({ "id": p.external_id, "title": p.title }))
        .collect();
    Ok(axum::Json(serde_json::json!({ "pages": items })))
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct PageIn {
    pub project_id: Id,
    #[validate(length(min = 1, max = 500))]
    pub title: String,
    pub details: Option<serde_json::Map<String, serde_json::Value>>,
    pub copy_from: Option<Id>,
}

pub async fn create_page(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Request(payload): Request<PageIn>,
) -> Result<impl IntoResponse, ApiError> {
    let project = relay_sql::projects::fetch_by_external_id(payload.project_id, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("project"))?;

    let snapshot = authz::snapshot_for_project(user.id, project.id, &app.pool).await?;
    if !authz::can(user.id, Action::ReadProject, &snapshot) {
        return Err(ApiError::not_found("project"));
    }

    let page = pages::create_page(
        &app,
        &user,
        &project,
        &payload.title,
        payload.details,
        payload.copy_from,
    )
    .await?;
    Ok((StatusCode::CREATED, axum::Json(PageOut::from(page))))
}

async fn fetch_accessible_page(
    app: &App,
    user: &relay_sql::users::User,
    external_id: Id,
) -> Result<relay_sql::pages::Page, ApiError> {
    let page = relay_sql::pages::fetch_by_external_id(external_id, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("page"))?;
    let snapshot = authz::snapshot_for_page(user.id, &page, &app.pool).await?;
    if !authz::can(user.id, Action::ReadPage, &snapshot) {
        return Err(ApiError::not_found("page"));
    }
    Ok(page)
}

pub async fn get_page(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Path(external_id): Path<Id>,
) -> Result<axum::Json<PageOut>, ApiError> {
    let page = fetch_accessible_page(&app, &user, external_id).await?;
    Ok(axum::Json(PageOut::from(page)))
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct PageUpdateIn {
    #[validate(length(min = 1, max = 500))]
    pub title: String,
    pub details: Option<serde_json::Map<String, serde_json::Value>>,
    pub mode: Option<pages::UpdateMode>,
}

pub async fn update_page(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Path(external_id): Path<Id>,
    Request(payload): Request<PageUpdateIn>,
) -> Result<axum::Json<PageOut>, ApiError> {
    let page = relay_sql::pages::fetch_by_external_id(external_id, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("page"))?;

    let updated = pages::update_page(
        &app,
        &user,
        &page,
        &payload.title,
        payload.details,
        payload.mode,
    )
    .await?;
    Ok(axum::Json(PageOut::from(updated)))
}

pub async fn delete_page(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Path(external_id): Path<Id>,
) -> Result<impl IntoResponse, ApiError> {
    let page = relay_sql::pages::fetch_by_external_id(external_id, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("page"))?;

    pages::soft_delete_page(&app, &user, &page).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn download_page(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Path(external_id): Path<Id>,
) -> Result<impl IntoResponse, ApiError> {
    let page = fetch_accessible_page(&app, &user, external_id).await?;
    let (filename, content_type, body) = pages::render_download(&page);

    let headers = [
        (
            axum::http::header::CONTENT_TYPE,
            format!("{content_type}; charset=utf-8"),
        ),
        (
            axum::http::header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
    ];
    Ok((headers, body))
}

pub async fn create_access_code(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Path(external_id): Path<Id>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let page = fetch_accessible_page(&app, &user, external_id).await?;

    let access_code = match page.access_code {
        Some(code) => code,
        None => {
            let code = pages::generate_access_code();
            relay_sql::pages::set_access_code(page.id, Some(&code), &app.pool).await?;
            code
        }
    };
    Ok(axum::Json(serde_json::json!({ "access_code": access_code })))
}

pub async fn remove_access_code(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Path(external_id): Path<Id>,
) -> Result<impl IntoResponse, ApiError> {
    let page = fetch_accessible_page(&app, &user, external_id).await?;
    relay_sql::pages::set_access_code(page.id, None, &app.pool).await?;
    Ok(StatusCode::NO_CONTENT)
}
