use super::{ApiError, AuthUser, Request};
use crate::app::App;
use crate::authz::{self, Action};
use crate::files;
use crate::rate_limit;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use models::Id;
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, serde::Deserialize, Validate)]
pub struct FileIn {
    pub project_id: Id,
    #[validate(length(min = 1, max = 512))]
    pub filename: String,
    #[validate(length(min = 1, max = 128))]
    pub content_type: String,
    #[validate(range(min = 1))]
    pub size_bytes: i64,
    pub checksum_sha256: Option<String>,
}

/// Create a pending upload and return the signed PUT URL, valid 10 minutes.
pub async fn create_upload(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Request(payload): Request<FileIn>,
) -> Result<impl IntoResponse, ApiError> {
    let decision = app
        .rate_limiter
        .check_and_increment(
            &rate_limit::upload_key(user.id),
            app.settings.upload_rate_limit,
            app.settings.upload_rate_window_secs,
        )
        .await;
    if !decision.allowed {
        return Err(ApiError::rate_limited("too many uploads; try again later"));
    }

    let project = relay_sql::projects::fetch_by_external_id(payload.project_id, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("project"))?;
    let snapshot = authz::snapshot_for_project(user.id, project.id, &app.pool).await?;
    if !authz::can(user.id, Action::EditProject, &snapshot) {
        return Err(ApiError::not_found("project"));
    }

    let created = files::create_upload(
        &app,
        &user,
        &project,
        &payload.filename,
        &payload.content_type,
        payload.size_bytes,
        payload.checksum_sha256.as_deref(),
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        axum::Json(serde_json::json!({
            "id": created.file.external_id,
            "status": created.file.status,
            "access_token": created.file.access_token,
            "upload_url": created.upload_url,
            "upload_headers": created.upload_headers,
            "expires_at": created.expires_at,
        })),
    ))
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct DownloadParams {
    pub provider: Option<models::StorageProvider>,
}

/// Authenticated download: redirect to a storage-signed URL, valid 10
/// minutes. Bytes never stream through the relay.
pub async fn download_file(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Path(external_id): Path<uuid::Uuid>,
    axum::extract::Query(params): axum::extract::Query<DownloadParams>,
) -> Result<impl IntoResponse, ApiError> {
    let file = relay_sql::files::fetch_by_external_id(external_id, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("file"))?;
    if file.deleted_at.is_some() || file.status != models::FileStatus::Available {
        return Err(ApiError::not_found("file"));
    }

    let snapshot = authz::snapshot_for_project(user.id, file.project_id, &app.pool).await?;
    if !authz::can(user.id, Action::ReadProject, &snapshot) {
        return Err(ApiError::not_found("file"));
    }

    let blobs = relay_sql::files::verified_blobs(file.id, &app.pool).await?;
    let blob = files::best_blob(&blobs, params.provider)
        .ok_or_else(|| ApiError::not_found("file"))?;

    let store = app.storages.get(blob.provider)?;
    let url = store
        .generate_download_url(
            blob.bucket.as_deref(),
            &blob.object_key,
            app.settings.download_url_expiry,
            Some(&file.filename),
        )
        .await?;
    Ok(axum::response::Redirect::temporary(&url))
}

#[derive(Debug, Default, serde::Deserialize, Validate)]
pub struct FinalizeIn {
    pub etag: Option<String>,
}

/// Verify the stored object and flip the file to available. Idempotent.
pub async fn finalize_upload(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Path(external_id): Path<uuid::Uuid>,
    payload: Option<Request<FinalizeIn>>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let file = relay_sql::files::fetch_by_external_id(external_id, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("file"))?;

    let snapshot = authz::snapshot_for_project(user.id, file.project_id, &app.pool).await?;
    if !authz::can(user.id, Action::EditProject, &snapshot) {
        return Err(ApiError::not_found("file"));
    }

    let etag = payload.and_then(|Request(p)| p.etag);
    let finalized = files::finalize_upload(&app, file.id, etag.as_deref())
        .await
        .map_err(|err| {
            ApiError::new(StatusCode::BAD_REQUEST, "finalize_failed", err)
        })?;

    Ok(axum::Json(serde_json::json!({
        "id": finalized.external_id,
        "status": finalized.status,
    })))
}
