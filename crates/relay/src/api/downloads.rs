//! Unauthenticated download-by-token: the per-file access token is the sole
//! credential. The relay only redirects to a short-lived storage-signed
//! URL; file bytes never stream through it.

use super::ApiError;
use crate::app::App;
use crate::files;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect};
use models::{Id, StorageProvider};
use std::sync::Arc;
use subtle::ConstantTimeEq;

#[derive(Debug, Default, serde::Deserialize)]
pub struct DownloadParams {
    pub provider: Option<StorageProvider>,
}

pub async fn download_by_token(
    State(app): State<Arc<App>>,
    Path((project_id, file_id, access_token)): Path<(Id, uuid::Uuid, String)>,
    Query(params): Query<DownloadParams>,
) -> Result<impl IntoResponse, ApiError> {
    let file = relay_sql::files::fetch_for_token_download(project_id, file_id, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("file"))?;

    // The token is the sole credential; compare it in constant time.
    let matches: bool = file
        .access_token
        .as_bytes()
        .ct_eq(access_token.as_bytes())
        .into();
    if !matches {
        return Err(ApiError::not_found("file"));
    }

    let blobs = relay_sql::files::verified_blobs(file.id, &app.pool).await?;
    let blob = files::best_blob(&blobs, params.provider).ok_or_else(|| {
        ApiError::new(
            StatusCode::NOT_FOUND,
            "not_found",
            anyhow::anyhow!("no verified copy available"),
        )
    })?;

    let store = app.storages.get(blob.provider)?;
    let url = store
        .generate_download_url(
            blob.bucket.as_deref(),
            &blob.object_key,
            app.settings.token_download_url_expiry,
            Some(&file.filename),
        )
        .await?;

    Ok(Redirect::temporary(&url))
}
