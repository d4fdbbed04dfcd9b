use super::{ApiError, AuthUser};
use crate::app::App;
use crate::authz::{self, Action};
use crate::imports::abuse;
use crate::jobs;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use models::{ErrorCode, Id};
use std::io::Write;
use std::sync::Arc;

/// Accept an uploaded archive (multipart: `project_id` + `file`), persist
/// it to a scratch file, and enqueue asynchronous processing. Users with a
/// standing ban or threshold-crossing abuse history are turned away here,
/// before any bytes are inspected.
pub async fn start_notion_import(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    headers: axum::http::HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(reason) = abuse::should_block(&app, user.id).await? {
        tracing::warn!(user = user.id, reason, "blocked import attempt");
        return Err(ApiError::coded(
            StatusCode::FORBIDDEN,
            ErrorCode::TemporarilyBlocked,
            "imports are temporarily blocked for this account",
        ));
    }

    let mut project_id: Option<Id> = None;
    let mut filename = String::new();
    let mut archive_bytes: Option<bytes::Bytes> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            anyhow::anyhow!("malformed multipart body: {err}"),
        )
    })? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("project_id") => {
                let text = field.text().await.map_err(anyhow::Error::from)?;
                project_id = text.parse().ok();
            }
            Some("file") => {
                filename = field.file_name().unwrap_or("export.zip").to_string();
                archive_bytes = Some(field.bytes().await.map_err(|err| {
                    ApiError::new(
                        StatusCode::BAD_REQUEST,
                        "invalid_request",
                        anyhow::anyhow!("failed to read archive upload: {err}"),
                    )
                })?);
            }
            _ => (),
        }
    }

    let project_id = project_id.ok_or_else(|| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            anyhow::anyhow!("project_id is required"),
        )
    })?;
    let archive_bytes = archive_bytes.ok_or_else(|| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            anyhow::anyhow!("an archive file is required"),
        )
    })?;

    if !filename.to_lowercase().ends_with(".zip") {
        return Err(ApiError::coded(
            StatusCode::BAD_REQUEST,
            ErrorCode::InvalidContentType,
            "only .zip archives are supported",
        ));
    }
    if archive_bytes.len() as i64 > app.settings.max_file_size_bytes {
        return Err(ApiError::coded(
            StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::FileTooLarge,
            "archive exceeds the maximum upload size",
        ));
    }

    let project = relay_sql::projects::fetch_by_external_id(project_id, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("project"))?;
    let snapshot = authz::snapshot_for_project(user.id, project.id, &app.pool).await?;
    if !authz::can(user.id, Action::EditProject, &snapshot) {
        return Err(ApiError::not_found("project"));
    }

    // Persist the upload to a scratch file the worker owns from here on.
    let size_bytes = archive_bytes.len() as i64;
    let temp_path = {
        let bytes = archive_bytes.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<std::path::PathBuf> {
            let mut file = tempfile::NamedTempFile::new()?;
            file.write_all(&bytes)?;
            let (_, path) = file.keep()?;
            Ok(path)
        })
        .await
        .map_err(anyhow::Error::from)?
        .map_err(ApiError::from)?
    };

    let request_details = serde_json::json!({
        "ip_address": client_ip(&headers),
        "user_agent": headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(""),
    });

    let mut txn = app.pool.begin().await.map_err(ApiError::from)?;
    let job = relay_sql::imports::create_job(
        app.next_id(),
        user.id,
        project.id,
        &request_details,
        &mut txn,
    )
    .await?;
    relay_sql::imports::create_archive(
        job.id,
        &filename,
        size_bytes,
        &temp_path.to_string_lossy(),
        &mut txn,
    )
    .await?;
    txn.commit().await.map_err(ApiError::from)?;

    app.jobs
        .enqueue(
            jobs::PROCESS_NOTION_IMPORT,
            serde_json::json!({ "job_id": job.id }),
        )
        .await
        .map_err(ApiError::from)?;

    Ok((
        StatusCode::ACCEPTED,
        axum::Json(serde_json::json!({
            "id": job.external_id,
            "status": job.status,
        })),
    ))
}

fn client_ip(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
}
