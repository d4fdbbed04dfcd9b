//! File upload lifecycle: create a pending upload with a signed PUT URL,
//! finalize by verifying the stored object, pick the best blob for
//! download, and replicate verified blobs across providers.

use crate::app::App;
use anyhow::Context;
use models::{BlobStatus, FileStatus, StorageProvider};
use relay_sql::files::{Blob, FileUpload};
use relay_sql::users::User;

/// Storage object key: the user's external id (never the internal row id)
/// scopes the object; the filename keeps only ASCII alphanumerics and
/// `.-_` to avoid homograph tricks and backend encoding issues.
pub fn generate_object_key(
    user_external_id: models::Id,
    file_external_id: uuid::Uuid,
    filename: &str,
) -> String {
    let safe: String = filename
        .chars()
        .filter(|c| c.is_ascii() && (c.is_alphanumeric() || matches!(c, '.' | '-' | '_')))
        .collect();
    let safe = if safe.is_empty() { "file" } else { &safe };
    format!("users/{user_external_id}/files/{file_external_id}/{safe}")
}

pub fn generate_access_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::encode_config(bytes, base64::URL_SAFE_NO_PAD)
}

pub struct CreatedUpload {
    pub file: FileUpload,
    pub upload_url: String,
    pub upload_headers: std::collections::HashMap<String, String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("file size {size} exceeds maximum {max} bytes")]
    FileTooLarge { size: i64, max: i64 },
    #[error("content type {0:?} is not allowed")]
    InvalidContentType(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl UploadError {
    pub fn code(&self) -> models::ErrorCode {
        match self {
            UploadError::FileTooLarge { .. } => models::ErrorCode::FileTooLarge,
            UploadError::InvalidContentType(_) => models::ErrorCode::InvalidContentType,
            UploadError::Other(_) => models::ErrorCode::Unexpected,
        }
    }
}

pub async fn create_upload(
    app: &App,
    user: &User,
    project: &relay_sql::projects::Project,
    filename: &str,
    content_type: &str,
    size_bytes: i64,
    checksum_sha256: Option<&str>,
) -> Result<CreatedUpload, UploadError> {
    if size_bytes > app.settings.max_file_size_bytes {
        return Err(UploadError::FileTooLarge {
            size: size_bytes,
            max: app.settings.max_file_size_bytes,
        });
    }
    if !app
        .settings
        .allowed_content_types
        .iter()
        .any(|t| t == content_type)
    {
        return Err(UploadError::InvalidContentType(content_type.to_string()));
    }

    let target = app.settings.primary_upload_target;
    let bucket = match target {
        StorageProvider::R2 => app.settings.r2_bucket.clone(),
        StorageProvider::Local => None,
    };
    let external_id = uuid::Uuid::new_v4();
    let access_token = generate_access_token();
    let object_key = generate_object_key(user.external_id, external_id, filename);

    // One transaction so a failing URL signature leaves no orphan rows.
    let mut txn = app.pool.begin().await.map_err(anyhow::Error::from)?;
    let file = relay_sql::files::create(
        external_id,
        project.id,
        user.id,
        filename,
        content_type,
        size_bytes,
        checksum_sha256,
        &access_token,
        &serde_json::json!({}),
        &mut txn,
    )
    .await
    .map_err(anyhow::Error::from)?;

    relay_sql::files::create_blob(file.id, target, bucket.as_deref(), &object_key, &mut txn)
        .await
        .map_err(anyhow::Error::from)?;

    let store = app.storages.get(target)?;
    let (upload_url, upload_headers) = store
        .generate_upload_url(
            bucket.as_deref(),
            &object_key,
            content_type,
            size_bytes,
            app.settings.upload_url_expiry,
        )
        .await?;

    txn.commit().await.map_err(anyhow::Error::from)?;

    let expires_at = chrono::Utc::now()
        + chrono::Duration::from_std(app.settings.upload_url_expiry)
            .context("upload expiry out of range")?;

    Ok(CreatedUpload {
        file,
        upload_url,
        upload_headers,
        expires_at,
    })
}

/// Finalize an upload: verify the object landed in storage and flip the
/// file to `available`. Idempotent, and safe under concurrent calls: the
/// row lock covers only the pending -> finalizing flip, and the storage
/// HEAD runs after the lock is released.
pub async fn finalize_upload(
    app: &App,
    file_id: i64,
    etag_hint: Option<&str>,
) -> anyhow::Result<FileUpload> {
    let (file, blob) = {
        let mut txn = app.pool.begin().await?;
        let file = relay_sql::files::fetch_for_update(file_id, &mut txn).await?;

        // Already finalized: return as-is (checked under the lock).
        if file.status == FileStatus::Available {
            txn.commit().await?;
            return Ok(file);
        }

        let blob = relay_sql::files::pending_blob(file.id, &mut *txn).await?;
        let Some(blob) = blob else {
            let verified = relay_sql::files::verified_blobs(file.id, &mut *txn).await?;
            txn.commit().await?;
            if !verified.is_empty() {
                return Ok(file);
            }
            anyhow::bail!("no pending blob found for this upload");
        };

        relay_sql::files::set_status(file.id, FileStatus::Finalizing, &mut *txn).await?;
        txn.commit().await?;
        (file, blob)
    };

    // Verification happens outside the lock to avoid holding it during I/O.
    let verify = async {
        let store = app.storages.get(blob.provider)?;
        let head = store.head_object(blob.bucket.as_deref(), &blob.object_key).await?;
        if head.size_bytes != file.expected_size {
            anyhow::bail!(
                "size mismatch: expected {}, got {}",
                file.expected_size,
                head.size_bytes
            );
        }
        anyhow::Ok(head)
    };

    match verify.await {
        Ok(head) => {
            let etag = etag_hint.map(str::to_string).unwrap_or(head.etag);
            relay_sql::files::mark_blob_verified(blob.id, head.size_bytes, &etag, &app.pool)
                .await?;
            relay_sql::files::set_status(file.id, FileStatus::Available, &app.pool).await?;
            relay_sql::files::fetch_by_external_id(file.external_id, &app.pool)
                .await?
                .context("finalized file vanished")
        }
        Err(err) => {
            relay_sql::files::mark_blob_failed(blob.id, &app.pool).await?;
            relay_sql::files::set_status(file.id, FileStatus::Failed, &app.pool).await?;
            Err(err)
        }
    }
}

/// Pick the blob to serve a download from: the preferred provider when it
/// has a verified copy, then remote over local, then anything verified.
pub fn best_blob(blobs: &[Blob], preferred: Option<StorageProvider>) -> Option<&Blob> {
    let verified: Vec<&Blob> = blobs
        .iter()
        .filter(|b| b.status == BlobStatus::Verified)
        .collect();

    if let Some(preferred) = preferred {
        if let Some(blob) = verified.iter().find(|b| b.provider == preferred) {
            return Some(blob);
        }
    }
    for provider in [StorageProvider::R2, StorageProvider::Local] {
        if let Some(blob) = verified.iter().find(|b| b.provider == provider) {
            return Some(blob);
        }
    }
    verified.first().copied()
}

/// Copy a verified blob's bytes to another provider and record the replica.
pub async fn replicate_blob(
    app: &App,
    file_id: i64,
    target: StorageProvider,
) -> anyhow::Result<()> {
    let blobs = relay_sql::files::verified_blobs(file_id, &app.pool).await?;
    if blobs.iter().any(|b| b.provider == target) {
        return Ok(()); // already replicated
    }
    let source = best_blob(&blobs, None).context("no verified blob to replicate from")?;

    let source_store = app.storages.get(source.provider)?;
    let body = source_store
        .get_object(source.bucket.as_deref(), &source.object_key)
        .await?;
    let size_bytes = body.len() as i64;

    let target_bucket = match target {
        StorageProvider::R2 => app.settings.r2_bucket.clone(),
        StorageProvider::Local => None,
    };
    let target_store = app.storages.get(target)?;
    let etag = target_store
        .put_object(target_bucket.as_deref(), &source.object_key, body, None)
        .await?;

    relay_sql::files::insert_replica_blob(
        file_id,
        target,
        target_bucket.as_deref(),
        &source.object_key,
        size_bytes,
        &etag,
        &app.pool,
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_object_key_sanitizes_filename() {
        let user = models::Id::new([0, 0, 0, 0, 0, 0, 0, 9]);
        let file = uuid::Uuid::nil();
        assert_eq!(
            generate_object_key(user, file, "Q3 report (final).pdf"),
            format!("users/{user}/files/{file}/Q3reportfinal.pdf")
        );
        assert_eq!(
            generate_object_key(user, file, "наклад.pdf"),
            format!("users/{user}/files/{file}/.pdf")
        );
        assert_eq!(
            generate_object_key(user, file, "¡¡¡"),
            format!("users/{user}/files/{file}/file")
        );
    }

    #[test]
    fn test_best_blob_prefers_remote_then_local() {
        let blob = |id: i64, provider: StorageProvider, status: BlobStatus| Blob {
            id,
            file_id: 1,
            provider,
            bucket: None,
            object_key: "k".to_string(),
            size_bytes: Some(1),
            etag: None,
            status,
        };

        let blobs = vec![
            blob(1, StorageProvider::Local, BlobStatus::Verified),
            blob(2, StorageProvider::R2, BlobStatus::Verified),
        ];
        assert_eq!(best_blob(&blobs, None).unwrap().id, 2);

        // Preferred provider wins when verified.
        assert_eq!(
            best_blob(&blobs, Some(StorageProvider::Local)).unwrap().id,
            1
        );

        // Pending blobs never serve downloads.
        let blobs = vec![blob(3, StorageProvider::R2, BlobStatus::Pending)];
        assert!(best_blob(&blobs, None).is_none());
    }
}
