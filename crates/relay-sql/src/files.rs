use models::{BlobStatus, FileStatus, Id, StorageProvider};
use sqlx::types::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileUpload {
    pub id: i64,
    pub external_id: Uuid,
    pub project_id: i64,
    pub uploaded_by: i64,
    pub filename: String,
    pub content_type: String,
    pub expected_size: i64,
    pub access_token: String,
    pub status: FileStatus,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Blob {
    pub id: i64,
    pub file_id: i64,
    pub provider: StorageProvider,
    pub bucket: Option<String>,
    pub object_key: String,
    pub size_bytes: Option<i64>,
    pub etag: Option<String>,
    pub status: BlobStatus,
}

const FILE_COLUMNS: &str = r#"
    id, external_id, project_id, uploaded_by, filename, content_type,
    expected_size, access_token, status, deleted_at
"#;

const BLOB_COLUMNS: &str =
    "id, file_id, provider, bucket, object_key, size_bytes, etag, status";

pub async fn create(
    external_id: Uuid,
    project_id: i64,
    uploaded_by: i64,
    filename: &str,
    content_type: &str,
    expected_size: i64,
    checksum_sha256: Option<&str>,
    access_token: &str,
    metadata: &serde_json::Value,
    txn: &mut sqlx::PgConnection,
) -> sqlx::Result<FileUpload> {
    sqlx::query_as::<_, FileUpload>(&format!(
        "insert into file_uploads
            (external_id, project_id, uploaded_by, filename, content_type,
             expected_size, checksum_sha256, access_token, metadata)
         values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         returning {FILE_COLUMNS}"
    ))
    .bind(external_id)
    .bind(project_id)
    .bind(uploaded_by)
    .bind(filename)
    .bind(content_type)
    .bind(expected_size)
    .bind(checksum_sha256)
    .bind(access_token)
    .bind(metadata)
    .fetch_one(txn)
    .await
}

pub async fn create_blob(
    file_id: i64,
    provider: StorageProvider,
    bucket: Option<&str>,
    object_key: &str,
    txn: &mut sqlx::PgConnection,
) -> sqlx::Result<Blob> {
    sqlx::query_as::<_, Blob>(&format!(
        "insert into blobs (file_id, provider, bucket, object_key)
         values ($1, $2, $3, $4)
         returning {BLOB_COLUMNS}"
    ))
    .bind(file_id)
    .bind(provider)
    .bind(bucket)
    .bind(object_key)
    .fetch_one(txn)
    .await
}

pub async fn fetch_by_external_id(
    external_id: Uuid,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<FileUpload>> {
    sqlx::query_as::<_, FileUpload>(&format!(
        "select {FILE_COLUMNS} from file_uploads where external_id = $1"
    ))
    .bind(external_id)
    .fetch_optional(db)
    .await
}

/// Lookup backing the public download-by-token path. Every criterion must
/// match: project external id, file external id, not deleted, available.
/// The access token itself is compared in constant time by the caller, so
/// it is returned rather than filtered on here.
pub async fn fetch_for_token_download(
    project_external_id: Id,
    file_external_id: Uuid,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<FileUpload>> {
    sqlx::query_as::<_, FileUpload>(&format!(
        "select f.id, f.external_id, f.project_id, f.uploaded_by, f.filename,
                f.content_type, f.expected_size, f.access_token, f.status, f.deleted_at
         from file_uploads f
         join projects pr on pr.id = f.project_id
         where pr.external_id = $1
           and f.external_id = $2
           and f.deleted_at is null
           and f.status = 'available'"
    ))
    .bind(project_external_id)
    .bind(file_external_id)
    .fetch_optional(db)
    .await
}

/// Re-fetch with a row lock for the finalize status flip. The lock is held
/// only for the pending -> finalizing transition; the storage HEAD happens
/// after it is released.
pub async fn fetch_for_update(
    file_id: i64,
    txn: &mut sqlx::PgConnection,
) -> sqlx::Result<FileUpload> {
    sqlx::query_as::<_, FileUpload>(&format!(
        "select {FILE_COLUMNS} from file_uploads where id = $1 for update"
    ))
    .bind(file_id)
    .fetch_one(txn)
    .await
}

pub async fn set_status(
    file_id: i64,
    status: FileStatus,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<()> {
    sqlx::query("update file_uploads set status = $2, updated_at = now() where id = $1")
        .bind(file_id)
        .bind(status)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn pending_blob(
    file_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<Blob>> {
    sqlx::query_as::<_, Blob>(&format!(
        "select {BLOB_COLUMNS} from blobs where file_id = $1 and status = 'pending'
         order by id asc limit 1"
    ))
    .bind(file_id)
    .fetch_optional(db)
    .await
}

pub async fn verified_blobs(
    file_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<Blob>> {
    sqlx::query_as::<_, Blob>(&format!(
        "select {BLOB_COLUMNS} from blobs where file_id = $1 and status = 'verified'
         order by id asc"
    ))
    .bind(file_id)
    .fetch_all(db)
    .await
}

pub async fn mark_blob_verified(
    blob_id: i64,
    size_bytes: i64,
    etag: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        update blobs
        set status = 'verified', size_bytes = $2, etag = $3, verified_at = now()
        where id = $1
        "#,
    )
    .bind(blob_id)
    .bind(size_bytes)
    .bind(etag)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn mark_blob_failed(
    blob_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<()> {
    sqlx::query("update blobs set status = 'failed' where id = $1")
        .bind(blob_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Record a replicated copy. The partial unique index guarantees at most one
/// verified blob per (file, provider); a racing replication is a no-op.
pub async fn insert_replica_blob(
    file_id: i64,
    provider: StorageProvider,
    bucket: Option<&str>,
    object_key: &str,
    size_bytes: i64,
    etag: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into blobs (file_id, provider, bucket, object_key, size_bytes, etag, status, verified_at)
        values ($1, $2, $3, $4, $5, $6, 'verified', now())
        on conflict (file_id, provider) where status = 'verified' do nothing
        "#,
    )
    .bind(file_id)
    .bind(provider)
    .bind(bucket)
    .bind(object_key)
    .bind(size_bytes)
    .bind(etag)
    .execute(db)
    .await?;
    Ok(())
}

/// Internal ids of live files matching the given external ids, for the
/// derived-work file-link pass.
pub async fn live_ids_by_external_ids(
    external_ids: &[Uuid],
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<(i64, Uuid)>> {
    sqlx::query_as::<_, (i64, Uuid)>(
        "select id, external_id from file_uploads
         where external_id = any($1) and deleted_at is null",
    )
    .bind(external_ids)
    .fetch_all(db)
    .await
}

/// Uploads stuck before `available` longer than the cutoff; the janitor
/// marks them failed.
pub async fn mark_stale_uploads_failed(
    cutoff: chrono::DateTime<chrono::Utc>,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<u64> {
    let done = sqlx::query(
        r#"
        update file_uploads
        set status = 'failed', updated_at = now()
        where status in ('pending_url', 'finalizing') and created_at < $1
        "#,
    )
    .bind(cutoff)
    .execute(db)
    .await?;
    Ok(done.rows_affected())
}
