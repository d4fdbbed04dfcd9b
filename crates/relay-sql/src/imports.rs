use models::{Id, ImportStatus};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ImportJob {
    pub id: i64,
    pub external_id: Id,
    pub user_id: i64,
    pub project_id: i64,
    pub status: ImportStatus,
    pub total_pages: i32,
    pub imported_count: i32,
    pub skipped_count: i32,
    pub failed_count: i32,
    pub error_message: String,
    pub request_details: serde_json::Value,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ImportArchive {
    pub id: i64,
    pub job_id: i64,
    pub filename: String,
    pub size_bytes: i64,
    pub temp_file_path: Option<String>,
    pub storage_key: Option<String>,
}

const JOB_COLUMNS: &str = r#"
    id, external_id, user_id, project_id, status, total_pages,
    imported_count, skipped_count, failed_count, error_message, request_details
"#;

const ARCHIVE_COLUMNS: &str =
    "id, job_id, filename, size_bytes, temp_file_path, storage_key";

pub async fn create_job(
    external_id: Id,
    user_id: i64,
    project_id: i64,
    request_details: &serde_json::Value,
    txn: &mut sqlx::PgConnection,
) -> sqlx::Result<ImportJob> {
    sqlx::query_as::<_, ImportJob>(&format!(
        "insert into import_jobs (external_id, user_id, project_id, request_details)
         values ($1, $2, $3, $4)
         returning {JOB_COLUMNS}"
    ))
    .bind(external_id)
    .bind(user_id)
    .bind(project_id)
    .bind(request_details)
    .fetch_one(txn)
    .await
}

pub async fn create_archive(
    job_id: i64,
    filename: &str,
    size_bytes: i64,
    temp_file_path: &str,
    txn: &mut sqlx::PgConnection,
) -> sqlx::Result<ImportArchive> {
    sqlx::query_as::<_, ImportArchive>(&format!(
        "insert into import_archives (job_id, filename, size_bytes, temp_file_path)
         values ($1, $2, $3, $4)
         returning {ARCHIVE_COLUMNS}"
    ))
    .bind(job_id)
    .bind(filename)
    .bind(size_bytes)
    .bind(temp_file_path)
    .fetch_one(txn)
    .await
}

pub async fn fetch_job(
    job_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<ImportJob>> {
    sqlx::query_as::<_, ImportJob>(&format!(
        "select {JOB_COLUMNS} from import_jobs where id = $1"
    ))
    .bind(job_id)
    .fetch_optional(db)
    .await
}

pub async fn fetch_archive_for_job(
    job_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<ImportArchive>> {
    sqlx::query_as::<_, ImportArchive>(&format!(
        "select {ARCHIVE_COLUMNS} from import_archives where job_id = $1"
    ))
    .bind(job_id)
    .fetch_optional(db)
    .await
}

pub async fn set_status(
    job_id: i64,
    status: ImportStatus,
    error_message: Option<&str>,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        update import_jobs
        set status = $2,
            error_message = coalesce($3, error_message),
            updated_at = now()
        where id = $1
        "#,
    )
    .bind(job_id)
    .bind(status)
    .bind(error_message)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn set_total_pages(
    job_id: i64,
    total: i32,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<()> {
    sqlx::query("update import_jobs set total_pages = $2, updated_at = now() where id = $1")
        .bind(job_id)
        .bind(total)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn set_counters(
    job_id: i64,
    imported: i32,
    skipped: i32,
    failed: i32,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        update import_jobs
        set imported_count = $2, skipped_count = $3, failed_count = $4, updated_at = now()
        where id = $1
        "#,
    )
    .bind(job_id)
    .bind(imported)
    .bind(skipped)
    .bind(failed)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn record_inspection(
    job_id: i64,
    inspection: &serde_json::Value,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        update import_jobs
        set metadata = jsonb_set(metadata, '{archive_inspection}', $2), updated_at = now()
        where id = $1
        "#,
    )
    .bind(job_id)
    .bind(inspection)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn clear_temp_file_path(
    archive_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<()> {
    sqlx::query("update import_archives set temp_file_path = null where id = $1")
        .bind(archive_id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn set_storage_key(
    archive_id: i64,
    storage_key: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<()> {
    sqlx::query("update import_archives set storage_key = $2 where id = $1")
        .bind(archive_id)
        .bind(storage_key)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn insert_imported_page(
    job_id: i64,
    page_id: i64,
    source_path: &str,
    source_hash: &str,
    txn: &mut sqlx::PgConnection,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into imported_pages (job_id, page_id, source_path, source_hash)
        values ($1, $2, $3, $4)
        "#,
    )
    .bind(job_id)
    .bind(page_id)
    .bind(source_path)
    .bind(source_hash)
    .execute(txn)
    .await?;
    Ok(())
}

/// Archives whose temp file was never cleaned up and whose job predates the
/// stale cutoff. The janitor deletes the temp file and fails pending jobs.
pub async fn stale_archives(
    cutoff: chrono::DateTime<chrono::Utc>,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<(ImportArchive, i64, ImportStatus)>> {
    let rows = sqlx::query_as::<
        _,
        (
            i64,
            i64,
            String,
            i64,
            Option<String>,
            Option<String>,
            i64,
            ImportStatus,
        ),
    >(
        r#"
        select a.id, a.job_id, a.filename, a.size_bytes, a.temp_file_path, a.storage_key,
               j.id, j.status
        from import_archives a
        join import_jobs j on j.id = a.job_id
        where a.temp_file_path is not null and j.created_at < $1
        "#,
    )
    .bind(cutoff)
    .fetch_all(db)
    .await?;

    Ok(rows
        .into_iter()
        .map(
            |(id, job_id, filename, size_bytes, temp_file_path, storage_key, jid, status)| {
                (
                    ImportArchive {
                        id,
                        job_id,
                        filename,
                        size_bytes,
                        temp_file_path,
                        storage_key,
                    },
                    jid,
                    status,
                )
            },
        )
        .collect())
}
