//! The asynchronous Notion import pipeline: inspect, unpack, parse, create
//! pages in one transaction with link remapping, archive the upload, and
//! clean up on every exit path.

use super::notion::{self, ParsedPage};
use super::{abuse, inspect};
use crate::app::App;
use anyhow::Context;
use models::{ErrorCode, Id, ImportStatus, Severity, StorageProvider};
use relay_sql::imports::{ImportArchive, ImportJob};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
enum ImportFailure {
    #[error("{message}")]
    Bomb {
        reason: ErrorCode,
        severity: Severity,
        message: String,
        inspection: serde_json::Value,
    },
    #[error("invalid zip archive: {0}")]
    InvalidZip(String),
    #[error(
        "no importable content found in the archive; \
         supported formats: Markdown (.md), CSV (.csv)"
    )]
    NoContent,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Entry point of the `process_notion_import` task.
pub async fn process_notion_import(app: &App, job_id: i64) -> anyhow::Result<()> {
    let job = relay_sql::imports::fetch_job(job_id, &app.pool)
        .await?
        .with_context(|| format!("import job {job_id} not found"))?;
    let Some(archive) = relay_sql::imports::fetch_archive_for_job(job.id, &app.pool).await? else {
        relay_sql::imports::set_status(
            job.id,
            ImportStatus::Failed,
            Some("import job has no associated archive"),
            &app.pool,
        )
        .await?;
        return Ok(());
    };
    let Some(temp_file_path) = archive.temp_file_path.clone() else {
        relay_sql::imports::set_status(
            job.id,
            ImportStatus::Failed,
            Some("import archive has no uploaded file"),
            &app.pool,
        )
        .await?;
        return Ok(());
    };

    relay_sql::imports::set_status(job.id, ImportStatus::Processing, None, &app.pool).await?;
    tracing::info!(job = %job.external_id, user = job.user_id, "processing import job");

    let temp_path = PathBuf::from(&temp_file_path);
    let result = run(app, &job, &archive, &temp_path).await;

    match &result {
        Ok(()) => {
            relay_sql::imports::set_status(job.id, ImportStatus::Completed, None, &app.pool)
                .await?;
        }
        Err(ImportFailure::Bomb {
            reason,
            severity,
            message,
            inspection,
        }) => {
            tracing::warn!(job = %job.external_id, %reason, "import rejected by archive safety");
            let context = abuse::AbuseContext::from_request_details(job.id, &job.request_details);
            if let Err(err) = abuse::record_abuse(
                app,
                job.user_id,
                reason.as_str(),
                *severity,
                inspection,
                &context,
            )
            .await
            {
                tracing::error!(job = %job.external_id, ?err, "failed to record abuse");
            }
            set_failed(app, &job, message).await?;
        }
        Err(failure @ (ImportFailure::InvalidZip(_) | ImportFailure::NoContent)) => {
            set_failed(app, &job, &failure.to_string()).await?;
        }
        Err(ImportFailure::Other(err)) => {
            tracing::error!(job = %job.external_id, ?err, "import job failed");
            set_failed(app, &job, &format!("{err:#}")).await?;
        }
    }

    // Cleanup runs on every exit path: the temp upload is deleted and the
    // archive row's temp path cleared. (The extraction directory is a
    // TempDir and removes itself.)
    if let Err(err) = tokio::fs::remove_file(&temp_path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %temp_path.display(), ?err, "failed to remove import temp file");
        }
    }
    if let Err(err) = relay_sql::imports::clear_temp_file_path(archive.id, &app.pool).await {
        tracing::warn!(archive = archive.id, ?err, "failed to clear archive temp path");
    }

    Ok(())
}

async fn set_failed(app: &App, job: &ImportJob, message: &str) -> anyhow::Result<()> {
    let truncated: String = message.chars().take(1000).collect();
    relay_sql::imports::set_status(job.id, ImportStatus::Failed, Some(&truncated), &app.pool)
        .await?;
    Ok(())
}

async fn run(
    app: &App,
    job: &ImportJob,
    archive: &ImportArchive,
    temp_path: &Path,
) -> Result<(), ImportFailure> {
    let compressed_size = tokio::fs::metadata(temp_path)
        .await
        .map_err(|err| ImportFailure::InvalidZip(format!("cannot read file: {err}")))?
        .len();

    // Pre-extraction safety inspection over the directory listing only.
    let settings = app.settings.clone();
    let inspect_path = temp_path.to_owned();
    let inspection = tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&inspect_path)
            .map_err(|err| inspect::InspectError::InvalidZip(format!("cannot read file: {err}")))?;
        inspect::inspect_and_validate(file, compressed_size, &settings)
    })
    .await
    .context("inspection task panicked")?
    .map_err(|err| match err {
        inspect::InspectError::InvalidZip(message) => ImportFailure::InvalidZip(message),
        inspect::InspectError::Bomb {
            reason,
            severity,
            message,
            inspection,
        } => ImportFailure::Bomb {
            reason,
            severity,
            message,
            inspection: serde_json::to_value(&*inspection).unwrap_or_default(),
        },
    })?;

    relay_sql::imports::record_inspection(
        job.id,
        &serde_json::to_value(&inspection).unwrap_or_default(),
        &app.pool,
    )
    .await
    .map_err(anyhow::Error::from)?;
    tracing::info!(
        job = %job.external_id,
        files = inspection.file_count,
        ratio = format!("{:.1}", inspection.compression_ratio),
        bytes = inspection.uncompressed_size,
        "archive inspection passed"
    );

    // Keep the raw bytes around for post-ingestion archiving.
    let raw_archive = tokio::fs::read(temp_path)
        .await
        .context("reading uploaded archive")?;

    let extract_path = temp_path.to_owned();
    let extracted = tokio::task::spawn_blocking(move || extract_zip(&extract_path))
        .await
        .context("extraction task panicked")?
        .map_err(|err| ImportFailure::InvalidZip(format!("extraction failed: {err}")))?;

    let (tree, stats) = notion::build_page_tree(extracted.path()).map_err(ImportFailure::Other)?;

    let total = notion::flatten(&tree).len() as i32;
    relay_sql::imports::set_total_pages(job.id, total, &app.pool)
        .await
        .map_err(anyhow::Error::from)?;
    tracing::info!(job = %job.external_id, total, "found pages to import");

    let created = create_import_pages(app, job, &tree)
        .await
        .map_err(ImportFailure::Other)?;

    relay_sql::imports::set_counters(
        job.id,
        created.imported,
        stats.skipped as i32,
        created.failed,
        &app.pool,
    )
    .await
    .map_err(anyhow::Error::from)?;

    // A valid zip with nothing recognisable in it is a failure, not an
    // empty success.
    if created.imported == 0 && stats.skipped == 0 {
        return Err(ImportFailure::NoContent);
    }

    // Archive the original upload to durable storage; failure here is
    // logged but never fails the job, the pages already exist.
    if let Err(err) = archive_upload(app, job, archive, raw_archive).await {
        tracing::warn!(job = %job.external_id, ?err, "failed to archive import upload");
    }

    tracing::info!(
        job = %job.external_id,
        imported = created.imported,
        skipped = stats.skipped,
        failed = created.failed,
        "import job completed"
    );
    Ok(())
}

/// Unpack into a scratch directory that removes itself on drop. Entry
/// names are sandboxed through `enclosed_name`.
fn extract_zip(archive_path: &Path) -> anyhow::Result<tempfile::TempDir> {
    let dir = tempfile::tempdir().context("creating extraction directory")?;
    let file = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name().map(|p| p.to_owned()) else {
            continue;
        };
        let out = dir.path().join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut target = std::fs::File::create(&out)?;
        std::io::copy(&mut entry, &mut target)?;
    }
    Ok(dir)
}

struct CreatedPages {
    imported: i32,
    failed: i32,
}

struct FlatNode<'a> {
    page: &'a ParsedPage,
    parent: Option<usize>,
}

fn flatten_with_parents<'a>(pages: &'a [ParsedPage], parent: Option<usize>, out: &mut Vec<FlatNode<'a>>) {
    for page in pages {
        let index = out.len();
        out.push(FlatNode { page, parent });
        flatten_with_parents(&page.children, Some(index), out);
    }
}

/// Create all pages in a single transaction, preserving the tree hierarchy
/// through the parent relationship and remapping archive-internal links
/// onto the new external ids.
async fn create_import_pages(
    app: &App,
    job: &ImportJob,
    tree: &[ParsedPage],
) -> anyhow::Result<CreatedPages> {
    let mut nodes = Vec::new();
    flatten_with_parents(tree, None, &mut nodes);

    // Pre-assign external ids so cross-references can be remapped no matter
    // which direction they point.
    let new_ids: Vec<Id> = nodes.iter().map(|_| app.next_id()).collect();
    let id_map: HashMap<String, Id> = nodes
        .iter()
        .zip(&new_ids)
        .filter_map(|(node, id)| Some((node.page.source_id.clone()?, *id)))
        .collect();

    let mut imported = 0i32;
    let mut failed = 0i32;
    let mut row_ids: Vec<Option<i64>> = vec![None; nodes.len()];

    let mut txn = app.pool.begin().await?;
    for (index, node) in nodes.iter().enumerate() {
        let content = notion::remap_links(&node.page.content, &id_map);
        if content.len() > app.settings.max_content_bytes {
            tracing::warn!(
                job = %job.external_id,
                path = %node.page.source_path,
                "imported page exceeds content cap"
            );
            failed += 1;
            continue;
        }

        let details = serde_json::json!({
            "content": content,
            "filetype": node.page.filetype,
            "schema_version": 1,
        });
        let parent_row = node.parent.and_then(|p| row_ids[p]);

        let page = relay_sql::pages::create(
            new_ids[index],
            job.project_id,
            parent_row,
            job.user_id,
            &node.page.title,
            &details,
            &mut *txn,
        )
        .await?;
        row_ids[index] = Some(page.id);

        let source_hash = node
            .page
            .source_id
            .clone()
            .unwrap_or_else(|| crate::content::content_sha256(&node.page.source_path));
        relay_sql::imports::insert_imported_page(
            job.id,
            page.id,
            &node.page.source_path,
            &source_hash,
            &mut txn,
        )
        .await?;
        imported += 1;
    }
    txn.commit().await?;

    Ok(CreatedPages { imported, failed })
}

async fn archive_upload(
    app: &App,
    job: &ImportJob,
    archive: &ImportArchive,
    raw: Vec<u8>,
) -> anyhow::Result<()> {
    let safe_name: String = archive
        .filename
        .chars()
        .filter(|c| c.is_ascii() && (c.is_alphanumeric() || matches!(c, '.' | '-' | '_')))
        .collect();
    let safe_name = if safe_name.is_empty() {
        "archive.zip".to_string()
    } else {
        safe_name
    };
    let key = format!("imports/{}/{safe_name}", job.external_id);

    let provider = app.settings.primary_upload_target;
    let bucket = match provider {
        StorageProvider::R2 => app.settings.r2_bucket.clone(),
        StorageProvider::Local => None,
    };
    app.storages
        .get(provider)?
        .put_object(bucket.as_deref(), &key, raw, Some("application/zip"))
        .await?;
    relay_sql::imports::set_storage_key(archive.id, &key, &app.pool).await?;
    Ok(())
}
