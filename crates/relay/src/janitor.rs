//! Scheduled reconciliation: stale uploads are failed, and import archives
//! whose temp files outlived their jobs are cleaned off disk.

use crate::app::App;
use models::ImportStatus;
use std::sync::Arc;

pub async fn serve(
    app: Arc<App>,
    interval: std::time::Duration,
    shutdown: impl std::future::Future<Output = ()>,
) -> anyhow::Result<()> {
    let mut ticks = tokio::time::interval(interval);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                if let Err(err) = run_once(&app).await {
                    tracing::error!(?err, "janitor pass failed");
                }
            }
            () = &mut shutdown => return Ok(()),
        }
    }
}

pub async fn run_once(app: &App) -> anyhow::Result<()> {
    let cutoff = chrono::Utc::now()
        - chrono::Duration::from_std(app.settings.imports_stale_after)
            .unwrap_or_else(|_| chrono::Duration::hours(24));

    let failed_uploads = relay_sql::files::mark_stale_uploads_failed(cutoff, &app.pool).await?;
    if failed_uploads > 0 {
        tracing::info!(failed_uploads, "failed stale uploads");
    }

    let stale = relay_sql::imports::stale_archives(cutoff, &app.pool).await?;
    for (archive, job_id, status) in stale {
        if let Some(temp_path) = &archive.temp_file_path {
            match tokio::fs::remove_file(temp_path).await {
                Ok(()) => tracing::info!(job_id, path = %temp_path, "removed stale import temp file"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
                Err(err) => {
                    tracing::warn!(job_id, path = %temp_path, ?err, "failed to remove stale temp file");
                }
            }
        }
        relay_sql::imports::clear_temp_file_path(archive.id, &app.pool).await?;

        if matches!(status, ImportStatus::Pending | ImportStatus::Processing) {
            relay_sql::imports::set_status(
                job_id,
                ImportStatus::Failed,
                Some("timed out"),
                &app.pool,
            )
            .await?;
            tracing::info!(job_id, "failed stale import job");
        }
    }

    Ok(())
}
