//! Task types the relay publishes, the queue seam it publishes them
//! through, and the executors the daemon serves.

use crate::app::App;
use automations::{Executor, Outcome, TaskType};
use models::{Id, StorageProvider};
use std::sync::Arc;

pub const UPDATE_PAGE_EMBEDDING: TaskType = TaskType(1);
pub const INDEX_USER_PAGES: TaskType = TaskType(2);
pub const SYNC_SNAPSHOT_WITH_PAGE: TaskType = TaskType(3);
pub const REPLICATE_BLOB: TaskType = TaskType(4);
pub const PROCESS_NOTION_IMPORT: TaskType = TaskType(5);

/// Named-queue enqueue with at-least-once delivery. Rooms, handlers and
/// executors publish through this seam; tests capture instead of queueing.
#[async_trait::async_trait]
pub trait JobQueue: Send + Sync + 'static {
    async fn enqueue(&self, task_type: TaskType, args: serde_json::Value) -> anyhow::Result<i64>;
}

pub struct PgJobQueue {
    pool: sqlx::PgPool,
}

impl PgJobQueue {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, task_type: TaskType, args: serde_json::Value) -> anyhow::Result<i64> {
        automations::enqueue(task_type, &args, &self.pool).await
    }
}

/// Captures enqueues for tests.
pub struct MemoryJobQueue {
    entries: std::sync::Mutex<Vec<(TaskType, serde_json::Value)>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self {
            entries: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn enqueued(&self, task_type: TaskType) -> Vec<serde_json::Value> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == task_type)
            .map(|(_, args)| args.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, task_type: TaskType, args: serde_json::Value) -> anyhow::Result<i64> {
        let mut entries = self.entries.lock().unwrap();
        entries.push((task_type, args));
        Ok(entries.len() as i64)
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct UpdateEmbeddingArgs {
    pub page_id: Id,
    #[serde(default)]
    pub user_id: Option<i64>,
}

pub struct UpdateEmbeddingExec(pub Arc<App>);

impl Executor for UpdateEmbeddingExec {
    const TASK_TYPE: TaskType = UPDATE_PAGE_EMBEDDING;
    type Args = UpdateEmbeddingArgs;

    async fn poll(
        &self,
        _pool: &sqlx::PgPool,
        _task_id: i64,
        _attempt: i32,
        args: Self::Args,
    ) -> anyhow::Result<Outcome> {
        match crate::ask::embeddings::update_page_embedding(&self.0, args.page_id).await {
            Ok(result) => {
                tracing::info!(page = %args.page_id, ?result, "embedding task settled");
                Ok(Outcome::Done)
            }
            Err(err) if err.is_retryable() => Err(anyhow::Error::from(err)),
            Err(err) => {
                tracing::error!(page = %args.page_id, ?err, "embedding task failed terminally");
                Ok(Outcome::Done)
            }
        }
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct IndexUserPagesArgs {
    pub user_id: i64,
    pub page_ids: Vec<Id>,
}

pub struct IndexUserPagesExec(pub Arc<App>);

impl Executor for IndexUserPagesExec {
    const TASK_TYPE: TaskType = INDEX_USER_PAGES;
    type Args = IndexUserPagesArgs;

    async fn poll(
        &self,
        _pool: &sqlx::PgPool,
        _task_id: i64,
        _attempt: i32,
        args: Self::Args,
    ) -> anyhow::Result<Outcome> {
        // Fan back out through the per-page task so each page gets the
        // hash short-circuit and its own retry budget.
        for page_id in args.page_ids {
            self.0
                .jobs
                .enqueue(
                    UPDATE_PAGE_EMBEDDING,
                    serde_json::json!({ "page_id": page_id, "user_id": args.user_id }),
                )
                .await?;
        }
        Ok(Outcome::Done)
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct SyncSnapshotArgs {
    pub room_id: String,
}

pub struct SyncSnapshotExec(pub Arc<App>);

impl Executor for SyncSnapshotExec {
    const TASK_TYPE: TaskType = SYNC_SNAPSHOT_WITH_PAGE;
    type Args = SyncSnapshotArgs;

    async fn poll(
        &self,
        _pool: &sqlx::PgPool,
        _task_id: i64,
        _attempt: i32,
        args: Self::Args,
    ) -> anyhow::Result<Outcome> {
        // Derivation failures never propagate to the edit path; log and move on.
        if let Err(err) = crate::derived::sync_snapshot_with_page(&self.0, &args.room_id).await {
            tracing::error!(room = %args.room_id, ?err, "snapshot sync failed");
        }
        Ok(Outcome::Done)
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ReplicateBlobArgs {
    pub file_id: i64,
    pub target_provider: StorageProvider,
}

pub struct ReplicateBlobExec(pub Arc<App>);

impl Executor for ReplicateBlobExec {
    const TASK_TYPE: TaskType = REPLICATE_BLOB;
    type Args = ReplicateBlobArgs;

    async fn poll(
        &self,
        _pool: &sqlx::PgPool,
        _task_id: i64,
        _attempt: i32,
        args: Self::Args,
    ) -> anyhow::Result<Outcome> {
        crate::files::replicate_blob(&self.0, args.file_id, args.target_provider).await?;
        Ok(Outcome::Done)
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ProcessImportArgs {
    pub job_id: i64,
}

pub struct ProcessImportExec(pub Arc<App>);

impl Executor for ProcessImportExec {
    const TASK_TYPE: TaskType = PROCESS_NOTION_IMPORT;
    // Archive processing is not idempotent enough to thrash on; one retry
    // covers transient dequeue-time failures.
    const MAX_ATTEMPTS: i32 = 2;
    type Args = ProcessImportArgs;

    async fn poll(
        &self,
        _pool: &sqlx::PgPool,
        _task_id: i64,
        _attempt: i32,
        args: Self::Args,
    ) -> anyhow::Result<Outcome> {
        crate::imports::pipeline::process_notion_import(&self.0, args.job_id).await?;
        Ok(Outcome::Done)
    }
}

/// The executor set the daemon serves when --serve-handlers is set.
pub fn server(app: Arc<App>) -> automations::Server {
    automations::Server::new()
        .register(UpdateEmbeddingExec(app.clone()))
        .register(IndexUserPagesExec(app.clone()))
        .register(SyncSnapshotExec(app.clone()))
        .register(ReplicateBlobExec(app.clone()))
        .register(ProcessImportExec(app))
}
