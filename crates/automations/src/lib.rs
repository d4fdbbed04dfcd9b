use anyhow::Context;
use std::sync::Arc;

mod server;
pub use server::serve;

/// BoxedRaw is a type-erased raw JSON message.
type BoxedRaw = Box<serde_json::value::RawValue>;

/// TaskType identifies the kind of a queued task, and maps it to an Executor.
#[derive(
    Debug,
    serde::Deserialize,
    serde::Serialize,
    sqlx::Type,
    PartialOrd,
    PartialEq,
    Ord,
    Eq,
    Clone,
    Copy,
)]
#[sqlx(transparent)]
pub struct TaskType(pub i16);

/// Outcome of an `Executor::poll()` for a given task.
#[derive(Debug)]
pub enum Outcome {
    /// The task completed and its row is removed.
    Done,
    /// Poll again no earlier than the given delay.
    Retry(std::time::Duration),
}

/// Executor is the core trait implemented by executors of the various task
/// types. A task is polled at-least-once; executors must tolerate replays.
pub trait Executor: Send + Sync + 'static {
    const TASK_TYPE: TaskType;

    /// Retryable failures are re-polled with exponential backoff up to this
    /// many attempts, after which the task is dropped with an error log.
    const MAX_ATTEMPTS: i32 = 5;

    type Args: serde::de::DeserializeOwned + serde::Serialize + Send;

    fn poll(
        &self,
        pool: &sqlx::PgPool,
        task_id: i64,
        attempt: i32,
        args: Self::Args,
    ) -> impl std::future::Future<Output = anyhow::Result<Outcome>> + Send;
}

/// Enqueue a task onto the named queue with at-least-once delivery.
pub async fn enqueue<M: serde::Serialize>(
    task_type: TaskType,
    args: &M,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> anyhow::Result<i64> {
    let args = serde_json::to_value(args).context("failed to encode task args")?;

    let task_id = sqlx::query_scalar::<_, i64>(
        "insert into tasks (task_type, args) values ($1, $2) returning id",
    )
    .bind(task_type)
    .bind(args)
    .fetch_one(db)
    .await
    .context("failed to enqueue task")?;

    Ok(task_id)
}

/// Server holds registered implementations of Executor, and serves them.
pub struct Server(Vec<Arc<dyn ObjSafe>>);

impl Server {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Register an Executor to be served by this Server.
    pub fn register<E: Executor>(mut self, executor: E) -> Self {
        let index = match self
            .0
            .binary_search_by_key(&E::TASK_TYPE, |entry| entry.task_type())
        {
            Ok(_index) => panic!("an Executor for {:?} is already registered", E::TASK_TYPE),
            Err(index) => index,
        };

        self.0.insert(index, Arc::new(executor));
        self
    }

    /// Serve this Server until signaled to stop by `shutdown`.
    pub async fn serve(
        self,
        permits: u32,
        pool: sqlx::PgPool,
        dequeue_interval: std::time::Duration,
        heartbeat_timeout: std::time::Duration,
        shutdown: impl std::future::Future<Output = ()>,
    ) {
        serve(
            self,
            permits,
            pool,
            dequeue_interval,
            heartbeat_timeout,
            shutdown,
        )
        .await
    }
}

/// Object-safe shim over Executor, which decodes raw task arguments.
trait ObjSafe: Send + Sync + 'static {
    fn task_type(&self) -> TaskType;
    fn max_attempts(&self) -> i32;

    fn poll_dyn<'s>(
        &'s self,
        pool: &'s sqlx::PgPool,
        task_id: i64,
        attempt: i32,
        args: &'s BoxedRaw,
    ) -> futures::future::BoxFuture<'s, anyhow::Result<Outcome>>;
}

impl<E: Executor> ObjSafe for E {
    fn task_type(&self) -> TaskType {
        E::TASK_TYPE
    }

    fn max_attempts(&self) -> i32 {
        E::MAX_ATTEMPTS
    }

    fn poll_dyn<'s>(
        &'s self,
        pool: &'s sqlx::PgPool,
        task_id: i64,
        attempt: i32,
        args: &'s BoxedRaw,
    ) -> futures::future::BoxFuture<'s, anyhow::Result<Outcome>> {
        Box::pin(async move {
            let args: E::Args =
                serde_json::from_str(args.get()).context("failed to decode task args")?;
            self.poll(pool, task_id, attempt, args).await
        })
    }
}
