use super::{BoxedRaw, Server, TaskType};
use sqlx::types::Json as SqlJson;
use std::sync::Arc;

#[derive(sqlx::FromRow)]
struct DequeuedTask {
    id: i64,
    #[sqlx(rename = "task_type")]
    type_: TaskType,
    attempt: i32,
    args: SqlJson<BoxedRaw>,
}

/// Serve registered executors until signaled to stop by `shutdown`.
/// Dequeues are bounded by a semaphore of `permits`; a task whose process
/// dies mid-poll is re-dequeued once its heartbeat lapses.
pub async fn serve(
    executors: Server,
    permits: u32,
    pool: sqlx::PgPool,
    dequeue_interval: std::time::Duration,
    heartbeat_timeout: std::time::Duration,
    shutdown: impl std::future::Future<Output = ()>,
) {
    let semaphore = Arc::new(tokio::sync::Semaphore::new(permits as usize));
    let executors = Arc::new(executors);
    let task_types: Vec<i16> = executors.0.iter().map(|e| e.task_type().0).collect();

    tokio::pin!(shutdown);

    loop {
        // Block until at least one permit is available, then take them all:
        // we poll for up to that many tasks in one round trip.
        let mut permits = tokio::select! {
            permit = acquire_all(&semaphore) => permit,
            () = &mut shutdown => break,
        };

        let dequeued = dequeue(
            &pool,
            &task_types,
            heartbeat_timeout,
            permits.num_permits() as i64,
        )
        .await;

        let dequeued = match dequeued {
            Ok(dequeued) => {
                tracing::debug!(dequeued = dequeued.len(), "completed task dequeue");
                dequeued
            }
            Err(err) => {
                tracing::error!(?err, "failed to poll for tasks (will retry)");
                Vec::new()
            }
        };
        let was_idle = dequeued.is_empty();

        for task in dequeued {
            let Ok(index) = task_types.binary_search(&task.type_.0) else {
                panic!("polled task {} with unexpected {:?}", task.id, task.type_);
            };
            let executor = executors.0[index].clone();
            let permit = permits.split(1).unwrap();
            let pool = pool.clone();

            tokio::spawn(async move {
                poll_task(executor, pool, task, heartbeat_timeout).await;
                std::mem::drop(permit);
            });
        }

        if was_idle {
            // Jitter the idle sleep by 10% in either direction, to spread
            // dequeues and retries across server replicas.
            let jitter = 0.9 + rand::random::<f64>() * 0.2; // [0.9, 1.1)

            tokio::select! {
                () = tokio::time::sleep(dequeue_interval.mul_f64(jitter)) => (),
                () = &mut shutdown => break,
            }
        }
    }
    tracing::info!("task polling loop signaled to stop and is awaiting running tasks");

    // Acquiring all permits only succeeds after running tasks have finished.
    let _ = semaphore.acquire_many_owned(permits).await;
}

async fn acquire_all(
    semaphore: &Arc<tokio::sync::Semaphore>,
) -> tokio::sync::OwnedSemaphorePermit {
    if semaphore.available_permits() == 0 {
        let _ = semaphore.clone().acquire_owned().await.unwrap();
    }
    semaphore
        .clone()
        .acquire_many_owned(semaphore.available_permits() as u32)
        .await
        .unwrap()
}

async fn dequeue(
    pool: &sqlx::PgPool,
    task_types: &[i16],
    heartbeat_timeout: std::time::Duration,
    limit: i64,
) -> sqlx::Result<Vec<DequeuedTask>> {
    sqlx::query_as::<_, DequeuedTask>(
        r#"
        with picked as (
            select id
            from tasks
            where
                task_type = any($1) and
                wake_at <= now() and
                heartbeat < now() - make_interval(secs => $2)
            order by wake_at asc
            limit $3
            for update skip locked
        )
        update tasks
        set heartbeat = now()
        where id in (select id from picked)
        returning id, task_type, attempt, args
        "#,
    )
    .bind(task_types)
    .bind(heartbeat_timeout.as_secs_f64())
    .bind(limit)
    .fetch_all(pool)
    .await
}

async fn poll_task(
    executor: Arc<dyn super::ObjSafe>,
    pool: sqlx::PgPool,
    task: DequeuedTask,
    heartbeat_timeout: std::time::Duration,
) {
    let (task_id, task_type, attempt) = (task.id, task.type_, task.attempt);

    let mut poll = std::pin::pin!(executor.poll_dyn(&pool, task_id, attempt, &task.args.0));
    let mut beats = tokio::time::interval(heartbeat_timeout / 2);

    // Stamp heartbeats while the executor runs, so concurrent servers
    // don't re-dequeue a live task.
    let outcome = loop {
        tokio::select! {
            outcome = &mut poll => break outcome,
            _ = beats.tick() => {
                if let Err(err) = sqlx::query("update tasks set heartbeat = now() where id = $1")
                    .bind(task_id)
                    .execute(&pool)
                    .await
                {
                    tracing::warn!(task_id, ?err, "failed to stamp task heartbeat");
                }
            }
        }
    };

    let result = match outcome {
        Ok(super::Outcome::Done) => {
            sqlx::query("delete from tasks where id = $1")
                .bind(task_id)
                .execute(&pool)
                .await
                .map(|_| ())
        }
        Ok(super::Outcome::Retry(delay)) => reschedule(&pool, task_id, delay).await,
        Err(err) if attempt + 1 >= executor.max_attempts() => {
            tracing::error!(
                task_id,
                ?task_type,
                attempt,
                ?err,
                "task failed and exhausted its attempts"
            );
            sqlx::query("delete from tasks where id = $1")
                .bind(task_id)
                .execute(&pool)
                .await
                .map(|_| ())
        }
        Err(err) => {
            let backoff = std::time::Duration::from_secs(1 << attempt.min(8) as u32);
            tracing::warn!(
                task_id,
                ?task_type,
                attempt,
                ?backoff,
                ?err,
                "task failed and will be retried"
            );
            reschedule(&pool, task_id, backoff).await
        }
    };

    if let Err(err) = result {
        // Leave the row as-is; it re-dequeues after the heartbeat lapses.
        tracing::error!(task_id, ?task_type, ?err, "failed to settle task outcome");
    }
}

async fn reschedule(
    pool: &sqlx::PgPool,
    task_id: i64,
    delay: std::time::Duration,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        update tasks
        set attempt = attempt + 1,
            wake_at = now() + make_interval(secs => $2),
            heartbeat = '1970-01-01T00:00:00Z'
        where id = $1
        "#,
    )
    .bind(task_id)
    .bind(delay.as_secs_f64())
    .execute(pool)
    .await?;
    Ok(())
}
