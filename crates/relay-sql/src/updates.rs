//! Append-only CRDT update log and the per-room compacted snapshot.

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UpdateRow {
    pub id: i64,
    pub yupdate: Vec<u8>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRow {
    pub snapshot: Vec<u8>,
    pub last_update_id: i64,
}

/// Append one update blob. The returned id is allocated by the database
/// identity column and is strictly monotonic across all rooms.
#[tracing::instrument(err, level = "debug", skip(blob, db))]
pub async fn append(
    room_id: &str,
    blob: &[u8],
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<i64> {
    sqlx::query_scalar::<_, i64>(
        "insert into y_updates (room_id, yupdate) values ($1, $2) returning id",
    )
    .bind(room_id)
    .bind(blob)
    .fetch_one(db)
    .await
}

/// Updates after `since_id`, in log order. Log order is the canonical
/// replay order.
pub async fn list_since(
    room_id: &str,
    since_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<UpdateRow>> {
    sqlx::query_as::<_, UpdateRow>(
        "select id, yupdate from y_updates where room_id = $1 and id > $2 order by id asc",
    )
    .bind(room_id)
    .bind(since_id)
    .fetch_all(db)
    .await
}

pub async fn get_snapshot(
    room_id: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<SnapshotRow>> {
    sqlx::query_as::<_, SnapshotRow>(
        "select snapshot, last_update_id from y_snapshots where room_id = $1",
    )
    .bind(room_id)
    .fetch_optional(db)
    .await
}

/// Overwrite the room's snapshot. Two quiescence writers may race; the later
/// write wins and both describe consistent (snapshot, watermark) pairs.
pub async fn put_snapshot(
    room_id: &str,
    snapshot: &[u8],
    last_update_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into y_snapshots (room_id, snapshot, last_update_id, created_at)
        values ($1, $2, $3, now())
        on conflict (room_id) do update
            set snapshot = $2, last_update_id = $3, created_at = now()
        "#,
    )
    .bind(room_id)
    .bind(snapshot)
    .bind(last_update_id)
    .execute(db)
    .await?;
    Ok(())
}

/// Erase both the log tail and the snapshot. Runs inside the page
/// soft-delete transaction so the two are atomic.
pub async fn delete_all(room_id: &str, txn: &mut sqlx::PgConnection) -> sqlx::Result<()> {
    sqlx::query("delete from y_updates where room_id = $1")
        .bind(room_id)
        .execute(&mut *txn)
        .await?;
    sqlx::query("delete from y_snapshots where room_id = $1")
        .bind(room_id)
        .execute(&mut *txn)
        .await?;
    Ok(())
}
