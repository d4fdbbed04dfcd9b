use models::Severity;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AbuseRecord {
    pub id: i64,
    pub user_id: i64,
    pub reason: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Ban {
    pub user_id: i64,
    pub reason: String,
    pub enforced: bool,
}

pub async fn insert_record(
    user_id: i64,
    import_job_id: Option<i64>,
    reason: &str,
    severity: Severity,
    details: &serde_json::Value,
    ip_address: Option<&str>,
    user_agent: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<AbuseRecord> {
    sqlx::query_as::<_, AbuseRecord>(
        r#"
        insert into abuse_records
            (user_id, import_job_id, reason, severity, details, ip_address, user_agent)
        values ($1, $2, $3, $4, $5, $6, $7)
        returning id, user_id, reason, severity
        "#,
    )
    .bind(user_id)
    .bind(import_job_id)
    .bind(reason)
    .bind(severity)
    .bind(details)
    .bind(ip_address)
    .bind(user_agent)
    .fetch_one(db)
    .await
}

/// Per-severity record counts for the user within the window.
pub async fn severity_counts_since(
    user_id: i64,
    since: chrono::DateTime<chrono::Utc>,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<(Severity, i64)>> {
    sqlx::query_as::<_, (Severity, i64)>(
        r#"
        select severity, count(*)
        from abuse_records
        where user_id = $1 and created_at >= $2
        group by severity
        "#,
    )
    .bind(user_id)
    .bind(since)
    .fetch_all(db)
    .await
}

pub async fn fetch_ban(
    user_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<Ban>> {
    sqlx::query_as::<_, Ban>(
        "select user_id, reason, enforced from import_bans where user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(db)
    .await
}

/// Create or re-enforce the user's permanent ban. A previously lifted ban
/// (enforced = false) is reinstated with the new reason.
pub async fn upsert_ban(
    user_id: i64,
    reason: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<bool> {
    let created = sqlx::query_scalar::<_, bool>(
        r#"
        insert into import_bans (user_id, reason, enforced)
        values ($1, $2, true)
        on conflict (user_id) do update
            set reason = $2, enforced = true, updated_at = now()
        returning (xmax = 0)
        "#,
    )
    .bind(user_id)
    .bind(reason)
    .fetch_one(db)
    .await?;
    Ok(created)
}
