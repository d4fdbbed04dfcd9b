//! Keyed counters with TTL windows. The single upsert below is the only
//! writer; it atomically resets the window when it has lapsed and returns
//! the post-increment count.

pub async fn check_and_increment(
    key: &str,
    window_seconds: i32,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<i32> {
    sqlx::query_scalar::<_, i32>(
        r#"
        insert into rate_counters (key, count, window_start, window_seconds)
        values ($1, 1, now(), $2)
        on conflict (key) do update set
            count = case
                when rate_counters.window_start
                     + make_interval(secs => rate_counters.window_seconds) <= now()
                then 1
                else rate_counters.count + 1
            end,
            window_start = case
                when rate_counters.window_start
                     + make_interval(secs => rate_counters.window_seconds) <= now()
                then now()
                else rate_counters.window_start
            end,
            window_seconds = $2
        returning count
        "#,
    )
    .bind(key)
    .bind(window_seconds)
    .fetch_one(db)
    .await
}
