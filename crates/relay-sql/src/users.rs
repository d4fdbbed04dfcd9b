use models::Id;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub external_id: Id,
    pub email: String,
    pub username: String,
    pub is_active: bool,
}

pub async fn fetch_by_token(
    token: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(
        r#"
        select u.id, u.external_id, u.email, u.username, u.is_active
        from users u
        join auth_tokens t on t.user_id = u.id
        where t.token = $1 and u.is_active
        "#,
    )
    .bind(token)
    .fetch_optional(db)
    .await
}

pub async fn fetch_by_email(
    email: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(
        r#"
        select id, external_id, email, username, is_active
        from users
        where lower(email) = lower($1)
        "#,
    )
    .bind(email)
    .fetch_optional(db)
    .await
}

pub async fn fetch_by_id(
    user_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(
        "select id, external_id, email, username, is_active from users where id = $1",
    )
    .bind(user_id)
    .fetch_optional(db)
    .await
}

/// Resolve external user ids (as parsed from @-mentions) to internal row ids.
/// Unknown ids are silently absent from the result.
pub async fn resolve_external_ids(
    external_ids: &[String],
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<i64>> {
    sqlx::query_scalar::<_, i64>(
        "select id from users where external_id = any($1) and is_active",
    )
    .bind(external_ids)
    .fetch_all(db)
    .await
}
