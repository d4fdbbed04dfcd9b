use models::{AiProvider, AskStatus, Id};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AskRequest {
    pub id: i64,
    pub external_id: Id,
    pub user_id: Option<i64>,
    pub query: String,
    pub status: AskStatus,
    pub error: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AiConfig {
    pub id: i64,
    pub external_id: Id,
    pub provider: AiProvider,
    pub api_key: String,
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PageEmbedding {
    pub page_id: i64,
    pub page_external_id: Id,
    pub content_hash: String,
    pub embedding: Vec<f32>,
}

pub async fn create_request(
    external_id: Id,
    user_id: i64,
    query: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<AskRequest> {
    sqlx::query_as::<_, AskRequest>(
        r#"
        insert into ask_requests (external_id, user_id, query)
        values ($1, $2, $3)
        returning id, external_id, user_id, query, status, error
        "#,
    )
    .bind(external_id)
    .bind(user_id)
    .bind(query)
    .fetch_one(db)
    .await
}

pub async fn mark_ok(
    request_id: i64,
    answer: &str,
    results: &serde_json::Value,
    provider: AiProvider,
    details: &serde_json::Value,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        update ask_requests
        set status = 'ok', error = '', answer = $2, results = $3,
            provider = $4, details = $5, replied_at = now()
        where id = $1
        "#,
    )
    .bind(request_id)
    .bind(answer)
    .bind(results)
    .bind(provider)
    .bind(details)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn mark_failed(
    request_id: i64,
    error: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<()> {
    sqlx::query("update ask_requests set status = 'failed', error = $2 where id = $1")
        .bind(request_id)
        .bind(error)
        .execute(db)
        .await?;
    Ok(())
}

/// Credential resolution candidates, most specific first:
/// explicit config id, explicit provider, the user's default, the org default.
pub async fn fetch_config_by_external_id(
    user_id: i64,
    config_external_id: Id,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<AiConfig>> {
    sqlx::query_as::<_, AiConfig>(
        r#"
        select id, external_id, provider, api_key, default_model
        from ai_provider_configs
        where external_id = $2 and user_id = $1
        "#,
    )
    .bind(user_id)
    .bind(config_external_id)
    .fetch_optional(db)
    .await
}

pub async fn fetch_config_by_provider(
    user_id: i64,
    provider: AiProvider,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<AiConfig>> {
    sqlx::query_as::<_, AiConfig>(
        r#"
        select id, external_id, provider, api_key, default_model
        from ai_provider_configs
        where user_id = $1 and provider = $2
        order by is_default desc, id asc
        limit 1
        "#,
    )
    .bind(user_id)
    .bind(provider)
    .fetch_optional(db)
    .await
}

pub async fn fetch_user_default_config(
    user_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<AiConfig>> {
    sqlx::query_as::<_, AiConfig>(
        r#"
        select id, external_id, provider, api_key, default_model
        from ai_provider_configs
        where user_id = $1 and is_default
        order by id asc
        limit 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(db)
    .await
}

pub async fn fetch_org_default_config(
    org_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<AiConfig>> {
    sqlx::query_as::<_, AiConfig>(
        r#"
        select id, external_id, provider, api_key, default_model
        from ai_provider_configs
        where org_id = $1 and is_default
        order by id asc
        limit 1
        "#,
    )
    .bind(org_id)
    .fetch_optional(db)
    .await
}

pub async fn fetch_embedding_hash(
    page_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<String>> {
    sqlx::query_scalar::<_, String>(
        "select content_hash from page_embeddings where page_id = $1",
    )
    .bind(page_id)
    .fetch_optional(db)
    .await
}

pub async fn upsert_embedding(
    page_id: i64,
    content_hash: &str,
    model: &str,
    embedding: &[f32],
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into page_embeddings (page_id, content_hash, model, dimensions, embedding)
        values ($1, $2, $3, $4, $5)
        on conflict (page_id) do update
            set content_hash = $2, model = $3, dimensions = $4, embedding = $5,
                updated_at = now()
        "#,
    )
    .bind(page_id)
    .bind(content_hash)
    .bind(model)
    .bind(embedding.len() as i32)
    .bind(embedding)
    .execute(db)
    .await?;
    Ok(())
}

/// Embeddings of every page the user can access; the nearest-neighbour
/// ranking happens in the relay over this candidate set.
pub async fn accessible_embeddings(
    user_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<PageEmbedding>> {
    sqlx::query_as::<_, PageEmbedding>(
        r#"
        select e.page_id, p.external_id as page_external_id, e.content_hash, e.embedding
        from page_embeddings e
        join pages p on p.id = e.page_id
        join projects pr on pr.id = p.project_id
        where not p.is_deleted
          and not pr.is_deleted
          and (
              exists (
                  select 1 from org_members m
                  where m.org_id = pr.org_id and m.user_id = $1
              )
              or exists (
                  select 1 from project_editors pe
                  where pe.project_id = pr.id and pe.user_id = $1
              )
          )
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await
}
