//! Per-page semantic embeddings: the recompute worker (hash
//! short-circuited) and the nearest-neighbour retrieval used when an ask
//! query names no pages.

use super::clients::{retry_with_backoff, ApiCallError};
use crate::app::App;
use crate::content;
use models::{Id, PageDetails};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EmbedResult {
    Updated,
    /// The stored hash already matches this content; the external API was
    /// not called.
    Skipped,
}

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("no AI credential configured")]
    KeyNotConfigured,
    #[error(transparent)]
    Api(#[from] ApiCallError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EmbedError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbedError::Api(err) if err.is_retryable())
    }
}

/// Recompute the embedding for one page. Short-circuits without touching
/// the external API when the stored content hash is current.
pub async fn update_page_embedding(
    app: &App,
    page_external_id: Id,
) -> Result<EmbedResult, EmbedError> {
    let Some(page) =
        relay_sql::pages::fetch_by_external_id(page_external_id, &app.pool)
            .await
            .map_err(anyhow::Error::from)?
    else {
        tracing::info!(page = %page_external_id, "page gone; skipping embedding");
        return Ok(EmbedResult::Skipped);
    };
    if page.is_deleted {
        return Ok(EmbedResult::Skipped);
    }

    let details: PageDetails =
        serde_json::from_value(page.details.clone()).unwrap_or_default();
    let content_hash = content::content_sha256(&details.content);

    let stored = relay_sql::ask::fetch_embedding_hash(page.id, &app.pool)
        .await
        .map_err(anyhow::Error::from)?;
    if stored.as_deref() == Some(content_hash.as_str()) {
        return Ok(EmbedResult::Skipped);
    }

    let config = super::resolve_credential(app, page.creator_id, None, None)
        .await
        .map_err(anyhow::Error::from)?
        .ok_or(EmbedError::KeyNotConfigured)?;

    let model = app.settings.embedding_model.clone();
    let vector = retry_with_backoff(
        4,
        std::time::Duration::from_secs(60),
        ApiCallError::is_retryable,
        || app.embeddings.embed(&config, &model, &details.content),
    )
    .await?;
    if vector.len() != app.settings.embedding_dimensions {
        tracing::warn!(
            page = %page.external_id,
            got = vector.len(),
            expected = app.settings.embedding_dimensions,
            "embedding dimensionality differs from configuration"
        );
    }

    relay_sql::ask::upsert_embedding(page.id, &content_hash, &model, &vector, &app.pool)
        .await
        .map_err(anyhow::Error::from)?;
    Ok(EmbedResult::Updated)
}

/// Embed the query and rank the user's accessible pages by cosine
/// distance, returning the nearest external ids.
pub async fn search_similar(
    app: &App,
    user_id: i64,
    query: &str,
    limit: usize,
) -> Result<Vec<Id>, EmbedError> {
    let config = super::resolve_credential(app, user_id, None, None)
        .await
        .map_err(anyhow::Error::from)?
        .ok_or(EmbedError::KeyNotConfigured)?;

    let model = app.settings.embedding_model.clone();
    let query_vector = retry_with_backoff(
        4,
        std::time::Duration::from_secs(60),
        ApiCallError::is_retryable,
        || app.embeddings.embed(&config, &model, query),
    )
    .await?;

    let candidates = relay_sql::ask::accessible_embeddings(user_id, &app.pool)
        .await
        .map_err(anyhow::Error::from)?;
    let ranked = super::clients::rank_by_cosine_distance(&query_vector, candidates, limit);
    Ok(ranked.into_iter().map(|c| c.page_external_id).collect())
}
