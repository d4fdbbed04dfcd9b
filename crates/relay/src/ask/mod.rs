//! The ask orchestrator: parse @-mentions out of the query, retrieve the
//! pages to ground the answer in (explicitly named, mentioned, or found by
//! embedding similarity), resolve the AI credential, call the external
//! chat-completion API, and persist a terminal request row either way.

pub mod clients;
pub mod embeddings;

use crate::app::App;
use crate::content;
use clients::{retry_with_backoff, ApiCallError, ChatMessage};
use models::{AiProvider, ErrorCode, Id, PageDetails};
use relay_sql::ask::AiConfig;
use relay_sql::pages::Page;
use relay_sql::users::User;

#[derive(Debug, Clone, serde::Serialize)]
pub struct PageReference {
    pub external_id: Id,
    pub title: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, serde::Serialize)]
pub struct AskOutcome {
    pub request_id: Id,
    pub status: models::AskStatus,
    pub answer: Option<String>,
    pub pages: Vec<PageReference>,
    pub error: Option<ErrorCode>,
}

/// Merge explicitly passed page ids with ids mentioned in the query.
/// Explicit ids take priority, order is preserved, duplicates collapse,
/// and the merged list is truncated to `limit`.
pub fn merge_page_ids(explicit: &[String], mentioned: &[String], limit: usize) -> Vec<String> {
    let mut merged = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for id in explicit.iter().chain(mentioned.iter()) {
        if seen.insert(id.clone()) {
            merged.push(id.clone());
        }
        if merged.len() == limit {
            break;
        }
    }
    merged
}

/// Resolve the AI credential: explicit config id, then explicit provider,
/// then the user's default, then the org default. First match wins.
pub async fn resolve_credential(
    app: &App,
    user_id: i64,
    provider: Option<AiProvider>,
    config_id: Option<Id>,
) -> anyhow::Result<Option<AiConfig>> {
    if let Some(config_id) = config_id {
        if let Some(config) =
            relay_sql::ask::fetch_config_by_external_id(user_id, config_id, &app.pool).await?
        {
            return Ok(Some(config));
        }
    }
    if let Some(provider) = provider {
        if let Some(config) =
            relay_sql::ask::fetch_config_by_provider(user_id, provider, &app.pool).await?
        {
            return Ok(Some(config));
        }
    }
    if let Some(config) = relay_sql::ask::fetch_user_default_config(user_id, &app.pool).await? {
        return Ok(Some(config));
    }
    if let Some(org_id) = relay_sql::orgs::first_org_for_user(user_id, &app.pool).await? {
        if let Some(config) = relay_sql::ask::fetch_org_default_config(org_id, &app.pool).await? {
            return Ok(Some(config));
        }
    }
    Ok(None)
}

/// Build the chat messages from the cleaned question and page contexts.
pub fn build_messages(question: &str, pages: &[Page]) -> Vec<ChatMessage> {
    let mut context = String::new();
    for page in pages {
        let details: PageDetails =
            serde_json::from_value(page.details.clone()).unwrap_or_default();
        context.push_str(&format!(
            "## {}\n\n{}\n\n",
            page.title, details.content
        ));
    }

    vec![
        ChatMessage {
            role: "system".to_string(),
            content: "You are a helpful assistant. Answer the user's question using only \
                      the provided pages. Cite page titles when relevant; say so plainly \
                      when the pages do not contain the answer."
                .to_string(),
        },
        ChatMessage {
            role: "user".to_string(),
            content: format!("Pages:\n\n{context}Question: {question}"),
        },
    ]
}

#[allow(clippy::too_many_arguments)]
pub async fn process_query(
    app: &App,
    user: &User,
    query: &str,
    page_ids: &[String],
    provider: Option<AiProvider>,
    config_id: Option<Id>,
    model: Option<&str>,
) -> anyhow::Result<AskOutcome> {
    let request = relay_sql::ask::create_request(app.next_id(), user.id, query, &app.pool).await?;

    let fail = |error: ErrorCode| AskOutcome {
        request_id: request.external_id,
        status: models::AskStatus::Failed,
        answer: None,
        pages: Vec::new(),
        error: Some(error),
    };

    let (question, mentioned) = content::parse_mentions(query);
    if question.trim().is_empty() {
        relay_sql::ask::mark_failed(request.id, ErrorCode::EmptyQuestion.as_str(), &app.pool)
            .await?;
        return Ok(fail(ErrorCode::EmptyQuestion));
    }

    let limit = app.settings.ask_max_pages;
    let merged = merge_page_ids(page_ids, &mentioned, limit);

    // Named pages are fetched through the access filter: ids the user
    // cannot access are silently dropped rather than failing the ask.
    let pages = if !merged.is_empty() {
        let ids: Vec<Id> = merged.iter().filter_map(|id| id.parse().ok()).collect();
        relay_sql::pages::accessible_pages_by_external_ids(user.id, &ids, &app.pool).await?
    } else {
        match embeddings::search_similar(app, user.id, &question, limit).await {
            Ok(similar_ids) => {
                relay_sql::pages::accessible_pages_by_external_ids(user.id, &similar_ids, &app.pool)
                    .await?
            }
            Err(embeddings::EmbedError::KeyNotConfigured) => {
                relay_sql::ask::mark_failed(
                    request.id,
                    ErrorCode::AiKeyNotConfigured.as_str(),
                    &app.pool,
                )
                .await?;
                return Ok(fail(ErrorCode::AiKeyNotConfigured));
            }
            Err(err) => {
                tracing::error!(?err, "similarity search failed");
                relay_sql::ask::mark_failed(request.id, ErrorCode::ApiError.as_str(), &app.pool)
                    .await?;
                return Ok(fail(ErrorCode::ApiError));
            }
        }
    };

    if pages.is_empty() {
        relay_sql::ask::mark_failed(request.id, ErrorCode::NoMatchingPages.as_str(), &app.pool)
            .await?;
        return Ok(fail(ErrorCode::NoMatchingPages));
    }

    let Some(config) = resolve_credential(app, user.id, provider, config_id).await? else {
        relay_sql::ask::mark_failed(
            request.id,
            ErrorCode::AiKeyNotConfigured.as_str(),
            &app.pool,
        )
        .await?;
        return Ok(fail(ErrorCode::AiKeyNotConfigured));
    };

    let messages = build_messages(&question, &pages);
    let response = retry_with_backoff(
        4,
        std::time::Duration::from_secs(120),
        ApiCallError::is_retryable,
        || app.chat.chat(&config, model, &messages),
    )
    .await;

    let response = match response {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(request = %request.external_id, ?err, "chat completion failed");
            let code = match err {
                ApiCallError::Other(_) => ErrorCode::Unexpected,
                _ => ErrorCode::ApiError,
            };
            relay_sql::ask::mark_failed(request.id, code.as_str(), &app.pool).await?;
            return Ok(fail(code));
        }
    };

    let references: Vec<PageReference> = pages
        .iter()
        .map(|p| PageReference {
            external_id: p.external_id,
            title: p.title.clone(),
            updated_at: p.updated_at,
            created_at: p.created_at,
        })
        .collect();

    let results = serde_json::json!({
        "answer": response.answer,
        "pages": references,
    });
    relay_sql::ask::mark_ok(
        request.id,
        &response.answer,
        &results,
        config.provider,
        &response.details,
        &app.pool,
    )
    .await?;

    Ok(AskOutcome {
        request_id: request.external_id,
        status: models::AskStatus::Ok,
        answer: Some(response.answer),
        pages: references,
        error: None,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_merge_prioritizes_explicit_ids() {
        let explicit = vec!["a".to_string(), "b".to_string()];
        let mentioned = vec!["b".to_string(), "c".to_string(), "a".to_string()];
        assert_eq!(merge_page_ids(&explicit, &mentioned, 5), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_merge_truncates_to_limit() {
        let explicit: Vec<String> = (0..4).map(|i| format!("e{i}")).collect();
        let mentioned: Vec<String> = (0..4).map(|i| format!("m{i}")).collect();
        let merged = merge_page_ids(&explicit, &mentioned, 5);
        assert_eq!(merged, vec!["e0", "e1", "e2", "e3", "m0"]);
    }

    #[test]
    fn test_merge_empty_inputs() {
        assert!(merge_page_ids(&[], &[], 5).is_empty());
    }
}
