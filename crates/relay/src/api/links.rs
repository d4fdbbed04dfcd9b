use super::{ApiError, AuthUser, Request};
use crate::app::App;
use crate::authz::{self, Action};
use crate::derived;
use axum::extract::{Path, State};
use models::Id;
use std::sync::Arc;
use validator::Validate;

fn page_refs(refs: Vec<relay_sql::links::PageRef>) -> Vec<serde_json::Value> {
    refs.into_iter()
        .map(|r| serde_json::json!({ "id": r.external_id, "title": r.title }))
        .collect()
}

/// Outgoing and incoming page references of a page.
pub async fn page_links(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Path(external_id): Path<Id>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let page = relay_sql::pages::fetch_by_external_id(external_id, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("page"))?;
    let snapshot = authz::snapshot_for_page(user.id, &page, &app.pool).await?;
    if !authz::can(user.id, Action::ReadPage, &snapshot) {
        return Err(ApiError::not_found("page"));
    }

    let outgoing = relay_sql::links::outgoing_links(page.id, &app.pool).await?;
    let incoming = relay_sql::links::incoming_links(page.id, &app.pool).await?;
    Ok(axum::Json(serde_json::json!({
        "outgoing": page_refs(outgoing),
        "incoming": page_refs(incoming),
    })))
}

#[derive(Debug, Default, serde::Deserialize, Validate)]
pub struct SyncLinksIn {
    /// Derive from this content instead of the stored page content.
    pub content: Option<String>,
}

/// Force re-derivation of links and mentions for a page.
pub async fn sync_links(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Path(external_id): Path<Id>,
    payload: Option<Request<SyncLinksIn>>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let page = relay_sql::pages::fetch_by_external_id(external_id, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("page"))?;
    let snapshot = authz::snapshot_for_page(user.id, &page, &app.pool).await?;
    if !authz::can(user.id, Action::ReadPage, &snapshot) {
        return Err(ApiError::not_found("page"));
    }

    let inline = payload.and_then(|Request(p)| p.content);
    let content = match inline {
        Some(content) => content,
        None => page
            .details
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    };

    let outcome = derived::sync_derived_rows(&app, &page, &content)
        .await
        .map_err(ApiError::from)?;
    Ok(axum::Json(serde_json::json!({
        "changed": outcome.any_links_changed() || outcome.mentions_changed,
        "links_changed": outcome.any_links_changed(),
        "mentions_changed": outcome.mentions_changed,
    })))
}
