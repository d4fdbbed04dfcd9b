use super::{ApiError, AuthUser};
use crate::app::App;
use axum::extract::State;
use std::sync::Arc;

/// Pages that @-mention the caller, newest first.
pub async fn list_mentions(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let pages = relay_sql::links::pages_mentioning_user(user.id, &app.pool).await?;
    let items: Vec<serde_json::Value> = pages
        .into_iter()
        .map(|p| serde_json::json!({ "id": p.external_id, "title": p.title }))
        .collect();
    Ok(axum::Json(serde_json::json!({ "pages": items })))
}
