use super::{ApiError, AuthUser, Request};
use crate::app::App;
use crate::ask;
use crate::rate_limit;
use axum::extract::State;
use axum::http::StatusCode;
use models::{AiProvider, ErrorCode, Id};
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, serde::Deserialize, Validate)]
pub struct AskIn {
    #[validate(length(min = 1, max = 20_000))]
    pub query: String,
    #[serde(default)]
    pub page_ids: Vec<String>,
    pub provider: Option<AiProvider>,
    pub config_id: Option<Id>,
    pub model: Option<String>,
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::EmptyQuestion => StatusCode::BAD_REQUEST,
        ErrorCode::NoMatchingPages => StatusCode::NOT_FOUND,
        ErrorCode::AiKeyNotConfigured => StatusCode::BAD_REQUEST,
        ErrorCode::ApiError => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn ask(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Request(payload): Request<AskIn>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    if !app.settings.ask_enabled {
        return Err(ApiError::coded(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::FeatureDisabled,
            "the ask feature is not enabled on this deployment",
        ));
    }

    let decision = app
        .rate_limiter
        .check_and_increment(
            &rate_limit::ask_key(user.id),
            app.settings.ask_rate_limit,
            app.settings.ask_rate_window_secs,
        )
        .await;
    if !decision.allowed {
        return Err(ApiError::rate_limited("ask limit reached; try again later"));
    }

    let outcome = ask::process_query(
        &app,
        &user,
        &payload.query,
        &payload.page_ids,
        payload.provider,
        payload.config_id,
        payload.model.as_deref(),
    )
    .await?;

    if let Some(code) = outcome.error {
        return Err(ApiError::coded(
            status_for(code),
            code,
            format!("ask request {} failed", outcome.request_id),
        ));
    }

    Ok(axum::Json(serde_json::json!({
        "id": outcome.request_id,
        "answer": outcome.answer,
        "pages": outcome.pages,
    })))
}
