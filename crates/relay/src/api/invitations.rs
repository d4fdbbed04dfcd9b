use super::{ApiError, AuthUser, Request};
use crate::app::App;
use crate::authz::{self, Action};
use crate::collab::{protocol, ServerFrame};
use crate::invitations::{self, InviteOutcome};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use models::{Id, ProjectRole};
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, serde::Deserialize, Validate)]
pub struct InviteIn {
    #[validate(email)]
    pub email: String,
    #[serde(default = "default_role")]
    pub role: ProjectRole,
}

fn default_role() -> ProjectRole {
    ProjectRole::Editor
}

fn invite_response(outcome: InviteOutcome) -> axum::Json<serde_json::Value> {
    match outcome {
        InviteOutcome::AddedDirectly { .. } => {
            axum::Json(serde_json::json!({ "status": "added" }))
        }
        InviteOutcome::Invited(invitation) => axum::Json(serde_json::json!({
            "status": "invited",
            "expires_at": invitation.expires_at,
        })),
    }
}

pub async fn invite_project_editor(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Path(external_id): Path<Id>,
    Request(payload): Request<InviteIn>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let project = relay_sql::projects::fetch_by_external_id(external_id, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("project"))?;
    let snapshot = authz::snapshot_for_project(user.id, project.id, &app.pool).await?;
    if !authz::can(user.id, Action::ChangeProjectSharing, &snapshot) {
        return Err(ApiError::not_found("project"));
    }

    let outcome =
        invitations::invite_editor(&app, &user, &project, None, &payload.email, payload.role)
            .await?;
    Ok(invite_response(outcome))
}

/// Sharing a page shares its project; the invitation remembers the page so
/// acceptance can land the invitee on it.
pub async fn invite_page_editor(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Path(external_id): Path<Id>,
    Request(payload): Request<InviteIn>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let page = relay_sql::pages::fetch_by_external_id(external_id, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("page"))?;
    let snapshot = authz::snapshot_for_page(user.id, &page, &app.pool).await?;
    if !authz::can(user.id, Action::SharePage, &snapshot) {
        return Err(ApiError::not_found("page"));
    }
    let project = relay_sql::projects::fetch_by_id(page.project_id, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("project"))?;

    let outcome = invitations::invite_editor(
        &app,
        &user,
        &project,
        Some(page.id),
        &payload.email,
        payload.role,
    )
    .await?;
    Ok(invite_response(outcome))
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct RoleIn {
    pub role: ProjectRole,
}

/// Change a direct editor's role. Downgrading to viewer flips the user's
/// live connections read-only via a room broadcast.
pub async fn update_editor_role(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Path((external_id, target_user_id)): Path<(Id, i64)>,
    Request(payload): Request<RoleIn>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let project = relay_sql::projects::fetch_by_external_id(external_id, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("project"))?;
    let snapshot = authz::snapshot_for_project(user.id, project.id, &app.pool).await?;
    if !authz::can(user.id, Action::ChangeProjectSharing, &snapshot) {
        return Err(ApiError::not_found("project"));
    }

    relay_sql::projects::upsert_editor(project.id, target_user_id, payload.role, &app.pool)
        .await?;

    if payload.role == ProjectRole::Viewer {
        notify_project_rooms(
            &app,
            project.id,
            ServerFrame::WritePermissionRevoked {
                user_id: target_user_id,
            },
        )
        .await?;
    }
    Ok(axum::Json(serde_json::json!({ "status": "updated" })))
}

/// Remove a direct editor. Their live connections re-run the admission
/// check and close when it no longer passes.
pub async fn remove_editor(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Path((external_id, target_user_id)): Path<(Id, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let project = relay_sql::projects::fetch_by_external_id(external_id, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("project"))?;
    let snapshot = authz::snapshot_for_project(user.id, project.id, &app.pool).await?;
    if !authz::can(user.id, Action::ChangeProjectSharing, &snapshot) {
        return Err(ApiError::not_found("project"));
    }

    relay_sql::projects::remove_editor(project.id, target_user_id, &app.pool).await?;
    notify_project_rooms(
        &app,
        project.id,
        ServerFrame::AccessRevoked {
            user_id: target_user_id,
        },
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn notify_project_rooms(
    app: &App,
    project_id: i64,
    frame: ServerFrame,
) -> Result<(), ApiError> {
    let page_ids = relay_sql::projects::live_page_external_ids(project_id, &app.pool).await?;
    for page_id in page_ids {
        app.rooms
            .broadcast(&protocol::room_id_for_page(page_id), frame.clone());
    }
    Ok(())
}

pub async fn accept_invitation(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Path(token): Path<String>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let accepted = invitations::accept_invitation(&app, &user, &token).await?;

    // Point the client at the shared page when the invitation named one,
    // otherwise at the project.
    let redirect = match accepted.page_id {
        Some(page_id) => {
            let page = relay_sql::pages::fetch_by_id(page_id, &app.pool).await?;
            page.map(|p| format!("/pages/{}", p.external_id))
        }
        None => None,
    };
    let redirect = match redirect {
        Some(redirect) => redirect,
        None => {
            let project =
                relay_sql::projects::fetch_by_id(accepted.project_id, &app.pool).await?;
            project
                .map(|p| format!("/projects/{}", p.external_id))
                .unwrap_or_else(|| "/".to_string())
        }
    };

    Ok(axum::Json(serde_json::json!({
        "status": "accepted",
        "role": accepted.role,
        "redirect": redirect,
    })))
}
