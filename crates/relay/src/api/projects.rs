use super::{ApiError, AuthUser, Request};
use crate::app::App;
use crate::authz::{self, Action};
use crate::projects;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use models::Id;
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, serde::Serialize)]
pub struct ProjectOut {
    pub id: Id,
    pub name: String,
    pub org_members_can_access: bool,
}

impl From<relay_sql::projects::Project> for ProjectOut {
    fn from(project: relay_sql::projects::Project) -> Self {
        Self {
            id: project.external_id,
            name: project.name,
            org_members_can_access: project.org_members_can_access,
        }
    }
}

pub async fn list_projects(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
) -> Result<axum::Json<Vec<ProjectOut>>, ApiError> {
    let projects = relay_sql::projects::accessible_projects(user.id, &app.pool).await?;
    Ok(axum::Json(
        projects.into_iter().map(ProjectOut::from).collect(),
    ))
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct ProjectIn {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
}

pub async fn create_project(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Request(payload): Request<ProjectIn>,
) -> Result<impl IntoResponse, ApiError> {
    let project = projects::create_project(&app, &user, &payload.name).await?;
    Ok((StatusCode::CREATED, axum::Json(ProjectOut::from(project))))
}

pub async fn delete_project(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Path(external_id): Path<Id>,
) -> Result<impl IntoResponse, ApiError> {
    let project = relay_sql::projects::fetch_by_external_id(external_id, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("project"))?;

    match projects::soft_delete_project(&app, &user, &project).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(projects::ProjectOpError::CreatorOnly) => Err(ApiError::coded(
            StatusCode::FORBIDDEN,
            models::ErrorCode::AccessDenied,
            "only the creator can delete this project",
        )),
        Err(projects::ProjectOpError::Other(err)) => Err(err.into()),
    }
}

/// Direct editors of the project (org members access implicitly and are
/// not listed here).
pub async fn list_editors(
    State(app): State<Arc<App>>,
    AuthUser(user): AuthUser,
    Path(external_id): Path<Id>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let project = relay_sql::projects::fetch_by_external_id(external_id, &app.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("project"))?;
    let snapshot = authz::snapshot_for_project(user.id, project.id, &app.pool).await?;
    if !authz::can(user.id, Action::ReadProject, &snapshot) {
        return Err(ApiError::not_found("project"));
    }

    let editors = relay_sql::projects::list_editors(project.id, &app.pool).await?;
    let items: Vec<serde_json::Value> = editors
        .into_iter()
        .map(|e| {
            serde_json::json!({
                "id": e.user_external_id,
                "email": e.email,
                "username": e.username,
                "role": e.role,
            })
        })
        .collect();
    Ok(axum::Json(serde_json::json!({ "editors": items })))
}
