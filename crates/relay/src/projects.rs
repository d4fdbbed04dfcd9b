//! Project operations: creation inside the caller's org, listing through
//! the two-tier filter, and creator-gated deletion that soft-deletes every
//! page and hard-deletes their CRDT state in the same sweep.

use crate::app::App;
use crate::collab::protocol::room_id_for_page;
use relay_sql::projects::Project;
use relay_sql::users::User;

#[derive(Debug, thiserror::Error)]
pub enum ProjectOpError {
    #[error("only the creator may delete this project")]
    CreatorOnly,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub async fn create_project(app: &App, user: &User, name: &str) -> anyhow::Result<Project> {
    let org_id = relay_sql::orgs::first_org_for_user(user.id, &app.pool).await?;
    let project =
        relay_sql::projects::create(app.next_id(), org_id, user.id, name, &app.pool).await?;
    Ok(project)
}

/// Soft-delete the project and each of its live pages. Every page's update
/// log and snapshot are erased in the same transaction, so a reconnecting
/// client can never resurrect a deleted document.
pub async fn soft_delete_project(
    app: &App,
    user: &User,
    project: &Project,
) -> Result<(), ProjectOpError> {
    if project.creator_id != user.id {
        return Err(ProjectOpError::CreatorOnly);
    }

    let pages = relay_sql::projects::live_page_ids(project.id, &app.pool)
        .await
        .map_err(anyhow::Error::from)?;

    let mut txn = app.pool.begin().await.map_err(anyhow::Error::from)?;
    for (page_id, page_external_id) in &pages {
        relay_sql::pages::soft_delete(*page_id, &mut txn)
            .await
            .map_err(anyhow::Error::from)?;
        relay_sql::updates::delete_all(&room_id_for_page(*page_external_id), &mut txn)
            .await
            .map_err(anyhow::Error::from)?;
    }
    relay_sql::projects::soft_delete(project.id, &mut txn)
        .await
        .map_err(anyhow::Error::from)?;
    txn.commit().await.map_err(anyhow::Error::from)?;

    tracing::info!(
        project = %project.external_id,
        pages = pages.len(),
        "soft-deleted project and purged page CRDT state"
    );
    Ok(())
}
