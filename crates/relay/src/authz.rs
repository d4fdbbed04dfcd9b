//! Two-tier access control.
//!
//! Tier 1: the principal is a member of the target project's org.
//! Tier 2: the principal is a direct project editor.
//! Access is granted when either tier holds (additive model); everything
//! else is default deny.
//!
//! `can` is the only entry point into authorization. It is a pure function
//! over a `Snapshot` assembled from two indexed lookups (org membership and
//! project editor) plus creator fields; callers fetch the snapshot with
//! `snapshot_for_page` / `snapshot_for_project` and must not cache negative
//! results. Positive results are only as durable as the request they were
//! fetched for.

use relay_sql::grants::Grants;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Action {
    ReadOrg,
    ReadProject,
    EditProject,
    DeleteProject,
    ChangeProjectSharing,
    ReadPage,
    WritePage,
    ModifyPage,
    DeletePage,
    SharePage,
}

/// Everything the predicate needs to decide any action against one target.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub grants: Grants,
    /// Present when the target is a page.
    pub page_creator_id: Option<i64>,
    pub page_is_deleted: bool,
}

impl Snapshot {
    fn has_project_access(&self) -> bool {
        if self.grants.project_is_deleted {
            return false;
        }
        self.grants.org_role.is_some() || self.grants.editor_role.is_some()
    }

    fn can_write_content(&self) -> bool {
        if self.grants.project_is_deleted {
            return false;
        }
        // Org members write; direct editors write unless viewer-role.
        self.grants.org_role.is_some()
            || self.grants.editor_role.map(|r| r.can_write()).unwrap_or(false)
    }
}

pub fn can(principal_id: i64, action: Action, snapshot: &Snapshot) -> bool {
    match action {
        Action::ReadOrg => snapshot.grants.org_role.is_some(),

        Action::ReadProject | Action::EditProject | Action::ChangeProjectSharing => {
            snapshot.has_project_access()
        }
        Action::DeleteProject => principal_id == snapshot.grants.project_creator_id,

        Action::ReadPage | Action::SharePage => {
            !snapshot.page_is_deleted && snapshot.has_project_access()
        }
        Action::WritePage => !snapshot.page_is_deleted && snapshot.can_write_content(),

        Action::ModifyPage | Action::DeletePage => {
            Some(principal_id) == snapshot.page_creator_id
        }
    }
}

pub async fn snapshot_for_project(
    user_id: i64,
    project_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> anyhow::Result<Snapshot> {
    let grants = relay_sql::grants::fetch_for_project(user_id, project_id, db)
        .await?
        .unwrap_or_default();
    Ok(Snapshot {
        grants,
        page_creator_id: None,
        page_is_deleted: false,
    })
}

pub async fn snapshot_for_page(
    user_id: i64,
    page: &relay_sql::pages::Page,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> anyhow::Result<Snapshot> {
    let grants = relay_sql::grants::fetch_for_project(user_id, page.project_id, db)
        .await?
        .unwrap_or_default();
    Ok(Snapshot {
        grants,
        page_creator_id: Some(page.creator_id),
        page_is_deleted: page.is_deleted,
    })
}

/// Snapshot assembly bounded by the admission deadline: a timed-out or
/// failed fetch yields an empty snapshot, which denies everything.
pub async fn snapshot_for_page_within(
    deadline: std::time::Duration,
    user_id: i64,
    page: &relay_sql::pages::Page,
    pool: &sqlx::PgPool,
) -> Snapshot {
    match tokio::time::timeout(deadline, snapshot_for_page(user_id, page, pool)).await {
        Ok(Ok(snapshot)) => snapshot,
        Ok(Err(err)) => {
            tracing::warn!(?err, user_id, page = %page.external_id, "access check failed; denying");
            Snapshot {
                page_is_deleted: true,
                ..Default::default()
            }
        }
        Err(_elapsed) => {
            tracing::warn!(user_id, page = %page.external_id, "access check timed out; denying");
            Snapshot {
                page_is_deleted: true,
                ..Default::default()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::{OrgRole, ProjectRole};

    fn snapshot(
        org_role: Option<OrgRole>,
        editor_role: Option<ProjectRole>,
        project_creator_id: i64,
        page_creator_id: Option<i64>,
    ) -> Snapshot {
        Snapshot {
            grants: Grants {
                org_role,
                editor_role,
                project_creator_id,
                project_is_deleted: false,
            },
            page_creator_id,
            page_is_deleted: false,
        }
    }

    #[test]
    fn test_org_member_reads_and_writes_pages() {
        let s = snapshot(Some(OrgRole::Member), None, 7, Some(7));
        assert!(can(1, Action::ReadPage, &s));
        assert!(can(1, Action::WritePage, &s));
        assert!(can(1, Action::SharePage, &s));
    }

    #[test]
    fn test_project_editor_reads_and_writes_pages() {
        let s = snapshot(None, Some(ProjectRole::Editor), 7, Some(7));
        assert!(can(2, Action::ReadPage, &s));
        assert!(can(2, Action::WritePage, &s));
    }

    #[test]
    fn test_viewer_reads_but_does_not_write() {
        let s = snapshot(None, Some(ProjectRole::Viewer), 7, Some(7));
        assert!(can(2, Action::ReadPage, &s));
        assert!(!can(2, Action::WritePage, &s));
    }

    #[test]
    fn test_outsider_is_denied_everything() {
        // Authorization totality: a principal in neither the org nor the
        // editor set is denied regardless of target state.
        let s = snapshot(None, None, 7, Some(7));
        for action in [
            Action::ReadOrg,
            Action::ReadProject,
            Action::EditProject,
            Action::ChangeProjectSharing,
            Action::ReadPage,
            Action::WritePage,
            Action::SharePage,
        ] {
            assert!(!can(99, action, &s), "{action:?} must be denied");
        }
    }

    #[test]
    fn test_only_creators_modify_and_delete() {
        let s = snapshot(Some(OrgRole::Admin), Some(ProjectRole::Editor), 7, Some(7));
        assert!(can(7, Action::ModifyPage, &s));
        assert!(can(7, Action::DeletePage, &s));
        assert!(can(7, Action::DeleteProject, &s));
        assert!(!can(8, Action::ModifyPage, &s));
        assert!(!can(8, Action::DeletePage, &s));
        assert!(!can(8, Action::DeleteProject, &s));
    }

    #[test]
    fn test_deleted_project_denies_page_access() {
        let mut s = snapshot(Some(OrgRole::Member), None, 7, Some(7));
        s.grants.project_is_deleted = true;
        assert!(!can(1, Action::ReadPage, &s));
        assert!(!can(1, Action::WritePage, &s));
    }

    #[test]
    fn test_deleted_page_denies_read_and_write() {
        let mut s = snapshot(Some(OrgRole::Member), None, 7, Some(7));
        s.page_is_deleted = true;
        assert!(!can(1, Action::ReadPage, &s));
        assert!(!can(1, Action::WritePage, &s));
    }
}
