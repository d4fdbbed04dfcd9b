//! The row set the authorization predicate evaluates over: two indexed
//! lookups (org membership, project editor) plus creator fields, fetched in
//! one round trip. The predicate itself is pure and lives in the relay.

use models::{OrgRole, ProjectRole};

#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct Grants {
    pub org_role: Option<OrgRole>,
    pub editor_role: Option<ProjectRole>,
    pub project_creator_id: i64,
    pub project_is_deleted: bool,
}

pub async fn fetch_for_project(
    user_id: i64,
    project_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<Grants>> {
    sqlx::query_as::<_, Grants>(
        r#"
        select
            (select m.role from org_members m
             where m.org_id = pr.org_id and m.user_id = $1) as org_role,
            (select e.role from project_editors e
             where e.project_id = pr.id and e.user_id = $1) as editor_role,
            pr.creator_id as project_creator_id,
            pr.is_deleted as project_is_deleted
        from projects pr
        where pr.id = $2
        "#,
    )
    .bind(user_id)
    .bind(project_id)
    .fetch_optional(db)
    .await
}
