use models::{Id, ProjectRole};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Project {
    pub id: i64,
    pub external_id: Id,
    pub org_id: Option<i64>,
    pub creator_id: i64,
    pub name: String,
    pub org_members_can_access: bool,
    pub is_deleted: bool,
}

pub async fn fetch_by_external_id(
    external_id: Id,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<Project>> {
    sqlx::query_as::<_, Project>(
        r#"
        select id, external_id, org_id, creator_id, name, org_members_can_access, is_deleted
        from projects
        where external_id = $1 and not is_deleted
        "#,
    )
    .bind(external_id)
    .fetch_optional(db)
    .await
}

pub async fn fetch_by_id(
    project_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<Project>> {
    sqlx::query_as::<_, Project>(
        r#"
        select id, external_id, org_id, creator_id, name, org_members_can_access, is_deleted
        from projects
        where id = $1
        "#,
    )
    .bind(project_id)
    .fetch_optional(db)
    .await
}

/// Indexed editor lookup: the second tier of the access predicate.
pub async fn editor_role(
    project_id: i64,
    user_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<ProjectRole>> {
    sqlx::query_scalar::<_, ProjectRole>(
        "select role from project_editors where project_id = $1 and user_id = $2",
    )
    .bind(project_id)
    .bind(user_id)
    .fetch_optional(db)
    .await
}

/// Add or update a direct editor. Idempotent on (project, user).
pub async fn upsert_editor(
    project_id: i64,
    user_id: i64,
    role: ProjectRole,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into project_editors (project_id, user_id, role)
        values ($1, $2, $3)
        on conflict (project_id, user_id) do update set role = $3
        "#,
    )
    .bind(project_id)
    .bind(user_id)
    .bind(role)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn remove_editor(
    project_id: i64,
    user_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<bool> {
    let done = sqlx::query("delete from project_editors where project_id = $1 and user_id = $2")
        .bind(project_id)
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(done.rows_affected() > 0)
}

pub async fn create(
    external_id: Id,
    org_id: Option<i64>,
    creator_id: i64,
    name: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Project> {
    sqlx::query_as::<_, Project>(
        r#"
        insert into projects (external_id, org_id, creator_id, name)
        values ($1, $2, $3, $4)
        returning id, external_id, org_id, creator_id, name, org_members_can_access, is_deleted
        "#,
    )
    .bind(external_id)
    .bind(org_id)
    .bind(creator_id)
    .bind(name)
    .fetch_one(db)
    .await
}

pub async fn soft_delete(
    project_id: i64,
    txn: &mut sqlx::PgConnection,
) -> sqlx::Result<()> {
    sqlx::query("update projects set is_deleted = true, updated_at = now() where id = $1")
        .bind(project_id)
        .execute(txn)
        .await?;
    Ok(())
}

/// Projects visible to the user: org membership or a direct editor role.
pub async fn accessible_projects(
    user_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<Project>> {
    sqlx::query_as::<_, Project>(
        r#"
        select id, external_id, org_id, creator_id, name, org_members_can_access, is_deleted
        from projects pr
        where not pr.is_deleted
          and (
              exists (
                  select 1 from org_members m
                  where m.org_id = pr.org_id and m.user_id = $1
              )
              or exists (
                  select 1 from project_editors e
                  where e.project_id = pr.id and e.user_id = $1
              )
          )
        order by pr.id desc
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EditorRow {
    pub user_id: i64,
    pub user_external_id: Id,
    pub email: String,
    pub username: String,
    pub role: ProjectRole,
}

pub async fn list_editors(
    project_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<EditorRow>> {
    sqlx::query_as::<_, EditorRow>(
        r#"
        select e.user_id, u.external_id as user_external_id, u.email, u.username, e.role
        from project_editors e
        join users u on u.id = e.user_id
        where e.project_id = $1
        order by e.created_at asc
        "#,
    )
    .bind(project_id)
    .fetch_all(db)
    .await
}

/// Internal ids of the project's live pages, used by the soft-delete
/// cascade.
pub async fn live_page_ids(
    project_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<(i64, Id)>> {
    sqlx::query_as::<_, (i64, Id)>(
        "select id, external_id from pages where project_id = $1 and not is_deleted",
    )
    .bind(project_id)
    .fetch_all(db)
    .await
}

/// External ids of the project's live pages, used to cascade CRDT
/// state deletion when the project itself is deleted.
pub async fn live_page_external_ids(
    project_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<Id>> {
    sqlx::query_scalar::<_, Id>(
        "select external_id from pages where project_id = $1 and not is_deleted",
    )
    .bind(project_id)
    .fetch_all(db)
    .await
}
