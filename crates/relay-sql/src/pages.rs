use models::Id;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Page {
    pub id: i64,
    pub external_id: Id,
    pub project_id: i64,
    pub parent_id: Option<i64>,
    pub creator_id: i64,
    pub title: String,
    pub details: serde_json::Value,
    pub access_code: Option<String>,
    pub is_deleted: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const PAGE_COLUMNS: &str = r#"
    id, external_id, project_id, parent_id, creator_id, title, details,
    access_code, is_deleted, created_at, updated_at
"#;

// Two-tier access filter, reused by listing, autocomplete, ask retrieval
// and the embeddings search: a page is visible when the user is a member
// of the owning project's org (tier 1) or a direct project editor (tier 2).
// Soft-deleted pages and projects never surface.
const ACCESSIBLE_WHERE: &str = r#"
    not p.is_deleted
    and not pr.is_deleted
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
"#;

// As above, but a viewer-role editor does not qualify.
const EDITABLE_WHERE: &str = r#"
    not p.is_deleted
    and not pr.is_deleted
    and (
        exists (
            select 1 from org_members m
            where m.org_id = pr.org_id and m.user_id = $1
        )
        or exists (
            select 1 from project_editors e
            where e.project_id = pr.id and e.user_id = $1 and e.role = 'editor'
        )
    )
"#;

pub async fn fetch_by_external_id(
    external_id: Id,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<Page>> {
    sqlx::query_as::<_, Page>(&format!(
        "select {PAGE_COLUMNS} from pages where external_id = $1"
    ))
    .bind(external_id)
    .fetch_optional(db)
    .await
}

pub async fn fetch_by_id(
    page_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<Page>> {
    sqlx::query_as::<_, Page>(&format!("select {PAGE_COLUMNS} from pages where id = $1"))
        .bind(page_id)
        .fetch_optional(db)
        .await
}

/// Copy-source lookup for create_page: resolved only within the target
/// project and never a soft-deleted page. Anything else is "not found".
pub async fn fetch_copy_source(
    external_id: Id,
    project_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<Page>> {
    sqlx::query_as::<_, Page>(&format!(
        "select {PAGE_COLUMNS} from pages
         where external_id = $1 and project_id = $2 and not is_deleted"
    ))
    .bind(external_id)
    .bind(project_id)
    .fetch_optional(db)
    .await
}

pub async fn create(
    external_id: Id,
    project_id: i64,
    parent_id: Option<i64>,
    creator_id: i64,
    title: &str,
    details: &serde_json::Value,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Page> {
    sqlx::query_as::<_, Page>(&format!(
        "insert into pages (external_id, project_id, parent_id, creator_id, title, details)
         values ($1, $2, $3, $4, $5, $6)
         returning {PAGE_COLUMNS}"
    ))
    .bind(external_id)
    .bind(project_id)
    .bind(parent_id)
    .bind(creator_id)
    .bind(title)
    .bind(details)
    .fetch_one(db)
    .await
}

pub async fn update(
    page_id: i64,
    title: &str,
    details: &serde_json::Value,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Page> {
    sqlx::query_as::<_, Page>(&format!(
        "update pages set title = $2, details = $3, updated_at = now()
         where id = $1
         returning {PAGE_COLUMNS}"
    ))
    .bind(page_id)
    .bind(title)
    .bind(details)
    .fetch_one(db)
    .await
}

/// Fold freshly-snapshotted CRDT text back into the page's details.
pub async fn update_content(
    page_id: i64,
    content: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        update pages
        set details = jsonb_set(details, '{content}', to_jsonb($2::text)),
            updated_at = now()
        where id = $1
        "#,
    )
    .bind(page_id)
    .bind(content)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn soft_delete(page_id: i64, txn: &mut sqlx::PgConnection) -> sqlx::Result<()> {
    sqlx::query("update pages set is_deleted = true, updated_at = now() where id = $1")
        .bind(page_id)
        .execute(txn)
        .await?;
    Ok(())
}

pub async fn set_access_code(
    page_id: i64,
    access_code: Option<&str>,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<()> {
    sqlx::query("update pages set access_code = $2, updated_at = now() where id = $1")
        .bind(page_id)
        .bind(access_code)
        .execute(db)
        .await?;
    Ok(())
}

/// Pages the user may edit, most recently updated first.
/// An optional case-insensitive title filter serves autocomplete.
pub async fn editable_pages(
    user_id: i64,
    title_query: Option<&str>,
    limit: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<Page>> {
    sqlx::query_as::<_, Page>(&format!(
        "select p.id, p.external_id, p.project_id, p.parent_id, p.creator_id, p.title, p.details,
                p.access_code, p.is_deleted, p.created_at, p.updated_at
         from pages p
         join projects pr on pr.id = p.project_id
         where {EDITABLE_WHERE}
           and ($2::text is null or p.title ilike '%' || $2 || '%')
         order by p.updated_at desc
         limit $3"
    ))
    .bind(user_id)
    .bind(title_query)
    .bind(limit)
    .fetch_all(db)
    .await
}

/// Accessible pages constrained to the given external ids.
/// Inaccessible, unknown, and soft-deleted ids are silently absent.
pub async fn accessible_pages_by_external_ids(
    user_id: i64,
    external_ids: &[Id],
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<Page>> {
    let ids: Vec<String> = external_ids.iter().map(|id| id.to_string()).collect();
    sqlx::query_as::<_, Page>(&format!(
        "select p.id, p.external_id, p.project_id, p.parent_id, p.creator_id, p.title, p.details,
                p.access_code, p.is_deleted, p.created_at, p.updated_at
         from pages p
         join projects pr on pr.id = p.project_id
         where {ACCESSIBLE_WHERE}
           and p.external_id = any($2)"
    ))
    .bind(user_id)
    .bind(&ids)
    .fetch_all(db)
    .await
}

/// Internal ids of live pages matching the given external ids, used by the
/// derived-work link pass. Unknown and soft-deleted targets drop out.
pub async fn live_ids_by_external_ids(
    external_ids: &[String],
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Vec<(i64, String)>> {
    sqlx::query_as::<_, (i64, String)>(
        "select id, external_id from pages where external_id = any($1) and not is_deleted",
    )
    .bind(external_ids)
    .fetch_all(db)
    .await
}
