use models::ProjectRole;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Invitation {
    pub id: i64,
    pub project_id: i64,
    pub page_id: Option<i64>,
    pub email: String,
    pub role: ProjectRole,
    pub token: String,
    pub invited_by: i64,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub accepted: bool,
    pub accepted_by: Option<i64>,
}

const COLUMNS: &str = r#"
    id, project_id, page_id, email, role, token, invited_by,
    expires_at, accepted, accepted_by
"#;

/// A pending (not yet accepted, not yet expired) invitation for this email
/// on this project, if one exists. Email matching is case-insensitive.
pub async fn find_pending(
    project_id: i64,
    email: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<Invitation>> {
    sqlx::query_as::<_, Invitation>(&format!(
        "select {COLUMNS} from invitations
         where project_id = $1 and lower(email) = lower($2)
           and not accepted and expires_at > now()
         order by id desc limit 1"
    ))
    .bind(project_id)
    .bind(email)
    .fetch_optional(db)
    .await
}

pub async fn create(
    project_id: i64,
    page_id: Option<i64>,
    email: &str,
    role: ProjectRole,
    token: &str,
    invited_by: i64,
    expires_at: chrono::DateTime<chrono::Utc>,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Invitation> {
    sqlx::query_as::<_, Invitation>(&format!(
        "insert into invitations
            (project_id, page_id, email, role, token, invited_by, expires_at)
         values ($1, $2, $3, $4, $5, $6, $7)
         returning {COLUMNS}"
    ))
    .bind(project_id)
    .bind(page_id)
    .bind(email)
    .bind(role)
    .bind(token)
    .bind(invited_by)
    .bind(expires_at)
    .fetch_one(db)
    .await
}

pub async fn find_by_token(
    token: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<Invitation>> {
    sqlx::query_as::<_, Invitation>(&format!(
        "select {COLUMNS} from invitations where token = $1"
    ))
    .bind(token)
    .fetch_optional(db)
    .await
}

pub async fn mark_accepted(
    invitation_id: i64,
    accepted_by: i64,
    txn: &mut sqlx::PgConnection,
) -> sqlx::Result<()> {
    sqlx::query(
        "update invitations set accepted = true, accepted_by = $2 where id = $1",
    )
    .bind(invitation_id)
    .bind(accepted_by)
    .execute(txn)
    .await?;
    Ok(())
}
