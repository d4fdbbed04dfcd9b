use models::{Id, OrgRole};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Org {
    pub id: i64,
    pub external_id: Id,
    pub name: String,
    pub domain: Option<String>,
}

pub async fn fetch_by_id(
    org_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<Org>> {
    sqlx::query_as::<_, Org>("select id, external_id, name, domain from orgs where id = $1")
        .bind(org_id)
        .fetch_optional(db)
        .await
}

/// Indexed membership lookup: the first tier of the access predicate.
pub async fn member_role(
    org_id: i64,
    user_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<OrgRole>> {
    sqlx::query_scalar::<_, OrgRole>(
        "select role from org_members where org_id = $1 and user_id = $2",
    )
    .bind(org_id)
    .bind(user_id)
    .fetch_optional(db)
    .await
}

/// The org a user's default AI credential may hang off of.
/// Users in multiple orgs resolve to the oldest membership.
pub async fn first_org_for_user(
    user_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<Option<i64>> {
    sqlx::query_scalar::<_, i64>(
        r#"
        select o.id
        from orgs o
        join org_members m on m.org_id = o.id
        where m.user_id = $1
        order by o.id asc
        limit 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(db)
    .await
}

/// True when both users share at least one org. Invitations between
/// org-mates are high trust and skip the external-invite counter.
pub async fn users_share_org(
    user_a: i64,
    user_b: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
) -> sqlx::Result<bool> {
    sqlx::query_scalar::<_, bool>(
        r#"
        select exists (
            select 1
            from org_members a
            join org_members b on a.org_id = b.org_id
            where a.user_id = $1 and b.user_id = $2
        )
        "#,
    )
    .bind(user_a)
    .bind(user_b)
    .fetch_one(db)
    .await
}
