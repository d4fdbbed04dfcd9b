//! Post-signup provisioning, invoked by the authentication collaborator
//! once for each newly created user: an org (matched by company domain or
//! personal), a default project, and a starter page.

use crate::app::App;
use models::{OrgRole, PageDetails};
use relay_sql::users::User;

/// Domains whose users get a personal org instead of a shared company org.
const PUBLIC_EMAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "outlook.com",
    "hotmail.com",
    "yahoo.com",
    "icloud.com",
    "proton.me",
    "protonmail.com",
];

pub fn company_domain(email: &str) -> Option<String> {
    let (_, domain) = email.rsplit_once('@')?;
    let domain = domain.trim().to_lowercase();
    if domain.is_empty() || PUBLIC_EMAIL_DOMAINS.contains(&domain.as_str()) {
        return None;
    }
    Some(domain)
}

/// Provision org, project, and default page for a new user. The first user
/// of a company domain becomes the org admin; later users join as members.
pub async fn provision_user(app: &App, user: &User) -> anyhow::Result<()> {
    let mut txn = app.pool.begin().await?;

    let (org_id, role) = match company_domain(&user.email) {
        Some(domain) => match find_org_by_domain(&domain, &mut txn).await? {
            Some(org_id) => (org_id, OrgRole::Member),
            None => {
                let org_id =
                    create_org(app, &domain, Some(&domain), &mut txn).await?;
                (org_id, OrgRole::Admin)
            }
        },
        None => {
            let name = format!("{}'s workspace", user.username);
            let org_id = create_org(app, &name, None, &mut txn).await?;
            (org_id, OrgRole::Admin)
        }
    };

    sqlx::query(
        r#"
        insert into org_members (org_id, user_id, role)
        values ($1, $2, $3)
        on conflict (org_id, user_id) do nothing
        "#,
    )
    .bind(org_id)
    .bind(user.id)
    .bind(role)
    .execute(&mut *txn)
    .await?;

    let project = relay_sql::projects::create(
        app.next_id(),
        Some(org_id),
        user.id,
        "My project",
        &mut *txn,
    )
    .await?;

    let details = serde_json::to_value(PageDetails {
        content: "Welcome! Start typing, or share this page with your team.".to_string(),
        ..PageDetails::default()
    })?;
    let page = relay_sql::pages::create(
        app.next_id(),
        project.id,
        None,
        user.id,
        "Getting started",
        &details,
        &mut *txn,
    )
    .await?;

    txn.commit().await?;
    tracing::info!(
        user = %user.external_id,
        project = %project.external_id,
        page = %page.external_id,
        ?role,
        "signup provisioning complete"
    );
    Ok(())
}

async fn find_org_by_domain(
    domain: &str,
    txn: &mut sqlx::PgConnection,
) -> sqlx::Result<Option<i64>> {
    sqlx::query_scalar::<_, i64>("select id from orgs where domain = $1")
        .bind(domain)
        .fetch_optional(txn)
        .await
}

async fn create_org(
    app: &App,
    name: &str,
    domain: Option<&str>,
    txn: &mut sqlx::PgConnection,
) -> sqlx::Result<i64> {
    sqlx::query_scalar::<_, i64>(
        "insert into orgs (external_id, name, domain) values ($1, $2, $3) returning id",
    )
    .bind(app.next_id())
    .bind(name)
    .bind(domain)
    .fetch_one(txn)
    .await
}

#[cfg(test)]
mod test {
    use super::company_domain;

    #[test]
    fn test_company_domains_are_detected() {
        assert_eq!(
            company_domain("kai@acme.example").as_deref(),
            Some("acme.example")
        );
        assert_eq!(company_domain("KAI@ACME.EXAMPLE").as_deref(), Some("acme.example"));
    }

    #[test]
    fn test_personal_domains_get_no_org_domain() {
        assert_eq!(company_domain("kai@gmail.com"), None);
        assert_eq!(company_domain("kai@outlook.com"), None);
        assert_eq!(company_domain("not-an-email"), None);
    }
}
