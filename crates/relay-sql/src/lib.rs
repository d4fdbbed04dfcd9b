pub mod abuse;
pub mod ask;
pub mod files;
pub mod grants;
pub mod imports;
pub mod invitations;
pub mod links;
pub mod orgs;
pub mod pages;
pub mod projects;
pub mod rate_limits;
pub mod updates;
pub mod users;

pub use models::{Id, ProjectRole};

/// Returns the user id for the given email address, or an error if the email
/// address is not found.
pub async fn get_user_id_for_email(email: &str, db: &sqlx::PgPool) -> sqlx::Result<i64> {
    sqlx::query_scalar::<_, i64>("select id from users where lower(email) = lower($1)")
        .bind(email)
        .fetch_one(db)
        .await
}
