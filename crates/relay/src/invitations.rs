//! Editor invitations for projects and pages. Inviting an existing user
//! adds them directly; anyone else gets a pending tokenized invitation.
//! Invitations to people outside the inviter's org consume a per-user
//! counter to keep invitation spam bounded.

use crate::app::App;
use crate::rate_limit;
use models::{ErrorCode, ProjectRole};
use relay_sql::invitations::Invitation;
use relay_sql::users::User;

#[derive(Debug, thiserror::Error)]
pub enum InvitationError {
    #[error("invitation is invalid or has expired")]
    Invalid,
    #[error("invitation was issued to a different email address")]
    EmailMismatch,
    #[error("external invitation limit reached; try again later")]
    RateLimited,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl InvitationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            InvitationError::Invalid => ErrorCode::InvalidInvitation,
            InvitationError::EmailMismatch => ErrorCode::EmailMismatch,
            InvitationError::RateLimited => ErrorCode::RateLimited,
            InvitationError::Other(_) => ErrorCode::Unexpected,
        }
    }
}

#[derive(Debug)]
pub enum InviteOutcome {
    /// The email belonged to an existing user; they are now an editor.
    AddedDirectly { user_id: i64 },
    /// A pending invitation exists (created now or found idempotently).
    Invited(Invitation),
}

/// A valid invitation is not yet accepted and expires strictly in the
/// future: one expiring exactly now is no longer valid.
pub fn is_valid(invitation: &Invitation, now: chrono::DateTime<chrono::Utc>) -> bool {
    !invitation.accepted && invitation.expires_at > now
}

fn email_matches(invitation: &Invitation, user: &User) -> bool {
    invitation.email.to_lowercase() == user.email.to_lowercase()
}

pub async fn invite_editor(
    app: &App,
    inviter: &User,
    project: &relay_sql::projects::Project,
    page_id: Option<i64>,
    email: &str,
    role: ProjectRole,
) -> Result<InviteOutcome, InvitationError> {
    let email = email.trim().to_lowercase();

    let invitee = relay_sql::users::fetch_by_email(&email, &app.pool)
        .await
        .map_err(anyhow::Error::from)?;

    // Org-mates inviting each other is high trust; everyone else draws from
    // the inviter's external-invitation budget.
    let is_external = match &invitee {
        Some(user) => !relay_sql::orgs::users_share_org(inviter.id, user.id, &app.pool)
            .await
            .map_err(anyhow::Error::from)?,
        None => true,
    };
    if is_external {
        let decision = app
            .rate_limiter
            .check_and_increment(
                &rate_limit::ext_invite_key(inviter.id),
                app.settings.ext_invite_rate_limit,
                app.settings.ext_invite_rate_window_secs,
            )
            .await;
        if !decision.allowed {
            tracing::warn!(
                inviter = %inviter.external_id,
                invited_email = %email,
                count = decision.count,
                "abuse alert: external invitation rate limit exceeded"
            );
            return Err(InvitationError::RateLimited);
        }
    }

    if let Some(user) = invitee {
        relay_sql::projects::upsert_editor(project.id, user.id, role, &app.pool)
            .await
            .map_err(anyhow::Error::from)?;
        return Ok(InviteOutcome::AddedDirectly { user_id: user.id });
    }

    // Idempotent on email: re-inviting returns the pending invitation.
    if let Some(pending) = relay_sql::invitations::find_pending(project.id, &email, &app.pool)
        .await
        .map_err(anyhow::Error::from)?
    {
        return Ok(InviteOutcome::Invited(pending));
    }

    let token = generate_invitation_token();
    let expires_at =
        chrono::Utc::now() + chrono::Duration::days(app.settings.invitation_expiry_days);
    let invitation = relay_sql::invitations::create(
        project.id,
        page_id,
        &email,
        role,
        &token,
        inviter.id,
        expires_at,
        &app.pool,
    )
    .await
    .map_err(anyhow::Error::from)?;

    Ok(InviteOutcome::Invited(invitation))
}

#[derive(Debug)]
pub struct Accepted {
    pub project_id: i64,
    pub page_id: Option<i64>,
    pub role: ProjectRole,
}

/// Accept an invitation by token. Accepting the same valid-accepted
/// invitation twice grants nothing extra and keeps the original acceptor.
pub async fn accept_invitation(
    app: &App,
    user: &User,
    token: &str,
) -> Result<Accepted, InvitationError> {
    let invitation = relay_sql::invitations::find_by_token(token, &app.pool)
        .await
        .map_err(anyhow::Error::from)?
        .ok_or(InvitationError::Invalid)?;

    if invitation.accepted {
        if invitation.accepted_by == Some(user.id) {
            return Ok(Accepted {
                project_id: invitation.project_id,
                page_id: invitation.page_id,
                role: invitation.role,
            });
        }
        return Err(InvitationError::Invalid);
    }
    if !is_valid(&invitation, chrono::Utc::now()) {
        return Err(InvitationError::Invalid);
    }
    if !email_matches(&invitation, user) {
        return Err(InvitationError::EmailMismatch);
    }

    let mut txn = app.pool.begin().await.map_err(anyhow::Error::from)?;
    relay_sql::projects::upsert_editor(invitation.project_id, user.id, invitation.role, &mut *txn)
        .await
        .map_err(anyhow::Error::from)?;
    relay_sql::invitations::mark_accepted(invitation.id, user.id, &mut txn)
        .await
        .map_err(anyhow::Error::from)?;
    txn.commit().await.map_err(anyhow::Error::from)?;

    Ok(Accepted {
        project_id: invitation.project_id,
        page_id: invitation.page_id,
        role: invitation.role,
    })
}

fn generate_invitation_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::encode_config(bytes, base64::URL_SAFE_NO_PAD)
}

#[cfg(test)]
mod test {
    use super::*;

    fn invitation(accepted: bool, expires_in_secs: i64) -> Invitation {
        Invitation {
            id: 1,
            project_id: 10,
            page_id: None,
            email: "Bob@Example.com".to_string(),
            role: ProjectRole::Editor,
            token: "tok".to_string(),
            invited_by: 2,
            expires_at: chrono::Utc::now() + chrono::Duration::seconds(expires_in_secs),
            accepted,
            accepted_by: None,
        }
    }

    #[test]
    fn test_validity_requires_strictly_future_expiry() {
        let now = chrono::Utc::now();
        let mut pending = invitation(false, 3600);
        assert!(is_valid(&pending, now));

        // Expiring exactly `now` is not valid.
        pending.expires_at = now;
        assert!(!is_valid(&pending, now));

        pending.expires_at = now - chrono::Duration::seconds(1);
        assert!(!is_valid(&pending, now));
    }

    #[test]
    fn test_accepted_invitations_are_not_valid() {
        assert!(!is_valid(&invitation(true, 3600), chrono::Utc::now()));
    }

    #[test]
    fn test_email_match_is_case_insensitive() {
        let inv = invitation(false, 3600);
        let user = |email: &str| User {
            id: 3,
            external_id: models::Id::new([0, 0, 0, 0, 0, 0, 0, 3]),
            email: email.to_string(),
            username: "bob".to_string(),
            is_active: true,
        };
        assert!(email_matches(&inv, &user("bob@example.com")));
        assert!(email_matches(&inv, &user("BOB@EXAMPLE.COM")));
        assert!(!email_matches(&inv, &user("carol@example.com")));
    }

    #[test]
    fn test_tokens_are_opaque_and_distinct() {
        let a = generate_invitation_token();
        assert_eq!(a.len(), 43);
        assert_ne!(a, generate_invitation_token());
    }
}
