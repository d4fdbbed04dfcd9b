//! Page operations above plain CRUD: creation with same-project copy,
//! creator-gated updates with content merge modes, soft delete cascading to
//! the CRDT log, and the download rendering.

use crate::app::App;
use crate::collab::protocol::room_id_for_page;
use crate::jobs;
use models::{ErrorCode, Id, PageDetails};
use relay_sql::pages::Page;
use relay_sql::users::User;

#[derive(Debug, thiserror::Error)]
pub enum PageOpError {
    #[error("content too large (max {max_mib} MiB)")]
    ContentTooLarge { max_mib: usize },
    #[error("only the creator may {action} this page")]
    CreatorOnly { action: &'static str },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PageOpError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PageOpError::ContentTooLarge { .. } => ErrorCode::ContentTooLarge,
            PageOpError::CreatorOnly { .. } => ErrorCode::AccessDenied,
            PageOpError::Other(_) => ErrorCode::Unexpected,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    Overwrite,
    Append,
    Prepend,
}

impl Default for UpdateMode {
    fn default() -> Self {
        UpdateMode::Append
    }
}

/// Content is measured as UTF-8 byte length; exactly the cap is accepted.
fn check_content_size(content: &str, max_bytes: usize) -> Result<(), PageOpError> {
    if content.len() > max_bytes {
        return Err(PageOpError::ContentTooLarge {
            max_mib: max_bytes / (1024 * 1024),
        });
    }
    Ok(())
}

fn details_content(details: &serde_json::Value) -> &str {
    details
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
}

pub async fn create_page(
    app: &App,
    user: &User,
    project: &relay_sql::projects::Project,
    title: &str,
    details_patch: Option<serde_json::Map<String, serde_json::Value>>,
    copy_from: Option<Id>,
) -> Result<Page, PageOpError> {
    let mut details = serde_json::to_value(PageDetails::default())
        .expect("default details always serialize");

    // A copy source resolves only within the same project and never a
    // soft-deleted page; anything else leaves the new page blank.
    if let Some(source_id) = copy_from {
        let source = relay_sql::pages::fetch_copy_source(source_id, project.id, &app.pool)
            .await
            .map_err(anyhow::Error::from)?;
        if let Some(source) = source {
            if let Some(content) = source.details.get("content") {
                details["content"] = content.clone();
            }
            if let Some(filetype) = source.details.get("filetype") {
                details["filetype"] = filetype.clone();
            }
        }
    }

    if let Some(patch) = details_patch {
        for (key, value) in patch {
            details[key] = value;
        }
    }

    check_content_size(details_content(&details), app.settings.max_content_bytes)?;

    let page = relay_sql::pages::create(
        app.next_id(),
        project.id,
        None,
        user.id,
        title,
        &details,
        &app.pool,
    )
    .await
    .map_err(anyhow::Error::from)?;
    Ok(page)
}

/// Merge a details patch into the existing details honouring the content
/// mode. Pure so the merge semantics are testable in isolation.
fn merge_details(
    existing: &serde_json::Value,
    patch: serde_json::Map<String, serde_json::Value>,
    mode: UpdateMode,
    max_bytes: usize,
) -> Result<serde_json::Value, PageOpError> {
    let mut merged = existing.clone();
    if !merged.is_object() {
        merged = serde_json::json!({});
    }

    let patched_content = patch.get("content").and_then(|v| v.as_str());
    for (key, value) in &patch {
        merged[key.as_str()] = value.clone();
    }

    if let Some(new_content) = patched_content {
        let final_content = match mode {
            UpdateMode::Overwrite => new_content.to_string(),
            UpdateMode::Append => format!("{}{new_content}", details_content(existing)),
            UpdateMode::Prepend => format!("{new_content}{}", details_content(existing)),
        };
        check_content_size(&final_content, max_bytes)?;
        merged["content"] = serde_json::Value::String(final_content);
    } else {
        check_content_size(details_content(&merged), max_bytes)?;
    }

    Ok(merged)
}

pub async fn update_page(
    app: &App,
    user: &User,
    page: &Page,
    title: &str,
    details_patch: Option<serde_json::Map<String, serde_json::Value>>,
    mode: Option<UpdateMode>,
) -> Result<Page, PageOpError> {
    if page.creator_id != user.id {
        return Err(PageOpError::CreatorOnly { action: "update" });
    }

    let details = match details_patch {
        Some(patch) => merge_details(
            &page.details,
            patch,
            mode.unwrap_or_default(),
            app.settings.max_content_bytes,
        )?,
        None => page.details.clone(),
    };

    let updated = relay_sql::pages::update(page.id, title, &details, &app.pool)
        .await
        .map_err(anyhow::Error::from)?;

    if app.settings.ask_enabled {
        let enqueue = app
            .jobs
            .enqueue(
                jobs::UPDATE_PAGE_EMBEDDING,
                serde_json::json!({ "page_id": page.external_id }),
            )
            .await;
        if let Err(err) = enqueue {
            tracing::error!(page = %page.external_id, ?err, "failed to enqueue embedding recompute");
        }
    }

    Ok(updated)
}

/// Soft-delete flags the row and synchronously hard-deletes the page's CRDT
/// log and snapshot in the same transaction. Derived link and mention rows
/// are left behind; listing queries filter them out.
pub async fn soft_delete_page(app: &App, user: &User, page: &Page) -> Result<(), PageOpError> {
    if page.creator_id != user.id {
        return Err(PageOpError::CreatorOnly { action: "delete" });
    }

    let room_id = room_id_for_page(page.external_id);
    let mut txn = app.pool.begin().await.map_err(anyhow::Error::from)?;
    relay_sql::pages::soft_delete(page.id, &mut txn)
        .await
        .map_err(anyhow::Error::from)?;
    relay_sql::updates::delete_all(&room_id, &mut txn)
        .await
        .map_err(anyhow::Error::from)?;
    txn.commit().await.map_err(anyhow::Error::from)?;
    Ok(())
}

/// Sanitize a page title into a safe attachment filename.
pub fn sanitize_filename(title: &str) -> String {
    lazy_static::lazy_static! {
        static ref INVALID: regex::Regex = regex::Regex::new(r#"[/\\:*?"<>|]"#).unwrap();
        static ref COLLAPSE: regex::Regex = regex::Regex::new(r"[-\s]+").unwrap();
    }
    let sanitized = INVALID.replace_all(title, "-");
    let sanitized = sanitized.trim().trim_matches('.');
    let sanitized = COLLAPSE.replace_all(sanitized, "-");
    if sanitized.is_empty() {
        "Untitled".to_string()
    } else {
        sanitized.into_owned()
    }
}

/// Render a page as a downloadable attachment. Markdown pages get the title
/// prepended as an H1.
pub fn render_download(page: &Page) -> (String, &'static str, String) {
    let details: PageDetails =
        serde_json::from_value(page.details.clone()).unwrap_or_default();

    let body = match details.filetype {
        models::Filetype::Md => format!("# {}\n\n{}", page.title, details.content),
        _ => details.content,
    };
    let filename = format!(
        "{}.{}",
        sanitize_filename(&page.title),
        details.filetype.extension()
    );
    (filename, details.filetype.content_type(), body)
}

/// Random 32-byte URL-safe access code.
pub fn generate_access_code() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::encode_config(bytes, base64::URL_SAFE_NO_PAD)
}

#[cfg(test)]
mod test {
    use super::*;

    const MAX: usize = 10 * 1024 * 1024;

    #[test]
    fn test_content_cap_boundary() {
        let exactly = "a".repeat(MAX);
        assert!(check_content_size(&exactly, MAX).is_ok());

        let over = "a".repeat(MAX + 1);
        assert!(matches!(
            check_content_size(&over, MAX),
            Err(PageOpError::ContentTooLarge { .. })
        ));
    }

    #[test]
    fn test_content_cap_counts_utf8_bytes() {
        // Three bytes per char: a third of the cap in chars reaches it.
        let content = "€".repeat(MAX / 3 + 1);
        assert!(check_content_size(&content, MAX).is_err());
    }

    #[test]
    fn test_merge_append_is_default_direction() {
        let existing = serde_json::json!({"content": "hello", "filetype": "md"});
        let patch: serde_json::Map<_, _> =
            serde_json::from_value(serde_json::json!({"content": " world"})).unwrap();

        let merged = merge_details(&existing, patch, UpdateMode::Append, MAX).unwrap();
        assert_eq!(merged["content"], "hello world");
        assert_eq!(merged["filetype"], "md");
    }

    #[test]
    fn test_merge_prepend_and_overwrite() {
        let existing = serde_json::json!({"content": "body"});

        let patch: serde_json::Map<_, _> =
            serde_json::from_value(serde_json::json!({"content": "head "})).unwrap();
        let merged = merge_details(&existing, patch, UpdateMode::Prepend, MAX).unwrap();
        assert_eq!(merged["content"], "head body");

        let patch: serde_json::Map<_, _> =
            serde_json::from_value(serde_json::json!({"content": "fresh"})).unwrap();
        let merged = merge_details(&existing, patch, UpdateMode::Overwrite, MAX).unwrap();
        assert_eq!(merged["content"], "fresh");
    }

    #[test]
    fn test_merge_enforces_cap_on_final_content() {
        let existing = serde_json::json!({"content": "a".repeat(MAX)});
        let patch: serde_json::Map<_, _> =
            serde_json::from_value(serde_json::json!({"content": "b"})).unwrap();
        assert!(merge_details(&existing, patch, UpdateMode::Append, MAX).is_err());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Quarterly Report: Q3/Q4?"), "Quarterly-Report-Q3-Q4-");
        assert_eq!(sanitize_filename("  .hidden.  "), "hidden");
        assert_eq!(sanitize_filename("///"), "-");
        assert_eq!(sanitize_filename("..."), "Untitled");
        assert_eq!(sanitize_filename(""), "Untitled");
    }

    #[test]
    fn test_access_codes_are_url_safe_and_unique() {
        let a = generate_access_code();
        let b = generate_access_code();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43); // 32 bytes, base64url, no padding
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
