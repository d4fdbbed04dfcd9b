mod errors;
mod id;

pub use errors::ErrorCode;
pub use id::{Id, IdGenerator};

/// Role of a direct project editor.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "project_role", rename_all = "snake_case")]
pub enum ProjectRole {
    Viewer,
    Editor,
}

impl ProjectRole {
    pub fn can_write(&self) -> bool {
        matches!(self, ProjectRole::Editor)
    }
}

/// Role of an org member.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "org_role", rename_all = "snake_case")]
pub enum OrgRole {
    Admin,
    Member,
}

/// FileStatus is the single source of truth for downloadability.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "file_status", rename_all = "snake_case")]
pub enum FileStatus {
    PendingUrl,
    Finalizing,
    Available,
    Failed,
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "blob_status", rename_all = "snake_case")]
pub enum BlobStatus {
    Pending,
    Verified,
    Failed,
}

/// Storage providers a blob may live on. Downloads prefer remote over local.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "storage_provider", rename_all = "snake_case")]
pub enum StorageProvider {
    R2,
    Local,
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "import_status", rename_all = "snake_case")]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "ask_status", rename_all = "snake_case")]
pub enum AskStatus {
    Pending,
    Ok,
    Failed,
}

/// Severity of a recorded abuse incident. Ordering is meaningful: bans are
/// evaluated per-severity against configured thresholds.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "abuse_severity", rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "ai_provider", rename_all = "snake_case")]
pub enum AiProvider {
    Openai,
    Anthropic,
}

/// Filetype of a page's rendered content.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "page_filetype", rename_all = "snake_case")]
pub enum Filetype {
    Md,
    Csv,
    Txt,
}

impl Default for Filetype {
    fn default() -> Self {
        Filetype::Md
    }
}

impl Filetype {
    pub fn extension(&self) -> &'static str {
        match self {
            Filetype::Md => "md",
            Filetype::Csv => "csv",
            Filetype::Txt => "txt",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Filetype::Md => "text/markdown",
            Filetype::Csv => "text/csv",
            Filetype::Txt => "text/plain",
        }
    }
}

/// The free-form `details` JSON carried by every page.
/// Only these fields are read by the server; clients may round-trip others.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PageDetails {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub filetype: Filetype,
    #[serde(default = "default_schema_version")]
    pub schema_version: i32,
}

fn default_schema_version() -> i32 {
    1
}

impl Default for PageDetails {
    fn default() -> Self {
        Self {
            content: String::new(),
            filetype: Filetype::Md,
            schema_version: 1,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_page_details_defaults() {
        let details: PageDetails = serde_json::from_str("{}").unwrap();
        assert_eq!(details.content, "");
        assert_eq!(details.filetype, Filetype::Md);
        assert_eq!(details.schema_version, 1);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }
}
