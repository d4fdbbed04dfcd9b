/// Machine-readable error codes surfaced to clients, paired with a
/// human-readable message at every surface (REST bodies and the websocket
/// error frame emitted before close).
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Authentication / authorization.
    NotAuthenticated,
    AccessDenied,
    RateLimited,
    // Ask pipeline.
    EmptyQuestion,
    NoMatchingPages,
    AiKeyNotConfigured,
    ApiError,
    Unexpected,
    // Feature gating and content limits.
    FeatureDisabled,
    ContentTooLarge,
    // Invitations.
    InvalidInvitation,
    EmailMismatch,
    // Ingestion.
    InvalidContentType,
    FileTooLarge,
    InvalidZip,
    CompressionRatio,
    ExtractedSize,
    FileCount,
    NestedArchive,
    PathDepth,
    NoImportableContent,
    TemporarilyBlocked,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotAuthenticated => "not_authenticated",
            ErrorCode::AccessDenied => "access_denied",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::EmptyQuestion => "empty_question",
            ErrorCode::NoMatchingPages => "no_matching_pages",
            ErrorCode::AiKeyNotConfigured => "ai_key_not_configured",
            ErrorCode::ApiError => "api_error",
            ErrorCode::Unexpected => "unexpected",
            ErrorCode::FeatureDisabled => "feature_disabled",
            ErrorCode::ContentTooLarge => "content_too_large",
            ErrorCode::InvalidInvitation => "invalid_invitation",
            ErrorCode::EmailMismatch => "email_mismatch",
            ErrorCode::InvalidContentType => "invalid_content_type",
            ErrorCode::FileTooLarge => "file_too_large",
            ErrorCode::InvalidZip => "invalid_zip",
            ErrorCode::CompressionRatio => "compression_ratio",
            ErrorCode::ExtractedSize => "extracted_size",
            ErrorCode::FileCount => "file_count",
            ErrorCode::NestedArchive => "nested_archive",
            ErrorCode::PathDepth => "path_depth",
            ErrorCode::NoImportableContent => "no_importable_content",
            ErrorCode::TemporarilyBlocked => "temporarily_blocked",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::ErrorCode;

    #[test]
    fn test_wire_names_match_serde() {
        for code in [
            ErrorCode::NotAuthenticated,
            ErrorCode::RateLimited,
            ErrorCode::AiKeyNotConfigured,
            ErrorCode::CompressionRatio,
            ErrorCode::TemporarilyBlocked,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }
}
