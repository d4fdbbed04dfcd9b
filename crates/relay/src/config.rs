use models::StorageProvider;

/// Runtime knobs of the relay, populated from the daemon's arguments.
/// Every limit the admission, ask, upload and ingestion paths consult
/// lives here so tests can dial them without touching the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Identifies the deployment in log lines (`[src:<id>]`).
    pub deployment_id: String,

    // Connection admission.
    pub ws_rate_limit: u32,
    pub ws_rate_window_secs: u32,
    /// Idle period after which a quiescent room snapshots and derives.
    pub quiescence_idle: std::time::Duration,
    /// Admission checks beyond this deadline are treated as denial.
    pub admission_timeout: std::time::Duration,

    // Per-user API limits.
    pub ask_rate_limit: u32,
    pub ask_rate_window_secs: u32,
    pub upload_rate_limit: u32,
    pub upload_rate_window_secs: u32,
    pub ext_invite_rate_limit: u32,
    pub ext_invite_rate_window_secs: u32,

    // Content and file caps.
    pub max_content_bytes: usize,
    pub max_file_size_bytes: i64,
    pub allowed_content_types: Vec<String>,

    // Ask pipeline.
    pub ask_enabled: bool,
    pub ask_max_pages: usize,
    pub embedding_model: String,
    pub embedding_dimensions: usize,

    // Storage.
    pub primary_upload_target: StorageProvider,
    pub r2_bucket: Option<String>,
    pub upload_url_expiry: std::time::Duration,
    pub download_url_expiry: std::time::Duration,
    pub token_download_url_expiry: std::time::Duration,

    // Archive ingestion thresholds.
    pub imports_max_compression_ratio: f64,
    pub imports_max_uncompressed_bytes: u64,
    pub imports_max_single_file_bytes: u64,
    pub imports_max_file_count: usize,
    pub imports_max_path_depth: usize,
    pub imports_stale_after: std::time::Duration,

    // Abuse windows and thresholds.
    pub abuse_window_days: i64,
    pub abuse_critical_threshold: i64,
    pub abuse_high_threshold: i64,
    pub abuse_medium_threshold: i64,
    pub abuse_low_threshold: i64,

    // Invitations.
    pub invitation_expiry_days: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            deployment_id: "_NOTSET".to_string(),

            ws_rate_limit: 10,
            ws_rate_window_secs: 60,
            quiescence_idle: std::time::Duration::from_secs(5),
            admission_timeout: std::time::Duration::from_secs(2),

            ask_rate_limit: 20,
            ask_rate_window_secs: 3600,
            upload_rate_limit: 60,
            upload_rate_window_secs: 3600,
            ext_invite_rate_limit: 10,
            ext_invite_rate_window_secs: 3600,

            max_content_bytes: 10 * 1024 * 1024,
            max_file_size_bytes: 100 * 1024 * 1024,
            allowed_content_types: vec![
                "text/plain".to_string(),
                "text/markdown".to_string(),
                "text/csv".to_string(),
                "application/pdf".to_string(),
                "application/zip".to_string(),
                "image/png".to_string(),
                "image/jpeg".to_string(),
                "image/gif".to_string(),
                "image/webp".to_string(),
            ],

            ask_enabled: true,
            ask_max_pages: 5,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 1536,

            primary_upload_target: StorageProvider::R2,
            r2_bucket: None,
            upload_url_expiry: std::time::Duration::from_secs(600),
            download_url_expiry: std::time::Duration::from_secs(600),
            token_download_url_expiry: std::time::Duration::from_secs(300),

            imports_max_compression_ratio: 30.0,
            imports_max_uncompressed_bytes: 5 * 1024 * 1024 * 1024,
            imports_max_single_file_bytes: 1024 * 1024 * 1024,
            imports_max_file_count: 100_000,
            imports_max_path_depth: 30,
            imports_stale_after: std::time::Duration::from_secs(24 * 3600),

            abuse_window_days: 30,
            abuse_critical_threshold: 1,
            abuse_high_threshold: 3,
            abuse_medium_threshold: 10,
            abuse_low_threshold: 50,

            invitation_expiry_days: 7,
        }
    }
}
