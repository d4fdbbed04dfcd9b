//! Pre-extraction inspection of uploaded archives. Every metric below is
//! computed from the zip central directory alone; no entry is decompressed
//! before the archive has passed validation.

use crate::config::Settings;
use models::{ErrorCode, Severity};
use std::io::{Read, Seek};

const NESTED_ARCHIVE_EXTENSIONS: &[&str] =
    &[".zip", ".7z", ".tar", ".tar.gz", ".tgz", ".tar.bz2", ".rar"];

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Inspection {
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub compression_ratio: f64,
    pub file_count: usize,
    pub max_single_file_size: u64,
    pub max_path_depth: usize,
    pub has_nested_archives: bool,
    pub nested_archive_names: Vec<String>,
    pub has_path_traversal: bool,
    pub has_absolute_paths: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    /// Not a readable zip, or carrying traversal/absolute paths. These are
    /// hard rejections and are never classified as abuse-severity events.
    #[error("invalid zip archive: {0}")]
    InvalidZip(String),
    /// A safety threshold was exceeded; recorded through the abuse tracker.
    #[error("{reason} threshold exceeded: {message}")]
    Bomb {
        reason: ErrorCode,
        severity: Severity,
        message: String,
        inspection: Box<Inspection>,
    },
}

impl InspectError {
    pub fn code(&self) -> ErrorCode {
        match self {
            InspectError::InvalidZip(_) => ErrorCode::InvalidZip,
            InspectError::Bomb { reason, .. } => *reason,
        }
    }
}

/// Compute inspection metrics from an archive's directory listing.
pub fn inspect<R: Read + Seek>(
    reader: R,
    compressed_size: u64,
) -> Result<Inspection, InspectError> {
    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|err| InspectError::InvalidZip(err.to_string()))?;

    let mut result = Inspection {
        compressed_size,
        ..Default::default()
    };

    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|err| InspectError::InvalidZip(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();

        result.file_count += 1;
        result.uncompressed_size += entry.size();
        result.max_single_file_size = result.max_single_file_size.max(entry.size());

        let parts: Vec<&str> = name.split('/').filter(|p| !p.is_empty()).collect();
        result.max_path_depth = result.max_path_depth.max(parts.len());

        if parts.iter().any(|p| *p == "..") {
            result.has_path_traversal = true;
        }
        if name.starts_with('/') || name.starts_with('\\') {
            result.has_absolute_paths = true;
        }

        let lower = name.to_lowercase();
        if NESTED_ARCHIVE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
            result.nested_archive_names.push(name);
            result.has_nested_archives = true;
        }
    }

    result.compression_ratio = if compressed_size > 0 {
        result.uncompressed_size as f64 / compressed_size as f64
    } else {
        0.0
    };

    Ok(result)
}

fn ratio_severity(ratio: f64) -> Severity {
    if ratio > 100.0 {
        Severity::Critical
    } else if ratio > 50.0 {
        Severity::High
    } else {
        Severity::Medium
    }
}

/// Validate inspection metrics against the configured thresholds.
pub fn validate(inspection: Inspection, settings: &Settings) -> Result<Inspection, InspectError> {
    // Traversal and absolute paths are security rejections, always.
    if inspection.has_path_traversal {
        return Err(InspectError::InvalidZip(
            "archive contains path traversal sequences (..)".to_string(),
        ));
    }
    if inspection.has_absolute_paths {
        return Err(InspectError::InvalidZip(
            "archive contains absolute paths".to_string(),
        ));
    }

    if inspection.compression_ratio > settings.imports_max_compression_ratio {
        return Err(InspectError::Bomb {
            reason: ErrorCode::CompressionRatio,
            severity: ratio_severity(inspection.compression_ratio),
            message: format!(
                "compression ratio {:.1}x exceeds limit of {}x",
                inspection.compression_ratio, settings.imports_max_compression_ratio
            ),
            inspection: Box::new(inspection),
        });
    }

    if inspection.uncompressed_size > settings.imports_max_uncompressed_bytes {
        return Err(InspectError::Bomb {
            reason: ErrorCode::ExtractedSize,
            severity: Severity::Medium,
            message: format!(
                "extracted size {} bytes exceeds limit of {} bytes",
                inspection.uncompressed_size, settings.imports_max_uncompressed_bytes
            ),
            inspection: Box::new(inspection),
        });
    }

    if inspection.file_count > settings.imports_max_file_count {
        return Err(InspectError::Bomb {
            reason: ErrorCode::FileCount,
            severity: Severity::Medium,
            message: format!(
                "file count {} exceeds limit of {}",
                inspection.file_count, settings.imports_max_file_count
            ),
            inspection: Box::new(inspection),
        });
    }

    if inspection.max_single_file_size > settings.imports_max_single_file_bytes {
        return Err(InspectError::Bomb {
            reason: ErrorCode::ExtractedSize,
            severity: Severity::Medium,
            message: format!(
                "single file size {} bytes exceeds limit of {} bytes",
                inspection.max_single_file_size, settings.imports_max_single_file_bytes
            ),
            inspection: Box::new(inspection),
        });
    }

    if inspection.max_path_depth > settings.imports_max_path_depth {
        return Err(InspectError::Bomb {
            reason: ErrorCode::PathDepth,
            severity: Severity::Medium,
            message: format!(
                "path depth {} exceeds limit of {}",
                inspection.max_path_depth, settings.imports_max_path_depth
            ),
            inspection: Box::new(inspection),
        });
    }

    if inspection.has_nested_archives {
        let forbidden: Vec<&String> = inspection
            .nested_archive_names
            .iter()
            .filter(|name| !name.contains(super::ALLOWED_NESTED_ZIP_MARKER))
            .collect();
        if !forbidden.is_empty() {
            let listed: Vec<&String> = forbidden.into_iter().take(5).collect();
            return Err(InspectError::Bomb {
                reason: ErrorCode::NestedArchive,
                severity: Severity::High,
                message: format!("archive contains forbidden nested archives: {listed:?}"),
                inspection: Box::new(inspection),
            });
        }
    }

    Ok(inspection)
}

/// Inspect and validate in one call.
pub fn inspect_and_validate<R: Read + Seek>(
    reader: R,
    compressed_size: u64,
    settings: &Settings,
) -> Result<Inspection, InspectError> {
    validate(inspect(reader, compressed_size)?, settings)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;
    use std::io::Write;
    use zip::write::FileOptions;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer
                .start_file(*name, FileOptions::default())
                .unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn inspect_bytes(bytes: &[u8]) -> Inspection {
        inspect(Cursor::new(bytes), bytes.len() as u64).unwrap()
    }

    #[test]
    fn test_not_a_zip_is_invalid() {
        let err = inspect(Cursor::new(b"not a zip".to_vec()), 9).unwrap_err();
        assert!(matches!(err, InspectError::InvalidZip(_)));
    }

    #[test]
    fn test_metrics_from_directory_listing() {
        let bytes = build_zip(&[
            ("Export/Page abc123def4567890.md", b"# hello"),
            ("Export/sub/data.csv", b"a,b,c"),
        ]);
        let inspection = inspect_bytes(&bytes);
        assert_eq!(inspection.file_count, 2);
        assert_eq!(inspection.max_path_depth, 3);
        assert_eq!(inspection.uncompressed_size, 12);
        assert!(!inspection.has_nested_archives);
        assert!(!inspection.has_path_traversal);
    }

    #[test]
    fn test_traversal_and_absolute_paths_reject_as_invalid_zip() {
        let bytes = build_zip(&[("ok.md", b"x"), ("../../etc/passwd", b"x")]);
        let inspection = inspect_bytes(&bytes);
        assert!(inspection.has_path_traversal);
        let err = validate(inspection, &Settings::default()).unwrap_err();
        // Hard rejection, not an abuse-classified bomb.
        assert!(matches!(err, InspectError::InvalidZip(_)));
    }

    #[test]
    fn test_ratio_boundary_exactly_thirty_is_accepted() {
        let settings = Settings::default();
        let base = Inspection {
            compressed_size: 1000,
            uncompressed_size: 30_000,
            compression_ratio: 30.0,
            file_count: 1,
            ..Default::default()
        };
        assert!(validate(base.clone(), &settings).is_ok());

        let over = Inspection {
            compression_ratio: 30.0 + f64::EPSILON * 64.0,
            ..base
        };
        let err = validate(over, &settings).unwrap_err();
        assert_eq!(err.code(), models::ErrorCode::CompressionRatio);
    }

    #[test]
    fn test_ratio_severity_ladder() {
        assert_eq!(ratio_severity(40.0), Severity::Medium);
        assert_eq!(ratio_severity(51.0), Severity::High);
        assert_eq!(ratio_severity(100.0), Severity::High);
        assert_eq!(ratio_severity(200.0), Severity::Critical);
    }

    #[test]
    fn test_nested_archives_allow_export_blocks_only() {
        let settings = Settings::default();

        let allowed = Inspection {
            compressed_size: 100,
            uncompressed_size: 100,
            compression_ratio: 1.0,
            file_count: 1,
            has_nested_archives: true,
            nested_archive_names: vec!["Export/ExportBlock-1234.zip".to_string()],
            ..Default::default()
        };
        assert!(validate(allowed, &settings).is_ok());

        let forbidden = Inspection {
            compressed_size: 100,
            uncompressed_size: 100,
            compression_ratio: 1.0,
            file_count: 1,
            has_nested_archives: true,
            nested_archive_names: vec!["payload.zip".to_string()],
            ..Default::default()
        };
        let err = validate(forbidden, &settings).unwrap_err();
        assert_eq!(err.code(), models::ErrorCode::NestedArchive);
        match err {
            InspectError::Bomb { severity, .. } => assert_eq!(severity, Severity::High),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_file_count_and_depth_thresholds() {
        let mut settings = Settings::default();
        settings.imports_max_file_count = 10;
        settings.imports_max_path_depth = 3;

        let too_many = Inspection {
            compressed_size: 100,
            uncompressed_size: 100,
            compression_ratio: 1.0,
            file_count: 11,
            ..Default::default()
        };
        assert_eq!(
            validate(too_many, &settings).unwrap_err().code(),
            models::ErrorCode::FileCount
        );

        let too_deep = Inspection {
            compressed_size: 100,
            uncompressed_size: 100,
            compression_ratio: 1.0,
            file_count: 1,
            max_path_depth: 4,
            ..Default::default()
        };
        let err = validate(too_deep, &settings).unwrap_err();
        assert_eq!(err.code(), models::ErrorCode::PathDepth);
        match err {
            InspectError::Bomb { severity, .. } => assert_eq!(severity, Severity::Medium),
            other => panic!("unexpected {other:?}"),
        }
    }
}
