use std::path::Path;
use thiserror::Error;

/// Longest object name segment kept after sanitizing, in bytes
const MAX_NAME_LEN: usize = 200;

#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

/// Validates asset size against maximum limit
pub fn validate_file_size(size: usize, max_size: usize) -> Result<(), ValidationError> {
    if size > max_size {
        return Err(ValidationError {
            code: "FILE_TOO_LARGE",
            message: format!(
                "File size {} bytes exceeds maximum allowed {} bytes ({} MB)",
                size,
                max_size,
                max_size / 1024 / 1024
            ),
        });
    }
    Ok(())
}

/// Validates the number of assets in a single upload batch
pub fn validate_batch_size(count: usize, max_count: usize) -> Result<(), ValidationError> {
    if count > max_count {
        return Err(ValidationError {
            code: "BATCH_TOO_LARGE",
            message: format!(
                "Batch of {} assets exceeds maximum allowed {}",
                count, max_count
            ),
        });
    }
    Ok(())
}

/// Reduces a client-supplied file name to a single safe object-key segment.
///
/// Directory components are stripped, reserved characters become `_`, and
/// names that end up empty or hidden fall back to `file`.
pub fn sanitize_object_name(filename: &str) -> String {
    // Treat both separators as path boundaries regardless of platform
    let normalized = filename.replace('\\', "/");
    let name = Path::new(&normalized)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if filename.contains("..") {
        tracing::warn!("Path traversal attempt in upload name: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control() || c.is_whitespace() || "/\\:*?\"<>|;#%&+".contains(c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    let sanitized = sanitized.trim_start_matches('.');
    if sanitized.is_empty() {
        return "file".to_string();
    }

    let mut end = sanitized.len().min(MAX_NAME_LEN);
    while !sanitized.is_char_boundary(end) {
        end -= 1;
    }
    sanitized[..end].to_string()
}
