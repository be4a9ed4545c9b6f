use std::env;

/// Runtime configuration for the upload orchestrator and the location relay
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Maximum concurrent store calls per upload batch (default: 5)
    pub upload_pool_size: usize,

    /// Destination folder tag for uploaded feed images (default: "images")
    pub upload_folder: String,

    /// Maximum size of a single asset in bytes (default: 20 MB)
    pub max_file_size: usize,

    /// Maximum number of assets accepted in one batch (default: 20)
    pub max_batch_size: usize,

    /// Delete already-stored objects when a batch fails (default: true)
    pub cleanup_orphans: bool,

    /// Outbound queue capacity per relay connection (default: 64)
    pub relay_queue_capacity: usize,

    /// Object store backend: "s3" or "memory" (default: "s3")
    pub storage_backend: String,

    /// Base URL prepended to object keys when building public URLs
    pub storage_public_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upload_pool_size: 5,
            upload_folder: "images".to_string(),
            max_file_size: 20 * 1024 * 1024, // 20 MB
            max_batch_size: 20,
            cleanup_orphans: true,
            relay_queue_capacity: 64,
            storage_backend: "s3".to_string(),
            storage_public_url: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            upload_pool_size: env::var("UPLOAD_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .map(|v| v.max(1))
                .unwrap_or(default.upload_pool_size),

            upload_folder: env::var("UPLOAD_FOLDER")
                .ok()
                .map(|v| v.trim_matches('/').to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default.upload_folder),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            max_batch_size: env::var("MAX_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_batch_size),

            cleanup_orphans: env::var("CLEANUP_ORPHANS")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default.cleanup_orphans),

            relay_queue_capacity: env::var("RELAY_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .map(|v| v.max(1))
                .unwrap_or(default.relay_queue_capacity),

            storage_backend: env::var("STORAGE_BACKEND").unwrap_or(default.storage_backend),

            storage_public_url: env::var("STORAGE_PUBLIC_URL")
                .ok()
                .map(|v| v.trim_end_matches('/').to_string()),
        }
    }

    /// Create config for local development (in-memory store, no S3 required)
    pub fn development() -> Self {
        Self {
            storage_backend: "memory".to_string(),
            storage_public_url: Some("http://localhost:8080/media".to_string()),
            ..Self::default()
        }
    }

    /// Request body limit for the upload route, with headroom for multipart framing
    pub fn upload_body_limit(&self) -> usize {
        self.max_file_size
            .saturating_mul(self.max_batch_size.max(1))
            .saturating_add(1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.upload_pool_size, 5);
        assert_eq!(config.upload_folder, "images");
        assert!(config.cleanup_orphans);
        assert_eq!(config.storage_backend, "s3");
    }

    #[test]
    fn test_development_config() {
        let config = AppConfig::development();
        assert_eq!(config.storage_backend, "memory");
        assert_eq!(config.upload_pool_size, 5);
        assert!(config.storage_public_url.is_some());
    }

    #[test]
    fn test_pool_size_is_clamped() {
        unsafe { env::set_var("UPLOAD_POOL_SIZE", "0") };
        let config = AppConfig::from_env();
        unsafe { env::remove_var("UPLOAD_POOL_SIZE") };
        assert_eq!(config.upload_pool_size, 1);
    }

    #[test]
    fn test_body_limit_covers_full_batch() {
        let config = AppConfig::default();
        assert!(config.upload_body_limit() > config.max_file_size * config.max_batch_size);
    }
}
