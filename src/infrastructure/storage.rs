use crate::config::AppConfig;
use crate::services::storage::{InMemoryObjectStore, ObjectStore, S3ObjectStore};
use anyhow::Context;
use aws_sdk_s3::config::Region;
use std::env;
use std::sync::Arc;
use tracing::info;

pub async fn setup_storage(config: &AppConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match config.storage_backend.to_lowercase().as_str() {
        "memory" => {
            let base = config
                .storage_public_url
                .clone()
                .unwrap_or_else(|| "memory://objects".to_string());
            info!("🧠 In-memory object store: {}", base);
            Ok(Arc::new(InMemoryObjectStore::new(base)))
        }
        "s3" => Ok(Arc::new(setup_s3(config).await?)),
        other => anyhow::bail!("Unknown STORAGE_BACKEND '{}' (expected s3 or memory)", other),
    }
}

async fn setup_s3(config: &AppConfig) -> anyhow::Result<S3ObjectStore> {
    let endpoint_url = env::var("MINIO_ENDPOINT").context("MINIO_ENDPOINT must be set")?;
    let access_key = env::var("MINIO_ACCESS_KEY").context("MINIO_ACCESS_KEY must be set")?;
    let secret_key = env::var("MINIO_SECRET_KEY").context("MINIO_SECRET_KEY must be set")?;
    let bucket = env::var("MINIO_BUCKET").context("MINIO_BUCKET must be set")?;
    let region = env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".to_string());

    info!("☁️  S3 Storage: {} (Bucket: {})", endpoint_url, bucket);

    let aws_config = aws_config::from_env()
        .endpoint_url(&endpoint_url)
        .region(Region::new(region))
        .credentials_provider(aws_sdk_s3::config::Credentials::new(
            access_key, secret_key, None, None, "static",
        ))
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(true)
        .build();

    let s3_client = aws_sdk_s3::Client::from_conf(s3_config);

    match s3_client.head_bucket().bucket(&bucket).send().await {
        Ok(_) => info!("✅ Bucket '{}' is ready", bucket),
        Err(e) => tracing::warn!(
            "⚠️  Bucket '{}' not reachable at startup, uploads will fail until it is: {}",
            bucket,
            e
        ),
    }

    let public_base = config.storage_public_url.clone().unwrap_or_else(|| {
        format!("{}/{}", endpoint_url.trim_end_matches('/'), bucket)
    });

    Ok(S3ObjectStore::new(s3_client, bucket, public_base))
}
