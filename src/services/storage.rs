use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use dashmap::DashMap;
use uuid::Uuid;

use crate::utils::validation::sanitize_object_name;

/// Remote object store consumed by the upload orchestrator.
///
/// `store` is a single attempt: implementations never retry internally.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `data` under `folder` and returns the public URL of the new object.
    async fn store(
        &self,
        data: Bytes,
        folder: &str,
        file_name: &str,
        content_type: Option<&str>,
    ) -> Result<String>;

    /// Removes an object previously returned by `store`.
    async fn delete(&self, url: &str) -> Result<()>;

    /// Short backend label for health reporting.
    fn backend(&self) -> &'static str;
}

/// Builds a collision-free object key inside `folder`.
pub fn object_key(folder: &str, file_name: &str) -> String {
    let folder = folder.trim_matches('/');
    let name = sanitize_object_name(file_name);
    if folder.is_empty() {
        format!("{}_{}", Uuid::new_v4(), name)
    } else {
        format!("{}/{}_{}", folder, Uuid::new_v4(), name)
    }
}

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    public_base: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: String, public_base: String) -> Self {
        Self {
            client,
            bucket,
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }

    fn key_for<'a>(&self, url: &'a str) -> Result<&'a str> {
        url.strip_prefix(&self.public_base)
            .map(|k| k.trim_start_matches('/'))
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("URL {} does not belong to bucket {}", url, self.bucket))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn store(
        &self,
        data: Bytes,
        folder: &str,
        file_name: &str,
        content_type: Option<&str>,
    ) -> Result<String> {
        let key = object_key(folder, file_name);
        let size = data.len();

        let res = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_length(size as i64)
            .set_content_type(content_type.map(str::to_string))
            .body(ByteStream::from(data))
            .send()
            .await;

        if let Err(e) = res {
            tracing::error!(
                "S3 put_object failed: bucket={}, key={}, error={:?}",
                self.bucket,
                key,
                e
            );
            return Err(e.into());
        }

        tracing::debug!(key = %key, size, "object stored");
        Ok(self.url_for(&key))
    }

    async fn delete(&self, url: &str) -> Result<()> {
        let key = self.key_for(url)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "s3"
    }
}

/// Process-local store for development runs and tests.
pub struct InMemoryObjectStore {
    base_url: String,
    objects: DashMap<String, Bytes>,
}

impl InMemoryObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            objects: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, url: &str) -> Option<Bytes> {
        self.objects.get(url).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn store(
        &self,
        data: Bytes,
        folder: &str,
        file_name: &str,
        _content_type: Option<&str>,
    ) -> Result<String> {
        let url = format!("{}/{}", self.base_url, object_key(folder, file_name));
        self.objects.insert(url.clone(), data);
        Ok(url)
    }

    async fn delete(&self, url: &str) -> Result<()> {
        self.objects
            .remove(url)
            .map(|_| ())
            .ok_or_else(|| anyhow!("No object stored at {}", url))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
