//! Bounded fan-out / fan-in of asset uploads to the object store.

use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use bytes::Bytes;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::services::storage::ObjectStore;

/// One submitted asset.
#[derive(Debug, Clone)]
pub struct UploadTask {
    /// Position in the submitted batch; output URLs are ordered by it.
    pub index: usize,
    pub folder: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl UploadTask {
    pub fn new(
        index: usize,
        folder: impl Into<String>,
        file_name: impl Into<String>,
        data: Bytes,
    ) -> Self {
        Self {
            index,
            folder: folder.into(),
            file_name: file_name.into(),
            content_type: None,
            data,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A single asset that failed its store call.
#[derive(Debug, Error)]
#[error("asset #{index} failed to upload: {source}")]
pub struct UploadWorkerError {
    pub index: usize,
    #[source]
    pub source: anyhow::Error,
}

/// Aggregate failure of a batch. Always holds at least one worker error,
/// sorted by origin index.
#[derive(Debug, Error)]
#[error(
    "upload batch failed: {} of {} assets failed, first: {}",
    .failures.len(),
    .total,
    .failures[0]
)]
pub struct UploadBatchFailure {
    pub total: usize,
    failures: Vec<UploadWorkerError>,
}

impl UploadBatchFailure {
    fn new(total: usize, mut failures: Vec<UploadWorkerError>) -> Self {
        debug_assert!(!failures.is_empty());
        failures.sort_by_key(|f| f.index);
        Self { total, failures }
    }

    /// Lowest-index failure of the batch.
    pub fn first_failure(&self) -> &UploadWorkerError {
        &self.failures[0]
    }

    pub fn failures(&self) -> &[UploadWorkerError] {
        &self.failures
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.index).collect()
    }
}

pub type UploadBatchResult = Result<Vec<String>, UploadBatchFailure>;

pub struct UploadOrchestrator {
    store: Arc<dyn ObjectStore>,
    pool_size: usize,
    cleanup_orphans: bool,
}

impl UploadOrchestrator {
    pub fn new(store: Arc<dyn ObjectStore>, pool_size: usize) -> Self {
        Self {
            store,
            pool_size: pool_size.max(1),
            cleanup_orphans: true,
        }
    }

    /// Whether objects stored by the successful workers of a failed batch get deleted.
    pub fn with_orphan_cleanup(mut self, enabled: bool) -> Self {
        self.cleanup_orphans = enabled;
        self
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Uploads every task and returns the URLs in origin-index order.
    ///
    /// All workers run to completion before the outcome is decided; a single
    /// failed worker fails the whole batch and no URL is returned. The batch
    /// runs on its own task, so dropping this future does not stop fan-in or
    /// orphan cleanup.
    pub async fn submit_batch(&self, tasks: Vec<UploadTask>) -> UploadBatchResult {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let total = tasks.len();
        let indices: Vec<usize> = tasks.iter().map(|task| task.index).collect();
        let batch = BatchRun {
            store: Arc::clone(&self.store),
            pool_size: self.pool_size,
            cleanup_orphans: self.cleanup_orphans,
        };

        match tokio::spawn(batch.run(tasks)).await {
            Ok(result) => result,
            Err(e) => {
                warn!(batch_size = total, error = %e, "Upload batch task aborted");
                let failures = indices
                    .into_iter()
                    .map(|index| UploadWorkerError {
                        index,
                        source: anyhow!("upload batch aborted: {}", e),
                    })
                    .collect();
                Err(UploadBatchFailure::new(total, failures))
            }
        }
    }
}

/// Everything one batch needs, owned so it can outlive the caller.
struct BatchRun {
    store: Arc<dyn ObjectStore>,
    pool_size: usize,
    cleanup_orphans: bool,
}

impl BatchRun {
    async fn run(self, tasks: Vec<UploadTask>) -> UploadBatchResult {
        let total = tasks.len();
        let started = Instant::now();
        info!(
            batch_size = total,
            pool_size = self.pool_size,
            "📦 Dispatching upload batch"
        );

        // Per-batch pool bound, dropped with the batch
        let permits = Arc::new(Semaphore::new(self.pool_size));
        let mut handles = Vec::with_capacity(total);

        for task in tasks {
            let store = Arc::clone(&self.store);
            let permits = Arc::clone(&permits);
            let index = task.index;

            let handle = tokio::spawn(run_worker(store, permits, task));
            handles.push((index, handle));
        }

        let mut stored = Vec::with_capacity(total);
        let mut failures = Vec::new();

        for (index, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(anyhow!("upload worker aborted: {}", e)),
            };
            match outcome {
                Ok(url) => stored.push((index, url)),
                Err(source) => {
                    warn!(index, error = %source, "❌ Upload worker failed");
                    failures.push(UploadWorkerError { index, source });
                }
            }
        }

        if !failures.is_empty() {
            warn!(
                batch_size = total,
                failed = failures.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Upload batch failed"
            );
            if self.cleanup_orphans {
                self.remove_orphans(stored).await;
            }
            return Err(UploadBatchFailure::new(total, failures));
        }

        stored.sort_by_key(|(index, _)| *index);
        info!(
            batch_size = total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "✅ Upload batch stored"
        );
        Ok(stored.into_iter().map(|(_, url)| url).collect())
    }

    async fn remove_orphans(&self, stored: Vec<(usize, String)>) {
        if stored.is_empty() {
            return;
        }
        info!(count = stored.len(), "🧹 Removing objects of failed batch");

        let store = &self.store;
        futures::stream::iter(stored)
            .for_each_concurrent(self.pool_size, |(index, url)| async move {
                if let Err(e) = store.delete(&url).await {
                    warn!(index, url = %url, error = %e, "Failed to remove orphaned object");
                }
            })
            .await;
    }
}

/// One worker: wait for a pool slot, then perform exactly one store call.
async fn run_worker(
    store: Arc<dyn ObjectStore>,
    permits: Arc<Semaphore>,
    task: UploadTask,
) -> anyhow::Result<String> {
    let _permit = permits
        .acquire_owned()
        .await
        .map_err(|e| anyhow!("upload pool closed: {}", e))?;

    store
        .store(
            task.data,
            &task.folder,
            &task.file_name,
            task.content_type.as_deref(),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::InMemoryObjectStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Sleeps longer for earlier indices so completion order is reversed.
    struct ReversedLatencyStore {
        total: usize,
    }

    #[async_trait]
    impl ObjectStore for ReversedLatencyStore {
        async fn store(
            &self,
            _data: Bytes,
            folder: &str,
            file_name: &str,
            _content_type: Option<&str>,
        ) -> anyhow::Result<String> {
            let index: usize = file_name.parse()?;
            let delay = (self.total - index) as u64 * 15;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(format!("mem://{}/{}", folder, file_name))
        }

        async fn delete(&self, _url: &str) -> anyhow::Result<()> {
            Ok(())
        }

        fn backend(&self) -> &'static str {
            "test"
        }
    }

    /// Tracks call count and the peak number of overlapping store calls.
    #[derive(Default)]
    struct InstrumentedStore {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ObjectStore for InstrumentedStore {
        async fn store(
            &self,
            _data: Bytes,
            folder: &str,
            file_name: &str,
            _content_type: Option<&str>,
        ) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("mem://{}/{}", folder, file_name))
        }

        async fn delete(&self, _url: &str) -> anyhow::Result<()> {
            Ok(())
        }

        fn backend(&self) -> &'static str {
            "test"
        }
    }

    /// Delegates to an in-memory store, failing or panicking on chosen names.
    struct FlakyStore {
        inner: InMemoryObjectStore,
        fail_on: &'static str,
        panic_on: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl FlakyStore {
        fn new(fail_on: &'static str) -> Self {
            Self {
                inner: InMemoryObjectStore::new("mem://bucket"),
                fail_on,
                panic_on: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn store(
            &self,
            data: Bytes,
            folder: &str,
            file_name: &str,
            content_type: Option<&str>,
        ) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(file_name) == self.panic_on {
                panic!("store client crashed");
            }
            if file_name == self.fail_on {
                // Fail late so the other workers finish first
                tokio::time::sleep(Duration::from_millis(30)).await;
                anyhow::bail!("quota exceeded");
            }
            self.inner.store(data, folder, file_name, content_type).await
        }

        async fn delete(&self, url: &str) -> anyhow::Result<()> {
            self.inner.delete(url).await
        }

        fn backend(&self) -> &'static str {
            "test"
        }
    }

    fn batch(size: usize) -> Vec<UploadTask> {
        (0..size)
            .map(|i| UploadTask::new(i, "images", i.to_string(), Bytes::from(vec![i as u8; 8])))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_results_follow_origin_order() {
        let store = Arc::new(ReversedLatencyStore { total: 8 });
        let orchestrator = UploadOrchestrator::new(store, 8);

        let urls = orchestrator.submit_batch(batch(8)).await.unwrap();

        let expected: Vec<String> = (0..8).map(|i| format!("mem://images/{}", i)).collect();
        assert_eq!(urls, expected);
    }

    #[tokio::test]
    async fn test_empty_batch_dispatches_nothing() {
        let store = Arc::new(InstrumentedStore::default());
        let orchestrator = UploadOrchestrator::new(store.clone(), 5);

        let urls = orchestrator.submit_batch(Vec::new()).await.unwrap();

        assert!(urls.is_empty());
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_pool_bounds_concurrent_store_calls() {
        let store = Arc::new(InstrumentedStore::default());
        let orchestrator = UploadOrchestrator::new(store.clone(), 3);

        let urls = orchestrator.submit_batch(batch(12)).await.unwrap();

        assert_eq!(urls.len(), 12);
        assert_eq!(store.calls.load(Ordering::SeqCst), 12);
        let peak = store.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {} exceeded pool size", peak);
        assert!(peak >= 2, "workers never overlapped");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_failure_fails_whole_batch() {
        let store = Arc::new(FlakyStore::new("2"));
        let orchestrator = UploadOrchestrator::new(store.clone(), 5).with_orphan_cleanup(false);

        let err = orchestrator.submit_batch(batch(5)).await.unwrap_err();

        assert_eq!(err.total, 5);
        assert_eq!(err.failed_indices(), vec![2]);
        assert_eq!(err.first_failure().index, 2);
        assert!(err.to_string().starts_with("upload batch failed"));
        assert!(err.first_failure().source.to_string().contains("quota exceeded"));

        // Every worker ran to completion; nothing was cancelled
        assert_eq!(store.calls.load(Ordering::SeqCst), 5);
        assert_eq!(store.inner.len(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failed_batch_removes_orphans() {
        let store = Arc::new(FlakyStore::new("0"));
        let orchestrator = UploadOrchestrator::new(store.clone(), 2);

        let err = orchestrator.submit_batch(batch(4)).await.unwrap_err();

        assert_eq!(err.failed_indices(), vec![0]);
        assert!(store.inner.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dropped_caller_still_removes_orphans() {
        let store = Arc::new(FlakyStore::new("1"));
        let orchestrator = UploadOrchestrator::new(store.clone(), 3);

        // Caller gives up long before the failing worker reports back
        let outcome =
            tokio::time::timeout(Duration::from_millis(5), orchestrator.submit_batch(batch(3)))
                .await;
        assert!(outcome.is_err());

        // Failing worker reports after 30ms; give the batch time to clean up
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert!(store.inner.is_empty(), "{} objects left behind", store.inner.len());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_panicking_worker_is_reported_as_failure() {
        let mut flaky = FlakyStore::new("never");
        flaky.panic_on = Some("1");
        let store = Arc::new(flaky);
        let orchestrator = UploadOrchestrator::new(store.clone(), 4);

        let err = orchestrator.submit_batch(batch(3)).await.unwrap_err();

        assert_eq!(err.failed_indices(), vec![1]);
        assert!(err.first_failure().source.to_string().contains("aborted"));
        assert!(store.inner.is_empty());
    }

    #[test]
    fn test_failures_sorted_by_index() {
        let failure = UploadBatchFailure::new(
            6,
            vec![
                UploadWorkerError { index: 4, source: anyhow!("b") },
                UploadWorkerError { index: 1, source: anyhow!("a") },
            ],
        );
        assert_eq!(failure.failed_indices(), vec![1, 4]);
        assert_eq!(
            failure.to_string(),
            "upload batch failed: 2 of 6 assets failed, first: asset #1 failed to upload: a"
        );
    }
}
