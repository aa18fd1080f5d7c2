//! Artifact upload with bounded retries and delete-after-delivery.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::destination::Destination;
use crate::error::{DeliveryError, DeliveryResult};
use crate::retry::{retry_fixed, RetryOutcome, RetryPolicy};

/// Decode one percent-encoded path segment. Segments that are not valid
/// percent-encoding pass through unchanged.
fn decode_segment(segment: &str) -> String {
    match urlencoding::decode(segment) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => segment.to_string(),
    }
}

/// Destination key for a job artifact named `name` under the job's
/// declared output prefix.
///
/// The top-level prefix segment is decoded exactly once; deeper segments
/// travel exactly as declared.
pub fn artifact_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        return name.to_string();
    }
    let (top, rest) = match prefix.split_once('/') {
        Some((top, rest)) => (top, Some(rest)),
        None => (prefix, None),
    };
    let mut key = decode_segment(top);
    if let Some(rest) = rest {
        key.push('/');
        key.push_str(rest);
    }
    key.push('/');
    key.push_str(name);
    key
}

/// Destination key for a watched file, preserving its position under the
/// watch root. The top-level segment is decoded exactly once.
///
/// Returns `None` for paths outside the root or with non-UTF-8 segments.
pub fn watch_key(root: &Path, local: &Path) -> Option<String> {
    let relative = local.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => segments.push(part.to_str()?.to_string()),
            _ => return None,
        }
    }
    let first = segments.first()?;
    let decoded = decode_segment(first);
    segments[0] = decoded;
    Some(segments.join("/"))
}

/// Result of delivering a batch of artifacts.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Keys confirmed delivered.
    pub delivered: Vec<String>,
    /// Keys that exhausted their retry budget.
    pub failed: Vec<String>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Delivers artifacts to a destination, retrying each file under the
/// policy and deleting the local copy once delivery is confirmed.
pub struct UploadManager {
    destination: Arc<dyn Destination>,
    policy: RetryPolicy,
}

impl UploadManager {
    pub fn new(destination: Arc<dyn Destination>, policy: RetryPolicy) -> Self {
        Self {
            destination,
            policy,
        }
    }

    /// Deliver one file. The local copy is removed only after the
    /// destination confirms the write; on exhausted retries it stays on
    /// disk and an error is returned.
    pub async fn deliver(&self, local: &Path, key: &str) -> DeliveryResult<()> {
        let outcome = retry_fixed(&self.policy, "upload", || {
            self.destination.put(local, key)
        })
        .await;

        match outcome {
            RetryOutcome::Success { attempts, .. } => {
                if attempts > 1 {
                    info!(key = %key, attempts, "Upload recovered after retries");
                }
                if let Err(e) = tokio::fs::remove_file(local).await {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "Delivered but could not remove local copy"
                    );
                }
                Ok(())
            }
            RetryOutcome::Exhausted { error, attempts } => {
                Err(DeliveryError::exhausted(key, attempts, error.to_string()))
            }
        }
    }

    /// Deliver a batch one file at a time. A file exhausting its retries
    /// does not stop the rest of the batch; the report lists it as failed.
    pub async fn deliver_batch(&self, items: &[(PathBuf, String)]) -> BatchReport {
        let mut report = BatchReport::default();
        for (local, key) in items {
            match self.deliver(local, key).await {
                Ok(()) => report.delivered.push(key.clone()),
                Err(e) => {
                    warn!(key = %key, error = %e, "Artifact upload failed");
                    report.failed.push(key.clone());
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FlakyDestination {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyDestination {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Destination for FlakyDestination {
        async fn put(&self, _local: &Path, key: &str) -> DeliveryResult<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(DeliveryError::rejected(key, 503))
            } else {
                Ok(())
            }
        }
    }

    struct KeyedDestination {
        reject_suffix: &'static str,
    }

    #[async_trait]
    impl Destination for KeyedDestination {
        async fn put(&self, _local: &Path, key: &str) -> DeliveryResult<()> {
            if key.ends_with(self.reject_suffix) {
                Err(DeliveryError::rejected(key, 500))
            } else {
                Ok(())
            }
        }
    }

    fn artifact(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"bytes").unwrap();
        path
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy::new(10, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_delivery_removes_local_copy() {
        let dir = tempfile::tempdir().unwrap();
        let local = artifact(&dir, "v.00000.ts");

        let destination = Arc::new(FlakyDestination::new(0));
        let manager = UploadManager::new(destination, quick_policy());
        manager.deliver(&local, "enc/1/v.00000.ts").await.unwrap();

        assert!(!local.exists());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let local = artifact(&dir, "v.00000.ts");

        let destination = Arc::new(FlakyDestination::new(2));
        let manager = UploadManager::new(destination.clone(), quick_policy());
        manager.deliver(&local, "v.00000.ts").await.unwrap();

        assert_eq!(destination.calls.load(Ordering::SeqCst), 3);
        assert!(!local.exists());
    }

    #[tokio::test]
    async fn test_exhaustion_keeps_local_copy() {
        let dir = tempfile::tempdir().unwrap();
        let local = artifact(&dir, "v.00000.ts");

        let destination = Arc::new(FlakyDestination::new(u32::MAX));
        let manager = UploadManager::new(destination.clone(), quick_policy());
        let err = manager.deliver(&local, "v.00000.ts").await.unwrap_err();

        assert!(matches!(err, DeliveryError::Exhausted { attempts: 10, .. }));
        assert_eq!(destination.calls.load(Ordering::SeqCst), 10);
        assert!(local.exists());
    }

    #[tokio::test]
    async fn test_batch_continues_past_failures() {
        let dir = tempfile::tempdir().unwrap();
        let a = artifact(&dir, "v.00000.ts");
        let b = artifact(&dir, "v.00001.ts");
        let c = artifact(&dir, "v.m3u8");

        let destination = Arc::new(KeyedDestination {
            reject_suffix: "v.00001.ts",
        });
        let manager = UploadManager::new(destination, RetryPolicy::new(2, Duration::from_millis(1)));
        let items = vec![
            (a.clone(), "enc/1/v.00000.ts".to_string()),
            (b.clone(), "enc/1/v.00001.ts".to_string()),
            (c.clone(), "enc/1/v.m3u8".to_string()),
        ];
        let report = manager.deliver_batch(&items).await;

        assert!(!report.is_success());
        assert_eq!(report.delivered, vec!["enc/1/v.00000.ts", "enc/1/v.m3u8"]);
        assert_eq!(report.failed, vec!["enc/1/v.00001.ts"]);
        assert!(!a.exists());
        assert!(b.exists());
        assert!(!c.exists());
    }

    #[test]
    fn test_artifact_key_decodes_top_segment_once() {
        assert_eq!(artifact_key("enc%2F42", "v.ts"), "enc/42/v.ts");
        // Double-encoded input is decoded exactly one level.
        assert_eq!(artifact_key("a%2520b", "v.ts"), "a%20b/v.ts");
    }

    #[test]
    fn test_artifact_key_leaves_deep_segments_alone() {
        assert_eq!(
            artifact_key("top/deep%2Fpart", "v.ts"),
            "top/deep%2Fpart/v.ts"
        );
    }

    #[test]
    fn test_artifact_key_without_prefix() {
        assert_eq!(artifact_key("", "v.m3u8"), "v.m3u8");
    }

    #[test]
    fn test_watch_key_preserves_position_under_root() {
        let root = Path::new("/watch");
        assert_eq!(
            watch_key(root, Path::new("/watch/enc%2F7/v.ts")).as_deref(),
            Some("enc/7/v.ts")
        );
        assert_eq!(
            watch_key(root, Path::new("/watch/top/deep/v.ts")).as_deref(),
            Some("top/deep/v.ts")
        );
    }

    #[test]
    fn test_watch_key_outside_root_is_none() {
        let root = Path::new("/watch");
        assert_eq!(watch_key(root, Path::new("/elsewhere/v.ts")), None);
    }
}
