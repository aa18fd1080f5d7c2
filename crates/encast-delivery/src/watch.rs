//! Watch-driven uploads.
//!
//! Watches a directory tree for new files, waits for each file to stop
//! receiving writes, then uploads settled files one at a time in the
//! order they settled. Runs independently of job admission.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{DeliveryError, DeliveryResult};
use crate::uploader::{watch_key, UploadManager};

/// How often pending files are checked for quiescence.
const CHECK_INTERVAL: Duration = Duration::from_millis(500);

enum WatchEvent {
    Created(PathBuf),
    Modified(PathBuf),
}

/// Tracks created files until their writes quiesce.
///
/// Only paths first seen as created are tracked; modifications to other
/// paths are ignored, so files that predate the watcher are never queued
/// no matter how often they are written to.
pub struct SettleTracker {
    pending: HashMap<PathBuf, Instant>,
    settle: Duration,
}

impl SettleTracker {
    pub fn new(settle: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            settle,
        }
    }

    /// Start tracking a newly created path.
    pub fn created(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now);
    }

    /// Refresh the write timer of a tracked path.
    pub fn modified(&mut self, path: &Path, now: Instant) {
        if let Some(last) = self.pending.get_mut(path) {
            *last = now;
        }
    }

    /// Remove and return paths whose last write is at least the settle
    /// interval ago, oldest write first.
    pub fn drain_settled(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut settled: Vec<(PathBuf, Instant)> = self
            .pending
            .iter()
            .filter(|(_, last)| now.duration_since(**last) >= self.settle)
            .map(|(path, last)| (path.clone(), *last))
            .collect();
        settled.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        for (path, _) in &settled {
            self.pending.remove(path);
        }
        settled.into_iter().map(|(path, _)| path).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Uploads files that appear under a watched root.
///
/// Settled files enter a FIFO queue drained by a single worker, so no
/// two watched uploads ever run concurrently.
pub struct WatchQueue {
    root: PathBuf,
    settle: Duration,
    uploader: Arc<UploadManager>,
}

/// Running watch queue tasks.
pub struct WatchQueueHandle {
    producer: JoinHandle<()>,
    drain: JoinHandle<()>,
}

impl WatchQueueHandle {
    /// Stop watching and draining. Queued files not yet uploaded stay on
    /// disk and are picked up again on the next start.
    pub fn shutdown(self) {
        self.producer.abort();
        self.drain.abort();
    }
}

impl WatchQueue {
    pub fn new(root: impl Into<PathBuf>, settle: Duration, uploader: Arc<UploadManager>) -> Self {
        Self {
            root: root.into(),
            settle,
            uploader,
        }
    }

    /// Start watching. Events flow from the notify thread into the
    /// producer task, which queues settled files for the drain task.
    pub fn start(self) -> DeliveryResult<WatchQueueHandle> {
        let (event_tx, mut event_rx) = mpsc::channel::<WatchEvent>(256);
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<PathBuf>();

        let mut watcher = build_watcher(event_tx)?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| DeliveryError::watch(e.to_string()))?;
        info!(root = %self.root.display(), "Watching for artifacts");

        let settle = self.settle;
        let producer = tokio::spawn(async move {
            // The watcher must stay alive for events to keep flowing.
            let _watcher = watcher;
            let mut tracker = SettleTracker::new(settle);
            let mut tick = tokio::time::interval(CHECK_INTERVAL);
            loop {
                tokio::select! {
                    event = event_rx.recv() => match event {
                        Some(WatchEvent::Created(path)) => tracker.created(path, Instant::now()),
                        Some(WatchEvent::Modified(path)) => tracker.modified(&path, Instant::now()),
                        None => break,
                    },
                    _ = tick.tick() => {
                        for path in tracker.drain_settled(Instant::now()) {
                            if !path.is_file() {
                                continue;
                            }
                            if queue_tx.send(path).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        let root = self.root;
        let uploader = self.uploader;
        let drain = tokio::spawn(async move {
            while let Some(path) = queue_rx.recv().await {
                if !path.exists() {
                    debug!(path = %path.display(), "Watched file vanished before upload");
                    continue;
                }
                let Some(key) = watch_key(&root, &path) else {
                    warn!(path = %path.display(), "Watched file has no destination key");
                    continue;
                };
                if let Err(e) = uploader.deliver(&path, &key).await {
                    warn!(path = %path.display(), error = %e, "Unable to upload watched file");
                }
            }
        });

        Ok(WatchQueueHandle { producer, drain })
    }
}

fn build_watcher(tx: mpsc::Sender<WatchEvent>) -> DeliveryResult<RecommendedWatcher> {
    RecommendedWatcher::new(
        move |result: Result<Event, notify::Error>| {
            if let Ok(event) = result {
                if event.kind.is_create() {
                    for path in event.paths {
                        let _ = tx.blocking_send(WatchEvent::Created(path));
                    }
                } else if event.kind.is_modify() {
                    for path in event.paths {
                        let _ = tx.blocking_send(WatchEvent::Modified(path));
                    }
                }
            }
        },
        Config::default(),
    )
    .map_err(|e| DeliveryError::watch(e.to_string()))
}
