//! End-to-end tests for the job controller.
//!
//! Each test drives a [`JobController`] against a fake encoder script and
//! an in-memory destination, then asserts the event stream the controller
//! emits toward the control channel.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use encast_delivery::{Destination, DeliveryError, DeliveryResult, RetryPolicy, UploadManager};
use encast_media::ProgressTracker;
use encast_models::{EncodeJob, ProgressSample, RunStatus, WorkerMessage};
use encast_worker::{JobController, ProgressMode, WorkerConfig};

/// Destination double recording every delivered key with the file bytes
/// as they were at delivery time.
struct RecordingDestination {
    records: Mutex<Vec<(String, Vec<u8>)>>,
    reject_suffix: Option<String>,
}

impl RecordingDestination {
    fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            reject_suffix: None,
        }
    }

    fn rejecting(suffix: &str) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            reject_suffix: Some(suffix.to_string()),
        }
    }

    fn keys(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn bytes_for(&self, key: &str) -> Option<Vec<u8>> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, bytes)| bytes.clone())
    }
}

#[async_trait]
impl Destination for RecordingDestination {
    async fn put(&self, local: &Path, key: &str) -> DeliveryResult<()> {
        if let Some(ref suffix) = self.reject_suffix {
            if key.ends_with(suffix.as_str()) {
                return Err(DeliveryError::rejected(key, 500));
            }
        }
        let bytes = tokio::fs::read(local).await?;
        self.records.lock().unwrap().push((key.to_string(), bytes));
        Ok(())
    }
}

fn script(dir: &Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path.to_string_lossy().to_string()
}

/// Fake encoder that produces a manifest and two segments next to it.
const PRODUCING_ENCODER: &str = r#"for last; do :; done
dir=$(dirname "$last")
printf 'segment-zero' > "$dir/v.00000.ts"
printf 'segment-one' > "$dir/v.00001.ts"
printf '#EXTM3U\n' > "$last""#;

const PROBE: &str = r#"echo '{"format":{"duration":"2.000000"}}'"#;

struct Harness {
    controller: Arc<JobController>,
    events: mpsc::UnboundedReceiver<WorkerMessage>,
    config: Arc<WorkerConfig>,
    _samples: mpsc::UnboundedReceiver<ProgressSample>,
    _work: tempfile::TempDir,
}

fn harness(destination: Arc<dyn Destination>, encoder_body: &str) -> Harness {
    let work = tempfile::tempdir().unwrap();
    let encoder = script(work.path(), "encoder.sh", encoder_body);
    let probe = script(work.path(), "probe.sh", PROBE);

    let config = Arc::new(WorkerConfig {
        controller_url: url::Url::parse("http://localhost/").unwrap(),
        encoder_path: encoder,
        probe_path: probe,
        encoder_library_path: None,
        work_dir: work.path().to_path_buf(),
        progress_mode: ProgressMode::Pipe,
        upload_attempts: 2,
        upload_pause: Duration::from_millis(1),
        destination_dir: None,
        watch_uploads: false,
        watch_settle: Duration::from_millis(100),
        priority: 0,
    });

    let uploader = Arc::new(UploadManager::new(
        destination,
        RetryPolicy::new(config.upload_attempts, config.upload_pause),
    ));
    let tracker = Arc::new(tokio::sync::Mutex::new(ProgressTracker::new()));
    let (samples_tx, samples_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let controller = Arc::new(JobController::new(
        Arc::clone(&config),
        events_tx,
        uploader,
        tracker,
        samples_tx,
    ));

    Harness {
        controller,
        events: events_rx,
        config,
        _samples: samples_rx,
        _work: work,
    }
}

fn job(playlist: &str) -> EncodeJob {
    EncodeJob {
        asset: "asset-7".to_string(),
        sources: vec!["/data/source.mkv".to_string()],
        args: vec![],
        playlist: playlist.to_string(),
        encryption_key: None,
        width: Some(1920),
        bitrate: Some("4000k".to_string()),
        codec: Some("h264".to_string()),
        parameters: None,
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<WorkerMessage>) -> WorkerMessage {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for a worker event")
        .expect("event channel closed")
}

async fn expect_state(events: &mut mpsc::UnboundedReceiver<WorkerMessage>, expected: RunStatus) {
    match next_event(events).await {
        WorkerMessage::State { state } => assert_eq!(state, expected),
        other => panic!("expected state {expected:?}, got {other:?}"),
    }
}

async fn expect_currently_processing(events: &mut mpsc::UnboundedReceiver<WorkerMessage>) {
    match next_event(events).await {
        WorkerMessage::CurrentlyProcessing { asset, .. } => assert_eq!(asset, "asset-7"),
        other => panic!("expected currently-processing, got {other:?}"),
    }
}

#[tokio::test]
async fn test_successful_run_delivers_artifacts_and_reports_done() {
    let destination = Arc::new(RecordingDestination::new());
    let mut h = harness(destination.clone(), PRODUCING_ENCODER);

    h.controller.admit(job("enc%2F7/v.m3u8")).unwrap();

    expect_state(&mut h.events, RunStatus::Running).await;
    expect_currently_processing(&mut h.events).await;
    expect_state(&mut h.events, RunStatus::Idle).await;
    match next_event(&mut h.events).await {
        WorkerMessage::Done {
            filename,
            asset,
            filenames,
            probe,
            ..
        } => {
            assert_eq!(filename, "enc%2F7/v.m3u8");
            assert_eq!(asset, "asset-7");
            assert_eq!(filenames, vec!["v.00000.ts", "v.00001.ts", "v.m3u8"]);
            assert!(probe.is_some());
        }
        other => panic!("expected done, got {other:?}"),
    }

    // Keys carry the decoded destination prefix, batch in name order.
    assert_eq!(
        destination.keys(),
        vec!["enc/7/v.00000.ts", "enc/7/v.00001.ts", "enc/7/v.m3u8"]
    );
    assert_eq!(
        destination.bytes_for("enc/7/v.00000.ts"),
        Some(b"segment-zero".to_vec())
    );

    // Scratch is gone once everything was delivered.
    let scratch = h.config.segments_dir().join("v.m3u8");
    assert!(!scratch.exists());
    assert_eq!(h.controller.status(), RunStatus::Idle);
}

#[tokio::test]
async fn test_encryption_key_ships_with_the_batch() {
    let destination = Arc::new(RecordingDestination::new());
    let mut h = harness(destination.clone(), PRODUCING_ENCODER);

    let mut encrypted = job("enc%2F7/v.m3u8");
    encrypted.encryption_key = Some("00112233".to_string());
    h.controller.admit(encrypted).unwrap();

    expect_state(&mut h.events, RunStatus::Running).await;
    expect_currently_processing(&mut h.events).await;
    expect_state(&mut h.events, RunStatus::Idle).await;
    match next_event(&mut h.events).await {
        WorkerMessage::Done { filenames, .. } => {
            assert_eq!(
                filenames,
                vec!["file.key", "v.00000.ts", "v.00001.ts", "v.m3u8"]
            );
        }
        other => panic!("expected done, got {other:?}"),
    }

    assert_eq!(
        destination.bytes_for("enc/7/file.key"),
        Some(vec![0x00, 0x11, 0x22, 0x33])
    );
}

#[tokio::test]
async fn test_invalid_encryption_key_reports_an_error() {
    let destination = Arc::new(RecordingDestination::new());
    let mut h = harness(destination.clone(), PRODUCING_ENCODER);

    let mut broken = job("enc%2F7/v.m3u8");
    broken.encryption_key = Some("not-hex".to_string());
    h.controller.admit(broken).unwrap();

    expect_state(&mut h.events, RunStatus::Running).await;
    expect_currently_processing(&mut h.events).await;
    expect_state(&mut h.events, RunStatus::Idle).await;
    match next_event(&mut h.events).await {
        WorkerMessage::Error { .. } => {}
        other => panic!("expected an error event, got {other:?}"),
    }

    // Nothing left the machine.
    assert!(destination.keys().is_empty());
    assert_eq!(h.controller.status(), RunStatus::Idle);
}

#[tokio::test]
async fn test_encoder_failure_reports_error_state() {
    let destination = Arc::new(RecordingDestination::new());
    let mut h = harness(
        destination.clone(),
        "echo \"boom\" >&2\nexit 3",
    );

    h.controller.admit(job("enc%2F7/v.m3u8")).unwrap();

    expect_state(&mut h.events, RunStatus::Running).await;
    expect_currently_processing(&mut h.events).await;
    match next_event(&mut h.events).await {
        WorkerMessage::Output { line } => assert_eq!(line, "boom"),
        other => panic!("expected forwarded encoder output, got {other:?}"),
    }
    match next_event(&mut h.events).await {
        WorkerMessage::Error { message, .. } => {
            assert!(message.contains("code 3"), "message: {message}");
            assert!(message.contains("boom"), "message: {message}");
        }
        other => panic!("expected an error event, got {other:?}"),
    }
    expect_state(&mut h.events, RunStatus::Error).await;

    assert!(destination.keys().is_empty());
    assert_eq!(h.controller.status(), RunStatus::Error);
    let scratch = h.config.segments_dir().join("v.m3u8");
    assert!(!scratch.exists());

    // The slot was released; the error state does not block new work.
    h.controller.admit(job("enc%2F8/v.m3u8")).unwrap();
    expect_state(&mut h.events, RunStatus::Running).await;
}

#[tokio::test]
async fn test_second_admission_rejected_while_running() {
    let destination = Arc::new(RecordingDestination::new());
    let mut h = harness(destination.clone(), "sleep 5");

    h.controller.admit(job("enc%2F7/v.m3u8")).unwrap();
    expect_state(&mut h.events, RunStatus::Running).await;
    expect_currently_processing(&mut h.events).await;

    let verdict = h.controller.admit(job("enc%2F8/v.m3u8"));
    assert_eq!(verdict, Err("Already running a job".to_string()));

    // A requested stop lands in idle without an error event.
    let started = std::time::Instant::now();
    h.controller.request_stop();
    expect_state(&mut h.events, RunStatus::Idle).await;
    assert!(started.elapsed() < Duration::from_secs(4));

    assert!(destination.keys().is_empty());
    assert_eq!(h.controller.status(), RunStatus::Idle);

    // The slot is free again.
    h.controller.admit(job("enc%2F9/v.m3u8")).unwrap();
    expect_state(&mut h.events, RunStatus::Running).await;
}

#[tokio::test]
async fn test_partial_delivery_failure_keeps_undelivered_files() {
    let destination = Arc::new(RecordingDestination::rejecting("v.00001.ts"));
    let mut h = harness(destination.clone(), PRODUCING_ENCODER);

    h.controller.admit(job("enc%2F7/v.m3u8")).unwrap();

    expect_state(&mut h.events, RunStatus::Running).await;
    expect_currently_processing(&mut h.events).await;
    expect_state(&mut h.events, RunStatus::Idle).await;
    match next_event(&mut h.events).await {
        WorkerMessage::Error { message, .. } => {
            assert!(message.contains("1 of 3 artifacts undelivered"), "message: {message}");
            assert!(message.contains("enc/7/v.00001.ts"), "message: {message}");
        }
        other => panic!("expected an error event, got {other:?}"),
    }

    assert_eq!(destination.keys(), vec!["enc/7/v.00000.ts", "enc/7/v.m3u8"]);

    // Delivered files are gone, the failed one stays for inspection.
    let scratch = h.config.segments_dir().join("v.m3u8");
    assert!(!scratch.join("v.00000.ts").exists());
    assert!(scratch.join("v.00001.ts").exists());
    assert_eq!(h.controller.status(), RunStatus::Idle);
}

#[tokio::test]
async fn test_stop_without_a_job_is_harmless() {
    let destination = Arc::new(RecordingDestination::new());
    let mut h = harness(destination, PRODUCING_ENCODER);

    h.controller.request_stop();
    assert_eq!(h.controller.status(), RunStatus::Idle);
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn test_wait_for_delivery_returns_when_nothing_is_in_flight() {
    let destination = Arc::new(RecordingDestination::new());
    let h = harness(destination, PRODUCING_ENCODER);

    tokio::time::timeout(Duration::from_secs(1), h.controller.wait_for_delivery())
        .await
        .expect("wait_for_delivery should not block while idle");
}
