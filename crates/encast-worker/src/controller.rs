//! Job admission and the run lifecycle.
//!
//! One job at a time: admission reserves the single slot, a background
//! task supervises the encoder, and artifacts are delivered only after a
//! clean exit. Stop requests terminate the process without escalating to
//! the error state.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use encast_delivery::{artifact_key, UploadManager};
use encast_media::{
    probe, pump_lines, segment_pattern_for, spawn, EncoderCommand, IoMode, ProcessEnv,
    ProgressSink, ProgressTracker, StopHandle, EMIT_INTERVAL,
};
use encast_models::{EncodeJob, ProgressSample, RunStatus, WorkerMessage};

use crate::config::{ProgressMode, WorkerConfig};
use crate::error::{WorkerError, WorkerResult};

struct ActiveJob {
    asset: String,
    stop: StopHandle,
}

struct ControllerState {
    status: RunStatus,
    current: Option<ActiveJob>,
}

/// Owns the single job slot and drives runs from admission to delivery.
pub struct JobController {
    state: Mutex<ControllerState>,
    config: Arc<WorkerConfig>,
    events: mpsc::UnboundedSender<WorkerMessage>,
    uploader: Arc<UploadManager>,
    tracker: Arc<AsyncMutex<ProgressTracker>>,
    samples: mpsc::UnboundedSender<ProgressSample>,
    delivering: watch::Sender<bool>,
}

impl JobController {
    pub fn new(
        config: Arc<WorkerConfig>,
        events: mpsc::UnboundedSender<WorkerMessage>,
        uploader: Arc<UploadManager>,
        tracker: Arc<AsyncMutex<ProgressTracker>>,
        samples: mpsc::UnboundedSender<ProgressSample>,
    ) -> Self {
        let (delivering, _) = watch::channel(false);
        Self {
            state: Mutex::new(ControllerState {
                status: RunStatus::Idle,
                current: None,
            }),
            config,
            events,
            uploader,
            tracker,
            samples,
            delivering,
        }
    }

    /// Current run state.
    pub fn status(&self) -> RunStatus {
        self.state.lock().unwrap().status
    }

    /// Admit a job. Returns the rejection reason when the slot is taken.
    ///
    /// The check and the reservation happen under one lock, so two
    /// admissions can never both see an empty slot. The run itself
    /// continues on a background task.
    pub fn admit(self: &Arc<Self>, job: EncodeJob) -> Result<(), String> {
        let stop = StopHandle::new();
        {
            let mut state = self.state.lock().unwrap();
            if state.current.is_some() {
                return Err("Already running a job".to_string());
            }
            state.current = Some(ActiveJob {
                asset: job.asset.clone(),
                stop: stop.clone(),
            });
            state.status = RunStatus::Running;
        }

        info!(asset = %job.asset, playlist = %job.playlist, "Job admitted");
        self.emit(WorkerMessage::state(RunStatus::Running));
        self.emit(WorkerMessage::currently_processing(&job));

        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.run_job(job, stop).await });
        Ok(())
    }

    /// Signal the active encoder process to terminate. Safe to call at
    /// any time; a no-op when nothing is running.
    pub fn request_stop(&self) {
        let state = self.state.lock().unwrap();
        match state.current {
            Some(ref active) => {
                info!(asset = %active.asset, "Stop requested");
                active.stop.stop();
            }
            None => debug!("Stop requested with no active job"),
        }
    }

    /// Wait until no upload batch is in flight. Used by graceful
    /// shutdown so a half-delivered job is never abandoned.
    pub async fn wait_for_delivery(&self) {
        let mut rx = self.delivering.subscribe();
        while *rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn emit(&self, message: WorkerMessage) {
        if self.events.send(message).is_err() {
            debug!("Control channel closed, dropping notification");
        }
    }

    fn set_status(&self, status: RunStatus) {
        self.state.lock().unwrap().status = status;
        self.emit(WorkerMessage::state(status));
    }

    fn clear_current(&self) {
        self.state.lock().unwrap().current = None;
    }

    /// Terminal handling for a run that produced no deliverable output.
    /// A requested stop lands in `Idle`; anything else escalates.
    fn fail_run(&self, stop: &StopHandle, message: String) {
        if stop.is_stopped() {
            info!("Encoder stopped on request");
            self.set_status(RunStatus::Idle);
        } else {
            warn!("{}", message);
            self.emit(WorkerMessage::error(message));
            self.set_status(RunStatus::Error);
        }
        self.clear_current();
    }

    async fn run_job(self: Arc<Self>, job: EncodeJob, stop: StopHandle) {
        let run = Uuid::new_v4();
        info!(run = %run, asset = %job.asset, "Starting encoder run");

        // Each run reports progress against its own first sample.
        self.tracker.lock().await.reset();

        let scratch = self.config.segments_dir().join(job.playlist_name());
        if let Err(e) = tokio::fs::create_dir_all(&scratch).await {
            self.fail_run(&stop, format!("unable to create scratch directory: {e}"));
            return;
        }

        let output = scratch.join(job.playlist_name());
        let pattern = scratch.join(segment_pattern_for(job.playlist_name()));
        let (sink, mode) = match self.config.progress_mode {
            ProgressMode::File => (
                ProgressSink::File(self.config.progress_file()),
                IoMode::Inherit,
            ),
            ProgressMode::Pipe => (ProgressSink::Stdout, IoMode::Piped),
        };
        let args = EncoderCommand::new(&output)
            .raw_args(job.args.iter().cloned())
            .progress(sink)
            .segment_pattern(pattern.to_string_lossy())
            .build_args();

        let mut env = ProcessEnv::from_current();
        if let Some(ref library_path) = self.config.encoder_library_path {
            env.library_path = Some(library_path.clone());
        }

        let mut process = match spawn(
            Path::new(&self.config.encoder_path),
            &args,
            mode,
            &env,
            &stop,
        ) {
            Ok(process) => process,
            Err(e) => {
                self.fail_run(&stop, format!("encoder failed to start: {e}"));
                let _ = tokio::fs::remove_dir_all(&scratch).await;
                return;
            }
        };

        let mut pumps = Vec::new();
        if let Some(stdout) = process.take_stdout() {
            let tracker = Arc::clone(&self.tracker);
            let samples = self.samples.clone();
            pumps.push(tokio::spawn(pump_lines(
                stdout,
                tracker,
                samples,
                EMIT_INTERVAL,
            )));
        }
        if let Some(mut stderr) = process.take_stderr() {
            let events = self.events.clone();
            pumps.push(tokio::spawn(async move {
                while let Some(line) = stderr.recv().await {
                    if events.send(WorkerMessage::output(line)).is_err() {
                        break;
                    }
                }
            }));
        }

        let outcome = match process.wait().await {
            Ok(outcome) => outcome,
            Err(e) => {
                for pump in pumps {
                    let _ = pump.await;
                }
                self.fail_run(&stop, format!("encoder supervision failed: {e}"));
                let _ = tokio::fs::remove_dir_all(&scratch).await;
                return;
            }
        };
        // Let the relays drain so forwarded output lands before the verdict.
        for pump in pumps {
            let _ = pump.await;
        }

        if !outcome.success() {
            let message = match outcome.stderr {
                Some(ref stderr) if !stderr.trim().is_empty() => {
                    format!("encoder exited with {}: {}", outcome.exit, stderr.trim())
                }
                _ => format!("encoder exited with {}", outcome.exit),
            };
            self.fail_run(&stop, message);
            let _ = tokio::fs::remove_dir_all(&scratch).await;
            return;
        }

        info!(run = %run, "Encoder finished");
        self.set_status(RunStatus::Idle);

        match self.deliver_artifacts(run, &job, &scratch).await {
            Ok(count) => {
                info!(run = %run, artifacts = count, "Job complete");
            }
            Err(e) => {
                warn!(run = %run, error = %e, "Job artifacts not fully delivered");
                self.emit(WorkerMessage::error(e.to_string()));
            }
        }
        self.clear_current();
    }

    /// Enumerate and upload everything the run produced. On full success
    /// the completion event is emitted and the scratch directory removed;
    /// a partial batch leaves the undelivered files on disk.
    async fn deliver_artifacts(
        &self,
        run: Uuid,
        job: &EncodeJob,
        scratch: &Path,
    ) -> WorkerResult<usize> {
        // The key file must exist before enumeration so it ships with the
        // batch.
        if let Some(ref key) = job.encryption_key {
            let bytes = hex::decode(key)?;
            tokio::fs::write(scratch.join("file.key"), bytes).await?;
        }

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(scratch).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();

        // Probe before delivery; delivered files are deleted locally.
        let manifest = scratch.join(job.playlist_name());
        let introspection = match probe(Path::new(&self.config.probe_path), &manifest).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(run = %run, error = %e, "Probe failed, completing without introspection");
                None
            }
        };

        let prefix = job.destination_prefix();
        let items: Vec<(PathBuf, String)> = names
            .iter()
            .map(|name| (scratch.join(name), artifact_key(prefix, name)))
            .collect();

        self.delivering.send_replace(true);
        let report = self.uploader.deliver_batch(&items).await;
        self.delivering.send_replace(false);

        if !report.is_success() {
            return Err(WorkerError::upload_failed(format!(
                "{} of {} artifacts undelivered: {}",
                report.failed.len(),
                items.len(),
                report.failed.join(", ")
            )));
        }

        let count = names.len();
        self.emit(WorkerMessage::done(job, names, introspection));
        let _ = tokio::fs::remove_dir_all(scratch).await;
        Ok(count)
    }
}
