//! Encast worker binary.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use encast_delivery::{
    Destination, FilesystemDestination, HttpDestination, LocalFilesystem, RetryPolicy,
    UploadManager, WatchQueue,
};
use encast_media::{
    check_encoder, check_probe, ensure_progress_file, pump_lines, tail_lines, ProgressTracker,
    EMIT_INTERVAL,
};
use encast_models::{ProgressSample, WorkerMessage};
use encast_worker::{logging, ControlChannel, JobController, ProgressMode, WorkerConfig, WorkerResult};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    logging::init();

    info!("Starting encast-worker");

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        error!("Worker error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

async fn run(config: WorkerConfig) -> WorkerResult<()> {
    let config = Arc::new(config);

    // Fail fast when the media tools are missing.
    let encoder = check_encoder(&config.encoder_path)?;
    let probe_tool = check_probe(&config.probe_path)?;
    info!(
        encoder = %encoder.display(),
        probe = %probe_tool.display(),
        "Media tools resolved"
    );

    let destination: Arc<dyn Destination> = match config.destination_dir {
        Some(ref dir) => {
            info!(dir = %dir.display(), "Delivering artifacts to the local filesystem");
            Arc::new(FilesystemDestination::new(LocalFilesystem::new(dir)))
        }
        None => {
            let base = config.upload_base();
            info!(base = %base, "Delivering artifacts over HTTP");
            let mut http = HttpDestination::new(base);
            if let Some((user, password)) = config.upload_auth() {
                http = http.with_basic_auth(user, password);
            }
            Arc::new(http)
        }
    };
    let uploader = Arc::new(UploadManager::new(
        destination,
        RetryPolicy::new(config.upload_attempts, config.upload_pause),
    ));

    tokio::fs::create_dir_all(config.tmp_dir()).await?;

    let tracker = Arc::new(tokio::sync::Mutex::new(ProgressTracker::new()));
    let (samples_tx, samples_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let forwarder = forward_progress(samples_rx, events_tx.clone());

    // In file mode the progress file is created up front and tailed for
    // the whole worker lifetime. It must exist before the watcher below
    // starts, so its creation is never queued as an artifact.
    let mut tail = None;
    if config.progress_mode == ProgressMode::File {
        let progress_file = config.progress_file();
        ensure_progress_file(&progress_file).await?;
        let (lines, handle) = tail_lines(progress_file);
        tokio::spawn(pump_lines(
            lines,
            Arc::clone(&tracker),
            samples_tx.clone(),
            EMIT_INTERVAL,
        ));
        tail = Some(handle);
    }

    let mut watch = None;
    if config.watch_uploads {
        info!(root = %config.tmp_dir().display(), "Watching for files to upload");
        let queue = WatchQueue::new(config.tmp_dir(), config.watch_settle, Arc::clone(&uploader));
        watch = Some(queue.start()?);
    }

    let controller = Arc::new(JobController::new(
        Arc::clone(&config),
        events_tx.clone(),
        Arc::clone(&uploader),
        Arc::clone(&tracker),
        samples_tx.clone(),
    ));

    let channel = ControlChannel::new(Arc::clone(&config), Arc::clone(&controller), events_rx);
    let result = tokio::select! {
        result = channel.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            controller.request_stop();
            Ok(())
        }
    };

    if let Some(handle) = watch {
        handle.shutdown();
    }
    if let Some(handle) = tail {
        handle.abort();
    }
    forwarder.abort();
    result
}

fn forward_progress(
    mut samples: mpsc::UnboundedReceiver<ProgressSample>,
    events: mpsc::UnboundedSender<WorkerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(sample) = samples.recv().await {
            if events.send(WorkerMessage::progress(sample)).is_err() {
                break;
            }
        }
    })
}
