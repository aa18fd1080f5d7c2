//! Follow-tail of the progress side file.
//!
//! In file-tail deployments the encoder appends its progress stream to a
//! side file under the work directory. The tail follows that file across
//! runs and feeds the same pump as piped mode.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::MediaResult;

/// Poll interval while the file has no new data.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Create the progress file empty if it does not exist yet.
///
/// The tail needs it present before the first run so it can start
/// following from the end.
pub async fn ensure_progress_file(path: &Path) -> MediaResult<()> {
    if tokio::fs::try_exists(path).await? {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, b"").await?;
    Ok(())
}

/// Follow `path`, emitting every complete appended line.
///
/// Existing content is skipped and partial lines are held back until
/// their newline arrives. Returns the line stream and the task handle;
/// abort the handle to stop tailing.
pub fn tail_lines(path: PathBuf) -> (mpsc::Receiver<String>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(64);
    let handle = tokio::spawn(async move {
        if let Err(e) = follow(&path, tx).await {
            warn!(path = %path.display(), "Progress tail stopped: {}", e);
        }
    });
    (rx, handle)
}

async fn follow(path: &Path, tx: mpsc::Sender<String>) -> MediaResult<()> {
    let file = File::open(path).await?;
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::End(0)).await?;

    let mut buf = String::new();
    loop {
        let read = reader.read_line(&mut buf).await?;
        if read == 0 {
            // The encoder reopens the file for each run, truncating it.
            // A shrink means our position is stale; restart from the top.
            let len = tokio::fs::metadata(path).await?.len();
            if len < reader.stream_position().await? {
                reader.seek(SeekFrom::Start(0)).await?;
                buf.clear();
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }
        if buf.ends_with('\n') {
            let line = buf.trim_end().to_string();
            buf.clear();
            if tx.send(line).await.is_err() {
                break;
            }
        }
    }
    Ok(())
}
