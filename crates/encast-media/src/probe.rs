//! Stream/format introspection of produced media.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Inspect `target` with the given probe tool, returning its JSON report.
///
/// The report is opaque to the worker; completion events carry it as-is.
/// `-allowed_extensions ALL` lets the tool open local manifests that
/// reference sibling key and segment files.
pub async fn probe(tool: &Path, target: &Path) -> MediaResult<serde_json::Value> {
    let output = Command::new(tool)
        .arg("-v")
        .arg("quiet")
        .arg("-print_format")
        .arg("json")
        .arg("-show_format")
        .arg("-show_streams")
        .arg("-allowed_extensions")
        .arg("ALL")
        .arg(target)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| MediaError::probe_failed(format!("{}: {}", tool.display(), e), None))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        return Err(MediaError::probe_failed(
            format!("probe exited with {}", output.status),
            Some(stderr),
        ));
    }

    let report = serde_json::from_slice(&output.stdout)?;
    debug!(target = %target.display(), "Probed output manifest");
    Ok(report)
}
