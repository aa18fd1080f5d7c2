//! Encoding job payload and run status.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single encoding job as dispatched by the controller.
///
/// `args` carries the caller's encoder arguments verbatim. The worker adds
/// the fixed flag set, the segment filename pattern and the output path on
/// top of them; it never reorders or rewrites what the controller sent.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EncodeJob {
    /// Asset identifier this job belongs to.
    pub asset: String,

    /// Source media locations, informational. The actual inputs are part
    /// of `args`.
    #[serde(default)]
    pub sources: Vec<String>,

    /// Caller-supplied encoder arguments (relative order is preserved).
    #[serde(default)]
    pub args: Vec<String>,

    /// Destination-relative manifest path, e.g. `enc%2F42/1080p-4000k.m3u8`.
    /// The top path segment may be percent-encoded.
    pub playlist: String,

    /// Hex-encoded encryption key. When present it is materialized as a
    /// sibling `file.key` in the scratch directory before upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,

    /// Target width in pixels, echoed in processing announcements.
    #[serde(default)]
    pub width: Option<u32>,

    /// Bitrate label, echoed in completion events.
    #[serde(default)]
    pub bitrate: Option<String>,

    /// Codec label, echoed in completion events.
    #[serde(default)]
    pub codec: Option<String>,

    /// Opaque variant parameters, echoed back to the controller untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl EncodeJob {
    /// File name of the output manifest (the last segment of `playlist`).
    pub fn playlist_name(&self) -> &str {
        self.playlist.rsplit('/').next().unwrap_or(self.playlist.as_str())
    }

    /// Destination prefix for produced artifacts: everything before the
    /// manifest file name, without a trailing slash. Empty when the
    /// playlist has no directory part.
    pub fn destination_prefix(&self) -> &str {
        match self.playlist.rsplit_once('/') {
            Some((prefix, _)) => prefix,
            None => "",
        }
    }

    /// Primary source location, if any was declared.
    pub fn primary_source(&self) -> Option<&str> {
        self.sources.first().map(String::as_str)
    }
}

/// Worker run state as reported to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// No job held; the next admission will succeed.
    Idle,
    /// An encoder process is being supervised.
    Running,
    /// The last run ended in a failure that was not requested via stop.
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Error => "error",
        }
    }
}
