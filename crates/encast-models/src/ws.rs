//! Control channel message schemas.
//!
//! The worker keeps one WebSocket session to the controller. Every frame is
//! a JSON object tagged by `type`; inbound and outbound directions use
//! separate enums so each side only parses what it can act on.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::{EncodeJob, RunStatus};
use crate::progress::ProgressSample;

/// Messages received from the controller.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Reply to `register`. A missing encoder id means access was denied.
    Registered {
        #[serde(default, rename = "encoderId")]
        encoder_id: Option<String>,
    },

    /// Dispatch a new encoding job. Answered with `job-ack`.
    NewJob { job: EncodeJob },

    /// Terminate the current encoder process, if any.
    Stop,

    /// Shut the worker down once in-flight deliveries are drained.
    Quit,
}

/// Messages sent to the controller.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerMessage {
    /// First frame of every session. `encoder_id` is echoed from an earlier
    /// registration so reconnects keep their identity.
    Register {
        token: String,
        #[serde(rename = "encoderId", skip_serializing_if = "Option::is_none")]
        encoder_id: Option<String>,
    },

    /// Host facts, sent once right after a successful registration.
    Info {
        hostname: String,
        cpus: usize,
        priority: i32,
    },

    /// Admission verdict for a dispatched job.
    JobAck {
        accepted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Run state transition.
    State { state: RunStatus },

    /// Throttled progress update.
    Progress {
        current: f64,
        start: f64,
        time: DateTime<Utc>,
    },

    /// Announcement of the job that just started encoding.
    CurrentlyProcessing {
        asset: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        bitrate: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parameters: Option<serde_json::Value>,
        time: DateTime<Utc>,
    },

    /// Completion event for a run whose artifacts were all delivered.
    Done {
        /// Destination-relative manifest path, as dispatched.
        filename: String,
        asset: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        bitrate: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        codec: Option<String>,
        /// Base names of every delivered artifact.
        filenames: Vec<String>,
        /// Stream/format introspection of the produced manifest, when
        /// available.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        probe: Option<serde_json::Value>,
    },

    /// Raw encoder output line (piped mode only).
    Output { line: String },

    /// Worker-level error report.
    Error {
        message: String,
        time: DateTime<Utc>,
    },
}

impl WorkerMessage {
    /// Create a registration request.
    pub fn register(token: impl Into<String>, encoder_id: Option<String>) -> Self {
        WorkerMessage::Register {
            token: token.into(),
            encoder_id,
        }
    }

    /// Create a host info report.
    pub fn info(hostname: impl Into<String>, cpus: usize, priority: i32) -> Self {
        WorkerMessage::Info {
            hostname: hostname.into(),
            cpus,
            priority,
        }
    }

    /// Create an accepting job ack.
    pub fn ack_accepted() -> Self {
        WorkerMessage::JobAck {
            accepted: true,
            reason: None,
        }
    }

    /// Create a rejecting job ack.
    pub fn ack_rejected(reason: impl Into<String>) -> Self {
        WorkerMessage::JobAck {
            accepted: false,
            reason: Some(reason.into()),
        }
    }

    /// Create a state transition message.
    pub fn state(state: RunStatus) -> Self {
        WorkerMessage::State { state }
    }

    /// Create a progress message, stamped with the current time.
    pub fn progress(sample: ProgressSample) -> Self {
        WorkerMessage::Progress {
            current: sample.current,
            start: sample.start,
            time: Utc::now(),
        }
    }

    /// Create a currently-processing announcement from a job.
    pub fn currently_processing(job: &EncodeJob) -> Self {
        WorkerMessage::CurrentlyProcessing {
            asset: job.asset.clone(),
            source: job.primary_source().map(String::from),
            width: job.width,
            bitrate: job.bitrate.clone(),
            parameters: job.parameters.clone(),
            time: Utc::now(),
        }
    }

    /// Create a completion message for a delivered run.
    pub fn done(job: &EncodeJob, filenames: Vec<String>, probe: Option<serde_json::Value>) -> Self {
        WorkerMessage::Done {
            filename: job.playlist.clone(),
            asset: job.asset.clone(),
            bitrate: job.bitrate.clone(),
            codec: job.codec.clone(),
            filenames,
            probe,
        }
    }

    /// Create a raw encoder output message.
    pub fn output(line: impl Into<String>) -> Self {
        WorkerMessage::Output { line: line.into() }
    }

    /// Create an error message, stamped with the current time.
    pub fn error(message: impl Into<String>) -> Self {
        WorkerMessage::Error {
            message: message.into(),
            time: Utc::now(),
        }
    }
}
