//! Encoder process management for the Encast worker.
//!
//! This crate provides:
//! - Command assembly around caller-supplied encoder arguments
//! - Process supervision with a scrubbed environment and stop control
//! - Progress stream parsing with throttled emission
//! - Follow-tail of the progress side file
//! - Stream/format introspection via the probe tool

pub mod command;
pub mod error;
pub mod probe;
pub mod progress;
pub mod supervisor;
pub mod tail;

// Re-export common types
pub use command::{check_encoder, check_probe, segment_pattern_for, EncoderCommand, ProgressSink};
pub use error::{MediaError, MediaResult};
pub use probe::probe;
pub use progress::{parse_out_time, pump_lines, ProgressTracker, EMIT_INTERVAL};
pub use supervisor::{
    spawn, ExitKind, IoMode, ProcessEnv, ProcessOutcome, StopHandle, SupervisedProcess,
};
pub use tail::{ensure_progress_file, tail_lines};
