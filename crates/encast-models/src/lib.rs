//! Shared data models for the Encast encoder worker.
//!
//! This crate provides Serde-serializable types for:
//! - The encoding job payload dispatched by the controller
//! - Run status reporting
//! - Progress samples
//! - Control channel message schemas

pub mod job;
pub mod progress;
pub mod ws;

// Re-export common types
pub use job::{EncodeJob, RunStatus};
pub use progress::ProgressSample;
pub use ws::{ControlMessage, WorkerMessage};
