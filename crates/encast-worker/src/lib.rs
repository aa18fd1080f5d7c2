//! Encast encoder worker.
//!
//! A single-slot worker driven by a remote controller over a WebSocket
//! control channel. It admits one encoding job at a time, supervises the
//! encoder process, reports throttled progress, and delivers artifacts
//! with bounded retries before announcing completion.

pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;

pub use channel::ControlChannel;
pub use config::{ProgressMode, WorkerConfig};
pub use controller::JobController;
pub use error::{WorkerError, WorkerResult};
