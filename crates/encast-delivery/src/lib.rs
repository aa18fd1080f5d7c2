//! Artifact delivery for the Encast worker.
//!
//! This crate provides:
//! - Destination abstraction (HTTP PUT and write-stream filesystems)
//! - Fixed-pause retry
//! - Upload management with delete-after-delivery and batch reporting
//! - A watch-driven upload queue for settled files

pub mod destination;
pub mod error;
pub mod retry;
pub mod uploader;
pub mod watch;

// Re-export common types
pub use destination::{
    Destination, DestinationFilesystem, FilesystemDestination, HttpDestination, LocalFilesystem,
};
pub use error::{DeliveryError, DeliveryResult};
pub use retry::{retry_fixed, RetryOutcome, RetryPolicy};
pub use uploader::{artifact_key, watch_key, BatchReport, UploadManager};
pub use watch::{SettleTracker, WatchQueue, WatchQueueHandle};
