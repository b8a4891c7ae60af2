//! Resumable archive downloads.
//!
//! This module provides:
//! - Direct HTTP transfers with `Range` resume (`http`)
//! - Accelerated transfers through `aria2c` (`accelerated`)
//! - Parsing of accelerator status lines (`parser`)
//! - Progress snapshots and throughput measurement (`progress`)
//! - Resume side file persistence (`state`)
//! - Bounded retry (`retry`)
//! - High-level orchestration (`orchestrator`)
//!
//! # Architecture
//!
//! ```text
//! ArchiveDownloader (orchestrator)
//!         │
//!         ├── TransferStrategy (trait)
//!         │       ├── DirectTransfer
//!         │       └── AcceleratedTransfer ── parse_progress_line
//!         │
//!         ├── attempt_resumable (retry)
//!         │
//!         ├── ResumeStore (side file)
//!         │
//!         └── InFlightRegistry (one download per version)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use xcodes::download::{ArchiveDownloader, DirectTransfer};
//! use xcodes::files::LocalFileSystem;
//!
//! let strategy = Arc::new(DirectTransfer::new(Duration::from_secs(300))?);
//! let downloader = ArchiveDownloader::new(strategy, Arc::new(LocalFileSystem::new()));
//!
//! let outcome = downloader.download(&archive, &destination, None, &mut |progress| {
//!     println!("{}%", progress.percent);
//! })?;
//! ```

mod accelerated;
mod http;
mod orchestrator;
mod parser;
mod progress;
mod retry;
mod state;
mod strategy;

pub use accelerated::{AcceleratedTransfer, DEFAULT_ARIA2_PATH};
pub use http::{DirectTransfer, DEFAULT_TIMEOUT_SECS};
pub use orchestrator::{ArchiveDownloader, DownloadOutcome, InFlightGuard, InFlightRegistry};
pub use parser::{convert_size, parse_progress_line, FILE_ALLOCATION_MARKER};
pub use progress::{ThroughputMeter, TransferProgress};
pub use retry::{attempt_resumable, DEFAULT_MAX_ATTEMPTS};
pub use state::{partial_path, resume_data_path, DownloadTask, ResumeStore, ResumeToken};
pub use strategy::{TransferError, TransferStrategy};
