//! Orchestrates an external youtube-dl-class extractor: probes URLs for
//! stream metadata, models the available formats, and drives download
//! subprocesses while reporting byte-level progress.
//!
//! The extraction itself (site scraping, HTTP, format negotiation) lives in
//! the external tool; this crate supervises its processes and turns their
//! textual and JSON output into typed events.

pub mod core;
pub mod models;

pub use crate::core::collector::{CollectorEvent, MetadataCollector};
pub use crate::core::downloader::{DownloadEvent, Downloader};
pub use crate::core::maintenance::CacheCleaner;
pub use crate::core::process::{ExitKind, ProcessError, ProcessEvent, ProcessRunner};
pub use crate::models::format::{FormatId, StreamFormat};
pub use crate::models::stream::{PlaylistEntry, StreamError, StreamInfo};
