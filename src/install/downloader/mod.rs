//! Module for downloading resource archives
//!
//! This module provides the streaming HTTP downloader and the registry that
//! tracks which resources currently have a download in flight.

mod http;
mod queue;

// Re-export the public API
pub use http::Downloader;
pub use queue::{DownloadTask, TaskRegistry};
