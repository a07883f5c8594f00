//! Primary module for installing resources.
//!
//! Installing a resource means fetching its archive over HTTP, unpacking it into
//! the add-on or script root, and leaving a description record behind so that the
//! catalog can find it again. Everything here is driven by [`ResourceManager`].
//!

use std::path::PathBuf;
use thiserror::Error;

pub mod catalog;
pub mod downloader;
pub mod events;
pub mod extract;
pub mod manager;

#[cfg(test)]
mod testutil;

/// Size of each read when streaming a download or an archive entry
pub const CHUNK_SIZE: usize = 4096;

pub use events::{ResourceEvent, SubscriptionToken};
pub use manager::{ManagerConfig, ResourceManager};

#[derive(Error, Debug)]
pub enum InstallError {
    // IO errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("HTTP error: {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("Zip error: {0}")]
    ZipError(#[from] async_zip::error::ZipError),

    #[error("Archive entry {entry} is truncated: expected {expected} bytes, got {actual}")]
    TruncatedEntry {
        entry: String,
        expected: u64,
        actual: u64,
    },

    #[error("Archive entry escapes the destination: {0}")]
    UnsafeEntryPath(String),

    #[error("Failed to create {path:?}: {source}")]
    CreateFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Resource id {0:?} cannot be used as a directory name")]
    InvalidId(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, InstallError>;
