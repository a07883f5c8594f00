//! HTTP download implementation
//!
//! Streams a response body into a local file in fixed-size chunks, reporting
//! fractional progress when the server announces a content length.

use futures_util::TryStreamExt;
use reqwest::{
    Client,
    header::{self, HeaderMap, HeaderValue},
};
use std::{io, path::Path};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tokio_util::{io::StreamReader, sync::CancellationToken};
use tracing::{debug, info, instrument, trace};

use crate::install::{CHUNK_SIZE, InstallError, Result};

#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Downloader {
    pub fn new() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .unwrap_or_default();

        Self { client }
    }

    /// Download `url` into `output_path`.
    ///
    /// `on_progress` receives `bytes_read / total` after every chunk, but only when
    /// the response carries a positive content length; otherwise the transfer runs
    /// without progress reports.
    ///
    /// Cancellation is checked before every chunk, and a read that is waiting on
    /// the network is abandoned as soon as `cancel` fires. The partially written
    /// file is left behind for the caller to discard.
    ///
    /// Returns the number of bytes written.
    #[instrument(name = "download_file", level = "debug", skip(self, output_path, cancel, on_progress), fields(url = %url))]
    pub async fn download_file<F>(
        &self,
        url: &str,
        output_path: &Path,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<u64>
    where
        F: FnMut(f64),
    {
        trace!("Starting download");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Download cancelled before the server responded");
                return Err(InstallError::Cancelled);
            }
            response = self.client.get(url).send() => response?,
        };

        trace!(status = %response.status(), "Got response");
        if !response.status().is_success() {
            return Err(InstallError::HttpStatus(response.status()));
        }

        let total_size = response.content_length().filter(|&len| len > 0);
        match total_size {
            Some(size) => info!(size = %bytesize::ByteSize(size), path = ?output_path, "Starting download"),
            None => info!(path = ?output_path, "Starting download of unknown size"),
        }

        let mut file = File::create(output_path).await?;
        let mut body = StreamReader::new(response.bytes_stream().map_err(io::Error::other));

        let mut buffer = [0u8; CHUNK_SIZE];
        let mut downloaded: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                info!(downloaded, "Download cancelled during progress");
                return Err(InstallError::Cancelled);
            }

            let bytes_read = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(downloaded, "Download cancelled while waiting for data");
                    return Err(InstallError::Cancelled);
                }
                read = body.read(&mut buffer) => read?,
            };

            if bytes_read == 0 {
                break;
            }

            file.write_all(&buffer[..bytes_read]).await?;
            downloaded += bytes_read as u64;
            trace!(bytes = downloaded, chunk_size = bytes_read, "Received chunk");

            if let Some(total) = total_size {
                on_progress(downloaded as f64 / total as f64);
            }
        }

        file.flush().await?;
        file.shutdown().await?;

        debug!(bytes = downloaded, "Download completed");
        Ok(downloaded)
    }
}
