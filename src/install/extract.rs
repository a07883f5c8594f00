//! Zip extraction into an install directory.
//!
//! Entries are streamed one by one in index order. Directory structure is rebuilt
//! from each entry's stored path, and every file is copied in fixed-size chunks so
//! a cancellation request is honoured within one buffer of latency.

use async_zip::tokio::read::seek::ZipFileReader;
use std::path::{Path, PathBuf};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
};
use tokio_util::{compat::FuturesAsyncReadCompatExt, sync::CancellationToken};
use tracing::{debug, info, instrument, trace};

use super::{CHUNK_SIZE, InstallError, Result};

/// An entry's stored path, split into the parts that matter for extraction
#[derive(Debug, PartialEq, Eq)]
enum EntryPath<'a> {
    /// Only directories need to exist
    Directory(Vec<&'a str>),
    /// Parent directories, then the file name
    File(Vec<&'a str>, &'a str),
}

/// Split a stored entry name into components.
///
/// Both `/` and `\` count as separators. Empty and `.` components are dropped, so
/// names like `a//b` or `./a` never create oddly named directories. Anything that
/// could climb out of the destination is refused.
fn parse_entry_path(name: &str) -> Result<Option<EntryPath<'_>>> {
    let is_dir = name.ends_with(['/', '\\']);
    let mut components = Vec::new();

    for part in name.split(['/', '\\']) {
        if part.is_empty() || part == "." {
            continue;
        }
        // ':' covers drive prefixes like "C:"
        if part == ".." || part.contains(':') {
            return Err(InstallError::UnsafeEntryPath(name.to_string()));
        }
        components.push(part);
    }

    if is_dir {
        return Ok(Some(EntryPath::Directory(components)));
    }
    Ok(components
        .pop()
        .map(|file_name| EntryPath::File(components, file_name)))
}

/// Create `components` as nested directories below `root`, reusing existing ones
async fn create_nested_dirs(root: &Path, components: &[&str]) -> Result<PathBuf> {
    let mut current = root.to_path_buf();
    for component in components {
        current.push(component);
        if !current.is_dir() {
            tokio::fs::create_dir(&current)
                .await
                .or_else(|e| {
                    // a concurrent creator or a previous entry got there first
                    if e.kind() == std::io::ErrorKind::AlreadyExists && current.is_dir() {
                        Ok(())
                    } else {
                        Err(e)
                    }
                })
                .map_err(|source| InstallError::CreateFailed {
                    path: current.clone(),
                    source,
                })?;
        }
    }
    Ok(current)
}

/// Copy exactly `declared_size` bytes of one entry, checking `cancel` before
/// every read
async fn copy_entry<R, W>(
    reader: &mut R,
    output: &mut W,
    name: &str,
    declared_size: u64,
    cancel: &CancellationToken,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = [0u8; CHUNK_SIZE];
    let mut written: u64 = 0;
    while written < declared_size {
        if cancel.is_cancelled() {
            info!(path = %name, written, "Extraction cancelled mid-entry");
            return Err(InstallError::Cancelled);
        }

        let wanted = CHUNK_SIZE.min((declared_size - written) as usize);
        let bytes_read = reader.read(&mut buffer[..wanted]).await?;
        if bytes_read == 0 {
            return Err(InstallError::TruncatedEntry {
                entry: name.to_string(),
                expected: declared_size,
                actual: written,
            });
        }

        output.write_all(&buffer[..bytes_read]).await?;
        written += bytes_read as u64;
    }
    output.flush().await?;
    Ok(written)
}

/// Extract every entry of the zip at `archive` into `destination`.
///
/// Files are created strictly: an entry that collides with an existing file fails
/// the extraction, since installs always start from an empty directory.
///
/// The archive reader and any open entry reader are owned by this function, so they
/// are released on every exit path, including cancellation and read errors.
///
/// Returns the paths of the files written.
#[instrument(level = "debug", skip(cancel), fields(archive = ?archive, destination = ?destination))]
pub async fn extract_archive(
    archive: &Path,
    destination: &Path,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>> {
    info!("Extracting zip archive");
    let file = BufReader::new(File::open(archive).await?);
    let mut zip = ZipFileReader::with_tokio(file).await?;

    let entry_count = zip.file().entries().len();
    let mut extracted_files = Vec::new();
    debug!(entries = entry_count, "Scanning zip contents");

    for index in 0..entry_count {
        if cancel.is_cancelled() {
            info!(entry = index, "Extraction cancelled");
            return Err(InstallError::Cancelled);
        }

        let (name, declared_size) = {
            let entry = &zip.file().entries()[index];
            (
                entry.filename().as_str()?.to_string(),
                entry.uncompressed_size(),
            )
        };

        trace!(
            entry = index + 1,
            total = entry_count,
            path = %name,
            size = declared_size,
            "Extracting entry"
        );

        let (parents, file_name) = match parse_entry_path(&name)? {
            None => {
                debug!(path = %name, "Skipping entry without path components");
                continue;
            }
            Some(EntryPath::Directory(components)) => {
                create_nested_dirs(destination, &components).await?;
                continue;
            }
            Some(EntryPath::File(parents, file_name)) => (parents, file_name),
        };

        let parent = create_nested_dirs(destination, &parents).await?;
        let path = parent.join(file_name);

        let mut entry_reader = zip.reader_with_entry(index).await?.compat();
        let mut output_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| InstallError::CreateFailed {
                path: path.clone(),
                source,
            })?;

        let written =
            copy_entry(&mut entry_reader, &mut output_file, &name, declared_size, cancel).await?;

        debug!(bytes = written, path = %name, "File extracted successfully");
        extracted_files.push(path);
    }

    info!(files = extracted_files.len(), "Extraction complete");
    Ok(extracted_files)
}
