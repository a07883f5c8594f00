//! Installed item catalog
//!
//! Rebuilds the list of installed resources from the description records on disk.
//! The scan is deliberately forgiving: a directory that cannot be read, has no
//! record, or whose record is foreign or corrupted is skipped, never fatal.
//!
//! Scripts used to be recorded with the `"scripts"` kind and installed under the
//! add-on root. Those are moved into the script root when the scan finds them.

use std::{
    collections::HashSet,
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, trace, warn};

use crate::resource::{DESCRIPTION_FILE, ResourceItem, ResourceKind};

/// Scan both roots and return every valid installed item.
///
/// The script root is read first so that an id present in both roots resolves to
/// the script, and so that legacy add-on entries can be migrated into it.
#[instrument(level = "debug")]
pub async fn installed_items(addon_root: &Path, script_root: &Path) -> Vec<ResourceItem> {
    let mut items = Vec::new();
    let mut seen = HashSet::new();

    for (name, dir) in subdirectories(script_root).await {
        match read_record(&dir).await {
            Some(item) if item.id == name && item.kind == ResourceKind::Script => {
                seen.insert(item.id.clone());
                items.push(item);
            }
            Some(item) => {
                debug!(dir = ?dir, id = %item.id, kind = %item.kind, "Ignoring mismatched script record");
            }
            None => trace!(dir = ?dir, "No usable description record"),
        }
    }

    for (name, dir) in subdirectories(addon_root).await {
        let Some(item) = read_record(&dir).await else {
            trace!(dir = ?dir, "No usable description record");
            continue;
        };
        if item.id != name {
            debug!(dir = ?dir, id = %item.id, "Ignoring record whose id does not match its directory");
            continue;
        }
        if seen.contains(&item.id) {
            debug!(id = %item.id, "Already installed as a script, skipping add-on copy");
            continue;
        }

        if item.kind == ResourceKind::LegacyScripts {
            let destination = script_root.join(&item.id);
            match migrate_legacy_script(&item, &dir, &destination).await {
                Ok(migrated) => {
                    info!(id = %migrated.id, from = ?dir, to = ?destination, "Migrated legacy script");
                    seen.insert(migrated.id.clone());
                    items.push(migrated);
                }
                Err(e) => {
                    warn!(id = %item.id, error = %e, "Failed to migrate legacy script, skipping");
                }
            }
        } else {
            seen.insert(item.id.clone());
            items.push(item);
        }
    }

    items
}

/// Subdirectories of `root` as `(name, path)`, sorted by name.
/// A root that cannot be listed contributes nothing.
async fn subdirectories(root: &Path) -> Vec<(String, PathBuf)> {
    let mut read_dir = match tokio::fs::read_dir(root).await {
        Ok(read_dir) => read_dir,
        Err(e) => {
            debug!(root = ?root, error = %e, "Cannot list directory");
            return Vec::new();
        }
    };

    let mut dirs = Vec::new();
    loop {
        let entry = match read_dir.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                debug!(root = ?root, error = %e, "Error while listing directory");
                break;
            }
        };
        let is_dir = entry
            .file_type()
            .await
            .map(|file_type| file_type.is_dir())
            .unwrap_or(false);
        if !is_dir {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            dirs.push((name.to_string(), entry.path()));
        }
    }

    dirs.sort();
    dirs
}

async fn read_record(dir: &Path) -> Option<ResourceItem> {
    let content = tokio::fs::read_to_string(dir.join(DESCRIPTION_FILE))
        .await
        .ok()?;
    ResourceItem::try_parse(&content)
}

/// Copy a legacy script out of the add-on root, then delete the original.
///
/// The record in the new location is rewritten with the normalized kind before the
/// original is deleted, otherwise the script root would hold a copy its own scan
/// does not recognise.
async fn migrate_legacy_script(
    item: &ResourceItem,
    source: &Path,
    destination: &Path,
) -> io::Result<ResourceItem> {
    let mut migrated = item.clone();
    migrated.kind = migrated.kind.normalized();
    let record = migrated.to_record().map_err(io::Error::other)?;

    copy_dir(source, destination).await?;
    // the copy must be a valid script before the original goes away
    tokio::fs::write(destination.join(DESCRIPTION_FILE), record).await?;
    tokio::fs::remove_dir_all(source).await?;

    Ok(migrated)
}

/// Recursively copy `src` into `dest`, reusing existing directories and
/// replacing existing files.
pub async fn copy_dir(src: &Path, dest: &Path) -> io::Result<()> {
    debug!(from = ?src, to = ?dest, "Copying directory");
    tokio::fs::create_dir_all(dest).await?;

    let entries = jwalk::WalkDir::new(src)
        .sort(true)
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| io::Error::other(e.to_string()))?;

    for entry in entries {
        let path = entry.path();
        let relative = path
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let dest_path = dest.join(relative);

        if entry.file_type().is_dir() {
            tokio::fs::create_dir_all(&dest_path).await?;
        } else {
            if let Some(parent) = dest_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&path, &dest_path).await?;
        }
    }

    debug!(from = ?src, to = ?dest, "Directory copied");
    Ok(())
}
