//! Resource manager
//!
//! Owns the download registry and the two install roots, and runs one installation
//! pipeline per resource: download the archive, clear the old install, extract,
//! write the description record. Outcomes are reported through subscribed event
//! handlers.

use std::{
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use bytesize::ByteSize;
use tempfile::TempPath;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, instrument, trace, warn};
use ulid::Ulid;

use super::{
    InstallError, Result, catalog,
    downloader::{Downloader, TaskRegistry},
    events::{ResourceEvent, Subscribers, SubscriptionToken},
    extract::extract_archive,
};
use crate::resource::{DESCRIPTION_FILE, ResourceItem, ResourceKind, ResourceState};

/// Locations the manager works in
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Root for add-ons
    pub addon_dir: PathBuf,
    /// Root for scripts
    pub script_dir: PathBuf,
    /// Where archives are downloaded to before extraction
    pub temp_dir: PathBuf,
}

impl ManagerConfig {
    pub fn new(
        addon_dir: impl Into<PathBuf>,
        script_dir: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            addon_dir: addon_dir.into(),
            script_dir: script_dir.into(),
            temp_dir: temp_dir.into(),
        }
    }

    /// Install root for a resource kind. Legacy scripts still live under the
    /// add-on root until the catalog migrates them.
    pub fn root_for(&self, kind: ResourceKind) -> &Path {
        match kind {
            ResourceKind::Script => &self.script_dir,
            ResourceKind::Addon | ResourceKind::LegacyScripts => &self.addon_dir,
        }
    }
}

#[derive(Debug, Default)]
struct ManagerState {
    tasks: TaskRegistry,
    subscribers: Subscribers,
}

struct Shared {
    config: ManagerConfig,
    downloader: Downloader,
    state: Mutex<ManagerState>,
    events: mpsc::UnboundedSender<ResourceEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        // the state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ResourceEvent) {
        if self.events.send(event).is_err() {
            trace!("Event dispatcher is gone, dropping event");
        }
    }

    /// Install directory of `item`. Refuses ids that would resolve anywhere but
    /// a direct child of the root.
    fn item_path(&self, item: &ResourceItem) -> Result<PathBuf> {
        if !item.has_valid_id() {
            return Err(InstallError::InvalidId(item.id.clone()));
        }
        Ok(self.config.root_for(item.kind).join(&item.id))
    }
}

/// Handle to the resource manager. Cheap to clone; all clones share the same
/// registry and subscribers.
#[derive(Clone)]
pub struct ResourceManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("config", &self.shared.config)
            .field("state", &*self.shared.lock())
            .finish()
    }
}

impl ResourceManager {
    /// Must be called from within a tokio runtime, the event dispatcher is
    /// spawned onto it.
    pub fn new(config: ManagerConfig) -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            downloader: Downloader::new(),
            state: Mutex::new(ManagerState::default()),
            events,
        });
        tokio::spawn(dispatch_events(Arc::downgrade(&shared), receiver));
        Self { shared }
    }

    /// Start installing `item` in the background.
    ///
    /// Does nothing if a download for the same id is already running. The outcome
    /// is reported as a [`ResourceEvent::Success`] or [`ResourceEvent::Failure`].
    #[instrument(skip(self, item), fields(id = %item.id))]
    pub fn download(&self, item: &ResourceItem) {
        if !item.has_valid_id() {
            warn!("Refusing to install an item whose id is not a plain directory name");
            self.shared.emit(ResourceEvent::Failure { item: item.clone() });
            return;
        }

        let mut state = self.shared.lock();
        let started = state.tasks.start_with(&item.id, |token| {
            tokio::spawn(run_pipeline(self.shared.clone(), item.clone(), token))
        });
        if started {
            info!(url = %item.url, "Download started");
        }
    }

    /// Request cancellation of a running download. Returns false if there is none.
    pub fn cancel(&self, item: &ResourceItem) -> bool {
        self.shared.lock().tasks.cancel(&item.id)
    }

    /// Remove the installed directory of `item`. A missing directory is not an error.
    #[instrument(skip(self, item), fields(id = %item.id))]
    pub async fn uninstall(&self, item: &ResourceItem) -> Result<()> {
        remove_install_dir(&self.shared.item_path(item)?).await?;
        Ok(())
    }

    pub fn state_for_item(&self, item: &ResourceItem) -> ResourceState {
        if self.shared.lock().tasks.contains(&item.id) {
            return ResourceState::Downloading;
        }
        match self.shared.item_path(item) {
            Ok(path) if path.is_dir() => ResourceState::Installed,
            _ => ResourceState::None,
        }
    }

    /// Scan both roots, migrating legacy scripts on the way
    pub async fn installed_items(&self) -> Vec<ResourceItem> {
        let config = &self.shared.config;
        catalog::installed_items(&config.addon_dir, &config.script_dir).await
    }

    /// Directory `item` is (or would be) installed into
    pub fn item_path(&self, item: &ResourceItem) -> Result<PathBuf> {
        self.shared.item_path(item)
    }

    /// Path of the runnable entry point, for scripts that declare one
    pub fn script_path(&self, item: &ResourceItem) -> Option<PathBuf> {
        let main_script = item.entry_point()?;
        Some(self.shared.item_path(item).ok()?.join(main_script))
    }

    /// Ids with a download in flight, sorted
    pub fn active_downloads(&self) -> Vec<String> {
        self.shared.lock().tasks.active_ids()
    }

    /// Register an event handler.
    ///
    /// Handlers run on the dispatcher task, never on the pipeline, and should
    /// return quickly.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionToken
    where
        F: Fn(&ResourceEvent) + Send + Sync + 'static,
    {
        let token = self.shared.lock().subscribers.add(Arc::new(handler));
        debug!(%token, "Subscribed");
        token
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let removed = self.shared.lock().subscribers.remove(token);
        debug!(%token, removed, "Unsubscribed");
        removed
    }
}

async fn remove_install_dir(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            info!(path = ?path, "Removed installed directory");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = ?path, "Nothing to remove");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn dispatch_events(
    shared: Weak<Shared>,
    mut receiver: mpsc::UnboundedReceiver<ResourceEvent>,
) {
    while let Some(event) = receiver.recv().await {
        let Some(manager) = shared.upgrade() else {
            break;
        };
        let handlers = manager.lock().subscribers.snapshot();
        drop(manager);

        for handler in handlers {
            handler(&event);
        }
    }
    trace!("Event dispatcher stopped");
}

async fn run_pipeline(shared: Arc<Shared>, item: ResourceItem, cancel: CancellationToken) {
    let span = info_span!("install", id = %item.id, kind = %item.kind);
    let result = install(&shared, &item, &cancel)
        .instrument(span.clone())
        .await;

    span.in_scope(|| {
        // the entry goes first so handlers observe the final state
        shared.lock().tasks.remove(&item.id);

        match result {
            Ok(()) => {
                info!("Installation complete");
                shared.emit(ResourceEvent::Success { item });
            }
            Err(InstallError::Cancelled) => {
                info!("Installation cancelled");
                shared.emit(ResourceEvent::Failure { item });
            }
            Err(e) => {
                error!(error = %e, "Installation failed");
                shared.emit(ResourceEvent::Failure { item });
            }
        }
    });
}

async fn install(shared: &Shared, item: &ResourceItem, cancel: &CancellationToken) -> Result<()> {
    let config = &shared.config;

    tokio::fs::create_dir_all(&config.temp_dir)
        .await
        .map_err(|source| InstallError::CreateFailed {
            path: config.temp_dir.clone(),
            source,
        })?;
    // deleted when dropped, whichever way this function returns
    let archive = TempPath::from_path(config.temp_dir.join(format!("{}.zip", Ulid::new())));

    let size = shared
        .downloader
        .download_file(item.url.as_str(), &archive, cancel, |fraction| {
            shared.emit(ResourceEvent::Progress {
                item: item.clone(),
                fraction,
            });
        })
        .await?;
    debug!(size = %ByteSize(size), archive = ?archive, "Archive downloaded");

    if cancel.is_cancelled() {
        return Err(InstallError::Cancelled);
    }

    let destination = shared.item_path(item)?;
    if let Err(e) = remove_install_dir(&destination).await {
        warn!(path = ?destination, error = %e, "Failed to clear previous install");
    }
    tokio::fs::create_dir_all(&destination)
        .await
        .map_err(|source| InstallError::CreateFailed {
            path: destination.clone(),
            source,
        })?;

    if let Err(e) = populate(&archive, &destination, item, cancel).await {
        // a half-extracted directory must not read as installed
        if let Err(cleanup) = remove_install_dir(&destination).await {
            warn!(path = ?destination, error = %cleanup, "Failed to remove partial install");
        }
        return Err(e);
    }
    Ok(())
}

/// Extract `archive` into the freshly created `destination` and write the record
async fn populate(
    archive: &Path,
    destination: &Path,
    item: &ResourceItem,
    cancel: &CancellationToken,
) -> Result<()> {
    let files = extract_archive(archive, destination, cancel).await?;
    tokio::fs::write(destination.join(DESCRIPTION_FILE), item.to_record()?).await?;

    info!(files = files.len(), path = ?destination, "Archive extracted");
    Ok(())
}
