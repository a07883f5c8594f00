use std::path::Path;

use color_eyre::eyre::{WrapErr, bail};
use resman::{
    config::{self, Command},
    install::{ResourceEvent, ResourceManager},
    resource::ResourceItem,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

fn read_descriptor(path: &Path) -> color_eyre::Result<ResourceItem> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read descriptor {}", path.display()))?;
    let item: ResourceItem = serde_json::from_str(&content)
        .wrap_err_with(|| format!("Invalid descriptor {}", path.display()))?;
    if !item.has_valid_id() {
        bail!("Descriptor {} has an unusable id {:?}", path.display(), item.id);
    }
    Ok(item)
}

async fn install(manager: &ResourceManager, item: &ResourceItem) -> color_eyre::Result<()> {
    let (sender, mut events) = mpsc::unbounded_channel();
    let id = item.id.clone();
    let token = manager.subscribe(move |event| {
        if event.item().id == id {
            let _ = sender.send(event.clone());
        }
    });

    manager.download(item);

    let mut interrupted = false;
    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ResourceEvent::Progress { fraction, .. }) => {
                    eprint!("\r{}: {:>5.1}%", item.display_name(), fraction * 100.0);
                }
                Some(event) => break Some(event),
                None => break None,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                tracing::warn!(id = %item.id, "Interrupted, cancelling download");
                interrupted = true;
                manager.cancel(item);
            }
        }
    };
    eprintln!();
    manager.unsubscribe(token);

    match outcome {
        Some(ResourceEvent::Success { .. }) => {
            let path = manager.item_path(item)?;
            println!("Installed {} into {}", item.id, path.display());
            if let Some(script) = manager.script_path(item) {
                println!("Entry point: {}", script.display());
            }
            Ok(())
        }
        _ if interrupted => bail!("Installation of {} was cancelled", item.id),
        _ => bail!("Installation of {} failed", item.id),
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    color_eyre::install()?;

    let config = config::config();
    tracing::debug!(?config, "Loaded configuration");
    let manager = ResourceManager::new((&config.storage).into());

    match config.command {
        Command::List => {
            let items = manager.installed_items().await;
            if items.is_empty() {
                println!("Nothing installed");
            }
            for item in items {
                println!(
                    "{:<24} {:<7} {}",
                    item.id,
                    item.kind.to_string(),
                    item.display_name()
                );
            }
        }
        Command::Install { descriptor } => {
            let item = read_descriptor(&descriptor)?;
            install(&manager, &item).await?;
        }
        Command::Uninstall { descriptor } => {
            let item = read_descriptor(&descriptor)?;
            manager
                .uninstall(&item)
                .await
                .wrap_err_with(|| format!("Failed to uninstall {}", item.id))?;
            println!("Uninstalled {}", item.id);
        }
        Command::State { descriptor } => {
            let item = read_descriptor(&descriptor)?;
            println!("{}: {}", item.id, manager.state_for_item(&item));
        }
    }

    Ok(())
}
