//! Config module for resman

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::install::ManagerConfig;

#[derive(Parser, Debug, Clone)]
pub struct StorageConfig {
    /// Directory add-ons are installed into
    #[clap(long, env = "RESMAN_ADDON_DIR", default_value_t = get_default_data_path("addons"))]
    pub addon_dir: String,

    /// Directory scripts are installed into
    #[clap(long, env = "RESMAN_SCRIPT_DIR", default_value_t = get_default_data_path("scripts"))]
    pub script_dir: String,

    /// Scratch directory for downloaded archives, they are deleted after use
    #[clap(long, env = "RESMAN_TEMP_DIR", default_value_t = get_default_temp_path())]
    pub temp_dir: String,
}

/// `<data dir>/resman/<name>`, or a relative path if there is no data dir
fn get_default_data_path(name: &str) -> String {
    dirs::data_dir()
        .map(|data| data.join("resman").join(name))
        .and_then(|path| path.to_str().map(String::from))
        .unwrap_or_else(|| format!("resman/{name}"))
}

fn get_default_temp_path() -> String {
    let path = std::env::temp_dir().join("resman");
    path.to_str()
        .map(String::from)
        .unwrap_or_else(|| "/tmp/resman".to_string())
}

impl From<&StorageConfig> for ManagerConfig {
    fn from(config: &StorageConfig) -> Self {
        ManagerConfig::new(
            PathBuf::from(&config.addon_dir),
            PathBuf::from(&config.script_dir),
            PathBuf::from(&config.temp_dir),
        )
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List installed add-ons and scripts
    List,
    /// Download and install the resource described by a description record
    Install {
        /// Path to a description.json
        descriptor: PathBuf,
    },
    /// Remove an installed resource
    Uninstall { descriptor: PathBuf },
    /// Show whether a resource is installed
    State { descriptor: PathBuf },
}

#[derive(Parser, Debug, Clone)]
#[clap(version, about)]
pub struct Config {
    #[clap(flatten)]
    pub storage: StorageConfig,

    #[clap(subcommand)]
    pub command: Command,
}

pub fn config() -> Config {
    Config::parse()
}
