//! Resource descriptors
//!
//! A [`ResourceItem`] describes one downloadable add-on or script package. The same
//! structure is persisted next to the installed content as a description record
//! (`description.json`) so the catalog can rebuild it later.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// File name of the description record stored at the top of every installed item
pub const DESCRIPTION_FILE: &str = "description.json";

/// Kind of a resource, which decides where it gets installed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Installed under the add-on root
    Addon,
    /// Installed under the script root
    Script,
    /// Older releases recorded scripts as `"scripts"` and installed them under the
    /// add-on root. Only ever read back from disk; the catalog migrates these.
    #[serde(rename = "scripts")]
    LegacyScripts,
}

impl ResourceKind {
    /// Collapse the legacy marker into [`ResourceKind::Script`]
    pub fn normalized(self) -> Self {
        match self {
            Self::LegacyScripts => Self::Script,
            other => other,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Addon => write!(f, "addon"),
            Self::Script => write!(f, "script"),
            Self::LegacyScripts => write!(f, "scripts"),
        }
    }
}

/// Lifecycle state of a resource. Always derived, never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ResourceState {
    #[default]
    None,
    Downloading,
    Installed,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "not installed"),
            Self::Downloading => write!(f, "downloading"),
            Self::Installed => write!(f, "installed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceItem {
    /// Stable identity, also the name of the directory the item is installed into
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    /// Location of the zip archive
    pub url: Url,
    /// Entry point relative to the install directory, scripts only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl ResourceItem {
    /// Creates a new `ResourceItem` with no display metadata
    pub fn new(id: impl Into<String>, kind: ResourceKind, url: Url) -> Self {
        Self {
            id: id.into(),
            kind,
            url,
            main_script: None,
            name: None,
            description: None,
            authors: Vec::new(),
            image: None,
        }
    }

    pub fn with_main_script(mut self, main_script: impl Into<String>) -> Self {
        self.main_script = Some(main_script.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name of the runnable entry point, if this is a script that has one
    pub fn entry_point(&self) -> Option<&str> {
        if self.kind.normalized() != ResourceKind::Script {
            return None;
        }
        self.main_script.as_deref().filter(|name| !name.is_empty())
    }

    /// Whether the id can be used as an install directory name: exactly one plain
    /// path component, so joining it onto a root never leaves that root.
    pub fn has_valid_id(&self) -> bool {
        let id = self.id.as_str();
        !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\', ':'])
    }

    /// Display name, falling back to the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Serialize into the description record format
    pub fn to_record(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a description record.
    ///
    /// Foreign or corrupted content yields `None` instead of an error, so callers
    /// scanning arbitrary directories can simply skip it.
    #[tracing::instrument(level = "trace", skip(content))]
    pub fn try_parse(content: &str) -> Option<Self> {
        match serde_json::from_str::<Self>(content) {
            Ok(item) if item.has_valid_id() => Some(item),
            Ok(item) => {
                tracing::trace!(id = %item.id, "Description record has an unusable id");
                None
            }
            Err(e) => {
                tracing::trace!(error = %e, "Failed to parse description record");
                None
            }
        }
    }
}
