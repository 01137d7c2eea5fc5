//! Deployed Address Registry
//!
//! JSON file mapping a contract key to its deployed address and network, used to
//! hand addresses from deployment runs to the coordinator:
//!
//! ```json
//! { "HTLC": { "address": "0x...", "network": "sepolia" } }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// One registry entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub address: String,
    #[serde(default)]
    pub network: String,
}

/// Key → address registry backed by a JSON file
#[derive(Debug, Clone)]
pub struct AddressRegistry {
    path: PathBuf,
    entries: BTreeMap<String, RegistryEntry>,
}

impl AddressRegistry {
    /// Loads the registry; a missing file yields an empty registry.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read address registry {}", path.display()))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse address registry {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    pub fn get(&self, key: &str) -> Option<&RegistryEntry> {
        self.entries.get(key)
    }

    /// Address for `key`, if present.
    pub fn address(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|e| e.address.as_str())
    }

    /// Inserts or replaces an entry (in memory; call `save` to persist).
    pub fn record(&mut self, key: impl Into<String>, address: impl Into<String>, network: impl Into<String>) {
        let key = key.into();
        let entry = RegistryEntry {
            address: address.into(),
            network: network.into(),
        };
        info!("Registry: {} -> {} ({})", key, entry.address, entry.network);
        self.entries.insert(key, entry);
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let content = serde_json::to_string_pretty(&self.entries)
            .context("Failed to serialize address registry")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write address registry {}", self.path.display()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
