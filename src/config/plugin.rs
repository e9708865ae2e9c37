//! Plugin-wide configuration service
//!
//! Holds global settings and the configs of every overlay, persisted as JSON
//! under the user's config directory. Overlays resolve their config here when
//! the host does not hand one in.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::overlay::{OverlayConfig, OverlayConfigData};
use crate::constants;

/// Settings that apply to the whole host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    /// Update tick interval in milliseconds
    pub update_interval_ms: u64,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            update_interval_ms: constants::timing::UPDATE_INTERVAL.as_millis() as u64,
        }
    }
}

/// On-disk layout
#[derive(Debug, Default, Deserialize)]
struct PluginConfigFile {
    #[serde(default)]
    global: GlobalSettings,
    #[serde(default)]
    overlays: Vec<OverlayConfig>,
}

/// Point-in-time copy written by [`PluginConfig::save`]
#[derive(Serialize)]
struct PluginConfigSnapshot {
    global: GlobalSettings,
    overlays: Vec<OverlayConfigData>,
}

#[derive(Debug)]
pub struct PluginConfig {
    path: PathBuf,
    global: RwLock<GlobalSettings>,
    overlays: RwLock<Vec<Arc<OverlayConfig>>>,
}

impl PluginConfig {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(constants::config::APP_DIR);
        path.push(constants::config::FILENAME);
        path
    }

    /// Empty config that will be written to `path` on save
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            global: RwLock::new(GlobalSettings::default()),
            overlays: RwLock::new(Vec::new()),
        }
    }

    /// Load from `path`; a missing file yields an empty config
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, starting with defaults");
            return Ok(Self::new(path));
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let file: PluginConfigFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config JSON from {}", path.display()))?;

        info!(path = %path.display(), overlays = file.overlays.len(), "Loaded plugin config");
        Ok(Self {
            path,
            global: RwLock::new(file.global),
            overlays: RwLock::new(file.overlays.into_iter().map(Arc::new).collect()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn global(&self) -> GlobalSettings {
        self.global.read().clone()
    }

    pub fn set_global(&self, global: GlobalSettings) {
        *self.global.write() = global;
    }

    pub fn overlays(&self) -> Vec<Arc<OverlayConfig>> {
        self.overlays.read().clone()
    }

    pub fn overlay(&self, name: &str) -> Option<Arc<OverlayConfig>> {
        self.overlays.read().iter().find(|config| config.name() == name).cloned()
    }

    /// Config for `name`, creating it with `factory` when none exists yet
    pub fn overlay_or_insert_with(
        &self,
        name: &str,
        factory: impl FnOnce(&str) -> OverlayConfig,
    ) -> Arc<OverlayConfig> {
        let mut overlays = self.overlays.write();
        if let Some(existing) = overlays.iter().find(|config| config.name() == name) {
            return existing.clone();
        }
        let config = Arc::new(factory(name));
        overlays.push(config.clone());
        info!(overlay = %name, "Created default overlay config");
        config
    }

    pub fn remove_overlay(&self, name: &str) -> bool {
        let mut overlays = self.overlays.write();
        let before = overlays.len();
        overlays.retain(|config| config.name() != name);
        before != overlays.len()
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
        }

        let snapshot = PluginConfigSnapshot {
            global: self.global(),
            overlays: self.overlays.read().iter().map(|config| config.snapshot()).collect(),
        };
        let json = serde_json::to_string_pretty(&snapshot).context("Failed to serialize config to JSON")?;

        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write config to {}", self.path.display()))?;
        info!(path = %self.path.display(), "Saved plugin config");
        Ok(())
    }

    /// Save, logging instead of failing; used on shutdown paths
    pub fn save_or_warn(&self) {
        if let Err(e) = self.save() {
            warn!(path = %self.path.display(), error = ?e, "Failed to save plugin config");
        }
    }
}
