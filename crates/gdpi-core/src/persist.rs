//! Best-effort session state
//!
//! Last-used fragment preset, assist flags and the domain-group catalog are
//! cached as JSON between sessions. They are never required: a missing or
//! corrupt file loads as defaults, and write failures are reported to the
//! caller, which logs and moves on.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::grouping::DomainGroupCatalog;
use crate::options::BypassOptions;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Domain group catalog file name
pub const GROUPS_FILE: &str = "domain_groups.json";

/// Fragment preset choice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetChoice {
    /// Preset name
    pub name: String,
    /// Fragment sizes
    pub sizes: Vec<u16>,
}

/// Settings reused by the next session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedSettings {
    /// Last applied fragment preset
    pub last_preset: Option<PresetChoice>,
    /// Assist flag: drop UDP/443
    pub drop_udp443: bool,
    /// Assist flag: allow no SNI
    pub allow_no_sni: bool,
    /// Auto-adjust for the aggressive preset
    pub auto_adjust_aggressive: bool,
}

impl PersistedSettings {
    /// Capture the persistable parts of committed options
    pub fn from_options(options: &BypassOptions) -> Self {
        Self {
            last_preset: Some(PresetChoice {
                name: options.preset_name.clone(),
                sizes: options.fragment_sizes.clone(),
            }),
            drop_udp443: options.drop_udp443,
            allow_no_sni: options.allow_no_sni,
            auto_adjust_aggressive: options.auto_adjust_aggressive,
        }
    }

    /// Seed session options from the saved choices
    pub fn apply_to(&self, options: &mut BypassOptions) {
        if let Some(preset) = &self.last_preset {
            options.preset_name = preset.name.clone();
            options.fragment_sizes = preset.sizes.clone();
        }
        options.drop_udp443 = self.drop_udp443;
        options.allow_no_sni = self.allow_no_sni;
        options.auto_adjust_aggressive = self.auto_adjust_aggressive;
        options.normalize();
    }
}

/// JSON files under one state directory
///
/// A store without a directory is disabled: loads give defaults and saves
/// are no-ops.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    dir: Option<PathBuf>,
}

impl StateStore {
    /// Store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// Store that never touches disk
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    /// State directory, if enabled
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Load settings, falling back to defaults
    pub fn load_settings(&self) -> PersistedSettings {
        self.load_or_default(SETTINGS_FILE)
    }

    /// Save settings
    pub fn save_settings(&self, settings: &PersistedSettings) -> Result<()> {
        self.save(SETTINGS_FILE, settings)
    }

    /// Load the group catalog, falling back to defaults
    pub fn load_groups(&self) -> DomainGroupCatalog {
        self.load_or_default(GROUPS_FILE)
    }

    /// Save the group catalog
    pub fn save_groups(&self, catalog: &DomainGroupCatalog) -> Result<()> {
        self.save(GROUPS_FILE, catalog)
    }

    fn load_or_default<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        let Some(dir) = &self.dir else {
            return T::default();
        };
        let path = dir.join(name);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                debug!("No saved state at {}: {}", path.display(), e);
                return T::default();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Ignoring corrupt state file {}: {}", path.display(), e);
            T::default()
        })
    }

    /// Write through a temp file so a crash never leaves half a file
    fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        std::fs::create_dir_all(dir).map_err(|e| Error::persistence(dir.display().to_string(), e))?;

        let path = dir.join(name);
        let tmp = dir.join(format!("{name}.tmp"));
        let json = serde_json::to_string_pretty(value)?;
        std::fs::write(&tmp, json).map_err(|e| Error::persistence(tmp.display().to_string(), e))?;
        std::fs::rename(&tmp, &path).map_err(|e| Error::persistence(path.display().to_string(), e))?;
        debug!("Saved {}", path.display());
        Ok(())
    }
}
