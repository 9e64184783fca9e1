//! Updater configuration.
//!
//! Loaded from JSON; every field has a default so a partial file is valid:
//!
//! ```json
//! {
//!   "read_only_path": "/opt/game/data",
//!   "read_write_path": "/home/user/.local/share/game",
//!   "update_prefix_uri": "https://cdn.example.com/res/1.4",
//!   "current_variant": "hd",
//!   "max_retries": 5
//! }
//! ```

use crate::constants::{
    DEFAULT_APPLY_BUDGET_PER_TICK, DEFAULT_MAX_RETRIES, DEFAULT_PERSIST_THRESHOLD_BYTES,
    DEFAULT_VERIFY_BYTES_PER_TICK,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings for a [`crate::ResourceUpdater`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Shipped, immutable storage area.
    pub read_only_path: PathBuf,
    /// Mutable storage area receiving updates.
    pub read_write_path: PathBuf,
    /// Base URI that remote file names are appended to.
    pub update_prefix_uri: String,
    /// Variant selected for this install; `None` accepts only universal resources.
    pub current_variant: Option<String>,
    /// Keep read-write copies of resources that belong to other variants.
    pub ignore_other_variant: bool,
    /// Download retries per resource before it is failed.
    pub max_retries: u32,
    /// Completed-but-unrecorded bytes that force a manifest rewrite.
    pub persist_threshold_bytes: u64,
    /// Bytes hashed per verifier tick.
    pub verify_bytes_per_tick: u64,
    /// Pack entries extracted per orchestrator tick.
    pub apply_budget_per_tick: usize,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        let base = Self::default_base();
        Self {
            read_only_path: base.join("read_only"),
            read_write_path: base.join("read_write"),
            update_prefix_uri: String::new(),
            current_variant: None,
            ignore_other_variant: false,
            max_retries: DEFAULT_MAX_RETRIES,
            persist_threshold_bytes: DEFAULT_PERSIST_THRESHOLD_BYTES,
            verify_bytes_per_tick: DEFAULT_VERIFY_BYTES_PER_TICK,
            apply_budget_per_tick: DEFAULT_APPLY_BUDGET_PER_TICK,
        }
    }
}

impl UpdaterConfig {
    /// Returns the default storage base directory.
    fn default_base() -> PathBuf {
        if let Some(data) = dirs::data_local_dir() {
            data.join("resync")
        } else {
            PathBuf::from(".resync")
        }
    }

    /// Creates a config rooted at the given areas, with default budgets.
    pub fn with_paths(read_only_path: PathBuf, read_write_path: PathBuf) -> Self {
        Self {
            read_only_path,
            read_write_path,
            ..Self::default()
        }
    }

    /// Reads and validates a JSON config file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects budgets that would stall the engine.
    pub fn validate(&self) -> Result<()> {
        if self.verify_bytes_per_tick == 0 {
            return Err(Error::InvalidConfig(
                "verify_bytes_per_tick must be positive".to_string(),
            ));
        }
        if self.apply_budget_per_tick == 0 {
            return Err(Error::InvalidConfig(
                "apply_budget_per_tick must be positive".to_string(),
            ));
        }
        if self.read_only_path == self.read_write_path {
            return Err(Error::InvalidConfig(
                "read-only and read-write areas must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Joins a remote file name onto the update prefix.
    pub fn remote_uri(&self, file_name: &str) -> String {
        join_uri(&self.update_prefix_uri, file_name)
    }
}

/// Joins `file_name` onto `prefix` with exactly one separator.
pub(crate) fn join_uri(prefix: &str, file_name: &str) -> String {
    if prefix.is_empty() {
        return file_name.to_string();
    }
    format!("{}/{}", prefix.trim_end_matches('/'), file_name)
}
