//! Scripting Configuration
//!
//! Layered with figment: compiled defaults, then an optional TOML file, then
//! `HOTSCRIPT_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use hotscript_types::Platform;
use serde::{Deserialize, Serialize};

/// Default configuration file name
pub const CONFIG_FILE: &str = "hotscript.toml";

#[derive(Debug, thiserror::Error)]
#[error("Failed to load configuration: {0}")]
pub struct ConfigError(#[from] figment::Error);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptingConfig {
    /// Scripts directory. `None` keeps the registry idle until switched.
    pub dirname: Option<PathBuf>,

    pub verbose: bool,

    /// Platform whose artifacts locally attached handles import
    pub target: Platform,

    /// Longest wait for a new script's first build round
    pub first_build_timeout_ms: u64,

    /// Window in which file changes are coalesced into one rebuild
    pub debounce_ms: u64,

    /// Wildcard patterns of relative paths left out of the tree
    pub ignore: Vec<String>,
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            dirname: None,
            verbose: false,
            target: Platform::Node,
            first_build_timeout_ms: 30_000,
            debounce_ms: 50,
            ignore: Vec::new(),
        }
    }
}

impl ScriptingConfig {
    /// Load defaults, `file` if it exists, then the environment
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let file = file.unwrap_or_else(|| Path::new(CONFIG_FILE));
        Self::figment(file).extract().map_err(ConfigError::from)
    }

    pub fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(ScriptingConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("HOTSCRIPT_"))
    }

    pub fn with_dirname(mut self, dirname: impl Into<PathBuf>) -> Self {
        self.dirname = Some(dirname.into());
        self
    }

    pub fn first_build_timeout(&self) -> Duration {
        Duration::from_millis(self.first_build_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
