mod profile;

pub use profile::ProfileConfig;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::cdp::ProtocolVersion;
use crate::error::{NodemarkError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub session: SessionConfig,

    /// Named profiles
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Default profile name
    #[serde(default = "default_profile_name")]
    pub default_profile: String,

    /// Debugger protocol version requested on attach
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            default_profile: default_profile_name(),
            protocol_version: ProtocolVersion::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Enable the DOM domain right after attaching
    #[serde(default = "default_true")]
    pub enable_dom_on_attach: bool,

    /// Deadline for each top-level operation; unset means wait forever
    #[serde(default)]
    pub operation_timeout_ms: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enable_dom_on_attach: true,
            operation_timeout_ms: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_profile_name() -> String {
    "nodemark".to_string()
}

fn normalize_default_profile_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        default_profile_name()
    } else {
        trimmed.to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(default_profile_name(), ProfileConfig::default());

        Self {
            browser: BrowserConfig::default(),
            session: SessionConfig::default(),
            profiles,
        }
    }
}

impl Config {
    pub fn effective_default_profile_name(&self) -> String {
        normalize_default_profile_name(&self.browser.default_profile)
    }

    /// Load configuration from all sources (defaults, file, env)
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load with `path` as the config file. A missing file is not an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            // NODEMARK_SESSION__OPERATION_TIMEOUT_MS=5000
            .merge(Env::prefixed("NODEMARK_").split("__"))
            .extract()
            .map_err(|e| NodemarkError::ConfigError(e.to_string()))
    }

    /// Get the configuration file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nodemark")
            .join("config.toml")
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| NodemarkError::ConfigError(e.to_string()))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get a profile by name, falling back to an implicit default profile
    pub fn get_profile(&self, name: &str) -> Result<ProfileConfig> {
        let normalized_name = name.trim();

        if let Some(profile) = self.profiles.get(normalized_name) {
            return Ok(profile.clone());
        }

        if normalized_name == self.effective_default_profile_name() {
            return Ok(ProfileConfig::default());
        }

        Err(NodemarkError::ProfileNotFound(normalized_name.to_string()))
    }

    pub fn set_profile(&mut self, name: &str, profile: ProfileConfig) {
        self.profiles.insert(name.to_string(), profile);
    }
}
