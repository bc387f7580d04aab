use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::kdf::DEFAULT_KDF_ITERATIONS;
use crate::errors::{Result, SesamError};
use crate::password::alphabet::MAX_COMPLEXITY;
use crate::password::engine::DEFAULT_ITERATIONS;
use crate::session::SessionOptions;
use crate::vault::domain::SettingDefaults;

/// Environment variable that overrides the data directory.
pub const HOME_ENV: &str = "SESAM_HOME";

/// User configuration, loaded from `<data_dir>/sesam.toml`.
///
/// Every field has a sensible default so SESAM works out-of-the-box
/// without any config file at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// PBKDF2 iterations for the vault key material.
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,

    /// Baseline iterations for password derivation.
    #[serde(default = "default_password_iterations")]
    pub password_iterations: u32,

    #[serde(default = "default_length")]
    pub default_length: usize,

    #[serde(default = "default_complexity")]
    pub default_complexity: u8,

    #[serde(default = "default_min_length")]
    pub min_length: usize,

    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// State file name inside the data directory.
    #[serde(default = "default_state_file")]
    pub state_file: String,

    #[serde(default)]
    pub sync: SyncSettings,
}

/// The `[sync]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_kdf_iterations() -> u32 {
    DEFAULT_KDF_ITERATIONS
}

fn default_password_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

fn default_length() -> usize {
    10
}

fn default_complexity() -> u8 {
    MAX_COMPLEXITY
}

fn default_min_length() -> usize {
    4
}

fn default_max_length() -> usize {
    40
}

fn default_state_file() -> String {
    "sesam.vault".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            kdf_iterations: default_kdf_iterations(),
            password_iterations: default_password_iterations(),
            default_length: default_length(),
            default_complexity: default_complexity(),
            min_length: default_min_length(),
            max_length: default_max_length(),
            state_file: default_state_file(),
            sync: SyncSettings::default(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            server_url: None,
            username: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Settings {
    /// Name of the config file inside the data directory.
    pub const FILE_NAME: &'static str = "sesam.toml";

    /// Load settings from `<data_dir>/sesam.toml`.
    ///
    /// If the file does not exist, defaults are returned. A file that
    /// cannot be parsed or holds inconsistent values is an error.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            SesamError::ConfigError(format!("Failed to parse {}: {e}", config_path.display()))
        })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Write the settings back to `<data_dir>/sesam.toml`.
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        self.validate()?;
        let contents = toml::to_string_pretty(self)
            .map_err(|e| SesamError::ConfigError(format!("Failed to serialize settings: {e}")))?;
        std::fs::create_dir_all(data_dir)?;
        std::fs::write(data_dir.join(Self::FILE_NAME), contents)?;
        Ok(())
    }

    /// Reject values that would make derivation impossible.
    pub fn validate(&self) -> Result<()> {
        if self.kdf_iterations == 0 || self.password_iterations == 0 {
            return Err(SesamError::ConfigError(
                "iteration counts must be at least 1".into(),
            ));
        }
        if self.default_complexity > MAX_COMPLEXITY {
            return Err(SesamError::ConfigError(format!(
                "default_complexity must be between 0 and {MAX_COMPLEXITY}"
            )));
        }
        if self.min_length == 0
            || self.min_length > self.default_length
            || self.default_length > self.max_length
        {
            return Err(SesamError::ConfigError(
                "lengths must satisfy 1 <= min_length <= default_length <= max_length".into(),
            ));
        }
        if self.state_file.trim().is_empty() {
            return Err(SesamError::ConfigError("state_file must not be empty".into()));
        }
        Ok(())
    }

    /// Check a requested password length against the configured bounds.
    pub fn check_length(&self, length: usize) -> Result<()> {
        if length < self.min_length || length > self.max_length {
            return Err(SesamError::InvalidPolicy(format!(
                "length must be between {} and {} (got {length})",
                self.min_length, self.max_length
            )));
        }
        Ok(())
    }

    /// Full path to the state file.
    pub fn state_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.state_file)
    }

    pub fn setting_defaults(&self) -> SettingDefaults {
        SettingDefaults {
            iterations: self.password_iterations,
            length: self.default_length,
            complexity: self.default_complexity,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            kdf_iterations: self.kdf_iterations,
            defaults: self.setting_defaults(),
        }
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.timeout_secs)
    }
}

/// Resolve the data directory: explicit flag, then `$SESAM_HOME`, then
/// `$HOME/.sesam`.
pub fn resolve_data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    std::env::var_os("HOME")
        .filter(|v| !v.is_empty())
        .map(|home| PathBuf::from(home).join(".sesam"))
        .ok_or_else(|| {
            SesamError::ConfigError(format!(
                "cannot locate a data directory: set {HOME_ENV} or HOME, or pass --data-dir"
            ))
        })
}

// ── Tests ────────────────────────────────────────────────────────────
