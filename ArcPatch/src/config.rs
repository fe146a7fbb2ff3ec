//! Engine configuration (arcpatch.toml)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// File name of the configuration file
pub const CONFIG_FILE_NAME: &str = "arcpatch.toml";

fn default_compression_level() -> i64 {
    6
}

fn default_spool_threshold() -> usize {
    4 * 1024 * 1024
}

/// Full engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub library: LibrarySettings,
    #[serde(default)]
    pub apply: ApplySettings,
}

/// Resource store settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Deflate level for entries written into resource stores
    #[serde(default = "default_compression_level")]
    pub compression_level: i64,
    /// Bytes of one pending write kept in memory before spilling to disk
    #[serde(default = "default_spool_threshold")]
    pub spool_threshold: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            compression_level: default_compression_level(),
            spool_threshold: default_spool_threshold(),
        }
    }
}

/// Patch library settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl LibrarySettings {
    /// Configured library directory, or `<data dir>/arcpatch/patches`
    #[must_use]
    pub fn resolved_directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("arcpatch")
                .join("patches")
        })
    }
}

/// Apply-time settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplySettings {
    /// Recompute resource checksums while applying and warn on mismatch.
    /// Mismatches never reject a patch.
    #[serde(default)]
    pub verify_checksums: bool,
}

impl EngineConfig {
    /// Default config location: `<config dir>/arcpatch/arcpatch.toml`
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("arcpatch").join(CONFIG_FILE_NAME))
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration, falling back to defaults when the file does not exist
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save configuration as pretty TOML, creating parent directories
    ///
    /// # Errors
    /// Returns an error if serialization or writing fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}
