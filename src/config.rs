//! Tool configuration
//!
//! Both command line tools read an optional TOML file. Every field has a
//! default, so an empty file (or none at all) is a valid configuration.
//!
//! ```toml
//! [format]
//! sector_size = 1024
//!
//! [mount]
//! fsname = "marfs"
//! read_only = false
//! allow_other = false
//! auto_unmount = true
//! attr_ttl_secs = 1
//! cache_sectors = 64
//! ```

use crate::error::{MarfsError, Result};
use crate::header::{validate_sector_size, DEFAULT_SECTOR_SIZE};
use crate::volume::{VolumeOptions, DEFAULT_CACHE_SECTORS};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub format: FormatConfig,
    pub mount: MountConfig,
}

/// Settings for the format tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormatConfig {
    /// Sector size in bytes, a power of two in 128..=65536
    pub sector_size: u32,
}

impl Default for FormatConfig {
    fn default() -> Self {
        FormatConfig {
            sector_size: DEFAULT_SECTOR_SIZE,
        }
    }
}

/// Settings for the mount tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MountConfig {
    /// Name shown as the mount source
    pub fsname: String,
    pub read_only: bool,
    pub allow_other: bool,
    pub auto_unmount: bool,

    /// How long the kernel may cache attributes and lookups
    pub attr_ttl_secs: u64,

    /// Sector cache capacity; 0 disables it
    pub cache_sectors: usize,
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            fsname: "marfs".to_string(),
            read_only: false,
            allow_other: false,
            auto_unmount: true,
            attr_ttl_secs: 1,
            cache_sectors: DEFAULT_CACHE_SECTORS,
        }
    }
}

impl MountConfig {
    pub fn volume_options(&self) -> VolumeOptions {
        VolumeOptions {
            cache_sectors: self.cache_sectors,
            read_only: self.read_only,
        }
    }
}

impl Config {
    /// Read and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml(&text)?;
        tracing::debug!("loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Parse and validate a configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_sector_size(self.format.sector_size)?;

        if self.mount.fsname.is_empty() || self.mount.fsname.contains(',') {
            return Err(MarfsError::InvalidArgument(format!(
                "invalid fsname {:?}",
                self.mount.fsname
            )));
        }

        Ok(())
    }
}
