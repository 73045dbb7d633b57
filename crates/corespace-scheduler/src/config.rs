//! Scheduler configuration: per-host ceilings and shared-storage layout.
//!
//! Built once at startup (usually from a TOML file) and shared read-only by
//! every scheduler through an `Arc`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating a [`SchedulerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum instance cores per host.
    pub max_cores: u64,
    /// Maximum volume gigabytes per host. Validated but not enforced:
    /// volumes are admitted on cluster-wide disk alone.
    pub max_gigabytes: u64,
    /// Maximum network bindings per host.
    pub max_networks: u64,
    /// Mount point probed for raw shared-storage capacity.
    pub shared_storage_folder: PathBuf,
    /// Space held back for disk images, in gigabytes.
    pub disk_images_size_gb: u64,
    /// Images live on the same filesystem as workload storage.
    pub images_share_storage: bool,
    /// Image corpus directory. Defaults to `shared_storage_folder`.
    pub image_dir: Option<PathBuf>,
    /// Files in `image_dir` whose names match this count as images.
    pub image_name_pattern: String,
    /// Heartbeat freshness window for service liveness.
    pub service_down_time_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_cores: 16,
            max_gigabytes: 10_000,
            max_networks: 1000,
            shared_storage_folder: PathBuf::from("/var/lib/glance/images"),
            disk_images_size_gb: 20,
            images_share_storage: false,
            image_dir: None,
            image_name_pattern: "^[0-9]+".to_string(),
            service_down_time_secs: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: SchedulerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no request could ever be admitted under.
    pub fn validate(&self) -> ConfigResult<()> {
        for (name, value) in [
            ("max_cores", self.max_cores),
            ("max_gigabytes", self.max_gigabytes),
            ("max_networks", self.max_networks),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        regex::Regex::new(&self.image_name_pattern).map_err(|e| {
            ConfigError::Invalid(format!(
                "image_name_pattern {:?}: {e}",
                self.image_name_pattern
            ))
        })?;
        Ok(())
    }

    pub fn image_dir(&self) -> &Path {
        self.image_dir
            .as_deref()
            .unwrap_or(&self.shared_storage_folder)
    }

    pub fn service_down_time(&self) -> Duration {
        Duration::from_secs(self.service_down_time_secs)
    }
}
