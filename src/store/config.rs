//! Configuration for the filesystem identity store

use crate::store::publish::{DescriptorLinkPublisher, PublishOrReplace, RenamePublisher};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use log::{info, warn};

pub const ROOT_ENV: &str = "IDENTITY_STORE_ROOT";
pub const VARIANT_ENV: &str = "IDENTITY_STORE_VARIANT";

/// Filesystem capability used to publish access-key indices
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlatformVariant {
    /// Atomic rename is the only create-or-replace primitive
    #[default]
    Generic,
    /// An open descriptor can be linked onto a path, replacing the target
    Clustered,
}

impl std::str::FromStr for PlatformVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "generic" | "posix" => Ok(PlatformVariant::Generic),
            "clustered" | "gpfs" => Ok(PlatformVariant::Clustered),
            _ => Err(format!("Unknown platform variant: {}", s))
        }
    }
}

impl fmt::Display for PlatformVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformVariant::Generic => write!(f, "generic"),
            PlatformVariant::Clustered => write!(f, "clustered"),
        }
    }
}

/// Store location, platform variant and creation modes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Root of the config directory
    pub root: PathBuf,
    /// Platform variant selecting the publish-or-replace primitive
    pub variant: PlatformVariant,
    /// Mode bits for newly created directories
    pub dir_mode: u32,
    /// Mode bits for newly created record files
    pub file_mode: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./config_dir"),
            variant: PlatformVariant::default(),
            dir_mode: 0o700,
            file_mode: 0o600,
        }
    }
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>, variant: PlatformVariant) -> Self {
        Self {
            root: root.into(),
            variant,
            ..Self::default()
        }
    }

    /// Apply `IDENTITY_STORE_ROOT` / `IDENTITY_STORE_VARIANT` on top of this configuration
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(root) = env::var(ROOT_ENV) {
            info!("Using store root from environment: {}", root);
            self.root = PathBuf::from(root);
        }
        if let Ok(variant_str) = env::var(VARIANT_ENV) {
            match variant_str.parse::<PlatformVariant>() {
                Ok(variant) => {
                    info!("Using platform variant from environment: {}", variant);
                    self.variant = variant;
                }
                Err(e) => {
                    warn!("Invalid platform variant in environment: {}. Keeping {}.", e, self.variant);
                }
            }
        }
        self
    }

    /// Create the publish-or-replace capability for the configured variant
    pub fn create_publisher(&self) -> Arc<dyn PublishOrReplace> {
        match self.variant {
            PlatformVariant::Generic => {
                info!("Using rename publisher for access key indices");
                Arc::new(RenamePublisher)
            }
            PlatformVariant::Clustered => {
                info!("Using descriptor-link publisher for access key indices");
                Arc::new(DescriptorLinkPublisher)
            }
        }
    }
}
