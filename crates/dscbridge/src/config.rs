//! Process configuration, resolved once at startup.
//!
//! Handlers receive it through [`crate::resource::ResourceContext`]; nothing
//! mutates it after construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bridge::ByteOrder;

/// Installation root used when `OMI_HOME` is unset or empty.
pub const DEFAULT_OMI_HOME: &str = "/opt/omi";

pub const OMI_HOME_ENV: &str = "OMI_HOME";
pub const SCRIPTS_DIR_ENV: &str = "DSCBRIDGE_SCRIPTS_DIR";
pub const BYTE_ORDER_ENV: &str = "DSCBRIDGE_BYTE_ORDER";
pub const HANDLER_TIMEOUT_ENV: &str = "DSCBRIDGE_HANDLER_TIMEOUT_SECS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DSCBRIDGE_BYTE_ORDER: {0}")]
    InvalidByteOrder(String),

    #[error("DSCBRIDGE_HANDLER_TIMEOUT_SECS: invalid value '{0}', expected whole seconds")]
    InvalidTimeout(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Installation root of the host.
    pub omi_home: PathBuf,
    /// Directory holding script resources.
    pub scripts_dir: PathBuf,
    /// Integer byte order agreed with the host.
    pub byte_order: ByteOrder,
    /// Upper bound for one handler call. `None` waits forever.
    pub handler_timeout: Option<Duration>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new(DEFAULT_OMI_HOME)
    }
}

impl BridgeConfig {
    pub fn new(omi_home: impl Into<PathBuf>) -> Self {
        let omi_home = omi_home.into();
        Self {
            scripts_dir: default_scripts_dir(&omi_home),
            omi_home,
            byte_order: ByteOrder::default(),
            handler_timeout: None,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from a variable lookup. Empty values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = Self::new(get(OMI_HOME_ENV).unwrap_or_else(|| DEFAULT_OMI_HOME.into()));

        if let Some(dir) = get(SCRIPTS_DIR_ENV) {
            config.scripts_dir = PathBuf::from(dir);
        }
        if let Some(order) = get(BYTE_ORDER_ENV) {
            config.byte_order = order.trim().parse().map_err(ConfigError::InvalidByteOrder)?;
        }
        if let Some(raw) = get(HANDLER_TIMEOUT_ENV) {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidTimeout(raw.clone()))?;
            // 0 disables the watchdog.
            config.handler_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        Ok(config)
    }

    pub fn with_scripts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scripts_dir = dir.into();
        self
    }

    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    /// `$OMI_HOME/var/run/dscbridge/<uid>/dsc_bridge.pid`
    pub fn pid_file(&self, uid: u32) -> PathBuf {
        self.omi_home
            .join("var/run/dscbridge")
            .join(uid.to_string())
            .join("dsc_bridge.pid")
    }
}

fn default_scripts_dir(omi_home: &Path) -> PathBuf {
    omi_home.join("lib/Scripts/resources")
}
