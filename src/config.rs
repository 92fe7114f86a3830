use crate::error::{FairlockError, Result};
use crate::locking::arbitration::SEQUENCE_SEPARATOR;
use crate::locking::timeout::{LockTimeoutValue, parse_timeout_override};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_PREFIX: &str = "FAIRLOCK";
pub const DEFAULT_NODE_PREFIX: &str = "lock-";
pub const DEFAULT_PARENT_CREATE_ATTEMPTS: u32 = 3;
const DEFAULT_WAIT_SLICE_MS: u64 = 50;
const DEFAULT_TIMEOUT: &str = "infinite";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FairlockConfig {
    #[serde(default)]
    pub locking: LockingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockingConfig {
    /// Name prefix of queue nodes; the service appends the sequence number.
    #[serde(default = "default_node_prefix")]
    pub node_prefix: String,

    /// Upper bound on create attempts while recovering a missing lock root.
    #[serde(default = "default_parent_create_attempts")]
    pub parent_create_attempts: u32,

    /// Tag node names with a per-attempt guid so a create whose reply was
    /// lost can be found again.
    #[serde(default = "default_protected_nodes")]
    pub protected_nodes: bool,

    /// `infinite`, whole seconds, or milliseconds (`250ms`).
    #[serde(default = "default_timeout")]
    pub timeout: String,

    /// How often a blocked waiter re-checks cancellation and its deadline.
    #[serde(default = "default_wait_slice_ms")]
    pub wait_slice_ms: u64,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            node_prefix: default_node_prefix(),
            parent_create_attempts: default_parent_create_attempts(),
            protected_nodes: default_protected_nodes(),
            timeout: default_timeout(),
            wait_slice_ms: default_wait_slice_ms(),
        }
    }
}

fn default_node_prefix() -> String {
    DEFAULT_NODE_PREFIX.to_string()
}

fn default_parent_create_attempts() -> u32 {
    DEFAULT_PARENT_CREATE_ATTEMPTS
}

fn default_protected_nodes() -> bool {
    true
}

fn default_timeout() -> String {
    DEFAULT_TIMEOUT.to_string()
}

fn default_wait_slice_ms() -> u64 {
    DEFAULT_WAIT_SLICE_MS
}

impl LockingConfig {
    pub fn timeout_value(&self) -> Result<LockTimeoutValue> {
        parse_timeout_override(&self.timeout)
            .map_err(|e| FairlockError::InvalidConfig(format!("locking.timeout: {e}")))
    }

    pub fn wait_slice(&self) -> Duration {
        Duration::from_millis(self.wait_slice_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_prefix.contains('/') || !self.node_prefix.ends_with(SEQUENCE_SEPARATOR) {
            return Err(FairlockError::InvalidConfig(format!(
                "locking.node_prefix must be a name without '/' ending in '{SEQUENCE_SEPARATOR}', \
                 got '{}'",
                self.node_prefix
            )));
        }
        if self.parent_create_attempts == 0 {
            return Err(FairlockError::InvalidConfig(
                "locking.parent_create_attempts must be at least 1".to_string(),
            ));
        }
        if self.wait_slice_ms == 0 {
            return Err(FairlockError::InvalidConfig(
                "locking.wait_slice_ms must be at least 1".to_string(),
            ));
        }
        self.timeout_value()?;
        Ok(())
    }
}

/// `<config dir>/fairlock/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("fairlock").join(CONFIG_FILE_NAME))
}

impl FairlockConfig {
    /// Layers built-in defaults, the optional TOML file at `path`, and
    /// `FAIRLOCK_*` variables (`FAIRLOCK_LOCKING__TIMEOUT=30`).
    ///
    /// `env` replaces the process environment when given.
    pub fn load_from(
        path: Option<&Path>,
        required: bool,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !required && !path.exists() {
                log::debug!("Config file not found at {path:?}, using defaults");
            }
            builder = builder.add_source(
                File::from(path.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(required),
            );
        }

        let mut environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__");
        if let Some(vars) = env {
            environment = environment.source(Some(vars));
        }
        builder = builder.add_source(environment);

        let config: FairlockConfig = builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| FairlockError::ConfigError(format!("Failed to load configuration: {e}")))?;

        config.locking.validate()?;
        log::debug!("Loaded locking configuration: {:?}", config.locking);
        Ok(config)
    }
}

/// Loads configuration for the CLI. An explicit `path` must exist; otherwise
/// the per-user default location is used when present.
pub fn new_fairlock_config(path: Option<&Path>) -> Result<FairlockConfig> {
    match path {
        Some(explicit) => FairlockConfig::load_from(Some(explicit), true, None),
        None => {
            let default_path = default_config_path();
            FairlockConfig::load_from(default_path.as_deref(), false, None)
        }
    }
}
