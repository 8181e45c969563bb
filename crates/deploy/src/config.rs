//! Layered settings: `Shipyard.toml` merged with `SHIPYARD_*` environment overrides.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;

use crate::{
    credentials::EnvSource,
    error::ConfigError,
    network::{NetworkProfile, NetworkRegistry},
};

/// Default configuration file name.
pub const CONFIG_FILENAME: &str = "Shipyard.toml";

/// Prefix of environment variables overriding configuration keys (`SHIPYARD_CONFIRMATIONS=3`).
pub const ENV_PREFIX: &str = "SHIPYARD_";

/// Default number of confirmations to wait for.
pub const DEFAULT_CONFIRMATIONS: u64 = 1;

/// Default interval between receipt polls, in milliseconds.
pub const DEFAULT_RECEIPT_POLL_INTERVAL_MS: u64 = 2_000;

/// Solidity compiler settings used when a contract has no Hardhat build-info.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompilerSettings {
    /// Long solc version, e.g. `0.8.21+commit.d9974bed`. Explorers reject a short `0.8.21`.
    #[serde(default = "default_solc_version")]
    pub version: String,
    #[serde(default = "default_optimizer")]
    pub optimizer: bool,
    #[serde(default = "default_optimizer_runs")]
    pub runs: u32,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            version: default_solc_version(),
            optimizer: default_optimizer(),
            runs: default_optimizer_runs(),
        }
    }
}

/// How explorer verification status is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ExplorerPolling {
    #[serde(default = "default_explorer_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Status checks before giving up and reporting `Pending`.
    #[serde(default = "default_explorer_max_attempts")]
    pub max_attempts: usize,
}

impl Default for ExplorerPolling {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_explorer_poll_interval_secs(),
            max_attempts: default_explorer_max_attempts(),
        }
    }
}

impl ExplorerPolling {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Everything read from configuration at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Network profiles, declared as `[[networks]]`.
    #[serde(default)]
    pub networks: Vec<NetworkProfile>,
    #[serde(default)]
    pub compiler: CompilerSettings,
    /// Hardhat artifacts directory.
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Ceiling on the confirmation wait. Unbounded when absent.
    #[serde(default)]
    pub confirmation_timeout_secs: Option<u64>,
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    #[serde(default)]
    pub explorer: ExplorerPolling,
}

impl Settings {
    /// The figment stack for `path` (a file, or a directory holding [`CONFIG_FILENAME`]).
    ///
    /// A missing file is not an error: the environment alone may supply the settings.
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        let path = path.as_ref();
        let path = if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load settings from `path` and the environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let settings = Self::from_figment(Self::figment(path))?;

        tracing::info!(
            path = %path.display(),
            networks = settings.networks.len(),
            artifacts_dir = %settings.artifacts_dir.display(),
            "Configuration loaded"
        );

        Ok(settings)
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        Ok(figment.extract()?)
    }

    /// Build the network registry. Fails on an empty or inconsistent network table.
    pub fn registry(&self, env: &impl EnvSource) -> Result<NetworkRegistry, ConfigError> {
        NetworkRegistry::from_profiles(self.networks.clone(), env)
    }

    pub fn confirmation_timeout(&self) -> Option<Duration> {
        self.confirmation_timeout_secs.map(Duration::from_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

fn default_solc_version() -> String {
    "0.8.21+commit.d9974bed".to_string()
}

fn default_optimizer() -> bool {
    true
}

fn default_optimizer_runs() -> u32 {
    200
}

fn default_explorer_poll_interval_secs() -> u64 {
    5
}

fn default_explorer_max_attempts() -> usize {
    12
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_confirmations() -> u64 {
    DEFAULT_CONFIRMATIONS
}

fn default_receipt_poll_interval_ms() -> u64 {
    DEFAULT_RECEIPT_POLL_INTERVAL_MS
}
