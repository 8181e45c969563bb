//! Network profiles and the load-once registry that indexes them.

use std::{collections::BTreeMap, sync::Arc};

use alloy_core::primitives::Address;
use serde::Deserialize;
use url::Url;

use crate::{
    credentials::{CredentialSource, CredentialSpec, EnvSource, SecretString},
    error::ConfigError,
};

/// How the gas limit and gas price of a deployment transaction are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum GasPolicy {
    /// Ask the node for both values.
    Auto,
    /// Use the configured values verbatim. An omitted value is asked from the node.
    Fixed {
        #[serde(default)]
        gas_limit: Option<u64>,
        #[serde(default)]
        gas_price_wei: Option<u64>,
    },
}

/// Block explorer verification endpoint of a network.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExplorerProfile {
    /// Etherscan-compatible API endpoint, e.g. `https://scan.merlinchain.io/api`.
    pub api_base_url: String,
    /// Human facing explorer, e.g. `https://scan.merlinchain.io`.
    pub browser_base_url: String,
    #[serde(default)]
    pub api_key: SecretString,
    /// Environment variable overriding `api_key` when set and non-empty.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl ExplorerProfile {
    /// Browser URL of an address page.
    pub fn address_url(&self, address: &Address) -> String {
        format!(
            "{}/address/{}",
            self.browser_base_url.trim_end_matches('/'),
            address
        )
    }
}

/// Everything needed to deploy to, and verify on, one network.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NetworkProfile {
    pub name: String,
    pub rpc_url: String,
    pub chain_id: u64,
    /// Production network: configured default keys are refused unless explicitly allowed.
    #[serde(default)]
    pub mainnet: bool,
    /// Allow a configured key on a mainnet (emits `DEFAULT_CREDENTIAL_USED`).
    #[serde(default)]
    pub allow_default_credential: bool,
    pub gas: GasPolicy,
    pub credential: CredentialSpec,
    #[serde(default)]
    pub explorer: Option<ExplorerProfile>,
    /// Confirmations to wait for. Overrides the global setting.
    #[serde(default)]
    pub confirmations: Option<u64>,
}

impl NetworkProfile {
    /// Check the invariants a single profile must hold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.rpc_url).map_err(|e| ConfigError::InvalidRpcUrl {
            network: self.name.clone(),
            url: self.rpc_url.clone(),
            reason: e.to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidRpcUrl {
                network: self.name.clone(),
                url: self.rpc_url.clone(),
                reason: format!("unsupported scheme `{}`", url.scheme()),
            });
        }

        if let GasPolicy::Fixed {
            gas_limit: None,
            gas_price_wei: None,
        } = self.gas
        {
            return Err(ConfigError::InvalidGasPolicy {
                network: self.name.clone(),
                reason: "fixed mode needs gas_limit and/or gas_price_wei".to_string(),
            });
        }

        match self.credential.source {
            CredentialSource::Env if self.credential.env_var.is_none() => {
                return Err(ConfigError::InvalidCredentialSpec {
                    network: self.name.clone(),
                    reason: "env source needs env_var".to_string(),
                });
            }
            CredentialSource::Literal if !self.credential.has_fallback() => {
                return Err(ConfigError::InvalidCredentialSpec {
                    network: self.name.clone(),
                    reason: "literal source needs fallback_secret".to_string(),
                });
            }
            _ => {}
        }

        if self.mainnet && self.credential.has_fallback() && !self.allow_default_credential {
            return Err(ConfigError::FallbackSecretOnMainnet {
                network: self.name.clone(),
            });
        }

        if let Some(explorer) = &self.explorer {
            for url in [&explorer.api_base_url, &explorer.browser_base_url] {
                Url::parse(url).map_err(|e| ConfigError::InvalidRpcUrl {
                    network: self.name.clone(),
                    url: url.clone(),
                    reason: e.to_string(),
                })?;
            }
        }

        Ok(())
    }

    /// Confirmations for this network, falling back to `default`.
    pub fn confirmations_or(&self, default: u64) -> u64 {
        self.confirmations.unwrap_or(default).max(1)
    }
}

/// Immutable registry of network profiles, indexed by name.
///
/// Built once at startup; every lookup for the same name returns the same profile.
#[derive(Debug, Default)]
pub struct NetworkRegistry {
    profiles: BTreeMap<String, Arc<NetworkProfile>>,
}

impl NetworkRegistry {
    /// Validate `profiles` and build the registry.
    ///
    /// Explorer API keys named by `api_key_env` are read from `env` here, once.
    pub fn from_profiles(
        profiles: Vec<NetworkProfile>,
        env: &impl EnvSource,
    ) -> Result<Self, ConfigError> {
        if profiles.is_empty() {
            return Err(ConfigError::NoNetworks);
        }

        let mut by_name: BTreeMap<String, Arc<NetworkProfile>> = BTreeMap::new();
        let mut by_chain: BTreeMap<u64, String> = BTreeMap::new();

        for mut profile in profiles {
            profile.validate()?;

            if by_name.contains_key(&profile.name) {
                return Err(ConfigError::DuplicateNetwork { name: profile.name });
            }

            if let Some(first) = by_chain.get(&profile.chain_id) {
                return Err(ConfigError::DuplicateChainId {
                    chain_id: profile.chain_id,
                    first: first.clone(),
                    second: profile.name,
                });
            }

            if let Some(explorer) = profile.explorer.as_mut() {
                let from_env = explorer
                    .api_key_env
                    .as_deref()
                    .and_then(|var| env.var(var))
                    .filter(|key| !key.trim().is_empty());
                if let Some(key) = from_env {
                    explorer.api_key = SecretString::new(key);
                }
            }

            tracing::debug!(
                network = %profile.name,
                chain_id = profile.chain_id,
                rpc_url = %profile.rpc_url,
                explorer = profile.explorer.is_some(),
                "Registered network profile"
            );

            by_chain.insert(profile.chain_id, profile.name.clone());
            by_name.insert(profile.name.clone(), Arc::new(profile));
        }

        Ok(Self { profiles: by_name })
    }

    /// Look up a profile by name.
    pub fn get_profile(&self, name: &str) -> Result<Arc<NetworkProfile>, ConfigError> {
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownNetwork {
                name: name.to_string(),
            })
    }

    /// Look up a profile by chain id.
    pub fn by_chain_id(&self, chain_id: u64) -> Option<Arc<NetworkProfile>> {
        self.profiles
            .values()
            .find(|p| p.chain_id == chain_id)
            .cloned()
    }

    /// Profiles in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<NetworkProfile>> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
