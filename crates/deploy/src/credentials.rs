//! Signer resolution for network profiles.
//!
//! A [`CredentialSpec`] says where the deployer key of a network comes from. Resolution is a
//! pure function of the credential spec and an [`EnvSource`]: the environment variable wins when it is set
//! and non-empty, otherwise the configured fallback secret is used, otherwise resolution fails.

use std::{collections::HashMap, fmt};

use alloy_core::primitives::{Address, B256};
use alloy_signer_local::PrivateKeySigner;
use k256::{
    ecdsa::{RecoveryId, Signature, SigningKey},
    elliptic_curve::zeroize::Zeroize,
};
use serde::Deserialize;

use crate::{error::CredentialError, network::NetworkProfile};

/// Signal emitted when a fallback key is used for a mainnet profile.
pub const DEFAULT_CREDENTIAL_USED: &str = "DEFAULT_CREDENTIAL_USED";

/// Read access to environment variables.
pub trait EnvSource: Send + Sync {
    /// Returns the value of `key`, if set.
    fn var(&self, key: &str) -> Option<String>;
}

/// The environment of the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// A string that never shows up in `Debug` output and is wiped on drop.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl Drop for SecretString {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Where the private key of a network comes from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CredentialSource {
    /// Read the key from an environment variable, falling back to `fallback_secret`.
    Env,
    /// Use `fallback_secret` as is.
    Literal,
}

/// Credential declaration of a network profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CredentialSpec {
    pub source: CredentialSource,
    /// Name of the environment variable holding the key (`env` source).
    #[serde(default)]
    pub env_var: Option<String>,
    /// Key used when the environment does not provide one (or the literal key).
    #[serde(default)]
    pub fallback_secret: Option<SecretString>,
}

impl CredentialSpec {
    pub fn env(var: impl Into<String>) -> Self {
        Self {
            source: CredentialSource::Env,
            env_var: Some(var.into()),
            fallback_secret: None,
        }
    }

    pub fn literal(secret: impl Into<String>) -> Self {
        Self {
            source: CredentialSource::Literal,
            env_var: None,
            fallback_secret: Some(SecretString::new(secret)),
        }
    }

    pub fn with_fallback(mut self, secret: impl Into<String>) -> Self {
        self.fallback_secret = Some(SecretString::new(secret));
        self
    }

    /// Whether resolution can end up on a key stored in configuration.
    pub fn has_fallback(&self) -> bool {
        self.fallback_secret.as_ref().is_some_and(|s| !s.is_empty())
    }
}

/// A secp256k1 key bound to its derived address.
///
/// The key material lives inside the [`SigningKey`], which is zeroized on drop.
pub struct Signer {
    key: PrivateKeySigner,
}

impl Signer {
    /// Parse a hex encoded private key (with or without `0x`).
    pub fn from_secret(network: &str, secret: &str) -> Result<Self, CredentialError> {
        let secret = secret.trim();
        let secret = secret.strip_prefix("0x").unwrap_or(secret);

        let invalid = |reason: &str| CredentialError::InvalidKey {
            network: network.to_string(),
            reason: reason.to_string(),
        };

        let mut bytes = hex::decode(secret).map_err(|_| invalid("not a hex string"))?;
        if bytes.len() != 32 {
            bytes.zeroize();
            return Err(invalid("expected 32 bytes"));
        }

        let key = SigningKey::from_slice(&bytes);
        bytes.zeroize();
        let key = key.map_err(|_| invalid("not a valid secp256k1 scalar"))?;

        Ok(Self {
            key: PrivateKeySigner::from_signing_key(key),
        })
    }

    /// The address derived from the public key.
    pub fn address(&self) -> Address {
        self.key.address()
    }

    /// Sign a 32-byte digest, returning the signature and its recovery id.
    pub(crate) fn sign_hash(
        &self,
        hash: &B256,
    ) -> Result<(Signature, RecoveryId), k256::ecdsa::Error> {
        self.key.credential().sign_prehash_recoverable(hash.as_slice())
    }

    #[cfg(test)]
    pub(crate) fn verifying_key(&self) -> k256::ecdsa::VerifyingKey {
        *self.key.credential().verifying_key()
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Where a resolved key came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialOrigin {
    Environment { var: String },
    Fallback,
    Literal,
}

/// A signer together with how it was obtained.
#[derive(Debug)]
pub struct ResolvedCredential {
    pub signer: Signer,
    pub origin: CredentialOrigin,
    /// Set when a configured key was used for a mainnet profile.
    pub default_used: bool,
}

/// Resolves signers from credential specs.
#[derive(Debug, Clone, Default)]
pub struct CredentialResolver<E = ProcessEnv> {
    env: E,
}

impl<E: EnvSource> CredentialResolver<E> {
    pub fn new(env: E) -> Self {
        Self { env }
    }

    /// Resolve the signer for `profile`, applying its mainnet policy.
    pub fn resolve(&self, profile: &NetworkProfile) -> Result<ResolvedCredential, CredentialError> {
        let resolved = self.resolve_spec(&profile.name, &profile.credential)?;

        if matches!(resolved.origin, CredentialOrigin::Environment { .. }) {
            return Ok(resolved);
        }

        if !profile.mainnet {
            return Ok(resolved);
        }

        if !profile.allow_default_credential {
            return Err(CredentialError::DefaultCredentialRejected {
                network: profile.name.clone(),
            });
        }

        tracing::warn!(
            signal = DEFAULT_CREDENTIAL_USED,
            network = %profile.name,
            address = %resolved.signer.address(),
            "Deploying to a mainnet with a configured default key"
        );

        Ok(ResolvedCredential {
            default_used: true,
            ..resolved
        })
    }

    /// Resolve a credential spec without any network policy.
    pub fn resolve_spec(
        &self,
        network: &str,
        spec: &CredentialSpec,
    ) -> Result<ResolvedCredential, CredentialError> {
        if spec.source == CredentialSource::Env {
            if let Some(var) = spec.env_var.as_deref() {
                if let Some(resolved) = self.from_env(network, var)? {
                    return Ok(resolved);
                }
            }
        }

        let Some(secret) = spec.fallback_secret.as_ref().filter(|s| !s.is_empty()) else {
            return Err(CredentialError::NoCredentialAvailable {
                network: network.to_string(),
            });
        };

        let signer = Signer::from_secret(network, secret.expose())?;
        let origin = match spec.source {
            CredentialSource::Env => CredentialOrigin::Fallback,
            CredentialSource::Literal => CredentialOrigin::Literal,
        };

        tracing::debug!(network, origin = ?origin, address = %signer.address(), "Signer resolved from configuration");

        Ok(ResolvedCredential {
            signer,
            origin,
            default_used: false,
        })
    }

    /// Signer from `var`, or `None` when the variable is unset or blank.
    fn from_env(
        &self,
        network: &str,
        var: &str,
    ) -> Result<Option<ResolvedCredential>, CredentialError> {
        let Some(mut value) = self.env.var(var) else {
            return Ok(None);
        };

        if value.trim().is_empty() {
            value.zeroize();
            return Ok(None);
        }

        let signer = Signer::from_secret(network, &value);
        value.zeroize();
        let signer = signer?;

        tracing::debug!(network, env_var = var, address = %signer.address(), "Signer resolved from environment");

        Ok(Some(ResolvedCredential {
            signer,
            origin: CredentialOrigin::Environment {
                var: var.to_string(),
            },
            default_used: false,
        }))
    }
}
