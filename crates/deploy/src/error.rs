//! Error taxonomy for a deployment run.
//!
//! Each stage of a run has its own error type. [`RunError`] wraps them together with the
//! network name, contract id and the stage the run had reached, so a failure can be logged
//! and acted upon without re-running anything.

use std::time::Duration;

use alloy_core::primitives::B256;
use thiserror::Error;

use crate::orchestrator::RunStage;

/// Errors raised while loading or querying network profiles.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown network `{name}`")]
    UnknownNetwork { name: String },

    #[error("network `{name}` is declared more than once")]
    DuplicateNetwork { name: String },

    #[error("chain id {chain_id} is used by both `{first}` and `{second}`")]
    DuplicateChainId {
        chain_id: u64,
        first: String,
        second: String,
    },

    #[error("network `{network}` has an invalid rpc url `{url}`: {reason}")]
    InvalidRpcUrl {
        network: String,
        url: String,
        reason: String,
    },

    #[error("network `{network}` has an invalid gas policy: {reason}")]
    InvalidGasPolicy { network: String, reason: String },

    #[error("network `{network}` is a mainnet and must not carry a fallback secret")]
    FallbackSecretOnMainnet { network: String },

    #[error("network `{network}` has an invalid credential spec: {reason}")]
    InvalidCredentialSpec { network: String, reason: String },

    #[error("no networks configured")]
    NoNetworks,

    #[error("failed to load configuration")]
    Load(#[source] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

/// Errors raised while resolving a signer for a network.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credential available for network `{network}`")]
    NoCredentialAvailable { network: String },

    #[error("default credential refused for mainnet network `{network}`")]
    DefaultCredentialRejected { network: String },

    #[error("invalid private key for network `{network}`: {reason}")]
    InvalidKey { network: String, reason: String },
}

/// Errors raised while encoding constructor arguments against a contract interface.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("contract has no constructor but {got} argument(s) were supplied")]
    NoConstructor { got: usize },

    #[error("constructor expects {expected} argument(s), got {got}")]
    Arity { expected: usize, got: usize },

    #[error("cannot resolve type of constructor parameter #{index} (`{name}`)")]
    UnresolvedType {
        index: usize,
        name: String,
        #[source]
        source: alloy_core::dyn_abi::Error,
    },

    #[error("constructor argument #{index} `{value}` is not a valid `{ty}`")]
    InvalidArgument {
        index: usize,
        ty: String,
        value: String,
        #[source]
        source: alloy_core::dyn_abi::Error,
    },

    #[error("failed to abi-encode constructor arguments")]
    Abi(#[source] alloy_core::dyn_abi::Error),
}

/// Errors raised by the deployment executor.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("failed to load artifact for `{contract_id}`")]
    Artifact {
        contract_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("rpc endpoint reports chain id {actual}, profile expects {expected}")]
    ChainIdMismatch { expected: u64, actual: u64 },

    #[error("failed to submit deployment transaction (nonce {nonce:?})")]
    Submission {
        nonce: Option<u64>,
        #[source]
        source: anyhow::Error,
    },

    #[error("transaction {tx_hash} (nonce {nonce}) not confirmed after {waited:?}")]
    ConfirmationTimeout {
        tx_hash: B256,
        nonce: u64,
        waited: Duration,
    },

    #[error("transaction {tx_hash} reverted{}", reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    TransactionReverted {
        tx_hash: B256,
        reason: Option<String>,
    },
}

/// Errors raised by explorer verification. None of them affect the deployment itself.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("network `{network}` has no explorer configured")]
    NoExplorerConfigured { network: String },

    #[error("failed to prepare verification source for `{contract_id}`")]
    Source {
        contract_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("explorer rejected the verification request: {reason}")]
    Rejected { reason: String },

    #[error("explorer request failed")]
    Transport(#[source] anyhow::Error),

    #[error("verification failed: {reason}")]
    Failed { reason: String },

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("cannot encode constructor arguments for verification")]
    Encoding(#[from] EncodingError),
}

impl VerificationError {
    /// The process exit code when verification was the requested operation.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 2,
            Self::Encoding(_) => 4,
            _ => VERIFICATION_EXIT_CODE,
        }
    }
}

/// The failure category of a run, one per stage that can abort it.
#[derive(Debug, Error)]
pub enum RunErrorKind {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Deployment(#[from] DeployError),
}

/// A run that aborted before producing a deployment record.
#[derive(Debug, Error)]
#[error("run of `{contract_id}` on `{network}` failed at stage {stage}")]
pub struct RunError {
    pub network: String,
    pub contract_id: String,
    pub stage: RunStage,
    #[source]
    pub kind: RunErrorKind,
}

impl RunError {
    /// The process exit code for this failure category.
    pub fn exit_code(&self) -> i32 {
        match &self.kind {
            RunErrorKind::Configuration(_) => 2,
            RunErrorKind::Credential(_) => 3,
            RunErrorKind::Deployment(err) => match err {
                // The endpoint serves another chain than the profile declares.
                DeployError::ChainIdMismatch { .. } => 2,
                DeployError::Artifact { .. } | DeployError::Encoding(_) => 4,
                DeployError::Submission { .. } => 5,
                DeployError::ConfirmationTimeout { .. } => 6,
                DeployError::TransactionReverted { .. } => 7,
            },
        }
    }

    /// The transaction hash of a broadcast transaction, if the run got that far.
    pub fn transaction_hash(&self) -> Option<B256> {
        match &self.kind {
            RunErrorKind::Deployment(DeployError::ConfirmationTimeout { tx_hash, .. })
            | RunErrorKind::Deployment(DeployError::TransactionReverted { tx_hash, .. }) => {
                Some(*tx_hash)
            }
            _ => None,
        }
    }
}

/// Exit code used when a requested verification did not end in `Verified`.
pub const VERIFICATION_EXIT_CODE: i32 = 8;

#[cfg(test)]
mod tests {
    use super::*;

    fn run_error(kind: RunErrorKind) -> RunError {
        RunError {
            network: "Local".to_string(),
            contract_id: "Factory".to_string(),
            stage: RunStage::Deploying,
            kind,
        }
    }

    #[test]
    fn test_exit_codes_are_distinct_per_category() {
        let codes = [
            run_error(ConfigError::UnknownNetwork { name: "x".into() }.into()).exit_code(),
            run_error(CredentialError::NoCredentialAvailable { network: "x".into() }.into())
                .exit_code(),
            run_error(DeployError::from(EncodingError::Arity { expected: 1, got: 0 }).into())
                .exit_code(),
            run_error(
                DeployError::Submission {
                    nonce: Some(0),
                    source: anyhow::anyhow!("boom"),
                }
                .into(),
            )
            .exit_code(),
            run_error(
                DeployError::ConfirmationTimeout {
                    tx_hash: B256::ZERO,
                    nonce: 0,
                    waited: Duration::from_secs(1),
                }
                .into(),
            )
            .exit_code(),
            run_error(
                DeployError::TransactionReverted {
                    tx_hash: B256::ZERO,
                    reason: None,
                }
                .into(),
            )
            .exit_code(),
        ];

        assert_eq!(codes, [2, 3, 4, 5, 6, 7]);
        assert!(!codes.contains(&VERIFICATION_EXIT_CODE));
    }

    #[test]
    fn test_chain_id_mismatch_is_a_configuration_failure() {
        let err = run_error(
            DeployError::ChainIdMismatch {
                expected: 4200,
                actual: 686868,
            }
            .into(),
        );
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.transaction_hash(), None);
    }

    #[test]
    fn test_timeout_keeps_transaction_hash() {
        let hash = B256::repeat_byte(0xab);
        let err = run_error(
            DeployError::ConfirmationTimeout {
                tx_hash: hash,
                nonce: 7,
                waited: Duration::from_secs(30),
            }
            .into(),
        );
        assert_eq!(err.transaction_hash(), Some(hash));
        assert!(err.to_string().contains("Local"));
        assert!(err.to_string().contains("Factory"));
    }

    #[test]
    fn test_revert_message_includes_reason() {
        let err = DeployError::TransactionReverted {
            tx_hash: B256::ZERO,
            reason: Some("Ownable: caller is not the owner".to_string()),
        };
        assert!(err.to_string().ends_with("Ownable: caller is not the owner"));
    }
}
