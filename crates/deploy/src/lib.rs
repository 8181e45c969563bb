//! shipyard-deploy - Contract deployment and explorer verification across EVM networks.
//!
//! A run resolves a named [`NetworkProfile`], resolves its signer, deploys a compiled
//! contract from Hardhat artifacts and optionally verifies its source on the network's
//! block explorer. See [`DeploymentOrchestrator`].

pub mod abi;
pub mod artifacts;
pub mod config;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod explorer;
pub mod network;
pub mod orchestrator;
pub mod record;
pub mod rpc;
pub mod tx;

pub use alloy_core::primitives::{Address, B256};

pub use abi::{ConstructorArgs, encode_constructor_args};
pub use artifacts::{ArtifactSource, ContractArtifact, HardhatArtifacts, VerificationSource};
pub use config::{CONFIG_FILENAME, CompilerSettings, ExplorerPolling, Settings};
pub use credentials::{
    CredentialOrigin, CredentialResolver, CredentialSource, CredentialSpec, EnvSource,
    ProcessEnv, ResolvedCredential, SecretString, Signer,
};
pub use error::{
    ConfigError, CredentialError, DeployError, EncodingError, RunError, RunErrorKind,
    VERIFICATION_EXIT_CODE, VerificationError,
};
pub use executor::{DeploymentExecutor, DeploymentRequest, ExecutorSettings};
pub use explorer::{
    EtherscanApi, ExplorerApi, ExplorerResponse, ExplorerVerifier, SourceSubmission,
    VerificationRequest, VerificationResult,
};
pub use network::{ExplorerProfile, GasPolicy, NetworkProfile, NetworkRegistry};
pub use orchestrator::{
    DeploymentOrchestrator, RunReport, RunRequest, RunStage, VerificationOutcome,
};
pub use record::{DeploymentRecord, RecordSummary};
pub use rpc::{ChainClient, ChainConnector, RpcChainClient, RpcConnector, TransactionReceipt};
pub use tx::{CreateTransaction, SignedTransaction, contract_address};
