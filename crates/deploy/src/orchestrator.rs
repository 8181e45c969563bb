//! One deployment run, from network name to deployment record.
//!
//! ```text
//! Idle -> ProfileResolved -> CredentialResolved -> Deploying -> Deployed
//!      -> (Verifying -> Verified | VerificationFailed) -> Done
//! ```
//!
//! A failure before `Deployed` aborts the run without a record. A verification failure never
//! does: the run still ends in `Done` with an unverified record and the verification outcome
//! reported next to it.

use std::sync::Arc;

use alloy_core::primitives::Address;
use futures::future::join_all;

use crate::{
    abi::{ConstructorArgs, encode_constructor_args},
    artifacts::{ArtifactSource, HardhatArtifacts},
    config::Settings,
    credentials::{CredentialResolver, EnvSource, ProcessEnv},
    error::{
        DeployError, RunError, RunErrorKind, VERIFICATION_EXIT_CODE, VerificationError,
    },
    executor::{DeploymentExecutor, DeploymentRequest, ExecutorSettings},
    explorer::{
        EtherscanApi, ExplorerApi, ExplorerVerifier, VerificationRequest, VerificationResult,
    },
    network::NetworkRegistry,
    record::DeploymentRecord,
    rpc::{ChainConnector, RpcConnector},
};

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RunStage {
    Idle,
    ProfileResolved,
    CredentialResolved,
    Deploying,
    Deployed,
    Verifying,
    Verified,
    VerificationFailed,
    Done,
}

/// Input of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub network: String,
    pub contract_id: String,
    pub constructor_args: ConstructorArgs,
    pub verify: bool,
}

/// Verification side of a finished run.
#[derive(Debug)]
pub enum VerificationOutcome {
    NotRequested,
    Verified,
    Pending { guid: String },
    Failed(VerificationError),
}

/// A finished run: the deployment and, separately, how verification went.
#[derive(Debug)]
pub struct RunReport {
    pub record: DeploymentRecord,
    pub verification: VerificationOutcome,
}

impl RunReport {
    /// `0` when everything requested succeeded, the verification exit code otherwise.
    pub fn exit_code(&self) -> i32 {
        match self.verification {
            VerificationOutcome::NotRequested | VerificationOutcome::Verified => 0,
            VerificationOutcome::Pending { .. } | VerificationOutcome::Failed(_) => {
                VERIFICATION_EXIT_CODE
            }
        }
    }
}

/// Tracks the stage of a run and attaches it to errors.
struct RunState<'a> {
    request: &'a RunRequest,
    stage: RunStage,
}

impl<'a> RunState<'a> {
    fn new(request: &'a RunRequest) -> Self {
        Self {
            request,
            stage: RunStage::Idle,
        }
    }

    fn advance(&mut self, next: RunStage) {
        tracing::debug!(
            network = %self.request.network,
            contract = %self.request.contract_id,
            from = %self.stage,
            to = %next,
            "Run stage changed"
        );
        self.stage = next;
    }

    fn fail(&self, kind: impl Into<RunErrorKind>) -> RunError {
        RunError {
            network: self.request.network.clone(),
            contract_id: self.request.contract_id.clone(),
            stage: self.stage,
            kind: kind.into(),
        }
    }
}

/// Composes registry, credentials, executor and verifier into deployment runs.
pub struct DeploymentOrchestrator<A, K, X, E = ProcessEnv> {
    registry: Arc<NetworkRegistry>,
    credentials: CredentialResolver<E>,
    connector: K,
    executor: DeploymentExecutor<A>,
    verifier: ExplorerVerifier<A, X>,
}

impl DeploymentOrchestrator<HardhatArtifacts, RpcConnector, EtherscanApi> {
    /// Wire the HTTP implementations from `settings`.
    pub fn from_settings(
        settings: &Settings,
        registry: Arc<NetworkRegistry>,
    ) -> anyhow::Result<Self> {
        let artifacts = HardhatArtifacts::new(&settings.artifacts_dir, settings.compiler.clone());
        let executor = DeploymentExecutor::new(
            artifacts.clone(),
            ExecutorSettings {
                confirmations: settings.confirmations,
                confirmation_timeout: settings.confirmation_timeout(),
                poll_interval: settings.receipt_poll_interval(),
            },
        );
        let verifier = ExplorerVerifier::new(artifacts, EtherscanApi::new()?, settings.explorer);

        Ok(Self::new(
            registry,
            CredentialResolver::new(ProcessEnv),
            RpcConnector::new()?,
            executor,
            verifier,
        ))
    }
}

impl<A, K, X, E> DeploymentOrchestrator<A, K, X, E>
where
    A: ArtifactSource,
    K: ChainConnector,
    X: ExplorerApi,
    E: EnvSource,
{
    pub fn new(
        registry: Arc<NetworkRegistry>,
        credentials: CredentialResolver<E>,
        connector: K,
        executor: DeploymentExecutor<A>,
        verifier: ExplorerVerifier<A, X>,
    ) -> Self {
        Self {
            registry,
            credentials,
            connector,
            executor,
            verifier,
        }
    }

    pub fn registry(&self) -> &NetworkRegistry {
        &self.registry
    }

    /// Run one deployment, and verification if requested.
    pub async fn run(&self, request: &RunRequest) -> Result<RunReport, RunError> {
        let mut state = RunState::new(request);

        tracing::info!(
            network = %request.network,
            contract = %request.contract_id,
            args = request.constructor_args.len(),
            verify = request.verify,
            "Starting deployment run"
        );

        let profile = self
            .registry
            .get_profile(&request.network)
            .map_err(|e| state.fail(e))?;
        state.advance(RunStage::ProfileResolved);

        let credential = self.credentials.resolve(&profile).map_err(|e| state.fail(e))?;
        state.advance(RunStage::CredentialResolved);

        let client = self.connector.connect(&profile).map_err(|source| {
            state.fail(DeployError::Submission {
                nonce: None,
                source,
            })
        })?;

        state.advance(RunStage::Deploying);
        let deployment = DeploymentRequest {
            network: Arc::clone(&profile),
            contract_id: request.contract_id.clone(),
            constructor_args: request.constructor_args.clone(),
        };
        let record = self
            .executor
            .deploy(&client, &deployment, credential.signer)
            .await
            .map_err(|e| state.fail(e))?;
        state.advance(RunStage::Deployed);

        if !request.verify {
            state.advance(RunStage::Done);
            return Ok(RunReport {
                record,
                verification: VerificationOutcome::NotRequested,
            });
        }

        state.advance(RunStage::Verifying);
        let verification = VerificationRequest::from_record(&record);
        let (record, outcome) = match self.verifier.verify(&record, &verification).await {
            Ok(VerificationResult::Verified) => {
                state.advance(RunStage::Verified);
                (record.into_verified(), VerificationOutcome::Verified)
            }
            Ok(VerificationResult::Pending { guid }) => {
                (record, VerificationOutcome::Pending { guid })
            }
            Ok(VerificationResult::Failed(reason)) => {
                state.advance(RunStage::VerificationFailed);
                (
                    record,
                    VerificationOutcome::Failed(VerificationError::Failed { reason }),
                )
            }
            Err(err) => {
                tracing::warn!(
                    network = %request.network,
                    contract = %request.contract_id,
                    error = %err,
                    "Verification failed, deployment is unaffected"
                );
                state.advance(RunStage::VerificationFailed);
                (record, VerificationOutcome::Failed(err))
            }
        };

        state.advance(RunStage::Done);
        Ok(RunReport {
            record,
            verification: outcome,
        })
    }

    /// Run independent deployments concurrently. Results come back in request order.
    pub async fn run_many(&self, requests: &[RunRequest]) -> Vec<Result<RunReport, RunError>> {
        join_all(requests.iter().map(|request| self.run(request))).await
    }

    /// Verify a contract already deployed at `address` on `network`.
    pub async fn verify_deployed(
        &self,
        network: &str,
        address: Address,
        contract_id: &str,
        constructor_args: &ConstructorArgs,
    ) -> Result<VerificationResult, VerificationError> {
        let profile = self.registry.get_profile(network)?;

        let artifact = self
            .verifier
            .artifacts()
            .load(contract_id)
            .map_err(|source| VerificationError::Source {
                contract_id: contract_id.to_string(),
                source,
            })?;
        let constructor_args_encoded = encode_constructor_args(&artifact.abi, constructor_args)?;

        let request = VerificationRequest {
            contract_address: address,
            source_contract_path: artifact.fully_qualified_name(),
            constructor_args_encoded,
        };
        self.verifier.verify_address(&profile, &request).await
    }

    /// Check a verification previously submitted to the explorer of `network`.
    pub async fn verification_status(
        &self,
        network: &str,
        guid: &str,
    ) -> Result<VerificationResult, VerificationError> {
        let profile = self.registry.get_profile(network)?;
        self.verifier.check(&profile, guid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(RunStage::ProfileResolved.to_string(), "ProfileResolved");
        assert_eq!(RunStage::VerificationFailed.to_string(), "VerificationFailed");
    }

    #[test]
    fn test_failure_carries_stage() {
        let request = RunRequest {
            network: "Local".to_string(),
            contract_id: "Factory".to_string(),
            constructor_args: ConstructorArgs::default(),
            verify: false,
        };
        let mut state = RunState::new(&request);
        state.advance(RunStage::ProfileResolved);

        let err = state.fail(crate::error::CredentialError::NoCredentialAvailable {
            network: "Local".to_string(),
        });
        assert_eq!(err.stage, RunStage::ProfileResolved);
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("ProfileResolved"));
    }
}
