//! Block explorer source verification (Etherscan-compatible API).
//!
//! Verification is asynchronous on the explorer side: a submission returns a GUID which is
//! then polled with `checkverifystatus`. A result that stays pending is reported as
//! [`VerificationResult::Pending`] rather than as an error.

use std::future::Future;

use alloy_core::primitives::{Address, Bytes};
use anyhow::Context;
use backon::{ConstantBuilder, Retryable};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    artifacts::ArtifactSource,
    config::ExplorerPolling,
    error::VerificationError,
    network::{ExplorerProfile, NetworkProfile},
    record::DeploymentRecord,
    rpc::create_client,
};

/// Explorer answer for a contract that is already verified.
const ALREADY_VERIFIED: &str = "already verified";

/// Explorer answer while it has not indexed the contract's bytecode yet.
const NOT_INDEXED: &str = "unable to locate contractcode";

/// Status result of a successful verification.
const PASS_VERIFIED: &str = "pass - verified";

/// What to verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    pub contract_address: Address,
    /// `<sourceName>:<ContractName>` (a bare contract name is resolved against the artifacts).
    pub source_contract_path: String,
    pub constructor_args_encoded: Bytes,
}

impl VerificationRequest {
    pub fn from_record(record: &DeploymentRecord) -> Self {
        Self {
            contract_address: record.contract_address,
            source_contract_path: record.contract_id.clone(),
            constructor_args_encoded: record.constructor_args.clone(),
        }
    }
}

/// Outcome of a verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    /// Still queued on the explorer.
    Pending { guid: String },
    Verified,
    Failed(String),
}

/// Form fields of a `verifysourcecode` call.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSubmission {
    pub contract_address: Address,
    /// `<sourceName>:<ContractName>`.
    pub contract_name: String,
    /// `v0.8.21+commit.d9974bed`.
    pub compiler_version: String,
    /// Standard-JSON compiler input.
    pub source_code: String,
    /// Hex without `0x`.
    pub constructor_arguments: String,
}

impl SourceSubmission {
    fn form(&self, api_key: &str) -> Vec<(&'static str, String)> {
        vec![
            ("apikey", api_key.to_string()),
            ("module", "contract".to_string()),
            ("action", "verifysourcecode".to_string()),
            ("contractaddress", self.contract_address.to_string()),
            ("sourceCode", self.source_code.clone()),
            ("codeformat", "solidity-standard-json-input".to_string()),
            ("contractname", self.contract_name.clone()),
            ("compilerversion", self.compiler_version.clone()),
            // Misspelled on purpose: that is the parameter name of the API.
            ("constructorArguements", self.constructor_arguments.clone()),
        ]
    }
}

/// Raw `{ status, message, result }` answer of an Etherscan-compatible API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExplorerResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, deserialize_with = "result_as_text")]
    pub result: String,
}

impl ExplorerResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "1"
    }
}

fn result_as_text<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Transport to an explorer verification API.
pub trait ExplorerApi: Send + Sync {
    /// `module=contract&action=verifysourcecode`.
    fn submit(
        &self,
        explorer: &ExplorerProfile,
        submission: &SourceSubmission,
    ) -> impl Future<Output = anyhow::Result<ExplorerResponse>> + Send;

    /// `module=contract&action=checkverifystatus`.
    fn check_status(
        &self,
        explorer: &ExplorerProfile,
        guid: &str,
    ) -> impl Future<Output = anyhow::Result<ExplorerResponse>> + Send;
}

/// [`ExplorerApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct EtherscanApi {
    client: reqwest::Client,
}

impl EtherscanApi {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            client: create_client()?,
        })
    }
}

impl ExplorerApi for EtherscanApi {
    async fn submit(
        &self,
        explorer: &ExplorerProfile,
        submission: &SourceSubmission,
    ) -> anyhow::Result<ExplorerResponse> {
        self.client
            .post(&explorer.api_base_url)
            .form(&submission.form(explorer.api_key.expose()))
            .send()
            .await
            .context("Failed to send verifysourcecode request")?
            .json()
            .await
            .context("Failed to parse verifysourcecode response")
    }

    async fn check_status(
        &self,
        explorer: &ExplorerProfile,
        guid: &str,
    ) -> anyhow::Result<ExplorerResponse> {
        self.client
            .get(&explorer.api_base_url)
            .query(&[
                ("apikey", explorer.api_key.expose()),
                ("module", "contract"),
                ("action", "checkverifystatus"),
                ("guid", guid),
            ])
            .send()
            .await
            .context("Failed to send checkverifystatus request")?
            .json()
            .await
            .context("Failed to parse checkverifystatus response")
    }
}

/// Interpret a `checkverifystatus` answer.
pub fn status_result(response: &ExplorerResponse, guid: &str) -> VerificationResult {
    let result = response.result.to_lowercase();

    if result.contains(PASS_VERIFIED) || result.contains(ALREADY_VERIFIED) {
        VerificationResult::Verified
    } else if result.contains("pending") || result.contains("in queue") {
        VerificationResult::Pending {
            guid: guid.to_string(),
        }
    } else {
        VerificationResult::Failed(response.result.clone())
    }
}

/// Why one submission attempt did not yield a GUID.
enum SubmitAttempt {
    /// The explorer has not indexed the contract yet; worth another try.
    NotIndexed(String),
    AlreadyVerified,
    Error(VerificationError),
}

/// Submits sources to a network's explorer and waits for the outcome.
#[derive(Debug, Clone)]
pub struct ExplorerVerifier<A, E> {
    artifacts: A,
    api: E,
    polling: ExplorerPolling,
}

impl<A: ArtifactSource, E: ExplorerApi> ExplorerVerifier<A, E> {
    pub fn new(artifacts: A, api: E, polling: ExplorerPolling) -> Self {
        Self {
            artifacts,
            api,
            polling,
        }
    }

    pub fn artifacts(&self) -> &A {
        &self.artifacts
    }

    /// Verify a freshly deployed contract on the explorer of `record.network`.
    ///
    /// Fails with [`VerificationError::NoExplorerConfigured`], without any network call, when
    /// the network has no explorer.
    pub async fn verify(
        &self,
        record: &DeploymentRecord,
        req: &VerificationRequest,
    ) -> Result<VerificationResult, VerificationError> {
        self.verify_address(&record.network, req).await
    }

    /// Verify a contract already deployed on `profile`.
    pub async fn verify_address(
        &self,
        profile: &NetworkProfile,
        req: &VerificationRequest,
    ) -> Result<VerificationResult, VerificationError> {
        let explorer = explorer_of(profile)?;
        let submission = self.submission(req)?;

        tracing::info!(
            network = %profile.name,
            address = %req.contract_address,
            contract = %submission.contract_name,
            compiler = %submission.compiler_version,
            explorer = %explorer.api_base_url,
            "Submitting source for verification"
        );

        let guid = match self.submit(explorer, &submission).await {
            Ok(guid) => guid,
            Err(SubmitAttempt::AlreadyVerified) => {
                tracing::info!(network = %profile.name, address = %req.contract_address, "Contract already verified");
                return Ok(VerificationResult::Verified);
            }
            Err(SubmitAttempt::NotIndexed(reason)) => {
                return Err(VerificationError::Rejected { reason });
            }
            Err(SubmitAttempt::Error(err)) => return Err(err),
        };

        tracing::info!(network = %profile.name, guid = %guid, "Verification submitted, polling status");

        let result = (|| self.poll_once(explorer, &guid))
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.polling.poll_interval())
                    .with_max_times(self.polling.max_attempts.saturating_sub(1)),
            )
            .sleep(tokio::time::sleep)
            .when(|e| matches!(e, Ok(VerificationResult::Pending { .. })))
            .await;

        let result = match result {
            Ok(result) | Err(Ok(result)) => result,
            Err(Err(err)) => return Err(err),
        };

        match &result {
            VerificationResult::Verified => {
                tracing::info!(network = %profile.name, address = %req.contract_address, "Contract verified")
            }
            VerificationResult::Pending { guid } => {
                tracing::warn!(network = %profile.name, guid = %guid, "Verification still pending")
            }
            VerificationResult::Failed(reason) => {
                tracing::warn!(network = %profile.name, reason = %reason, "Verification failed")
            }
        }

        Ok(result)
    }

    /// One `checkverifystatus` call for `guid`.
    pub async fn check(
        &self,
        profile: &NetworkProfile,
        guid: &str,
    ) -> Result<VerificationResult, VerificationError> {
        let explorer = explorer_of(profile)?;
        let response = self
            .api
            .check_status(explorer, guid)
            .await
            .map_err(VerificationError::Transport)?;
        Ok(status_result(&response, guid))
    }

    fn submission(&self, req: &VerificationRequest) -> Result<SourceSubmission, VerificationError> {
        let source_error = |source| VerificationError::Source {
            contract_id: req.source_contract_path.clone(),
            source,
        };

        let artifact = self
            .artifacts
            .load(&req.source_contract_path)
            .map_err(source_error)?;
        let source = self
            .artifacts
            .verification_source(&artifact)
            .map_err(source_error)?;
        let source_code = serde_json::to_string(&source.standard_json_input)
            .context("Failed to serialize compiler input")
            .map_err(source_error)?;

        let version = source.compiler_version;
        Ok(SourceSubmission {
            contract_address: req.contract_address,
            contract_name: artifact.fully_qualified_name(),
            compiler_version: if version.starts_with('v') {
                version
            } else {
                format!("v{version}")
            },
            source_code,
            constructor_arguments: hex::encode(&req.constructor_args_encoded),
        })
    }

    /// Submit, retrying while the explorer has not indexed the contract.
    async fn submit(
        &self,
        explorer: &ExplorerProfile,
        submission: &SourceSubmission,
    ) -> Result<String, SubmitAttempt> {
        (|| self.submit_once(explorer, submission))
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.polling.poll_interval())
                    .with_max_times(self.polling.max_attempts.saturating_sub(1)),
            )
            .sleep(tokio::time::sleep)
            .when(|err| matches!(err, SubmitAttempt::NotIndexed(_)))
            .notify(|err, delay| {
                if let SubmitAttempt::NotIndexed(reason) = err {
                    tracing::debug!(reason = %reason, delay = ?delay, "Explorer has not indexed the contract yet");
                }
            })
            .await
    }

    async fn submit_once(
        &self,
        explorer: &ExplorerProfile,
        submission: &SourceSubmission,
    ) -> Result<String, SubmitAttempt> {
        let response = self
            .api
            .submit(explorer, submission)
            .await
            .map_err(|e| SubmitAttempt::Error(VerificationError::Transport(e)))?;

        if response.is_ok() {
            return Ok(response.result);
        }

        let reason = response.result.to_lowercase();
        if reason.contains(ALREADY_VERIFIED) {
            Err(SubmitAttempt::AlreadyVerified)
        } else if reason.contains(NOT_INDEXED) {
            Err(SubmitAttempt::NotIndexed(response.result))
        } else {
            Err(SubmitAttempt::Error(VerificationError::Rejected {
                reason: response.result,
            }))
        }
    }

    /// A status check. `Err(Ok(Pending))` keeps the retry loop going.
    async fn poll_once(
        &self,
        explorer: &ExplorerProfile,
        guid: &str,
    ) -> Result<VerificationResult, Result<VerificationResult, VerificationError>> {
        let response = self
            .api
            .check_status(explorer, guid)
            .await
            .map_err(|e| Err(VerificationError::Transport(e)))?;

        match status_result(&response, guid) {
            pending @ VerificationResult::Pending { .. } => Err(Ok(pending)),
            other => Ok(other),
        }
    }
}

fn explorer_of(profile: &NetworkProfile) -> Result<&ExplorerProfile, VerificationError> {
    profile
        .explorer
        .as_ref()
        .ok_or_else(|| VerificationError::NoExplorerConfigured {
            network: profile.name.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: &str, result: &str) -> ExplorerResponse {
        ExplorerResponse {
            status: status.to_string(),
            message: String::new(),
            result: result.to_string(),
        }
    }

    #[test]
    fn test_status_interpretation() {
        assert_eq!(
            status_result(&response("1", "Pass - Verified"), "g"),
            VerificationResult::Verified
        );
        assert_eq!(
            status_result(&response("0", "Already Verified"), "g"),
            VerificationResult::Verified
        );
        assert_eq!(
            status_result(&response("0", "Pending in queue"), "g"),
            VerificationResult::Pending {
                guid: "g".to_string()
            }
        );
        assert_eq!(
            status_result(&response("0", "Fail - Unable to verify"), "g"),
            VerificationResult::Failed("Fail - Unable to verify".to_string())
        );
    }

    #[test]
    fn test_response_with_non_string_result() {
        let parsed: ExplorerResponse = serde_json::from_str(
            r#"{ "status": "0", "message": "NOTOK", "result": null }"#,
        )
        .unwrap();
        assert_eq!(parsed.result, "");
        assert!(!parsed.is_ok());
    }

    #[test]
    fn test_form_uses_explorer_field_names() {
        let submission = SourceSubmission {
            contract_address: Address::repeat_byte(0x11),
            contract_name: "contracts/pool/LiquidityBootstrapPool.sol:LiquidityBootstrapPool"
                .to_string(),
            compiler_version: "v0.8.21+commit.d9974bed".to_string(),
            source_code: "{}".to_string(),
            constructor_arguments: "00ff".to_string(),
        };
        let form = submission.form("key");
        let get = |name: &str| {
            form.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.clone())
                .unwrap()
        };

        assert_eq!(get("codeformat"), "solidity-standard-json-input");
        assert_eq!(get("constructorArguements"), "00ff");
        assert_eq!(get("compilerversion"), "v0.8.21+commit.d9974bed");
        assert_eq!(get("action"), "verifysourcecode");
    }
}
