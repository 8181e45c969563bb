//! Deployment executor: encode, sign, broadcast, wait.
//!
//! Exactly one transaction is broadcast per call. Nothing is retried after broadcast: a
//! confirmation wait that runs out reports the transaction hash and nonce so the caller can
//! follow up on chain instead of resubmitting.

use std::{sync::Arc, time::Duration};

use alloy_core::primitives::{Address, B256, Bytes, U256};
use anyhow::Context;

use crate::{
    abi::{ConstructorArgs, deployment_code, encode_constructor_args},
    artifacts::ArtifactSource,
    config::{DEFAULT_CONFIRMATIONS, DEFAULT_RECEIPT_POLL_INTERVAL_MS},
    credentials::Signer,
    error::DeployError,
    network::{GasPolicy, NetworkProfile},
    record::DeploymentRecord,
    rpc::{ChainClient, TransactionReceipt},
    tx::{CreateTransaction, contract_address},
};

/// What to deploy, and where.
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub network: Arc<NetworkProfile>,
    pub contract_id: String,
    pub constructor_args: ConstructorArgs,
}

/// Confirmation wait settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Confirmations for networks that do not set their own.
    pub confirmations: u64,
    /// Ceiling on the confirmation wait. `None` waits until cancelled.
    pub confirmation_timeout: Option<Duration>,
    pub poll_interval: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            confirmations: DEFAULT_CONFIRMATIONS,
            confirmation_timeout: None,
            poll_interval: Duration::from_millis(DEFAULT_RECEIPT_POLL_INTERVAL_MS),
        }
    }
}

/// Deploys contracts from an [`ArtifactSource`].
#[derive(Debug, Clone)]
pub struct DeploymentExecutor<A> {
    artifacts: A,
    settings: ExecutorSettings,
}

impl<A: ArtifactSource> DeploymentExecutor<A> {
    pub fn new(artifacts: A, settings: ExecutorSettings) -> Self {
        Self {
            artifacts,
            settings,
        }
    }

    pub fn artifacts(&self) -> &A {
        &self.artifacts
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Deploy `request.contract_id` with `signer` through `client`.
    ///
    /// The signer is dropped, and its key wiped, as soon as the transaction is signed.
    pub async fn deploy<C: ChainClient>(
        &self,
        client: &C,
        request: &DeploymentRequest,
        signer: Signer,
    ) -> Result<DeploymentRecord, DeployError> {
        let profile = &request.network;

        let artifact = self
            .artifacts
            .load(&request.contract_id)
            .map_err(|source| DeployError::Artifact {
                contract_id: request.contract_id.clone(),
                source,
            })?;
        let constructor_args = encode_constructor_args(&artifact.abi, &request.constructor_args)?;
        let input = deployment_code(&artifact.bytecode, &constructor_args);

        let chain_id = client
            .chain_id()
            .await
            .map_err(|source| DeployError::Submission {
                nonce: None,
                source,
            })?;
        if chain_id != profile.chain_id {
            return Err(DeployError::ChainIdMismatch {
                expected: profile.chain_id,
                actual: chain_id,
            });
        }

        let deployer = signer.address();
        let nonce = client
            .transaction_count(deployer)
            .await
            .map_err(|source| DeployError::Submission {
                nonce: None,
                source,
            })?;

        let (gas_limit, gas_price) = resolve_gas(client, &profile.gas, deployer, &input)
            .await
            .map_err(|source| DeployError::Submission {
                nonce: Some(nonce),
                source,
            })?;

        let tx = CreateTransaction {
            chain_id,
            nonce,
            gas_price,
            gas_limit,
            value: U256::ZERO,
            input: input.clone(),
        };
        let signed = tx.sign(&signer).map_err(|source| DeployError::Submission {
            nonce: Some(nonce),
            source,
        })?;
        drop(signer);

        let expected_address = contract_address(&deployer, nonce);

        tracing::info!(
            network = %profile.name,
            contract = %artifact.fully_qualified_name(),
            deployer = %deployer,
            nonce,
            gas_limit,
            gas_price,
            "Broadcasting deployment transaction"
        );

        let tx_hash = client
            .send_raw_transaction(signed.raw)
            .await
            .map_err(|source| DeployError::Submission {
                nonce: Some(nonce),
                source,
            })?;
        if tx_hash != signed.hash {
            tracing::warn!(returned = %tx_hash, computed = %signed.hash, "Node returned an unexpected transaction hash");
        }

        tracing::info!(
            network = %profile.name,
            tx_hash = %tx_hash,
            nonce,
            address = %expected_address,
            "Deployment transaction broadcast"
        );

        let confirmations = profile.confirmations_or(self.settings.confirmations);
        let wait = self.wait_for_confirmations(client, tx_hash, confirmations);
        let (receipt, head) = match self.settings.confirmation_timeout {
            Some(ceiling) => tokio::time::timeout(ceiling, wait).await.map_err(|_| {
                DeployError::ConfirmationTimeout {
                    tx_hash,
                    nonce,
                    waited: ceiling,
                }
            })?,
            None => wait.await,
        };

        let block_number = receipt.block_number.unwrap_or(head);

        if !receipt.succeeded {
            let reason = match client.revert_reason(deployer, input, block_number).await {
                Ok(reason) => reason,
                Err(e) => {
                    tracing::debug!(error = %e, tx_hash = %tx_hash, "Failed to replay reverted transaction");
                    None
                }
            };
            return Err(DeployError::TransactionReverted { tx_hash, reason });
        }

        let contract_address = match receipt.contract_address {
            Some(address) if address != expected_address => {
                tracing::warn!(
                    receipt = %address,
                    derived = %expected_address,
                    "Receipt contract address differs from the derived one"
                );
                address
            }
            Some(address) => address,
            None => expected_address,
        };

        let record = DeploymentRecord {
            contract_id: artifact.fully_qualified_name(),
            contract_address,
            network: Arc::clone(profile),
            transaction_hash: tx_hash,
            block_confirmations: head.saturating_sub(block_number) + 1,
            verified: false,
            deployer,
            nonce,
            block_number,
            gas_used: receipt.gas_used,
            constructor_args,
        };

        tracing::info!(
            network = %profile.name,
            contract = %record.contract_id,
            address = %record.contract_address,
            tx_hash = %record.transaction_hash,
            block = block_number,
            "Contract deployed"
        );

        Ok(record)
    }

    /// Poll until the receipt of `tx_hash` is `confirmations` blocks deep, or reports failure.
    ///
    /// Returns the receipt and the head block it was checked against. Polling errors are
    /// logged and retried; only the caller's ceiling (or cancellation) ends the wait.
    async fn wait_for_confirmations<C: ChainClient>(
        &self,
        client: &C,
        tx_hash: B256,
        confirmations: u64,
    ) -> (TransactionReceipt, u64) {
        loop {
            match poll_receipt(client, tx_hash).await {
                Ok(Some((receipt, head))) => {
                    let Some(mined_at) = receipt.block_number else {
                        tokio::time::sleep(self.settings.poll_interval).await;
                        continue;
                    };

                    if !receipt.succeeded {
                        return (receipt, head.max(mined_at));
                    }

                    let depth = head.saturating_sub(mined_at) + 1;
                    if head >= mined_at && depth >= confirmations {
                        return (receipt, head);
                    }

                    tracing::debug!(tx_hash = %tx_hash, depth, confirmations, "Waiting for confirmations");
                }
                Ok(None) => {
                    tracing::trace!(tx_hash = %tx_hash, "Transaction not mined yet");
                }
                Err(e) => {
                    tracing::trace!(error = %e, tx_hash = %tx_hash, "Receipt poll failed, retrying...");
                }
            }

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}

async fn poll_receipt<C: ChainClient>(
    client: &C,
    tx_hash: B256,
) -> anyhow::Result<Option<(TransactionReceipt, u64)>> {
    let Some(receipt) = client.transaction_receipt(tx_hash).await? else {
        return Ok(None);
    };
    let head = client.block_number().await?;
    Ok(Some((receipt, head)))
}

/// Gas limit and price for a deployment under `policy`.
async fn resolve_gas<C: ChainClient>(
    client: &C,
    policy: &GasPolicy,
    from: Address,
    input: &Bytes,
) -> anyhow::Result<(u64, u128)> {
    let (gas_limit, gas_price) = match *policy {
        GasPolicy::Auto => (None, None),
        GasPolicy::Fixed {
            gas_limit,
            gas_price_wei,
        } => (gas_limit, gas_price_wei.map(u128::from)),
    };

    let gas_limit = match gas_limit {
        Some(limit) => limit,
        None => client
            .estimate_gas(from, input.clone())
            .await
            .context("Failed to estimate gas")?,
    };

    let gas_price = match gas_price {
        Some(price) => price,
        None => client.gas_price().await.context("Failed to fetch gas price")?,
    };

    Ok((gas_limit, gas_price))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    };

    use serde_json::json;

    use super::*;
    use crate::{
        artifacts::{ContractArtifact, VerificationSource},
        credentials::CredentialSpec,
    };

    const ANVIL_KEY_0: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    struct StaticArtifacts;

    impl ArtifactSource for StaticArtifacts {
        fn load(&self, contract_id: &str) -> anyhow::Result<ContractArtifact> {
            anyhow::ensure!(contract_id == "Pool", "unknown contract {contract_id}");
            Ok(ContractArtifact {
                contract_name: "Pool".to_string(),
                source_name: "contracts/Pool.sol".to_string(),
                abi: serde_json::from_value(json!([])).unwrap(),
                bytecode: Bytes::from(vec![0x60, 0x80, 0x60, 0x40]),
            })
        }

        fn verification_source(&self, _: &ContractArtifact) -> anyhow::Result<VerificationSource> {
            anyhow::bail!("not needed")
        }
    }

    /// Chain that mines every transaction into block `mined_at` and advances one block per poll.
    struct FakeChain {
        chain_id: u64,
        head: AtomicU64,
        mined_at: u64,
        status_ok: bool,
        mined: bool,
        sent: Mutex<Vec<Bytes>>,
        estimates: AtomicU64,
        price_queries: AtomicU64,
    }

    impl FakeChain {
        fn new(chain_id: u64) -> Self {
            Self {
                chain_id,
                head: AtomicU64::new(10),
                mined_at: 10,
                status_ok: true,
                mined: true,
                sent: Mutex::new(Vec::new()),
                estimates: AtomicU64::new(0),
                price_queries: AtomicU64::new(0),
            }
        }
    }

    impl ChainClient for FakeChain {
        async fn chain_id(&self) -> anyhow::Result<u64> {
            Ok(self.chain_id)
        }

        async fn transaction_count(&self, _: Address) -> anyhow::Result<u64> {
            Ok(0)
        }

        async fn gas_price(&self) -> anyhow::Result<u128> {
            self.price_queries.fetch_add(1, Ordering::SeqCst);
            Ok(1_000_000_000)
        }

        async fn estimate_gas(&self, _: Address, _: Bytes) -> anyhow::Result<u64> {
            self.estimates.fetch_add(1, Ordering::SeqCst);
            Ok(500_000)
        }

        async fn send_raw_transaction(&self, raw: Bytes) -> anyhow::Result<B256> {
            let hash = alloy_core::primitives::keccak256(&raw);
            self.sent.lock().unwrap().push(raw);
            Ok(hash)
        }

        async fn transaction_receipt(
            &self,
            hash: B256,
        ) -> anyhow::Result<Option<TransactionReceipt>> {
            if !self.mined {
                return Ok(None);
            }
            Ok(Some(TransactionReceipt {
                transaction_hash: hash,
                block_number: Some(self.mined_at),
                succeeded: self.status_ok,
                contract_address: None,
                gas_used: 100_000,
            }))
        }

        async fn block_number(&self) -> anyhow::Result<u64> {
            Ok(self.head.fetch_add(1, Ordering::SeqCst))
        }

        async fn revert_reason(
            &self,
            _: Address,
            _: Bytes,
            _: u64,
        ) -> anyhow::Result<Option<String>> {
            Ok(Some("Pool: already initialized".to_string()))
        }
    }

    fn profile(gas: GasPolicy) -> Arc<NetworkProfile> {
        Arc::new(NetworkProfile {
            name: "Local".to_string(),
            rpc_url: "http://127.0.0.1:8545/".to_string(),
            chain_id: 31337,
            mainnet: false,
            allow_default_credential: false,
            gas,
            credential: CredentialSpec::literal(ANVIL_KEY_0),
            explorer: None,
            confirmations: None,
        })
    }

    fn request(gas: GasPolicy) -> DeploymentRequest {
        DeploymentRequest {
            network: profile(gas),
            contract_id: "Pool".to_string(),
            constructor_args: ConstructorArgs::default(),
        }
    }

    fn executor(settings: ExecutorSettings) -> DeploymentExecutor<StaticArtifacts> {
        DeploymentExecutor::new(StaticArtifacts, settings)
    }

    fn fast() -> ExecutorSettings {
        ExecutorSettings {
            confirmations: 1,
            confirmation_timeout: Some(Duration::from_secs(5)),
            poll_interval: Duration::from_millis(1),
        }
    }

    fn signer() -> Signer {
        Signer::from_secret("Local", ANVIL_KEY_0).unwrap()
    }

    #[tokio::test]
    async fn test_deploy_returns_derived_address() {
        let chain = FakeChain::new(31337);
        let record = executor(fast())
            .deploy(&chain, &request(GasPolicy::Auto), signer())
            .await
            .unwrap();

        let deployer: Address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap();
        assert_eq!(record.deployer, deployer);
        assert_eq!(record.contract_address, contract_address(&deployer, 0));
        assert!(!record.verified);
        assert_eq!(chain.sent.lock().unwrap().len(), 1);
        assert_eq!(
            record.transaction_hash,
            alloy_core::primitives::keccak256(&chain.sent.lock().unwrap()[0])
        );
    }

    #[tokio::test]
    async fn test_fixed_gas_skips_node_queries() {
        let chain = FakeChain::new(31337);
        let gas = GasPolicy::Fixed {
            gas_limit: Some(3_000_000),
            gas_price_wei: Some(50_000_000),
        };
        executor(fast()).deploy(&chain, &request(gas), signer()).await.unwrap();

        assert_eq!(chain.estimates.load(Ordering::SeqCst), 0);
        assert_eq!(chain.price_queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fixed_gas_price_only_estimates_limit() {
        let chain = FakeChain::new(31337);
        let gas = GasPolicy::Fixed {
            gas_limit: None,
            gas_price_wei: Some(50_000_000),
        };
        executor(fast()).deploy(&chain, &request(gas), signer()).await.unwrap();

        assert_eq!(chain.estimates.load(Ordering::SeqCst), 1);
        assert_eq!(chain.price_queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chain_id_mismatch_before_broadcast() {
        let chain = FakeChain::new(1);
        let err = executor(fast())
            .deploy(&chain, &request(GasPolicy::Auto), signer())
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::ChainIdMismatch { expected: 31337, actual: 1 }));
        assert!(chain.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_waits_for_requested_confirmations() {
        let chain = FakeChain::new(31337);
        let settings = ExecutorSettings {
            confirmations: 3,
            ..fast()
        };
        let record = executor(settings)
            .deploy(&chain, &request(GasPolicy::Auto), signer())
            .await
            .unwrap();

        assert!(record.block_confirmations >= 3);
        assert_eq!(record.block_number, 10);
    }

    #[tokio::test]
    async fn test_timeout_preserves_hash_and_nonce() {
        let mut chain = FakeChain::new(31337);
        chain.mined = false;
        let settings = ExecutorSettings {
            confirmation_timeout: Some(Duration::from_millis(20)),
            ..fast()
        };

        let err = executor(settings)
            .deploy(&chain, &request(GasPolicy::Auto), signer())
            .await
            .unwrap_err();

        let DeployError::ConfirmationTimeout { tx_hash, nonce, .. } = err else {
            panic!("expected a confirmation timeout, got {err:?}");
        };
        assert_eq!(nonce, 0);
        assert_eq!(tx_hash, alloy_core::primitives::keccak256(&chain.sent.lock().unwrap()[0]));
    }

    #[tokio::test]
    async fn test_reverted_receipt_reports_reason() {
        let mut chain = FakeChain::new(31337);
        chain.status_ok = false;

        let err = executor(fast())
            .deploy(&chain, &request(GasPolicy::Auto), signer())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeployError::TransactionReverted { reason: Some(ref r), .. }
                if r == "Pool: already initialized"
        ));
    }

    #[tokio::test]
    async fn test_encoding_error_before_any_call() {
        let chain = FakeChain::new(31337);
        let mut request = request(GasPolicy::Auto);
        request.constructor_args = ConstructorArgs::new(["1"]);

        let err = executor(fast()).deploy(&chain, &request, signer()).await.unwrap_err();
        assert!(matches!(err, DeployError::Encoding(_)));
        assert!(chain.sent.lock().unwrap().is_empty());
    }
}
