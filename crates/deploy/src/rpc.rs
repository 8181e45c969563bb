//! JSON-RPC access to EVM chains.
//!
//! [`ChainClient`] is the narrow view of a node the executor needs. [`RpcChainClient`] speaks
//! plain JSON-RPC over HTTP; tests substitute an in-memory implementation.

use std::{future::Future, time::Duration};

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::{Address, B256, Bytes, U64, U128},
};
use anyhow::Context;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};

use crate::network::NetworkProfile;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Selector of `Error(string)`.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Selector of `Panic(uint256)`.
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Error object of a JSON-RPC response.
#[derive(Debug, Clone, Deserialize, thiserror::Error)]
#[error("RPC error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Make a JSON-RPC call and deserialize the result.
///
/// A JSON-RPC error response is returned as an [`RpcError`] inside the `anyhow::Error`.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url)
        .json(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        let error: RpcError = serde_json::from_value(error.clone()).unwrap_or_else(|_| RpcError {
            code: 0,
            message: error.to_string(),
            data: None,
        });
        return Err(anyhow::Error::new(error).context(format!("{} failed", method)));
    }

    let result_value = result
        .get("result")
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// The part of a transaction receipt the executor looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    /// `None` while the transaction is not mined.
    pub block_number: Option<u64>,
    pub succeeded: bool,
    pub contract_address: Option<Address>,
    pub gas_used: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: B256,
    #[serde(default)]
    block_number: Option<U64>,
    #[serde(default)]
    status: Option<U64>,
    #[serde(default)]
    contract_address: Option<Address>,
    #[serde(default)]
    gas_used: Option<U64>,
}

impl From<RawReceipt> for TransactionReceipt {
    fn from(raw: RawReceipt) -> Self {
        Self {
            transaction_hash: raw.transaction_hash,
            block_number: raw.block_number.map(|n| n.to::<u64>()),
            // Pre-byzantium receipts carry no status.
            succeeded: raw.status.is_none_or(|s| s == U64::from(1)),
            contract_address: raw.contract_address,
            gas_used: raw.gas_used.map(|g| g.to::<u64>()).unwrap_or_default(),
        }
    }
}

/// Read and write access to one chain.
pub trait ChainClient: Send + Sync {
    /// `eth_chainId`.
    fn chain_id(&self) -> impl Future<Output = anyhow::Result<u64>> + Send;

    /// `eth_getTransactionCount` at the pending block.
    fn transaction_count(
        &self,
        address: Address,
    ) -> impl Future<Output = anyhow::Result<u64>> + Send;

    /// `eth_gasPrice`.
    fn gas_price(&self) -> impl Future<Output = anyhow::Result<u128>> + Send;

    /// `eth_estimateGas` for a contract creation.
    fn estimate_gas(
        &self,
        from: Address,
        input: Bytes,
    ) -> impl Future<Output = anyhow::Result<u64>> + Send;

    /// `eth_sendRawTransaction`.
    fn send_raw_transaction(&self, raw: Bytes) -> impl Future<Output = anyhow::Result<B256>> + Send;

    /// `eth_getTransactionReceipt`. `None` while unknown or pending.
    fn transaction_receipt(
        &self,
        hash: B256,
    ) -> impl Future<Output = anyhow::Result<Option<TransactionReceipt>>> + Send;

    /// `eth_blockNumber`.
    fn block_number(&self) -> impl Future<Output = anyhow::Result<u64>> + Send;

    /// Replay a contract creation with `eth_call` at `block` and return its revert reason.
    fn revert_reason(
        &self,
        from: Address,
        input: Bytes,
        block: u64,
    ) -> impl Future<Output = anyhow::Result<Option<String>>> + Send;
}

/// Opens a [`ChainClient`] for a network profile.
pub trait ChainConnector: Send + Sync {
    type Client: ChainClient;

    /// Build a client for `profile`. Must not perform any network call.
    fn connect(&self, profile: &NetworkProfile) -> anyhow::Result<Self::Client>;
}

/// [`ChainClient`] over HTTP JSON-RPC.
#[derive(Debug, Clone)]
pub struct RpcChainClient {
    client: reqwest::Client,
    url: String,
}

impl RpcChainClient {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> anyhow::Result<T> {
        json_rpc_call(&self.client, &self.url, method, params).await
    }
}

impl ChainClient for RpcChainClient {
    async fn chain_id(&self) -> anyhow::Result<u64> {
        let id: U64 = self.call("eth_chainId", vec![]).await?;
        Ok(id.to())
    }

    async fn transaction_count(&self, address: Address) -> anyhow::Result<u64> {
        let count: U64 = self
            .call("eth_getTransactionCount", vec![json!(address), json!("pending")])
            .await?;
        Ok(count.to())
    }

    async fn gas_price(&self) -> anyhow::Result<u128> {
        let price: U128 = self.call("eth_gasPrice", vec![]).await?;
        Ok(price.to())
    }

    async fn estimate_gas(&self, from: Address, input: Bytes) -> anyhow::Result<u64> {
        let gas: U64 = self
            .call(
                "eth_estimateGas",
                vec![json!({ "from": from, "data": input, "value": "0x0" })],
            )
            .await?;
        Ok(gas.to())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> anyhow::Result<B256> {
        self.call("eth_sendRawTransaction", vec![json!(raw)]).await
    }

    async fn transaction_receipt(&self, hash: B256) -> anyhow::Result<Option<TransactionReceipt>> {
        let receipt: Option<RawReceipt> = self
            .call("eth_getTransactionReceipt", vec![json!(hash)])
            .await?;
        Ok(receipt.map(Into::into))
    }

    async fn block_number(&self) -> anyhow::Result<u64> {
        let number: U64 = self.call("eth_blockNumber", vec![]).await?;
        Ok(number.to())
    }

    async fn revert_reason(
        &self,
        from: Address,
        input: Bytes,
        block: u64,
    ) -> anyhow::Result<Option<String>> {
        let result: anyhow::Result<Bytes> = self
            .call(
                "eth_call",
                vec![
                    json!({ "from": from, "data": input }),
                    json!(U64::from(block)),
                ],
            )
            .await;

        match result {
            // The replay succeeded: the revert depended on state that changed since.
            Ok(_) => Ok(None),
            Err(err) => match err.downcast_ref::<RpcError>() {
                Some(rpc) => Ok(Some(rpc_revert_reason(rpc))),
                None => Err(err),
            },
        }
    }
}

/// Opens [`RpcChainClient`]s sharing one HTTP client.
#[derive(Debug, Clone)]
pub struct RpcConnector {
    client: reqwest::Client,
}

impl RpcConnector {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            client: create_client()?,
        })
    }
}

impl ChainConnector for RpcConnector {
    type Client = RpcChainClient;

    fn connect(&self, profile: &NetworkProfile) -> anyhow::Result<Self::Client> {
        tracing::debug!(network = %profile.name, rpc_url = %profile.rpc_url, "Connecting to RPC endpoint");
        Ok(RpcChainClient::new(self.client.clone(), profile.rpc_url.clone()))
    }
}

/// Best human readable reason out of an `eth_call` error.
fn rpc_revert_reason(error: &RpcError) -> String {
    let data = error.data.as_ref().and_then(|data| match data {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("data").and_then(Value::as_str).map(str::to_string),
        _ => None,
    });

    data.and_then(|hex| hex.parse::<Bytes>().ok())
        .and_then(|bytes| decode_revert_data(&bytes))
        .unwrap_or_else(|| error.message.clone())
}

/// Decode `Error(string)` and `Panic(uint256)` revert data.
pub fn decode_revert_data(data: &[u8]) -> Option<String> {
    let (selector, payload) = data.split_at_checked(4)?;

    let ty = if selector == ERROR_STRING_SELECTOR {
        DynSolType::String
    } else if selector == PANIC_SELECTOR {
        DynSolType::Uint(256)
    } else {
        return None;
    };

    let decoded = DynSolType::Tuple(vec![ty]).abi_decode_params(payload).ok()?;
    let DynSolValue::Tuple(mut values) = decoded else {
        return None;
    };

    match values.pop()? {
        DynSolValue::String(reason) => Some(reason),
        DynSolValue::Uint(code, _) => Some(format!("panic code {:#x}", code)),
        _ => None,
    }
}
