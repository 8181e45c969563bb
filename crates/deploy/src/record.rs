//! The terminal artifact of a deployment run.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::Context;
use comfy_table::{Table, presets::UTF8_FULL};
use serde::Serialize;

use crate::network::NetworkProfile;

/// A confirmed contract deployment.
///
/// Built once the creation transaction is confirmed and never changed afterwards;
/// [`DeploymentRecord::into_verified`] produces a new record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRecord {
    /// `<sourceName>:<ContractName>` of the deployed contract.
    pub contract_id: String,
    pub contract_address: Address,
    pub network: Arc<NetworkProfile>,
    pub transaction_hash: B256,
    pub block_confirmations: u64,
    pub verified: bool,
    pub deployer: Address,
    pub nonce: u64,
    pub block_number: u64,
    pub gas_used: u64,
    /// ABI-encoded constructor arguments, as sent after the creation code.
    pub constructor_args: Bytes,
}

impl DeploymentRecord {
    /// The same record, marked as verified on the explorer.
    pub fn into_verified(self) -> Self {
        Self {
            verified: true,
            ..self
        }
    }

    /// Contract name without the source path.
    pub fn contract_name(&self) -> &str {
        self.contract_id
            .rsplit_once(':')
            .map_or(self.contract_id.as_str(), |(_, name)| name)
    }

    /// Explorer page of the deployed contract, if the network has an explorer.
    pub fn explorer_url(&self) -> Option<String> {
        self.network
            .explorer
            .as_ref()
            .map(|explorer| explorer.address_url(&self.contract_address))
    }

    /// Serializable view of the record. Carries no secret.
    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            contract: self.contract_id.clone(),
            contract_address: self.contract_address,
            network: self.network.name.clone(),
            chain_id: self.network.chain_id,
            transaction_hash: self.transaction_hash,
            block_number: self.block_number,
            block_confirmations: self.block_confirmations,
            verified: self.verified,
            deployer: self.deployer,
            nonce: self.nonce,
            gas_used: self.gas_used,
            constructor_args: self.constructor_args.clone(),
            explorer_url: self.explorer_url(),
            deployed_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL).set_header(vec!["Field", "Value"]);

        table.add_row(vec!["Contract".to_string(), self.contract_id.clone()]);
        table.add_row(vec!["Address".to_string(), self.contract_address.to_string()]);
        table.add_row(vec!["Network".to_string(), self.network.name.clone()]);
        table.add_row(vec!["Chain ID".to_string(), self.network.chain_id.to_string()]);
        table.add_row(vec!["Transaction".to_string(), self.transaction_hash.to_string()]);
        table.add_row(vec!["Confirmations".to_string(), self.block_confirmations.to_string()]);
        table.add_row(vec!["Verified".to_string(), self.verified.to_string()]);
        if let Some(url) = self.explorer_url() {
            table.add_row(vec!["Explorer".to_string(), url]);
        }

        table
    }

    /// Write the record as JSON to `<dir>/<network>/<ContractName>.json`.
    pub fn save_to_dir(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        let network_dir = dir.join(&self.network.name);
        std::fs::create_dir_all(&network_dir)
            .with_context(|| format!("Failed to create {}", network_dir.display()))?;

        let path = network_dir.join(format!("{}.json", self.contract_name()));
        let content = serde_json::to_string_pretty(&self.summary())
            .context("Failed to serialize deployment record")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write deployment record to {}", path.display()))?;

        tracing::info!(path = %path.display(), "Deployment record saved");
        Ok(path)
    }
}

/// What gets printed and saved for a deployment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub contract: String,
    pub contract_address: Address,
    pub network: String,
    pub chain_id: u64,
    pub transaction_hash: B256,
    pub block_number: u64,
    pub block_confirmations: u64,
    pub verified: bool,
    pub deployer: Address,
    pub nonce: u64,
    pub gas_used: u64,
    pub constructor_args: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
    pub deployed_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        credentials::{CredentialSpec, SecretString},
        network::{ExplorerProfile, GasPolicy},
    };

    const SECRET: &str = "a58aadef3c5321f9601f2aa3c7e8cfc451fe09ca635c913d21b829f6614585f2";

    fn record() -> DeploymentRecord {
        let network = NetworkProfile {
            name: "MerlinTestnet".to_string(),
            rpc_url: "https://testnet-rpc.merlinchain.io".to_string(),
            chain_id: 686868,
            mainnet: false,
            allow_default_credential: false,
            gas: GasPolicy::Auto,
            credential: CredentialSpec::env("TEST_SECRET_KEY").with_fallback(SECRET),
            explorer: Some(ExplorerProfile {
                api_base_url: "https://testnet-scan.merlinchain.io/api".to_string(),
                browser_base_url: "https://testnet-scan.merlinchain.io".to_string(),
                api_key: SecretString::new("abc"),
                api_key_env: None,
            }),
            confirmations: None,
        };

        DeploymentRecord {
            contract_id: "contracts/pool/LiquidityBootstrapPool.sol:LiquidityBootstrapPool"
                .to_string(),
            contract_address: Address::repeat_byte(0x22),
            network: Arc::new(network),
            transaction_hash: B256::repeat_byte(0x33),
            block_confirmations: 1,
            verified: false,
            deployer: Address::repeat_byte(0x44),
            nonce: 3,
            block_number: 100,
            gas_used: 1_000_000,
            constructor_args: Bytes::new(),
        }
    }

    #[test]
    fn test_explorer_url() {
        let record = record();
        assert_eq!(
            record.explorer_url().unwrap(),
            format!(
                "https://testnet-scan.merlinchain.io/address/{}",
                record.contract_address
            )
        );
    }

    #[test]
    fn test_into_verified_keeps_everything_else() {
        let record = record();
        let verified = record.clone().into_verified();
        assert!(verified.verified);
        assert_eq!(verified.transaction_hash, record.transaction_hash);
        assert_eq!(verified.contract_address, record.contract_address);
    }

    #[test]
    fn test_saved_record_has_no_secrets() {
        let dir = tempdir::TempDir::new("shipyard-record").unwrap();
        let path = record().save_to_dir(dir.path()).unwrap();

        assert!(path.ends_with("MerlinTestnet/LiquidityBootstrapPool.json"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains(SECRET));
        assert!(!content.contains("\"abc\""));

        let json: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(json["chainId"], 686868);
        assert_eq!(json["verified"], false);
        assert!(json["deployedAt"].is_string());
    }

    #[test]
    fn test_table_lists_address_and_explorer() {
        let rendered = record().to_table().to_string();
        assert!(rendered.contains("MerlinTestnet"));
        assert!(rendered.contains("https://testnet-scan.merlinchain.io/address/"));
    }
}
