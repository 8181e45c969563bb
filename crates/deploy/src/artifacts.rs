//! Compiled contract artifacts.
//!
//! Contracts are compiled out of band (Hardhat). This module reads what the compiler left
//! behind: `<artifacts>/<sourceName>/<ContractName>.json` for the interface and creation
//! bytecode, and the build-info referenced by the companion `.dbg.json` for verification.

use std::path::{Path, PathBuf};

use alloy_core::{json_abi::JsonAbi, primitives::Bytes};
use anyhow::Context;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::CompilerSettings;

/// Directory Hardhat stores build-info files in, below the artifacts root.
pub const BUILD_INFO_DIR: &str = "build-info";

/// A deployable contract: its interface and creation bytecode.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractArtifact {
    pub contract_name: String,
    /// Source path relative to the project root, e.g. `contracts/pool/LiquidityBootstrapPool.sol`.
    pub source_name: String,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
}

impl ContractArtifact {
    /// `<sourceName>:<ContractName>`, the form explorers expect.
    pub fn fully_qualified_name(&self) -> String {
        format!("{}:{}", self.source_name, self.contract_name)
    }
}

/// Compiler version and standard-JSON input needed to verify a contract.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationSource {
    /// Long solc version without the `v` prefix, e.g. `0.8.21+commit.d9974bed`.
    pub compiler_version: String,
    pub standard_json_input: Value,
    pub optimizer: Option<OptimizerSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizerSettings {
    pub enabled: bool,
    pub runs: u32,
}

/// Provides compiled contracts by identifier.
pub trait ArtifactSource: Send + Sync {
    /// Load the artifact of `contract_id` (`path/File.sol:Name` or a bare `Name`).
    fn load(&self, contract_id: &str) -> anyhow::Result<ContractArtifact>;

    /// Compiler input and version of `artifact`, for explorer verification.
    fn verification_source(
        &self,
        artifact: &ContractArtifact,
    ) -> anyhow::Result<VerificationSource>;
}

#[derive(Deserialize)]
struct DebugFile {
    #[serde(rename = "buildInfo")]
    build_info: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildInfo {
    solc_long_version: String,
    input: Value,
}

/// Reads artifacts from a Hardhat project.
#[derive(Debug, Clone)]
pub struct HardhatArtifacts {
    artifacts_dir: PathBuf,
    sources_dir: PathBuf,
    compiler: CompilerSettings,
}

impl HardhatArtifacts {
    /// Artifacts under `artifacts_dir`; sources are looked up in its parent directory.
    pub fn new(artifacts_dir: impl Into<PathBuf>, compiler: CompilerSettings) -> Self {
        let artifacts_dir = artifacts_dir.into();
        let sources_dir = artifacts_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            artifacts_dir,
            sources_dir,
            compiler,
        }
    }

    pub fn with_sources_dir(mut self, sources_dir: impl Into<PathBuf>) -> Self {
        self.sources_dir = sources_dir.into();
        self
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// Path of the artifact file for `contract_id`.
    pub fn artifact_path(&self, contract_id: &str) -> anyhow::Result<PathBuf> {
        if let Some((source, name)) = contract_id.rsplit_once(':') {
            let path = self.artifacts_dir.join(source).join(format!("{name}.json"));
            if !path.is_file() {
                anyhow::bail!("No artifact for `{}` at {}", contract_id, path.display());
            }
            return Ok(path);
        }

        let file_name = format!("{contract_id}.json");
        let mut candidates = Vec::new();
        collect_artifacts(&self.artifacts_dir, &file_name, &mut candidates)?;
        candidates.sort();

        match candidates.len() {
            0 => anyhow::bail!(
                "No artifact named `{}` under {}",
                contract_id,
                self.artifacts_dir.display()
            ),
            1 => Ok(candidates.remove(0)),
            _ => {
                let names = candidates
                    .iter()
                    .filter_map(|p| p.strip_prefix(&self.artifacts_dir).ok())
                    .filter_map(|p| p.parent())
                    .map(|source| format!("{}:{}", source.display(), contract_id))
                    .collect::<Vec<_>>();
                anyhow::bail!(
                    "Contract name `{}` is ambiguous, use one of: {}",
                    contract_id,
                    names.join(", ")
                )
            }
        }
    }

    fn build_info(&self, artifact: &ContractArtifact) -> anyhow::Result<Option<BuildInfo>> {
        let dbg_path = self
            .artifacts_dir
            .join(&artifact.source_name)
            .join(format!("{}.dbg.json", artifact.contract_name));

        if !dbg_path.is_file() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&dbg_path)
            .with_context(|| format!("Failed to read {}", dbg_path.display()))?;
        let dbg: DebugFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", dbg_path.display()))?;

        let base = dbg_path.parent().unwrap_or(&self.artifacts_dir);
        let build_info_path = base.join(&dbg.build_info);
        if !build_info_path.is_file() {
            tracing::debug!(path = %build_info_path.display(), "Build-info referenced by debug file is missing");
            return Ok(None);
        }

        let content = std::fs::read_to_string(&build_info_path)
            .with_context(|| format!("Failed to read {}", build_info_path.display()))?;
        let info = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse build-info {}", build_info_path.display()))?;

        Ok(Some(info))
    }

    /// Standard-JSON input built from the single source file and the configured compiler settings.
    fn single_file_input(&self, artifact: &ContractArtifact) -> anyhow::Result<Value> {
        let source_path = self.sources_dir.join(&artifact.source_name);
        let content = std::fs::read_to_string(&source_path)
            .with_context(|| format!("Failed to read source {}", source_path.display()))?;

        Ok(json!({
            "language": "Solidity",
            "sources": {
                artifact.source_name.clone(): { "content": content }
            },
            "settings": {
                "optimizer": {
                    "enabled": self.compiler.optimizer,
                    "runs": self.compiler.runs,
                },
                "outputSelection": {
                    "*": { "*": ["abi", "evm.bytecode", "evm.deployedBytecode", "metadata"] }
                }
            }
        }))
    }
}

impl ArtifactSource for HardhatArtifacts {
    fn load(&self, contract_id: &str) -> anyhow::Result<ContractArtifact> {
        let path = self.artifact_path(contract_id)?;
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        let artifact: ContractArtifact = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))?;

        if artifact.bytecode.is_empty() {
            anyhow::bail!(
                "`{}` has no creation bytecode (abstract contract or interface?)",
                artifact.fully_qualified_name()
            );
        }

        tracing::debug!(
            contract = %artifact.fully_qualified_name(),
            bytecode_len = artifact.bytecode.len(),
            "Artifact loaded"
        );

        Ok(artifact)
    }

    fn verification_source(
        &self,
        artifact: &ContractArtifact,
    ) -> anyhow::Result<VerificationSource> {
        if let Some(info) = self.build_info(artifact)? {
            let optimizer = info.input.pointer("/settings/optimizer").map(|o| OptimizerSettings {
                enabled: o.get("enabled").and_then(Value::as_bool).unwrap_or(false),
                runs: o
                    .get("runs")
                    .and_then(Value::as_u64)
                    .and_then(|r| u32::try_from(r).ok())
                    .unwrap_or(200),
            });

            return Ok(VerificationSource {
                compiler_version: info.solc_long_version,
                standard_json_input: info.input,
                optimizer,
            });
        }

        tracing::debug!(
            contract = %artifact.fully_qualified_name(),
            "No build-info found, using single source file and configured compiler settings"
        );

        let version = self.compiler.version.trim_start_matches('v');
        if !version.contains("+commit.") {
            anyhow::bail!(
                "Compiler version `{}` is not a long solc version (e.g. `0.8.21+commit.d9974bed`)",
                self.compiler.version
            );
        }

        Ok(VerificationSource {
            compiler_version: version.to_string(),
            standard_json_input: self.single_file_input(artifact)?,
            optimizer: Some(OptimizerSettings {
                enabled: self.compiler.optimizer,
                runs: self.compiler.runs,
            }),
        })
    }
}

/// Recursively collect `file_name` artifacts below `dir`, skipping build-info.
fn collect_artifacts(dir: &Path, file_name: &str, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read artifacts directory {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|n| n == BUILD_INFO_DIR) {
                continue;
            }
            collect_artifacts(&path, file_name, out)?;
        } else if path.file_name().is_some_and(|n| n == file_name) {
            out.push(path);
        }
    }

    Ok(())
}
