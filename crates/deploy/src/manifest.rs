//! Deployment manifest: the durable record of what is currently deployed.
//!
//! One [`ManifestEntry`] per logical contract name. Entries are created on the
//! first successful deploy and replaced on migration; the orchestrator never
//! deletes them.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use comfy_table::{Table, presets::UTF8_FULL};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// SHA-256 fingerprint of a step's constructor arguments.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Deref, derive_more::Display,
)]
#[serde(transparent)]
pub struct ArgsFingerprint(String);

impl ArgsFingerprint {
    /// Hash the JSON encoding of `args`.
    ///
    /// The same arguments always produce the same fingerprint. Object keys are
    /// emitted in sorted order by `serde_json`'s default map.
    pub fn compute(args: &[Value]) -> Self {
        let json = serde_json::to_string(args)
            .expect("Constructor argument serialization should never fail");

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());

        Self(hex::encode(hasher.finalize()))
    }
}

/// What is deployed under one logical contract name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Logical contract name, also the alias used in the Hub.
    pub contract_name: String,
    /// Address of the current implementation.
    pub address: Address,
    /// Absent for contracts recorded before versioning existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args_fingerprint: Option<ArgsFingerprint>,
    /// Artifact that was deployed, e.g. `CommitManagerV2` behind `CommitManagerV1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    /// Unix timestamp of the deployment.
    #[serde(default)]
    pub deployed_at: i64,
}

/// All deployments recorded for one network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub network: String,
    #[serde(default)]
    pub contracts: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            contracts: BTreeMap::new(),
        }
    }

    pub fn get(&self, contract_name: &str) -> Option<&ManifestEntry> {
        self.contracts.get(contract_name)
    }

    pub fn is_deployed(&self, contract_name: &str) -> bool {
        self.contracts.contains_key(contract_name)
    }

    /// Insert or replace the entry for `entry.contract_name`.
    pub fn record(&mut self, entry: ManifestEntry) {
        self.contracts.insert(entry.contract_name.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_header(vec!["Contract", "Address", "Version", "Artifact", "Deployed at"]);
        for entry in self.contracts.values() {
            table.add_row(vec![
                entry.contract_name.clone(),
                entry.address.to_string(),
                entry
                    .version
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "legacy".to_string()),
                entry.artifact.clone().unwrap_or_default(),
                chrono::DateTime::from_timestamp(entry.deployed_at, 0)
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default(),
            ]);
        }
        table
    }
}

/// Persistence for the manifest.
pub trait ManifestStore {
    fn load(&self) -> Result<Manifest>;

    fn save(&mut self, manifest: &Manifest) -> Result<()>;
}

/// Stores the manifest as `{dir}/{network}_contracts.json`.
#[derive(Debug, Clone)]
pub struct JsonManifestStore {
    network: String,
    path: PathBuf,
}

impl JsonManifestStore {
    pub fn new(dir: impl AsRef<Path>, network: impl Into<String>) -> Self {
        let network = network.into();
        let path = dir.as_ref().join(format!("{network}_contracts.json"));
        Self { network, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ManifestStore for JsonManifestStore {
    /// A missing file is a first run and yields an empty manifest.
    fn load(&self) -> Result<Manifest> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "No manifest yet, starting empty");
            return Ok(Manifest::new(self.network.clone()));
        }

        let content = std::fs::read_to_string(&self.path).context(format!(
            "Failed to read manifest from {}",
            self.path.display()
        ))?;

        let manifest: Manifest =
            serde_json::from_str(&content).context("Failed to parse manifest JSON")?;

        if manifest.network != self.network {
            anyhow::bail!(
                "Manifest at {} belongs to network '{}', expected '{}'",
                self.path.display(),
                manifest.network,
                self.network
            );
        }

        Ok(manifest)
    }

    fn save(&mut self, manifest: &Manifest) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create manifest directory")?;
        }

        let json =
            serde_json::to_string_pretty(manifest).context("Failed to serialize manifest")?;

        std::fs::write(&self.path, json).context(format!(
            "Failed to write manifest to {}",
            self.path.display()
        ))?;

        tracing::debug!(path = %self.path.display(), contracts = manifest.len(), "Manifest saved");
        Ok(())
    }
}

/// Keeps the manifest in memory. Counts saves so tests can check the driver
/// persisted after every step.
#[derive(Debug, Clone, Default)]
pub struct MemoryManifestStore {
    manifest: Manifest,
    saves: usize,
}

impl MemoryManifestStore {
    pub fn new(manifest: Manifest) -> Self {
        Self { manifest, saves: 0 }
    }

    pub fn saves(&self) -> usize {
        self.saves
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }
}

impl ManifestStore for MemoryManifestStore {
    fn load(&self) -> Result<Manifest> {
        Ok(self.manifest.clone())
    }

    fn save(&mut self, manifest: &Manifest) -> Result<()> {
        self.manifest = manifest.clone();
        self.saves += 1;
        Ok(())
    }
}
