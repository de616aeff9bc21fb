//! Plan files: the network settings and step declarations for a deployment.
//!
//! Plans are TOML, merged with `HUBDEPLOY_*` environment variables for the
//! network-level settings.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::{
    chain::ParameterValue,
    step::{Step, StepRegistry, UpgradeSpec},
};

/// The default name for a plan file.
pub const PLAN_FILENAME: &str = "Hubdeploy.toml";

/// Environment prefix for plan overrides.
pub const ENV_PREFIX: &str = "HUBDEPLOY_";

fn default_network() -> String {
    "localnet".to_string()
}

fn default_manifest_dir() -> PathBuf {
    PathBuf::from("deployments")
}

fn default_true() -> bool {
    true
}

/// A whole deployment plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Network name, also the manifest file prefix.
    #[serde(default = "default_network")]
    pub network: String,
    /// Directory holding `<network>_contracts.json`.
    #[serde(default = "default_manifest_dir")]
    pub manifest_dir: PathBuf,
    /// Deployment sidecar endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<Url>,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// One `[[steps]]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    /// Logical contract name. Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Artifact to deploy. Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default = "default_true")]
    pub register_in_hub: bool,
    /// Parameters written after a fresh deploy.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, ParameterValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<UpgradeSpec>,
}

impl From<StepConfig> for Step {
    fn from(config: StepConfig) -> Self {
        let mut step = Step::new(config.name)
            .depends_on(config.dependencies)
            .tags(config.tags)
            .args(config.args);

        if let Some(target) = config.target {
            step = step.target(target);
        }
        if let Some(artifact) = config.artifact {
            step = step.artifact(artifact);
        }
        if let Some(version) = config.version {
            step = step.version(version);
        }
        if let Some(upgrade) = config.upgrade {
            step = step.upgrade(upgrade);
        }
        for (key, value) in config.parameters {
            step = step.parameter(key, value);
        }
        if !config.register_in_hub {
            step = step.unregistered();
        }
        step
    }
}

impl PlanConfig {
    /// Load a plan from a file, or from `Hubdeploy.toml` inside a directory.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Plan file or directory not found: {}", path.display());
        }

        let plan_path = if path.is_dir() {
            path.join(PLAN_FILENAME)
        } else {
            path.to_path_buf()
        };

        let plan: Self = Figment::new()
            .merge(Toml::file(&plan_path))
            .merge(Env::prefixed(ENV_PREFIX).only(&["network", "manifest_dir", "rpc_url"]))
            .extract()
            .context(format!("Failed to parse plan {}", plan_path.display()))?;

        tracing::info!(path = %plan_path.display(), steps = plan.steps.len(), "Plan loaded");
        Ok(plan)
    }

    /// Parse a plan from TOML text, without environment overrides.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Figment::new()
            .merge(Toml::string(content))
            .extract()
            .context("Failed to parse plan as TOML")
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize plan to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write plan to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Plan saved");
        Ok(())
    }

    pub fn registry(&self) -> StepRegistry {
        StepRegistry::new(self.steps.iter().cloned().map(Step::from).collect())
    }
}
