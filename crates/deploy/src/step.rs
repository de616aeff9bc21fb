//! Deployment steps and the step registry.
//!
//! A [`Step`] is pure configuration: which artifact to deploy, under which
//! logical contract name, after which other steps. The registry keeps steps in
//! declaration order, which the resolver uses as its tie-break.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    chain::{ParameterKind, ParameterValue},
    error::ConfigurationError,
    manifest::ArgsFingerprint,
};

/// What a step deploys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployAction {
    /// Contract identifier handed to the deployer.
    pub artifact: String,
    pub constructor_args: Vec<Value>,
    /// Whether the deployed address is registered in the Hub under the step target.
    pub register_in_hub: bool,
    /// Parameters written once after a fresh deploy.
    pub initial_parameters: BTreeMap<String, ParameterValue>,
}

/// A parameter carried from the old implementation to the new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterKey {
    pub key: String,
    pub kind: ParameterKind,
}

impl ParameterKey {
    pub fn new(key: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            key: key.into(),
            kind,
        }
    }
}

/// Marks a step as an in-place upgrade of the contract it targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeSpec {
    /// Recorded versions this upgrade may migrate from. `None` accepts any older version.
    #[serde(default)]
    pub compatible_from: Option<VersionReq>,
    /// Parameters copied from the old implementation, in order.
    #[serde(default)]
    pub parameters: Vec<ParameterKey>,
}

/// A named deployment step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: String,
    /// Logical contract name. Stable across versions: a V2 step targets the
    /// same contract as its V1 predecessor.
    pub target: String,
    pub dependencies: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub version: Option<Version>,
    pub action: DeployAction,
    pub upgrade: Option<UpgradeSpec>,
}

impl Step {
    /// A step deploying the artifact `name` under the contract name `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            target: name.clone(),
            dependencies: BTreeSet::new(),
            tags: BTreeSet::from([name.clone()]),
            version: None,
            action: DeployAction {
                artifact: name.clone(),
                constructor_args: Vec::new(),
                register_in_hub: true,
                initial_parameters: BTreeMap::new(),
            },
            upgrade: None,
            name,
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn artifact(mut self, artifact: impl Into<String>) -> Self {
        self.action.artifact = artifact.into();
        self
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Adds tags. The step name is always a tag.
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn args(mut self, constructor_args: Vec<Value>) -> Self {
        self.action.constructor_args = constructor_args;
        self
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.action.initial_parameters.insert(key.into(), value.into());
        self
    }

    /// Do not register the deployed address in the Hub (the Hub itself).
    pub fn unregistered(mut self) -> Self {
        self.action.register_in_hub = false;
        self
    }

    pub fn upgrade(mut self, upgrade: UpgradeSpec) -> Self {
        self.upgrade = Some(upgrade);
        self
    }

    pub fn is_upgrade(&self) -> bool {
        self.upgrade.is_some()
    }

    pub fn fingerprint(&self) -> ArgsFingerprint {
        ArgsFingerprint::compute(&self.action.constructor_args)
    }
}

/// Immutable set of steps in declaration order.
#[derive(Debug, Clone, Default)]
pub struct StepRegistry {
    steps: Vec<Step>,
}

impl StepRegistry {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn get(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps carrying any of `tags`, plus all of their transitive dependencies
    /// whatever their tags. An empty selection keeps every step.
    ///
    /// The result keeps declaration order.
    pub fn select(&self, tags: &[String]) -> Result<Vec<Step>, ConfigurationError> {
        if tags.is_empty() {
            return Ok(self.steps.clone());
        }

        let by_name: HashMap<&str, &Step> = self
            .steps
            .iter()
            .map(|step| (step.name.as_str(), step))
            .collect();

        let mut pending: Vec<&Step> = Vec::new();
        for tag in tags {
            let tagged: Vec<&Step> = self
                .steps
                .iter()
                .filter(|step| step.tags.contains(tag))
                .collect();
            if tagged.is_empty() {
                return Err(ConfigurationError::UnknownTag { tag: tag.clone() });
            }
            pending.extend(tagged);
        }

        let mut selected: HashSet<&str> = HashSet::new();
        while let Some(step) = pending.pop() {
            if !selected.insert(step.name.as_str()) {
                continue;
            }
            for dependency in &step.dependencies {
                let dep = by_name.get(dependency.as_str()).copied().ok_or_else(|| {
                    ConfigurationError::UnknownDependency {
                        step: step.name.clone(),
                        dependency: dependency.clone(),
                    }
                })?;
                pending.push(dep);
            }
        }

        tracing::debug!(?tags, selected = selected.len(), "Selected steps by tag");

        Ok(self
            .steps
            .iter()
            .filter(|step| selected.contains(step.name.as_str()))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> StepRegistry {
        StepRegistry::new(vec![
            Step::new("Hub").unregistered(),
            Step::new("ParametersStorage").depends_on(["Hub"]),
            Step::new("ServiceAgreementStorageV1").depends_on(["Hub"]),
            Step::new("CommitManagerV2")
                .target("CommitManagerV1")
                .tags(["v2"])
                .depends_on(["ParametersStorage"]),
        ])
    }

    fn names(steps: &[Step]) -> Vec<&str> {
        steps.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_new_defaults_to_own_name() {
        let step = Step::new("Hub");
        assert_eq!(step.target, "Hub");
        assert_eq!(step.action.artifact, "Hub");
        assert!(step.tags.contains("Hub"));
        assert!(step.action.register_in_hub);
        assert!(!step.is_upgrade());
    }

    #[test]
    fn test_select_empty_keeps_all() {
        let selected = registry().select(&[]).unwrap();
        assert_eq!(selected.len(), 4);
    }

    #[test]
    fn test_select_pulls_transitive_dependencies() {
        let selected = registry().select(&["v2".to_string()]).unwrap();
        assert_eq!(
            names(&selected),
            vec!["Hub", "ParametersStorage", "CommitManagerV2"]
        );
    }

    #[test]
    fn test_select_unknown_tag() {
        let err = registry().select(&["v3".to_string()]).unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownTag { tag: "v3".into() });
    }

    #[test]
    fn test_select_unknown_dependency() {
        let registry = StepRegistry::new(vec![Step::new("A").depends_on(["Missing"])]);
        let err = registry.select(&["A".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownDependency { .. }));
    }

    #[test]
    fn test_fingerprint_follows_args() {
        let plain = Step::new("Hub");
        let with_args = Step::new("Hub").args(vec![serde_json::json!(1)]);
        assert_ne!(plain.fingerprint(), with_args.fingerprint());
    }
}
