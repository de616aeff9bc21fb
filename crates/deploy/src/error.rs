//! Error taxonomy for the orchestrator.
//!
//! Configuration errors are fatal and raised before any transaction is sent.
//! Step errors are isolated to the step (and its dependents) that hit them.

use alloy_core::primitives::Address;
use thiserror::Error;

/// Invalid step set. Aborts the whole run before anything is deployed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("step '{name}' is declared more than once")]
    DuplicateStep { name: String },

    #[error("no step is tagged '{tag}'")]
    UnknownTag { tag: String },
}

/// Failure reported by an external collaborator (deployer, hub, parameter storage).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("transaction reverted: {reason}")]
    Reverted { reason: String },

    #[error("network error: {0}")]
    Network(String),
}

/// Why a carried parameter could not be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterFailure {
    #[error("missing on the previous implementation")]
    Missing,

    #[error("expected a {expected} value, found {found}")]
    Incompatible { expected: String, found: String },

    #[error("value read back from the new implementation does not match")]
    NotConfirmed,

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Per-step runtime failure. The step ends `Failed` and its dependents `Blocked`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error("deployment of '{artifact}' reverted: {reason}")]
    DeploymentReverted { artifact: String, reason: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("hub update for '{alias}' failed: {source}")]
    Registry {
        alias: String,
        #[source]
        source: ChainError,
    },

    #[error("initial parameter '{key}' could not be written: {source}")]
    ParameterInitFailed {
        key: String,
        #[source]
        source: ChainError,
    },

    #[error("parameter '{key}' could not be migrated ({reason}); new implementation at {orphaned} left unconfigured")]
    ParameterMigrationFailed {
        key: String,
        reason: ParameterFailure,
        orphaned: Address,
    },

    #[error("failed to persist the manifest: {0}")]
    Persistence(String),
}

impl StepError {
    /// Map a deployer failure for `artifact` onto the step taxonomy.
    pub fn from_deploy(artifact: &str, err: ChainError) -> Self {
        match err {
            ChainError::Reverted { reason } => Self::DeploymentReverted {
                artifact: artifact.to_string(),
                reason,
            },
            ChainError::Network(msg) => Self::Network(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_members() {
        let err = ConfigurationError::CyclicDependency {
            cycle: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency: A -> B -> A");
    }

    #[test]
    fn test_deploy_error_mapping() {
        let reverted = StepError::from_deploy(
            "Hub",
            ChainError::Reverted {
                reason: "out of gas".into(),
            },
        );
        assert!(matches!(reverted, StepError::DeploymentReverted { ref artifact, .. } if artifact == "Hub"));

        let network = StepError::from_deploy("Hub", ChainError::Network("timeout".into()));
        assert_eq!(network, StepError::Network("timeout".into()));
    }
}
