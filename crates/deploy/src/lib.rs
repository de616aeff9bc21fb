//! hubdeploy-deploy - Deployment orchestration for Hub-registered contracts.
//!
//! This crate resolves a set of deployment steps into dependency order, decides
//! per step whether to skip, deploy or migrate based on the deployment
//! manifest, and drives the chain collaborators so that reruns are idempotent.

pub mod chain;
pub use chain::{Deployer, ParameterKind, ParameterSource, ParameterValue, Registry};

mod config;
pub use config::{ENV_PREFIX, PLAN_FILENAME, PlanConfig, StepConfig};

pub mod error;
pub use error::{ChainError, ConfigurationError, ParameterFailure, StepError};

pub mod gate;
pub use gate::Decision;

pub mod graph;

mod manifest;
pub use manifest::{
    ArgsFingerprint, JsonManifestStore, Manifest, ManifestEntry, ManifestStore,
    MemoryManifestStore,
};

pub mod migration;
pub use migration::MigrationPlan;

mod orchestrator;
pub use orchestrator::{
    Orchestrator, PlannedStep, RunReport, StepOutcome, StepReport, plan, plan_table,
};

mod rpc;
pub use rpc::RpcChain;

mod simulated;
pub use simulated::{SIMULATED_DEPLOYER, SimulatedChain};

mod step;
pub use step::{DeployAction, ParameterKey, Step, StepRegistry, UpgradeSpec};
