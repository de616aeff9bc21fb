//! The orchestration loop.
//!
//! Steps run one at a time in resolved order. Each step consults the gate,
//! deploys or migrates, and the manifest is persisted before the next step
//! starts, so an interrupted or partially failed run can simply be rerun.

use std::collections::HashSet;

use alloy_core::primitives::Address;
use comfy_table::{Table, presets::UTF8_FULL};

use crate::{
    chain::{Deployer, ParameterSource, Registry},
    error::{ConfigurationError, StepError},
    gate::{self, Decision},
    graph,
    manifest::{Manifest, ManifestEntry, ManifestStore},
    migration,
    step::Step,
};

/// Terminal state of a step.
#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
pub enum StepOutcome {
    #[strum(to_string = "skipped")]
    Skipped,
    #[strum(to_string = "deployed")]
    Deployed { address: Address },
    #[strum(to_string = "migrated")]
    Migrated { from: Address, to: Address },
    #[strum(to_string = "failed")]
    Failed(StepError),
    /// Not attempted because `by` failed or was itself blocked.
    #[strum(to_string = "blocked")]
    Blocked { by: String },
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Skipped | Self::Deployed { .. } | Self::Migrated { .. }
        )
    }

    fn detail(&self) -> String {
        match self {
            Self::Skipped => String::new(),
            Self::Deployed { address } => address.to_string(),
            Self::Migrated { from, to } => format!("{from} -> {to}"),
            Self::Failed(err) => err.to_string(),
            Self::Blocked { by } => format!("blocked by {by}"),
        }
    }
}

/// Outcome of one step, with the names needed to report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: String,
    pub target: String,
    pub outcome: StepOutcome,
}

/// Everything a run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Manifest after the run, including every successful step.
    pub manifest: Manifest,
    /// Per-step outcomes in execution order.
    pub steps: Vec<StepReport>,
}

impl RunReport {
    /// True when no step failed or was blocked.
    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|report| report.outcome.is_success())
    }

    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|report| report.step == step)
            .map(|report| &report.outcome)
    }

    pub fn failed(&self) -> impl Iterator<Item = &StepReport> {
        self.steps
            .iter()
            .filter(|report| matches!(report.outcome, StepOutcome::Failed(_)))
    }

    pub fn blocked(&self) -> impl Iterator<Item = &StepReport> {
        self.steps
            .iter()
            .filter(|report| matches!(report.outcome, StepOutcome::Blocked { .. }))
    }

    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_header(vec!["Step", "Target", "Outcome", "Detail"]);
        for report in &self.steps {
            table.add_row(vec![
                report.step.clone(),
                report.target.clone(),
                report.outcome.to_string(),
                report.outcome.detail(),
            ]);
        }
        table
    }
}

/// A step and what the gate would decide for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub step: String,
    pub target: String,
    pub decision: Decision,
}

/// Resolve `steps` and decide each one against `manifest` without touching
/// the chain.
///
/// Decisions assume every earlier step succeeds, so a V2 upgrade planned in
/// the same run as its V1 predecessor shows up as a migration.
pub fn plan(steps: &[Step], manifest: &Manifest) -> Result<Vec<PlannedStep>, ConfigurationError> {
    let order = graph::resolve(steps)?;
    let mut projected = manifest.clone();

    Ok(order
        .into_iter()
        .map(|step| {
            let decision = gate::decide(&step, &projected);
            if decision != Decision::Skip {
                let address = projected
                    .get(&step.target)
                    .map(|entry| entry.address)
                    .unwrap_or(Address::ZERO);
                projected.record(entry_for(&step, address));
            }
            PlannedStep {
                step: step.name,
                target: step.target,
                decision,
            }
        })
        .collect())
}

/// Render a plan as a table.
pub fn plan_table(planned: &[PlannedStep]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["#", "Step", "Target", "Action", "Current"]);
    for (i, planned) in planned.iter().enumerate() {
        let current = match &planned.decision {
            Decision::Migrate(prior) => {
                // Zero marks a deployment projected earlier in this plan.
                let address = if prior.address.is_zero() {
                    "pending".to_string()
                } else {
                    prior.address.to_string()
                };
                match &prior.version {
                    Some(version) => format!("{version} @ {address}"),
                    None => format!("legacy @ {address}"),
                }
            }
            _ => String::new(),
        };
        table.add_row(vec![
            (i + 1).to_string(),
            planned.step.clone(),
            planned.target.clone(),
            planned.decision.to_string(),
            current,
        ]);
    }
    table
}

fn entry_for(step: &Step, address: Address) -> ManifestEntry {
    ManifestEntry {
        contract_name: step.target.clone(),
        address,
        version: step.version.clone(),
        args_fingerprint: Some(step.fingerprint()),
        artifact: Some(step.action.artifact.clone()),
        deployed_at: chrono::Utc::now().timestamp(),
    }
}

/// Drives a set of steps against the chain collaborators.
///
/// The orchestrator is the only writer of the manifest.
pub struct Orchestrator<D, R, P, S> {
    deployer: D,
    registry: R,
    parameters: P,
    store: S,
}

impl<D, R, P, S> Orchestrator<D, R, P, S>
where
    D: Deployer,
    R: Registry,
    P: ParameterSource,
    S: ManifestStore,
{
    pub fn new(deployer: D, registry: R, parameters: P, store: S) -> Self {
        Self {
            deployer,
            registry,
            parameters,
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Run every step of `steps` against `manifest`.
    ///
    /// Configuration errors are returned before any transaction is sent.
    /// Step failures do not abort the run: the failing step's dependents are
    /// blocked and independent branches carry on.
    pub async fn run(
        &mut self,
        steps: &[Step],
        manifest: Manifest,
    ) -> Result<RunReport, ConfigurationError> {
        let order = graph::resolve(steps)?;
        let mut manifest = manifest;
        let mut reports = Vec::with_capacity(order.len());
        let mut unsuccessful: HashSet<String> = HashSet::new();
        let mut halted_by: Option<String> = None;

        tracing::info!(
            network = %manifest.network,
            steps = order.len(),
            "Starting deployment run..."
        );

        for step in order {
            let blocker = halted_by.clone().or_else(|| {
                step.dependencies
                    .iter()
                    .find(|dependency| unsuccessful.contains(*dependency))
                    .cloned()
            });

            let outcome = match blocker {
                Some(by) => {
                    tracing::warn!(step = %step.name, target = %step.target, by = %by, "Step blocked");
                    StepOutcome::Blocked { by }
                }
                None => {
                    let outcome = self.execute(&step, &mut manifest).await;
                    // Without a saved manifest the run is no longer resumable.
                    if matches!(outcome, StepOutcome::Failed(StepError::Persistence(_))) {
                        halted_by = Some(step.name.clone());
                    }
                    outcome
                }
            };

            if !outcome.is_success() {
                unsuccessful.insert(step.name.clone());
            }

            reports.push(StepReport {
                step: step.name,
                target: step.target,
                outcome,
            });
        }

        let report = RunReport {
            manifest,
            steps: reports,
        };

        tracing::info!(
            succeeded = report.is_success(),
            failed = report.failed().count(),
            blocked = report.blocked().count(),
            "Deployment run finished"
        );

        Ok(report)
    }

    async fn execute(&mut self, step: &Step, manifest: &mut Manifest) -> StepOutcome {
        let decision = gate::decide(step, manifest);
        tracing::debug!(step = %step.name, target = %step.target, %decision, "Gate decision");

        let result = match decision {
            Decision::Skip => {
                tracing::info!(step = %step.name, target = %step.target, "Already current, skipping");
                return StepOutcome::Skipped;
            }
            Decision::FreshDeploy => self.fresh_deploy(step, manifest.get(&step.target)).await,
            Decision::Migrate(prior) => {
                migration::migrate(step, &prior, &self.deployer, &self.registry, &self.parameters)
                    .await
                    .map(|entry| (entry, Some(prior.address)))
            }
        };

        let (entry, replaced) = match result {
            Ok(done) => done,
            Err(err) => {
                tracing::error!(step = %step.name, target = %step.target, error = %err, "Step failed");
                return StepOutcome::Failed(err);
            }
        };

        let address = entry.address;
        manifest.record(entry);

        if let Err(err) = self.store.save(manifest) {
            tracing::error!(step = %step.name, target = %step.target, error = ?err, "Failed to persist manifest");
            return StepOutcome::Failed(StepError::Persistence(format!("{err:#}")));
        }

        match replaced {
            Some(from) => {
                tracing::info!(step = %step.name, target = %step.target, %from, to = %address, "Migrated");
                StepOutcome::Migrated { from, to: address }
            }
            None => {
                tracing::info!(step = %step.name, target = %step.target, %address, "Deployed");
                StepOutcome::Deployed { address }
            }
        }
    }

    async fn fresh_deploy(
        &self,
        step: &Step,
        existing: Option<&ManifestEntry>,
    ) -> Result<(ManifestEntry, Option<Address>), StepError> {
        match existing {
            Some(entry) => tracing::info!(
                step = %step.name,
                target = %step.target,
                previous = %entry.address,
                "Redeploying from scratch"
            ),
            None => tracing::info!(step = %step.name, target = %step.target, "Deploying"),
        }

        let artifact = &step.action.artifact;
        let address = self
            .deployer
            .deploy(artifact, &step.action.constructor_args)
            .await
            .map_err(|e| StepError::from_deploy(artifact, e))?;

        if step.action.register_in_hub {
            self.registry
                .set_address(&step.target, address)
                .await
                .map_err(|source| StepError::Registry {
                    alias: step.target.clone(),
                    source,
                })?;
        }

        for (key, value) in &step.action.initial_parameters {
            self.parameters
                .write_parameter(address, key, value.clone())
                .await
                .map_err(|source| StepError::ParameterInitFailed {
                    key: key.clone(),
                    source,
                })?;
        }

        Ok((entry_for(step, address), None))
    }
}
