//! In-place contract upgrades behind a stable Hub alias.

use alloy_core::primitives::Address;

use crate::{
    chain::{Deployer, ParameterSource, ParameterValue, Registry},
    error::{ParameterFailure, StepError},
    manifest::ManifestEntry,
    step::{ParameterKey, Step},
};

/// What a single migration does. Built per run, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    /// Artifact currently behind the alias.
    pub from_contract_name: String,
    /// Artifact replacing it.
    pub to_contract_name: String,
    /// Hub alias, unchanged by the migration.
    pub alias: String,
    pub parameters_to_carry: Vec<ParameterKey>,
}

impl MigrationPlan {
    pub fn new(step: &Step, prior: &ManifestEntry) -> Self {
        Self {
            from_contract_name: prior
                .artifact
                .clone()
                .unwrap_or_else(|| prior.contract_name.clone()),
            to_contract_name: step.action.artifact.clone(),
            alias: prior.contract_name.clone(),
            parameters_to_carry: match &step.upgrade {
                Some(upgrade) => upgrade.parameters.clone(),
                // Plain steps carry what they configure.
                None => step
                    .action
                    .initial_parameters
                    .iter()
                    .map(|(key, value)| ParameterKey::new(key.clone(), value.kind()))
                    .collect(),
            },
        }
    }
}

/// Replace the implementation recorded in `prior` with the one `step` deploys.
///
/// Deploys the new artifact, points the prior alias at it in the Hub, then
/// copies every carried parameter from the old address to the new one.
/// Declared parameters the old implementation does not hold are written as
/// declared, so configuration merges rather than resets. There
/// is no rollback: if a parameter cannot be carried the Hub already points at
/// the new address, the error names that address, and the caller must not
/// record the migration in the manifest.
pub async fn migrate<D, R, P>(
    step: &Step,
    prior: &ManifestEntry,
    deployer: &D,
    registry: &R,
    parameters: &P,
) -> Result<ManifestEntry, StepError>
where
    D: Deployer,
    R: Registry,
    P: ParameterSource,
{
    let plan = MigrationPlan::new(step, prior);

    tracing::info!(
        step = %step.name,
        alias = %plan.alias,
        from = %plan.from_contract_name,
        to = %plan.to_contract_name,
        prior_address = %prior.address,
        carried = plan.parameters_to_carry.len(),
        "Migrating contract..."
    );

    let address = deployer
        .deploy(&plan.to_contract_name, &step.action.constructor_args)
        .await
        .map_err(|e| StepError::from_deploy(&plan.to_contract_name, e))?;

    tracing::debug!(artifact = %plan.to_contract_name, %address, "New implementation deployed");

    if step.action.register_in_hub {
        rewire_alias(registry, &plan.alias, prior.address, address).await?;
    }

    let declared = &step.action.initial_parameters;
    for parameter in &plan.parameters_to_carry {
        carry_parameter(
            parameters,
            prior.address,
            address,
            parameter,
            declared.get(&parameter.key),
        )
        .await
        .map_err(|reason| {
            tracing::error!(
                step = %step.name,
                key = %parameter.key,
                error = %reason,
                orphaned = %address,
                "Parameter migration failed"
            );
            StepError::ParameterMigrationFailed {
                key: parameter.key.clone(),
                reason,
                orphaned: address,
            }
        })?;
    }

    // Parameters introduced by this version have nothing to carry from.
    for (key, value) in declared {
        if plan.parameters_to_carry.iter().any(|p| p.key == *key) {
            continue;
        }
        parameters
            .write_parameter(address, key, value.clone())
            .await
            .map_err(|source| StepError::ParameterMigrationFailed {
                key: key.clone(),
                reason: source.into(),
                orphaned: address,
            })?;
        tracing::debug!(key = %key, %address, "New parameter written");
    }

    Ok(ManifestEntry {
        contract_name: plan.alias,
        address,
        version: step.version.clone(),
        args_fingerprint: Some(step.fingerprint()),
        artifact: Some(plan.to_contract_name),
        deployed_at: chrono::Utc::now().timestamp(),
    })
}

/// Point `alias` at `new`. A Hub entry that no longer matches the manifest is
/// reported but still overwritten.
async fn rewire_alias<R: Registry>(
    registry: &R,
    alias: &str,
    expected: Address,
    new: Address,
) -> Result<(), StepError> {
    let registry_error = |source| StepError::Registry {
        alias: alias.to_string(),
        source,
    };

    match registry.get_address(alias).await.map_err(registry_error)? {
        Some(current) if current != expected => {
            tracing::warn!(
                alias,
                hub = %current,
                manifest = %expected,
                "Hub entry drifted from the manifest, overwriting"
            );
        }
        Some(_) => {}
        None => tracing::debug!(alias, "Alias not registered in the Hub yet"),
    }

    registry.set_address(alias, new).await.map_err(registry_error)?;
    tracing::debug!(alias, address = %new, "Hub alias rewired");
    Ok(())
}

/// Copy one parameter and read it back from the new address.
///
/// A key the old implementation never set falls back to `declared`.
async fn carry_parameter<P: ParameterSource>(
    parameters: &P,
    from: Address,
    to: Address,
    parameter: &ParameterKey,
    declared: Option<&ParameterValue>,
) -> Result<(), ParameterFailure> {
    let value = parameters
        .read_parameter(from, &parameter.key)
        .await?
        .or_else(|| declared.cloned())
        .ok_or(ParameterFailure::Missing)?;

    if value.kind() != parameter.kind {
        return Err(ParameterFailure::Incompatible {
            expected: parameter.kind.to_string(),
            found: value.kind().to_string(),
        });
    }

    parameters
        .write_parameter(to, &parameter.key, value.clone())
        .await?;

    let confirmed = parameters.read_parameter(to, &parameter.key).await?;
    if confirmed.as_ref() != Some(&value) {
        return Err(ParameterFailure::NotConfirmed);
    }

    tracing::trace!(key = %parameter.key, %from, %to, "Parameter carried");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::{ParameterKind, ParameterValue},
        simulated::SimulatedChain,
        step::UpgradeSpec,
    };
    use semver::Version;

    async fn deployed_v1(chain: &SimulatedChain) -> ManifestEntry {
        let address = chain.deploy("CommitManagerV1", &[]).await.unwrap();
        chain.set_address("CommitManagerV1", address).await.unwrap();
        chain
            .seed_parameter(address, "r0", ParameterValue::from(3u64))
            .await;
        chain
            .seed_parameter(address, "commitWindowDurationPerc", ParameterValue::from(25u64))
            .await;

        ManifestEntry {
            contract_name: "CommitManagerV1".to_string(),
            address,
            version: Some(Version::new(1, 0, 0)),
            args_fingerprint: None,
            artifact: Some("CommitManagerV1".to_string()),
            deployed_at: 0,
        }
    }

    fn v2_step(parameters: Vec<ParameterKey>) -> Step {
        Step::new("CommitManagerV2")
            .target("CommitManagerV1")
            .version(Version::new(2, 0, 0))
            .upgrade(UpgradeSpec {
                compatible_from: None,
                parameters,
            })
    }

    #[test]
    fn test_plan_from_step() {
        let prior = ManifestEntry {
            contract_name: "CommitManagerV1".to_string(),
            address: Address::ZERO,
            version: None,
            args_fingerprint: None,
            artifact: None,
            deployed_at: 0,
        };
        let step = v2_step(vec![ParameterKey::new("r0", ParameterKind::Uint)]);

        let plan = MigrationPlan::new(&step, &prior);
        assert_eq!(plan.from_contract_name, "CommitManagerV1");
        assert_eq!(plan.to_contract_name, "CommitManagerV2");
        assert_eq!(plan.alias, "CommitManagerV1");
        assert_eq!(plan.parameters_to_carry.len(), 1);
    }

    #[tokio::test]
    async fn test_migrate_rewires_alias_and_carries_parameters() {
        let chain = SimulatedChain::default();
        let prior = deployed_v1(&chain).await;
        let step = v2_step(vec![
            ParameterKey::new("r0", ParameterKind::Uint),
            ParameterKey::new("commitWindowDurationPerc", ParameterKind::Uint),
        ]);

        let entry = migrate(&step, &prior, &chain, &chain, &chain).await.unwrap();

        assert_ne!(entry.address, prior.address);
        assert_eq!(entry.contract_name, "CommitManagerV1");
        assert_eq!(entry.version, Some(Version::new(2, 0, 0)));
        assert_eq!(entry.artifact.as_deref(), Some("CommitManagerV2"));
        assert_eq!(chain.hub_entry("CommitManagerV1").await, Some(entry.address));

        for key in ["r0", "commitWindowDurationPerc"] {
            assert_eq!(
                chain.parameter(entry.address, key).await,
                chain.parameter(prior.address, key).await,
                "{key} should be carried"
            );
        }
    }

    #[tokio::test]
    async fn test_missing_parameter_fails() {
        let chain = SimulatedChain::default();
        let prior = deployed_v1(&chain).await;
        let step = v2_step(vec![ParameterKey::new("r1", ParameterKind::Uint)]);

        let err = migrate(&step, &prior, &chain, &chain, &chain)
            .await
            .unwrap_err();

        match err {
            StepError::ParameterMigrationFailed { key, reason, orphaned } => {
                assert_eq!(key, "r1");
                assert_eq!(reason, ParameterFailure::Missing);
                assert_ne!(orphaned, prior.address);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_incompatible_parameter_fails() {
        let chain = SimulatedChain::default();
        let prior = deployed_v1(&chain).await;
        let step = v2_step(vec![ParameterKey::new("r0", ParameterKind::Address)]);

        let err = migrate(&step, &prior, &chain, &chain, &chain)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StepError::ParameterMigrationFailed {
                reason: ParameterFailure::Incompatible { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_reverted_deploy_leaves_hub_untouched() {
        let chain = SimulatedChain::default();
        let prior = deployed_v1(&chain).await;
        chain.revert_deploys_of("CommitManagerV2").await;

        let err = migrate(&step_without_params(), &prior, &chain, &chain, &chain)
            .await
            .unwrap_err();

        assert!(matches!(err, StepError::DeploymentReverted { .. }));
        assert_eq!(chain.hub_entry("CommitManagerV1").await, Some(prior.address));
    }

    #[tokio::test]
    async fn test_plain_minor_bump_keeps_parameters() {
        let chain = SimulatedChain::default();
        let prior = deployed_v1(&chain).await;
        // Redeclaring r0 with its initial value must not reset the live one.
        chain
            .seed_parameter(prior.address, "r0", ParameterValue::from(5u64))
            .await;
        let step = Step::new("CommitManagerV1")
            .version(Version::new(1, 1, 0))
            .parameter("r0", 3u64)
            .parameter("r1", 8u64);

        let plan = MigrationPlan::new(&step, &prior);
        assert_eq!(
            plan.parameters_to_carry,
            vec![
                ParameterKey::new("r0", ParameterKind::Uint),
                ParameterKey::new("r1", ParameterKind::Uint),
            ]
        );

        let entry = migrate(&step, &prior, &chain, &chain, &chain).await.unwrap();

        assert_eq!(entry.version, Some(Version::new(1, 1, 0)));
        assert_eq!(chain.parameter(entry.address, "r0").await, Some(5u64.into()));
        assert_eq!(chain.parameter(entry.address, "r1").await, Some(8u64.into()));
    }

    #[tokio::test]
    async fn test_upgrade_writes_newly_declared_parameters() {
        let chain = SimulatedChain::default();
        let prior = deployed_v1(&chain).await;
        let step = v2_step(vec![ParameterKey::new("r0", ParameterKind::Uint)])
            .parameter("r2", 12u64);

        let entry = migrate(&step, &prior, &chain, &chain, &chain).await.unwrap();

        assert_eq!(chain.parameter(entry.address, "r0").await, Some(3u64.into()));
        assert_eq!(chain.parameter(entry.address, "r2").await, Some(12u64.into()));
        assert_eq!(chain.parameter(prior.address, "r2").await, None);
    }

    #[tokio::test]
    async fn test_new_parameter_write_failure_names_orphan() {
        let chain = SimulatedChain::default();
        let prior = deployed_v1(&chain).await;
        chain.revert_writes_of("r2").await;
        let step = v2_step(Vec::new()).parameter("r2", 12u64);

        let err = migrate(&step, &prior, &chain, &chain, &chain)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StepError::ParameterMigrationFailed {
                ref key,
                reason: ParameterFailure::Chain(_),
                ..
            } if key == "r2"
        ));
    }

    #[tokio::test]
    async fn test_drifted_alias_is_overwritten() {
        let chain = SimulatedChain::default();
        let prior = deployed_v1(&chain).await;
        let stray = chain.deploy("CommitManagerV1", &[]).await.unwrap();
        chain.set_address("CommitManagerV1", stray).await.unwrap();

        let entry = migrate(&step_without_params(), &prior, &chain, &chain, &chain)
            .await
            .unwrap();

        assert_ne!(entry.address, stray);
        assert_eq!(chain.hub_entry("CommitManagerV1").await, Some(entry.address));
    }

    fn step_without_params() -> Step {
        v2_step(Vec::new())
    }
}
