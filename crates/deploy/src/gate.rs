//! Idempotency gate: decides whether a step has to touch the chain at all.

use semver::Version;

use crate::{
    manifest::{Manifest, ManifestEntry},
    step::Step,
};

/// What the driver should do with a step.
#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
pub enum Decision {
    /// The recorded deployment is current.
    #[strum(to_string = "skip")]
    Skip,
    /// Nothing to carry over: deploy from scratch.
    #[strum(to_string = "deploy")]
    FreshDeploy,
    /// Replace the recorded implementation, carrying its state.
    #[strum(to_string = "migrate")]
    Migrate(ManifestEntry),
}

/// Decide what to do with `step` given what `manifest` records for its target.
///
/// Never mutates the manifest.
pub fn decide(step: &Step, manifest: &Manifest) -> Decision {
    let Some(prior) = manifest.get(&step.target) else {
        return Decision::FreshDeploy;
    };

    match (&prior.version, &step.version) {
        // Pre-versioning deployments always move to a versioned step.
        (None, Some(_)) => Decision::Migrate(prior.clone()),
        (Some(recorded), Some(declared)) => {
            if declared <= recorded {
                Decision::Skip
            } else if same_lineage(step, recorded, declared) {
                Decision::Migrate(prior.clone())
            } else {
                Decision::FreshDeploy
            }
        }
        // A versioned entry was written by a newer lineage.
        (Some(_), None) => Decision::Skip,
        (None, None) => {
            // Fingerprints are only comparable for the artifact that recorded them.
            if prior
                .artifact
                .as_ref()
                .is_some_and(|artifact| *artifact != step.action.artifact)
            {
                return Decision::Skip;
            }

            let declared = step.fingerprint();
            match &prior.args_fingerprint {
                Some(recorded) if *recorded != declared => Decision::FreshDeploy,
                _ => Decision::Skip,
            }
        }
    }
}

/// Whether an implementation at `recorded` can be migrated into `declared`.
fn same_lineage(step: &Step, recorded: &Version, declared: &Version) -> bool {
    match &step.upgrade {
        Some(upgrade) => upgrade
            .compatible_from
            .as_ref()
            .is_none_or(|req| req.matches(recorded)),
        None => recorded.major == declared.major,
    }
}
