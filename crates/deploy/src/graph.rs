//! Dependency graph resolution.

use std::collections::{BTreeSet, HashMap};

use crate::{error::ConfigurationError, step::Step};

/// Order `steps` so that every step comes after all of its dependencies.
///
/// Among steps that are ready at the same time the one declared first wins,
/// so the same input always yields the same order.
pub fn resolve(steps: &[Step]) -> Result<Vec<Step>, ConfigurationError> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(steps.len());
    for (i, step) in steps.iter().enumerate() {
        if index.insert(step.name.as_str(), i).is_some() {
            return Err(ConfigurationError::DuplicateStep {
                name: step.name.clone(),
            });
        }
    }

    // unresolved[i]: number of dependencies of step i not yet emitted.
    let mut unresolved = vec![0usize; steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];

    for (i, step) in steps.iter().enumerate() {
        for dependency in &step.dependencies {
            let &d = index.get(dependency.as_str()).ok_or_else(|| {
                ConfigurationError::UnknownDependency {
                    step: step.name.clone(),
                    dependency: dependency.clone(),
                }
            })?;
            unresolved[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..steps.len()).filter(|&i| unresolved[i] == 0).collect();
    let mut order = Vec::with_capacity(steps.len());

    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &dependent in &dependents[i] {
            unresolved[dependent] -= 1;
            if unresolved[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < steps.len() {
        let cycle = find_cycle(steps, &index, &unresolved);
        tracing::error!(cycle = ?cycle, "Dependency cycle detected");
        return Err(ConfigurationError::CyclicDependency { cycle });
    }

    Ok(order.into_iter().map(|i| steps[i].clone()).collect())
}

/// Walk dependency edges between unresolved steps until a step repeats.
///
/// Every unresolved step has at least one unresolved dependency, so the walk
/// always closes a loop.
fn find_cycle(steps: &[Step], index: &HashMap<&str, usize>, unresolved: &[usize]) -> Vec<String> {
    let Some(start) = (0..steps.len()).find(|&i| unresolved[i] > 0) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut position: HashMap<usize, usize> = HashMap::new();
    let mut current = start;

    loop {
        if let Some(&at) = position.get(&current) {
            let mut cycle: Vec<String> = path[at..]
                .iter()
                .map(|&i| steps[i].name.clone())
                .collect();
            cycle.push(steps[current].name.clone());
            return cycle;
        }

        position.insert(current, path.len());
        path.push(current);

        let next = steps[current]
            .dependencies
            .iter()
            .filter_map(|dependency| index.get(dependency.as_str()).copied())
            .find(|&d| unresolved[d] > 0);

        match next {
            Some(next) => current = next,
            None => return path.iter().map(|&i| steps[i].name.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};

    fn names(steps: &[Step]) -> Vec<String> {
        steps.iter().map(|s| s.name.clone()).collect()
    }

    fn position(order: &[Step], name: &str) -> usize {
        order.iter().position(|s| s.name == name).unwrap()
    }

    #[test]
    fn test_dependencies_come_first() {
        let steps = vec![
            Step::new("CommitManagerV1").depends_on(["ParametersStorage", "Hub"]),
            Step::new("ParametersStorage").depends_on(["Hub"]),
            Step::new("Hub"),
        ];

        let order = resolve(&steps).unwrap();
        assert_eq!(names(&order), vec!["Hub", "ParametersStorage", "CommitManagerV1"]);
    }

    #[test]
    fn test_independent_steps_keep_declaration_order() {
        let steps = vec![
            Step::new("Hub"),
            Step::new("ServiceAgreementStorageV1").depends_on(["Hub"]),
            Step::new("ParametersStorage").depends_on(["Hub"]),
            Step::new("Log2PLDSF"),
        ];

        let order = resolve(&steps).unwrap();
        assert_eq!(
            names(&order),
            vec!["Hub", "ServiceAgreementStorageV1", "ParametersStorage", "Log2PLDSF"]
        );
        assert_eq!(names(&resolve(&steps).unwrap()), names(&order));
    }

    #[test]
    fn test_unknown_dependency() {
        let steps = vec![Step::new("Hub"), Step::new("StakingV2").depends_on(["StakingStorage"])];

        let err = resolve(&steps).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnknownDependency {
                step: "StakingV2".into(),
                dependency: "StakingStorage".into(),
            }
        );
    }

    #[test]
    fn test_duplicate_step() {
        let steps = vec![Step::new("Hub"), Step::new("Hub")];
        assert_eq!(
            resolve(&steps).unwrap_err(),
            ConfigurationError::DuplicateStep { name: "Hub".into() }
        );
    }

    #[test]
    fn test_cycle_is_reported() {
        let steps = vec![
            Step::new("Hub"),
            Step::new("A").depends_on(["Hub", "C"]),
            Step::new("B").depends_on(["A"]),
            Step::new("C").depends_on(["B"]),
        ];

        match resolve(&steps).unwrap_err() {
            ConfigurationError::CyclicDependency { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                for member in ["A", "B", "C"] {
                    assert!(cycle.iter().any(|c| c == member), "{member} missing from {cycle:?}");
                }
                assert!(!cycle.iter().any(|c| c == "Hub"));
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let steps = vec![Step::new("Hub").depends_on(["Hub"])];
        assert_eq!(
            resolve(&steps).unwrap_err(),
            ConfigurationError::CyclicDependency {
                cycle: vec!["Hub".into(), "Hub".into()]
            }
        );
    }

    /// Random DAG: edges only point to lower-numbered nodes, then the
    /// declaration order is shuffled.
    fn random_dag(rng: &mut StdRng, size: usize) -> Vec<Step> {
        let mut steps: Vec<Step> = (0..size)
            .map(|i| {
                let deps: Vec<String> = (0..i)
                    .filter(|_| rng.random_bool(0.3))
                    .map(|d| format!("s{d}"))
                    .collect();
                Step::new(format!("s{i}")).depends_on(deps)
            })
            .collect();
        steps.shuffle(rng);
        steps
    }

    #[test]
    fn test_random_dags_respect_dependencies() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..200 {
            let size = rng.random_range(1..25);
            let steps = random_dag(&mut rng, size);
            let order = resolve(&steps).expect("acyclic graph must resolve");

            assert_eq!(order.len(), steps.len());
            for step in &order {
                let at = position(&order, &step.name);
                for dependency in &step.dependencies {
                    assert!(
                        position(&order, dependency) < at,
                        "{dependency} must run before {}",
                        step.name
                    );
                }
            }
        }
    }

    #[test]
    fn test_random_cycles_always_fail() {
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..200 {
            let size = rng.random_range(2..20);
            let mut steps = random_dag(&mut rng, size);

            // Close a loop along a chain s0 <- s1 <- ... <- sk -> s0.
            let k = rng.random_range(1..size);
            for step in steps.iter_mut() {
                let i: usize = step.name[1..].parse().unwrap();
                if (1..=k).contains(&i) {
                    step.dependencies.insert(format!("s{}", i - 1));
                }
                if i == 0 {
                    step.dependencies.insert(format!("s{k}"));
                }
            }

            match resolve(&steps) {
                Err(ConfigurationError::CyclicDependency { cycle }) => {
                    assert!(cycle.len() >= 2);
                    assert_eq!(cycle.first(), cycle.last());
                }
                other => panic!("expected a cycle, got {other:?}"),
            }
        }
    }
}
