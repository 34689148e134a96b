// tests/property_dag.rs

use std::collections::{BTreeSet, HashMap};

use proptest::prelude::*;
use serde_json::json;
use stepgraph::dag::{DispatchedStep, StateManager, StepUpdate, TaskRecord, TaskRequest, TaskTemplate};
use stepgraph::registry::StepFailure;
use stepgraph::types::{StepState, TaskStatus};
use stepgraph_test_utils::builders::{StepBuilder, TemplateBuilder};

/// A random acyclic template plus the set of steps that fail permanently.
///
/// Acyclicity comes from only letting step N depend on steps 0..N-1.
fn dag_strategy(max_steps: usize) -> impl Strategy<Value = (TaskTemplate, BTreeSet<String>)> {
    (1..=max_steps).prop_flat_map(|n| {
        (
            proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..n), n),
            proptest::collection::vec(any::<bool>(), n),
        )
            .prop_map(move |(raw_deps, fails)| {
                let mut builder = TemplateBuilder::new("random");
                let mut failing = BTreeSet::new();
                for (i, potential) in raw_deps.into_iter().enumerate() {
                    let name = format!("step_{i}");
                    let mut step = StepBuilder::new(&name).max_attempts(1);
                    let deps: BTreeSet<usize> = if i == 0 {
                        BTreeSet::new()
                    } else {
                        potential.into_iter().map(|d| d % i).collect()
                    };
                    for d in deps {
                        step = step.after(&format!("step_{d}"));
                    }
                    // Roughly one step in four fails.
                    if fails[i] && i % 4 == 1 {
                        failing.insert(name.clone());
                    }
                    builder = builder.with_step(step.build());
                }
                (builder.build(), failing)
            })
    })
}

proptest! {
    #[test]
    fn steps_never_run_before_their_dependencies(
        (template, failing) in dag_strategy(12),
        picks in proptest::collection::vec(any::<usize>(), 64),
    ) {
        let mut record = TaskRecord::from_template(
            &template,
            &TaskRequest::new("random", "default", json!({})),
        ).unwrap();
        let deps: HashMap<String, Vec<String>> = template
            .steps
            .iter()
            .map(|s| (s.name.clone(), s.depends_on.clone()))
            .collect();

        let mut in_flight: Vec<DispatchedStep> = Vec::new();
        let mut picks = picks.into_iter().cycle();
        let mut ran: Vec<String> = Vec::new();

        loop {
            let mut mgr = StateManager::new(&mut record);
            for claimed in mgr.claim_ready_steps() {
                // Every dependency is complete at dispatch time.
                for dep in &deps[&claimed.step_name] {
                    prop_assert!(ran.contains(dep), "{} dispatched before {}", claimed.step_name, dep);
                    prop_assert!(claimed.dependency_results.contains_key(dep));
                }
                in_flight.push(claimed);
            }
            if in_flight.is_empty() {
                break;
            }

            // Finish an arbitrary in-flight step.
            let idx = picks.next().unwrap() % in_flight.len();
            let step = in_flight.swap_remove(idx);
            let update = if failing.contains(&step.step_name) {
                StepUpdate::failure(step.step_name.clone(), step.attempt, StepFailure::permanent("boom"))
            } else {
                ran.push(step.step_name.clone());
                StepUpdate::complete(step.step_name.clone(), step.attempt, json!(step.step_name))
            };
            let transition = mgr.apply(&update).unwrap();
            for blocked in &transition.newly_blocked {
                prop_assert!(!ran.contains(blocked));
            }
        }

        let snapshot = record.snapshot();
        prop_assert!(snapshot.status.is_terminal());
        prop_assert!(snapshot.steps.iter().all(|s| s.current_state.is_terminal()));
        if snapshot.steps.iter().any(|s| s.current_state == StepState::Failed) {
            prop_assert_eq!(snapshot.status, TaskStatus::BlockedByFailures);
        } else {
            prop_assert_eq!(snapshot.status, TaskStatus::Complete);
            prop_assert_eq!(snapshot.completed_steps, template.steps.len());
        }

        // Blocked steps always have a failed ancestor among their direct or
        // indirect dependencies.
        for step in snapshot.steps.iter().filter(|s| s.current_state == StepState::Blocked) {
            let mut stack = step.depends_on.clone();
            let mut found = false;
            while let Some(dep) = stack.pop() {
                let dep_snap = snapshot.step(&dep).unwrap();
                if dep_snap.current_state == StepState::Failed {
                    found = true;
                    break;
                }
                stack.extend(dep_snap.depends_on.iter().cloned());
            }
            prop_assert!(found, "{} blocked without a failed ancestor", step.name);
        }
    }
}
