//! Unit tests for the SGD reasoner

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hlmrf::{
    compute_objective, Comparator, GradientExtension, GroundRule, LearningSchedule, MemoryTermStore,
    ObjectiveTermGenerator, Potential, ReasonerError, RuleRegistry, SgdConfig, SgdReasoner, TermStore, VarIndex,
    VariableStore, Weight,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

type Store = MemoryTermStore<ObjectiveTermGenerator>;

fn store_from(variables: VariableStore, ground: &[GroundRule]) -> Store {
    let store = MemoryTermStore::new(variables, ObjectiveTermGenerator::new());
    store.add_all(ground, 1).unwrap();
    store
}

/// Single variable pulled toward `target` by `(x - target)^2`.
fn pull_toward(target: f32, start: f32) -> Store {
    let mut rules = RuleRegistry::new();
    let rule = rules.register("target", Weight::Finite(1.0), Potential::Squared).unwrap();
    let mut variables = VariableStore::new();
    let x = variables.add_unobserved(start).unwrap();
    let ground = GroundRule::arithmetic(&rule, vec![(1.0, x)], Comparator::LessEqual, target);
    store_from(variables, &[ground])
}

/// Random mix of clauses and linear constraints over observed and unobserved
/// variables.
fn random_problem(seed: u64) -> Store {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rules = RuleRegistry::new();
    let potentials = [
        Potential::Linear,
        Potential::Hinge,
        Potential::Squared,
        Potential::SquaredHinge,
    ];
    let rules: Vec<_> = potentials
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            rules
                .register(format!("r{}", i), Weight::Finite(rng.random_range(0.5..5.0)), p)
                .unwrap()
        })
        .collect();

    let mut variables = VariableStore::new();
    for i in 0..20 {
        let value = rng.random_range(0.0..=1.0);
        if i % 4 == 0 {
            variables.add_observed(value).unwrap();
        } else {
            variables.add_unobserved(value).unwrap();
        }
    }

    let pick = |rng: &mut StdRng| VarIndex::from_usize(rng.random_range(0..20));
    let ground: Vec<_> = (0..60)
        .map(|i| {
            let rule = &rules[i % rules.len()];
            if rng.random_bool(0.5) {
                let positive = (0..rng.random_range(1..3)).map(|_| pick(&mut rng)).collect();
                let negative = (0..rng.random_range(0..3)).map(|_| pick(&mut rng)).collect();
                GroundRule::clause(rule, positive, negative)
            } else {
                let terms = (0..rng.random_range(1..4))
                    .map(|_| (rng.random_range(-3.0..3.0), pick(&mut rng)))
                    .collect();
                let comparator = [Comparator::LessEqual, Comparator::GreaterEqual, Comparator::Equal]
                    [rng.random_range(0..3)];
                GroundRule::arithmetic(rule, terms, comparator, rng.random_range(-1.0..1.0))
            }
        })
        .collect();

    store_from(variables, &ground)
}

#[test_log::test]
fn values_stay_in_unit_interval_for_every_extension() {
    for extension in [GradientExtension::None, GradientExtension::AdaGrad, GradientExtension::Adam] {
        let mut store = random_problem(11);
        let initial_observed: Vec<f32> = store
            .variables()
            .values()
            .iter()
            .zip(store.variables().atoms())
            .filter(|(_, kind)| kind.is_observed())
            .map(|(v, _)| *v)
            .collect();

        let mut reasoner = SgdReasoner::new(SgdConfig {
            extension,
            learning_schedule: LearningSchedule::Constant,
            learning_rate: 2.0,
            max_iterations: 100,
            run_full_iterations: true,
            ..SgdConfig::default()
        })
        .unwrap();

        let mut passes = 0;
        let mut check = |store: &mut Store, _iteration: usize| {
            passes += 1;
            for &v in store.variables().values() {
                assert!((0.0..=1.0).contains(&v), "{} escaped [0, 1] under {}", v, extension);
            }
        };
        let report = reasoner.optimize(&mut store, Some(&mut check)).unwrap();

        assert_eq!(passes, report.iterations);
        assert_eq!(report.iterations, 101);

        let observed: Vec<f32> = store
            .variables()
            .values()
            .iter()
            .zip(store.variables().atoms())
            .filter(|(_, kind)| kind.is_observed())
            .map(|(v, _)| *v)
            .collect();
        assert_eq!(observed, initial_observed, "observed values moved under {}", extension);
    }
}

#[test_log::test]
fn squared_term_converges_to_target() {
    let mut store = pull_toward(0.5, 0.0);
    let mut reasoner = SgdReasoner::new(SgdConfig::default()).unwrap();
    let report = reasoner.optimize(&mut store, None).unwrap();

    assert!((store.variables().values()[0] - 0.5).abs() < 1e-6);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.lowest_iteration, 2);
    assert_eq!(report.objective, 0.0);
    assert_eq!(report.term_count, 1);
}

#[test_log::test]
fn keeps_lowest_objective_values() {
    let mut store = random_problem(5);
    let mut reasoner = SgdReasoner::new(SgdConfig {
        learning_schedule: LearningSchedule::Constant,
        learning_rate: 0.8,
        max_iterations: 30,
        run_full_iterations: true,
        ..SgdConfig::default()
    })
    .unwrap();

    let mut seen: Vec<(f64, Vec<f32>)> = Vec::new();
    let mut record = |store: &mut Store, _iteration: usize| {
        let objective = compute_objective(store).unwrap();
        seen.push((objective, store.variables().values().to_vec()));
    };
    let report = reasoner.optimize(&mut store, Some(&mut record)).unwrap();

    let mut best = 0;
    for (i, (objective, _)) in seen.iter().enumerate() {
        if *objective < seen[best].0 {
            best = i;
        }
    }
    assert_eq!(report.objective, seen[best].0);
    assert_eq!(report.lowest_iteration, best + 1);
    assert_eq!(store.variables().values(), seen[best].1.as_slice());
}

#[test_log::test]
fn only_observed_variables_stops_early() {
    let mut rules = RuleRegistry::new();
    let rule = rules.register("fact", Weight::Finite(2.0), Potential::Hinge).unwrap();
    let mut variables = VariableStore::new();
    let a = variables.add_observed(1.0).unwrap();
    let b = variables.add_observed(0.0).unwrap();
    let mut store = store_from(variables, &[GroundRule::clause(&rule, vec![b], vec![a])]);

    let mut reasoner = SgdReasoner::new(SgdConfig::default()).unwrap();
    let report = reasoner.optimize(&mut store, None).unwrap();

    assert_eq!(report.iterations, 2);
    assert_eq!(report.change, 0.0);
    assert_eq!(store.variables().values(), &[1.0, 0.0]);
    assert_eq!(report.objective, 2.0);
}

#[test_log::test]
fn empty_store_finishes() {
    let mut variables = VariableStore::new();
    variables.add_unobserved(0.25).unwrap();
    let mut store = store_from(variables, &[]);

    let report = SgdReasoner::new(SgdConfig::default())
        .unwrap()
        .optimize(&mut store, None)
        .unwrap();
    assert_eq!(report.term_count, 0);
    assert_eq!(report.objective, 0.0);
    assert_eq!(store.variables().values(), &[0.25]);
}

#[test_log::test]
fn hard_constraint_holds_against_soft_pull() {
    let mut rules = RuleRegistry::new();
    let at_most_one = rules.register("at-most-one", Weight::Hard, Potential::Hinge).unwrap();
    let prior = rules.register("prior", Weight::Finite(1.0), Potential::Hinge).unwrap();

    let mut variables = VariableStore::new();
    let x = variables.add_unobserved(0.0).unwrap();
    let y = variables.add_unobserved(0.0).unwrap();
    let ground = [
        GroundRule::arithmetic(&at_most_one, vec![(1.0, x), (1.0, y)], Comparator::LessEqual, 1.0),
        GroundRule::clause(&prior, vec![x], vec![]),
        GroundRule::clause(&prior, vec![y], vec![]),
    ];
    let mut store = store_from(variables, &ground);

    let report = SgdReasoner::new(SgdConfig::default())
        .unwrap()
        .optimize(&mut store, None)
        .unwrap();

    let values = store.variables().values();
    assert!(values[0] + values[1] <= 1.0 + 1e-5, "{:?}", values);
    assert!(report.objective.is_finite());
    assert_eq!(report.term_count, 3);
}

#[test_log::test]
fn coordinate_step_uses_fresh_dot_product() {
    let build = || {
        let mut rules = RuleRegistry::new();
        let rule = rules.register("sum", Weight::Finite(1.0), Potential::Squared).unwrap();
        let mut variables = VariableStore::new();
        let x = variables.add_unobserved(0.0).unwrap();
        let y = variables.add_unobserved(0.0).unwrap();
        let ground = GroundRule::arithmetic(&rule, vec![(1.0, x), (1.0, y)], Comparator::LessEqual, 1.0);
        store_from(variables, &[ground])
    };

    let mut coordinate = build();
    let report = SgdReasoner::new(SgdConfig {
        coordinate_step: true,
        ..SgdConfig::default()
    })
    .unwrap()
    .optimize(&mut coordinate, None)
    .unwrap();
    // x absorbs the whole residual, leaving nothing for y
    assert_eq!(coordinate.variables().values(), &[1.0, 0.0]);
    assert_eq!(report.iterations, 2);

    let mut joint = build();
    SgdReasoner::new(SgdConfig::default())
        .unwrap()
        .optimize(&mut joint, None)
        .unwrap();
    let values = joint.variables().values();
    assert!((values[0] + values[1] - 1.0).abs() < 1e-3, "{:?}", values);
    assert!((values[0] - values[1]).abs() < 1e-6);
}

#[test_log::test]
fn budget_caps_iterations() {
    let mut store = random_problem(3);
    let report = SgdReasoner::new(SgdConfig {
        max_iterations: 40,
        budget: 0.25,
        run_full_iterations: true,
        ..SgdConfig::default()
    })
    .unwrap()
    .optimize(&mut store, None)
    .unwrap();
    assert_eq!(report.iterations, 11);
}

#[test_log::test]
fn cancellation_stops_at_iteration_boundary() {
    let flag = Arc::new(AtomicBool::new(true));
    let mut store = pull_toward(0.5, 0.0);
    let mut reasoner = SgdReasoner::new(SgdConfig::default())
        .unwrap()
        .with_cancel_flag(flag.clone());
    assert_eq!(
        reasoner.optimize(&mut store, None),
        Err(ReasonerError::Cancelled { iteration: 1 })
    );

    flag.store(false, Ordering::Relaxed);
    let mut store = random_problem(8);
    let mut reasoner = SgdReasoner::new(SgdConfig {
        run_full_iterations: true,
        ..SgdConfig::default()
    })
    .unwrap()
    .with_cancel_flag(flag.clone());
    let mut cancel_after_third = |_: &mut Store, iteration: usize| {
        if iteration == 3 {
            flag.store(true, Ordering::Relaxed);
        }
    };
    assert_eq!(
        reasoner.optimize(&mut store, Some(&mut cancel_after_third)),
        Err(ReasonerError::Cancelled { iteration: 4 })
    );
}
