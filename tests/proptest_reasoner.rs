//! Property tests for SGD optimization

mod generators;

use hlmrf::{compute_objective, GradientExtension, MemoryTermStore, ObjectiveTermGenerator, SgdConfig, SgdReasoner, TermStore};
use proptest::prelude::*;

fn arb_extension() -> impl Strategy<Value = GradientExtension> {
    prop_oneof![
        Just(GradientExtension::None),
        Just(GradientExtension::AdaGrad),
        Just(GradientExtension::Adam),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Optimization leaves free values in [0, 1], never moves observed
    /// values, and reports the objective of the values it leaves behind
    #[test]
    fn optimize_reports_final_objective(
        (_registry, rules) in generators::arb_registry(3),
        atoms in proptest::collection::vec((0.0f32..=1.0, prop::bool::weighted(0.25)), 8),
        ground in proptest::collection::vec((0usize..3, generators::arb_ground_params(8)), 0..30),
        extension in arb_extension(),
        coordinate_step in any::<bool>(),
    ) {
        let variables = generators::build_variables(&atoms);
        let ground: Vec<_> = ground
            .iter()
            .map(|(rule, params)| generators::build_ground_rule(&rules[*rule], params))
            .collect();

        let mut store = MemoryTermStore::new(variables, ObjectiveTermGenerator::new());
        store.add_all(&ground, 2).unwrap();

        let mut reasoner = SgdReasoner::new(SgdConfig {
            extension,
            coordinate_step,
            max_iterations: 50,
            ..SgdConfig::default()
        })
        .unwrap();
        let report = reasoner.optimize(&mut store, None).unwrap();

        prop_assert!(report.iterations >= 1 && report.iterations <= 51);
        prop_assert!(report.lowest_iteration <= report.iterations);
        for (value, (initial, observed)) in store.variables().values().iter().zip(&atoms) {
            prop_assert!((0.0..=1.0).contains(value));
            if *observed {
                prop_assert_eq!(value, initial);
            }
        }
        prop_assert_eq!(compute_objective(&mut store).unwrap(), report.objective);
    }
}
