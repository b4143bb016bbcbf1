//! Fuzz a streaming store fed with arbitrary ground rules
//!
//! Each input byte pair becomes a clause over a handful of variables. The
//! store is written to pages, optimized, and must leave every value in [0, 1].

#![no_main]

use std::sync::Arc;

use hlmrf::{
    GroundRule, ObjectiveTermGenerator, Potential, RuleRegistry, SgdConfig, SgdReasoner, StreamingConfig,
    StreamingTermStore, TermStore, VarIndex, VariableStore, Weight,
};
use libfuzzer_sys::fuzz_target;

const VARIABLES: usize = 8;

fuzz_target!(|data: &[u8]| {
    let mut rules = RuleRegistry::new();
    let Ok(rule) = rules.register("clause", Weight::Finite(1.0), Potential::SquaredHinge) else {
        return;
    };

    let mut variables = VariableStore::new();
    for i in 0..VARIABLES {
        let _ = variables.add_unobserved(i as f32 / VARIABLES as f32);
    }

    let ground: Vec<_> = data
        .chunks_exact(2)
        .map(|pair| {
            let v = |bits: u8| VarIndex::from_usize(bits as usize % VARIABLES);
            GroundRule::clause(&rule, vec![v(pair[0])], vec![v(pair[1])])
        })
        .collect();

    let Ok(dir) = tempfile::tempdir() else {
        return;
    };
    let config = StreamingConfig {
        page_size: 3,
        ..StreamingConfig::with_page_dir(dir.path())
    };
    let Ok(mut store) = StreamingTermStore::new(config, Arc::new(rules), variables, ObjectiveTermGenerator::new())
    else {
        return;
    };
    if store.add_all(&ground, 2).is_err() {
        return;
    }

    let config = SgdConfig {
        max_iterations: 20,
        ..SgdConfig::default()
    };
    if let Ok(mut reasoner) = SgdReasoner::new(config) {
        if reasoner.optimize(&mut store, None).is_ok() {
            assert!(store.variables().values().iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }
});
