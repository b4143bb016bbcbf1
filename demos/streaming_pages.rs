//! Optimize a chain model whose terms live in page files on disk.
//!
//! Run with: RUST_LOG=debug cargo run --example streaming_pages

use std::sync::Arc;

use hlmrf::{
    GroundRule, ObjectiveTermGenerator, Potential, RuleRegistry, SgdConfig, SgdReasoner, StreamingConfig,
    StreamingTermStore, TermStore, VariableStore, Weight,
};

const LENGTH: usize = 10_000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut rules = RuleRegistry::new();
    let implies = rules.register("implies", Weight::Finite(2.0), Potential::SquaredHinge)?;
    let prior = rules.register("prior", Weight::Finite(0.1), Potential::SquaredHinge)?;

    let mut variables = VariableStore::new();
    let mut chain = vec![variables.add_observed(1.0)?];
    for _ in 1..LENGTH {
        chain.push(variables.add_unobserved(0.0)?);
    }

    let mut ground = Vec::with_capacity(2 * LENGTH);
    for pair in chain.windows(2) {
        ground.push(GroundRule::clause(&implies, vec![pair[1]], vec![pair[0]]));
    }
    for &v in &chain[1..] {
        ground.push(GroundRule::clause(&prior, vec![], vec![v]));
    }

    let dir = tempfile::tempdir()?;
    let config = StreamingConfig {
        page_size: 1_000,
        ..StreamingConfig::with_page_dir(dir.path())
    };
    let mut store = StreamingTermStore::new(config, Arc::new(rules), variables, ObjectiveTermGenerator::new())?;
    store.add_all(&ground, 4)?;

    let report = SgdReasoner::new(SgdConfig::default())?.optimize(&mut store, None)?;
    println!(
        "{} terms on {} pages: objective {:.4} after {} iterations in {:?}",
        report.term_count,
        store.page_count(),
        report.objective,
        report.iterations,
        report.elapsed
    );

    let values = store.variables().values();
    for i in [1, 10, 100, 1_000, LENGTH - 1] {
        println!("x[{}] = {:.4}", i, values[i]);
    }
    Ok(())
}
