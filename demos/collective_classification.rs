//! Collective classification on a small friendship graph.
//!
//! Some people have a known party; the rest are inferred from the rule
//! "friends vote alike" and a weak prior against either party.
//!
//! Run with: RUST_LOG=info cargo run --example collective_classification

use hlmrf::{
    Comparator, GroundRule, MemoryTermStore, ObjectiveTermGenerator, Potential, RuleRegistry, SgdConfig, SgdReasoner,
    TermStore, VarIndex, VariableStore, Weight,
};

const PEOPLE: [&str; 6] = ["alice", "bob", "carol", "dave", "erin", "frank"];
const FRIENDS: [(usize, usize); 7] = [(0, 1), (1, 2), (2, 3), (3, 4), (4, 5), (0, 2), (3, 5)];
/// (person, votes red)
const KNOWN: [(usize, bool); 2] = [(0, true), (5, false)];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut rules = RuleRegistry::new();
    let alike = rules.register("friends-vote-alike", Weight::Finite(3.0), Potential::SquaredHinge)?;
    let prior = rules.register("prior", Weight::Finite(0.5), Potential::SquaredHinge)?;
    let exclusive = rules.register("one-party", Weight::Hard, Potential::Linear)?;

    // Two atoms per person: votes red, votes blue
    let mut variables = VariableStore::new();
    let mut red = Vec::new();
    let mut blue = Vec::new();
    for person in 0..PEOPLE.len() {
        match KNOWN.iter().find(|(p, _)| *p == person) {
            Some(&(_, is_red)) => {
                red.push(variables.add_observed(if is_red { 1.0 } else { 0.0 })?);
                blue.push(variables.add_observed(if is_red { 0.0 } else { 1.0 })?);
            }
            None => {
                red.push(variables.add_unobserved(0.0)?);
                blue.push(variables.add_unobserved(0.0)?);
            }
        }
    }

    let mut ground = Vec::new();
    for &(a, b) in &FRIENDS {
        for party in [&red, &blue] {
            ground.push(GroundRule::clause(&alike, vec![party[b]], vec![party[a]]));
            ground.push(GroundRule::clause(&alike, vec![party[a]], vec![party[b]]));
        }
    }
    for person in 0..PEOPLE.len() {
        ground.push(GroundRule::clause(&prior, vec![], vec![red[person]]));
        ground.push(GroundRule::clause(&prior, vec![], vec![blue[person]]));
        ground.push(GroundRule::arithmetic(
            &exclusive,
            vec![(1.0, red[person]), (1.0, blue[person])],
            Comparator::LessEqual,
            1.0,
        ));
    }

    let mut store = MemoryTermStore::new(variables, ObjectiveTermGenerator::new());
    let terms = store.add_all(&ground, 4)?;
    println!("{} ground rules produced {} terms", ground.len(), terms);

    let mut reasoner = SgdReasoner::new(SgdConfig {
        max_iterations: 500,
        ..SgdConfig::default()
    })?;
    let report = reasoner.optimize(&mut store, None)?;
    println!(
        "objective {:.4} after {} iterations (best at {})",
        report.objective, report.iterations, report.lowest_iteration
    );

    let value = |v: VarIndex| store.variables().value(v);
    println!("{:<8} {:>6} {:>6}", "person", "red", "blue");
    for (person, name) in PEOPLE.iter().enumerate() {
        println!("{:<8} {:>6.3} {:>6.3}", name, value(red[person]), value(blue[person]));
    }
    Ok(())
}
