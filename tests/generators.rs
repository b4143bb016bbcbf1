//! Proptest generators for rules, terms and variable stores
//!
//! Provides `Strategy` implementations for generating valid instances
//! of core data types used in property tests.

#![allow(dead_code)]

use std::sync::Arc;

use hlmrf::{
    Comparator, GroundRule, Hyperplane, ObjectiveTerm, Potential, RuleRegistry, VarIndex, VariableStore, Weight,
    WeightedRule,
};
use proptest::collection::vec;
use proptest::prelude::*;

// ============================================================================
// Rule Generation
// ============================================================================

pub fn arb_potential() -> impl Strategy<Value = Potential> {
    prop_oneof![
        Just(Potential::Linear),
        Just(Potential::Hinge),
        Just(Potential::Squared),
        Just(Potential::SquaredHinge),
    ]
}

pub fn arb_weight() -> impl Strategy<Value = Weight> {
    prop_oneof![
        9 => (0.0f32..10.0).prop_map(Weight::Finite),
        1 => Just(Weight::Hard),
    ]
}

/// A registry with `count` soft rules of arbitrary weight and shape.
pub fn arb_registry(count: usize) -> impl Strategy<Value = (RuleRegistry, Vec<Arc<WeightedRule>>)> {
    vec((0.1f32..10.0, arb_potential()), count..=count).prop_map(|specs| {
        let mut registry = RuleRegistry::new();
        let rules = specs
            .into_iter()
            .enumerate()
            .map(|(i, (weight, potential))| {
                registry
                    .register(format!("rule{}", i), Weight::Finite(weight), potential)
                    .unwrap()
            })
            .collect();
        (registry, rules)
    })
}

// ============================================================================
// Variable Generation
// ============================================================================

/// Values in [0, 1] with an observed flag each.
pub fn arb_atoms(max: usize) -> impl Strategy<Value = Vec<(f32, bool)>> {
    vec((0.0f32..=1.0, prop::bool::weighted(0.2)), 1..=max)
}

pub fn build_variables(atoms: &[(f32, bool)]) -> VariableStore {
    let mut store = VariableStore::new();
    for &(value, observed) in atoms {
        if observed {
            store.add_observed(value).unwrap();
        } else {
            store.add_unobserved(value).unwrap();
        }
    }
    store
}

// ============================================================================
// Term Generation
// ============================================================================

/// Raw pieces of a term: (coefficient, variable) pairs plus a constant.
#[derive(Debug, Clone)]
pub struct TermParams {
    pub entries: Vec<(f32, u32)>,
    pub constant: f32,
    pub potential: Potential,
}

pub fn arb_term_params(variable_count: u32, max_size: usize) -> impl Strategy<Value = TermParams> {
    (
        vec((-5.0f32..5.0, 0..variable_count), 0..=max_size),
        -5.0f32..5.0,
        arb_potential(),
    )
        .prop_map(|(entries, constant, potential)| TermParams {
            entries,
            constant,
            potential,
        })
}

pub fn build_term(rule: &Arc<WeightedRule>, params: &TermParams) -> ObjectiveTerm {
    let mut hyperplane = Hyperplane::new();
    for &(coefficient, variable) in &params.entries {
        hyperplane.add_term(VarIndex::from_usize(variable as usize), coefficient);
    }
    hyperplane.set_constant(params.constant);
    ObjectiveTerm::new(rule.clone(), params.potential, &hyperplane).unwrap()
}

// ============================================================================
// Ground Rule Generation
// ============================================================================

#[derive(Debug, Clone)]
pub enum GroundParams {
    Clause { positive: Vec<u32>, negative: Vec<u32> },
    Arithmetic { terms: Vec<(f32, u32)>, comparator: Comparator, constant: f32 },
}

pub fn arb_comparator() -> impl Strategy<Value = Comparator> {
    prop_oneof![
        Just(Comparator::LessEqual),
        Just(Comparator::GreaterEqual),
        Just(Comparator::Equal),
    ]
}

pub fn arb_ground_params(variable_count: u32) -> impl Strategy<Value = GroundParams> {
    prop_oneof![
        (vec(0..variable_count, 0..4), vec(0..variable_count, 0..4))
            .prop_map(|(positive, negative)| GroundParams::Clause { positive, negative }),
        (vec((-2.0f32..2.0, 0..variable_count), 1..5), arb_comparator(), -2.0f32..2.0).prop_map(
            |(terms, comparator, constant)| GroundParams::Arithmetic {
                terms,
                comparator,
                constant
            }
        ),
    ]
}

pub fn build_ground_rule(rule: &Arc<WeightedRule>, params: &GroundParams) -> GroundRule {
    let v = |i: &u32| VarIndex::from_usize(*i as usize);
    match params {
        GroundParams::Clause { positive, negative } => {
            GroundRule::clause(rule, positive.iter().map(v).collect(), negative.iter().map(v).collect())
        }
        GroundParams::Arithmetic {
            terms,
            comparator,
            constant,
        } => GroundRule::arithmetic(
            rule,
            terms.iter().map(|(c, i)| (*c, v(i))).collect(),
            *comparator,
            *constant,
        ),
    }
}
