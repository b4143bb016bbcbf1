//! Term generation: ground rule → (term, hyperplane) pairs.
//!
//! Clauses use the Łukasiewicz distance to satisfaction. For a clause
//! `OR(p) OR OR(!n)` the hyperplane is
//!
//! ```text
//! sum(x_n) - sum(x_p) - (|n| - 1)
//! ```
//!
//! which is positive exactly when the clause is less than fully satisfied.
//! Arithmetic rules map `<=` directly, negate for `>=`, and split `=` into both.

use crate::error::{ReasonerError, ReasonerResult};
use crate::id::VarIndex;
use crate::rule::{Comparator, GroundBody, GroundRule, Potential};
use crate::variables::VariableStore;

use super::hyperplane::Hyperplane;
use super::objective::ObjectiveTerm;

/// Converts ground rules into terms.
///
/// Implementations must be pure: the same ground rule always yields the same
/// terms, so generation can run on any worker.
pub trait TermGenerator: Send + Sync {
    type Term;

    /// Append the terms for `ground_rule` (and the hyperplane each was built
    /// from) to the output buffers. May append nothing.
    fn create_terms(
        &self,
        ground_rule: &GroundRule,
        terms: &mut Vec<Self::Term>,
        hyperplanes: &mut Vec<Hyperplane>,
    ) -> ReasonerResult<()>;
}

/// Generator for [`ObjectiveTerm`]s.
#[derive(Clone, Debug, Default)]
pub struct ObjectiveTermGenerator {
    /// When set, every variable index must be below this bound
    variable_count: Option<usize>,
}

impl ObjectiveTermGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate variable indices against a variable store of this size.
    pub fn with_variable_count(count: usize) -> Self {
        Self {
            variable_count: Some(count),
        }
    }

    /// Validate against the current size of `variables`.
    pub fn for_variables(variables: &VariableStore) -> Self {
        Self::with_variable_count(variables.size())
    }

    fn check(&self, variable: VarIndex) -> ReasonerResult<()> {
        match self.variable_count {
            Some(limit) if variable.index() >= limit => Err(ReasonerError::Capacity {
                what: "variable index",
                index: variable.index(),
                limit,
            }),
            _ => Ok(()),
        }
    }

    fn clause_hyperplane(
        &self,
        positive: &[VarIndex],
        negative: &[VarIndex],
    ) -> ReasonerResult<Hyperplane> {
        let mut hp = Hyperplane::with_capacity(positive.len() + negative.len());
        for &v in positive {
            self.check(v)?;
            hp.add_term(v, -1.0);
        }
        for &v in negative {
            self.check(v)?;
            hp.add_term(v, 1.0);
        }
        hp.set_constant(negative.len() as f32 - 1.0);
        Ok(hp)
    }

    fn linear_hyperplane(&self, terms: &[(f32, VarIndex)], constant: f32) -> ReasonerResult<Hyperplane> {
        let mut hp = Hyperplane::with_capacity(terms.len());
        for &(c, v) in terms {
            self.check(v)?;
            hp.add_term(v, c);
        }
        hp.set_constant(constant);
        Ok(hp)
    }

    fn push(
        ground_rule: &GroundRule,
        potential: Potential,
        mut hp: Hyperplane,
        terms: &mut Vec<ObjectiveTerm>,
        hyperplanes: &mut Vec<Hyperplane>,
    ) -> ReasonerResult<()> {
        hp.prune_zeros();
        if hp.is_empty() {
            return Ok(());
        }
        terms.push(ObjectiveTerm::new(ground_rule.rule.clone(), potential, &hp)?);
        hyperplanes.push(hp);
        Ok(())
    }
}

impl TermGenerator for ObjectiveTermGenerator {
    type Term = ObjectiveTerm;

    fn create_terms(
        &self,
        ground_rule: &GroundRule,
        terms: &mut Vec<ObjectiveTerm>,
        hyperplanes: &mut Vec<Hyperplane>,
    ) -> ReasonerResult<()> {
        let potential = ground_rule.rule.potential();

        match &ground_rule.body {
            GroundBody::Clause { positive, negative } => {
                let hp = self.clause_hyperplane(positive, negative)?;
                Self::push(ground_rule, potential, hp, terms, hyperplanes)
            }
            GroundBody::Arithmetic {
                terms: linear,
                comparator,
                constant,
            } => {
                let hp = self.linear_hyperplane(linear, *constant)?;
                match comparator {
                    Comparator::LessEqual => Self::push(ground_rule, potential, hp, terms, hyperplanes),
                    Comparator::GreaterEqual => {
                        let mut hp = hp;
                        hp.negate();
                        Self::push(ground_rule, potential, hp, terms, hyperplanes)
                    }
                    Comparator::Equal => {
                        let mut flipped = hp.clone();
                        flipped.negate();
                        let hinged = potential.with_hinge();
                        Self::push(ground_rule, hinged, hp, terms, hyperplanes)?;
                        Self::push(ground_rule, hinged, flipped, terms, hyperplanes)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{RuleRegistry, Weight};
    use crate::term::ReasonerTerm;

    fn v(i: usize) -> VarIndex {
        VarIndex::from_usize(i)
    }

    #[test]
    fn clause_distance_to_satisfaction() {
        let mut rules = RuleRegistry::new();
        let rule = rules.register("c", Weight::Finite(1.0), Potential::Hinge).unwrap();
        // a & b -> c  ==  !a | !b | c
        let ground = GroundRule::clause(&rule, vec![v(2)], vec![v(0), v(1)]);

        let (mut terms, mut hps) = (Vec::new(), Vec::new());
        ObjectiveTermGenerator::new().create_terms(&ground, &mut terms, &mut hps).unwrap();
        assert_eq!(terms.len(), 1);
        assert_eq!(hps.len(), 1);

        let term = &terms[0];
        assert_eq!(term.evaluate(&[1.0, 1.0, 0.0]), 1.0);
        assert_eq!(term.evaluate(&[1.0, 1.0, 1.0]), 0.0);
        assert_eq!(term.evaluate(&[0.0, 1.0, 0.0]), 0.0);
    }

    #[test]
    fn equality_splits_into_two_hinges() {
        let mut rules = RuleRegistry::new();
        let rule = rules.register("eq", Weight::Finite(1.0), Potential::Squared).unwrap();
        let ground = GroundRule::arithmetic(&rule, vec![(1.0, v(0)), (1.0, v(1))], Comparator::Equal, 1.0);

        let (mut terms, mut hps) = (Vec::new(), Vec::new());
        ObjectiveTermGenerator::new().create_terms(&ground, &mut terms, &mut hps).unwrap();
        assert_eq!(terms.len(), 2);
        assert!(terms.iter().all(|t| t.potential() == Potential::SquaredHinge));

        let total = |x: &[f32]| terms.iter().map(|t| t.evaluate(x)).sum::<f32>();
        assert_eq!(total(&[0.5, 0.5]), 0.0);
        assert!((total(&[1.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((total(&[0.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cancelling_coefficients_produce_no_term() {
        let mut rules = RuleRegistry::new();
        let rule = rules.register("z", Weight::Finite(1.0), Potential::Hinge).unwrap();
        let ground = GroundRule::arithmetic(&rule, vec![(1.0, v(0)), (-1.0, v(0))], Comparator::LessEqual, 0.0);

        let (mut terms, mut hps) = (Vec::new(), Vec::new());
        ObjectiveTermGenerator::new().create_terms(&ground, &mut terms, &mut hps).unwrap();
        assert!(terms.is_empty());
        assert!(hps.is_empty());
    }

    #[test]
    fn out_of_range_variable_is_rejected() {
        let mut rules = RuleRegistry::new();
        let rule = rules.register("c", Weight::Finite(1.0), Potential::Hinge).unwrap();
        let ground = GroundRule::clause(&rule, vec![v(5)], vec![]);

        let (mut terms, mut hps) = (Vec::new(), Vec::new());
        let err = ObjectiveTermGenerator::with_variable_count(3)
            .create_terms(&ground, &mut terms, &mut hps)
            .unwrap_err();
        assert!(matches!(err, ReasonerError::Capacity { index: 5, limit: 3, .. }));
        assert!(terms.is_empty());
    }
}
