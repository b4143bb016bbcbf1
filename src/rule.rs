//! Weighted rules, their registry, and ground rules
//!
//! A [`WeightedRule`] carries the weight and potential shape shared by every term
//! generated from it. Rules are shared as `Arc<WeightedRule>` and never owned by
//! a term.
//!
//! The [`RuleRegistry`] hands out [`RuleId`]s in registration order and resolves
//! them back to live rules. A streaming term store writes the id into each term
//! record and resolves it through the registry on read, so every rule must be
//! registered before pages are read back.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{ReasonerError, ReasonerResult};
use crate::id::{RuleId, VarIndex};

// ============================================================================
// WEIGHT AND POTENTIAL SHAPE
// ============================================================================

/// Rule weight. A hard rule has infinite weight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Weight {
    Finite(f32),
    Hard,
}

impl Weight {
    #[inline]
    pub fn value(self) -> f32 {
        match self {
            Weight::Finite(w) => w,
            Weight::Hard => f32::INFINITY,
        }
    }

    #[inline]
    pub fn is_hard(self) -> bool {
        matches!(self, Weight::Hard)
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Weight::Finite(w) => write!(f, "{}", w),
            Weight::Hard => write!(f, "inf"),
        }
    }
}

/// Shape of a linear potential `f(dot)`, one variant per (squared, hinge) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Potential {
    /// `dot`
    Linear,
    /// `max(0, dot)`
    Hinge,
    /// `dot^2`
    Squared,
    /// `max(0, dot)^2`
    SquaredHinge,
}

impl Potential {
    pub fn from_flags(squared: bool, hinge: bool) -> Self {
        match (squared, hinge) {
            (false, false) => Potential::Linear,
            (false, true) => Potential::Hinge,
            (true, false) => Potential::Squared,
            (true, true) => Potential::SquaredHinge,
        }
    }

    #[inline]
    pub fn is_squared(self) -> bool {
        matches!(self, Potential::Squared | Potential::SquaredHinge)
    }

    #[inline]
    pub fn is_hinge(self) -> bool {
        matches!(self, Potential::Hinge | Potential::SquaredHinge)
    }

    /// The same shape with the hinge turned on.
    pub fn with_hinge(self) -> Self {
        Potential::from_flags(self.is_squared(), true)
    }

    /// `f(dot)`
    #[inline]
    pub fn apply(self, dot: f32) -> f32 {
        match self {
            Potential::Linear => dot,
            Potential::Hinge => dot.max(0.0),
            Potential::Squared => dot * dot,
            Potential::SquaredHinge => {
                let d = dot.max(0.0);
                d * d
            }
        }
    }

    /// `f'(dot)`, taking 0 on the flat side of a hinge (including the kink).
    #[inline]
    pub fn derivative_factor(self, dot: f32) -> f32 {
        match self {
            Potential::Hinge | Potential::SquaredHinge if dot <= 0.0 => 0.0,
            Potential::Linear | Potential::Hinge => 1.0,
            Potential::Squared | Potential::SquaredHinge => 2.0 * dot,
        }
    }
}

// ============================================================================
// WEIGHTED RULE
// ============================================================================

/// A rule shared by all the terms grounded from it.
///
/// Equality and hashing use the registry id only.
#[derive(Debug)]
pub struct WeightedRule {
    id: RuleId,
    name: String,
    weight: Weight,
    potential: Potential,
}

impl WeightedRule {
    #[inline]
    pub fn id(&self) -> RuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn weight(&self) -> Weight {
        self.weight
    }

    #[inline]
    pub fn potential(&self) -> Potential {
        self.potential
    }

    #[inline]
    pub fn is_hard(&self) -> bool {
        self.weight.is_hard()
    }
}

impl PartialEq for WeightedRule {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for WeightedRule {}

impl Hash for WeightedRule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for WeightedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, weight {}, {:?})", self.name, self.id, self.weight, self.potential)
    }
}

// ============================================================================
// RULE REGISTRY
// ============================================================================

/// Registry of all rules known to a model.
///
/// Provides the mapping used when decoding term records:
/// - `register(..)` → new rule with the next id
/// - `resolve(id)` → live rule, or `UnknownRule`
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: IndexMap<RuleId, Arc<WeightedRule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule, assigning the next id.
    ///
    /// Finite weights must be finite and non-negative.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        weight: Weight,
        potential: Potential,
    ) -> ReasonerResult<Arc<WeightedRule>> {
        let name = name.into();
        if let Weight::Finite(w) = weight {
            if !w.is_finite() || w < 0.0 {
                return Err(ReasonerError::config(
                    format!("rule '{}'", name),
                    format!("weight must be finite and non-negative, got {}", w),
                ));
            }
        }

        let id = RuleId::from_u32(self.rules.len() as u32);
        let rule = Arc::new(WeightedRule {
            id,
            name,
            weight,
            potential,
        });
        self.rules.insert(id, Arc::clone(&rule));
        Ok(rule)
    }

    pub fn get(&self, id: RuleId) -> Option<&Arc<WeightedRule>> {
        self.rules.get(&id)
    }

    pub fn resolve(&self, id: RuleId) -> ReasonerResult<Arc<WeightedRule>> {
        self.get(id).cloned().ok_or(ReasonerError::UnknownRule(id))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<WeightedRule>> + '_ {
        self.rules.values()
    }
}

// ============================================================================
// GROUND RULES
// ============================================================================

/// Comparison in a ground arithmetic rule `sum(c * x) <op> k`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Comparator {
    LessEqual,
    GreaterEqual,
    Equal,
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparator::LessEqual => write!(f, "<="),
            Comparator::GreaterEqual => write!(f, ">="),
            Comparator::Equal => write!(f, "="),
        }
    }
}

/// Instantiated body of a rule.
#[derive(Clone, Debug, PartialEq)]
pub enum GroundBody {
    /// Disjunction of literals: `OR(positive) OR OR(!negative)`
    Clause {
        positive: Vec<VarIndex>,
        negative: Vec<VarIndex>,
    },
    /// Linear constraint over variables
    Arithmetic {
        terms: Vec<(f32, VarIndex)>,
        comparator: Comparator,
        constant: f32,
    },
}

/// A fully instantiated rule, as produced by grounding.
#[derive(Clone, Debug)]
pub struct GroundRule {
    pub rule: Arc<WeightedRule>,
    pub body: GroundBody,
}

impl GroundRule {
    pub fn clause(rule: &Arc<WeightedRule>, positive: Vec<VarIndex>, negative: Vec<VarIndex>) -> Self {
        Self {
            rule: Arc::clone(rule),
            body: GroundBody::Clause { positive, negative },
        }
    }

    pub fn arithmetic(
        rule: &Arc<WeightedRule>,
        terms: Vec<(f32, VarIndex)>,
        comparator: Comparator,
        constant: f32,
    ) -> Self {
        Self {
            rule: Arc::clone(rule),
            body: GroundBody::Arithmetic {
                terms,
                comparator,
                constant,
            },
        }
    }

    /// All variable indices mentioned by the body, in order (duplicates kept).
    pub fn variables(&self) -> Vec<VarIndex> {
        match &self.body {
            GroundBody::Clause { positive, negative } => {
                positive.iter().chain(negative.iter()).copied().collect()
            }
            GroundBody::Arithmetic { terms, .. } => terms.iter().map(|&(_, v)| v).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn potential_flags_roundtrip() {
        for squared in [false, true] {
            for hinge in [false, true] {
                let p = Potential::from_flags(squared, hinge);
                assert_eq!(p.is_squared(), squared);
                assert_eq!(p.is_hinge(), hinge);
            }
        }
    }

    #[test]
    fn hinge_flat_region_has_zero_derivative() {
        assert_eq!(Potential::Hinge.derivative_factor(0.0), 0.0);
        assert_eq!(Potential::SquaredHinge.derivative_factor(-0.5), 0.0);
        assert_eq!(Potential::Squared.derivative_factor(-0.5), -1.0);
        assert_eq!(Potential::Linear.derivative_factor(-0.5), 1.0);
    }

    #[test]
    fn registry_assigns_sequential_ids() {
        let mut registry = RuleRegistry::new();
        let a = registry.register("a", Weight::Finite(1.0), Potential::Hinge).unwrap();
        let b = registry.register("b", Weight::Hard, Potential::Linear).unwrap();

        assert_eq!(a.id().as_u32(), 0);
        assert_eq!(b.id().as_u32(), 1);
        assert!(Arc::ptr_eq(&registry.resolve(b.id()).unwrap(), &b));
        assert_eq!(
            registry.resolve(RuleId::from_u32(7)).unwrap_err(),
            ReasonerError::UnknownRule(RuleId::from_u32(7))
        );
    }

    #[test]
    fn registry_rejects_negative_weight() {
        let mut registry = RuleRegistry::new();
        let err = registry
            .register("neg", Weight::Finite(-1.0), Potential::Hinge)
            .unwrap_err();
        assert!(matches!(err, ReasonerError::Config { .. }));
        assert!(registry.is_empty());
    }
}
