//! Linear forms `sum(coefficient * x) - constant`, built during term generation.

use std::collections::HashMap;

use crate::id::VarIndex;

/// Size past which repeated variables are found through a position map
const INDEX_THRESHOLD: usize = 16;

/// An ordered list of (coefficient, variable) pairs and a constant.
///
/// Adding a variable that is already present folds the coefficient into the
/// existing entry, so every variable appears once.
#[derive(Clone, Debug, Default)]
pub struct Hyperplane {
    coefficients: Vec<f32>,
    variables: Vec<VarIndex>,
    constant: f32,
    /// Entry position by variable, empty until the size reaches `INDEX_THRESHOLD`
    positions: HashMap<VarIndex, usize>,
}

impl PartialEq for Hyperplane {
    fn eq(&self, other: &Self) -> bool {
        self.coefficients == other.coefficients
            && self.variables == other.variables
            && self.constant == other.constant
    }
}

impl Hyperplane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            coefficients: Vec::with_capacity(capacity),
            variables: Vec::with_capacity(capacity),
            constant: 0.0,
            positions: HashMap::new(),
        }
    }

    pub fn add_term(&mut self, variable: VarIndex, coefficient: f32) {
        match self.position(variable) {
            Some(i) => self.coefficients[i] += coefficient,
            None => {
                if !self.positions.is_empty() {
                    self.positions.insert(variable, self.variables.len());
                }
                self.variables.push(variable);
                self.coefficients.push(coefficient);
            }
        }
    }

    fn position(&mut self, variable: VarIndex) -> Option<usize> {
        if self.variables.len() < INDEX_THRESHOLD {
            return self.variables.iter().position(|&v| v == variable);
        }
        if self.positions.is_empty() {
            self.positions
                .extend(self.variables.iter().enumerate().map(|(i, &v)| (v, i)));
        }
        self.positions.get(&variable).copied()
    }

    /// Drop entries whose folded coefficient is exactly zero, keeping order.
    pub fn prune_zeros(&mut self) {
        let mut kept = 0;
        for i in 0..self.coefficients.len() {
            if self.coefficients[i] != 0.0 {
                self.coefficients.swap(kept, i);
                self.variables.swap(kept, i);
                kept += 1;
            }
        }
        if kept < self.coefficients.len() {
            self.coefficients.truncate(kept);
            self.variables.truncate(kept);
            self.positions.clear();
        }
    }

    pub fn size(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn constant(&self) -> f32 {
        self.constant
    }

    pub fn set_constant(&mut self, constant: f32) {
        self.constant = constant;
    }

    pub fn coefficients(&self) -> &[f32] {
        &self.coefficients
    }

    pub fn variables(&self) -> &[VarIndex] {
        &self.variables
    }

    /// Negate every coefficient and the constant (flip `<=` into `>=`).
    pub fn negate(&mut self) {
        for c in &mut self.coefficients {
            *c = -*c;
        }
        self.constant = -self.constant;
    }

    pub fn iter(&self) -> impl Iterator<Item = (f32, VarIndex)> + '_ {
        self.coefficients.iter().copied().zip(self.variables.iter().copied())
    }

    pub fn clear(&mut self) {
        self.coefficients.clear();
        self.variables.clear();
        self.constant = 0.0;
        self.positions.clear();
    }
}
