//! The objective term: `weight * f(coefficients . x - constant)`.
//!
//! `f` is one of the four [`Potential`] shapes. The term keeps its own copy of
//! the shape, which usually matches the owning rule but may not (an equality
//! constraint is generated as two hinged terms).
//!
//! # Binary record
//!
//! | field | width |
//! |---|---|
//! | squared flag | 1 |
//! | hinge flag | 1 |
//! | rule id | 4 |
//! | constant | 4 (f32) |
//! | size | 2 (u16) |
//! | size × (coefficient, variable index) | 4 (f32) + 4 (i32) each |

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

use crate::error::{ReasonerError, ReasonerResult};
use crate::id::{RuleId, VarIndex};
use crate::rule::{Potential, RuleRegistry, WeightedRule};

use super::cursor::{ByteReader, ByteWriter};
use super::hyperplane::Hyperplane;
use super::{ReasonerTerm, StreamingTerm};

/// Largest number of variables a single term may reference.
pub const MAX_TERM_SIZE: usize = i16::MAX as usize;

/// Bytes before the coefficient/index pairs.
const HEADER_BYTES: usize = 1 + 1 + 4 + 4 + 2;
/// Bytes per (coefficient, variable index) pair.
const ENTRY_BYTES: usize = 4 + 4;

#[derive(Clone, Debug)]
pub struct ObjectiveTerm {
    potential: Potential,
    rule: Arc<WeightedRule>,
    constant: f32,
    coefficients: Vec<f32>,
    variable_indexes: Vec<VarIndex>,
}

impl ObjectiveTerm {
    /// Build a term from a hyperplane, copying its coefficients, variables and
    /// constant. The hyperplane is not referenced afterwards.
    pub fn new(
        rule: Arc<WeightedRule>,
        potential: Potential,
        hyperplane: &Hyperplane,
    ) -> ReasonerResult<Self> {
        if hyperplane.size() > MAX_TERM_SIZE {
            return Err(ReasonerError::Capacity {
                what: "term size",
                index: hyperplane.size(),
                limit: MAX_TERM_SIZE,
            });
        }

        Ok(Self {
            potential,
            rule,
            constant: hyperplane.constant(),
            coefficients: hyperplane.coefficients().to_vec(),
            variable_indexes: hyperplane.variables().to_vec(),
        })
    }

    /// Decode a fresh term from the next record in `buffer`.
    pub fn decode(buffer: &mut ByteReader<'_>, rules: &RuleRegistry) -> ReasonerResult<Self> {
        let header = read_header(buffer, rules)?;
        let mut term = Self {
            potential: header.potential,
            rule: header.rule,
            constant: header.constant,
            coefficients: Vec::with_capacity(header.size),
            variable_indexes: Vec::with_capacity(header.size),
        };
        read_entries(buffer, header.size, &mut term.coefficients, &mut term.variable_indexes)?;
        Ok(term)
    }

    #[inline]
    pub fn potential(&self) -> Potential {
        self.potential
    }

    #[inline]
    pub fn constant(&self) -> f32 {
        self.constant
    }

    #[inline]
    pub fn coefficients(&self) -> &[f32] {
        &self.coefficients
    }

    #[inline]
    pub fn variable_index(&self, i: usize) -> VarIndex {
        self.variable_indexes[i]
    }

    /// The owning rule's weight, +inf for a hard rule.
    #[inline]
    pub fn weight(&self) -> f32 {
        self.rule.weight().value()
    }

    #[inline]
    pub fn is_hard(&self) -> bool {
        self.rule.is_hard()
    }

    /// `coefficients . x - constant`
    #[inline]
    pub fn dot(&self, values: &[f32]) -> f32 {
        let mut value = 0.0f32;
        for (c, v) in self.coefficients.iter().zip(self.variable_indexes.iter()) {
            value += c * values[v.index()];
        }
        value - self.constant
    }

    /// Subgradient of the potential with respect to the `i`th variable, given a
    /// precomputed dot product.
    #[inline]
    pub fn partial(&self, i: usize, dot: f32, weight: f32) -> f32 {
        let factor = self.potential.derivative_factor(dot);
        if factor == 0.0 {
            return 0.0;
        }
        weight * factor * self.coefficients[i]
    }

    /// Potential value `f(dot)` without the weight.
    #[inline]
    pub fn unweighted(&self, values: &[f32]) -> f32 {
        self.potential.apply(self.dot(values))
    }
}

impl ReasonerTerm for ObjectiveTerm {
    #[inline]
    fn size(&self) -> usize {
        self.variable_indexes.len()
    }

    fn is_convex(&self) -> bool {
        true
    }

    fn rule(&self) -> &Arc<WeightedRule> {
        &self.rule
    }

    /// `weight * f(dot)`. A zero potential evaluates to 0 even under infinite
    /// weight, so a hard rule costs +inf only while violated.
    fn evaluate(&self, values: &[f32]) -> f32 {
        let potential = self.potential.apply(self.dot(values));
        if potential == 0.0 {
            return 0.0;
        }
        self.weight() * potential
    }

    #[inline]
    fn variable_indexes(&self) -> &[VarIndex] {
        &self.variable_indexes
    }
}

impl Default for ObjectiveTerm {
    /// An empty linear term owned by a detached placeholder rule; only useful
    /// as a target for [`StreamingTerm::read`].
    fn default() -> Self {
        let mut registry = RuleRegistry::new();
        let rule = registry
            .register("<unread>", crate::rule::Weight::Finite(0.0), Potential::Linear)
            .unwrap_or_else(|_| unreachable!("zero weight is always valid"));
        Self {
            potential: Potential::Linear,
            rule,
            constant: 0.0,
            coefficients: Vec::new(),
            variable_indexes: Vec::new(),
        }
    }
}

impl StreamingTerm for ObjectiveTerm {
    fn fixed_byte_size(&self) -> usize {
        HEADER_BYTES + self.size() * ENTRY_BYTES
    }

    fn write_fixed_values(&self, buffer: &mut ByteWriter<'_>) -> ReasonerResult<()> {
        let needed = self.fixed_byte_size();
        if buffer.remaining() < needed {
            return Err(ReasonerError::Capacity {
                what: "record byte",
                index: buffer.position() + needed,
                limit: buffer.position() + buffer.remaining(),
            });
        }

        buffer.put_u8(self.potential.is_squared() as u8)?;
        buffer.put_u8(self.potential.is_hinge() as u8)?;
        buffer.put_u32(self.rule.id().as_u32())?;
        buffer.put_f32(self.constant)?;
        buffer.put_u16(self.size() as u16)?;

        for (c, v) in self.coefficients.iter().zip(self.variable_indexes.iter()) {
            buffer.put_f32(*c)?;
            buffer.put_i32(v.to_i32())?;
        }
        Ok(())
    }

    /// Reuses this term's vectors, growing them when the record is larger.
    /// On error the term's contents are unspecified.
    fn read(&mut self, buffer: &mut ByteReader<'_>, rules: &RuleRegistry) -> ReasonerResult<()> {
        let header = read_header(buffer, rules)?;
        self.potential = header.potential;
        self.rule = header.rule;
        self.constant = header.constant;
        read_entries(buffer, header.size, &mut self.coefficients, &mut self.variable_indexes)
    }
}

struct RecordHeader {
    potential: Potential,
    rule: Arc<WeightedRule>,
    constant: f32,
    size: usize,
}

fn read_flag(buffer: &mut ByteReader<'_>) -> ReasonerResult<bool> {
    let offset = buffer.position();
    match buffer.get_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ReasonerError::corrupt(offset, format!("flag byte {}", other))),
    }
}

fn read_header(buffer: &mut ByteReader<'_>, rules: &RuleRegistry) -> ReasonerResult<RecordHeader> {
    let start = buffer.position();
    let squared = read_flag(buffer)?;
    let hinge = read_flag(buffer)?;
    let rule_id = RuleId::from_u32(buffer.get_u32()?);
    let rule = rules.resolve(rule_id)?;
    let constant = buffer.get_f32()?;
    let size = buffer.get_u16()? as usize;

    if size > MAX_TERM_SIZE {
        return Err(ReasonerError::corrupt(start, format!("term size {} too large", size)));
    }
    if size * ENTRY_BYTES > buffer.remaining() {
        return Err(ReasonerError::corrupt(
            start,
            format!(
                "term size {} needs {} bytes, {} left",
                size,
                size * ENTRY_BYTES,
                buffer.remaining()
            ),
        ));
    }

    Ok(RecordHeader {
        potential: Potential::from_flags(squared, hinge),
        rule,
        constant,
        size,
    })
}

fn read_entries(
    buffer: &mut ByteReader<'_>,
    size: usize,
    coefficients: &mut Vec<f32>,
    variable_indexes: &mut Vec<VarIndex>,
) -> ReasonerResult<()> {
    coefficients.clear();
    variable_indexes.clear();
    coefficients.reserve(size);
    variable_indexes.reserve(size);

    for _ in 0..size {
        coefficients.push(buffer.get_f32()?);
        let offset = buffer.position();
        let raw = buffer.get_i32()?;
        let index = VarIndex::from_i32(raw)
            .ok_or_else(|| ReasonerError::corrupt(offset, format!("negative variable index {}", raw)))?;
        variable_indexes.push(index);
    }
    Ok(())
}

impl fmt::Display for ObjectiveTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self
            .coefficients
            .iter()
            .zip(self.variable_indexes.iter())
            .map(|(c, v)| format!("({} * <index:{}>)", c, v))
            .join(" + ");

        write!(f, "{} * ", self.rule.weight())?;
        if self.potential.is_hinge() {
            write!(f, "max(0.0, {} - {})", body, self.constant)?;
        } else {
            write!(f, "({} - {})", body, self.constant)?;
        }
        if self.potential.is_squared() {
            write!(f, " ^2")?;
        }
        Ok(())
    }
}
