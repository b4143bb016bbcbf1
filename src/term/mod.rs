//! Optimizable terms
//!
//! A term is a potential function over a small, fixed set of variables. The
//! reasoner only needs [`ReasonerTerm`]; term stores that page terms to disk
//! additionally need [`StreamingTerm`], a fixed-layout binary encoding.
//!
//! # Module structure
//!
//! - [`cursor`]: bounds-checked byte cursors used by the binary encoding
//! - [`hyperplane`]: the linear form a term is built from
//! - [`objective`]: the linear/hinge/squared objective term
//! - [`generator`]: ground rule → terms

use std::sync::Arc;

use crate::error::ReasonerResult;
use crate::id::VarIndex;
use crate::rule::{RuleRegistry, WeightedRule};

pub mod cursor;
pub mod generator;
pub mod hyperplane;
pub mod objective;

pub use cursor::{ByteReader, ByteWriter};
pub use generator::{ObjectiveTermGenerator, TermGenerator};
pub use hyperplane::Hyperplane;
pub use objective::{ObjectiveTerm, MAX_TERM_SIZE};

/// A potential function over variables of the variable store.
pub trait ReasonerTerm: Clone + Send + Sync + 'static {
    /// Number of variables this term uses
    fn size(&self) -> usize;

    /// Whether this term is convex.
    /// Reasoners may treat non-convex terms differently.
    fn is_convex(&self) -> bool;

    /// The rule this term was generated from
    fn rule(&self) -> &Arc<WeightedRule>;

    /// Evaluate the term against the full value array of the variable store
    fn evaluate(&self, values: &[f32]) -> f32;

    /// Variable store indices, one per participating variable
    fn variable_indexes(&self) -> &[VarIndex];
}

/// A term with a fixed-size binary record, usable by a streaming term store.
pub trait StreamingTerm: ReasonerTerm + Default {
    /// The number of bytes `write_fixed_values` will write for this term
    fn fixed_byte_size(&self) -> usize;

    /// Write the record. Variable indices are written in the variable store's
    /// index space.
    fn write_fixed_values(&self, buffer: &mut ByteWriter<'_>) -> ReasonerResult<()>;

    /// Replace this term with the next record in `buffer`, resolving the rule
    /// identity through `rules`.
    fn read(&mut self, buffer: &mut ByteReader<'_>, rules: &RuleRegistry) -> ReasonerResult<()>;
}
