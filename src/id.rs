//! Index types for variables and rules
//!
//! Both are dense integers. Variables index into the single value array owned by
//! the [`VariableStore`](crate::variables::VariableStore); rules are numbered by
//! the [`RuleRegistry`](crate::rule::RuleRegistry) in registration order, so an
//! id is a full identity key rather than a hash.

use std::fmt;

/// Variable Index: position of an atom in the variable store (0..N-1).
///
/// Serialized as a signed 32-bit integer in term records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VarIndex(u32);

impl VarIndex {
    #[inline]
    pub fn from_usize(index: usize) -> Self {
        debug_assert!(index <= i32::MAX as usize, "variable index overflows record width");
        Self(index as u32)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Decode from the signed on-disk representation.
    /// Returns None for negative values.
    #[inline]
    pub fn from_i32(raw: i32) -> Option<Self> {
        u32::try_from(raw).ok().map(Self)
    }

    #[inline]
    pub fn to_i32(self) -> i32 {
        self.0 as i32
    }
}

impl fmt::Display for VarIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rule identity, assigned monotonically by the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleId(u32);

impl RuleId {
    #[inline]
    pub fn from_u32(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}
