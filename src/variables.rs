//! The variable store: one value in [0, 1] per ground atom
//!
//! This is the single shared mutable array of the optimizer. Every atom is either
//! observed (its value is read but never updated) or unobserved (a free variable).
//! Term stores own a `VariableStore` and lend `&mut` access to exactly one writer,
//! the reasoner, for the duration of a pass.
//!
//! The store keeps three copies of the values:
//! - the live values mutated during optimization
//! - the initial values, restored by `reset_values()`
//! - the committed values, updated by `sync()`
//!
//! With a persistence path, `sync()` also writes the committed state to disk
//! (rkyv archive, written to a temp file and renamed into place).

use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use rkyv::ser::serializers::AllocSerializer;
use rkyv::ser::Serializer;
use rkyv::{check_archived_root, Archive, Deserialize, Serialize};

use crate::error::{ReasonerError, ReasonerResult};
use crate::id::VarIndex;

/// Whether an atom is a free variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AtomKind {
    Observed,
    Unobserved,
}

impl AtomKind {
    #[inline]
    pub fn is_observed(self) -> bool {
        matches!(self, AtomKind::Observed)
    }
}

/// Count of atoms by kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VariableCounts {
    pub observed: usize,
    pub unobserved: usize,
}

impl fmt::Display for VariableCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} unobserved and {} observed", self.unobserved, self.observed)
    }
}

/// Serializable form of the committed variable state
#[derive(Archive, Deserialize, Serialize)]
#[archive(check_bytes)]
struct VariableData {
    values: Vec<f32>,
    observed: Vec<bool>,
}

#[derive(Debug, Default)]
pub struct VariableStore {
    values: Vec<f32>,
    initial: Vec<f32>,
    committed: Vec<f32>,
    kinds: Vec<AtomKind>,
    /// Path to the persisted state (if persistent)
    path: Option<PathBuf>,
}

impl VariableStore {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that persists on `sync()`
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Load a persisted store, or create an empty one if the file doesn't exist.
    ///
    /// Loaded values become both the initial and the committed values.
    pub fn load(path: impl Into<PathBuf>) -> ReasonerResult<Self> {
        let path = path.into();

        if !path.exists() {
            return Ok(Self::with_path(path));
        }

        let file = File::open(&path)
            .map_err(|e| ReasonerError::io(format!("failed to open {}", path.display()), e))?;

        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| ReasonerError::io(format!("failed to mmap {}", path.display()), e))?;

        if mmap.is_empty() {
            return Ok(Self::with_path(path));
        }

        let archived = check_archived_root::<VariableData>(&mmap)
            .map_err(|e| ReasonerError::io("failed to validate variable archive", e))?;

        let data: VariableData = archived
            .deserialize(&mut rkyv::Infallible)
            .map_err(|_| ReasonerError::io("failed to deserialize variables", "infallible"))?;

        if data.values.len() != data.observed.len() {
            return Err(ReasonerError::io(
                format!("variable archive {}", path.display()),
                format!("{} values but {} flags", data.values.len(), data.observed.len()),
            ));
        }

        let mut store = Self::with_path(path);
        for (value, observed) in data.values.into_iter().zip(data.observed) {
            let kind = if observed { AtomKind::Observed } else { AtomKind::Unobserved };
            store.push(kind, value)?;
        }
        Ok(store)
    }

    /// Add an observed atom with a fixed value
    pub fn add_observed(&mut self, value: f32) -> ReasonerResult<VarIndex> {
        self.push(AtomKind::Observed, value)
    }

    /// Add a free variable with its starting value
    pub fn add_unobserved(&mut self, value: f32) -> ReasonerResult<VarIndex> {
        self.push(AtomKind::Unobserved, value)
    }

    fn push(&mut self, kind: AtomKind, value: f32) -> ReasonerResult<VarIndex> {
        let index = self.values.len();
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(ReasonerError::InvalidValue { index, value });
        }
        if index > i32::MAX as usize {
            return Err(ReasonerError::Capacity {
                what: "variable index",
                index,
                limit: i32::MAX as usize,
            });
        }

        self.values.push(value);
        self.initial.push(value);
        self.committed.push(value);
        self.kinds.push(kind);
        Ok(VarIndex::from_usize(index))
    }

    #[inline]
    pub fn atoms(&self) -> &[AtomKind] {
        &self.kinds
    }

    #[inline]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    #[inline]
    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    #[inline]
    pub fn value(&self, index: VarIndex) -> f32 {
        self.values[index.index()]
    }

    #[inline]
    pub fn is_observed(&self, index: VarIndex) -> bool {
        self.kinds[index.index()].is_observed()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Error unless `index` is a valid position in this store.
    pub fn check_index(&self, index: VarIndex) -> ReasonerResult<()> {
        if index.index() < self.values.len() {
            Ok(())
        } else {
            Err(ReasonerError::Capacity {
                what: "variable index",
                index: index.index(),
                limit: self.values.len(),
            })
        }
    }

    /// Restore every atom to its initial value.
    pub fn reset_values(&mut self) {
        self.values.copy_from_slice(&self.initial);
    }

    /// Commit the live values and return the total absolute movement since the
    /// previous commit.
    pub fn sync(&mut self) -> ReasonerResult<f64> {
        let change: f64 = self
            .values
            .iter()
            .zip(self.committed.iter())
            .map(|(&v, &c)| (v as f64 - c as f64).abs())
            .sum();

        self.committed.copy_from_slice(&self.values);

        if self.path.is_some() {
            self.save()?;
        }

        Ok(change)
    }

    /// One pass over the atoms, classifying each.
    pub fn counts(&self) -> VariableCounts {
        let mut counts = VariableCounts::default();
        for kind in &self.kinds {
            match kind {
                AtomKind::Observed => counts.observed += 1,
                AtomKind::Unobserved => counts.unobserved += 1,
            }
        }
        counts
    }

    /// Get the persistence path (if any)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn save(&self) -> ReasonerResult<()> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ReasonerError::io("failed to create variable directory", e))?;
        }

        let data = VariableData {
            values: self.committed.clone(),
            observed: self.kinds.iter().map(|k| k.is_observed()).collect(),
        };

        let mut serializer = AllocSerializer::<4096>::default();
        serializer
            .serialize_value(&data)
            .map_err(|e| ReasonerError::io("failed to serialize variables", e))?;
        let bytes = serializer.into_serializer().into_inner();

        let temp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&temp_path)
                .map_err(|e| ReasonerError::io("failed to create temp variable file", e))?;
            file.write_all(&bytes)
                .map_err(|e| ReasonerError::io("failed to write variable file", e))?;
            file.sync_all()
                .map_err(|e| ReasonerError::io("failed to sync variable file", e))?;
        }

        fs::rename(&temp_path, path)
            .map_err(|e| ReasonerError::io("failed to rename variable file", e))?;

        Ok(())
    }
}
