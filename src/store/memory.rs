//! In-memory term store.

use std::borrow::Cow;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{ReasonerError, ReasonerResult};
use crate::rule::GroundRule;
use crate::term::{Hyperplane, ReasonerTerm, TermGenerator};
use crate::variables::VariableStore;

use super::{Sweep, TermIter, TermStore};

/// All terms in one vector behind a mutex.
///
/// Insertion locks; passes go through `&mut self` and never lock.
pub struct MemoryTermStore<G: TermGenerator> {
    terms: Mutex<Vec<G::Term>>,
    generator: Option<G>,
    variables: VariableStore,
    /// Insertions past this many terms fail
    capacity_limit: Option<usize>,
    /// Shuffle the terms once before optimizing
    shuffle_seed: Option<u64>,
    closed: bool,
}

impl<G> MemoryTermStore<G>
where
    G: TermGenerator,
    G::Term: ReasonerTerm,
{
    pub fn new(variables: VariableStore, generator: G) -> Self {
        Self {
            terms: Mutex::new(Vec::new()),
            generator: Some(generator),
            variables,
            capacity_limit: None,
            shuffle_seed: None,
            closed: false,
        }
    }

    /// Bound the number of terms this store accepts.
    pub fn with_capacity_limit(mut self, limit: usize) -> Self {
        self.capacity_limit = Some(limit);
        self
    }

    /// Visit terms in a seeded random order instead of insertion order.
    pub fn with_shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    fn check_open(&self) -> ReasonerResult<()> {
        if self.closed {
            Err(ReasonerError::StoreClosed)
        } else {
            Ok(())
        }
    }
}

fn borrowed<T: Clone>(term: &T) -> ReasonerResult<Cow<'_, T>> {
    Ok(Cow::Borrowed(term))
}

impl<G> TermStore for MemoryTermStore<G>
where
    G: TermGenerator,
    G::Term: ReasonerTerm,
{
    type Term = G::Term;
    type Generator = G;

    fn insert(&self, _ground_rule: &GroundRule, term: G::Term, _hyperplane: Hyperplane) -> ReasonerResult<usize> {
        self.check_open()?;
        for &variable in term.variable_indexes() {
            self.variables.check_index(variable)?;
        }

        let mut terms = self.terms.lock();
        if let Some(limit) = self.capacity_limit {
            if terms.len() >= limit {
                return Err(ReasonerError::Capacity {
                    what: "term",
                    index: terms.len(),
                    limit,
                });
            }
        }
        terms.push(term);
        Ok(1)
    }

    fn clear(&mut self) -> ReasonerResult<()> {
        self.terms.get_mut().clear();
        Ok(())
    }

    fn ensure_capacity(&mut self, capacity: usize) {
        let terms = self.terms.get_mut();
        let capacity = match self.capacity_limit {
            Some(limit) => capacity.min(limit),
            None => capacity,
        };
        terms.reserve(capacity.saturating_sub(terms.len()));
    }

    fn get(&mut self, index: usize) -> ReasonerResult<Cow<'_, G::Term>> {
        self.check_open()?;
        let terms = self.terms.get_mut();
        let limit = terms.len();
        terms.get(index).map(Cow::Borrowed).ok_or(ReasonerError::Capacity {
            what: "term index",
            index,
            limit,
        })
    }

    fn iter(&mut self) -> ReasonerResult<TermIter<'_, G::Term>> {
        self.check_open()?;
        Ok(Box::new(self.terms.get_mut().iter().map(borrowed)))
    }

    fn sweep(&mut self) -> ReasonerResult<Sweep<'_, G::Term>> {
        self.check_open()?;
        Ok(Sweep {
            terms: Box::new(self.terms.get_mut().iter().map(borrowed)),
            variables: &mut self.variables,
        })
    }

    fn len(&self) -> usize {
        self.terms.lock().len()
    }

    fn generator(&self) -> ReasonerResult<&G> {
        self.generator.as_ref().ok_or(ReasonerError::StoreClosed)
    }

    fn variables(&self) -> &VariableStore {
        &self.variables
    }

    fn variables_mut(&mut self) -> &mut VariableStore {
        &mut self.variables
    }

    fn close(&mut self) -> ReasonerResult<()> {
        self.terms.get_mut().clear();
        self.terms.get_mut().shrink_to_fit();
        self.generator = None;
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn init_for_optimization(&mut self) -> ReasonerResult<()> {
        self.check_open()?;
        if let Some(seed) = self.shuffle_seed {
            let mut rng = StdRng::seed_from_u64(seed);
            self.terms.get_mut().shuffle(&mut rng);
        }
        Ok(())
    }
}
