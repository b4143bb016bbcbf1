//! Term stores: the collection of terms the optimizer sweeps over.
//!
//! A term store owns the [`VariableStore`] its terms index into, a
//! [`TermGenerator`] that turns ground rules into terms, and the terms
//! themselves. Insertion is thread-safe (`&self`); everything that reads terms
//! for optimization takes `&mut self`, so a pass never races an insertion.
//!
//! # Module structure
//!
//! - [`memory`]: all terms in one in-memory vector
//! - [`streaming`]: terms serialized into page files and memory-mapped back

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::ReasonerResult;
use crate::rule::{GroundRule, WeightedRule};
use crate::term::{Hyperplane, ReasonerTerm, TermGenerator};
use crate::variables::{VariableCounts, VariableStore};

pub mod memory;
pub mod streaming;

pub use memory::MemoryTermStore;
pub use streaming::StreamingTermStore;

/// Iterator over the terms of a store. Stores that decode terms on the fly
/// yield owned terms and may fail mid-pass.
pub type TermIter<'a, T> = Box<dyn Iterator<Item = ReasonerResult<Cow<'a, T>>> + 'a>;

/// One optimization pass: the terms, plus exclusive access to the variables.
pub struct Sweep<'a, T: Clone> {
    pub terms: TermIter<'a, T>,
    pub variables: &'a mut VariableStore,
}

/// Per-worker buffers for term generation.
///
/// Reused across ground rules so that generating terms does not allocate once
/// the buffers have grown.
pub struct TermScratch<T> {
    new_terms: Vec<T>,
    new_hyperplanes: Vec<Hyperplane>,
}

impl<T> TermScratch<T> {
    pub fn new() -> Self {
        Self {
            new_terms: Vec::new(),
            new_hyperplanes: Vec::new(),
        }
    }

    fn clear(&mut self) {
        self.new_terms.clear();
        self.new_hyperplanes.clear();
    }
}

impl<T> Default for TermScratch<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub trait TermStore: Send + Sync {
    type Term: ReasonerTerm;
    type Generator: TermGenerator<Term = Self::Term>;

    /// Store one generated term. Returns the number of terms stored.
    ///
    /// Safe to call from several threads at once.
    fn insert(&self, ground_rule: &GroundRule, term: Self::Term, hyperplane: Hyperplane) -> ReasonerResult<usize>;

    /// Remove all terms. Variables are kept.
    fn clear(&mut self) -> ReasonerResult<()>;

    /// Hint that `capacity` terms are coming.
    fn ensure_capacity(&mut self, capacity: usize);

    fn get(&mut self, index: usize) -> ReasonerResult<Cow<'_, Self::Term>>;

    fn iter(&mut self) -> ReasonerResult<TermIter<'_, Self::Term>>;

    /// Terms and variables for one optimization pass.
    fn sweep(&mut self) -> ReasonerResult<Sweep<'_, Self::Term>>;

    fn len(&self) -> usize;

    fn generator(&self) -> ReasonerResult<&Self::Generator>;

    fn variables(&self) -> &VariableStore;

    fn variables_mut(&mut self) -> &mut VariableStore;

    /// Release the terms and generator. Any later term access or insertion
    /// fails with [`ReasonerError::StoreClosed`](crate::error::ReasonerError::StoreClosed).
    fn close(&mut self) -> ReasonerResult<()>;

    fn is_closed(&self) -> bool;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Generate and store the terms for one ground rule.
    fn add(&self, ground_rule: &GroundRule, scratch: &mut TermScratch<Self::Term>) -> ReasonerResult<usize> {
        let generator = self.generator()?;
        scratch.clear();
        generator.create_terms(ground_rule, &mut scratch.new_terms, &mut scratch.new_hyperplanes)?;

        let mut count = 0;
        for (term, hyperplane) in scratch.new_terms.drain(..).zip(scratch.new_hyperplanes.drain(..)) {
            count += self.insert(ground_rule, term, hyperplane)?;
        }
        Ok(count)
    }

    /// Add many ground rules on `workers` threads.
    ///
    /// Workers claim ground rules through a shared counter. After the first
    /// failure no new ground rules are claimed, and that error is returned.
    fn add_all(&self, ground_rules: &[GroundRule], workers: usize) -> ReasonerResult<usize>
    where
        Self: Sized,
    {
        let workers = workers.clamp(1, ground_rules.len().max(1));
        if workers == 1 {
            let mut scratch = TermScratch::new();
            let mut count = 0;
            for ground_rule in ground_rules {
                count += self.add(ground_rule, &mut scratch)?;
            }
            return Ok(count);
        }

        let next = &AtomicUsize::new(0);
        let failed = &AtomicBool::new(false);

        let results: Vec<ReasonerResult<usize>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    s.spawn(move || {
                        let mut scratch = TermScratch::new();
                        let mut count = 0;
                        while !failed.load(Ordering::Relaxed) {
                            let i = next.fetch_add(1, Ordering::Relaxed);
                            let Some(ground_rule) = ground_rules.get(i) else {
                                break;
                            };
                            match self.add(ground_rule, &mut scratch) {
                                Ok(n) => count += n,
                                Err(e) => {
                                    failed.store(true, Ordering::Relaxed);
                                    return Err(e);
                                }
                            }
                        }
                        Ok(count)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        });

        log::debug!("Added {} ground rules on {} workers", ground_rules.len(), workers);
        results.into_iter().sum()
    }

    /// Terms generated from `rule`, in store order.
    fn terms_for_rule(&mut self, rule: &WeightedRule) -> ReasonerResult<TermIter<'_, Self::Term>> {
        let id = rule.id();
        let terms = self.iter()?;
        Ok(Box::new(terms.filter(move |term| match term {
            Ok(term) => term.rule().id() == id,
            Err(_) => true,
        })))
    }

    fn count_for_rule(&mut self, rule: &WeightedRule) -> ReasonerResult<usize> {
        let mut count = 0;
        for term in self.terms_for_rule(rule)? {
            term?;
            count += 1;
        }
        Ok(count)
    }

    /// Restore every variable to its initial value.
    fn reset(&mut self) {
        self.variables_mut().reset_values();
    }

    /// Commit the variable values. Returns the movement since the last commit.
    fn sync(&mut self) -> ReasonerResult<f64> {
        self.variables_mut().sync()
    }

    /// Called before the first pass.
    fn init_for_optimization(&mut self) -> ReasonerResult<()> {
        Ok(())
    }

    /// Called after every pass.
    fn iteration_complete(&mut self) -> ReasonerResult<()> {
        Ok(())
    }

    fn variable_counts(&self) -> VariableCounts {
        self.variables().counts()
    }
}
