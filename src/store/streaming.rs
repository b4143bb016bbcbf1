//! Disk-paged term store.
//!
//! Terms are encoded into their fixed-layout records as they are inserted and
//! appended to an in-memory page buffer. A full page (`page_size` terms) is
//! written to its own file under the page directory. Passes memory-map one page
//! at a time and decode it, so only a single page of terms is materialized.
//!
//! Page order and the order of terms inside a page can both be randomized. All
//! randomness comes from one `StdRng` seeded from the config, so two stores fed
//! the same terms in the same order visit them in the same order.

use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::StreamingConfig;
use crate::error::{ReasonerError, ReasonerResult};
use crate::rule::{GroundRule, RuleRegistry};
use crate::term::{ByteReader, ByteWriter, Hyperplane, ReasonerTerm, StreamingTerm, TermGenerator};
use crate::variables::VariableStore;

use super::{Sweep, TermIter, TermStore};

/// Distinguishes the page files of stores sharing a page directory
static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
struct Page {
    path: PathBuf,
    terms: usize,
}

/// Open page buffer plus the list of flushed pages.
#[derive(Debug, Default)]
struct PageWriter {
    buffer: Vec<u8>,
    buffered_terms: usize,
    pages: Vec<Page>,
    total_terms: usize,
}

impl PageWriter {
    fn flush(&mut self, dir: &Path, prefix: &str) -> ReasonerResult<()> {
        if self.buffered_terms == 0 {
            return Ok(());
        }

        fs::create_dir_all(dir)
            .map_err(|e| ReasonerError::io(format!("failed to create page directory {}", dir.display()), e))?;

        let path = dir.join(format!("{}-{:06}.page", prefix, self.pages.len()));
        let mut file = File::create(&path)
            .map_err(|e| ReasonerError::io(format!("failed to create page {}", path.display()), e))?;
        file.write_all(&self.buffer)
            .map_err(|e| ReasonerError::io(format!("failed to write page {}", path.display()), e))?;

        log::debug!(
            "Flushed page {} ({} terms, {} bytes)",
            path.display(),
            self.buffered_terms,
            self.buffer.len()
        );

        self.pages.push(Page {
            path,
            terms: self.buffered_terms,
        });
        self.buffer.clear();
        self.buffered_terms = 0;
        Ok(())
    }

    /// Delete every page file and forget all terms.
    fn remove_pages(&mut self) -> ReasonerResult<()> {
        let mut result = Ok(());
        for page in self.pages.drain(..) {
            if let Err(e) = fs::remove_file(&page.path) {
                if e.kind() != ErrorKind::NotFound && result.is_ok() {
                    result = Err(ReasonerError::io(format!("failed to remove page {}", page.path.display()), e));
                }
            }
        }
        self.buffer.clear();
        self.buffered_terms = 0;
        self.total_terms = 0;
        result
    }
}

pub struct StreamingTermStore<G: TermGenerator> {
    config: StreamingConfig,
    /// File name prefix unique to this store
    prefix: String,
    rules: Arc<RuleRegistry>,
    generator: Option<G>,
    variables: VariableStore,
    writer: Mutex<PageWriter>,
    /// Page visit order for the next pass
    page_order: Vec<usize>,
    rng: StdRng,
    closed: bool,
}

impl<G> StreamingTermStore<G>
where
    G: TermGenerator,
    G::Term: StreamingTerm,
{
    /// `rules` must contain every rule the generated terms reference; it is
    /// used to resolve rule identities when pages are read back.
    pub fn new(
        config: StreamingConfig,
        rules: Arc<RuleRegistry>,
        variables: VariableStore,
        generator: G,
    ) -> ReasonerResult<Self> {
        config.validate()?;
        let prefix = format!(
            "terms-{}-{}",
            std::process::id(),
            NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed)
        );
        let rng = StdRng::seed_from_u64(config.seed);

        Ok(Self {
            config,
            prefix,
            rules,
            generator: Some(generator),
            variables,
            writer: Mutex::new(PageWriter::default()),
            page_order: Vec::new(),
            rng,
            closed: false,
        })
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn rules(&self) -> &Arc<RuleRegistry> {
        &self.rules
    }

    /// Number of page files written so far.
    pub fn page_count(&self) -> usize {
        self.writer.lock().pages.len()
    }

    fn check_open(&self) -> ReasonerResult<()> {
        if self.closed {
            Err(ReasonerError::StoreClosed)
        } else {
            Ok(())
        }
    }

    /// Flush the open page and settle the page order, leaving it alone if no
    /// page was added since it was last set.
    fn prepare(&mut self) -> ReasonerResult<()> {
        self.check_open()?;
        let writer = self.writer.get_mut();
        writer.flush(&self.config.page_dir, &self.prefix)?;
        if self.page_order.len() != writer.pages.len() {
            self.page_order = (0..writer.pages.len()).collect();
            if self.config.randomize_page_access {
                self.page_order.shuffle(&mut self.rng);
            }
        }
        Ok(())
    }
}

/// Decode every record of one page. Every variable index must be below
/// `variable_count`.
fn read_page<T: StreamingTerm>(page: &Page, rules: &RuleRegistry, variable_count: usize) -> ReasonerResult<Vec<T>> {
    let file = File::open(&page.path)
        .map_err(|e| ReasonerError::io(format!("failed to open page {}", page.path.display()), e))?;
    let mmap = unsafe { Mmap::map(&file) }
        .map_err(|e| ReasonerError::io(format!("failed to mmap page {}", page.path.display()), e))?;

    let mut reader = ByteReader::new(&mmap);
    let prototype = T::default();
    let mut terms = Vec::with_capacity(page.terms);
    for _ in 0..page.terms {
        let start = reader.position();
        let mut term = prototype.clone();
        term.read(&mut reader, rules)?;
        if let Some(v) = term.variable_indexes().iter().find(|v| v.index() >= variable_count) {
            return Err(ReasonerError::corrupt(
                start,
                format!("variable index {} past {} variables", v.index(), variable_count),
            ));
        }
        terms.push(term);
    }

    if !reader.is_empty() {
        return Err(ReasonerError::corrupt(
            reader.position(),
            format!("{} trailing bytes after the last record", reader.remaining()),
        ));
    }
    Ok(terms)
}

/// Walks pages in `order`, decoding one page at a time.
struct PageIter<'a, T> {
    pages: &'a [Page],
    order: &'a [usize],
    next_page: usize,
    current: std::vec::IntoIter<T>,
    rules: &'a RuleRegistry,
    variable_count: usize,
    /// Present when terms are shuffled within each page
    rng: Option<&'a mut StdRng>,
    failed: bool,
}

impl<'a, T> PageIter<'a, T> {
    fn new(
        pages: &'a [Page],
        order: &'a [usize],
        rules: &'a RuleRegistry,
        variable_count: usize,
        rng: Option<&'a mut StdRng>,
    ) -> Self {
        Self {
            pages,
            order,
            next_page: 0,
            current: Vec::new().into_iter(),
            rules,
            variable_count,
            rng,
            failed: false,
        }
    }
}

impl<'a, T: StreamingTerm> Iterator for PageIter<'a, T> {
    type Item = ReasonerResult<Cow<'a, T>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            if let Some(term) = self.current.next() {
                return Some(Ok(Cow::Owned(term)));
            }

            let &page = self.order.get(self.next_page)?;
            self.next_page += 1;
            match read_page::<T>(&self.pages[page], self.rules, self.variable_count) {
                Ok(mut terms) => {
                    if let Some(rng) = self.rng.as_mut() {
                        terms.shuffle(&mut **rng);
                    }
                    self.current = terms.into_iter();
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<G> TermStore for StreamingTermStore<G>
where
    G: TermGenerator,
    G::Term: StreamingTerm,
{
    type Term = G::Term;
    type Generator = G;

    fn insert(&self, _ground_rule: &GroundRule, term: G::Term, _hyperplane: Hyperplane) -> ReasonerResult<usize> {
        self.check_open()?;
        // Records carry only the rule id, so the rule must be the one this
        // store's registry resolves that id to.
        let rule = term.rule();
        match self.rules.get(rule.id()) {
            Some(known) if Arc::ptr_eq(known, rule) => {}
            _ => return Err(ReasonerError::UnknownRule(rule.id())),
        }
        for &variable in term.variable_indexes() {
            self.variables.check_index(variable)?;
        }

        let size = term.fixed_byte_size();
        let mut writer = self.writer.lock();
        let start = writer.buffer.len();
        writer.buffer.resize(start + size, 0);
        let written = term.write_fixed_values(&mut ByteWriter::new(&mut writer.buffer[start..]));
        if let Err(e) = written {
            writer.buffer.truncate(start);
            return Err(e);
        }

        writer.buffered_terms += 1;
        writer.total_terms += 1;
        if writer.buffered_terms >= self.config.page_size {
            writer.flush(&self.config.page_dir, &self.prefix)?;
        }
        Ok(1)
    }

    fn clear(&mut self) -> ReasonerResult<()> {
        self.page_order.clear();
        self.writer.get_mut().remove_pages()
    }

    fn ensure_capacity(&mut self, _capacity: usize) {
        // Only one page is ever buffered.
    }

    fn get(&mut self, index: usize) -> ReasonerResult<Cow<'_, G::Term>> {
        self.prepare()?;
        let writer = self.writer.get_mut();
        let limit = writer.total_terms;

        let mut offset = index;
        for page in &writer.pages {
            if offset < page.terms {
                let mut terms = read_page::<G::Term>(page, &self.rules, self.variables.size())?;
                return Ok(Cow::Owned(terms.swap_remove(offset)));
            }
            offset -= page.terms;
        }

        Err(ReasonerError::Capacity {
            what: "term index",
            index,
            limit,
        })
    }

    fn iter(&mut self) -> ReasonerResult<TermIter<'_, G::Term>> {
        self.prepare()?;
        let shuffle = self.config.shuffle_page;
        Ok(Box::new(PageIter::new(
            &self.writer.get_mut().pages,
            &self.page_order,
            &self.rules,
            self.variables.size(),
            shuffle.then_some(&mut self.rng),
        )))
    }

    fn sweep(&mut self) -> ReasonerResult<Sweep<'_, G::Term>> {
        self.prepare()?;
        let shuffle = self.config.shuffle_page;
        let terms = PageIter::new(
            &self.writer.get_mut().pages,
            &self.page_order,
            &self.rules,
            self.variables.size(),
            shuffle.then_some(&mut self.rng),
        );
        Ok(Sweep {
            terms: Box::new(terms),
            variables: &mut self.variables,
        })
    }

    fn len(&self) -> usize {
        self.writer.lock().total_terms
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
        let result = self.clear();
        self.generator = None;
        self.closed = true;
        result
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn init_for_optimization(&mut self) -> ReasonerResult<()> {
        self.page_order.clear();
        self.prepare()
    }

    fn iteration_complete(&mut self) -> ReasonerResult<()> {
        if self.config.randomize_page_access {
            self.page_order.shuffle(&mut self.rng);
        }
        Ok(())
    }
}

impl<G: TermGenerator> Drop for StreamingTermStore<G> {
    fn drop(&mut self) {
        let _ = self.writer.get_mut().remove_pages(); // Ignore errors on drop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Potential, Weight};
    use crate::store::TermScratch;
    use crate::term::ObjectiveTermGenerator;

    fn fixture(dir: &Path, n: usize, page_size: usize) -> (StreamingTermStore<ObjectiveTermGenerator>, Vec<GroundRule>) {
        let mut rules = RuleRegistry::new();
        let rule = rules.register("prior", Weight::Finite(1.0), Potential::Squared).unwrap();
        let mut variables = VariableStore::new();
        let ground = (0..n)
            .map(|_| {
                let v = variables.add_unobserved(0.5).unwrap();
                GroundRule::clause(&rule, vec![], vec![v])
            })
            .collect();

        let config = StreamingConfig {
            page_size,
            ..StreamingConfig::with_page_dir(dir)
        };
        let store = StreamingTermStore::new(config, Arc::new(rules), variables, ObjectiveTermGenerator::new()).unwrap();
        (store, ground)
    }

    fn page_files(dir: &Path) -> usize {
        fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    #[test]
    fn full_pages_are_flushed_on_insert() {
        let dir = tempfile::tempdir().unwrap();
        let (mut store, ground) = fixture(dir.path(), 7, 3);
        store.add_all(&ground, 1).unwrap();
        assert_eq!(store.page_count(), 2);
        assert_eq!(store.len(), 7);

        store.init_for_optimization().unwrap();
        assert_eq!(store.page_count(), 3);
        assert_eq!(page_files(dir.path()), 3);
    }

    #[test]
    fn get_reads_through_pages() {
        let dir = tempfile::tempdir().unwrap();
        let (mut store, ground) = fixture(dir.path(), 5, 2);
        let mut scratch = TermScratch::new();
        for g in &ground {
            store.add(g, &mut scratch).unwrap();
        }
        assert_eq!(store.get(3).unwrap().variable_indexes()[0].index(), 3);
        assert!(matches!(store.get(5), Err(ReasonerError::Capacity { index: 5, limit: 5, .. })));
    }

    #[test]
    fn close_and_drop_remove_page_files() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (mut store, ground) = fixture(dir.path(), 4, 2);
            store.add_all(&ground, 1).unwrap();
            assert_eq!(page_files(dir.path()), 2);
            store.close().unwrap();
            assert_eq!(page_files(dir.path()), 0);
            assert!(matches!(store.iter(), Err(ReasonerError::StoreClosed)));
        }
        {
            let (store, ground) = fixture(dir.path(), 4, 2);
            store.add_all(&ground, 1).unwrap();
            assert_eq!(page_files(dir.path()), 2);
        }
        assert_eq!(page_files(dir.path()), 0);
    }

    #[test]
    fn out_of_range_index_in_page_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let (mut store, ground) = fixture(dir.path(), 3, 3);
        store.add_all(&ground, 1).unwrap();

        // Pages written against three variables, read back against one
        let mut fewer = VariableStore::new();
        fewer.add_unobserved(0.5).unwrap();
        store.variables = fewer;

        {
            let results: Vec<_> = store.iter().unwrap().collect();
            assert_eq!(results.len(), 1);
            assert!(matches!(results[0], Err(ReasonerError::CorruptRecord { offset, .. }) if offset > 0));
        }
        assert!(matches!(store.get(0), Err(ReasonerError::CorruptRecord { .. })));
    }

    #[test]
    fn same_seed_same_visit_order() {
        let visit = || {
            let dir = tempfile::tempdir().unwrap();
            let (mut store, ground) = fixture(dir.path(), 25, 4);
            store.add_all(&ground, 1).unwrap();
            store.init_for_optimization().unwrap();
            let mut passes = Vec::new();
            for _ in 0..2 {
                let ids: Vec<usize> = store
                    .iter()
                    .unwrap()
                    .map(|t| t.unwrap().variable_indexes()[0].index())
                    .collect();
                passes.push(ids);
                store.iteration_complete().unwrap();
            }
            passes
        };

        let first = visit();
        assert_eq!(first, visit());
        let mut sorted = first[0].clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..25).collect::<Vec<_>>());
    }
}
