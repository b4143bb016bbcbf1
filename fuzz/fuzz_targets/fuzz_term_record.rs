//! Fuzz term record decoding
//!
//! Feeds arbitrary bytes to the record reader. Malformed records must come
//! back as errors, never panics or oversized allocations.

#![no_main]

use hlmrf::term::ByteReader;
use hlmrf::{ObjectiveTerm, Potential, ReasonerTerm, RuleRegistry, Weight};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut rules = RuleRegistry::new();
    let _ = rules.register("soft", Weight::Finite(1.0), Potential::Hinge);
    let _ = rules.register("hard", Weight::Hard, Potential::Linear);

    let mut reader = ByteReader::new(data);
    while let Ok(term) = ObjectiveTerm::decode(&mut reader, &rules) {
        assert!(term.size() <= hlmrf::term::MAX_TERM_SIZE);
        if reader.is_empty() {
            break;
        }
    }
});
