//! hlmrf: MAP inference for hinge-loss Markov random fields by SGD
//!
//! Ground rules are turned into objective terms (a weighted linear, hinge or
//! squared potential over a handful of [0, 1] variables), collected in a term
//! store, and minimized by stochastic gradient descent with optional AdaGrad
//! or Adam step scaling.

pub mod config;
pub mod error;
pub mod id;
pub mod reasoner;
pub mod rule;
pub mod store;
pub mod term;
pub mod variables;

pub use config::{GradientExtension, LearningSchedule, SgdConfig, StreamingConfig};
pub use error::{ReasonerError, ReasonerResult};
pub use id::{RuleId, VarIndex};
pub use reasoner::{compute_objective, gradient_p_norm, BestSnapshot, OptimizationReport, SgdReasoner};
pub use rule::{Comparator, GroundBody, GroundRule, Potential, RuleRegistry, Weight, WeightedRule};
pub use store::{MemoryTermStore, StreamingTermStore, Sweep, TermScratch, TermStore};
pub use term::{Hyperplane, ObjectiveTerm, ObjectiveTermGenerator, ReasonerTerm, StreamingTerm, TermGenerator};
pub use variables::{AtomKind, VariableCounts, VariableStore};
