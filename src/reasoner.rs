//! Stochastic gradient descent over the terms of a term store
//!
//! Each pass visits every term once and moves that term's unobserved variables
//! a step against its subgradient, clamping to [0, 1]. Terms are updated one at
//! a time (the "stochastic" part), so the objective cannot be measured on the
//! live values mid-pass. Instead, from the second pass on, the objective and
//! the full gradient are accumulated against a snapshot of the values as they
//! stood after the previous pass.
//!
//! The run ends by the first of:
//! - the iteration budget `floor(max_iterations * budget)` being exceeded
//! - the gradient p-norm falling within `first_order_threshold` of zero
//! - the per-term objective changing by at most `tolerance`
//!
//! `run_full_iterations` disables the last two, and while the mean movement of
//! a pass is above `movement_threshold` they are skipped as well.
//!
//! The values that end up in the variable store are those with the lowest
//! objective seen, not necessarily those of the last pass.
//!
//! Hard (infinite weight) terms take no gradient steps. They are held out of
//! the pass and enforced after it by projecting their variables back onto the
//! constraint, so every end-of-pass snapshot has them applied.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SgdConfig;
use crate::error::{ReasonerError, ReasonerResult};
use crate::id::VarIndex;
use crate::store::{Sweep, TermStore};
use crate::term::{ObjectiveTerm, ReasonerTerm};
use crate::variables::VariableStore;

pub use crate::config::{GradientExtension, LearningSchedule};

/// Added to adaptive denominators.
const EPSILON: f32 = 1e-8;

/// Distance from a bound at which a variable counts as sitting on it.
const BOUND_EPSILON: f32 = 1e-6;

/// Potential above which a hard term counts as violated.
const HARD_VIOLATION_TOLERANCE: f32 = 1e-4;

// ============================================================================
// NORMS AND SNAPSHOTS
// ============================================================================

/// The p-norm of `values`.
///
/// `p = inf` is the max-norm and `p = 0` counts the nonzero entries.
pub fn gradient_p_norm(values: &[f32], p: f32) -> f32 {
    if p.is_infinite() {
        values.iter().fold(0.0f32, |max, v| max.max(v.abs()))
    } else if p == 0.0 {
        values.iter().filter(|v| **v != 0.0).count() as f32
    } else {
        let sum: f64 = values.iter().map(|v| (v.abs() as f64).powf(p as f64)).sum();
        sum.powf(1.0 / p as f64) as f32
    }
}

/// The lowest-objective variable values seen so far.
#[derive(Clone, Debug, PartialEq)]
pub struct BestSnapshot {
    objective: f64,
    iteration: usize,
    values: Vec<f32>,
}

impl BestSnapshot {
    /// A snapshot of `values` with no objective yet (+inf).
    pub fn new(values: &[f32]) -> Self {
        Self {
            objective: f64::INFINITY,
            iteration: 0,
            values: values.to_vec(),
        }
    }

    /// Take `values` if `objective` is strictly lower than the current best.
    /// Returns whether the snapshot was replaced.
    pub fn offer(&mut self, objective: f64, iteration: usize, values: &[f32]) -> bool {
        if objective < self.objective {
            self.objective = objective;
            self.iteration = iteration;
            self.values.clear();
            self.values.extend_from_slice(values);
            true
        } else {
            false
        }
    }

    pub fn objective(&self) -> f64 {
        self.objective
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

/// Summary of one `optimize` run.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizationReport {
    /// Objective of the values left in the variable store
    pub objective: f64,
    /// Passes over the terms
    pub iterations: usize,
    /// Pass after which the kept values were reached
    pub lowest_iteration: usize,
    pub term_count: usize,
    /// Total absolute movement committed by the final `sync()`
    pub change: f64,
    pub elapsed: Duration,
}

impl OptimizationReport {
    pub fn normalized_objective(&self) -> f64 {
        normalize(self.objective, self.term_count)
    }
}

fn normalize(objective: f64, term_count: usize) -> f64 {
    if term_count == 0 {
        objective
    } else {
        objective / term_count as f64
    }
}

// ============================================================================
// ADAPTIVE STEPS
// ============================================================================

/// Per-variable accumulators of the gradient extension.
///
/// Only unobserved variables have accumulators; `slots` maps a variable index
/// to its accumulator slot.
struct StepState {
    extension: GradientExtension,
    beta1: f32,
    beta2: f32,
    slots: Vec<u32>,
    squares: Vec<f32>,
    mean: Vec<f32>,
    variance: Vec<f32>,
}

impl StepState {
    fn new(config: &SgdConfig, variables: &VariableStore) -> Self {
        let mut state = Self {
            extension: config.extension,
            beta1: config.adam_beta1,
            beta2: config.adam_beta2,
            slots: Vec::new(),
            squares: Vec::new(),
            mean: Vec::new(),
            variance: Vec::new(),
        };
        if state.extension == GradientExtension::None {
            return state;
        }

        let mut next = 0u32;
        state.slots = variables
            .atoms()
            .iter()
            .map(|kind| {
                if kind.is_observed() {
                    u32::MAX
                } else {
                    next += 1;
                    next - 1
                }
            })
            .collect();

        let unobserved = next as usize;
        match state.extension {
            GradientExtension::None => {}
            GradientExtension::AdaGrad => state.squares = vec![0.0; unobserved],
            GradientExtension::Adam => {
                state.mean = vec![0.0; unobserved];
                state.variance = vec![0.0; unobserved];
            }
        }
        state
    }

    /// Step for one unobserved variable.
    fn compute_variable_step(&mut self, variable: VarIndex, iteration: usize, learning_rate: f32, partial: f32) -> f32 {
        match self.extension {
            GradientExtension::None => partial * learning_rate,
            GradientExtension::AdaGrad => {
                let slot = self.slots[variable.index()] as usize;
                self.squares[slot] += partial * partial;
                partial * learning_rate / (self.squares[slot] + EPSILON).sqrt()
            }
            GradientExtension::Adam => {
                let slot = self.slots[variable.index()] as usize;
                let (beta1, beta2) = (self.beta1, self.beta2);
                self.mean[slot] = beta1 * self.mean[slot] + (1.0 - beta1) * partial;
                self.variance[slot] = beta2 * self.variance[slot] + (1.0 - beta2) * partial * partial;

                let t = iteration.min(i32::MAX as usize) as i32;
                let mean = self.mean[slot] / (1.0 - beta1.powi(t));
                let variance = self.variance[slot] / (1.0 - beta2.powi(t));
                mean * learning_rate / (variance.sqrt() + EPSILON)
            }
        }
    }
}

// ============================================================================
// REASONER
// ============================================================================

pub struct SgdReasoner {
    config: SgdConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl SgdReasoner {
    pub fn new(config: SgdConfig) -> ReasonerResult<Self> {
        config.validate()?;
        Ok(Self { config, cancel: None })
    }

    /// Stop at the next iteration boundary once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &SgdConfig {
        &self.config
    }

    fn learning_rate(&self, iteration: usize) -> f32 {
        match self.config.learning_schedule {
            LearningSchedule::Constant => self.config.learning_rate,
            LearningSchedule::StepDecay => {
                self.config.learning_rate / (iteration as f32).powf(self.config.inverse_time_exp)
            }
        }
    }

    fn check_cancelled(&self, iteration: usize) -> ReasonerResult<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(ReasonerError::Cancelled { iteration }),
            _ => Ok(()),
        }
    }

    /// Minimize the objective of `store`'s terms over its unobserved variables.
    ///
    /// `observer` is called after every pass with the store and the 1-based
    /// iteration number. On success the variable store holds the best values
    /// found and has been synced. On error (including cancellation) it holds
    /// whatever the interrupted pass left, and nothing is synced.
    pub fn optimize<S>(
        &mut self,
        store: &mut S,
        mut observer: Option<&mut dyn FnMut(&mut S, usize)>,
    ) -> ReasonerResult<OptimizationReport>
    where
        S: TermStore<Term = ObjectiveTerm>,
    {
        store.init_for_optimization()?;

        let mut steps = StepState::new(&self.config, store.variables());
        let unobserved = store.variable_counts().unobserved;
        let period = self.config.nonconvex_period;
        let rounds = self.config.nonconvex_rounds;

        let mut term_count = 0usize;
        let mut old_objective = f64::INFINITY;
        let mut gradient: Vec<f32> = Vec::new();
        let mut prev_values: Vec<f32> = Vec::new();
        let mut best = BestSnapshot::new(&[]);
        let mut hard_terms: Vec<ObjectiveTerm> = Vec::new();

        let mut total_time = Duration::ZERO;
        let mut iteration = 1usize;
        let mut done = false;

        while !done {
            self.check_cancelled(iteration)?;
            let start = Instant::now();

            let learning_rate = self.learning_rate(iteration);
            let nonconvex = iteration >= period && iteration % period < rounds;
            let measuring = iteration > 1;
            if measuring {
                gradient.fill(0.0);
            }

            term_count = 0;
            let mut objective = 0.0f64;
            let mut movement = 0.0f32;

            hard_terms.clear();
            let Sweep { terms, variables } = store.sweep()?;
            for term in terms {
                let term = term?;
                term_count += 1;

                if term.is_hard() {
                    hard_terms.push(term.into_owned());
                    continue;
                }

                if measuring {
                    objective += term.evaluate(&prev_values) as f64;
                    add_term_gradient(&term, &mut gradient, &prev_values, variables);
                }
                movement += self.variable_update(&term, variables, &mut steps, iteration, learning_rate);
            }
            for term in &hard_terms {
                movement += project_hard_term(term, variables);
            }

            if let Some(observer) = observer.as_deref_mut() {
                observer(store, iteration);
            }
            store.iteration_complete()?;

            let mean_movement = if unobserved > 0 {
                movement / unobserved as f32
            } else {
                0.0
            };

            if iteration == 1 {
                let values = store.variables().values();
                gradient = vec![0.0; values.len()];
                prev_values = values.to_vec();
                best = BestSnapshot::new(values);
            } else {
                clip_gradient(&mut gradient, &prev_values);
                done = self.should_stop(iteration, objective, old_objective, &gradient, mean_movement, term_count);

                best.offer(objective, iteration - 1, &prev_values);

                prev_values.copy_from_slice(store.variables().values());
                old_objective = objective;
            }

            let pass_time = start.elapsed();
            total_time += pass_time;

            if measuring {
                log::trace!(
                    "Iteration {} -- Objective: {}, Normalized Objective: {}, Gradient Norm: {}, Non-convex: {}, Iteration Time: {}ms, Total Optimization Time: {}ms",
                    iteration - 1,
                    objective,
                    normalize(objective, term_count),
                    gradient_p_norm(&gradient, self.config.first_order_norm),
                    nonconvex,
                    pass_time.as_millis(),
                    total_time.as_millis()
                );
            }

            iteration += 1;
        }

        let iterations = iteration - 1;
        let (final_objective, violated) = evaluate_store(store)?;
        best.offer(final_objective, iterations, store.variables().values());

        store.variables_mut().values_mut().copy_from_slice(best.values());
        let change = store.sync()?;

        if violated > 0 {
            log::warn!("{} hard constraints are still violated after optimization", violated);
        }
        log::info!(
            "Final Objective: {}, Final Normalized Objective: {}, Total Optimization Time: {}ms, Total Number of Iterations: {}",
            best.objective(),
            normalize(best.objective(), term_count),
            total_time.as_millis(),
            iterations
        );
        log::debug!("Movement of variables from initial state: {}", change);
        log::debug!(
            "Optimized with {} variables and {} terms.",
            store.variable_counts(),
            term_count
        );
        log::debug!("Lowest objective reached at iteration: {}", best.iteration());

        Ok(OptimizationReport {
            objective: best.objective(),
            iterations,
            lowest_iteration: best.iteration(),
            term_count,
            change,
            elapsed: total_time,
        })
    }

    fn should_stop(
        &self,
        iteration: usize,
        objective: f64,
        old_objective: f64,
        gradient: &[f32],
        movement: f32,
        term_count: usize,
    ) -> bool {
        let config = &self.config;

        if iteration > config.iteration_limit() {
            return true;
        }

        if config.run_full_iterations {
            return false;
        }

        if config.watch_movement && movement > config.movement_threshold {
            return false;
        }

        if gradient_p_norm(gradient, config.first_order_norm).abs() <= config.first_order_threshold {
            return true;
        }

        config.objective_break
            && (normalize(objective, term_count) - normalize(old_objective, term_count)).abs()
                <= config.tolerance as f64
    }

    /// Move the unobserved variables of one soft term. Returns the total
    /// absolute movement.
    fn variable_update(
        &self,
        term: &ObjectiveTerm,
        variables: &mut VariableStore,
        steps: &mut StepState,
        iteration: usize,
        learning_rate: f32,
    ) -> f32 {
        let weight = term.weight();
        let mut dot = term.dot(variables.values());
        let mut movement = 0.0f32;

        for i in 0..term.size() {
            let variable = term.variable_index(i);
            if variables.is_observed(variable) {
                continue;
            }

            let partial = term.partial(i, dot, weight);
            let step = steps.compute_variable_step(variable, iteration, learning_rate, partial);

            let values = variables.values_mut();
            let old = values[variable.index()];
            let new = (old - step).max(0.0).min(1.0);
            movement += (new - old).abs();
            values[variable.index()] = new;

            if self.config.coordinate_step {
                dot = term.dot(variables.values());
            }
        }

        movement
    }
}

/// Accumulate a soft term's subgradient at `values` into `gradient`.
fn add_term_gradient(term: &ObjectiveTerm, gradient: &mut [f32], values: &[f32], variables: &VariableStore) {
    let weight = term.weight();
    let dot = term.dot(values);
    for i in 0..term.size() {
        let variable = term.variable_index(i);
        if variables.is_observed(variable) {
            continue;
        }
        gradient[variable.index()] += term.partial(i, dot, weight);
    }
}

/// Zero gradient entries that point out of [0, 1] at a bound.
fn clip_gradient(gradient: &mut [f32], values: &[f32]) {
    for (g, &v) in gradient.iter_mut().zip(values) {
        if v.abs() <= BOUND_EPSILON && *g > 0.0 {
            *g = 0.0;
        } else if (v - 1.0).abs() <= BOUND_EPSILON && *g < 0.0 {
            *g = 0.0;
        }
    }
}

/// Project the unobserved variables of a hard term onto `dot = 0`.
///
/// Hinged terms are only projected while violated. Returns the total absolute
/// movement.
fn project_hard_term(term: &ObjectiveTerm, variables: &mut VariableStore) -> f32 {
    let dot = term.dot(variables.values());
    if dot == 0.0 || (term.potential().is_hinge() && dot < 0.0) {
        return 0.0;
    }

    let mut norm = 0.0f32;
    for i in 0..term.size() {
        if !variables.is_observed(term.variable_index(i)) {
            norm += term.coefficients()[i] * term.coefficients()[i];
        }
    }
    if norm == 0.0 {
        return 0.0;
    }

    let mut movement = 0.0f32;
    for i in 0..term.size() {
        let variable = term.variable_index(i);
        if variables.is_observed(variable) {
            continue;
        }
        let values = variables.values_mut();
        let old = values[variable.index()];
        let new = (old - dot * term.coefficients()[i] / norm).max(0.0).min(1.0);
        movement += (new - old).abs();
        values[variable.index()] = new;
    }
    movement
}

/// Objective of the live values over the soft terms, plus the number of
/// violated hard terms.
fn evaluate_store<S>(store: &mut S) -> ReasonerResult<(f64, usize)>
where
    S: TermStore<Term = ObjectiveTerm>,
{
    let Sweep { terms, variables } = store.sweep()?;
    let values = variables.values();

    let mut objective = 0.0f64;
    let mut violated = 0usize;
    for term in terms {
        let term = term?;
        if term.is_hard() {
            if term.unweighted(values) > HARD_VIOLATION_TOLERANCE {
                violated += 1;
            }
        } else {
            objective += term.evaluate(values) as f64;
        }
    }
    Ok((objective, violated))
}

/// Objective of the store's soft terms at the current variable values.
pub fn compute_objective<S>(store: &mut S) -> ReasonerResult<f64>
where
    S: TermStore<Term = ObjectiveTerm>,
{
    evaluate_store(store).map(|(objective, _)| objective)
}
