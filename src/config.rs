//! Reasoner and term store configuration
//!
//! Both configs are plain structs with the reference defaults. They can also be
//! built from string key/value pairs (`sgd.learningrate = 0.5`, ...), which is
//! how a surrounding application hands over its option table. Keys this crate
//! does not know are ignored; known keys with bad values are configuration
//! errors, never silently defaulted.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{ReasonerError, ReasonerResult};

// ============================================================================
// ENUM OPTIONS
// ============================================================================

/// Per-variable adaptive scaling of the raw subgradient step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum GradientExtension {
    /// Plain SGD: `step = partial * rate`
    #[default]
    None,
    /// Adaptive Gradient (Duchi et al. 2011)
    AdaGrad,
    /// Adaptive Moment Estimation (Kingma & Ba 2014)
    Adam,
}

impl FromStr for GradientExtension {
    type Err = ReasonerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(GradientExtension::None),
            "ADAGRAD" => Ok(GradientExtension::AdaGrad),
            "ADAM" => Ok(GradientExtension::Adam),
            _ => Err(ReasonerError::config(
                keys::EXTENSION,
                format!("unsupported SGD extension '{}'", s),
            )),
        }
    }
}

impl fmt::Display for GradientExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GradientExtension::None => write!(f, "NONE"),
            GradientExtension::AdaGrad => write!(f, "ADAGRAD"),
            GradientExtension::Adam => write!(f, "ADAM"),
        }
    }
}

/// How the learning rate changes over iterations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum LearningSchedule {
    Constant,
    /// `rate / iteration^p`
    #[default]
    StepDecay,
}

impl FromStr for LearningSchedule {
    type Err = ReasonerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CONSTANT" => Ok(LearningSchedule::Constant),
            "STEPDECAY" => Ok(LearningSchedule::StepDecay),
            _ => Err(ReasonerError::config(
                keys::LEARNING_SCHEDULE,
                format!("illegal learning schedule '{}'", s),
            )),
        }
    }
}

impl fmt::Display for LearningSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LearningSchedule::Constant => write!(f, "CONSTANT"),
            LearningSchedule::StepDecay => write!(f, "STEPDECAY"),
        }
    }
}

// ============================================================================
// OPTION KEYS
// ============================================================================

pub mod keys {
    pub const LEARNING_RATE: &str = "sgd.learningrate";
    pub const LEARNING_SCHEDULE: &str = "sgd.learningschedule";
    pub const INVERSE_TIME_EXP: &str = "sgd.inversescaleexp";
    pub const EXTENSION: &str = "sgd.extension";
    pub const ADAM_BETA_1: &str = "sgd.adambeta1";
    pub const ADAM_BETA_2: &str = "sgd.adambeta2";
    pub const MAX_ITERATIONS: &str = "sgd.maxiterations";
    pub const BUDGET: &str = "reasoner.budget";
    pub const MOVEMENT: &str = "sgd.movement";
    pub const MOVEMENT_THRESHOLD: &str = "sgd.movement.threshold";
    pub const OBJECTIVE_BREAK: &str = "reasoner.objectivebreak";
    pub const TOLERANCE: &str = "reasoner.tolerance";
    pub const RUN_FULL_ITERATIONS: &str = "reasoner.runfulliterations";
    pub const FIRST_ORDER_NORM: &str = "sgd.firstordernorm";
    pub const FIRST_ORDER_THRESHOLD: &str = "sgd.firstorderthreshold";
    pub const COORDINATE_STEP: &str = "sgd.coordinatestep";
    pub const NONCONVEX_PERIOD: &str = "reasoner.nonconvex.period";
    pub const NONCONVEX_ROUNDS: &str = "reasoner.nonconvex.rounds";

    pub const PAGE_LOCATION: &str = "streamingtermstore.pagelocation";
    pub const PAGE_SIZE: &str = "streamingtermstore.pagesize";
    pub const RANDOMIZE_PAGE_ACCESS: &str = "streamingtermstore.randomizepageaccess";
    pub const SHUFFLE_PAGE: &str = "streamingtermstore.shufflepage";
    pub const RANDOM_SEED: &str = "random.seed";
}

fn parse_f32(key: &str, value: &str) -> ReasonerResult<f32> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("infinity") || value.eq_ignore_ascii_case("inf") {
        return Ok(f32::INFINITY);
    }
    value
        .parse::<f32>()
        .map_err(|e| ReasonerError::config(key, format!("'{}' is not a number: {}", value, e)))
}

fn parse_usize(key: &str, value: &str) -> ReasonerResult<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|e| ReasonerError::config(key, format!("'{}' is not a count: {}", value, e)))
}

fn parse_u64(key: &str, value: &str) -> ReasonerResult<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| ReasonerError::config(key, format!("'{}' is not an integer: {}", value, e)))
}

fn parse_bool(key: &str, value: &str) -> ReasonerResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ReasonerError::config(key, format!("'{}' is not a boolean", other))),
    }
}

fn require(key: &str, ok: bool, message: impl FnOnce() -> String) -> ReasonerResult<()> {
    if ok {
        Ok(())
    } else {
        Err(ReasonerError::config(key, message()))
    }
}

// ============================================================================
// SGD CONFIG
// ============================================================================

/// Options consumed by [`SgdReasoner`](crate::reasoner::SgdReasoner).
#[derive(Clone, Debug, PartialEq)]
pub struct SgdConfig {
    pub learning_rate: f32,
    pub learning_schedule: LearningSchedule,
    /// Exponent `p` of the step decay schedule
    pub inverse_time_exp: f32,
    pub extension: GradientExtension,
    pub adam_beta1: f32,
    pub adam_beta2: f32,
    pub max_iterations: usize,
    /// Fraction of `max_iterations` this run may use
    pub budget: f32,
    pub watch_movement: bool,
    pub movement_threshold: f32,
    pub objective_break: bool,
    pub tolerance: f32,
    pub run_full_iterations: bool,
    /// p of the gradient p-norm; +inf is the max-norm
    pub first_order_norm: f32,
    pub first_order_threshold: f32,
    pub coordinate_step: bool,
    pub nonconvex_period: usize,
    pub nonconvex_rounds: usize,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1.0,
            learning_schedule: LearningSchedule::StepDecay,
            inverse_time_exp: 1.0,
            extension: GradientExtension::None,
            adam_beta1: 0.9,
            adam_beta2: 0.999,
            max_iterations: 200,
            budget: 1.0,
            watch_movement: true,
            movement_threshold: 0.05,
            objective_break: true,
            tolerance: 1e-5,
            run_full_iterations: false,
            first_order_norm: f32::INFINITY,
            first_order_threshold: 0.01,
            coordinate_step: false,
            nonconvex_period: 10,
            nonconvex_rounds: 1,
        }
    }
}

impl SgdConfig {
    /// Build from option pairs on top of the defaults, then validate.
    pub fn from_options<I, K, V>(options: I) -> ReasonerResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in options {
            config.set(key.as_ref(), value.as_ref())?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply a single option. Returns whether the key was recognized.
    pub fn set(&mut self, key: &str, value: &str) -> ReasonerResult<bool> {
        match key {
            keys::LEARNING_RATE => self.learning_rate = parse_f32(key, value)?,
            keys::LEARNING_SCHEDULE => self.learning_schedule = value.parse()?,
            keys::INVERSE_TIME_EXP => self.inverse_time_exp = parse_f32(key, value)?,
            keys::EXTENSION => self.extension = value.parse()?,
            keys::ADAM_BETA_1 => self.adam_beta1 = parse_f32(key, value)?,
            keys::ADAM_BETA_2 => self.adam_beta2 = parse_f32(key, value)?,
            keys::MAX_ITERATIONS => self.max_iterations = parse_usize(key, value)?,
            keys::BUDGET => self.budget = parse_f32(key, value)?,
            keys::MOVEMENT => self.watch_movement = parse_bool(key, value)?,
            keys::MOVEMENT_THRESHOLD => self.movement_threshold = parse_f32(key, value)?,
            keys::OBJECTIVE_BREAK => self.objective_break = parse_bool(key, value)?,
            keys::TOLERANCE => self.tolerance = parse_f32(key, value)?,
            keys::RUN_FULL_ITERATIONS => self.run_full_iterations = parse_bool(key, value)?,
            keys::FIRST_ORDER_NORM => self.first_order_norm = parse_f32(key, value)?,
            keys::FIRST_ORDER_THRESHOLD => self.first_order_threshold = parse_f32(key, value)?,
            keys::COORDINATE_STEP => self.coordinate_step = parse_bool(key, value)?,
            keys::NONCONVEX_PERIOD => self.nonconvex_period = parse_usize(key, value)?,
            keys::NONCONVEX_ROUNDS => self.nonconvex_rounds = parse_usize(key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    pub fn validate(&self) -> ReasonerResult<()> {
        require(keys::LEARNING_RATE, self.learning_rate > 0.0 && self.learning_rate.is_finite(), || {
            format!("must be positive, got {}", self.learning_rate)
        })?;
        require(keys::INVERSE_TIME_EXP, self.inverse_time_exp > 0.0, || {
            format!("must be positive, got {}", self.inverse_time_exp)
        })?;
        require(keys::ADAM_BETA_1, self.adam_beta1 > 0.0 && self.adam_beta1 < 1.0, || {
            format!("must be in (0, 1), got {}", self.adam_beta1)
        })?;
        require(keys::ADAM_BETA_2, self.adam_beta2 > 0.0 && self.adam_beta2 < 1.0, || {
            format!("must be in (0, 1), got {}", self.adam_beta2)
        })?;
        require(keys::MAX_ITERATIONS, self.max_iterations > 0, || "must be positive".to_string())?;
        require(keys::BUDGET, self.budget > 0.0 && self.budget <= 1.0, || {
            format!("must be in (0, 1], got {}", self.budget)
        })?;
        require(keys::MOVEMENT_THRESHOLD, self.movement_threshold >= 0.0, || {
            format!("must be non-negative, got {}", self.movement_threshold)
        })?;
        require(keys::TOLERANCE, self.tolerance >= 0.0, || {
            format!("must be non-negative, got {}", self.tolerance)
        })?;
        require(keys::FIRST_ORDER_NORM, self.first_order_norm >= 0.0, || {
            format!("must be non-negative, got {}", self.first_order_norm)
        })?;
        require(keys::FIRST_ORDER_THRESHOLD, self.first_order_threshold >= 0.0, || {
            format!("must be non-negative, got {}", self.first_order_threshold)
        })?;
        require(keys::NONCONVEX_PERIOD, self.nonconvex_period > 0, || "must be positive".to_string())?;
        require(keys::NONCONVEX_ROUNDS, self.nonconvex_rounds > 0, || "must be positive".to_string())?;
        Ok(())
    }

    /// Last iteration allowed by `max_iterations * budget`.
    pub fn iteration_limit(&self) -> usize {
        (self.max_iterations as f64 * self.budget as f64) as usize
    }
}

// ============================================================================
// STREAMING STORE CONFIG
// ============================================================================

/// Options for [`StreamingTermStore`](crate::store::StreamingTermStore).
#[derive(Clone, Debug, PartialEq)]
pub struct StreamingConfig {
    /// Directory page files are written to
    pub page_dir: PathBuf,
    /// Number of terms per page
    pub page_size: usize,
    /// Visit pages in a random order each pass
    pub randomize_page_access: bool,
    /// Shuffle terms within a page when it is loaded
    pub shuffle_page: bool,
    pub seed: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            page_dir: std::env::temp_dir().join("hlmrf_term_pages"),
            page_size: 10_000,
            randomize_page_access: true,
            shuffle_page: true,
            seed: 4,
        }
    }
}

impl StreamingConfig {
    pub fn with_page_dir(page_dir: impl Into<PathBuf>) -> Self {
        Self {
            page_dir: page_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_options<I, K, V>(options: I) -> ReasonerResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in options {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                keys::PAGE_LOCATION => config.page_dir = PathBuf::from(value),
                keys::PAGE_SIZE => config.page_size = parse_usize(key, value)?,
                keys::RANDOMIZE_PAGE_ACCESS => config.randomize_page_access = parse_bool(key, value)?,
                keys::SHUFFLE_PAGE => config.shuffle_page = parse_bool(key, value)?,
                keys::RANDOM_SEED => config.seed = parse_u64(key, value)?,
                _ => {}
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ReasonerResult<()> {
        require(keys::PAGE_SIZE, self.page_size > 0, || "must be positive".to_string())
    }
}
