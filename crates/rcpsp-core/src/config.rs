//! Scheduling configuration: algorithm selection, sort-strategy parameters, and the
//! rollout/CP-SAT sub-configs. All types are plain serde-derived data; loading them
//! from a file or environment is a collaborator's concern, not the core's.

use serde::{Deserialize, Serialize};

/// Which scheduling algorithm to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmType {
    #[default]
    ParallelSgs,
    BoundedRollout,
    CpSat,
}

/// Which pre-processing pass to run before the algorithm.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreProcessorType {
    /// Backward-pass for SGS/rollout, none for CP-SAT (which propagates internally).
    #[default]
    Auto,
    BackwardPass,
    None,
}

/// How a parsed timeframe constrains a task's `start_after`/`end_before`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeframeConstraintMode {
    #[default]
    Both,
    Start,
    End,
    None,
}

/// Eligible-task sort strategy (§4.E).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortStrategy {
    PriorityFirst,
    CrFirst,
    #[default]
    Weighted,
    Atc,
}

/// Bounded-rollout gating thresholds (§4.F).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    pub priority_threshold: i32,
    pub min_priority_gap: i32,
    pub cr_relaxed_threshold: f64,
    pub min_cr_urgency_gap: f64,
    pub max_horizon_days: Option<i64>,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            priority_threshold: 70,
            min_priority_gap: 20,
            cr_relaxed_threshold: 5.0,
            min_cr_urgency_gap: 3.0,
            max_horizon_days: Some(30),
        }
    }
}

/// CP-SAT objective weights and solver parameters (§4.G).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpSatConfig {
    pub time_limit_seconds: Option<f64>,
    pub tardiness_weight: f64,
    pub priority_weight: f64,
    pub earliness_weight: f64,
    pub random_seed: u64,
    pub num_workers: Option<u32>,
    pub use_greedy_hints: bool,
    pub warn_on_incomplete_hints: bool,
    pub log_solver_progress: bool,
    /// Window (in days) around the greedy-hinted start used to narrow a task's start
    /// domain for the pumpkin-solver warm start (§4.G supplement). `None` uses the
    /// task's own slack.
    pub hint_window_days: Option<i64>,
}

impl Default for CpSatConfig {
    fn default() -> Self {
        Self {
            time_limit_seconds: Some(30.0),
            tardiness_weight: 100.0,
            priority_weight: 1.0,
            earliness_weight: 0.0,
            random_seed: 42,
            num_workers: None,
            use_greedy_hints: true,
            warn_on_incomplete_hints: true,
            log_solver_progress: false,
            hint_window_days: None,
        }
    }
}

/// Top-level scheduling configuration consumed by [`crate`]'s algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub algorithm: AlgorithmType,
    pub preprocessor: PreProcessorType,
    pub strategy: SortStrategy,
    pub timeframe_constraint_mode: TimeframeConstraintMode,
    pub fiscal_year_start: u32,

    /// Weight applied to critical ratio in the `weighted` strategy's sort key.
    pub cr_weight: f64,
    /// Default priority for tasks that don't specify one.
    pub default_priority: i32,
    /// Multiplier applied to the maximum deadline-driven CR to derive the adaptive
    /// default CR for tasks without a deadline.
    pub default_cr_multiplier: f64,
    /// Floor for the adaptive default CR.
    pub default_cr_floor: f64,

    /// ATC urgency decay constant.
    pub atc_k: f64,
    /// Urgency multiplier applied to tasks without a deadline under the `atc` strategy.
    pub atc_default_urgency_multiplier: f64,
    /// Urgency floor applied under the `atc` strategy.
    pub atc_default_urgency_floor: f64,

    pub rollout: RolloutConfig,
    pub cpsat: CpSatConfig,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmType::default(),
            preprocessor: PreProcessorType::default(),
            strategy: SortStrategy::default(),
            timeframe_constraint_mode: TimeframeConstraintMode::default(),
            fiscal_year_start: 1,
            cr_weight: 10.0,
            default_priority: 50,
            default_cr_multiplier: 2.0,
            default_cr_floor: 10.0,
            atc_k: 2.0,
            atc_default_urgency_multiplier: 1.0,
            atc_default_urgency_floor: 0.3,
            rollout: RolloutConfig::default(),
            cpsat: CpSatConfig::default(),
        }
    }
}
