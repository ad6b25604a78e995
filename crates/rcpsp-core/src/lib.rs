//! # rcpsp-core
//!
//! Data model, calendar utilities, resource schedule, input validator, scheduling
//! configuration, and lock-file format for the resource-constrained project
//! scheduling (RCPSP) engine. The scheduling algorithms themselves live in
//! `rcpsp-solver`; this crate is their shared vocabulary.
//!
//! ## Example
//!
//! ```rust
//! use chrono::NaiveDate;
//! use rcpsp_core::{Dependency, Task};
//!
//! let a = Task::new("design").duration(5.0).resource("dev");
//! let b = Task::new("implement")
//!     .duration(10.0)
//!     .resource("dev")
//!     .depends_on(Dependency::new("design"));
//! assert_eq!(a.id, "design");
//! assert!(!a.is_milestone());
//! assert_eq!(b.dependencies.len(), 1);
//! ```

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

pub mod calendar;
pub mod config;
pub mod error;
pub mod lock;
pub mod resources;
pub mod validator;

pub use error::ScheduleError;

/// A dependency edge: this task cannot start until `predecessor_id` has finished,
/// plus `lag_days` of additional gap.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub predecessor_id: String,
    pub lag_days: f64,
}

impl Dependency {
    pub fn new(predecessor_id: impl Into<String>) -> Self {
        Self {
            predecessor_id: predecessor_id.into(),
            lag_days: 0.0,
        }
    }

    pub fn with_lag(predecessor_id: impl Into<String>, lag_days: f64) -> Self {
        Self {
            predecessor_id: predecessor_id.into(),
            lag_days,
        }
    }
}

/// An immutable task to be scheduled (§3.1).
///
/// `Task` is never mutated by the scheduling algorithms; the resource an
/// auto-assigning task ends up on is carried only in its [`ScheduledTask`] output
/// (see `DESIGN.md` for the rationale).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub duration_days: f64,
    pub resources: Vec<(String, f64)>,
    pub resource_spec: Option<String>,
    pub dependencies: Vec<Dependency>,
    pub start_after: Option<NaiveDate>,
    pub end_before: Option<NaiveDate>,
    pub start_on: Option<NaiveDate>,
    pub end_on: Option<NaiveDate>,
    pub priority: Option<i32>,
}

impl Task {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            duration_days: 0.0,
            resources: Vec::new(),
            resource_spec: None,
            dependencies: Vec::new(),
            start_after: None,
            end_before: None,
            start_on: None,
            end_on: None,
            priority: None,
        }
    }

    pub fn duration(mut self, duration_days: f64) -> Self {
        self.duration_days = duration_days;
        self
    }

    pub fn resource(mut self, name: impl Into<String>) -> Self {
        self.resources.push((name.into(), 1.0));
        self
    }

    pub fn resource_with_allocation(mut self, name: impl Into<String>, allocation: f64) -> Self {
        self.resources.push((name.into(), allocation));
        self
    }

    pub fn auto_assign(mut self, spec: impl Into<String>) -> Self {
        self.resource_spec = Some(spec.into());
        self
    }

    pub fn depends_on(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn start_after(mut self, date: NaiveDate) -> Self {
        self.start_after = Some(date);
        self
    }

    pub fn end_before(mut self, date: NaiveDate) -> Self {
        self.end_before = Some(date);
        self
    }

    pub fn start_on(mut self, date: NaiveDate) -> Self {
        self.start_on = Some(date);
        self
    }

    pub fn end_on(mut self, date: NaiveDate) -> Self {
        self.end_on = Some(date);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Zero-duration tasks are milestones: scheduled instantly, no resource consumed.
    pub fn is_milestone(&self) -> bool {
        self.duration_days <= 0.0
    }

    /// A task pinned to a fixed start and/or end date; excluded from the solve set.
    pub fn is_fixed(&self) -> bool {
        self.start_on.is_some() || self.end_on.is_some()
    }

    pub fn effective_priority(&self, default_priority: i32) -> i32 {
        self.priority.unwrap_or(default_priority)
    }
}

/// A task that has been placed on the calendar (§3.4). `end_date` is inclusive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub duration_days: f64,
    pub resources: Vec<String>,
}

/// Per-entity decorations for downstream consumers (§3.6).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleAnnotations {
    pub estimated_start: Option<NaiveDate>,
    pub estimated_end: Option<NaiveDate>,
    pub computed_deadline: Option<NaiveDate>,
    pub computed_priority: Option<i32>,
    pub deadline_violated: bool,
    pub resource_assignments: Vec<(String, f64)>,
    pub resources_were_computed: bool,
    pub was_fixed: bool,
}

/// Complete result of a scheduling run (§3.4, §6.2).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulingResult {
    pub scheduled_tasks: Vec<ScheduledTask>,
    pub annotations: HashMap<String, ScheduleAnnotations>,
    pub warnings: Vec<String>,
}

/// Output of the backward-pass preprocessor (§3.5).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PreProcessResult {
    pub computed_deadlines: HashMap<String, NaiveDate>,
    pub computed_priorities: HashMap<String, i32>,
}

/// Raw output of a scheduling algorithm, before annotation assembly.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmResult {
    pub scheduled_tasks: Vec<ScheduledTask>,
}

/// Compute the latest date a dependency must finish so that a dependent task with
/// `dependent_deadline` and `dependent_duration_days` (separated by `lag_days`) can
/// still meet its own deadline.
///
/// `P inherits D_T − T.duration − T.lag` (§4.D).
pub fn compute_dependency_deadline(
    dependent_deadline: NaiveDate,
    dependent_duration_days: f64,
    lag_days: f64,
) -> NaiveDate {
    let total_seconds = ((dependent_duration_days + lag_days) * 86_400.0).round() as i64;
    dependent_deadline - Duration::seconds(total_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn task_builder() {
        let task = Task::new("impl")
            .duration(10.0)
            .resource("dev")
            .depends_on(Dependency::new("design"))
            .priority(70);

        assert_eq!(task.id, "impl");
        assert_eq!(task.duration_days, 10.0);
        assert_eq!(task.resources, vec![("dev".to_string(), 1.0)]);
        assert_eq!(task.dependencies.len(), 1);
        assert_eq!(task.priority, Some(70));
        assert!(!task.is_milestone());
        assert!(!task.is_fixed());
    }

    #[test]
    fn milestone_task() {
        let task = Task::new("kickoff");
        assert!(task.is_milestone());
    }

    #[test]
    fn fixed_task_detection() {
        let task = Task::new("pinned").start_on(d(2025, 2, 1));
        assert!(task.is_fixed());
    }

    #[test]
    fn effective_priority_falls_back_to_default() {
        let task = Task::new("t");
        assert_eq!(task.effective_priority(50), 50);
        let task = task.priority(90);
        assert_eq!(task.effective_priority(50), 90);
    }

    #[test]
    fn dependency_deadline_includes_lag() {
        // S7: B depends on A with 7 days lag, A is 5 days; if B's deadline is fixed,
        // A must finish duration+lag days earlier.
        let deadline = d(2025, 1, 20);
        let a_deadline = compute_dependency_deadline(deadline, 5.0, 7.0);
        assert_eq!(a_deadline, d(2025, 1, 8));
    }
}
