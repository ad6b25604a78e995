//! CP-SAT algorithm: encodes the whole problem as one constraint-optimization model
//! via `pumpkin-solver` (§4.G). Feature-gated behind `cpsat`.
//!
//! `pumpkin-solver`'s demonstrated public surface (`utf8proj-solver/src/optimal.rs`,
//! this workspace's only prior user of the crate) has no OR-Tools-style
//! `add_element`/`IntervalVar`/`add_hint`. Three adaptations, recorded in `DESIGN.md`:
//! - Every task interval is fixed-size (`end == start + duration`, pinned by a pair of
//!   `greater_than_or_equals` constraints rather than a native interval variable). DNS
//!   gaps are modeled as fixed, capacity-consuming ghost entries on the `cumulative`
//!   constraint for the affected resource, so a real task's interval simply cannot
//!   overlap one — functionally equivalent to the spec's element-constrained
//!   variable-size interval, without needing an element constraint at all.
//! - The objective's tardiness/earliness terms use the standard LP "max via a slack
//!   variable bounded below by zero, minimized" trick instead of `add_max_equality`.
//! - Hints become a warm start: the greedy result narrows each task's start-variable
//!   domain to a window around its greedy start, rather than a true `add_hint` call.
//!
//! Auto-assignment (`resource_spec`) is resolved once, greedily, before the model is
//! built (picking the first candidate in configuration order) rather than inside the
//! CP model with presence booleans and an `exactly_one` constraint — pumpkin-solver's
//! demonstrated surface has no reified/boolean-selection vocabulary to ground that on.

use std::collections::{HashMap, HashSet};
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate};
use pumpkin_solver::constraints as cp;
use pumpkin_solver::optimisation::linear_sat_unsat::LinearSatUnsat;
use pumpkin_solver::optimisation::OptimisationDirection;
use pumpkin_solver::results::{OptimisationResult, ProblemSolution};
use pumpkin_solver::termination::TimeBudget;
use pumpkin_solver::variables::TransformableVariable;
use pumpkin_solver::Solver;
use rcpsp_core::config::SchedulingConfig;
use rcpsp_core::resources::ResourceConfig;
use rcpsp_core::{AlgorithmResult, PreProcessResult, ScheduledTask, Task};
use tracing::{debug, warn};

use crate::error::SolverError;

/// Fractional resource allocations are scaled to this integer capacity for
/// `cumulative`, matching `utf8proj-solver::optimal`'s percentage-as-integer convention.
const ALLOCATION_SCALE: i32 = 100;

/// Run the CP-SAT algorithm over `tasks`, base-dated at `base_date`.
pub fn schedule(
    tasks: &[Task],
    resource_config: &ResourceConfig,
    pre: &PreProcessResult,
    completed_without_dates: &HashSet<String>,
    base_date: NaiveDate,
    config: &SchedulingConfig,
) -> Result<(AlgorithmResult, Vec<String>), SolverError> {
    for task in tasks {
        if task.resources.len() > 1 {
            return Err(SolverError::MultiResourceUnsupported(task.id.clone()));
        }
    }

    let fixed: Vec<&Task> = tasks.iter().filter(|t| t.is_fixed()).collect();
    let resolved: Vec<Task> = tasks
        .iter()
        .filter(|t| !t.is_fixed())
        .map(|t| resolve_auto_assign(t, resource_config))
        .collect();

    if resolved.is_empty() {
        return Ok((AlgorithmResult::default(), Vec::new()));
    }

    let horizon = estimate_horizon(tasks);
    let hints = greedy_hints(tasks, resource_config, pre, completed_without_dates, base_date, config);

    let mut solver = Solver::default();
    let constraint_tag = solver.new_constraint_tag();

    let mut start_vars = HashMap::new();
    let mut end_vars = HashMap::new();
    for task in &resolved {
        let (lo, hi) = if config.cpsat.use_greedy_hints {
            hint_window(hints.get(&task.id).copied(), horizon, config.cpsat.hint_window_days)
        } else {
            (0, horizon)
        };
        start_vars.insert(task.id.clone(), solver.new_bounded_integer(lo, hi));
        end_vars.insert(task.id.clone(), solver.new_bounded_integer(0, 2 * horizon));
    }

    // Pin every interval to its exact duration; DNS and fixed-task avoidance happen
    // entirely through `cumulative` capacity below, not by widening this link.
    for task in &resolved {
        let start = start_vars[&task.id];
        let end = end_vars[&task.id];
        let duration = task.duration_days.round() as i32;
        let ge = vec![end.scaled(1), start.scaled(-1)];
        let _ = solver.add_constraint(cp::greater_than_or_equals(ge, duration, constraint_tag)).post();
        let le = vec![start.scaled(1), end.scaled(-1)];
        let _ = solver.add_constraint(cp::greater_than_or_equals(le, -duration, constraint_tag)).post();
    }

    for task in &resolved {
        let task_start = start_vars[&task.id];
        for dep in &task.dependencies {
            let lag = dep.lag_days.round() as i32;
            if let Some(&pred_end) = end_vars.get(&dep.predecessor_id) {
                let vars = vec![task_start.scaled(1), pred_end.scaled(-1)];
                let _ = solver.add_constraint(cp::greater_than_or_equals(vars, lag, constraint_tag)).post();
            } else if let Some(pred) = fixed.iter().find(|p| p.id == dep.predecessor_id) {
                let pred_end_offset = days_since(base_date, fixed_span(pred).1);
                let vars = vec![task_start.scaled(1)];
                let _ = solver.add_constraint(cp::greater_than_or_equals(vars, pred_end_offset + lag, constraint_tag)).post();
            }
        }
        if let Some(start_after) = task.start_after {
            let offset = days_since(base_date, start_after).max(0);
            let vars = vec![task_start.scaled(1)];
            let _ = solver.add_constraint(cp::greater_than_or_equals(vars, offset, constraint_tag)).post();
        }
    }

    for resource in &resource_config.resources {
        let mut starts = Vec::new();
        let mut durations = Vec::new();
        let mut demands = Vec::new();

        for task in &resolved {
            let Some((_, allocation)) = task.resources.iter().find(|(name, _)| name == &resource.name) else { continue };
            starts.push(start_vars[&task.id]);
            durations.push(task.duration_days.round() as i32);
            demands.push((allocation * ALLOCATION_SCALE as f64).round() as i32);
        }

        for fixed_task in fixed.iter().filter(|f| f.resources.iter().any(|(name, _)| name == &resource.name)) {
            let (start, end) = fixed_span(fixed_task);
            let offset = days_since(base_date, start);
            let ghost = solver.new_bounded_integer(offset, offset);
            starts.push(ghost);
            durations.push(days_since(start, end));
            demands.push(ALLOCATION_SCALE);
        }

        for &(dns_start, dns_end) in resource.dns_periods.iter().chain(resource_config.global_dns_periods.iter()) {
            let offset = days_since(base_date, dns_start);
            let ghost = solver.new_bounded_integer(offset, offset);
            starts.push(ghost);
            durations.push(days_since(dns_start, dns_end) + 1);
            demands.push(ALLOCATION_SCALE);
        }

        if starts.is_empty() {
            continue;
        }
        let _ = solver
            .add_constraint(cp::cumulative(starts, durations, demands, ALLOCATION_SCALE, constraint_tag))
            .post();
    }

    let objective_upper = (horizon as i64 * resolved.len().max(1) as i64 * 200).clamp(1_000, i32::MAX as i64) as i32;
    let objective = solver.new_bounded_integer(0, objective_upper);
    let mut objective_ge = vec![objective.scaled(1)];

    for task in &resolved {
        let priority = pre.computed_priorities.get(&task.id).copied().unwrap_or(config.default_priority);
        let end = end_vars[&task.id];

        objective_ge.push(end.scaled(-((priority as f64 * config.cpsat.priority_weight).round() as i32)));

        if let Some(deadline) = pre.computed_deadlines.get(&task.id) {
            let deadline_offset = days_since(base_date, *deadline);
            let tardiness_weight = (priority as f64 * config.cpsat.tardiness_weight).round() as i32;
            if tardiness_weight != 0 {
                let tardiness = solver.new_bounded_integer(0, horizon);
                let vars = vec![tardiness.scaled(1), end.scaled(-1)];
                let _ = solver.add_constraint(cp::greater_than_or_equals(vars, -deadline_offset, constraint_tag)).post();
                objective_ge.push(tardiness.scaled(-tardiness_weight));
            }

            let earliness_weight = (priority as f64 * config.cpsat.earliness_weight).round() as i32;
            if earliness_weight != 0 {
                let earliness = solver.new_bounded_integer(0, horizon);
                let vars = vec![earliness.scaled(1), end.scaled(1)];
                let _ = solver.add_constraint(cp::greater_than_or_equals(vars, deadline_offset, constraint_tag)).post();
                objective_ge.push(earliness.scaled(earliness_weight));
            }
        }
    }

    let _ = solver.add_constraint(cp::greater_than_or_equals(objective_ge, 0, constraint_tag)).post();

    let mut brancher = solver.default_brancher();
    let timeout = config.cpsat.time_limit_seconds.unwrap_or(30.0).max(0.01);
    let mut termination = TimeBudget::starting_now(StdDuration::from_millis((timeout * 1000.0) as u64));

    if config.cpsat.log_solver_progress {
        debug!(tasks = resolved.len(), horizon, "starting CP-SAT solve");
    }

    fn noop_callback<B>(_: &Solver, _: pumpkin_solver::results::SolutionReference, _: &B) {}
    let result = solver.optimise(
        &mut brancher,
        &mut termination,
        LinearSatUnsat::new(OptimisationDirection::Minimise, objective, noop_callback),
    );

    let solution_starts: HashMap<String, i64> = match result {
        OptimisationResult::Optimal(sol) => resolved.iter().map(|t| (t.id.clone(), sol.get_integer_value(start_vars[&t.id]) as i64)).collect(),
        OptimisationResult::Satisfiable(sol) => resolved.iter().map(|t| (t.id.clone(), sol.get_integer_value(start_vars[&t.id]) as i64)).collect(),
        OptimisationResult::Unsatisfiable => return Err(SolverError::CpSatInfeasible),
        OptimisationResult::Unknown => return Err(SolverError::CpSatTimeoutNoIncumbent),
    };

    let mut warnings = Vec::new();
    if config.cpsat.use_greedy_hints && config.cpsat.warn_on_incomplete_hints {
        let mismatched = resolved
            .iter()
            .filter(|t| hints.get(&t.id).is_some_and(|h| *h != solution_starts[&t.id]))
            .count();
        if mismatched > 0 {
            warnings.push(format!("CP-SAT solution diverged from the greedy hint on {mismatched} task(s)"));
        }
    }

    let mut scheduled_tasks = Vec::with_capacity(resolved.len());
    for task in &resolved {
        let start_offset = solution_starts[&task.id];
        let start = base_date + Duration::days(start_offset);
        let end = start + Duration::days(task.duration_days.max(0.0).round() as i64);
        if let Some(deadline) = pre.computed_deadlines.get(&task.id) {
            if end > *deadline {
                warnings.push(format!("task '{}' violates its deadline of {deadline} by {} day(s)", task.id, (end - *deadline).num_days()));
            }
        }
        scheduled_tasks.push(ScheduledTask {
            task_id: task.id.clone(),
            start_date: start,
            end_date: end,
            duration_days: task.duration_days,
            resources: task.resources.iter().map(|(name, _)| name.clone()).collect(),
        });
    }
    scheduled_tasks.sort_by(|a, b| a.start_date.cmp(&b.start_date).then_with(|| a.task_id.cmp(&b.task_id)));

    if !warnings.is_empty() {
        warn!(count = warnings.len(), "CP-SAT run produced warnings");
    }

    Ok((AlgorithmResult { scheduled_tasks }, warnings))
}

/// Resolve `resource_spec` to the first candidate in configuration order, since
/// pumpkin-solver's demonstrated surface has no boolean-selection primitive to encode
/// auto-assignment inside the model itself.
fn resolve_auto_assign(task: &Task, resource_config: &ResourceConfig) -> Task {
    let Some(spec) = &task.resource_spec else { return task.clone() };
    let mut resolved = task.clone();
    resolved.resource_spec = None;
    if let Some(first) = resource_config.expand_resource_spec(spec).into_iter().next() {
        resolved.resources = vec![(first, 1.0)];
    }
    resolved
}

fn estimate_horizon(tasks: &[Task]) -> i32 {
    let total_duration: f64 = tasks.iter().map(|t| t.duration_days.max(0.0)).sum();
    (total_duration.round() as i32 + 60).max(60)
}

fn days_since(base: NaiveDate, date: NaiveDate) -> i32 {
    (date - base).num_days() as i32
}

/// The fixed `(start, end)` span of a pinned task, mirroring `common::seed_fixed_tasks`.
fn fixed_span(task: &Task) -> (NaiveDate, NaiveDate) {
    let span = task.duration_days.max(0.0).round() as i64;
    match (task.start_on, task.end_on) {
        (Some(s), Some(e)) => (s, e),
        (Some(s), None) => (s, s + Duration::days(span)),
        (None, Some(e)) => (e - Duration::days(span), e),
        (None, None) => unreachable!("is_fixed guarantees at least one date"),
    }
}

/// Run the greedy dispatcher silently to seed a CP-SAT warm start.
fn greedy_hints(
    tasks: &[Task],
    resource_config: &ResourceConfig,
    pre: &PreProcessResult,
    completed_without_dates: &HashSet<String>,
    base_date: NaiveDate,
    config: &SchedulingConfig,
) -> HashMap<String, i64> {
    match crate::parallel_sgs::schedule(tasks, resource_config, pre, completed_without_dates, base_date, config) {
        Ok((result, _)) => result
            .scheduled_tasks
            .into_iter()
            .map(|t| (t.task_id, days_since(base_date, t.start_date) as i64))
            .collect(),
        Err(_) => HashMap::new(),
    }
}

fn hint_window(hint: Option<i64>, horizon: i32, window_days: Option<i64>) -> (i32, i32) {
    match hint {
        Some(h) => {
            let window = window_days.unwrap_or(14).max(0) as i32;
            let h = h as i32;
            ((h - window).max(0), (h + window).min(horizon))
        }
        None => (0, horizon),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcpsp_core::Dependency;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn empty_pre() -> PreProcessResult {
        PreProcessResult::default()
    }

    #[test]
    fn rejects_multi_resource_tasks() {
        let a = Task::new("A").duration(5.0).resource("r1").resource("r2");
        let cfg = SchedulingConfig::default();
        let rc = ResourceConfig::new();
        let err = schedule(&[a], &rc, &empty_pre(), &HashSet::new(), d(2025, 1, 1), &cfg).unwrap_err();
        assert!(matches!(err, SolverError::MultiResourceUnsupported(id) if id == "A"));
    }

    #[test]
    fn hint_window_clamps_to_horizon() {
        assert_eq!(hint_window(Some(5), 10, Some(3)), (2, 8));
        assert_eq!(hint_window(Some(-5), 10, Some(3)), (0, 0));
        assert_eq!(hint_window(None, 10, Some(3)), (0, 10));
    }

    #[test]
    fn simple_chain_respects_precedence() {
        let a = Task::new("A").duration(5.0).resource("r1");
        let b = Task::new("B").duration(3.0).resource("r1").depends_on(Dependency::new("A"));
        let mut cfg = SchedulingConfig::default();
        cfg.cpsat.use_greedy_hints = false;
        let rc = ResourceConfig::new();
        let (result, _) = schedule(&[a, b], &rc, &empty_pre(), &HashSet::new(), d(2025, 1, 1), &cfg).unwrap();
        let a_out = result.scheduled_tasks.iter().find(|t| t.task_id == "A").unwrap();
        let b_out = result.scheduled_tasks.iter().find(|t| t.task_id == "B").unwrap();
        assert!(b_out.start_date > a_out.end_date);
    }
}
