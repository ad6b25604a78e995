//! Parallel Schedule Generation Scheme: a time-advancing greedy dispatcher (§4.E).
//!
//! This is a thin driver over [`crate::common::DispatchContext`] — the eligible-set
//! construction, sort strategies, and resource election all live there so bounded
//! rollout's internal simulations can reuse exactly this behaviour.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use rcpsp_core::config::SchedulingConfig;
use rcpsp_core::resources::ResourceConfig;
use rcpsp_core::{AlgorithmResult, PreProcessResult, ScheduledTask, Task};
use tracing::warn;

use crate::common::{seed_fixed_tasks, seed_resource_schedules, DispatchContext, SchedulerState};
use crate::error::SolverError;

/// Safety cap on dispatch-loop iterations, relative to the task count (§4.E).
const ITERATION_CAP_MULTIPLIER: usize = 100;

/// Run the parallel SGS dispatcher over `tasks`. `completed_without_dates` names tasks
/// that satisfy dependents immediately without occupying any resource.
pub fn schedule(
    tasks: &[Task],
    resource_config: &ResourceConfig,
    pre: &PreProcessResult,
    completed_without_dates: &HashSet<String>,
    base_date: NaiveDate,
    config: &SchedulingConfig,
) -> Result<(AlgorithmResult, Vec<String>), SolverError> {
    let task_map: HashMap<String, &Task> = tasks.iter().map(|t| (t.id.clone(), t)).collect();
    let ctx = DispatchContext { task_map: &task_map, resource_config, pre, completed_without_dates, config };

    let unscheduled: HashSet<String> = tasks.iter().filter(|t| !t.is_fixed()).map(|t| t.id.clone()).collect();
    let mut state = SchedulerState::new(base_date, unscheduled, seed_resource_schedules(resource_config));
    seed_fixed_tasks(tasks, &mut state);

    let iteration_cap = tasks.len().max(1) * ITERATION_CAP_MULTIPLIER;
    ctx.run_to_completion(&mut state, iteration_cap)?;

    Ok(finalize(&task_map, pre, state))
}

/// Convert a completed [`SchedulerState`] into the algorithm's output shape, emitting
/// one deadline-violation warning per affected task.
pub(crate) fn finalize(
    task_map: &HashMap<String, &Task>,
    pre: &PreProcessResult,
    mut state: SchedulerState,
) -> (AlgorithmResult, Vec<String>) {
    let mut warnings = Vec::new();
    let mut scheduled_tasks = Vec::with_capacity(state.scheduled.len());

    for (id, (start, end)) in &state.scheduled {
        let Some(task) = task_map.get(id) else { continue };
        if let Some(deadline) = pre.computed_deadlines.get(id) {
            if end > deadline {
                warnings.push(format!("task '{id}' violates its deadline of {deadline} by {} day(s)", (*end - *deadline).num_days()));
            }
        }
        scheduled_tasks.push(ScheduledTask {
            task_id: id.clone(),
            start_date: *start,
            end_date: *end,
            duration_days: task.duration_days,
            resources: state.resources_used.remove(id).unwrap_or_default(),
        });
    }
    scheduled_tasks.sort_by(|a, b| a.start_date.cmp(&b.start_date).then_with(|| a.task_id.cmp(&b.task_id)));

    if !warnings.is_empty() {
        warn!(count = warnings.len(), "deadline violations in scheduling result");
    }

    (AlgorithmResult { scheduled_tasks }, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcpsp_core::{Dependency, ScheduleError};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn empty_pre() -> PreProcessResult {
        PreProcessResult::default()
    }

    #[test]
    fn s1_simple_chain() {
        let a = Task::new("A").duration(5.0).resource("r1");
        let b = Task::new("B").duration(3.0).resource("r1").depends_on(Dependency::new("A"));
        let cfg = SchedulingConfig::default();
        let rc = ResourceConfig::new();
        let (result, warnings) = schedule(&[a, b], &rc, &empty_pre(), &HashSet::new(), d(2025, 1, 1), &cfg).unwrap();
        assert!(warnings.is_empty());
        let a_out = result.scheduled_tasks.iter().find(|t| t.task_id == "A").unwrap();
        let b_out = result.scheduled_tasks.iter().find(|t| t.task_id == "B").unwrap();
        assert_eq!(a_out.start_date, d(2025, 1, 1));
        assert_eq!(a_out.end_date, d(2025, 1, 6));
        assert_eq!(b_out.start_date, d(2025, 1, 7));
        assert_eq!(b_out.end_date, d(2025, 1, 10));
    }

    #[test]
    fn s2_milestone_is_instant() {
        let a = Task::new("A").duration(0.0).resource("r1");
        let cfg = SchedulingConfig::default();
        let rc = ResourceConfig::new();
        let (result, _) = schedule(&[a], &rc, &empty_pre(), &HashSet::new(), d(2025, 1, 1), &cfg).unwrap();
        let a_out = &result.scheduled_tasks[0];
        assert_eq!(a_out.start_date, a_out.end_date);
        assert!(a_out.resources.is_empty());
    }

    #[test]
    fn s4_fixed_task_pins_dates() {
        let a = Task::new("A").duration(5.0).resource("r1").start_on(d(2025, 2, 1)).end_on(d(2025, 2, 5));
        let cfg = SchedulingConfig::default();
        let rc = ResourceConfig::new();
        let (result, _) = schedule(&[a], &rc, &empty_pre(), &HashSet::new(), d(2025, 1, 1), &cfg).unwrap();
        let a_out = &result.scheduled_tasks[0];
        assert_eq!(a_out.start_date, d(2025, 2, 1));
        assert_eq!(a_out.end_date, d(2025, 2, 5));
    }

    #[test]
    fn s7_lag_pushes_start() {
        let a = Task::new("A").duration(5.0).resource("r1");
        let b = Task::new("B").duration(5.0).resource("r2").depends_on(Dependency::with_lag("A", 7.0));
        let cfg = SchedulingConfig::default();
        let rc = ResourceConfig::new();
        let (result, _) = schedule(&[a, b], &rc, &empty_pre(), &HashSet::new(), d(2025, 1, 1), &cfg).unwrap();
        let b_out = result.scheduled_tasks.iter().find(|t| t.task_id == "B").unwrap();
        assert_eq!(b_out.start_date, d(2025, 1, 14));
    }

    #[test]
    fn s8_auto_assign_prefers_available_resource() {
        let mut rc = ResourceConfig::new();
        rc.resources.push(rcpsp_core::resources::ResourceDef { name: "alice".into(), dns_periods: vec![(d(2025, 1, 1), d(2025, 1, 10))] });
        rc.resources.push(rcpsp_core::resources::ResourceDef::new("bob"));
        let a = Task::new("A").duration(5.0).auto_assign("*");
        let cfg = SchedulingConfig::default();
        let (result, _) = schedule(&[a], &rc, &empty_pre(), &HashSet::new(), d(2025, 1, 1), &cfg).unwrap();
        assert_eq!(result.scheduled_tasks[0].resources, vec!["bob".to_string()]);
    }

    #[test]
    fn cyclic_dependency_among_solve_set_is_unschedulable() {
        let a = Task::new("A").duration(1.0).resource("r1").depends_on(Dependency::new("B"));
        let b = Task::new("B").duration(1.0).resource("r1").depends_on(Dependency::new("A"));
        let cfg = SchedulingConfig::default();
        let rc = ResourceConfig::new();
        let err = schedule(&[a, b], &rc, &empty_pre(), &HashSet::new(), d(2025, 1, 1), &cfg).unwrap_err();
        assert!(matches!(err, SolverError::Core(ScheduleError::UnschedulableResidue(_))));
    }
}
