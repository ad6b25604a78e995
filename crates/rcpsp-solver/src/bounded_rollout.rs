//! Bounded-rollout algorithm: parallel SGS plus a simulation-based lookahead that may
//! defer a relaxed task when a more urgent one will soon become eligible (§4.F).

use std::collections::HashMap;
use std::collections::HashSet;

use chrono::{Duration, NaiveDate};
use rcpsp_core::config::{RolloutConfig, SchedulingConfig};
use rcpsp_core::resources::ResourceConfig;
use rcpsp_core::{AlgorithmResult, PreProcessResult, Task};
use tracing::debug;

use crate::common::{critical_ratio, seed_fixed_tasks, seed_resource_schedules, DispatchContext, RankedTask, SchedulerState};
use crate::error::SolverError;

const ITERATION_CAP_MULTIPLIER: usize = 100;

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
    let rollout_cfg = &config.rollout;

    let unscheduled: HashSet<String> = tasks.iter().filter(|t| !t.is_fixed()).map(|t| t.id.clone()).collect();
    let mut state = SchedulerState::new(base_date, unscheduled, seed_resource_schedules(resource_config));
    seed_fixed_tasks(tasks, &mut state);

    let iteration_cap = tasks.len().max(1) * ITERATION_CAP_MULTIPLIER;
    let mut iterations = 0usize;
    let no_exclusions = HashSet::new();

    while !state.unscheduled.is_empty() {
        iterations += 1;
        if iterations > iteration_cap {
            return Err(SolverError::Core(rcpsp_core::ScheduleError::UnschedulableResidue(
                state.unscheduled.into_iter().collect(),
            )));
        }

        let eligible_ids = ctx.eligible_ids(&state, &no_exclusions);
        let mut ranked = ctx.rank(&state, &eligible_ids);
        crate::common::sort_eligible(config.strategy, config.cr_weight, 1.0, &mut ranked);

        let mut scheduled_any = false;
        for candidate in &ranked {
            let task = task_map[candidate.task_id.as_str()];

            if is_relaxed(candidate, rollout_cfg) {
                if let Some((_, tentative_end)) = tentative_schedule(&ctx, &state, task) {
                    let horizon_limit = state.current_time + Duration::days(rollout_cfg.max_horizon_days.unwrap_or(30));
                    if let Some(competitor) = find_more_urgent(&ctx, &state, candidate, rollout_cfg, tentative_end, horizon_limit) {
                        let defer = should_defer(&ctx, &state, task, horizon_limit);
                        debug!(task = %task.id, competitor = %competitor, defer, "bounded rollout decision");
                        if defer {
                            continue;
                        }
                    }
                }
            }

            if ctx.try_schedule_task(&mut state, task) {
                scheduled_any = true;
            }
        }

        if !scheduled_any {
            match ctx.advance_time(&state) {
                Some(next_time) => state.current_time = next_time,
                None => {
                    return Err(SolverError::Core(rcpsp_core::ScheduleError::UnschedulableResidue(
                        state.unscheduled.into_iter().collect(),
                    )))
                }
            }
        }
    }

    Ok(crate::parallel_sgs::finalize(&task_map, pre, state))
}

fn is_relaxed(candidate: &RankedTask, rollout_cfg: &RolloutConfig) -> bool {
    candidate.priority < rollout_cfg.priority_threshold || candidate.cr > rollout_cfg.cr_relaxed_threshold
}

/// What the tentative (start, end) would be if `task` were committed right now,
/// without mutating the real state.
fn tentative_schedule(ctx: &DispatchContext, state: &SchedulerState, task: &Task) -> Option<(NaiveDate, NaiveDate)> {
    let mut probe = state.clone();
    if ctx.try_schedule_task(&mut probe, task) {
        probe.scheduled.get(&task.id).copied()
    } else {
        None
    }
}

/// Find an unscheduled task significantly more urgent than `candidate` whose earliest
/// eligibility falls before `candidate`'s tentative completion and within the horizon.
fn find_more_urgent(
    ctx: &DispatchContext,
    state: &SchedulerState,
    candidate: &RankedTask,
    rollout_cfg: &RolloutConfig,
    tentative_end: NaiveDate,
    horizon_limit: NaiveDate,
) -> Option<String> {
    for id in &state.unscheduled {
        if *id == candidate.task_id {
            continue;
        }
        let task = ctx.task_map[id.as_str()];
        let priority = ctx.pre.computed_priorities.get(id).copied().unwrap_or(ctx.config.default_priority);
        let deadline = ctx.pre.computed_deadlines.get(id).copied();
        let cr = critical_ratio(deadline, state.current_time, task.duration_days, candidate.cr);

        let priority_gap = priority as f64 >= candidate.priority as f64 + rollout_cfg.min_priority_gap as f64;
        let urgency_gap = candidate.cr - cr >= rollout_cfg.min_cr_urgency_gap
            && priority as f64 >= candidate.priority as f64 - rollout_cfg.min_priority_gap as f64;
        if !priority_gap && !urgency_gap {
            continue;
        }

        if let Some(earliest) = ctx.earliest_eligibility(id, state) {
            if earliest <= tentative_end && earliest <= horizon_limit {
                return Some(id.clone());
            }
        }
    }
    None
}

/// Run scenario A (schedule now, then complete greedily to the horizon) and scenario B
/// (defer through the whole horizon, then complete greedily), score both, and defer iff
/// B strictly beats A.
fn should_defer(ctx: &DispatchContext, state: &SchedulerState, task: &Task, horizon_limit: NaiveDate) -> bool {
    let no_exclusions = HashSet::new();
    let mut scenario_a = state.clone();
    ctx.try_schedule_task(&mut scenario_a, task);
    ctx.run_bounded(&mut scenario_a, horizon_limit, &no_exclusions);
    let score_a = score_scenario(ctx, state, &scenario_a, horizon_limit);

    let mut deferred = HashSet::new();
    deferred.insert(task.id.clone());
    let mut scenario_b = state.clone();
    ctx.run_bounded(&mut scenario_b, horizon_limit, &deferred);
    let score_b = score_scenario(ctx, state, &scenario_b, horizon_limit);

    score_b < score_a
}

/// Score a simulated scenario against the state it started from (§4.F): reward
/// finishing high-priority work early, penalize tardiness against computed deadlines,
/// and penalize tasks that remain eligible-but-unscheduled at the horizon.
fn score_scenario(ctx: &DispatchContext, base_state: &SchedulerState, sim_state: &SchedulerState, horizon_limit: NaiveDate) -> f64 {
    let base_day = base_state.current_time;
    let mut total = 0.0;

    for (id, (start, end)) in &sim_state.scheduled {
        if base_state.scheduled.contains_key(id) {
            continue;
        }
        let priority = ctx.pre.computed_priorities.get(id).copied().unwrap_or(ctx.config.default_priority) as f64;
        total += (*start - base_day).num_days() as f64 * (priority / 100.0);

        if let Some(deadline) = ctx.pre.computed_deadlines.get(id) {
            if end > deadline {
                let tardiness = (*end - *deadline).num_days() as f64;
                total += tardiness * priority * 10.0;
            }
        }
    }

    for id in &sim_state.unscheduled {
        let Some(earliest) = ctx.earliest_eligibility(id, sim_state) else { continue };
        if earliest > horizon_limit {
            continue;
        }
        let task = ctx.task_map[id.as_str()];
        let priority = ctx.pre.computed_priorities.get(id).copied().unwrap_or(ctx.config.default_priority) as f64;
        let deadline = ctx.pre.computed_deadlines.get(id).copied();
        let cr = critical_ratio(deadline, horizon_limit, task.duration_days, 10.0);
        let urgency_multiplier = (10.0 / cr.max(0.1)).min(100.0);
        let delay = (horizon_limit - base_day).num_days() as f64;
        total += delay * (priority / 100.0) * urgency_multiplier;

        if let Some(deadline) = deadline {
            if horizon_limit > deadline {
                total += (horizon_limit - deadline).num_days() as f64 * priority * 10.0;
            }
        }
    }

    total
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
    fn matches_parallel_sgs_when_no_contention() {
        let a = Task::new("A").duration(5.0).resource("r1");
        let b = Task::new("B").duration(3.0).resource("r1").depends_on(Dependency::new("A"));
        let cfg = SchedulingConfig::default();
        let rc = ResourceConfig::new();
        let (rollout_result, _) = schedule(&[a.clone(), b.clone()], &rc, &empty_pre(), &HashSet::new(), d(2025, 1, 1), &cfg).unwrap();
        let (sgs_result, _) = crate::parallel_sgs::schedule(&[a, b], &rc, &empty_pre(), &HashSet::new(), d(2025, 1, 1), &cfg).unwrap();
        assert_eq!(rollout_result.scheduled_tasks, sgs_result.scheduled_tasks);
    }

    #[test]
    fn s12_defers_relaxed_task_for_urgent_competitor() {
        // A relaxed, low-priority task could start now on r1; an urgent task becomes
        // eligible shortly after via a dependency, and also wants r1.
        let low = Task::new("low").duration(10.0).resource("r1").priority(10);
        let gate = Task::new("gate").duration(1.0);
        let urgent = Task::new("urgent")
            .duration(2.0)
            .resource("r1")
            .priority(95)
            .depends_on(Dependency::new("gate"))
            .end_before(d(2025, 1, 5));
        let mut cfg = SchedulingConfig::default();
        cfg.rollout.max_horizon_days = Some(30);
        let rc = ResourceConfig::new();
        let (result, _) = schedule(&[low, gate, urgent], &rc, &empty_pre(), &HashSet::new(), d(2025, 1, 1), &cfg).unwrap();
        let urgent_out = result.scheduled_tasks.iter().find(|t| t.task_id == "urgent").unwrap();
        // The urgent task should not be starved until after the 10-day low-priority task.
        assert!(urgent_out.start_date < d(2025, 1, 11));
    }
}
