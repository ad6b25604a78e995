//! Shared dispatch machinery used by both the parallel-SGS and bounded-rollout
//! algorithms: critical-ratio computation, the four sort strategies, greedy-with-
//! foresight resource election, and one `dispatch_step`/`advance_time` pair that both
//! the real run and every rollout simulation drive (§4.D's de-duplication decision,
//! carried into §4.E/§4.F).

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{Duration, NaiveDate};
use rcpsp_core::config::{SchedulingConfig, SortStrategy};
use rcpsp_core::resources::{ResourceConfig, ResourceSchedule};
use rcpsp_core::{PreProcessResult, ScheduleError, Task};

/// Build the initial per-resource schedule map, seeded with each resource's own DNS
/// periods plus the global DNS list (§3.2).
pub fn seed_resource_schedules(resource_config: &ResourceConfig) -> HashMap<String, ResourceSchedule> {
    resource_config
        .resources
        .iter()
        .map(|r| (r.name.clone(), resource_config.seeded_schedule(&r.name)))
        .collect()
}

/// The earliest a dependent task may start given its predecessor's end date and the
/// dependency's lag: `predecessor.end + 1 + lag` (§3.4, invariant 2).
pub fn earliest_start_after_predecessor(predecessor_end: NaiveDate, lag_days: f64) -> NaiveDate {
    let lag_seconds = (lag_days * 86_400.0).round() as i64;
    predecessor_end + Duration::days(1) + Duration::seconds(lag_seconds)
}

/// Critical ratio: `(deadline - now) / max(duration, 1)`. Tasks without a deadline use
/// `default_cr` (the caller supplies the adaptive default, §4.E step 2).
pub fn critical_ratio(deadline: Option<NaiveDate>, now: NaiveDate, duration_days: f64, default_cr: f64) -> f64 {
    match deadline {
        Some(d) => (d - now).num_days() as f64 / duration_days.max(1.0),
        None => default_cr,
    }
}

/// The adaptive default CR for tasks without a deadline: `max(max_cr * multiplier,
/// floor)`, guaranteeing no-deadline tasks sort after deadline-driven tasks of equal
/// priority by default.
pub fn adaptive_default_cr(deadline_crs: impl Iterator<Item = f64>, multiplier: f64, floor: f64) -> f64 {
    let max_cr = deadline_crs.fold(f64::MIN, f64::max);
    if max_cr == f64::MIN {
        floor
    } else {
        (max_cr * multiplier).max(floor)
    }
}

/// ATC urgency: `exp(-max(slack, 0) / (k * avg_remaining_duration))`, clamped to
/// `[floor, 1.0]`. `slack` is the CR expressed in days, i.e. `deadline - now`.
pub fn atc_urgency(deadline: Option<NaiveDate>, now: NaiveDate, k: f64, avg_remaining_duration: f64, floor: f64, no_deadline_multiplier: f64) -> f64 {
    match deadline {
        Some(d) => {
            let slack = (d - now).num_days() as f64;
            let raw = (-slack.max(0.0) / (k * avg_remaining_duration.max(1.0))).exp();
            raw.clamp(floor, 1.0)
        }
        None => (no_deadline_multiplier * floor).clamp(floor, 1.0),
    }
}

/// One candidate's ranking inputs for the eligible-set sort.
#[derive(Clone, Debug)]
pub struct RankedTask {
    pub task_id: String,
    pub priority: i32,
    pub cr: f64,
    pub duration_days: f64,
    pub urgency: f64,
}

fn sort_key(strategy: SortStrategy, cr_weight: f64, priority_weight: f64, rt: &RankedTask) -> (f64, f64) {
    match strategy {
        SortStrategy::PriorityFirst => (-(rt.priority as f64), rt.cr),
        SortStrategy::CrFirst => (rt.cr, -(rt.priority as f64)),
        SortStrategy::Weighted => (cr_weight * rt.cr + priority_weight * (100.0 - rt.priority as f64), 0.0),
        SortStrategy::Atc => (-(rt.priority as f64) * rt.urgency / rt.duration_days.max(1.0), 0.0),
    }
}

/// Order `candidates` in place per the configured strategy, breaking ties on task id.
pub fn sort_eligible(strategy: SortStrategy, cr_weight: f64, priority_weight: f64, candidates: &mut [RankedTask]) {
    candidates.sort_by(|a, b| {
        let (a1, a2) = sort_key(strategy, cr_weight, priority_weight, a);
        let (b1, b2) = sort_key(strategy, cr_weight, priority_weight, b);
        a1.partial_cmp(&b1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a2.partial_cmp(&b2).unwrap_or(Ordering::Equal))
            .then_with(|| a.task_id.cmp(&b.task_id))
    });
}

/// Result of evaluating every candidate resource for an auto-assigned task: the
/// earliest-completing candidate, its availability date, and its completion date.
pub struct ElectedResource {
    pub name: String,
    pub available_at: NaiveDate,
    pub completion: NaiveDate,
}

/// Greedy-with-foresight election: evaluate every candidate by `next_available_time`
/// and `calculate_completion_time`, returning the one with the earliest completion.
/// Ties keep the first candidate in `candidates` order (which callers pass in
/// configuration order, matching the teacher's stable-sort convention).
pub fn elect_resource(
    candidates: &[String],
    resource_schedules: &mut HashMap<String, ResourceSchedule>,
    current_time: NaiveDate,
    duration_days: f64,
) -> Option<ElectedResource> {
    let mut best: Option<ElectedResource> = None;
    for name in candidates {
        let schedule = resource_schedules.entry(name.clone()).or_default();
        let available_at = schedule.next_available_time(current_time);
        let completion = schedule.calculate_completion_time(available_at, duration_days);
        let better = match &best {
            None => true,
            Some(b) => completion < b.completion,
        };
        if better {
            best = Some(ElectedResource {
                name: name.clone(),
                available_at,
                completion,
            });
        }
    }
    best
}

/// True iff every named resource is available exactly at `current_time`.
pub fn all_available_now(names: &[String], resource_schedules: &HashMap<String, ResourceSchedule>, current_time: NaiveDate) -> bool {
    names.iter().all(|name| {
        resource_schedules
            .get(name)
            .map(|s| s.is_available_on(current_time))
            .unwrap_or(true)
    })
}

/// The latest completion date across every named resource, i.e. the date the task
/// finishes once all of its explicit resources have completed their portion of the work.
pub fn max_completion(
    names: &[String],
    resource_schedules: &mut HashMap<String, ResourceSchedule>,
    current_time: NaiveDate,
    duration_days: f64,
) -> NaiveDate {
    names
        .iter()
        .map(|name| {
            resource_schedules
                .entry(name.clone())
                .or_default()
                .calculate_completion_time(current_time, duration_days)
        })
        .max()
        .unwrap_or(current_time)
}

/// Cloneable scheduling state, shared by parallel SGS and bounded rollout (the latter
/// clones it per simulated scenario).
#[derive(Clone, Debug)]
pub struct SchedulerState {
    pub current_time: NaiveDate,
    pub scheduled: HashMap<String, (NaiveDate, NaiveDate)>,
    pub resources_used: HashMap<String, Vec<String>>,
    pub unscheduled: HashSet<String>,
    pub resource_schedules: HashMap<String, ResourceSchedule>,
}

impl SchedulerState {
    pub fn new(current_time: NaiveDate, unscheduled: HashSet<String>, resource_schedules: HashMap<String, ResourceSchedule>) -> Self {
        Self {
            current_time,
            scheduled: HashMap::new(),
            resources_used: HashMap::new(),
            unscheduled,
            resource_schedules,
        }
    }
}

/// Place every fixed task (`start_on`/`end_on` set) on the calendar and mark its
/// resources busy, ahead of the main dispatch loop (Phase 0 of both algorithms).
pub fn seed_fixed_tasks(tasks: &[Task], state: &mut SchedulerState) {
    for task in tasks {
        if !task.is_fixed() {
            continue;
        }
        let span = task.duration_days.max(0.0).round() as i64;
        let (start, end) = match (task.start_on, task.end_on) {
            (Some(s), Some(e)) => (s, e),
            (Some(s), None) => (s, s + Duration::days(span)),
            (None, Some(e)) => (e - Duration::days(span), e),
            (None, None) => unreachable!("is_fixed guarantees at least one date"),
        };

        for (name, _allocation) in &task.resources {
            state.resource_schedules.entry(name.clone()).or_default().add_busy_period(start, end);
        }
        state
            .resources_used
            .insert(task.id.clone(), task.resources.iter().map(|(name, _)| name.clone()).collect());
        state.scheduled.insert(task.id.clone(), (start, end));
    }
}

/// Everything a dispatch step needs that does not change across the run: the task
/// lookup table, resource configuration, preprocessed deadlines/priorities, the
/// completed-without-dates set, and the active scheduling configuration.
pub struct DispatchContext<'a> {
    pub task_map: &'a HashMap<String, &'a Task>,
    pub resource_config: &'a ResourceConfig,
    pub pre: &'a PreProcessResult,
    pub completed_without_dates: &'a HashSet<String>,
    pub config: &'a SchedulingConfig,
}

impl<'a> DispatchContext<'a> {
    fn is_eligible(&self, task: &Task, state: &SchedulerState) -> bool {
        if let Some(start_after) = task.start_after {
            if start_after > state.current_time {
                return false;
            }
        }
        task.dependencies.iter().all(|dep| {
            if self.completed_without_dates.contains(&dep.predecessor_id) {
                return true;
            }
            match state.scheduled.get(&dep.predecessor_id) {
                Some((_, end)) => earliest_start_after_predecessor(*end, dep.lag_days) <= state.current_time,
                None => false,
            }
        })
    }

    /// Unscheduled tasks, excluding `exclude`, that are eligible to run at
    /// `state.current_time`.
    pub fn eligible_ids(&self, state: &SchedulerState, exclude: &HashSet<String>) -> Vec<String> {
        state
            .unscheduled
            .iter()
            .filter(|id| !exclude.contains(*id))
            .filter(|id| self.is_eligible(self.task_map[*id], state))
            .cloned()
            .collect()
    }

    /// The earliest eligibility date of a not-yet-eligible task, used by the rollout
    /// gate to test "will become eligible soon" (§4.F).
    pub fn earliest_eligibility(&self, task_id: &str, state: &SchedulerState) -> Option<NaiveDate> {
        let task = self.task_map.get(task_id)?;
        let mut earliest = state.current_time;
        if let Some(start_after) = task.start_after {
            earliest = earliest.max(start_after);
        }
        for dep in &task.dependencies {
            if self.completed_without_dates.contains(&dep.predecessor_id) {
                continue;
            }
            let bound = match state.scheduled.get(&dep.predecessor_id) {
                Some((_, end)) => earliest_start_after_predecessor(*end, dep.lag_days),
                None => return None,
            };
            earliest = earliest.max(bound);
        }
        Some(earliest)
    }

    pub fn rank(&self, state: &SchedulerState, eligible_ids: &[String]) -> Vec<RankedTask> {
        let avg_remaining_duration = if state.unscheduled.is_empty() {
            1.0
        } else {
            state.unscheduled.iter().map(|id| self.task_map[id].duration_days).sum::<f64>() / state.unscheduled.len() as f64
        };

        let default_cr = adaptive_default_cr(
            eligible_ids.iter().filter_map(|id| {
                self.pre
                    .computed_deadlines
                    .get(id)
                    .map(|deadline| critical_ratio(Some(*deadline), state.current_time, self.task_map[id.as_str()].duration_days, 0.0))
            }),
            self.config.default_cr_multiplier,
            self.config.default_cr_floor,
        );

        eligible_ids
            .iter()
            .map(|id| {
                let task = self.task_map[id.as_str()];
                let deadline = self.pre.computed_deadlines.get(id).copied();
                let priority = self.pre.computed_priorities.get(id).copied().unwrap_or(self.config.default_priority);
                let cr = critical_ratio(deadline, state.current_time, task.duration_days, default_cr);
                let urgency = atc_urgency(
                    deadline,
                    state.current_time,
                    self.config.atc_k,
                    avg_remaining_duration,
                    self.config.atc_default_urgency_floor,
                    self.config.atc_default_urgency_multiplier,
                );
                RankedTask { task_id: id.clone(), priority, cr, duration_days: task.duration_days, urgency }
            })
            .collect()
    }

    pub(crate) fn try_schedule_task(&self, state: &mut SchedulerState, task: &Task) -> bool {
        if task.is_milestone() {
            state.scheduled.insert(task.id.clone(), (state.current_time, state.current_time));
            state.resources_used.insert(task.id.clone(), Vec::new());
            state.unscheduled.remove(&task.id);
            return true;
        }

        if let Some(spec) = &task.resource_spec {
            let candidates = self.resource_config.expand_resource_spec(spec);
            let Some(elected) = elect_resource(&candidates, &mut state.resource_schedules, state.current_time, task.duration_days) else {
                return false;
            };
            if elected.available_at != state.current_time {
                return false;
            }
            state
                .resource_schedules
                .get_mut(&elected.name)
                .expect("elect_resource populates the map")
                .add_busy_period(state.current_time, elected.completion);
            state.scheduled.insert(task.id.clone(), (state.current_time, elected.completion));
            state.resources_used.insert(task.id.clone(), vec![elected.name]);
            state.unscheduled.remove(&task.id);
            return true;
        }

        if task.resources.is_empty() {
            let end = state.current_time + Duration::days(task.duration_days.max(0.0).round() as i64);
            state.scheduled.insert(task.id.clone(), (state.current_time, end));
            state.resources_used.insert(task.id.clone(), Vec::new());
            state.unscheduled.remove(&task.id);
            return true;
        }

        let names: Vec<String> = task.resources.iter().map(|(n, _)| n.clone()).collect();
        if !all_available_now(&names, &state.resource_schedules, state.current_time) {
            return false;
        }
        let end = max_completion(&names, &mut state.resource_schedules, state.current_time, task.duration_days);
        for name in &names {
            state.resource_schedules.entry(name.clone()).or_default().add_busy_period(state.current_time, end);
        }
        state.scheduled.insert(task.id.clone(), (state.current_time, end));
        state.resources_used.insert(task.id.clone(), names);
        state.unscheduled.remove(&task.id);
        true
    }

    /// Attempt to schedule every currently-eligible task (excluding `exclude`) at
    /// `state.current_time`, in ranked order. Returns true iff at least one task was
    /// committed.
    pub fn dispatch_step(&self, state: &mut SchedulerState, exclude: &HashSet<String>) -> bool {
        let eligible_ids = self.eligible_ids(state, exclude);
        let mut ranked = self.rank(state, &eligible_ids);
        sort_eligible(self.config.strategy, self.config.cr_weight, 1.0, &mut ranked);

        let mut scheduled_any = false;
        for ranked_task in &ranked {
            let task = self.task_map[ranked_task.task_id.as_str()];
            if self.try_schedule_task(state, task) {
                scheduled_any = true;
            }
        }
        scheduled_any
    }

    /// Find the earliest future event that could unblock progress: a dependency
    /// completing, a `start_after` boundary, or a resource becoming newly available.
    pub fn advance_time(&self, state: &SchedulerState) -> Option<NaiveDate> {
        let mut candidates: Vec<NaiveDate> = Vec::new();

        for id in &state.unscheduled {
            let task = self.task_map[id.as_str()];
            if let Some(start_after) = task.start_after {
                if start_after > state.current_time {
                    candidates.push(start_after);
                }
            }
            for dep in &task.dependencies {
                if self.completed_without_dates.contains(&dep.predecessor_id) {
                    continue;
                }
                if let Some((_, end)) = state.scheduled.get(&dep.predecessor_id) {
                    let earliest = earliest_start_after_predecessor(*end, dep.lag_days);
                    if earliest > state.current_time {
                        candidates.push(earliest);
                    }
                }
            }
        }

        for schedule in state.resource_schedules.values() {
            let next = schedule.next_available_time(state.current_time + Duration::days(1));
            if next > state.current_time {
                candidates.push(next);
            }
        }

        candidates.into_iter().min()
    }

    /// Drive `state` to completion (every task scheduled) using plain greedy dispatch,
    /// with no rollout lookahead. Used both by parallel SGS directly and by bounded
    /// rollout's internal simulations.
    pub fn run_to_completion(&self, state: &mut SchedulerState, iteration_cap: usize) -> Result<(), ScheduleError> {
        let empty = HashSet::new();
        let mut iterations = 0usize;
        while !state.unscheduled.is_empty() {
            iterations += 1;
            if iterations > iteration_cap {
                return Err(ScheduleError::UnschedulableResidue(state.unscheduled.iter().cloned().collect()));
            }
            if !self.dispatch_step(state, &empty) {
                match self.advance_time(state) {
                    Some(next_time) => state.current_time = next_time,
                    None => return Err(ScheduleError::UnschedulableResidue(state.unscheduled.iter().cloned().collect())),
                }
            }
        }
        Ok(())
    }

    /// Drive `state` forward by ranked dispatch for up to `horizon_end`, never
    /// scheduling anything in `exclude` (used by bounded rollout to hold a deferred
    /// task out of the whole simulated horizon, not just one step). Stops early if
    /// nothing remains eligible and no further event exists within the horizon.
    pub fn run_bounded(&self, state: &mut SchedulerState, horizon_end: NaiveDate, exclude: &HashSet<String>) {
        let mut guard = 0usize;
        while !state.unscheduled.is_empty() && state.current_time <= horizon_end && guard < 10_000 {
            guard += 1;
            if !self.dispatch_step(state, exclude) {
                match self.advance_time(state) {
                    Some(next_time) if next_time <= horizon_end => state.current_time = next_time,
                    _ => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn critical_ratio_uses_default_without_deadline() {
        assert_eq!(critical_ratio(None, d(2025, 1, 1), 5.0, 3.0), 3.0);
    }

    #[test]
    fn critical_ratio_with_deadline() {
        // S5: A deadline 2025-01-31, base 2025-01-01, duration 20 -> CR = 30/20 = 1.5
        let cr = critical_ratio(Some(d(2025, 1, 31)), d(2025, 1, 1), 20.0, 0.0);
        assert_eq!(cr, 1.5);
    }

    #[test]
    fn adaptive_default_cr_uses_floor_when_no_deadlines() {
        assert_eq!(adaptive_default_cr(std::iter::empty(), 2.0, 10.0), 10.0);
    }

    #[test]
    fn adaptive_default_cr_scales_max() {
        assert_eq!(adaptive_default_cr([1.0, 3.0].into_iter(), 2.0, 1.0), 6.0);
    }

    #[test]
    fn cr_first_orders_by_cr_then_priority() {
        let mut tasks = vec![
            RankedTask { task_id: "a".into(), priority: 50, cr: 6.0, duration_days: 20.0, urgency: 0.0 },
            RankedTask { task_id: "b".into(), priority: 50, cr: 1.5, duration_days: 5.0, urgency: 0.0 },
        ];
        sort_eligible(SortStrategy::CrFirst, 10.0, 1.0, &mut tasks);
        assert_eq!(tasks[0].task_id, "b");
    }

    #[test]
    fn elect_resource_prefers_earliest_completion() {
        let mut schedules = HashMap::new();
        let mut alice = ResourceSchedule::new();
        alice.add_busy_period(d(2025, 1, 1), d(2025, 1, 10));
        schedules.insert("alice".to_string(), alice);
        schedules.insert("bob".to_string(), ResourceSchedule::new());

        let elected = elect_resource(
            &["alice".to_string(), "bob".to_string()],
            &mut schedules,
            d(2025, 1, 1),
            5.0,
        )
        .unwrap();
        assert_eq!(elected.name, "bob");
    }
}
