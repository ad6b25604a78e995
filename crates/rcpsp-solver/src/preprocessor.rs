//! Backward-pass preprocessor: topological sort, deadline propagation, priority
//! propagation (§4.D). One routine, shared by the standalone preprocessor and by each
//! algorithm's internal fallback when no [`PreProcessResult`] is supplied.

use std::collections::{HashMap, VecDeque};

use rcpsp_core::{compute_dependency_deadline, PreProcessResult, ScheduleError, Task};

/// Tasks in dependency order, with a precomputed predecessor-to-dependents map.
struct TopoSortResult {
    sorted_ids: Vec<String>,
    /// task id -> ids of tasks that depend on it (within the solve set)
    dependents: HashMap<String, Vec<String>>,
}

/// Order `tasks` so that every task appears after all of its in-solve-set
/// dependencies. Dependencies that point outside `tasks` (fixed or completed tasks)
/// are ignored for ordering purposes — they have no further backward propagation to
/// receive.
fn topological_sort(tasks: &HashMap<String, &Task>) -> Result<TopoSortResult, ScheduleError> {
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

    for id in tasks.keys() {
        in_degree.insert(id.clone(), 0);
        adjacency.insert(id.clone(), Vec::new());
        dependents.insert(id.clone(), Vec::new());
    }

    for (id, task) in tasks {
        for dep in &task.dependencies {
            if !tasks.contains_key(&dep.predecessor_id) {
                continue;
            }
            adjacency.get_mut(&dep.predecessor_id).unwrap().push(id.clone());
            dependents.get_mut(&dep.predecessor_id).unwrap().push(id.clone());
            *in_degree.get_mut(id).unwrap() += 1;
        }
    }

    let mut queue: VecDeque<String> = in_degree
        .iter()
        .filter(|&(_, &deg)| deg == 0)
        .map(|(id, _)| id.clone())
        .collect();
    let mut sorted_ids = Vec::with_capacity(tasks.len());

    while let Some(id) = queue.pop_front() {
        sorted_ids.push(id.clone());
        for successor in &adjacency[&id] {
            let deg = in_degree.get_mut(successor).unwrap();
            *deg -= 1;
            if *deg == 0 {
                queue.push_back(successor.clone());
            }
        }
    }

    if sorted_ids.len() != tasks.len() {
        let remaining: Vec<String> = tasks
            .keys()
            .filter(|id| !sorted_ids.contains(id))
            .cloned()
            .collect();
        return Err(ScheduleError::CycleDetected(remaining));
    }

    Ok(TopoSortResult { sorted_ids, dependents })
}

/// Run the backward pass over `tasks`, producing computed deadlines (only for tasks
/// reachable from an explicit `end_before`) and computed priorities (for every task).
pub fn backward_pass(tasks: &[Task], default_priority: i32) -> Result<PreProcessResult, ScheduleError> {
    let task_map: HashMap<String, &Task> = tasks.iter().map(|t| (t.id.clone(), t)).collect();
    let topo = topological_sort(&task_map)?;

    let mut computed_deadlines: HashMap<String, chrono::NaiveDate> = HashMap::new();
    let mut computed_priorities: HashMap<String, i32> = HashMap::new();

    for task in tasks {
        computed_priorities.insert(task.id.clone(), task.effective_priority(default_priority));
        if let Some(deadline) = task.end_before {
            computed_deadlines.insert(task.id.clone(), deadline);
        }
    }

    // Process in reverse topological order so a task's own (possibly inherited)
    // deadline and priority are final before it propagates to its dependencies.
    for id in topo.sorted_ids.iter().rev() {
        let task = task_map[id];
        let task_priority = computed_priorities[id];
        let task_deadline = computed_deadlines.get(id).copied();

        for dep in &task.dependencies {
            if !task_map.contains_key(&dep.predecessor_id) {
                continue;
            }

            let pred_priority = computed_priorities.entry(dep.predecessor_id.clone()).or_insert(task_priority);
            *pred_priority = (*pred_priority).max(task_priority);

            if let Some(deadline) = task_deadline {
                let inherited = compute_dependency_deadline(deadline, task.duration_days, dep.lag_days);
                computed_deadlines
                    .entry(dep.predecessor_id.clone())
                    .and_modify(|existing| *existing = (*existing).min(inherited))
                    .or_insert(inherited);
            }
        }
    }

    // `dependents` is computed for potential future use by callers that need forward
    // adjacency without recomputing it; unused here but kept to avoid a second pass
    // when algorithms need successor lookups.
    let _ = &topo.dependents;

    Ok(PreProcessResult {
        computed_deadlines,
        computed_priorities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rcpsp_core::Dependency;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn priority_propagates_through_chain() {
        // S6: A(pri=40) -> B(pri=40) -> C(pri=90)
        let a = Task::new("A").duration(5.0).priority(40);
        let b = Task::new("B").duration(5.0).priority(40).depends_on(Dependency::new("A"));
        let c = Task::new("C").duration(5.0).priority(90).depends_on(Dependency::new("B"));
        let result = backward_pass(&[a, b, c], 50).unwrap();
        assert_eq!(result.computed_priorities["A"], 90);
        assert_eq!(result.computed_priorities["B"], 90);
        assert_eq!(result.computed_priorities["C"], 90);
    }

    #[test]
    fn deadline_propagates_with_lag() {
        // S7-shaped: B depends on A with 7-day lag, B has an explicit deadline.
        let a = Task::new("A").duration(5.0);
        let b = Task::new("B")
            .duration(5.0)
            .depends_on(Dependency::with_lag("A", 7.0))
            .end_before(d(2025, 1, 20));
        let result = backward_pass(&[a, b], 50).unwrap();
        assert_eq!(result.computed_deadlines["A"], d(2025, 1, 8));
    }

    #[test]
    fn no_deadlines_leaves_defaults_untouched() {
        let a = Task::new("A").duration(5.0);
        let b = Task::new("B").duration(5.0).depends_on(Dependency::new("A"));
        let result = backward_pass(&[a, b], 50).unwrap();
        assert!(result.computed_deadlines.is_empty());
        assert_eq!(result.computed_priorities["A"], 50);
        assert_eq!(result.computed_priorities["B"], 50);
    }

    #[test]
    fn cycle_is_detected() {
        let a = Task::new("A").duration(1.0).depends_on(Dependency::new("B"));
        let b = Task::new("B").duration(1.0).depends_on(Dependency::new("A"));
        let err = backward_pass(&[a, b], 50).unwrap_err();
        assert!(matches!(err, ScheduleError::CycleDetected(_)));
    }

    #[test]
    fn deadline_takes_minimum_across_multiple_successors() {
        let a = Task::new("A").duration(5.0);
        let b = Task::new("B").duration(3.0).depends_on(Dependency::new("A")).end_before(d(2025, 1, 20));
        let c = Task::new("C").duration(1.0).depends_on(Dependency::new("A")).end_before(d(2025, 1, 10));
        let result = backward_pass(&[a, b, c], 50).unwrap();
        // via C: 01-10 - 1 day = 01-09; via B: 01-20 - 3 days = 01-17. Min is via C.
        assert_eq!(result.computed_deadlines["A"], d(2025, 1, 9));
    }
}
