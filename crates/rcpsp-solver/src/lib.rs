//! # rcpsp-solver
//!
//! Scheduling algorithms for the RCPSP engine: parallel SGS, bounded rollout, and an
//! optional CP-SAT model, plus the preprocessor and service orchestrator that tie them
//! to `rcpsp-core`'s data model (§4).

use std::collections::HashMap;
use std::collections::HashSet;

use chrono::NaiveDate;
use rcpsp_core::config::{AlgorithmType, PreProcessorType, SchedulingConfig};
use rcpsp_core::lock::ScheduleLock;
use rcpsp_core::resources::ResourceConfig;
use rcpsp_core::{PreProcessResult, ScheduleAnnotations, SchedulingResult, Task};
use tracing::info;

pub mod common;
#[cfg(feature = "cpsat")]
pub mod cpsat;
pub mod bounded_rollout;
pub mod error;
pub mod parallel_sgs;
pub mod preprocessor;

pub use error::SolverError;

/// Run one scheduling algorithm over an already-preprocessed task list.
///
/// `completed_without_dates` names tasks that satisfy dependents immediately (§4.C).
/// Returns the raw per-task placements plus any warnings the algorithm itself raised
/// (deadline violations, hint divergence); the service layer turns these into
/// [`ScheduleAnnotations`] and folds in its own warnings.
pub trait Scheduler {
    fn schedule(
        &self,
        tasks: &[Task],
        resource_config: &ResourceConfig,
        pre: &PreProcessResult,
        completed_without_dates: &HashSet<String>,
        base_date: NaiveDate,
        config: &SchedulingConfig,
    ) -> Result<(rcpsp_core::AlgorithmResult, Vec<String>), SolverError>;
}

struct ParallelSgs;
struct BoundedRollout;
#[cfg(feature = "cpsat")]
struct CpSat;

impl Scheduler for ParallelSgs {
    fn schedule(
        &self,
        tasks: &[Task],
        resource_config: &ResourceConfig,
        pre: &PreProcessResult,
        completed_without_dates: &HashSet<String>,
        base_date: NaiveDate,
        config: &SchedulingConfig,
    ) -> Result<(rcpsp_core::AlgorithmResult, Vec<String>), SolverError> {
        parallel_sgs::schedule(tasks, resource_config, pre, completed_without_dates, base_date, config)
    }
}

impl Scheduler for BoundedRollout {
    fn schedule(
        &self,
        tasks: &[Task],
        resource_config: &ResourceConfig,
        pre: &PreProcessResult,
        completed_without_dates: &HashSet<String>,
        base_date: NaiveDate,
        config: &SchedulingConfig,
    ) -> Result<(rcpsp_core::AlgorithmResult, Vec<String>), SolverError> {
        bounded_rollout::schedule(tasks, resource_config, pre, completed_without_dates, base_date, config)
    }
}

#[cfg(feature = "cpsat")]
impl Scheduler for CpSat {
    fn schedule(
        &self,
        tasks: &[Task],
        resource_config: &ResourceConfig,
        pre: &PreProcessResult,
        completed_without_dates: &HashSet<String>,
        base_date: NaiveDate,
        config: &SchedulingConfig,
    ) -> Result<(rcpsp_core::AlgorithmResult, Vec<String>), SolverError> {
        cpsat::schedule(tasks, resource_config, pre, completed_without_dates, base_date, config)
    }
}

/// Resolve a [`SchedulingConfig`]'s algorithm selection to a concrete [`Scheduler`].
pub fn create_algorithm(algorithm: AlgorithmType) -> Result<Box<dyn Scheduler>, SolverError> {
    match algorithm {
        AlgorithmType::ParallelSgs => Ok(Box::new(ParallelSgs)),
        AlgorithmType::BoundedRollout => Ok(Box::new(BoundedRollout)),
        AlgorithmType::CpSat => {
            #[cfg(feature = "cpsat")]
            {
                Ok(Box::new(CpSat))
            }
            #[cfg(not(feature = "cpsat"))]
            {
                Err(SolverError::UnknownStrategy("cp_sat (build with the `cpsat` feature to enable it)".into()))
            }
        }
    }
}

/// Apply a [`ScheduleLock`]'s pins onto a task list, fixing each locked task's dates
/// and resources and dropping any auto-assign spec (§4.H step 2).
pub fn apply_lock(tasks: Vec<Task>, lock: &ScheduleLock) -> Vec<Task> {
    tasks
        .into_iter()
        .map(|mut task| {
            if let Some(pin) = lock.locks.get(&task.id) {
                task.start_on = Some(pin.start_date);
                task.end_on = Some(pin.end_date);
                task.resources = pin.resources.clone();
                task.resource_spec = None;
            }
            task
        })
        .collect()
}

/// Orchestrates validation-to-annotation scheduling: preprocess, dispatch to the
/// configured algorithm, and assemble [`SchedulingResult`] (§4.H).
pub struct SchedulingService {
    pub resource_config: ResourceConfig,
    pub config: SchedulingConfig,
}

impl SchedulingService {
    pub fn new(resource_config: ResourceConfig, config: SchedulingConfig) -> Self {
        Self { resource_config, config }
    }

    /// Schedule `tasks`, given the set of entities completed without dates and which
    /// tasks had their resources computed (both produced by
    /// [`rcpsp_core::validator::SchedulerInputValidator::extract_tasks`]), plus an
    /// optional schedule lock to apply before dispatch.
    pub fn schedule(
        &self,
        tasks: Vec<Task>,
        completed_without_dates: &[String],
        resources_were_computed: &HashMap<String, bool>,
        lock: Option<&ScheduleLock>,
        base_date: NaiveDate,
    ) -> Result<SchedulingResult, SolverError> {
        info!(task_count = tasks.len(), algorithm = ?self.config.algorithm, "scheduling run started");

        let tasks = match lock {
            Some(lock) => apply_lock(tasks, lock),
            None => tasks,
        };
        let completed: HashSet<String> = completed_without_dates.iter().cloned().collect();

        let pre = match self.config.preprocessor {
            PreProcessorType::None => PreProcessResult::default(),
            PreProcessorType::BackwardPass => preprocessor::backward_pass(&tasks, self.config.default_priority)?,
            PreProcessorType::Auto => match self.config.algorithm {
                AlgorithmType::CpSat => PreProcessResult::default(),
                _ => preprocessor::backward_pass(&tasks, self.config.default_priority)?,
            },
        };

        let algorithm = create_algorithm(self.config.algorithm)?;
        let (result, mut warnings) =
            algorithm.schedule(&tasks, &self.resource_config, &pre, &completed, base_date, &self.config)?;

        for id in completed_without_dates {
            warnings.push(format!("task '{id}' was completed without recorded dates; treated as immediately satisfied"));
        }

        let task_map: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut annotations = HashMap::new();
        for scheduled in &result.scheduled_tasks {
            let Some(task) = task_map.get(scheduled.task_id.as_str()) else { continue };
            let computed_deadline = pre.computed_deadlines.get(&scheduled.task_id).copied();
            let deadline_violated = computed_deadline.is_some_and(|d| scheduled.end_date > d);
            annotations.insert(
                scheduled.task_id.clone(),
                ScheduleAnnotations {
                    estimated_start: Some(scheduled.start_date),
                    estimated_end: Some(scheduled.end_date),
                    computed_deadline,
                    computed_priority: pre.computed_priorities.get(&scheduled.task_id).copied(),
                    deadline_violated,
                    resource_assignments: scheduled.resources.iter().map(|name| (name.clone(), 1.0)).collect(),
                    resources_were_computed: resources_were_computed.get(&scheduled.task_id).copied().unwrap_or(false),
                    was_fixed: task.is_fixed(),
                },
            );
        }

        Ok(SchedulingResult {
            scheduled_tasks: result.scheduled_tasks,
            annotations,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcpsp_core::Dependency;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn service_runs_end_to_end() {
        let a = Task::new("A").duration(5.0).resource("r1");
        let b = Task::new("B").duration(3.0).resource("r1").depends_on(Dependency::new("A"));
        let service = SchedulingService::new(ResourceConfig::new(), SchedulingConfig::default());
        let result = service.schedule(vec![a, b], &[], &HashMap::new(), None, d(2025, 1, 1)).unwrap();
        assert_eq!(result.scheduled_tasks.len(), 2);
        assert!(result.annotations["A"].estimated_start.is_some());
        assert!(!result.annotations["A"].was_fixed);
    }

    #[test]
    fn completed_without_dates_produces_a_warning() {
        let a = Task::new("A").duration(5.0).resource("r1");
        let service = SchedulingService::new(ResourceConfig::new(), SchedulingConfig::default());
        let result = service.schedule(vec![a], &["done-task".to_string()], &HashMap::new(), None, d(2025, 1, 1)).unwrap();
        assert!(result.warnings.iter().any(|w| w.contains("done-task")));
    }

    #[test]
    fn lock_pins_task_before_dispatch() {
        let a = Task::new("A").duration(5.0).auto_assign("*");
        let mut rc = ResourceConfig::new();
        rc.resources.push(rcpsp_core::resources::ResourceDef::new("alice"));
        let lock = ScheduleLock::from_entries([(
            "A".to_string(),
            Some(d(2025, 3, 1)),
            Some(d(2025, 3, 5)),
            vec![("alice".to_string(), 1.0)],
        )]);
        let service = SchedulingService::new(rc, SchedulingConfig::default());
        let result = service.schedule(vec![a], &[], &HashMap::new(), Some(&lock), d(2025, 1, 1)).unwrap();
        let a_out = &result.scheduled_tasks[0];
        assert_eq!(a_out.start_date, d(2025, 3, 1));
        assert_eq!(a_out.resources, vec!["alice".to_string()]);
        assert!(result.annotations["A"].was_fixed);
    }

    #[test]
    fn unknown_cp_sat_without_feature_errors() {
        if cfg!(feature = "cpsat") {
            return;
        }
        let err = create_algorithm(AlgorithmType::CpSat).unwrap_err();
        assert!(matches!(err, SolverError::UnknownStrategy(_)));
    }
}
