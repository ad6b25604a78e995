//! Converts raw, loosely-typed entity input into canonical [`Task`] records (§4.C).
//!
//! This is the one place in the crate that still deals with unstructured metadata —
//! everything downstream of [`SchedulerInputValidator::extract_tasks`] works with the
//! strongly-typed [`Task`].

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::calendar;
use crate::config::TimeframeConstraintMode;
use crate::resources::ResourceConfig;
use crate::{Dependency, Task};

/// Raw per-entity metadata as received from an external feature map, before
/// normalization. `meta` carries any fields the validator doesn't have a dedicated
/// slot for — today, just `priority`.
#[derive(Clone, Debug, Default)]
pub struct RawEntityInput {
    pub id: String,
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub effort: Option<String>,
    pub resources: Vec<String>,
    pub dependencies: Vec<(String, f64)>,
    pub start_after: Option<NaiveDate>,
    pub end_before: Option<NaiveDate>,
    pub timeframe: Option<String>,
    pub meta: HashMap<String, serde_json::Value>,
}

impl RawEntityInput {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// Result of converting one raw entity: either a task, or a reason it was excluded.
pub enum EntityOutcome {
    Task { task: Task, resources_were_computed: bool },
    CompletedWithoutDates,
}

pub struct SchedulerInputValidator {
    pub resource_config: ResourceConfig,
    pub timeframe_mode: TimeframeConstraintMode,
    pub fiscal_year_start: u32,
}

impl SchedulerInputValidator {
    pub fn new(resource_config: ResourceConfig) -> Self {
        Self {
            resource_config,
            timeframe_mode: TimeframeConstraintMode::Both,
            fiscal_year_start: 1,
        }
    }

    /// Classify a raw `resources` list into a concrete `(name, allocation)` list or a
    /// spec string for auto-assignment.
    fn parse_resources(&self, raw: &[String]) -> (Vec<(String, f64)>, Option<String>) {
        if raw.len() == 1 && self.resource_config.is_spec(&raw[0]) {
            return (Vec::new(), Some(raw[0].clone()));
        }
        let parsed = raw
            .iter()
            .map(|entry| match entry.split_once(':') {
                Some((name, allocation)) => {
                    let allocation = allocation.parse().unwrap_or(1.0);
                    (name.to_string(), allocation)
                }
                None => (entry.clone(), 1.0),
            })
            .collect();
        (parsed, None)
    }

    /// Convert one raw entity into a [`Task`], or report it as completed-without-dates.
    pub fn entity_to_task(&self, raw: RawEntityInput) -> EntityOutcome {
        let is_done = raw.status.as_deref() == Some("done");
        if is_done && raw.start_date.is_none() && raw.end_date.is_none() {
            return EntityOutcome::CompletedWithoutDates;
        }

        let (mut resources, mut resource_spec) = self.parse_resources(&raw.resources);
        let mut resources_were_computed = false;
        if resources.is_empty() && resource_spec.is_none() {
            if let Some(default_spec) = &self.resource_config.default_resource_spec {
                resources_were_computed = true;
                if self.resource_config.is_spec(default_spec) {
                    resource_spec = Some(default_spec.clone());
                } else {
                    resources = vec![(default_spec.clone(), 1.0)];
                }
            }
        } else if resource_spec.is_some() {
            resources_were_computed = true;
        }

        let duration_days = match (raw.start_date, raw.end_date) {
            (Some(start), Some(end)) => (end - start).num_days() as f64,
            _ => {
                let effort_days = raw
                    .effort
                    .as_deref()
                    .map(calendar::parse_effort)
                    .unwrap_or(7.0);
                let total_capacity = if resource_spec.is_some() {
                    1.0
                } else {
                    let sum: f64 = resources.iter().map(|(_, allocation)| allocation).sum();
                    if sum > 0.0 {
                        sum
                    } else {
                        1.0
                    }
                };
                effort_days / total_capacity
            }
        };

        let mut start_after = raw.start_after;
        let mut end_before = raw.end_before;
        if start_after.is_none() && end_before.is_none() {
            if let Some(timeframe) = &raw.timeframe {
                if let Some((start, end)) = calendar::parse_timeframe(timeframe, self.fiscal_year_start) {
                    match self.timeframe_mode {
                        TimeframeConstraintMode::Both => {
                            start_after = Some(start);
                            end_before = Some(end);
                        }
                        TimeframeConstraintMode::Start => start_after = Some(start),
                        TimeframeConstraintMode::End => end_before = Some(end),
                        TimeframeConstraintMode::None => {}
                    }
                }
            }
        }

        let priority = raw
            .meta
            .get("priority")
            .and_then(serde_json::Value::as_i64)
            .map(|v| v as i32);

        let dependencies = raw
            .dependencies
            .into_iter()
            .map(|(pred, lag)| Dependency::with_lag(pred, lag))
            .collect();

        let mut task = Task::new(raw.id).duration(duration_days);
        task.start_after = start_after;
        task.end_before = end_before;
        task.resources = resources;
        task.resource_spec = resource_spec;
        task.dependencies = dependencies;
        task.start_on = raw.start_date;
        task.end_on = raw.end_date;
        task.priority = priority;

        EntityOutcome::Task {
            task,
            resources_were_computed,
        }
    }

    /// Bulk-convert a list of raw entities, returning tasks, the set of completed
    /// entities excluded for lacking dates, and which tasks had resources computed.
    pub fn extract_tasks(
        &self,
        raws: Vec<RawEntityInput>,
    ) -> (Vec<Task>, Vec<String>, HashMap<String, bool>) {
        let mut tasks = Vec::new();
        let mut done_without_dates = Vec::new();
        let mut resources_computed = HashMap::new();

        for raw in raws {
            let id = raw.id.clone();
            match self.entity_to_task(raw) {
                EntityOutcome::Task { task, resources_were_computed } => {
                    resources_computed.insert(id, resources_were_computed);
                    tasks.push(task);
                }
                EntityOutcome::CompletedWithoutDates => {
                    done_without_dates.push(id);
                }
            }
        }

        (tasks, done_without_dates, resources_computed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn validator() -> SchedulerInputValidator {
        SchedulerInputValidator::new(ResourceConfig::new())
    }

    #[test]
    fn duration_from_dates_takes_precedence_over_effort() {
        let raw = RawEntityInput {
            start_date: Some(d(2025, 1, 1)),
            end_date: Some(d(2025, 1, 6)),
            effort: Some("99d".into()),
            ..RawEntityInput::new("t")
        };
        let EntityOutcome::Task { task, .. } = validator().entity_to_task(raw) else {
            panic!("expected task");
        };
        assert_eq!(task.duration_days, 5.0);
    }

    #[test]
    fn effort_divided_by_resource_allocation() {
        let raw = RawEntityInput {
            effort: Some("10d".into()),
            resources: vec!["alice:0.5".into()],
            ..RawEntityInput::new("t")
        };
        let EntityOutcome::Task { task, .. } = validator().entity_to_task(raw) else {
            panic!("expected task");
        };
        assert_eq!(task.duration_days, 20.0);
        assert_eq!(task.resources, vec![("alice".to_string(), 0.5)]);
    }

    #[test]
    fn done_without_dates_is_excluded() {
        let raw = RawEntityInput {
            status: Some("done".into()),
            ..RawEntityInput::new("t")
        };
        assert!(matches!(
            validator().entity_to_task(raw),
            EntityOutcome::CompletedWithoutDates
        ));
    }

    #[test]
    fn done_with_dates_becomes_fixed_task() {
        let raw = RawEntityInput {
            status: Some("done".into()),
            start_date: Some(d(2025, 1, 1)),
            end_date: Some(d(2025, 1, 3)),
            ..RawEntityInput::new("t")
        };
        let EntityOutcome::Task { task, .. } = validator().entity_to_task(raw) else {
            panic!("expected task");
        };
        assert!(task.is_fixed());
    }

    #[test]
    fn single_wildcard_resource_becomes_spec() {
        let raw = RawEntityInput {
            resources: vec!["*".into()],
            ..RawEntityInput::new("t")
        };
        let EntityOutcome::Task { task, resources_were_computed } = validator().entity_to_task(raw) else {
            panic!("expected task");
        };
        assert_eq!(task.resource_spec, Some("*".to_string()));
        assert!(resources_were_computed);
    }

    #[test]
    fn priority_read_from_meta() {
        let mut meta = HashMap::new();
        meta.insert("priority".to_string(), serde_json::json!(90));
        let raw = RawEntityInput {
            meta,
            ..RawEntityInput::new("t")
        };
        let EntityOutcome::Task { task, .. } = validator().entity_to_task(raw) else {
            panic!("expected task");
        };
        assert_eq!(task.priority, Some(90));
    }
}
