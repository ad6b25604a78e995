//! Schedule lock file: a durable task → fixed (dates, resources) pin set.
//!
//! The data model and its JSON encoding live here; where the bytes are read from or
//! written to (a path, a blob store) is left to the collaborator.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;

pub const LOCK_FILE_VERSION: u32 = 1;

/// A single task's pinned dates and resource allocations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskLock {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(with = "resource_strings")]
    pub resources: Vec<(String, f64)>,
}

/// Version-tagged map of task id to its lock entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleLock {
    pub version: u32,
    pub locks: HashMap<String, TaskLock>,
}

impl ScheduleLock {
    pub fn new() -> Self {
        Self {
            version: LOCK_FILE_VERSION,
            locks: HashMap::new(),
        }
    }

    /// Build a lock from a list of fully-dated entries, skipping any with no computed
    /// dates (mirroring the reference writer's behaviour of omitting undated tasks).
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Option<NaiveDate>, Option<NaiveDate>, Vec<(String, f64)>)>,
    {
        let mut locks = HashMap::new();
        for (task_id, start, end, resources) in entries {
            if let (Some(start_date), Some(end_date)) = (start, end) {
                locks.insert(
                    task_id,
                    TaskLock {
                        start_date,
                        end_date,
                        resources,
                    },
                );
            }
        }
        Self {
            version: LOCK_FILE_VERSION,
            locks,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("ScheduleLock always serializes")
    }

    pub fn from_json(text: &str) -> Result<Self, ScheduleError> {
        let raw: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| ScheduleError::InvalidLockFile(format!("not valid JSON: {e}")))?;

        let obj = raw
            .as_object()
            .ok_or_else(|| ScheduleError::InvalidLockFile("root is not an object".into()))?;

        let version = obj
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| ScheduleError::InvalidLockFile("missing or non-integer version".into()))?;
        if version as u32 != LOCK_FILE_VERSION {
            return Err(ScheduleError::InvalidLockFile(format!(
                "unsupported lock file version {version}, expected {LOCK_FILE_VERSION}"
            )));
        }

        if !obj.get("locks").is_some_and(serde_json::Value::is_object) {
            return Err(ScheduleError::InvalidLockFile("'locks' is not an object".into()));
        }

        serde_json::from_value(raw)
            .map_err(|e| ScheduleError::InvalidLockFile(format!("malformed lock entry: {e}")))
    }
}

/// Serializes `(name, allocation)` pairs as `"name:allocation"` strings, tolerating
/// malformed allocations on read by defaulting to `1.0`.
mod resource_strings {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &[(String, f64)], s: S) -> Result<S::Ok, S::Error> {
        let strings: Vec<String> = value
            .iter()
            .map(|(name, allocation)| format!("{name}:{allocation}"))
            .collect();
        strings.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<(String, f64)>, D::Error> {
        let strings = Vec::<String>::deserialize(d)?;
        Ok(strings
            .into_iter()
            .map(|entry| match entry.split_once(':') {
                Some((name, allocation)) => {
                    let allocation = allocation.parse().unwrap_or(1.0);
                    (name.to_string(), allocation)
                }
                None => (entry, 1.0),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn round_trips_through_json() {
        let lock = ScheduleLock::from_entries([(
            "task-a".to_string(),
            Some(d(2025, 1, 1)),
            Some(d(2025, 1, 6)),
            vec![("alice".to_string(), 1.0)],
        )]);
        let json = lock.to_json();
        let back = ScheduleLock::from_json(&json).unwrap();
        assert_eq!(lock, back);
    }

    #[test]
    fn omits_undated_entries() {
        let lock = ScheduleLock::from_entries([("task-a".to_string(), None, None, vec![])]);
        assert!(lock.locks.is_empty());
    }

    #[test]
    fn rejects_version_mismatch() {
        let json = r#"{"version": 2, "locks": {}}"#;
        let err = ScheduleLock::from_json(json).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidLockFile(_)));
    }

    #[test]
    fn rejects_non_object_root() {
        let err = ScheduleLock::from_json("[]").unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidLockFile(_)));
    }

    #[test]
    fn malformed_allocation_defaults_to_one() {
        let json = r#"{"version":1,"locks":{"t":{"start_date":"2025-01-01","end_date":"2025-01-02","resources":["alice:oops"]}}}"#;
        let lock = ScheduleLock::from_json(json).unwrap();
        assert_eq!(lock.locks["t"].resources, vec![("alice".to_string(), 1.0)]);
    }
}
