//! Per-resource busy-interval schedule and resource configuration.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};

/// An inclusive `[start, end]` calendar-day interval during which a resource is busy
/// (either doing work or under a do-not-schedule restriction — the two are
/// indistinguishable once merged into the busy list).
pub type Interval = (NaiveDate, NaiveDate);

/// Sorted, non-overlapping busy-interval store for a single resource.
///
/// Two intervals separated by a gap of at most one day are merged into one, which is
/// what lets [`ResourceSchedule::calculate_completion_time`] skip a DNS period and a
/// directly-adjacent busy period as a single jump.
#[derive(Clone, Debug, Default)]
pub struct ResourceSchedule {
    busy: Vec<Interval>,
    cache: HashMap<(NaiveDate, u64), NaiveDate>,
}

impl ResourceSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schedule pre-seeded with a set of initial busy/DNS periods.
    pub fn with_periods(periods: impl IntoIterator<Item = Interval>) -> Self {
        let mut sched = Self::new();
        for (start, end) in periods {
            sched.add_busy_period(start, end);
        }
        sched
    }

    pub fn busy_periods(&self) -> &[Interval] {
        &self.busy
    }

    /// Insert a busy interval, merging with any overlapping or adjacent (gap ≤ 1 day)
    /// existing interval.
    pub fn add_busy_period(&mut self, start: NaiveDate, end: NaiveDate) {
        self.cache.clear();
        let idx = self.busy.partition_point(|(s, _)| *s < start);
        self.busy.insert(idx, (start, end));
        self.merge();
    }

    fn merge(&mut self) {
        if self.busy.is_empty() {
            return;
        }
        self.busy.sort_by_key(|iv| iv.0);
        let mut merged: Vec<Interval> = Vec::with_capacity(self.busy.len());
        let mut current = self.busy[0];
        for &(s, e) in &self.busy[1..] {
            if s <= current.1 + Duration::days(1) {
                if e > current.1 {
                    current.1 = e;
                }
            } else {
                merged.push(current);
                current = (s, e);
            }
        }
        merged.push(current);
        self.busy = merged;
    }

    fn interval_containing(&self, date: NaiveDate) -> Option<Interval> {
        self.busy
            .iter()
            .copied()
            .find(|(s, e)| *s <= date && date <= *e)
    }

    /// True iff `date` does not fall inside any busy interval.
    pub fn is_available_on(&self, date: NaiveDate) -> bool {
        self.interval_containing(date).is_none()
    }

    /// True iff no busy interval intersects `[start, start + duration_days]`.
    pub fn is_available(&self, start: NaiveDate, duration_days: f64) -> bool {
        let end = start + Duration::days(duration_days.max(0.0).ceil() as i64);
        self.busy.iter().all(|&(s, e)| s > end || e < start)
    }

    /// Earliest date ≥ `from` that is not inside a busy interval.
    pub fn next_available_time(&self, from: NaiveDate) -> NaiveDate {
        let mut cursor = from;
        while let Some((_, end)) = self.interval_containing(cursor) {
            cursor = end + Duration::days(1);
        }
        cursor
    }

    /// DNS-aware completion date: walk forward from `start`, skipping busy intervals,
    /// until `duration_days` working days have elapsed. Zero or negative duration
    /// (milestones) complete on `start` itself. Memoized per `(start, duration_days)`.
    pub fn calculate_completion_time(&mut self, start: NaiveDate, duration_days: f64) -> NaiveDate {
        if duration_days <= 0.0 {
            return start;
        }
        let key = (start, duration_days.to_bits());
        if let Some(&cached) = self.cache.get(&key) {
            return cached;
        }

        let mut cursor = start;
        let mut remaining = duration_days;
        while remaining > 0.0 {
            if let Some((_, end)) = self.interval_containing(cursor) {
                cursor = end + Duration::days(1);
                continue;
            }
            remaining -= 1.0;
            cursor += Duration::days(1);
        }

        self.cache.insert(key, cursor);
        cursor
    }
}

/// A named resource with its own do-not-schedule periods.
#[derive(Clone, Debug)]
pub struct ResourceDef {
    pub name: String,
    pub dns_periods: Vec<Interval>,
}

impl ResourceDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dns_periods: Vec::new(),
        }
    }
}

/// Resource roster: ordered resource list, named groups, and an optional default spec
/// applied to tasks that specify neither `resources` nor `resource_spec`.
#[derive(Clone, Debug, Default)]
pub struct ResourceConfig {
    pub resources: Vec<ResourceDef>,
    pub groups: HashMap<String, Vec<String>>,
    pub default_resource_spec: Option<String>,
    /// DNS periods applied on top of every resource's own DNS list (§3.2).
    pub global_dns_periods: Vec<Interval>,
}

impl ResourceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource_names(&self) -> Vec<String> {
        self.resources.iter().map(|r| r.name.clone()).collect()
    }

    pub fn find(&self, name: &str) -> Option<&ResourceDef> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Expand a resource spec string into a concrete, ordered candidate list.
    ///
    /// `"*"` → every configured resource, in configuration order. `"a|b|c"` → the
    /// listed names, in the order given. A name starting with `!` → every resource
    /// except the named one. A name matching a configured group → that group's
    /// members. Anything else → a singleton list containing the literal name.
    pub fn expand_resource_spec(&self, spec: &str) -> Vec<String> {
        if spec == "*" {
            return self.resource_names();
        }
        if spec.contains('|') {
            return spec.split('|').map(str::to_string).collect();
        }
        if let Some(excluded) = spec.strip_prefix('!') {
            return self
                .resource_names()
                .into_iter()
                .filter(|n| n != excluded)
                .collect();
        }
        if let Some(members) = self.groups.get(spec) {
            return members.clone();
        }
        vec![spec.to_string()]
    }

    /// Build a fresh [`ResourceSchedule`] for `name`, pre-seeded with that resource's own
    /// DNS periods plus the global DNS list.
    pub fn seeded_schedule(&self, name: &str) -> ResourceSchedule {
        let own_dns = self.find(name).map(|r| r.dns_periods.clone()).unwrap_or_default();
        ResourceSchedule::with_periods(own_dns.into_iter().chain(self.global_dns_periods.iter().copied()))
    }

    /// True if the given string should be treated as a resource spec (for
    /// auto-assignment) rather than a literal resource name.
    pub fn is_spec(&self, candidate: &str) -> bool {
        candidate == "*"
            || candidate.contains('|')
            || candidate.starts_with('!')
            || self.groups.contains_key(candidate)
    }
}
