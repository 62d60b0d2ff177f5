//! Projection of snapshots into completion events and differencing between polls.

use std::cmp::Ordering;
use std::collections::btree_set;
use std::collections::BTreeSet;

use crate::Snapshot;

/// Part number that marks a fully solved day.
pub const FULL_DAY_PART: &str = "2";

/// One member finishing one part of one day.
///
/// Ordering is member id, then day compared numerically (day 2 sorts before
/// day 10), then part. Non-numeric days sort after every numeric day.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompletionEvent {
    pub member_id: String,
    pub day: String,
    pub part: String,
}

impl CompletionEvent {
    pub fn new(member_id: impl Into<String>, day: impl Into<String>, part: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            day: day.into(),
            part: part.into(),
        }
    }

    pub fn is_full_day(&self) -> bool {
        self.part == FULL_DAY_PART
    }

    fn day_number(&self) -> u32 {
        self.day.parse().unwrap_or(u32::MAX)
    }
}

impl Ord for CompletionEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.member_id
            .cmp(&other.member_id)
            .then_with(|| self.day_number().cmp(&other.day_number()))
            .then_with(|| self.day.cmp(&other.day))
            .then_with(|| self.part.cmp(&other.part))
    }
}

impl PartialOrd for CompletionEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Deduplicated, ordered set of completion events derived from one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventSet(BTreeSet<CompletionEvent>);

impl EventSet {
    /// With `require_both` only part-2 events are kept; otherwise every part is.
    pub fn project(snapshot: &Snapshot, require_both: bool) -> Self {
        let events = snapshot
            .members
            .iter()
            .flat_map(|(member_id, member)| {
                member
                    .completion_day_level
                    .iter()
                    .flat_map(move |(day, parts)| {
                        parts
                            .keys()
                            .map(move |part| CompletionEvent::new(member_id.as_str(), day.as_str(), part.as_str()))
                    })
            })
            .filter(|event| !require_both || event.is_full_day())
            .collect();
        Self(events)
    }

    /// Events in `self` that `older` does not have, in notification order.
    pub fn newly_completed_since(&self, older: &EventSet) -> Vec<CompletionEvent> {
        self.0.difference(&older.0).cloned().collect()
    }

    pub fn contains(&self, event: &CompletionEvent) -> bool {
        self.0.contains(event)
    }

    pub fn is_superset(&self, other: &EventSet) -> bool {
        self.0.is_superset(&other.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_set::Iter<'_, CompletionEvent> {
        self.0.iter()
    }
}

impl FromIterator<CompletionEvent> for EventSet {
    fn from_iter<I: IntoIterator<Item = CompletionEvent>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What a poll found when comparing the cached and fresh event sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOutcome {
    NoChange,
    /// Events disappeared and nothing new arrived (stale board, year rollover).
    Regression,
    NewEvents(Vec<CompletionEvent>),
}

pub fn classify_diff(old: &EventSet, new: &EventSet) -> DiffOutcome {
    let diff = new.newly_completed_since(old);
    if !diff.is_empty() {
        DiffOutcome::NewEvents(diff)
    } else if old == new {
        DiffOutcome::NoChange
    } else {
        DiffOutcome::Regression
    }
}

/// True iff the member has a part-2 event for every day in `1..=total_days`.
pub fn has_completed_all(events: &EventSet, member_id: &str, total_days: u32) -> bool {
    (1..=total_days).all(|day| {
        events.contains(&CompletionEvent::new(member_id, day.to_string(), FULL_DAY_PART))
    })
}
