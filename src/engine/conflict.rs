use std::collections::{HashMap, HashSet};

use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Conflict-group lookups for one division. Immutable after `build`;
/// configuration changes produce a new index.
#[derive(Debug, Clone, Default)]
pub struct ConflictIndex {
    /// event → index into `groups`
    group_of: HashMap<Ulid, usize>,
    groups: Vec<ConflictGroup>,
    /// Per event: the other non-self-scheduled events of its group.
    partners: HashMap<Ulid, HashSet<Ulid>>,
    self_scheduled: HashSet<Ulid>,
}

impl ConflictIndex {
    /// Build the index. Every group event must be one of `events`, and no
    /// event may sit in two groups.
    pub fn build(events: &[Event], groups: &[ConflictGroup]) -> Result<Self, EngineError> {
        let known: HashSet<Ulid> = events.iter().map(|e| e.id).collect();
        let self_scheduled: HashSet<Ulid> = events
            .iter()
            .filter(|e| e.self_scheduled)
            .map(|e| e.id)
            .collect();

        let mut group_of = HashMap::new();
        for (idx, group) in groups.iter().enumerate() {
            let mut seen = HashSet::new();
            for event_id in &group.events {
                if !known.contains(event_id) {
                    return Err(EngineError::Config(format!(
                        "conflict group {} references unknown event {event_id}",
                        group.name
                    )));
                }
                if !seen.insert(*event_id) {
                    return Err(EngineError::Config(format!(
                        "conflict group {} lists event {event_id} twice",
                        group.name
                    )));
                }
                if let Some(prev) = group_of.insert(*event_id, idx) {
                    return Err(EngineError::Config(format!(
                        "event {event_id} belongs to both {} and {}",
                        groups[prev].name, group.name
                    )));
                }
            }
        }

        let mut partners = HashMap::new();
        for group in groups {
            for event_id in &group.events {
                if self_scheduled.contains(event_id) {
                    continue;
                }
                let others: HashSet<Ulid> = group
                    .events
                    .iter()
                    .filter(|other| *other != event_id && !self_scheduled.contains(*other))
                    .copied()
                    .collect();
                partners.insert(*event_id, others);
            }
        }

        Ok(Self {
            group_of,
            groups: groups.to_vec(),
            partners,
            self_scheduled,
        })
    }

    /// Other events a member holding `event_id` may not also hold. Empty for
    /// self-scheduled and ungrouped events.
    pub fn conflicts_of(&self, event_id: &Ulid) -> HashSet<Ulid> {
        self.partners.get(event_id).cloned().unwrap_or_default()
    }

    /// Borrowing form of `conflicts_of` for hot paths.
    pub fn partners(&self, event_id: &Ulid) -> impl Iterator<Item = &Ulid> {
        self.partners.get(event_id).into_iter().flatten()
    }

    pub fn has_conflict(&self, a: &Ulid, b: &Ulid) -> bool {
        if a == b || self.self_scheduled.contains(a) || self.self_scheduled.contains(b) {
            return false;
        }
        match (self.group_of.get(a), self.group_of.get(b)) {
            (Some(ga), Some(gb)) => ga == gb,
            _ => false,
        }
    }

    pub fn group_of(&self, event_id: &Ulid) -> Option<&ConflictGroup> {
        self.group_of.get(event_id).map(|&idx| &self.groups[idx])
    }

    pub fn groups(&self) -> &[ConflictGroup] {
        &self.groups
    }

    pub fn is_self_scheduled(&self, event_id: &Ulid) -> bool {
        self.self_scheduled.contains(event_id)
    }
}
