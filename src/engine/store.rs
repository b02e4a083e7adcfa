use std::collections::HashSet;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::model::*;

use super::{EngineError, Target};

/// The roster assignment relation, keyed by `(member, event)`, with
/// secondary indices by member, event and subteam. No business rules.
pub struct AssignmentStore {
    rows: DashMap<(Ulid, Ulid), Assignment>,
    by_member: DashMap<Ulid, HashSet<Ulid>>,
    by_event: DashMap<Ulid, HashSet<Ulid>>,
    by_subteam: DashMap<Ulid, HashSet<(Ulid, Ulid)>>,
}

impl Default for AssignmentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn unindex<K: std::hash::Hash + Eq, V: std::hash::Hash + Eq>(
    index: &DashMap<K, HashSet<V>>,
    key: &K,
    value: &V,
) {
    if let Some(mut set) = index.get_mut(key) {
        set.remove(value);
    }
    index.remove_if(key, |_, set| set.is_empty());
}

impl AssignmentStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            by_member: DashMap::new(),
            by_event: DashMap::new(),
            by_subteam: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, member_id: &Ulid, event_id: &Ulid) -> bool {
        self.rows.contains_key(&(*member_id, *event_id))
    }

    pub fn get(&self, member_id: &Ulid, event_id: &Ulid) -> Option<Assignment> {
        self.rows.get(&(*member_id, *event_id)).map(|r| *r.value())
    }

    pub fn insert(&self, assignment: Assignment) -> Result<(), EngineError> {
        let Assignment {
            member_id,
            subteam_id,
            event_id,
        } = assignment;
        match self.rows.entry((member_id, event_id)) {
            Entry::Occupied(_) => {
                return Err(EngineError::DuplicateAssignment { member_id, event_id });
            }
            Entry::Vacant(v) => {
                v.insert(assignment);
            }
        }
        self.by_member.entry(member_id).or_default().insert(event_id);
        self.by_event.entry(event_id).or_default().insert(member_id);
        self.by_subteam
            .entry(subteam_id)
            .or_default()
            .insert((member_id, event_id));
        Ok(())
    }

    pub fn delete(&self, member_id: Ulid, event_id: Ulid) -> Result<Assignment, EngineError> {
        let (_, assignment) = self
            .rows
            .remove(&(member_id, event_id))
            .ok_or(EngineError::NotFound(Target::Assignment { member_id, event_id }))?;
        unindex(&self.by_member, &member_id, &event_id);
        unindex(&self.by_event, &event_id, &member_id);
        unindex(&self.by_subteam, &assignment.subteam_id, &(member_id, event_id));
        Ok(assignment)
    }

    /// Event ids held by a member, under any subteam.
    pub fn events_of_member(&self, member_id: &Ulid) -> HashSet<Ulid> {
        self.by_member
            .get(member_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn by_member(&self, member_id: &Ulid) -> Vec<Assignment> {
        self.events_of_member(member_id)
            .into_iter()
            .filter_map(|event_id| self.get(member_id, &event_id))
            .collect()
    }

    pub fn by_event(&self, event_id: &Ulid) -> Vec<Assignment> {
        let members = self
            .by_event
            .get(event_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        members
            .into_iter()
            .filter_map(|member_id| self.get(&member_id, event_id))
            .collect()
    }

    pub fn by_subteam(&self, subteam_id: &Ulid) -> Vec<Assignment> {
        let keys = self
            .by_subteam
            .get(subteam_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        keys.into_iter()
            .filter_map(|(member_id, event_id)| self.get(&member_id, &event_id))
            .collect()
    }

    pub fn all(&self) -> Vec<Assignment> {
        self.rows.iter().map(|r| *r.value()).collect()
    }
}
