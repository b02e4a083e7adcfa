use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub fn get_member(&self, id: Ulid) -> Result<Member, EngineError> {
        self.require_member(&id)
    }

    pub fn get_subteam(&self, id: Ulid) -> Result<Subteam, EngineError> {
        self.require_subteam(&id)
    }

    /// All members, sorted by name.
    pub fn list_members(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self.members.iter().map(|m| m.value().clone()).collect();
        members.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        members
    }

    /// All subteams, sorted by name.
    pub fn list_subteams(&self) -> Vec<Subteam> {
        let mut subteams: Vec<Subteam> = self.subteams.iter().map(|s| s.value().clone()).collect();
        subteams.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        subteams
    }

    pub fn subteam_members(&self, subteam_id: Ulid) -> Result<Vec<Member>, EngineError> {
        self.require_subteam(&subteam_id)?;
        Ok(self
            .list_members()
            .into_iter()
            .filter(|m| m.subteam_id == Some(subteam_id))
            .collect())
    }

    pub fn unassigned_members(&self) -> Vec<Member> {
        self.list_members()
            .into_iter()
            .filter(|m| m.subteam_id.is_none())
            .collect()
    }

    pub fn headcount(&self, subteam_id: Ulid) -> u32 {
        self.ledger.headcount(&subteam_id)
    }

    pub fn assignments_for_member(&self, member_id: Ulid) -> Vec<Assignment> {
        self.store.by_member(&member_id)
    }

    pub fn assignments_for_event(&self, event_id: Ulid) -> Vec<Assignment> {
        self.store.by_event(&event_id)
    }

    pub fn assignments_for_subteam(&self, subteam_id: Ulid) -> Vec<Assignment> {
        self.store.by_subteam(&subteam_id)
    }

    pub fn all_assignments(&self) -> Vec<Assignment> {
        self.store.all()
    }

    /// Slot usage of every division event for one subteam.
    pub fn event_slots(&self, subteam_id: Ulid) -> Result<Vec<EventSlots>, EngineError> {
        let division = self.division()?;
        self.require_subteam(&subteam_id)?;
        Ok(division
            .events()
            .map(|event| EventSlots {
                event_id: event.id,
                subteam_id,
                occupied: self.ledger.occupancy(&subteam_id, &event.id),
                max_competitors: event.max_competitors,
            })
            .collect())
    }

    /// Assignments whose subteam is no longer the member's current one,
    /// left behind by a move or a subteam deletion.
    pub fn orphaned_assignments(&self) -> Vec<OrphanedAssignment> {
        self.store
            .all()
            .into_iter()
            .filter_map(|assignment| {
                let current = self
                    .members
                    .get(&assignment.member_id)
                    .and_then(|m| m.subteam_id);
                (current != Some(assignment.subteam_id)).then_some(OrphanedAssignment {
                    assignment,
                    current_subteam_id: current,
                })
            })
            .collect()
    }
}
