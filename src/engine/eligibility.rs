use std::collections::HashSet;

use ulid::Ulid;

use crate::catalog::Division;
use crate::model::*;

use super::{Engine, EngineError};

fn count_query(query: &'static str) {
    metrics::counter!(crate::observability::ELIGIBILITY_QUERIES_TOTAL, "query" => query)
        .increment(1);
}

impl Engine {
    /// Events `member_id` could still join under `subteam_id`: not already
    /// held, not full for that subteam, and not in conflict with anything the
    /// member holds. Recomputed from live state on every call; the order
    /// follows the division's event list. A member who is not on
    /// `subteam_id` gets `CrossSubteamMismatch`, as an assignment would.
    pub fn eligible_events_for_member(
        &self,
        member_id: Ulid,
        subteam_id: Ulid,
    ) -> Result<Vec<Event>, EngineError> {
        count_query("events_for_member");
        let division = self.division()?;
        let member = self.require_member(&member_id)?;
        self.require_subteam(&subteam_id)?;
        if member.subteam_id != Some(subteam_id) {
            return Err(EngineError::CrossSubteamMismatch {
                member_id,
                subteam_id,
                actual: member.subteam_id,
            });
        }

        let held = self.store.events_of_member(&member_id);
        let mut excluded: HashSet<Ulid> = held.clone();
        for event_id in &held {
            excluded.extend(division.conflicts.partners(event_id).copied());
        }

        Ok(division
            .events()
            .filter(|event| !excluded.contains(&event.id))
            .filter(|event| self.ledger.occupancy(&subteam_id, &event.id) < event.max_competitors)
            .cloned()
            .collect())
    }

    /// Members of `subteam_id` who could join `event_id`: not already on it
    /// and holding none of its conflict partners. Capacity is not considered.
    pub fn eligible_members_for_event(
        &self,
        event_id: Ulid,
        subteam_id: Ulid,
    ) -> Result<Vec<Member>, EngineError> {
        count_query("members_for_event");
        let division = self.division()?;
        division.require_event(&event_id)?;
        self.require_subteam(&subteam_id)?;

        let partners: Vec<Ulid> = division.conflicts.partners(&event_id).copied().collect();
        let mut eligible: Vec<Member> = self
            .members
            .iter()
            .filter(|m| m.subteam_id == Some(subteam_id))
            .filter(|m| !self.store.contains(&m.id, &event_id))
            .filter(|m| partners.iter().all(|p| !self.store.contains(&m.id, p)))
            .map(|m| m.value().clone())
            .collect();
        eligible.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(eligible)
    }

    /// Check that assigning `member_id` to `event_id` under `subteam_id`
    /// would be legal right now.
    pub fn validate_assignment(
        &self,
        member_id: Ulid,
        subteam_id: Ulid,
        event_id: Ulid,
    ) -> Result<(), EngineError> {
        count_query("validate_assignment");
        let division = self.division()?;
        let event = division.require_event(&event_id)?;
        self.check_assignment(&division, member_id, subteam_id, event)
    }

    /// Check that moving `member_id` to `subteam_id` (or to no subteam)
    /// would be legal right now.
    pub fn validate_move(&self, member_id: Ulid, subteam_id: Option<Ulid>) -> Result<(), EngineError> {
        count_query("validate_move");
        let member = self.require_member(&member_id)?;
        let Some(target) = subteam_id else {
            return Ok(());
        };
        let subteam = self.require_subteam(&target)?;
        if member.subteam_id == Some(target) {
            return Ok(());
        }
        if self.ledger.headcount(&target) >= subteam.max_headcount {
            return Err(EngineError::HeadcountExceeded {
                subteam_id: target,
                max: subteam.max_headcount,
            });
        }
        Ok(())
    }

    /// Events a member holding `event_id` could not also hold.
    pub fn conflicts_for_event(&self, event_id: Ulid) -> Result<Vec<Event>, EngineError> {
        let division = self.division()?;
        division.require_event(&event_id)?;
        Ok(division
            .events()
            .filter(|e| division.conflicts.has_conflict(&event_id, &e.id))
            .cloned()
            .collect())
    }

    /// The legality checks shared by `validate_assignment` and the
    /// coordinator. The coordinator calls this with the member and slot locks
    /// held, so the answer stays true until it commits.
    pub(super) fn check_assignment(
        &self,
        division: &Division,
        member_id: Ulid,
        subteam_id: Ulid,
        event: &Event,
    ) -> Result<(), EngineError> {
        let member = self.require_member(&member_id)?;
        self.require_subteam(&subteam_id)?;

        if member.subteam_id != Some(subteam_id) {
            return Err(EngineError::CrossSubteamMismatch {
                member_id,
                subteam_id,
                actual: member.subteam_id,
            });
        }

        let held = self.store.events_of_member(&member_id);
        if held.contains(&event.id) {
            return Err(EngineError::AlreadyAssigned {
                member_id,
                event_id: event.id,
            });
        }

        if let Some(clash) = division
            .conflicts
            .partners(&event.id)
            .find(|partner| held.contains(*partner))
        {
            let clash_name = division
                .event(clash)
                .map(|e| e.name.clone())
                .unwrap_or_else(|| clash.to_string());
            let group = division
                .conflicts
                .group_of(&event.id)
                .map(|g| g.name.clone())
                .unwrap_or_default();
            return Err(EngineError::ConflictExcluded {
                member_id,
                event_id: event.id,
                conflicts_with: *clash,
                conflicts_with_name: clash_name,
                group,
            });
        }

        if self.ledger.occupancy(&subteam_id, &event.id) >= event.max_competitors {
            return Err(EngineError::CapacityExceeded {
                subteam_id,
                event_id: event.id,
                max: event.max_competitors,
            });
        }
        Ok(())
    }
}
