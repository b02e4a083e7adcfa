use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// A club's competition division, e.g. `"B"` or `"C"`.
pub type DivisionName = String;

/// A competition event within a division.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Ulid,
    pub name: String,
    /// Competitors one subteam may field at this event.
    pub max_competitors: u32,
    /// Self-scheduled events are exempt from conflict-group exclusion.
    #[serde(default)]
    pub self_scheduled: bool,
}

/// Events that run in the same time block. A member may hold at most one
/// non-self-scheduled event of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictGroup {
    pub id: Ulid,
    pub name: String,
    pub events: Vec<Ulid>,
}

/// Reference data for one division as delivered by a `DivisionSource`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivisionSpec {
    pub name: DivisionName,
    pub events: Vec<Event>,
    #[serde(default)]
    pub conflict_groups: Vec<ConflictGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Club {
    pub id: Ulid,
    pub name: String,
    pub division: DivisionName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: Ulid,
    pub name: String,
    /// `None` while unassigned.
    pub subteam_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subteam {
    pub id: Ulid,
    pub name: String,
    pub max_headcount: u32,
}

/// One member bound to one event under one subteam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment {
    pub member_id: Ulid,
    pub subteam_id: Ulid,
    pub event_id: Ulid,
}

impl Assignment {
    pub fn new(member_id: Ulid, subteam_id: Ulid, event_id: Ulid) -> Self {
        Self {
            member_id,
            subteam_id,
            event_id,
        }
    }
}

/// The WAL record types. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    MemberAdded {
        id: Ulid,
        name: String,
    },
    SubteamCreated {
        id: Ulid,
        name: String,
        max_headcount: u32,
    },
    SubteamRenamed {
        id: Ulid,
        name: String,
    },
    /// Members of the subteam become unassigned.
    SubteamDeleted {
        id: Ulid,
    },
    MemberMoved {
        member_id: Ulid,
        subteam_id: Option<Ulid>,
    },
    AssignmentCreated(Assignment),
    AssignmentRemoved {
        member_id: Ulid,
        event_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

/// An assignment whose subteam no longer matches the member's current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedAssignment {
    pub assignment: Assignment,
    pub current_subteam_id: Option<Ulid>,
}

/// Occupancy of one event for one subteam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSlots {
    pub event_id: Ulid,
    pub subteam_id: Ulid,
    pub occupied: u32,
    pub max_competitors: u32,
}

impl EventSlots {
    pub fn is_full(&self) -> bool {
        self.occupied >= self.max_competitors
    }
}
