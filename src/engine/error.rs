use ulid::Ulid;

/// The entity a `NotFound` or `AlreadyExists` refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Member(Ulid),
    Subteam(Ulid),
    Event(Ulid),
    Division(String),
    Assignment { member_id: Ulid, event_id: Ulid },
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Member(id) => write!(f, "member {id}"),
            Target::Subteam(id) => write!(f, "subteam {id}"),
            Target::Event(id) => write!(f, "event {id}"),
            Target::Division(name) => write!(f, "division {name}"),
            Target::Assignment { member_id, event_id } => {
                write!(f, "assignment of member {member_id} to event {event_id}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed division reference data. Fatal for that division.
    Config(String),
    NotFound(Target),
    AlreadyExists(Target),
    /// The store already holds this `(member, event)` pair.
    DuplicateAssignment { member_id: Ulid, event_id: Ulid },
    AlreadyAssigned { member_id: Ulid, event_id: Ulid },
    CapacityExceeded {
        subteam_id: Ulid,
        event_id: Ulid,
        max: u32,
    },
    ConflictExcluded {
        member_id: Ulid,
        event_id: Ulid,
        conflicts_with: Ulid,
        conflicts_with_name: String,
        group: String,
    },
    HeadcountExceeded { subteam_id: Ulid, max: u32 },
    /// The member is not on the subteam named in the request.
    CrossSubteamMismatch {
        member_id: Ulid,
        subteam_id: Ulid,
        actual: Option<Ulid>,
    },
    /// A member or subteam name that is blank.
    InvalidName(&'static str),
    /// Lock acquisition timed out; nothing was changed.
    Busy,
    /// Ledger and store disagree. Indicates a bug, never a user error.
    InvariantViolation(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// True for conditions the caller caused and can act on. False for
    /// systemic faults (bad configuration, broken invariants, I/O).
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            EngineError::Config(_) | EngineError::InvariantViolation(_) | EngineError::WalError(_)
        )
    }

    /// Short, stable label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "config",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::DuplicateAssignment { .. } => "duplicate_assignment",
            EngineError::AlreadyAssigned { .. } => "already_assigned",
            EngineError::CapacityExceeded { .. } => "capacity_exceeded",
            EngineError::ConflictExcluded { .. } => "conflict_excluded",
            EngineError::HeadcountExceeded { .. } => "headcount_exceeded",
            EngineError::CrossSubteamMismatch { .. } => "cross_subteam_mismatch",
            EngineError::InvalidName(_) => "invalid_name",
            EngineError::Busy => "busy",
            EngineError::InvariantViolation(_) => "invariant_violation",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Config(msg) => write!(f, "invalid division configuration: {msg}"),
            EngineError::NotFound(target) => write!(f, "not found: {target}"),
            EngineError::AlreadyExists(target) => write!(f, "already exists: {target}"),
            EngineError::DuplicateAssignment { member_id, event_id } => {
                write!(f, "duplicate assignment: member {member_id} already holds event {event_id}")
            }
            EngineError::AlreadyAssigned { member_id, event_id } => {
                write!(f, "member {member_id} is already assigned to event {event_id}")
            }
            EngineError::CapacityExceeded { subteam_id, event_id, max } => {
                write!(f, "event {event_id} is full for subteam {subteam_id} ({max} competitors)")
            }
            EngineError::ConflictExcluded {
                member_id,
                event_id,
                conflicts_with_name,
                group,
                ..
            } => write!(
                f,
                "member {member_id} cannot take event {event_id}: conflicts with {conflicts_with_name} ({group})"
            ),
            EngineError::HeadcountExceeded { subteam_id, max } => {
                write!(f, "subteam {subteam_id} is full ({max} members)")
            }
            EngineError::CrossSubteamMismatch {
                member_id,
                subteam_id,
                actual,
            } => match actual {
                Some(actual) => write!(
                    f,
                    "member {member_id} is on subteam {actual}, not {subteam_id}"
                ),
                None => write!(f, "member {member_id} is not on any subteam, not {subteam_id}"),
            },
            EngineError::InvalidName(msg) => write!(f, "invalid name: {msg}"),
            EngineError::Busy => write!(f, "busy: timed out waiting for a roster lock"),
            EngineError::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
