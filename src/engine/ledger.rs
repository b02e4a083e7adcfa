use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use super::EngineError;

/// Live occupancy counters: one per (subteam, event) pair and one per
/// subteam headcount. Each check-and-increment happens under the DashMap
/// shard lock for that key, so it is atomic on its own; keeping the ledger
/// in step with the store is the coordinator's job.
pub struct CapacityLedger {
    slots: DashMap<(Ulid, Ulid), u32>,
    headcount: DashMap<Ulid, u32>,
}

impl Default for CapacityLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn underflow(what: String) -> EngineError {
    tracing::error!("capacity ledger underflow: {what}");
    metrics::counter!(crate::observability::INVARIANT_VIOLATIONS_TOTAL).increment(1);
    EngineError::InvariantViolation(format!("ledger underflow: {what}"))
}

impl CapacityLedger {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            headcount: DashMap::new(),
        }
    }

    // ── Event slots ──────────────────────────────────────────

    pub fn occupancy(&self, subteam_id: &Ulid, event_id: &Ulid) -> u32 {
        self.slots
            .get(&(*subteam_id, *event_id))
            .map(|c| *c)
            .unwrap_or(0)
    }

    /// Take one slot iff fewer than `max` are taken. Returns the new occupancy.
    pub fn reserve(&self, subteam_id: Ulid, event_id: Ulid, max: u32) -> Result<u32, EngineError> {
        let full = EngineError::CapacityExceeded {
            subteam_id,
            event_id,
            max,
        };
        match self.slots.entry((subteam_id, event_id)) {
            Entry::Occupied(mut o) => {
                if *o.get() >= max {
                    return Err(full);
                }
                *o.get_mut() += 1;
                Ok(*o.get())
            }
            Entry::Vacant(v) => {
                if max == 0 {
                    return Err(full);
                }
                v.insert(1);
                Ok(1)
            }
        }
    }

    /// Give back one slot. Returns the remaining occupancy.
    pub fn release(&self, subteam_id: Ulid, event_id: Ulid) -> Result<u32, EngineError> {
        let key = (subteam_id, event_id);
        let remaining = match self.slots.get_mut(&key) {
            Some(mut count) if *count > 0 => {
                *count -= 1;
                *count
            }
            _ => {
                return Err(underflow(format!(
                    "release of event {event_id} for subteam {subteam_id} with no reservation"
                )));
            }
        };
        if remaining == 0 {
            self.slots.remove_if(&key, |_, c| *c == 0);
        }
        Ok(remaining)
    }

    // ── Subteam headcount ────────────────────────────────────

    pub fn headcount(&self, subteam_id: &Ulid) -> u32 {
        self.headcount.get(subteam_id).map(|c| *c).unwrap_or(0)
    }

    pub fn reserve_headcount(&self, subteam_id: Ulid, max: u32) -> Result<u32, EngineError> {
        let mut count = self.headcount.entry(subteam_id).or_insert(0);
        if *count >= max {
            return Err(EngineError::HeadcountExceeded { subteam_id, max });
        }
        *count += 1;
        Ok(*count)
    }

    pub fn release_headcount(&self, subteam_id: Ulid) -> Result<u32, EngineError> {
        match self.headcount.get_mut(&subteam_id) {
            Some(mut count) if *count > 0 => {
                *count -= 1;
                Ok(*count)
            }
            _ => Err(underflow(format!(
                "headcount release for subteam {subteam_id} with no members"
            ))),
        }
    }

    /// Drop a deleted subteam's headcount counter.
    pub fn forget_subteam(&self, subteam_id: &Ulid) {
        self.headcount.remove(subteam_id);
    }

    // ── Replay ───────────────────────────────────────────────

    /// Count a slot without a capacity check. Replay only.
    pub(super) fn restore_slot(&self, subteam_id: Ulid, event_id: Ulid) {
        *self.slots.entry((subteam_id, event_id)).or_insert(0) += 1;
    }

    /// Count a member without a headcount check. Replay only.
    pub(super) fn restore_headcount(&self, subteam_id: Ulid) {
        *self.headcount.entry(subteam_id).or_insert(0) += 1;
    }
}
