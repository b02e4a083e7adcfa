use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, LockKey, Target};

/// Record outcome metrics and logs for one coordinator call.
fn observe<T>(op: &'static str, started: Instant, result: &Result<T, EngineError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(e) if e.is_rejection() => "rejected",
        Err(_) => "error",
    };
    metrics::counter!(crate::observability::MUTATIONS_TOTAL, "op" => op, "status" => status)
        .increment(1);
    metrics::histogram!(crate::observability::MUTATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = result {
        metrics::counter!(crate::observability::REJECTIONS_TOTAL, "reason" => e.reason())
            .increment(1);
        if e.is_rejection() {
            debug!("{op} rejected: {e}");
        } else {
            tracing::error!("{op} failed: {e}");
        }
    }
}

fn check_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidName("name must not be blank"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

impl Engine {
    // ── Assignment coordinator ───────────────────────────────

    /// Assign a member to an event under their subteam. Validation, ledger
    /// reservation, logging and the store insert all happen while the member
    /// and the (subteam, event) slot are locked; a failure after the
    /// reservation gives it back before returning.
    pub async fn assign_member_to_event(
        &self,
        member_id: Ulid,
        subteam_id: Ulid,
        event_id: Ulid,
        timeout: Option<Duration>,
    ) -> Result<Assignment, EngineError> {
        let started = Instant::now();
        let result = self
            .assign_locked(member_id, subteam_id, event_id, timeout)
            .await;
        observe("assign", started, &result);
        result
    }

    async fn assign_locked(
        &self,
        member_id: Ulid,
        subteam_id: Ulid,
        event_id: Ulid,
        timeout: Option<Duration>,
    ) -> Result<Assignment, EngineError> {
        let _held = self
            .lock(
                vec![
                    LockKey::Member(member_id),
                    LockKey::Slot {
                        subteam_id,
                        event_id,
                    },
                ],
                timeout,
            )
            .await?;

        let division = self.division()?;
        let event = division.require_event(&event_id)?;
        self.check_assignment(&division, member_id, subteam_id, event)?;

        self.ledger
            .reserve(subteam_id, event_id, event.max_competitors)?;
        let assignment = Assignment::new(member_id, subteam_id, event_id);
        if let Err(e) = self
            .persist_and_apply(&Record::AssignmentCreated(assignment))
            .await
        {
            self.ledger.release(subteam_id, event_id)?;
            return Err(e);
        }

        info!(
            "club {}: member {member_id} assigned to {} under subteam {subteam_id}",
            self.club.id, event.name
        );
        Ok(assignment)
    }

    /// Remove a member's assignment to an event and free its slot.
    pub async fn remove_assignment(
        &self,
        member_id: Ulid,
        event_id: Ulid,
        timeout: Option<Duration>,
    ) -> Result<Assignment, EngineError> {
        let started = Instant::now();
        let result = self.remove_locked(member_id, event_id, timeout).await;
        observe("remove", started, &result);
        result
    }

    async fn remove_locked(
        &self,
        member_id: Ulid,
        event_id: Ulid,
        timeout: Option<Duration>,
    ) -> Result<Assignment, EngineError> {
        let not_found = || EngineError::NotFound(Target::Assignment { member_id, event_id });

        // The slot to lock depends on the assignment's subteam, which is only
        // stable once the member lock is held. Re-check after locking.
        loop {
            let peeked = self.store.get(&member_id, &event_id).ok_or_else(not_found)?;
            let held = self
                .lock(
                    vec![
                        LockKey::Member(member_id),
                        LockKey::Slot {
                            subteam_id: peeked.subteam_id,
                            event_id,
                        },
                    ],
                    timeout,
                )
                .await?;
            let current = self.store.get(&member_id, &event_id).ok_or_else(not_found)?;
            if current.subteam_id != peeked.subteam_id {
                drop(held);
                continue;
            }

            self.persist_and_apply(&Record::AssignmentRemoved {
                member_id,
                event_id,
            })
            .await?;
            self.ledger.release(current.subteam_id, event_id)?;
            info!(
                "club {}: member {member_id} removed from event {event_id}",
                self.club.id
            );
            return Ok(current);
        }
    }

    /// Move a member to another subteam, or to none. Returns the previous
    /// subteam. Event assignments made under the old subteam stay in place
    /// and show up in `orphaned_assignments`.
    pub async fn move_member_to_subteam(
        &self,
        member_id: Ulid,
        subteam_id: Option<Ulid>,
        timeout: Option<Duration>,
    ) -> Result<Option<Ulid>, EngineError> {
        let started = Instant::now();
        let result = self.move_locked(member_id, subteam_id, timeout).await;
        observe("move", started, &result);
        result
    }

    async fn move_locked(
        &self,
        member_id: Ulid,
        subteam_id: Option<Ulid>,
        timeout: Option<Duration>,
    ) -> Result<Option<Ulid>, EngineError> {
        let mut keys = vec![LockKey::Member(member_id)];
        if let Some(target) = subteam_id {
            keys.push(LockKey::Subteam(target));
        }
        let _held = self.lock(keys, timeout).await?;

        let member = self.require_member(&member_id)?;
        let previous = member.subteam_id;
        if previous == subteam_id {
            return Ok(previous);
        }

        if let Some(target) = subteam_id {
            let subteam = self.require_subteam(&target)?;
            self.ledger
                .reserve_headcount(target, subteam.max_headcount)?;
        }
        let record = Record::MemberMoved {
            member_id,
            subteam_id,
        };
        if let Err(e) = self.persist_and_apply(&record).await {
            if let Some(target) = subteam_id {
                self.ledger.release_headcount(target)?;
            }
            return Err(e);
        }
        if let Some(old) = previous {
            self.ledger.release_headcount(old)?;
        }

        let stale = self
            .store
            .by_member(&member_id)
            .iter()
            .filter(|a| Some(a.subteam_id) != subteam_id)
            .count();
        if stale > 0 {
            warn!(
                "club {}: member {member_id} left {stale} event assignments behind on subteam {previous:?}",
                self.club.id
            );
            metrics::counter!(crate::observability::ORPHANED_ASSIGNMENTS_TOTAL)
                .increment(stale as u64);
        }
        info!(
            "club {}: member {member_id} moved from {previous:?} to {subteam_id:?}",
            self.club.id
        );
        Ok(previous)
    }

    // ── Club administration ──────────────────────────────────

    /// Register a member who joined the club. They start unassigned.
    pub async fn add_member(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        check_name(&name)?;
        let _held = self.lock(vec![LockKey::Member(id)], None).await?;
        if self.members.contains_key(&id) {
            return Err(EngineError::AlreadyExists(Target::Member(id)));
        }
        if self.members.len() >= MAX_MEMBERS_PER_CLUB {
            return Err(EngineError::LimitExceeded("too many members"));
        }
        self.persist_and_apply(&Record::MemberAdded { id, name }).await
    }

    pub async fn create_subteam(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        check_name(&name)?;
        let _held = self.lock(vec![LockKey::Subteam(id)], None).await?;
        if self.subteams.contains_key(&id) {
            return Err(EngineError::AlreadyExists(Target::Subteam(id)));
        }
        if self.subteams.len() >= MAX_SUBTEAMS_PER_CLUB {
            return Err(EngineError::LimitExceeded("too many subteams"));
        }
        let record = Record::SubteamCreated {
            id,
            name,
            max_headcount: self.max_headcount,
        };
        self.persist_and_apply(&record).await?;
        info!("club {}: subteam {id} created", self.club.id);
        Ok(())
    }

    pub async fn rename_subteam(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        check_name(&name)?;
        let _held = self.lock(vec![LockKey::Subteam(id)], None).await?;
        self.require_subteam(&id)?;
        self.persist_and_apply(&Record::SubteamRenamed { id, name }).await
    }

    /// Delete a subteam. Its members become unassigned; their event
    /// assignments stay. Returns the members that were unassigned.
    pub async fn delete_subteam(&self, id: Ulid) -> Result<Vec<Ulid>, EngineError> {
        let started = Instant::now();
        let result = self.delete_subteam_locked(id).await;
        observe("delete_subteam", started, &result);
        result
    }

    async fn delete_subteam_locked(&self, id: Ulid) -> Result<Vec<Ulid>, EngineError> {
        let on_subteam = || -> BTreeSet<Ulid> {
            self.members
                .iter()
                .filter(|m| m.subteam_id == Some(id))
                .map(|m| m.id)
                .collect()
        };

        // Lock the subteam and everyone on it. A member may leave while we
        // wait for the locks; if the set changed, try again.
        loop {
            self.require_subteam(&id)?;
            let expected = on_subteam();
            let mut keys: Vec<LockKey> = expected.iter().map(|m| LockKey::Member(*m)).collect();
            keys.push(LockKey::Subteam(id));
            let held = self.lock(keys, None).await?;
            if on_subteam() != expected {
                drop(held);
                continue;
            }

            self.require_subteam(&id)?;
            self.persist_and_apply(&Record::SubteamDeleted { id }).await?;
            self.ledger.forget_subteam(&id);
            info!(
                "club {}: subteam {id} deleted, {} members unassigned",
                self.club.id,
                expected.len()
            );
            return Ok(expected.into_iter().collect());
        }
    }

    /// Rewrite the WAL as the minimal record set for the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut records = Vec::new();
        for subteam in self.subteams.iter() {
            records.push(Record::SubteamCreated {
                id: subteam.id,
                name: subteam.name.clone(),
                max_headcount: subteam.max_headcount,
            });
        }
        let mut moves = Vec::new();
        for member in self.members.iter() {
            records.push(Record::MemberAdded {
                id: member.id,
                name: member.name.clone(),
            });
            if member.subteam_id.is_some() {
                moves.push(Record::MemberMoved {
                    member_id: member.id,
                    subteam_id: member.subteam_id,
                });
            }
        }
        records.extend(moves);
        records.extend(self.store.all().into_iter().map(Record::AssignmentCreated));

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.wal_tx
            .send(super::WalCommand::Compact {
                records,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Records committed to the WAL since it was last compacted.
    pub async fn wal_appends_since_compact(&self) -> Result<u64, EngineError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.wal_tx
            .send(super::WalCommand::AppendsSinceCompact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }
}
