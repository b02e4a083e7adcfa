mod conflict;
mod eligibility;
mod error;
mod ledger;
mod locks;
mod mutations;
mod queries;
mod store;

pub use conflict::ConflictIndex;
pub use error::{EngineError, Target};
pub use ledger::CapacityLedger;
pub use locks::{HeldLocks, LockKey, LockTable};
pub use store::AssignmentStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock, RwLockReadGuard};
use ulid::Ulid;

use crate::catalog::{Catalog, Division};
use crate::config::EngineConfig;
use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

/// Upper bound on commands drained per wakeup.
const MAX_BATCH: usize = 512;

pub(super) enum WalCommand {
    Append {
        record: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        records: Vec<Record>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Record, oneshot::Sender<io::Result<()>>);

/// Owns the club's log. Each wakeup drains whatever commands are queued;
/// consecutive appends become one batch with a single fsync, and a control
/// command first commits the appends queued ahead of it.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut inbox = Vec::with_capacity(MAX_BATCH);
    let mut batch: Vec<Pending> = Vec::new();
    while rx.recv_many(&mut inbox, MAX_BATCH).await > 0 {
        for cmd in inbox.drain(..) {
            match cmd {
                WalCommand::Append { record, response } => batch.push((record, response)),
                WalCommand::Compact { records, response } => {
                    commit_batch(&mut wal, &mut batch);
                    let result = wal.compact(&records);
                    if let Err(e) = &result {
                        tracing::error!("{}: compaction failed: {e}", wal.path().display());
                    }
                    let _ = response.send(result);
                }
                WalCommand::AppendsSinceCompact { response } => {
                    commit_batch(&mut wal, &mut batch);
                    let _ = response.send(wal.appends_since_compact());
                }
            }
        }
        commit_batch(&mut wal, &mut batch);
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<Pending>) {
    if batch.is_empty() {
        return;
    }
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = wal.commit(batch.iter().map(|(record, _)| record));
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("{}: commit of {} records failed: {e}", wal.path().display(), batch.len());
    }
    for (_, response) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = response.send(reply);
    }
}

/// Roster locks plus a shared hold on the commit gate. Dropping it ends the
/// critical section.
pub(super) struct Critical<'a> {
    _locks: HeldLocks,
    _gate: RwLockReadGuard<'a, ()>,
}

/// One club's roster: members, subteams, assignments, and the ledger that
/// keeps their occupancy counts. Every mutation goes through the
/// coordinator methods in `mutations.rs`.
pub struct Engine {
    pub club: Club,
    catalog: Arc<Catalog>,
    pub(super) members: DashMap<Ulid, Member>,
    pub(super) subteams: DashMap<Ulid, Subteam>,
    pub(super) ledger: CapacityLedger,
    pub(super) store: AssignmentStore,
    pub(super) locks: LockTable,
    /// Mutations hold it shared; compaction holds it exclusively so the
    /// snapshot it writes matches the log it replaces.
    pub(super) commit_gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) max_headcount: u32,
    pub(super) lock_timeout: Option<Duration>,
}

impl Engine {
    /// Open the club's WAL, replay it, and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        club: Club,
        catalog: Arc<Catalog>,
        config: &EngineConfig,
    ) -> io::Result<Self> {
        let records = Wal::replay(&wal_path, club.id)?;
        let wal = Wal::open(&wal_path, club.id)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            club,
            catalog,
            members: DashMap::new(),
            subteams: DashMap::new(),
            ledger: CapacityLedger::new(),
            store: AssignmentStore::new(),
            locks: LockTable::new(),
            commit_gate: RwLock::new(()),
            wal_tx,
            max_headcount: config.max_headcount,
            lock_timeout: config.lock_timeout,
        };

        for record in &records {
            if let Err(e) = engine.apply_record(record) {
                tracing::warn!("club {}: skipping WAL record {record:?}: {e}", engine.club.id);
            }
        }
        engine.rebuild_ledger();
        if !records.is_empty() {
            tracing::info!(
                "club {} replayed {} records: {} members, {} subteams, {} assignments",
                engine.club.id,
                records.len(),
                engine.members.len(),
                engine.subteams.len(),
                engine.store.len()
            );
        }

        Ok(engine)
    }

    /// Apply a record to in-memory state. The ledger is not touched here:
    /// live mutations adjust it themselves, replay derives it afterwards.
    pub(super) fn apply_record(&self, record: &Record) -> Result<(), EngineError> {
        match record {
            Record::MemberAdded { id, name } => {
                self.members.insert(
                    *id,
                    Member {
                        id: *id,
                        name: name.clone(),
                        subteam_id: None,
                    },
                );
            }
            Record::SubteamCreated {
                id,
                name,
                max_headcount,
            } => {
                self.subteams.insert(
                    *id,
                    Subteam {
                        id: *id,
                        name: name.clone(),
                        max_headcount: *max_headcount,
                    },
                );
            }
            Record::SubteamRenamed { id, name } => {
                let mut subteam = self
                    .subteams
                    .get_mut(id)
                    .ok_or(EngineError::NotFound(Target::Subteam(*id)))?;
                subteam.name = name.clone();
            }
            Record::SubteamDeleted { id } => {
                self.subteams.remove(id);
                for mut member in self.members.iter_mut() {
                    if member.subteam_id == Some(*id) {
                        member.subteam_id = None;
                    }
                }
            }
            Record::MemberMoved {
                member_id,
                subteam_id,
            } => {
                let mut member = self
                    .members
                    .get_mut(member_id)
                    .ok_or(EngineError::NotFound(Target::Member(*member_id)))?;
                member.subteam_id = *subteam_id;
            }
            Record::AssignmentCreated(assignment) => {
                self.store.insert(*assignment)?;
            }
            Record::AssignmentRemoved {
                member_id,
                event_id,
            } => {
                self.store.delete(*member_id, *event_id)?;
            }
        }
        Ok(())
    }

    /// Recompute every ledger counter from members and assignments.
    fn rebuild_ledger(&self) {
        for member in self.members.iter() {
            if let Some(subteam_id) = member.subteam_id {
                self.ledger.restore_headcount(subteam_id);
            }
        }
        for assignment in self.store.all() {
            self.ledger
                .restore_slot(assignment.subteam_id, assignment.event_id);
        }
    }

    /// Write a record to the WAL via the background group-commit writer.
    async fn wal_append(&self, record: &Record) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                record: record.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply in one call. Caller holds the relevant locks.
    pub(super) async fn persist_and_apply(&self, record: &Record) -> Result<(), EngineError> {
        self.wal_append(record).await?;
        self.apply_record(record)
    }

    /// Acquire `keys` and then the commit gate, both within one deadline
    /// (the caller's, else the configured one). Past it, `Busy`.
    pub(super) async fn lock(
        &self,
        keys: Vec<LockKey>,
        timeout: Option<Duration>,
    ) -> Result<Critical<'_>, EngineError> {
        let timeout = timeout.or(self.lock_timeout);
        let started = Instant::now();
        let locks = self.locks.acquire(keys, timeout).await?;
        let gate = match timeout {
            None => self.commit_gate.read().await,
            Some(limit) => {
                let remaining = limit.saturating_sub(started.elapsed());
                match tokio::time::timeout(remaining, self.commit_gate.read()).await {
                    Ok(gate) => gate,
                    Err(_) => {
                        tracing::warn!(
                            "club {}: commit gate still closed after {limit:?}",
                            self.club.id
                        );
                        metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                        return Err(EngineError::Busy);
                    }
                }
            }
        };
        Ok(Critical {
            _locks: locks,
            _gate: gate,
        })
    }

    /// The club's division as currently installed in the catalog.
    pub fn division(&self) -> Result<Arc<Division>, EngineError> {
        self.catalog.require(&self.club.division)
    }

    pub(super) fn require_member(&self, id: &Ulid) -> Result<Member, EngineError> {
        self.members
            .get(id)
            .map(|m| m.value().clone())
            .ok_or(EngineError::NotFound(Target::Member(*id)))
    }

    pub(super) fn require_subteam(&self, id: &Ulid) -> Result<Subteam, EngineError> {
        self.subteams
            .get(id)
            .map(|s| s.value().clone())
            .ok_or(EngineError::NotFound(Target::Subteam(*id)))
    }
}
