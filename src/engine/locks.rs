use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use super::EngineError;

/// What a mutation locks. The derived `Ord` is the global acquisition order:
/// members first, then subteams, then (subteam, event) slots, each by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    Member(Ulid),
    Subteam(Ulid),
    Slot { subteam_id: Ulid, event_id: Ulid },
}

/// Guards for one critical section. Dropping it releases every lock.
pub struct HeldLocks {
    keys: Vec<LockKey>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl HeldLocks {
    pub fn holds(&self, key: &LockKey) -> bool {
        self.keys.binary_search(key).is_ok()
    }
}

/// Lazily created mutexes, one per key.
#[derive(Default)]
pub struct LockTable {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, key: LockKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire all `keys` in sorted order. With a timeout, gives up with
    /// `Busy`; any locks taken so far are released when the future drops.
    pub async fn acquire(
        &self,
        mut keys: Vec<LockKey>,
        timeout: Option<Duration>,
    ) -> Result<HeldLocks, EngineError> {
        keys.sort();
        keys.dedup();

        let started = Instant::now();
        let take_all = async {
            let mut guards = Vec::with_capacity(keys.len());
            for key in &keys {
                guards.push(self.handle(*key).lock_owned().await);
            }
            guards
        };

        let guards = match timeout {
            Some(limit) => match tokio::time::timeout(limit, take_all).await {
                Ok(guards) => guards,
                Err(_) => {
                    tracing::warn!("lock timeout after {limit:?} on {keys:?}");
                    metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                    return Err(EngineError::Busy);
                }
            },
            None => take_all.await,
        };
        metrics::histogram!(crate::observability::LOCK_WAIT_SECONDS)
            .record(started.elapsed().as_secs_f64());

        Ok(HeldLocks {
            keys,
            _guards: guards,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keys_sorted_and_deduped() {
        let table = LockTable::new();
        let (a, b) = (Ulid::new(), Ulid::new());
        let held = table
            .acquire(
                vec![
                    LockKey::Slot { subteam_id: a, event_id: b },
                    LockKey::Member(b),
                    LockKey::Member(b),
                    LockKey::Subteam(a),
                ],
                None,
            )
            .await
            .unwrap();
        assert_eq!(held.keys.len(), 3);
        assert!(matches!(held.keys[0], LockKey::Member(_)));
        assert!(matches!(held.keys[2], LockKey::Slot { .. }));
        assert!(held.holds(&LockKey::Subteam(a)));
    }

    #[tokio::test]
    async fn contended_acquire_times_out_busy() {
        let table = LockTable::new();
        let m = Ulid::new();
        let _held = table.acquire(vec![LockKey::Member(m)], None).await.unwrap();

        let result = table
            .acquire(vec![LockKey::Member(m)], Some(Duration::from_millis(20)))
            .await;
        assert!(matches!(result, Err(EngineError::Busy)));
    }

    #[tokio::test]
    async fn timed_out_acquire_leaks_nothing() {
        let table = LockTable::new();
        let (m1, m2) = (Ulid::new(), Ulid::new());
        let blocker = table.acquire(vec![LockKey::Member(m2)], None).await.unwrap();

        // Takes m1, then stalls on m2 and times out.
        let result = table
            .acquire(
                vec![LockKey::Member(m1), LockKey::Member(m2)],
                Some(Duration::from_millis(20)),
            )
            .await;
        assert!(matches!(result, Err(EngineError::Busy)));

        // m1 must be free again.
        let again = table
            .acquire(vec![LockKey::Member(m1)], Some(Duration::from_millis(20)))
            .await;
        assert!(again.is_ok());
        drop(blocker);
    }

    #[tokio::test]
    async fn opposite_order_requests_do_not_deadlock() {
        let table = Arc::new(LockTable::new());
        let (m1, m2) = (Ulid::new(), Ulid::new());
        let mut handles = Vec::new();
        for i in 0..50 {
            let table = table.clone();
            let keys = if i % 2 == 0 {
                vec![LockKey::Member(m1), LockKey::Member(m2)]
            } else {
                vec![LockKey::Member(m2), LockKey::Member(m1)]
            };
            handles.push(tokio::spawn(async move {
                let _held = table.acquire(keys, None).await.unwrap();
                tokio::task::yield_now().await;
            }));
        }
        let all = futures::future::join_all(handles);
        tokio::time::timeout(Duration::from_secs(5), all)
            .await
            .expect("lock ordering deadlocked");
    }
}
