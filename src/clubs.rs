use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::catalog::Catalog;
use crate::compactor;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::limits::*;
use crate::model::Club;

/// Per-club engines. Each club gets its own Engine + WAL + compactor; all
/// share one division catalog.
pub struct ClubRegistry {
    engines: DashMap<Ulid, Arc<Engine>>,
    catalog: Arc<Catalog>,
    config: EngineConfig,
}

impl ClubRegistry {
    pub fn new(catalog: Arc<Catalog>, config: EngineConfig) -> Self {
        Self {
            engines: DashMap::new(),
            catalog,
            config,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn get(&self, club_id: &Ulid) -> Option<Arc<Engine>> {
        self.engines.get(club_id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Get or lazily open the engine for `club`. Must be called inside a
    /// tokio runtime.
    pub fn open(&self, club: Club) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.get(&club.id) {
            return Ok(engine);
        }
        if club.division.is_empty() || club.division.len() > MAX_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "invalid division name",
            ));
        }
        if self.engines.len() >= MAX_CLUBS {
            return Err(std::io::Error::other("too many clubs"));
        }

        // Holding the entry keeps two callers from opening the same WAL twice.
        let engine = match self.engines.entry(club.id) {
            Entry::Occupied(o) => return Ok(o.get().clone()),
            Entry::Vacant(v) => {
                std::fs::create_dir_all(&self.config.data_dir)?;
                let wal_path = self.config.data_dir.join(format!("{}.wal", club.id));
                let engine = Arc::new(Engine::new(
                    wal_path,
                    club,
                    self.catalog.clone(),
                    &self.config,
                )?);
                v.insert(engine.clone());
                engine
            }
        };

        let compactor_engine = engine.clone();
        let threshold = self.config.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        metrics::gauge!(crate::observability::CLUBS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!("club {} opened", engine.club.id);
        Ok(engine)
    }
}
