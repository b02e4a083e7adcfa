use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;
use ulid::Ulid;

use crate::engine::{ConflictIndex, EngineError, Target};
use crate::limits::*;
use crate::model::*;

/// Events and conflict groups of one division, validated and indexed.
#[derive(Debug)]
pub struct Division {
    pub name: DivisionName,
    events: HashMap<Ulid, Event>,
    /// Event ids in source order.
    order: Vec<Ulid>,
    pub conflicts: ConflictIndex,
}

impl Division {
    pub fn build(spec: DivisionSpec) -> Result<Self, EngineError> {
        if spec.name.is_empty() || spec.name.len() > MAX_NAME_LEN {
            return Err(EngineError::Config("division name empty or too long".into()));
        }
        if spec.events.len() > MAX_EVENTS_PER_DIVISION {
            return Err(EngineError::LimitExceeded("too many events in division"));
        }
        let mut seen = HashSet::new();
        for event in &spec.events {
            if !seen.insert(event.id) {
                return Err(EngineError::Config(format!("duplicate event id {}", event.id)));
            }
            if event.max_competitors == 0 {
                return Err(EngineError::Config(format!(
                    "event {} has no competitor slots",
                    event.name
                )));
            }
        }

        let conflicts = ConflictIndex::build(&spec.events, &spec.conflict_groups)?;
        let order = spec.events.iter().map(|e| e.id).collect();
        let events = spec.events.into_iter().map(|e| (e.id, e)).collect();
        Ok(Self {
            name: spec.name,
            events,
            order,
            conflicts,
        })
    }

    pub fn event(&self, id: &Ulid) -> Option<&Event> {
        self.events.get(id)
    }

    pub fn require_event(&self, id: &Ulid) -> Result<&Event, EngineError> {
        self.events.get(id).ok_or(EngineError::NotFound(Target::Event(*id)))
    }

    /// All events, in the order the source listed them.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.order.iter().filter_map(|id| self.events.get(id))
    }

    pub fn event_count(&self) -> usize {
        self.order.len()
    }
}

/// Where division reference data comes from.
#[async_trait]
pub trait DivisionSource: Send + Sync {
    async fn load(&self, division: &str) -> Result<DivisionSpec, EngineError>;
}

/// Reads `<dir>/<division>.json`.
pub struct JsonDivisionSource {
    dir: PathBuf,
}

impl JsonDivisionSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DivisionSource for JsonDivisionSource {
    async fn load(&self, division: &str) -> Result<DivisionSpec, EngineError> {
        let safe: String = division
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe.is_empty() {
            return Err(EngineError::Config("empty division name".into()));
        }
        let path = self.dir.join(format!("{safe}.json"));
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::NotFound(Target::Division(division.to_string())));
            }
            Err(e) => return Err(EngineError::Config(format!("{}: {e}", path.display()))),
        };
        let spec: DivisionSpec = serde_json::from_slice(&raw)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        if spec.name != division {
            return Err(EngineError::Config(format!(
                "{} declares division {}, expected {division}",
                path.display(),
                spec.name
            )));
        }
        Ok(spec)
    }
}

/// Shared registry of divisions. Readers clone the division `Arc`; a reload
/// swaps in a freshly built division and never patches one in place.
pub struct Catalog {
    divisions: DashMap<DivisionName, Arc<Division>>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            divisions: DashMap::new(),
        }
    }

    pub fn get(&self, division: &str) -> Option<Arc<Division>> {
        self.divisions.get(division).map(|e| e.value().clone())
    }

    pub fn require(&self, division: &str) -> Result<Arc<Division>, EngineError> {
        self.get(division)
            .ok_or_else(|| EngineError::NotFound(Target::Division(division.to_string())))
    }

    /// Validate and install a division, replacing any previous version.
    pub fn install(&self, spec: DivisionSpec) -> Result<Arc<Division>, EngineError> {
        if !self.divisions.contains_key(&spec.name) && self.divisions.len() >= MAX_DIVISIONS {
            return Err(EngineError::LimitExceeded("too many divisions"));
        }
        let division = Arc::new(Division::build(spec)?);
        info!(
            "division {} installed: {} events, {} conflict groups",
            division.name,
            division.event_count(),
            division.conflicts.groups().len()
        );
        self.divisions.insert(division.name.clone(), division.clone());
        Ok(division)
    }

    /// Load a division from `source` and install it.
    pub async fn reload(
        &self,
        source: &dyn DivisionSource,
        division: &str,
    ) -> Result<Arc<Division>, EngineError> {
        let spec = source.load(division).await?;
        self.install(spec)
    }

    /// Load several divisions concurrently. One bad division does not stop
    /// the others; each result is returned next to its name.
    pub async fn reload_all(
        &self,
        source: &dyn DivisionSource,
        divisions: &[&str],
    ) -> Vec<(DivisionName, Result<Arc<Division>, EngineError>)> {
        let loads = divisions.iter().map(|name| async move {
            let result = self.reload(source, name).await;
            if let Err(e) = &result {
                tracing::error!("division {name} failed to load: {e}");
            }
            (name.to_string(), result)
        });
        futures::future::join_all(loads).await
    }
}
