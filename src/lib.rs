//! Roster and event assignment for competition clubs.
//!
//! Members join subteams of bounded headcount, and subteam members are
//! assigned to division events of bounded capacity, never to two events of
//! the same conflict group unless one of them is self-scheduled. All
//! mutations go through a per-club [`engine::Engine`], which checks and
//! commits each change under member and slot locks.

pub mod catalog;
pub mod clubs;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod wal;

pub use catalog::{Catalog, Division, DivisionSource, JsonDivisionSource};
pub use clubs::ClubRegistry;
pub use config::EngineConfig;
pub use engine::{Engine, EngineError, Target};
