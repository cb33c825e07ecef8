//! SQLite storage for the race collection
//!
//! The engines work on plain `Race` slices; this module is the only place
//! that knows how they are persisted.

pub mod repository;
pub mod schema;

pub use repository::{ExportBundle, ImportSummary, RaceRepository, StoreError};
