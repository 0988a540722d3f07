//! # Silo Protocol
//!
//! Shared value types for the silo search engine: silo configuration,
//! chunk records, search results, activity events, and the RRF presets
//! consumed by the fusion step.
//!
//! Every other crate in the workspace depends on this one; it depends on
//! nothing but serde and the content hash.

mod chunk;
mod config;
mod events;
mod search;

pub use chunk::{content_hash, token_estimate, ChunkRecord};
pub use config::{EngineDefaults, SiloConfig};
pub use events::{
    ActivityEvent, FileEventKind, ReconcilePhase, ReconcileProgress, WatcherState,
};
pub use search::{
    ChunkHit, MatchType, RrfWeights, SearchPreset, SearchResult, SiloSearchResult, RRF_K,
};
