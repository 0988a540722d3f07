//! # Silo Store
//!
//! Per-silo durable state in one embedded SQLite database (WAL): chunk rows,
//! embedding vectors, a BM25 full-text index, a trigram index, per-file
//! mtimes, and the write-once `meta` row. Hybrid search runs four rankers
//! over these tables and fuses them with reciprocal rank fusion.

mod error;
mod search;
mod store;

pub use error::{Result, StoreError};
pub use store::{Meta, SiloStore, STORE_SCHEMA_VERSION};
