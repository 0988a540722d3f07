//! # Silo Indexer
//!
//! The indexing side of a silo: the per-file pipeline (read → extract →
//! chunk → embed → upsert), the breadth-first reconciler that diffs the
//! filesystem against stored mtimes, the debounced filesystem watcher, and
//! the process-global FIFO queue that serialises all embedding-consuming
//! work across silos.
//!
//! ```text
//! Watcher ─┐
//!          ├──> pipeline ──> IndexingQueue ──> embed_batch ──> store
//! Reconcile┘
//! ```

mod error;
mod pipeline;
mod queue;
mod reconcile;
mod walk;
mod watch;

pub use error::{IndexerError, Result};
pub use pipeline::{mtime_ms, normalize_path, FilePipeline};
pub use queue::{CancelHandle, IndexingQueue};
pub use reconcile::{reconcile, ReconcileEvent, ReconcileOutcome, ReconcileParams};
pub use walk::{walk_files, SiloFilters, WalkedFile};
pub use watch::{FileOutcome, SiloWatcher, WatchSignal, WatcherConfig};
