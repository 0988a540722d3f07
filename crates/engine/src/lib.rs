//! # Silo Engine
//!
//! The multi-silo orchestration layer: a lifecycle state machine per silo,
//! cross-silo score calibration, and the top-level [`SearchEngine`] that
//! exposes the query/status API to the host application.
//!
//! ```no_run
//! use silo_engine::{SearchEngine, load_engine_config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_engine_config("silos.toml")?;
//!     let engine = SearchEngine::new(config.defaults);
//!     for silo in config.silos {
//!         engine.create_silo(silo).await?;
//!     }
//!
//!     let results = engine.search("file watcher debounce", None, None, None).await?;
//!     for hit in results {
//!         println!("{:.3} {} ({})", hit.score, hit.file_path, hit.silo_name);
//!     }
//!     Ok(())
//! }
//! ```

mod config;
mod engine;
mod error;
mod merge;
mod silo;
mod status;

pub use config::{load_engine_config, EngineConfig};
pub use engine::SearchEngine;
pub use error::{EngineError, Result};
pub use merge::calibrate;
pub use silo::SiloManager;
pub use status::{ServerStatus, SiloStatus};
