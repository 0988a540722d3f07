//! # Silo Embedding
//!
//! The embedding-service contract the engine requires, plus the two
//! implementations it ships: an ONNX Runtime service for real models and a
//! deterministic hashed service that needs no model files.
//!
//! The underlying inference runtime is process-global and not reentrant, so
//! every `embed`/`embed_batch` call in the process serialises on a single
//! inference lock and yields to the runtime between requests.

mod error;
mod hashed;
mod onnx;
mod registry;
mod service;

pub use error::{EmbeddingError, Result};
pub use hashed::HashedEmbeddingService;
pub use onnx::OnnxEmbeddingService;
pub use registry::{
    available_models, model_cache_dir, service_for_model, ModelProfile, DEFAULT_MODEL_ID,
};
pub use service::{inference_lock, l2_normalize, EmbeddingService};
