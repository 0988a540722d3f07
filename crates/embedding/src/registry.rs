use crate::hashed::HashedEmbeddingService;
use crate::onnx::OnnxEmbeddingService;
use crate::service::EmbeddingService;
use crate::{EmbeddingError, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Process default model.
pub const DEFAULT_MODEL_ID: &str = "bge-small";

/// Static description of one embedding model the factory can build.
#[derive(Debug, Clone)]
pub struct ModelProfile {
    pub model_id: String,
    pub dimensions: usize,
    pub max_tokens: usize,
    /// Recommended chunker budget, below `max_tokens` to leave prefix room.
    pub chunk_tokens: usize,
    pub query_prefix: String,
    pub document_prefix: String,
}

fn onnx_profiles() -> Vec<ModelProfile> {
    vec![
        ModelProfile {
            model_id: "bge-small".to_string(),
            dimensions: 384,
            max_tokens: 512,
            chunk_tokens: 400,
            query_prefix: "query: ".to_string(),
            document_prefix: "passage: ".to_string(),
        },
        ModelProfile {
            model_id: "bge-base".to_string(),
            dimensions: 768,
            max_tokens: 512,
            chunk_tokens: 400,
            query_prefix: "query: ".to_string(),
            document_prefix: "passage: ".to_string(),
        },
    ]
}

/// Model ids the factory understands, ONNX profiles first.
#[must_use]
pub fn available_models() -> Vec<String> {
    let mut models: Vec<String> = onnx_profiles().into_iter().map(|p| p.model_id).collect();
    models.push("hash-256".to_string());
    models.push("hash-384".to_string());
    models
}

/// Process-wide directory holding downloaded model and tokenizer files.
///
/// Overridable through `SILO_SEARCH_MODEL_DIR`; defaults to
/// `~/.cache/silo-search/models`.
#[must_use]
pub fn model_cache_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("SILO_SEARCH_MODEL_DIR") {
        return PathBuf::from(dir);
    }
    std::env::var_os("HOME").map_or_else(
        || PathBuf::from(".silo-search").join("models"),
        |home| {
            PathBuf::from(home)
                .join(".cache")
                .join("silo-search")
                .join("models")
        },
    )
}

static SERVICE_CACHE: Lazy<Mutex<HashMap<String, Arc<dyn EmbeddingService>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Resolve a model id to a shared service instance.
///
/// Silos configured with the same model share one service (and therefore
/// share query embeddings); the cache is keyed by the resolved id.
pub fn service_for_model(model_id: &str) -> Result<Arc<dyn EmbeddingService>> {
    let model_id = model_id.trim();
    if model_id.is_empty() {
        return Err(EmbeddingError::InvalidConfiguration(
            "model id must not be empty".into(),
        ));
    }

    {
        let cache = SERVICE_CACHE.lock().expect("service cache poisoned");
        if let Some(service) = cache.get(model_id) {
            return Ok(Arc::clone(service));
        }
    }

    let service = build_service(model_id)?;
    let mut cache = SERVICE_CACHE.lock().expect("service cache poisoned");
    let entry = cache
        .entry(model_id.to_string())
        .or_insert_with(|| Arc::clone(&service));
    Ok(Arc::clone(entry))
}

fn build_service(model_id: &str) -> Result<Arc<dyn EmbeddingService>> {
    if let Some(dims) = model_id.strip_prefix("hash-") {
        let dimensions: usize = dims
            .parse()
            .map_err(|_| EmbeddingError::UnknownModel(model_id.to_string()))?;
        if dimensions == 0 {
            return Err(EmbeddingError::InvalidConfiguration(
                "hashed model dimensions must be positive".into(),
            ));
        }
        log::info!("using hashed embedding service `{model_id}` ({dimensions} dims)");
        return Ok(Arc::new(HashedEmbeddingService::new(model_id, dimensions)));
    }

    let profile = onnx_profiles()
        .into_iter()
        .find(|p| p.model_id == model_id)
        .ok_or_else(|| EmbeddingError::UnknownModel(model_id.to_string()))?;

    let model_dir = model_cache_dir().join(model_id);
    let model_path = model_dir.join("model.onnx");
    let tokenizer_path = model_dir.join("tokenizer.json");
    if !model_path.exists() || !tokenizer_path.exists() {
        return Err(EmbeddingError::ModelUnavailable {
            model_id: model_id.to_string(),
            detail: format!("expected model.onnx and tokenizer.json in {}", model_dir.display()),
        });
    }

    log::info!("loading ONNX embedding service `{model_id}` from {}", model_dir.display());
    let service = OnnxEmbeddingService::new(profile, &model_path, &tokenizer_path)?;
    Ok(Arc::new(service))
}
