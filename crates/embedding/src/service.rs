use crate::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use tokio::sync::{Mutex, MutexGuard};

/// Text-to-vector contract the engine requires.
///
/// Vectors are L2-normalised and deterministic per input: batched and
/// single-call results on the same text must agree, or search ranking
/// becomes unstable. `embed` applies the model's *query* prefix; `embed_batch`
/// applies the *document* prefix.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed one query string.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of document chunks.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;

    /// Hard input cap of the underlying model.
    fn max_tokens(&self) -> usize;

    /// Recommended chunker budget for this model.
    fn chunk_tokens(&self) -> usize;
}

static INFERENCE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Acquire the process-wide inference lock.
///
/// The runtime behind the embedding services is global and must never see
/// concurrent inference calls; the indexing queue and the query path both
/// take this lock for the span of one request.
pub async fn inference_lock() -> MutexGuard<'static, ()> {
    INFERENCE_LOCK.lock().await
}

/// Normalise a vector to unit length in place. Zero vectors are left as-is.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector {
            *v /= norm;
        }
    }
}
