use crate::service::{inference_lock, l2_normalize, EmbeddingService};
use crate::Result;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Deterministic seeded-hash embedding service.
///
/// Carries no semantic signal, but satisfies every contract the engine
/// relies on: fixed dimensions, unit norm, bitwise-stable output for equal
/// input. Registered under the `hash-<dim>` model ids as the fallback model
/// that works without any model files, and used throughout the test suites.
#[derive(Debug, Clone)]
pub struct HashedEmbeddingService {
    model_id: String,
    dimensions: usize,
    seed: u64,
}

impl HashedEmbeddingService {
    pub fn new(model_id: impl Into<String>, dimensions: usize) -> Self {
        let model_id = model_id.into();
        let mut hasher = DefaultHasher::new();
        model_id.hash(&mut hasher);
        Self {
            seed: hasher.finish(),
            model_id,
            dimensions,
        }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut output = Vec::with_capacity(self.dimensions);
        for index in 0..self.dimensions {
            let mut hasher = DefaultHasher::new();
            self.seed.hash(&mut hasher);
            index.hash(&mut hasher);
            text.hash(&mut hasher);
            let normalized = (hasher.finish() as f64) / (u64::MAX as f64);
            #[allow(clippy::cast_possible_truncation)]
            output.push((normalized * 2.0 - 1.0) as f32);
        }
        l2_normalize(&mut output);
        output
    }
}

#[async_trait]
impl EmbeddingService for HashedEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let _guard = inference_lock().await;
        let vector = self.vector_for(text);
        tokio::task::yield_now().await;
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let _guard = inference_lock().await;
        let vectors = texts.iter().map(|t| self.vector_for(t)).collect();
        tokio::task::yield_now().await;
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }

    fn max_tokens(&self) -> usize {
        8192
    }

    fn chunk_tokens(&self) -> usize {
        500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn batch_and_single_calls_agree() {
        let service = HashedEmbeddingService::new("hash-64", 64);
        let single = service.embed("fn main() {}").await.unwrap();
        let batch = service
            .embed_batch(&["fn main() {}".to_string()])
            .await
            .unwrap();
        assert_eq!(single, batch[0]);
    }

    #[tokio::test]
    async fn vectors_are_unit_norm_and_distinct() {
        let service = HashedEmbeddingService::new("hash-64", 64);
        let a = service.embed("alpha").await.unwrap();
        let b = service.embed("beta").await.unwrap();
        assert_ne!(a, b);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn different_model_ids_produce_different_spaces() {
        let a = HashedEmbeddingService::new("hash-64", 64);
        let b = HashedEmbeddingService::new("other-64", 64);
        assert_ne!(a.embed("same").await.unwrap(), b.embed("same").await.unwrap());
    }
}
