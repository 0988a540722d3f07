use crate::registry::ModelProfile;
use crate::service::{inference_lock, l2_normalize, EmbeddingService};
use crate::{EmbeddingError, Result};
use async_trait::async_trait;
use ndarray::Array2;
use ort::{session::Session, value::Tensor};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use tokenizers::{Encoding, Tokenizer};

static ORT_INIT: OnceLock<()> = OnceLock::new();

/// ONNX Runtime embedding service.
///
/// The session is guarded by a std `Mutex` because the runtime is not
/// reentrant; the process-wide [`inference_lock`] additionally serialises
/// requests across services so only one inference runs at any moment.
pub struct OnnxEmbeddingService {
    inner: Arc<OnnxInner>,
    profile: ModelProfile,
}

struct OnnxInner {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    pad_id: i64,
    dimensions: usize,
}

impl OnnxEmbeddingService {
    pub fn new(
        profile: ModelProfile,
        model_path: &Path,
        tokenizer_path: &Path,
    ) -> Result<Self> {
        if profile.dimensions == 0 {
            return Err(EmbeddingError::InvalidConfiguration(
                "dimensions must be greater than zero".into(),
            ));
        }

        ORT_INIT.get_or_init(|| {
            if let Err(err) = ort::init().with_name("silo-search").commit() {
                log::warn!("ONNX Runtime init reported: {err}");
            }
        });

        let session = Session::builder()
            .map_err(|e| EmbeddingError::Runtime(format!("create session builder: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| EmbeddingError::Runtime(format!("load ONNX model: {e}")))?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| EmbeddingError::Tokenizer(format!("load tokenizer: {e}")))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: profile.max_tokens,
                ..Default::default()
            }))
            .map_err(|e| EmbeddingError::Tokenizer(format!("configure truncation: {e}")))?;

        let pad_id = tokenizer
            .token_to_id("<pad>")
            .or_else(|| tokenizer.token_to_id("[PAD]"))
            .unwrap_or(0) as i64;

        Ok(Self {
            inner: Arc::new(OnnxInner {
                session: Mutex::new(session),
                tokenizer,
                pad_id,
                dimensions: profile.dimensions,
            }),
            profile,
        })
    }

    async fn run_guarded(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let _guard = inference_lock().await;
        let inner = Arc::clone(&self.inner);
        let result = tokio::task::spawn_blocking(move || inner.run(&texts))
            .await
            .map_err(|e| EmbeddingError::Runtime(format!("inference task panicked: {e}")))?;
        // Yield so runtime-internal cleanup callbacks can fire between calls.
        tokio::task::yield_now().await;
        result
    }
}

#[async_trait]
impl EmbeddingService for OnnxEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let prefixed = format!("{}{}", self.profile.query_prefix, text);
        let mut vectors = self.run_guarded(vec![prefixed]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Runtime("missing pooled output".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let prefixed = texts
            .iter()
            .map(|t| format!("{}{}", self.profile.document_prefix, t))
            .collect();
        self.run_guarded(prefixed).await
    }

    fn dimensions(&self) -> usize {
        self.profile.dimensions
    }

    fn model_name(&self) -> &str {
        &self.profile.model_id
    }

    fn max_tokens(&self) -> usize {
        self.profile.max_tokens
    }

    fn chunk_tokens(&self) -> usize {
        self.profile.chunk_tokens
    }
}

impl OnnxInner {
    fn run(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let encodings = texts
            .iter()
            .map(|t| self.tokenizer.encode(t.as_str(), true))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| EmbeddingError::Tokenizer(format!("tokenize inputs: {e}")))?;

        let batch = encodings.len();
        let seq_len = encodings.iter().map(Encoding::len).max().unwrap_or(0);

        let mut input_ids = Array2::<i64>::zeros((batch, seq_len));
        let mut attention_mask = Array2::<i64>::zeros((batch, seq_len));
        let mut attention_rows: Vec<Vec<i64>> = Vec::with_capacity(batch);

        for (row, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            for (col, (&id, &m)) in ids.iter().zip(mask.iter()).enumerate() {
                input_ids[(row, col)] = i64::from(id);
                attention_mask[(row, col)] = i64::from(m);
            }
            for col in ids.len()..seq_len {
                input_ids[(row, col)] = self.pad_id;
                attention_mask[(row, col)] = 0;
            }
            attention_rows.push((0..seq_len).map(|i| attention_mask[(row, i)]).collect());
        }

        let input_ids = Tensor::from_array(input_ids)
            .map_err(|e| EmbeddingError::Runtime(format!("prepare input_ids: {e}")))?;
        let attention_tensor = Tensor::from_array(attention_mask)
            .map_err(|e| EmbeddingError::Runtime(format!("prepare attention_mask: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| EmbeddingError::Runtime("session mutex poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![input_ids, attention_tensor])
            .map_err(|e| EmbeddingError::Runtime(format!("execute session: {e}")))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbeddingError::Runtime(format!("extract output tensor: {e}")))?;
        if shape.len() != 3 {
            return Err(EmbeddingError::Runtime(format!(
                "model output must be rank-3 [batch, seq_len, hidden], got {shape:?}"
            )));
        }

        let hidden: usize = shape[2]
            .try_into()
            .map_err(|_| EmbeddingError::Runtime("negative hidden dimension".into()))?;
        if hidden != self.dimensions {
            return Err(EmbeddingError::Runtime(format!(
                "model hidden size {hidden} does not match configured dimensions {}",
                self.dimensions
            )));
        }

        Ok(mean_pool(data, &attention_rows, seq_len, hidden))
    }
}

/// Attention-masked mean pooling followed by L2 normalisation.
fn mean_pool(
    data: &[f32],
    attention_rows: &[Vec<i64>],
    seq_len: usize,
    hidden: usize,
) -> Vec<Vec<f32>> {
    let mut results = Vec::with_capacity(attention_rows.len());
    for (b, row) in attention_rows.iter().enumerate() {
        let mut sum = vec![0f32; hidden];
        let mut count = 0f32;
        for (t, &mask) in row.iter().enumerate().take(seq_len) {
            if mask == 1 {
                let base = (b * seq_len + t) * hidden;
                for (h, value) in sum.iter_mut().enumerate() {
                    *value += data[base + h];
                }
                count += 1.0;
            }
        }
        if count > 0.0 {
            for value in &mut sum {
                *value /= count;
            }
        }
        l2_normalize(&mut sum);
        results.push(sum);
    }
    results
}
