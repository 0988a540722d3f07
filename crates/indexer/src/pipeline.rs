use crate::error::Result;
use silo_embedding::EmbeddingService;
use silo_store::SiloStore;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

/// The per-file indexing pipeline: read, extract, chunk, embed, upsert.
///
/// One pipeline exists per silo; it owns nothing but shared handles, so the
/// reconciler and the watcher drive the same instance.
pub struct FilePipeline {
    store: Arc<SiloStore>,
    service: Arc<dyn EmbeddingService>,
}

impl FilePipeline {
    pub fn new(store: Arc<SiloStore>, service: Arc<dyn EmbeddingService>) -> Self {
        Self { store, service }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SiloStore> {
        &self.store
    }

    /// Index one file, replacing its prior chunks. Returns the chunk count.
    ///
    /// A file that extracts to zero chunks (empty, shebang-only) is removed
    /// from the store instead, keeping the mtimes/chunks invariant intact.
    pub async fn index_file(&self, path: &Path) -> Result<usize> {
        let file_path = normalize_path(path);
        let raw = tokio::fs::read(path).await?;
        let raw = String::from_utf8_lossy(&raw);
        let mtime = mtime_ms(path)?;

        let chunks = silo_chunker::chunk_text(&file_path, &raw, self.service.chunk_tokens())?;
        if chunks.is_empty() {
            log::debug!("{file_path}: no chunks, clearing stored rows");
            self.store.delete_file_chunks(&file_path)?;
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.service.embed_batch(&texts).await?;
        self.store
            .upsert_file_chunks(&file_path, &chunks, &vectors, mtime)?;

        log::debug!("{file_path}: indexed {} chunks", chunks.len());
        Ok(chunks.len())
    }

    /// Remove a file's chunks and mtime.
    pub fn remove_file(&self, path: &Path) -> Result<()> {
        self.store.delete_file_chunks(&normalize_path(path))?;
        Ok(())
    }
}

/// Canonical store key for a path: forward slashes, no platform quirks.
#[must_use]
pub fn normalize_path(path: &Path) -> String {
    let mut normalized = path.to_string_lossy().to_string();
    if normalized.contains('\\') {
        normalized = normalized.replace('\\', "/");
    }
    normalized
}

/// Modification time in milliseconds since the epoch.
pub fn mtime_ms(path: &Path) -> std::io::Result<i64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64))
}
