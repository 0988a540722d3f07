//! # Silo Chunker
//!
//! Extraction and chunking pipeline: raw file bytes become a clean body plus
//! metadata, and the body becomes an ordered list of chunks with section
//! paths and original-file line ranges.
//!
//! ```text
//! raw text
//!     │
//!     ├──> Extractor (frontmatter / shebang stripping)
//!     │      └─> ExtractionResult
//!     │
//!     └──> Chunker (plaintext | heading | AST)
//!            └─> Vec<ChunkRecord>
//! ```
//!
//! Dispatch is a registry keyed by lower-cased file extension; unknown
//! extensions get the plaintext pair.

mod code;
mod error;
mod extract;
mod heading;
mod language;
mod plaintext;
mod split;

pub use error::{ChunkerError, Result};
pub use extract::{flatten_metadata, ExtractionResult, Extractor};
pub use language::Grammar;

use silo_protocol::ChunkRecord;
use std::path::Path;

/// Which chunking strategy a file gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkerKind {
    Plaintext,
    Heading,
    Code,
}

/// Paired extractor and chunker for one extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Processor {
    pub extractor: Extractor,
    pub chunker: ChunkerKind,
}

impl Processor {
    const PLAINTEXT: Self = Self {
        extractor: Extractor::Plaintext,
        chunker: ChunkerKind::Plaintext,
    };

    const MARKDOWN: Self = Self {
        extractor: Extractor::Markdown,
        chunker: ChunkerKind::Heading,
    };

    const CODE: Self = Self {
        extractor: Extractor::Code,
        chunker: ChunkerKind::Code,
    };
}

/// Look up the `{extractor, chunker}` pair for a lower-cased extension.
#[must_use]
pub fn processor_for_extension(ext: &str) -> Processor {
    match ext.to_lowercase().as_str() {
        "md" | "mdx" | "markdown" => Processor::MARKDOWN,
        "rs" | "py" | "pyw" | "js" | "mjs" | "cjs" | "jsx" | "ts" | "tsx" | "go" | "java"
        | "c" | "h" | "cpp" | "cc" | "cxx" | "hpp" | "hh" | "cs" | "rb" | "swift" | "kt"
        | "kts" => Processor::CODE,
        _ => Processor::PLAINTEXT,
    }
}

/// Extract and chunk one file's raw text in a single call.
///
/// Parse failures inside the code chunker degrade to the plaintext chunker
/// with a warning; this function only errors on internal invariant breaks.
pub fn chunk_text(file_path: &str, raw: &str, max_chunk_tokens: usize) -> Result<Vec<ChunkRecord>> {
    let processor = processor_for_extension(extension_of(file_path));
    let extraction = processor.extractor.extract(raw);
    chunk_extraction(processor.chunker, file_path, &extraction, max_chunk_tokens)
}

/// Run a specific chunker over an already-extracted body.
pub fn chunk_extraction(
    kind: ChunkerKind,
    file_path: &str,
    extraction: &ExtractionResult,
    max_chunk_tokens: usize,
) -> Result<Vec<ChunkRecord>> {
    let mut chunks = match kind {
        ChunkerKind::Plaintext => plaintext::chunk(file_path, extraction, max_chunk_tokens),
        ChunkerKind::Heading => heading::chunk(file_path, extraction, max_chunk_tokens),
        ChunkerKind::Code => match code::chunk(file_path, extraction, max_chunk_tokens) {
            Ok(chunks) => chunks,
            Err(err) => {
                log::warn!("AST chunking failed for {file_path}: {err}; falling back to plaintext");
                plaintext::chunk(file_path, extraction, max_chunk_tokens)
            }
        },
    };

    attach_metadata(&mut chunks, extraction);
    debug_assert!(chunks
        .iter()
        .enumerate()
        .all(|(i, c)| c.chunk_index as usize == i));
    Ok(chunks)
}

/// File basename used as the default section label.
pub(crate) fn filename_of(file_path: &str) -> String {
    Path::new(file_path)
        .file_name()
        .map_or_else(|| file_path.to_string(), |n| n.to_string_lossy().to_string())
}

fn extension_of(file_path: &str) -> &str {
    Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
}

fn attach_metadata(chunks: &mut [ChunkRecord], extraction: &ExtractionResult) {
    if extraction.metadata.is_empty() {
        return;
    }
    let tags = flatten_metadata(&extraction.metadata);
    for chunk in chunks {
        chunk.metadata = extraction.metadata.clone();
        if !tags.is_empty() {
            chunk.tags_text = Some(tags.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_defaults_to_plaintext() {
        assert_eq!(processor_for_extension("xyz"), Processor::PLAINTEXT);
        assert_eq!(processor_for_extension(""), Processor::PLAINTEXT);
        assert_eq!(processor_for_extension("md"), Processor::MARKDOWN);
        assert_eq!(processor_for_extension("RS"), Processor::CODE);
    }

    #[test]
    fn empty_file_yields_no_chunks() {
        let chunks = chunk_text("notes.txt", "", 500).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn shebang_only_file_yields_no_chunks() {
        let chunks = chunk_text("run.py", "#!/usr/bin/env python3\n", 500).unwrap();
        assert!(chunks.is_empty());
    }
}
