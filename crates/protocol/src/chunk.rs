use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single chunk of text derived from one source file.
///
/// Chunks for a file form a dense 0-based sequence; line numbers are 1-based
/// and refer to the *original* file, including any stripped metadata prefix
/// (frontmatter, shebang).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Normalized file path (forward slashes).
    pub file_path: String,
    /// Stable order of the chunk within the file, starting at 0.
    pub chunk_index: u32,
    /// Ordered section labels placing the chunk in the document hierarchy,
    /// e.g. `["Architecture", "Pipeline"]` or `["FileManager"]`.
    pub section_path: Vec<String>,
    /// Text content of the chunk.
    pub text: String,
    /// First line of the chunk in original-file coordinates (1-based).
    pub start_line: u32,
    /// Last line of the chunk, inclusive.
    pub end_line: u32,
    /// Per-file metadata shared by all of the file's chunks.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Stable blake3 digest of `text`.
    pub content_hash: String,
    /// Heading depth for markdown sections (0 for the preamble).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_depth: Option<u8>,
    /// Flattened searchable form of `metadata`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags_text: Option<String>,
}

impl ChunkRecord {
    pub fn new(
        file_path: impl Into<String>,
        chunk_index: u32,
        section_path: Vec<String>,
        text: impl Into<String>,
        start_line: u32,
        end_line: u32,
    ) -> Self {
        let text = text.into();
        let content_hash = content_hash(&text);
        Self {
            file_path: file_path.into(),
            chunk_index,
            section_path,
            text,
            start_line,
            end_line,
            metadata: Map::new(),
            content_hash,
            heading_depth: None,
            tags_text: None,
        }
    }

    /// Estimated token count of this chunk's text.
    #[must_use]
    pub fn tokens(&self) -> usize {
        token_estimate(&self.text)
    }
}

/// Uniform token approximation used by every chunker: `ceil(len / 4)`.
///
/// All chunkers must share this estimate so cross-silo behaviour is
/// identical regardless of which model ultimately embeds the text.
#[must_use]
pub fn token_estimate(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Deterministic content digest, a function of `text` only.
#[must_use]
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(token_estimate(""), 0);
        assert_eq!(token_estimate("abc"), 1);
        assert_eq!(token_estimate("abcd"), 1);
        assert_eq!(token_estimate("abcde"), 2);
    }

    #[test]
    fn content_hash_is_stable_for_equal_text() {
        let a = content_hash("fn main() {}");
        let b = content_hash("fn main() {}");
        assert_eq!(a, b);
        assert_ne!(a, content_hash("fn main() { }"));
    }

    #[test]
    fn new_chunk_hashes_its_text() {
        let chunk = ChunkRecord::new("src/lib.rs", 0, vec!["lib.rs".into()], "hello", 1, 1);
        assert_eq!(chunk.content_hash, content_hash("hello"));
        assert_eq!(chunk.tokens(), 2);
    }
}
