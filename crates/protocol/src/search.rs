use serde::{Deserialize, Serialize};

/// RRF constant `k` shared by every ranker.
pub const RRF_K: f32 = 60.0;

/// Weights applied to the four rankers during reciprocal rank fusion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RrfWeights {
    pub vector: f32,
    pub bm25: f32,
    pub trigram: f32,
    pub filepath: f32,
}

/// Named weight vectors exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPreset {
    #[default]
    Balanced,
    Semantic,
    Keyword,
    Code,
}

impl SearchPreset {
    /// Weight vector fed to the fusion for this preset.
    #[must_use]
    pub const fn weights(self) -> RrfWeights {
        match self {
            Self::Balanced => RrfWeights {
                vector: 1.0,
                bm25: 1.0,
                trigram: 0.5,
                filepath: 0.5,
            },
            Self::Semantic => RrfWeights {
                vector: 2.0,
                bm25: 0.7,
                trigram: 0.3,
                filepath: 0.3,
            },
            Self::Keyword => RrfWeights {
                vector: 0.3,
                bm25: 2.0,
                trigram: 1.2,
                filepath: 0.5,
            },
            Self::Code => RrfWeights {
                vector: 1.0,
                bm25: 1.2,
                trigram: 0.7,
                filepath: 1.5,
            },
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::Semantic => "semantic",
            Self::Keyword => "keyword",
            Self::Code => "code",
        }
    }

    /// Parse a preset name; unknown names fall back to `Balanced`.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "semantic" => Self::Semantic,
            "keyword" => Self::Keyword,
            "code" => Self::Code,
            _ => Self::Balanced,
        }
    }
}

/// Which rankers contributed to a file's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Semantic,
    Keyword,
    Both,
}

/// One matching chunk inside a file result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkHit {
    pub section_path: Vec<String>,
    pub text: String,
    pub start_line: u32,
    pub end_line: u32,
    /// Chunk-level RRF score.
    pub score: f32,
}

/// A per-silo search result, before cross-silo calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiloSearchResult {
    pub file_path: String,
    /// Best chunk RRF score for the file.
    pub rrf_score: f32,
    /// Raw dot product of the best vector hit, for diagnostics.
    pub best_cosine_similarity: f32,
    pub match_type: MatchType,
    /// Top chunks for the file, capped at 3, sorted by chunk RRF.
    pub chunks: Vec<ChunkHit>,
}

/// A calibrated cross-silo search result returned to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub file_path: String,
    /// Calibrated score in `[0, 1]`.
    pub score: f32,
    pub match_type: MatchType,
    pub silo_name: String,
    pub chunks: Vec<ChunkHit>,
    pub rrf_score: f32,
    pub best_cosine_similarity: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_parse_round_trips() {
        for preset in [
            SearchPreset::Balanced,
            SearchPreset::Semantic,
            SearchPreset::Keyword,
            SearchPreset::Code,
        ] {
            assert_eq!(SearchPreset::parse(preset.as_str()), preset);
        }
        assert_eq!(SearchPreset::parse("no-such"), SearchPreset::Balanced);
    }

    #[test]
    fn code_preset_boosts_filepath() {
        let code = SearchPreset::Code.weights();
        let balanced = SearchPreset::Balanced.weights();
        assert!(code.filepath > balanced.filepath);
    }
}
