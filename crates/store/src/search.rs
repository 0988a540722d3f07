use crate::error::Result;
use crate::store::{bytes_to_vector, SiloStore};
use nucleo_matcher::pattern::{CaseMatching, Normalization, Pattern};
use nucleo_matcher::Matcher;
use rusqlite::params;
use silo_protocol::{ChunkHit, MatchType, RrfWeights, SiloSearchResult, RRF_K};
use std::collections::{HashMap, HashSet};

/// How many candidates each ranker contributes before fusion.
fn candidate_pool(k: usize) -> usize {
    (k.max(1) * 5).max(50)
}

impl SiloStore {
    /// Run the four rankers (vector, BM25, trigram, filepath) and fuse them
    /// with reciprocal rank fusion, grouping chunk hits per file.
    ///
    /// `query_vector` may be empty (e.g. when the silo cannot embed), in
    /// which case only the lexical rankers contribute.
    pub fn hybrid_search(
        &self,
        query_vector: &[f32],
        query_text: &str,
        k: usize,
        weights: RrfWeights,
    ) -> Result<Vec<SiloSearchResult>> {
        let pool = candidate_pool(k);
        let files_by_chunk = self.chunk_files()?;
        if files_by_chunk.is_empty() {
            return Ok(Vec::new());
        }

        let cosine = if query_vector.is_empty() {
            HashMap::new()
        } else {
            self.cosine_scores(query_vector)?
        };
        let vector_ranked = top_ranked(&cosine, pool);
        let bm25_ranked = self.bm25_ranked(query_text, pool)?;
        let trigram_ranked = self.trigram_ranked(query_text, pool)?;
        let filepath_ranked = filepath_ranked(&files_by_chunk, query_text, pool);

        log::debug!(
            "hybrid rankers: vector={} bm25={} trigram={} filepath={}",
            vector_ranked.len(),
            bm25_ranked.len(),
            trigram_ranked.len(),
            filepath_ranked.len()
        );

        // RRF: score(c) = Σ_r weight_r / (RRF_K + rank_r), ranks 1-based.
        let mut scores: HashMap<i64, f32> = HashMap::new();
        let mut semantic_ids: HashSet<i64> = HashSet::new();
        let mut keyword_ids: HashSet<i64> = HashSet::new();

        accumulate(&vector_ranked, weights.vector, &mut scores, &mut semantic_ids);
        accumulate(&bm25_ranked, weights.bm25, &mut scores, &mut keyword_ids);
        accumulate(&trigram_ranked, weights.trigram, &mut scores, &mut keyword_ids);
        accumulate(&filepath_ranked, weights.filepath, &mut scores, &mut keyword_ids);

        let mut ranked: Vec<(i64, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        self.group_by_file(&ranked, &cosine, &semantic_ids, &keyword_ids, k)
    }

    fn chunk_files(&self) -> Result<HashMap<i64, String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT id, file_path FROM chunks")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut map = HashMap::new();
        for row in rows {
            let (id, file_path): (i64, String) = row?;
            map.insert(id, file_path);
        }
        Ok(map)
    }

    /// Linear scan over the vectors table; unit-norm vectors make the dot
    /// product the cosine similarity.
    fn cosine_scores(&self, query_vector: &[f32]) -> Result<HashMap<i64, f32>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT chunk_id, embedding FROM vectors")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut scores = HashMap::new();
        for row in rows {
            let (chunk_id, bytes) = row?;
            let vector = bytes_to_vector(&bytes);
            let dot: f32 = vector
                .iter()
                .zip(query_vector)
                .map(|(a, b)| a * b)
                .sum();
            scores.insert(chunk_id, dot);
        }
        Ok(scores)
    }

    fn bm25_ranked(&self, query_text: &str, pool: usize) -> Result<Vec<i64>> {
        let Some(expr) = fts_match_expr(query_text) else {
            return Ok(Vec::new());
        };
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT rowid FROM chunks_fts WHERE chunks_fts MATCH ?1 ORDER BY rank LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![expr, pool as i64], |row| row.get(0))?;
        collect_ids(rows)
    }

    fn trigram_ranked(&self, query_text: &str, pool: usize) -> Result<Vec<i64>> {
        let trimmed = query_text.trim();
        // The trigram tokenizer cannot match anything shorter than 3 chars.
        if trimmed.chars().count() < 3 {
            return Ok(Vec::new());
        }
        let expr = format!("\"{}\"", trimmed.replace('"', "\"\""));
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT rowid FROM chunks_trigram WHERE chunks_trigram MATCH ?1 ORDER BY rank LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![expr, pool as i64], |row| row.get(0))?;
        collect_ids(rows)
    }

    fn group_by_file(
        &self,
        ranked: &[(i64, f32)],
        cosine: &HashMap<i64, f32>,
        semantic_ids: &HashSet<i64>,
        keyword_ids: &HashSet<i64>,
        k: usize,
    ) -> Result<Vec<SiloSearchResult>> {
        struct FileEntry {
            result: SiloSearchResult,
            semantic: bool,
            keyword: bool,
        }

        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT file_path, section_path, text, start_line, end_line
             FROM chunks WHERE id = ?1",
        )?;

        let mut order: Vec<String> = Vec::new();
        let mut files: HashMap<String, FileEntry> = HashMap::new();

        for &(chunk_id, score) in ranked {
            let row = stmt.query_row(params![chunk_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, u32>(4)?,
                ))
            });
            let Ok((file_path, section_json, text, start_line, end_line)) = row else {
                continue;
            };
            let section_path: Vec<String> =
                serde_json::from_str(&section_json).unwrap_or_default();
            let similarity = cosine.get(&chunk_id).copied().unwrap_or(0.0);

            let entry = files.entry(file_path.clone()).or_insert_with(|| {
                order.push(file_path.clone());
                FileEntry {
                    result: SiloSearchResult {
                        file_path: file_path.clone(),
                        rrf_score: score,
                        best_cosine_similarity: similarity,
                        match_type: MatchType::Keyword,
                        chunks: Vec::new(),
                    },
                    semantic: false,
                    keyword: false,
                }
            });

            entry.semantic |= semantic_ids.contains(&chunk_id);
            entry.keyword |= keyword_ids.contains(&chunk_id);
            if similarity > entry.result.best_cosine_similarity {
                entry.result.best_cosine_similarity = similarity;
            }
            if entry.result.chunks.len() < 3 {
                entry.result.chunks.push(ChunkHit {
                    section_path,
                    text,
                    start_line,
                    end_line,
                    score,
                });
            }
        }

        let mut results: Vec<SiloSearchResult> = order
            .into_iter()
            .filter_map(|file_path| files.remove(&file_path))
            .map(|entry| {
                let mut result = entry.result;
                result.match_type = match (entry.semantic, entry.keyword) {
                    (true, true) => MatchType::Both,
                    (true, false) => MatchType::Semantic,
                    _ => MatchType::Keyword,
                };
                result
            })
            .collect();

        results.sort_by(|a, b| {
            b.rrf_score
                .partial_cmp(&a.rrf_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.file_path.cmp(&b.file_path))
        });
        results.truncate(k);
        Ok(results)
    }
}

fn collect_ids(
    rows: impl Iterator<Item = rusqlite::Result<i64>>,
) -> Result<Vec<i64>> {
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

fn accumulate(
    ranked: &[i64],
    weight: f32,
    scores: &mut HashMap<i64, f32>,
    hits: &mut HashSet<i64>,
) {
    for (rank, &chunk_id) in ranked.iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let contribution = weight / (RRF_K + rank as f32 + 1.0);
        *scores.entry(chunk_id).or_insert(0.0) += contribution;
        hits.insert(chunk_id);
    }
}

fn top_ranked(scores: &HashMap<i64, f32>, pool: usize) -> Vec<i64> {
    let mut ranked: Vec<(i64, f32)> = scores.iter().map(|(&id, &s)| (id, s)).collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(pool);
    ranked.into_iter().map(|(id, _)| id).collect()
}

/// Rank whole files by fuzzy-matching the query against their paths; every
/// chunk of a ranked file shares the file's rank.
fn filepath_ranked(
    files_by_chunk: &HashMap<i64, String>,
    query_text: &str,
    pool: usize,
) -> Vec<i64> {
    let query = query_text.trim();
    if query.is_empty() {
        return Vec::new();
    }

    let mut chunks_by_file: HashMap<&str, Vec<i64>> = HashMap::new();
    for (&chunk_id, file_path) in files_by_chunk {
        chunks_by_file.entry(file_path.as_str()).or_default().push(chunk_id);
    }

    let mut matcher = Matcher::new(nucleo_matcher::Config::DEFAULT);
    let pattern = Pattern::parse(query, CaseMatching::Ignore, Normalization::Smart);

    let mut scored: Vec<(String, u32)> = chunks_by_file
        .keys()
        .filter_map(|path| {
            let haystack = nucleo_matcher::Utf32String::from(*path);
            pattern
                .score(haystack.slice(..), &mut matcher)
                .map(|score| ((*path).to_string(), score))
        })
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scored.truncate(pool);

    let mut ranked = Vec::new();
    for (path, _) in scored {
        let mut ids = chunks_by_file.remove(path.as_str()).unwrap_or_default();
        ids.sort_unstable();
        ranked.extend(ids);
    }
    ranked
}

/// Build an FTS5 MATCH expression from sanitized query tokens so user
/// punctuation cannot break the match grammar.
fn fts_match_expr(query_text: &str) -> Option<String> {
    let tokens: Vec<String> = query_text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}
