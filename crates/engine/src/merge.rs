use silo_protocol::{SearchResult, SiloSearchResult};

/// Cross-silo score calibration.
///
/// Raw RRF scores from different silos are not comparable: silo size skews
/// the rank distribution. Each silo's results are divided by that silo's
/// maximum `rrf_score` (zero-guarded), yielding a calibrated `score` in
/// `[0, 1]`; `best_cosine_similarity` is passed through untouched for
/// diagnostics. Final ordering is calibrated score descending, ties broken
/// by cosine similarity then by file path.
#[must_use]
pub fn calibrate(groups: Vec<(String, Vec<SiloSearchResult>)>) -> Vec<SearchResult> {
    let mut merged = Vec::new();

    for (silo_name, results) in groups {
        let max_score = results
            .iter()
            .map(|r| r.rrf_score)
            .fold(0.0f32, f32::max);
        let divisor = if max_score > f32::EPSILON { max_score } else { 1.0 };

        for result in results {
            merged.push(SearchResult {
                score: result.rrf_score / divisor,
                file_path: result.file_path,
                match_type: result.match_type,
                silo_name: silo_name.clone(),
                chunks: result.chunks,
                rrf_score: result.rrf_score,
                best_cosine_similarity: result.best_cosine_similarity,
            });
        }
    }

    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.best_cosine_similarity
                    .partial_cmp(&a.best_cosine_similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.file_path.cmp(&b.file_path))
    });
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_protocol::MatchType;

    fn result(file: &str, rrf: f32, cosine: f32) -> SiloSearchResult {
        SiloSearchResult {
            file_path: file.to_string(),
            rrf_score: rrf,
            best_cosine_similarity: cosine,
            match_type: MatchType::Both,
            chunks: Vec::new(),
        }
    }

    #[test]
    fn each_silo_is_normalized_by_its_own_max() {
        let groups = vec![
            (
                "big".to_string(),
                vec![result("big/a.rs", 0.10, 0.9), result("big/b.rs", 0.05, 0.5)],
            ),
            (
                "small".to_string(),
                vec![result("small/c.rs", 0.02, 0.8)],
            ),
        ];

        let merged = calibrate(groups);
        // Every silo's best result calibrates to 1.0.
        assert_eq!(merged[0].score, 1.0);
        assert_eq!(merged[1].score, 1.0);
        let names: Vec<&str> = merged[..2].iter().map(|r| r.silo_name.as_str()).collect();
        assert!(names.contains(&"big") && names.contains(&"small"));
        // The big silo's weaker hit lands at 0.5, below both leaders.
        assert_eq!(merged[2].file_path, "big/b.rs");
        assert!((merged[2].score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn ties_break_on_cosine_then_path() {
        let groups = vec![
            ("a".to_string(), vec![result("x.rs", 0.10, 0.2)]),
            ("b".to_string(), vec![result("y.rs", 0.20, 0.9)]),
            ("c".to_string(), vec![result("w.rs", 0.30, 0.9)]),
        ];
        let merged = calibrate(groups);
        // All three calibrate to 1.0; cosine 0.9 beats 0.2, path breaks the rest.
        assert_eq!(merged[0].file_path, "w.rs");
        assert_eq!(merged[1].file_path, "y.rs");
        assert_eq!(merged[2].file_path, "x.rs");
    }

    #[test]
    fn zero_scores_do_not_divide_by_zero() {
        let groups = vec![("z".to_string(), vec![result("n.rs", 0.0, 0.0)])];
        let merged = calibrate(groups);
        assert_eq!(merged[0].score, 0.0);
    }
}
