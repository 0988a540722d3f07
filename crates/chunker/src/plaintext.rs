use crate::extract::ExtractionResult;
use crate::filename_of;
use crate::split::{merge_paragraphs, split_paragraphs};
use silo_protocol::{token_estimate, ChunkRecord};

/// Chunk a plain body: one chunk when it fits the budget, otherwise merged
/// paragraphs with sentence sub-splitting for oversized ones.
pub(crate) fn chunk(
    file_path: &str,
    extraction: &ExtractionResult,
    max_chunk_tokens: usize,
) -> Vec<ChunkRecord> {
    let body = extraction.body.trim_end();
    if body.trim().is_empty() {
        return Vec::new();
    }

    #[allow(clippy::cast_possible_truncation)]
    let offset = extraction.metadata_line_count as u32;
    let filename = filename_of(file_path);

    if token_estimate(body) <= max_chunk_tokens {
        // Leading blank lines (e.g. after a stripped shebang) stay out of
        // the reported range.
        #[allow(clippy::cast_possible_truncation)]
        let leading_blank = body
            .lines()
            .take_while(|line| line.trim().is_empty())
            .count() as u32;
        #[allow(clippy::cast_possible_truncation)]
        let lines = body.lines().count().max(1) as u32;
        return vec![ChunkRecord::new(
            file_path,
            0,
            vec![filename],
            body.trim(),
            offset + leading_blank + 1,
            offset + lines.max(leading_blank + 1),
        )];
    }

    let paragraphs = split_paragraphs(body, 1);
    let spans = merge_paragraphs(paragraphs, max_chunk_tokens);

    spans
        .into_iter()
        .filter(|span| !span.text.trim().is_empty())
        .enumerate()
        .map(|(index, span)| {
            #[allow(clippy::cast_possible_truncation)]
            ChunkRecord::new(
                file_path,
                index as u32,
                vec![filename.clone()],
                span.text.trim(),
                offset + span.start_line,
                offset + span.end_line,
            )
        })
        .collect()
}
