use once_cell::sync::Lazy;
use regex::Regex;
use silo_protocol::token_estimate;
use unicode_segmentation::UnicodeSegmentation;

/// A contiguous piece of body text with 1-based line coordinates relative to
/// the extracted body (callers add the metadata offset).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Span {
    pub text: String,
    pub start_line: u32,
    pub end_line: u32,
}

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+").expect("valid regex"));

/// Split text into paragraphs on blank-line boundaries.
///
/// `first_line` is the 1-based body line the text starts on.
pub(crate) fn split_paragraphs(text: &str, first_line: u32) -> Vec<Span> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_start = 0u32;

    for (offset, line) in text.lines().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let line_no = first_line + offset as u32;
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(span_from_lines(&current, current_start));
                current.clear();
            }
        } else {
            if current.is_empty() {
                current_start = line_no;
            }
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(span_from_lines(&current, current_start));
    }

    paragraphs
}

fn span_from_lines(lines: &[&str], start_line: u32) -> Span {
    #[allow(clippy::cast_possible_truncation)]
    let end_line = start_line + lines.len() as u32 - 1;
    Span {
        text: lines.join("\n"),
        start_line,
        end_line,
    }
}

/// Greedily merge consecutive paragraphs joined by `"\n\n"` while the merged
/// candidate stays within the token budget; sub-split any paragraph that is
/// oversized on its own.
pub(crate) fn merge_paragraphs(paragraphs: Vec<Span>, max_tokens: usize) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    let mut current: Option<Span> = None;

    for paragraph in paragraphs {
        if token_estimate(&paragraph.text) > max_tokens {
            if let Some(done) = current.take() {
                merged.push(done);
            }
            merged.extend(split_sentences(&paragraph, max_tokens));
            continue;
        }

        match current.take() {
            None => current = Some(paragraph),
            Some(mut acc) => {
                let candidate_len = acc.text.len() + 2 + paragraph.text.len();
                if candidate_len.div_ceil(4) <= max_tokens {
                    acc.text.push_str("\n\n");
                    acc.text.push_str(&paragraph.text);
                    acc.end_line = paragraph.end_line;
                    current = Some(acc);
                } else {
                    merged.push(acc);
                    current = Some(paragraph);
                }
            }
        }
    }
    if let Some(done) = current {
        merged.push(done);
    }

    merged
}

/// Sub-split an oversized span on sentence boundaries; every piece shares the
/// parent span's line range.
pub(crate) fn split_sentences(span: &Span, max_tokens: usize) -> Vec<Span> {
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    for sentence in span.text.split_sentence_bounds() {
        if token_estimate(sentence) > max_tokens {
            if !current.trim().is_empty() {
                pieces.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
            pieces.extend(split_words(sentence, max_tokens));
            continue;
        }

        if !current.is_empty() && token_estimate(&current) + token_estimate(sentence) > max_tokens {
            pieces.push(std::mem::take(&mut current));
        }
        current.push_str(sentence);
    }
    if !current.trim().is_empty() {
        pieces.push(current);
    }

    pieces
        .into_iter()
        .filter(|piece| !piece.trim().is_empty())
        .map(|text| Span {
            text: text.trim().to_string(),
            start_line: span.start_line,
            end_line: span.end_line,
        })
        .collect()
}

/// Last-resort split for a single sentence that exceeds the budget on its own.
fn split_words(sentence: &str, max_tokens: usize) -> Vec<String> {
    let budget_chars = max_tokens.saturating_mul(4).max(1);
    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in WORD.find_iter(sentence) {
        if !current.is_empty() && current.len() + 1 + word.as_str().len() > budget_chars {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word.as_str());
    }
    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

/// Greedily merge consecutive lines joined by `"\n"` under the budget.
/// Used by the code chunker, whose sub-chunks keep the parent line range.
pub(crate) fn split_lines_budget(text: &str, max_tokens: usize) -> Vec<String> {
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if current.is_empty() {
            current.push_str(line);
            continue;
        }
        let candidate_len = current.len() + 1 + line.len();
        if candidate_len.div_ceil(4) <= max_tokens {
            current.push('\n');
            current.push_str(line);
        } else {
            pieces.push(std::mem::take(&mut current));
            current.push_str(line);
        }
    }
    if !current.trim().is_empty() {
        pieces.push(current);
    }

    pieces.retain(|piece| !piece.trim().is_empty());
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn paragraphs_track_line_ranges() {
        let spans = split_paragraphs("alpha\nbeta\n\n\ngamma\n", 1);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "alpha\nbeta");
        assert_eq!((spans[0].start_line, spans[0].end_line), (1, 2));
        assert_eq!((spans[1].start_line, spans[1].end_line), (5, 5));
    }

    #[test]
    fn merge_respects_budget() {
        let paragraphs = split_paragraphs("aaaa\n\nbbbb\n\ncccc\n", 1);
        // Each paragraph is 1 token; budget of 3 tokens fits two merged
        // paragraphs ("aaaa\n\nbbbb" = 10 chars = 3 tokens) but not three.
        let merged = merge_paragraphs(paragraphs, 3);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].text, "aaaa\n\nbbbb");
        assert_eq!(merged[1].text, "cccc");
    }

    #[test]
    fn oversized_paragraph_splits_on_sentences() {
        let text = "First sentence here. Second sentence here. Third sentence here.";
        let span = Span {
            text: text.to_string(),
            start_line: 1,
            end_line: 1,
        };
        let pieces = split_sentences(&span, 8);
        assert!(pieces.len() >= 2);
        for piece in &pieces {
            assert_eq!((piece.start_line, piece.end_line), (1, 1));
        }
    }

    #[test]
    fn line_budget_split_merges_greedily() {
        let text = "line one\nline two\nline three";
        let pieces = split_lines_budget(text, 5);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0], "line one\nline two");
        assert_eq!(pieces[1], "line three");
    }

    #[test]
    fn single_long_line_is_one_piece() {
        let text = "x".repeat(400);
        let pieces = split_lines_budget(&text, 10);
        assert_eq!(pieces.len(), 1);
    }
}
