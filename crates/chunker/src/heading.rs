use crate::extract::ExtractionResult;
use crate::filename_of;
use crate::split::{merge_paragraphs, split_paragraphs};
use once_cell::sync::Lazy;
use regex::Regex;
use silo_protocol::{token_estimate, ChunkRecord};

static ATX_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.*?)\s*#*\s*$").expect("valid regex"));

/// One heading-delimited region of the document.
#[derive(Debug)]
struct Section {
    labels: Vec<String>,
    depth: u8,
    /// Body line of the heading itself; `None` for the preamble.
    heading_line: Option<u32>,
    /// `(body_line, text)` for every line between this heading and the next.
    content: Vec<(u32, String)>,
}

impl Section {
    fn content_text(&self) -> String {
        self.content
            .iter()
            .map(|(_, line)| line.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn content_bounds(&self) -> Option<(u32, u32)> {
        let first = self
            .content
            .iter()
            .find(|(_, line)| !line.trim().is_empty())?
            .0;
        let last = self
            .content
            .iter()
            .rev()
            .find(|(_, line)| !line.trim().is_empty())?
            .0;
        Some((first, last))
    }
}

/// Chunk markdown into heading-scoped sections.
///
/// The label stack mirrors the heading hierarchy: a depth-`d` heading pops
/// the stack to below `d` and pushes its own text, so a section's
/// `section_path` is the chain of headings above it. Content before the
/// first heading becomes a preamble section labelled with the filename.
pub(crate) fn chunk(
    file_path: &str,
    extraction: &ExtractionResult,
    max_chunk_tokens: usize,
) -> Vec<ChunkRecord> {
    if extraction.body.trim().is_empty() {
        return Vec::new();
    }

    #[allow(clippy::cast_possible_truncation)]
    let offset = extraction.metadata_line_count as u32;
    let filename = filename_of(file_path);
    let sections = scan_sections(&extraction.body, &filename);

    let mut chunks = Vec::new();
    for section in &sections {
        let text = section.content_text();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some((first_content, last_content)) = section.content_bounds() else {
            continue;
        };

        if token_estimate(trimmed) <= max_chunk_tokens {
            let start = section.heading_line.unwrap_or(first_content);
            push_chunk(
                &mut chunks,
                file_path,
                section,
                trimmed,
                offset + start,
                offset + last_content,
            );
        } else {
            // Anchor paragraph line numbers at the section's first content
            // line, blank or not, so positions stay aligned with the body.
            let content_start = section.content.first().map_or(first_content, |(n, _)| *n);
            let paragraphs = split_paragraphs(&text, content_start);
            for span in merge_paragraphs(paragraphs, max_chunk_tokens) {
                if span.text.trim().is_empty() {
                    continue;
                }
                push_chunk(
                    &mut chunks,
                    file_path,
                    section,
                    span.text.trim(),
                    offset + span.start_line,
                    offset + span.end_line,
                );
            }
        }
    }

    chunks
}

fn push_chunk(
    chunks: &mut Vec<ChunkRecord>,
    file_path: &str,
    section: &Section,
    text: &str,
    start_line: u32,
    end_line: u32,
) {
    #[allow(clippy::cast_possible_truncation)]
    let index = chunks.len() as u32;
    let mut record = ChunkRecord::new(
        file_path,
        index,
        section.labels.clone(),
        text,
        start_line,
        end_line,
    );
    record.heading_depth = Some(section.depth);
    chunks.push(record);
}

fn scan_sections(body: &str, filename: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut stack: Vec<(u8, String)> = Vec::new();
    let mut current = Section {
        labels: vec![filename.to_string()],
        depth: 0,
        heading_line: None,
        content: Vec::new(),
    };
    let mut in_fence = false;

    for (idx, line) in body.lines().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let line_no = idx as u32 + 1;
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            current.content.push((line_no, line.to_string()));
            continue;
        }

        let heading = if in_fence {
            None
        } else {
            ATX_HEADING.captures(line)
        };

        match heading {
            Some(captures) => {
                sections.push(current);

                #[allow(clippy::cast_possible_truncation)]
                let depth = captures[1].len() as u8;
                let label = captures[2].trim().to_string();
                while stack.last().is_some_and(|(d, _)| *d >= depth) {
                    stack.pop();
                }
                stack.push((depth, label));

                current = Section {
                    labels: stack.iter().map(|(_, label)| label.clone()).collect(),
                    depth,
                    heading_line: Some(line_no),
                    content: Vec::new(),
                };
            }
            None => current.content.push((line_no, line.to_string())),
        }
    }
    sections.push(current);

    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Extractor;
    use pretty_assertions::assert_eq;

    fn md(raw: &str) -> Vec<ChunkRecord> {
        let extraction = Extractor::Markdown.extract(raw);
        chunk("docs/readme.md", &extraction, 500)
    }

    #[test]
    fn nested_headings_stack_labels() {
        let raw = "---\ntitle: X\naliases: [a,b]\ntags: [t1]\n---\n# H1\ntext\n## H2\nmore\n";
        let chunks = md(raw);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section_path, vec!["H1".to_string()]);
        assert_eq!(
            chunks[1].section_path,
            vec!["H1".to_string(), "H2".to_string()]
        );
        // Frontmatter occupies lines 1-5, so the H1 heading is line 6.
        assert_eq!(chunks[0].start_line, 6);
        assert_eq!(chunks[0].heading_depth, Some(1));
        assert_eq!(chunks[1].heading_depth, Some(2));
    }

    #[test]
    fn preamble_uses_filename_label() {
        let chunks = md("intro paragraph\n\n# First\nbody\n");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section_path, vec!["readme.md".to_string()]);
        assert_eq!(chunks[0].heading_depth, Some(0));
        assert_eq!(chunks[1].section_path, vec!["First".to_string()]);
    }

    #[test]
    fn sibling_headings_replace_each_other() {
        let chunks = md("# A\none\n## B\ntwo\n## C\nthree\n# D\nfour\n");
        let paths: Vec<Vec<String>> = chunks.iter().map(|c| c.section_path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                vec!["A".to_string()],
                vec!["A".to_string(), "B".to_string()],
                vec!["A".to_string(), "C".to_string()],
                vec!["D".to_string()],
            ]
        );
    }

    #[test]
    fn fenced_hash_lines_are_not_headings() {
        let chunks = md("# Real\n```sh\n# not a heading\necho hi\n```\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section_path, vec!["Real".to_string()]);
        assert!(chunks[0].text.contains("# not a heading"));
    }

    #[test]
    fn empty_sections_are_dropped() {
        let chunks = md("# Empty\n# Full\ncontent\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section_path, vec!["Full".to_string()]);
    }

    #[test]
    fn oversized_section_subsplits_with_same_labels() {
        let raw = format!("# Big\n{}\n\n{}\n", "a".repeat(300), "b".repeat(300));
        let extraction = Extractor::Markdown.extract(&raw);
        let chunks = chunk("docs/big.md", &extraction, 50);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert_eq!(c.section_path, vec!["Big".to_string()]);
        }
    }
}
