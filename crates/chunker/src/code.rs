use crate::error::{ChunkerError, Result};
use crate::extract::ExtractionResult;
use crate::filename_of;
use crate::language::{grammar_for_extension, Grammar};
use crate::split::split_lines_budget;
use silo_protocol::{token_estimate, ChunkRecord};
use std::path::Path;
use tree_sitter::{Node, Parser};

#[derive(Debug, Clone, PartialEq, Eq)]
enum SegmentKind {
    Definition(String),
    Comment,
    Other,
}

/// One top-level syntax node (or merged run of nodes), in body coordinates.
#[derive(Debug, Clone)]
struct Segment {
    kind: SegmentKind,
    start_line: u32,
    end_line: u32,
    text: String,
}

impl Segment {
    const fn is_definition(&self) -> bool {
        matches!(self.kind, SegmentKind::Definition(_))
    }

    const fn is_comment(&self) -> bool {
        matches!(self.kind, SegmentKind::Comment)
    }
}

/// AST-aware chunking: one chunk per top-level definition with its leading
/// comments attached, plus merged preamble chunks for everything else.
pub(crate) fn chunk(
    file_path: &str,
    extraction: &ExtractionResult,
    max_chunk_tokens: usize,
) -> Result<Vec<ChunkRecord>> {
    let body = extraction.body.as_str();
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    let ext = Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    let grammar = grammar_for_extension(ext)?;

    let mut parser = Parser::new();
    parser
        .set_language(&grammar.language()?)
        .map_err(|e| ChunkerError::Parse(e.to_string()))?;
    let tree = parser
        .parse(body, None)
        .ok_or_else(|| ChunkerError::Parse("parser returned no tree".to_string()))?;
    let root = tree.root_node();
    if root.kind() == "ERROR" {
        return Err(ChunkerError::Parse("unparseable file".to_string()));
    }

    let filename = filename_of(file_path);
    let segments = collect_segments(root, body, grammar, &filename);
    let segments = attach_leading_comments(segments);
    let segments = merge_preamble_runs(segments, body);

    #[allow(clippy::cast_possible_truncation)]
    let offset = extraction.metadata_line_count as u32;
    let mut chunks = Vec::new();
    for segment in segments {
        let text = segment.text.trim_end();
        if text.trim().is_empty() {
            continue;
        }
        let section_path = match &segment.kind {
            SegmentKind::Definition(name) => vec![name.clone()],
            _ => vec![filename.clone()],
        };
        let start = offset + segment.start_line;
        let end = offset + segment.end_line;

        if token_estimate(text) <= max_chunk_tokens {
            push_chunk(&mut chunks, file_path, section_path, text, start, end);
        } else {
            // Oversized definitions split on line boundaries; every piece
            // keeps the parent's section path and line range.
            for piece in split_lines_budget(text, max_chunk_tokens) {
                push_chunk(
                    &mut chunks,
                    file_path,
                    section_path.clone(),
                    &piece,
                    start,
                    end,
                );
            }
        }
    }

    Ok(chunks)
}

fn push_chunk(
    chunks: &mut Vec<ChunkRecord>,
    file_path: &str,
    section_path: Vec<String>,
    text: &str,
    start_line: u32,
    end_line: u32,
) {
    #[allow(clippy::cast_possible_truncation)]
    let index = chunks.len() as u32;
    chunks.push(ChunkRecord::new(
        file_path,
        index,
        section_path,
        text,
        start_line,
        end_line,
    ));
}

fn collect_segments(
    root: Node<'_>,
    body: &str,
    grammar: Grammar,
    filename: &str,
) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        let kind = if grammar.is_definition_kind(child.kind()) {
            let name =
                definition_name(child, body).unwrap_or_else(|| filename.to_string());
            SegmentKind::Definition(name)
        } else if Grammar::is_comment_kind(child.kind()) {
            SegmentKind::Comment
        } else {
            SegmentKind::Other
        };

        segments.push(Segment {
            kind,
            start_line: start_line_of(child),
            end_line: end_line_of(child),
            text: body[child.start_byte()..child.end_byte()].to_string(),
        });
    }
    segments
}

#[allow(clippy::cast_possible_truncation)]
fn start_line_of(node: Node<'_>) -> u32 {
    node.start_position().row as u32 + 1
}

#[allow(clippy::cast_possible_truncation)]
fn end_line_of(node: Node<'_>) -> u32 {
    let end = node.end_position();
    // A node ending at column 0 stops *before* that line.
    if end.column == 0 && end.row > node.start_position().row {
        end.row as u32
    } else {
        end.row as u32 + 1
    }
}

/// Extract a human-readable definition name.
///
/// Order: `name` field; `type` for impl blocks; `declarator` chain for
/// C-style nodes; otherwise unwrap wrapper nodes (`export_statement`,
/// `decorated_definition`, `lexical_declaration`, ...) and retry.
fn definition_name(node: Node<'_>, body: &str) -> Option<String> {
    resolve_name(node, body, 2)
}

fn resolve_name(node: Node<'_>, body: &str, depth: u8) -> Option<String> {
    if let Some(name) = node.child_by_field_name("name") {
        return Some(node_text(name, body));
    }
    if node.kind() == "impl_item" {
        if let Some(ty) = node.child_by_field_name("type") {
            return Some(node_text(ty, body));
        }
    }
    if let Some(declarator) = node.child_by_field_name("declarator") {
        return Some(declarator_name(declarator, body));
    }
    if depth == 0 {
        return None;
    }

    if let Some(inner) = node
        .child_by_field_name("declaration")
        .or_else(|| node.child_by_field_name("definition"))
    {
        return resolve_name(inner, body, depth - 1);
    }

    // Wrapper nodes without a dedicated field: try each named child
    // (skipping comments) until one yields a name.
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if Grammar::is_comment_kind(child.kind()) {
            continue;
        }
        if let Some(name) = resolve_name(child, body, depth - 1) {
            return Some(name);
        }
    }
    None
}

fn declarator_name(node: Node<'_>, body: &str) -> String {
    let mut current = node;
    while let Some(inner) = current.child_by_field_name("declarator") {
        current = inner;
    }
    node_text(current, body)
}

fn node_text(node: Node<'_>, body: &str) -> String {
    body[node.start_byte()..node.end_byte()].trim().to_string()
}

/// Right-to-left pass consuming comment segments that sit within one blank
/// line of a following definition, so docstrings and decorators stay with
/// their target.
fn attach_leading_comments(segments: Vec<Segment>) -> Vec<Segment> {
    let mut consumed = vec![false; segments.len()];
    let mut prefixes: Vec<Vec<usize>> = vec![Vec::new(); segments.len()];

    for i in 0..segments.len() {
        if !segments[i].is_definition() {
            continue;
        }
        let mut lower = i;
        while lower > 0 {
            let prev = lower - 1;
            if consumed[prev] || !segments[prev].is_comment() {
                break;
            }
            if segments[lower].start_line.saturating_sub(segments[prev].end_line) > 2 {
                break;
            }
            consumed[prev] = true;
            lower = prev;
        }
        prefixes[i] = (lower..i).collect();
    }

    let mut out = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        if consumed[i] {
            continue;
        }
        if prefixes[i].is_empty() {
            out.push(segment.clone());
            continue;
        }

        let mut text = String::new();
        for &j in &prefixes[i] {
            text.push_str(&segments[j].text);
            text.push('\n');
        }
        text.push_str(&segment.text);
        out.push(Segment {
            kind: segment.kind.clone(),
            start_line: segments[prefixes[i][0]].start_line,
            end_line: segment.end_line,
            text,
        });
    }
    out
}

/// Merge runs of consecutive non-definition segments into one preamble
/// segment, re-slicing the original body so blank lines survive.
fn merge_preamble_runs(segments: Vec<Segment>, body: &str) -> Vec<Segment> {
    let lines: Vec<&str> = body.lines().collect();
    let mut out: Vec<Segment> = Vec::new();
    let mut run: Vec<&Segment> = Vec::new();

    let flush = |run: &mut Vec<&Segment>, out: &mut Vec<Segment>| {
        if run.is_empty() {
            return;
        }
        let start = run[0].start_line;
        let end = run[run.len() - 1].end_line;
        let text = lines[(start as usize - 1).min(lines.len())
            ..(end as usize).min(lines.len())]
            .join("\n");
        out.push(Segment {
            kind: SegmentKind::Other,
            start_line: start,
            end_line: end,
            text,
        });
        run.clear();
    };

    for segment in &segments {
        if segment.is_definition() {
            flush(&mut run, &mut out);
            out.push(segment.clone());
        } else {
            run.push(segment);
        }
    }
    flush(&mut run, &mut out);

    // Restore source order: definitions and flushed preambles interleave.
    out.sort_by_key(|s| s.start_line);
    out
}
