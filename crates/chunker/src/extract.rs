use serde_json::{Map, Number, Value};

/// Clean body plus metadata produced by an extractor.
///
/// `metadata_line_count` is the number of original-file lines the stripped
/// prefix occupied; downstream line numbers are offset by it so chunks map
/// back to original file coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub body: String,
    pub metadata: Map<String, Value>,
    pub metadata_line_count: usize,
}

impl ExtractionResult {
    fn bare(body: String, metadata_line_count: usize) -> Self {
        Self {
            body,
            metadata: Map::new(),
            metadata_line_count,
        }
    }
}

/// Format-specific extraction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractor {
    /// Trim the body; no metadata.
    Plaintext,
    /// Split `---`-delimited YAML frontmatter into metadata.
    Markdown,
    /// Strip a single leading shebang line.
    Code,
}

impl Extractor {
    #[must_use]
    pub fn extract(self, raw: &str) -> ExtractionResult {
        match self {
            Self::Plaintext => extract_plaintext(raw),
            Self::Markdown => extract_markdown(raw),
            Self::Code => extract_code(raw),
        }
    }
}

fn extract_plaintext(raw: &str) -> ExtractionResult {
    // Leading lines removed by the trim still count toward line offsets so
    // chunk line numbers stay in original-file coordinates.
    let trimmed_start = raw.trim_start();
    let leading_lines = raw[..raw.len() - trimmed_start.len()]
        .bytes()
        .filter(|b| *b == b'\n')
        .count();
    ExtractionResult::bare(trimmed_start.trim_end().to_string(), leading_lines)
}

fn extract_markdown(raw: &str) -> ExtractionResult {
    let Some((frontmatter, body, line_count)) = split_frontmatter(raw) else {
        return ExtractionResult::bare(raw.to_string(), 0);
    };

    let metadata = match serde_yaml::from_str::<serde_yaml::Value>(frontmatter) {
        Ok(serde_yaml::Value::Mapping(mapping)) => {
            let mut map = Map::new();
            for (key, value) in mapping {
                let key = match key {
                    serde_yaml::Value::String(s) => s,
                    other => yaml_to_json(other).to_string(),
                };
                map.insert(key, yaml_to_json(value));
            }
            map
        }
        Ok(_) => Map::new(),
        Err(err) => {
            log::warn!("malformed YAML frontmatter: {err}");
            Map::new()
        }
    };

    ExtractionResult {
        body: body.to_string(),
        metadata,
        metadata_line_count: line_count,
    }
}

fn extract_code(raw: &str) -> ExtractionResult {
    if raw.starts_with("#!") {
        match raw.find('\n') {
            Some(idx) => ExtractionResult::bare(raw[idx + 1..].to_string(), 1),
            None => ExtractionResult::bare(String::new(), 1),
        }
    } else {
        ExtractionResult::bare(raw.to_string(), 0)
    }
}

/// Split `---`-delimited frontmatter at the start of the file.
///
/// Returns `(frontmatter_body, rest, lines_consumed)` where `lines_consumed`
/// includes both delimiter lines.
fn split_frontmatter(raw: &str) -> Option<(&str, &str, usize)> {
    let after_open = raw.strip_prefix("---\n").or_else(|| raw.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    let mut lines = 1; // opening delimiter
    for line in after_open.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed == "---" {
            let frontmatter = &after_open[..offset];
            let rest = &after_open[offset + line.len()..];
            return Some((frontmatter, rest, lines + 1));
        }
        offset += line.len();
        lines += 1;
    }
    None
}

/// Flatten metadata into a single searchable string: every scalar value and
/// list element, in key order, space-joined.
#[must_use]
pub fn flatten_metadata(metadata: &Map<String, Value>) -> String {
    let mut parts: Vec<String> = Vec::new();
    for value in metadata.values() {
        collect_scalars(value, &mut parts);
    }
    parts.join(" ")
}

fn collect_scalars(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Bool(b) => out.push(b.to_string()),
        Value::Array(items) => {
            for item in items {
                collect_scalars(item, out);
            }
        }
        Value::Object(map) => {
            for nested in map.values() {
                collect_scalars(nested, out);
            }
        }
        Value::Null => {}
    }
}

fn yaml_to_json(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Number(i.into())
            } else if let Some(f) = n.as_f64() {
                Number::from_f64(f).map_or(Value::Null, Value::Number)
            } else {
                Value::Null
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(seq) => {
            Value::Array(seq.into_iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = Map::new();
            for (key, value) in mapping {
                let key = match key {
                    serde_yaml::Value::String(s) => s,
                    other => yaml_to_json(other).to_string(),
                };
                map.insert(key, yaml_to_json(value));
            }
            Value::Object(map)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plaintext_counts_trimmed_leading_lines() {
        let result = Extractor::Plaintext.extract("\n\n  hello\n");
        assert_eq!(result.body, "hello");
        assert_eq!(result.metadata_line_count, 2);
    }

    #[test]
    fn markdown_splits_frontmatter() {
        let raw = "---\ntitle: X\naliases: [a, b]\ntags: [t1]\n---\n# H1\ntext\n";
        let result = Extractor::Markdown.extract(raw);
        assert_eq!(result.metadata_line_count, 5);
        assert_eq!(result.body, "# H1\ntext\n");
        assert_eq!(result.metadata["title"], Value::String("X".into()));
        assert_eq!(
            result.metadata["aliases"],
            Value::Array(vec!["a".into(), "b".into()])
        );

        let tags = flatten_metadata(&result.metadata);
        for needle in ["X", "a", "b", "t1"] {
            assert!(tags.contains(needle), "missing {needle} in {tags:?}");
        }
    }

    #[test]
    fn markdown_without_frontmatter_passes_through() {
        let result = Extractor::Markdown.extract("# Title\nbody\n");
        assert_eq!(result.metadata_line_count, 0);
        assert_eq!(result.body, "# Title\nbody\n");
        assert!(result.metadata.is_empty());
    }

    #[test]
    fn unterminated_frontmatter_is_left_alone() {
        let raw = "---\ntitle: X\nno closing delimiter\n";
        let result = Extractor::Markdown.extract(raw);
        assert_eq!(result.metadata_line_count, 0);
        assert_eq!(result.body, raw);
    }

    #[test]
    fn code_strips_single_shebang() {
        let result = Extractor::Code.extract("#!/usr/bin/env python3\n\ndef main(): ...\n");
        assert_eq!(result.metadata_line_count, 1);
        assert_eq!(result.body, "\ndef main(): ...\n");
        assert!(!result.body.contains("#!"));
    }

    #[test]
    fn code_without_shebang_is_untouched() {
        let result = Extractor::Code.extract("fn main() {}\n");
        assert_eq!(result.metadata_line_count, 0);
        assert_eq!(result.body, "fn main() {}\n");
    }
}
