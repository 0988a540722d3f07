use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Resolved configuration for one silo.
///
/// The engine receives these fully resolved from the host; empty
/// `extensions` means the silo defers to [`EngineDefaults::extensions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiloConfig {
    /// Slug identifying the silo.
    pub name: String,
    /// Absolute directories the silo watches. Must be non-empty.
    pub directories: Vec<PathBuf>,
    /// Allow-list of lower-cased file extensions (no leading dot).
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Glob patterns applied to directory paths.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    /// Glob patterns applied to file basenames.
    #[serde(default)]
    pub ignore_file_patterns: Vec<String>,
    /// Opaque model identifier understood by the embedding-service factory.
    pub model_id: String,
    /// Location of the silo's database file.
    pub db_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Persisted flag: the silo stays stopped across engine restarts.
    #[serde(default)]
    pub stopped: bool,
}

impl SiloConfig {
    /// Effective extension allow-list, falling back to process defaults.
    #[must_use]
    pub fn effective_extensions<'a>(&'a self, defaults: &'a EngineDefaults) -> &'a [String] {
        if self.extensions.is_empty() {
            &defaults.extensions
        } else {
            &self.extensions
        }
    }
}

/// Process-wide defaults applied to silos that leave fields empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineDefaults {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub ignore_files: Vec<String>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            ignore: vec![
                "**/.git".to_string(),
                "**/node_modules".to_string(),
                "**/target".to_string(),
            ],
            ignore_files: vec![".DS_Store".to_string()],
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    ["md", "txt", "rs", "py", "js", "ts", "tsx", "go", "java"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

const fn default_debounce_ms() -> u64 {
    200
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_extensions_defer_to_defaults() {
        let defaults = EngineDefaults::default();
        let mut config = SiloConfig {
            name: "notes".into(),
            directories: vec![PathBuf::from("/tmp/notes")],
            extensions: vec![],
            ignore_patterns: vec![],
            ignore_file_patterns: vec![],
            model_id: "hash-256".into(),
            db_path: PathBuf::from("/tmp/notes.db"),
            description: None,
            color: None,
            icon: None,
            stopped: false,
        };

        assert_eq!(config.effective_extensions(&defaults), defaults.extensions);

        config.extensions = vec!["md".into()];
        assert_eq!(config.effective_extensions(&defaults), ["md".to_string()]);
    }
}
