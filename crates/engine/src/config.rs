use crate::error::Result;
use serde::{Deserialize, Serialize};
use silo_protocol::{EngineDefaults, SiloConfig};
use std::path::Path;

/// Host-resolved engine configuration: process defaults plus silo configs.
///
/// The host decides where this file lives; the engine receives the path as a
/// string and reads TOML of the shape:
///
/// ```toml
/// [defaults]
/// extensions = ["md", "rs"]
/// debounce_ms = 200
///
/// [[silos]]
/// name = "notes"
/// directories = ["/home/me/notes"]
/// model_id = "bge-small"
/// db_path = "/home/me/.silo/notes.db"
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub defaults: EngineDefaults,
    #[serde(default)]
    pub silos: Vec<SiloConfig>,
}

pub fn load_engine_config(path: impl AsRef<Path>) -> Result<EngineConfig> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let config: EngineConfig = toml::from_str(&raw)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn parses_defaults_and_silos() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("silos.toml");
        std::fs::write(
            &path,
            r#"
[defaults]
extensions = ["md", "txt"]
debounce_ms = 150

[[silos]]
name = "notes"
directories = ["/tmp/notes"]
model_id = "hash-256"
db_path = "/tmp/notes.db"
ignore_patterns = ["**/.git"]

[[silos]]
name = "code"
directories = ["/tmp/src"]
extensions = ["rs"]
model_id = "bge-small"
db_path = "/tmp/code.db"
stopped = true
"#,
        )
        .unwrap();

        let config = load_engine_config(&path).unwrap();
        assert_eq!(config.defaults.debounce_ms, 150);
        assert_eq!(config.defaults.extensions, vec!["md", "txt"]);
        assert_eq!(config.silos.len(), 2);
        assert_eq!(config.silos[0].name, "notes");
        assert!(config.silos[0].extensions.is_empty());
        assert!(config.silos[1].stopped);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_engine_config("/definitely/not/here.toml").is_err());
    }
}
