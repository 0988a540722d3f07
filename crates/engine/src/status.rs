use serde::{Deserialize, Serialize};
use silo_protocol::{ReconcileProgress, WatcherState};
use std::path::PathBuf;

/// Everything the host needs to render one silo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiloStatus {
    pub name: String,
    pub directories: Vec<PathBuf>,
    pub extensions: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub ignore_file_patterns: Vec<String>,
    pub model_id: String,
    pub db_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub indexed_file_count: u64,
    pub chunk_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_ms: Option<i64>,
    pub db_size_bytes: u64,
    pub watcher_state: WatcherState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile_progress: Option<ReconcileProgress>,
    pub model_mismatch: bool,
}

/// Process-level status record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub uptime_ms: u64,
    pub available_models: Vec<String>,
    pub default_model: String,
    pub total_indexed_files: u64,
}
