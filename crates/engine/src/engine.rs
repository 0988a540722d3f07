use crate::error::{EngineError, Result};
use crate::merge::calibrate;
use crate::silo::SiloManager;
use crate::status::{ServerStatus, SiloStatus};
use silo_embedding::{available_models, service_for_model, DEFAULT_MODEL_ID};
use silo_protocol::{ActivityEvent, EngineDefaults, SearchPreset, SearchResult, SiloConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::broadcast;

const DEFAULT_MAX_RESULTS: usize = 10;

/// Top-level orchestrator: configures silos, shares embedding services by
/// model, and exposes the query/status API to the host.
pub struct SearchEngine {
    silos: Mutex<HashMap<String, Arc<SiloManager>>>,
    defaults: EngineDefaults,
    started_at: Instant,
    activity_tx: broadcast::Sender<ActivityEvent>,
}

impl SearchEngine {
    #[must_use]
    pub fn new(defaults: EngineDefaults) -> Self {
        let (activity_tx, _) = broadcast::channel(256);
        Self {
            silos: Mutex::new(HashMap::new()),
            defaults,
            started_at: Instant::now(),
            activity_tx,
        }
    }

    /// Live stream of activity events across every silo.
    #[must_use]
    pub fn subscribe_activity(&self) -> broadcast::Receiver<ActivityEvent> {
        self.activity_tx.subscribe()
    }

    /// Register a silo and start it unless its persisted `stopped` flag is
    /// set. A silo that fails to start stays registered in `error` state.
    pub async fn create_silo(&self, config: SiloConfig) -> Result<()> {
        validate_config(&config)?;

        let manager = {
            let mut silos = self.silos.lock().expect("silo map poisoned");
            if silos.contains_key(&config.name) {
                return Err(EngineError::SiloExists(config.name));
            }
            let stopped = config.stopped;
            let manager = Arc::new(SiloManager::new(
                config.clone(),
                self.defaults.clone(),
                self.activity_tx.clone(),
            ));
            silos.insert(config.name.clone(), Arc::clone(&manager));
            (!stopped).then_some(manager)
        };

        if let Some(manager) = manager {
            if let Err(err) = manager.start().await {
                log::error!("silo `{}` failed to start: {err}", manager.name());
            }
        }
        Ok(())
    }

    /// Stop a silo and delete its database files.
    pub fn delete_silo(&self, name: &str) -> Result<()> {
        let manager = self.take_manager(name)?;
        let db_path = manager.status().db_path;
        manager.stop();

        for suffix in ["", "-wal", "-shm"] {
            let mut path = db_path.as_os_str().to_owned();
            path.push(suffix);
            let path = std::path::PathBuf::from(path);
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("could not remove {}: {err}", path.display());
                }
            }
        }
        log::info!("deleted silo `{name}`");
        Ok(())
    }

    /// Stop a silo and forget it, leaving its database on disk.
    pub fn disconnect_silo(&self, name: &str) -> Result<()> {
        let manager = self.take_manager(name)?;
        manager.stop();
        log::info!("disconnected silo `{name}`");
        Ok(())
    }

    pub fn stop_silo(&self, name: &str) -> Result<()> {
        self.manager(name)?.stop();
        Ok(())
    }

    pub async fn wake_silo(&self, name: &str) -> Result<()> {
        self.manager(name)?.start().await
    }

    pub async fn rebuild_silo(&self, name: &str) -> Result<()> {
        self.manager(name)?.rebuild().await
    }

    pub async fn update_silo(&self, name: &str, config: SiloConfig) -> Result<()> {
        validate_config(&config)?;
        self.manager(name)?.update(config).await
    }

    pub fn rename_silo(&self, name: &str, new_name: &str) -> Result<()> {
        if new_name.trim().is_empty() {
            return Err(EngineError::InvalidConfig("silo name must not be empty".into()));
        }
        let mut silos = self.silos.lock().expect("silo map poisoned");
        if silos.contains_key(new_name) {
            return Err(EngineError::SiloExists(new_name.to_string()));
        }
        let manager = silos
            .remove(name)
            .ok_or_else(|| EngineError::UnknownSilo(name.to_string()))?;
        manager.rename(new_name);
        silos.insert(new_name.to_string(), manager);
        Ok(())
    }

    /// Status records for every silo, sorted by name.
    #[must_use]
    pub fn list_silos(&self) -> Vec<SiloStatus> {
        let mut statuses: Vec<SiloStatus> = self
            .managers()
            .into_iter()
            .map(|(_, manager)| manager.status())
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Hybrid search across one silo or all of them.
    ///
    /// Silos are grouped by the model that actually built their index, the
    /// query is embedded once per model, and per-silo results are merged
    /// through max-calibration. Silos that cannot serve (stopped, erroring)
    /// are skipped with a log line, never failing the whole query.
    pub async fn search(
        &self,
        query: &str,
        silo: Option<&str>,
        max_results: Option<usize>,
        preset: Option<SearchPreset>,
    ) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let k = max_results.unwrap_or(DEFAULT_MAX_RESULTS).max(1);
        let weights = preset.unwrap_or_default().weights();

        let targets: Vec<(String, Arc<SiloManager>)> = match silo {
            Some(name) => vec![(name.to_string(), self.manager(name)?)],
            None => self.managers(),
        };

        let mut by_model: HashMap<String, Vec<(String, Arc<SiloManager>)>> = HashMap::new();
        for (name, manager) in targets {
            by_model
                .entry(manager.query_model_id())
                .or_default()
                .push((name, manager));
        }

        let mut groups: Vec<(String, Vec<silo_protocol::SiloSearchResult>)> = Vec::new();
        for (model_id, members) in by_model {
            // One query embedding per model; a missing model degrades the
            // group to lexical-only search rather than failing the query.
            let query_vector = match service_for_model(&model_id) {
                Ok(service) => match service.embed(query).await {
                    Ok(vector) => vector,
                    Err(err) => {
                        log::warn!("query embedding failed for `{model_id}`: {err}");
                        Vec::new()
                    }
                },
                Err(err) => {
                    log::warn!("embedding service `{model_id}` unavailable: {err}");
                    Vec::new()
                }
            };

            for (name, manager) in members {
                match manager.search(&query_vector, query, k, weights) {
                    Ok(results) => groups.push((name, results)),
                    Err(err) => log::debug!("skipping silo `{name}` in search: {err}"),
                }
            }
        }

        let mut merged = calibrate(groups);
        merged.truncate(k);
        Ok(merged)
    }

    /// Merged activity stream across silos, most recent first.
    #[must_use]
    pub fn activity_recent(&self, limit: usize) -> Vec<ActivityEvent> {
        let mut events: Vec<ActivityEvent> = self
            .managers()
            .into_iter()
            .flat_map(|(_, manager)| manager.activity_recent(limit))
            .collect();
        events.sort_by(|a, b| b.timestamp_unix_ms.cmp(&a.timestamp_unix_ms));
        events.truncate(limit);
        events
    }

    #[must_use]
    pub fn server_status(&self) -> ServerStatus {
        let total_indexed_files = self
            .managers()
            .into_iter()
            .map(|(_, manager)| manager.status().indexed_file_count)
            .sum();

        ServerStatus {
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
            available_models: available_models(),
            default_model: DEFAULT_MODEL_ID.to_string(),
            total_indexed_files,
        }
    }

    /// Stop every silo; queued work drains by cancellation.
    pub fn shutdown(&self) {
        for (_, manager) in self.managers() {
            manager.stop();
        }
    }

    fn managers(&self) -> Vec<(String, Arc<SiloManager>)> {
        self.silos
            .lock()
            .expect("silo map poisoned")
            .iter()
            .map(|(name, manager)| (name.clone(), Arc::clone(manager)))
            .collect()
    }

    fn manager(&self, name: &str) -> Result<Arc<SiloManager>> {
        self.silos
            .lock()
            .expect("silo map poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownSilo(name.to_string()))
    }

    fn take_manager(&self, name: &str) -> Result<Arc<SiloManager>> {
        self.silos
            .lock()
            .expect("silo map poisoned")
            .remove(name)
            .ok_or_else(|| EngineError::UnknownSilo(name.to_string()))
    }
}

fn validate_config(config: &SiloConfig) -> Result<()> {
    if config.name.trim().is_empty() {
        return Err(EngineError::InvalidConfig("silo name must not be empty".into()));
    }
    if config.directories.is_empty() {
        return Err(EngineError::InvalidConfig(format!(
            "silo `{}` has no directories",
            config.name
        )));
    }
    if config.db_path.as_os_str().is_empty() {
        return Err(EngineError::InvalidConfig(format!(
            "silo `{}` has no db_path",
            config.name
        )));
    }
    Ok(())
}
