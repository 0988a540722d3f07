use crate::error::{EngineError, Result};
use crate::status::SiloStatus;
use silo_embedding::{service_for_model, EmbeddingService};
use silo_indexer::{
    reconcile, CancelHandle, FilePipeline, IndexingQueue, ReconcileEvent, ReconcileParams,
    SiloFilters, SiloWatcher, WatchSignal, WatcherConfig,
};
use silo_protocol::{
    ActivityEvent, EngineDefaults, ReconcilePhase, ReconcileProgress, RrfWeights, SiloConfig,
    SiloSearchResult, WatcherState,
};
use silo_store::SiloStore;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, mpsc};

const ACTIVITY_CAP: usize = 200;

#[derive(Debug, Clone)]
struct StateSnapshot {
    watcher_state: WatcherState,
    error_message: Option<String>,
    model_mismatch: bool,
    reconcile_progress: Option<ReconcileProgress>,
}

impl StateSnapshot {
    const fn stopped() -> Self {
        Self {
            watcher_state: WatcherState::Stopped,
            error_message: None,
            model_mismatch: false,
            reconcile_progress: None,
        }
    }
}

/// State shared with the forwarder tasks that consume watcher/reconciler
/// events while the manager itself is free to take other calls.
struct SiloShared {
    name: Mutex<String>,
    state: Mutex<StateSnapshot>,
    activity: Mutex<VecDeque<ActivityEvent>>,
    activity_tx: broadcast::Sender<ActivityEvent>,
}

impl SiloShared {
    fn set_state(&self, next: WatcherState) {
        let mut state = self.state.lock().expect("silo state poisoned");
        if state.watcher_state != WatcherState::Stopped || next == WatcherState::Stopped {
            state.watcher_state = next;
        }
    }

    fn finish_indexing(&self) {
        let mut state = self.state.lock().expect("silo state poisoned");
        if matches!(
            state.watcher_state,
            WatcherState::Indexing | WatcherState::Waiting
        ) {
            state.watcher_state = WatcherState::Idle;
        }
        state.reconcile_progress = None;
    }

    fn set_error(&self, message: String) {
        let mut state = self.state.lock().expect("silo state poisoned");
        state.watcher_state = WatcherState::Error;
        state.error_message = Some(message);
    }

    fn push_activity(&self, outcome: silo_indexer::FileOutcome) {
        let event = ActivityEvent {
            timestamp_unix_ms: now_ms(),
            silo_name: self.name.lock().expect("silo name poisoned").clone(),
            file_path: outcome.file_path,
            event_type: outcome.kind,
            error_message: outcome.error_message,
        };

        let mut activity = self.activity.lock().expect("silo activity poisoned");
        activity.push_back(event.clone());
        if activity.len() > ACTIVITY_CAP {
            activity.pop_front();
        }
        let _ = self.activity_tx.send(event);
    }
}

/// Everything that only exists while the silo is running.
struct SiloRuntime {
    store: Arc<SiloStore>,
    service: Option<Arc<dyn EmbeddingService>>,
    watcher: Option<SiloWatcher>,
    stop: Arc<AtomicBool>,
    reconcile_cancel: Option<CancelHandle>,
}

/// Lifecycle state machine for one silo.
///
/// `stopped/new → waiting → indexing (reconcile) → idle`, with `error` for
/// failed actions and `stopped` when the watcher is halted and the database
/// closed. Owns the store, the watcher, and the silo's slot on the global
/// indexing queue.
pub struct SiloManager {
    config: Mutex<SiloConfig>,
    defaults: EngineDefaults,
    shared: Arc<SiloShared>,
    runtime: Mutex<Option<SiloRuntime>>,
}

impl SiloManager {
    pub fn new(
        config: SiloConfig,
        defaults: EngineDefaults,
        activity_tx: broadcast::Sender<ActivityEvent>,
    ) -> Self {
        let shared = Arc::new(SiloShared {
            name: Mutex::new(config.name.clone()),
            state: Mutex::new(StateSnapshot::stopped()),
            activity: Mutex::new(VecDeque::new()),
            activity_tx,
        });
        Self {
            config: Mutex::new(config),
            defaults,
            shared,
            runtime: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.shared.name.lock().expect("silo name poisoned").clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.runtime.lock().expect("silo runtime poisoned").is_some()
    }

    /// Open the database, check for model mismatch, kick off a reconcile on
    /// the global queue, and start watching. Idempotent while running.
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let config = {
            let mut config = self.config.lock().expect("silo config poisoned");
            config.stopped = false;
            config.clone()
        };
        log::info!("starting silo `{}`", config.name);
        {
            let mut state = self.shared.state.lock().expect("silo state poisoned");
            *state = StateSnapshot::stopped();
            state.watcher_state = WatcherState::Waiting;
        }

        let store = match SiloStore::open(&config.db_path) {
            Ok(store) => Arc::new(store),
            Err(err) => {
                self.shared.set_error(err.to_string());
                return Err(err.into());
            }
        };
        let meta = store.load_meta()?;

        let service = match service_for_model(&config.model_id) {
            Ok(service) => service,
            Err(err) => {
                log::warn!(
                    "silo `{}`: embedding service unavailable: {err}; serving reads only",
                    config.name
                );
                self.shared.set_error(err.to_string());
                *self.runtime.lock().expect("silo runtime poisoned") = Some(SiloRuntime {
                    store,
                    service: None,
                    watcher: None,
                    stop: Arc::new(AtomicBool::new(false)),
                    reconcile_cancel: None,
                });
                return Ok(());
            }
        };

        let mismatch = meta.as_ref().is_some_and(|meta| {
            meta.model_id != config.model_id || meta.dimensions != service.dimensions()
        });
        if mismatch {
            let meta = meta.expect("mismatch implies meta");
            log::warn!(
                "silo `{}`: index built with `{}` ({} dims) but configured for `{}`; \
                 indexing blocked until rebuild",
                config.name,
                meta.model_id,
                meta.dimensions,
                config.model_id
            );
            {
                let mut state = self.shared.state.lock().expect("silo state poisoned");
                state.watcher_state = WatcherState::Idle;
                state.model_mismatch = true;
            }
            *self.runtime.lock().expect("silo runtime poisoned") = Some(SiloRuntime {
                store,
                service: Some(service),
                watcher: None,
                stop: Arc::new(AtomicBool::new(false)),
                reconcile_cancel: None,
            });
            return Ok(());
        }

        store.init_meta(&config.model_id, service.dimensions())?;

        let mut runtime = SiloRuntime {
            store: Arc::clone(&store),
            service: Some(Arc::clone(&service)),
            watcher: None,
            stop: Arc::new(AtomicBool::new(false)),
            reconcile_cancel: None,
        };
        self.open_watcher(&mut runtime, &config)?;
        runtime.reconcile_cancel = Some(self.enqueue_reconcile(&runtime, &config)?);
        *self.runtime.lock().expect("silo runtime poisoned") = Some(runtime);
        Ok(())
    }

    /// Halt the watcher, cancel queued work, close the database.
    pub fn stop(&self) {
        let runtime = self.runtime.lock().expect("silo runtime poisoned").take();
        if let Some(runtime) = runtime {
            runtime.stop.store(true, std::sync::atomic::Ordering::SeqCst);
            if let Some(cancel) = &runtime.reconcile_cancel {
                cancel.cancel();
            }
            if let Some(watcher) = &runtime.watcher {
                watcher.stop();
            }
            log::info!("stopped silo `{}`", self.name());
        }

        {
            let mut config = self.config.lock().expect("silo config poisoned");
            config.stopped = true;
        }
        let mut state = self.shared.state.lock().expect("silo state poisoned");
        *state = StateSnapshot::stopped();
    }

    /// Stop, delete the database and its companions (plus legacy sidecars),
    /// and start fresh.
    pub async fn rebuild(&self) -> Result<()> {
        log::info!("rebuilding silo `{}`", self.name());
        self.stop();

        let db_path = self.config.lock().expect("silo config poisoned").db_path.clone();
        remove_quiet(&db_path);
        for suffix in ["-wal", "-shm"] {
            let mut companion = db_path.as_os_str().to_owned();
            companion.push(suffix);
            remove_quiet(Path::new(&companion));
        }
        // Pre-migration sidecar files have no place next to the database.
        if let Some(parent) = db_path.parent() {
            remove_quiet(&parent.join("mtimes.json"));
            remove_quiet(&parent.join("meta.json"));
        }

        self.start().await
    }

    /// Apply a new config. Ignore/extension changes restart the watcher
    /// only; directory changes restart the silo; a model change flags a
    /// mismatch that blocks indexing until rebuild.
    pub async fn update(&self, new: SiloConfig) -> Result<()> {
        let old = {
            let mut config = self.config.lock().expect("silo config poisoned");
            let old = config.clone();
            let name = config.name.clone();
            *config = new.clone();
            config.name = name;
            old
        };

        if !self.is_running() {
            return Ok(());
        }

        if new.model_id != old.model_id {
            let meta = {
                let runtime = self.runtime.lock().expect("silo runtime poisoned");
                runtime
                    .as_ref()
                    .and_then(|rt| rt.store.load_meta().ok().flatten())
            };
            if meta.is_some_and(|m| m.model_id != new.model_id) {
                log::warn!(
                    "silo `{}`: model changed to `{}`; rebuild required before indexing",
                    old.name,
                    new.model_id
                );
                let mut runtime = self.runtime.lock().expect("silo runtime poisoned");
                if let Some(rt) = runtime.as_mut() {
                    if let Some(watcher) = rt.watcher.take() {
                        watcher.stop();
                    }
                }
                self.shared
                    .state
                    .lock()
                    .expect("silo state poisoned")
                    .model_mismatch = true;
            }
        }

        if new.directories != old.directories {
            self.stop();
            return self.start().await;
        }

        if new.extensions != old.extensions
            || new.ignore_patterns != old.ignore_patterns
            || new.ignore_file_patterns != old.ignore_file_patterns
        {
            let config = self.config.lock().expect("silo config poisoned").clone();
            let mut runtime = self.runtime.lock().expect("silo runtime poisoned");
            if let Some(rt) = runtime.as_mut() {
                // Only restart a watcher that was actually running; mismatch
                // and read-only silos stay watcherless.
                if let Some(watcher) = rt.watcher.take() {
                    watcher.stop();
                    self.open_watcher(rt, &config)?;
                }
            }
        }
        Ok(())
    }

    pub fn rename(&self, new_name: &str) {
        self.config.lock().expect("silo config poisoned").name = new_name.to_string();
        *self.shared.name.lock().expect("silo name poisoned") = new_name.to_string();
    }

    /// Per-silo hybrid search; requires the store to be open.
    pub fn search(
        &self,
        query_vector: &[f32],
        query_text: &str,
        k: usize,
        weights: RrfWeights,
    ) -> Result<Vec<SiloSearchResult>> {
        let store = {
            let runtime = self.runtime.lock().expect("silo runtime poisoned");
            runtime
                .as_ref()
                .map(|rt| Arc::clone(&rt.store))
                .ok_or_else(|| EngineError::SiloStopped(self.name()))?
        };
        Ok(store.hybrid_search(query_vector, query_text, k, weights)?)
    }

    /// The model whose vectors actually populate the index, which diverges
    /// from the configured model while a mismatch is pending.
    #[must_use]
    pub fn query_model_id(&self) -> String {
        let from_meta = {
            let runtime = self.runtime.lock().expect("silo runtime poisoned");
            runtime
                .as_ref()
                .and_then(|rt| rt.store.load_meta().ok().flatten())
                .map(|meta| meta.model_id)
        };
        from_meta.unwrap_or_else(|| {
            self.config
                .lock()
                .expect("silo config poisoned")
                .model_id
                .clone()
        })
    }

    #[must_use]
    pub fn status(&self) -> SiloStatus {
        let config = self.config.lock().expect("silo config poisoned").clone();
        let state = self.shared.state.lock().expect("silo state poisoned").clone();

        let (file_count, chunk_count, last_updated_ms, db_size_bytes) = {
            let runtime = self.runtime.lock().expect("silo runtime poisoned");
            match runtime.as_ref() {
                Some(rt) => (
                    rt.store.file_count().unwrap_or(0),
                    rt.store.chunk_count().unwrap_or(0),
                    rt.store.max_mtime_ms().unwrap_or(None),
                    rt.store.db_size_bytes(),
                ),
                None => (0, 0, None, db_file_size(&config.db_path)),
            }
        };

        SiloStatus {
            name: config.name,
            directories: config.directories,
            extensions: config.extensions,
            ignore_patterns: config.ignore_patterns,
            ignore_file_patterns: config.ignore_file_patterns,
            model_id: config.model_id,
            db_path: config.db_path,
            description: config.description,
            indexed_file_count: file_count,
            chunk_count,
            last_updated_ms,
            db_size_bytes,
            watcher_state: state.watcher_state,
            error_message: state.error_message,
            reconcile_progress: state.reconcile_progress,
            model_mismatch: state.model_mismatch,
        }
    }

    /// Most recent activity first.
    #[must_use]
    pub fn activity_recent(&self, limit: usize) -> Vec<ActivityEvent> {
        let activity = self.shared.activity.lock().expect("silo activity poisoned");
        activity.iter().rev().take(limit).cloned().collect()
    }

    fn filters(&self, config: &SiloConfig) -> Result<Arc<SiloFilters>> {
        let mut ignore = self.defaults.ignore.clone();
        ignore.extend(config.ignore_patterns.iter().cloned());
        let mut ignore_files = self.defaults.ignore_files.clone();
        ignore_files.extend(config.ignore_file_patterns.iter().cloned());

        Ok(Arc::new(SiloFilters::new(
            config.effective_extensions(&self.defaults),
            &ignore,
            &ignore_files,
        )?))
    }

    fn open_watcher(&self, runtime: &mut SiloRuntime, config: &SiloConfig) -> Result<()> {
        let service = runtime
            .service
            .as_ref()
            .expect("watcher requires an embedding service");
        let pipeline = Arc::new(FilePipeline::new(
            Arc::clone(&runtime.store),
            Arc::clone(service),
        ));

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        spawn_watch_forwarder(Arc::clone(&self.shared), signal_rx);

        let watcher = SiloWatcher::start(
            &config.name,
            &config.directories,
            self.filters(config)?,
            WatcherConfig {
                debounce: Duration::from_millis(self.defaults.debounce_ms),
            },
            pipeline,
            signal_tx,
        )?;
        runtime.watcher = Some(watcher);
        Ok(())
    }

    fn enqueue_reconcile(
        &self,
        runtime: &SiloRuntime,
        config: &SiloConfig,
    ) -> Result<CancelHandle> {
        let service = runtime
            .service
            .as_ref()
            .expect("reconcile requires an embedding service");
        let pipeline = Arc::new(FilePipeline::new(
            Arc::clone(&runtime.store),
            Arc::clone(service),
        ));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        spawn_reconcile_forwarder(Arc::clone(&self.shared), event_rx);

        let params = ReconcileParams {
            directories: config.directories.clone(),
            filters: self.filters(config)?,
            pipeline,
            stop: Arc::clone(&runtime.stop),
            events: event_tx,
        };

        let waiting_shared = Arc::clone(&self.shared);
        let start_shared = Arc::clone(&self.shared);
        let done_shared = Arc::clone(&self.shared);
        let silo_name = config.name.clone();

        Ok(IndexingQueue::global().enqueue(
            config.name.clone(),
            move || waiting_shared.set_state(WatcherState::Waiting),
            move || start_shared.set_state(WatcherState::Indexing),
            async move {
                match reconcile(params).await {
                    Ok(outcome) if outcome.cancelled => {
                        log::debug!("reconcile for `{silo_name}` cancelled");
                    }
                    Ok(outcome) => {
                        log::info!(
                            "reconcile for `{silo_name}`: {} indexed, {} deleted, {} errors",
                            outcome.indexed,
                            outcome.deleted,
                            outcome.errors
                        );
                        done_shared.finish_indexing();
                    }
                    Err(err) => {
                        log::error!("reconcile for `{silo_name}` failed: {err}");
                        done_shared.set_error(err.to_string());
                    }
                }
            },
        ))
    }
}

fn spawn_reconcile_forwarder(
    shared: Arc<SiloShared>,
    mut rx: mpsc::UnboundedReceiver<ReconcileEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ReconcileEvent::Progress(progress) => {
                    let mut state = shared.state.lock().expect("silo state poisoned");
                    state.reconcile_progress =
                        (progress.phase != ReconcilePhase::Done).then_some(progress);
                }
                ReconcileEvent::File(outcome) => shared.push_activity(outcome),
            }
        }
    });
}

fn spawn_watch_forwarder(shared: Arc<SiloShared>, mut rx: mpsc::UnboundedReceiver<WatchSignal>) {
    tokio::spawn(async move {
        while let Some(signal) = rx.recv().await {
            match signal {
                WatchSignal::Waiting => {
                    let mut state = shared.state.lock().expect("silo state poisoned");
                    if state.watcher_state == WatcherState::Idle {
                        state.watcher_state = WatcherState::Waiting;
                    }
                }
                WatchSignal::Started => shared.set_state(WatcherState::Indexing),
                WatchSignal::Finished => shared.finish_indexing(),
                WatchSignal::Error(message) => shared.set_error(message),
                WatchSignal::File(outcome) => shared.push_activity(outcome),
            }
        }
    });
}

fn remove_quiet(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("removed {}", path.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => log::warn!("could not remove {}: {err}", path.display()),
    }
}

fn db_file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map_or(0, |m| m.len())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}
