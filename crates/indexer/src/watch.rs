use crate::error::{IndexerError, Result};
use crate::pipeline::{normalize_path, FilePipeline};
use crate::queue::IndexingQueue;
use crate::walk::SiloFilters;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use silo_protocol::FileEventKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

/// Per-file result forwarded to the silo's listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub file_path: String,
    pub kind: FileEventKind,
    pub error_message: Option<String>,
}

/// Lifecycle and file signals a watcher emits to its single listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSignal {
    /// A batch was enqueued behind another silo.
    Waiting,
    /// A batch reached the head of the indexing queue.
    Started,
    /// A batch finished; the watcher is quiescent again.
    Finished,
    File(FileOutcome),
    Error(String),
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Per-path coalescing window; the latest event for a path wins.
    pub debounce: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathEvent {
    Upsert,
    Delete,
}

enum WatcherCommand {
    Shutdown,
}

/// Live filesystem watcher for one silo.
///
/// Raw notify events are coalesced per path inside the debounce window,
/// then processed in arrival order through the global indexing queue so
/// watcher work obeys the same serialisation as reconciles.
pub struct SiloWatcher {
    command_tx: UnboundedSender<WatcherCommand>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    is_processing: Arc<AtomicBool>,
}

impl SiloWatcher {
    pub fn start(
        silo_name: &str,
        directories: &[PathBuf],
        filters: Arc<SiloFilters>,
        config: WatcherConfig,
        pipeline: Arc<FilePipeline>,
        signals: UnboundedSender<WatchSignal>,
    ) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = event_tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(|e| IndexerError::Watch(format!("watcher init failed: {e}")))?;
        for dir in directories {
            watcher
                .watch(dir, RecursiveMode::Recursive)
                .map_err(|e| {
                    IndexerError::Watch(format!("failed to watch {}: {e}", dir.display()))
                })?;
        }

        let is_processing = Arc::new(AtomicBool::new(false));
        spawn_debounce_loop(DebounceLoop {
            silo_name: silo_name.to_string(),
            debounce: config.debounce,
            filters,
            pipeline,
            signals,
            is_processing: Arc::clone(&is_processing),
            event_rx,
            command_rx,
        });

        log::info!("watcher started for silo `{silo_name}` ({} dirs)", directories.len());
        Ok(Self {
            command_tx,
            watcher: Mutex::new(Some(watcher)),
            is_processing,
        })
    }

    /// Whether a watcher-triggered batch is queued or running.
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.is_processing.load(Ordering::SeqCst)
    }

    /// Stop watching. Safe to call more than once.
    pub fn stop(&self) {
        if let Ok(mut guard) = self.watcher.lock() {
            guard.take();
        }
        let _ = self.command_tx.send(WatcherCommand::Shutdown);
    }
}

impl Drop for SiloWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

struct DebounceLoop {
    silo_name: String,
    debounce: Duration,
    filters: Arc<SiloFilters>,
    pipeline: Arc<FilePipeline>,
    signals: UnboundedSender<WatchSignal>,
    is_processing: Arc<AtomicBool>,
    event_rx: UnboundedReceiver<notify::Result<Event>>,
    command_rx: UnboundedReceiver<WatcherCommand>,
}

fn spawn_debounce_loop(ctx: DebounceLoop) {
    let DebounceLoop {
        silo_name,
        debounce,
        filters,
        pipeline,
        signals,
        is_processing,
        mut event_rx,
        mut command_rx,
    } = ctx;

    tokio::spawn(async move {
        // Insertion-ordered pending list: path -> (event, deadline).
        let mut pending: Vec<(PathBuf, PathEvent, Instant)> = Vec::new();

        loop {
            let next_deadline = pending.iter().map(|(_, _, d)| *d).min();

            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(Ok(event)) => {
                            record_event(&mut pending, &filters, debounce, event);
                        }
                        Some(Err(err)) => {
                            log::warn!("watcher error: {err}");
                            let _ = signals.send(WatchSignal::Error(err.to_string()));
                        }
                        None => break,
                    }
                }
                command = command_rx.recv() => {
                    match command {
                        Some(WatcherCommand::Shutdown) | None => break,
                    }
                }
                () = async {
                    if let Some(deadline) = next_deadline {
                        tokio::time::sleep_until(deadline).await;
                    }
                }, if next_deadline.is_some() => {
                    let now = Instant::now();
                    let mut due = Vec::new();
                    pending.retain(|(path, event, deadline)| {
                        if *deadline <= now {
                            due.push((path.clone(), *event));
                            false
                        } else {
                            true
                        }
                    });
                    if !due.is_empty() {
                        dispatch_batch(&silo_name, &pipeline, &signals, &is_processing, due);
                    }
                }
            }
        }
        log::debug!("watcher loop for `{silo_name}` stopped");
    });
}

fn record_event(
    pending: &mut Vec<(PathBuf, PathEvent, Instant)>,
    filters: &SiloFilters,
    debounce: Duration,
    event: Event,
) {
    let Some(kind) = map_event_kind(&event.kind) else {
        return;
    };
    let deadline = Instant::now() + debounce;

    for path in event.paths {
        if !path_is_watchable(filters, &path) {
            continue;
        }
        // Latest event wins inside the window; order of first arrival is kept.
        if let Some(entry) = pending.iter_mut().find(|(p, _, _)| *p == path) {
            entry.1 = kind;
            entry.2 = deadline;
        } else {
            pending.push((path, kind, deadline));
        }
    }
}

/// Map raw notify kinds onto upsert/delete; access-only events are noise.
fn map_event_kind(kind: &EventKind) -> Option<PathEvent> {
    match kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
            Some(PathEvent::Upsert)
        }
        EventKind::Remove(_) => Some(PathEvent::Delete),
        EventKind::Access(_) => None,
    }
}

/// The watcher applies the same filters as the reconciler, including every
/// ancestor directory of the event path.
fn path_is_watchable(filters: &SiloFilters, path: &Path) -> bool {
    if !filters.allows_file(path) {
        return false;
    }
    let mut ancestor = path.parent();
    while let Some(dir) = ancestor {
        if !filters.allows_dir(dir) {
            return false;
        }
        ancestor = dir.parent();
    }
    true
}

fn dispatch_batch(
    silo_name: &str,
    pipeline: &Arc<FilePipeline>,
    signals: &UnboundedSender<WatchSignal>,
    is_processing: &Arc<AtomicBool>,
    batch: Vec<(PathBuf, PathEvent)>,
) {
    let pipeline = Arc::clone(pipeline);
    let signals_task = signals.clone();
    let busy = Arc::clone(is_processing);
    busy.store(true, Ordering::SeqCst);

    let waiting_signals = signals.clone();
    let started_signals = signals.clone();
    IndexingQueue::global().enqueue(
        silo_name.to_string(),
        move || {
            let _ = waiting_signals.send(WatchSignal::Waiting);
        },
        move || {
            let _ = started_signals.send(WatchSignal::Started);
        },
        async move {
            for (path, event) in batch {
                let key = normalize_path(&path);
                let exists = path.exists();
                let outcome = match (event, exists) {
                    (PathEvent::Delete, _) | (PathEvent::Upsert, false) => pipeline
                        .remove_file(&path)
                        .map(|()| FileOutcome {
                            file_path: key.clone(),
                            kind: FileEventKind::Deleted,
                            error_message: None,
                        }),
                    (PathEvent::Upsert, true) => {
                        pipeline.index_file(&path).await.map(|_| FileOutcome {
                            file_path: key.clone(),
                            kind: FileEventKind::Indexed,
                            error_message: None,
                        })
                    }
                };

                let outcome = outcome.unwrap_or_else(|err| {
                    log::warn!("watcher pipeline failed for {key}: {err}");
                    FileOutcome {
                        file_path: key,
                        kind: FileEventKind::Error,
                        error_message: Some(err.to_string()),
                    }
                });
                let _ = signals_task.send(WatchSignal::File(outcome));
            }

            busy.store(false, Ordering::SeqCst);
            let _ = signals_task.send(WatchSignal::Finished);
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_embedding::{EmbeddingService, HashedEmbeddingService};
    use silo_store::SiloStore;
    use tempfile::TempDir;

    #[test]
    fn event_kinds_map_to_path_events() {
        assert_eq!(
            map_event_kind(&EventKind::Create(notify::event::CreateKind::File)),
            Some(PathEvent::Upsert)
        );
        assert_eq!(
            map_event_kind(&EventKind::Remove(notify::event::RemoveKind::File)),
            Some(PathEvent::Delete)
        );
        assert_eq!(
            map_event_kind(&EventKind::Access(notify::event::AccessKind::Read)),
            None
        );
    }

    #[test]
    fn ancestor_ignores_apply_to_event_paths() {
        let filters = SiloFilters::new(
            &["md".to_string()],
            &["**/node_modules".to_string()],
            &[],
        )
        .unwrap();
        assert!(path_is_watchable(
            &filters,
            Path::new("/work/docs/readme.md")
        ));
        assert!(!path_is_watchable(
            &filters,
            Path::new("/work/node_modules/pkg/readme.md")
        ));
        assert!(!path_is_watchable(&filters, Path::new("/work/docs/app.log")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn live_create_modify_delete_flows_through() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SiloStore::open(dir.path().join("db").join("s.db")).unwrap());
        let service = Arc::new(HashedEmbeddingService::new("hash-32", 32));
        store
            .init_meta(service.model_name(), service.dimensions())
            .unwrap();
        let pipeline = Arc::new(FilePipeline::new(store.clone(), service));
        let filters = Arc::new(
            SiloFilters::new(&["txt".to_string()], &["db".to_string()], &[]).unwrap(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let watcher = SiloWatcher::start(
            "test",
            &[dir.path().to_path_buf()],
            filters,
            WatcherConfig {
                debounce: Duration::from_millis(50),
            },
            pipeline,
            tx,
        )
        .unwrap();

        let file = dir.path().join("live.txt");
        tokio::fs::write(&file, "hello watcher").await.unwrap();

        let indexed = wait_for(&mut rx, FileEventKind::Indexed).await;
        assert!(indexed, "no indexed event observed");
        assert_eq!(store.file_count().unwrap(), 1);

        tokio::fs::remove_file(&file).await.unwrap();
        let deleted = wait_for(&mut rx, FileEventKind::Deleted).await;
        assert!(deleted, "no deleted event observed");
        assert_eq!(store.file_count().unwrap(), 0);

        watcher.stop();
        watcher.stop(); // idempotent
    }

    async fn wait_for(
        rx: &mut UnboundedReceiver<WatchSignal>,
        wanted: FileEventKind,
    ) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
                Ok(Some(WatchSignal::File(outcome))) if outcome.kind == wanted => return true,
                Ok(Some(_)) => {}
                Ok(None) => return false,
                Err(_) => {}
            }
        }
        false
    }
}
