use crate::error::Result;
use crate::pipeline::{normalize_path, FilePipeline};
use crate::walk::{walk_files, SiloFilters, WalkedFile};
use crate::watch::FileOutcome;
use silo_protocol::{FileEventKind, ReconcilePhase, ReconcileProgress};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Progress and per-file events emitted while reconciling.
#[derive(Debug, Clone)]
pub enum ReconcileEvent {
    Progress(ReconcileProgress),
    File(FileOutcome),
}

/// What a reconcile run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub indexed: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: usize,
    pub cancelled: bool,
}

pub struct ReconcileParams {
    pub directories: Vec<PathBuf>,
    pub filters: Arc<SiloFilters>,
    pub pipeline: Arc<FilePipeline>,
    /// Checked at every file boundary; a set flag returns promptly.
    pub stop: Arc<AtomicBool>,
    pub events: UnboundedSender<ReconcileEvent>,
}

/// Diff the filesystem against stored mtimes and drive add/update/remove
/// through the pipeline.
///
/// Per-file errors are logged and reported as events, never returned: a
/// reconcile only fails on setup errors (unreadable store, bad patterns).
pub async fn reconcile(params: ReconcileParams) -> Result<ReconcileOutcome> {
    let ReconcileParams {
        directories,
        filters,
        pipeline,
        stop,
        events,
    } = params;

    send_progress(&events, ReconcilePhase::Scanning, 0, 0);

    let walked = {
        let filters = Arc::clone(&filters);
        tokio::task::spawn_blocking(move || walk_files(&directories, &filters))
            .await
            .map_err(|e| crate::IndexerError::Other(format!("walk task panicked: {e}")))?
    };

    let known_mtimes = pipeline.store().load_mtimes()?;
    let mut outcome = ReconcileOutcome::default();

    // Classify before processing so progress totals are stable.
    let mut to_process: Vec<WalkedFile> = Vec::new();
    for file in &walked {
        let key = normalize_path(&file.path);
        match known_mtimes.get(&key) {
            None => to_process.push(file.clone()),
            Some(&stored) if file.mtime_ms > stored => to_process.push(file.clone()),
            Some(_) => outcome.skipped += 1,
        }
    }

    let live: std::collections::HashSet<String> =
        walked.iter().map(|f| normalize_path(&f.path)).collect();
    let to_remove: Vec<String> = known_mtimes
        .keys()
        .filter(|path| !live.contains(*path))
        .cloned()
        .collect();

    let total = to_process.len() + to_remove.len();
    log::info!(
        "reconcile: {} to index, {} to remove, {} unchanged",
        to_process.len(),
        to_remove.len(),
        outcome.skipped
    );

    let mut current = 0;
    for file in to_process {
        if stop.load(Ordering::SeqCst) {
            outcome.cancelled = true;
            return Ok(outcome);
        }
        current += 1;
        send_progress(&events, ReconcilePhase::Processing, current, total);

        let key = normalize_path(&file.path);
        match pipeline.index_file(&file.path).await {
            Ok(_) => {
                outcome.indexed += 1;
                send_file(&events, &key, FileEventKind::Indexed, None);
            }
            Err(err) => {
                log::warn!("failed to index {key}: {err}");
                outcome.errors += 1;
                send_file(&events, &key, FileEventKind::Error, Some(err.to_string()));
            }
        }
    }

    for path in to_remove {
        if stop.load(Ordering::SeqCst) {
            outcome.cancelled = true;
            return Ok(outcome);
        }
        current += 1;
        send_progress(&events, ReconcilePhase::Processing, current, total);

        match pipeline.store().delete_file_chunks(&path) {
            Ok(()) => {
                outcome.deleted += 1;
                send_file(&events, &path, FileEventKind::Deleted, None);
            }
            Err(err) => {
                log::warn!("failed to remove {path}: {err}");
                outcome.errors += 1;
                send_file(&events, &path, FileEventKind::Error, Some(err.to_string()));
            }
        }
    }

    send_progress(&events, ReconcilePhase::Done, total, total);
    Ok(outcome)
}

fn send_progress(
    events: &UnboundedSender<ReconcileEvent>,
    phase: ReconcilePhase,
    current: usize,
    total: usize,
) {
    let _ = events.send(ReconcileEvent::Progress(ReconcileProgress {
        phase,
        current,
        total,
    }));
}

fn send_file(
    events: &UnboundedSender<ReconcileEvent>,
    file_path: &str,
    kind: FileEventKind,
    error_message: Option<String>,
) {
    let _ = events.send(ReconcileEvent::File(FileOutcome {
        file_path: file_path.to_string(),
        kind,
        error_message,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_embedding::{EmbeddingService, HashedEmbeddingService};
    use silo_store::SiloStore;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (Arc<FilePipeline>, Arc<SiloFilters>) {
        let store = Arc::new(SiloStore::open(dir.path().join("state").join("silo.db")).unwrap());
        let service = Arc::new(HashedEmbeddingService::new("hash-32", 32));
        store
            .init_meta(service.model_name(), service.dimensions())
            .unwrap();
        let pipeline = Arc::new(FilePipeline::new(store, service));
        let filters = Arc::new(
            SiloFilters::new(&["txt".to_string(), "md".to_string()], &["state".to_string()], &[])
                .unwrap(),
        );
        (pipeline, filters)
    }

    fn params(
        dir: &TempDir,
        pipeline: &Arc<FilePipeline>,
        filters: &Arc<SiloFilters>,
    ) -> (ReconcileParams, tokio::sync::mpsc::UnboundedReceiver<ReconcileEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (
            ReconcileParams {
                directories: vec![dir.path().to_path_buf()],
                filters: Arc::clone(filters),
                pipeline: Arc::clone(pipeline),
                stop: Arc::new(AtomicBool::new(false)),
                events: tx,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn reconcile_indexes_new_files_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (pipeline, filters) = setup(&dir);
        for name in ["a.txt", "b.txt", "c.txt"] {
            std::fs::write(dir.path().join(name), format!("contents of {name}")).unwrap();
        }

        let (p, _rx) = params(&dir, &pipeline, &filters);
        let first = reconcile(p).await.unwrap();
        assert_eq!(first.indexed, 3);
        assert_eq!(first.deleted, 0);

        // Second pass sees no changes.
        let (p, _rx) = params(&dir, &pipeline, &filters);
        let second = reconcile(p).await.unwrap();
        assert_eq!(second.indexed, 0);
        assert_eq!(second.deleted, 0);
        assert_eq!(second.skipped, 3);
    }

    #[tokio::test]
    async fn reconcile_handles_delete_and_modify_across_restarts() {
        let dir = TempDir::new().unwrap();
        let (pipeline, filters) = setup(&dir);
        for name in ["a.txt", "b.txt", "c.txt"] {
            std::fs::write(dir.path().join(name), format!("original {name}")).unwrap();
        }

        let (p, _rx) = params(&dir, &pipeline, &filters);
        reconcile(p).await.unwrap();

        // Externally: A deleted, B modified (newer mtime), C untouched.
        std::fs::remove_file(dir.path().join("a.txt")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "modified b").unwrap();
        let far_future = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        let file = std::fs::File::options()
            .write(true)
            .open(dir.path().join("b.txt"))
            .unwrap();
        file.set_modified(far_future).unwrap();
        drop(file);

        let (p, _rx) = params(&dir, &pipeline, &filters);
        let outcome = reconcile(p).await.unwrap();
        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.indexed, 1);
        assert_eq!(outcome.skipped, 1);

        let mtimes = pipeline.store().load_mtimes().unwrap();
        assert!(!mtimes.keys().any(|k| k.ends_with("a.txt")));
        assert!(mtimes.keys().any(|k| k.ends_with("b.txt")));
        assert!(mtimes.keys().any(|k| k.ends_with("c.txt")));
    }

    #[tokio::test]
    async fn stop_flag_cancels_promptly() {
        let dir = TempDir::new().unwrap();
        let (pipeline, filters) = setup(&dir);
        for i in 0..10 {
            std::fs::write(dir.path().join(format!("f{i}.txt")), "data").unwrap();
        }

        let (mut p, _rx) = params(&dir, &pipeline, &filters);
        p.stop = Arc::new(AtomicBool::new(true));
        let outcome = reconcile(p).await.unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.indexed, 0);
    }

    #[tokio::test]
    async fn progress_events_reach_done() {
        let dir = TempDir::new().unwrap();
        let (pipeline, filters) = setup(&dir);
        std::fs::write(dir.path().join("one.md"), "# hi\ntext\n").unwrap();

        let (p, mut rx) = params(&dir, &pipeline, &filters);
        reconcile(p).await.unwrap();

        let mut phases = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ReconcileEvent::Progress(progress) = event {
                phases.push(progress.phase);
            }
        }
        assert_eq!(phases.first(), Some(&ReconcilePhase::Scanning));
        assert_eq!(phases.last(), Some(&ReconcilePhase::Done));
    }
}
