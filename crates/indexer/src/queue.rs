use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type Callback = Box<dyn FnOnce() + Send>;
type QueueTask = Pin<Box<dyn Future<Output = ()> + Send>>;

struct QueueEntry {
    silo_name: String,
    cancelled: Arc<AtomicBool>,
    on_start: Callback,
    task: QueueTask,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<QueueEntry>,
    busy: bool,
    current_holder: Option<String>,
}

/// Global FIFO serialising all embedding-consuming work across silos.
///
/// The inference runtime is process-global and not reentrant, and parallel
/// batch embedding would multiply peak memory; serialising whole tasks at
/// the application level is the simplest correct discipline. The head-of-line
/// holder is the only silo allowed to drive the embedding service.
pub struct IndexingQueue {
    state: Arc<Mutex<QueueState>>,
}

/// Handle returned by [`IndexingQueue::enqueue`]; cancelling marks the entry
/// so it is skipped silently when it reaches the head.
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

static GLOBAL_QUEUE: Lazy<IndexingQueue> = Lazy::new(IndexingQueue::new);

impl IndexingQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    /// The process-wide queue instance shared by every silo.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL_QUEUE
    }

    /// Enqueue a task. `on_waiting` fires immediately iff the queue is busy;
    /// `on_start` fires when the entry reaches the head un-cancelled.
    ///
    /// Must be called from within a tokio runtime: an idle queue spawns its
    /// drain task on the current runtime.
    pub fn enqueue(
        &self,
        silo_name: impl Into<String>,
        on_waiting: impl FnOnce() + Send + 'static,
        on_start: impl FnOnce() + Send + 'static,
        task: impl Future<Output = ()> + Send + 'static,
    ) -> CancelHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = CancelHandle {
            cancelled: Arc::clone(&cancelled),
        };

        let was_busy = {
            let mut state = self.state.lock().expect("queue state poisoned");
            let was_busy = state.busy;
            state.entries.push_back(QueueEntry {
                silo_name: silo_name.into(),
                cancelled,
                on_start: Box::new(on_start),
                task: Box::pin(task),
            });
            state.busy = true;
            was_busy
        };

        if was_busy {
            on_waiting();
        } else {
            let state = Arc::clone(&self.state);
            tokio::spawn(drain(state));
        }

        handle
    }

    /// Name of the silo currently holding the head of the queue.
    #[must_use]
    pub fn current_holder(&self) -> Option<String> {
        self.state
            .lock()
            .expect("queue state poisoned")
            .current_holder
            .clone()
    }

    /// Whether any task is running or queued.
    #[must_use]
    pub fn has_queued_work(&self) -> bool {
        let state = self.state.lock().expect("queue state poisoned");
        state.busy || !state.entries.is_empty()
    }
}

impl Default for IndexingQueue {
    fn default() -> Self {
        Self::new()
    }
}

async fn drain(state: Arc<Mutex<QueueState>>) {
    loop {
        let entry = {
            let mut guard = state.lock().expect("queue state poisoned");
            match guard.entries.pop_front() {
                Some(entry) => {
                    guard.current_holder = Some(entry.silo_name.clone());
                    Some(entry)
                }
                None => {
                    guard.busy = false;
                    guard.current_holder = None;
                    None
                }
            }
        };

        let Some(entry) = entry else { break };
        if entry.cancelled.load(Ordering::SeqCst) {
            log::debug!("skipping cancelled queue entry for {}", entry.silo_name);
            continue;
        }

        (entry.on_start)();
        entry.task.await;
    }
}
