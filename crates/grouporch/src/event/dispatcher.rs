//! Listener registry and ordered event delivery.

use super::types::{GroupEvent, GroupListener, ListenerId};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Registered group listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn GroupListener>)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn GroupListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        id
    }

    /// Returns false if the id was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<(ListenerId, Arc<dyn GroupListener>)> {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

enum DispatchMessage {
    Events(Vec<GroupEvent>),
    Barrier(oneshot::Sender<()>),
}

/// Delivers events to listeners on a dedicated task, in submission order.
#[derive(Clone)]
pub struct EventDispatcher {
    tx: mpsc::UnboundedSender<DispatchMessage>,
    queued: Arc<AtomicUsize>,
    warn_threshold: usize,
}

impl EventDispatcher {
    /// Spawns the delivery task on `handle`.
    pub fn spawn(
        handle: &Handle,
        listeners: Arc<ListenerRegistry>,
        warn_threshold: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        let task = handle.spawn(run(rx, listeners, Arc::clone(&queued)));
        (
            Self {
                tx,
                queued,
                warn_threshold,
            },
            task,
        )
    }

    pub fn post(&self, events: Vec<GroupEvent>) {
        if events.is_empty() {
            return;
        }
        let depth = self.queued.fetch_add(events.len(), Ordering::Relaxed) + events.len();
        if self.warn_threshold > 0 && depth > self.warn_threshold {
            warn!(depth, threshold = self.warn_threshold, "Event queue backing up");
        }
        let count = events.len();
        if self.tx.send(DispatchMessage::Events(events)).is_err() {
            self.queued.fetch_sub(count, Ordering::Relaxed);
            debug!(count, "Event dispatcher stopped, dropping events");
        }
    }

    /// Resolves once every event posted before the call has been delivered.
    pub async fn barrier(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(DispatchMessage::Barrier(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Number of events posted and not yet delivered.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<DispatchMessage>,
    listeners: Arc<ListenerRegistry>,
    queued: Arc<AtomicUsize>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            DispatchMessage::Events(events) => {
                let count = events.len();
                let targets = listeners.snapshot();
                // Batches are awaited one at a time to keep delivery ordered.
                let delivery = tokio::task::spawn_blocking(move || deliver(&targets, &events));
                if let Err(e) = delivery.await {
                    error!(error = %e, "Event delivery task failed");
                }
                queued.fetch_sub(count, Ordering::Relaxed);
            }
            DispatchMessage::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Event dispatcher exiting");
}

/// Runs on the blocking pool, so listeners may block without stalling
/// device tasks.
fn deliver(targets: &[(ListenerId, Arc<dyn GroupListener>)], events: &[GroupEvent]) {
    for event in events {
        for (id, listener) in targets {
            if catch_unwind(AssertUnwindSafe(|| listener.event(event))).is_err() {
                error!(listener = %id, event = %event, "Listener panicked");
            }
        }
    }
}
