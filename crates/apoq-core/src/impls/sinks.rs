//! EventSink implementations.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::domain::TaskEvent;
use crate::ports::EventSink;

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &TaskEvent) {
        let task = event.task();
        match event {
            TaskEvent::Completed { .. } => {
                info!(task_id = %task.id, task_type = %task.task_type, "task completed");
            }
            TaskEvent::Failed { error, .. } if event.is_exhausted() => {
                error!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    fail_count = task.fail_count,
                    error = %error,
                    "task failed permanently"
                );
            }
            TaskEvent::Failed { error, .. } => {
                warn!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    fail_count = task.fail_count,
                    process_at = %task.process_at,
                    error = %error,
                    "task failed, retry scheduled"
                );
            }
        }
    }
}

/// Forwards events into a tokio broadcast channel.
///
/// Slow receivers lag and lose the oldest events; a send with no receivers is
/// silently dropped.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<TaskEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: &TaskEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Notifier は登録された全 sink にイベントを配る
///
/// 組み込みの broadcast channel を常に持ち、`subscribe()` で受信側を得られる。
#[derive(Default)]
pub struct Notifier {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
    broadcast: BroadcastEventSink,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.broadcast.subscribe()
    }

    pub fn notify(&self, event: &TaskEvent) {
        let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        for sink in sinks.iter() {
            sink.emit(event);
        }
        self.broadcast.emit(event);
    }
}

impl EventSink for Notifier {
    fn emit(&self, event: &TaskEvent) {
        self.notify(event)
    }
}
