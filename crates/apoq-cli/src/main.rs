use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use apoq_core::app::{QueueConfig, TaskQueue};
use apoq_core::domain::{TaskError, TaskEvent};
use apoq_core::impls::{InMemoryTaskStore, PgTaskStore, TracingEventSink};
use apoq_core::ports::TaskStore;
use apoq_core::typed::{Handler, HandlerOptions, Task};
use async_trait::async_trait;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const COLORS: &[&str] = &["pink", "orange", "yellow", "green", "blue"];
const ENV_DEMO_TASKS: &str = "APOQ_DEMO_TASKS";
const DEFAULT_DEMO_TASKS: usize = 100;

#[derive(Debug, Serialize, Deserialize)]
struct SendMessage {
    color: String,
}

impl Task for SendMessage {
    const TYPE: &'static str = "send_message";
}

/// ときどき失敗する handler（retry の様子を見るため）
struct SendMessageHandler {
    sent: AtomicU32,
}

#[async_trait]
impl Handler<SendMessage> for SendMessageHandler {
    async fn handle(&self, task: SendMessage) -> Result<(), TaskError> {
        if rand::thread_rng().gen_bool(0.2) {
            return Err(TaskError::new(format!("mail server rejected the {} message", task.color)));
        }
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        info!(color = %task.color, sent = n, "sending message");
        Ok(())
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // JSON logs + timestamps, configurable via RUST_LOG.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_target(false)
        .try_init();
}

// claim の期限は build() が config から store に渡す
async fn open_store(config: &QueueConfig) -> Result<Arc<dyn TaskStore>, Box<dyn std::error::Error>> {
    match &config.database_url {
        Some(url) => Ok(Arc::new(PgTaskStore::connect(url).await?)),
        None => {
            warn!("no database url configured, tasks live in memory only");
            Ok(Arc::new(InMemoryTaskStore::new()))
        }
    }
}

fn demo_task_count() -> Result<usize, Box<dyn std::error::Error>> {
    match std::env::var(ENV_DEMO_TASKS) {
        Ok(raw) => Ok(raw
            .trim()
            .parse()
            .map_err(|_| format!("invalid value for {ENV_DEMO_TASKS}: {raw:?}"))?),
        Err(_) => Ok(DEFAULT_DEMO_TASKS),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // (A) 設定と store
    let config = QueueConfig::from_env()?;
    let store = open_store(&config).await?;

    let queue = TaskQueue::builder(store)
        .config(config)
        .register_typed::<SendMessage, _>(
            SendMessageHandler {
                sent: AtomicU32::new(0),
            },
            HandlerOptions::default(),
        )
        .event_sink(TracingEventSink)
        .expect_tasks(&[SendMessage::TYPE])
        .build()?;

    // (B) テーブル準備
    queue.prepare().await?;

    // (C) タスク投入
    let count = demo_task_count()?;
    for _ in 0..count {
        let color = COLORS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("blue");
        queue
            .enqueue_typed(&SendMessage {
                color: color.to_string(),
            })
            .await?;
    }
    info!(count, "demo tasks enqueued");

    // (D) イベント購読
    let mut events = queue.subscribe();
    let listener = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                TaskEvent::Completed { task } => info!(task_id = %task.id, "task complete"),
                TaskEvent::Failed { task, .. } if event.is_exhausted() => {
                    warn!(task_id = %task.id, "task gave up")
                }
                TaskEvent::Failed { .. } => {}
            }
        }
    });

    // (E) worker を起動して Ctrl-C を待つ
    queue.start_pool(None).await?;
    info!("processing; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    // (F) 後片付け
    queue.stop_pool().await;
    listener.abort();
    let counts = queue.counts().await?;
    info!(
        pending = counts.pending,
        completed = counts.completed,
        failed = counts.failed,
        "final counts"
    );
    Ok(())
}
