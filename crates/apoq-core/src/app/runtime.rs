//! TaskQueue - 利用者向けの表面
//!
//! enqueue / register / work_once / start_pool / stop_pool / subscribe を
//! ひとつにまとめたファサード。状態の正本は常に TaskStore 側にある。

use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};

use super::builder::TaskQueueBuilder;
use super::config::QueueConfig;
use super::executor::Executor;
use super::worker_loop::WorkerPool;
use crate::domain::{QueueError, TaskEvent, TaskId, TaskRecord, TaskType};
use crate::observability::QueueCounts;
use crate::ports::TaskStore;
use crate::typed::{Handler, HandlerOptions, HandlerRegistry, Task, TaskHandler};

pub struct TaskQueue {
    executor: Arc<Executor>,
    config: QueueConfig,
    pool: Mutex<Option<WorkerPool>>,
}

impl TaskQueue {
    pub(crate) fn new(executor: Arc<Executor>, config: QueueConfig) -> Self {
        Self {
            executor,
            config,
            pool: Mutex::new(None),
        }
    }

    pub fn builder(store: Arc<dyn TaskStore>) -> TaskQueueBuilder {
        TaskQueueBuilder::new(store)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        self.executor.registry()
    }

    /// Bootstrap the store schema. Idempotent.
    pub async fn prepare(&self) -> Result<(), QueueError> {
        self.executor.store().ensure_schema().await?;
        Ok(())
    }

    /// Insert a pending task, eligible immediately.
    pub async fn enqueue(
        &self,
        task_type: impl Into<TaskType>,
        data: serde_json::Value,
    ) -> Result<TaskId, QueueError> {
        let task_type = task_type.into();
        let id = self.executor.store().insert(&task_type, data).await?;
        debug!(task_id = %id, %task_type, "task enqueued");
        Ok(id)
    }

    pub async fn enqueue_typed<T: Task>(&self, task: &T) -> Result<TaskId, QueueError> {
        let data = serde_json::to_value(task)?;
        self.enqueue(T::task_type(), data).await
    }

    /// Register (or replace) the handler for `task_type`.
    pub fn register(
        &self,
        task_type: impl Into<TaskType>,
        handler: Arc<dyn TaskHandler>,
        options: HandlerOptions,
    ) {
        self.executor.registry().register(task_type, handler, options);
    }

    pub fn register_typed<T: Task, H: Handler<T> + 'static>(
        &self,
        handler: H,
        options: HandlerOptions,
    ) {
        self.executor.registry().register_typed::<T, H>(handler, options);
    }

    /// Claim and process at most one task; 1 if one was processed, else 0.
    pub async fn work_once(&self) -> Result<usize, QueueError> {
        self.executor.work_once().await
    }

    /// Start the internal pool. `None` uses `QueueConfig::concurrency`.
    pub async fn start_pool(&self, concurrency: Option<usize>) -> Result<(), QueueError> {
        let mut pool = self.pool.lock().await;
        if pool.is_some() {
            return Err(QueueError::PoolAlreadyRunning);
        }
        *pool = Some(self.spawn_pool(concurrency.unwrap_or(self.config.concurrency)));
        Ok(())
    }

    /// Signal the internal pool and wait for every loop to finish its
    /// current task. No-op when no pool is running.
    pub async fn stop_pool(&self) {
        let pool = self.pool.lock().await.take();
        if let Some(pool) = pool {
            info!(workers = pool.len(), "stopping worker pool");
            pool.shutdown_and_join().await;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.pool.lock().await.is_some()
    }

    /// A pool owned by the caller, independent of `start_pool`.
    pub fn spawn_pool(&self, concurrency: usize) -> WorkerPool {
        WorkerPool::spawn(
            concurrency,
            Arc::clone(&self.executor),
            self.config.poll_interval,
        )
    }

    /// Receive every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.executor.notifier().subscribe()
    }

    pub async fn counts(&self) -> Result<QueueCounts, QueueError> {
        Ok(self.executor.store().counts_by_state().await?)
    }

    pub async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, QueueError> {
        Ok(self.executor.store().get(id).await?)
    }
}
