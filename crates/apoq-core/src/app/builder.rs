//! TaskQueueBuilder - TaskQueue の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use super::config::QueueConfig;
use super::executor::Executor;
use super::runtime::TaskQueue;
use crate::domain::{TaskError, TaskEvent, TaskRecord, TaskType};
use crate::impls::Notifier;
use crate::ports::{Clock, EventSink, SystemClock, TaskStore, UlidGenerator};
use crate::typed::{Handler, HandlerOptions, HandlerRegistry, Task, TaskHandler};

/// TaskQueueBuilder は TaskQueue を構築
///
/// # 使用例
/// ```ignore
/// let queue = TaskQueueBuilder::new(Arc::new(store))
///     .register_typed::<SendMessage, _>(SendMessageHandler, HandlerOptions::default())
///     .on_failed(|task, error| eprintln!("{} failed: {error}", task.id))
///     .expect_tasks(&["send_message"])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_tasks() で期待される task_type を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
pub struct TaskQueueBuilder {
    store: Arc<dyn TaskStore>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    registry: HandlerRegistry,
    notifier: Notifier,
    expected_tasks: Option<Vec<String>>,
}

/// BuildError は TaskQueue 構築時のエラー
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),
}

impl TaskQueueBuilder {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            config: QueueConfig::default(),
            clock: Arc::new(SystemClock),
            registry: HandlerRegistry::new(),
            notifier: Notifier::new(),
            expected_tasks: None,
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// retry の process_at 計算に使う時計（テストでは FixedClock）
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn register(
        self,
        task_type: impl Into<TaskType>,
        handler: Arc<dyn TaskHandler>,
        options: HandlerOptions,
    ) -> Self {
        self.registry.register(task_type, handler, options);
        self
    }

    pub fn register_typed<T: Task, H: Handler<T> + 'static>(
        self,
        handler: H,
        options: HandlerOptions,
    ) -> Self {
        self.registry.register_typed::<T, H>(handler, options);
        self
    }

    pub fn event_sink(self, sink: impl EventSink + 'static) -> Self {
        self.notifier.add_sink(Arc::new(sink));
        self
    }

    /// Called after a task completes.
    pub fn on_completed<F>(self, f: F) -> Self
    where
        F: Fn(&TaskRecord) + Send + Sync + 'static,
    {
        self.event_sink(move |event: &TaskEvent| {
            if let TaskEvent::Completed { task } = event {
                f(task)
            }
        })
    }

    /// Called after every failed attempt, retried or not.
    pub fn on_failed<F>(self, f: F) -> Self
    where
        F: Fn(&TaskRecord, &TaskError) + Send + Sync + 'static,
    {
        self.event_sink(move |event: &TaskEvent| {
            if let TaskEvent::Failed { task, error } = event {
                f(task, error)
            }
        })
    }

    /// 期待される task_type のリストを設定
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// # 検証
    /// - expect_tasks() で設定された task_type が全て登録されているかチェック
    /// - 不足があれば BuildError::MissingTaskTypes を返す
    pub fn build(self) -> Result<TaskQueue, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let registered_types = self.registry.registered_types();
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|x| !registered_types.iter().any(|t| t.as_str() == x.as_str()))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }

        // claim の期限は config が正
        self.store.set_claim_timeout(self.config.claim_timeout);

        let ids = Arc::new(UlidGenerator::new(Arc::clone(&self.clock)));
        let executor = Executor::new(
            self.store,
            Arc::new(self.registry),
            Arc::new(self.notifier),
            self.clock,
            ids,
        );
        Ok(TaskQueue::new(Arc::new(executor), self.config))
    }
}
