//! apoq-core
//!
//! PostgreSQL-backed background task queue.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task record, state, backoff, errors, events）
//! - **ports**: 抽象化レイヤー（TaskStore, Clock, IdGenerator, EventSink）
//! - **typed**: 型付き Task API（Task trait, Handler trait, HandlerRegistry）
//! - **impls**: 実装（InMemoryTaskStore, PgTaskStore, event sinks）
//! - **app**: アプリケーションロジック（config, builder, TaskQueue, executor, worker pool）
//! - **observability**: 状態別の件数

pub mod app;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod typed;

pub use app::{BuildError, ConfigError, QueueConfig, TaskQueue, TaskQueueBuilder, WorkerPool};
pub use domain::{
    ErrorKind, QueueError, RetryPolicy, StoreError, TaskEnvelope, TaskError, TaskEvent, TaskId,
    TaskRecord, TaskState, TaskType,
};
pub use impls::{InMemoryTaskStore, PgTaskStore};
pub use observability::QueueCounts;
pub use typed::{Handler, HandlerOptions, Task, TaskHandler, handler_fn};
