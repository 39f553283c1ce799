//! Handler traits - Task を実行する Handler の定義
//!
//! # 二層構造
//! - **表層（Typed）**: `Handler<T>` - payload を `T` に decode 済みで受け取る
//! - **内部（Dyn）**: `TaskHandler` - object-safe、`TaskEnvelope` をそのまま受け取る
//!
//! `TypedHandler<T, H>` が `Handler<T>` を `TaskHandler` に型消去します。

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use super::task::Task;
use crate::domain::{ErrorKind, TaskEnvelope, TaskError};

/// Object-safe handler stored in the registry.
///
/// Returning `Err` marks the attempt as failed; the retry policy of the task
/// type decides what happens next.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, envelope: &TaskEnvelope) -> Result<(), TaskError>;
}

/// Handler は decode 済みの Task を実行する
///
/// # ジェネリクスによる型安全性
/// - `Handler<SendMessage>` は `SendMessage` しか受け取れない
/// - コンパイル時に Task と Handler の対応が保証される
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T) -> Result<(), TaskError>;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> TaskHandler for TypedHandler<T, H> {
    async fn handle(&self, envelope: &TaskEnvelope) -> Result<(), TaskError> {
        let task: T = serde_json::from_value(envelope.payload().clone()).map_err(|e| {
            TaskError::with_kind(ErrorKind::Decode, format!("json decode ({}): {e}", T::TYPE))
        })?;
        self.handler.handle(task).await
    }
}

/// Closure-backed handler, see [`handler_fn`].
pub struct FnHandler<F>(F);

/// Adapt an async closure taking the envelope.
///
/// ```ignore
/// let handler = handler_fn(|envelope: TaskEnvelope| async move {
///     tracing::info!(payload = %envelope.payload(), "sending");
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(TaskEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    async fn handle(&self, envelope: &TaskEnvelope) -> Result<(), TaskError> {
        (self.0)(envelope.clone()).await
    }
}
