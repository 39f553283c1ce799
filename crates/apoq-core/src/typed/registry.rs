//! HandlerRegistry - Handler の登録と管理
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - Generic methods での登録と型安全性
//! - Arc による共有所有権
//!
//! # 並行性
//! - 読み取り（claim ごとの `registered_types()` / `get()`）は `RwLock` の read
//! - 登録は pool 起動前に行うのが想定。起動後の登録も安全だが、
//!   反映は次の claim から（どのワーカーが先に見るかは保証しない）

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::debug;

use super::handler::{Handler, TaskHandler, TypedHandler};
use super::task::Task;
use crate::domain::{Backoff, RetryPolicy, TaskType};

/// Per task type execution options.
#[derive(Debug, Clone, Default)]
pub struct HandlerOptions {
    pub retry: RetryPolicy,

    /// Abort the handler and count a failure after this long. `None` lets a
    /// handler run indefinitely.
    pub timeout: Option<Duration>,
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry.retry_limit = retry_limit;
        self
    }

    pub fn with_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.retry.backoff = Arc::new(backoff);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A handler together with its options.
#[derive(Clone)]
pub struct Registration {
    pub handler: Arc<dyn TaskHandler>,
    pub options: HandlerOptions,
}

/// HandlerRegistry は task_type → (handler, options) を管理
///
/// 同じ task_type を再登録すると後勝ち（エラーにはしない）。
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<TaskType, Registration>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `task_type`. Returns the
    /// registration it replaced, if any.
    pub fn register(
        &self,
        task_type: impl Into<TaskType>,
        handler: Arc<dyn TaskHandler>,
        options: HandlerOptions,
    ) -> Option<Registration> {
        let task_type = task_type.into();
        let previous = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_type.clone(), Registration { handler, options });
        if previous.is_some() {
            debug!(task_type = %task_type, "handler replaced");
        }
        previous
    }

    /// Register a typed handler under `T::TYPE`.
    pub fn register_typed<T: Task, H: Handler<T> + 'static>(
        &self,
        handler: H,
        options: HandlerOptions,
    ) -> Option<Registration> {
        self.register(T::task_type(), Arc::new(TypedHandler::new(handler)), options)
    }

    pub fn get(&self, task_type: &TaskType) -> Option<Registration> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_type)
            .cloned()
    }

    /// Currently registered task types, sorted.
    pub fn registered_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
