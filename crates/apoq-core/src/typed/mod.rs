//! Typed - Handler API
//!
//! task_type の typo を型で排除し、Handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `TaskHandler` trait - object-safe, type erasure

pub mod handler;
pub mod registry;
pub mod task;

pub use self::handler::{FnHandler, Handler, TaskHandler, TypedHandler, handler_fn};
pub use self::registry::{HandlerOptions, HandlerRegistry, Registration};
pub use self::task::Task;
