//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: テスト・開発用の正本
//! - **PgTaskStore**: PostgreSQL の正本（+ `migrate`）
//! - **TracingEventSink / BroadcastEventSink / Notifier**: イベント配信

#[cfg(test)]
pub(crate) mod flaky;
pub mod memory;
pub mod migrate;
pub mod postgres;
pub mod sinks;

pub use self::memory::InMemoryTaskStore;
pub use self::postgres::PgTaskStore;
pub use self::sinks::{BroadcastEventSink, Notifier, TracingEventSink};
