//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（PostgreSQL、時計、ログ収集など）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - ストア（PostgreSQL など）が source of truth（正本）
//! - ワーカー間の協調はストアの claim だけで行う（プロセス内の共有状態なし）

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::{DEFAULT_CLAIM_TIMEOUT, TaskStore};
