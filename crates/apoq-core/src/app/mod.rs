//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてキューの振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **QueueConfig**: 実行時設定（環境変数）
//! - **TaskQueueBuilder**: 構築とワイヤリング、起動時検証
//! - **TaskQueue**: 利用者向けのファサード
//! - **Executor**: claim → handle → 状態更新 → イベント
//! - **WorkerPool**: ポーリングループ群

pub mod builder;
pub mod config;
pub mod executor;
pub mod runtime;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, TaskQueueBuilder};
pub use self::config::{ConfigError, QueueConfig};
pub use self::executor::Executor;
pub use self::runtime::TaskQueue;
pub use self::worker_loop::WorkerPool;
