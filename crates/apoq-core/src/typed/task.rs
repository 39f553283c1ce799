//! Task trait - 型付き Task の定義
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPE`)
//! - Trait bounds の組み合わせ (Serialize + DeserializeOwned + Send + Sync + 'static)

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::TaskType;

/// Task は task_type と payload の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendMessage {
///     color: String,
/// }
///
/// impl Task for SendMessage {
///     const TYPE: &'static str = "send_message";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize`: enqueue 時に JSON にするため
/// - `DeserializeOwned`: handler 実行前に payload から復元するため
/// - `Send + Sync + 'static`: ワーカーのタスクに渡すため
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// task_type の定義（ストアの `type` 列とそのまま比較される）
    const TYPE: &'static str;

    fn task_type() -> TaskType {
        TaskType::new(Self::TYPE)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::Task;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SendMessage {
        pub color: String,
    }

    impl Task for SendMessage {
        const TYPE: &'static str = "send_message";
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Resize {
        pub width: u32,
        pub height: u32,
    }

    impl Task for Resize {
        const TYPE: &'static str = "image.resize";
    }
}
