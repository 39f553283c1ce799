//! EventSink port - イベント通知の抽象化
//!
//! 実装は `impls::sinks` を参照（tracing, broadcast, closure）。

use crate::domain::TaskEvent;

/// EventSink はタスクイベントを受け取る
///
/// # 設計原則
/// - 同期呼び出し: 状態の書き込みがコミットされた後、同じワーカー上で呼ばれる
/// - 実行経路の正しさには関与しない（失敗しても何も巻き戻らない）
/// - 重い処理はしないこと（ワーカーを止めてしまう）
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &TaskEvent);
}

/// Any `Fn(&TaskEvent)` closure is a sink.
impl<F> EventSink for F
where
    F: Fn(&TaskEvent) + Send + Sync,
{
    fn emit(&self, event: &TaskEvent) {
        self(event)
    }
}

/// 何もしない sink
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &TaskEvent) {}
}
