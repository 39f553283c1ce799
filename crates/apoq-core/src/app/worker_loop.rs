//! WorkerPool - ポーリングループ群
//!
//! 各ループは独立に `work_once` を繰り返す:
//! - 1 件処理できたら即座に次へ
//! - 何もなければ `poll_interval` だけ眠る（停止シグナルで起きる）
//!
//! 停止は協調的。実行中の handler は最後まで走り、その後ループが抜ける。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::executor::Executor;
use crate::domain::WorkerId;

/// Worker pool handle.
/// - `request_shutdown()` で全ループに停止を通知
/// - `shutdown_and_join()` で全ループの終了を待てる
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `concurrency` loops (at least one).
    pub fn spawn(concurrency: usize, executor: Arc<Executor>, poll_interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let n = concurrency.max(1);
        let mut joins = Vec::with_capacity(n);
        for _ in 0..n {
            let worker_id = executor.ids().generate_worker_id();
            let executor = Arc::clone(&executor);
            let rx = shutdown_rx.clone();

            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, executor, poll_interval, rx).await;
            }));
        }
        info!(concurrency = n, ?poll_interval, "worker pool started");

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Request shutdown for all loops.
    /// In-flight handlers are not cancelled; loops stop taking new claims.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all loops.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "worker loop ended abnormally");
            }
        }
        info!("worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: WorkerId,
    executor: Arc<Executor>,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(%worker_id, "worker loop started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match executor.work_once().await {
            Ok(0) => {}
            Ok(_) => continue,
            Err(e) => {
                // store が落ちていても pool は死なない。一拍おいて再試行
                error!(%worker_id, error = %e, "poll failed");
            }
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // sender が drop された = pool ごと捨てられた
                    break;
                }
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
    debug!(%worker_id, "worker loop stopped");
}
