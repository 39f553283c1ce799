//! Executor - claim → handle → 状態更新 → イベント
//!
//! # フロー（1 回の試行）
//! 1. `HandlerRegistry::registered_types()` で claim 対象の型を決める
//! 2. `TaskStore::claim_next()` で 1 件確保（なければ 0 を返す）
//! 3. Handler を別の tokio task で実行（panic / timeout を失敗として捕捉）
//! 4. 成功なら `mark_completed`、失敗なら `RetryPolicy` に従って
//!    `mark_retrying` か `mark_failed`
//! 5. 書き込みがコミットされた後でイベントを 1 つだけ発火

use std::any::Any;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{
    ClaimId, ErrorKind, QueueError, RetryPolicy, TaskEnvelope, TaskError, TaskEvent, TaskRecord,
    Transition,
};
use crate::impls::Notifier;
use crate::ports::{Clock, IdGenerator, TaskStore};
use crate::typed::{HandlerRegistry, Registration};

pub struct Executor {
    store: Arc<dyn TaskStore>,
    registry: Arc<HandlerRegistry>,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl Executor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<HandlerRegistry>,
        notifier: Arc<Notifier>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
            clock,
            ids,
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    pub fn ids(&self) -> &Arc<dyn IdGenerator> {
        &self.ids
    }

    /// Claim and process at most one task. Returns 1 when a task was
    /// processed, 0 when nothing was eligible.
    pub async fn work_once(&self) -> Result<usize, QueueError> {
        let types = self.registry.registered_types();
        if types.is_empty() {
            return Ok(0);
        }

        let claim_id = self.ids.generate_claim_id();
        let Some(task) = self.store.claim_next(&types, claim_id).await? else {
            return Ok(0);
        };
        debug!(task_id = %task.id, task_type = %task.task_type, %claim_id, "task claimed");

        let event = self.execute(task, claim_id).await?;
        self.notifier.notify(&event);
        Ok(1)
    }

    /// Run the handler for a claimed task and record the outcome.
    async fn execute(&self, task: TaskRecord, claim_id: ClaimId) -> Result<TaskEvent, QueueError> {
        let registration = self.registry.get(&task.task_type);

        let outcome = match &registration {
            Some(registration) => run_handler(registration, task.envelope()).await,
            None => Err(TaskError::new(format!(
                "no handler registered for {}",
                task.task_type
            ))),
        };

        let event = match outcome {
            Ok(()) => {
                let task = self.store.mark_completed(task.id, claim_id).await?;
                TaskEvent::Completed { task }
            }
            Err(error) => {
                let policy = registration
                    .map(|r| r.options.retry)
                    .unwrap_or_default();
                let task = self.record_failure(&task, claim_id, &policy).await?;
                TaskEvent::Failed { task, error }
            }
        };
        Ok(event)
    }

    async fn record_failure(
        &self,
        task: &TaskRecord,
        claim_id: ClaimId,
        policy: &RetryPolicy,
    ) -> Result<TaskRecord, QueueError> {
        let transition = policy.next_transition(task.fail_count, self.clock.now()).await;
        let updated = match transition {
            Transition::Retry {
                fail_count,
                process_at,
            } => {
                self.store
                    .mark_retrying(task.id, claim_id, fail_count, process_at)
                    .await?
            }
            Transition::Fail { fail_count } => {
                self.store.mark_failed(task.id, claim_id, fail_count).await?
            }
        };
        Ok(updated)
    }
}

/// Handler は別 task で動かす。panic しても worker loop は死なない
async fn run_handler(registration: &Registration, envelope: TaskEnvelope) -> Result<(), TaskError> {
    let handler = Arc::clone(&registration.handler);
    let task_id = envelope.task_id();
    let mut join = tokio::spawn(async move { handler.handle(&envelope).await });

    let joined = match registration.options.timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut join).await {
            Ok(joined) => joined,
            Err(_) => {
                join.abort();
                warn!(%task_id, timeout = ?limit, "handler timed out");
                return Err(TaskError::with_kind(
                    ErrorKind::Timeout,
                    format!("handler timed out after {limit:?}"),
                ));
            }
        },
        None => join.await,
    };

    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            warn!(%task_id, panic = %message, "handler panicked");
            Err(TaskError::with_kind(ErrorKind::Panic, message))
        }
        Err(e) => Err(TaskError::with_kind(
            ErrorKind::Panic,
            format!("handler task cancelled: {e}"),
        )),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FixedDelay, StoreError, TaskId, TaskState, TaskType};
    use crate::impls::InMemoryTaskStore;
    use crate::impls::flaky::FlakyTaskStore;
    use crate::ports::{FixedClock, UlidGenerator};
    use crate::typed::{HandlerOptions, handler_fn};
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryTaskStore>,
        executor: Executor,
        events: Arc<Mutex<Vec<TaskEvent>>>,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(t0()));
        let store = Arc::new(InMemoryTaskStore::with_clock(clock.clone()));
        let notifier = Arc::new(Notifier::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        notifier.add_sink(Arc::new(move |e: &TaskEvent| sink.lock().unwrap().push(e.clone())));

        let executor = Executor::new(
            store.clone(),
            Arc::new(HandlerRegistry::new()),
            notifier,
            clock.clone(),
            Arc::new(UlidGenerator::new(clock.clone())),
        );
        Fixture {
            store,
            executor,
            events,
        }
    }

    async fn state_of(store: &InMemoryTaskStore, id: TaskId) -> TaskRecord {
        store.get(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn no_registered_types_skips_the_store() {
        let f = fixture();
        f.store.insert(&TaskType::new("a"), json!({})).await.unwrap();
        assert_eq!(f.executor.work_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failure_schedules_retry_with_backoff() {
        let f = fixture();
        f.executor.registry().register(
            "a",
            Arc::new(handler_fn(|_e: TaskEnvelope| async { Err(TaskError::new("nope")) })),
            HandlerOptions::new().with_backoff(FixedDelay(Duration::from_secs(7))),
        );
        let id = f.store.insert(&TaskType::new("a"), json!({})).await.unwrap();

        assert_eq!(f.executor.work_once().await.unwrap(), 1);

        let record = state_of(&f.store, id).await;
        assert_eq!(record.state, TaskState::Pending);
        assert_eq!(record.fail_count, 1);
        assert_eq!(record.process_at, t0() + chrono::Duration::seconds(7));

        let events = f.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_exhausted());
        assert_eq!(events[0].error().map(TaskError::message), Some("nope"));
    }

    #[tokio::test]
    async fn zero_retry_limit_fails_on_first_error() {
        let f = fixture();
        f.executor.registry().register(
            "a",
            Arc::new(handler_fn(|_e: TaskEnvelope| async { Err(TaskError::new("nope")) })),
            HandlerOptions::new().with_retry_limit(0),
        );
        let id = f.store.insert(&TaskType::new("a"), json!({})).await.unwrap();

        f.executor.work_once().await.unwrap();

        let record = state_of(&f.store, id).await;
        assert_eq!(record.state, TaskState::Failed);
        assert_eq!(record.fail_count, 1);
        assert!(f.events.lock().unwrap()[0].is_exhausted());
    }

    #[tokio::test]
    async fn panic_is_a_task_failure() {
        let f = fixture();
        f.executor.registry().register(
            "a",
            Arc::new(handler_fn(|_e: TaskEnvelope| async {
                if true {
                    panic!("kaboom");
                }
                Ok(())
            })),
            HandlerOptions::default(),
        );
        let id = f.store.insert(&TaskType::new("a"), json!({})).await.unwrap();

        assert_eq!(f.executor.work_once().await.unwrap(), 1);

        assert_eq!(state_of(&f.store, id).await.fail_count, 1);
        let events = f.events.lock().unwrap();
        let error = events[0].error().unwrap();
        assert_eq!(error.kind(), ErrorKind::Panic);
        assert_eq!(error.message(), "kaboom");
    }

    #[tokio::test]
    async fn timeout_aborts_the_handler() {
        let f = fixture();
        f.executor.registry().register(
            "a",
            Arc::new(handler_fn(|_e: TaskEnvelope| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })),
            HandlerOptions::new().with_timeout(Duration::from_millis(50)),
        );
        let id = f.store.insert(&TaskType::new("a"), json!({})).await.unwrap();

        assert_eq!(f.executor.work_once().await.unwrap(), 1);

        let record = state_of(&f.store, id).await;
        assert_eq!(record.state, TaskState::Pending);
        assert_eq!(record.fail_count, 1);
        let events = f.events.lock().unwrap();
        assert_eq!(events[0].error().map(TaskError::kind), Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn store_error_on_terminal_write_emits_no_event() {
        let clock = Arc::new(FixedClock::new(t0()));
        let store = Arc::new(
            FlakyTaskStore::new(InMemoryTaskStore::with_clock(clock.clone())).fail_completions(),
        );
        let notifier = Arc::new(Notifier::new());
        let mut rx = notifier.subscribe();
        let executor = Executor::new(
            store.clone(),
            Arc::new(HandlerRegistry::new()),
            notifier,
            clock.clone(),
            Arc::new(UlidGenerator::new(clock.clone())),
        );
        executor.registry().register(
            "a",
            Arc::new(handler_fn(|_e: TaskEnvelope| async { Ok(()) })),
            HandlerOptions::default(),
        );
        let id = store.insert(&TaskType::new("a"), json!({})).await.unwrap();

        let err = executor.work_once().await.unwrap_err();
        assert!(matches!(err, QueueError::Store(StoreError::Unavailable(_))));
        assert!(rx.try_recv().is_err());
        assert_eq!(state_of(store.inner(), id).await.state, TaskState::Pending);
    }

    #[tokio::test]
    async fn store_error_on_claim_is_returned() {
        let clock = Arc::new(FixedClock::new(t0()));
        let store = Arc::new(
            FlakyTaskStore::new(InMemoryTaskStore::with_clock(clock.clone())).fail_next_claims(1),
        );
        let notifier = Arc::new(Notifier::new());
        let mut rx = notifier.subscribe();
        let executor = Executor::new(
            store.clone(),
            Arc::new(HandlerRegistry::new()),
            notifier,
            clock.clone(),
            Arc::new(UlidGenerator::new(clock.clone())),
        );
        executor.registry().register(
            "a",
            Arc::new(handler_fn(|_e: TaskEnvelope| async { Ok(()) })),
            HandlerOptions::default(),
        );
        store.insert(&TaskType::new("a"), json!({})).await.unwrap();

        assert!(matches!(
            executor.work_once().await,
            Err(QueueError::Store(StoreError::Unavailable(_)))
        ));
        assert!(rx.try_recv().is_err());

        assert_eq!(executor.work_once().await.unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap().task().state, TaskState::Completed);
    }

    #[tokio::test]
    async fn handler_sees_id_and_payload() {
        let f = fixture();
        let seen = Arc::new(Mutex::new(None));
        let captured = seen.clone();
        f.executor.registry().register(
            "a",
            Arc::new(handler_fn(move |e: TaskEnvelope| {
                let captured = captured.clone();
                async move {
                    *captured.lock().unwrap() = Some((e.task_id(), e.payload().clone()));
                    Ok(())
                }
            })),
            HandlerOptions::default(),
        );
        let id = f.store.insert(&TaskType::new("a"), json!({"color": "teal"})).await.unwrap();

        f.executor.work_once().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), Some((id, json!({"color": "teal"}))));
        assert_eq!(f.events.lock().unwrap()[0].name(), "task.completed");
    }
}
