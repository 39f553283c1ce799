//! Domain model (ids, task record, state machine, retry policy, errors, events).
//!
//! Architecture-agnostic: nothing here knows about PostgreSQL or tokio tasks.

pub mod backoff;
pub mod errors;
pub mod events;
pub mod ids;
pub mod state;
pub mod task;

pub use backoff::{
    Backoff, BackoffFn, DEFAULT_RETRY_LIMIT, ExponentialJitter, FixedDelay, RetryPolicy,
    Transition, backoff_fn,
};
pub use errors::{ErrorKind, QueueError, StoreError, TaskError};
pub use events::TaskEvent;
pub use ids::{ClaimId, TaskId, WorkerId};
pub use state::TaskState;
pub use task::{TaskEnvelope, TaskRecord, TaskType};
