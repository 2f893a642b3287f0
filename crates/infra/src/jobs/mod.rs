//! Deferred job system with retry, backoff, and dead-letter handling.
//!
//! ## Design
//!
//! - Jobs are persisted records, not in-process timers: a scheduler restart
//!   picks up where the previous one stopped.
//! - Each job kind is a tagged variant carrying its own typed payload.
//! - Retry policy with exponential backoff; exhausted jobs land in a
//!   dead-letter queue that stays visible (stats + listing + manual retry).
//! - Execution is at-least-once; mutating handlers re-derive their inputs
//!   from current state instead of trusting the payload.
//!
//! ## Components
//!
//! - `Job`: the record (kind, status, retry policy, schedule, history)
//! - `JobStore`: persistence (in-memory or Postgres)
//! - `JobExecutor`: polling worker with graceful shutdown
//! - handlers: the three job bodies (restock, low-stock notice, reminder)

pub mod executor;
pub mod handlers;
pub mod postgres;
pub mod store;
pub mod types;

pub use executor::{JobExecutor, JobExecutorConfig, JobExecutorHandle, JobHandler};
pub use handlers::CirculationJobHandler;
pub use postgres::PostgresJobStore;
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    BackoffStrategy, DeadLetterEntry, Job, JobId, JobKind, JobResult, JobStatus, RetryPolicy,
};
