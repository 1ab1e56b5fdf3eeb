//! Background notification worker.
//!
//! ```text
//! loop:
//!   TokenCache::get_token ─┐ failure: back off, skip the cycle
//!   TenantDirectory ───────┤ failure: skip the cycle; empty: long sleep
//!   for each tenant:       │
//!     claim → dispatch → mark → commit (rollback on error, tenant isolated)
//!   Governor ──────────────┘ memory / cycle ceiling: exit for a fresh restart
//!   sleep (interruptible by shutdown)
//! ```

pub mod bootstrap;
pub mod error;
pub mod governor;
pub mod ledger;
pub mod stats;
pub mod worker;

pub use error::WorkerError;
pub use governor::{ExitReason, Governor};
pub use ledger::InvalidOrderLedger;
pub use stats::WorkerStats;
pub use worker::{CycleOutcome, NotificationWorker, WorkerHandle, WorkerSettings, WorkerState};
