//! `orderpush-core`: domain building blocks for the notification worker.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod clock;
pub mod error;
pub mod id;
pub mod order;
pub mod outcome;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::DomainError;
pub use id::{DeviceToken, OrderId, TenantName};
pub use order::{OrderType, PendingOrder};
pub use outcome::{DispatchOutcome, ErrorClass};
