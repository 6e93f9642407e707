//! Work queue.
//!
//! # Responsibilities
//! - Hold pending work ordered by scheduled time (FIFO on ties)
//! - Hand each ready item to exactly one worker
//! - Keep at most one item per key queued or in flight
//! - Expose depth, readiness and lateness as load signals for the pool monitor
//!
//! # Design Decisions
//! - One mutex around an ordered map plus a key index and an in-flight set;
//!   the critical sections never await
//! - Workers park on a `Notify` until the earliest deadline or an explicit wake
//! - A follow-up item is queued in the same critical section that releases
//!   the in-flight key, so the key is never briefly absent

pub mod item;
pub mod work_queue;

pub use item::{WorkItem, WorkKey, WorkKind};
pub use work_queue::{Insert, Next, WorkQueue};
