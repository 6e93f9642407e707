//! Health check data model and state machine.
//!
//! # Data Flow
//! ```text
//! HostGroup (config)
//!     → CheckTarget per (host, port, type)
//!     → CheckKey per resolved address (key.rs)
//!
//! Executor produces CheckResult (result.rs)
//!     → CheckState::ingest (state.rs)
//!         - retry fast path (retry_delay)
//!         - FlapState history, toggle counting
//!         - RTT smoothing, SLOW flag
//!     → next scheduled time
//!
//! Group aggregation (group.rs):
//!     fraction of member keys UP  vs  group_threshold
//! ```
//!
//! # Design Decisions
//! - A CheckKey is addressed by value; nothing holds a pointer into another subsystem
//! - Retries confirm a transition, they never add extra history entries
//! - FLAPPING backs off to a multiple of the TTL until toggles stop

pub mod group;
pub mod key;
pub mod params;
pub mod result;
pub mod state;

pub use group::{GroupHealth, HostGroup, MemberHealth};
pub use key::{CheckKey, CheckTarget, CheckType, DualStack};
pub use params::{CheckParams, Measurement, ParamOverrides};
pub use result::{AuxData, CheckResult, Reason, ResultRecord, Response};
pub use state::{CheckState, FlapState, Health, Ingest, Phase};
