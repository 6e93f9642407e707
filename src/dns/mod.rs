//! DNS resolution.
//!
//! # Data Flow
//! ```text
//! Host group hostnames → DnsCache::register
//!     → schedule_lookup → DNS_LOOKUP work item → WorkQueue
//!     → worker: start_lookup → Resolve::resolve → update_entry / record_failure
//!     → follow-up lookup at last_update + ttl
//!
//! Health check dispatch:
//!     addresses_for_dispatch(host) → (addresses, stale)
//!         stale → refresh queued first, last-known-good addresses still used
//! ```
//!
//! # Design Decisions
//! - Entries are updated in place; consumers only ever hold the hostname
//! - Static entries bypass resolution entirely

pub mod cache;
pub mod resolver;

pub use cache::{AddressDiff, AddressSet, DnsCache, DnsEntry, DnsEntryView, LookupFailure, QueryState};
pub use resolver::{Resolution, Resolve, ResolveError, SystemResolver};
