//! Health-checking daemon library.

pub mod admin;
pub mod check;
pub mod config;
pub mod daemon;
pub mod dns;
pub mod executor;
pub mod index;
pub mod lifecycle;
pub mod observability;
pub mod pool;
pub mod queue;
pub mod storage;

pub use config::schema::DaemonConfig;
pub use daemon::{Daemon, DaemonError};
pub use lifecycle::Shutdown;
