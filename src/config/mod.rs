//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → DaemonConfig (validated, immutable)
//!     → Daemon::apply_config (diff of check keys)
//!
//! On reload (file change or SIGHUP):
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of Arc<DaemonConfig>
//!     → index reconciled, queue items added / cancelled
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - A rejected reload leaves the running configuration untouched

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, DaemonConfig, DnsConfig, HostGroupConfig, ObservabilityConfig, SchedulerConfig, StaticHost,
    StorageConfig, StorageKind,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::{ConfigWatcher, WatchHandle};
