//! Result storage.
//!
//! # Responsibilities
//! - Receive terminal check results and aux data from the engine
//! - Serve prior results on startup (warm start)
//! - Persist without corrupting the previous snapshot on exit
//!
//! # Design Decisions
//! - Synchronous trait; implementations only touch memory on the hot path
//! - The file store writes a temp file and renames it into place

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::check::{AuxData, CheckKey, ResultRecord};
use crate::config::{StorageConfig, StorageKind};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Destination for check results.
pub trait ResultStore: Send + Sync + 'static {
    fn update_check_result(&self, key: &CheckKey, record: &ResultRecord) -> Result<(), StoreError>;

    fn update_aux_info(&self, key: &CheckKey, aux: &AuxData) -> Result<(), StoreError>;

    /// Forget a key that is no longer configured.
    fn remove(&self, key: &CheckKey) -> Result<(), StoreError>;

    /// Every stored result, used on startup.
    fn load_results(&self) -> Result<Vec<(CheckKey, ResultRecord)>, StoreError>;

    fn flush(&self) -> Result<(), StoreError>;
}

/// Build the store selected by `[storage]`.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn ResultStore>, StoreError> {
    match config.kind {
        StorageKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageKind::File => Ok(Arc::new(FileStore::open(&config.path)?)),
    }
}
