//! In-memory result store.

use crate::check::{AuxData, CheckKey, ResultRecord};
use crate::storage::{ResultStore, StoreError};
use dashmap::DashMap;
use std::sync::Arc;

/// A thread-safe store for the latest result and aux data of every key.
#[derive(Clone, Default)]
pub struct MemoryStore {
    results: Arc<DashMap<CheckKey, ResultRecord>>,
    aux: Arc<DashMap<CheckKey, AuxData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn result(&self, key: &CheckKey) -> Option<ResultRecord> {
        self.results.get(key).map(|r| r.value().clone())
    }

    pub fn aux_info(&self, key: &CheckKey) -> Option<AuxData> {
        self.aux.get(key).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub(crate) fn aux_entries(&self) -> Vec<(CheckKey, AuxData)> {
        self.aux
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    pub(crate) fn insert_aux(&self, key: CheckKey, aux: AuxData) {
        self.aux.insert(key, aux);
    }
}

impl ResultStore for MemoryStore {
    fn update_check_result(&self, key: &CheckKey, record: &ResultRecord) -> Result<(), StoreError> {
        self.results.insert(key.clone(), record.clone());
        Ok(())
    }

    fn update_aux_info(&self, key: &CheckKey, aux: &AuxData) -> Result<(), StoreError> {
        self.aux.insert(key.clone(), aux.clone());
        Ok(())
    }

    fn remove(&self, key: &CheckKey) -> Result<(), StoreError> {
        self.results.remove(key);
        self.aux.remove(key);
        Ok(())
    }

    fn load_results(&self) -> Result<Vec<(CheckKey, ResultRecord)>, StoreError> {
        let mut results: Vec<(CheckKey, ResultRecord)> = self
            .results
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
