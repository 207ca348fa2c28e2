use super::{validate_content_id, ItemIndex, KeyRecord, KeyStore, NewKeyRecord, Result, StorageError};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct State {
    records: HashMap<String, KeyRecord>,
    index: ItemIndex,
}

/// In-memory key store for tests and throwaway nodes. Nothing survives a
/// restart.
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    state: Arc<RwLock<State>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn put(&self, record: NewKeyRecord) -> Result<KeyRecord> {
        validate_content_id(&record.content_id)?;
        let record = record.into_record(Utc::now());

        let mut state = self.state.write();
        if let Some(item_id) = record.item_id {
            state.index.claim(item_id, &record.content_id)?;
        }
        state.index.commit(&record.content_id, record.item_id);
        state.records.insert(record.content_id.clone(), record.clone());

        debug!("Stored key record for content {} in memory", record.content_id);
        Ok(record)
    }

    async fn get_full(&self, content_id: &str) -> Result<KeyRecord> {
        self.state
            .read()
            .records
            .get(content_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(content_id.to_string()))
    }

    async fn set_item_id(&self, content_id: &str, item_id: u64) -> Result<KeyRecord> {
        let mut state = self.state.write();
        if !state.records.contains_key(content_id) {
            return Err(StorageError::NotFound(content_id.to_string()));
        }
        state.index.claim(item_id, content_id)?;
        state.index.commit(content_id, Some(item_id));

        let record = state
            .records
            .get_mut(content_id)
            .ok_or_else(|| StorageError::NotFound(content_id.to_string()))?;
        record.item_id = Some(item_id);
        record.updated_at = Some(Utc::now());
        Ok(record.clone())
    }

    async fn delete(&self, content_id: &str) -> Result<bool> {
        let mut state = self.state.write();
        let removed = state.records.remove(content_id).is_some();
        state.index.remove(content_id);
        Ok(removed)
    }

    async fn exists(&self, content_id: &str) -> Result<bool> {
        Ok(self.state.read().records.contains_key(content_id))
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.state.read().records.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn find_by_item_id(&self, item_id: u64) -> Result<KeyRecord> {
        let state = self.state.read();
        state
            .index
            .lookup(item_id)
            .and_then(|content_id| state.records.get(&content_id).cloned())
            .ok_or(StorageError::ItemNotFound(item_id))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
