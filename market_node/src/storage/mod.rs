use crate::crypto::{EncryptionKey, Iv};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

// Storage-specific Result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Opaque key/value bag carried alongside a record (e.g. original filename)
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Key record not found: {0}")]
    NotFound(String),

    #[error("No key record bound to item {0}")]
    ItemNotFound(u64),

    #[error("Item {item_id} is already bound to content {existing}")]
    DuplicateItem { item_id: u64, existing: String },

    #[error("Invalid content id: {0}")]
    InvalidContentId(String),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt key record {content_id}: {reason}")]
    Corrupt { content_id: String, reason: String },

    #[error("Storage task failed: {0}")]
    Task(String),
}

impl StorageError {
    /// Absence of a record, as opposed to a failure of the storage layer
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_) | StorageError::ItemNotFound(_))
    }
}

/// Key material and metadata for one piece of encrypted content.
///
/// `key` and `iv` never change after the record is created; `item_id`,
/// `updated_at` and `metadata` are the only fields a store mutates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    #[serde(alias = "cid")]
    pub content_id: String,
    pub key: EncryptionKey,
    pub iv: Iv,
    pub data_hash: String,
    pub item_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl KeyRecord {
    pub fn material(&self) -> KeyMaterial {
        KeyMaterial {
            key: self.key.clone(),
            iv: self.iv.clone(),
            data_hash: self.data_hash.clone(),
        }
    }

    pub fn summary(&self) -> KeyRecordSummary {
        KeyRecordSummary {
            content_id: self.content_id.clone(),
            data_hash: self.data_hash.clone(),
            item_id: self.item_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            metadata: self.metadata.clone(),
        }
    }
}

/// What a buyer needs to decrypt the content
#[derive(Debug, Clone, PartialEq)]
pub struct KeyMaterial {
    pub key: EncryptionKey,
    pub iv: Iv,
    pub data_hash: String,
}

/// Record view without key material, safe to hand to operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecordSummary {
    pub content_id: String,
    pub data_hash: String,
    pub item_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub metadata: Metadata,
}

/// Input to [`KeyStore::put`]
#[derive(Debug, Clone)]
pub struct NewKeyRecord {
    pub content_id: String,
    pub key: EncryptionKey,
    pub iv: Iv,
    pub data_hash: String,
    pub item_id: Option<u64>,
    pub metadata: Metadata,
}

impl NewKeyRecord {
    pub fn new(content_id: impl Into<String>, key: EncryptionKey, iv: Iv, data_hash: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            key,
            iv,
            data_hash: data_hash.into(),
            item_id: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_item_id(mut self, item_id: u64) -> Self {
        self.item_id = Some(item_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub(crate) fn into_record(self, now: DateTime<Utc>) -> KeyRecord {
        KeyRecord {
            content_id: self.content_id,
            key: self.key,
            iv: self.iv,
            data_hash: self.data_hash,
            item_id: self.item_id,
            created_at: now,
            updated_at: None,
            metadata: self.metadata,
        }
    }
}

/// Reject identifiers no backend can address
pub fn validate_content_id(content_id: &str) -> Result<()> {
    if content_id.is_empty() {
        return Err(StorageError::InvalidContentId("content id is empty".to_string()));
    }
    if content_id.chars().any(char::is_control) {
        return Err(StorageError::InvalidContentId(
            "content id contains control characters".to_string(),
        ));
    }
    Ok(())
}

/// Durable mapping from content id to key material.
///
/// Every implementation keeps an item id index next to the records, so
/// `find_by_item_id` never scans.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Create or fully replace the record for `record.content_id`
    async fn put(&self, record: NewKeyRecord) -> Result<KeyRecord>;

    async fn get_full(&self, content_id: &str) -> Result<KeyRecord>;

    /// Bind the marketplace item id once the listing exists. Never creates a
    /// record.
    async fn set_item_id(&self, content_id: &str, item_id: u64) -> Result<KeyRecord>;

    /// Returns false when there was nothing to delete
    async fn delete(&self, content_id: &str) -> Result<bool>;

    async fn exists(&self, content_id: &str) -> Result<bool>;

    async fn list_ids(&self) -> Result<Vec<String>>;

    async fn find_by_item_id(&self, item_id: u64) -> Result<KeyRecord>;

    /// Short backend label for logs and health output
    fn backend_name(&self) -> &'static str;

    async fn get(&self, content_id: &str) -> Result<KeyMaterial> {
        Ok(self.get_full(content_id).await?.material())
    }
}

/// Secondary index item id <-> content id.
///
/// Bindings are claimed before the record write and committed after it, so a
/// reader following the index to a record that has not been rewritten yet
/// sees the old `item_id` and reports not found.
#[derive(Debug, Default)]
pub(crate) struct ItemIndex {
    by_item: HashMap<u64, String>,
    by_content: HashMap<String, u64>,
}

impl ItemIndex {
    pub(crate) fn lookup(&self, item_id: u64) -> Option<String> {
        self.by_item.get(&item_id).cloned()
    }

    /// Reserve `item_id` for `content_id`. Returns true when the reservation
    /// is new and must be abandoned if the write fails.
    pub(crate) fn claim(&mut self, item_id: u64, content_id: &str) -> Result<bool> {
        match self.by_item.get(&item_id) {
            Some(existing) if existing != content_id => Err(StorageError::DuplicateItem {
                item_id,
                existing: existing.clone(),
            }),
            Some(_) => Ok(false),
            None => {
                self.by_item.insert(item_id, content_id.to_string());
                Ok(true)
            }
        }
    }

    pub(crate) fn abandon(&mut self, item_id: u64, content_id: &str) {
        let committed = self.by_content.get(content_id) == Some(&item_id);
        if !committed && self.by_item.get(&item_id).map(String::as_str) == Some(content_id) {
            self.by_item.remove(&item_id);
        }
    }

    pub(crate) fn commit(&mut self, content_id: &str, item_id: Option<u64>) {
        let previous = match item_id {
            Some(item_id) => self.by_content.insert(content_id.to_string(), item_id),
            None => self.by_content.remove(content_id),
        };
        if let Some(previous) = previous {
            if Some(previous) != item_id
                && self.by_item.get(&previous).map(String::as_str) == Some(content_id)
            {
                self.by_item.remove(&previous);
            }
        }
        if let Some(item_id) = item_id {
            self.by_item.insert(item_id, content_id.to_string());
        }
    }

    pub(crate) fn remove(&mut self, content_id: &str) {
        self.commit(content_id, None);
    }

    pub(crate) fn len(&self) -> usize {
        self.by_item.len()
    }
}

pub mod file_store;
pub mod memory;

pub use file_store::*;
pub use memory::*;
