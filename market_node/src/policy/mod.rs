//! Access control for encrypted marketplace content.
//!
//! Key release is gated on two proofs checked in a fixed order: the caller
//! signed the request with the wallet it names, and the ledger says that
//! wallet holds the item. Any failure denies.

use crate::crypto::{hashes_match, CipherError, EncryptionKey, Iv};
use crate::ledger::LedgerError;
use crate::storage::StorageError;
use serde::{Deserialize, Serialize};

pub mod key_release;
pub mod signature;

pub use key_release::*;
pub use signature::*;

pub type Result<T> = std::result::Result<T, AccessError>;

/// Denial messages are fixed strings; none of them reveal whether a key
/// exists for the item.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("Invalid signature. Could not verify wallet ownership.")]
    InvalidSignature,

    #[error("You do not own this item. Purchase required.")]
    NotOwner,

    #[error("Encryption key not found for this item.")]
    KeyUnavailable { item_id: u64 },

    #[error("No key record for content {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Integrity check failed: {0}")]
    Integrity(#[from] CipherError),

    #[error("Key storage failure: {0}")]
    Storage(StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<StorageError> for AccessError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(content_id) => AccessError::NotFound(content_id),
            StorageError::InvalidContentId(reason) => AccessError::InvalidInput(reason),
            other => AccessError::Storage(other),
        }
    }
}

/// A buyer's request for the key of a purchased item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRequest {
    pub item_id: u64,
    pub wallet_address: String,
    pub signature: String,
    pub message: String,
}

/// Key material handed to a verified owner
#[derive(Debug, Clone, PartialEq)]
pub struct ReleasedKey {
    pub content_id: String,
    pub key: EncryptionKey,
    pub iv: Iv,
    pub data_hash: String,
}

impl ReleasedKey {
    /// Decrypt the downloaded ciphertext and check it against the hash the
    /// seller recorded
    pub fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let plaintext = crate::crypto::decrypt(ciphertext, &self.key, &self.iv)?;
        if !hashes_match(&crate::crypto::hash(&plaintext), &self.data_hash) {
            return Err(AccessError::Integrity(CipherError::HashMismatch));
        }
        Ok(plaintext)
    }
}

/// Output of encrypting seller content
#[derive(Debug, Clone)]
pub struct EncryptedContent {
    pub content_id: String,
    pub ciphertext: Vec<u8>,
    pub iv: Iv,
    pub data_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub valid: bool,
    pub stored_hash: Option<String>,
}
