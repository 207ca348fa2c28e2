use super::{
    parse_address, AccessError, EncryptedContent, IntegrityReport, KeyRequest, PersonalSignVerifier, ReleasedKey,
    Result, SignatureVerifier,
};
use crate::crypto;
use crate::ledger::{Ledger, LedgerError, MarketItem};
use crate::storage::{validate_content_id, KeyStore, NewKeyRecord};
use log::{debug, info, warn};
use std::sync::Arc;

/// Seller-side encryption and buyer-side key release over one key store and
/// one ledger.
///
/// Holds no locks of its own; every call is independent.
pub struct KeyReleaseService {
    store: Arc<dyn KeyStore>,
    ledger: Arc<dyn Ledger>,
    verifier: Arc<dyn SignatureVerifier>,
}

impl KeyReleaseService {
    pub fn new(store: Arc<dyn KeyStore>, ledger: Arc<dyn Ledger>) -> Self {
        Self::with_verifier(store, ledger, Arc::new(PersonalSignVerifier))
    }

    pub fn with_verifier(
        store: Arc<dyn KeyStore>,
        ledger: Arc<dyn Ledger>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        Self {
            store,
            ledger,
            verifier,
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Hash and encrypt seller content under a fresh key and persist the key
    /// record. The listing does not exist yet, so the record has no item id.
    pub async fn encrypt_content(
        &self,
        plaintext: &[u8],
        content_id: &str,
        filename: Option<&str>,
    ) -> Result<EncryptedContent> {
        validate_content_id(content_id)?;

        let data_hash = crypto::hash(plaintext);
        let key = crypto::generate_key();
        let (ciphertext, iv) = crypto::encrypt(plaintext, &key);

        let mut record = NewKeyRecord::new(content_id, key, iv.clone(), data_hash.clone());
        if let Some(filename) = filename {
            record = record.with_metadata("filename", filename);
        }
        self.store.put(record).await?;

        info!(
            "Encrypted {} bytes for content {} (hash {})",
            plaintext.len(),
            content_id,
            data_hash
        );
        Ok(EncryptedContent {
            content_id: content_id.to_string(),
            ciphertext,
            iv,
            data_hash,
        })
    }

    /// Attach the marketplace item id once the listing is on-chain
    pub async fn bind_listing(&self, content_id: &str, item_id: u64) -> Result<()> {
        self.store.set_item_id(content_id, item_id).await?;
        Ok(())
    }

    /// Release key material to the current owner of `request.item_id`.
    ///
    /// Signature first, then ownership, then the store. A failed step ends
    /// the request; the ledger is never consulted for an unsigned request and
    /// the store never for an unverified owner.
    pub async fn release_key(&self, request: &KeyRequest) -> Result<ReleasedKey> {
        let item_id = request.item_id;

        let wallet = match parse_address(&request.wallet_address) {
            Ok(wallet) => wallet,
            Err(e) => {
                warn!("Key request for item {} denied: {}", item_id, e);
                return Err(AccessError::InvalidSignature);
            }
        };

        match self.verifier.recover_address(&request.message, &request.signature) {
            Ok(signer) if signer == wallet => {
                debug!("Signature for item {} recovered to {:?}", item_id, wallet);
            }
            Ok(signer) => {
                warn!(
                    "Key request for item {} denied: signed by {:?}, claimed {:?}",
                    item_id, signer, wallet
                );
                return Err(AccessError::InvalidSignature);
            }
            Err(e) => {
                warn!("Key request for item {} denied: {}", item_id, e);
                return Err(AccessError::InvalidSignature);
            }
        }

        if !self.ledger.verify_ownership(item_id, &wallet).await? {
            warn!("Key request for item {} denied: {:?} is not the owner", item_id, wallet);
            return Err(AccessError::NotOwner);
        }

        let record = match self.store.find_by_item_id(item_id).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                warn!("Owner {:?} verified for item {} but no key is bound", wallet, item_id);
                return Err(AccessError::KeyUnavailable { item_id });
            }
            Err(e) => return Err(AccessError::Storage(e)),
        };

        info!(
            "Released key for item {} (content {}) to {:?}",
            item_id, record.content_id, wallet
        );
        let material = record.material();
        Ok(ReleasedKey {
            content_id: record.content_id,
            key: material.key,
            iv: material.iv,
            data_hash: material.data_hash,
        })
    }

    /// Listing details straight from the ledger
    pub async fn item_info(&self, item_id: u64) -> Result<MarketItem> {
        Ok(self.ledger.market_item(item_id).await?)
    }

    /// Compare a claimed content hash with the one recorded on the ledger.
    /// Unknown items are reported as not valid rather than as an error.
    pub async fn verify_integrity(&self, item_id: u64, claimed_hash: &str) -> Result<IntegrityReport> {
        let stored_hash = match self.ledger.get_item_hash(item_id).await {
            Ok(hash) => hash,
            Err(LedgerError::ItemNotFound(_)) => {
                return Ok(IntegrityReport {
                    valid: false,
                    stored_hash: None,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let valid = crypto::hashes_match(claimed_hash, &stored_hash);
        if !valid {
            warn!("Integrity mismatch for item {}", item_id);
        }
        Ok(IntegrityReport {
            valid,
            stored_hash: Some(stored_hash),
        })
    }
}
