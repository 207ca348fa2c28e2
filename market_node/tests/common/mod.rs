#![allow(dead_code)]

use async_trait::async_trait;
use ethereum_types::Address;
use k256::ecdsa::SigningKey;
use market_node::ledger::{self, Ledger, LedgerError, MarketItem};
use market_node::policy::{address_from_key, sign_personal_message, KeyRequest};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Ledger stub that records how often it was asked
#[derive(Default)]
pub struct CountingLedger {
    owners: RwLock<HashMap<u64, Address>>,
    hashes: RwLock<HashMap<u64, String>>,
    offline: RwLock<bool>,
    ownership_calls: AtomicUsize,
    hash_calls: AtomicUsize,
}

impl CountingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self, item_id: u64, owner: Address, data_hash: &str) {
        self.owners.write().insert(item_id, owner);
        self.hashes.write().insert(item_id, data_hash.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.write() = offline;
    }

    pub fn ownership_calls(&self) -> usize {
        self.ownership_calls.load(Ordering::SeqCst)
    }

    pub fn hash_calls(&self) -> usize {
        self.hash_calls.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> ledger::Result<()> {
        if *self.offline.read() {
            return Err(LedgerError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for CountingLedger {
    async fn verify_ownership(&self, item_id: u64, wallet: &Address) -> ledger::Result<bool> {
        self.ownership_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        Ok(self.owners.read().get(&item_id) == Some(wallet))
    }

    async fn get_item_hash(&self, item_id: u64) -> ledger::Result<String> {
        self.hash_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.hashes
            .read()
            .get(&item_id)
            .cloned()
            .ok_or(LedgerError::ItemNotFound(item_id))
    }

    async fn market_item(&self, item_id: u64) -> ledger::Result<MarketItem> {
        self.check_online()?;
        let owner = *self
            .owners
            .read()
            .get(&item_id)
            .ok_or(LedgerError::ItemNotFound(item_id))?;
        let data_hash = self.hashes.read().get(&item_id).cloned().unwrap_or_default();
        Ok(MarketItem {
            item_id,
            nft_contract: Address::repeat_byte(0x11),
            token_id: item_id.to_string(),
            seller: Address::repeat_byte(0x22),
            owner,
            price: "1000000000000000000".to_string(),
            data_hash,
            license_type: 1,
            encrypted_data_url: format!("ipfs://QmEncrypted{}", item_id),
        })
    }

    async fn is_connected(&self) -> bool {
        !*self.offline.read()
    }
}

/// A wallet as a buyer's browser extension would hold it
pub struct Wallet {
    pub key: SigningKey,
    pub address: Address,
}

impl Wallet {
    pub fn random() -> Self {
        let key = SigningKey::random(&mut OsRng);
        let address = address_from_key(key.verifying_key());
        Self { key, address }
    }

    pub fn address_hex(&self) -> String {
        format!("{:?}", self.address)
    }

    pub fn request_key(&self, item_id: u64) -> KeyRequest {
        let message = format!("Requesting decryption key for item {} at {}", item_id, self.address_hex());
        KeyRequest {
            item_id,
            wallet_address: self.address_hex(),
            signature: sign_personal_message(&self.key, &message).expect("signing never fails for a valid key"),
            message,
        }
    }
}
