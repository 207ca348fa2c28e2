//! Ledger collaborator: the system of record for item ownership and the
//! content hash each listing committed to.

use async_trait::async_trait;
use ethereum_types::Address;
use serde::{Deserialize, Serialize};

// Ledger-specific Result type
pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed ledger response: {0}")]
    InvalidResponse(String),

    #[error("Marketplace item {0} does not exist")]
    ItemNotFound(u64),

    #[error("Invalid ledger configuration: {0}")]
    Config(String),
}

impl LedgerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::ItemNotFound(_))
    }
}

/// A marketplace listing as the contract reports it. uint256 amounts are
/// decimal strings; `data_hash` is lowercase hex without prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketItem {
    pub item_id: u64,
    pub nft_contract: Address,
    pub token_id: String,
    pub seller: Address,
    pub owner: Address,
    pub price: String,
    pub data_hash: String,
    pub license_type: u8,
    pub encrypted_data_url: String,
}

/// Read-only view of the marketplace ledger
#[async_trait]
pub trait Ledger: Send + Sync {
    /// True only when `wallet` currently holds the token behind `item_id`.
    /// Unknown items are not owned by anyone.
    async fn verify_ownership(&self, item_id: u64, wallet: &Address) -> Result<bool>;

    /// Content hash recorded when the item was listed, lowercase hex
    async fn get_item_hash(&self, item_id: u64) -> Result<String>;

    /// Full listing, `ItemNotFound` for ids the marketplace never issued
    async fn market_item(&self, item_id: u64) -> Result<MarketItem>;

    async fn is_connected(&self) -> bool;
}

pub mod ethereum;

pub use ethereum::*;
