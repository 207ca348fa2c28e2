//! Key custody node for an NFT-gated data marketplace.
//!
//! Seller uploads are encrypted with a fresh AES-256 key whose material is
//! kept in a durable key store. Buyers get the key back only after proving
//! control of a wallet and the ledger confirming that wallet owns the item.

pub mod api;
pub mod config;
pub mod crypto;
pub mod ledger;
pub mod policy;
pub mod storage;

pub use config::NodeConfig;
pub use policy::{AccessError, KeyReleaseService};
