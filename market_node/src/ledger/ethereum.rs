//! Ethereum ledger over JSON-RPC using ethers-rs.
//!
//! Reads the marketplace contract's `idToMarketItem` getter and the ERC-721
//! `ownerOf` of the listed token. Nothing here signs or submits transactions.

use super::{Ledger, LedgerError, MarketItem, Result};
use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::{transaction::eip2718::TypedTransaction, Address, Bytes, TransactionRequest, U256};
use ethers::utils::id;
use log::{debug, warn};
use std::convert::TryFrom;

const MARKET_ITEM_SIG: &str = "idToMarketItem(uint256)";
const OWNER_OF_SIG: &str = "ownerOf(uint256)";

/// One row of the marketplace contract's item mapping, as decoded
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRecord {
    pub item_id: U256,
    pub nft_contract: Address,
    pub token_id: U256,
    pub seller: Address,
    pub owner: Address,
    pub price: U256,
    pub data_hash: [u8; 32],
    pub license_type: u8,
    pub encrypted_data_url: String,
}

impl ListingRecord {
    fn output_types() -> [ParamType; 9] {
        [
            ParamType::Uint(256),
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::Address,
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::FixedBytes(32),
            ParamType::Uint(8),
            ParamType::String,
        ]
    }

    /// Decode the getter's return data
    pub fn from_abi(data: &[u8]) -> Result<Self> {
        let mut tokens = abi::decode(&Self::output_types(), data)
            .map_err(|e| LedgerError::InvalidResponse(format!("market item: {}", e)))?
            .into_iter();
        let mut next = || {
            tokens
                .next()
                .ok_or_else(|| LedgerError::InvalidResponse("market item: missing field".to_string()))
        };

        let item_id = as_uint(next()?)?;
        let nft_contract = as_address(next()?)?;
        let token_id = as_uint(next()?)?;
        let seller = as_address(next()?)?;
        let owner = as_address(next()?)?;
        let price = as_uint(next()?)?;
        let hash_bytes = next()?
            .into_fixed_bytes()
            .ok_or_else(|| LedgerError::InvalidResponse("dataHash is not bytes32".to_string()))?;
        let data_hash: [u8; 32] = hash_bytes
            .as_slice()
            .try_into()
            .map_err(|_| LedgerError::InvalidResponse("dataHash is not bytes32".to_string()))?;
        let license = as_uint(next()?)?;
        let license_type = u8::try_from(license)
            .map_err(|_| LedgerError::InvalidResponse(format!("licenseType {} out of range", license)))?;
        let encrypted_data_url = next()?
            .into_string()
            .ok_or_else(|| LedgerError::InvalidResponse("encryptedDataUrl is not a string".to_string()))?;

        Ok(Self {
            item_id,
            nft_contract,
            token_id,
            seller,
            owner,
            price,
            data_hash,
            license_type,
            encrypted_data_url,
        })
    }

    /// Solidity mappings return a zeroed struct for unknown keys
    pub fn exists(&self) -> bool {
        !self.item_id.is_zero()
    }

    pub fn to_market_item(&self) -> Result<MarketItem> {
        let item_id = u64::try_from(self.item_id)
            .map_err(|_| LedgerError::InvalidResponse(format!("itemId {} out of range", self.item_id)))?;
        Ok(MarketItem {
            item_id,
            nft_contract: to_address(self.nft_contract),
            token_id: self.token_id.to_string(),
            seller: to_address(self.seller),
            owner: to_address(self.owner),
            price: self.price.to_string(),
            data_hash: hex::encode(self.data_hash),
            license_type: self.license_type,
            encrypted_data_url: self.encrypted_data_url.clone(),
        })
    }
}

/// Ledger backed by an Ethereum-compatible JSON-RPC endpoint
pub struct EthereumLedger {
    provider: Provider<Http>,
    market_address: Address,
}

impl EthereumLedger {
    pub fn new(rpc_url: &str, market_address: &str) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| LedgerError::Config(format!("invalid RPC url {}: {}", rpc_url, e)))?;
        let market_address = market_address
            .trim()
            .parse::<Address>()
            .map_err(|e| LedgerError::Config(format!("invalid market address: {}", e)))?;

        Ok(Self {
            provider,
            market_address,
        })
    }

    pub fn market_address(&self) -> Address {
        self.market_address
    }

    /// Fetch the listing for `item_id`, failing with `ItemNotFound` for
    /// unknown items
    pub async fn listing(&self, item_id: u64) -> Result<ListingRecord> {
        let data = calldata(MARKET_ITEM_SIG, U256::from(item_id));
        let raw = self.call(self.market_address, data).await?;
        let item = ListingRecord::from_abi(&raw)?;
        if !item.exists() {
            return Err(LedgerError::ItemNotFound(item_id));
        }
        Ok(item)
    }

    /// Current ERC-721 holder of `token_id`. `None` when the token contract
    /// reverts, which is how burned or unminted tokens answer.
    pub async fn owner_of(&self, nft_contract: Address, token_id: U256) -> Result<Option<Address>> {
        let data = calldata(OWNER_OF_SIG, token_id);
        let raw = match self.call(nft_contract, data).await {
            Ok(raw) => raw,
            Err(CallError::Reverted(reason)) => {
                debug!("ownerOf({}) reverted: {}", token_id, reason);
                return Ok(None);
            }
            Err(CallError::Ledger(e)) => return Err(e),
        };
        let mut tokens = abi::decode(&[ParamType::Address], &raw)
            .map_err(|e| LedgerError::InvalidResponse(format!("ownerOf: {}", e)))?;
        match tokens.pop() {
            Some(token) => Ok(Some(as_address(token)?)),
            None => Err(LedgerError::InvalidResponse("ownerOf: empty result".to_string())),
        }
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> std::result::Result<Bytes, CallError> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.provider.call(&tx, None).await.map_err(CallError::from)
    }
}

#[async_trait]
impl Ledger for EthereumLedger {
    async fn verify_ownership(&self, item_id: u64, wallet: &ethereum_types::Address) -> Result<bool> {
        let item = match self.listing(item_id).await {
            Ok(item) => item,
            Err(LedgerError::ItemNotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        let owner = self.owner_of(item.nft_contract, item.token_id).await?;
        Ok(owner.map_or(false, |owner| owner.as_bytes() == wallet.as_bytes()))
    }

    async fn get_item_hash(&self, item_id: u64) -> Result<String> {
        let item = self.listing(item_id).await?;
        Ok(hex::encode(item.data_hash))
    }

    async fn market_item(&self, item_id: u64) -> Result<MarketItem> {
        self.listing(item_id).await?.to_market_item()
    }

    async fn is_connected(&self) -> bool {
        match self.provider.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Ledger health check failed: {}", e);
                false
            }
        }
    }
}

/// Contract calls distinguish an EVM revert from the node being unreachable
enum CallError {
    Reverted(String),
    Ledger(LedgerError),
}

impl From<ProviderError> for CallError {
    fn from(err: ProviderError) -> Self {
        match err.as_error_response() {
            Some(rpc) if rpc.message.contains("revert") => CallError::Reverted(rpc.message.clone()),
            _ => CallError::Ledger(LedgerError::Unavailable(err.to_string())),
        }
    }
}

impl From<CallError> for LedgerError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Reverted(reason) => LedgerError::InvalidResponse(format!("call reverted: {}", reason)),
            CallError::Ledger(e) => e,
        }
    }
}

fn calldata(signature: &str, arg: U256) -> Vec<u8> {
    let mut data = id(signature).to_vec();
    data.extend(abi::encode(&[Token::Uint(arg)]));
    data
}

fn as_uint(token: Token) -> Result<U256> {
    token
        .into_uint()
        .ok_or_else(|| LedgerError::InvalidResponse("expected uint".to_string()))
}

fn to_address(address: Address) -> ethereum_types::Address {
    ethereum_types::Address::from_slice(address.as_bytes())
}

fn as_address(token: Token) -> Result<Address> {
    token
        .into_address()
        .ok_or_else(|| LedgerError::InvalidResponse("expected address".to_string()))
}
