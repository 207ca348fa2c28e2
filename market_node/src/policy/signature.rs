//! Wallet signature recovery for Ethereum `personal_sign` messages.

use ethereum_types::Address;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};

const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";
const SIGNATURE_LEN: usize = 65;

pub type Result<T> = std::result::Result<T, SignatureError>;

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("Signature is not valid hex")]
    Encoding,

    #[error("Signature must be 65 bytes, got {0}")]
    Length(usize),

    #[error("Invalid recovery id {0}")]
    RecoveryId(u8),

    #[error("Malformed signature: {0}")]
    Malformed(String),

    #[error("Invalid wallet address: {0}")]
    Address(String),
}

/// Recovers the wallet that produced a signature over a message
pub trait SignatureVerifier: Send + Sync {
    fn recover_address(&self, message: &str, signature: &str) -> Result<Address>;
}

/// `personal_sign` as implemented by wallets such as MetaMask
#[derive(Debug, Clone, Copy, Default)]
pub struct PersonalSignVerifier;

impl SignatureVerifier for PersonalSignVerifier {
    fn recover_address(&self, message: &str, signature: &str) -> Result<Address> {
        recover_personal_signer(message, signature)
    }
}

/// keccak256("\x19Ethereum Signed Message:\n" + len + message)
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(PERSONAL_MESSAGE_PREFIX.as_bytes());
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// Recover the signer of a 65-byte `r || s || v` hex signature
pub fn recover_personal_signer(message: &str, signature: &str) -> Result<Address> {
    let raw = hex::decode(strip_0x(signature.trim())).map_err(|_| SignatureError::Encoding)?;
    if raw.len() != SIGNATURE_LEN {
        return Err(SignatureError::Length(raw.len()));
    }

    let v = match raw[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        other => return Err(SignatureError::RecoveryId(other)),
    };
    let mut recovery_id = RecoveryId::from_byte(v).ok_or(SignatureError::RecoveryId(v))?;

    let mut sig = Signature::from_slice(&raw[..64]).map_err(|e| SignatureError::Malformed(e.to_string()))?;
    // High-S form flips the y parity of R
    if let Some(normalized) = sig.normalize_s() {
        sig = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }

    let prehash = personal_message_hash(message.as_bytes());
    let verifying_key = VerifyingKey::recover_from_prehash(&prehash, &sig, recovery_id)
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;

    Ok(address_from_key(&verifying_key))
}

/// Last 20 bytes of keccak256 over the uncompressed public key
pub fn address_from_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Parse a `0x`-prefixed 20-byte hex address. Checksum casing is accepted
/// but not enforced.
pub fn parse_address(value: &str) -> Result<Address> {
    let trimmed = value.trim();
    let bytes = hex::decode(strip_0x(trimmed)).map_err(|_| SignatureError::Address(trimmed.to_string()))?;
    if bytes.len() != Address::len_bytes() {
        return Err(SignatureError::Address(trimmed.to_string()));
    }
    Ok(Address::from_slice(&bytes))
}

/// Produce a `personal_sign` signature (`v` as 27/28), as a wallet would
pub fn sign_personal_message(key: &SigningKey, message: &str) -> Result<String> {
    let prehash = personal_message_hash(message.as_bytes());
    let (sig, recovery_id) = key
        .sign_prehash_recoverable(&prehash)
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;

    let mut raw = sig.to_bytes().to_vec();
    raw.push(27 + recovery_id.to_byte());
    Ok(format!("0x{}", hex::encode(raw)))
}

fn strip_0x(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}
