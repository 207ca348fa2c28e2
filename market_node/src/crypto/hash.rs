use super::{CipherError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Read size used for streaming hashes
pub const HASH_CHUNK_SIZE: usize = 4096;

/// SHA-256 of `data`, lowercase hex
pub fn hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Incremental SHA-256 for content that arrives in pieces.
///
/// Feeding the same bytes in any split produces the same digest as [`hash`].
#[derive(Clone, Default)]
pub struct ContentHasher {
    inner: Sha256,
    bytes: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Number of bytes hashed so far
    pub fn len(&self) -> u64 {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    pub fn finalize(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

/// Hash everything `reader` yields, reading [`HASH_CHUNK_SIZE`] bytes at a time
pub fn hash_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = ContentHasher::new();
    let mut buf = [0u8; HASH_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Compute the SHA-256 hash of a file without loading it whole
pub fn hash_file(path: impl AsRef<Path>) -> Result<String> {
    let file = std::fs::File::open(path)?;
    Ok(hash_reader(file)?)
}

/// Convert a 64-character hex hash into the bytes32 form stored on-chain
pub fn hash_to_bytes32(hash_hex: &str) -> Result<[u8; 32]> {
    let trimmed = hash_hex.trim().trim_start_matches("0x");
    let bytes = hex::decode(trimmed).map_err(|e| CipherError::Encoding(format!("hash is not hex: {}", e)))?;
    bytes.as_slice().try_into().map_err(|_| CipherError::InvalidLength {
        expected: 32,
        actual: bytes.len(),
    })
}

/// Convert an on-chain bytes32 value back into a hex hash string
pub fn bytes32_to_hash(data: &[u8; 32]) -> String {
    hex::encode(data)
}

/// Canonical form used to compare hashes from different sources: no `0x`
/// prefix, lowercase, and no leading zero padding from fixed-width encodings.
pub fn normalize_hash(value: &str) -> String {
    let value = value.trim();
    let value = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    value.trim_start_matches('0').to_ascii_lowercase()
}

/// Compare two hex hashes after [`normalize_hash`]. An empty or all-zero
/// value never matches anything.
pub fn hashes_match(a: &str, b: &str) -> bool {
    let (a, b) = (normalize_hash(a), normalize_hash(b));
    !a.is_empty() && a == b
}
