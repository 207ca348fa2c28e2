//! Cipher engine for marketplace content.
//!
//! Stateless primitives only: key and IV generation, AES-256-CBC with PKCS#7
//! padding, and SHA-256 content hashing. Nothing in this module touches
//! persistent state.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroize;

/// AES block size in bytes, also the IV length
pub const BLOCK_SIZE: usize = 16;
/// 256-bit key
pub const KEY_SIZE: usize = 32;

// Cipher-specific Result type
pub type Result<T> = std::result::Result<T, CipherError>;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("Invalid key material length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Ciphertext length {0} is not a positive multiple of the block size")]
    InvalidCiphertextLength(usize),

    /// Wrong key, wrong IV or corrupted ciphertext.
    #[error("Integrity check failed: malformed padding after decryption")]
    Padding,

    #[error("Integrity check failed: plaintext does not match the recorded hash")]
    HashMismatch,

    #[error("Invalid encoding: {0}")]
    Encoding(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CipherError {
    /// True for failures that mean the ciphertext did not authenticate
    /// against the key it was opened with.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            CipherError::Padding | CipherError::HashMismatch | CipherError::InvalidCiphertextLength(_)
        )
    }
}

/// Fixed-size secret byte strings. Zeroized on drop, redacted in `Debug`,
/// base64 on the wire and on disk.
macro_rules! key_material {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq)]
        pub struct $name([u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn from_slice(slice: &[u8]) -> Result<Self> {
                let bytes: [u8; $len] = slice.try_into().map_err(|_| CipherError::InvalidLength {
                    expected: $len,
                    actual: slice.len(),
                })?;
                Ok(Self(bytes))
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn to_base64(&self) -> String {
                BASE64_STANDARD.encode(self.0)
            }

            pub fn from_base64(encoded: &str) -> Result<Self> {
                // decode errors echo input bytes, keep them out of the message
                let mut decoded = BASE64_STANDARD
                    .decode(encoded.trim())
                    .map_err(|_| CipherError::Encoding(concat!("invalid base64 ", stringify!($name)).to_string()))?;
                let material = Self::from_slice(&decoded);
                decoded.zeroize();
                material
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                self.0.zeroize();
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "(<redacted>)"))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_base64())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let encoded = String::deserialize(deserializer)?;
                Self::from_base64(&encoded).map_err(serde::de::Error::custom)
            }
        }
    };
}

key_material!(
    /// Symmetric AES-256 key
    EncryptionKey,
    KEY_SIZE
);

key_material!(
    /// CBC initialization vector, unique per encryption
    Iv,
    BLOCK_SIZE
);

pub mod cipher;
pub mod hash;

pub use cipher::*;
pub use hash::*;
