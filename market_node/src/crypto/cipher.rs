use super::{CipherError, EncryptionKey, Iv, Result, BLOCK_SIZE, KEY_SIZE};
use cbc::cipher::{
    block_padding::Pkcs7, generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use rand::{rngs::OsRng, RngCore};
use std::path::Path;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Generate a random 256-bit AES key from the OS random source
pub fn generate_key() -> EncryptionKey {
    let mut bytes = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut bytes);
    EncryptionKey::from_bytes(bytes)
}

/// Generate a fresh random IV
pub fn generate_iv() -> Iv {
    let mut bytes = [0u8; BLOCK_SIZE];
    OsRng.fill_bytes(&mut bytes);
    Iv::from_bytes(bytes)
}

/// Encrypt data using AES-256-CBC under a freshly generated IV.
///
/// Returns the ciphertext together with the IV that must be stored next to
/// the key to decrypt it.
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> (Vec<u8>, Iv) {
    let iv = generate_iv();
    let ciphertext = Aes256CbcEnc::new(
        GenericArray::from_slice(key.as_bytes()),
        GenericArray::from_slice(iv.as_bytes()),
    )
    .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    (ciphertext, iv)
}

/// Decrypt AES-256-CBC data.
///
/// A wrong key or corrupted ciphertext almost always shows up as malformed
/// padding and is reported as [`CipherError::Padding`].
pub fn decrypt(ciphertext: &[u8], key: &EncryptionKey, iv: &Iv) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CipherError::InvalidCiphertextLength(ciphertext.len()));
    }

    Aes256CbcDec::new(
        GenericArray::from_slice(key.as_bytes()),
        GenericArray::from_slice(iv.as_bytes()),
    )
    .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
    .map_err(|_| CipherError::Padding)
}

/// Encrypt a file from disk
pub fn encrypt_file(path: impl AsRef<Path>, key: &EncryptionKey) -> Result<(Vec<u8>, Iv)> {
    let data = std::fs::read(path)?;
    Ok(encrypt(&data, key))
}

/// Decrypt data and write the plaintext to `output_path`
pub fn decrypt_to_file(
    ciphertext: &[u8],
    key: &EncryptionKey,
    iv: &Iv,
    output_path: impl AsRef<Path>,
) -> Result<()> {
    let plaintext = decrypt(ciphertext, key, iv)?;
    std::fs::write(output_path, plaintext)?;
    Ok(())
}
