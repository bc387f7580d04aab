//! AES-256-CBC without padding and without authentication.
//!
//! This is the at-rest cipher for the KGK block. It is deterministic for
//! a given key/IV pair and carries no integrity tag: decrypting with the
//! wrong key material yields well-formed garbage instead of an error.
//! Existing vaults depend on this exact behavior.
//!
//! Input must be a whole number of 16-byte blocks.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;

use super::keys::KeyMaterial;
use crate::errors::{Result, SesamError};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block size in bytes.
pub const BLOCK_LEN: usize = 16;

/// Symmetric cipher bound to one set of key material.
pub struct Crypter<'a> {
    material: &'a KeyMaterial,
}

impl<'a> Crypter<'a> {
    pub fn new(material: &'a KeyMaterial) -> Self {
        Self { material }
    }

    /// Encrypt a block-aligned plaintext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        check_aligned(plaintext.len()).map_err(SesamError::EncryptionFailed)?;

        let mut cipher = Aes256CbcEnc::new_from_slices(self.material.key(), self.material.iv())
            .map_err(|e| SesamError::EncryptionFailed(format!("invalid key length: {e}")))?;

        let mut buf = plaintext.to_vec();
        for chunk in buf.chunks_exact_mut(BLOCK_LEN) {
            cipher.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
        }
        Ok(buf)
    }

    /// Decrypt a block-aligned ciphertext.
    ///
    /// Never detects a wrong key; only malformed lengths are rejected.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        check_aligned(ciphertext.len()).map_err(SesamError::InvalidVaultFormat)?;

        let mut cipher = Aes256CbcDec::new_from_slices(self.material.key(), self.material.iv())
            .map_err(|e| SesamError::InvalidVaultFormat(format!("invalid key length: {e}")))?;

        let mut buf = ciphertext.to_vec();
        for chunk in buf.chunks_exact_mut(BLOCK_LEN) {
            cipher.decrypt_block_mut(GenericArray::from_mut_slice(chunk));
        }
        Ok(buf)
    }
}

fn check_aligned(len: usize) -> std::result::Result<(), String> {
    if len == 0 || len % BLOCK_LEN != 0 {
        return Err(format!(
            "length {len} is not a positive multiple of {BLOCK_LEN}"
        ));
    }
    Ok(())
}
