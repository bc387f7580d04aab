//! AES-256-GCM sealing for the domain-settings payload.
//!
//! Unlike the KGK block, the settings payload is authenticated. Since its
//! key comes from the KGK, a failed `open` right after unlocking is the
//! only (indirect) hint that the master password was wrong.
//!
//! Layout: `[ 12-byte nonce | ciphertext + 16-byte tag ]`

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};

use crate::errors::{Result, SesamError};

const NONCE_LEN: usize = 12;

/// Seal `plaintext` under a 32-byte key with a fresh random nonce.
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| SesamError::EncryptionFailed(format!("invalid key length: {e}")))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| SesamError::EncryptionFailed(format!("encryption error: {e}")))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a payload produced by `seal`.
///
/// Any authentication failure maps to `DecryptionMismatch`.
pub fn open(key: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(SesamError::DecryptionMismatch);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| SesamError::DecryptionMismatch)?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| SesamError::DecryptionMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_and_open() {
        let key = [3u8; 32];
        let sealed = seal(&key, b"[]").unwrap();
        assert_eq!(open(&key, &sealed).unwrap(), b"[]");
    }

    #[test]
    fn wrong_key_is_a_mismatch() {
        let sealed = seal(&[3u8; 32], b"payload").unwrap();
        assert!(matches!(
            open(&[4u8; 32], &sealed),
            Err(SesamError::DecryptionMismatch)
        ));
    }

    #[test]
    fn truncated_payload_is_a_mismatch() {
        assert!(matches!(
            open(&[3u8; 32], &[0u8; 4]),
            Err(SesamError::DecryptionMismatch)
        ));
    }
}
