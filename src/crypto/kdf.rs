//! Password-based key derivation using PBKDF2-HMAC.
//!
//! One stretching call produces enough output for both halves of the
//! vault cipher input: the first 32 bytes become the AES-256 key and the
//! following 16 bytes the CBC initialization vector.
//!
//! This is deliberately expensive (tens of thousands of iterations) and
//! must never run on the interactive path; see `crate::worker`.

use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::TryRngCore;
use sha2::{Sha384, Sha512};

use super::keys::KeyMaterial;
use crate::errors::{Result, SesamError};

/// Length of the vault salt in bytes (256 bits).
pub const SALT_LEN: usize = 32;

/// Length of the AES-256 key sliced from the stretched output.
pub const KEY_LEN: usize = 32;

/// Length of the CBC IV sliced from the stretched output.
pub const IV_LEN: usize = 16;

/// Default iteration count for vault key material.
pub const DEFAULT_KDF_ITERATIONS: u32 = 32_768;

/// Derive key + IV from a master password and the vault salt.
///
/// Pure function: the same password, salt and iteration count always
/// produce the same key material.
pub fn derive_key_material(password: &[u8], salt: &[u8], iterations: u32) -> Result<KeyMaterial> {
    if iterations == 0 {
        return Err(SesamError::KeyDerivationFailed(
            "iteration count must be at least 1".into(),
        ));
    }
    if salt.is_empty() {
        return Err(SesamError::KeyDerivationFailed("salt must not be empty".into()));
    }

    let mut out = [0u8; KEY_LEN + IV_LEN];
    pbkdf2_hmac::<Sha384>(password, salt, iterations, &mut out);

    let material = KeyMaterial::from_stretched(&out, salt);
    zeroize::Zeroize::zeroize(&mut out);
    Ok(material)
}

/// Stretch arbitrary input into a 64-byte digest with PBKDF2-HMAC-SHA512.
///
/// Used by the password engine; the digest is later read as one big
/// unsigned integer.
pub fn stretch(input: &[u8], salt: &[u8], iterations: u32) -> Result<[u8; 64]> {
    if iterations == 0 {
        return Err(SesamError::KeyDerivationFailed(
            "iteration count must be at least 1".into(),
        ));
    }
    let mut out = [0u8; 64];
    pbkdf2_hmac::<Sha512>(input, salt, iterations, &mut out);
    Ok(out)
}

/// Generate a cryptographically random 32-byte salt.
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|e| SesamError::RandomUnavailable(e.to_string()))?;
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_same_material() {
        let a = derive_key_material(b"secret", b"salt-salt", 16).unwrap();
        let b = derive_key_material(b"secret", b"salt-salt", 16).unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.iv(), b.iv());
    }

    #[test]
    fn different_salt_changes_material() {
        let a = derive_key_material(b"secret", b"salt-one", 16).unwrap();
        let b = derive_key_material(b"secret", b"salt-two", 16).unwrap();
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn key_and_iv_are_slices_of_one_stretch() {
        let material = derive_key_material(b"pw", b"pepper", 8).unwrap();
        let mut full = [0u8; KEY_LEN + IV_LEN];
        pbkdf2_hmac::<Sha384>(b"pw", b"pepper", 8, &mut full);
        assert_eq!(material.key(), &full[..KEY_LEN]);
        assert_eq!(material.iv(), &full[KEY_LEN..]);
    }

    #[test]
    fn zero_iterations_rejected() {
        assert!(derive_key_material(b"pw", b"salt", 0).is_err());
        assert!(stretch(b"pw", b"salt", 0).is_err());
    }

    #[test]
    fn salts_are_random() {
        assert_ne!(generate_salt().unwrap(), generate_salt().unwrap());
    }
}
