//! Secret-holding wrappers and HKDF sub-key derivation.
//!
//! - `MasterPassword`: the user secret, only ever held transiently.
//! - `KeyMaterial`: AES key + IV stretched from the master password,
//!   remembered together with the salt it was derived for.
//! - `Kgk`: the 64-byte root secret every site password comes from.
//!
//! From the KGK we derive one more key with HKDF-SHA256: the key that
//! seals the domain-settings payload (locally and on the wire).

use std::fmt;

use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::TryRngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::kdf::{IV_LEN, KEY_LEN};
use crate::errors::{Result, SesamError};

/// Length of the KGK in bytes.
pub const KGK_LEN: usize = 64;

/// Length of HKDF sub-keys (256 bits).
const SUBKEY_LEN: usize = 32;

/// The user's master password.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterPassword(String);

impl MasterPassword {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for MasterPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterPassword(<redacted>)")
    }
}

/// AES-256 key and CBC IV for the KGK block, bound to the salt they came from.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
    salt: Vec<u8>,
}

impl KeyMaterial {
    /// Split one PBKDF2 output into key and IV.
    pub(crate) fn from_stretched(stretched: &[u8; KEY_LEN + IV_LEN], salt: &[u8]) -> Self {
        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        key.copy_from_slice(&stretched[..KEY_LEN]);
        iv.copy_from_slice(&stretched[KEY_LEN..]);
        Self {
            key,
            iv,
            salt: salt.to_vec(),
        }
    }

    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    /// The vault salt this material was stretched with.
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

/// The Key Generation Key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Kgk {
    bytes: [u8; KGK_LEN],
}

impl Kgk {
    /// Generate a fresh KGK from the operating system CSPRNG.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; KGK_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| SesamError::RandomUnavailable(e.to_string()))?;
        Ok(Self { bytes })
    }

    pub fn from_bytes(bytes: [u8; KGK_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KGK_LEN] {
        &self.bytes
    }

    /// Derive the key that seals the domain-settings payload.
    pub fn settings_key(&self) -> Result<[u8; SUBKEY_LEN]> {
        hkdf_derive(&self.bytes, b"sesam-domain-settings")
    }
}

impl PartialEq for Kgk {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.ct_eq(&other.bytes).into()
    }
}

impl Eq for Kgk {}

impl fmt::Debug for Kgk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Kgk(<redacted>)")
    }
}

/// HKDF-SHA256 expand with the given `info`.
///
/// The KGK is uniformly random, so no extract salt is needed.
fn hkdf_derive(ikm: &[u8], info: &[u8]) -> Result<[u8; SUBKEY_LEN]> {
    let hk = Hkdf::<Sha256>::new(None, ikm);

    let mut okm = [0u8; SUBKEY_LEN];
    hk.expand(info, &mut okm)
        .map_err(|e| SesamError::KeyDerivationFailed(format!("HKDF expand failed: {e}")))?;

    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_kgks_differ() {
        let a = Kgk::generate().unwrap();
        let b = Kgk::generate().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn kgk_equality_is_by_value() {
        let a = Kgk::from_bytes([7u8; KGK_LEN]);
        let b = Kgk::from_bytes([7u8; KGK_LEN]);
        assert_eq!(a, b);
    }

    #[test]
    fn settings_key_is_deterministic_per_kgk() {
        let a = Kgk::from_bytes([1u8; KGK_LEN]);
        let b = Kgk::from_bytes([2u8; KGK_LEN]);
        assert_eq!(a.settings_key().unwrap(), a.settings_key().unwrap());
        assert_ne!(a.settings_key().unwrap(), b.settings_key().unwrap());
    }

    #[test]
    fn debug_output_is_redacted() {
        let kgk = Kgk::from_bytes([0xAB; KGK_LEN]);
        let pw = MasterPassword::new("hunter2");
        assert!(!format!("{kgk:?}").contains("ab"));
        assert!(!format!("{pw:?}").contains("hunter2"));
    }
}
