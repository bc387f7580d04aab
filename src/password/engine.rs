//! Deterministic password derivation.
//!
//! Both modes stretch `domain ++ username ++ secret` with PBKDF2-HMAC-SHA512,
//! read the 64-byte digest as one unsigned big-endian integer and peel
//! characters off it: `digit = n % alphabet_len`, `n /= alphabet_len`.
//! Generation stops at the requested length **or** when `n` reaches zero,
//! so a password can come out shorter than requested. That short output is
//! what every existing installation produced and must stay that way.
//!
//! - Legacy mode: secret = master password, fixed salt `pepper`, caller
//!   supplied iterations and character classes.
//! - Vault mode: secret = KGK, per-domain salt, iterations, length and
//!   complexity from the `DomainSetting`.

use zeroize::Zeroize;

use super::alphabet::CharacterClasses;
use crate::crypto::kdf::stretch;
use crate::crypto::keys::{Kgk, MasterPassword};
use crate::errors::{Result, SesamError};
use crate::vault::domain::DomainSetting;

/// Application-wide salt of the legacy mode.
pub const LEGACY_SALT: &[u8] = b"pepper";

/// Baseline iteration count; regeneration counts up from here.
pub const DEFAULT_ITERATIONS: u32 = 4096;

/// Everything the legacy mode needs for one derivation.
#[derive(Debug, Clone)]
pub struct LegacyRequest<'a> {
    pub master_password: &'a MasterPassword,
    pub domain: &'a str,
    pub username: &'a str,
    pub classes: CharacterClasses,
    pub length: usize,
    pub iterations: u32,
}

/// Derive a password straight from the master password.
pub fn derive_legacy(request: &LegacyRequest<'_>) -> Result<String> {
    validate_domain(request.domain)?;
    let alphabet = request.classes.legacy_alphabet()?;

    let mut material = concat_material(
        request.domain,
        request.username,
        request.master_password.as_bytes(),
    );
    let digest = stretch(&material, LEGACY_SALT, request.iterations);
    material.zeroize();
    let mut digest = digest?;

    let password = convert_bytes_to_password(&digest, &alphabet, request.length);
    digest.zeroize();
    Ok(password)
}

/// Derive a password from the KGK and a domain's own parameters.
pub fn derive_vault(kgk: &Kgk, setting: &DomainSetting) -> Result<String> {
    validate_domain(&setting.domain)?;
    let alphabet = CharacterClasses::from_complexity(setting.complexity)?.alphabet()?;
    if setting.length == 0 {
        return Err(SesamError::InvalidPolicy("length must be at least 1".into()));
    }

    let mut material = concat_material(&setting.domain, &setting.username, kgk.as_bytes());
    let digest = stretch(&material, &setting.salt, setting.iterations);
    material.zeroize();
    let mut digest = digest?;

    let password = convert_bytes_to_password(&digest, &alphabet, setting.length);
    digest.zeroize();
    Ok(password)
}

/// The password a domain currently exposes.
///
/// A frozen legacy password always wins over a fresh derivation.
pub fn password_for(kgk: &Kgk, setting: &DomainSetting) -> Result<String> {
    match &setting.legacy_password {
        Some(frozen) => Ok(frozen.clone()),
        None => derive_vault(kgk, setting),
    }
}

/// Turn a digest into a password over `alphabet`.
///
/// Stops early when the integer is exhausted.
pub fn convert_bytes_to_password(digest: &[u8], alphabet: &[char], length: usize) -> String {
    let mut password = String::with_capacity(length);
    if alphabet.is_empty() {
        return password;
    }

    let base = u32::try_from(alphabet.len()).unwrap_or(u32::MAX);
    let mut number = digest.to_vec();
    let mut emitted = 0;

    while emitted < length && !is_zero(&number) {
        let remainder = div_rem_in_place(&mut number, base);
        password.push(alphabet[remainder as usize]);
        emitted += 1;
    }

    number.zeroize();
    password
}

/// Divide a big-endian unsigned integer by `divisor`, returning the remainder.
fn div_rem_in_place(number: &mut [u8], divisor: u32) -> u32 {
    let mut remainder: u32 = 0;
    for byte in number.iter_mut() {
        let acc = (remainder << 8) | u32::from(*byte);
        // acc < divisor * 256, so the quotient always fits in a byte.
        *byte = (acc / divisor) as u8;
        remainder = acc % divisor;
    }
    remainder
}

fn is_zero(number: &[u8]) -> bool {
    number.iter().all(|&b| b == 0)
}

fn concat_material(domain: &str, username: &str, secret: &[u8]) -> Vec<u8> {
    let mut material = Vec::with_capacity(domain.len() + username.len() + secret.len());
    material.extend_from_slice(domain.as_bytes());
    material.extend_from_slice(username.as_bytes());
    material.extend_from_slice(secret);
    material
}

fn validate_domain(domain: &str) -> Result<()> {
    if domain.is_empty() {
        return Err(SesamError::InvalidInput("domain must not be empty".into()));
    }
    Ok(())
}
