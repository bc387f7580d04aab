//! Cryptographic primitives for Sesam.
//!
//! This module provides:
//! - PBKDF2 key stretching for vault key material and passwords (`kdf`)
//! - Unauthenticated AES-256-CBC for the KGK block (`crypter`)
//! - AES-256-GCM sealing for the domain-settings payload (`encryption`)
//! - Zeroizing secret wrappers and HKDF sub-keys (`keys`)

pub mod crypter;
pub mod encryption;
pub mod kdf;
pub mod keys;

pub use crypter::Crypter;
pub use encryption::{open, seal};
pub use kdf::{derive_key_material, generate_salt, stretch};
pub use keys::{KeyMaterial, Kgk, MasterPassword};
