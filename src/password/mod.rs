//! Password derivation: character tables (`alphabet`) and the two
//! derivation modes (`engine`).

pub mod alphabet;
pub mod engine;

pub use alphabet::CharacterClasses;
pub use engine::{
    convert_bytes_to_password, derive_legacy, derive_vault, password_for, LegacyRequest,
    DEFAULT_ITERATIONS, LEGACY_SALT,
};
