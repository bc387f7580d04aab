//! Vault module: the KGK and everything stored next to it.
//!
//! - Per-domain settings and their store (`domain`)
//! - The KGK state machine and its encrypted envelope (`kgk`)
//! - Binary state file format (`format`)
//! - High-level `VaultStore` tying the three together (`store`)

pub mod domain;
pub mod format;
pub mod kgk;
pub mod store;

pub use domain::{DomainSetting, DomainSettingsStore, MergeReport, SettingDefaults};
pub use kgk::{EncryptedKgkBlock, KgkVault, MigrationReport, VaultState};
pub use store::VaultStore;
