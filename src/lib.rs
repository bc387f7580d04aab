#[cfg(feature = "audit-log")]
pub mod audit;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod password;
pub mod session;
pub mod sync;
pub mod trust;
pub mod vault;
pub mod worker;

#[cfg(feature = "keyring-store")]
pub mod keyring;
