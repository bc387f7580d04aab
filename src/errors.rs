use std::path::PathBuf;
use thiserror::Error;

/// All errors that can occur in Sesam.
///
/// Messages never include the master password, the KGK or any derived
/// key material.
#[derive(Debug, Error)]
pub enum SesamError {
    // --- Input errors (recoverable, re-prompt) ---
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid password policy: {0}")]
    InvalidPolicy(String),

    // --- Crypto errors ---
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption mismatch: wrong master password or foreign vault")]
    DecryptionMismatch,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Secure random number generator unavailable: {0}")]
    RandomUnavailable(String),

    // --- Vault errors ---
    #[error("Vault not found at {0}")]
    VaultNotFound(PathBuf),

    #[error("Vault already exists at {0}")]
    VaultAlreadyExists(PathBuf),

    #[error("Invalid vault format: {0}")]
    InvalidVaultFormat(String),

    #[error("Vault is not ready: {0}")]
    VaultNotReady(String),

    // --- Sync errors ---
    #[error("Certificate not trusted: {0}")]
    TrustViolation(String),

    #[error("Sync conflict: {0}")]
    SyncConflict(String),

    #[error("Sync server rejected the credentials: {0}")]
    Authentication(String),

    #[error("Sync transport error: {0}")]
    Transport(String),

    // --- Keyring errors ---
    #[error("Keyring error: {0}")]
    KeyringError(String),

    // --- Config errors ---
    #[error("Config file error: {0}")]
    ConfigError(String),

    // --- IO errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // --- Serialization errors ---
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // --- CLI errors ---
    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("User cancelled operation")]
    UserCancelled,

    #[error("Audit error: {0}")]
    AuditError(String),
}

/// Convenience type alias for Sesam results.
pub type Result<T> = std::result::Result<T, SesamError>;
