//! OS keyring storage for the sync-server password.
//!
//! - macOS: Keychain
//! - Windows: Credential Manager
//! - Linux: Secret Service (GNOME Keyring / KDE Wallet)
//!
//! If the keyring is unavailable the error is returned and the caller
//! falls back to a prompt. The master password is never stored here.

use crate::errors::{Result, SesamError};

/// Service name used in the OS keyring.
const SERVICE_NAME: &str = "sesam";

/// One entry per server and account.
fn entry_key(server_url: &str, username: &str) -> String {
    format!("sync:{username}@{}", server_url.trim_end_matches('/'))
}

fn entry(server_url: &str, username: &str) -> Result<keyring::Entry> {
    keyring::Entry::new(SERVICE_NAME, &entry_key(server_url, username))
        .map_err(|e| SesamError::KeyringError(format!("failed to create keyring entry: {e}")))
}

/// Store the sync password for `username` on `server_url`.
pub fn store_sync_password(server_url: &str, username: &str, password: &str) -> Result<()> {
    entry(server_url, username)?
        .set_password(password)
        .map_err(|e| SesamError::KeyringError(format!("failed to store password in keyring: {e}")))
}

/// Returns `None` if nothing is stored (rather than an error).
pub fn get_sync_password(server_url: &str, username: &str) -> Result<Option<String>> {
    match entry(server_url, username)?.get_password() {
        Ok(password) => Ok(Some(password)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(SesamError::KeyringError(format!(
            "failed to read from keyring: {e}"
        ))),
    }
}

pub fn delete_sync_password(server_url: &str, username: &str) -> Result<()> {
    match entry(server_url, username)?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(SesamError::KeyringError(format!(
            "failed to delete from keyring: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_key_ignores_trailing_slash() {
        assert_eq!(
            entry_key("https://sync.example.org/", "alice"),
            entry_key("https://sync.example.org", "alice")
        );
        assert_eq!(
            entry_key("https://sync.example.org", "alice"),
            "sync:alice@https://sync.example.org"
        );
    }
}
