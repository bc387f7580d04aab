//! CLI module: Clap argument parser, shared prompts and command implementations.

pub mod commands;
pub mod output;

use std::path::{Path, PathBuf};

use clap::Parser;
use zeroize::Zeroizing;

use crate::config::{resolve_data_dir, Settings};
use crate::crypto::keys::MasterPassword;
use crate::errors::{Result, SesamError};
use crate::session::Session;
use crate::trust::TrustPrompt;
use crate::vault::VaultStore;
use crate::worker::DerivationRunner;

/// Environment variable holding the master password for scripted use.
pub const MASTER_PASSWORD_ENV: &str = "SESAM_MASTER_PASSWORD";

/// Environment variable holding the sync-server password.
pub const SYNC_PASSWORD_ENV: &str = "SESAM_SYNC_PASSWORD";

/// Minimum length for a new master password.
const MIN_MASTER_PASSWORD_LEN: usize = 8;

/// Sesam: one master password, a different password for every site.
#[derive(Parser)]
#[command(
    name = "sesam",
    about = "Deterministic per-site passwords from a synchronized root key",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory (default: $SESAM_HOME or ~/.sesam)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

/// All available subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Create a new vault with a fresh random key
    Init {
        /// Replace an existing vault (derived passwords will change)
        #[arg(long)]
        force: bool,
    },

    /// Derive the password for a site
    Generate {
        /// Site domain (e.g. example.com)
        domain: String,

        /// Account name on the site (default: the stored one)
        #[arg(short, long)]
        username: Option<String>,

        /// Character mix, 0 (digits) to 6 (all classes)
        #[arg(short, long)]
        complexity: Option<u8>,

        /// Password length
        #[arg(short, long)]
        length: Option<usize>,

        /// Ask for a different password N times
        #[arg(long, default_value = "0")]
        again: u32,

        /// Derive from the master password only, ignoring the vault
        #[arg(long)]
        legacy: bool,
    },

    /// List known domains
    List,

    /// Pin a fixed password for a domain
    SetLegacy {
        /// Site domain
        domain: String,
        /// Password to store (omit for interactive prompt)
        password: Option<String>,
    },

    /// Remove a pinned password so the domain derives again
    ClearLegacy {
        /// Site domain
        domain: String,
    },

    /// Synchronize with the configured server
    Sync,

    /// Check the server certificate and credentials
    Trust {
        /// Forget the pinned certificate instead
        #[arg(long)]
        forget: bool,
    },

    /// Change the master password (site passwords stay the same)
    RotateKey,

    /// View the audit log of vault operations
    Audit {
        /// Number of entries to show
        #[arg(long, default_value = "50")]
        last: usize,
    },
}

// ---------------------------------------------------------------------------
// Shared helpers used by multiple commands
// ---------------------------------------------------------------------------

/// Resolved data directory and the settings loaded from it.
pub struct Context {
    pub data_dir: PathBuf,
    pub settings: Settings,
}

impl Context {
    pub fn load(cli: &Cli) -> Result<Self> {
        let data_dir = resolve_data_dir(cli.data_dir.as_deref())?;
        let settings = Settings::load(&data_dir)?;
        Ok(Self { data_dir, settings })
    }

    pub fn state_path(&self) -> PathBuf {
        self.settings.state_path(&self.data_dir)
    }

    /// Open the vault (still locked) and wrap it in a session.
    pub fn open_session(&self) -> Result<Session> {
        let store = VaultStore::open(&self.state_path())?;
        Ok(Session::new(
            store,
            DerivationRunner::spawn(),
            self.settings.session_options(),
        ))
    }

    /// Open a session and unlock it with the master password.
    ///
    /// Without a vault the session stays in legacy mode.
    pub async fn unlocked_session(&self) -> Result<Session> {
        let mut session = self.open_session()?;
        let master = prompt_master_password()?;
        session.on_master_password_changed(master)?;
        session.wait_until_settled().await?;
        Ok(session)
    }

    /// Record an audit event. Never fails.
    pub fn record(&self, operation: &str, domain: Option<&str>, details: Option<&str>) {
        record_audit(&self.data_dir, operation, domain, details);
    }
}

#[cfg(feature = "audit-log")]
fn record_audit(data_dir: &Path, operation: &str, domain: Option<&str>, details: Option<&str>) {
    crate::audit::log_audit(data_dir, operation, domain, details);
}

#[cfg(not(feature = "audit-log"))]
fn record_audit(_data_dir: &Path, _operation: &str, _domain: Option<&str>, _details: Option<&str>) {
}

/// Get the master password, trying in order:
/// 1. `SESAM_MASTER_PASSWORD` env var (scripts)
/// 2. Interactive prompt
pub fn prompt_master_password() -> Result<MasterPassword> {
    if let Some(pw) = non_empty_env(MASTER_PASSWORD_ENV) {
        return Ok(MasterPassword::new(pw.as_str()));
    }

    let pw = dialoguer::Password::new()
        .with_prompt("Master password")
        .interact()
        .map_err(|e| SesamError::CommandFailed(format!("password prompt: {e}")))?;
    Ok(MasterPassword::new(pw))
}

/// Prompt for a new master password with confirmation.
///
/// Also respects `SESAM_MASTER_PASSWORD` for scripted use.
pub fn prompt_new_master_password(prompt: &str) -> Result<MasterPassword> {
    if let Some(pw) = non_empty_env(MASTER_PASSWORD_ENV) {
        if pw.chars().count() < MIN_MASTER_PASSWORD_LEN {
            return Err(SesamError::InvalidInput(format!(
                "master password must be at least {MIN_MASTER_PASSWORD_LEN} characters"
            )));
        }
        return Ok(MasterPassword::new(pw.as_str()));
    }

    loop {
        let password = dialoguer::Password::new()
            .with_prompt(prompt)
            .with_confirmation(
                "Confirm master password",
                "Passwords do not match, try again",
            )
            .interact()
            .map_err(|e| SesamError::CommandFailed(format!("password prompt: {e}")))?;

        if password.chars().count() < MIN_MASTER_PASSWORD_LEN {
            output::warning(&format!(
                "Master password must be at least {MIN_MASTER_PASSWORD_LEN} characters. Try again."
            ));
            continue;
        }

        return Ok(MasterPassword::new(password));
    }
}

/// Get the sync-server password, trying in order:
/// 1. `SESAM_SYNC_PASSWORD` env var
/// 2. OS keyring (if compiled with `keyring-store` feature)
/// 3. Interactive prompt (stored in the keyring afterwards, if available)
pub fn sync_password(server_url: &str, username: &str) -> Result<Zeroizing<String>> {
    if let Some(pw) = non_empty_env(SYNC_PASSWORD_ENV) {
        return Ok(pw);
    }

    #[cfg(feature = "keyring-store")]
    match crate::keyring::get_sync_password(server_url, username) {
        Ok(Some(pw)) => return Ok(Zeroizing::new(pw)),
        Ok(None) => {}
        Err(e) => tracing::debug!(error = %e, "keyring unavailable"),
    }

    let pw = dialoguer::Password::new()
        .with_prompt(format!("Sync password for {username}"))
        .interact()
        .map_err(|e| SesamError::CommandFailed(format!("password prompt: {e}")))?;

    #[cfg(feature = "keyring-store")]
    if let Err(e) = crate::keyring::store_sync_password(server_url, username, &pw) {
        tracing::debug!(error = %e, "could not remember sync password");
    }

    #[cfg(not(feature = "keyring-store"))]
    let _ = server_url;

    Ok(Zeroizing::new(pw))
}

fn non_empty_env(name: &str) -> Option<Zeroizing<String>> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .map(Zeroizing::new)
}

/// Asks on the terminal whether to trust a certificate fingerprint.
pub struct DialoguerTrustPrompt;

impl TrustPrompt for DialoguerTrustPrompt {
    fn confirm(&mut self, host: &str, fingerprint: &str) -> bool {
        output::info(&format!("{host} presented a certificate with SHA-256 fingerprint"));
        println!("  {fingerprint}");
        dialoguer::Confirm::new()
            .with_prompt("Trust this certificate for future syncs?")
            .default(false)
            .interact()
            .unwrap_or(false)
    }
}

/// Ask a yes/no question, defaulting to "no".
pub fn confirm(prompt: &str) -> Result<bool> {
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| SesamError::CommandFailed(format!("failed to read confirmation: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn generate_parses_all_flags() {
        let cli = Cli::try_parse_from([
            "sesam", "generate", "example.com", "-u", "alice", "-c", "4", "-l", "16", "--again",
            "2",
        ])
        .unwrap();
        match cli.command {
            Commands::Generate {
                domain,
                username,
                complexity,
                length,
                again,
                legacy,
            } => {
                assert_eq!(domain, "example.com");
                assert_eq!(username.as_deref(), Some("alice"));
                assert_eq!(complexity, Some(4));
                assert_eq!(length, Some(16));
                assert_eq!(again, 2);
                assert!(!legacy);
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn data_dir_is_global() {
        let cli = Cli::try_parse_from(["sesam", "list", "--data-dir", "/tmp/x"]).unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn set_legacy_password_is_optional() {
        let cli = Cli::try_parse_from(["sesam", "set-legacy", "example.com"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::SetLegacy { password: None, .. }
        ));
    }
}
