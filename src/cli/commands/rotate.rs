//! `sesam rotate-key`: change the master password.
//!
//! The KGK is re-encrypted under key material derived from the new
//! password and a fresh salt. The KGK itself is unchanged, so every site
//! password stays the same.

use crate::cli::output;
use crate::cli::{prompt_new_master_password, Cli, Context};
use crate::errors::{Result, SesamError};

/// Execute the `rotate-key` command.
pub async fn execute(cli: &Cli) -> Result<()> {
    let ctx = Context::load(cli)?;

    // 1. Unlock with the current password.
    output::info("Enter your current master password.");
    let mut session = ctx.unlocked_session().await?;
    if !session.vault_ready() {
        return Err(SesamError::VaultNotReady(
            "no vault to rotate; run `sesam init` first".into(),
        ));
    }

    // 2. Re-encrypt under the new one.
    output::info("Choose your new master password.");
    let new_password = prompt_new_master_password("New master password")?;
    session.change_master_password(new_password).await?;

    let count = session.domain_list().len();
    ctx.record("rotate-key", None, Some(&format!("{count} domains kept")));
    output::success(&format!(
        "Master password changed ({count} domain(s), site passwords unchanged)"
    ));
    if ctx.settings.sync.server_url.is_some() {
        output::tip("Run `sesam sync` so your other devices pick up the new password.");
    }
    Ok(())
}
