//! `sesam set-legacy` / `sesam clear-legacy`: manage pinned passwords.
//!
//! A pinned (legacy) password is returned instead of the derived one
//! until it is cleared. Sync freezes passwords this way when switching to
//! another device's key.

use crate::cli::output;
use crate::cli::{Cli, Context};
use crate::errors::{Result, SesamError};
use crate::session::Session;

/// Execute the `set-legacy` command.
pub async fn execute_set(cli: &Cli, domain: &str, password: Option<&str>) -> Result<()> {
    let ctx = Context::load(cli)?;
    let mut session = require_vault(&ctx).await?;

    let password = match password {
        Some(p) => p.to_string(),
        None => dialoguer::Password::new()
            .with_prompt(format!("Password for {domain}"))
            .interact()
            .map_err(|e| SesamError::CommandFailed(format!("password prompt: {e}")))?,
    };

    let defaults = ctx.settings.setting_defaults();
    let store = session.store_mut();
    let domains = store.domains_mut();
    domains.get_or_create(domain, &defaults)?;
    domains.set_legacy_password(domain, &password)?;
    store.save()?;

    output::success(&format!("Pinned password stored for '{domain}'"));
    Ok(())
}

/// Execute the `clear-legacy` command.
pub async fn execute_clear(cli: &Cli, domain: &str) -> Result<()> {
    let ctx = Context::load(cli)?;
    let mut session = require_vault(&ctx).await?;

    let store = session.store_mut();
    if !store.domains().contains(domain) {
        return Err(SesamError::InvalidInput(format!("unknown domain '{domain}'")));
    }
    if !store.domains_mut().clear_legacy_password(domain)? {
        output::info(&format!("'{domain}' has no pinned password."));
        return Ok(());
    }
    store.save()?;

    output::success(&format!("'{domain}' derives its password again"));
    Ok(())
}

async fn require_vault(ctx: &Context) -> Result<Session> {
    let session = ctx.unlocked_session().await?;
    if !session.vault_ready() {
        output::tip("Run `sesam init` to create a vault.");
        return Err(SesamError::VaultNotReady(
            "pinned passwords need a vault".into(),
        ));
    }
    Ok(session)
}
