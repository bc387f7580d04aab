//! `sesam init`: create a new vault with a fresh random KGK.

use tracing::warn;

use crate::cli::output;
use crate::cli::{confirm, prompt_master_password, prompt_new_master_password, Cli, Context};
use crate::errors::{Result, SesamError};
use crate::session::Session;

/// Execute the `init` command.
pub async fn execute(cli: &Cli, force: bool) -> Result<()> {
    let ctx = Context::load(cli)?;
    std::fs::create_dir_all(&ctx.data_dir)?;

    let mut session = ctx.open_session()?;
    let replacing = session.store().stored_kgk_block().is_some();

    if replacing {
        if !force {
            output::tip("Use `sesam init --force` to replace it; derived passwords will change.");
            return Err(SesamError::VaultAlreadyExists(ctx.state_path()));
        }
        confirm_discard(&mut session).await?;
    }

    // 1. Pick the master password the new vault is encrypted under.
    let master = if replacing {
        prompt_new_master_password("Master password for the new vault")?
    } else {
        prompt_new_master_password("Choose master password")?
    };
    session.on_master_password_changed(master)?;
    session.wait_until_settled().await.or_else(|e| match e {
        // The old vault may belong to another password; it is replaced anyway.
        SesamError::DecryptionMismatch => Ok(()),
        other => Err(other),
    })?;

    // 2. Generate the KGK and write the state file.
    session.create_vault(force).await?;

    let detail = if replacing { "replaced" } else { "created" };
    ctx.record("init", None, Some(detail));
    output::success(&format!("Vault {detail} at {}", ctx.state_path().display()));
    if ctx.settings.sync.server_url.is_some() {
        output::tip("Run `sesam sync` to share it with your other devices.");
    }
    Ok(())
}

/// Ask before throwing away a vault that still knows domains.
///
/// If the vault cannot be opened with the given password its contents are
/// unknown, so the user is asked as well.
async fn confirm_discard(session: &mut Session) -> Result<()> {
    output::info("Enter the current master password to inspect the existing vault.");
    let master = prompt_master_password()?;
    session.on_master_password_changed(master)?;

    let known = match session.wait_until_settled().await {
        Ok(()) => Some(session.domain_list().len()),
        Err(e) => {
            warn!(error = %e, "could not open existing vault");
            None
        }
    };

    let question = match known {
        Some(0) => return Ok(()),
        Some(n) => format!("The existing vault holds {n} domain(s). Discard it?"),
        None => "The existing vault could not be opened. Discard it anyway?".to_string(),
    };
    if !confirm(&question)? {
        return Err(SesamError::UserCancelled);
    }
    Ok(())
}
