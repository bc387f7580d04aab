//! `sesam trust`: check the server certificate and credentials.
//!
//! Pins the certificate on first contact (after confirmation) and issues
//! one authenticated read. `--forget` drops the pin (and the stored sync
//! password) instead.

use crate::cli::commands::sync::{connect, endpoint};
use crate::cli::output;
use crate::cli::{Cli, Context};
use crate::errors::Result;
use crate::vault::VaultStore;

/// Execute the `trust` command.
pub async fn execute(cli: &Cli, forget: bool) -> Result<()> {
    let ctx = Context::load(cli)?;

    if forget {
        return forget_pin(&ctx);
    }

    let endpoint = endpoint(&ctx)?;
    std::fs::create_dir_all(&ctx.data_dir)?;
    let mut session = ctx.open_session()?;
    let transport = connect(&ctx, &mut session, &endpoint).await?;
    transport.test_connection().await?;

    if let Some(pinned) = session.store().trust().pinned() {
        output::info(&format!("Pinned: {}", pinned.fingerprint));
    }
    output::success(&format!("Connected to {} as {}", endpoint.url, endpoint.username));
    Ok(())
}

fn forget_pin(ctx: &Context) -> Result<()> {
    #[cfg(feature = "keyring-store")]
    if let (Some(url), Some(username)) = (&ctx.settings.sync.server_url, &ctx.settings.sync.username)
    {
        crate::keyring::delete_sync_password(url, username)?;
    }

    let path = ctx.state_path();
    if !path.exists() {
        output::info("No certificate is pinned.");
        return Ok(());
    }
    let mut store = VaultStore::open(&path)?;
    if !store.trust_mut().clear() {
        output::info("No certificate is pinned.");
        return Ok(());
    }
    store.save()?;
    ctx.record("trust", None, Some("pin removed"));
    output::success("Pinned certificate removed");
    Ok(())
}
