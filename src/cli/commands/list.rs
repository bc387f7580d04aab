//! `sesam list`: display the known domains in a table.

use crate::cli::output;
use crate::cli::{Cli, Context};
use crate::errors::Result;

/// Execute the `list` command.
pub async fn execute(cli: &Cli) -> Result<()> {
    let ctx = Context::load(cli)?;
    let session = ctx.unlocked_session().await?;

    if !session.vault_ready() {
        output::info("No vault found; nothing is stored in legacy mode.");
        output::tip("Run `sesam init` to create a vault.");
        return Ok(());
    }

    let store = session.store();
    let settings = store.domains().entries();
    output::info(&format!("{} domain(s)", settings.len()));
    output::print_domains_table(settings);

    match store.last_sync() {
        Some(at) => output::tip(&format!("Last sync: {}", at.format("%Y-%m-%d %H:%M:%S"))),
        None if ctx.settings.sync.server_url.is_some() => output::tip("Never synced."),
        None => {}
    }
    Ok(())
}
