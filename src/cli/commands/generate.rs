//! `sesam generate`: derive the password for one site.
//!
//! With an unlocked vault the password comes from the KGK and the stored
//! domain setting; `-c`, `-l` and `--again` are persisted. Without a vault
//! (or with `--legacy`) it is derived from the master password alone and
//! nothing is written.

use crate::cli::output;
use crate::cli::{prompt_master_password, Cli, Context};
use crate::config::Settings;
use crate::errors::{Result, SesamError};
use crate::password::alphabet::CharacterClasses;
use crate::password::engine::{derive_legacy, LegacyRequest};

/// Arguments of `sesam generate`.
pub struct GenerateArgs<'a> {
    pub domain: &'a str,
    pub username: Option<&'a str>,
    pub complexity: Option<u8>,
    pub length: Option<usize>,
    pub again: u32,
    pub legacy: bool,
}

/// Execute the `generate` command.
pub async fn execute(cli: &Cli, args: GenerateArgs<'_>) -> Result<()> {
    let ctx = Context::load(cli)?;
    if let Some(length) = args.length {
        ctx.settings.check_length(length)?;
    }

    if args.legacy {
        let password = legacy_password(&ctx.settings, &args)?;
        output::password(&password);
        return Ok(());
    }

    let mut session = ctx.unlocked_session().await?;
    let username = match args.username {
        Some(username) => username.to_string(),
        None => session
            .store()
            .domains()
            .get(args.domain.trim())
            .map(|setting| setting.username.clone())
            .unwrap_or_default(),
    };
    session.on_domain_committed(args.domain, &username)?;

    // Vault mode keeps the policy per domain; fall back to the configured
    // defaults otherwise.
    let (complexity, length) = match session.store().domains().get(args.domain.trim()) {
        Some(setting) if session.vault_ready() => (setting.complexity, setting.length),
        _ => (
            ctx.settings.default_complexity,
            ctx.settings.default_length,
        ),
    };
    let wanted = (
        args.complexity.unwrap_or(complexity),
        args.length.unwrap_or(length),
    );
    if wanted != (complexity, length) || !session.vault_ready() {
        session.on_policy_changed(wanted.0, wanted.1)?;
    }

    for _ in 0..args.again {
        session.regenerate()?;
    }

    let password = session
        .derived_password()
        .ok_or_else(|| SesamError::CommandFailed(session.status().to_string()))?
        .to_string();

    if session.legacy_mode() {
        output::warning(
            "No vault found; password derived from the master password only (see `sesam init`).",
        );
    }
    output::password(&password);
    Ok(())
}

/// Derive without touching the vault.
fn legacy_password(settings: &Settings, args: &GenerateArgs<'_>) -> Result<String> {
    let domain = args.domain.trim();
    if domain.is_empty() {
        return Err(SesamError::InvalidInput("domain must not be empty".into()));
    }
    let complexity = args.complexity.unwrap_or(settings.default_complexity);
    let classes = CharacterClasses::from_complexity(complexity)?;
    let iterations = settings
        .password_iterations
        .checked_add(args.again)
        .ok_or_else(|| SesamError::InvalidPolicy("iteration count exhausted".into()))?;

    let master = prompt_master_password()?;
    derive_legacy(&LegacyRequest {
        master_password: &master,
        domain,
        username: args.username.unwrap_or_default(),
        classes,
        length: args.length.unwrap_or(settings.default_length),
        iterations,
    })
}
