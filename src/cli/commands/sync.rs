//! `sesam sync`: pull, reconcile and push against the configured server.

use crate::cli::output;
use crate::cli::{sync_password, Cli, Context, DialoguerTrustPrompt};
use crate::errors::{Result, SesamError};
use crate::session::Session;
use crate::sync::{
    host_of, probe_certificate_chain, HttpTransport, SyncEndpoint, SyncEngine, SyncOutcome,
};
use crate::trust::TrustDecision;

/// Execute the `sync` command.
pub async fn execute(cli: &Cli) -> Result<()> {
    let ctx = Context::load(cli)?;
    let endpoint = endpoint(&ctx)?;
    std::fs::create_dir_all(&ctx.data_dir)?;

    let mut session = ctx.unlocked_session().await?;
    let transport = connect(&ctx, &mut session, &endpoint).await?;
    let engine = SyncEngine::new(Box::new(transport), ctx.settings.kdf_iterations);

    let report = match session.on_sync_requested(&engine).await {
        Ok(report) => report,
        Err(e) => {
            ctx.record("sync", None, Some(&format!("failed: {e}")));
            return Err(e);
        }
    };

    let branch = match report.outcome {
        SyncOutcome::Uploaded => "uploaded",
        SyncOutcome::Merged(_) => "merged",
        SyncOutcome::Adopted(_) => "adopted",
        SyncOutcome::Migrated { migration, .. } => {
            ctx.record(
                "migrate",
                None,
                Some(&format!(
                    "{} frozen, {} already pinned",
                    migration.frozen, migration.kept
                )),
            );
            "migrated"
        }
    };
    ctx.record("sync", None, Some(branch));

    output::success(&capitalize(session.status()));
    if let SyncOutcome::Migrated { migration, .. } = report.outcome {
        if migration.frozen > 0 {
            output::tip("Existing site passwords were kept as pinned passwords.");
            output::tip("Use `sesam clear-legacy <domain>` after changing a site's password.");
        }
    }
    Ok(())
}

/// Read the `[sync]` settings and the server password.
pub(crate) fn endpoint(ctx: &Context) -> Result<SyncEndpoint> {
    let sync = &ctx.settings.sync;
    let (Some(url), Some(username)) = (&sync.server_url, &sync.username) else {
        output::tip("Set `server_url` and `username` in the [sync] table of sesam.toml.");
        return Err(SesamError::ConfigError("no sync server configured".into()));
    };
    Ok(SyncEndpoint {
        url: url.clone(),
        username: username.clone(),
        password: sync_password(url, username)?,
        timeout: ctx.settings.sync_timeout(),
    })
}

/// Make sure the server certificate is pinned, then build the transport.
///
/// The first contact shows the fingerprint and asks the user; later runs
/// only accept the pinned certificate.
pub(crate) async fn connect(
    ctx: &Context,
    session: &mut Session,
    endpoint: &SyncEndpoint,
) -> Result<HttpTransport> {
    let host = host_of(&endpoint.url)?;
    if session.on_endpoint_changed(&host)? {
        output::warning(&format!(
            "The pinned certificate does not cover {host}; it has to be trusted again."
        ));
    }

    if session.store().trust().pinned().is_none() {
        let chain = probe_certificate_chain(&endpoint.url, endpoint.timeout).await?;
        let decision = session.on_certificate_presented(&host, &chain, &mut DialoguerTrustPrompt);
        match decision {
            Ok(TrustDecision::NewlyPinned { fingerprint }) => {
                ctx.record("trust", None, Some(&format!("{host} {fingerprint}")));
                output::success(&format!("Pinned certificate for {host}"));
            }
            Ok(TrustDecision::AlreadyPinned) => {}
            Err(e) => {
                ctx.record("trust", None, Some(&format!("{host} rejected")));
                return Err(e);
            }
        }
    }

    let pinned = session
        .store()
        .trust()
        .pinned_der()
        .ok_or_else(|| SesamError::TrustViolation("no certificate pinned".into()))?;
    HttpTransport::new(endpoint, pinned)
}

fn capitalize(status: &str) -> String {
    let mut chars = status.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capitalize_first_letter_only() {
        assert_eq!(capitalize("synced, already up to date"), "Synced, already up to date");
        assert_eq!(capitalize(""), "");
    }
}
