use clap::Parser;
use sesam::cli::commands::generate::GenerateArgs;
use sesam::cli::{Cli, Commands};

/// Environment variable with a tracing filter, e.g. `SESAM_LOG=sesam=debug`.
const LOG_ENV: &str = "SESAM_LOG";

/// Diagnostics go to stderr so derived passwords on stdout stay pipeable.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("sesam=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { force } => sesam::cli::commands::init::execute(&cli, force).await,
        Commands::Generate {
            ref domain,
            ref username,
            complexity,
            length,
            again,
            legacy,
        } => {
            let args = GenerateArgs {
                domain,
                username: username.as_deref(),
                complexity,
                length,
                again,
                legacy,
            };
            sesam::cli::commands::generate::execute(&cli, args).await
        }
        Commands::List => sesam::cli::commands::list::execute(&cli).await,
        Commands::SetLegacy {
            ref domain,
            ref password,
        } => sesam::cli::commands::legacy::execute_set(&cli, domain, password.as_deref()).await,
        Commands::ClearLegacy { ref domain } => {
            sesam::cli::commands::legacy::execute_clear(&cli, domain).await
        }
        Commands::Sync => sesam::cli::commands::sync::execute(&cli).await,
        Commands::Trust { forget } => sesam::cli::commands::trust::execute(&cli, forget).await,
        Commands::RotateKey => sesam::cli::commands::rotate::execute(&cli).await,
        Commands::Audit { last } => audit(&cli, last),
    };

    if let Err(e) = result {
        sesam::cli::output::error(&e.to_string());
        std::process::exit(1);
    }
}

#[cfg(feature = "audit-log")]
fn audit(cli: &Cli, last: usize) -> sesam::errors::Result<()> {
    sesam::cli::commands::audit_cmd::execute(cli, last)
}

#[cfg(not(feature = "audit-log"))]
fn audit(_cli: &Cli, _last: usize) -> sesam::errors::Result<()> {
    Err(sesam::errors::SesamError::CommandFailed(
        "this build has no audit log (enable the `audit-log` feature)".into(),
    ))
}
