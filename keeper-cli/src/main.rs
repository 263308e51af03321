//! Entry point for the `bheekeeper` binary.

use clap::Parser;
use keeper_cli::{commands, Cli};
use keeper_executor::{HostConfig, Keeper, SystemRunner};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout carries command output and the serial console.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let config = HostConfig::from_env();
    tracing::debug!(?config, "host configuration");
    let keeper = Keeper::new(SystemRunner::new(), config);

    let mut stdout = std::io::stdout();
    if let Err(e) = commands::dispatch(&keeper, cli.command, &mut stdout).await {
        tracing::error!(error = %e, "command failed");
        std::process::exit(e.exit_code());
    }
}
