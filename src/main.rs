//! Hostlink - cached, gateway-aware SSH connections
//!
//! This is the main entry point for the Hostlink CLI.

mod cli;

use anyhow::Result;
use cli::commands::{CommandContext, Runnable};
use cli::{Cli, Commands};
use hostlink::config::Config;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    if cli.verbosity() >= 2 {
        eprintln!("Hostlink v{}", VERSION);
    }

    // Load configuration, then layer the command line on top
    let mut config = match Config::load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(e.exit_code());
        }
    };
    cli.apply_overrides(&mut config);

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let mut ctx = CommandContext::new(&cli, config, cancel);

    let exit_code = match &cli.command {
        Commands::Normalize(args) => args.run(&mut ctx).await?,
        Commands::Connect(args) => args.run(&mut ctx).await?,
    };

    std::process::exit(exit_code);
}

/// Initialize logging based on verbosity level
fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity >= 3),
        )
        .with(env_filter)
        .init();
}

/// First Ctrl-C cancels the running command, a second one exits at once.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::debug!("Interrupt received, aborting");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}
