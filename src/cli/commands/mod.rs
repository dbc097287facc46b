//! Subcommands module for Hostlink CLI

pub mod connect;
pub mod normalize;

use crate::cli::output::OutputFormatter;
use anyhow::Result;
use hostlink::config::Config;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration with command-line overrides applied
    pub config: Arc<Config>,
    /// Output formatter
    pub output: OutputFormatter,
    /// Cancelled on Ctrl-C
    pub cancel: CancellationToken,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, config: Config, cancel: CancellationToken) -> Self {
        let output = OutputFormatter::new(!cli.no_color, cli.json, cli.verbosity());

        Self {
            config: Arc::new(config),
            output,
            cancel,
        }
    }
}

/// Trait for runnable commands
#[async_trait::async_trait]
pub trait Runnable {
    /// Execute the command, returning the process exit code
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32>;
}
