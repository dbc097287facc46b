//! CLI module for Hostlink
//!
//! Argument parsing, config overrides and subcommand dispatch for the
//! `hostlink` binary.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use hostlink::config::{Config, KeyFilenames};
use std::path::PathBuf;
use std::time::Duration;

/// Hostlink - cached, gateway-aware SSH connections
#[derive(Parser, Debug, Clone)]
#[command(name = "hostlink")]
#[command(author = "Hostlink Contributors")]
#[command(version)]
#[command(about = "Normalize host strings and establish SSH connections", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "HOSTLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Default login user
    #[arg(short = 'u', long, global = true)]
    pub user: Option<String>,

    /// Default SSH port
    #[arg(short = 'p', long, global = true)]
    pub port: Option<String>,

    /// Gateway host to tunnel every connection through
    #[arg(short = 'g', long, global = true)]
    pub gateway: Option<String>,

    /// Private key file (repeatable)
    #[arg(short = 'i', long = "identity", global = true, action = clap::ArgAction::Append)]
    pub key_filename: Vec<PathBuf>,

    /// Connection attempts before giving up
    #[arg(short = 'a', long = "attempts", global = true)]
    pub connection_attempts: Option<u32>,

    /// TCP connect timeout in seconds
    #[arg(short = 't', long, global = true)]
    pub timeout: Option<u64>,

    /// Don't use the SSH agent
    #[arg(long, global = true)]
    pub no_agent: bool,

    /// Don't look for keys in ~/.ssh
    #[arg(long, global = true)]
    pub no_keys: bool,

    /// Fail instead of prompting for passwords
    #[arg(long, global = true)]
    pub abort_on_prompts: bool,

    /// Read per-host settings from the SSH client config
    #[arg(long, global = true)]
    pub ssh_config: bool,

    /// Alternate SSH client config path (implies --ssh-config)
    #[arg(long, global = true, value_name = "PATH")]
    pub ssh_config_path: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Output JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Print the canonical key of each host string (no network)
    Normalize(commands::normalize::NormalizeArgs),

    /// Connect to each host through the cache, then disconnect everything
    Connect(commands::connect::ConnectArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// Apply command-line overrides on top of a loaded config.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(user) = &self.user {
            config.user = user.clone();
        }
        if let Some(port) = &self.port {
            config.port = Some(port.clone());
        }
        if let Some(gateway) = &self.gateway {
            config.gateway = Some(gateway.clone());
        }
        if !self.key_filename.is_empty() {
            config.key_filename = KeyFilenames::Many(
                self.key_filename
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect(),
            );
        }
        if let Some(attempts) = self.connection_attempts {
            config.connection_attempts = attempts;
        }
        if let Some(secs) = self.timeout {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(path) = &self.ssh_config_path {
            config.ssh_config_path = path.clone();
            config.use_ssh_config = true;
        }

        config.no_agent |= self.no_agent;
        config.no_keys |= self.no_keys;
        config.abort_on_prompts |= self.abort_on_prompts;
        config.use_ssh_config |= self.ssh_config;
    }
}
