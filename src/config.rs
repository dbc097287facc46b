//! Configuration module for Hostlink
//!
//! Holds every process-wide setting the connection core reads. The
//! configuration is loaded once at startup from:
//! - Default values
//! - The first existing config file (explicit path, `$HOSTLINK_CONFIG`,
//!   `~/.hostlink.toml`, `./hostlink.toml`)
//! - Environment variables
//!
//! After loading it is shared read-only as `Arc<Config>`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Port used when nothing else specifies one.
pub const DEFAULT_PORT: &str = "22";

/// Default per-attempt socket timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// One key file path or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyFilenames {
    /// A single path (possibly empty)
    One(String),
    /// Several paths, tried in order
    Many(Vec<String>),
}

impl Default for KeyFilenames {
    fn default() -> Self {
        KeyFilenames::Many(Vec::new())
    }
}

impl KeyFilenames {
    /// Coerce into a list, dropping empty entries.
    pub fn to_vec(&self) -> Vec<String> {
        let all = match self {
            KeyFilenames::One(path) => vec![path.clone()],
            KeyFilenames::Many(paths) => paths.clone(),
        };
        all.into_iter().filter(|p| !p.is_empty()).collect()
    }
}

/// Main configuration structure
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default remote user
    pub user: String,

    /// The user running this process; `user` starts out equal to it
    pub local_user: String,

    /// Globally configured port (overrides `default_port`)
    pub port: Option<String>,

    /// Port of last resort
    pub default_port: String,

    /// Gateway host specifier all connections tunnel through
    pub gateway: Option<String>,

    /// Shell command whose stdio becomes the transport socket
    pub proxy_command: Option<String>,

    /// Maximum number of attempts for transient connection failures
    pub connection_attempts: u32,

    /// Per-attempt TCP connect timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Timeout waiting for the SSH protocol banner
    #[serde(with = "humantime_serde")]
    pub banner_timeout: Option<Duration>,

    /// Timeout for the authentication phase
    #[serde(with = "humantime_serde")]
    pub auth_timeout: Option<Duration>,

    /// Keepalive interval, zero disables it
    #[serde(with = "humantime_serde")]
    pub keepalive: Duration,

    /// Skip loading the user's known_hosts file
    pub disable_known_hosts: bool,

    /// Refuse hosts that are not in known_hosts
    pub reject_unknown_hosts: bool,

    /// Extra system-wide known_hosts file
    pub system_known_hosts: Option<PathBuf>,

    /// Consult the OpenSSH client config for per-host settings
    pub use_ssh_config: bool,

    /// Location of the OpenSSH client config
    pub ssh_config_path: String,

    /// In-memory private key text
    pub key: Option<String>,

    /// Private key file path(s)
    pub key_filename: KeyFilenames,

    /// Do not use an SSH agent
    pub no_agent: bool,

    /// Do not look for default keys in ~/.ssh
    pub no_keys: bool,

    /// Fail instead of prompting interactively
    pub abort_on_prompts: bool,

    /// Default login password
    pub password: Option<String>,

    /// Login passwords by canonical host key
    pub passwords: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        let local_user = local_user();
        Self {
            user: local_user.clone(),
            local_user,
            port: None,
            default_port: DEFAULT_PORT.to_string(),
            gateway: None,
            proxy_command: None,
            connection_attempts: 1,
            timeout: DEFAULT_TIMEOUT,
            banner_timeout: None,
            auth_timeout: None,
            keepalive: Duration::ZERO,
            disable_known_hosts: false,
            reject_unknown_hosts: false,
            system_known_hosts: None,
            use_ssh_config: false,
            ssh_config_path: "~/.ssh/config".to_string(),
            key: None,
            key_filename: KeyFilenames::default(),
            no_agent: false,
            no_keys: false,
            abort_on_prompts: false,
            password: None,
            passwords: HashMap::new(),
        }
    }
}

// Debug implementation that redacts secrets
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("user", &self.user)
            .field("port", &self.port)
            .field("default_port", &self.default_port)
            .field("gateway", &self.gateway)
            .field("proxy_command", &self.proxy_command)
            .field("connection_attempts", &self.connection_attempts)
            .field("timeout", &self.timeout)
            .field("keepalive", &self.keepalive)
            .field("use_ssh_config", &self.use_ssh_config)
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .field("key_filename", &self.key_filename)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("passwords", &self.passwords.len())
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(path) = Self::get_config_paths(config_path)
            .into_iter()
            .find(|p| p.exists())
        {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Get the list of configuration file paths to check, highest priority first
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        if let Some(path) = explicit_path {
            return vec![path.clone()];
        }

        let mut paths = Vec::new();

        if let Ok(env_config) = std::env::var("HOSTLINK_CONFIG") {
            paths.push(PathBuf::from(env_config));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".hostlink.toml"));
        }

        paths.push(PathBuf::from("hostlink.toml"));

        paths
    }

    /// Load from a specific file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let parse_err = |message: String| Error::ConfigParse {
            path: path.to_path_buf(),
            message,
        };

        // Determine format based on extension
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string())),
            "json" => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string())),
            "toml" => toml::from_str(&content).map_err(|e| parse_err(e.to_string())),
            _ => toml::from_str(&content)
                .or_else(|_| serde_yaml::from_str(&content))
                .map_err(|e| parse_err(e.to_string())),
        }
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // HOSTLINK_USER
        if let Ok(user) = std::env::var("HOSTLINK_USER") {
            if !user.is_empty() {
                self.user = user;
            }
        }

        // HOSTLINK_PORT
        if let Ok(port) = std::env::var("HOSTLINK_PORT") {
            if !port.is_empty() {
                self.port = Some(port);
            }
        }

        // HOSTLINK_GATEWAY
        if let Ok(gateway) = std::env::var("HOSTLINK_GATEWAY") {
            self.gateway = Some(gateway).filter(|g| !g.is_empty());
        }

        // HOSTLINK_CONNECTION_ATTEMPTS
        if let Ok(attempts) = std::env::var("HOSTLINK_CONNECTION_ATTEMPTS") {
            if let Ok(n) = attempts.parse() {
                self.connection_attempts = n;
            }
        }

        // HOSTLINK_TIMEOUT (seconds)
        if let Ok(timeout) = std::env::var("HOSTLINK_TIMEOUT") {
            if let Ok(n) = timeout.parse() {
                self.timeout = Duration::from_secs(n);
            }
        }

        // HOSTLINK_KEY_FILENAME
        if let Ok(file) = std::env::var("HOSTLINK_KEY_FILENAME") {
            self.key_filename = KeyFilenames::One(file);
        }
    }

    /// True once the default user was changed away from the local user.
    pub fn user_customized(&self) -> bool {
        self.user != self.local_user
    }

    /// Attempt budget, never less than one.
    pub fn attempt_budget(&self) -> u32 {
        self.connection_attempts.max(1)
    }
}

/// Get the current username
fn local_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "root".to_string())
}
