//! OpenSSH client config lookup.
//!
//! The config file is read at most once per lookup object. Lookups by host
//! merge every matching `Host` block in file order: the first value seen for
//! a key wins, except `IdentityFile`, which accumulates.

use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::Config;

static HOST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(host|match)(?:\s*=\s*|\s+)(.+)$").expect("Invalid host regex"));

static KV_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\w+)(?:\s*=\s*|\s+)(.+)$").expect("Invalid option regex"));

/// Settings that apply to one host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshHostConfig {
    /// `User`
    pub user: Option<String>,
    /// `HostName`, with `%h` expanded
    pub hostname: Option<String>,
    /// `Port`
    pub port: Option<String>,
    /// Every `IdentityFile`, in file order
    pub identityfile: Vec<String>,
    /// `ProxyCommand`, tokens unexpanded
    pub proxycommand: Option<String>,
    /// `ProxyJump`
    pub proxyjump: Option<String>,
}

/// A parsed `Host` block.
#[derive(Debug, Clone)]
struct HostBlock {
    /// Empty for `Match` blocks, which never match
    patterns: Vec<String>,
    options: Vec<(String, String)>,
}

impl HostBlock {
    fn matches(&self, host: &str) -> bool {
        let mut matched = false;
        for pattern in &self.patterns {
            if let Some(negated) = pattern.strip_prefix('!') {
                if matches_pattern(negated, host) {
                    return false;
                }
            } else if matches_pattern(pattern, host) {
                matched = true;
            }
        }
        matched
    }
}

/// SSH config file parser
pub struct SshConfigParser;

impl SshConfigParser {
    /// Parse SSH config content into blocks.
    ///
    /// Options before the first `Host` line belong to an implicit `Host *`.
    fn parse(content: &str) -> Vec<HostBlock> {
        let mut blocks = vec![HostBlock {
            patterns: vec!["*".to_string()],
            options: Vec::new(),
        }];

        for line in content.lines() {
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(captures) = HOST_RE.captures(line) {
                let keyword = captures[1].to_lowercase();
                let patterns = if keyword == "host" {
                    captures[2]
                        .split_whitespace()
                        .map(|p| p.trim_matches('"').to_string())
                        .collect()
                } else {
                    debug!(criteria = %&captures[2], "Ignoring unsupported Match block");
                    Vec::new()
                };
                blocks.push(HostBlock {
                    patterns,
                    options: Vec::new(),
                });
                continue;
            }

            if let Some(captures) = KV_RE.captures(line) {
                let key = captures[1].to_lowercase();
                let value = captures[2].trim().trim_matches('"').to_string();
                if let Some(block) = blocks.last_mut() {
                    block.options.push((key, value));
                }
            }
        }

        blocks
    }
}

/// Memoized per-host config lookup.
///
/// A disabled lookup answers every query with an empty [`SshHostConfig`].
#[derive(Debug, Default)]
pub struct SshConfigLookup {
    path: Option<PathBuf>,
    blocks: OnceCell<Vec<HostBlock>>,
}

impl SshConfigLookup {
    /// A lookup that never returns anything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Lookup configured from `use_ssh_config` and `ssh_config_path`.
    pub fn from_config(config: &Config) -> Self {
        if !config.use_ssh_config {
            return Self::disabled();
        }
        Self::from_path(expand_path(&config.ssh_config_path))
    }

    /// Lookup backed by a file, read on first use.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            blocks: OnceCell::new(),
        }
    }

    /// Lookup over already loaded config text.
    pub fn from_content(content: &str) -> Self {
        Self {
            path: None,
            blocks: OnceCell::with_value(SshConfigParser::parse(content)),
        }
    }

    /// Whether lookups can return anything.
    pub fn is_enabled(&self) -> bool {
        self.path.is_some() || self.blocks.get().is_some()
    }

    fn blocks(&self) -> &[HostBlock] {
        self.blocks.get_or_init(|| match &self.path {
            Some(path) => load_blocks(path),
            None => Vec::new(),
        })
    }

    /// Settings for `host` (a bare hostname, not a full specifier).
    pub fn lookup(&self, host: &str) -> SshHostConfig {
        let mut result = SshHostConfig::default();

        for block in self.blocks().iter().filter(|b| b.matches(host)) {
            for (key, value) in &block.options {
                match key.as_str() {
                    "user" => set_once(&mut result.user, value),
                    "hostname" => set_once(&mut result.hostname, value),
                    "port" => set_once(&mut result.port, value),
                    "proxycommand" => set_once(&mut result.proxycommand, value),
                    "proxyjump" => set_once(&mut result.proxyjump, value),
                    "identityfile" => result.identityfile.push(value.clone()),
                    _ => {}
                }
            }
        }

        if let Some(hostname) = result.hostname.as_mut() {
            *hostname = hostname.replace("%h", host);
        }

        result
    }
}

fn set_once(slot: &mut Option<String>, value: &str) {
    if slot.is_none() {
        *slot = Some(value.to_string());
    }
}

fn load_blocks(path: &Path) -> Vec<HostBlock> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            debug!(path = %path.display(), "Loaded SSH config");
            SshConfigParser::parse(&content)
        }
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Unable to load SSH config file '{}'",
                path.display()
            );
            Vec::new()
        }
    }
}

/// Match a host against a pattern (supports * and ?)
fn matches_pattern(pattern: &str, host: &str) -> bool {
    let regex_pattern = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");

    Regex::new(&format!("^{}$", regex_pattern))
        .map(|re| re.is_match(host))
        .unwrap_or(false)
}

/// Helper to expand paths with ~ and environment variables
pub fn expand_path(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or_else(|_| path.into());
    PathBuf::from(expanded.as_ref())
}
