//! Host specifier parsing and normalization.
//!
//! A host specifier has the form `[user@]host[:port]`. IPv6 literals need
//! brackets to carry a port: `[::1]:2222`.
//!
//! Ports stay strings here; they are only parsed into numbers once a
//! [`ResolvedHost`] is built for a connection attempt.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use super::ssh_config::SshConfigLookup;
use crate::config::Config;
use crate::error::{Error, Result};

static IPV6_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[?(?P<host>[0-9A-Fa-f:]+(?:%[a-z]+\d+)?)\]?(:(?P<port>\d+))?$")
        .expect("Invalid IPv6 host regex")
});

/// Explicit fields of a specifier, before any defaults are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedHost {
    /// User before the last `@`
    pub user: Option<String>,
    /// Hostname or address, empty if none could be found
    pub host: String,
    /// Port after the host
    pub port: Option<String>,
}

/// Split a specifier into its explicit parts.
///
/// Never fails; unparseable input gives empty fields.
pub fn parse(spec: &str) -> ParsedHost {
    let (user, hostport) = match spec.rsplit_once('@') {
        Some((user, rest)) => (Some(user).filter(|u| !u.is_empty()), rest),
        None => (None, spec),
    };

    let (host, port) = if hostport.matches(':').count() > 1 {
        match IPV6_RE.captures(hostport) {
            Some(caps) => (
                caps.name("host").map(|m| m.as_str()).unwrap_or(""),
                caps.name("port").map(|m| m.as_str()),
            ),
            None => ("", None),
        }
    } else {
        match hostport.rsplit_once(':') {
            Some((host, port)) => (host, Some(port).filter(|p| !p.is_empty())),
            None => (hostport, None),
        }
    };

    ParsedHost {
        user: user.map(String::from),
        host: host.to_string(),
        port: port.map(String::from),
    }
}

/// Fully defaulted `(user, host, port)`.
///
/// Resolution order:
/// - user: configured default, replaced by the ssh_config `User` only while
///   the default was never customized, replaced by an explicit user
/// - host: the ssh_config `HostName` replaces the given host
/// - port: explicit, ssh_config `Port`, configured port, default port
pub fn normalize(spec: &str, config: &Config, ssh_config: &SshConfigLookup) -> (String, String, String) {
    if spec.is_empty() {
        return (String::new(), String::new(), String::new());
    }

    let parsed = parse(spec);
    let conf = ssh_config.lookup(&parsed.host);

    let (user, host) = merge_user_host(&parsed, &conf, config);

    let port = parsed
        .port
        .or(conf.port)
        .or_else(|| config.port.clone().filter(|p| !p.is_empty()))
        .unwrap_or_else(|| config.default_port.clone());

    (user, host, port)
}

/// Like [`normalize`] but without port resolution.
pub fn normalize_user_host(
    spec: &str,
    config: &Config,
    ssh_config: &SshConfigLookup,
) -> (String, String) {
    if spec.is_empty() {
        return (String::new(), String::new());
    }

    let parsed = parse(spec);
    let conf = ssh_config.lookup(&parsed.host);
    merge_user_host(&parsed, &conf, config)
}

fn merge_user_host(
    parsed: &ParsedHost,
    conf: &super::ssh_config::SshHostConfig,
    config: &Config,
) -> (String, String) {
    let mut user = if config.user.is_empty() {
        config.local_user.clone()
    } else {
        config.user.clone()
    };

    if user == config.local_user {
        if let Some(conf_user) = &conf.user {
            user = conf_user.clone();
        }
    }

    let host = conf.hostname.clone().unwrap_or_else(|| parsed.host.clone());
    let user = parsed.user.clone().unwrap_or(user);

    (user, host)
}

/// Join parts into `user@host:port`, or `user@host` without a port.
///
/// IPv6 hosts are bracketed when a port follows.
pub fn join(user: &str, host: &str, port: Option<&str>) -> String {
    match port.filter(|p| !p.is_empty()) {
        Some(port) if is_ipv6(host) => format!("{}@[{}]:{}", user, host, port),
        Some(port) => format!("{}@{}:{}", user, host, port),
        None => format!("{}@{}", user, host),
    }
}

/// Strip defaults from a specifier: the user if it is the configured user,
/// the port if it is 22.
pub fn denormalize(spec: &str, config: &Config) -> String {
    let parsed = parse(spec);

    let user = match parsed.user {
        Some(user) if user != config.user => format!("{}@", user),
        _ => String::new(),
    };
    let port = match parsed.port {
        Some(port) if port != "22" => format!(":{}", port),
        _ => String::new(),
    };
    let host = if !port.is_empty() && is_ipv6(&parsed.host) {
        format!("[{}]", parsed.host)
    } else {
        parsed.host
    };

    format!("{}{}{}", user, host, port)
}

fn is_ipv6(host: &str) -> bool {
    host.matches(':').count() > 1
}

/// Canonical `user@host:port` form of a specifier, used as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostKey(String);

impl HostKey {
    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for HostKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for HostKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize then re-join.
pub fn canonicalize(spec: &str, config: &Config, ssh_config: &SshConfigLookup) -> HostKey {
    let (user, host, port) = normalize(spec, config, ssh_config);
    HostKey(join(&user, &host, Some(&port)))
}

/// The target of one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedHost {
    /// Login user
    pub user: String,
    /// Network hostname
    pub host: String,
    /// SSH daemon port
    pub port: u16,
    /// The specifier this was resolved from
    pub host_string: String,
}

impl ResolvedHost {
    /// Resolve a specifier against configuration.
    pub fn from_spec(spec: &str, config: &Config, ssh_config: &SshConfigLookup) -> Result<Self> {
        let (user, host, port) = normalize(spec, config, ssh_config);
        if host.is_empty() {
            return Err(Error::Config(format!("No host found in host string '{}'", spec)));
        }
        let port = port
            .parse()
            .map_err(|_| Error::Config(format!("Invalid port '{}' for host '{}'", port, spec)))?;

        Ok(Self {
            user,
            host,
            port,
            host_string: spec.to_string(),
        })
    }

    /// Canonical key for this target.
    pub fn key(&self) -> HostKey {
        HostKey(join(&self.user, &self.host, Some(&self.port.to_string())))
    }
}

impl fmt::Display for ResolvedHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key().as_str())
    }
}
