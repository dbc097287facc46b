//! Password store.
//!
//! Login and sudo passwords keyed by canonical `user@host:port`, with
//! process-wide defaults behind them. This is the only piece of shared state
//! the connection layer mutates after startup.

use parking_lot::RwLock;
use std::collections::HashMap;

use super::host_spec::join;
use crate::config::Config;

/// A password held as bytes so it can be zeroed.
#[derive(Clone)]
struct Secret(Vec<u8>);

impl Secret {
    fn new(value: &str) -> Self {
        Secret(value.as_bytes().to_vec())
    }

    fn reveal(&self) -> Option<String> {
        String::from_utf8(self.0.clone()).ok()
    }

    /// Clear the password from memory
    fn clear(&mut self) {
        for byte in &mut self.0 {
            *byte = 0;
        }
        self.0.clear();
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.clear();
    }
}

#[derive(Default)]
struct Passwords {
    login: HashMap<String, Secret>,
    sudo: HashMap<String, Secret>,
    default_login: Option<Secret>,
    default_sudo: Option<Secret>,
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Lookups that found a password
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
}

/// Thread-safe password store
#[derive(Default)]
pub struct PasswordStore {
    passwords: RwLock<Passwords>,
    stats: RwLock<StoreStats>,
}

impl PasswordStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the configured default password and per-host passwords.
    pub fn from_config(config: &Config) -> Self {
        let store = Self::new();
        {
            let mut passwords = store.passwords.write();
            passwords.default_login = config.password.as_deref().map(Secret::new);
            for (key, value) in &config.passwords {
                passwords.login.insert(key.clone(), Secret::new(value));
            }
        }
        store
    }

    /// Password for `user@host:port`.
    ///
    /// With `login_only` this is the login password (or the default login
    /// password). Otherwise a sudo password for the key, or the default sudo
    /// password, takes precedence over the login password.
    pub fn get(&self, user: &str, host: &str, port: &str, login_only: bool) -> Option<String> {
        let key = join(user, host, Some(port));
        let passwords = self.passwords.read();

        let login = passwords
            .login
            .get(&key)
            .or(passwords.default_login.as_ref());
        let found = if login_only {
            login
        } else {
            passwords
                .sudo
                .get(&key)
                .or(passwords.default_sudo.as_ref())
                .or(login)
        };
        let value = found.and_then(Secret::reveal);

        let mut stats = self.stats.write();
        if value.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }

        value
    }

    /// Store the login password for `user@host:port`; it also becomes the
    /// default login password. Last write wins.
    pub fn set(&self, user: &str, host: &str, port: &str, value: &str) {
        let key = join(user, host, Some(port));
        let mut passwords = self.passwords.write();
        passwords.login.insert(key, Secret::new(value));
        passwords.default_login = Some(Secret::new(value));
    }

    /// Store a sudo password for `user@host:port`.
    pub fn set_sudo(&self, user: &str, host: &str, port: &str, value: &str) {
        let key = join(user, host, Some(port));
        self.passwords.write().sudo.insert(key, Secret::new(value));
    }

    /// Set the sudo password used when no per-host one exists.
    pub fn set_default_sudo(&self, value: &str) {
        self.passwords.write().default_sudo = Some(Secret::new(value));
    }

    /// Forget every password for `user@host:port`.
    pub fn remove(&self, user: &str, host: &str, port: &str) -> bool {
        let key = join(user, host, Some(port));
        let mut passwords = self.passwords.write();
        let login = passwords.login.remove(&key).is_some();
        let sudo = passwords.sudo.remove(&key).is_some();
        login || sudo
    }

    /// Forget everything, defaults included.
    pub fn clear(&self) {
        *self.passwords.write() = Passwords::default();
    }

    /// Number of per-host entries
    pub fn len(&self) -> usize {
        let passwords = self.passwords.read();
        passwords.login.len() + passwords.sudo.len()
    }

    /// Whether there are no per-host entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lookup statistics
    pub fn stats(&self) -> StoreStats {
        self.stats.read().clone()
    }
}

// Debug implementation that redacts passwords
impl std::fmt::Debug for PasswordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let passwords = self.passwords.read();
        let mut hosts: Vec<&String> = passwords.login.keys().chain(passwords.sudo.keys()).collect();
        hosts.sort();
        hosts.dedup();
        f.debug_struct("PasswordStore")
            .field("hosts", &hosts)
            .field("default_login", &passwords.default_login.as_ref().map(|_| "[REDACTED]"))
            .field("default_sudo", &passwords.default_sudo.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
