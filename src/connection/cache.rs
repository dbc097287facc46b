//! Connection cache with autoconnect.
//!
//! Entries are keyed by canonical [`HostKey`]. Every public operation
//! normalizes its specifier first, so `web1`, `alice@web1` and
//! `alice@web1:22` all address the same entry when `alice` is the default
//! user.
//!
//! Establishment is serialized per key: concurrent requests for an
//! unconnected key wait for a single attempt instead of racing. Different
//! keys connect in parallel.

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::credentials::CredentialProvider;
use super::establish::ConnectionEstablisher;
use super::gateway::GatewayResolver;
use super::host_spec::{self, HostKey, ResolvedHost};
use super::password::PasswordStore;
use super::prompt::{Prompter, TerminalPrompter};
use super::russh::RusshTransport;
use super::ssh_config::SshConfigLookup;
use super::{Session, Transport, TransportError};
use crate::config::Config;
use crate::error::Result;

/// Maps canonical host keys to live sessions.
pub struct ConnectionCache {
    config: Arc<Config>,
    ssh_config: Arc<SshConfigLookup>,
    establisher: ConnectionEstablisher,
    sessions: Mutex<HashMap<HostKey, Arc<dyn Session>>>,
    locks: Mutex<HashMap<HostKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConnectionCache {
    /// Start building a cache over `config`.
    pub fn builder(config: Arc<Config>) -> ConnectionCacheBuilder {
        ConnectionCacheBuilder::new(config)
    }

    /// The configuration this cache connects with.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// The per-host ssh config lookup.
    pub fn ssh_config(&self) -> &Arc<SshConfigLookup> {
        &self.ssh_config
    }

    /// The credential provider used for every connection.
    pub fn credentials(&self) -> &Arc<CredentialProvider> {
        self.establisher.credentials()
    }

    /// Canonical key for a specifier under this cache's configuration.
    pub fn canonicalize(&self, spec: &str) -> HostKey {
        host_spec::canonicalize(spec, &self.config, &self.ssh_config)
    }

    /// Cached session for `spec`, connecting first on a miss.
    pub async fn get(&self, spec: &str) -> Result<Arc<dyn Session>> {
        let key = self.canonicalize(spec);
        if let Some(session) = self.cached(&key) {
            return Ok(session);
        }

        let lock = self.key_lock(&key);
        let result = {
            let _guard = lock.lock().await;

            // Someone else may have connected while we waited
            if let Some(session) = self.cached(&key) {
                return Ok(session);
            }

            self.connect_locked(spec, &key).await
        };
        drop(lock);
        if result.is_err() {
            self.prune_lock(&key);
        }
        result
    }

    /// Establish a fresh session for `spec`, replacing any cached one.
    ///
    /// Gateway seeking is suppressed when `spec` is itself the configured
    /// gateway.
    pub async fn connect(&self, spec: &str) -> Result<Arc<dyn Session>> {
        let key = self.canonicalize(spec);
        let lock = self.key_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            self.connect_locked(spec, &key).await
        };
        drop(lock);
        if result.is_err() {
            self.prune_lock(&key);
        }
        result
    }

    async fn connect_locked(&self, spec: &str, key: &HostKey) -> Result<Arc<dyn Session>> {
        let seek_gateway = match self.config.gateway.as_deref() {
            Some(gateway) if !gateway.is_empty() => self.canonicalize(gateway) != *key,
            _ => true,
        };

        let target = ResolvedHost::from_spec(spec, &self.config, &self.ssh_config)?;
        let resolver = GatewayResolver::new(self);
        let gateway = if seek_gateway { Some(&resolver) } else { None };

        let session = self.establisher.establish(&target, gateway).await?;
        self.store(key.clone(), session.clone()).await;
        Ok(session)
    }

    /// Session for a gateway key, establishing it (without a gateway of its
    /// own) if absent or if `replace` is set.
    pub(crate) fn gateway_session<'a>(
        &'a self,
        key: &'a HostKey,
        replace: bool,
    ) -> BoxFuture<'a, Result<Arc<dyn Session>>> {
        async move {
            if !replace {
                if let Some(session) = self.cached(key) {
                    return Ok(session);
                }
            }

            let lock = self.key_lock(key);
            let _guard = lock.lock().await;

            if !replace {
                if let Some(session) = self.cached(key) {
                    return Ok(session);
                }
            }

            debug!(gateway = %key, "Creating new gateway connection");
            let target = ResolvedHost::from_spec(key.as_str(), &self.config, &self.ssh_config)?;
            let session = self.establisher.establish(&target, None).await?;
            self.store(key.clone(), session.clone()).await;
            Ok(session)
        }
        .boxed()
    }

    /// Whether a session is cached for `spec`.
    pub fn contains(&self, spec: &str) -> bool {
        let key = self.canonicalize(spec);
        self.sessions.lock().contains_key(&key)
    }

    /// Drop the cached session for `spec` without closing it.
    pub fn remove(&self, spec: &str) -> Option<Arc<dyn Session>> {
        let key = self.canonicalize(spec);
        let session = self.sessions.lock().remove(&key);
        self.prune_lock(&key);
        session
    }

    /// Canonical keys of every cached session, sorted.
    pub fn keys(&self) -> Vec<HostKey> {
        let mut keys: Vec<HostKey> = self.sessions.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of cached sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Close and remove every cached session, in key order.
    ///
    /// A failing close is logged and does not stop the others. Returns each
    /// key with the outcome of its close.
    pub async fn disconnect_all(&self) -> Vec<(HostKey, std::result::Result<(), TransportError>)> {
        let mut outcomes = Vec::new();

        for key in self.keys() {
            let session = self.sessions.lock().remove(&key);
            self.prune_lock(&key);
            let Some(session) = session else {
                continue;
            };

            let shown = host_spec::denormalize(key.as_str(), &self.config);
            let result = session.close().await;
            match &result {
                Ok(()) => info!(host = %key, "Disconnecting from {} ... done.", shown),
                Err(e) => warn!(host = %key, error = %e, "Disconnecting from {} ... failed.", shown),
            }
            outcomes.push((key, result));
        }

        outcomes
    }

    fn cached(&self, key: &HostKey) -> Option<Arc<dyn Session>> {
        self.sessions.lock().get(key).cloned()
    }

    fn key_lock(&self, key: &HostKey) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(key.clone()).or_default().clone()
    }

    /// Forget the establishment lock for `key` once it has no session and
    /// nobody else holds or waits on it.
    fn prune_lock(&self, key: &HostKey) {
        let mut locks = self.locks.lock();
        let idle = locks
            .get(key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle && !self.sessions.lock().contains_key(key) {
            locks.remove(key);
        }
    }

    /// Insert a session, closing the one it replaces.
    async fn store(&self, key: HostKey, session: Arc<dyn Session>) {
        let previous = self.sessions.lock().insert(key.clone(), session.clone());
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &session) {
                debug!(host = %key, "Closing replaced connection");
                if let Err(e) = previous.close().await {
                    warn!(host = %key, error = %e, "Failed to close replaced connection");
                }
            }
        }
    }
}

impl std::fmt::Debug for ConnectionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("keys", &self.keys())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ConnectionCache`].
///
/// Unset collaborators default to the russh transport, the terminal
/// prompter, a password store seeded from the config, and an ssh config
/// lookup following `use_ssh_config`.
pub struct ConnectionCacheBuilder {
    config: Arc<Config>,
    transport: Option<Arc<dyn Transport>>,
    prompter: Option<Arc<dyn Prompter>>,
    passwords: Option<Arc<PasswordStore>>,
    ssh_config: Option<Arc<SshConfigLookup>>,
    cancel: Option<CancellationToken>,
}

impl ConnectionCacheBuilder {
    /// Create a new builder
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            transport: None,
            prompter: None,
            passwords: None,
            ssh_config: None,
            cancel: None,
        }
    }

    /// Set the transport
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the prompter
    pub fn prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    /// Set the password store
    pub fn passwords(mut self, passwords: Arc<PasswordStore>) -> Self {
        self.passwords = Some(passwords);
        self
    }

    /// Set the ssh config lookup
    pub fn ssh_config(mut self, ssh_config: Arc<SshConfigLookup>) -> Self {
        self.ssh_config = Some(ssh_config);
        self
    }

    /// Set the token that aborts prompts
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Build the cache
    pub fn build(self) -> ConnectionCache {
        let config = self.config;
        let ssh_config = self
            .ssh_config
            .unwrap_or_else(|| Arc::new(SshConfigLookup::from_config(&config)));
        let passwords = self
            .passwords
            .unwrap_or_else(|| Arc::new(PasswordStore::from_config(&config)));
        let prompter = self
            .prompter
            .unwrap_or_else(|| Arc::new(TerminalPrompter::new()));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(RusshTransport::new()));

        let credentials = Arc::new(CredentialProvider::new(
            config.clone(),
            ssh_config.clone(),
            passwords,
            prompter,
            self.cancel.unwrap_or_default(),
        ));
        let establisher = ConnectionEstablisher::new(config.clone(), transport, credentials);

        ConnectionCache {
            config,
            ssh_config,
            establisher,
            sessions: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }
}
