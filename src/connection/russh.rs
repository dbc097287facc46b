//! Russh transport
//!
//! The production [`Transport`]: DNS and TCP (or a supplied tunnel socket),
//! the SSH handshake with known_hosts verification, and authentication.

use async_trait::async_trait;
use parking_lot::Mutex;
use russh::client::{Handle, Handler};
use russh::keys::key::PublicKey;
use russh_keys::agent::client::AgentClient;
use russh_keys::key::KeyPair;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::host_spec;
use super::{ConnectRequest, Session, Transport, TransportError, TunnelSocket};

/// Result of host key verification
#[derive(Debug, Clone, PartialEq)]
enum HostKeyStatus {
    /// Key matches a known_hosts entry
    Verified,
    /// Host not found in known_hosts
    Unknown,
    /// Key doesn't match the known_hosts entry (potential MITM attack)
    Mismatch,
}

/// Errors raised inside the russh client handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Error from russh itself
    #[error(transparent)]
    Russh(#[from] russh::Error),

    /// Server key differs from known_hosts
    #[error("Host key for {0} did not match known_hosts")]
    HostKeyMismatch(String),

    /// Server key missing from known_hosts and unknown hosts are rejected
    #[error("Server {0} not found in known_hosts")]
    UnknownHost(String),
}

impl From<russh::Error> for TransportError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::IO(e) if e.kind() == io::ErrorKind::TimedOut => TransportError::Timeout,
            russh::Error::IO(e) => TransportError::Socket(e),
            russh::Error::ChannelOpenFailure(reason) => {
                TransportError::Channel(format!("{:?}", reason))
            }
            russh::Error::UnknownKey => TransportError::UnknownHost("server".to_string()),
            russh::Error::Keys(e) => TransportError::KeyLoad(e.to_string()),
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

impl From<HandlerError> for TransportError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::Russh(e) => e.into(),
            HandlerError::HostKeyMismatch(host) => TransportError::BadHostKey(host),
            HandlerError::UnknownHost(host) => TransportError::UnknownHost(host),
        }
    }
}

/// Errors before the server's identification line arrived are banner failures.
fn handshake_error(err: HandlerError) -> TransportError {
    match err {
        HandlerError::Russh(russh::Error::Disconnect) => {
            TransportError::Banner("connection closed by remote host".to_string())
        }
        HandlerError::Russh(russh::Error::IO(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
            TransportError::Banner(e.to_string())
        }
        other => other.into(),
    }
}

/// A parsed entry from a known_hosts file
#[derive(Debug, Clone)]
struct KnownHostEntry {
    /// Hostnames/patterns this entry applies to
    patterns: Vec<String>,
    /// The public key
    key: PublicKey,
}

/// Known host keys from the system-wide and user files.
#[derive(Debug, Clone, Default)]
struct KnownHosts {
    entries: Vec<KnownHostEntry>,
}

impl KnownHosts {
    fn load(system: Option<&Path>, user: bool) -> Self {
        let mut entries = Vec::new();

        if let Some(path) = system {
            entries.extend(Self::load_file(path));
        }
        if user {
            if let Some(path) = dirs::home_dir().map(|h| h.join(".ssh").join("known_hosts")) {
                entries.extend(Self::load_file(&path));
            }
        }

        debug!(entry_count = %entries.len(), "Loaded known_hosts entries");
        Self { entries }
    }

    fn load_file(path: &Path) -> Vec<KnownHostEntry> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Failed to read known_hosts file");
                return Vec::new();
            }
        };

        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(Self::parse_line)
            .collect()
    }

    /// Parse `hostname[,hostname...] keytype base64key [comment]`.
    ///
    /// Hashed hostnames and `@` markers are skipped.
    fn parse_line(line: &str) -> Option<KnownHostEntry> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 || parts[0].starts_with('@') || parts[0].starts_with('|') {
            return None;
        }

        let patterns: Vec<String> = parts[0].split(',').map(|s| s.to_string()).collect();
        let key_type = parts[1];

        let key_bytes =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, parts[2]).ok()?;

        let key = match russh::keys::key::parse_public_key(&key_bytes, None) {
            Ok(k) => k,
            Err(_) => {
                trace!(key_type = %key_type, "Failed to parse key, skipping entry");
                return None;
            }
        };

        Some(KnownHostEntry { patterns, key })
    }

    /// Whether an entry's pattern list covers the host. A matching negated
    /// pattern excludes the entry even when a positive pattern also matches.
    fn entry_applies(patterns: &[String], host: &str, port: u16) -> bool {
        let mut matched = false;
        for pattern in patterns {
            if let Some(negated) = pattern.strip_prefix('!') {
                if Self::pattern_matches(negated, host, port) {
                    return false;
                }
            } else if Self::pattern_matches(pattern, host, port) {
                matched = true;
            }
        }
        matched
    }

    /// Check if a single positive pattern matches the host
    fn pattern_matches(pattern: &str, host: &str, port: u16) -> bool {
        // [host]:port format
        if pattern.starts_with('[') {
            if let Some(end_bracket) = pattern.find(']') {
                let pattern_host = &pattern[1..end_bracket];
                let pattern_port = pattern
                    .get(end_bracket + 2..)
                    .and_then(|p| p.parse::<u16>().ok())
                    .unwrap_or(22);
                return pattern_port == port && Self::wildcard_match(pattern_host, host);
            }
        }

        // Bare patterns imply port 22
        port == 22 && Self::wildcard_match(pattern, host)
    }

    /// Simple wildcard matching for known_hosts patterns
    fn wildcard_match(pattern: &str, text: &str) -> bool {
        let mut pattern_chars = pattern.chars().peekable();
        let mut text_chars = text.chars().peekable();

        while let Some(pc) = pattern_chars.next() {
            match pc {
                '*' => {
                    if pattern_chars.peek().is_none() {
                        return true;
                    }
                    let rest_pattern: String = pattern_chars.collect();
                    let rest_text: String = text_chars.collect();
                    return rest_text
                        .char_indices()
                        .map(|(i, _)| i)
                        .chain(std::iter::once(rest_text.len()))
                        .any(|i| Self::wildcard_match(&rest_pattern, &rest_text[i..]));
                }
                '?' => {
                    if text_chars.next().is_none() {
                        return false;
                    }
                }
                c => {
                    if text_chars.next() != Some(c) {
                        return false;
                    }
                }
            }
        }

        text_chars.next().is_none()
    }

    /// Verify a server key. Only entries of the same key type are compared.
    fn verify(&self, host: &str, port: u16, server_key: &PublicKey) -> HostKeyStatus {
        let mut mismatch = false;

        for entry in &self.entries {
            if entry.key.name() != server_key.name() {
                continue;
            }
            if Self::entry_applies(&entry.patterns, host, port) {
                if entry.key.fingerprint() == server_key.fingerprint() {
                    return HostKeyStatus::Verified;
                }
                mismatch = true;
            }
        }

        if mismatch {
            HostKeyStatus::Mismatch
        } else {
            HostKeyStatus::Unknown
        }
    }
}

/// Client handler for russh with host key verification
pub struct ClientHandler {
    host: String,
    port: u16,
    known_hosts: KnownHosts,
    reject_unknown: bool,
}

#[async_trait]
impl Handler for ClientHandler {
    type Error = HandlerError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match self
            .known_hosts
            .verify(&self.host, self.port, server_public_key)
        {
            HostKeyStatus::Verified => {
                debug!(host = %self.host, "Host key verified against known_hosts");
                Ok(true)
            }
            HostKeyStatus::Unknown if self.reject_unknown => {
                warn!(host = %self.host, "Host not found in known_hosts, rejecting");
                Err(HandlerError::UnknownHost(self.host.clone()))
            }
            HostKeyStatus::Unknown => {
                debug!(
                    host = %self.host,
                    fingerprint = %server_public_key.fingerprint(),
                    "Host not found in known_hosts, accepting"
                );
                Ok(true)
            }
            HostKeyStatus::Mismatch => {
                warn!(
                    host = %self.host,
                    "HOST KEY VERIFICATION FAILED! Server key does not match known_hosts entry."
                );
                Err(HandlerError::HostKeyMismatch(self.host.clone()))
            }
        }
    }
}

/// Get default identity files to try
fn default_identity_files() -> Vec<PathBuf> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    let ssh_dir = home.join(".ssh");

    ["id_ed25519", "id_ecdsa", "id_rsa", "id_dsa"]
        .iter()
        .map(|name| ssh_dir.join(name))
        .filter(|p| p.exists())
        .collect()
}

/// SSH transport backed by russh.
#[derive(Debug, Clone, Default)]
pub struct RusshTransport;

impl RusshTransport {
    /// Create a new russh transport
    pub fn new() -> Self {
        Self
    }

    async fn open_socket(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, TransportError> {
        let addrs: Vec<_> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| TransportError::NameResolution(format!("{}: {}", host, e)))?
            .collect();

        let mut last_error = None;
        for addr in addrs {
            match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
                Err(_) => last_error = Some(TransportError::Timeout),
                Ok(Err(e)) => last_error = Some(TransportError::Socket(e)),
                Ok(Ok(socket)) => {
                    // Enable TCP_NODELAY for lower latency
                    socket.set_nodelay(true)?;
                    return Ok(socket);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TransportError::NameResolution(format!("{}: no addresses found", host))
        }))
    }

    async fn handshake(
        request: &ConnectRequest,
        sock: TunnelSocket,
        handler: ClientHandler,
    ) -> Result<Handle<ClientHandler>, TransportError> {
        let config = Arc::new(russh::client::Config::default());
        let handshake = russh::client::connect_stream(config, sock, handler);

        let result = match request.banner_timeout {
            Some(limit) => tokio::time::timeout(limit, handshake).await.map_err(|_| {
                TransportError::Banner(format!("timed out after {:?}", limit))
            })?,
            None => handshake.await,
        };

        result.map_err(handshake_error)
    }

    /// Try every configured method until one is accepted.
    async fn authenticate(
        session: &mut Handle<ClientHandler>,
        request: &ConnectRequest,
    ) -> Result<(), TransportError> {
        let user = request.user.as_str();
        let passphrase = request.password.as_deref().filter(|p| !p.is_empty());

        // 1. In-memory key
        if let Some(key) = &request.pkey {
            if session.authenticate_publickey(user, key.clone()).await? {
                debug!("Authenticated using in-memory key");
                return Ok(());
            }
        }

        // 2. Explicit key files
        let mut encrypted: Option<PathBuf> = None;
        for key_path in &request.key_filenames {
            if Self::try_key_auth(session, user, key_path, passphrase, &mut encrypted).await? {
                debug!(key = %key_path.display(), "Authenticated using key");
                return Ok(());
            }
        }

        // 3. SSH agent
        if request.allow_agent && Self::try_agent_auth(session, user).await {
            debug!("Authenticated using SSH agent");
            return Ok(());
        }

        // 4. Default identity files from ~/.ssh/
        if request.look_for_keys {
            for key_path in default_identity_files() {
                if Self::try_key_auth(session, user, &key_path, passphrase, &mut encrypted).await? {
                    debug!(key = %key_path.display(), "Authenticated using key");
                    return Ok(());
                }
            }
        }

        // 5. Password
        if let Some(password) = request.password.as_deref() {
            if session.authenticate_password(user, password).await? {
                debug!("Authenticated using password");
                return Ok(());
            }
        }

        match encrypted {
            Some(path) if passphrase.is_none() => {
                Err(TransportError::PasswordRequired(path.display().to_string()))
            }
            _ => Err(TransportError::Authentication("Authentication failed.".to_string())),
        }
    }

    /// Try SSH agent authentication
    ///
    /// Connects to the agent via SSH_AUTH_SOCK and offers each identity.
    async fn try_agent_auth(session: &mut Handle<ClientHandler>, user: &str) -> bool {
        let mut agent = match AgentClient::connect_env().await {
            Ok(agent) => agent,
            Err(e) => {
                trace!(error = %e, "No SSH agent available");
                return false;
            }
        };

        let identities = match agent.request_identities().await {
            Ok(ids) => ids,
            Err(e) => {
                debug!(error = %e, "Failed to get agent identities");
                return false;
            }
        };

        debug!(identity_count = %identities.len(), "Found SSH agent identities");

        for identity in identities {
            let (returned_agent, result) = session
                .authenticate_future(user, identity.clone(), agent)
                .await;
            agent = returned_agent;

            match result {
                Ok(true) => return true,
                Ok(false) => trace!("Identity rejected, trying next"),
                Err(e) => trace!(error = %e, "Agent authentication attempt failed"),
            }
        }

        false
    }

    /// Try one key file. Encrypted keys without a passphrase are recorded
    /// in `encrypted` and skipped.
    async fn try_key_auth(
        session: &mut Handle<ClientHandler>,
        user: &str,
        key_path: &Path,
        passphrase: Option<&str>,
        encrypted: &mut Option<PathBuf>,
    ) -> Result<bool, TransportError> {
        if !key_path.exists() {
            trace!(key = %key_path.display(), "Key file not found");
            return Ok(false);
        }

        let key_pair: KeyPair = match russh_keys::load_secret_key(key_path, passphrase) {
            Ok(key) => key,
            Err(russh_keys::Error::KeyIsEncrypted) => {
                debug!(key = %key_path.display(), "Key is encrypted, passphrase needed");
                encrypted.get_or_insert_with(|| key_path.to_path_buf());
                return Ok(false);
            }
            Err(e) => {
                debug!(key = %key_path.display(), error = %e, "Failed to load key");
                return Ok(false);
            }
        };

        Ok(session.authenticate_publickey(user, Arc::new(key_pair)).await?)
    }
}

#[async_trait]
impl Transport for RusshTransport {
    async fn connect(&self, mut request: ConnectRequest) -> Result<Arc<dyn Session>, TransportError> {
        let sock = match request.sock.take() {
            Some(sock) => {
                debug!(host = %request.host, via = %sock.label(), "Connecting over tunnel socket");
                sock
            }
            None => {
                let tcp = Self::open_socket(&request.host, request.port, request.timeout).await?;
                TunnelSocket::new(format!("tcp {}:{}", request.host, request.port), tcp)
            }
        };

        let handler = ClientHandler {
            host: request.host.clone(),
            port: request.port,
            known_hosts: KnownHosts::load(
                request.system_known_hosts.as_deref(),
                request.load_known_hosts,
            ),
            reject_unknown: request.reject_unknown_hosts,
        };

        let mut handle = Self::handshake(&request, sock, handler).await?;

        let auth = Self::authenticate(&mut handle, &request);
        match request.auth_timeout {
            Some(limit) => tokio::time::timeout(limit, auth).await.map_err(|_| {
                TransportError::Authentication("Authentication timeout.".to_string())
            })??,
            None => auth.await?,
        }

        let identifier = host_spec::join(&request.user, &request.host, Some(&request.port.to_string()));
        debug!(identifier = %identifier, "SSH connection established");

        Ok(Arc::new(RusshSession {
            identifier,
            handle: Arc::new(RwLock::new(Some(handle))),
            closed: Arc::new(AtomicBool::new(false)),
            keepalive: Mutex::new(None),
        }))
    }
}

/// An authenticated russh session.
pub struct RusshSession {
    identifier: String,
    handle: Arc<RwLock<Option<Handle<ClientHandler>>>>,
    /// Set on close or when a keepalive finds the connection dead
    closed: Arc<AtomicBool>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

impl RusshSession {
    fn stop_keepalive(&self) {
        if let Some(task) = self.keepalive.lock().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl Session for RusshSession {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn open_direct_tcpip(&self, host: &str, port: u16) -> Result<TunnelSocket, TransportError> {
        let guard = self.handle.read().await;
        let handle = guard
            .as_ref()
            .ok_or_else(|| TransportError::Channel("connection closed".to_string()))?;

        let channel = handle
            .channel_open_direct_tcpip(host, port as u32, "127.0.0.1", 0)
            .await
            .map_err(|e| match TransportError::from(e) {
                TransportError::Protocol(msg) => TransportError::Channel(msg),
                other => other,
            })?;

        Ok(TunnelSocket::new(
            format!("direct-tcpip {}:{} via {}", host, port, self.identifier),
            channel.into_stream(),
        ))
    }

    fn set_keepalive(&self, interval: Duration) {
        self.stop_keepalive();
        if interval.is_zero() {
            return;
        }

        let handle = self.handle.clone();
        let closed = self.closed.clone();
        let identifier = self.identifier.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let guard = handle.read().await;
                let Some(handle) = guard.as_ref() else {
                    break;
                };
                // Send keepalive by opening and immediately closing a channel
                match handle.channel_open_session().await {
                    Ok(channel) => {
                        let _ = channel.exec(true, "true").await;
                        let _ = channel.eof().await;
                        trace!(identifier = %identifier, "Sent keepalive");
                    }
                    Err(e) => {
                        warn!(identifier = %identifier, error = %e, "Keepalive failed, connection may be dead");
                        closed.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });

        *self.keepalive.lock() = Some(task);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        debug!(identifier = %self.identifier, "Closing SSH connection");
        self.stop_keepalive();
        self.closed.store(true, Ordering::SeqCst);

        let handle = self.handle.write().await.take();
        if let Some(handle) = handle {
            handle
                .disconnect(
                    russh::Disconnect::ByApplication,
                    "Connection closed by client",
                    "en",
                )
                .await?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for RusshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusshSession")
            .field("identifier", &self.identifier)
            .field("keepalive", &self.keepalive.lock().is_some())
            .finish()
    }
}

impl Drop for RusshSession {
    fn drop(&mut self) {
        self.stop_keepalive();
    }
}
