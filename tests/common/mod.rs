//! Shared test utilities for the Hostlink test suite.
//!
//! This module provides:
//! - A scripted mock [`Transport`] that records every connect request
//! - A mock [`Session`] that counts closes and opened channels
//! - A tracked stream whose drop is observable, for tunnel socket cleanup
//! - A scripted [`Prompter`]
//! - Config and cache builders
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

use hostlink::config::Config;
use hostlink::connection::{
    ConnectRequest, ConnectionCache, PasswordStore, Prompter, Session, SshConfigLookup, Transport,
    TransportError, TunnelSocket,
};

// ============================================================================
// Scripted transport
// ============================================================================

/// What one scripted connect attempt does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Succeed with a fresh session
    Connect,
    /// TCP connect timed out
    Timeout,
    /// Connection refused
    Refused,
    /// Protocol banner could not be read
    Banner,
    /// Host key differs from known_hosts
    BadHostKey,
    /// Host not in known_hosts, reject policy
    UnknownHost,
    /// Credentials rejected
    AuthFailed,
    /// Key file is encrypted
    PasswordRequired,
    /// DNS failure
    NameLookup,
    /// Tunnel channel failure
    Channel,
    /// Opaque library error with this message
    Protocol(&'static str),
}

impl Outcome {
    fn into_error(self, host: &str) -> Option<TransportError> {
        Some(match self {
            Outcome::Connect => return None,
            Outcome::Timeout => TransportError::Timeout,
            Outcome::Refused => TransportError::Socket(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "Connection refused",
            )),
            Outcome::Banner => TransportError::Banner("connection reset".to_string()),
            Outcome::BadHostKey => TransportError::BadHostKey(host.to_string()),
            Outcome::UnknownHost => TransportError::UnknownHost(host.to_string()),
            Outcome::AuthFailed => TransportError::Authentication("Authentication failed.".to_string()),
            Outcome::PasswordRequired => {
                TransportError::PasswordRequired("/home/deploy/.ssh/id_rsa".to_string())
            }
            Outcome::NameLookup => TransportError::NameResolution(format!("{}: unknown host", host)),
            Outcome::Channel => TransportError::Channel("administratively prohibited".to_string()),
            Outcome::Protocol(message) => TransportError::Protocol(message.to_string()),
        })
    }
}

/// One connect call as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Label of the tunnel socket, if one was supplied
    pub via: Option<String>,
}

/// Transport that replays scripted outcomes per host.
///
/// Hosts without a script (or with an exhausted one) connect successfully.
/// Requests are dropped as soon as they are recorded, so any tunnel socket
/// they carried is closed before `connect` returns.
#[derive(Debug, Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    delay: Mutex<Option<Duration>>,
    fail_close: AtomicBool,
    socket_drops: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue outcomes for `host`, consumed one per attempt.
    pub fn script(&self, host: &str, outcomes: impl IntoIterator<Item = Outcome>) {
        self.scripts
            .lock()
            .entry(host.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Make every connect take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Sessions created from now on fail to close.
    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Connect calls made for `host`
    pub fn attempts(&self, host: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.host == host).count()
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().clone()
    }

    /// Sessions created for `host`, oldest first
    pub fn sessions_for(&self, host: &str) -> Vec<Arc<MockSession>> {
        self.sessions
            .lock()
            .iter()
            .filter(|s| s.host == host)
            .cloned()
            .collect()
    }

    /// Tunnel sockets opened through any mock session and since dropped
    pub fn socket_drops(&self) -> usize {
        self.socket_drops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, request: ConnectRequest) -> Result<Arc<dyn Session>, TransportError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.requests.lock().push(RecordedRequest {
            host: request.host.clone(),
            port: request.port,
            user: request.user.clone(),
            password: request.password.clone(),
            via: request.sock.as_ref().map(|s| s.label().to_string()),
        });

        let outcome = self
            .scripts
            .lock()
            .get_mut(&request.host)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Outcome::Connect);

        let host = request.host.clone();
        let port = request.port;
        let user = request.user.clone();
        drop(request);

        if let Some(err) = outcome.into_error(&host) {
            return Err(err);
        }

        let session = Arc::new(MockSession::new(
            format!("{}@{}:{}", user, host, port),
            &host,
            self.fail_close.load(Ordering::SeqCst),
            self.socket_drops.clone(),
        ));
        self.sessions.lock().push(session.clone());
        Ok(session)
    }
}

// ============================================================================
// Mock session
// ============================================================================

/// Session that counts closes and channels.
#[derive(Debug)]
pub struct MockSession {
    identifier: String,
    pub host: String,
    fail_close: bool,
    closed: AtomicBool,
    close_count: AtomicU32,
    channels: Mutex<Vec<(String, u16)>>,
    keepalive: Mutex<Option<Duration>>,
    socket_drops: Arc<AtomicUsize>,
}

impl MockSession {
    pub fn new(
        identifier: impl Into<String>,
        host: &str,
        fail_close: bool,
        socket_drops: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            host: host.to_string(),
            fail_close,
            closed: AtomicBool::new(false),
            close_count: AtomicU32::new(0),
            channels: Mutex::new(Vec::new()),
            keepalive: Mutex::new(None),
            socket_drops,
        }
    }

    pub fn close_count(&self) -> u32 {
        self.close_count.load(Ordering::SeqCst)
    }

    /// direct-tcpip channels opened over this session
    pub fn channels(&self) -> Vec<(String, u16)> {
        self.channels.lock().clone()
    }

    pub fn keepalive(&self) -> Option<Duration> {
        *self.keepalive.lock()
    }
}

#[async_trait]
impl Session for MockSession {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn open_direct_tcpip(&self, host: &str, port: u16) -> Result<TunnelSocket, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Channel("connection closed".to_string()));
        }
        self.channels.lock().push((host.to_string(), port));

        let (stream, _peer) = tokio::io::duplex(1024);
        Ok(TunnelSocket::new(
            format!("direct-tcpip {}:{} via {}", host, port, self.identifier),
            TrackedStream::new(stream, self.socket_drops.clone()),
        ))
    }

    fn set_keepalive(&self, interval: Duration) {
        *self.keepalive.lock() = Some(interval);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(TransportError::Socket(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "broken pipe",
            )));
        }
        Ok(())
    }
}

/// Stream wrapper that counts its own drop.
#[derive(Debug)]
pub struct TrackedStream {
    inner: DuplexStream,
    drops: Arc<AtomicUsize>,
}

impl TrackedStream {
    pub fn new(inner: DuplexStream, drops: Arc<AtomicUsize>) -> Self {
        Self { inner, drops }
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

// ============================================================================
// Scripted prompter
// ============================================================================

/// Prompter that answers from a queue. An empty queue reads as end of input.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    notices: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new(answers: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
            ..Default::default()
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().clone()
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn read_secret(&self, prompt: &str) -> io::Result<String> {
        self.prompts.lock().push(prompt.to_string());
        self.answers
            .lock()
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no more answers"))
    }

    fn notice(&self, message: &str) {
        self.notices.lock().push(message.to_string());
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Config with a fixed local user and no ambient key or agent lookups.
pub fn test_config() -> Config {
    Config {
        user: "deploy".to_string(),
        local_user: "deploy".to_string(),
        no_agent: true,
        no_keys: true,
        disable_known_hosts: true,
        timeout: Duration::from_secs(1),
        ..Config::default()
    }
}

/// Cache over the mock transport and prompter, ssh config disabled.
pub fn build_cache(
    config: Config,
    transport: Arc<MockTransport>,
    prompter: Arc<ScriptedPrompter>,
) -> ConnectionCache {
    build_cache_with_ssh_config(config, transport, prompter, SshConfigLookup::disabled())
}

/// Cache over the mock transport and prompter with the given ssh config.
pub fn build_cache_with_ssh_config(
    config: Config,
    transport: Arc<MockTransport>,
    prompter: Arc<ScriptedPrompter>,
    ssh_config: SshConfigLookup,
) -> ConnectionCache {
    let config = Arc::new(config);
    ConnectionCache::builder(config.clone())
        .transport(transport)
        .prompter(prompter)
        .passwords(Arc::new(PasswordStore::from_config(&config)))
        .ssh_config(Arc::new(ssh_config))
        .build()
}
