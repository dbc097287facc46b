//! Connection lifecycle layer.
//!
//! This module turns a host specifier such as `deploy@web1:2222` into a live,
//! authenticated SSH session and manages that session's cached identity.
//!
//! # Overview
//!
//! - [`host_spec`] parses and normalizes specifiers into canonical keys.
//! - [`credentials`] supplies passwords and private key material, prompting
//!   the operator when needed.
//! - [`gateway`] decides whether a connection is tunneled through a jump host
//!   or a proxy command and produces the tunnel socket.
//! - [`establish`] runs the attempt/classify/retry/reprompt state machine.
//! - [`cache`] maps canonical keys to live sessions with autoconnect on miss.
//!
//! The SSH handshake itself is delegated to a [`Transport`]; the production
//! implementation is [`russh::RusshTransport`].
//!
//! # Example
//!
//! ```rust,ignore
//! use hostlink::prelude::*;
//!
//! let config = Arc::new(Config::load(None)?);
//! let cache = ConnectionCache::builder(config).build();
//!
//! let session = cache.get("deploy@web1").await?;
//! println!("connected to {}", session.identifier());
//!
//! cache.disconnect_all().await;
//! ```

pub mod cache;
pub mod classify;
pub mod credentials;
pub mod establish;
pub mod gateway;
pub mod host_spec;
pub mod password;
pub mod prompt;
pub mod proxy_command;
pub mod russh;
pub mod ssh_config;

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pub use cache::{ConnectionCache, ConnectionCacheBuilder};
pub use credentials::CredentialProvider;
pub use host_spec::{HostKey, ResolvedHost};
pub use password::PasswordStore;
pub use prompt::{Prompter, TerminalPrompter};
pub use russh::RusshTransport;
pub use ssh_config::{SshConfigLookup, SshHostConfig};

/// Errors raised by the transport collaborator during a single attempt.
///
/// Each variant is a distinct failure category; [`classify::classify`] maps
/// them onto retry, reprompt, or terminal outcomes.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The server's host key differs from the recorded one.
    #[error("Host key mismatch: {0}")]
    BadHostKey(String),

    /// The server's host key is not known and the policy rejects unknown hosts.
    #[error("Unknown server {0}: host key not found in known_hosts")]
    UnknownHost(String),

    /// Every authentication method was rejected.
    #[error("{0}")]
    Authentication(String),

    /// A private key is encrypted and no passphrase was supplied.
    #[error("Private key file is encrypted: {0}")]
    PasswordRequired(String),

    /// A private key file could not be parsed.
    #[error("Unable to parse key file: {0}")]
    KeyLoad(String),

    /// The SSH protocol banner could not be read.
    #[error("Error reading SSH protocol banner: {0}")]
    Banner(String),

    /// A tunneled channel could not be opened or failed.
    #[error("Channel error: {0}")]
    Channel(String),

    /// Any other SSH protocol failure, carrying the library's message.
    #[error("{0}")]
    Protocol(String),

    /// DNS lookup of the target failed.
    #[error("Name lookup failed: {0}")]
    NameResolution(String),

    /// The TCP connect or a read timed out.
    #[error("Connection timed out")]
    Timeout,

    /// Low level socket failure.
    #[error("{0}")]
    Socket(#[from] io::Error),
}

impl TransportError {
    /// True if this error is a timeout, including socket errors of kind `TimedOut`.
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Timeout => true,
            TransportError::Socket(e) => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

/// Everything the transport needs for one connection attempt.
pub struct ConnectRequest {
    /// Network hostname
    pub host: String,
    /// SSH daemon port
    pub port: u16,
    /// Login user
    pub user: String,
    /// Login password, also used as key passphrase
    pub password: Option<String>,
    /// Parsed in-memory private key
    pub pkey: Option<Arc<russh_keys::key::KeyPair>>,
    /// Private key files to try, in order
    pub key_filenames: Vec<PathBuf>,
    /// TCP connect timeout
    pub timeout: Duration,
    /// Timeout waiting for the protocol banner
    pub banner_timeout: Option<Duration>,
    /// Timeout for the authentication phase
    pub auth_timeout: Option<Duration>,
    /// Try keys held by an SSH agent
    pub allow_agent: bool,
    /// Try default keys under ~/.ssh
    pub look_for_keys: bool,
    /// Load the user's known_hosts file
    pub load_known_hosts: bool,
    /// Extra system-wide known_hosts file
    pub system_known_hosts: Option<PathBuf>,
    /// Fail on hosts missing from known_hosts
    pub reject_unknown_hosts: bool,
    /// Pre-established socket to run the session over
    pub sock: Option<TunnelSocket>,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("pkey", &self.pkey.is_some())
            .field("key_filenames", &self.key_filenames)
            .field("timeout", &self.timeout)
            .field("allow_agent", &self.allow_agent)
            .field("look_for_keys", &self.look_for_keys)
            .field("sock", &self.sock)
            .finish_non_exhaustive()
    }
}

/// The SSH transport collaborator.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the handshake and authentication for one attempt.
    async fn connect(&self, request: ConnectRequest) -> Result<Arc<dyn Session>, TransportError>;
}

/// A live, authenticated SSH session.
#[async_trait]
pub trait Session: Send + Sync + fmt::Debug {
    /// Human-readable identifier, `user@host:port`.
    fn identifier(&self) -> &str;

    /// Open a direct-tcpip channel to `(host, port)` over this session.
    async fn open_direct_tcpip(&self, host: &str, port: u16)
        -> Result<TunnelSocket, TransportError>;

    /// Start pinging the server every `interval`. Zero stops it.
    fn set_keepalive(&self, interval: Duration);

    /// Whether the underlying connection has gone away.
    fn is_closed(&self) -> bool;

    /// Close the session.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Byte stream usable as the socket under an SSH session.
pub trait TunnelStream: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync> TunnelStream for T {}

/// A socket-like channel used as the transport for another connection.
///
/// Dropping the socket closes it: a channel is closed, a proxy command child
/// is killed.
pub struct TunnelSocket {
    label: String,
    stream: Box<dyn TunnelStream>,
}

impl TunnelSocket {
    /// Wrap a stream, labelling it for logs.
    pub fn new(label: impl Into<String>, stream: impl TunnelStream + 'static) -> Self {
        Self {
            label: label.into(),
            stream: Box::new(stream),
        }
    }

    /// What this socket is, e.g. `direct-tcpip web1:22 via bastion`.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for TunnelSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TunnelSocket").field(&self.label).finish()
    }
}

impl AsyncRead for TunnelSocket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TunnelSocket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut *self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.stream).poll_shutdown(cx)
    }
}
