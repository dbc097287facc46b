//! # Hostlink - cached, gateway-aware SSH connections
//!
//! Hostlink turns host specifiers such as `deploy@web1:2222` into live,
//! authenticated SSH sessions and keeps them in a process-wide cache keyed by
//! a canonical `user@host:port` form.
//!
//! ## Core Concepts
//!
//! - **Host specifiers**: `[user@]host[:port]`, IPv6 literals optionally
//!   bracketed, normalized against the [`Config`] and the user's ssh config
//! - **Connection cache**: autoconnects on miss, serializes establishment per
//!   key, and closes everything on [`ConnectionCache::disconnect_all`]
//! - **Gateways**: a configured jump host or `ProxyJump`, or a proxy command,
//!   carries the connection to the target
//! - **Establishment**: a retry/reprompt state machine that classifies every
//!   transport failure as retryable, credential-related, or terminal
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    ConnectionCache                       │
//! │        (canonical keys, per-key establishment lock)      │
//! └─────────────────────────────────────────────────────────┘
//!               │                             │
//!               ▼                             ▼
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │  ConnectionEstablisher   │──▶│     GatewayResolver       │
//! │ (attempt / classify /    │   │ (jump host via the cache, │
//! │  retry / reprompt)       │   │  or proxy command)        │
//! └──────────────────────────┘   └──────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            Transport (russh) + CredentialProvider        │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use hostlink::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Arc::new(Config::load(None)?);
//!     let cache = ConnectionCache::builder(config).build();
//!
//!     let session = cache.get("deploy@web1").await?;
//!     println!("connected to {}", session.identifier());
//!
//!     cache.disconnect_all().await;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connection;
pub mod error;

pub use config::Config;
pub use connection::{ConnectionCache, HostKey, Session, Transport};
pub use error::{Error, Result};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::connection::host_spec::{denormalize, join, normalize, parse};
    pub use crate::connection::{
        ConnectionCache, HostKey, PasswordStore, Prompter, ResolvedHost, Session,
        SshConfigLookup, Transport, TunnelSocket,
    };
    pub use crate::error::{Error, ErrorContext, Result};

    pub use std::sync::Arc;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
