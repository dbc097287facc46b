//! Gateway and proxy-command tunnels.
//!
//! Precedence: the configured gateway, then a single ssh_config `ProxyJump`
//! host, then a proxy command (configured, then ssh_config `ProxyCommand`).
//! Jump hosts are connected through the cache so they are shared between
//! targets; proxy-command sockets are never cached.

use tracing::debug;

use super::cache::ConnectionCache;
use super::establish::AttemptError;
use super::host_spec::{self, ResolvedHost};
use super::{proxy_command, TunnelSocket, TransportError};
use crate::error::Error;

/// How a target is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Straight TCP connection
    Direct,
    /// Through a jump host, by specifier
    Jump(String),
    /// Over the stdio of a command, tokens unexpanded
    ProxyCommand(String),
}

/// Produces tunnel sockets for targets of one cache.
#[derive(Debug, Clone, Copy)]
pub struct GatewayResolver<'a> {
    cache: &'a ConnectionCache,
}

impl<'a> GatewayResolver<'a> {
    /// Resolve gateways through `cache`.
    pub fn new(cache: &'a ConnectionCache) -> Self {
        Self { cache }
    }

    /// Decide how `target` is reached, without connecting anything.
    pub fn route(&self, target: &ResolvedHost) -> std::result::Result<Route, Error> {
        let config = self.cache.config();
        let lookup_host = host_spec::parse(&target.host_string).host;
        let conf = self.cache.ssh_config().lookup(&lookup_host);

        let jump = config
            .gateway
            .clone()
            .filter(|g| !g.is_empty())
            .or(conf.proxyjump.filter(|j| !j.eq_ignore_ascii_case("none")));

        if let Some(jump) = jump {
            if jump.contains(',') {
                return Err(Error::Config(format!(
                    "ProxyJump chains are not supported: {}",
                    jump
                )));
            }
            return Ok(Route::Jump(jump));
        }

        let command = config
            .proxy_command
            .clone()
            .or(conf.proxycommand)
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("none"));

        Ok(match command {
            Some(command) => Route::ProxyCommand(command),
            None => Route::Direct,
        })
    }

    /// Tunnel socket for `target`, or `None` for a direct connection.
    ///
    /// With `replace` set, a cached jump host connection is re-established
    /// before the channel is opened.
    pub async fn resolve(
        &self,
        target: &ResolvedHost,
        replace: bool,
    ) -> std::result::Result<Option<TunnelSocket>, AttemptError> {
        match self.route(target)? {
            Route::Direct => Ok(None),
            Route::Jump(jump) => {
                let key = self.cache.canonicalize(&jump);
                if key == target.key() {
                    debug!(gateway = %key, "Target is its own gateway, connecting directly");
                    return Ok(None);
                }

                let session = self.cache.gateway_session(&key, replace).await?;
                let sock = session
                    .open_direct_tcpip(&target.host, target.port)
                    .await?;
                debug!(gateway = %key, host = %target.host, port = target.port, "Opened gateway channel");
                Ok(Some(sock))
            }
            Route::ProxyCommand(command) => {
                let sock = proxy_command::open(&command, &target.host, target.port, &target.user)
                    .map_err(TransportError::Socket)?;
                Ok(Some(sock))
            }
        }
    }
}
