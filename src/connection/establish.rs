//! The connection state machine.
//!
//! Each attempt builds a [`ConnectRequest`], hands it to the transport and
//! classifies any failure. Transient failures loop until the attempt budget
//! is spent; credential failures reprompt and loop; everything else is
//! terminal. The tunnel socket of a failed attempt is dropped, and with it
//! closed, before the next attempt starts.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::classify::{classify, Classification, PromptKind};
use super::credentials::CredentialProvider;
use super::gateway::GatewayResolver;
use super::host_spec::ResolvedHost;
use super::{ConnectRequest, Session, Transport, TransportError};
use crate::config::Config;
use crate::error::{Error, Result};

/// Why one attempt did not produce a session.
#[derive(Debug)]
pub enum AttemptError {
    /// Classify and maybe retry.
    Transport(TransportError),
    /// Stop: already a terminal error (or an abort).
    Fatal(Error),
}

impl From<TransportError> for AttemptError {
    fn from(err: TransportError) -> Self {
        AttemptError::Transport(err)
    }
}

impl From<Error> for AttemptError {
    fn from(err: Error) -> Self {
        AttemptError::Fatal(err)
    }
}

/// Runs connection attempts until one succeeds or a terminal failure.
pub struct ConnectionEstablisher {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialProvider>,
}

impl ConnectionEstablisher {
    /// Create a new establisher
    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        credentials: Arc<CredentialProvider>,
    ) -> Self {
        Self {
            config,
            transport,
            credentials,
        }
    }

    /// The credential provider used for attempts.
    pub fn credentials(&self) -> &Arc<CredentialProvider> {
        &self.credentials
    }

    /// Connect to `target`, tunneling through `gateway` when given.
    pub async fn establish(
        &self,
        target: &ResolvedHost,
        gateway: Option<&GatewayResolver<'_>>,
    ) -> Result<Arc<dyn Session>> {
        let budget = self.config.attempt_budget();
        let mut password = self
            .credentials
            .password_for(&target.user, &target.host, target.port, true);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(host = %target.host, port = target.port, attempt, "Connecting");

            let err = match self.attempt(target, gateway, attempt, password.as_deref()).await {
                Ok(session) => {
                    if !self.config.keepalive.is_zero() {
                        session.set_keepalive(self.config.keepalive);
                    }
                    info!(host = %target.host, attempt, "Connected to {}", session.identifier());
                    return Ok(session);
                }
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Transport(e)) => e,
            };

            let password_present = password.as_deref().is_some_and(|p| !p.is_empty());
            let classification = classify(&err, password_present);
            if classification.is_transient() && attempt >= budget {
                return Err(exhausted(target, classification, err, attempt));
            }

            match classification {
                Classification::HostKeyMismatch => {
                    return Err(Error::HostKeyMismatch {
                        message: format!(
                            "Host key for {} did not match pre-existing key! Server's key was \
                             changed recently, or possible man-in-the-middle attack.",
                            target.host
                        ),
                        host: target.host.clone(),
                        source: err,
                    });
                }
                Classification::NameLookup => {
                    return Err(Error::NameLookup {
                        host: target.host.clone(),
                        source: err,
                    });
                }
                Classification::Fatal => {
                    return Err(Error::authentication(
                        target.host.clone(),
                        err.to_string(),
                        Some(err),
                    ));
                }
                Classification::RetryHandshake => {
                    warn!(host = %target.host, attempt, error = %err, "Transient handshake failure, retrying");
                }
                Classification::RetrySocket { timed_out } => {
                    warn!(
                        host = %target.host,
                        attempt,
                        error = %err,
                        "Failed to connect to {} (attempt {} of {}), retrying",
                        target.host,
                        attempt,
                        budget
                    );
                    if !timed_out {
                        tokio::time::sleep(self.config.timeout).await;
                    }
                }
                Classification::Reprompt(kind) => {
                    let text = match kind {
                        PromptKind::Passphrase => {
                            Some(format!("[{}] Passphrase for private key", target.host_string))
                        }
                        PromptKind::Password => {
                            self.credentials.notice(&format!("Connect error: {}", err));
                            None
                        }
                    };
                    let new_password = self
                        .credentials
                        .prompt_password(&target.host_string, &target.user, text.as_deref(), false)
                        .await?;
                    self.credentials
                        .set_password(&target.user, &target.host, target.port, &new_password);
                    password = Some(new_password);
                }
            }
        }
    }

    async fn attempt(
        &self,
        target: &ResolvedHost,
        gateway: Option<&GatewayResolver<'_>>,
        attempt: u32,
        password: Option<&str>,
    ) -> std::result::Result<Arc<dyn Session>, AttemptError> {
        // A stale tunnel may be why the previous attempt failed
        let sock = match gateway {
            Some(resolver) => resolver.resolve(target, attempt > 1).await?,
            None => None,
        };

        let pkey = self.credentials.key_material(password)?;

        let request = ConnectRequest {
            host: target.host.clone(),
            port: target.port,
            user: target.user.clone(),
            password: password.map(String::from),
            pkey,
            key_filenames: self.credentials.key_file_paths(&target.host_string),
            timeout: self.config.timeout,
            banner_timeout: self.config.banner_timeout,
            auth_timeout: self.config.auth_timeout,
            allow_agent: !self.config.no_agent,
            look_for_keys: !self.config.no_keys,
            load_known_hosts: !self.config.disable_known_hosts,
            system_known_hosts: self.config.system_known_hosts.clone(),
            reject_unknown_hosts: self.config.reject_unknown_hosts,
            sock,
        };

        Ok(self.transport.connect(request).await?)
    }
}

impl std::fmt::Debug for ConnectionEstablisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEstablisher")
            .field("attempts", &self.config.attempt_budget())
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

/// Terminal error for a transient failure once the attempt budget is spent.
fn exhausted(
    target: &ResolvedHost,
    classification: Classification,
    err: TransportError,
    attempt: u32,
) -> Error {
    let mut message = match classification {
        Classification::RetrySocket { timed_out: true } => {
            format!("Timed out trying to connect to {}", target.host)
        }
        Classification::RetrySocket { timed_out: false } => format!(
            "Low level socket error connecting to host {} on port {}: {}",
            target.host, target.port, err
        ),
        _ => err.to_string(),
    };
    message.push_str(&format!(
        " (tried {} time{})",
        attempt,
        if attempt > 1 { "s" } else { "" }
    ));
    Error::network(target.host.clone(), message, attempt, Some(err))
}
