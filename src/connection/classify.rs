//! Failure classification for connection attempts.
//!
//! Structured transport error kinds are matched first. Only
//! [`TransportError::Protocol`] carries an opaque library message, and the
//! message heuristics for it live here and nowhere else.

use super::TransportError;

/// Message prefix of a banner read failure.
const BANNER_PREFIX: &str = "Error reading SSH protocol banner";

/// What the operator is asked for on a reprompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// A login password
    Password,
    /// The passphrase of a private key
    Passphrase,
}

/// How the connection state machine reacts to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The server identity changed. Never retried.
    HostKeyMismatch,
    /// The hostname did not resolve. Never retried.
    NameLookup,
    /// Not worth retrying or reprompting.
    Fatal,
    /// Banner or channel hiccup: try again without new credentials.
    RetryHandshake,
    /// Timeout or socket failure: try again, backing off unless it timed out.
    RetrySocket {
        /// Whether the failure was itself a timeout
        timed_out: bool,
    },
    /// Ask the operator for new credentials and try again.
    Reprompt(PromptKind),
}

impl Classification {
    /// Whether this outcome consumes the attempt budget and loops.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Classification::RetryHandshake | Classification::RetrySocket { .. }
        )
    }
}

/// Classify a failed attempt.
///
/// `password_present` is whether a non-empty password was sent with the
/// attempt. A generic protocol failure with a password present is taken to
/// be something other than an authentication problem.
pub fn classify(error: &TransportError, password_present: bool) -> Classification {
    match error {
        TransportError::BadHostKey(_) => Classification::HostKeyMismatch,
        TransportError::NameResolution(_) => Classification::NameLookup,
        TransportError::Banner(_) | TransportError::Channel(_) => Classification::RetryHandshake,
        TransportError::UnknownHost(_) => Classification::Fatal,
        TransportError::PasswordRequired(_) | TransportError::KeyLoad(_) => {
            Classification::Reprompt(PromptKind::Passphrase)
        }
        TransportError::Authentication(_) => Classification::Reprompt(PromptKind::Password),
        TransportError::Timeout => Classification::RetrySocket { timed_out: true },
        TransportError::Socket(_) => Classification::RetrySocket {
            timed_out: error.is_timeout(),
        },
        TransportError::Protocol(message) => classify_message(message, password_present),
    }
}

fn classify_message(message: &str, password_present: bool) -> Classification {
    if message.starts_with(BANNER_PREFIX) {
        return Classification::RetryHandshake;
    }

    let key_load = is_key_load_message(message);
    let unknown_host =
        message.starts_with("Unknown server") || message.contains("not found in known_hosts");

    if (password_present || unknown_host) && !key_load {
        return Classification::Fatal;
    }

    if key_load {
        Classification::Reprompt(PromptKind::Passphrase)
    } else {
        Classification::Reprompt(PromptKind::Password)
    }
}

fn is_key_load_message(message: &str) -> bool {
    message.contains("Unable to parse key file")
}
