//! Error types for Hostlink.
//!
//! Every connection failure that leaves this crate is folded into [`Error`],
//! carrying a human-readable message and, where one exists, the transport
//! level cause as its `source`.

use std::path::PathBuf;
use thiserror::Error;

use crate::connection::TransportError;

/// Result type alias for Hostlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Hostlink.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The server presented a host key that differs from the recorded one.
    #[error("{message}")]
    HostKeyMismatch {
        /// Target host
        host: String,
        /// Error message
        message: String,
        /// Transport cause
        #[source]
        source: TransportError,
    },

    /// DNS / name lookup for the target failed.
    #[error("Name lookup failed for {host}")]
    NameLookup {
        /// Target host
        host: String,
        /// Transport cause
        #[source]
        source: TransportError,
    },

    /// Credentials were rejected, or a protocol failure was judged terminal.
    #[error("{message}")]
    Authentication {
        /// Target host
        host: String,
        /// Error message
        message: String,
        /// Transport cause
        #[source]
        source: Option<TransportError>,
    },

    /// Transient failures exhausted the connection attempt budget.
    #[error("{message}")]
    Network {
        /// Target host
        host: String,
        /// Error message, annotated with the number of attempts
        message: String,
        /// Attempts made before giving up
        attempts: u32,
        /// Transport cause
        #[source]
        source: Option<TransportError>,
    },

    /// The operator cancelled an interactive prompt.
    ///
    /// This is not a failure: callers should stop the current operation and
    /// exit cleanly.
    #[error("Aborted by user")]
    Aborted,

    /// A prompt was required but prompting is disabled.
    #[error("Needed to prompt for {what} (host: {host}), but abort-on-prompts was set")]
    PromptRefused {
        /// What the prompt was for
        what: String,
        /// Host string being connected to
        host: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("Failed to parse config file '{path}': {message}")]
    ConfigParse {
        /// Path to the config file
        path: PathBuf,
        /// Error message
        message: String,
    },

    // ========================================================================
    // IO Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with source.
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new authentication error.
    pub fn authentication(
        host: impl Into<String>,
        message: impl Into<String>,
        source: Option<TransportError>,
    ) -> Self {
        Self::Authentication {
            host: host.into(),
            message: message.into(),
            source,
        }
    }

    /// Creates a new attempt-budget-exhausted network error.
    pub fn network(
        host: impl Into<String>,
        message: impl Into<String>,
        attempts: u32,
        source: Option<TransportError>,
    ) -> Self {
        Self::Network {
            host: host.into(),
            message: message.into(),
            attempts,
            source,
        }
    }

    /// Returns true if this is an operator abort rather than a failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted)
    }

    /// Returns true for the connection failure family.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Error::HostKeyMismatch { .. }
                | Error::NameLookup { .. }
                | Error::Authentication { .. }
                | Error::Network { .. }
        )
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Aborted => 0,
            e if e.is_network() => 3,
            Error::Config(_) | Error::ConfigParse { .. } => 4,
            _ => 1,
        }
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Adds context with a closure that is only evaluated on error.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Other {
            message: message.into(),
            source: Some(Box::new(e)),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::Other {
            message: f().into(),
            source: Some(Box::new(e)),
        })
    }
}
