//! Error types for the `realtime` crate.
//!
//! Follows a root `Error` struct holding an error kind tree and an optional
//! source for error chaining. None of these errors reach subscribers: the
//! client classifies transport errors and the cursor store swallows storage
//! errors.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for the realtime crate.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in the realtime client.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Transport(TransportErrorKind),
    Storage(StorageErrorKind),
    Config,
}

/// Errors from obtaining events over a transport.
#[derive(Debug, PartialEq)]
pub enum TransportErrorKind {
    /// The server rejected the client's credentials (HTTP 401/403).
    Unauthorized(u16),
    /// Connection failures, unexpected statuses, dropped streams.
    Network,
    /// The server answered with a body that could not be understood.
    InvalidResponse,
}

/// Errors from session storage backends.
#[derive(Debug, PartialEq)]
pub enum StorageErrorKind {
    Unavailable,
    Corrupt,
}

impl Error {
    /// Returns the HTTP status when the server rejected the client's credentials.
    pub fn unauthorized_status(&self) -> Option<u16> {
        match self.error_kind {
            ErrorKind::Transport(TransportErrorKind::Unauthorized(status)) => Some(status),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Transport(kind) => write!(f, "Transport error: {:?}", kind)?,
            ErrorKind::Storage(kind) => write!(f, "Storage error: {:?}", kind)?,
            ErrorKind::Config => write!(f, "Configuration error")?,
        }
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if err.is_decode() {
            ErrorKind::Transport(TransportErrorKind::InvalidResponse)
        } else {
            ErrorKind::Transport(TransportErrorKind::Network)
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<eventsource_client::Error> for Error {
    fn from(err: eventsource_client::Error) -> Self {
        Error {
            source: Some(err.to_string().into()),
            error_kind: ErrorKind::Transport(TransportErrorKind::Network),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Storage(StorageErrorKind::Unavailable),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Storage(StorageErrorKind::Corrupt),
        }
    }
}

/// Helper function to create transport errors.
pub fn transport_error(kind: TransportErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Transport(kind),
    }
}

/// Helper function to create storage errors.
pub fn storage_error(kind: StorageErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Storage(kind),
    }
}

/// Helper function to create configuration errors.
pub fn config_error(message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Config,
    }
}
