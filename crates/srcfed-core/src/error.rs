//! Error types for the federation engine
//!
//! Every failure reaching a caller is a [`FederationError`]; its
//! [`ErrorClass`] is the outcome reported to clients and peers.

use crate::backend::BackendError;
use srcfed_remote::{ConfigError, RemoteError};
use srcfed_revision::{LinkError, NameError, PackageRef, StoreError};

/// Main federation error type
///
/// Cloneable so coalesced expansions can hand one failure to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FederationError {
    /// Unknown project, package, file or revision
    #[error("not found: {0}")]
    NotFound(String),

    /// Link chain revisits a package or exceeds the depth limit
    #[error("link cycle: {}", format_chain(.chain))]
    LinkCycle { chain: Vec<PackageRef> },

    /// Remote instance answered with a failure status
    #[error("remote '{remote}' failed with {status}: {message}")]
    Remote {
        remote: String,
        status: u16,
        message: String,
    },

    /// Deadline exceeded
    #[error("timed out{}", format_waiting(.remote))]
    Timeout { remote: Option<String> },

    /// Unknown remote instance referenced by a path or link
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Build operation on a target without build support
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// `cmd=` value not known
    #[error("unknown command: '{0}'")]
    UnknownCommand(String),

    /// Malformed request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Target of a creating command already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Fetched content does not match its recorded hash
    #[error("integrity mismatch for '{file}' from {origin}")]
    IntegrityMismatch { file: String, origin: String },

    /// Local storage inconsistency
    #[error("storage error: {0}")]
    Storage(String),
}

fn format_chain(chain: &[PackageRef]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_waiting(remote: &Option<String>) -> String {
    remote
        .as_ref()
        .map(|r| format!(" waiting for '{r}'"))
        .unwrap_or_default()
}

/// Outcome class reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    NotFound,
    BadRequest,
    LinkCycle,
    Conflict,
    RemoteError(u16),
    Timeout,
    Internal,
}

impl ErrorClass {
    /// HTTP status for this class
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::BadRequest | Self::LinkCycle => 400,
            Self::Conflict => 409,
            Self::RemoteError(_) => 502,
            Self::Timeout => 504,
            Self::Internal => 500,
        }
    }

    /// Stable machine-readable code
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::BadRequest => "bad_request",
            Self::LinkCycle => "link_cycle",
            Self::Conflict => "conflict",
            Self::RemoteError(_) => "remote_error",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }
}

impl FederationError {
    /// Outcome class of this error
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound(_) | Self::Configuration(_) | Self::Unsupported(_) => {
                ErrorClass::NotFound
            }
            Self::LinkCycle { .. } => ErrorClass::LinkCycle,
            Self::Remote { status, .. } => ErrorClass::RemoteError(*status),
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::UnknownCommand(_) | Self::InvalidRequest(_) => ErrorClass::BadRequest,
            Self::AlreadyExists(_) => ErrorClass::Conflict,
            Self::IntegrityMismatch { .. } | Self::Storage(_) => ErrorClass::Internal,
        }
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Shorthand for [`FederationError::NotFound`]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

impl From<RemoteError> for FederationError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::UnknownInstance(name) => {
                Self::Configuration(format!("unknown remote instance '{name}'"))
            }
            RemoteError::NotFound { remote, message } => {
                Self::NotFound(format!("{message} (remote '{remote}')"))
            }
            RemoteError::Unsupported { remote, message } => {
                Self::Unsupported(format!("{message} (remote '{remote}')"))
            }
            RemoteError::Upstream {
                remote,
                status,
                message,
            } => Self::Remote {
                remote,
                status,
                message,
            },
            RemoteError::Timeout { remote } => Self::Timeout {
                remote: Some(remote),
            },
            RemoteError::Transport { remote, message } | RemoteError::Decode { remote, message } => {
                Self::Remote {
                    remote,
                    status: 502,
                    message,
                }
            }
        }
    }
}

impl From<NameError> for FederationError {
    fn from(err: NameError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

impl From<LinkError> for FederationError {
    fn from(err: LinkError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

impl From<StoreError> for FederationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownRevision(rev) => Self::NotFound(format!("revision {rev}")),
            StoreError::MissingBlob(_) => Self::Storage(err.to_string()),
        }
    }
}

impl From<ConfigError> for FederationError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<BackendError> for FederationError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unsupported(msg) => Self::Unsupported(msg),
            BackendError::NotFound(msg) => Self::NotFound(msg),
            BackendError::Failed(msg) => Self::Storage(format!("build backend: {msg}")),
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T, E = FederationError> = std::result::Result<T, E>;
