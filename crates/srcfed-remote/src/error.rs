//! Error types for remote access

/// Errors talking to a remote instance
///
/// Cloneable so one failed fetch can be handed to every caller coalesced on
/// the same cache key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// No remote instance registered under this name
    #[error("unknown remote instance: {0}")]
    UnknownInstance(String),

    /// The remote does not have the target
    #[error("{remote}: not found: {message}")]
    NotFound { remote: String, message: String },

    /// The remote target cannot execute build operations
    #[error("{remote}: unsupported: {message}")]
    Unsupported { remote: String, message: String },

    /// Any other non-success status
    #[error("{remote}: upstream returned {status}: {message}")]
    Upstream {
        remote: String,
        status: u16,
        message: String,
    },

    /// Deadline exceeded before the remote answered
    #[error("{remote}: deadline exceeded")]
    Timeout { remote: String },

    /// Connection or protocol failure
    #[error("{remote}: transport failure: {message}")]
    Transport { remote: String, message: String },

    /// Response body could not be decoded
    #[error("{remote}: malformed response: {message}")]
    Decode { remote: String, message: String },
}

impl RemoteError {
    /// Remote instance the error came from, if any
    #[must_use]
    pub fn remote(&self) -> Option<&str> {
        match self {
            Self::UnknownInstance(_) => None,
            Self::NotFound { remote, .. }
            | Self::Unsupported { remote, .. }
            | Self::Upstream { remote, .. }
            | Self::Timeout { remote }
            | Self::Transport { remote, .. }
            | Self::Decode { remote, .. } => Some(remote),
        }
    }

    /// Whether the target is absent (including unsupported build targets)
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Unsupported { .. } | Self::UnknownInstance(_)
        )
    }

    /// Whether a caller may reasonably retry
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport { .. })
            || matches!(self, Self::Upstream { status, .. } if *status >= 500)
    }
}
