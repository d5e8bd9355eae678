//! Remote instance and response cache configuration

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use url::Url;

/// One `[[remote]]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Prefix under which the peer's projects appear locally
    pub name: String,
    /// Base endpoint of the peer
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

/// Credentials presented to a peer
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Credentials {
    Basic { user: String, password: String },
    Token { token: String },
}

// Secrets never reach logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("password", &"***")
                .finish(),
            Self::Token { .. } => f.debug_struct("Token").field("token", &"***").finish(),
        }
    }
}

/// `[cache]` table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_secs: 30,
        }
    }
}

impl CacheConfig {
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl RemoteConfig {
    /// Check name and endpoint, returning the parsed endpoint
    ///
    /// # Errors
    /// Returns [`ConfigError`] for empty or malformed names and non-http(s)
    /// endpoints
    pub fn validate(&self) -> Result<Url, ConfigError> {
        let name = self.name.as_str();
        if name.is_empty()
            || name.contains('/')
            || name.starts_with(':')
            || name.ends_with(':')
        {
            return Err(ConfigError::InvalidName(name.to_string()));
        }
        let url = Url::parse(&self.url).map_err(|e| ConfigError::InvalidUrl {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(ConfigError::InvalidUrl {
                name: name.to_string(),
                reason: format!("unsupported endpoint '{url}'"),
            });
        }
        Ok(url)
    }
}

/// Validate a full set of remotes
///
/// # Errors
/// Returns the first invalid entry or duplicated name
pub fn validate_remotes(remotes: &[RemoteConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for remote in remotes {
        remote.validate()?;
        if !seen.insert(remote.name.as_str()) {
            return Err(ConfigError::DuplicateRemote(remote.name.clone()));
        }
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(String),

    #[error("cannot parse configuration: {0}")]
    Parse(String),

    #[error("invalid remote name: '{0}'")]
    InvalidName(String),

    #[error("invalid url for remote '{name}': {reason}")]
    InvalidUrl { name: String, reason: String },

    #[error("remote '{0}' configured twice")]
    DuplicateRemote(String),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(name: &str, url: &str) -> RemoteConfig {
        RemoteConfig {
            name: name.into(),
            url: url.into(),
            credentials: None,
        }
    }

    #[test]
    fn credentials_forms() {
        let basic: Credentials =
            serde_json::from_str(r#"{"user": "u", "password": "p"}"#).unwrap();
        let token: Credentials = serde_json::from_str(r#"{"token": "t"}"#).unwrap();
        assert!(matches!(basic, Credentials::Basic { .. }));
        assert!(matches!(token, Credentials::Token { .. }));
    }

    #[test]
    fn credentials_debug_redacts() {
        let c = Credentials::Basic {
            user: "u".into(),
            password: "hunter2".into(),
        };
        let printed = format!("{c:?}");
        assert!(printed.contains("\"u\""));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn validates_names_and_urls() {
        assert!(remote("RemoteInstance", "https://peer.example.org/").validate().is_ok());
        assert!(matches!(
            remote("", "https://x/").validate(),
            Err(ConfigError::InvalidName(_))
        ));
        assert!(matches!(
            remote("a:", "https://x/").validate(),
            Err(ConfigError::InvalidName(_))
        ));
        assert!(matches!(
            remote("a", "ftp://x/").validate(),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            remote("a", "not a url").validate(),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn rejects_duplicates() {
        let remotes = vec![remote("a", "http://x/"), remote("a", "http://y/")];
        assert_eq!(
            validate_remotes(&remotes),
            Err(ConfigError::DuplicateRemote("a".into()))
        );
    }

    #[test]
    fn cache_defaults() {
        let c: CacheConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(c, CacheConfig::default());
        assert_eq!(c.ttl(), Duration::from_secs(30));
    }
}
