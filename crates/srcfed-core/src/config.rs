//! Federation configuration
//!
//! Loaded once from TOML at startup; every component receives the resulting
//! immutable [`FederationConfig`].

use serde::{Deserialize, Serialize};
use srcfed_remote::{validate_remotes, CacheConfig, ConfigError, RemoteConfig, RemoteRegistry};
use srcfed_revision::validate_project;
use std::path::Path;
use std::time::Duration;

/// `[expansion]` table: expanded-view cache and link chain limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    pub max_entries: u64,
    pub ttl_secs: u64,
    /// Longest link chain followed before giving up
    pub max_link_depth: usize,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            max_entries: 4096,
            ttl_secs: 5,
            max_link_depth: 32,
        }
    }
}

impl ExpansionConfig {
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// `[branch]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchConfig {
    /// Root of per-user projects; default branches land in
    /// `{home_prefix}:{user}:branches:{project}`
    pub home_prefix: String,
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            home_prefix: "home".to_string(),
        }
    }
}

impl BranchConfig {
    /// Default branch project of `user` for `project`
    #[must_use]
    pub fn branch_project(&self, user: &str, project: &str) -> String {
        format!("{}:{user}:branches:{project}", self.home_prefix)
    }
}

/// Complete service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Budget of one request, propagated to remote calls as a deadline
    pub request_timeout_secs: u64,
    pub cache: CacheConfig,
    pub expansion: ExpansionConfig,
    pub branch: BranchConfig,
    #[serde(rename = "remote", skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<RemoteConfig>,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            cache: CacheConfig::default(),
            expansion: ExpansionConfig::default(),
            branch: BranchConfig::default(),
            remotes: Vec::new(),
        }
    }
}

impl FederationConfig {
    /// Parse and validate TOML
    ///
    /// # Errors
    /// Returns [`ConfigError`] on syntax errors or invalid values
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read or is invalid
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges and remote entries
    ///
    /// # Errors
    /// Returns the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be positive".into(),
            ));
        }
        if self.expansion.max_link_depth == 0 {
            return Err(ConfigError::Invalid(
                "expansion.max_link_depth must be positive".into(),
            ));
        }
        validate_project(&self.branch.home_prefix)
            .map_err(|e| ConfigError::Invalid(format!("branch.home_prefix: {e}")))?;
        validate_remotes(&self.remotes)
    }

    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Registry snapshot of the configured remotes
    ///
    /// # Errors
    /// Returns error if a remote entry is invalid
    pub fn registry(&self) -> Result<RemoteRegistry, ConfigError> {
        RemoteRegistry::from_configs(&self.remotes)
    }
}
