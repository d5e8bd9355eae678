//! Registry of configured remote instances
//!
//! Built once from configuration and never mutated; share it behind an `Arc`.

use crate::config::{validate_remotes, ConfigError, Credentials, RemoteConfig};
use crate::error::RemoteError;
use srcfed_revision::REMOTE_SEPARATOR;
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

/// A peer instance of the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInstance {
    pub name: String,
    pub base_url: Url,
    pub credentials: Option<Credentials>,
}

impl RemoteInstance {
    /// Name under which a project of this peer appears locally
    #[must_use]
    pub fn local_name(&self, remote_project: &str) -> String {
        format!("{}{REMOTE_SEPARATOR}{remote_project}", self.name)
    }
}

/// Immutable name → instance table
#[derive(Debug, Clone, Default)]
pub struct RemoteRegistry {
    instances: BTreeMap<String, Arc<RemoteInstance>>,
}

impl RemoteRegistry {
    /// Empty registry: every project is local
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configuration
    ///
    /// # Errors
    /// Returns error if any entry is invalid or duplicated
    pub fn from_configs(remotes: &[RemoteConfig]) -> Result<Self, ConfigError> {
        validate_remotes(remotes)?;
        let mut instances = BTreeMap::new();
        for remote in remotes {
            let base_url = remote.validate()?;
            instances.insert(
                remote.name.clone(),
                Arc::new(RemoteInstance {
                    name: remote.name.clone(),
                    base_url,
                    credentials: remote.credentials.clone(),
                }),
            );
        }
        Ok(Self { instances })
    }

    /// Instance by name
    ///
    /// # Errors
    /// Returns [`RemoteError::UnknownInstance`] if not registered
    pub fn get(&self, name: &str) -> Result<Arc<RemoteInstance>, RemoteError> {
        self.instances
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteError::UnknownInstance(name.to_string()))
    }

    /// Split a project name into a registered instance and the peer's
    /// project name
    ///
    /// The longest registered prefix wins. Names without a registered prefix,
    /// or with nothing after the separator, are local.
    #[must_use]
    pub fn classify<'p>(&self, project: &'p str) -> Option<(Arc<RemoteInstance>, &'p str)> {
        self.instances
            .iter()
            .filter_map(|(name, instance)| {
                let rest = project
                    .strip_prefix(name.as_str())?
                    .strip_prefix(REMOTE_SEPARATOR)?;
                (!rest.is_empty()).then_some((name.len(), instance, rest))
            })
            .max_by_key(|(len, _, _)| *len)
            .map(|(_, instance, rest)| (Arc::clone(instance), rest))
    }

    /// Registered names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.instances.keys().map(String::as_str)
    }

    /// All instances in name order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RemoteInstance>> {
        self.instances.values()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
