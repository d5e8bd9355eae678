//! Namespace router
//!
//! Classifies `project[/package[/file]]` paths as local or remote against the
//! registry snapshot. Pure: existence is only discovered by whoever reads the
//! resulting [`Location`].

use crate::error::{FederationError, Result};
use srcfed_remote::{RemoteInstance, RemoteRegistry};
use srcfed_revision::{validate_file, validate_package, validate_project};
use std::fmt;
use std::sync::Arc;

/// Parsed `project[/package[/file]]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePath {
    pub project: String,
    pub package: Option<String>,
    pub file: Option<String>,
}

impl SourcePath {
    /// Parse a path; a leading `/` is ignored
    ///
    /// Special entries (`_meta`, `_link`, ...) are accepted where files are.
    ///
    /// # Errors
    /// Returns [`FederationError::InvalidRequest`] for empty or malformed
    /// components
    pub fn parse(path: &str) -> Result<Self> {
        let mut parts = path.trim_start_matches('/').split('/');
        let project = parts.next().unwrap_or_default();
        validate_project(project)?;
        let package = parts.next().filter(|p| !p.is_empty());
        let file = parts.next().filter(|f| !f.is_empty());
        if parts.next().is_some() {
            return Err(FederationError::InvalidRequest(format!(
                "too many path components in '{path}'"
            )));
        }
        if let Some(package) = package {
            // `_meta` etc. may stand in the package position of a project path
            if !(file.is_none() && package.starts_with('_')) {
                validate_package(package)?;
            }
        }
        if let Some(file) = file {
            validate_file(file)?;
        }
        Ok(Self {
            project: project.to_string(),
            package: package.map(str::to_string),
            file: file.map(str::to_string),
        })
    }
}

/// Where a path lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local {
        project: String,
        package: Option<String>,
        file: Option<String>,
    },
    Remote {
        instance: Arc<RemoteInstance>,
        /// Project name on the remote instance
        project: String,
        package: Option<String>,
        file: Option<String>,
    },
}

impl Location {
    #[inline]
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// Remote instance, if any
    #[must_use]
    pub fn instance(&self) -> Option<&Arc<RemoteInstance>> {
        match self {
            Self::Local { .. } => None,
            Self::Remote { instance, .. } => Some(instance),
        }
    }

    /// Project name as seen by the instance that stores it
    #[must_use]
    pub fn project(&self) -> &str {
        match self {
            Self::Local { project, .. } | Self::Remote { project, .. } => project,
        }
    }

    #[must_use]
    pub fn package(&self) -> Option<&str> {
        match self {
            Self::Local { package, .. } | Self::Remote { package, .. } => package.as_deref(),
        }
    }

    #[must_use]
    pub fn file(&self) -> Option<&str> {
        match self {
            Self::Local { file, .. } | Self::Remote { file, .. } => file.as_deref(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { project, .. } => write!(f, "local:{project}")?,
            Self::Remote {
                instance, project, ..
            } => write!(f, "remote({}):{project}", instance.name)?,
        }
        if let Some(package) = self.package() {
            write!(f, "/{package}")?;
        }
        if let Some(file) = self.file() {
            write!(f, "/{file}")?;
        }
        Ok(())
    }
}

/// Classifier over an immutable registry snapshot
#[derive(Debug, Clone)]
pub struct NamespaceRouter {
    registry: Arc<RemoteRegistry>,
}

impl NamespaceRouter {
    #[must_use]
    pub fn new(registry: Arc<RemoteRegistry>) -> Self {
        Self { registry }
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &RemoteRegistry {
        &self.registry
    }

    /// Resolve a path to a [`Location`]
    ///
    /// # Errors
    /// Returns [`FederationError::InvalidRequest`] if the path is malformed
    pub fn resolve(&self, path: &str) -> Result<Location> {
        let SourcePath {
            project,
            package,
            file,
        } = SourcePath::parse(path)?;
        Ok(match self.registry.classify(&project) {
            Some((instance, remote_project)) => Location::Remote {
                project: remote_project.to_string(),
                instance,
                package,
                file,
            },
            None => Location::Local {
                project,
                package,
                file,
            },
        })
    }

    /// Classify a bare project name
    #[must_use]
    pub fn classify<'p>(&self, project: &'p str) -> Option<(Arc<RemoteInstance>, &'p str)> {
        self.registry.classify(project)
    }
}
