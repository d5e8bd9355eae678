//! Project, package and file names
//!
//! Provides [`PackageRef`] for addressing a package inside the federated
//! namespace, plus validation for the three name kinds.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Separator between a remote-instance prefix and the remote project name
pub const REMOTE_SEPARATOR: char = ':';

/// A `(project, package)` pair
///
/// The project name is always expressed in the namespace of the instance that
/// holds the reference, so `RemoteInstance:BaseDistro` is a valid project here
/// even though the peer itself calls it `BaseDistro`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageRef {
    /// Project name
    pub project: String,
    /// Package name
    pub package: String,
}

impl PackageRef {
    /// Create new reference
    #[inline]
    #[must_use]
    pub fn new(project: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            package: package.into(),
        }
    }

    /// Same package name under a different project
    #[inline]
    #[must_use]
    pub fn with_project(&self, project: impl Into<String>) -> Self {
        Self::new(project, self.package.clone())
    }
}

impl Display for PackageRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.package)
    }
}

impl FromStr for PackageRef {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (project, package) = s
            .split_once('/')
            .ok_or_else(|| NameError::MissingPackage(s.to_string()))?;
        validate_project(project)?;
        validate_package(package)?;
        Ok(Self::new(project, package))
    }
}

/// Validate a project name
///
/// # Errors
/// Returns error for empty names, names containing `/`, or names with an
/// empty `:`-separated segment.
pub fn validate_project(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty("project"));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(NameError::InvalidCharacter {
            kind: "project",
            name: name.to_string(),
        });
    }
    if name.split(REMOTE_SEPARATOR).any(str::is_empty) {
        return Err(NameError::EmptySegment(name.to_string()));
    }
    Ok(())
}

/// Validate a package name
///
/// Names starting with `_` are reserved for special entries (`_meta`, ...).
///
/// # Errors
/// Returns error for empty, reserved or malformed names.
pub fn validate_package(name: &str) -> Result<(), NameError> {
    validate_plain("package", name)?;
    if name.starts_with('_') {
        return Err(NameError::Reserved(name.to_string()));
    }
    Ok(())
}

/// Validate a file name inside a package
///
/// # Errors
/// Returns error for empty or malformed names.
pub fn validate_file(name: &str) -> Result<(), NameError> {
    validate_plain("file", name)
}

fn validate_plain(kind: &'static str, name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty(kind));
    }
    if name == "." || name == ".." || name.contains(['/', '\0', '\n']) {
        return Err(NameError::InvalidCharacter {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Errors related to names
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    /// Empty name
    #[error("{0} name must not be empty")]
    Empty(&'static str),

    /// Forbidden character
    #[error("invalid {kind} name: '{name}'")]
    InvalidCharacter { kind: &'static str, name: String },

    /// Empty `:` segment in project name
    #[error("project name has an empty segment: '{0}'")]
    EmptySegment(String),

    /// Name reserved for special entries
    #[error("name is reserved: '{0}'")]
    Reserved(String),

    /// `project/package` without a package part
    #[error("missing package in '{0}'")]
    MissingPackage(String),
}
