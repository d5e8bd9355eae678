//! Link declarations
//!
//! A linked package carries a `_link` file in its own file set. The file holds
//! a JSON [`Link`] naming the target package and an optional pinned revision.
//! Because the declaration is a regular file it takes part in the package's
//! srcmd5, while expansion drops it from the merged result.

use crate::hash::RevisionId;
use crate::name::{validate_package, validate_project, NameError, PackageRef};
use serde::{Deserialize, Serialize};

/// Name of the file carrying a link declaration
pub const LINK_FILE: &str = "_link";

/// Declarative reference to another package
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    /// Target project, in the namespace of the linking instance
    pub project: String,
    /// Target package
    pub package: String,
    /// Pinned revision of the target (srcmd5 or xsrcmd5)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<RevisionId>,
}

impl Link {
    /// Unpinned link to `target`
    #[must_use]
    pub fn to(target: &PackageRef) -> Self {
        Self {
            project: target.project.clone(),
            package: target.package.clone(),
            rev: None,
        }
    }

    /// Same link pinned to `rev`
    #[must_use]
    pub fn pinned(mut self, rev: RevisionId) -> Self {
        self.rev = Some(rev);
        self
    }

    /// Target as a package reference
    #[must_use]
    pub fn target(&self) -> PackageRef {
        PackageRef::new(self.project.clone(), self.package.clone())
    }

    /// Encode to the bytes stored in `_link`
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn encode(&self) -> Result<Vec<u8>, LinkError> {
        serde_json::to_vec_pretty(self).map_err(|e| LinkError::Malformed(e.to_string()))
    }

    /// Decode and validate the contents of a `_link` file
    ///
    /// # Errors
    /// Returns error if the bytes are not a link document or name an invalid
    /// target
    pub fn decode(data: &[u8]) -> Result<Self, LinkError> {
        let link: Self =
            serde_json::from_slice(data).map_err(|e| LinkError::Malformed(e.to_string()))?;
        validate_project(&link.project)?;
        validate_package(&link.package)?;
        Ok(link)
    }
}

/// Errors reading link declarations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// Not a link document
    #[error("malformed link: {0}")]
    Malformed(String),

    /// Link names an invalid target
    #[error("invalid link target: {0}")]
    InvalidTarget(#[from] NameError),
}
