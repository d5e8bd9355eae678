//! Metadata documents and listings exchanged between instances

use crate::fileset::FileSet;
use crate::hash::{HashError, RevisionId};
use crate::link::Link;
use crate::name::PackageRef;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Project metadata (`_meta` of a project)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMeta {
    /// Project name
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Project links, searched in order for packages this project lacks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    /// Build repositories; empty means no build backend binding
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<String>,
}

impl ProjectMeta {
    /// Bare metadata for `name`
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Whether build operations can be executed for this project
    #[inline]
    #[must_use]
    pub fn has_build_binding(&self) -> bool {
        !self.repositories.is_empty()
    }
}

/// Package metadata (`_meta` of a package)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMeta {
    pub project: String,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Free-form key/value metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl PackageMeta {
    /// Bare metadata for `project/name`
    #[must_use]
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Copy of this metadata relocated to `target`
    #[must_use]
    pub fn relocated(&self, target: &PackageRef) -> Self {
        Self {
            project: target.project.clone(),
            name: target.package.clone(),
            ..self.clone()
        }
    }
}

/// Either kind of metadata document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MetaDoc {
    Project(ProjectMeta),
    Package(PackageMeta),
}

/// Package names of one project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectListing {
    pub name: String,
    pub packages: Vec<String>,
}

/// Result of expanding the link of a listed package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInfo {
    pub project: String,
    pub package: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<RevisionId>,
    /// Target revision used by the expansion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srcmd5: Option<RevisionId>,
    /// Expanded revision of the linking package
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xsrcmd5: Option<RevisionId>,
    /// Own (unexpanded) revision, set on expanded listings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lsrcmd5: Option<RevisionId>,
    /// Why expansion failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LinkInfo {
    /// Info for `link` with no expansion data yet
    #[must_use]
    pub fn for_link(link: &Link) -> Self {
        Self {
            project: link.project.clone(),
            package: link.package.clone(),
            rev: link.rev,
            srcmd5: None,
            xsrcmd5: None,
            lsrcmd5: None,
            error: None,
        }
    }
}

/// File listing of a package revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceListing {
    pub name: String,
    pub srcmd5: RevisionId,
    pub files: FileSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkinfo: Option<LinkInfo>,
}

impl SourceListing {
    /// Listing of `files` under `name`; the link, if any, is not decoded here
    #[must_use]
    pub fn new(name: impl Into<String>, files: FileSet) -> Self {
        Self {
            name: name.into(),
            srcmd5: files.digest(),
            files,
            link: None,
            linkinfo: None,
        }
    }
}

/// One step of a link chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hop {
    pub project: String,
    pub package: String,
    /// Own revision of the package at this hop
    pub srcmd5: RevisionId,
    /// Remote instance the hop was read from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
}

impl Hop {
    /// Package addressed by this hop
    #[must_use]
    pub fn package_ref(&self) -> PackageRef {
        PackageRef::new(self.project.clone(), self.package.clone())
    }
}

/// Outcome of a mutating command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srcmd5: Option<RevisionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xsrcmd5: Option<RevisionId>,
}

/// Flattened file set sent to a peer for one atomic commit
///
/// Content travels hex-encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpload {
    pub files: BTreeMap<String, String>,
}

impl FileUpload {
    #[must_use]
    pub fn from_files<'a, I>(files: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        Self {
            files: files
                .into_iter()
                .map(|(name, data)| (name.to_string(), hex::encode(data)))
                .collect(),
        }
    }

    /// Decoded `(name, content)` pairs, sorted by name
    ///
    /// # Errors
    /// Returns [`HashError::HexDecode`] if any content is not valid hex
    pub fn into_files(self) -> Result<Vec<(String, Bytes)>, HashError> {
        self.files
            .into_iter()
            .map(|(name, data)| Ok((name, Bytes::from(hex::decode(data)?))))
            .collect()
    }
}
