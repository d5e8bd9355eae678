//! Source federation revision model
//!
//! Content-addressed package revisions, link declarations and the documents
//! instances exchange about them.
//!
//! # Core Concepts
//!
//! - [`ContentHash`]: 32-byte Blake3 hash of file content
//! - [`RevisionId`]: digest of a [`FileSet`] (srcmd5 / xsrcmd5)
//! - [`Link`]: declaration stored in the `_link` file of a linked package
//! - [`RevisionStore`]: immutable blobs and snapshots
//! - [`PackageDiff`]: structural comparison of two file sets
//!
//! # Example
//!
//! ```rust
//! use srcfed_revision::RevisionStore;
//!
//! let store = RevisionStore::new();
//! let a = store.commit([("my_file", &b"Hello"[..])]);
//! let b = store.commit([("my_file", &b"Hello"[..])]);
//! assert_eq!(a.srcmd5, b.srcmd5);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod diff;
mod fileset;
mod hash;
mod link;
mod model;
mod name;
mod store;

pub use diff::{line_delta, ContentDelta, EditKind, FileChange, LineEdit, PackageDiff};
pub use fileset::{FileEntry, FileSet};
pub use hash::{ContentHash, HashError, RevisionId};
pub use link::{Link, LinkError, LINK_FILE};
pub use model::{
    CommandResult, FileUpload, Hop, LinkInfo, MetaDoc, PackageMeta, ProjectListing, ProjectMeta,
    SourceListing,
};
pub use name::{
    validate_file, validate_package, validate_project, NameError, PackageRef, REMOTE_SEPARATOR,
};
pub use store::{RevisionStore, Snapshot, StoreError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
