//! In-memory content-addressed revision store
//!
//! Blobs are keyed by [`ContentHash`], snapshots by [`RevisionId`]. Both are
//! immutable once inserted; inserting the same content twice is a no-op.

use crate::fileset::{FileEntry, FileSet};
use crate::hash::{ContentHash, RevisionId};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;

/// Immutable package revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Revision id of `files`
    pub srcmd5: RevisionId,
    /// Files of this revision
    pub files: Arc<FileSet>,
}

/// Blob and snapshot storage
#[derive(Debug, Default)]
pub struct RevisionStore {
    blobs: DashMap<ContentHash, Bytes>,
    snapshots: DashMap<RevisionId, Arc<FileSet>>,
}

impl RevisionStore {
    /// Create empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store file content
    pub fn put_blob(&self, data: impl Into<Bytes>) -> FileEntry {
        let data = data.into();
        let entry = FileEntry::of(&data);
        self.blobs.entry(entry.hash).or_insert(data);
        entry
    }

    /// Fetch file content
    ///
    /// # Errors
    /// Returns [`StoreError::MissingBlob`] if the content is unknown
    pub fn blob(&self, hash: &ContentHash) -> Result<Bytes, StoreError> {
        self.blobs
            .get(hash)
            .map(|b| b.value().clone())
            .ok_or(StoreError::MissingBlob(*hash))
    }

    /// Whether the content is present
    #[must_use]
    pub fn has_blob(&self, hash: &ContentHash) -> bool {
        self.blobs.contains_key(hash)
    }

    /// Store every file and record the resulting snapshot
    pub fn commit<I, N, D>(&self, files: I) -> Snapshot
    where
        I: IntoIterator<Item = (N, D)>,
        N: Into<String>,
        D: Into<Bytes>,
    {
        let set: FileSet = files
            .into_iter()
            .map(|(name, data)| (name.into(), self.put_blob(data)))
            .collect();
        self.insert_verified(set)
    }

    /// Record a snapshot whose blobs are already stored
    ///
    /// # Errors
    /// Returns [`StoreError::MissingBlob`] for the first file whose content is
    /// absent; nothing is recorded in that case
    pub fn insert_file_set(&self, files: FileSet) -> Result<RevisionId, StoreError> {
        if let Some((_, missing)) = files.iter().find(|(_, e)| !self.has_blob(&e.hash)) {
            return Err(StoreError::MissingBlob(missing.hash));
        }
        Ok(self.insert_verified(files).srcmd5)
    }

    fn insert_verified(&self, files: FileSet) -> Snapshot {
        let srcmd5 = files.digest();
        let files = self
            .snapshots
            .entry(srcmd5)
            .or_insert_with(|| Arc::new(files))
            .value()
            .clone();
        Snapshot { srcmd5, files }
    }

    /// Lookup a snapshot
    ///
    /// # Errors
    /// Returns [`StoreError::UnknownRevision`] if never recorded
    pub fn snapshot(&self, srcmd5: &RevisionId) -> Result<Snapshot, StoreError> {
        self.snapshots
            .get(srcmd5)
            .map(|files| Snapshot {
                srcmd5: *srcmd5,
                files: files.value().clone(),
            })
            .ok_or(StoreError::UnknownRevision(*srcmd5))
    }

    /// Number of distinct blobs
    #[must_use]
    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    /// Number of distinct snapshots
    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }
}

/// Revision store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("blob not found: {0}")]
    MissingBlob(ContentHash),

    #[error("revision not found: {0}")]
    UnknownRevision(RevisionId),
}
