//! File sets: the name → content mapping of one package revision

use crate::hash::{ContentHash, RevisionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference to stored file content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileEntry {
    /// Content hash of the file bytes
    pub hash: ContentHash,
    /// Length in bytes
    pub size: u64,
}

impl FileEntry {
    /// Entry describing `data`
    #[inline]
    #[must_use]
    pub fn of(data: &[u8]) -> Self {
        Self {
            hash: ContentHash::compute(data),
            size: data.len() as u64,
        }
    }

    /// Whether `data` matches this entry
    #[inline]
    #[must_use]
    pub fn verify(&self, data: &[u8]) -> bool {
        self.size == data.len() as u64 && self.hash == ContentHash::compute(data)
    }
}

/// Ordered mapping of file name to [`FileEntry`]
///
/// Ordering is by name so [`FileSet::digest`] is independent of insertion
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileSet(BTreeMap<String, FileEntry>);

impl FileSet {
    /// Empty file set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Revision id over `(name, hash)` pairs
    #[must_use]
    pub fn digest(&self) -> RevisionId {
        RevisionId::digest(self.0.iter().map(|(name, e)| (name.as_str(), &e.hash)))
    }

    /// Insert or replace a file, returning the previous entry
    pub fn insert(&mut self, name: impl Into<String>, entry: FileEntry) -> Option<FileEntry> {
        self.0.insert(name.into(), entry)
    }

    /// Remove a file
    pub fn remove(&mut self, name: &str) -> Option<FileEntry> {
        self.0.remove(name)
    }

    /// Lookup by name
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FileEntry> {
        self.0.get(name)
    }

    /// Whether `name` is present
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Iterate in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileEntry)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// File names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of files
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total content size
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.0.values().map(|e| e.size).sum()
    }
}

impl FromIterator<(String, FileEntry)> for FileSet {
    fn from_iter<I: IntoIterator<Item = (String, FileEntry)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for FileSet {
    type Item = (String, FileEntry);
    type IntoIter = std::collections::btree_map::IntoIter<String, FileEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(data: &str) -> FileEntry {
        FileEntry::of(data.as_bytes())
    }

    #[test]
    fn entry_verifies_content() {
        let e = entry("hello");
        assert_eq!(e.size, 5);
        assert!(e.verify(b"hello"));
        assert!(!e.verify(b"hellO"));
    }

    #[test]
    fn empty_set_has_stable_digest() {
        assert_eq!(FileSet::new().digest(), FileSet::new().digest());
        assert!(FileSet::new().is_empty());
    }

    #[test]
    fn insert_replaces_and_changes_digest() {
        let mut set = FileSet::new();
        set.insert("a", entry("1"));
        let before = set.digest();
        let previous = set.insert("a", entry("2"));
        assert_eq!(previous, Some(entry("1")));
        assert_ne!(before, set.digest());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn serializes_as_plain_map() {
        let mut set = FileSet::new();
        set.insert("my_file", entry("x"));
        let json = serde_json::to_value(&set).unwrap();
        assert!(json.get("my_file").is_some());
        assert_eq!(json["my_file"]["size"], 1);
        let back: FileSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, set);
    }

    proptest! {
        #[test]
        fn digest_ignores_insertion_order(
            files in proptest::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{0,16}", 0..12)
        ) {
            let forward: FileSet = files
                .iter()
                .map(|(k, v)| (k.clone(), entry(v)))
                .collect();

            let mut reversed = FileSet::new();
            for (k, v) in files.iter().rev() {
                reversed.insert(k.clone(), entry(v));
            }

            prop_assert_eq!(forward.digest(), reversed.digest());
        }
    }
}
