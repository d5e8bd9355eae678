//! Structural diff between two file sets
//!
//! [`PackageDiff::between`] classifies file names; contents of changed files
//! are compared separately with [`line_delta`] once the caller has fetched
//! them, since either side may live on a remote instance.

use crate::fileset::{FileEntry, FileSet};
use serde::{Deserialize, Serialize};

/// Line tables larger than this are not aligned; the change is reported as a
/// full replacement instead.
const MAX_ALIGNMENT_CELLS: usize = 4_000_000;

/// Difference between an old and a new file set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDiff {
    /// Present only on the new side
    pub added: Vec<String>,
    /// Present only on the old side
    pub removed: Vec<String>,
    /// Present on both sides with different content
    pub changed: Vec<FileChange>,
    /// Present on both sides with identical content
    pub unchanged: Vec<String>,
}

impl PackageDiff {
    /// Compare by name and content hash
    #[must_use]
    pub fn between(old: &FileSet, new: &FileSet) -> Self {
        let mut diff = Self::default();
        for (name, entry) in new.iter() {
            match old.get(name) {
                None => diff.added.push(name.to_string()),
                Some(prev) if prev.hash == entry.hash => diff.unchanged.push(name.to_string()),
                Some(prev) => diff.changed.push(FileChange {
                    name: name.to_string(),
                    old: *prev,
                    new: *entry,
                    delta: None,
                }),
            }
        }
        diff.removed = old
            .names()
            .filter(|name| !new.contains(name))
            .map(str::to_string)
            .collect();
        diff
    }

    /// Whether the two sides are identical
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// A file whose content differs between the two sides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub name: String,
    pub old: FileEntry,
    pub new: FileEntry,
    /// Filled in once both contents are known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<ContentDelta>,
}

/// Content-level difference of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "lines", rename_all = "snake_case")]
pub enum ContentDelta {
    /// Line edits turning the old text into the new one
    Text(Vec<LineEdit>),
    /// At least one side is not text
    Binary,
}

/// One removed or added line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEdit {
    pub kind: EditKind,
    /// 1-based line number in the side the line belongs to
    pub line: usize,
    pub text: String,
}

/// Direction of a [`LineEdit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    Removed,
    Added,
}

fn as_text(data: &[u8]) -> Option<&str> {
    if data.contains(&0) {
        return None;
    }
    std::str::from_utf8(data).ok()
}

/// Line delta between two contents
#[must_use]
pub fn line_delta(old: &[u8], new: &[u8]) -> ContentDelta {
    let (Some(old), Some(new)) = (as_text(old), as_text(new)) else {
        return ContentDelta::Binary;
    };
    let a: Vec<&str> = old.lines().collect();
    let b: Vec<&str> = new.lines().collect();

    // Strip common prefix and suffix before aligning the middle.
    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];

    let mut edits = Vec::new();
    if a_mid.len().saturating_mul(b_mid.len()) > MAX_ALIGNMENT_CELLS {
        push_all(&mut edits, EditKind::Removed, a_mid, prefix);
        push_all(&mut edits, EditKind::Added, b_mid, prefix);
    } else {
        align(&mut edits, a_mid, b_mid, prefix);
    }
    ContentDelta::Text(edits)
}

fn push_all(edits: &mut Vec<LineEdit>, kind: EditKind, lines: &[&str], offset: usize) {
    edits.extend(lines.iter().enumerate().map(|(i, text)| LineEdit {
        kind,
        line: offset + i + 1,
        text: (*text).to_string(),
    }));
}

/// Longest-common-subsequence alignment of two line slices
fn align(edits: &mut Vec<LineEdit>, a: &[&str], b: &[&str], offset: usize) {
    let (n, m) = (a.len(), b.len());
    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        if i < n && j < m && a[i] == b[j] {
            i += 1;
            j += 1;
        } else if j < m && (i == n || lcs[i][j + 1] >= lcs[i + 1][j]) {
            edits.push(LineEdit {
                kind: EditKind::Added,
                line: offset + j + 1,
                text: b[j].to_string(),
            });
            j += 1;
        } else {
            edits.push(LineEdit {
                kind: EditKind::Removed,
                line: offset + i + 1,
                text: a[i].to_string(),
            });
            i += 1;
        }
    }
}
