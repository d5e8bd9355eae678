//! Local storage collaborator
//!
//! [`SourceStore`] is the interface to the metadata and blob stores of the
//! local instance. [`MemoryStore`] implements it in memory and maintains the
//! reverse link index used by `showlinked`.

use crate::error::{FederationError, Result};
use bytes::Bytes;
use dashmap::DashMap;
use srcfed_revision::{
    validate_package, validate_project, ContentHash, FileEntry, FileSet, Hop, Link, PackageMeta,
    PackageRef, ProjectMeta, RevisionId, RevisionStore, Snapshot, LINK_FILE,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Storage of local projects, packages and revisions
///
/// Reads return `None` for absent entries; the caller decides how absence is
/// reported.
pub trait SourceStore: Send + Sync + fmt::Debug {
    /// Names of all local projects
    fn projects(&self) -> Vec<String>;

    fn project_meta(&self, project: &str) -> Option<ProjectMeta>;

    /// Create or replace a project's metadata
    fn put_project(&self, meta: ProjectMeta) -> Result<()>;

    fn project_config(&self, project: &str) -> Option<Bytes>;

    fn set_project_config(&self, project: &str, config: Bytes) -> Result<()>;

    /// Signing key stored on exactly this project
    fn pubkey(&self, project: &str) -> Option<Bytes>;

    fn set_pubkey(&self, project: &str, key: Bytes) -> Result<()>;

    /// Package names, `None` if the project does not exist
    fn packages(&self, project: &str) -> Option<Vec<String>>;

    fn package_meta(&self, project: &str, package: &str) -> Option<PackageMeta>;

    /// Current revision of a package
    fn head(&self, project: &str, package: &str) -> Option<Snapshot>;

    /// Revision from the package's own history
    fn revision(&self, project: &str, package: &str, rev: &RevisionId) -> Option<Snapshot>;

    fn put_blob(&self, data: Bytes) -> FileEntry;

    /// File content by hash
    ///
    /// # Errors
    /// Returns [`FederationError::Storage`] if the blob is missing
    fn blob(&self, hash: &ContentHash) -> Result<Bytes>;

    /// Make `files` the new head of `meta.project/meta.name`
    ///
    /// All-or-nothing: either the package points at the new revision or the
    /// store is unchanged. Blobs must already be stored.
    ///
    /// # Errors
    /// Returns error if the project is missing, a blob is missing or the
    /// `_link` file is malformed
    fn commit(&self, meta: PackageMeta, files: FileSet) -> Result<Snapshot>;

    /// [`SourceStore::commit`] into `project`, creating it if it does not exist
    ///
    /// A project created here only becomes visible together with the commit.
    ///
    /// # Errors
    /// See [`SourceStore::commit`]; also fails if `meta` names another project
    fn commit_in_project(
        &self,
        project: ProjectMeta,
        meta: PackageMeta,
        files: FileSet,
    ) -> Result<Snapshot>;

    fn delete_package(&self, project: &str, package: &str) -> Result<()>;

    /// Remember how `xsrcmd5` was produced
    fn record_expansion(&self, project: &str, package: &str, xsrcmd5: RevisionId, chain: Vec<Hop>);

    /// Origin chain that produced `xsrcmd5`
    fn expansion(&self, project: &str, package: &str, xsrcmd5: &RevisionId) -> Option<Vec<Hop>>;

    /// Packages whose `_link` names `target` literally
    fn linked_packages(&self, target: &PackageRef) -> Vec<PackageRef>;
}

#[derive(Debug)]
struct ProjectEntry {
    meta: ProjectMeta,
    config: Option<Bytes>,
    pubkey: Option<Bytes>,
    packages: BTreeMap<String, PackageEntry>,
}

impl ProjectEntry {
    fn new(meta: ProjectMeta) -> Self {
        Self {
            meta,
            config: None,
            pubkey: None,
            packages: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
struct PackageEntry {
    meta: PackageMeta,
    head: RevisionId,
    history: Vec<RevisionId>,
    link: Option<Link>,
    expansions: HashMap<RevisionId, Vec<Hop>>,
}

/// In-memory [`SourceStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    revisions: RevisionStore,
    projects: DashMap<String, ProjectEntry>,
    reverse_links: DashMap<PackageRef, BTreeSet<PackageRef>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `files` and commit them as the new head
    ///
    /// # Errors
    /// See [`SourceStore::commit`]
    pub fn commit_files<I, N, D>(&self, meta: PackageMeta, files: I) -> Result<Snapshot>
    where
        I: IntoIterator<Item = (N, D)>,
        N: Into<String>,
        D: Into<Bytes>,
    {
        let set: FileSet = files
            .into_iter()
            .map(|(name, data)| (name.into(), self.revisions.put_blob(data)))
            .collect();
        self.commit(meta, set)
    }

    /// Underlying revision store
    #[must_use]
    pub fn revisions(&self) -> &RevisionStore {
        &self.revisions
    }

    /// Commit, creating the project from `create` once nothing can fail
    fn commit_into(
        &self,
        create: Option<ProjectMeta>,
        meta: PackageMeta,
        files: FileSet,
    ) -> Result<Snapshot> {
        validate_package(&meta.name)?;
        match &create {
            Some(project) => {
                validate_project(&project.name)?;
                for link in &project.links {
                    validate_project(link)?;
                }
                if project.name != meta.project {
                    return Err(FederationError::InvalidRequest(format!(
                        "package '{}' is not in project '{}'",
                        meta.name, project.name
                    )));
                }
            }
            None if !self.projects.contains_key(&meta.project) => {
                return Err(FederationError::not_found(format!(
                    "project '{}'",
                    meta.project
                )));
            }
            None => {}
        }
        let link = self.decode_link(&files)?;
        let srcmd5 = self.revisions.insert_file_set(files)?;
        let snapshot = self.revisions.snapshot(&srcmd5)?;
        let source = PackageRef::new(meta.project.clone(), meta.name.clone());

        let previous = {
            let mut project = match create {
                Some(created) => self
                    .projects
                    .entry(meta.project.clone())
                    .or_insert_with(|| {
                        tracing::info!(project = %created.name, "created project");
                        ProjectEntry::new(created)
                    }),
                None => self.projects.get_mut(&meta.project).ok_or_else(|| {
                    FederationError::not_found(format!("project '{}'", meta.project))
                })?,
            };
            match project.packages.get_mut(&meta.name) {
                Some(entry) => {
                    if entry.head != srcmd5 {
                        entry.history.push(srcmd5);
                        entry.head = srcmd5;
                    }
                    entry.meta = meta;
                    std::mem::replace(&mut entry.link, link.clone())
                }
                None => {
                    project.packages.insert(
                        meta.name.clone(),
                        PackageEntry {
                            meta,
                            head: srcmd5,
                            history: vec![srcmd5],
                            link: link.clone(),
                            expansions: HashMap::new(),
                        },
                    );
                    None
                }
            }
        };

        self.reindex(&source, previous.as_ref(), link.as_ref());
        tracing::debug!(package = %source, srcmd5 = %srcmd5.short(), "committed revision");
        Ok(snapshot)
    }


    fn decode_link(&self, files: &FileSet) -> Result<Option<Link>> {
        let Some(entry) = files.get(LINK_FILE) else {
            return Ok(None);
        };
        let data = self.revisions.blob(&entry.hash)?;
        Ok(Some(Link::decode(&data)?))
    }

    fn reindex(&self, source: &PackageRef, old: Option<&Link>, new: Option<&Link>) {
        let old = old.map(Link::target);
        let new = new.map(Link::target);
        if old == new {
            return;
        }
        if let Some(target) = old {
            if let Some(mut sources) = self.reverse_links.get_mut(&target) {
                sources.remove(source);
            }
            self.reverse_links.remove_if(&target, |_, sources| sources.is_empty());
        }
        if let Some(target) = new {
            self.reverse_links
                .entry(target)
                .or_default()
                .insert(source.clone());
        }
    }

    fn with_package<T>(
        &self,
        project: &str,
        package: &str,
        f: impl FnOnce(&PackageEntry) -> Option<T>,
    ) -> Option<T> {
        let entry = self.projects.get(project)?;
        entry.packages.get(package).and_then(f)
    }
}

impl SourceStore for MemoryStore {
    fn projects(&self) -> Vec<String> {
        let mut names: Vec<_> = self.projects.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn project_meta(&self, project: &str) -> Option<ProjectMeta> {
        self.projects.get(project).map(|e| e.meta.clone())
    }

    fn put_project(&self, meta: ProjectMeta) -> Result<()> {
        validate_project(&meta.name)?;
        for link in &meta.links {
            validate_project(link)?;
        }
        match self.projects.get_mut(&meta.name) {
            Some(mut entry) => entry.meta = meta,
            None => {
                self.projects.insert(meta.name.clone(), ProjectEntry::new(meta));
            }
        }
        Ok(())
    }

    fn project_config(&self, project: &str) -> Option<Bytes> {
        self.projects.get(project).and_then(|e| e.config.clone())
    }

    fn set_project_config(&self, project: &str, config: Bytes) -> Result<()> {
        let mut entry = self
            .projects
            .get_mut(project)
            .ok_or_else(|| FederationError::not_found(format!("project '{project}'")))?;
        entry.config = Some(config);
        Ok(())
    }

    fn pubkey(&self, project: &str) -> Option<Bytes> {
        self.projects.get(project).and_then(|e| e.pubkey.clone())
    }

    fn set_pubkey(&self, project: &str, key: Bytes) -> Result<()> {
        let mut entry = self
            .projects
            .get_mut(project)
            .ok_or_else(|| FederationError::not_found(format!("project '{project}'")))?;
        entry.pubkey = Some(key);
        Ok(())
    }

    fn packages(&self, project: &str) -> Option<Vec<String>> {
        self.projects
            .get(project)
            .map(|e| e.packages.keys().cloned().collect())
    }

    fn package_meta(&self, project: &str, package: &str) -> Option<PackageMeta> {
        self.with_package(project, package, |p| Some(p.meta.clone()))
    }

    fn head(&self, project: &str, package: &str) -> Option<Snapshot> {
        let head = self.with_package(project, package, |p| Some(p.head))?;
        self.revisions.snapshot(&head).ok()
    }

    fn revision(&self, project: &str, package: &str, rev: &RevisionId) -> Option<Snapshot> {
        let known = self.with_package(project, package, |p| Some(p.history.contains(rev)))?;
        if !known {
            return None;
        }
        self.revisions.snapshot(rev).ok()
    }

    fn put_blob(&self, data: Bytes) -> FileEntry {
        self.revisions.put_blob(data)
    }

    fn blob(&self, hash: &ContentHash) -> Result<Bytes> {
        Ok(self.revisions.blob(hash)?)
    }

    fn commit(&self, meta: PackageMeta, files: FileSet) -> Result<Snapshot> {
        self.commit_into(None, meta, files)
    }

    fn commit_in_project(
        &self,
        project: ProjectMeta,
        meta: PackageMeta,
        files: FileSet,
    ) -> Result<Snapshot> {
        self.commit_into(Some(project), meta, files)
    }

    fn delete_package(&self, project: &str, package: &str) -> Result<()> {
        let removed = self
            .projects
            .get_mut(project)
            .and_then(|mut e| e.packages.remove(package))
            .ok_or_else(|| FederationError::not_found(format!("package '{project}/{package}'")))?;
        self.reindex(&PackageRef::new(project, package), removed.link.as_ref(), None);
        Ok(())
    }

    fn record_expansion(&self, project: &str, package: &str, xsrcmd5: RevisionId, chain: Vec<Hop>) {
        if let Some(mut entry) = self.projects.get_mut(project) {
            if let Some(pkg) = entry.packages.get_mut(package) {
                pkg.expansions.insert(xsrcmd5, chain);
            }
        }
    }

    fn expansion(&self, project: &str, package: &str, xsrcmd5: &RevisionId) -> Option<Vec<Hop>> {
        self.with_package(project, package, |p| p.expansions.get(xsrcmd5).cloned())
    }

    fn linked_packages(&self, target: &PackageRef) -> Vec<PackageRef> {
        self.reverse_links
            .get(target)
            .map(|sources| sources.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_project(name: &str) -> MemoryStore {
        let store = MemoryStore::new();
        store.put_project(ProjectMeta::new(name)).unwrap();
        store
    }

    fn link_bytes(project: &str, package: &str) -> Vec<u8> {
        Link::to(&PackageRef::new(project, package)).encode().unwrap()
    }

    #[test]
    fn commit_requires_project() {
        let store = MemoryStore::new();
        let err = store
            .commit_files(PackageMeta::new("Nope", "pkg"), [("f", &b"x"[..])])
            .unwrap_err();
        assert!(matches!(err, FederationError::NotFound(_)));
    }

    #[test]
    fn commit_tracks_head_and_history() {
        let store = store_with_project("P");
        let v1 = store
            .commit_files(PackageMeta::new("P", "pkg"), [("f", &b"1"[..])])
            .unwrap();
        let v2 = store
            .commit_files(PackageMeta::new("P", "pkg"), [("f", &b"2"[..])])
            .unwrap();

        assert_eq!(store.head("P", "pkg").unwrap().srcmd5, v2.srcmd5);
        assert!(store.revision("P", "pkg", &v1.srcmd5).is_some());
        // revisions of other packages are not visible
        store
            .commit_files(PackageMeta::new("P", "other"), [("g", &b"3"[..])])
            .unwrap();
        let other = store.head("P", "other").unwrap();
        assert!(store.revision("P", "pkg", &other.srcmd5).is_none());
        assert_eq!(store.packages("P").unwrap(), vec!["other", "pkg"]);
    }

    #[test]
    fn recommitting_same_files_keeps_history() {
        let store = store_with_project("P");
        let a = store
            .commit_files(PackageMeta::new("P", "pkg"), [("f", &b"1"[..])])
            .unwrap();
        let b = store
            .commit_files(PackageMeta::new("P", "pkg"), [("f", &b"1"[..])])
            .unwrap();
        assert_eq!(a.srcmd5, b.srcmd5);
        assert_eq!(store.head("P", "pkg").unwrap().srcmd5, a.srcmd5);
    }

    #[test]
    fn commit_with_missing_blob_changes_nothing() {
        let store = store_with_project("P");
        let mut files = FileSet::new();
        files.insert("ghost", FileEntry::of(b"not stored"));
        assert!(matches!(
            store.commit(PackageMeta::new("P", "pkg"), files),
            Err(FederationError::Storage(_))
        ));
        assert!(store.package_meta("P", "pkg").is_none());
    }

    #[test]
    fn failed_commit_leaves_no_new_project() {
        let store = MemoryStore::new();
        let mut files = FileSet::new();
        files.insert("ghost", FileEntry::of(b"not stored"));
        let err = store
            .commit_in_project(
                ProjectMeta::new("home:Iggy"),
                PackageMeta::new("home:Iggy", "pkg"),
                files,
            )
            .unwrap_err();
        assert!(matches!(err, FederationError::Storage(_)));
        assert!(store.project_meta("home:Iggy").is_none());

        let mut files = FileSet::new();
        files.insert(LINK_FILE, store.put_blob(Bytes::from_static(b"nope")));
        assert!(store
            .commit_in_project(
                ProjectMeta::new("home:Iggy"),
                PackageMeta::new("home:Iggy", "pkg"),
                files,
            )
            .is_err());
        assert!(store.projects().is_empty());
    }

    #[test]
    fn commit_in_project_creates_once() {
        let store = MemoryStore::new();
        let mut meta = ProjectMeta::new("home:Iggy");
        meta.title = "Branches".into();
        let mut files = FileSet::new();
        files.insert("f", store.put_blob(Bytes::from_static(b"1")));
        store
            .commit_in_project(meta.clone(), PackageMeta::new("home:Iggy", "a"), files.clone())
            .unwrap();

        let mut renamed = meta.clone();
        renamed.title = "ignored".into();
        store
            .commit_in_project(renamed, PackageMeta::new("home:Iggy", "b"), files.clone())
            .unwrap();
        assert_eq!(store.project_meta("home:Iggy").unwrap().title, "Branches");
        assert_eq!(store.packages("home:Iggy").unwrap(), vec!["a", "b"]);

        let err = store
            .commit_in_project(meta, PackageMeta::new("Elsewhere", "c"), files)
            .unwrap_err();
        assert!(matches!(err, FederationError::InvalidRequest(_)));
    }

    #[test]
    fn malformed_link_is_rejected() {
        let store = store_with_project("P");
        let err = store
            .commit_files(PackageMeta::new("P", "pkg"), [(LINK_FILE, &b"nope"[..])])
            .unwrap_err();
        assert!(matches!(err, FederationError::InvalidRequest(_)));
    }

    #[test]
    fn reverse_index_follows_commits_and_deletes() {
        let store = store_with_project("P");
        let target_a = PackageRef::new("BaseDistro", "pack1");
        let target_b = PackageRef::new("BaseDistro", "pack2");
        let source = PackageRef::new("P", "pkg");

        store
            .commit_files(
                PackageMeta::new("P", "pkg"),
                [(LINK_FILE, link_bytes("BaseDistro", "pack1"))],
            )
            .unwrap();
        assert_eq!(store.linked_packages(&target_a), vec![source.clone()]);

        store
            .commit_files(
                PackageMeta::new("P", "pkg"),
                [(LINK_FILE, link_bytes("BaseDistro", "pack2"))],
            )
            .unwrap();
        assert!(store.linked_packages(&target_a).is_empty());
        assert_eq!(store.linked_packages(&target_b), vec![source]);

        store.delete_package("P", "pkg").unwrap();
        assert!(store.linked_packages(&target_b).is_empty());
    }

    #[test]
    fn expansion_recipes() {
        let store = store_with_project("P");
        let snap = store
            .commit_files(PackageMeta::new("P", "pkg"), [("f", &b"1"[..])])
            .unwrap();
        let xsrcmd5 = RevisionId::from_hash(ContentHash::compute(b"x"));
        let chain = vec![Hop {
            project: "P".into(),
            package: "pkg".into(),
            srcmd5: snap.srcmd5,
            remote: None,
        }];
        store.record_expansion("P", "pkg", xsrcmd5, chain.clone());
        assert_eq!(store.expansion("P", "pkg", &xsrcmd5), Some(chain));
        assert!(store.expansion("P", "other", &xsrcmd5).is_none());
    }

    #[test]
    fn project_config_and_pubkey() {
        let store = store_with_project("home:Iggy");
        assert!(store.project_config("home:Iggy").is_none());
        store
            .set_project_config("home:Iggy", Bytes::from_static(b"Type: spec"))
            .unwrap();
        store
            .set_pubkey("home:Iggy", Bytes::from_static(b"KEY"))
            .unwrap();
        assert_eq!(
            store.project_config("home:Iggy").unwrap(),
            Bytes::from_static(b"Type: spec")
        );
        assert_eq!(store.pubkey("home:Iggy").unwrap(), Bytes::from_static(b"KEY"));
        assert!(store.set_pubkey("nope", Bytes::new()).is_err());
    }

    #[test]
    fn put_project_replaces_meta_only() {
        let store = store_with_project("P");
        store
            .commit_files(PackageMeta::new("P", "pkg"), [("f", &b"1"[..])])
            .unwrap();
        let mut meta = ProjectMeta::new("P");
        meta.title = "renamed".into();
        store.put_project(meta).unwrap();
        assert_eq!(store.project_meta("P").unwrap().title, "renamed");
        assert!(store.package_meta("P", "pkg").is_some());
        assert!(store.put_project(ProjectMeta::new("bad/name")).is_err());
    }
}
