//! Uniform access to local and remote projects
//!
//! [`SourceAccess`] is implemented by [`LocalSource`] (the local store and
//! build backend) and [`RemoteSource`] (a peer through the proxy client).
//! The link resolver and the dispatcher only see the trait.

use crate::backend::{BuildBackend, BuildCommand};
use crate::error::{FederationError, Result};
use crate::router::NamespaceRouter;
use crate::store::SourceStore;
use async_trait::async_trait;
use bytes::Bytes;
use srcfed_remote::{Deadline, ProxyClient, RemoteError, RemoteInstance};
use srcfed_revision::{
    FileEntry, FileSet, Hop, Link, MetaDoc, PackageMeta, PackageRef, ProjectListing, ProjectMeta,
    RevisionId, Snapshot, LINK_FILE, REMOTE_SEPARATOR,
};
use std::fmt;
use std::sync::Arc;

/// Own (unexpanded) revision of a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRevision {
    pub srcmd5: RevisionId,
    pub files: Arc<FileSet>,
    /// Decoded `_link`, target expressed in the local namespace
    pub link: Option<Link>,
}

/// Capabilities shared by local and remote projects
#[async_trait]
pub trait SourceAccess: Send + Sync + fmt::Debug {
    /// Project name in the local namespace
    fn name(&self) -> &str;

    /// Remote instance and the project's name there
    fn remote(&self) -> Option<(&Arc<RemoteInstance>, &str)>;

    async fn project_meta(&self, deadline: &Deadline) -> Result<ProjectMeta>;

    async fn project_listing(&self, deadline: &Deadline) -> Result<ProjectListing>;

    /// Build configuration; empty if unset
    async fn project_config(&self, deadline: &Deadline) -> Result<Bytes>;

    /// Signing key
    ///
    /// # Errors
    /// Returns [`FederationError::NotFound`] if no key is available
    async fn pubkey(&self, deadline: &Deadline) -> Result<Bytes>;

    /// Project links, searched in order for packages this project lacks
    async fn project_links(&self, deadline: &Deadline) -> Result<Vec<String>>;

    /// Project (local namespace) that really holds `package`, if reachable
    /// from here without following project links
    async fn find_package(&self, package: &str, deadline: &Deadline) -> Result<Option<String>>;

    async fn package_meta(&self, package: &str, deadline: &Deadline) -> Result<PackageMeta>;

    /// Own revision at head or at `rev`
    async fn revision(
        &self,
        package: &str,
        rev: Option<&RevisionId>,
        deadline: &Deadline,
    ) -> Result<PackageRevision>;

    /// Raw file of the package's own revision
    async fn file(
        &self,
        package: &str,
        file: &str,
        rev: Option<&RevisionId>,
        deadline: &Deadline,
    ) -> Result<Bytes>;

    /// Recorded origin chain of an expanded revision
    async fn expansion_recipe(&self, package: &str, xsrcmd5: &RevisionId) -> Option<Vec<Hop>>;

    /// Record the origin chain of an expanded revision
    fn record_expansion(&self, package: &str, xsrcmd5: RevisionId, chain: Vec<Hop>);

    /// Execute a build command
    async fn build(
        &self,
        package: Option<&str>,
        command: BuildCommand,
        deadline: &Deadline,
    ) -> Result<()>;

    /// Build results below `/build/{project}`
    async fn build_results(
        &self,
        path: &[String],
        view: Option<&str>,
        deadline: &Deadline,
    ) -> Result<Bytes>;
}

/// Project in the local store
#[derive(Debug, Clone)]
pub struct LocalSource {
    project: String,
    store: Arc<dyn SourceStore>,
    backend: Arc<dyn BuildBackend>,
}

impl LocalSource {
    #[must_use]
    pub fn new(project: impl Into<String>, store: Arc<dyn SourceStore>, backend: Arc<dyn BuildBackend>) -> Self {
        Self {
            project: project.into(),
            store,
            backend,
        }
    }

    fn meta(&self) -> Result<ProjectMeta> {
        self.store
            .project_meta(&self.project)
            .ok_or_else(|| FederationError::not_found(format!("project '{}'", self.project)))
    }

    fn snapshot(&self, package: &str, rev: Option<&RevisionId>) -> Result<Snapshot> {
        let snapshot = match rev {
            Some(rev) => self.store.revision(&self.project, package, rev),
            None => self.store.head(&self.project, package),
        };
        snapshot.ok_or_else(|| match rev {
            Some(rev) => FederationError::not_found(format!(
                "revision {rev} of '{}/{package}'",
                self.project
            )),
            None => FederationError::not_found(format!("package '{}/{package}'", self.project)),
        })
    }

    fn read(&self, entry: &FileEntry) -> Result<Bytes> {
        self.store.blob(&entry.hash)
    }
}

/// `a:b:c`, `a:b`, `a`
fn ancestors(project: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(project), |p: &&str| {
        let p = *p;
        p.rfind(REMOTE_SEPARATOR).map(|idx| &p[..idx])
    })
}

#[async_trait]
impl SourceAccess for LocalSource {
    fn name(&self) -> &str {
        &self.project
    }

    fn remote(&self) -> Option<(&Arc<RemoteInstance>, &str)> {
        None
    }

    async fn project_meta(&self, _deadline: &Deadline) -> Result<ProjectMeta> {
        self.meta()
    }

    async fn project_listing(&self, _deadline: &Deadline) -> Result<ProjectListing> {
        let packages = self
            .store
            .packages(&self.project)
            .ok_or_else(|| FederationError::not_found(format!("project '{}'", self.project)))?;
        Ok(ProjectListing {
            name: self.project.clone(),
            packages,
        })
    }

    async fn project_config(&self, _deadline: &Deadline) -> Result<Bytes> {
        self.meta()?;
        Ok(self.store.project_config(&self.project).unwrap_or_default())
    }

    async fn pubkey(&self, _deadline: &Deadline) -> Result<Bytes> {
        self.meta()?;
        ancestors(&self.project)
            .find_map(|p| self.store.pubkey(p))
            .ok_or_else(|| {
                FederationError::not_found(format!("no pubkey available for '{}'", self.project))
            })
    }

    async fn project_links(&self, _deadline: &Deadline) -> Result<Vec<String>> {
        Ok(self.meta()?.links)
    }

    async fn find_package(&self, package: &str, _deadline: &Deadline) -> Result<Option<String>> {
        Ok(self
            .store
            .package_meta(&self.project, package)
            .map(|_| self.project.clone()))
    }

    async fn package_meta(&self, package: &str, _deadline: &Deadline) -> Result<PackageMeta> {
        self.store
            .package_meta(&self.project, package)
            .ok_or_else(|| FederationError::not_found(format!("package '{}/{package}'", self.project)))
    }

    async fn revision(
        &self,
        package: &str,
        rev: Option<&RevisionId>,
        _deadline: &Deadline,
    ) -> Result<PackageRevision> {
        let snapshot = self.snapshot(package, rev)?;
        let link = match snapshot.files.get(LINK_FILE) {
            Some(entry) => Some(Link::decode(&self.read(entry)?)?),
            None => None,
        };
        Ok(PackageRevision {
            srcmd5: snapshot.srcmd5,
            files: snapshot.files,
            link,
        })
    }

    async fn file(
        &self,
        package: &str,
        file: &str,
        rev: Option<&RevisionId>,
        _deadline: &Deadline,
    ) -> Result<Bytes> {
        let snapshot = self.snapshot(package, rev)?;
        let entry = snapshot.files.get(file).ok_or_else(|| {
            FederationError::not_found(format!("file '{file}' in '{}/{package}'", self.project))
        })?;
        self.read(entry)
    }

    async fn expansion_recipe(&self, package: &str, xsrcmd5: &RevisionId) -> Option<Vec<Hop>> {
        self.store.expansion(&self.project, package, xsrcmd5)
    }

    fn record_expansion(&self, package: &str, xsrcmd5: RevisionId, chain: Vec<Hop>) {
        self.store
            .record_expansion(&self.project, package, xsrcmd5, chain);
    }

    async fn build(
        &self,
        package: Option<&str>,
        command: BuildCommand,
        _deadline: &Deadline,
    ) -> Result<()> {
        let meta = self.meta()?;
        if !meta.has_build_binding() {
            return Err(FederationError::Unsupported(format!(
                "project '{}' has no build repositories",
                self.project
            )));
        }
        Ok(self.backend.execute(&self.project, package, command).await?)
    }

    async fn build_results(
        &self,
        path: &[String],
        view: Option<&str>,
        _deadline: &Deadline,
    ) -> Result<Bytes> {
        self.meta()?;
        Ok(self.backend.results(&self.project, path, view).await?)
    }
}

/// Project on a remote instance
#[derive(Debug, Clone)]
pub struct RemoteSource {
    local_name: String,
    instance: Arc<RemoteInstance>,
    project: String,
    proxy: ProxyClient,
}

impl RemoteSource {
    #[must_use]
    pub fn new(instance: Arc<RemoteInstance>, project: impl Into<String>, proxy: ProxyClient) -> Self {
        let project = project.into();
        Self {
            local_name: instance.local_name(&project),
            instance,
            project,
            proxy,
        }
    }

    /// Map a link target of the peer into the local namespace
    fn localize(&self, link: Link) -> Link {
        Link {
            project: self.instance.local_name(&link.project),
            ..link
        }
    }
}

#[async_trait]
impl SourceAccess for RemoteSource {
    fn name(&self) -> &str {
        &self.local_name
    }

    fn remote(&self) -> Option<(&Arc<RemoteInstance>, &str)> {
        Some((&self.instance, &self.project))
    }

    async fn project_meta(&self, deadline: &Deadline) -> Result<ProjectMeta> {
        match self
            .proxy
            .fetch_meta(&self.instance, &self.project, None, deadline)
            .await?
        {
            MetaDoc::Project(meta) => Ok(ProjectMeta {
                name: self.local_name.clone(),
                links: meta
                    .links
                    .iter()
                    .map(|l| self.instance.local_name(l))
                    .collect(),
                ..meta
            }),
            MetaDoc::Package(_) => Err(FederationError::Remote {
                remote: self.instance.name.clone(),
                status: 502,
                message: "expected project metadata".into(),
            }),
        }
    }

    async fn project_listing(&self, deadline: &Deadline) -> Result<ProjectListing> {
        let listing = self
            .proxy
            .fetch_project_listing(&self.instance, &self.project, deadline)
            .await?;
        Ok(ProjectListing {
            name: self.local_name.clone(),
            ..listing
        })
    }

    async fn project_config(&self, deadline: &Deadline) -> Result<Bytes> {
        Ok(self
            .proxy
            .fetch_project_config(&self.instance, &self.project, deadline)
            .await?)
    }

    async fn pubkey(&self, deadline: &Deadline) -> Result<Bytes> {
        Ok(self
            .proxy
            .fetch_pubkey(&self.instance, &self.project, deadline)
            .await?)
    }

    // The peer applies its own project links.
    async fn project_links(&self, _deadline: &Deadline) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn find_package(&self, package: &str, deadline: &Deadline) -> Result<Option<String>> {
        match self
            .proxy
            .fetch_meta(&self.instance, &self.project, Some(package), deadline)
            .await
        {
            Ok(MetaDoc::Package(meta)) => Ok(Some(self.instance.local_name(&meta.project))),
            Ok(MetaDoc::Project(_)) => Ok(Some(self.local_name.clone())),
            Err(RemoteError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn package_meta(&self, package: &str, deadline: &Deadline) -> Result<PackageMeta> {
        match self
            .proxy
            .fetch_meta(&self.instance, &self.project, Some(package), deadline)
            .await?
        {
            MetaDoc::Package(meta) => Ok(PackageMeta {
                project: self.instance.local_name(&meta.project),
                ..meta
            }),
            MetaDoc::Project(_) => Err(FederationError::Remote {
                remote: self.instance.name.clone(),
                status: 502,
                message: "expected package metadata".into(),
            }),
        }
    }

    async fn revision(
        &self,
        package: &str,
        rev: Option<&RevisionId>,
        deadline: &Deadline,
    ) -> Result<PackageRevision> {
        let listing = self
            .proxy
            .fetch_listing(&self.instance, &self.project, package, rev, deadline)
            .await?;
        Ok(PackageRevision {
            srcmd5: listing.srcmd5,
            files: Arc::new(listing.files),
            link: listing.link.map(|l| self.localize(l)),
        })
    }

    async fn file(
        &self,
        package: &str,
        file: &str,
        rev: Option<&RevisionId>,
        deadline: &Deadline,
    ) -> Result<Bytes> {
        Ok(self
            .proxy
            .fetch_file(&self.instance, &self.project, package, file, rev, deadline)
            .await?)
    }

    async fn expansion_recipe(&self, _package: &str, _xsrcmd5: &RevisionId) -> Option<Vec<Hop>> {
        None
    }

    fn record_expansion(&self, _package: &str, _xsrcmd5: RevisionId, _chain: Vec<Hop>) {}

    async fn build(
        &self,
        package: Option<&str>,
        command: BuildCommand,
        deadline: &Deadline,
    ) -> Result<()> {
        self.proxy
            .forward_command::<serde_json::Value>(
                &self.instance,
                &self.project,
                package,
                command.as_str(),
                &[],
                deadline,
            )
            .await?;
        Ok(())
    }

    async fn build_results(
        &self,
        path: &[String],
        view: Option<&str>,
        deadline: &Deadline,
    ) -> Result<Bytes> {
        Ok(self
            .proxy
            .fetch_build(&self.instance, &self.project, path, view, deadline)
            .await?)
    }
}

/// A package found by [`Namespace::locate`]
#[derive(Debug, Clone)]
pub struct Located {
    /// Project that really holds the package
    pub source: Arc<dyn SourceAccess>,
    /// Canonical identity in the local namespace
    pub identity: PackageRef,
}

/// Entry point to every project, local or remote
#[derive(Debug, Clone)]
pub struct Namespace {
    router: NamespaceRouter,
    store: Arc<dyn SourceStore>,
    backend: Arc<dyn BuildBackend>,
    proxy: ProxyClient,
}

impl Namespace {
    #[must_use]
    pub fn new(
        router: NamespaceRouter,
        store: Arc<dyn SourceStore>,
        backend: Arc<dyn BuildBackend>,
        proxy: ProxyClient,
    ) -> Self {
        Self {
            router,
            store,
            backend,
            proxy,
        }
    }

    #[inline]
    #[must_use]
    pub fn router(&self) -> &NamespaceRouter {
        &self.router
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SourceStore> {
        &self.store
    }

    #[inline]
    #[must_use]
    pub fn proxy(&self) -> &ProxyClient {
        &self.proxy
    }

    /// Access to `project`; nothing is read yet
    #[must_use]
    pub fn open(&self, project: &str) -> Arc<dyn SourceAccess> {
        match self.router.classify(project) {
            Some((instance, remote_project)) => Arc::new(RemoteSource::new(
                instance,
                remote_project,
                self.proxy.clone(),
            )),
            None => Arc::new(LocalSource::new(
                project,
                Arc::clone(&self.store),
                Arc::clone(&self.backend),
            )),
        }
    }

    /// Find where `package` really lives, following project links
    ///
    /// # Errors
    /// Returns [`FederationError::NotFound`] if the project or the package
    /// cannot be found
    pub async fn locate(&self, package: &PackageRef, deadline: &Deadline) -> Result<Located> {
        let mut visited = Vec::new();
        let mut queue = vec![package.project.clone()];
        // depth-first over project links, in declaration order
        while let Some(project) = queue.pop() {
            if visited.contains(&project) {
                continue;
            }
            let source = self.open(&project);
            let links = if project == package.project {
                // the queried project itself must exist
                source.project_meta(deadline).await?;
                source.project_links(deadline).await?
            } else {
                match source.project_links(deadline).await {
                    Ok(links) => links,
                    Err(FederationError::NotFound(_)) => {
                        visited.push(project);
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            };

            if let Some(owner) = source.find_package(&package.package, deadline).await? {
                let source = if owner == source.name() {
                    source
                } else {
                    self.open(&owner)
                };
                tracing::debug!(package = %package, owner = %owner, "located package");
                return Ok(Located {
                    source,
                    identity: package.with_project(owner),
                });
            }
            visited.push(project);
            queue.extend(links.into_iter().rev());
        }
        Err(FederationError::not_found(format!("package '{package}'")))
    }

    /// Content of `file` as recorded at `hop`, checked against `entry`
    ///
    /// # Errors
    /// Returns [`FederationError::IntegrityMismatch`] if the bytes do not
    /// hash to `entry`
    pub async fn fetch_origin_file(
        &self,
        hop: &Hop,
        file: &str,
        entry: &FileEntry,
        deadline: &Deadline,
    ) -> Result<Bytes> {
        let source = self.open(&hop.project);
        let data = source
            .file(&hop.package, file, Some(&hop.srcmd5), deadline)
            .await?;
        if !entry.verify(&data) {
            tracing::warn!(origin = %hop.package_ref(), file, "content hash mismatch");
            return Err(FederationError::IntegrityMismatch {
                file: file.to_string(),
                origin: hop.package_ref().to_string(),
            });
        }
        Ok(data)
    }
}
