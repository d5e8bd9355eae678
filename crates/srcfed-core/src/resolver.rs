//! Link resolver
//!
//! Expands a package's `_link` chain into one merged file set. Each call
//! carries its own chain of visited packages; the only shared state is the
//! expanded-view cache, which coalesces concurrent top-level expansions of the
//! same `(package, revision)`.

use crate::config::ExpansionConfig;
use crate::error::{FederationError, Result};
use crate::source::{Located, Namespace, SourceAccess};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use moka::future::Cache;
use srcfed_remote::Deadline;
use srcfed_revision::{FileEntry, FileSet, Hop, Link, PackageRef, RevisionId, LINK_FILE};
use std::collections::BTreeMap;
use std::sync::Arc;

/// File of an expanded view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandedFile {
    pub entry: FileEntry,
    /// Index into [`ExpandedView::origin_chain`]
    pub origin: usize,
}

/// Fully expanded file set of a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedView {
    /// Canonical identity of the expanded package
    pub package: PackageRef,
    /// Own revision
    pub srcmd5: RevisionId,
    /// Revision of the merged file set
    pub xsrcmd5: RevisionId,
    pub files: BTreeMap<String, ExpandedFile>,
    /// Hops traversed, starting with the package itself
    pub origin_chain: Vec<Hop>,
    /// The package's own link, if any
    pub link: Option<Link>,
}

impl ExpandedView {
    /// Merged files as a plain [`FileSet`]
    #[must_use]
    pub fn file_set(&self) -> FileSet {
        self.files
            .iter()
            .map(|(name, f)| (name.clone(), f.entry))
            .collect()
    }

    /// Hop a file was taken from
    #[must_use]
    pub fn origin(&self, file: &str) -> Option<&Hop> {
        self.files
            .get(file)
            .and_then(|f| self.origin_chain.get(f.origin))
    }

    /// Hops read from remote instances
    pub fn remote_hops(&self) -> impl Iterator<Item = &Hop> {
        self.origin_chain.iter().filter(|h| h.remote.is_some())
    }

    #[inline]
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.link.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ExpansionKey {
    identity: PackageRef,
    rev: RevisionId,
}

/// Resolver over a [`Namespace`] with an expanded-view cache
#[derive(Debug, Clone)]
pub struct LinkResolver {
    namespace: Namespace,
    cache: Cache<ExpansionKey, Arc<ExpandedView>>,
    max_depth: usize,
}

impl LinkResolver {
    #[must_use]
    pub fn new(namespace: Namespace, config: &ExpansionConfig) -> Self {
        Self {
            namespace,
            cache: Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(config.ttl())
                .support_invalidation_closures()
                .build(),
            max_depth: config.max_link_depth,
        }
    }

    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Expand `project/package` at head or at `rev`
    ///
    /// `rev` may name either an own revision or a recorded expanded revision.
    ///
    /// # Errors
    /// - [`FederationError::NotFound`] if a package in the chain or a pinned
    ///   revision is absent
    /// - [`FederationError::LinkCycle`] if the chain revisits a package or
    ///   exceeds the depth limit
    pub async fn expand(
        &self,
        project: &str,
        package: &str,
        rev: Option<&RevisionId>,
        deadline: &Deadline,
    ) -> Result<Arc<ExpandedView>> {
        let located = self
            .namespace
            .locate(&PackageRef::new(project, package), deadline)
            .await?;
        self.expand_located(located, rev, deadline).await
    }

    /// Expand an already located package
    ///
    /// # Errors
    /// See [`LinkResolver::expand`]
    pub async fn expand_located(
        &self,
        located: Located,
        rev: Option<&RevisionId>,
        deadline: &Deadline,
    ) -> Result<Arc<ExpandedView>> {
        let Located { source, identity } = located;
        let rev = match rev {
            Some(rev) => *rev,
            None => {
                source
                    .revision(&identity.package, None, deadline)
                    .await?
                    .srcmd5
            }
        };
        let key = ExpansionKey {
            identity: identity.clone(),
            rev,
        };
        let remote = source.remote().map(|(instance, _)| instance.name.clone());
        // A caller joining an expansion already in flight waits only until
        // its own deadline.
        let expansion = self.cache.try_get_with(key, async {
            tracing::debug!(package = %identity, rev = %rev.short(), "expanding");
            self.expand_package(identity.clone(), source, Some(rev), Vec::new(), Vec::new(), deadline)
                .await
                .map(Arc::new)
        });
        match deadline.limit(expansion).await {
            Some(result) => result.map_err(|e| (*e).clone()),
            None => {
                tracing::warn!(package = %identity, "expansion deadline exceeded");
                Err(FederationError::Timeout { remote })
            }
        }
    }

    fn expand_package<'a>(
        &'a self,
        identity: PackageRef,
        source: Arc<dyn SourceAccess>,
        rev: Option<RevisionId>,
        pins: Vec<Hop>,
        mut visited: Vec<PackageRef>,
        deadline: &'a Deadline,
    ) -> BoxFuture<'a, Result<ExpandedView>> {
        async move {
            if visited.contains(&identity) || visited.len() >= self.max_depth {
                visited.push(identity);
                return Err(FederationError::LinkCycle { chain: visited });
            }

            let (rev, pins) = match (rev, pins.is_empty()) {
                (Some(rev), true) => match source.expansion_recipe(&identity.package, &rev).await {
                    Some(mut chain) if !chain.is_empty() => {
                        let first = chain.remove(0);
                        tracing::debug!(package = %identity, xsrcmd5 = %rev.short(), "replaying expansion");
                        (Some(first.srcmd5), chain)
                    }
                    _ => (Some(rev), pins),
                },
                _ => (rev, pins),
            };

            let own = source
                .revision(&identity.package, rev.as_ref(), deadline)
                .await?;
            let hop = Hop {
                project: identity.project.clone(),
                package: identity.package.clone(),
                srcmd5: own.srcmd5,
                remote: source.remote().map(|(instance, _)| instance.name.clone()),
            };

            let Some(link) = own.link else {
                let files = own
                    .files
                    .iter()
                    .map(|(name, entry)| (name.to_string(), ExpandedFile { entry: *entry, origin: 0 }))
                    .collect();
                return Ok(ExpandedView {
                    package: identity,
                    srcmd5: own.srcmd5,
                    xsrcmd5: own.srcmd5,
                    files,
                    origin_chain: vec![hop],
                    link: None,
                });
            };

            let target = self.namespace.locate(&link.target(), deadline).await?;
            let mut pins = pins.into_iter();
            let target_rev = pins.next().map(|h| h.srcmd5).or(link.rev);
            visited.push(identity.clone());
            let base = self
                .expand_package(
                    target.identity,
                    target.source,
                    target_rev,
                    pins.collect(),
                    visited,
                    deadline,
                )
                .await?;

            let mut files: BTreeMap<String, ExpandedFile> = base
                .files
                .into_iter()
                .map(|(name, f)| (name, ExpandedFile { origin: f.origin + 1, ..f }))
                .collect();
            for (name, entry) in own.files.iter().filter(|(name, _)| *name != LINK_FILE) {
                files.insert(name.to_string(), ExpandedFile { entry: *entry, origin: 0 });
            }
            let xsrcmd5 = RevisionId::digest(files.iter().map(|(n, f)| (n.as_str(), &f.entry.hash)));

            let mut origin_chain = Vec::with_capacity(base.origin_chain.len() + 1);
            origin_chain.push(hop);
            origin_chain.extend(base.origin_chain);

            source.record_expansion(&identity.package, xsrcmd5, origin_chain.clone());
            Ok(ExpandedView {
                package: identity,
                srcmd5: own.srcmd5,
                xsrcmd5,
                files,
                origin_chain,
                link: Some(link),
            })
        }
        .boxed()
    }

    /// Content of `file` in an expanded view, read from the hop it came from
    ///
    /// # Errors
    /// - [`FederationError::NotFound`] if the view has no such file
    /// - [`FederationError::IntegrityMismatch`] if the origin returns
    ///   different bytes
    pub async fn read_file(&self, view: &ExpandedView, file: &str, deadline: &Deadline) -> Result<Bytes> {
        let expanded = view.files.get(file).ok_or_else(|| {
            FederationError::not_found(format!("file '{file}' in '{}'", view.package))
        })?;
        let hop = view.origin_chain.get(expanded.origin).ok_or_else(|| {
            FederationError::Storage(format!("dangling origin for '{file}' in '{}'", view.package))
        })?;
        self.namespace
            .fetch_origin_file(hop, file, &expanded.entry, deadline)
            .await
    }

    /// Drop cached views that read from `package`
    pub fn invalidate(&self, package: &PackageRef) {
        let package = package.clone();
        let result = self.cache.invalidate_entries_if(move |key, view| {
            key.identity == package || view.origin_chain.iter().any(|h| h.package_ref() == package)
        });
        if let Err(err) = result {
            tracing::warn!(error = %err, "selective invalidation failed, clearing expansion cache");
            self.cache.invalidate_all();
        }
    }

    /// Drop cached views of every package in `project`
    pub fn invalidate_project(&self, project: &str) {
        let project = project.to_string();
        let result = self
            .cache
            .invalidate_entries_if(move |key, _| key.identity.project == project);
        if let Err(err) = result {
            tracing::warn!(error = %err, "selective invalidation failed, clearing expansion cache");
            self.cache.invalidate_all();
        }
    }

    #[inline]
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}
