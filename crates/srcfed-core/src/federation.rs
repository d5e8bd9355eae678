//! Federation facade
//!
//! [`FederationBuilder`] wires configuration, the local store, the build
//! backend and the peer transport into one [`Federation`].

use crate::backend::{BuildBackend, UnboundBackend};
use crate::command::Command;
use crate::config::FederationConfig;
use crate::dispatcher::{CommandDispatcher, CommandOutput, RequestContext};
use crate::error::{FederationError, Result};
use crate::resolver::{ExpandedView, LinkResolver};
use crate::router::{Location, NamespaceRouter};
use crate::service::{ApiRequest, ApiResponse, SourceService};
use crate::source::Namespace;
use crate::store::{MemoryStore, SourceStore};
use bytes::Bytes;
use srcfed_remote::{Deadline, HttpTransport, ProxyClient, RemoteRegistry, ResponseCache, Transport};
use srcfed_revision::RevisionId;
use std::sync::Arc;

/// Builder for [`Federation`]
#[derive(Debug)]
pub struct FederationBuilder {
    config: FederationConfig,
    store: Option<Arc<dyn SourceStore>>,
    backend: Option<Arc<dyn BuildBackend>>,
    transport: Option<Arc<dyn Transport>>,
}

impl FederationBuilder {
    /// Create new builder
    #[inline]
    #[must_use]
    pub fn new(config: FederationConfig) -> Self {
        Self {
            config,
            store: None,
            backend: None,
            transport: None,
        }
    }

    /// Set local store
    #[inline]
    #[must_use]
    pub fn store(mut self, store: Arc<dyn SourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set build backend
    #[inline]
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn BuildBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set peer transport
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build federation
    ///
    /// Unset parts default to an empty [`MemoryStore`], the
    /// [`UnboundBackend`] and an [`HttpTransport`].
    ///
    /// # Errors
    /// Returns [`FederationError::Configuration`] if the configuration is
    /// invalid
    pub fn build(self) -> Result<Federation> {
        self.config.validate()?;
        let registry = Arc::new(RemoteRegistry::from_configs(&self.config.remotes)?);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let backend = self.backend.unwrap_or_else(|| Arc::new(UnboundBackend));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::new()));

        let proxy = ProxyClient::new(transport, ResponseCache::new(&self.config.cache));
        let namespace = Namespace::new(NamespaceRouter::new(registry), store, backend, proxy);
        let resolver = LinkResolver::new(namespace, &self.config.expansion);
        let dispatcher = CommandDispatcher::new(resolver, self.config.branch.clone());
        tracing::info!(remotes = self.config.remotes.len(), "federation ready");
        Ok(Federation {
            config: Arc::new(self.config),
            service: SourceService::new(dispatcher),
        })
    }
}

/// One instance of the source federation
#[derive(Debug, Clone)]
pub struct Federation {
    config: Arc<FederationConfig>,
    service: SourceService,
}

impl Federation {
    /// Create new builder
    #[inline]
    #[must_use]
    pub fn builder(config: FederationConfig) -> FederationBuilder {
        FederationBuilder::new(config)
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn service(&self) -> &SourceService {
        &self.service
    }

    #[inline]
    #[must_use]
    pub fn resolver(&self) -> &LinkResolver {
        self.service.dispatcher().resolver()
    }

    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        self.resolver().namespace()
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SourceStore> {
        self.namespace().store()
    }

    /// Deadline for a request starting now
    #[must_use]
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.config.request_timeout())
    }

    /// Classify a path
    ///
    /// # Errors
    /// Returns [`FederationError::InvalidRequest`] if the path is malformed
    pub fn resolve(&self, path: &str) -> Result<Location> {
        self.namespace().router().resolve(path)
    }

    /// Expand a package
    ///
    /// # Errors
    /// See [`LinkResolver::expand`]
    pub async fn expand(
        &self,
        project: &str,
        package: &str,
        rev: Option<&RevisionId>,
    ) -> Result<Arc<ExpandedView>> {
        self.resolver()
            .expand(project, package, rev, &self.deadline())
            .await
    }

    /// Expanded content of `project/package/file`
    ///
    /// # Errors
    /// Returns [`FederationError::InvalidRequest`] if `path` does not name a
    /// file, or any expansion error
    pub async fn fetch_file(&self, path: &str, rev: Option<&RevisionId>) -> Result<Bytes> {
        let location = self.resolve(path)?;
        let (Some(package), Some(file)) = (location.package(), location.file()) else {
            return Err(FederationError::InvalidRequest(format!(
                "'{path}' does not name a file"
            )));
        };
        let project = match location.instance() {
            Some(instance) => instance.local_name(location.project()),
            None => location.project().to_string(),
        };
        let deadline = self.deadline();
        let view = self
            .resolver()
            .expand(&project, package, rev, &deadline)
            .await?;
        self.resolver().read_file(&view, file, &deadline).await
    }

    /// Execute a command as `user`
    ///
    /// # Errors
    /// Returns the command's failure
    pub async fn execute(
        &self,
        project: &str,
        package: Option<&str>,
        command: Command,
        user: Option<&str>,
    ) -> Result<CommandOutput> {
        let ctx = RequestContext {
            user: user.map(str::to_string),
            deadline: self.deadline(),
        };
        self.service
            .dispatcher()
            .execute(project, package, command, &ctx)
            .await
    }

    /// Answer a path-grammar request
    ///
    /// Requests without a deadline get the configured request timeout.
    ///
    /// # Errors
    /// See [`SourceService::handle`]
    pub async fn handle(&self, request: ApiRequest) -> Result<ApiResponse> {
        let request = if request.deadline.remaining().is_none() {
            request.with_deadline(self.deadline())
        } else {
            request
        };
        self.service.handle(&request).await
    }
}
