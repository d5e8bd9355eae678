//! Path-grammar service
//!
//! Answers `/source/...`, `/public/source/...` and `/build/...` requests. Peer
//! instances are queried through exactly this grammar, so a [`SourceService`]
//! is also what a remote proxy client talks to.

use crate::command::{Command, CommandKind};
use crate::dispatcher::{CommandDispatcher, RequestContext};
use crate::error::{FederationError, Result};
use crate::resolver::{ExpandedView, LinkResolver};
use crate::router::SourcePath;
use crate::source::{Located, Namespace};
use bytes::Bytes;
use serde::Serialize;
use srcfed_remote::{Deadline, ErrorDocument};
use srcfed_revision::{FileUpload, LinkInfo, PackageRef, RevisionId, SourceListing, LINK_FILE};

/// Request verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMethod {
    Get,
    Post,
}

/// Transport-neutral request
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: ApiMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub user: Option<String>,
    pub deadline: Deadline,
    /// JSON document of a POST
    pub body: Option<Bytes>,
}

impl ApiRequest {
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(ApiMethod::Get, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(ApiMethod::Post, path)
    }

    fn new(method: ApiMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            user: None,
            deadline: Deadline::none(),
            body: None,
        }
    }

    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// First non-empty value of `key`
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    fn rev(&self) -> Result<Option<RevisionId>> {
        self.param("rev")
            .map(|v| {
                v.parse()
                    .map_err(|e| FederationError::InvalidRequest(format!("rev: {e}")))
            })
            .transpose()
    }

    fn expand(&self) -> Result<Option<bool>> {
        match self.param("expand") {
            None => Ok(None),
            Some("1" | "true") => Ok(Some(true)),
            Some("0" | "false") => Ok(Some(false)),
            Some(other) => Err(FederationError::InvalidRequest(format!(
                "expand: expected 0 or 1, got '{other}'"
            ))),
        }
    }

    fn context(&self) -> RequestContext {
        RequestContext {
            user: self.user.clone(),
            deadline: self.deadline,
        }
    }
}

/// Response body
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Document(serde_json::Value),
    Blob(Bytes),
}

impl ApiResponse {
    /// Serialize `value` as a JSON document
    ///
    /// # Errors
    /// Returns [`FederationError::Storage`] if serialization fails
    pub fn document<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::Document)
            .map_err(|e| FederationError::Storage(format!("encoding response: {e}")))
    }

    /// Body bytes as sent on the wire
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Document(value) => Bytes::from(value.to_string()),
            Self::Blob(bytes) => bytes,
        }
    }
}

/// Wire status and body for a failed request
#[must_use]
pub fn error_response(err: &FederationError) -> (u16, ErrorDocument) {
    let class = err.class();
    (
        class.http_status(),
        ErrorDocument {
            code: class.code().to_string(),
            message: err.to_string(),
        },
    )
}

/// Request handler over a [`CommandDispatcher`]
#[derive(Debug, Clone)]
pub struct SourceService {
    dispatcher: CommandDispatcher,
}

impl SourceService {
    #[must_use]
    pub fn new(dispatcher: CommandDispatcher) -> Self {
        Self { dispatcher }
    }

    #[inline]
    #[must_use]
    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    fn resolver(&self) -> &LinkResolver {
        self.dispatcher.resolver()
    }

    fn namespace(&self) -> &Namespace {
        self.resolver().namespace()
    }

    /// Answer one request
    ///
    /// # Errors
    /// Returns the [`FederationError`] whose class becomes the response status
    pub async fn handle(&self, request: &ApiRequest) -> Result<ApiResponse> {
        tracing::debug!(method = ?request.method, path = %request.path, "handling request");
        let path = request.path.trim_start_matches('/');
        let (public, path) = match path.strip_prefix("public") {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => {
                (true, rest.trim_start_matches('/'))
            }
            _ => (false, path),
        };
        if public && request.method == ApiMethod::Post {
            return Err(FederationError::InvalidRequest(
                "the public interface is read-only".into(),
            ));
        }

        let (root, rest) = path.split_once('/').unwrap_or((path, ""));
        match root {
            "source" => self.source(request, rest).await,
            "build" if !public => self.build(request, rest).await,
            _ => Err(FederationError::not_found(format!("no route for '/{path}'"))),
        }
    }

    async fn source(&self, request: &ApiRequest, rest: &str) -> Result<ApiResponse> {
        if request.param("view").is_some() {
            return Err(FederationError::InvalidRequest(
                "'view' is only valid below /build".into(),
            ));
        }
        if rest.trim_matches('/').is_empty() {
            return match request.method {
                ApiMethod::Get => ApiResponse::document(&self.namespace().store().projects()),
                ApiMethod::Post => Err(FederationError::InvalidRequest(
                    "nothing to post to /source".into(),
                )),
            };
        }

        let SourcePath {
            project,
            package,
            file,
        } = SourcePath::parse(rest)?;
        let dl = &request.deadline;
        match (request.method, package.as_deref(), file.as_deref()) {
            (ApiMethod::Post, package, None) => self.command(request, &project, package).await,
            (ApiMethod::Post, _, Some(_)) => Err(FederationError::InvalidRequest(
                "commands are addressed to a project or package".into(),
            )),
            (ApiMethod::Get, None, _) => {
                let listing = self.namespace().open(&project).project_listing(dl).await?;
                ApiResponse::document(&listing)
            }
            (ApiMethod::Get, Some("_meta"), None) => {
                let meta = self.namespace().open(&project).project_meta(dl).await?;
                ApiResponse::document(&meta)
            }
            (ApiMethod::Get, Some("_config"), None) => Ok(ApiResponse::Blob(
                self.namespace().open(&project).project_config(dl).await?,
            )),
            (ApiMethod::Get, Some("_pubkey"), None) => Ok(ApiResponse::Blob(
                self.namespace().open(&project).pubkey(dl).await?,
            )),
            (ApiMethod::Get, Some(special), None) if special.starts_with('_') => Err(
                FederationError::not_found(format!("'{special}' of project '{project}'")),
            ),
            (ApiMethod::Get, Some(package), None) => {
                let listing = self.listing(request, &project, package).await?;
                ApiResponse::document(&listing)
            }
            (ApiMethod::Get, Some(package), Some("_meta")) => {
                let located = self.locate(&project, package, dl).await?;
                let meta = located
                    .source
                    .package_meta(&located.identity.package, dl)
                    .await?;
                ApiResponse::document(&meta)
            }
            (ApiMethod::Get, Some(package), Some(file)) => Ok(ApiResponse::Blob(
                self.file(request, &project, package, file).await?,
            )),
        }
    }

    async fn locate(&self, project: &str, package: &str, deadline: &Deadline) -> Result<Located> {
        self.namespace()
            .locate(&PackageRef::new(project, package), deadline)
            .await
    }

    async fn listing(&self, request: &ApiRequest, project: &str, package: &str) -> Result<SourceListing> {
        let dl = &request.deadline;
        let rev = request.rev()?;
        let located = self.locate(project, package, dl).await?;

        if request.expand()? != Some(true) {
            let own = located
                .source
                .revision(&located.identity.package, rev.as_ref(), dl)
                .await;
            match own {
                Ok(own) => {
                    let mut listing = SourceListing {
                        name: package.to_string(),
                        srcmd5: own.srcmd5,
                        files: (*own.files).clone(),
                        link: own.link,
                        linkinfo: None,
                    };
                    if let Some(link) = &listing.link {
                        let mut info = LinkInfo::for_link(link);
                        match self
                            .resolver()
                            .expand_located(located, Some(&own.srcmd5), dl)
                            .await
                        {
                            Ok(view) => {
                                info.srcmd5 = view.origin_chain.get(1).map(|h| h.srcmd5);
                                info.xsrcmd5 = Some(view.xsrcmd5);
                            }
                            Err(err) => info.error = Some(err.to_string()),
                        }
                        listing.linkinfo = Some(info);
                    }
                    return Ok(listing);
                }
                // an expanded revision is not in the package's own history
                Err(FederationError::NotFound(_)) if rev.is_some() => {}
                Err(err) => return Err(err),
            }
        }

        let view = self
            .resolver()
            .expand_located(located, rev.as_ref(), dl)
            .await?;
        Ok(expanded_listing(package, &view))
    }

    async fn file(&self, request: &ApiRequest, project: &str, package: &str, file: &str) -> Result<Bytes> {
        let dl = &request.deadline;
        let rev = request.rev()?;
        let located = self.locate(project, package, dl).await?;

        if file == LINK_FILE || request.expand()? == Some(false) {
            let source = &located.source;
            let name = &located.identity.package;
            match source.revision(name, rev.as_ref(), dl).await {
                Ok(_) => return source.file(name, file, rev.as_ref(), dl).await,
                Err(FederationError::NotFound(_)) if rev.is_some() => {}
                Err(err) => return Err(err),
            }
        }

        let view = self
            .resolver()
            .expand_located(located, rev.as_ref(), dl)
            .await?;
        self.resolver().read_file(&view, file, dl).await
    }

    async fn command(&self, request: &ApiRequest, project: &str, package: Option<&str>) -> Result<ApiResponse> {
        let kind: CommandKind = request
            .param("cmd")
            .ok_or_else(|| FederationError::InvalidRequest("missing 'cmd'".into()))?
            .parse()?;
        if kind.build_command().is_some() {
            return Err(FederationError::InvalidRequest(format!(
                "'{kind}' is addressed to /build"
            )));
        }
        let command = match kind {
            CommandKind::Commit => {
                let body = request.body.as_deref().ok_or_else(|| {
                    FederationError::InvalidRequest("'commitfiles' needs a request body".into())
                })?;
                let upload: FileUpload = serde_json::from_slice(body)
                    .map_err(|e| FederationError::InvalidRequest(format!("upload: {e}")))?;
                Command::commit(upload)?
            }
            kind => Command::from_params(kind, package, &request.query)?,
        };
        let output = self
            .dispatcher
            .execute(project, package, command, &request.context())
            .await?;
        ApiResponse::document(&output)
    }

    async fn build(&self, request: &ApiRequest, rest: &str) -> Result<ApiResponse> {
        let mut segments = rest.split('/').filter(|s| !s.is_empty());
        let project = segments
            .next()
            .ok_or_else(|| FederationError::InvalidRequest("missing project".into()))?;
        srcfed_revision::validate_project(project)?;
        let path: Vec<String> = segments.map(str::to_string).collect();

        match request.method {
            ApiMethod::Post => {
                if !path.is_empty() {
                    return Err(FederationError::InvalidRequest(
                        "build commands are addressed to /build/{project}".into(),
                    ));
                }
                let kind: CommandKind = request
                    .param("cmd")
                    .ok_or_else(|| FederationError::InvalidRequest("missing 'cmd'".into()))?
                    .parse()?;
                let Some(build) = kind.build_command() else {
                    return Err(FederationError::InvalidRequest(format!(
                        "'{kind}' is addressed to /source"
                    )));
                };
                let package = request.param("package");
                if let Some(package) = package {
                    srcfed_revision::validate_package(package)?;
                }
                let output = self
                    .dispatcher
                    .execute(project, package, Command::Build(build), &request.context())
                    .await?;
                ApiResponse::document(&output)
            }
            ApiMethod::Get => {
                let results = self
                    .namespace()
                    .open(project)
                    .build_results(&path, request.param("view"), &request.deadline)
                    .await?;
                Ok(ApiResponse::Blob(results))
            }
        }
    }
}

/// Listing of an expanded view; `_link` never appears in it
fn expanded_listing(name: &str, view: &ExpandedView) -> SourceListing {
    let linkinfo = view.link.as_ref().map(|link| LinkInfo {
        srcmd5: view.origin_chain.get(1).map(|h| h.srcmd5),
        xsrcmd5: Some(view.xsrcmd5),
        lsrcmd5: Some(view.srcmd5),
        ..LinkInfo::for_link(link)
    });
    SourceListing {
        name: name.to_string(),
        srcmd5: view.xsrcmd5,
        files: view.file_set(),
        link: None,
        linkinfo,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UnboundBackend;
    use crate::config::{BranchConfig, ExpansionConfig};
    use crate::router::NamespaceRouter;
    use crate::store::{MemoryStore, SourceStore};
    use srcfed_remote::{HttpTransport, ProxyClient, RemoteRegistry, ResponseCache};
    use srcfed_revision::{Link, PackageMeta, ProjectMeta};
    use std::sync::Arc;

    fn service() -> (Arc<MemoryStore>, SourceService) {
        let store = Arc::new(MemoryStore::new());
        store.put_project(ProjectMeta::new("Base")).unwrap();
        store.put_project(ProjectMeta::new("Work")).unwrap();
        store
            .commit_files(PackageMeta::new("Base", "pkg"), [("f", &b"base"[..])])
            .unwrap();
        let link = Link::to(&PackageRef::new("Base", "pkg")).encode().unwrap();
        store
            .commit_files(
                PackageMeta::new("Work", "pkg"),
                [(LINK_FILE, link), ("g", b"own".to_vec())],
            )
            .unwrap();

        let ns = Namespace::new(
            NamespaceRouter::new(Arc::new(RemoteRegistry::new())),
            store.clone(),
            Arc::new(UnboundBackend),
            ProxyClient::new(Arc::new(HttpTransport::new()), ResponseCache::default()),
        );
        let resolver = LinkResolver::new(ns, &ExpansionConfig::default());
        let dispatcher = CommandDispatcher::new(resolver, BranchConfig::default());
        (store, SourceService::new(dispatcher))
    }

    fn listing(response: ApiResponse) -> SourceListing {
        let ApiResponse::Document(doc) = response else {
            panic!("expected document");
        };
        serde_json::from_value(doc).unwrap()
    }

    #[tokio::test]
    async fn lists_projects() {
        let (_, svc) = service();
        let response = svc.handle(&ApiRequest::get("/source")).await.unwrap();
        assert_eq!(response, ApiResponse::Document(serde_json::json!(["Base", "Work"])));
    }

    #[tokio::test]
    async fn unexpanded_listing_carries_linkinfo() {
        let (_, svc) = service();
        let response = svc.handle(&ApiRequest::get("/source/Work/pkg")).await.unwrap();
        let listing = listing(response);
        assert!(listing.files.contains(LINK_FILE));
        assert_eq!(listing.link.unwrap().project, "Base");
        let info = listing.linkinfo.unwrap();
        assert!(info.xsrcmd5.is_some());
        assert!(info.error.is_none());
    }

    #[tokio::test]
    async fn expanded_listing_hides_link() {
        let (_, svc) = service();
        let response = svc
            .handle(&ApiRequest::get("/source/Work/pkg").with_query("expand", "1"))
            .await
            .unwrap();
        let listing = listing(response);
        assert_eq!(listing.files.names().collect::<Vec<_>>(), vec!["f", "g"]);
        let info = listing.linkinfo.unwrap();
        assert_eq!(info.xsrcmd5, Some(listing.srcmd5));
        assert!(info.lsrcmd5.is_some());
    }

    #[tokio::test]
    async fn expanded_revision_falls_back_to_expanded_listing() {
        let (_, svc) = service();
        let expanded = listing(
            svc.handle(&ApiRequest::get("/source/Work/pkg").with_query("expand", "1"))
                .await
                .unwrap(),
        );
        let response = svc
            .handle(&ApiRequest::get("/source/Work/pkg").with_query("rev", expanded.srcmd5.to_string()))
            .await
            .unwrap();
        assert_eq!(listing(response).srcmd5, expanded.srcmd5);
    }

    #[tokio::test]
    async fn file_reads_default_to_expanded() {
        let (_, svc) = service();
        let f = svc.handle(&ApiRequest::get("/source/Work/pkg/f")).await.unwrap();
        assert_eq!(f, ApiResponse::Blob(Bytes::from_static(b"base")));

        let raw = svc
            .handle(&ApiRequest::get("/source/Work/pkg/f").with_query("expand", "0"))
            .await;
        assert!(matches!(raw, Err(FederationError::NotFound(_))));

        let link = svc
            .handle(&ApiRequest::get("/source/Work/pkg/_link"))
            .await
            .unwrap()
            .into_bytes();
        assert_eq!(Link::decode(&link).unwrap().package, "pkg");
    }

    #[tokio::test]
    async fn public_interface_is_read_only() {
        let (_, svc) = service();
        assert!(svc.handle(&ApiRequest::get("/public/source/Base/pkg/f")).await.is_ok());
        let err = svc
            .handle(&ApiRequest::post("/public/source/Base/pkg").with_query("cmd", "showlinked"))
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn commitfiles_stores_uploaded_set() {
        let (store, svc) = service();
        let upload = FileUpload::from_files([("a", &b"one"[..]), ("b", &b"two"[..])]);
        let request = ApiRequest::post("/source/Work/uploaded")
            .with_query("cmd", "commitfiles")
            .with_body(serde_json::to_vec(&upload).unwrap());
        let ApiResponse::Document(doc) = svc.handle(&request).await.unwrap() else {
            panic!("expected document");
        };
        assert_eq!(doc["type"], "revision");
        assert_eq!(doc["command"], "commitfiles");

        let head = store.head("Work", "uploaded").unwrap();
        let names: Vec<&str> = head.files.names().collect();
        assert_eq!(names, ["a", "b"]);

        let err = svc
            .handle(&ApiRequest::post("/source/Work/other").with_query("cmd", "commitfiles"))
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::InvalidRequest(_)));
        assert!(store.package_meta("Work", "other").is_none());
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let (_, svc) = service();
        let err = svc
            .handle(&ApiRequest::post("/source/Base/pkg").with_query("cmd", "explode"))
            .await
            .unwrap_err();
        assert_eq!(err, FederationError::UnknownCommand("explode".into()));
        assert_eq!(error_response(&err).0, 400);
    }

    #[tokio::test]
    async fn showlinked_over_the_grammar() {
        let (_, svc) = service();
        let ApiResponse::Document(doc) = svc
            .handle(&ApiRequest::post("/source/Base/pkg").with_query("cmd", "showlinked"))
            .await
            .unwrap()
        else {
            panic!("expected document");
        };
        assert_eq!(doc["type"], "linked");
        assert_eq!(doc["packages"][0]["project"], "Work");
    }

    #[tokio::test]
    async fn view_is_rejected_below_source() {
        let (_, svc) = service();
        let err = svc
            .handle(&ApiRequest::get("/source/Base").with_query("view", "cpio"))
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn missing_pubkey_maps_to_404() {
        let (_, svc) = service();
        let err = svc.handle(&ApiRequest::get("/source/Base/_pubkey")).await.unwrap_err();
        let (status, doc) = error_response(&err);
        assert_eq!(status, 404);
        assert_eq!(doc.code, "not_found");
        assert!(doc.message.contains("no pubkey available"));
    }

    #[tokio::test]
    async fn build_results_go_to_backend() {
        let (store, svc) = service();
        assert!(store.project_meta("Base").is_some());
        let err = svc
            .handle(&ApiRequest::get("/build/Base/standard").with_query("view", "cpio"))
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::Unsupported(_)));
    }
}
