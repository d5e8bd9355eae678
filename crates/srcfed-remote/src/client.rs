//! Remote proxy client
//!
//! Reads metadata, listings and files from peers through the response cache,
//! and forwards commands. Peers speak the same path grammar as the local
//! service: `/source/{project}[/{package}[/{file}]]` and `/build/{project}`.

use crate::cache::{CacheKey, ResponseCache};
use crate::deadline::Deadline;
use crate::error::RemoteError;
use crate::transport::{Method, RemoteRequest, Transport};
use crate::registry::RemoteInstance;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use srcfed_revision::{FileUpload, MetaDoc, PackageMeta, ProjectListing, ProjectMeta, RevisionId, SourceListing};
use std::sync::Arc;

/// Commands that change state on the peer
pub const MUTATING_COMMANDS: &[&str] = &["copy", "branch", "wipe", "rebuild", COMMIT_COMMAND];

/// Command committing an uploaded file set
pub const COMMIT_COMMAND: &str = "commitfiles";

/// Commands addressed to `/build/{project}` rather than `/source/...`
pub const BUILD_COMMANDS: &[&str] = &["wipe", "rebuild"];

/// Body of an error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDocument {
    /// Error class, e.g. `not_found`
    pub code: String,
    pub message: String,
}

/// Client for every configured remote instance
#[derive(Debug, Clone)]
pub struct ProxyClient {
    transport: Arc<dyn Transport>,
    cache: ResponseCache,
}

impl ProxyClient {
    /// Create client over `transport`
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, cache: ResponseCache) -> Self {
        Self { transport, cache }
    }

    /// Response cache, for statistics
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Project or package metadata
    ///
    /// # Errors
    /// Returns [`RemoteError`] on absence, upstream failure or timeout
    pub async fn fetch_meta(
        &self,
        instance: &RemoteInstance,
        project: &str,
        package: Option<&str>,
        deadline: &Deadline,
    ) -> Result<MetaDoc, RemoteError> {
        let request = match package {
            Some(package) => RemoteRequest::get(["source", project, package, "_meta"]),
            None => RemoteRequest::get(["source", project, "_meta"]),
        };
        let body = self.read(instance, request, deadline).await?;
        match package {
            Some(_) => decode::<PackageMeta>(instance, &body).map(MetaDoc::Package),
            None => decode::<ProjectMeta>(instance, &body).map(MetaDoc::Project),
        }
    }

    /// Package names of a project
    ///
    /// # Errors
    /// Returns [`RemoteError`] on absence, upstream failure or timeout
    pub async fn fetch_project_listing(
        &self,
        instance: &RemoteInstance,
        project: &str,
        deadline: &Deadline,
    ) -> Result<ProjectListing, RemoteError> {
        let body = self
            .read(instance, RemoteRequest::get(["source", project]), deadline)
            .await?;
        decode(instance, &body)
    }

    /// Project build configuration
    ///
    /// # Errors
    /// Returns [`RemoteError`] on absence, upstream failure or timeout
    pub async fn fetch_project_config(
        &self,
        instance: &RemoteInstance,
        project: &str,
        deadline: &Deadline,
    ) -> Result<Bytes, RemoteError> {
        self.read(instance, RemoteRequest::get(["source", project, "_config"]), deadline)
            .await
    }

    /// Project signing key
    ///
    /// # Errors
    /// Returns [`RemoteError::NotFound`] if the peer has no key
    pub async fn fetch_pubkey(
        &self,
        instance: &RemoteInstance,
        project: &str,
        deadline: &Deadline,
    ) -> Result<Bytes, RemoteError> {
        self.read(instance, RemoteRequest::get(["source", project, "_pubkey"]), deadline)
            .await
    }

    /// Unexpanded listing of a package, at head or at `rev`
    ///
    /// # Errors
    /// Returns [`RemoteError`] on absence, upstream failure or timeout
    pub async fn fetch_listing(
        &self,
        instance: &RemoteInstance,
        project: &str,
        package: &str,
        rev: Option<&RevisionId>,
        deadline: &Deadline,
    ) -> Result<SourceListing, RemoteError> {
        let mut request = RemoteRequest::get(["source", project, package]);
        if let Some(rev) = rev {
            request = request.with_query("rev", rev.to_string());
        }
        let body = self.read(instance, request, deadline).await?;
        decode(instance, &body)
    }

    /// Raw file content, at head or at `rev`
    ///
    /// # Errors
    /// Returns [`RemoteError`] on absence, upstream failure or timeout
    pub async fn fetch_file(
        &self,
        instance: &RemoteInstance,
        project: &str,
        package: &str,
        file: &str,
        rev: Option<&RevisionId>,
        deadline: &Deadline,
    ) -> Result<Bytes, RemoteError> {
        let mut request = RemoteRequest::get(["source", project, package, file]).with_query("expand", "0");
        if let Some(rev) = rev {
            request = request.with_query("rev", rev.to_string());
        }
        self.read(instance, request, deadline).await
    }

    /// Build results below `/build/{project}`
    ///
    /// `view` is passed through untouched.
    ///
    /// # Errors
    /// Returns [`RemoteError`] on absence, upstream failure or timeout
    pub async fn fetch_build(
        &self,
        instance: &RemoteInstance,
        project: &str,
        path: &[String],
        view: Option<&str>,
        deadline: &Deadline,
    ) -> Result<Bytes, RemoteError> {
        let segments = ["build".to_string(), project.to_string()]
            .into_iter()
            .chain(path.iter().cloned());
        let mut request = RemoteRequest::get(segments);
        if let Some(view) = view {
            request = request.with_query("view", view);
        }
        self.read(instance, request, deadline).await
    }

    /// Forward a command to the peer
    ///
    /// Mutating commands invalidate cached responses for the affected package
    /// before returning. Nothing is retried.
    ///
    /// # Errors
    /// Returns [`RemoteError::Unsupported`] for build commands the peer cannot
    /// execute, or any other [`RemoteError`]
    pub async fn forward_command<T: DeserializeOwned>(
        &self,
        instance: &RemoteInstance,
        project: &str,
        package: Option<&str>,
        command: &str,
        params: &[(String, String)],
        deadline: &Deadline,
    ) -> Result<T, RemoteError> {
        let build_op = BUILD_COMMANDS.contains(&command);
        let mut request = match (build_op, package) {
            (true, Some(package)) => {
                RemoteRequest::post(["build", project]).with_query("package", package)
            }
            (true, None) => RemoteRequest::post(["build", project]),
            (false, Some(package)) => RemoteRequest::post(["source", project, package]),
            (false, None) => RemoteRequest::post(["source", project]),
        };
        request = request.with_query("cmd", command);
        for (key, value) in params {
            request = request.with_query(key.clone(), value.clone());
        }

        tracing::info!(remote = %instance.name, request = %request, "forwarding command");
        let result = self.send(instance, request, build_op, deadline).await;

        if result.is_ok() && MUTATING_COMMANDS.contains(&command) {
            self.invalidate(&instance.name, project, package);
        }
        decode(instance, &result?)
    }

    /// Commit `upload` as the new head of `project/package` on the peer
    ///
    /// The peer creates the package if needed and stores every file in one
    /// revision. Cached responses for the package are dropped on success.
    ///
    /// # Errors
    /// Returns [`RemoteError`] on rejection, upstream failure or timeout
    pub async fn commit_files<T: DeserializeOwned>(
        &self,
        instance: &RemoteInstance,
        project: &str,
        package: &str,
        upload: &FileUpload,
        deadline: &Deadline,
    ) -> Result<T, RemoteError> {
        let body = serde_json::to_vec(upload).map_err(|e| RemoteError::Decode {
            remote: instance.name.clone(),
            message: e.to_string(),
        })?;
        let request = RemoteRequest::post(["source", project, package])
            .with_query("cmd", COMMIT_COMMAND)
            .with_body(body);

        tracing::info!(
            remote = %instance.name,
            request = %request,
            files = upload.files.len(),
            "uploading file set"
        );
        let result = self.send(instance, request, false, deadline).await;
        if result.is_ok() {
            self.invalidate(&instance.name, project, Some(package));
        }
        decode(instance, &result?)
    }

    /// Drop cached responses for a package of `remote`, or for the whole
    /// project when `package` is `None`
    #[inline]
    pub fn invalidate(&self, remote: &str, project: &str, package: Option<&str>) {
        self.cache.invalidate_package(remote, project, package);
    }

    /// Cached GET
    async fn read(
        &self,
        instance: &RemoteInstance,
        request: RemoteRequest,
        deadline: &Deadline,
    ) -> Result<Bytes, RemoteError> {
        debug_assert_eq!(request.method, Method::Get);
        let key = CacheKey::new(instance.name.clone(), request.path(), &request.query);
        self.cache
            .get_or_fetch(key, deadline, self.send(instance, request, false, deadline))
            .await
    }

    async fn send(
        &self,
        instance: &RemoteInstance,
        request: RemoteRequest,
        build_op: bool,
        deadline: &Deadline,
    ) -> Result<Bytes, RemoteError> {
        let path = request.path();
        let response = deadline
            .run(&instance.name, async {
                self.transport
                    .execute(instance, request)
                    .await
                    .map_err(|e| match e {
                        crate::transport::TransportError::Timeout => RemoteError::Timeout {
                            remote: instance.name.clone(),
                        },
                        other => RemoteError::Transport {
                            remote: instance.name.clone(),
                            message: other.to_string(),
                        },
                    })
            })
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(remote = %instance.name, %path, error = %err, "remote request failed");
                return Err(err);
            }
        };
        if response.is_success() {
            return Ok(response.body);
        }

        let err = classify(&instance.name, response.status, &response.body, build_op);
        if !err.is_not_found() {
            tracing::warn!(remote = %instance.name, %path, error = %err, "remote returned failure");
        }
        Err(err)
    }
}

fn classify(remote: &str, status: u16, body: &[u8], build_op: bool) -> RemoteError {
    let message = error_message(body);
    let remote = remote.to_string();
    match status {
        404 if build_op => RemoteError::Unsupported { remote, message },
        404 => RemoteError::NotFound { remote, message },
        status => RemoteError::Upstream {
            remote,
            status,
            message,
        },
    }
}

fn error_message(body: &[u8]) -> String {
    const MAX: usize = 512;
    if let Ok(doc) = serde_json::from_slice::<ErrorDocument>(body) {
        return doc.message;
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    match text.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn decode<T: DeserializeOwned>(instance: &RemoteInstance, body: &[u8]) -> Result<T, RemoteError> {
    serde_json::from_slice(body).map_err(|e| RemoteError::Decode {
        remote: instance.name.clone(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{RemoteResponse, TransportError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use srcfed_revision::{FileEntry, FileSet};
    use std::collections::HashMap;
    use std::time::Duration;

    /// Transport answering from a fixed table and recording requests
    #[derive(Debug, Default)]
    struct StaticTransport {
        routes: HashMap<String, (u16, Bytes)>,
        seen: Mutex<Vec<RemoteRequest>>,
    }

    impl StaticTransport {
        fn route(mut self, path: &str, status: u16, body: impl Into<Bytes>) -> Self {
            self.routes.insert(path.to_string(), (status, body.into()));
            self
        }

        fn calls(&self) -> usize {
            self.seen.lock().len()
        }
    }

    #[async_trait]
    impl Transport for StaticTransport {
        async fn execute(
            &self,
            _instance: &RemoteInstance,
            request: RemoteRequest,
        ) -> Result<RemoteResponse, TransportError> {
            let path = request.path();
            self.seen.lock().push(request);
            if path.ends_with("/slow") {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            let (status, body) = self
                .routes
                .get(&path)
                .cloned()
                .unwrap_or((404, Bytes::from_static(b"{\"code\":\"not_found\",\"message\":\"unknown\"}")));
            Ok(RemoteResponse { status, body })
        }
    }

    fn instance() -> RemoteInstance {
        RemoteInstance {
            name: "RemoteInstance".into(),
            base_url: url::Url::parse("http://peer.invalid/").unwrap(),
            credentials: None,
        }
    }

    fn client(transport: StaticTransport) -> (ProxyClient, Arc<StaticTransport>) {
        let transport = Arc::new(transport);
        let client = ProxyClient::new(transport.clone(), ResponseCache::default());
        (client, transport)
    }

    fn listing_body() -> Vec<u8> {
        let mut files = FileSet::new();
        files.insert("my_file", FileEntry::of(b"Hello"));
        serde_json::to_vec(&SourceListing::new("pack1", files)).unwrap()
    }

    #[tokio::test]
    async fn fetch_listing_uses_cache() {
        let (client, transport) =
            client(StaticTransport::default().route("/source/BaseDistro/pack1", 200, listing_body()));
        let deadline = Deadline::none();
        let inst = instance();

        let first = client
            .fetch_listing(&inst, "BaseDistro", "pack1", None, &deadline)
            .await
            .unwrap();
        let second = client
            .fetch_listing(&inst, "BaseDistro", "pack1", None, &deadline)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert!(first.files.contains("my_file"));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn fetch_file_reads_unexpanded() {
        let (client, transport) = client(
            StaticTransport::default().route("/source/BaseDistro/pack1/my_file", 200, &b"Hello"[..]),
        );
        let body = client
            .fetch_file(&instance(), "BaseDistro", "pack1", "my_file", None, &Deadline::none())
            .await
            .unwrap();
        assert_eq!(body, Bytes::from_static(b"Hello"));
        let seen = transport.seen.lock();
        assert!(seen[0].query.contains(&("expand".into(), "0".into())));
    }

    #[tokio::test]
    async fn missing_target_is_not_found() {
        let (client, _) = client(StaticTransport::default());
        let err = client
            .fetch_meta(&instance(), "BaseDistro", Some("nope"), &Deadline::none())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RemoteError::NotFound {
                remote: "RemoteInstance".into(),
                message: "unknown".into()
            }
        );
    }

    #[tokio::test]
    async fn other_status_is_upstream_error() {
        let (client, _) = client(StaticTransport::default().route(
            "/source/BaseDistro/_meta",
            503,
            &b"maintenance"[..],
        ));
        let err = client
            .fetch_meta(&instance(), "BaseDistro", None, &Deadline::none())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RemoteError::Upstream { status: 503, ref message, .. } if message == "maintenance"
        ));
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let (client, _) =
            client(StaticTransport::default().route("/source/BaseDistro", 200, &b"<xml/>"[..]));
        let err = client
            .fetch_project_listing(&instance(), "BaseDistro", &Deadline::none())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Decode { .. }));
    }

    #[tokio::test]
    async fn build_command_404_is_unsupported() {
        let (client, _) = client(StaticTransport::default());
        let err = client
            .forward_command::<serde_json::Value>(
                &instance(),
                "BaseDistro",
                None,
                "wipe",
                &[],
                &Deadline::none(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Unsupported { .. }));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn build_command_targets_build_path() {
        let (client, transport) = client(StaticTransport::default().route(
            "/build/BaseDistro",
            200,
            &br#"{"ok": true}"#[..],
        ));
        let out: serde_json::Value = client
            .forward_command(
                &instance(),
                "BaseDistro",
                Some("pack1"),
                "rebuild",
                &[],
                &Deadline::none(),
            )
            .await
            .unwrap();
        assert_eq!(out["ok"], true);
        let seen = transport.seen.lock();
        assert_eq!(seen[0].method, Method::Post);
        assert!(seen[0].query.contains(&("package".into(), "pack1".into())));
        assert!(seen[0].query.contains(&("cmd".into(), "rebuild".into())));
    }

    #[tokio::test]
    async fn mutating_command_invalidates_cache() {
        let (client, transport) = client(
            StaticTransport::default()
                .route("/source/BaseDistro/pack1", 200, listing_body())
                .route("/build/BaseDistro", 200, &b"{}"[..]),
        );
        let inst = instance();
        let deadline = Deadline::none();
        client
            .fetch_listing(&inst, "BaseDistro", "pack1", None, &deadline)
            .await
            .unwrap();
        client
            .forward_command::<serde_json::Value>(
                &inst,
                "BaseDistro",
                Some("pack1"),
                "wipe",
                &[],
                &deadline,
            )
            .await
            .unwrap();
        client
            .fetch_listing(&inst, "BaseDistro", "pack1", None, &deadline)
            .await
            .unwrap();
        // listing, wipe, listing again after invalidation
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn commit_files_posts_upload_and_drops_listing() {
        let listing = serde_json::to_vec(&ProjectListing {
            name: "BaseDistro".into(),
            packages: vec!["pack1".into()],
        })
        .unwrap();
        let (client, transport) = client(
            StaticTransport::default()
                .route("/source/BaseDistro", 200, listing)
                .route("/source/BaseDistro/fresh", 200, &br#"{"ok": true}"#[..]),
        );
        let inst = instance();
        let deadline = Deadline::none();
        client
            .fetch_project_listing(&inst, "BaseDistro", &deadline)
            .await
            .unwrap();

        let upload = FileUpload::from_files([("my_file", &b"Hello"[..])]);
        let out: serde_json::Value = client
            .commit_files(&inst, "BaseDistro", "fresh", &upload, &deadline)
            .await
            .unwrap();
        assert_eq!(out["ok"], true);
        {
            let seen = transport.seen.lock();
            assert_eq!(seen[1].method, Method::Post);
            assert!(seen[1].query.contains(&("cmd".into(), COMMIT_COMMAND.into())));
            let sent: FileUpload = serde_json::from_slice(seen[1].body.as_ref().unwrap()).unwrap();
            assert_eq!(sent, upload);
        }

        client
            .fetch_project_listing(&inst, "BaseDistro", &deadline)
            .await
            .unwrap();
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn deadline_yields_timeout() {
        let (client, _) = client(StaticTransport::default().route("/source/P/K/slow", 200, &b""[..]));
        let deadline = Deadline::after(Duration::from_millis(20));
        let err = client
            .fetch_file(&instance(), "P", "K", "slow", None, &deadline)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RemoteError::Timeout {
                remote: "RemoteInstance".into()
            }
        );
    }

    #[tokio::test]
    async fn expired_deadline_makes_no_call() {
        let (client, transport) = client(StaticTransport::default());
        let err = client
            .fetch_pubkey(&instance(), "P", &Deadline::after(Duration::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Timeout { .. }));
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn error_message_prefers_document() {
        let doc = br#"{"code": "not_found", "message": "no pubkey available"}"#;
        assert_eq!(error_message(doc), "no pubkey available");
        assert_eq!(error_message(b"  plain text \n"), "plain text");
    }
}
