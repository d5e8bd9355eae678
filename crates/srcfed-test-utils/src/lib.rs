//! Testing utilities for the srcfed workspace
//!
//! In-process peers, a recording build backend and the two-instance
//! interconnect scenario shared by the integration tests.

#![allow(missing_docs)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use srcfed_core::{
    error_response, ApiMethod, ApiRequest, BackendError, BuildBackend, BuildCommand, Federation,
    FederationConfig, MemoryStore, SourceStore,
};
use srcfed_remote::{
    Deadline, Method, RemoteConfig, RemoteInstance, RemoteRequest, RemoteResponse, Transport,
    TransportError,
};
use srcfed_revision::{Link, PackageMeta, PackageRef, ProjectMeta, LINK_FILE};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Name under which the peer is registered on the local instance
pub const REMOTE: &str = "RemoteInstance";

/// Base URL of the peer; never resolved
pub const REMOTE_URL: &str = "http://peer.invalid/";

/// Transport delivering requests to in-process federations
#[derive(Debug, Default)]
pub struct PeerTransport {
    peers: RwLock<HashMap<String, Federation>>,
    calls: Mutex<Vec<(String, RemoteRequest)>>,
    delay: Mutex<Option<Duration>>,
}

impl PeerTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve requests for `instance` from `federation`
    pub fn add_peer(&self, instance: impl Into<String>, federation: Federation) {
        self.peers.write().insert(instance.into(), federation);
    }

    /// Delay every answer, to exercise deadlines
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Requests seen so far, with the instance they were sent to
    #[must_use]
    pub fn calls(&self) -> Vec<(String, RemoteRequest)> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl Transport for PeerTransport {
    async fn execute(
        &self,
        instance: &RemoteInstance,
        request: RemoteRequest,
    ) -> Result<RemoteResponse, TransportError> {
        self.calls
            .lock()
            .push((instance.name.clone(), request.clone()));
        let peer = self
            .peers
            .read()
            .get(&instance.name)
            .cloned()
            .ok_or_else(|| TransportError::Connect(format!("no peer '{}'", instance.name)))?;
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let api = ApiRequest {
            method: match request.method {
                Method::Get => ApiMethod::Get,
                Method::Post => ApiMethod::Post,
            },
            path: request.path(),
            query: request.query,
            user: None,
            deadline: Deadline::none(),
            body: request.body,
        };
        Ok(match peer.handle(api).await {
            Ok(response) => RemoteResponse {
                status: 200,
                body: response.into_bytes(),
            },
            Err(err) => {
                let (status, doc) = error_response(&err);
                RemoteResponse {
                    status,
                    body: Bytes::from(serde_json::to_vec(&doc).unwrap_or_default()),
                }
            }
        })
    }
}

/// Build backend that records every command and always succeeds
#[derive(Debug, Default)]
pub struct RecordingBackend {
    executed: Mutex<Vec<(String, Option<String>, BuildCommand)>>,
}

impl RecordingBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn executed(&self) -> Vec<(String, Option<String>, BuildCommand)> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl BuildBackend for RecordingBackend {
    async fn execute(
        &self,
        project: &str,
        package: Option<&str>,
        command: BuildCommand,
    ) -> Result<(), BackendError> {
        self.executed
            .lock()
            .push((project.to_string(), package.map(str::to_string), command));
        Ok(())
    }

    async fn results(
        &self,
        project: &str,
        path: &[String],
        view: Option<&str>,
    ) -> Result<Bytes, BackendError> {
        Ok(Bytes::from(format!(
            "{project}/{} view={}",
            path.join("/"),
            view.unwrap_or("-")
        )))
    }
}

/// Encoded `_link` to `project/package`
#[must_use]
pub fn link_to(project: &str, package: &str) -> Vec<u8> {
    Link::to(&PackageRef::new(project, package))
        .encode()
        .unwrap()
}

/// Encoded `_link` to `project/package` pinned at `rev`
#[must_use]
pub fn pinned_link_to(project: &str, package: &str, rev: srcfed_revision::RevisionId) -> Vec<u8> {
    Link::to(&PackageRef::new(project, package))
        .pinned(rev)
        .encode()
        .unwrap()
}

/// Project with build repositories
#[must_use]
pub fn buildable(name: &str) -> ProjectMeta {
    let mut meta = ProjectMeta::new(name);
    meta.repositories = vec!["standard".to_string()];
    meta
}

/// A local instance with one peer registered as [`REMOTE`]
///
/// Peer:
/// - `BaseDistro` (no repositories) with `pack1 = { my_file: "Hello" }`
/// - `BuildDistro` (repositories) with `pack2 = { pack2.spec }`
///
/// Local:
/// - `UseRemoteInstance/pack1` links to `RemoteInstance:BaseDistro/pack1`
/// - `LocalProject` (repositories) with `remotepackage` linking to the same
///   package and `newpackage` linking to it with an extra `new_file`
/// - `LinkedProject` project-links to `RemoteInstance:BaseDistro`
#[derive(Debug)]
pub struct Interconnect {
    pub local: Federation,
    pub local_store: Arc<MemoryStore>,
    pub local_backend: Arc<RecordingBackend>,
    pub peer: Federation,
    pub peer_store: Arc<MemoryStore>,
    pub peer_backend: Arc<RecordingBackend>,
    pub transport: Arc<PeerTransport>,
}

impl Interconnect {
    /// Build the scenario with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(FederationConfig::default())
    }

    /// Build the scenario on top of `config`; the peer entry is added
    #[must_use]
    pub fn with_config(mut config: FederationConfig) -> Self {
        let peer_store = Arc::new(MemoryStore::new());
        peer_store.put_project(ProjectMeta::new("BaseDistro")).unwrap();
        peer_store
            .commit_files(
                PackageMeta::new("BaseDistro", "pack1"),
                [("my_file", &b"Hello"[..])],
            )
            .unwrap();
        peer_store.put_project(buildable("BuildDistro")).unwrap();
        peer_store
            .commit_files(
                PackageMeta::new("BuildDistro", "pack2"),
                [("pack2.spec", &b"Name: pack2\n"[..])],
            )
            .unwrap();

        let peer_backend = Arc::new(RecordingBackend::new());
        let peer = Federation::builder(FederationConfig::default())
            .store(peer_store.clone())
            .backend(peer_backend.clone())
            .build()
            .unwrap();

        let local_store = Arc::new(MemoryStore::new());
        let remote_pack1 = link_to(&format!("{REMOTE}:BaseDistro"), "pack1");
        local_store
            .put_project(ProjectMeta::new("UseRemoteInstance"))
            .unwrap();
        local_store
            .commit_files(
                PackageMeta::new("UseRemoteInstance", "pack1"),
                [(LINK_FILE, remote_pack1.clone())],
            )
            .unwrap();
        local_store.put_project(buildable("LocalProject")).unwrap();
        local_store
            .commit_files(
                PackageMeta::new("LocalProject", "remotepackage"),
                [(LINK_FILE, remote_pack1.clone())],
            )
            .unwrap();
        local_store
            .commit_files(
                PackageMeta::new("LocalProject", "newpackage"),
                [(LINK_FILE, remote_pack1), ("new_file", b"new".to_vec())],
            )
            .unwrap();
        let mut linked = ProjectMeta::new("LinkedProject");
        linked.links = vec![format!("{REMOTE}:BaseDistro")];
        local_store.put_project(linked).unwrap();

        let transport = Arc::new(PeerTransport::new());
        transport.add_peer(REMOTE, peer.clone());
        config.remotes.push(RemoteConfig {
            name: REMOTE.to_string(),
            url: REMOTE_URL.to_string(),
            credentials: None,
        });
        let local_backend = Arc::new(RecordingBackend::new());
        let local = Federation::builder(config)
            .store(local_store.clone())
            .backend(local_backend.clone())
            .transport(transport.clone())
            .build()
            .unwrap();

        Self {
            local,
            local_store,
            local_backend,
            peer,
            peer_store,
            peer_backend,
            transport,
        }
    }

    /// Commit new content to the peer's `BaseDistro/pack1`
    pub fn update_peer_pack1(&self, content: &str) {
        self.peer_store
            .commit_files(
                PackageMeta::new("BaseDistro", "pack1"),
                [("my_file", content.as_bytes().to_vec())],
            )
            .unwrap();
        self.peer.resolver().invalidate_all();
        self.local.namespace().proxy().cache().invalidate_all();
        self.local.resolver().invalidate_all();
    }

    /// Local package names of a project
    #[must_use]
    pub fn local_packages(&self, project: &str) -> Vec<String> {
        self.local_store.packages(project).unwrap_or_default()
    }
}

impl Default for Interconnect {
    fn default() -> Self {
        Self::new()
    }
}
