//! Remote instance access
//!
//! Projects named `{instance}:{project}` live on a peer deployment of the
//! same service. This crate holds the immutable [`RemoteRegistry`] of peers
//! and the [`ProxyClient`] that reads from and forwards commands to them.
//!
//! # Core Concepts
//!
//! - [`RemoteRegistry`]: prefix classification of project names
//! - [`ProxyClient`]: cached reads and command forwarding
//! - [`ResponseCache`]: moka cache keyed by `(remote, path, query)`
//! - [`Transport`]: network seam, [`HttpTransport`] in production
//! - [`Deadline`]: caller timeout carried down to every remote call

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod cache;
mod client;
mod config;
mod deadline;
mod error;
mod registry;
mod transport;

pub use cache::{CacheKey, CacheStats, ResponseCache};
pub use client::{ErrorDocument, ProxyClient, BUILD_COMMANDS, COMMIT_COMMAND, MUTATING_COMMANDS};
pub use config::{validate_remotes, CacheConfig, ConfigError, Credentials, RemoteConfig};
pub use deadline::Deadline;
pub use error::RemoteError;
pub use registry::{RemoteInstance, RemoteRegistry};
pub use transport::{HttpTransport, Method, RemoteRequest, RemoteResponse, Transport, TransportError};
