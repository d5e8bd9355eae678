//! srcfed core - source federation engine
//!
//! Serves one tree of projects and packages where any project may live on a
//! remote instance and any package may be a link to another package:
//! - Routes project names to the local store or a registered remote instance
//! - Expands link chains into content-addressed file sets
//! - Dispatches `copy`, `branch`, `diff`, `showlinked`, `wipe` and `rebuild`
//! - Answers the `/source` and `/build` path grammar
//!
//! # Example
//!
//! ```rust,no_run
//! use srcfed_core::{Federation, FederationConfig, MemoryStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FederationConfig::load("srcfed.toml")?;
//! let federation = Federation::builder(config)
//!     .store(Arc::new(MemoryStore::new()))
//!     .build()?;
//!
//! let spec = federation
//!     .fetch_file("RemoteInstance:BaseDistro/pack1/pack1.spec", None)
//!     .await?;
//! println!("{} bytes", spec.len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod backend;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod federation;
pub mod logging;
pub mod resolver;
pub mod router;
pub mod service;
pub mod source;
pub mod store;

pub use backend::{BackendError, BuildBackend, BuildCommand, UnboundBackend};
pub use command::{Command, CommandKind};
pub use config::{BranchConfig, ExpansionConfig, FederationConfig};
pub use dispatcher::{
    CommandDispatcher, CommandOutput, CommandPhase, CommandReport, DiffSide, RequestContext,
};
pub use error::{ErrorClass, FederationError, Result};
pub use federation::{Federation, FederationBuilder};
pub use resolver::{ExpandedFile, ExpandedView, LinkResolver};
pub use router::{Location, NamespaceRouter, SourcePath};
pub use service::{error_response, ApiMethod, ApiRequest, ApiResponse, SourceService};
pub use source::{
    LocalSource, Located, Namespace, PackageRevision, RemoteSource, SourceAccess,
};
pub use store::{MemoryStore, SourceStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
