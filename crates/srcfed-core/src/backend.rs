//! Build backend collaborator
//!
//! The scheduler that actually runs `wipe`/`rebuild` lives outside this
//! crate; only its pass/fail contract is modelled here.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Build-affecting verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildCommand {
    Wipe,
    Rebuild,
}

impl BuildCommand {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wipe => "wipe",
            Self::Rebuild => "rebuild",
        }
    }
}

impl fmt::Display for BuildCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build backend failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("{0}")]
    Unsupported(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),
}

/// Executes build operations for local projects
#[async_trait]
pub trait BuildBackend: Send + Sync + fmt::Debug {
    /// Run `command` for a project or one of its packages
    async fn execute(
        &self,
        project: &str,
        package: Option<&str>,
        command: BuildCommand,
    ) -> Result<(), BackendError>;

    /// Build results below `/build/{project}`, serialized as `view` selects
    async fn results(
        &self,
        project: &str,
        path: &[String],
        view: Option<&str>,
    ) -> Result<Bytes, BackendError>;
}

/// Backend for instances without build workers
#[derive(Debug, Clone, Copy, Default)]
pub struct UnboundBackend;

#[async_trait]
impl BuildBackend for UnboundBackend {
    async fn execute(
        &self,
        project: &str,
        _package: Option<&str>,
        command: BuildCommand,
    ) -> Result<(), BackendError> {
        Err(BackendError::Unsupported(format!(
            "no build backend for {command} on '{project}'"
        )))
    }

    async fn results(
        &self,
        project: &str,
        _path: &[String],
        _view: Option<&str>,
    ) -> Result<Bytes, BackendError> {
        Err(BackendError::Unsupported(format!(
            "no build results for '{project}'"
        )))
    }
}
