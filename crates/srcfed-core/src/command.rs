//! Command verbs
//!
//! `cmd=` values are parsed once at the boundary into [`CommandKind`], then
//! combined with their parameters into a [`Command`].

use crate::backend::BuildCommand;
use crate::error::{FederationError, Result};
use serde::{Deserialize, Serialize};
use bytes::Bytes;
use srcfed_revision::{
    validate_file, validate_package, validate_project, FileUpload, PackageRef, RevisionId,
};
use std::fmt;
use std::str::FromStr;

/// Known `cmd=` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Copy,
    Branch,
    Diff,
    ShowLinked,
    Wipe,
    Rebuild,
    #[serde(rename = "commitfiles")]
    Commit,
}

impl CommandKind {
    pub const ALL: [Self; 7] = [
        Self::Copy,
        Self::Branch,
        Self::Diff,
        Self::ShowLinked,
        Self::Wipe,
        Self::Rebuild,
        Self::Commit,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Branch => "branch",
            Self::Diff => "diff",
            Self::ShowLinked => "showlinked",
            Self::Wipe => "wipe",
            Self::Rebuild => "rebuild",
            Self::Commit => "commitfiles",
        }
    }

    /// Changes state somewhere
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        matches!(
            self,
            Self::Copy | Self::Branch | Self::Wipe | Self::Rebuild | Self::Commit
        )
    }

    /// Handled by the build backend
    #[must_use]
    pub const fn build_command(self) -> Option<BuildCommand> {
        match self {
            Self::Wipe => Some(BuildCommand::Wipe),
            Self::Rebuild => Some(BuildCommand::Rebuild),
            _ => None,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = FederationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| FederationError::UnknownCommand(s.to_string()))
    }
}

/// A parsed command with its parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Replace the target package with the expanded files of `source`
    Copy {
        source: PackageRef,
        rev: Option<RevisionId>,
    },
    /// Create a package linking back to the target package
    Branch {
        target_project: Option<String>,
        target_package: Option<String>,
    },
    /// Compare against `other`, or against the package's own link target
    Diff {
        other: Option<PackageRef>,
        rev: Option<RevisionId>,
        orev: Option<RevisionId>,
    },
    ShowLinked,
    Build(BuildCommand),
    /// Store an uploaded file set as the package's next revision
    Commit { files: Vec<(String, Bytes)> },
}

fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

fn revision(params: &[(String, String)], key: &str) -> Result<Option<RevisionId>> {
    param(params, key)
        .map(|v| {
            v.parse::<RevisionId>()
                .map_err(|e| FederationError::InvalidRequest(format!("{key}: {e}")))
        })
        .transpose()
}

impl Command {
    /// Build a command from query parameters
    ///
    /// `package` is the package the command is addressed to; `opackage`
    /// defaults to it.
    ///
    /// # Errors
    /// Returns [`FederationError::InvalidRequest`] for missing or malformed
    /// parameters
    pub fn from_params(
        kind: CommandKind,
        package: Option<&str>,
        params: &[(String, String)],
    ) -> Result<Self> {
        let need_package = || {
            package.ok_or_else(|| {
                FederationError::InvalidRequest(format!("'{kind}' needs a package"))
            })
        };

        let other = |required: bool| -> Result<Option<PackageRef>> {
            let Some(project) = param(params, "oproject") else {
                if required {
                    return Err(FederationError::InvalidRequest(format!(
                        "'{kind}' needs oproject"
                    )));
                }
                return Ok(None);
            };
            let opackage = match param(params, "opackage") {
                Some(opackage) => opackage,
                None => need_package()?,
            };
            validate_project(project)?;
            validate_package(opackage)?;
            Ok(Some(PackageRef::new(project, opackage)))
        };

        Ok(match kind {
            CommandKind::Copy => {
                need_package()?;
                Self::Copy {
                    source: other(true)?.ok_or_else(|| {
                        FederationError::InvalidRequest("'copy' needs oproject".into())
                    })?,
                    rev: revision(params, "orev")?,
                }
            }
            CommandKind::Branch => {
                need_package()?;
                let target_project = param(params, "target_project");
                let target_package = param(params, "target_package");
                if let Some(p) = target_project {
                    validate_project(p)?;
                }
                if let Some(p) = target_package {
                    validate_package(p)?;
                }
                Self::Branch {
                    target_project: target_project.map(str::to_string),
                    target_package: target_package.map(str::to_string),
                }
            }
            CommandKind::Diff => {
                need_package()?;
                Self::Diff {
                    other: other(false)?,
                    rev: revision(params, "rev")?,
                    orev: revision(params, "orev")?,
                }
            }
            CommandKind::ShowLinked => {
                need_package()?;
                Self::ShowLinked
            }
            CommandKind::Wipe => Self::Build(BuildCommand::Wipe),
            CommandKind::Rebuild => Self::Build(BuildCommand::Rebuild),
            CommandKind::Commit => {
                return Err(FederationError::InvalidRequest(
                    "'commitfiles' needs an uploaded file set".into(),
                ))
            }
        })
    }

    /// Commit of an uploaded file set
    ///
    /// # Errors
    /// Returns [`FederationError::InvalidRequest`] for undecodable content or
    /// invalid file names
    pub fn commit(upload: FileUpload) -> Result<Self> {
        let files = upload
            .into_files()
            .map_err(|e| FederationError::InvalidRequest(format!("upload: {e}")))?;
        for (name, _) in &files {
            validate_file(name)?;
        }
        Ok(Self::Commit { files })
    }

    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Copy { .. } => CommandKind::Copy,
            Self::Branch { .. } => CommandKind::Branch,
            Self::Diff { .. } => CommandKind::Diff,
            Self::ShowLinked => CommandKind::ShowLinked,
            Self::Build(BuildCommand::Wipe) => CommandKind::Wipe,
            Self::Build(BuildCommand::Rebuild) => CommandKind::Rebuild,
            Self::Commit { .. } => CommandKind::Commit,
        }
    }

    /// Query parameters that reproduce this command on a peer, `cmd` excluded
    ///
    /// `remote_project` maps local project names to the peer's names. A commit
    /// carries its files in the request body instead.
    #[must_use]
    pub fn params(&self, remote_project: impl Fn(&str) -> String) -> Vec<(String, String)> {
        let mut params = Vec::new();
        let mut push = |k: &str, v: String| params.push((k.to_string(), v));
        match self {
            Self::Copy { source, rev } => {
                push("oproject", remote_project(&source.project));
                push("opackage", source.package.clone());
                if let Some(rev) = rev {
                    push("orev", rev.to_string());
                }
            }
            Self::Branch {
                target_project,
                target_package,
            } => {
                if let Some(p) = target_project {
                    push("target_project", remote_project(p));
                }
                if let Some(p) = target_package {
                    push("target_package", p.clone());
                }
            }
            Self::Diff { other, rev, orev } => {
                if let Some(other) = other {
                    push("oproject", remote_project(&other.project));
                    push("opackage", other.package.clone());
                }
                if let Some(rev) = rev {
                    push("rev", rev.to_string());
                }
                if let Some(orev) = orev {
                    push("orev", orev.to_string());
                }
            }
            Self::ShowLinked | Self::Build(_) | Self::Commit { .. } => {}
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn parses_known_verbs() {
        for kind in CommandKind::ALL {
            assert_eq!(kind.as_str().parse::<CommandKind>().unwrap(), kind);
        }
        assert_eq!(
            "frobnicate".parse::<CommandKind>().unwrap_err(),
            FederationError::UnknownCommand("frobnicate".into())
        );
    }

    #[test]
    fn mutating_and_build_verbs() {
        assert!(CommandKind::Copy.is_mutating());
        assert!(!CommandKind::Diff.is_mutating());
        assert!(!CommandKind::ShowLinked.is_mutating());
        assert!(CommandKind::Commit.is_mutating());
        assert_eq!(CommandKind::Rebuild.build_command(), Some(BuildCommand::Rebuild));
        assert_eq!(CommandKind::Branch.build_command(), None);
    }

    #[test]
    fn copy_defaults_opackage() {
        let cmd = Command::from_params(
            CommandKind::Copy,
            Some("pack1"),
            &q(&[("oproject", "BaseDistro")]),
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::Copy {
                source: PackageRef::new("BaseDistro", "pack1"),
                rev: None,
            }
        );
    }

    #[test]
    fn copy_needs_oproject() {
        assert!(matches!(
            Command::from_params(CommandKind::Copy, Some("pack1"), &[]),
            Err(FederationError::InvalidRequest(_))
        ));
    }

    #[test]
    fn source_commands_need_package() {
        assert!(matches!(
            Command::from_params(CommandKind::ShowLinked, None, &[]),
            Err(FederationError::InvalidRequest(_))
        ));
        assert_eq!(
            Command::from_params(CommandKind::Wipe, None, &[]).unwrap(),
            Command::Build(BuildCommand::Wipe)
        );
    }

    #[test]
    fn commit_comes_from_upload_only() {
        assert!(matches!(
            Command::from_params(CommandKind::Commit, Some("p"), &[]),
            Err(FederationError::InvalidRequest(_))
        ));

        let upload = FileUpload::from_files([("new_file", &b"new"[..])]);
        assert_eq!(
            Command::commit(upload).unwrap(),
            Command::Commit {
                files: vec![("new_file".into(), Bytes::from_static(b"new"))]
            }
        );

        let sneaky = FileUpload::from_files([("../etc", &b"x"[..])]);
        assert!(Command::commit(sneaky).is_err());
    }

    #[test]
    fn bad_revision_is_rejected() {
        assert!(matches!(
            Command::from_params(CommandKind::Diff, Some("p"), &q(&[("rev", "xyz")])),
            Err(FederationError::InvalidRequest(_))
        ));
    }

    #[test]
    fn params_map_project_names() {
        let cmd = Command::Copy {
            source: PackageRef::new("RemoteInstance:BaseDistro", "pack1"),
            rev: None,
        };
        let params = cmd.params(|p| p.trim_start_matches("RemoteInstance:").to_string());
        assert_eq!(params, q(&[("oproject", "BaseDistro"), ("opackage", "pack1")]));
    }
}
