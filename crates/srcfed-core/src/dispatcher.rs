//! Command dispatcher
//!
//! Every invocation moves through `Received → Resolved → (LocalExecuted |
//! RemoteForwarded) → Completed | Failed`; the phases are logged and returned
//! in a [`CommandReport`].

use crate::backend::BuildCommand;
use crate::command::{Command, CommandKind};
use crate::config::BranchConfig;
use crate::error::{FederationError, Result};
use crate::resolver::{ExpandedView, LinkResolver};
use crate::source::{Namespace, SourceAccess};
use bytes::Bytes;
use futures::future::{try_join, try_join_all};
use serde::{Deserialize, Serialize};
use srcfed_remote::{Deadline, RemoteInstance};
use srcfed_revision::{
    line_delta, CommandResult, FileSet, FileUpload, Link, PackageDiff, PackageMeta, PackageRef,
    ProjectMeta, RevisionId, Snapshot, LINK_FILE,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Caller identity and budget of one request
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Authenticated user, used for default branch targets
    pub user: Option<String>,
    pub deadline: Deadline,
}

impl RequestContext {
    #[must_use]
    pub fn new(deadline: Deadline) -> Self {
        Self {
            user: None,
            deadline,
        }
    }

    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// Step of one command invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandPhase {
    Received,
    Resolved,
    LocalExecuted,
    RemoteForwarded,
    Completed,
    Failed,
}

/// One side of a diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSide {
    pub project: String,
    pub package: String,
    pub srcmd5: RevisionId,
    pub xsrcmd5: RevisionId,
}

impl DiffSide {
    fn of(view: &ExpandedView) -> Self {
        Self {
            project: view.package.project.clone(),
            package: view.package.package.clone(),
            srcmd5: view.srcmd5,
            xsrcmd5: view.xsrcmd5,
        }
    }
}

/// Result document of a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandOutput {
    /// `copy`, `branch`, `commitfiles`
    Revision(CommandResult),
    Diff {
        old: DiffSide,
        new: DiffSide,
        diff: PackageDiff,
    },
    /// `showlinked`
    Linked { packages: Vec<PackageRef> },
    /// `wipe`, `rebuild`
    Build(CommandResult),
}

impl CommandOutput {
    /// Rewrite a peer's project names into the local namespace
    fn localize(self, instance: &RemoteInstance) -> Self {
        let result = |r: CommandResult| CommandResult {
            project: instance.local_name(&r.project),
            ..r
        };
        let side = |s: DiffSide| DiffSide {
            project: instance.local_name(&s.project),
            ..s
        };
        match self {
            Self::Revision(r) => Self::Revision(result(r)),
            Self::Build(r) => Self::Build(result(r)),
            Self::Diff { old, new, diff } => Self::Diff {
                old: side(old),
                new: side(new),
                diff,
            },
            Self::Linked { packages } => Self::Linked {
                packages: packages
                    .into_iter()
                    .map(|p| {
                        let project = instance.local_name(&p.project);
                        p.with_project(project)
                    })
                    .collect(),
            },
        }
    }
}

/// Trace of one command invocation
#[derive(Debug, Clone)]
pub struct CommandReport {
    pub id: Uuid,
    pub kind: CommandKind,
    pub phases: Vec<CommandPhase>,
    pub outcome: Result<CommandOutput>,
}

struct Progress {
    id: Uuid,
    kind: CommandKind,
    phases: Vec<CommandPhase>,
    started: Instant,
}

impl Progress {
    fn start(kind: CommandKind, project: &str, package: Option<&str>) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(command = %id, %kind, project, package, "command received");
        Self {
            id,
            kind,
            phases: vec![CommandPhase::Received],
            started: Instant::now(),
        }
    }

    fn enter(&mut self, phase: CommandPhase) {
        tracing::debug!(command = %self.id, kind = %self.kind, ?phase, "command phase");
        self.phases.push(phase);
    }

    fn finish(mut self, outcome: Result<CommandOutput>) -> CommandReport {
        let elapsed_ms = self.started.elapsed().as_millis();
        match &outcome {
            Ok(_) => {
                self.phases.push(CommandPhase::Completed);
                tracing::info!(command = %self.id, kind = %self.kind, elapsed_ms, "command completed");
            }
            Err(err) => {
                self.phases.push(CommandPhase::Failed);
                tracing::warn!(command = %self.id, kind = %self.kind, elapsed_ms, error = %err, "command failed");
            }
        }
        CommandReport {
            id: self.id,
            kind: self.kind,
            phases: self.phases,
            outcome,
        }
    }
}

/// Executes commands against the namespace
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    resolver: LinkResolver,
    branch: BranchConfig,
}

impl CommandDispatcher {
    #[must_use]
    pub fn new(resolver: LinkResolver, branch: BranchConfig) -> Self {
        Self { resolver, branch }
    }

    #[inline]
    #[must_use]
    pub fn resolver(&self) -> &LinkResolver {
        &self.resolver
    }

    fn namespace(&self) -> &Namespace {
        self.resolver.namespace()
    }

    /// Execute `command` addressed to `project[/package]`
    ///
    /// # Errors
    /// Returns the failure of the command; nothing is downgraded to success
    pub async fn execute(
        &self,
        project: &str,
        package: Option<&str>,
        command: Command,
        ctx: &RequestContext,
    ) -> Result<CommandOutput> {
        self.run(project, package, command, ctx).await.outcome
    }

    /// Execute `command` and return its full trace
    pub async fn run(
        &self,
        project: &str,
        package: Option<&str>,
        command: Command,
        ctx: &RequestContext,
    ) -> CommandReport {
        let mut progress = Progress::start(command.kind(), project, package);
        let outcome = self
            .dispatch(project, package, command, ctx, &mut progress)
            .await;
        progress.finish(outcome)
    }

    async fn dispatch(
        &self,
        project: &str,
        package: Option<&str>,
        command: Command,
        ctx: &RequestContext,
        progress: &mut Progress,
    ) -> Result<CommandOutput> {
        if let Command::Build(build) = command {
            return self.build(project, package, build, ctx, progress).await;
        }
        let package = package.ok_or_else(|| {
            FederationError::InvalidRequest(format!("'{}' needs a package", command.kind()))
        })?;
        let target = PackageRef::new(project, package);
        match command {
            Command::Copy { source, rev } => self.copy(&target, &source, rev, ctx, progress).await,
            Command::Branch {
                target_project,
                target_package,
            } => {
                self.branch(&target, target_project, target_package, ctx, progress)
                    .await
            }
            Command::Diff { other, rev, orev } => {
                self.diff(&target, other, rev, orev, ctx, progress).await
            }
            Command::ShowLinked => self.show_linked(&target, ctx, progress).await,
            Command::Commit { files } => self.commit(&target, files, ctx, progress).await,
            Command::Build(_) => Err(FederationError::InvalidRequest(
                "build commands are addressed to /build".into(),
            )),
        }
    }

    /// Forward `command` for `project` to the peer that stores it
    async fn forward(
        &self,
        source: &dyn SourceAccess,
        package: Option<&str>,
        command: &Command,
        ctx: &RequestContext,
        progress: &mut Progress,
    ) -> Result<CommandOutput> {
        let Some((instance, remote_project)) = source.remote() else {
            return Err(FederationError::Storage(format!(
                "'{}' is not a remote project",
                source.name()
            )));
        };
        let router = self.namespace().router();
        let params = command.params(|p| match router.classify(p) {
            Some((_, remote)) => remote.to_string(),
            None => p.to_string(),
        });
        let output: CommandOutput = self
            .namespace()
            .proxy()
            .forward_command(
                instance,
                remote_project,
                package,
                command.kind().as_str(),
                &params,
                &ctx.deadline,
            )
            .await?;
        progress.enter(CommandPhase::RemoteForwarded);
        Ok(output.localize(instance))
    }

    /// Whether `project` lives on `instance`
    fn on_instance(&self, project: &str, instance: &RemoteInstance) -> bool {
        self.namespace()
            .router()
            .classify(project)
            .is_some_and(|(other, _)| other.name == instance.name)
    }

    async fn copy(
        &self,
        target: &PackageRef,
        source: &PackageRef,
        rev: Option<RevisionId>,
        ctx: &RequestContext,
        progress: &mut Progress,
    ) -> Result<CommandOutput> {
        let ns = self.namespace();
        let destination = ns.open(&target.project);
        if let Some((instance, _)) = destination.remote() {
            if self.on_instance(&source.project, instance) {
                let command = Command::Copy {
                    source: source.clone(),
                    rev,
                };
                let output = self
                    .forward(destination.as_ref(), Some(&target.package), &command, ctx, progress)
                    .await?;
                self.resolver.invalidate(target);
                return Ok(output);
            }
        } else {
            destination.project_meta(&ctx.deadline).await?;
        }

        let located = ns.locate(source, &ctx.deadline).await?;
        let origin = Arc::clone(&located.source);
        let view = self
            .resolver
            .expand_located(located, rev.as_ref(), &ctx.deadline)
            .await?;
        progress.enter(CommandPhase::Resolved);
        let files = self.flatten(&view, &ctx.deadline).await?;

        if destination.remote().is_some() {
            let output = self
                .upload(destination.as_ref(), target, &files, ctx, progress)
                .await?;
            return Ok(match output {
                CommandOutput::Revision(result) => CommandOutput::Revision(CommandResult {
                    command: CommandKind::Copy.as_str().to_string(),
                    xsrcmd5: result.xsrcmd5.or(result.srcmd5),
                    ..result
                }),
                other => other,
            });
        }

        let store = ns.store();
        let meta = match store.package_meta(&target.project, &target.package) {
            Some(meta) => meta,
            None => origin
                .package_meta(&view.package.package, &ctx.deadline)
                .await
                .map_or_else(
                    |_| PackageMeta::new(target.project.clone(), target.package.clone()),
                    |meta| meta.relocated(target),
                ),
        };
        let snapshot = self.store_files(meta, files)?;
        progress.enter(CommandPhase::LocalExecuted);
        self.resolver.invalidate(target);

        Ok(CommandOutput::Revision(CommandResult {
            project: target.project.clone(),
            package: Some(target.package.clone()),
            command: CommandKind::Copy.as_str().to_string(),
            srcmd5: Some(snapshot.srcmd5),
            xsrcmd5: Some(snapshot.srcmd5),
        }))
    }

    /// Make `files` the next revision of `target`, here or on its peer
    async fn commit(
        &self,
        target: &PackageRef,
        files: Vec<(String, Bytes)>,
        ctx: &RequestContext,
        progress: &mut Progress,
    ) -> Result<CommandOutput> {
        let destination = self.namespace().open(&target.project);
        progress.enter(CommandPhase::Resolved);
        if destination.remote().is_some() {
            return self
                .upload(destination.as_ref(), target, &files, ctx, progress)
                .await;
        }

        destination.project_meta(&ctx.deadline).await?;
        let meta = self
            .namespace()
            .store()
            .package_meta(&target.project, &target.package)
            .unwrap_or_else(|| PackageMeta::new(target.project.clone(), target.package.clone()));
        let snapshot = self.store_files(meta, files)?;
        progress.enter(CommandPhase::LocalExecuted);
        self.resolver.invalidate(target);

        Ok(CommandOutput::Revision(CommandResult {
            project: target.project.clone(),
            package: Some(target.package.clone()),
            command: CommandKind::Commit.as_str().to_string(),
            srcmd5: Some(snapshot.srcmd5),
            xsrcmd5: None,
        }))
    }

    /// Contents of every file of an expanded view
    async fn flatten(
        &self,
        view: &ExpandedView,
        deadline: &Deadline,
    ) -> Result<Vec<(String, Bytes)>> {
        let contents = try_join_all(
            view.files
                .keys()
                .map(|name| self.resolver.read_file(view, name, deadline)),
        )
        .await?;
        Ok(view.files.keys().cloned().zip(contents).collect())
    }

    fn store_files(&self, meta: PackageMeta, files: Vec<(String, Bytes)>) -> Result<Snapshot> {
        let store = self.namespace().store();
        let set: FileSet = files
            .into_iter()
            .map(|(name, data)| (name, store.put_blob(data)))
            .collect();
        store.commit(meta, set)
    }

    /// Send `files` to the peer holding `destination` as one commit
    async fn upload(
        &self,
        destination: &dyn SourceAccess,
        target: &PackageRef,
        files: &[(String, Bytes)],
        ctx: &RequestContext,
        progress: &mut Progress,
    ) -> Result<CommandOutput> {
        let Some((instance, remote_project)) = destination.remote() else {
            return Err(FederationError::Storage(format!(
                "'{}' is not a remote project",
                destination.name()
            )));
        };
        let upload =
            FileUpload::from_files(files.iter().map(|(name, data)| (name.as_str(), &data[..])));
        let output: CommandOutput = self
            .namespace()
            .proxy()
            .commit_files(instance, remote_project, &target.package, &upload, &ctx.deadline)
            .await?;
        progress.enter(CommandPhase::RemoteForwarded);
        self.resolver.invalidate(target);
        Ok(output.localize(instance))
    }

    async fn branch(
        &self,
        source: &PackageRef,
        target_project: Option<String>,
        target_package: Option<String>,
        ctx: &RequestContext,
        progress: &mut Progress,
    ) -> Result<CommandOutput> {
        let ns = self.namespace();
        let target_project = match (target_project, &ctx.user) {
            (Some(project), _) => project,
            (None, Some(user)) => self.branch.branch_project(user, &source.project),
            (None, None) => {
                return Err(FederationError::InvalidRequest(
                    "branch needs target_project or an authenticated user".into(),
                ))
            }
        };
        let target = PackageRef::new(
            target_project,
            target_package.unwrap_or_else(|| source.package.clone()),
        );

        let destination = ns.open(&target.project);
        if let Some((instance, remote_project)) = destination.remote() {
            if !self.on_instance(&source.project, instance) {
                return Err(FederationError::Unsupported(format!(
                    "branch into '{target}' needs a source on '{}'",
                    instance.name
                )));
            }
            let origin = ns.open(&source.project);
            let command = Command::Branch {
                target_project: Some(target.project.clone()),
                target_package: Some(target.package.clone()),
            };
            let output = self
                .forward(origin.as_ref(), Some(&source.package), &command, ctx, progress)
                .await?;
            // the peer was addressed through the source; drop the target too
            ns.proxy()
                .invalidate(&instance.name, remote_project, Some(&target.package));
            self.resolver.invalidate(&target);
            return Ok(output);
        }

        let located = ns.locate(source, &ctx.deadline).await?;
        let origin = Arc::clone(&located.source);
        let canonical = located.identity.clone();
        let view = self
            .resolver
            .expand_located(located, None, &ctx.deadline)
            .await?;
        progress.enter(CommandPhase::Resolved);

        let store = ns.store();
        if store.package_meta(&target.project, &target.package).is_some() {
            return Err(FederationError::AlreadyExists(format!("package '{target}'")));
        }
        let link = Link::to(source).pinned(view.xsrcmd5);
        let mut files = FileSet::new();
        files.insert(LINK_FILE, store.put_blob(link.encode()?.into()));
        let meta = origin
            .package_meta(&canonical.package, &ctx.deadline)
            .await
            .map_or_else(
                |_| PackageMeta::new(target.project.clone(), target.package.clone()),
                |meta| meta.relocated(&target),
            );
        let mut home = ProjectMeta::new(target.project.clone());
        home.title = format!("Branch project for {}", source.project);
        let snapshot = store.commit_in_project(home, meta, files)?;
        progress.enter(CommandPhase::LocalExecuted);
        self.resolver.invalidate(&target);

        let branched = self
            .resolver
            .expand(&target.project, &target.package, None, &ctx.deadline)
            .await?;
        Ok(CommandOutput::Revision(CommandResult {
            project: target.project,
            package: Some(target.package),
            command: CommandKind::Branch.as_str().to_string(),
            srcmd5: Some(snapshot.srcmd5),
            xsrcmd5: Some(branched.xsrcmd5),
        }))
    }

    async fn diff(
        &self,
        target: &PackageRef,
        other: Option<PackageRef>,
        rev: Option<RevisionId>,
        orev: Option<RevisionId>,
        ctx: &RequestContext,
        progress: &mut Progress,
    ) -> Result<CommandOutput> {
        let dl = &ctx.deadline;
        let new = self
            .resolver
            .expand(&target.project, &target.package, rev.as_ref(), dl)
            .await?;
        let old = match (other, &new.link) {
            (Some(other), _) => {
                self.resolver
                    .expand(&other.project, &other.package, orev.as_ref(), dl)
                    .await?
            }
            (None, Some(link)) => {
                let rev = orev.or(link.rev);
                self.resolver
                    .expand(&link.project, &link.package, rev.as_ref(), dl)
                    .await?
            }
            (None, None) => {
                return Err(FederationError::InvalidRequest(format!(
                    "'{target}' is not linked; diff needs oproject"
                )))
            }
        };
        progress.enter(CommandPhase::Resolved);

        let mut diff = PackageDiff::between(&old.file_set(), &new.file_set());
        let deltas = try_join_all(diff.changed.iter().map(|change| {
            let (old, new) = (&old, &new);
            async move {
                let (a, b) = try_join(
                    self.resolver.read_file(old, &change.name, dl),
                    self.resolver.read_file(new, &change.name, dl),
                )
                .await?;
                Ok::<_, FederationError>(line_delta(&a, &b))
            }
        }))
        .await?;
        for (change, delta) in diff.changed.iter_mut().zip(deltas) {
            change.delta = Some(delta);
        }
        progress.enter(CommandPhase::LocalExecuted);

        Ok(CommandOutput::Diff {
            old: DiffSide::of(&old),
            new: DiffSide::of(&new),
            diff,
        })
    }

    async fn show_linked(
        &self,
        target: &PackageRef,
        ctx: &RequestContext,
        progress: &mut Progress,
    ) -> Result<CommandOutput> {
        let ns = self.namespace();
        let canonical = ns.locate(target, &ctx.deadline).await?.identity;
        progress.enter(CommandPhase::Resolved);

        let store = ns.store();
        let mut names = BTreeSet::from([canonical.clone(), target.clone()]);
        for project in store.projects() {
            let links_canonical = store
                .project_meta(&project)
                .is_some_and(|meta| meta.links.contains(&canonical.project));
            if links_canonical {
                names.insert(canonical.with_project(project));
            }
        }
        let packages: BTreeSet<PackageRef> = names
            .iter()
            .flat_map(|name| store.linked_packages(name))
            .collect();
        progress.enter(CommandPhase::LocalExecuted);

        Ok(CommandOutput::Linked {
            packages: packages.into_iter().collect(),
        })
    }

    async fn build(
        &self,
        project: &str,
        package: Option<&str>,
        command: BuildCommand,
        ctx: &RequestContext,
        progress: &mut Progress,
    ) -> Result<CommandOutput> {
        let ns = self.namespace();
        let source = ns.open(project);
        if source.remote().is_none() {
            source.project_meta(&ctx.deadline).await?;
            if let Some(package) = package {
                ns.locate(&PackageRef::new(project, package), &ctx.deadline)
                    .await?;
            }
        }
        progress.enter(CommandPhase::Resolved);

        source.build(package, command, &ctx.deadline).await?;
        progress.enter(if source.remote().is_some() {
            CommandPhase::RemoteForwarded
        } else {
            CommandPhase::LocalExecuted
        });

        match package {
            Some(package) => self.resolver.invalidate(&PackageRef::new(project, package)),
            None => self.resolver.invalidate_project(project),
        }
        Ok(CommandOutput::Build(CommandResult {
            project: project.to_string(),
            package: package.map(str::to_string),
            command: command.as_str().to_string(),
            srcmd5: None,
            xsrcmd5: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UnboundBackend;
    use crate::config::ExpansionConfig;
    use crate::router::NamespaceRouter;
    use crate::store::{MemoryStore, SourceStore};
    use pretty_assertions::assert_eq;
    use srcfed_remote::{HttpTransport, ProxyClient, RemoteRegistry, ResponseCache};
    use srcfed_revision::{ContentDelta, EditKind};

    fn setup() -> (Arc<MemoryStore>, CommandDispatcher) {
        let store = Arc::new(MemoryStore::new());
        for name in ["Base", "Work"] {
            store.put_project(ProjectMeta::new(name)).unwrap();
        }
        let ns = Namespace::new(
            NamespaceRouter::new(Arc::new(RemoteRegistry::new())),
            store.clone(),
            Arc::new(UnboundBackend),
            ProxyClient::new(Arc::new(HttpTransport::new()), ResponseCache::default()),
        );
        let resolver = LinkResolver::new(ns, &ExpansionConfig::default());
        (store, CommandDispatcher::new(resolver, BranchConfig::default()))
    }

    fn ctx() -> RequestContext {
        RequestContext::default().with_user("Iggy")
    }

    fn link(project: &str, package: &str) -> Vec<u8> {
        Link::to(&PackageRef::new(project, package)).encode().unwrap()
    }

    #[tokio::test]
    async fn copy_flattens_and_is_idempotent() {
        let (store, dispatcher) = setup();
        store
            .commit_files(PackageMeta::new("Base", "pkg"), [("f", &b"1"[..])])
            .unwrap();
        store
            .commit_files(
                PackageMeta::new("Base", "linked"),
                [(LINK_FILE, link("Base", "pkg")), ("g", b"2".to_vec())],
            )
            .unwrap();

        let cmd = Command::Copy {
            source: PackageRef::new("Base", "linked"),
            rev: None,
        };
        let first = dispatcher
            .execute("Work", Some("copy"), cmd.clone(), &ctx())
            .await
            .unwrap();
        let second = dispatcher
            .execute("Work", Some("copy"), cmd, &ctx())
            .await
            .unwrap();
        assert_eq!(first, second);

        let head = store.head("Work", "copy").unwrap();
        assert_eq!(head.files.names().collect::<Vec<_>>(), vec!["f", "g"]);
        assert_eq!(store.package_meta("Work", "copy").unwrap().project, "Work");
    }

    #[tokio::test]
    async fn copy_into_missing_project_fails() {
        let (store, dispatcher) = setup();
        store
            .commit_files(PackageMeta::new("Base", "pkg"), [("f", &b"1"[..])])
            .unwrap();
        let err = dispatcher
            .execute(
                "Nowhere",
                Some("pkg"),
                Command::Copy {
                    source: PackageRef::new("Base", "pkg"),
                    rev: None,
                },
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::NotFound(_)));
        assert!(store.packages("Nowhere").is_none());
    }

    #[tokio::test]
    async fn rejected_branch_creates_no_project() {
        let (store, dispatcher) = setup();
        store
            .commit_files(PackageMeta::new("Base", "pkg"), [("f", &b"1"[..])])
            .unwrap();
        let err = dispatcher
            .execute(
                "Base",
                Some("pkg"),
                Command::Branch {
                    target_project: Some("Fresh".into()),
                    target_package: Some("bad/name".into()),
                },
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::InvalidRequest(_)));
        assert!(store.project_meta("Fresh").is_none());
    }

    #[tokio::test]
    async fn commit_stores_files_as_next_revision() {
        let (store, dispatcher) = setup();
        let files = vec![
            ("a".to_string(), Bytes::from_static(b"one")),
            ("b".to_string(), Bytes::from_static(b"two")),
        ];
        let out = dispatcher
            .execute("Work", Some("up"), Command::Commit { files }, &ctx())
            .await
            .unwrap();
        let CommandOutput::Revision(result) = out else {
            panic!("expected revision output");
        };
        let head = store.head("Work", "up").unwrap();
        assert_eq!(result.srcmd5, Some(head.srcmd5));
        assert_eq!(result.command, "commitfiles");
        assert_eq!(head.files.names().collect::<Vec<_>>(), vec!["a", "b"]);

        let err = dispatcher
            .execute("Nowhere", Some("up"), Command::Commit { files: Vec::new() }, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::NotFound(_)));
    }

    #[tokio::test]
    async fn branch_defaults_to_home_project() {
        let (store, dispatcher) = setup();
        store
            .commit_files(PackageMeta::new("Base", "pkg"), [("f", &b"1"[..])])
            .unwrap();
        let branch = Command::Branch {
            target_project: None,
            target_package: None,
        };
        let report = dispatcher.run("Base", Some("pkg"), branch.clone(), &ctx()).await;
        assert_eq!(
            report.phases,
            vec![
                CommandPhase::Received,
                CommandPhase::Resolved,
                CommandPhase::LocalExecuted,
                CommandPhase::Completed,
            ]
        );
        let CommandOutput::Revision(result) = report.outcome.unwrap() else {
            panic!("expected revision output");
        };
        assert_eq!(result.project, "home:Iggy:branches:Base");

        let view = dispatcher
            .resolver()
            .expand("home:Iggy:branches:Base", "pkg", None, &Deadline::none())
            .await
            .unwrap();
        assert_eq!(Some(view.xsrcmd5), result.xsrcmd5);
        assert_eq!(
            view.link.as_ref().unwrap().target(),
            PackageRef::new("Base", "pkg")
        );

        let again = dispatcher.execute("Base", Some("pkg"), branch, &ctx()).await;
        assert!(matches!(again, Err(FederationError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn branch_without_user_needs_target() {
        let (store, dispatcher) = setup();
        store
            .commit_files(PackageMeta::new("Base", "pkg"), [("f", &b"1"[..])])
            .unwrap();
        let err = dispatcher
            .execute(
                "Base",
                Some("pkg"),
                Command::Branch {
                    target_project: None,
                    target_package: None,
                },
                &RequestContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn branch_is_pinned_to_source_state() {
        let (store, dispatcher) = setup();
        store
            .commit_files(PackageMeta::new("Base", "pkg"), [("f", &b"1"[..])])
            .unwrap();
        dispatcher
            .execute(
                "Base",
                Some("pkg"),
                Command::Branch {
                    target_project: Some("Work".into()),
                    target_package: Some("mine".into()),
                },
                &ctx(),
            )
            .await
            .unwrap();
        store
            .commit_files(PackageMeta::new("Base", "pkg"), [("f", &b"2"[..])])
            .unwrap();
        dispatcher.resolver().invalidate_all();

        let view = dispatcher
            .resolver()
            .expand("Work", "mine", None, &Deadline::none())
            .await
            .unwrap();
        let data = dispatcher
            .resolver()
            .read_file(&view, "f", &Deadline::none())
            .await
            .unwrap();
        assert_eq!(&data[..], b"1");
    }

    #[tokio::test]
    async fn diff_against_link_target() {
        let (store, dispatcher) = setup();
        store
            .commit_files(PackageMeta::new("Base", "pkg"), [("f", &b"a\nb\n"[..])])
            .unwrap();
        store
            .commit_files(
                PackageMeta::new("Work", "pkg"),
                [
                    (LINK_FILE, link("Base", "pkg")),
                    ("f", b"a\nc\n".to_vec()),
                    ("new_file", b"x".to_vec()),
                ],
            )
            .unwrap();

        let output = dispatcher
            .execute(
                "Work",
                Some("pkg"),
                Command::Diff {
                    other: None,
                    rev: None,
                    orev: None,
                },
                &ctx(),
            )
            .await
            .unwrap();
        let CommandOutput::Diff { old, new, diff } = output else {
            panic!("expected diff output");
        };
        assert_eq!(old.project, "Base");
        assert_eq!(new.project, "Work");
        assert_eq!(diff.added, vec!["new_file".to_string()]);
        assert_eq!(diff.changed.len(), 1);
        let Some(ContentDelta::Text(edits)) = &diff.changed[0].delta else {
            panic!("expected text delta");
        };
        assert_eq!(edits.len(), 2);
        assert!(edits
            .iter()
            .any(|e| e.kind == EditKind::Removed && e.text == "b" && e.line == 2));
        assert!(edits
            .iter()
            .any(|e| e.kind == EditKind::Added && e.text == "c" && e.line == 2));
    }

    #[tokio::test]
    async fn diff_of_unlinked_package_needs_other_side() {
        let (store, dispatcher) = setup();
        store
            .commit_files(PackageMeta::new("Base", "pkg"), [("f", &b"1"[..])])
            .unwrap();
        let err = dispatcher
            .execute(
                "Base",
                Some("pkg"),
                Command::Diff {
                    other: None,
                    rev: None,
                    orev: None,
                },
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn show_linked_uses_reverse_index() {
        let (store, dispatcher) = setup();
        store
            .commit_files(PackageMeta::new("Base", "pkg"), [("f", &b"1"[..])])
            .unwrap();
        store
            .commit_files(PackageMeta::new("Work", "a"), [(LINK_FILE, link("Base", "pkg"))])
            .unwrap();
        store
            .commit_files(PackageMeta::new("Work", "b"), [(LINK_FILE, link("Base", "pkg"))])
            .unwrap();

        let output = dispatcher
            .execute("Base", Some("pkg"), Command::ShowLinked, &ctx())
            .await
            .unwrap();
        assert_eq!(
            output,
            CommandOutput::Linked {
                packages: vec![PackageRef::new("Work", "a"), PackageRef::new("Work", "b")],
            }
        );
    }

    #[tokio::test]
    async fn build_on_project_without_repositories_is_unsupported() {
        let (_store, dispatcher) = setup();
        let report = dispatcher
            .run(
                "Base",
                None,
                Command::Build(BuildCommand::Rebuild),
                &ctx(),
            )
            .await;
        assert_eq!(report.phases.last(), Some(&CommandPhase::Failed));
        let err = report.outcome.unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::NotFound);
    }

    #[test]
    fn output_serializes_with_type_tag() {
        let output = CommandOutput::Linked { packages: vec![] };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["type"], "linked");
    }
}
