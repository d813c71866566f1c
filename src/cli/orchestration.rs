//! Workflow orchestration behind the command line.
//!
//! Each command maps to one method on [`FlowContext`]: load a fresh model,
//! resolve roles, and hand the request to the core. Nothing here prints;
//! the binary renders the returned outcomes.

use crate::classifier::BranchClassifier;
use crate::config::Config;
use crate::domain::{
    BranchRef, BranchRole, CommitId, MergeRequest, Tag, TagPattern, Version, VersionBump,
};
use crate::error::{FlowError, Result};
use crate::git::Backend;
use crate::model::RepositoryModel;
use crate::orchestrator::{
    CancelToken, MergeOrchestrator, MergePlan, MergeReport, OrchestratorOptions,
};
use crate::policy::{default_fork_parent, PolicyEngine};
use crate::tagger::ReleaseTagger;

/// Which kind of branch a `finish` command closes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishKind {
    Release,
    Hotfix,
}

impl FinishKind {
    pub fn role(self) -> BranchRole {
        match self {
            FinishKind::Release => BranchRole::Release,
            FinishKind::Hotfix => BranchRole::Maintenance,
        }
    }

    /// Bump applied to the latest tag when no version is given
    pub fn default_bump(self) -> VersionBump {
        match self {
            FinishKind::Release => VersionBump::Minor,
            FinishKind::Hotfix => VersionBump::Patch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOutcome {
    pub develop: String,
    pub head: CommitId,
    /// False when develop already existed
    pub created: bool,
}

/// A branch that `fork` would create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkPlan {
    pub name: String,
    pub role: BranchRole,
    pub parent: String,
    pub from: CommitId,
}

/// A finish resolved down to the merge it performs
#[derive(Debug, Clone)]
pub struct FinishPlan {
    pub version: Version,
    pub merge: MergePlan,
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub branches: Vec<BranchRef>,
    pub active_release: Option<String>,
    pub latest_tag: Option<Tag>,
    pub unclassified: Vec<String>,
    /// Commits on main that develop does not contain yet
    pub missing_from_develop: usize,
}

/// Everything a command needs: backend, configuration and the acting user.
pub struct FlowContext<'a, B: Backend> {
    backend: &'a B,
    config: Config,
    classifier: BranchClassifier,
    pattern: TagPattern,
    actor: String,
    options: OrchestratorOptions,
    cancel: CancelToken,
}

impl<'a, B: Backend> FlowContext<'a, B> {
    pub fn new(backend: &'a B, config: Config, actor: impl Into<String>) -> Result<Self> {
        config.validate()?;
        let pattern = config.tags.compile()?;
        let options = OrchestratorOptions {
            fetch: config.sync.fetch,
            push: config.sync.push,
            keep_branches: config.behavior.keep_branches,
        };
        Ok(FlowContext {
            backend,
            classifier: BranchClassifier::new(&config),
            config,
            pattern,
            actor: actor.into(),
            options,
            cancel: CancelToken::new(),
        })
    }

    /// Push after every landing regardless of `sync.push`
    pub fn with_push(mut self, push: bool) -> Self {
        self.options.push |= push;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn load_model(&self) -> Result<RepositoryModel> {
        RepositoryModel::load(self.backend, &self.classifier, &self.pattern)
    }

    fn tagger(&self) -> ReleaseTagger<'a, B> {
        ReleaseTagger::new(self.backend, self.pattern.clone())
    }

    fn orchestrator(&self) -> MergeOrchestrator<'a, B> {
        MergeOrchestrator::new(
            self.backend,
            PolicyEngine::new(self.config.policy.single_release),
            self.pattern.clone(),
            self.options,
        )
        .with_cancel(self.cancel.clone())
    }

    fn sync(&self, branches: &[&str]) -> Result<()> {
        if self.options.fetch {
            for branch in branches {
                self.backend.pull(branch)?;
            }
        }
        Ok(())
    }

    /// Create develop from main when it does not exist yet.
    pub fn init(&self) -> Result<InitOutcome> {
        let main = self.classifier.main_name();
        let develop = self.classifier.develop_name();
        let main_head = self.backend.get_head(main)?;

        match self.backend.get_head(develop) {
            Ok(head) => Ok(InitOutcome {
                develop: develop.to_string(),
                head,
                created: false,
            }),
            Err(FlowError::RefNotFound { .. }) => {
                self.backend.create_branch(develop, &main_head, None)?;
                tracing::info!(branch = develop, from = main, "created develop branch");
                Ok(InitOutcome {
                    develop: develop.to_string(),
                    head: main_head,
                    created: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Work out where `name` would be forked from and with which role.
    ///
    /// `role` of `None` lets the classifier decide from the name. Without
    /// `from`, the parent is the default one for the role (develop for
    /// features and releases, main for maintenance).
    pub fn plan_fork(
        &self,
        model: &RepositoryModel,
        role: Option<BranchRole>,
        name: &str,
        from: Option<&str>,
    ) -> Result<ForkPlan> {
        let role = self.classifier.classify_with(name, from, role)?;
        if role.is_permanent() || model.branch(name).is_some() {
            return Err(FlowError::RefExists {
                name: name.to_string(),
            });
        }

        let parent_name = match from {
            Some(parent) => parent,
            None => default_fork_parent(role)
                .and_then(|parent| self.classifier.reserved_name(parent))
                .ok_or_else(|| FlowError::classification(name, "no default parent branch"))?,
        };

        // The role must be recoverable from the name alone on the next load
        if self.classifier.classify(name, Some(parent_name)).is_err() {
            let hint = match self.config.prefixes.primary(role) {
                Some(prefix) => format!(" or name it {}{}", prefix, name),
                None => String::new(),
            };
            return Err(FlowError::classification(
                name,
                format!("no prefix covers this name; pin it under [roles]{}", hint),
            ));
        }

        let parent = model.require_branch(parent_name)?;
        PolicyEngine::new(self.config.policy.single_release).check_fork(
            parent.role,
            role,
            model.open_releases().len(),
        )?;

        Ok(ForkPlan {
            name: name.to_string(),
            role,
            parent: parent.name.clone(),
            from: parent.head.clone(),
        })
    }

    /// Fork a new ephemeral branch.
    pub fn fork(
        &self,
        role: Option<BranchRole>,
        name: &str,
        from: Option<&str>,
    ) -> Result<BranchRef> {
        let model = self.load_model()?;
        let plan = self.plan_fork(&model, role, name, from)?;

        self.backend
            .create_branch(&plan.name, &plan.from, Some(&plan.parent))?;
        tracing::info!(
            branch = %plan.name,
            role = %plan.role,
            parent = %plan.parent,
            actor = %self.actor,
            "forked branch"
        );
        Ok(BranchRef::new(plan.name, plan.role, plan.from, Some(plan.parent)))
    }

    fn land_request(
        &self,
        model: &RepositoryModel,
        source: &str,
        target: &str,
        expect: Option<&str>,
    ) -> Result<MergeRequest> {
        let expected = match expect {
            Some(id) => CommitId::new(id),
            None => model.require_branch(target)?.head.clone(),
        };
        Ok(MergeRequest::new(source, target, self.actor.as_str(), expected))
    }

    /// Decide how `source` would land on `target`. The plan's target head is
    /// what [`FlowContext::land`] should be given as `expect` once approved.
    pub fn plan_land(&self, source: &str, target: &str, expect: Option<&str>) -> Result<MergePlan> {
        self.sync(&[source, target])?;
        let model = self.load_model()?;
        let request = self.land_request(&model, source, target, expect)?;
        self.orchestrator().plan(&model, &request)
    }

    /// Merge `source` into `target` as the policy allows.
    ///
    /// `expect` pins the target head the caller saw; without it the head from
    /// a fresh snapshot is used.
    pub fn land(&self, source: &str, target: &str, expect: Option<&str>) -> Result<MergeReport> {
        self.sync(&[source, target])?;
        let mut model = self.load_model()?;
        let request = self.land_request(&model, source, target, expect)?;
        self.orchestrator().execute(&mut model, &request)
    }

    /// Pick the version for a finish: the explicit one, else the version in
    /// the branch name (`release/1.4.0`), else the latest tag bumped.
    pub fn resolve_version(
        &self,
        model: &RepositoryModel,
        kind: FinishKind,
        branch: &str,
        explicit: Option<Version>,
    ) -> Result<Version> {
        if let Some(version) = explicit {
            return Ok(version);
        }
        let suffix = branch.rsplit('/').next().unwrap_or(branch);
        if let Ok(version) = Version::parse(suffix) {
            return Ok(version);
        }
        self.tagger().next_version(model, kind.default_bump())
    }

    fn finish_request(
        &self,
        model: &RepositoryModel,
        kind: FinishKind,
        branch: &str,
        version: Option<Version>,
        expected_main: Option<&CommitId>,
    ) -> Result<(MergeRequest, Version)> {
        let source = model.require_branch(branch)?;
        if source.role != kind.role() {
            return Err(FlowError::classification(
                branch,
                format!("is a {} branch, not {}", source.role, kind.role()),
            ));
        }
        let version = self.resolve_version(model, kind, branch, version)?;
        let expected = expected_main.unwrap_or(&model.main().head).clone();
        let request = MergeRequest::new(
            branch,
            model.main().name.as_str(),
            self.actor.as_str(),
            expected,
        )
        .with_version(version);
        Ok((request, version))
    }

    pub fn plan_finish(
        &self,
        kind: FinishKind,
        branch: &str,
        version: Option<Version>,
    ) -> Result<FinishPlan> {
        self.sync(&[branch, self.classifier.main_name()])?;
        let model = self.load_model()?;
        let (request, version) = self.finish_request(&model, kind, branch, version, None)?;
        let merge = self.orchestrator().plan(&model, &request)?;
        Ok(FinishPlan { version, merge })
    }

    /// Land a release or hotfix branch on main, merge main into its
    /// companion branch and tag the result.
    ///
    /// `expected_main` pins the main head the caller planned against; a main
    /// that moved since then fails with `StaleRef`.
    pub fn finish(
        &self,
        kind: FinishKind,
        branch: &str,
        version: Option<Version>,
        expected_main: Option<&CommitId>,
    ) -> Result<MergeReport> {
        self.sync(&[branch, self.classifier.main_name()])?;
        let mut model = self.load_model()?;
        let (request, version) =
            self.finish_request(&model, kind, branch, version, expected_main)?;
        tracing::info!(branch, %version, ?kind, "finishing");
        self.orchestrator().execute(&mut model, &request)
    }

    pub fn status(&self) -> Result<StatusReport> {
        let model = self.load_model()?;
        let active_release = match model.active_release() {
            Ok(release) => release.map(|b| b.name.clone()),
            Err(FlowError::AmbiguousRelease { .. }) => None,
            Err(e) => return Err(e),
        };
        Ok(StatusReport {
            branches: model.branches().cloned().collect(),
            active_release,
            latest_tag: self.tagger().latest(&model).cloned(),
            unclassified: model.unclassified().to_vec(),
            missing_from_develop: model.missing_from_develop().len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::MemoryBackend;

    fn context(backend: &MemoryBackend) -> FlowContext<'_, MemoryBackend> {
        FlowContext::new(backend, Config::default(), "tester").unwrap()
    }

    #[test]
    fn test_init_creates_develop_once() {
        let backend = MemoryBackend::with_main_only("main");
        let ctx = context(&backend);

        let first = ctx.init().unwrap();
        assert!(first.created);
        assert_eq!(backend.get_head("develop").unwrap(), backend.get_head("main").unwrap());

        let second = ctx.init().unwrap();
        assert!(!second.created);
    }

    #[test]
    fn test_fork_auto_uses_default_parent() {
        let backend = MemoryBackend::new("main", "develop");
        backend.commit("develop", &[("d", "1")]).unwrap();
        let ctx = context(&backend);

        let feature = ctx.fork(None, "feature/login", None).unwrap();
        assert_eq!(feature.role, BranchRole::Feature);
        assert_eq!(feature.forked_from.as_deref(), Some("develop"));
        assert_eq!(feature.head, backend.get_head("develop").unwrap());

        let hotfix = ctx.fork(None, "hotfix/crash", None).unwrap();
        assert_eq!(hotfix.role, BranchRole::Maintenance);
        assert_eq!(hotfix.head, backend.get_head("main").unwrap());
    }

    #[test]
    fn test_fork_rejects_wrong_parent_and_mismatched_role() {
        let backend = MemoryBackend::new("main", "develop");
        let ctx = context(&backend);

        let err = ctx.fork(None, "feature/x", Some("main")).unwrap_err();
        assert!(matches!(
            err,
            FlowError::ForkNotAllowed {
                parent: BranchRole::Main,
                child: BranchRole::Feature
            }
        ));

        let err = ctx
            .fork(Some(BranchRole::Release), "feature/y", None)
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);

        let err = ctx.fork(None, "experiment", None).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        let err = ctx
            .fork(Some(BranchRole::Feature), "experiment", None)
            .unwrap_err();
        assert!(err.to_string().contains("feature/experiment"));
        assert_eq!(backend.branch_names(), vec!["develop", "main"]);
    }

    #[test]
    fn test_second_release_refused() {
        let backend = MemoryBackend::new("main", "develop");
        let ctx = context(&backend);
        ctx.fork(None, "release/1.0.0", None).unwrap();

        let err = ctx.fork(None, "release/1.1.0", None).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_resolve_version_order() {
        let backend = MemoryBackend::new("main", "develop");
        let ctx = context(&backend);
        let model = ctx.load_model().unwrap();

        let explicit = Some(Version::new(3, 0, 0));
        assert_eq!(
            ctx.resolve_version(&model, FinishKind::Release, "release/2.0.0", explicit)
                .unwrap(),
            Version::new(3, 0, 0)
        );
        assert_eq!(
            ctx.resolve_version(&model, FinishKind::Release, "release/2.0.0", None)
                .unwrap(),
            Version::new(2, 0, 0)
        );
        assert_eq!(
            ctx.resolve_version(&model, FinishKind::Hotfix, "hotfix/crash", None)
                .unwrap(),
            crate::tagger::INITIAL_VERSION
        );
    }

    #[test]
    fn test_finish_requires_matching_kind() {
        let backend = MemoryBackend::new("main", "develop");
        let ctx = context(&backend);
        ctx.fork(None, "release/1.0.0", None).unwrap();

        let err = ctx
            .finish(FinishKind::Hotfix, "release/1.0.0", None, None)
            .unwrap_err();
        assert!(matches!(err, FlowError::Classification { .. }));
    }

    #[test]
    fn test_land_uses_planned_head_after_target_moved() {
        let backend = MemoryBackend::new("main", "develop");
        let ctx = context(&backend);
        ctx.fork(None, "feature/a", None).unwrap();
        backend.commit("feature/a", &[("a", "1")]).unwrap();

        let plan = ctx.plan_land("feature/a", "develop", None).unwrap();
        let moved = backend.commit("develop", &[("other", "1")]).unwrap();

        let err = ctx
            .land("feature/a", "develop", Some(plan.target.head.as_str()))
            .unwrap_err();
        assert_eq!(err.exit_code(), 6);
        assert_eq!(backend.get_head("develop").unwrap(), moved);
        assert!(backend.get_head("feature/a").is_ok());
    }

    #[test]
    fn test_finish_uses_planned_main_head_after_main_moved() {
        let backend = MemoryBackend::new("main", "develop");
        let ctx = context(&backend);
        ctx.fork(None, "release/1.0.0", None).unwrap();
        backend.commit("release/1.0.0", &[("notes", "1.0.0")]).unwrap();

        let plan = ctx
            .plan_finish(FinishKind::Release, "release/1.0.0", None)
            .unwrap();
        let moved = backend.commit("main", &[("hotfix", "1")]).unwrap();

        let err = ctx
            .finish(
                FinishKind::Release,
                "release/1.0.0",
                Some(plan.version),
                Some(&plan.merge.target.head),
            )
            .unwrap_err();
        assert!(matches!(err, FlowError::StaleRef { ref branch, .. } if branch == "main"));
        assert_eq!(backend.get_head("main").unwrap(), moved);
        assert!(backend.list_tags().unwrap().is_empty());
    }

    #[test]
    fn test_plan_finish_changes_nothing() {
        let backend = MemoryBackend::new("main", "develop");
        let ctx = context(&backend);
        ctx.fork(None, "release/1.0.0", None).unwrap();
        backend.commit("release/1.0.0", &[("notes", "1.0.0")]).unwrap();
        let before = backend.mutation_count();

        let plan = ctx
            .plan_finish(FinishKind::Release, "release/1.0.0", None)
            .unwrap();
        assert_eq!(plan.version, Version::new(1, 0, 0));
        assert_eq!(plan.merge.companion.as_deref(), Some("develop"));
        assert_eq!(plan.merge.tag_name.as_deref(), Some("1.0.0"));
        assert_eq!(backend.mutation_count(), before);
    }

    #[test]
    fn test_status_reports_active_release_and_tag() {
        let backend = MemoryBackend::new("main", "develop");
        let ctx = context(&backend);
        ctx.fork(None, "release/0.2.0", None).unwrap();
        let head = backend.get_head("main").unwrap();
        backend.create_tag("0.1.0", &head).unwrap();

        let status = ctx.status().unwrap();
        assert_eq!(status.active_release.as_deref(), Some("release/0.2.0"));
        assert_eq!(status.latest_tag.unwrap().version, Version::new(0, 1, 0));
        assert_eq!(status.branches.len(), 3);
        assert_eq!(status.missing_from_develop, 0);
    }

    #[test]
    fn test_fetch_pulls_before_landing() {
        let backend = MemoryBackend::new("main", "develop");
        let mut config = Config::default();
        config.sync.fetch = true;
        let ctx = FlowContext::new(&backend, config, "tester").unwrap();
        ctx.fork(None, "feature/a", None).unwrap();
        backend.commit("feature/a", &[("a", "1")]).unwrap();

        ctx.land("feature/a", "develop", None).unwrap();
        assert!(backend.pulled().starts_with(&["feature/a".to_string(), "develop".to_string()]));
    }
}
