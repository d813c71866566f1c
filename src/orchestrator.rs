//! Merge sequencing.
//!
//! A landing runs: resolve roles, ask the policy, check the target head,
//! merge, then the companion merge for paired rules, then tag and clean up.
//! The orchestrator holds no locks; a target that moved since the caller
//! looked at it is reported as `StaleRef` and never retried here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::domain::{BranchRef, CommitId, MergeRequest, Tag, TagPattern};
use crate::error::{FlowError, PartialRelease, PendingStep, Result};
use crate::git::Backend;
use crate::model::RepositoryModel;
use crate::policy::{companion_target, Companion, MergeRule, PolicyEngine};
use crate::tagger::ReleaseTagger;
use crate::warning::FlowWarning;

/// Lets another thread abandon an operation before it mutates anything.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(FlowError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// Pull source and target from the remote before comparing heads
    pub fetch: bool,
    /// Publish advanced branches and new tags afterwards
    pub push: bool,
    /// Keep ephemeral branches after they land
    pub keep_branches: bool,
}

/// One merge performed, or skipped, while landing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStep {
    Merged { target: String, new_head: CommitId },
    AlreadyMerged { target: String, head: CommitId },
}

impl MergeStep {
    pub fn target(&self) -> &str {
        match self {
            MergeStep::Merged { target, .. } | MergeStep::AlreadyMerged { target, .. } => target,
        }
    }

    pub fn head(&self) -> &CommitId {
        match self {
            MergeStep::Merged { new_head, .. } => new_head,
            MergeStep::AlreadyMerged { head, .. } => head,
        }
    }
}

/// What a landing would do, decided without touching the backend
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub source: BranchRef,
    pub target: BranchRef,
    pub rule: MergeRule,
    /// Branch receiving the companion merge of a paired rule
    pub companion: Option<String>,
    /// Tag that will be created once everything merged
    pub tag_name: Option<String>,
    /// Whether the source branch goes away afterwards
    pub deletes_source: bool,
}

/// Outcome of a completed landing
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub source: String,
    pub target: String,
    pub requested_by: String,
    pub steps: Vec<MergeStep>,
    pub tag: Option<Tag>,
    pub deleted_source: bool,
    pub pushed: Vec<String>,
    pub warnings: Vec<FlowWarning>,
}

pub struct MergeOrchestrator<'a, B: Backend> {
    backend: &'a B,
    policy: PolicyEngine,
    tagger: ReleaseTagger<'a, B>,
    options: OrchestratorOptions,
    cancel: CancelToken,
}

impl<'a, B: Backend> MergeOrchestrator<'a, B> {
    pub fn new(
        backend: &'a B,
        policy: PolicyEngine,
        pattern: TagPattern,
        options: OrchestratorOptions,
    ) -> Self {
        MergeOrchestrator {
            backend,
            policy,
            tagger: ReleaseTagger::new(backend, pattern),
            options,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Decide whether and how `request` may land. Pure: no backend calls.
    pub fn plan(&self, model: &RepositoryModel, request: &MergeRequest) -> Result<MergePlan> {
        let source = model.require_branch(&request.source)?.clone();
        let target = model.require_branch(&request.target)?.clone();

        let rule = self
            .policy
            .check_merge(&source.name, source.role, &target.name, target.role)?;

        let active = match rule.companion {
            Some(Companion::ActiveReleaseOrDevelop) => model.active_release()?,
            _ => None,
        };
        let companion = companion_target(
            &rule,
            &model.develop().name,
            active.map(|release| release.name.as_str()),
        )
        .map(str::to_string);

        // A source merged into the target earlier is a re-run after a partial
        // release; the version is checked again when tagging.
        let landed =
            source.head != target.head && model.is_ancestor(&source.head, &target.head);
        let tag_name = match (&request.version, rule.is_release_landing()) {
            (Some(version), true) => {
                if !landed {
                    self.tagger.check(model, version, &target.head)?;
                }
                Some(self.tagger.tag_name(version))
            }
            _ => None,
        };

        let deletes_source = source.role.is_ephemeral() && !self.options.keep_branches;
        Ok(MergePlan {
            source,
            target,
            rule,
            companion,
            tag_name,
            deletes_source,
        })
    }

    /// Land `request`, updating `model` as the backend changes.
    ///
    /// # Returns
    /// * `Ok(MergeReport)` - Every merge, the tag and the cleanup succeeded
    /// * `Err(PartialRelease)` - The merge into main happened but the companion
    ///   merge or the tag did not; the source branch is kept so the request can
    ///   be re-run, which skips the merges already done
    /// * Any other error - Nothing was changed by this call
    pub fn execute(
        &self,
        model: &mut RepositoryModel,
        request: &MergeRequest,
    ) -> Result<MergeReport> {
        let plan = self.plan(model, request)?;
        tracing::info!(
            source = %plan.source.name,
            target = %plan.target.name,
            actor = %request.requested_by,
            paired = plan.rule.is_paired(),
            "landing branch"
        );

        let mut report = MergeReport {
            source: plan.source.name.clone(),
            target: plan.target.name.clone(),
            requested_by: request.requested_by.clone(),
            steps: Vec::new(),
            tag: None,
            deleted_source: false,
            pushed: Vec::new(),
            warnings: Vec::new(),
        };

        let first = self.merge_step(
            model,
            &plan.source.name,
            &plan.target.name,
            &request.expected_target_head,
        )?;
        self.record_step(&mut report, &plan.source.name, first);

        if let Some(companion) = &plan.companion {
            // Carry the landed main head itself, so everything now on main is on the companion too
            let landed_head = model.require_branch(&plan.target.name)?.head.clone();
            let expected = model.require_branch(companion).map(|b| b.head.clone());
            let outcome = expected.and_then(|expected| {
                self.merge_step(model, &plan.target.name, companion, &expected)
            });
            match outcome {
                Ok(step) => self.record_step(&mut report, &plan.target.name, step),
                Err(e) => {
                    tracing::error!(
                        source = %plan.source.name,
                        companion = %companion,
                        error = %e,
                        "companion merge failed after landing on main"
                    );
                    return Err(FlowError::PartialRelease(Box::new(PartialRelease {
                        source: plan.source.name.clone(),
                        landed_on: plan.target.name.clone(),
                        landed_head,
                        pending: PendingStep::CompanionMerge {
                            target: companion.clone(),
                        },
                        cause: e.to_string(),
                    })));
                }
            }
        }

        if plan.rule.is_release_landing() {
            match &request.version {
                Some(version) => {
                    let head = model.require_branch(&plan.target.name)?.head.clone();
                    match self.tagger.tag(model, &head, *version) {
                        Ok(tag) => report.tag = Some(tag),
                        Err(e) => {
                            tracing::error!(
                                source = %plan.source.name,
                                version = %version,
                                error = %e,
                                "tagging failed after landing on main"
                            );
                            return Err(FlowError::PartialRelease(Box::new(PartialRelease {
                                source: plan.source.name.clone(),
                                landed_on: plan.target.name.clone(),
                                landed_head: head,
                                pending: PendingStep::Tag {
                                    name: self.tagger.tag_name(version),
                                },
                                cause: e.to_string(),
                            })));
                        }
                    }
                }
                None => report.warnings.push(FlowWarning::UntaggedLanding {
                    source: plan.source.name.clone(),
                    target: plan.target.name.clone(),
                }),
            }
        }

        if plan.deletes_source {
            self.backend.delete_branch(&plan.source.name)?;
            model.remove_branch(&plan.source.name)?;
            report.deleted_source = true;
            tracing::info!(branch = %plan.source.name, "deleted landed branch");
        }

        if self.options.push {
            self.publish(&mut report);
        }

        Ok(report)
    }

    fn record_step(&self, report: &mut MergeReport, source: &str, step: MergeStep) {
        if let MergeStep::AlreadyMerged { target, .. } = &step {
            report.warnings.push(FlowWarning::AlreadyMerged {
                source: source.to_string(),
                target: target.clone(),
            });
        }
        report.steps.push(step);
    }

    /// Merge `source` into `target`, which must still be at `expected`.
    fn merge_step(
        &self,
        model: &mut RepositoryModel,
        source: &str,
        target: &str,
        expected: &CommitId,
    ) -> Result<MergeStep> {
        self.cancel.check()?;

        if self.options.fetch {
            self.backend.pull(source)?;
            self.backend.pull(target)?;
        }

        let actual = self.backend.get_head(target)?;
        if &actual != expected {
            tracing::debug!(branch = target, expected = %expected, actual = %actual, "stale ref");
            return Err(FlowError::StaleRef {
                branch: target.to_string(),
                expected: expected.clone(),
                actual,
            });
        }

        let source_head = self.backend.get_head(source)?;
        if model.is_ancestor(&source_head, &actual) {
            return Ok(MergeStep::AlreadyMerged {
                target: target.to_string(),
                head: actual,
            });
        }

        // Last chance to back out; past the merge there is no undo
        self.cancel.check()?;

        let result = self.backend.merge(source, target, expected)?;
        let up_to_date = result.is_up_to_date();
        model.advance_head(target, result.new_head.clone(), result.merge_commit)?;

        if up_to_date {
            Ok(MergeStep::AlreadyMerged {
                target: target.to_string(),
                head: result.new_head,
            })
        } else {
            tracing::info!(source, target, head = %result.new_head.short(), "merged");
            Ok(MergeStep::Merged {
                target: target.to_string(),
                new_head: result.new_head,
            })
        }
    }

    fn publish(&self, report: &mut MergeReport) {
        let mut refs: Vec<(String, Result<()>)> = Vec::new();
        for step in &report.steps {
            let branch = step.target().to_string();
            if refs.iter().any(|(name, _)| name == &format!("refs/heads/{}", branch)) {
                continue;
            }
            let result = self.backend.push(&branch);
            refs.push((format!("refs/heads/{}", branch), result));
        }
        if let Some(tag) = &report.tag {
            let result = self.backend.push_tag(&tag.name);
            refs.push((format!("refs/tags/{}", tag.name), result));
        }

        for (refname, result) in refs {
            match result {
                Ok(()) => report.pushed.push(refname),
                Err(e) => {
                    tracing::warn!(%refname, error = %e, "push failed");
                    report.warnings.push(FlowWarning::PushFailed {
                        refname,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::BranchClassifier;
    use crate::config::Config;
    use crate::domain::{BranchRole, Version};
    use crate::git::MemoryBackend;

    fn load(backend: &MemoryBackend) -> RepositoryModel {
        RepositoryModel::load(
            backend,
            &BranchClassifier::new(&Config::default()),
            &TagPattern::default(),
        )
        .unwrap()
    }

    fn orchestrator(backend: &MemoryBackend) -> MergeOrchestrator<'_, MemoryBackend> {
        MergeOrchestrator::new(
            backend,
            PolicyEngine::default(),
            TagPattern::default(),
            OrchestratorOptions::default(),
        )
    }

    fn fork(backend: &MemoryBackend, name: &str, from: &str) {
        let head = backend.get_head(from).unwrap();
        backend.create_branch(name, &head, Some(from)).unwrap();
    }

    #[test]
    fn test_plan_resolves_hotfix_companion_to_open_release() {
        let backend = MemoryBackend::new("main", "develop");
        fork(&backend, "hotfix/bug", "main");
        fork(&backend, "release/1.1", "develop");
        let model = load(&backend);
        let request = MergeRequest::new("hotfix/bug", "main", "ops", model.main().head.clone());

        let plan = orchestrator(&backend).plan(&model, &request).unwrap();
        assert_eq!(plan.companion.as_deref(), Some("release/1.1"));
        assert_eq!(plan.rule.source, BranchRole::Maintenance);
    }

    #[test]
    fn test_plan_checks_version_before_merging() {
        let backend = MemoryBackend::new("main", "develop");
        let root = backend.get_head("main").unwrap();
        backend.create_tag("2.0.0", &root).unwrap();
        fork(&backend, "release/1.5", "develop");
        backend.commit("release/1.5", &[("r", "1")]).unwrap();
        let mut model = load(&backend);
        let before = backend.mutation_count();

        let request = MergeRequest::new("release/1.5", "main", "ops", model.main().head.clone())
            .with_version(Version::new(1, 5, 0));
        let err = orchestrator(&backend)
            .execute(&mut model, &request)
            .unwrap_err();
        assert!(matches!(err, FlowError::NonMonotonicVersion { .. }));
        assert_eq!(backend.mutation_count(), before);
    }

    #[test]
    fn test_cancelled_before_merge_changes_nothing() {
        let backend = MemoryBackend::new("main", "develop");
        fork(&backend, "feature/a", "develop");
        backend.commit("feature/a", &[("a", "1")]).unwrap();
        let mut model = load(&backend);
        let before = backend.mutation_count();

        let token = CancelToken::new();
        token.cancel();
        let request = MergeRequest::new("feature/a", "develop", "ops", model.develop().head.clone());
        let err = orchestrator(&backend)
            .with_cancel(token)
            .execute(&mut model, &request)
            .unwrap_err();
        assert!(matches!(err, FlowError::Cancelled));
        assert_eq!(backend.mutation_count(), before);
    }

    #[test]
    fn test_keep_branches_option() {
        let backend = MemoryBackend::new("main", "develop");
        fork(&backend, "feature/a", "develop");
        backend.commit("feature/a", &[("a", "1")]).unwrap();
        let mut model = load(&backend);
        let request = MergeRequest::new("feature/a", "develop", "ops", model.develop().head.clone());

        let orchestrator = MergeOrchestrator::new(
            &backend,
            PolicyEngine::default(),
            TagPattern::default(),
            OrchestratorOptions {
                keep_branches: true,
                ..OrchestratorOptions::default()
            },
        );
        assert!(!orchestrator.plan(&model, &request).unwrap().deletes_source);
        let report = orchestrator.execute(&mut model, &request).unwrap();
        assert!(!report.deleted_source);
        assert!(backend.get_head("feature/a").is_ok());
    }

    #[test]
    fn test_push_publishes_targets_and_tag() {
        let backend = MemoryBackend::new("main", "develop");
        fork(&backend, "release/1.0", "develop");
        backend.commit("release/1.0", &[("r", "1")]).unwrap();
        let mut model = load(&backend);
        let request = MergeRequest::new("release/1.0", "main", "ops", model.main().head.clone())
            .with_version(Version::new(1, 0, 0));

        let report = MergeOrchestrator::new(
            &backend,
            PolicyEngine::default(),
            TagPattern::default(),
            OrchestratorOptions {
                push: true,
                ..OrchestratorOptions::default()
            },
        )
        .execute(&mut model, &request)
        .unwrap();
        assert_eq!(
            report.pushed,
            vec!["refs/heads/main", "refs/heads/develop", "refs/tags/1.0.0"]
        );
        assert_eq!(backend.pushed(), report.pushed);
    }

    #[test]
    fn test_land_release_without_version_warns() {
        let backend = MemoryBackend::new("main", "develop");
        fork(&backend, "release/1.0", "develop");
        backend.commit("release/1.0", &[("r", "1")]).unwrap();
        let mut model = load(&backend);
        let request = MergeRequest::new("release/1.0", "main", "ops", model.main().head.clone());

        let report = orchestrator(&backend).execute(&mut model, &request).unwrap();
        assert!(report.tag.is_none());
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, FlowWarning::UntaggedLanding { .. })));
        assert!(backend.list_tags().unwrap().is_empty());
    }
}
