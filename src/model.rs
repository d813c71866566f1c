//! In-memory view of a repository: branches with roles, the commit DAG and
//! release tags.
//!
//! Commits live in an arena keyed by id and are never removed. Each actor
//! works on its own model; the backend is the shared source of truth and the
//! model is refreshed from it with [`RepositoryModel::load`].

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::classifier::BranchClassifier;
use crate::domain::{BranchRef, BranchRole, Commit, CommitId, Tag, TagPattern};
use crate::error::{FlowError, Result};
use crate::git::{Backend, RepoSnapshot, TagRecord};

#[derive(Debug, Clone)]
pub struct RepositoryModel {
    commits: HashMap<CommitId, Commit>,
    branches: BTreeMap<String, BranchRef>,
    tags: Vec<Tag>,
    main: String,
    develop: String,
    /// Branches no classification rule covered; kept out of the model
    unclassified: Vec<String>,
}

impl RepositoryModel {
    /// Build a model from branches and commits.
    ///
    /// Fails with `ModelInvariant` unless exactly one main and one develop
    /// branch are present.
    pub fn new(
        branches: impl IntoIterator<Item = BranchRef>,
        commits: impl IntoIterator<Item = Commit>,
    ) -> Result<Self> {
        let mut by_name = BTreeMap::new();
        let mut main = Vec::new();
        let mut develop = Vec::new();

        for branch in branches {
            match branch.role {
                BranchRole::Main => main.push(branch.name.clone()),
                BranchRole::Develop => develop.push(branch.name.clone()),
                _ => {}
            }
            if by_name.insert(branch.name.clone(), branch).is_some() {
                return Err(FlowError::ModelInvariant("duplicate branch name".to_string()));
            }
        }

        let main = exactly_one(main, BranchRole::Main)?;
        let develop = exactly_one(develop, BranchRole::Develop)?;

        let commits = commits.into_iter().map(|c| (c.id.clone(), c)).collect();

        Ok(RepositoryModel {
            commits,
            branches: by_name,
            tags: Vec::new(),
            main,
            develop,
            unclassified: Vec::new(),
        })
    }

    /// Build a model from a backend snapshot, classifying every branch.
    ///
    /// Branches that no rule classifies are left out and listed by
    /// [`unclassified`](Self::unclassified). Tags not following `pattern` are ignored.
    pub fn from_snapshot(
        snapshot: RepoSnapshot,
        classifier: &BranchClassifier,
        pattern: &TagPattern,
    ) -> Result<Self> {
        let mut branches = Vec::new();
        let mut unclassified = Vec::new();

        for record in snapshot.branches {
            match classifier.classify(&record.name, record.fork_parent.as_deref()) {
                Ok(role) => {
                    let forked_from = if role.is_permanent() {
                        None
                    } else {
                        record.fork_parent
                    };
                    branches.push(BranchRef::new(record.name, role, record.head, forked_from));
                }
                Err(e) => {
                    tracing::warn!(branch = %record.name, error = %e, "ignoring branch");
                    unclassified.push(record.name);
                }
            }
        }

        let mut model = RepositoryModel::new(branches, snapshot.commits)?;
        model.unclassified = unclassified;
        model.replace_tags(snapshot.tags, pattern);
        Ok(model)
    }

    /// Snapshot the backend and build a model from it.
    pub fn load<B: Backend>(
        backend: &B,
        classifier: &BranchClassifier,
        pattern: &TagPattern,
    ) -> Result<Self> {
        let snapshot = backend.snapshot()?;
        tracing::debug!(
            branches = snapshot.branches.len(),
            commits = snapshot.commits.len(),
            tags = snapshot.tags.len(),
            "loaded repository snapshot"
        );
        Self::from_snapshot(snapshot, classifier, pattern)
    }

    pub fn main(&self) -> &BranchRef {
        &self.branches[&self.main]
    }

    pub fn develop(&self) -> &BranchRef {
        &self.branches[&self.develop]
    }

    pub fn branch(&self, name: &str) -> Option<&BranchRef> {
        self.branches.get(name)
    }

    pub fn require_branch(&self, name: &str) -> Result<&BranchRef> {
        self.branch(name)
            .ok_or_else(|| FlowError::ref_not_found(name))
    }

    pub fn branches(&self) -> impl Iterator<Item = &BranchRef> {
        self.branches.values()
    }

    pub fn unclassified(&self) -> &[String] {
        &self.unclassified
    }

    pub fn open_releases(&self) -> Vec<&BranchRef> {
        self.branches
            .values()
            .filter(|b| b.role == BranchRole::Release)
            .collect()
    }

    /// The single open release branch, if any.
    pub fn active_release(&self) -> Result<Option<&BranchRef>> {
        let releases = self.open_releases();
        match releases.len() {
            0 => Ok(None),
            1 => Ok(Some(releases[0])),
            _ => Err(FlowError::AmbiguousRelease {
                branches: releases.iter().map(|b| b.name.clone()).collect(),
            }),
        }
    }

    pub fn commit(&self, id: &CommitId) -> Option<&Commit> {
        self.commits.get(id)
    }

    /// Add a commit to the arena. Existing commits are never replaced.
    pub fn insert_commit(&mut self, commit: Commit) {
        self.commits.entry(commit.id.clone()).or_insert(commit);
    }

    pub fn add_branch(&mut self, branch: BranchRef) -> Result<()> {
        if branch.is_permanent() {
            return Err(FlowError::ModelInvariant(format!(
                "a second {} branch '{}' cannot be added",
                branch.role, branch.name
            )));
        }
        if self.branches.contains_key(&branch.name) {
            return Err(FlowError::RefExists { name: branch.name });
        }
        self.branches.insert(branch.name.clone(), branch);
        Ok(())
    }

    /// Move a branch head, recording the merge commit that produced it.
    pub fn advance_head(
        &mut self,
        name: &str,
        new_head: CommitId,
        merge_commit: Option<Commit>,
    ) -> Result<()> {
        if let Some(commit) = merge_commit {
            self.insert_commit(commit);
        }
        let branch = self
            .branches
            .get_mut(name)
            .ok_or_else(|| FlowError::ref_not_found(name))?;
        branch.head = new_head;
        Ok(())
    }

    /// Forget a landed branch. Main and develop are never removed.
    pub fn remove_branch(&mut self, name: &str) -> Result<BranchRef> {
        let branch = self.require_branch(name)?;
        if branch.is_permanent() {
            return Err(FlowError::ModelInvariant(format!(
                "{} branch '{}' cannot be deleted",
                branch.role, name
            )));
        }
        self.branches
            .remove(name)
            .ok_or_else(|| FlowError::ref_not_found(name))
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn tag(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.name == name)
    }

    /// Tag carrying the highest version
    pub fn latest_tag(&self) -> Option<&Tag> {
        self.tags.iter().max_by_key(|t| t.version)
    }

    pub fn add_tag(&mut self, tag: Tag) {
        if self.tag(&tag.name).is_none() {
            self.tags.push(tag);
        }
    }

    /// Replace known tags with the backend's list, keeping only version tags.
    pub fn replace_tags(&mut self, records: Vec<TagRecord>, pattern: &TagPattern) {
        let mut tags: Vec<Tag> = records
            .into_iter()
            .filter_map(|record| {
                let version = pattern.extract(&record.name)?;
                Some(Tag::new(record.name, version, record.commit, record.created_at))
            })
            .collect();
        tags.sort_by_key(|t| t.created_at);
        self.tags = tags;
    }

    /// Every commit reachable from `start`, including `start`.
    pub fn reachable_from(&self, start: &CommitId) -> HashSet<CommitId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&id) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        seen
    }

    /// Whether `ancestor` is `descendant` or one of its ancestors.
    pub fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> bool {
        if ancestor == descendant {
            return true;
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([descendant.clone()]);
        while let Some(id) = queue.pop_front() {
            if &id == ancestor {
                return true;
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&id) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        false
    }

    pub fn is_on_main(&self, commit: &CommitId) -> bool {
        self.is_ancestor(commit, &self.main().head)
    }

    /// Commits reachable from main but not from develop, sorted by id.
    ///
    /// Empty whenever every release and hotfix has been fully merged back.
    pub fn missing_from_develop(&self) -> Vec<CommitId> {
        let on_develop = self.reachable_from(&self.develop().head);
        let mut missing: Vec<CommitId> = self
            .reachable_from(&self.main().head)
            .into_iter()
            .filter(|id| !on_develop.contains(id))
            .collect();
        missing.sort();
        missing
    }
}

fn exactly_one(mut names: Vec<String>, role: BranchRole) -> Result<String> {
    match names.len() {
        1 => Ok(names.remove(0)),
        0 => Err(FlowError::ModelInvariant(format!("no {} branch found", role))),
        _ => Err(FlowError::ModelInvariant(format!(
            "more than one {} branch: {}",
            role,
            names.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::git::BranchRecord;
    use chrono::Utc;

    fn id(s: &str) -> CommitId {
        CommitId::new(s)
    }

    fn sample() -> RepositoryModel {
        // r <- a <- m(a, f) on main; develop at a; f forked from r
        let commits = vec![
            Commit::new(id("r"), vec![]),
            Commit::new(id("a"), vec![id("r")]),
            Commit::new(id("f"), vec![id("r")]),
            Commit::new(id("m"), vec![id("a"), id("f")]),
        ];
        let branches = vec![
            BranchRef::new("main", BranchRole::Main, id("m"), None),
            BranchRef::new("develop", BranchRole::Develop, id("a"), None),
        ];
        RepositoryModel::new(branches, commits).unwrap()
    }

    #[test]
    fn test_requires_main_and_develop() {
        let only_main = vec![BranchRef::new("main", BranchRole::Main, id("r"), None)];
        let err = RepositoryModel::new(only_main, vec![]).unwrap_err();
        assert!(err.to_string().contains("develop"));
    }

    #[test]
    fn test_rejects_two_mains() {
        let branches = vec![
            BranchRef::new("main", BranchRole::Main, id("r"), None),
            BranchRef::new("master", BranchRole::Main, id("r"), None),
            BranchRef::new("develop", BranchRole::Develop, id("r"), None),
        ];
        assert!(RepositoryModel::new(branches, vec![]).is_err());
    }

    #[test]
    fn test_ancestry() {
        let model = sample();
        assert!(model.is_ancestor(&id("r"), &id("m")));
        assert!(model.is_ancestor(&id("f"), &id("m")));
        assert!(!model.is_ancestor(&id("m"), &id("a")));
        assert!(model.is_on_main(&id("f")));
    }

    #[test]
    fn test_missing_from_develop() {
        let model = sample();
        assert_eq!(model.missing_from_develop(), vec![id("f"), id("m")]);
    }

    #[test]
    fn test_permanent_branches_cannot_be_removed() {
        let mut model = sample();
        assert!(model.remove_branch("main").is_err());
        assert!(model.remove_branch("develop").is_err());
        assert!(model.branch("main").is_some());
    }

    #[test]
    fn test_add_and_remove_feature() {
        let mut model = sample();
        model
            .add_branch(BranchRef::new(
                "feature/x",
                BranchRole::Feature,
                id("a"),
                Some("develop".into()),
            ))
            .unwrap();
        assert!(matches!(
            model.add_branch(BranchRef::new("feature/x", BranchRole::Feature, id("a"), None)),
            Err(FlowError::RefExists { .. })
        ));
        model.remove_branch("feature/x").unwrap();
        assert!(model.branch("feature/x").is_none());
    }

    #[test]
    fn test_active_release_ambiguity() {
        let mut model = sample();
        assert!(model.active_release().unwrap().is_none());
        model
            .add_branch(BranchRef::new("release/1.0", BranchRole::Release, id("a"), None))
            .unwrap();
        assert_eq!(model.active_release().unwrap().unwrap().name, "release/1.0");
        model
            .add_branch(BranchRef::new("release/1.1", BranchRole::Release, id("a"), None))
            .unwrap();
        assert!(matches!(
            model.active_release(),
            Err(FlowError::AmbiguousRelease { .. })
        ));
    }

    #[test]
    fn test_from_snapshot_skips_unclassified() {
        let snapshot = RepoSnapshot {
            branches: vec![
                BranchRecord {
                    name: "main".into(),
                    head: id("r"),
                    fork_parent: None,
                },
                BranchRecord {
                    name: "develop".into(),
                    head: id("r"),
                    fork_parent: Some("main".into()),
                },
                BranchRecord {
                    name: "wip".into(),
                    head: id("r"),
                    fork_parent: None,
                },
                BranchRecord {
                    name: "feature/a".into(),
                    head: id("r"),
                    fork_parent: Some("develop".into()),
                },
            ],
            commits: vec![Commit::new(id("r"), vec![])],
            tags: vec![
                TagRecord {
                    name: "1.0.0".into(),
                    commit: id("r"),
                    created_at: Utc::now(),
                },
                TagRecord {
                    name: "nightly".into(),
                    commit: id("r"),
                    created_at: Utc::now(),
                },
            ],
        };
        let classifier = BranchClassifier::new(&Config::default());
        let model =
            RepositoryModel::from_snapshot(snapshot, &classifier, &TagPattern::default()).unwrap();

        assert_eq!(model.unclassified(), &["wip".to_string()]);
        assert_eq!(model.develop().forked_from, None);
        assert_eq!(
            model.branch("feature/a").unwrap().forked_from.as_deref(),
            Some("develop")
        );
        assert_eq!(model.tags().len(), 1);
        assert_eq!(model.latest_tag().unwrap().name, "1.0.0");
    }
}
