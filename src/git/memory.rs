//! In-process backend.
//!
//! Keeps a full commit DAG with per-commit file snapshots so merges can detect
//! conflicts. One mutex guards the whole store; every ref update checks the
//! expected old value while holding it, which gives the same compare-and-swap
//! behaviour a real ref database provides.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::domain::{Commit, CommitId};
use crate::error::{FlowError, Result};
use crate::git::{Backend, BranchRecord, MergeResult, RepoSnapshot, TagRecord};

type Tree = BTreeMap<String, String>;

#[derive(Debug, Clone)]
struct StoredCommit {
    parents: Vec<CommitId>,
    tree: Tree,
}

#[derive(Debug, Default)]
struct Store {
    commits: HashMap<CommitId, StoredCommit>,
    branches: BTreeMap<String, BranchRecord>,
    tags: BTreeMap<String, TagRecord>,
    sequence: u64,
    mutations: u64,
    pushed: Vec<String>,
    pulled: Vec<String>,
}

impl Store {
    fn write_commit(&mut self, parents: Vec<CommitId>, tree: Tree) -> CommitId {
        self.sequence += 1;
        let mut hasher = Sha256::new();
        hasher.update(self.sequence.to_be_bytes());
        for parent in &parents {
            hasher.update(parent.as_str().as_bytes());
        }
        for (path, content) in &tree {
            hasher.update(path.as_bytes());
            hasher.update([0]);
            hasher.update(content.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        let id = CommitId::new(&digest[..40]);
        self.commits.insert(id.clone(), StoredCommit { parents, tree });
        id
    }

    fn head(&self, branch: &str) -> Result<CommitId> {
        self.branches
            .get(branch)
            .map(|b| b.head.clone())
            .ok_or_else(|| FlowError::ref_not_found(branch))
    }

    fn tree(&self, id: &CommitId) -> Tree {
        self.commits
            .get(id)
            .map(|c| c.tree.clone())
            .unwrap_or_default()
    }

    fn ancestors(&self, start: &CommitId) -> HashSet<CommitId> {
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

    /// Nearest common ancestor, searching breadth-first from `ours`
    fn merge_base(&self, ours: &CommitId, theirs: &CommitId) -> Option<CommitId> {
        let their_ancestors = self.ancestors(theirs);
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([ours.clone()]);
        while let Some(id) = queue.pop_front() {
            if their_ancestors.contains(&id) {
                return Some(id);
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&id) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        None
    }
}

/// Three-way merge of file snapshots. Returns the merged tree or the
/// conflicting paths.
fn merge_trees(base: &Tree, ours: &Tree, theirs: &Tree) -> std::result::Result<Tree, Vec<String>> {
    let paths: BTreeSet<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();
    let mut merged = Tree::new();
    let mut conflicts = Vec::new();

    for path in paths {
        let b = base.get(path);
        let o = ours.get(path);
        let t = theirs.get(path);
        let pick = if o == t || t == b {
            o
        } else if o == b {
            t
        } else {
            conflicts.push(path.clone());
            continue;
        };
        if let Some(content) = pick {
            merged.insert(path.clone(), content.clone());
        }
    }

    if conflicts.is_empty() {
        Ok(merged)
    } else {
        Err(conflicts)
    }
}

/// Thread-safe in-memory repository
#[derive(Debug)]
pub struct MemoryBackend {
    store: Mutex<Store>,
}

impl MemoryBackend {
    /// A repository with one root commit and `main` and `develop` both pointing at it.
    pub fn new(main: &str, develop: &str) -> Self {
        let mut store = Store::default();
        let root = store.write_commit(Vec::new(), Tree::new());
        for name in [main, develop] {
            store.branches.insert(
                name.to_string(),
                BranchRecord {
                    name: name.to_string(),
                    head: root.clone(),
                    fork_parent: None,
                },
            );
        }
        MemoryBackend {
            store: Mutex::new(store),
        }
    }

    /// A repository with only a `main` branch, as before `gitflow init`.
    pub fn with_main_only(main: &str) -> Self {
        let mut store = Store::default();
        let root = store.write_commit(Vec::new(), Tree::new());
        store.branches.insert(
            main.to_string(),
            BranchRecord {
                name: main.to_string(),
                head: root,
                fork_parent: None,
            },
        );
        MemoryBackend {
            store: Mutex::new(store),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Store>> {
        self.store.lock().map_err(|_| {
            FlowError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "memory backend lock poisoned",
            ))
        })
    }

    /// Record a direct commit on `branch` writing the given files.
    ///
    /// Stands in for a developer pushing work to a branch; not a policy operation.
    pub fn commit(&self, branch: &str, files: &[(&str, &str)]) -> Result<CommitId> {
        let mut store = self.lock()?;
        let parent = store.head(branch)?;
        let mut tree = store.tree(&parent);
        for (path, content) in files {
            tree.insert(path.to_string(), content.to_string());
        }
        let id = store.write_commit(vec![parent], tree);
        if let Some(record) = store.branches.get_mut(branch) {
            record.head = id.clone();
        }
        store.mutations += 1;
        Ok(id)
    }

    /// Content of `path` at the head of `branch`
    pub fn file(&self, branch: &str, path: &str) -> Result<Option<String>> {
        let store = self.lock()?;
        let head = store.head(branch)?;
        Ok(store.tree(&head).get(path).cloned())
    }

    /// Number of successful writes to refs, commits and tags so far
    pub fn mutation_count(&self) -> u64 {
        self.lock().map(|s| s.mutations).unwrap_or(0)
    }

    /// Refs pushed so far, in order
    pub fn pushed(&self) -> Vec<String> {
        self.lock().map(|s| s.pushed.clone()).unwrap_or_default()
    }

    /// Branches pulled so far, in order
    pub fn pulled(&self) -> Vec<String> {
        self.lock().map(|s| s.pulled.clone()).unwrap_or_default()
    }

    pub fn branch_names(&self) -> Vec<String> {
        self.lock()
            .map(|s| s.branches.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Backend for MemoryBackend {
    fn snapshot(&self) -> Result<RepoSnapshot> {
        let store = self.lock()?;
        let commits = store
            .commits
            .iter()
            .map(|(id, c)| Commit::new(id.clone(), c.parents.clone()))
            .collect();
        Ok(RepoSnapshot {
            branches: store.branches.values().cloned().collect(),
            commits,
            tags: store.tags.values().cloned().collect(),
        })
    }

    fn create_branch(&self, name: &str, from: &CommitId, fork_parent: Option<&str>) -> Result<()> {
        let mut store = self.lock()?;
        if store.branches.contains_key(name) {
            return Err(FlowError::RefExists {
                name: name.to_string(),
            });
        }
        if !store.commits.contains_key(from) {
            return Err(FlowError::ref_not_found(from.as_str()));
        }
        store.branches.insert(
            name.to_string(),
            BranchRecord {
                name: name.to_string(),
                head: from.clone(),
                fork_parent: fork_parent.map(str::to_string),
            },
        );
        store.mutations += 1;
        Ok(())
    }

    fn get_head(&self, branch: &str) -> Result<CommitId> {
        self.lock()?.head(branch)
    }

    fn merge(
        &self,
        source: &str,
        target: &str,
        expected_target_head: &CommitId,
    ) -> Result<MergeResult> {
        let mut store = self.lock()?;
        let ours = store.head(target)?;
        if &ours != expected_target_head {
            return Err(FlowError::StaleRef {
                branch: target.to_string(),
                expected: expected_target_head.clone(),
                actual: ours,
            });
        }
        let theirs = store.head(source)?;

        if store.ancestors(&ours).contains(&theirs) {
            return Ok(MergeResult::up_to_date(ours));
        }

        let base_tree = store
            .merge_base(&ours, &theirs)
            .map(|base| store.tree(&base))
            .unwrap_or_default();
        let merged = merge_trees(&base_tree, &store.tree(&ours), &store.tree(&theirs)).map_err(
            |paths| FlowError::MergeConflict {
                source_branch: source.to_string(),
                target_branch: target.to_string(),
                paths,
            },
        )?;

        let parents = vec![ours, theirs];
        let id = store.write_commit(parents.clone(), merged);
        if let Some(record) = store.branches.get_mut(target) {
            record.head = id.clone();
        }
        store.mutations += 1;

        Ok(MergeResult {
            new_head: id.clone(),
            merge_commit: Some(Commit::new(id, parents)),
        })
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        let mut store = self.lock()?;
        store
            .branches
            .remove(name)
            .ok_or_else(|| FlowError::ref_not_found(name))?;
        store.mutations += 1;
        Ok(())
    }

    fn create_tag(&self, name: &str, commit: &CommitId) -> Result<()> {
        let mut store = self.lock()?;
        if store.tags.contains_key(name) {
            return Err(FlowError::TagExists {
                name: name.to_string(),
            });
        }
        if !store.commits.contains_key(commit) {
            return Err(FlowError::ref_not_found(commit.as_str()));
        }
        store.tags.insert(
            name.to_string(),
            TagRecord {
                name: name.to_string(),
                commit: commit.clone(),
                created_at: Utc::now(),
            },
        );
        store.mutations += 1;
        Ok(())
    }

    fn list_tags(&self) -> Result<Vec<TagRecord>> {
        Ok(self.lock()?.tags.values().cloned().collect())
    }

    fn push(&self, branch: &str) -> Result<()> {
        let mut store = self.lock()?;
        store.head(branch)?;
        store.pushed.push(format!("refs/heads/{}", branch));
        Ok(())
    }

    fn push_tag(&self, tag: &str) -> Result<()> {
        let mut store = self.lock()?;
        if !store.tags.contains_key(tag) {
            return Err(FlowError::ref_not_found(tag));
        }
        store.pushed.push(format!("refs/tags/{}", tag));
        Ok(())
    }

    fn pull(&self, branch: &str) -> Result<()> {
        let mut store = self.lock()?;
        store.head(branch)?;
        store.pulled.push(branch.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_repository_shares_root() {
        let backend = MemoryBackend::new("main", "develop");
        assert_eq!(
            backend.get_head("main").unwrap(),
            backend.get_head("develop").unwrap()
        );
        assert_eq!(backend.mutation_count(), 0);
    }

    #[test]
    fn test_create_branch_twice_fails() {
        let backend = MemoryBackend::new("main", "develop");
        let head = backend.get_head("develop").unwrap();
        backend
            .create_branch("feature/a", &head, Some("develop"))
            .unwrap();
        let err = backend
            .create_branch("feature/a", &head, Some("develop"))
            .unwrap_err();
        assert!(matches!(err, FlowError::RefExists { .. }));
    }

    #[test]
    fn test_merge_creates_merge_commit() {
        let backend = MemoryBackend::new("main", "develop");
        let base = backend.get_head("develop").unwrap();
        backend.create_branch("feature/a", &base, None).unwrap();
        let work = backend.commit("feature/a", &[("a.txt", "a")]).unwrap();

        let result = backend.merge("feature/a", "develop", &base).unwrap();
        let merge = result.merge_commit.unwrap();
        assert_eq!(merge.parents, vec![base, work]);
        assert_eq!(backend.file("develop", "a.txt").unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn test_merge_rejects_stale_expectation() {
        let backend = MemoryBackend::new("main", "develop");
        let base = backend.get_head("develop").unwrap();
        backend.create_branch("feature/a", &base, None).unwrap();
        backend.commit("develop", &[("d.txt", "d")]).unwrap();

        let err = backend.merge("feature/a", "develop", &base).unwrap_err();
        assert!(matches!(err, FlowError::StaleRef { .. }));
    }

    #[test]
    fn test_merge_conflict_writes_nothing() {
        let backend = MemoryBackend::new("main", "develop");
        let base = backend.get_head("develop").unwrap();
        backend.create_branch("feature/a", &base, None).unwrap();
        backend.commit("feature/a", &[("shared.txt", "feature")]).unwrap();
        let develop_head = backend.commit("develop", &[("shared.txt", "develop")]).unwrap();
        let before = backend.mutation_count();

        let err = backend
            .merge("feature/a", "develop", &develop_head)
            .unwrap_err();
        match err {
            FlowError::MergeConflict { paths, .. } => assert_eq!(paths, vec!["shared.txt"]),
            other => panic!("expected conflict, got {}", other),
        }
        assert_eq!(backend.mutation_count(), before);
        assert_eq!(backend.get_head("develop").unwrap(), develop_head);
    }

    #[test]
    fn test_merge_already_contained_is_up_to_date() {
        let backend = MemoryBackend::new("main", "develop");
        let base = backend.get_head("develop").unwrap();
        backend.create_branch("feature/a", &base, None).unwrap();
        let head = backend.commit("develop", &[("d.txt", "d")]).unwrap();

        let result = backend.merge("feature/a", "develop", &head).unwrap();
        assert!(result.is_up_to_date());
        assert_eq!(result.new_head, head);
    }

    #[test]
    fn test_disjoint_changes_merge_cleanly() {
        let base = Tree::from([("x".to_string(), "1".to_string())]);
        let ours = Tree::from([
            ("x".to_string(), "1".to_string()),
            ("o".to_string(), "o".to_string()),
        ]);
        let theirs = Tree::from([("x".to_string(), "2".to_string())]);
        let merged = merge_trees(&base, &ours, &theirs).unwrap();
        assert_eq!(merged.get("x").map(String::as_str), Some("2"));
        assert_eq!(merged.get("o").map(String::as_str), Some("o"));
    }

    #[test]
    fn test_deletion_on_one_side_wins_over_unchanged() {
        let base = Tree::from([("x".to_string(), "1".to_string())]);
        let ours = Tree::new();
        let theirs = base.clone();
        let merged = merge_trees(&base, &ours, &theirs).unwrap();
        assert!(merged.is_empty());
    }

    #[test]
    fn test_tags_are_unique() {
        let backend = MemoryBackend::new("main", "develop");
        let head = backend.get_head("main").unwrap();
        backend.create_tag("1.0.0", &head).unwrap();
        assert!(matches!(
            backend.create_tag("1.0.0", &head),
            Err(FlowError::TagExists { .. })
        ));
        assert_eq!(backend.list_tags().unwrap().len(), 1);
    }
}
