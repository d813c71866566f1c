//! Version-control backend abstraction
//!
//! The policy core never touches commit storage directly. It talks to a
//! [Backend], which owns branches, commits and tags and provides the
//! compare-and-swap ref update that serialises concurrent writers.
//!
//! # Implementations
//!
//! - [repository::Git2Backend]: a real repository through the `git2` crate
//! - [memory::MemoryBackend]: an in-process repository for tests and simulations
//!
//! ```rust
//! # use gitflow::git::{Backend, MemoryBackend};
//! let backend = MemoryBackend::new("main", "develop");
//! let head = backend.get_head("develop").unwrap();
//! backend.create_branch("feature/login", &head, Some("develop")).unwrap();
//! ```

pub mod memory;
pub mod repository;

pub use memory::MemoryBackend;
pub use repository::Git2Backend;

use chrono::{DateTime, Utc};

use crate::domain::{Commit, CommitId};
use crate::error::Result;

/// A branch as the backend stores it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRecord {
    pub name: String,
    pub head: CommitId,
    /// Branch recorded as the fork parent when this branch was created
    pub fork_parent: Option<String>,
}

/// A tag as the backend stores it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    pub name: String,
    pub commit: CommitId,
    pub created_at: DateTime<Utc>,
}

/// Everything the repository model is built from
#[derive(Debug, Clone, Default)]
pub struct RepoSnapshot {
    pub branches: Vec<BranchRecord>,
    /// Commits reachable from any branch or tag
    pub commits: Vec<Commit>,
    pub tags: Vec<TagRecord>,
}

/// Outcome of a successful merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    pub new_head: CommitId,
    /// The merge commit created, or `None` when the source was already merged
    pub merge_commit: Option<Commit>,
}

impl MergeResult {
    pub fn up_to_date(head: CommitId) -> Self {
        MergeResult {
            new_head: head,
            merge_commit: None,
        }
    }

    pub fn is_up_to_date(&self) -> bool {
        self.merge_commit.is_none()
    }
}

/// Primitives the policy core consumes from a version-control system.
///
/// ## Thread Safety
///
/// Implementors must be `Send + Sync`; independent actors share one backend.
/// Ref updates must be compare-and-swap so that the backend is the only
/// serialisation point.
///
/// ## Error Handling
///
/// Implementations map their failures onto [crate::error::FlowError]:
/// `RefExists`, `RefNotFound`, `TagExists`, `StaleRef` and `MergeConflict`
/// for the conditions the core reacts to, `Git`/`Remote` for everything else.
pub trait Backend: Send + Sync {
    /// Read branches, the commit DAG and tags in one pass.
    fn snapshot(&self) -> Result<RepoSnapshot>;

    /// Create branch `name` at `from`, recording `fork_parent` as its lineage.
    ///
    /// # Returns
    /// * `Err(RefExists)` - If a branch with that name already exists
    fn create_branch(&self, name: &str, from: &CommitId, fork_parent: Option<&str>) -> Result<()>;

    /// Current head of a branch.
    fn get_head(&self, branch: &str) -> Result<CommitId>;

    /// Merge `source` into `target`, provided `target` still points at
    /// `expected_target_head`.
    ///
    /// Always records a merge commit unless `source` is already contained in
    /// `target`. Atomic: on conflict nothing is written.
    ///
    /// # Returns
    /// * `Ok(MergeResult)` - New head of `target`
    /// * `Err(StaleRef)` - If `target` moved
    /// * `Err(MergeConflict)` - With the conflicting paths
    fn merge(&self, source: &str, target: &str, expected_target_head: &CommitId)
        -> Result<MergeResult>;

    /// Delete a branch.
    ///
    /// # Returns
    /// * `Err(RefNotFound)` - If there is no such branch
    fn delete_branch(&self, name: &str) -> Result<()>;

    /// Create a tag pointing at `commit`.
    ///
    /// # Returns
    /// * `Err(TagExists)` - If the tag name is taken
    fn create_tag(&self, name: &str, commit: &CommitId) -> Result<()>;

    /// All tags, in no particular order.
    fn list_tags(&self) -> Result<Vec<TagRecord>>;

    /// Publish a branch to the configured remote.
    fn push(&self, branch: &str) -> Result<()>;

    /// Publish a tag to the configured remote.
    fn push_tag(&self, tag: &str) -> Result<()>;

    /// Bring a branch up to date with the configured remote, fast-forward only.
    fn pull(&self, branch: &str) -> Result<()>;
}
