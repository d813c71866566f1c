use crate::domain::{BranchRole, CommitId, Version};

/// A named branch with its role and head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRef {
    pub name: String,
    pub role: BranchRole,
    pub head: CommitId,
    /// Branch this one was forked from; `None` for main and develop
    pub forked_from: Option<String>,
}

impl BranchRef {
    /// Create a new branch reference
    pub fn new(
        name: impl Into<String>,
        role: BranchRole,
        head: CommitId,
        forked_from: Option<String>,
    ) -> Self {
        BranchRef {
            name: name.into(),
            role,
            head,
            forked_from,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.role.is_permanent()
    }
}

/// A single merge attempt. Lives only as long as the attempt itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub source: String,
    pub target: String,
    pub requested_by: String,
    /// Target head the caller last observed
    pub expected_target_head: CommitId,
    /// Version to tag when a release or hotfix lands on main
    pub version: Option<Version>,
}

impl MergeRequest {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        requested_by: impl Into<String>,
        expected_target_head: CommitId,
    ) -> Self {
        MergeRequest {
            source: source.into(),
            target: target.into(),
            requested_by: requested_by.into(),
            expected_target_head,
            version: None,
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }
}
