use std::fmt;

/// Opaque commit identifier as handed out by the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        CommitId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First seven characters, for display
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<git2::Oid> for CommitId {
    fn from(oid: git2::Oid) -> Self {
        CommitId(oid.to_string())
    }
}

/// A node of the commit DAG. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub id: CommitId,
    /// Empty for a root commit, two entries for a merge commit
    pub parents: Vec<CommitId>,
}

impl Commit {
    pub fn new(id: CommitId, parents: Vec<CommitId>) -> Self {
        Commit { id, parents }
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        let id = CommitId::new("0123456789abcdef");
        assert_eq!(id.short(), "0123456");
        assert_eq!(CommitId::new("abc").short(), "abc");
    }

    #[test]
    fn test_commit_kinds() {
        let root = Commit::new(CommitId::new("a"), vec![]);
        let merge = Commit::new(
            CommitId::new("m"),
            vec![CommitId::new("a"), CommitId::new("b")],
        );
        assert!(root.is_root());
        assert!(!root.is_merge());
        assert!(merge.is_merge());
    }

    #[test]
    fn test_from_git2_oid() {
        let oid = git2::Oid::from_bytes(&[1; 20]).unwrap();
        let id = CommitId::from(oid);
        assert_eq!(id.as_str(), "0101010101010101010101010101010101010101");
    }
}
