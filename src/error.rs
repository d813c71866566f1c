use std::fmt;

use thiserror::Error;

use crate::domain::{BranchRole, CommitId, Version};

/// Broad classes of failure, used for reporting and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected by policy before any backend mutation
    PolicyViolation,
    /// Ref moved underneath the caller; refresh and retry
    ConcurrencyConflict,
    /// Backend found conflicting content; needs human resolution
    ContentConflict,
    /// A release landed on main but a later step of it did not happen
    InvariantRisk,
    /// Caller-correctable input
    DataError,
    /// Git, I/O, config or network trouble
    Environment,
}

/// The step of a release landing that did not happen after main moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingStep {
    /// Merging main into develop or the open release
    CompanionMerge { target: String },
    /// Tagging the landed head
    Tag { name: String },
}

impl fmt::Display for PendingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingStep::CompanionMerge { target } => write!(f, "merge into '{}'", target),
            PendingStep::Tag { name } => write!(f, "tag '{}'", name),
        }
    }
}

/// State left behind when a release landed on main but a later step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialRelease {
    /// The release or hotfix branch that was being finished
    pub source: String,
    /// The Main branch the first merge landed on
    pub landed_on: String,
    /// Main's head after the first merge
    pub landed_head: CommitId,
    /// The step that failed
    pub pending: PendingStep,
    /// Why it failed
    pub cause: String,
}

impl fmt::Display for PartialRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' landed on '{}' at {} but {} failed: {}",
            self.source,
            self.landed_on,
            self.landed_head.short(),
            self.pending,
            self.cause
        )
    }
}

/// Unified error type for gitflow operations
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("cannot fork a {child} branch from a {parent} branch")]
    ForkNotAllowed {
        parent: BranchRole,
        child: BranchRole,
    },

    #[error("merging {source_role} branch '{source_branch}' into {target_role} branch '{target_branch}' is not allowed")]
    MergeNotAllowed {
        source_branch: String,
        source_role: BranchRole,
        target_branch: String,
        target_role: BranchRole,
    },

    #[error("cannot classify branch '{name}': {reason}")]
    Classification { name: String, reason: String },

    #[error("more than one release branch is open: {}", .branches.join(", "))]
    AmbiguousRelease { branches: Vec<String> },

    #[error("stale ref '{branch}': expected {expected}, found {actual}")]
    StaleRef {
        branch: String,
        expected: CommitId,
        actual: CommitId,
    },

    #[error("merge of '{source_branch}' into '{target_branch}' conflicts in: {}", .paths.join(", "))]
    MergeConflict {
        source_branch: String,
        target_branch: String,
        paths: Vec<String>,
    },

    #[error("partial release: {0}")]
    PartialRelease(Box<PartialRelease>),

    #[error("version {proposed} is not greater than latest tagged version {latest}")]
    NonMonotonicVersion { proposed: Version, latest: Version },

    #[error("branch '{name}' already exists")]
    RefExists { name: String },

    #[error("tag '{name}' already exists")]
    TagExists { name: String },

    #[error("ref not found: {name}")]
    RefNotFound { name: String },

    #[error("commit {commit} for tag '{tag}' is not reachable from main")]
    TagNotOnMain { tag: String, commit: CommitId },

    #[error("Version parsing error: {0}")]
    InvalidVersion(String),

    #[error("repository model invariant violated: {0}")]
    ModelInvariant(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("Git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Remote operation failed: {0}")]
    Remote(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results in gitflow
pub type Result<T> = std::result::Result<T, FlowError>;

impl FlowError {
    /// Create a configuration error with context
    pub fn config(msg: impl Into<String>) -> Self {
        FlowError::Config(msg.into())
    }

    /// Create a version error with context
    pub fn version(msg: impl Into<String>) -> Self {
        FlowError::InvalidVersion(msg.into())
    }

    /// Create a remote error with context
    pub fn remote(msg: impl Into<String>) -> Self {
        FlowError::Remote(msg.into())
    }

    pub fn classification(name: impl Into<String>, reason: impl Into<String>) -> Self {
        FlowError::Classification {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn ref_not_found(name: impl Into<String>) -> Self {
        FlowError::RefNotFound { name: name.into() }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            FlowError::ForkNotAllowed { .. }
            | FlowError::MergeNotAllowed { .. }
            | FlowError::Classification { .. }
            | FlowError::AmbiguousRelease { .. } => ErrorCategory::PolicyViolation,
            FlowError::StaleRef { .. } => ErrorCategory::ConcurrencyConflict,
            FlowError::MergeConflict { .. } => ErrorCategory::ContentConflict,
            FlowError::PartialRelease(_) => ErrorCategory::InvariantRisk,
            FlowError::NonMonotonicVersion { .. }
            | FlowError::RefExists { .. }
            | FlowError::TagExists { .. }
            | FlowError::RefNotFound { .. }
            | FlowError::TagNotOnMain { .. }
            | FlowError::InvalidVersion(_)
            | FlowError::ModelInvariant(_) => ErrorCategory::DataError,
            FlowError::Cancelled
            | FlowError::Git(_)
            | FlowError::Config(_)
            | FlowError::Remote(_)
            | FlowError::Io(_) => ErrorCategory::Environment,
        }
    }

    /// Process exit code reported by the CLI for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            FlowError::ForkNotAllowed { .. } => 2,
            FlowError::Classification { .. } => 3,
            FlowError::MergeNotAllowed { .. } | FlowError::AmbiguousRelease { .. } => 4,
            FlowError::MergeConflict { .. } => 5,
            FlowError::StaleRef { .. } => 6,
            FlowError::PartialRelease(_) => 7,
            FlowError::NonMonotonicVersion { .. } => 8,
            _ => 1,
        }
    }
}
