//! Domain logic - branch roles, commits, tags and versions, independent of any backend

pub mod branch;
pub mod commit;
pub mod role;
pub mod tag;
pub mod version;

pub use branch::{BranchRef, MergeRequest};
pub use commit::{Commit, CommitId};
pub use role::BranchRole;
pub use tag::{Tag, TagPattern};
pub use version::{Version, VersionBump};
