//! Fork and merge rules between branch roles.
//!
//! Every decision is a table lookup over [`BranchRole`]; commit content is never
//! inspected.

use crate::domain::BranchRole;
use crate::error::{FlowError, Result};

/// Where the second half of a paired merge goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Companion {
    /// Always develop
    Develop,
    /// The open release branch if there is one, otherwise develop
    ActiveReleaseOrDevelop,
}

/// An allowed merge, and whether it must be paired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeRule {
    pub source: BranchRole,
    pub target: BranchRole,
    pub companion: Option<Companion>,
}

impl MergeRule {
    pub fn is_paired(&self) -> bool {
        self.companion.is_some()
    }

    /// Release and hotfix landings on main are tagged
    pub fn is_release_landing(&self) -> bool {
        self.target == BranchRole::Main
    }
}

const FORK_FROM_MAIN: &[BranchRole] = &[BranchRole::Maintenance];
const FORK_FROM_DEVELOP: &[BranchRole] = &[BranchRole::Feature, BranchRole::Release];
const FORK_NONE: &[BranchRole] = &[];

/// Child roles that may be forked from a branch of role `parent`.
pub fn can_fork(parent: BranchRole) -> &'static [BranchRole] {
    match parent {
        BranchRole::Main => FORK_FROM_MAIN,
        BranchRole::Develop => FORK_FROM_DEVELOP,
        BranchRole::Feature | BranchRole::Release | BranchRole::Maintenance => FORK_NONE,
    }
}

/// The merge rule for `source` into `target`, if the pair is allowed at all.
pub fn can_merge(source: BranchRole, target: BranchRole) -> Option<MergeRule> {
    let companion = match (source, target) {
        (BranchRole::Feature, BranchRole::Develop) => None,
        (BranchRole::Release, BranchRole::Main) => Some(Companion::Develop),
        (BranchRole::Maintenance, BranchRole::Main) => Some(Companion::ActiveReleaseOrDevelop),
        _ => return None,
    };
    Some(MergeRule {
        source,
        target,
        companion,
    })
}

/// Branch receiving the companion merge of `rule`, if it has one.
///
/// `active_release` is the open release branch, when there is one.
pub fn companion_target<'a>(
    rule: &MergeRule,
    develop: &'a str,
    active_release: Option<&'a str>,
) -> Option<&'a str> {
    match rule.companion? {
        Companion::Develop => Some(develop),
        Companion::ActiveReleaseOrDevelop => Some(active_release.unwrap_or(develop)),
    }
}

/// Default parent role for a new branch of `child` role.
pub fn default_fork_parent(child: BranchRole) -> Option<BranchRole> {
    match child {
        BranchRole::Feature | BranchRole::Release => Some(BranchRole::Develop),
        BranchRole::Maintenance => Some(BranchRole::Main),
        BranchRole::Main | BranchRole::Develop => None,
    }
}

/// Policy decisions with the configurable switches applied.
#[derive(Debug, Clone, Copy)]
pub struct PolicyEngine {
    single_release: bool,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        PolicyEngine {
            single_release: true,
        }
    }
}

impl PolicyEngine {
    pub fn new(single_release: bool) -> Self {
        PolicyEngine { single_release }
    }

    /// Authorize forking a `child` branch from a `parent` branch.
    ///
    /// `open_releases` is the number of release branches currently open; with
    /// `single_release` on, a second one is refused.
    pub fn check_fork(
        &self,
        parent: BranchRole,
        child: BranchRole,
        open_releases: usize,
    ) -> Result<()> {
        if !can_fork(parent).contains(&child) {
            return Err(FlowError::ForkNotAllowed { parent, child });
        }
        if child == BranchRole::Release && self.single_release && open_releases > 0 {
            tracing::debug!(open_releases, "release already open");
            return Err(FlowError::ForkNotAllowed { parent, child });
        }
        Ok(())
    }

    /// Authorize merging branch `source_branch` into `target_branch`.
    pub fn check_merge(
        &self,
        source_branch: &str,
        source_role: BranchRole,
        target_branch: &str,
        target_role: BranchRole,
    ) -> Result<MergeRule> {
        can_merge(source_role, target_role).ok_or_else(|| FlowError::MergeNotAllowed {
            source_branch: source_branch.to_string(),
            source_role,
            target_branch: target_branch.to_string(),
            target_role,
        })
    }
}
