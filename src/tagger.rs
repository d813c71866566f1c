use chrono::Utc;

use crate::domain::{CommitId, Tag, TagPattern, Version, VersionBump};
use crate::error::{FlowError, Result};
use crate::git::Backend;
use crate::model::RepositoryModel;

/// Version for a release when none is given
pub const INITIAL_VERSION: Version = Version {
    major: 0,
    minor: 1,
    patch: 0,
};

/// Records release versions as tags on main.
///
/// Versions only ever increase. Re-tagging the same commit with the same
/// version is a no-op.
pub struct ReleaseTagger<'a, B: Backend> {
    backend: &'a B,
    pattern: TagPattern,
}

impl<'a, B: Backend> ReleaseTagger<'a, B> {
    pub fn new(backend: &'a B, pattern: TagPattern) -> Self {
        ReleaseTagger { backend, pattern }
    }

    pub fn tag_name(&self, version: &Version) -> String {
        self.pattern.format(version)
    }

    /// Reload the model's tags from the backend.
    pub fn refresh(&self, model: &mut RepositoryModel) -> Result<()> {
        let records = self.backend.list_tags()?;
        model.replace_tags(records, &self.pattern);
        Ok(())
    }

    /// Check that `version` could be tagged on `commit` without touching anything.
    ///
    /// Used before a release merge starts, so a bad version never leaves a
    /// merged but untaggable release behind.
    pub fn check(
        &self,
        model: &RepositoryModel,
        version: &Version,
        commit: &CommitId,
    ) -> Result<()> {
        let name = self.tag_name(version);
        if let Some(existing) = model.tag(&name) {
            if &existing.commit == commit {
                return Ok(());
            }
        }
        if let Some(latest) = model.latest_tag() {
            if *version <= latest.version {
                return Err(FlowError::NonMonotonicVersion {
                    proposed: *version,
                    latest: latest.version,
                });
            }
        }
        Ok(())
    }

    /// Tag `commit` with `version`.
    ///
    /// # Returns
    /// * `Ok(Tag)` - The new tag, or the existing one for an identical request
    /// * `Err(NonMonotonicVersion)` - If `version` does not exceed the latest tag
    /// * `Err(TagExists)` - If the name is taken by a different commit
    /// * `Err(TagNotOnMain)` - If `commit` is not reachable from main
    pub fn tag(
        &self,
        model: &mut RepositoryModel,
        commit: &CommitId,
        version: Version,
    ) -> Result<Tag> {
        self.refresh(model)?;
        let name = self.tag_name(&version);

        if let Some(existing) = model.tag(&name) {
            if &existing.commit == commit {
                tracing::debug!(tag = %name, "tag already present");
                return Ok(existing.clone());
            }
            return Err(FlowError::TagExists { name });
        }

        if !model.is_on_main(commit) {
            return Err(FlowError::TagNotOnMain {
                tag: name,
                commit: commit.clone(),
            });
        }

        if let Some(latest) = model.latest_tag() {
            if version <= latest.version {
                return Err(FlowError::NonMonotonicVersion {
                    proposed: version,
                    latest: latest.version,
                });
            }
        }

        match self.backend.create_tag(&name, commit) {
            Ok(()) => {}
            Err(FlowError::TagExists { .. }) => {
                // Someone else created it meanwhile; identical is fine
                self.refresh(model)?;
                return match model.tag(&name) {
                    Some(existing) if &existing.commit == commit => Ok(existing.clone()),
                    _ => Err(FlowError::TagExists { name }),
                };
            }
            Err(e) => return Err(e),
        }

        let tag = Tag::new(name, version, commit.clone(), Utc::now());
        tracing::info!(tag = %tag.name, commit = %commit.short(), "created release tag");
        model.add_tag(tag.clone());
        Ok(tag)
    }

    /// Highest version tag known to the model
    pub fn latest<'m>(&self, model: &'m RepositoryModel) -> Option<&'m Tag> {
        model.latest_tag()
    }

    /// Version following the latest tag, or [`INITIAL_VERSION`] when untagged
    pub fn next_version(&self, model: &RepositoryModel, bump: VersionBump) -> Result<Version> {
        match self.latest(model) {
            Some(tag) => tag.version.bump(bump),
            None => Ok(INITIAL_VERSION),
        }
    }
}
