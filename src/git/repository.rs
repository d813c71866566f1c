use chrono::{DateTime, Utc};
use git2::{BranchType, ErrorCode, Oid, Repository};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::domain::{Commit, CommitId};
use crate::error::{FlowError, Result};
use crate::git::{Backend, BranchRecord, MergeResult, RepoSnapshot, TagRecord};

/// Backend over a real git repository.
///
/// Only refs and objects are written; the working tree and index are never
/// touched. A fresh `git2::Repository` handle is opened for every call so the
/// backend is `Send + Sync` without any lock of its own; concurrent writers are
/// serialised by libgit2's ref locking through `reference_matching`.
pub struct Git2Backend {
    git_dir: PathBuf,
    remote: String,
}

impl Git2Backend {
    /// Open or discover a git repository
    pub fn open<P: AsRef<Path>>(path: P, remote: impl Into<String>) -> Result<Self> {
        let repo = Repository::discover(path)?;
        Ok(Git2Backend {
            git_dir: repo.path().to_path_buf(),
            remote: remote.into(),
        })
    }

    fn repo(&self) -> Result<Repository> {
        Ok(Repository::open(&self.git_dir)?)
    }

    fn lineage_key(name: &str) -> String {
        format!("branch.{}.flowparent", name)
    }
}

fn parse_oid(id: &CommitId) -> Result<Oid> {
    Ok(Oid::from_str(id.as_str())?)
}

fn branch_head(repo: &Repository, name: &str) -> Result<Oid> {
    let branch = match repo.find_branch(name, BranchType::Local) {
        Ok(branch) => branch,
        Err(e) if e.code() == ErrorCode::NotFound => return Err(FlowError::ref_not_found(name)),
        Err(e) => return Err(e.into()),
    };
    branch
        .get()
        .target()
        .ok_or_else(|| FlowError::ref_not_found(name))
}

fn timestamp(seconds: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(seconds, 0).unwrap_or_else(Utc::now)
}

fn read_tags(repo: &Repository) -> Result<Vec<TagRecord>> {
    let mut tags = Vec::new();
    let names = repo.tag_names(None)?;
    for name in names.iter().flatten() {
        let reference = repo.find_reference(&format!("refs/tags/{}", name))?;
        // Annotated tags carry their own time; lightweight ones borrow the commit's
        let created_at = match reference.peel_to_tag() {
            Ok(tag) => tag.tagger().map(|sig| timestamp(sig.when().seconds())),
            Err(_) => None,
        };
        let commit = match reference.peel_to_commit() {
            Ok(commit) => commit,
            Err(_) => continue,
        };
        tags.push(TagRecord {
            name: name.to_string(),
            commit: commit.id().into(),
            created_at: created_at.unwrap_or_else(|| timestamp(commit.time().seconds())),
        });
    }
    Ok(tags)
}

fn remote_callbacks<'a>() -> git2::RemoteCallbacks<'a> {
    let mut callbacks = git2::RemoteCallbacks::new();
    callbacks.credentials(|_url, username_from_url, allowed_types| {
        let username = username_from_url.unwrap_or("git");
        if allowed_types.contains(git2::CredentialType::SSH_KEY) {
            if let Ok(cred) = git2::Cred::ssh_key_from_agent(username) {
                return Ok(cred);
            }
            if let Some(home) = dirs::home_dir() {
                return git2::Cred::ssh_key(username, None, &home.join(".ssh/id_rsa"), None);
            }
        }
        git2::Cred::default()
    });
    callbacks.push_update_reference(|refname, status| match status {
        Some(status) => Err(git2::Error::from_str(&format!(
            "remote rejected {}: {}",
            refname, status
        ))),
        None => Ok(()),
    });
    callbacks
}

impl Git2Backend {
    fn push_refspec(&self, refspec: &str) -> Result<()> {
        let repo = self.repo()?;
        let mut remote = repo
            .find_remote(&self.remote)
            .map_err(|e| FlowError::remote(format!("Cannot find remote '{}': {}", self.remote, e)))?;

        let mut options = git2::PushOptions::new();
        options.remote_callbacks(remote_callbacks());
        remote.push(&[refspec], Some(&mut options)).map_err(|e| {
            if e.class() == git2::ErrorClass::Net {
                FlowError::remote(format!("Network error during push: {}", e))
            } else {
                FlowError::remote(format!("Push of {} failed: {}", refspec, e))
            }
        })
    }
}

impl Backend for Git2Backend {
    fn snapshot(&self) -> Result<RepoSnapshot> {
        let repo = self.repo()?;
        let config = repo.config()?;

        let mut branches = Vec::new();
        let mut walk = repo.revwalk()?;
        for entry in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = entry?;
            let name = match branch.name()? {
                Some(name) => name.to_string(),
                None => continue,
            };
            let head = match branch.get().target() {
                Some(oid) => oid,
                None => continue,
            };
            walk.push(head)?;
            let fork_parent = config.get_string(&Self::lineage_key(&name)).ok();
            branches.push(BranchRecord {
                name,
                head: head.into(),
                fork_parent,
            });
        }

        let tags = read_tags(&repo)?;
        for tag in &tags {
            walk.push(parse_oid(&tag.commit)?)?;
        }

        let mut seen = HashSet::new();
        let mut commits = Vec::new();
        for oid in walk {
            let oid = oid?;
            if !seen.insert(oid) {
                continue;
            }
            let commit = repo.find_commit(oid)?;
            let parents = commit.parent_ids().map(CommitId::from).collect();
            commits.push(Commit::new(oid.into(), parents));
        }

        Ok(RepoSnapshot {
            branches,
            commits,
            tags,
        })
    }

    fn create_branch(&self, name: &str, from: &CommitId, fork_parent: Option<&str>) -> Result<()> {
        let repo = self.repo()?;
        let commit = repo.find_commit(parse_oid(from)?)?;
        match repo.branch(name, &commit, false) {
            Ok(_) => {}
            Err(e) if e.code() == ErrorCode::Exists => {
                return Err(FlowError::RefExists {
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = fork_parent {
            repo.config()?.set_str(&Self::lineage_key(name), parent)?;
        }
        Ok(())
    }

    fn get_head(&self, branch: &str) -> Result<CommitId> {
        let repo = self.repo()?;
        Ok(branch_head(&repo, branch)?.into())
    }

    fn merge(
        &self,
        source: &str,
        target: &str,
        expected_target_head: &CommitId,
    ) -> Result<MergeResult> {
        let repo = self.repo()?;
        let expected = parse_oid(expected_target_head)?;
        let ours_oid = branch_head(&repo, target)?;
        if ours_oid != expected {
            return Err(FlowError::StaleRef {
                branch: target.to_string(),
                expected: expected_target_head.clone(),
                actual: ours_oid.into(),
            });
        }
        let theirs_oid = branch_head(&repo, source)?;

        if theirs_oid == ours_oid || repo.graph_descendant_of(ours_oid, theirs_oid)? {
            return Ok(MergeResult::up_to_date(ours_oid.into()));
        }

        let ours = repo.find_commit(ours_oid)?;
        let theirs = repo.find_commit(theirs_oid)?;
        let mut index = repo.merge_commits(&ours, &theirs, None)?;

        if index.has_conflicts() {
            let mut paths: Vec<String> = index
                .conflicts()?
                .filter_map(|conflict| conflict.ok())
                .filter_map(|conflict| conflict.our.or(conflict.their).or(conflict.ancestor))
                .map(|entry| String::from_utf8_lossy(&entry.path).into_owned())
                .collect();
            paths.sort();
            paths.dedup();
            return Err(FlowError::MergeConflict {
                source_branch: source.to_string(),
                target_branch: target.to_string(),
                paths,
            });
        }

        let tree = repo.find_tree(index.write_tree_to(&repo)?)?;
        let signature = repo
            .signature()
            .or_else(|_| git2::Signature::now("gitflow", "gitflow@localhost"))?;
        let message = format!("Merge branch '{}' into {}", source, target);
        let new_oid = repo.commit(None, &signature, &signature, &message, &tree, &[&ours, &theirs])?;

        let refname = format!("refs/heads/{}", target);
        match repo.reference_matching(&refname, new_oid, true, ours_oid, &message) {
            Ok(_) => {}
            Err(e) if e.code() == ErrorCode::Modified => {
                let actual = branch_head(&repo, target)?;
                return Err(FlowError::StaleRef {
                    branch: target.to_string(),
                    expected: expected_target_head.clone(),
                    actual: actual.into(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        if let Ok(head) = repo.head() {
            if !repo.is_bare() && head.name() == Some(refname.as_str()) {
                tracing::warn!(
                    branch = target,
                    "checked-out branch advanced; working tree no longer matches it"
                );
            }
        }

        Ok(MergeResult {
            new_head: new_oid.into(),
            merge_commit: Some(Commit::new(
                new_oid.into(),
                vec![ours_oid.into(), theirs_oid.into()],
            )),
        })
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        let repo = self.repo()?;
        let mut branch = match repo.find_branch(name, BranchType::Local) {
            Ok(branch) => branch,
            Err(e) if e.code() == ErrorCode::NotFound => return Err(FlowError::ref_not_found(name)),
            Err(e) => return Err(e.into()),
        };
        branch.delete()?;

        let mut config = repo.config()?;
        match config.remove(&Self::lineage_key(name)) {
            Ok(()) => {}
            Err(e) if e.code() == ErrorCode::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn create_tag(&self, name: &str, commit: &CommitId) -> Result<()> {
        let repo = self.repo()?;
        let object = repo.find_object(parse_oid(commit)?, None)?;
        match repo.tag_lightweight(name, &object, false) {
            Ok(_) => Ok(()),
            Err(e) if e.code() == ErrorCode::Exists => Err(FlowError::TagExists {
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn list_tags(&self) -> Result<Vec<TagRecord>> {
        read_tags(&self.repo()?)
    }

    fn push(&self, branch: &str) -> Result<()> {
        self.push_refspec(&format!("refs/heads/{0}:refs/heads/{0}", branch))
    }

    fn push_tag(&self, tag: &str) -> Result<()> {
        self.push_refspec(&format!("refs/tags/{0}:refs/tags/{0}", tag))
    }

    /// Fetch the branch from the remote, then fast-forward the local branch.
    ///
    /// Diverged branches are left alone; the merge that follows decides what to do.
    fn pull(&self, branch: &str) -> Result<()> {
        let repo = self.repo()?;
        let mut remote = repo
            .find_remote(&self.remote)
            .map_err(|e| FlowError::remote(format!("Cannot find remote '{}': {}", self.remote, e)))?;

        let tracking = format!("refs/remotes/{}/{}", self.remote, branch);
        let refspec = format!("+refs/heads/{}:{}", branch, tracking);
        let mut options = git2::FetchOptions::new();
        options.remote_callbacks(remote_callbacks());
        remote
            .fetch(&[refspec.as_str()], Some(&mut options), None)
            .map_err(|e| FlowError::remote(format!("Fetch of '{}' failed: {}", branch, e)))?;

        let remote_oid = match repo.find_reference(&tracking) {
            Ok(reference) => match reference.target() {
                Some(oid) => oid,
                None => return Ok(()),
            },
            Err(_) => return Ok(()),
        };
        let local_oid = branch_head(&repo, branch)?;
        if local_oid == remote_oid || !repo.graph_descendant_of(remote_oid, local_oid)? {
            return Ok(());
        }

        let refname = format!("refs/heads/{}", branch);
        let message = format!("fast-forward from {}/{}", self.remote, branch);
        let updated = repo
            .reference_matching(&refname, remote_oid, true, local_oid, &message)
            .map(|_| ());
        match updated {
            Ok(()) => {
                tracing::debug!(branch, head = %remote_oid, "fast-forwarded from remote");
                Ok(())
            }
            Err(e) if e.code() == ErrorCode::Modified => Err(FlowError::StaleRef {
                branch: branch.to_string(),
                expected: local_oid.into(),
                actual: branch_head(&repo, branch)?.into(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
