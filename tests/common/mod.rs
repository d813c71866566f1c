//! Scratch git repositories for tests that need a real backend.

#![allow(dead_code)]

use git2::{BranchType, Repository, Signature};
use tempfile::TempDir;

pub fn signature() -> Signature<'static> {
    Signature::now("Test User", "test@example.com").unwrap()
}

/// A repository whose only branch, `main`, holds one commit with a README.
pub fn init_repo() -> (TempDir, Repository) {
    let dir = TempDir::new().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    {
        let sig = signature();
        let blob = repo.blob(b"# project\n").unwrap();
        let mut builder = repo.treebuilder(None).unwrap();
        builder.insert("README.md", blob, 0o100644).unwrap();
        let tree = repo.find_tree(builder.write().unwrap()).unwrap();
        repo.commit(Some("refs/heads/main"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
    }
    (dir, repo)
}

/// Commit `content` at `path` on top of `branch`, without touching the working tree.
pub fn commit_file(repo: &Repository, branch: &str, path: &str, content: &str) -> git2::Oid {
    let sig = signature();
    let parent = repo
        .find_branch(branch, BranchType::Local)
        .unwrap()
        .get()
        .peel_to_commit()
        .unwrap();
    let blob = repo.blob(content.as_bytes()).unwrap();
    let mut builder = repo.treebuilder(Some(&parent.tree().unwrap())).unwrap();
    builder.insert(path, blob, 0o100644).unwrap();
    let tree = repo.find_tree(builder.write().unwrap()).unwrap();
    repo.commit(
        Some(&format!("refs/heads/{}", branch)),
        &sig,
        &sig,
        &format!("change {}", path),
        &tree,
        &[&parent],
    )
    .unwrap()
}

/// Content of `path` at the head of `branch`, if present.
pub fn read_file(repo: &Repository, branch: &str, path: &str) -> Option<String> {
    let commit = repo
        .find_branch(branch, BranchType::Local)
        .ok()?
        .get()
        .peel_to_commit()
        .ok()?;
    let entry = commit.tree().ok()?.get_path(std::path::Path::new(path)).ok()?;
    let blob = repo.find_blob(entry.id()).ok()?;
    Some(String::from_utf8_lossy(blob.content()).into_owned())
}
