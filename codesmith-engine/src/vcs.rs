//! Git integration via libgit2.
//!
//! Commits go straight through the index; no `git` executable is needed.

use codesmith_error::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};
use tracing::info;

const FALLBACK_NAME: &str = "codesmith";
const FALLBACK_EMAIL: &str = "codesmith@localhost";

// ---------------------------------------------------------------------------
// Error bridging
// ---------------------------------------------------------------------------

fn git_error(kind: ErrorKind, operation: &'static str, e: git2::Error) -> Error {
    Error::new(kind, e.message().to_string())
        .with_operation(operation)
        .set_source(e)
}

// ---------------------------------------------------------------------------
// Repository handle
// ---------------------------------------------------------------------------

/// An opened repository with a working directory.
pub struct GitRepository {
    repo: git2::Repository,
    path: PathBuf,
}

impl GitRepository {
    /// Open the repository at `path` (or the one containing it).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let repo = git2::Repository::discover(path).map_err(|e| {
            Error::repository_invalid(path.display().to_string(), e.message().to_string())
                .with_operation("vcs::open")
                .set_source(e)
        })?;
        if repo.is_bare() {
            return Err(Error::repository_invalid(
                path.display().to_string(),
                "bare repositories have no working directory",
            )
            .with_operation("vcs::open"));
        }
        Ok(Self { repo, path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn workdir(&self) -> Result<&Path> {
        self.repo.workdir().ok_or_else(|| {
            Error::repository_invalid(self.path.display().to_string(), "no working directory")
        })
    }

    /// Make `file` relative to the working directory, as the index expects.
    fn index_path(&self, file: &Path) -> Result<PathBuf> {
        if file.is_relative() {
            return Ok(file.to_path_buf());
        }
        let workdir = self.workdir()?;
        let canonical_workdir = workdir.canonicalize()?;
        let canonical_file = file.canonicalize()?;
        canonical_file
            .strip_prefix(&canonical_workdir)
            .map(Path::to_path_buf)
            .map_err(|_| {
                Error::commit_failed(format!("{} is outside the repository", file.display()))
                    .with_operation("vcs::commit")
            })
    }

    fn signature(&self) -> Result<git2::Signature<'static>> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => git2::Signature::now(FALLBACK_NAME, FALLBACK_EMAIL)
                .map_err(|e| git_error(ErrorKind::CommitFailed, "vcs::signature", e)),
        }
    }

    /// Stage `files` and commit them on HEAD. Returns the new commit id.
    pub fn commit<P: AsRef<Path>>(&self, files: &[P], message: &str) -> Result<git2::Oid> {
        let fail = |e| git_error(ErrorKind::CommitFailed, "vcs::commit", e);

        let mut index = self.repo.index().map_err(fail)?;
        for file in files {
            let relative = self.index_path(file.as_ref())?;
            index.add_path(&relative).map_err(fail)?;
        }
        index.write().map_err(fail)?;

        let tree_id = index.write_tree().map_err(fail)?;
        let tree = self.repo.find_tree(tree_id).map_err(fail)?;
        let signature = self.signature()?;

        // An unborn HEAD gets a root commit
        let parent = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit().map_err(fail)?),
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => None,
            Err(e) => return Err(fail(e)),
        };
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .map_err(fail)?;
        info!(commit = %oid, files = files.len(), "committed changes");
        Ok(oid)
    }

    /// Create `name` at HEAD and check it out.
    pub fn create_branch(&self, name: &str) -> Result<()> {
        let fail = |e| git_error(ErrorKind::CommitFailed, "vcs::create_branch", e);
        let head = self.repo.head().map_err(fail)?.peel_to_commit().map_err(fail)?;
        self.repo.branch(name, &head, false).map_err(fail)?;
        self.switch_branch(name)
    }

    /// Check out an existing local branch.
    pub fn switch_branch(&self, name: &str) -> Result<()> {
        let fail = |e| git_error(ErrorKind::CommitFailed, "vcs::switch_branch", e);
        let refname = format!("refs/heads/{}", name);
        let target = self.repo.revparse_single(&refname).map_err(fail)?;
        self.repo
            .checkout_tree(&target, Some(git2::build::CheckoutBuilder::new().safe()))
            .map_err(fail)?;
        self.repo.set_head(&refname).map_err(fail)?;
        Ok(())
    }

    /// Current branch name, or the short commit id when HEAD is detached.
    pub fn current_branch(&self) -> Result<String> {
        let fail = |e| git_error(ErrorKind::RepositoryInvalid, "vcs::current_branch", e);
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => {
                // Name the branch HEAD points at even before the first commit
                let head_ref = self.repo.find_reference("HEAD").map_err(fail)?;
                let target = head_ref.symbolic_target().unwrap_or("HEAD");
                return Ok(target.trim_start_matches("refs/heads/").to_string());
            }
            Err(e) => return Err(fail(e)),
        };

        if head.is_branch() {
            Ok(head.shorthand().unwrap_or("HEAD").to_string())
        } else {
            let oid = head
                .target()
                .ok_or_else(|| Error::repository_invalid(self.path.display().to_string(), "HEAD has no target"))?;
            Ok(format!("{:.7}", oid))
        }
    }
}

/// Open `repo_path` and commit `files` with `message`.
pub fn commit_improved_code<P: AsRef<Path>>(
    repo_path: impl AsRef<Path>,
    files: &[P],
    message: &str,
) -> Result<git2::Oid> {
    GitRepository::open(repo_path)?.commit(files, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_repo() -> (TempDir, GitRepository) {
        let dir = TempDir::new().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        let repo = GitRepository::open(dir.path()).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_open_rejects_non_repository() {
        let dir = TempDir::new().unwrap();
        let err = GitRepository::open(dir.path().join("nowhere")).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::RepositoryInvalid);
        assert!(err.context_value("repo_path").is_some());
    }

    #[test]
    fn test_root_commit_then_child() {
        let (dir, repo) = init_repo();
        std::fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();
        let first = repo.commit(&["app.py"], "Optimized code in app.py").unwrap();

        std::fs::write(dir.path().join("app.py"), "x = 2\n").unwrap();
        let second = commit_improved_code(dir.path(), &[dir.path().join("app.py")], "again").unwrap();

        let raw = git2::Repository::open(dir.path()).unwrap();
        let commit = raw.find_commit(second).unwrap();
        assert_eq!(commit.parent_id(0).unwrap(), first);
        assert_eq!(commit.message(), Some("again"));
        assert_eq!(raw.find_commit(first).unwrap().parent_count(), 0);
    }

    #[test]
    fn test_branches() {
        let (dir, repo) = init_repo();
        std::fs::write(dir.path().join("a.py"), "pass\n").unwrap();
        repo.commit(&["a.py"], "init").unwrap();
        let main = repo.current_branch().unwrap();

        repo.create_branch("feature").unwrap();
        assert_eq!(repo.current_branch().unwrap(), "feature");

        repo.switch_branch(&main).unwrap();
        assert_eq!(repo.current_branch().unwrap(), main);
        assert!(repo.switch_branch("missing").is_err());
    }

    #[test]
    fn test_file_outside_repository() {
        let (_dir, repo) = init_repo();
        let outside = TempDir::new().unwrap();
        let file = outside.path().join("b.py");
        std::fs::write(&file, "pass\n").unwrap();
        let err = repo.commit(&[file], "m").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommitFailed);
    }
}
