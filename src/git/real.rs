//! Production [`GitOps`] implementation.
//!
//! Mutating operations shell out to the `git` binary so behavior
//! matches what a developer runs by hand; read-only queries go through
//! git2 to avoid process overhead on hot paths like the scanner.

use git2::Repository;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{CheckoutOpts, GitError, GitOps};
use crate::util::log_cmd;

/// Git layer backed by git2 and `git` subprocesses.
#[derive(Debug, Default, Clone, Copy)]
pub struct Git;

impl Git {
    pub fn new() -> Self {
        Git
    }

    fn run(&self, dir: Option<&Path>, args: &[&str]) -> Result<String, GitError> {
        let mut cmd = Command::new("git");
        cmd.args(args);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        log_cmd(&cmd);
        let output = cmd
            .output()
            .map_err(|e| GitError::OperationFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::OperationFailed(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or(""),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn open(&self, dir: &Path) -> Result<Repository, GitError> {
        Repository::open(dir)
            .map_err(|e| GitError::NotARepo(format!("{}: {}", dir.display(), e)))
    }
}

impl GitOps for Git {
    fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        reference: Option<&Path>,
    ) -> Result<(), GitError> {
        let dest_str = dest.to_string_lossy();
        let reference_arg;
        let mut args = vec!["clone"];
        if let Some(cache) = reference {
            reference_arg = format!("--reference-if-able={}", cache.display());
            args.push(&reference_arg);
        }
        args.push(url);
        args.push(&dest_str);
        self.run(None, &args)?;
        Ok(())
    }

    fn clone_mirror(&self, url: &str, dest: &Path) -> Result<(), GitError> {
        let dest_str = dest.to_string_lossy();
        self.run(None, &["clone", "--mirror", url, &dest_str])?;
        Ok(())
    }

    fn fetch(&self, dir: &Path, remote: &str, prune: bool) -> Result<(), GitError> {
        let mut args = vec!["fetch"];
        if prune {
            args.push("--prune");
        }
        args.push(remote);
        self.run(Some(dir), &args)?;
        Ok(())
    }

    fn set_remote_url(&self, dir: &Path, remote: &str, url: &str) -> Result<(), GitError> {
        self.run(Some(dir), &["remote", "set-url", remote, url])?;
        Ok(())
    }

    fn checkout(&self, dir: &Path, rev: &str, opts: CheckoutOpts) -> Result<(), GitError> {
        let mut args = vec!["checkout"];
        if opts.detach {
            args.push("--detach");
        }
        if opts.force {
            args.push("--force");
        }
        args.push(rev);
        self.run(Some(dir), &args)?;
        Ok(())
    }

    fn rebase(&self, dir: &Path, upstream: &str) -> Result<(), GitError> {
        match self.run(Some(dir), &["rebase", upstream]) {
            Ok(_) => Ok(()),
            Err(GitError::OperationFailed(msg))
                if msg.contains("CONFLICT")
                    || msg.contains("could not apply")
                    || msg.contains("needs merge") =>
            {
                Err(GitError::RebaseConflict(msg))
            }
            Err(e) => Err(e),
        }
    }

    fn rebase_abort(&self, dir: &Path) -> Result<(), GitError> {
        self.run(Some(dir), &["rebase", "--abort"])?;
        Ok(())
    }

    fn stash(&self, dir: &Path) -> Result<bool, GitError> {
        let out = self.run(Some(dir), &["stash", "push", "--include-untracked"])?;
        Ok(!out.contains("No local changes to save"))
    }

    fn stash_pop(&self, dir: &Path) -> Result<(), GitError> {
        self.run(Some(dir), &["stash", "pop"])?;
        Ok(())
    }

    fn current_branch(&self, dir: &Path) -> Result<Option<String>, GitError> {
        let repo = self.open(dir)?;
        let result = match repo.head() {
            Ok(head) if head.is_branch() => Ok(head.shorthand().map(str::to_string)),
            Ok(_) => Ok(None),
            // Unborn HEAD (fresh repo) has no branch to report.
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => Ok(None),
            Err(e) => Err(GitError::Reference(e.to_string())),
        };
        result
    }

    fn current_revision(&self, dir: &Path) -> Result<String, GitError> {
        let repo = self.open(dir)?;
        let head = repo.head().map_err(|e| GitError::Reference(e.to_string()))?;
        let oid = head
            .target()
            .ok_or_else(|| GitError::Reference("HEAD has no target".to_string()))?;
        Ok(oid.to_string())
    }

    fn top_level(&self, dir: &Path) -> Result<PathBuf, GitError> {
        let repo = self.open(dir)?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| GitError::NotARepo(format!("{}: bare repository", dir.display())))?;
        Ok(workdir.to_path_buf())
    }

    fn is_on_branch(&self, dir: &Path) -> Result<bool, GitError> {
        Ok(self.current_branch(dir)?.is_some())
    }

    fn branches(&self, dir: &Path) -> Result<Vec<String>, GitError> {
        let repo = self.open(dir)?;
        let mut names = Vec::new();
        for branch in repo.branches(Some(git2::BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn tracking_branch(&self, dir: &Path) -> Result<Option<String>, GitError> {
        let repo = self.open(dir)?;
        let head = match repo.head() {
            Ok(head) if head.is_branch() => head,
            _ => return Ok(None),
        };
        let Some(name) = head.shorthand() else {
            return Ok(None);
        };
        let branch = repo.find_branch(name, git2::BranchType::Local)?;
        let result = match branch.upstream() {
            Ok(upstream) => Ok(upstream.name()?.map(str::to_string)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        };
        result
    }

    fn has_uncommitted(&self, dir: &Path) -> Result<bool, GitError> {
        let repo = self.open(dir)?;
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(statuses.iter().any(|s| {
            s.status().intersects(
                git2::Status::INDEX_NEW
                    | git2::Status::INDEX_MODIFIED
                    | git2::Status::INDEX_DELETED
                    | git2::Status::INDEX_RENAMED
                    | git2::Status::INDEX_TYPECHANGE
                    | git2::Status::WT_MODIFIED
                    | git2::Status::WT_DELETED
                    | git2::Status::WT_TYPECHANGE
                    | git2::Status::WT_RENAMED,
            )
        }))
    }

    fn has_untracked(&self, dir: &Path) -> Result<bool, GitError> {
        let repo = self.open(dir)?;
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(statuses
            .iter()
            .any(|s| s.status().contains(git2::Status::WT_NEW)))
    }

    fn log(&self, dir: &Path, from: &str, to: &str) -> Result<Vec<String>, GitError> {
        let range = format!("{}..{}", from, to);
        let out = self.run(Some(dir), &["log", "--format=%s", &range])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    fn commit_file(&self, dir: &Path, file: &Path, message: &str) -> Result<(), GitError> {
        let file_str = file.to_string_lossy();
        self.run(Some(dir), &["add", &file_str])?;
        self.run(Some(dir), &["commit", "-m", message, "--", &file_str])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let output = Command::new("git")
            .current_dir(dir)
            .args(args)
            .output()
            .unwrap_or_else(|e| panic!("failed to run git {:?}: {}", args, e));
        assert!(
            output.status.success(),
            "git {:?} failed in {}: {}",
            args,
            dir.display(),
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn init_repo(dir: &Path) {
        git(dir, &["init", "-b", "master"]);
        git(dir, &["config", "user.email", "test@example.com"]);
        git(dir, &["config", "user.name", "Test User"]);
        fs::write(dir.join("README.md"), "# Test").unwrap();
        git(dir, &["add", "README.md"]);
        git(dir, &["commit", "-m", "initial commit"]);
    }

    #[test]
    fn test_current_branch_and_revision() {
        let temp = TempDir::new().unwrap();
        init_repo(temp.path());
        let ops = Git::new();

        assert_eq!(
            ops.current_branch(temp.path()).unwrap().as_deref(),
            Some("master")
        );
        assert!(ops.is_on_branch(temp.path()).unwrap());
        assert_eq!(ops.current_revision(temp.path()).unwrap().len(), 40);
        assert_eq!(
            ops.top_level(temp.path()).unwrap().canonicalize().unwrap(),
            temp.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_set_remote_url() {
        let temp = TempDir::new().unwrap();
        init_repo(temp.path());
        git(temp.path(), &["remote", "add", "origin", "https://old.example.com/r"]);
        let ops = Git::new();

        ops.set_remote_url(temp.path(), "origin", "https://new.example.com/r")
            .unwrap();
        let out = Command::new("git")
            .current_dir(temp.path())
            .args(["remote", "get-url", "origin"])
            .output()
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&out.stdout).trim(),
            "https://new.example.com/r"
        );
    }

    #[test]
    fn test_detached_head_has_no_branch() {
        let temp = TempDir::new().unwrap();
        init_repo(temp.path());
        let ops = Git::new();
        let rev = ops.current_revision(temp.path()).unwrap();

        ops.checkout(temp.path(), &rev, CheckoutOpts::detach())
            .unwrap();
        assert_eq!(ops.current_branch(temp.path()).unwrap(), None);
        assert!(!ops.is_on_branch(temp.path()).unwrap());
    }

    #[test]
    fn test_uncommitted_and_untracked() {
        let temp = TempDir::new().unwrap();
        init_repo(temp.path());
        let ops = Git::new();

        assert!(!ops.has_uncommitted(temp.path()).unwrap());
        assert!(!ops.has_untracked(temp.path()).unwrap());

        fs::write(temp.path().join("new.txt"), "new").unwrap();
        assert!(ops.has_untracked(temp.path()).unwrap());
        assert!(!ops.has_uncommitted(temp.path()).unwrap());

        fs::write(temp.path().join("README.md"), "# Changed").unwrap();
        assert!(ops.has_uncommitted(temp.path()).unwrap());
    }

    #[test]
    fn test_stash_round_trip() {
        let temp = TempDir::new().unwrap();
        init_repo(temp.path());
        let ops = Git::new();

        assert!(!ops.stash(temp.path()).unwrap());

        fs::write(temp.path().join("README.md"), "# Changed").unwrap();
        assert!(ops.stash(temp.path()).unwrap());
        assert!(!ops.has_uncommitted(temp.path()).unwrap());

        ops.stash_pop(temp.path()).unwrap();
        assert!(ops.has_uncommitted(temp.path()).unwrap());
    }

    #[test]
    fn test_branches_lists_locals() {
        let temp = TempDir::new().unwrap();
        init_repo(temp.path());
        git(temp.path(), &["branch", "feature"]);
        let ops = Git::new();

        let mut branches = ops.branches(temp.path()).unwrap();
        branches.sort();
        assert_eq!(branches, vec!["feature", "master"]);
    }

    #[test]
    fn test_log_and_commit_file() {
        let temp = TempDir::new().unwrap();
        init_repo(temp.path());
        let ops = Git::new();
        let first = ops.current_revision(temp.path()).unwrap();

        fs::write(temp.path().join("data.txt"), "v1").unwrap();
        ops.commit_file(temp.path(), Path::new("data.txt"), "add data")
            .unwrap();

        let subjects = ops.log(temp.path(), &first, "HEAD").unwrap();
        assert_eq!(subjects, vec!["add data"]);
    }

    #[test]
    fn test_clone_and_mirror() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir(&src).unwrap();
        init_repo(&src);
        let url = format!("file://{}", src.display());
        let ops = Git::new();

        let mirror = temp.path().join("mirror.git");
        ops.clone_mirror(&url, &mirror).unwrap();
        assert!(mirror.join("HEAD").exists());

        let dest = temp.path().join("dest");
        ops.clone_repo(&url, &dest, Some(&mirror)).unwrap();
        assert!(dest.join("README.md").exists());
    }

    #[test]
    fn test_tracking_branch() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir(&src).unwrap();
        init_repo(&src);
        let ops = Git::new();

        let dest = temp.path().join("dest");
        ops.clone_repo(&format!("file://{}", src.display()), &dest, None)
            .unwrap();
        assert_eq!(
            ops.tracking_branch(&dest).unwrap().as_deref(),
            Some("origin/master")
        );
    }
}
