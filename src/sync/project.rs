//! Per-project synchronization.
//!
//! Executes one planned operation against one project: clone, move,
//! delete, or drive the checkout/rebase state machine. Dirty trees and
//! untracked branches are warned about and skipped, never fatal to the
//! batch. After a successful sync the metadata file is rewritten with
//! the resolved revision and git hooks are (re)installed.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::warn;

use crate::cli::output::Output;
use crate::core::config::{Config, METADATA_DIR, METADATA_FILE};
use crate::core::manifest::Manifest;
use crate::core::planner::Operation;
use crate::core::project::Project;
use crate::git::{CheckoutOpts, GitOps};

/// Everything operation execution needs, owned so the sequential run
/// can live on a blocking task.
pub struct SyncContext {
    pub git: std::sync::Arc<dyn GitOps>,
    pub config: Config,
    pub rebase_untracked: bool,
    pub snapshot_mode: bool,
    /// Pre-downloaded Gerrit commit-msg hooks, keyed by host.
    pub commit_msg_hooks: HashMap<String, Vec<u8>>,
}

impl SyncContext {
    fn git(&self) -> &dyn GitOps {
        self.git.as_ref()
    }
}

/// Revision a project should sit at: the pinned revision, or the tip
/// of its tracking branch.
pub fn head_revision(project: &Project) -> String {
    if project.tracks_branch_tip() {
        format!("origin/{}", project.remote_branch)
    } else {
        project.revision.clone()
    }
}

/// Execute one planned operation.
pub fn run_operation(ctx: &SyncContext, op: &Operation) -> anyhow::Result<()> {
    match op {
        Operation::Create(common) => create_project(ctx, &common.project),
        Operation::Move(common) => {
            move_project(ctx, &common.project, &common.source, &common.destination)
        }
        Operation::Update(common) => sync_project(ctx, &common.project),
        Operation::Delete { common, gc } => delete_project(ctx, &common.project, *gc),
        Operation::Null(_) => Ok(()),
    }
}

fn create_project(ctx: &SyncContext, project: &Project) -> anyhow::Result<()> {
    if let Some(parent) = project.path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let cache = ctx
        .config
        .cache
        .as_ref()
        .map(|root| root.join(cache_dir_name(&project.remote)))
        .filter(|path| path.exists());

    ctx.git()
        .clone_repo(&project.remote, &project.path, cache.as_deref())
        .with_context(|| format!("cloning '{}'", project.name))?;
    ctx.git()
        .checkout(&project.path, &head_revision(project), CheckoutOpts::detach())
        .with_context(|| format!("checking out '{}'", project.name))?;

    finalize(ctx, project)
}

fn move_project(
    ctx: &SyncContext,
    project: &Project,
    source: &Path,
    destination: &Path,
) -> anyhow::Result<()> {
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(source, destination)
        .with_context(|| format!("moving '{}' to '{}'", source.display(), destination.display()))?;
    sync_project(ctx, project)
}

/// The checkout/rebase state machine.
fn sync_project(ctx: &SyncContext, project: &Project) -> anyhow::Result<()> {
    let git = ctx.git();
    let dir = &project.path;
    let dirty = git.has_uncommitted(dir)? || git.has_untracked(dir)?;

    if !git.is_on_branch(dir)? || ctx.snapshot_mode {
        if dirty {
            Output::warning(&format!(
                "{}: uncommitted work, skipping checkout; commit or stash and run update again",
                project.name
            ));
            return Ok(());
        }
        let target = head_revision(project);
        if let Err(e) = git.checkout(dir, &target, CheckoutOpts::detach()) {
            Output::warning(&format!(
                "{}: checkout of {} failed ({}); fix manually with `git checkout --detach {}`",
                project.name, target, e, target
            ));
        }
        return finalize(ctx, project);
    }

    if dirty {
        Output::warning(&format!(
            "{}: uncommitted work on branch, skipping rebase",
            project.name
        ));
        return Ok(());
    }

    match git.tracking_branch(dir)? {
        Some(upstream) => rebase_onto(ctx, project, &upstream)?,
        None => {
            if ctx.rebase_untracked {
                let target = head_revision(project);
                rebase_onto(ctx, project, &target)?;
            } else {
                let branch = git
                    .current_branch(dir)?
                    .unwrap_or_else(|| "HEAD".to_string());
                Output::warning(&format!(
                    "{}: branch '{}' does not track a remote; run update with \
--rebase-untracked or `git rebase {}` manually",
                    project.name,
                    branch,
                    head_revision(project)
                ));
            }
        }
    }

    finalize(ctx, project)
}

fn rebase_onto(ctx: &SyncContext, project: &Project, upstream: &str) -> anyhow::Result<()> {
    let dir = &project.path;
    match ctx.git().rebase(dir, upstream) {
        Ok(()) => Ok(()),
        Err(e) if e.is_rebase_conflict() => {
            ctx.git()
                .rebase_abort(dir)
                .with_context(|| format!("aborting conflicted rebase in '{}'", project.name))?;
            Output::warning(&format!(
                "{}: rebase onto {} hit conflicts and was aborted; rebase manually",
                project.name, upstream
            ));
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("rebasing '{}' onto {}", project.name, upstream)),
    }
}

fn delete_project(ctx: &SyncContext, project: &Project, gc: bool) -> anyhow::Result<()> {
    let git = ctx.git();
    let dir = &project.path;

    if !gc {
        Output::warning(&format!(
            "{}: no longer in the manifest; run update with -gc to remove {}",
            project.name,
            dir.display()
        ));
        return Ok(());
    }

    if git.has_uncommitted(dir)? || git.has_untracked(dir)? {
        Output::warning(&format!(
            "{}: uncommitted work in {}, not deleting",
            project.name,
            dir.display()
        ));
        return Ok(());
    }

    let extra_branches: Vec<String> = git
        .branches(dir)?
        .into_iter()
        .filter(|branch| branch != &project.remote_branch)
        .collect();
    if !extra_branches.is_empty() {
        Output::warning(&format!(
            "{}: local branches [{}] in {}, not deleting",
            project.name,
            extra_branches.join(", "),
            dir.display()
        ));
        return Ok(());
    }

    std::fs::remove_dir_all(dir)
        .with_context(|| format!("deleting '{}'", dir.display()))?;
    Ok(())
}

/// Post-sync bookkeeping: metadata rewrite, hook installation, and the
/// `.git/info/exclude` entry hiding the metadata directory.
fn finalize(ctx: &SyncContext, project: &Project) -> anyhow::Result<()> {
    // Keep origin pinned to the manifest remote.
    ctx.git()
        .set_remote_url(&project.path, "origin", &project.remote)?;
    write_metadata(ctx, project)?;
    install_git_hooks(ctx, project)?;
    install_commit_msg_hook(ctx, project)?;
    exclude_metadata_dir(&project.path)?;
    Ok(())
}

fn write_metadata(ctx: &SyncContext, project: &Project) -> anyhow::Result<()> {
    let mut record = project.clone();
    record.revision = ctx.git().current_revision(&project.path)?;
    if let Ok(relative) = record.path.strip_prefix(&ctx.config.root) {
        record.path = relative.to_path_buf();
    }

    let metadata_dir = project.path.join(METADATA_DIR);
    std::fs::create_dir_all(&metadata_dir)?;
    Manifest::single_project(record)
        .write_file(&metadata_dir.join(METADATA_FILE))
        .with_context(|| format!("writing metadata for '{}'", project.name))?;
    Ok(())
}

fn install_git_hooks(ctx: &SyncContext, project: &Project) -> anyhow::Result<()> {
    if project.git_hooks.is_empty() {
        return Ok(());
    }
    let hooks_src = ctx.config.root.join(&project.git_hooks);
    if !hooks_src.is_dir() {
        warn!(
            "githooks directory '{}' for '{}' does not exist",
            hooks_src.display(),
            project.name
        );
        return Ok(());
    }

    let hooks_dest = project.path.join(".git").join("hooks");
    std::fs::create_dir_all(&hooks_dest)?;
    for entry in std::fs::read_dir(&hooks_src)? {
        let entry = entry?;
        if entry.path().is_file() {
            let dest = hooks_dest.join(entry.file_name());
            std::fs::copy(entry.path(), &dest)?;
            make_executable(&dest)?;
        }
    }
    Ok(())
}

fn install_commit_msg_hook(ctx: &SyncContext, project: &Project) -> anyhow::Result<()> {
    if project.gerrit_host.is_empty() {
        return Ok(());
    }
    let Some(bytes) = ctx.commit_msg_hooks.get(&project.gerrit_host) else {
        return Ok(());
    };

    let hooks_dir = project.path.join(".git").join("hooks");
    std::fs::create_dir_all(&hooks_dir)?;
    let dest = hooks_dir.join("commit-msg");
    std::fs::write(&dest, bytes)?;
    make_executable(&dest)?;
    Ok(())
}

/// Add `/.jiri/` to `.git/info/exclude` once, so the metadata
/// directory never shows up as untracked.
fn exclude_metadata_dir(project_path: &Path) -> anyhow::Result<()> {
    let exclude_line = format!("/{}/", METADATA_DIR);
    let info_dir = project_path.join(".git").join("info");
    if !project_path.join(".git").exists() {
        return Ok(());
    }
    std::fs::create_dir_all(&info_dir)?;
    let exclude_file = info_dir.join("exclude");

    let current = std::fs::read_to_string(&exclude_file).unwrap_or_default();
    if current.lines().any(|line| line.trim() == exclude_line) {
        return Ok(());
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&exclude_file)?;
    if !current.is_empty() && !current.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{}", exclude_line)?;
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Cache directory name for a remote URL: hostname plus the path with
/// slashes escaped.
pub fn cache_dir_name(remote: &str) -> PathBuf {
    let (host, path) = match url::Url::parse(remote) {
        Ok(parsed) => (
            parsed.host_str().unwrap_or_default().to_string(),
            parsed.path().to_string(),
        ),
        Err(_) => (String::new(), remote.to_string()),
    };
    let escaped = path.trim_matches('/').replace('/', "-");
    if host.is_empty() {
        PathBuf::from(escaped)
    } else if escaped.is_empty() {
        PathBuf::from(host)
    } else {
        PathBuf::from(format!("{}-{}", host, escaped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_revision_tracks_branch_tip() {
        let project = Project {
            name: "app".to_string(),
            path: PathBuf::from("/w/app"),
            remote: "https://example.com/app".to_string(),
            remote_branch: "main".to_string(),
            revision: "HEAD".to_string(),
            ..Default::default()
        };
        assert_eq!(head_revision(&project), "origin/main");
    }

    #[test]
    fn test_head_revision_pinned() {
        let project = Project {
            name: "app".to_string(),
            path: PathBuf::from("/w/app"),
            remote: "https://example.com/app".to_string(),
            remote_branch: "main".to_string(),
            revision: "abc123".to_string(),
            ..Default::default()
        };
        assert_eq!(head_revision(&project), "abc123");
    }

    #[test]
    fn test_cache_dir_name_escapes_path() {
        assert_eq!(
            cache_dir_name("https://example.com/foo/bar"),
            PathBuf::from("example.com-foo-bar")
        );
        assert_eq!(
            cache_dir_name("https://example.com/"),
            PathBuf::from("example.com")
        );
    }

    #[test]
    fn test_cache_dir_name_for_file_urls() {
        assert_eq!(
            cache_dir_name("file:///tmp/remotes/app"),
            PathBuf::from("tmp-remotes-app")
        );
    }

    #[test]
    fn test_exclude_is_idempotent() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join(".git/info")).unwrap();

        exclude_metadata_dir(temp.path()).unwrap();
        exclude_metadata_dir(temp.path()).unwrap();

        let content =
            std::fs::read_to_string(temp.path().join(".git/info/exclude")).unwrap();
        assert_eq!(content.matches("/.jiri/").count(), 1);
    }
}
