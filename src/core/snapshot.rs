//! Update snapshots.
//!
//! Every successful reconciliation records the workspace state (each
//! project pinned at its current revision) as a manifest under
//! `.jiri_root/update_history/`. The `latest` and `second-latest`
//! symlinks point at the two most recent snapshots with relative
//! targets, so they stay valid when the workspace root moves. The fast
//! scanner reads `latest` to skip a full walk.

use chrono::{SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::config::Config;
use crate::core::manifest::{Manifest, ManifestError};
use crate::core::project::ProjectKey;
use crate::core::scanner::LocalProject;

pub const LATEST_LINK: &str = "latest";
pub const SECOND_LATEST_LINK: &str = "second-latest";

/// Errors from snapshot bookkeeping
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Path of the snapshot the `latest` symlink points at, if any.
pub fn latest_snapshot_path(config: &Config) -> Option<PathBuf> {
    let link = config.update_history_dir().join(LATEST_LINK);
    let target = std::fs::read_link(&link).ok()?;
    let resolved = if target.is_absolute() {
        target
    } else {
        config.update_history_dir().join(target)
    };
    resolved.exists().then_some(resolved)
}

/// Manifest capturing the given local projects at their current
/// revisions, with workspace-relative paths.
pub fn snapshot_manifest(
    root: &Path,
    locals: &BTreeMap<ProjectKey, LocalProject>,
) -> Manifest {
    let mut manifest = Manifest::default();
    for local in locals.values() {
        let mut project = local.project.clone();
        if let Ok(relative) = project.path.strip_prefix(root) {
            project.path = relative.to_path_buf();
        }
        project.revision = local.current_revision.clone();
        manifest.projects.push(project);
    }
    manifest
}

/// Serialize a snapshot of `locals` to an arbitrary file.
pub fn write_snapshot_file(
    root: &Path,
    path: &Path,
    locals: &BTreeMap<ProjectKey, LocalProject>,
) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    snapshot_manifest(root, locals).write_file(path)?;
    Ok(())
}

/// Record a timestamped snapshot under the update history directory
/// and rotate the `latest` / `second-latest` symlinks.
pub fn write_update_snapshot(
    config: &Config,
    locals: &BTreeMap<ProjectKey, LocalProject>,
) -> Result<PathBuf, SnapshotError> {
    let history = config.update_history_dir();
    std::fs::create_dir_all(&history)?;

    // Nanosecond precision: back-to-back updates must not collide.
    let name = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
    let path = history.join(&name);
    write_snapshot_file(&config.root, &path, locals)?;
    rotate_links(&history, &name)?;
    Ok(path)
}

/// Point `second-latest` at the previous `latest` target and `latest`
/// at `name`. Targets are relative file names within the history
/// directory.
fn rotate_links(history: &Path, name: &str) -> Result<(), SnapshotError> {
    let latest = history.join(LATEST_LINK);
    let second = history.join(SECOND_LATEST_LINK);

    if let Ok(previous) = std::fs::read_link(&latest) {
        if second.symlink_metadata().is_ok() {
            std::fs::remove_file(&second)?;
        }
        symlink(&previous, &second)?;
    }

    if latest.symlink_metadata().is_ok() {
        std::fs::remove_file(&latest)?;
    }
    symlink(Path::new(name), &latest)?;
    Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    // Symlink-free platforms get a plain file naming the target.
    std::fs::write(link, target.to_string_lossy().as_bytes())
}
