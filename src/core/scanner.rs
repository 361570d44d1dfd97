//! Local project discovery.
//!
//! A directory is a project iff it holds a `.jiri/project.xml`
//! metadata record. The fast path trusts the latest update snapshot
//! and only verifies that every expected directory still exists; any
//! mismatch falls back to a full recursive walk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::config::{Config, METADATA_DIR, METADATA_FILE};
use crate::core::manifest::{Manifest, ManifestError};
use crate::core::project::{Project, ProjectKey};
use crate::core::snapshot;
use crate::git::{GitError, GitOps};

/// Errors from scanning the workspace
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("project '{key}' found at both '{first}' and '{second}'")]
    DuplicateOnDisk {
        key: String,
        first: PathBuf,
        second: PathBuf,
    },
}

/// One project as it exists on disk, with its observed git state.
#[derive(Debug, Clone)]
pub struct LocalProject {
    /// Metadata record with `path` absolutized to the discovered
    /// location.
    pub project: Project,
    /// Hash currently checked out.
    pub current_revision: String,
    /// Whether HEAD is on a branch (false when detached).
    pub on_branch: bool,
}

impl LocalProject {
    pub fn key(&self) -> ProjectKey {
        self.project.key()
    }
}

/// Discover all projects in the workspace, fast path first.
pub fn scan_workspace(
    git: &dyn GitOps,
    config: &Config,
) -> Result<BTreeMap<ProjectKey, LocalProject>, ScanError> {
    match fast_scan(git, config) {
        Ok(Some(projects)) => {
            debug!(count = projects.len(), "fast scan succeeded");
            return Ok(projects);
        }
        Ok(None) => debug!("fast scan unavailable, walking workspace"),
        Err(e) => warn!("fast scan failed ({}), walking workspace", e),
    }
    full_scan(git, config)
}

/// Load the latest snapshot and verify it against the filesystem.
///
/// Returns `Ok(None)` when there is no snapshot or any expected
/// project is missing from disk.
fn fast_scan(
    git: &dyn GitOps,
    config: &Config,
) -> Result<Option<BTreeMap<ProjectKey, LocalProject>>, ScanError> {
    let Some(snapshot_path) = snapshot::latest_snapshot_path(config) else {
        return Ok(None);
    };
    let manifest = Manifest::parse_file(&snapshot_path)?;

    let mut projects = BTreeMap::new();
    for recorded in manifest.projects {
        let mut project = recorded;
        if !project.path.is_absolute() {
            project.path = config.root.join(&project.path);
        }
        if !project.path.join(METADATA_DIR).join(METADATA_FILE).exists() {
            return Ok(None);
        }
        let local = observe(git, project)?;
        projects.insert(local.key(), local);
    }
    Ok(Some(projects))
}

/// Recursively walk the workspace collecting every metadata record.
///
/// The engine uses this directly after reconciliation, when the latest
/// snapshot no longer reflects the tree.
pub fn full_scan(
    git: &dyn GitOps,
    config: &Config,
) -> Result<BTreeMap<ProjectKey, LocalProject>, ScanError> {
    let mut projects: BTreeMap<ProjectKey, LocalProject> = BTreeMap::new();
    walk(git, config, &config.root.clone(), &mut projects)?;
    Ok(projects)
}

fn walk(
    git: &dyn GitOps,
    config: &Config,
    dir: &Path,
    projects: &mut BTreeMap<ProjectKey, LocalProject>,
) -> Result<(), ScanError> {
    let metadata_file = dir.join(METADATA_DIR).join(METADATA_FILE);
    if metadata_file.exists() {
        match load_metadata(config, dir, &metadata_file) {
            Ok(Some(project)) => {
                let key = project.key();
                if let Some(existing) = projects.get(&key) {
                    return Err(ScanError::DuplicateOnDisk {
                        key: key.to_string(),
                        first: existing.project.path.clone(),
                        second: dir.to_path_buf(),
                    });
                }
                let local = observe(git, project)?;
                projects.insert(key, local);
            }
            Ok(None) => {}
            Err(e) => warn!(dir = %dir.display(), "skipping unreadable metadata: {}", e),
        }
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            walk(git, config, &path, projects)?;
        }
    }
    Ok(())
}

/// Read one metadata record, returning `None` for stale records whose
/// recorded path no longer matches the discovered location.
fn load_metadata(
    config: &Config,
    dir: &Path,
    metadata_file: &Path,
) -> Result<Option<Project>, ScanError> {
    let manifest = Manifest::parse_file(metadata_file)?;
    let Some(mut project) = manifest.projects.into_iter().next() else {
        return Ok(None);
    };

    let recorded = if project.path.is_absolute() {
        project.path.clone()
    } else {
        config.root.join(&project.path)
    };
    if recorded != dir {
        warn!(
            "project '{}' records path '{}' but was found at '{}'; skipping stale record",
            project.name,
            recorded.display(),
            dir.display()
        );
        return Ok(None);
    }

    project.path = dir.to_path_buf();
    Ok(Some(project))
}

fn observe(git: &dyn GitOps, project: Project) -> Result<LocalProject, ScanError> {
    let current_revision = git.current_revision(&project.path)?;
    let on_branch = git.is_on_branch(&project.path)?;
    Ok(LocalProject {
        project,
        current_revision,
        on_branch,
    })
}
