//! Recursive manifest resolution.
//!
//! Loads a root manifest, follows remote and local imports with cycle
//! detection, and produces the resolved world: a flat map of projects
//! and hooks with absolute paths and root-prefixed names.
//!
//! Not safe for concurrent invocation: resolving remote imports checks
//! out manifest revisions inside local repositories, and git index
//! operations lock the working tree. Callers serialize top-level
//! reconciliation.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

use crate::core::manifest::{Import, Manifest, ManifestError};
use crate::core::project::{
    join_name, join_root_path, temp_checkout_dir_name, Hook, HookKey, Project, ProjectKey,
    DEFAULT_REVISION,
};
use crate::git::{CheckoutOpts, GitError, GitOps};

/// Errors from resolving a manifest tree
#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("import cycle detected:\n{0}")]
    ImportCycle(String),

    #[error("manifest project '{0}' not found locally (run update to fetch it)")]
    MissingManifestProject(String),

    #[error("duplicate project '{0}' with conflicting definitions")]
    DuplicateProject(String),

    #[error("hook '{hook}' references unknown project '{project}'")]
    UnknownHookProject { hook: String, project: String },
}

/// Outputs of the loader.
#[derive(Debug)]
pub struct ResolvedWorld {
    /// All resolved projects, keys unique.
    pub projects: BTreeMap<ProjectKey, Project>,
    /// All resolved hooks with absolute action paths.
    pub hooks: BTreeMap<HookKey, Hook>,
    /// Holds clones of manifest-hosting repositories that were not yet
    /// checked out locally; dropped when the reconciliation ends.
    pub temp_dir: Option<TempDir>,
}

/// One cycle-detection frame: the manifest file being loaded and, for
/// remote imports, the `(remote, manifest)` key that led to it.
struct Frame {
    file: PathBuf,
    cycle_key: String,
}

/// Recursive manifest resolver.
pub struct Loader<'a> {
    git: &'a dyn GitOps,
    workspace_root: PathBuf,
    update: bool,
    local_manifest: bool,
    local_projects: BTreeMap<ProjectKey, Project>,
    projects: BTreeMap<ProjectKey, Project>,
    hooks: BTreeMap<HookKey, Hook>,
    loaded: HashSet<PathBuf>,
    stack: Vec<Frame>,
    temp_dir: Option<TempDir>,
}

impl<'a> Loader<'a> {
    /// `local_projects` are the projects already known on disk; the
    /// loader consults them to find manifest-hosting repositories. In
    /// `update` mode, missing hosts are cloned into a temp workspace
    /// and manifests are fetched before checkout. `local_manifest`
    /// reads manifests as they are on disk, without touching git
    /// state.
    pub fn new(
        git: &'a dyn GitOps,
        workspace_root: &Path,
        local_projects: BTreeMap<ProjectKey, Project>,
        update: bool,
        local_manifest: bool,
    ) -> Self {
        Self {
            git,
            workspace_root: workspace_root.to_path_buf(),
            update,
            local_manifest,
            local_projects,
            projects: BTreeMap::new(),
            hooks: BTreeMap::new(),
            loaded: HashSet::new(),
            stack: Vec::new(),
            temp_dir: None,
        }
    }

    /// Resolve the manifest tree rooted at `manifest_file`.
    pub fn load(mut self, manifest_file: &Path) -> Result<ResolvedWorld, LoadError> {
        self.load_file(manifest_file, "", String::new())?;
        Ok(ResolvedWorld {
            projects: self.projects,
            hooks: self.hooks,
            temp_dir: self.temp_dir,
        })
    }

    fn load_file(&mut self, file: &Path, root: &str, cycle_key: String) -> Result<(), LoadError> {
        let file = std::fs::canonicalize(file).unwrap_or_else(|_| file.to_path_buf());

        for frame in &self.stack {
            if frame.file == file || (!cycle_key.is_empty() && frame.cycle_key == cycle_key) {
                return Err(LoadError::ImportCycle(
                    self.format_cycle(&file, &cycle_key),
                ));
            }
        }
        if self.loaded.contains(&file) {
            return Ok(());
        }

        debug!(file = %file.display(), root, "loading manifest");
        self.stack.push(Frame {
            file: file.clone(),
            cycle_key,
        });
        let result = self.load_frame(&file, root);
        self.stack.pop();
        self.loaded.insert(file);
        result
    }

    fn load_frame(&mut self, file: &Path, root: &str) -> Result<(), LoadError> {
        let manifest = Manifest::parse_file(file)?;

        for import in &manifest.imports {
            self.load_import(root, import)?;
        }

        for local in &manifest.local_imports {
            let next = file
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(&local.file);
            self.load_file(&next, root, String::new())?;
        }

        for project in &manifest.projects {
            let mut project = project.clone();
            project.name = join_name(root, &project.name);
            project.path = join_root_path(&self.workspace_root, root, &project.path);
            let key = project.key();
            if let Some(existing) = self.projects.get(&key) {
                if existing != &project {
                    return Err(LoadError::DuplicateProject(key.to_string()));
                }
                continue;
            }
            self.projects.insert(key, project);
        }

        for hook in &manifest.hooks {
            let mut hook = hook.clone();
            hook.project_name = join_name(root, &hook.project_name);
            let owner = self
                .projects
                .values()
                .find(|p| p.name == hook.project_name);
            match owner {
                Some(project) => hook.action_path = project.path.clone(),
                None => {
                    return Err(LoadError::UnknownHookProject {
                        hook: hook.name.clone(),
                        project: hook.project_name.clone(),
                    })
                }
            }
            let key = hook.key();
            if let Some(existing) = self.hooks.get(&key) {
                if existing != &hook {
                    return Err(LoadError::DuplicateProject(key.to_string()));
                }
                continue;
            }
            self.hooks.insert(key, hook);
        }

        Ok(())
    }

    fn load_import(&mut self, root: &str, import: &Import) -> Result<(), LoadError> {
        let next_root = join_name(root, &import.root);
        let name = join_name(&next_root, &import.name);
        let key = ProjectKey::new(&name, &import.remote);

        let host = match self.local_projects.get(&key) {
            Some(project) => project.clone(),
            None => {
                if !self.update {
                    return Err(LoadError::MissingManifestProject(key.to_string()));
                }
                let host = self.clone_manifest_host(&name, import)?;
                self.local_projects.insert(key, host.clone());
                host
            }
        };

        let manifest_path = host.path.join(&import.manifest);
        if self.local_manifest {
            self.load_file(&manifest_path, &next_root, import.cycle_key())
        } else {
            self.with_import_checkout(&host, import, |loader| {
                loader.load_file(&manifest_path, &next_root, import.cycle_key())
            })
        }
    }

    /// Clone a manifest-hosting repository into the temp workspace and
    /// leave it detached at the tip of the import's branch.
    fn clone_manifest_host(&mut self, name: &str, import: &Import) -> Result<Project, LoadError> {
        let mut host = Project {
            name: name.to_string(),
            remote: import.remote.clone(),
            remote_branch: import.remote_branch.clone(),
            revision: DEFAULT_REVISION.to_string(),
            ..Default::default()
        };

        if self.temp_dir.is_none() {
            self.temp_dir = Some(
                tempfile::Builder::new()
                    .prefix("jiri-manifest-")
                    .tempdir()?,
            );
        }
        let temp_root = self
            .temp_dir
            .as_ref()
            .map(|t| t.path().to_path_buf())
            .unwrap_or_default();
        let dest = temp_root.join(temp_checkout_dir_name(&host));

        debug!(remote = %import.remote, dest = %dest.display(), "cloning manifest host");
        self.git.clone_repo(&import.remote, &dest, None)?;
        self.git.checkout(
            &dest,
            &format!("origin/{}", import.remote_branch),
            CheckoutOpts::detach(),
        )?;

        host.path = dest;
        Ok(host)
    }

    /// Stash local work, check out the import's requested revision
    /// (fetching first in update mode), run `f`, then restore the
    /// previous branch and stash on every exit path.
    fn with_import_checkout<F>(
        &mut self,
        host: &Project,
        import: &Import,
        f: F,
    ) -> Result<(), LoadError>
    where
        F: FnOnce(&mut Self) -> Result<(), LoadError>,
    {
        let dir = host.path.clone();
        let prev_branch = self.git.current_branch(&dir)?;
        let prev_revision = self.git.current_revision(&dir).ok();
        let stashed = self.git.stash(&dir)?;

        let checkout = (|| {
            if self.update {
                self.git.fetch(&dir, "origin", false)?;
            }
            self.git.checkout(
                &dir,
                &format!("origin/{}", import.remote_branch),
                CheckoutOpts::detach(),
            )
        })();

        let result = match checkout {
            Ok(()) => f(self),
            Err(e) => Err(e.into()),
        };

        let restore = (|| {
            match &prev_branch {
                Some(branch) => self.git.checkout(&dir, branch, CheckoutOpts::default())?,
                None => {
                    if let Some(revision) = &prev_revision {
                        self.git.checkout(&dir, revision, CheckoutOpts::detach())?;
                    }
                }
            }
            if stashed {
                self.git.stash_pop(&dir)?;
            }
            Ok::<(), GitError>(())
        })();

        result?;
        restore?;
        Ok(())
    }

    fn format_cycle(&self, file: &Path, cycle_key: &str) -> String {
        let mut lines: Vec<String> = self
            .stack
            .iter()
            .map(|frame| format_frame(&frame.file, &frame.cycle_key))
            .collect();
        lines.push(format_frame(file, cycle_key));
        lines.join("\n")
    }
}

fn format_frame(file: &Path, cycle_key: &str) -> String {
    if cycle_key.is_empty() {
        format!("  {}", file.display())
    } else {
        format!("  {} ({})", file.display(), cycle_key)
    }
}
