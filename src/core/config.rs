//! Workspace configuration and well-known paths.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory marking the workspace root, holding tool state.
pub const ROOT_META_DIR: &str = ".jiri_root";

/// Default root manifest file name, directly under the workspace root.
pub const ROOT_MANIFEST_FILE: &str = ".jiri_manifest";

/// Per-project metadata directory at each project root.
pub const METADATA_DIR: &str = ".jiri";

/// Metadata file inside [`METADATA_DIR`]: a single-project manifest.
pub const METADATA_FILE: &str = "project.xml";

/// Snapshot directory under [`ROOT_META_DIR`].
pub const UPDATE_HISTORY_DIR: &str = "update_history";

/// Errors from resolving the workspace configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("not in a jiri workspace (no {ROOT_META_DIR} directory above {0})")]
    NotInWorkspace(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Workspace root; every project path lives under it.
    pub root: PathBuf,
    /// Worker budget for parallel fan-out.
    pub jobs: usize,
    /// Optional bare-mirror cache directory.
    pub cache: Option<PathBuf>,
    /// Absolute path of the root manifest.
    pub manifest_file: PathBuf,
}

impl Config {
    pub fn new(root: PathBuf) -> Self {
        let manifest_file = root.join(ROOT_MANIFEST_FILE);
        Self {
            root,
            jobs: default_jobs(),
            cache: None,
            manifest_file,
        }
    }

    /// Find the workspace root by walking ancestors of `start` looking
    /// for the `.jiri_root` directory.
    pub fn discover(start: &Path) -> Result<Self, ConfigError> {
        let mut search_path = start.to_path_buf();
        loop {
            if search_path.join(ROOT_META_DIR).is_dir() {
                return Ok(Self::new(search_path));
            }
            match search_path.parent() {
                Some(parent) => search_path = parent.to_path_buf(),
                None => return Err(ConfigError::NotInWorkspace(start.to_path_buf())),
            }
        }
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_cache(mut self, cache: Option<PathBuf>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_manifest_file(mut self, manifest_file: PathBuf) -> Self {
        self.manifest_file = if manifest_file.is_absolute() {
            manifest_file
        } else {
            self.root.join(manifest_file)
        };
        self
    }

    pub fn root_meta_dir(&self) -> PathBuf {
        self.root.join(ROOT_META_DIR)
    }

    pub fn update_history_dir(&self) -> PathBuf {
        self.root_meta_dir().join(UPDATE_HISTORY_DIR)
    }
}

/// Worker budget when none is configured.
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
