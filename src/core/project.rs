//! Project and hook records with their identity keys.
//!
//! A project is identified by `(name, remote)`, composed into a single
//! key string `name=remote`. The `=` separator is reserved and rejected
//! in project names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Separator between the name and remote halves of a key.
pub const KEY_SEPARATOR: char = '=';

/// Branch assumed when a manifest entry does not name one.
pub const DEFAULT_REMOTE_BRANCH: &str = "master";

/// Revision meaning "tip of the remote branch".
pub const DEFAULT_REVISION: &str = "HEAD";

/// Errors from constructing or validating project records
#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("project name '{0}' contains reserved character '{KEY_SEPARATOR}'")]
    ReservedCharacter(String),

    #[error("project '{0}' is missing required attribute '{1}'")]
    MissingAttribute(String, &'static str),
}

/// Stable identity of a project within a resolved manifest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectKey(String);

impl ProjectKey {
    pub fn new(name: &str, remote: &str) -> Self {
        Self(format!("{}{}{}", name, KEY_SEPARATOR, remote))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identity of a hook: `(name, owning project name)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HookKey(String);

impl HookKey {
    pub fn new(name: &str, project_name: &str) -> Self {
        Self(format!("{}{}{}", name, KEY_SEPARATOR, project_name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn path_is_empty(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

/// A single repository checkout declared by a manifest or discovered on
/// disk.
///
/// `path` is relative in serialized form and absolute once loaded. A
/// non-`HEAD` `revision` pins the project and supersedes `remote_branch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Project {
    #[serde(rename = "@name", default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(rename = "@path", default, skip_serializing_if = "path_is_empty")]
    pub path: PathBuf,

    #[serde(rename = "@remote", default, skip_serializing_if = "String::is_empty")]
    pub remote: String,

    #[serde(
        rename = "@remotebranch",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub remote_branch: String,

    #[serde(
        rename = "@revision",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub revision: String,

    #[serde(
        rename = "@gerrithost",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub gerrit_host: String,

    #[serde(
        rename = "@githooks",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub git_hooks: String,
}

impl Project {
    pub fn key(&self) -> ProjectKey {
        ProjectKey::new(&self.name, &self.remote)
    }

    /// Whether the project tracks the tip of its remote branch rather
    /// than a pinned revision.
    pub fn tracks_branch_tip(&self) -> bool {
        self.revision == DEFAULT_REVISION
    }

    /// Reject records that cannot participate in the resolved world.
    pub fn validate(&self) -> Result<(), ProjectError> {
        if self.name.is_empty() {
            return Err(ProjectError::MissingAttribute(
                self.path.display().to_string(),
                "name",
            ));
        }
        if self.name.contains(KEY_SEPARATOR) {
            return Err(ProjectError::ReservedCharacter(self.name.clone()));
        }
        if self.remote.is_empty() {
            return Err(ProjectError::MissingAttribute(self.name.clone(), "remote"));
        }
        if self.path.as_os_str().is_empty() {
            return Err(ProjectError::MissingAttribute(self.name.clone(), "path"));
        }
        Ok(())
    }

    /// Fill serialization defaults after a read.
    pub fn fill_defaults(&mut self) {
        if self.remote_branch.is_empty() {
            self.remote_branch = DEFAULT_REMOTE_BRANCH.to_string();
        }
        if self.revision.is_empty() {
            self.revision = DEFAULT_REVISION.to_string();
        }
    }

    /// Strip defaults before a write so serialization stays minimal.
    pub fn unfill_defaults(&mut self) {
        if self.remote_branch == DEFAULT_REMOTE_BRANCH {
            self.remote_branch.clear();
        }
        if self.revision == DEFAULT_REVISION {
            self.revision.clear();
        }
    }
}

/// A post-update executable scoped to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Hook {
    #[serde(rename = "@name", default)]
    pub name: String,

    /// Executable path relative to the owning project.
    #[serde(rename = "@action", default)]
    pub action: String,

    #[serde(rename = "@project", default)]
    pub project_name: String,

    /// Absolute path of the owning project, attached at resolve time.
    #[serde(skip)]
    pub action_path: PathBuf,
}

impl Hook {
    pub fn key(&self) -> HookKey {
        HookKey::new(&self.name, &self.project_name)
    }

    /// Absolute path of the executable to run.
    pub fn command_path(&self) -> PathBuf {
        self.action_path.join(&self.action)
    }

    pub fn validate(&self) -> Result<(), ProjectError> {
        if self.name.is_empty() {
            return Err(ProjectError::MissingAttribute(
                self.project_name.clone(),
                "name",
            ));
        }
        if self.name.contains(KEY_SEPARATOR) {
            return Err(ProjectError::ReservedCharacter(self.name.clone()));
        }
        if self.action.is_empty() {
            return Err(ProjectError::MissingAttribute(self.name.clone(), "action"));
        }
        if self.project_name.is_empty() {
            return Err(ProjectError::MissingAttribute(self.name.clone(), "project"));
        }
        Ok(())
    }
}

/// FNV-1a 64-bit hash, used to derive stable directory names for
/// temporary manifest checkouts.
pub fn fnv1a_64(input: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Directory name for a temporary checkout of a manifest-hosting
/// project: the project name (slashes flattened) plus a stable hash of
/// its key.
pub fn temp_checkout_dir_name(project: &Project) -> String {
    let flat_name = project.name.replace(['/', '\\'], "-");
    format!("{}_{:016x}", flat_name, fnv1a_64(project.key().as_str()))
}

/// Join a root prefix onto a name using `/`, ignoring empty parts.
pub fn join_name(root: &str, name: &str) -> String {
    if root.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        root.to_string()
    } else {
        format!("{}/{}", root.trim_end_matches('/'), name)
    }
}

/// Join a root prefix onto a workspace-relative path.
pub fn join_root_path(workspace_root: &Path, root: &str, path: &Path) -> PathBuf {
    if root.is_empty() {
        workspace_root.join(path)
    } else {
        workspace_root.join(root).join(path)
    }
}
