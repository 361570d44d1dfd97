//! Shared fixtures: real git remotes in tempdirs and a workspace
//! builder.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use tempfile::TempDir;

use jiri::core::config::Config;
use jiri::remote::{HttpFetch, RemoteError, RemoteIndex, RepoStatus};

/// Run git, panicking with context on failure.
pub fn git(dir: &Path, args: &[&str]) {
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

pub fn git_stdout(dir: &Path, args: &[&str]) -> String {
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
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A bare remote plus a staging clone for pushing commits to it.
pub struct Remote {
    pub url: String,
    staging: PathBuf,
}

impl Remote {
    /// Commit `content` at `file` (executable when requested) and push
    /// to master. Returns the new revision.
    pub fn push_commit(&self, file: &str, content: &str, executable: bool) -> String {
        let path = self.staging.join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        #[cfg(unix)]
        if executable {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        git(&self.staging, &["add", file]);
        git(&self.staging, &["commit", "-m", &format!("add {}", file)]);
        git(&self.staging, &["push", "origin", "master"]);
        git_stdout(&self.staging, &["rev-parse", "HEAD"])
    }

    pub fn tip(&self) -> String {
        git_stdout(&self.staging, &["rev-parse", "origin/master"])
    }
}

/// A test workspace: a root with `.jiri_root` and helpers to declare
/// manifests and remotes.
pub struct Workspace {
    pub temp: TempDir,
    pub config: Config,
}

impl Workspace {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join(".jiri_root")).unwrap();
        let config = Config::new(temp.path().to_path_buf()).with_jobs(2);
        Self { temp, config }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Create a bare remote seeded with one commit on master.
    pub fn new_remote(&self, name: &str) -> Remote {
        let bare = self.temp.path().join(format!("{}.git", name));
        let output = Command::new("git")
            .args(["init", "--bare", "-b", "master", bare.to_str().unwrap()])
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git init --bare failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        let url = format!("file://{}", bare.display());

        let staging = self.temp.path().join(format!("{}-staging", name));
        std::fs::create_dir_all(&staging).unwrap();
        git(&staging, &["init", "-b", "master"]);
        git(&staging, &["config", "user.email", "test@example.com"]);
        git(&staging, &["config", "user.name", "Test User"]);
        std::fs::write(staging.join("README.md"), format!("# {}", name)).unwrap();
        git(&staging, &["add", "README.md"]);
        git(&staging, &["commit", "-m", "initial commit"]);
        git(&staging, &["remote", "add", "origin", &url]);
        git(&staging, &["push", "-u", "origin", "master"]);

        Remote { url, staging }
    }

    /// Write the root manifest from raw XML.
    pub fn write_manifest(&self, xml: &str) {
        std::fs::write(&self.config.manifest_file, xml).unwrap();
    }

    /// Write a root manifest declaring `(name, remote url, path)`
    /// projects.
    pub fn declare_projects(&self, projects: &[(&str, &str, &str)]) {
        let mut xml = String::from("<manifest>\n  <projects>\n");
        for (name, remote, path) in projects {
            xml.push_str(&format!(
                "    <project name=\"{}\" path=\"{}\" remote=\"{}\"/>\n",
                name, path, remote
            ));
        }
        xml.push_str("  </projects>\n</manifest>\n");
        self.write_manifest(&xml);
    }

    pub fn project_dir(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    pub fn metadata_file(&self, rel: &str) -> PathBuf {
        self.project_dir(rel).join(".jiri").join("project.xml")
    }
}

/// RemoteIndex / HttpFetch stand-in answering from memory.
#[derive(Default)]
pub struct FakeRemoteServices {
    /// host -> repo -> branch -> revision
    pub statuses: HashMap<String, HashMap<String, RepoStatus>>,
    /// url -> response bytes
    pub resources: HashMap<String, Vec<u8>>,
}

#[async_trait]
impl RemoteIndex for FakeRemoteServices {
    fn supports(&self, host: &str) -> bool {
        self.statuses.contains_key(host)
    }

    async fn get_repo_statuses(
        &self,
        host: &str,
        _branches: &[String],
    ) -> Result<HashMap<String, RepoStatus>, RemoteError> {
        self.statuses
            .get(host)
            .cloned()
            .ok_or_else(|| RemoteError::Unsupported(host.to_string()))
    }
}

#[async_trait]
impl HttpFetch for FakeRemoteServices {
    async fn get(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        self.resources
            .get(url)
            .cloned()
            .ok_or_else(|| RemoteError::Api(format!("{} returned HTTP 404", url)))
    }
}
