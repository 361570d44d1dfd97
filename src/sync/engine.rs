//! The update engine.
//!
//! `update_universe` drives one full reconciliation: scan, load,
//! match, then a parallel phase (cache refresh + local fetch in one
//! task, the batched remote-HEAD query in another, both bounded by the
//! worker budget), then the planned operations sequentially, then
//! hooks, then a snapshot of the result. Worker errors are channelled
//! to a collector and surfaced as one [`MultiError`]; a phase with a
//! non-empty collector aborts before any operation runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::core::config::Config;
use crate::core::loader::Loader;
use crate::core::matcher::detect_renames;
use crate::core::planner::{plan_operations, test_operations, Operation, PlanContext};
use crate::core::project::{Project, ProjectKey};
use crate::core::scanner::{full_scan, scan_workspace, LocalProject};
use crate::core::snapshot;
use crate::git::GitOps;
use crate::remote::{HttpFetch, RemoteIndex};
use crate::sync::hooks::{run_hooks, DEFAULT_HOOK_TIMEOUT};
use crate::sync::project::{cache_dir_name, run_operation, SyncContext};
use crate::util::MultiError;

/// Knobs for one `update_universe` run.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Delete projects no longer in the manifest.
    pub gc: bool,
    /// Read manifests as checked out locally, without fetching.
    pub local_manifest: bool,
    /// Rebase branches that do not track a remote.
    pub rebase_untracked: bool,
    /// Run post-update hooks.
    pub run_hooks: bool,
    pub hook_timeout: Duration,
    /// Show hook stdout and extra progress.
    pub verbose: bool,
    /// Update to a snapshot file instead of the root manifest.
    pub snapshot_file: Option<PathBuf>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            gc: false,
            local_manifest: false,
            rebase_untracked: false,
            run_hooks: true,
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
            verbose: false,
            snapshot_file: None,
        }
    }
}

/// What a reconciliation did, for reporting.
#[derive(Debug, Default)]
pub struct UpdateSummary {
    pub created: usize,
    pub moved: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl UpdateSummary {
    fn count(&mut self, op: &Operation) {
        match op {
            Operation::Create(_) => self.created += 1,
            Operation::Move(_) => self.moved += 1,
            Operation::Update(_) => self.updated += 1,
            Operation::Delete { .. } => self.deleted += 1,
            Operation::Null(_) => self.unchanged += 1,
        }
    }
}

/// Reconciliation engine wiring the abstract services together.
pub struct Engine {
    git: Arc<dyn GitOps>,
    index: Arc<dyn RemoteIndex>,
    http: Arc<dyn HttpFetch>,
    config: Config,
}

impl Engine {
    pub fn new(
        git: Arc<dyn GitOps>,
        index: Arc<dyn RemoteIndex>,
        http: Arc<dyn HttpFetch>,
        config: Config,
    ) -> Self {
        Self {
            git,
            index,
            http,
            config,
        }
    }

    /// Bring the workspace into agreement with the manifest.
    ///
    /// Not safe for concurrent invocation; see the loader.
    pub async fn update_universe(&self, opts: &UpdateOptions) -> anyhow::Result<UpdateSummary> {
        let mut locals = scan_workspace(self.git.as_ref(), &self.config)?;
        debug!(count = locals.len(), "scanned local projects");

        let known: BTreeMap<ProjectKey, Project> = locals
            .iter()
            .map(|(key, local)| (key.clone(), local.project.clone()))
            .collect();
        let manifest_file = opts
            .snapshot_file
            .clone()
            .unwrap_or_else(|| self.config.manifest_file.clone());
        let world = Loader::new(
            self.git.as_ref(),
            &self.config.root,
            known,
            true,
            opts.local_manifest,
        )
        .load(&manifest_file)?;
        debug!(count = world.projects.len(), "resolved manifest projects");

        detect_renames(&mut locals, &world.projects);

        let remote_heads = self.fetch_phase(&locals, &world.projects).await?;

        let plan_ctx = PlanContext {
            snapshot_mode: opts.snapshot_file.is_some(),
            gc: opts.gc,
            remote_heads,
        };
        let operations = plan_operations(&locals, &world.projects, &plan_ctx);
        test_operations(&operations)?;

        let commit_msg_hooks = self.fetch_commit_msg_hooks(&operations).await;

        let sync_ctx = SyncContext {
            git: self.git.clone(),
            config: self.config.clone(),
            rebase_untracked: opts.rebase_untracked,
            snapshot_mode: plan_ctx.snapshot_mode,
            commit_msg_hooks,
        };
        let summary = tokio::task::spawn_blocking(move || -> anyhow::Result<UpdateSummary> {
            let mut summary = UpdateSummary::default();
            for op in &operations {
                debug!(
                    kind = op.kind_name(),
                    project = %op.payload().project.name,
                    "running operation"
                );
                run_operation(&sync_ctx, op)?;
                summary.count(op);
            }
            Ok(summary)
        })
        .await??;

        if opts.run_hooks {
            run_hooks(&world.hooks, opts.hook_timeout, opts.verbose)
                .await
                .map_err(anyhow::Error::new)?;
        }

        let updated = full_scan(self.git.as_ref(), &self.config)?;
        snapshot::write_update_snapshot(&self.config, &updated)?;

        Ok(summary)
    }

    /// The parallel phase: cache refresh then local fetch in one task,
    /// the remote-HEAD batch in another. Returns the materialized
    /// tracking-branch tips.
    async fn fetch_phase(
        &self,
        locals: &BTreeMap<ProjectKey, LocalProject>,
        remotes: &BTreeMap<ProjectKey, Project>,
    ) -> anyhow::Result<HashMap<ProjectKey, String>> {
        let (err_tx, mut err_rx) = mpsc::unbounded_channel::<anyhow::Error>();
        let semaphore = Arc::new(Semaphore::new(self.config.jobs));

        // Cache directories, deduplicated by path so projects sharing
        // a mirror do not race.
        let mut cache_items: Vec<(PathBuf, String)> = Vec::new();
        if let Some(cache_root) = &self.config.cache {
            let mut seen = HashSet::new();
            for project in remotes.values() {
                let dir = cache_root.join(cache_dir_name(&project.remote));
                if seen.insert(dir.clone()) {
                    cache_items.push((dir, project.remote.clone()));
                }
            }
        }

        // Locals that still exist remotely get a fetch with prune.
        let fetch_dirs: Vec<PathBuf> = locals
            .iter()
            .filter(|(key, _)| remotes.contains_key(*key))
            .map(|(_, local)| local.project.path.clone())
            .collect();

        let refresh_task = self.refresh_task(cache_items, fetch_dirs, &semaphore, &err_tx);
        let heads_task = self.remote_heads_task(remotes, &err_tx);
        let ((), remote_heads) = tokio::join!(refresh_task, heads_task);

        drop(err_tx);
        let mut errors = MultiError::new();
        while let Ok(e) = err_rx.try_recv() {
            errors.push(e);
        }
        errors.into_result().map_err(anyhow::Error::new)?;
        Ok(remote_heads)
    }

    /// Pipeline 1 and 2: mirror cache refresh, then local fetches,
    /// each fanned out under the worker budget.
    async fn refresh_task(
        &self,
        cache_items: Vec<(PathBuf, String)>,
        fetch_dirs: Vec<PathBuf>,
        semaphore: &Arc<Semaphore>,
        err_tx: &mpsc::UnboundedSender<anyhow::Error>,
    ) {
        let mut join_set = JoinSet::new();
        for (dir, url) in cache_items {
            let git = self.git.clone();
            let err_tx = err_tx.clone();
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            join_set.spawn_blocking(move || {
                let _permit = permit;
                let result = if dir.exists() {
                    git.fetch(&dir, "origin", true)
                } else {
                    git.clone_mirror(&url, &dir)
                };
                if let Err(e) = result {
                    let _ = err_tx.send(anyhow::Error::new(e).context(format!(
                        "refreshing cache for {}",
                        crate::util::redact_userinfo(&url)
                    )));
                }
            });
        }
        while join_set.join_next().await.is_some() {}

        let mut join_set = JoinSet::new();
        for dir in fetch_dirs {
            let git = self.git.clone();
            let err_tx = err_tx.clone();
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            join_set.spawn_blocking(move || {
                let _permit = permit;
                if let Err(e) = git.fetch(&dir, "origin", true) {
                    let _ = err_tx.send(
                        anyhow::Error::new(e)
                            .context(format!("fetching {}", dir.display())),
                    );
                }
            });
        }
        while join_set.join_next().await.is_some() {}
    }

    /// Pipeline 3: group tip-tracking projects by host and query each
    /// host once per distinct branch set.
    async fn remote_heads_task(
        &self,
        remotes: &BTreeMap<ProjectKey, Project>,
        err_tx: &mpsc::UnboundedSender<anyhow::Error>,
    ) -> HashMap<ProjectKey, String> {
        struct Item {
            key: ProjectKey,
            repo: String,
            branch: String,
        }

        let mut by_host: BTreeMap<String, Vec<Item>> = BTreeMap::new();
        for project in remotes.values() {
            if !project.tracks_branch_tip() {
                continue;
            }
            let Some((host, repo)) = host_and_repo(&project.remote) else {
                continue;
            };
            if !self.index.supports(&host) {
                continue;
            }
            by_host.entry(host).or_default().push(Item {
                key: project.key(),
                repo,
                branch: project.remote_branch.clone(),
            });
        }

        let mut heads = HashMap::new();
        for (host, items) in by_host {
            let branches: Vec<String> = items
                .iter()
                .map(|item| item.branch.clone())
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();

            match self.index.get_repo_statuses(&host, &branches).await {
                Ok(statuses) => {
                    for item in items {
                        if let Some(revision) = statuses
                            .get(&item.repo)
                            .and_then(|status| status.branches.get(&item.branch))
                        {
                            heads.insert(item.key, revision.clone());
                        }
                    }
                }
                Err(e) => {
                    let _ = err_tx.send(
                        anyhow::Error::new(e)
                            .context(format!("querying repo statuses on {}", host)),
                    );
                }
            }
        }
        heads
    }

    /// Download the Gerrit commit-msg hook once per host referenced by
    /// the planned operations. Download failures are warnings; the
    /// update proceeds without the hook.
    async fn fetch_commit_msg_hooks(&self, operations: &[Operation]) -> HashMap<String, Vec<u8>> {
        let hosts: HashSet<String> = operations
            .iter()
            .filter(|op| !matches!(op, Operation::Delete { .. } | Operation::Null(_)))
            .map(|op| op.payload().project.gerrit_host.clone())
            .filter(|host| !host.is_empty())
            .collect();

        let mut hooks = HashMap::new();
        for host in hosts {
            let base = if host.contains("://") {
                host.trim_end_matches('/').to_string()
            } else {
                format!("https://{}", host)
            };
            let url = format!("{}/tools/hooks/commit-msg", base);
            match self.http.get(&url).await {
                Ok(bytes) => {
                    hooks.insert(host, bytes);
                }
                Err(e) => warn!("failed to download commit-msg hook from {}: {}", url, e),
            }
        }
        hooks
    }
}

/// Split a remote URL into `(host, repo name)` for the batched status
/// API. Remotes without a hostname (file paths, scp-style URLs) are
/// not batched.
fn host_and_repo(remote: &str) -> Option<(String, String)> {
    let parsed = url::Url::parse(remote).ok()?;
    let host = parsed.host_str()?.to_string();
    let repo = parsed
        .path()
        .trim_matches('/')
        .trim_end_matches(".git")
        .to_string();
    if repo.is_empty() {
        return None;
    }
    Some((host, repo))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_and_repo() {
        assert_eq!(
            host_and_repo("https://fuchsia.googlesource.com/build.git"),
            Some(("fuchsia.googlesource.com".to_string(), "build".to_string()))
        );
        assert_eq!(
            host_and_repo("https://example.com/nested/project"),
            Some(("example.com".to_string(), "nested/project".to_string()))
        );
        assert_eq!(host_and_repo("file:///tmp/repo"), None);
        assert_eq!(host_and_repo("not a url"), None);
    }

    #[test]
    fn test_summary_counts() {
        use crate::core::planner::OpPayload;
        let payload = OpPayload {
            project: Project::default(),
            source: PathBuf::new(),
            destination: PathBuf::new(),
        };
        let mut summary = UpdateSummary::default();
        summary.count(&Operation::Create(payload.clone()));
        summary.count(&Operation::Null(payload.clone()));
        summary.count(&Operation::Update(payload));
        assert_eq!(summary.created, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.updated, 1);
    }
}
