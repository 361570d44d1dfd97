//! Update command implementation

use std::sync::Arc;

use crate::cli::output::Output;
use crate::core::config::Config;
use crate::git::Git;
use crate::remote::HttpClient;
use crate::sync::{Engine, UpdateOptions};

/// Run one reconciliation of the workspace against its manifest.
pub async fn run_update(config: Config, opts: UpdateOptions) -> anyhow::Result<()> {
    Output::header(&format!(
        "Updating workspace at {} ({} jobs)",
        config.root.display(),
        config.jobs
    ));

    let http = Arc::new(HttpClient::new());
    let engine = Engine::new(Arc::new(Git::new()), http.clone(), http, config);

    let spinner = Output::spinner("Reconciling projects...");
    let result = engine.update_universe(&opts).await;
    spinner.finish_and_clear();
    let summary = result?;

    let mut parts = Vec::new();
    for (count, what) in [
        (summary.created, "created"),
        (summary.moved, "moved"),
        (summary.updated, "updated"),
        (summary.deleted, "deleted"),
        (summary.unchanged, "unchanged"),
    ] {
        if count > 0 {
            parts.push(format!("{} {}", count, what));
        }
    }
    if parts.is_empty() {
        Output::success("Workspace is empty and the manifest declares no projects.");
    } else {
        Output::success(&format!("Update complete: {}.", parts.join(", ")));
    }
    Ok(())
}
