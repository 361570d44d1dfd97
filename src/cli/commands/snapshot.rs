//! Snapshot command implementation

use std::path::Path;

use crate::cli::output::Output;
use crate::core::config::Config;
use crate::core::scanner::scan_workspace;
use crate::core::snapshot::write_snapshot_file;
use crate::git::Git;

/// Serialize the current state of every project to `file`.
pub fn run_snapshot(config: &Config, file: &Path) -> anyhow::Result<()> {
    let git = Git::new();
    let locals = scan_workspace(&git, config)?;
    write_snapshot_file(&config.root, file, &locals)?;
    Output::success(&format!(
        "Captured {} project(s) in {}",
        locals.len(),
        file.display()
    ));
    Ok(())
}
