//! Manifest command implementation
//!
//! Prints the resolved (flattened) manifest: all imports followed,
//! paths left workspace-relative, defaults unfilled.

use std::collections::BTreeMap;

use crate::core::config::Config;
use crate::core::loader::Loader;
use crate::core::manifest::Manifest;
use crate::core::scanner::scan_workspace;
use crate::git::Git;

/// Resolve the manifest tree and print it as one flat document.
pub fn run_manifest(config: &Config) -> anyhow::Result<()> {
    let git = Git::new();
    let locals = scan_workspace(&git, config)?;
    let known: BTreeMap<_, _> = locals
        .iter()
        .map(|(key, local)| (key.clone(), local.project.clone()))
        .collect();

    // Read manifests as they are checked out; printing must not touch
    // git state.
    let world = Loader::new(&git, &config.root, known, false, true).load(&config.manifest_file)?;

    let mut flat = Manifest::default();
    for mut project in world.projects.into_values() {
        if let Ok(relative) = project.path.strip_prefix(&config.root) {
            project.path = relative.to_path_buf();
        }
        flat.projects.push(project);
    }
    flat.hooks = world.hooks.into_values().collect();

    print!("{}", flat.to_xml()?);
    Ok(())
}
