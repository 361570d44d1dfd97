//! Rename detection between local and manifest project sets.
//!
//! A project renamed upstream no longer matches any local by key, but
//! its checkout is still on disk at the same path with the same remote.
//! Rewriting the local's key to the manifest's collapses the rename
//! into a single update instead of a delete plus a fresh clone.

use std::collections::BTreeMap;

use crate::core::project::{Project, ProjectKey};
use crate::core::scanner::LocalProject;
use tracing::debug;

/// For each local not matched by key, look for exactly one unmatched
/// manifest project with the same `(remote, path)` and move the local
/// under that key.
pub fn detect_renames(
    locals: &mut BTreeMap<ProjectKey, LocalProject>,
    remotes: &BTreeMap<ProjectKey, Project>,
) {
    let unmatched: Vec<ProjectKey> = locals
        .keys()
        .filter(|key| !remotes.contains_key(key))
        .cloned()
        .collect();

    for key in unmatched {
        let (remote_url, path) = {
            let local = &locals[&key];
            (local.project.remote.clone(), local.project.path.clone())
        };

        let mut candidates = remotes.values().filter(|candidate| {
            !locals.contains_key(&candidate.key())
                && candidate.remote == remote_url
                && candidate.path == path
        });

        let Some(candidate) = candidates.next() else {
            continue;
        };
        if candidates.next().is_some() {
            // Ambiguous: more than one manifest entry claims this
            // checkout. Leave the local alone and let the planner
            // produce delete + create.
            continue;
        }

        debug!(from = %key, to = %candidate.key(), "rename detected");
        let mut local = locals.remove(&key).expect("key listed from this map");
        local.project.name = candidate.name.clone();
        local.project.remote = candidate.remote.clone();
        locals.insert(local.key(), local);
    }
}
