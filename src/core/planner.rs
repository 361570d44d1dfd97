//! Operation planning.
//!
//! For every key in the union of the local and manifest project sets,
//! the decision table below picks one of five operations. Operations
//! then sort into a safe execution order and are tested against the
//! filesystem before anything runs.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use thiserror::Error;

use crate::core::project::{Project, ProjectKey};
use crate::core::scanner::LocalProject;

/// Precondition failures caught before execution
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("cannot create '{0}': destination already exists")]
    DestinationExists(PathBuf),

    #[error("cannot {1} '{0}': source does not exist")]
    SourceMissing(PathBuf, &'static str),
}

/// Payload shared by every operation variant.
#[derive(Debug, Clone)]
pub struct OpPayload {
    /// Manifest-side project for create/move/update/null; the local
    /// record for delete.
    pub project: Project,
    /// Current on-disk location, empty for create.
    pub source: PathBuf,
    /// Location the manifest wants, empty for delete.
    pub destination: PathBuf,
}

/// One planned reconciliation step.
#[derive(Debug, Clone)]
pub enum Operation {
    Delete { common: OpPayload, gc: bool },
    Move(OpPayload),
    Create(OpPayload),
    Update(OpPayload),
    Null(OpPayload),
}

impl Operation {
    pub fn payload(&self) -> &OpPayload {
        match self {
            Operation::Delete { common, .. } => common,
            Operation::Move(common)
            | Operation::Create(common)
            | Operation::Update(common)
            | Operation::Null(common) => common,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Operation::Delete { .. } => "delete",
            Operation::Move(_) => "move",
            Operation::Create(_) => "create",
            Operation::Update(_) => "update",
            Operation::Null(_) => "null",
        }
    }

    /// Execution-order rank: deletions free paths before moves use
    /// them, moves reseat directories before creates pick
    /// destinations, nested creates execute outer-first via the path
    /// tie-break.
    fn order(&self) -> u8 {
        match self {
            Operation::Delete { .. } => 0,
            Operation::Move(_) => 1,
            Operation::Create(_) => 2,
            Operation::Update(_) => 3,
            Operation::Null(_) => 4,
        }
    }

    /// Check preconditions against the filesystem, tracking directories
    /// that earlier operations will have freed so a delete followed by
    /// a create at the same path passes.
    pub fn test(&self, deleted: &mut HashSet<PathBuf>) -> Result<(), PlanError> {
        match self {
            Operation::Delete { common, .. } => {
                if !common.source.exists() {
                    return Err(PlanError::SourceMissing(common.source.clone(), "delete"));
                }
                deleted.insert(common.source.clone());
                Ok(())
            }
            Operation::Move(common) => {
                if !common.source.exists() {
                    return Err(PlanError::SourceMissing(common.source.clone(), "move"));
                }
                if common.destination.exists() && !deleted.contains(&common.destination) {
                    return Err(PlanError::DestinationExists(common.destination.clone()));
                }
                deleted.insert(common.source.clone());
                deleted.remove(&common.destination);
                Ok(())
            }
            Operation::Create(common) => {
                if common.destination.exists() && !deleted.contains(&common.destination) {
                    return Err(PlanError::DestinationExists(common.destination.clone()));
                }
                deleted.remove(&common.destination);
                Ok(())
            }
            Operation::Update(_) | Operation::Null(_) => Ok(()),
        }
    }
}

/// Inputs the decision table needs beyond the two project sets.
#[derive(Debug, Default)]
pub struct PlanContext {
    /// Updating from a snapshot: pinned revisions are authoritative.
    pub snapshot_mode: bool,
    /// Delete projects absent from the manifest.
    pub gc: bool,
    /// Materialized tracking-branch tips from the batched remote-HEAD
    /// query, keyed by project.
    pub remote_heads: HashMap<ProjectKey, String>,
}

/// Compute one operation per key in the union of both sets and sort
/// them into execution order.
pub fn plan_operations(
    locals: &BTreeMap<ProjectKey, LocalProject>,
    remotes: &BTreeMap<ProjectKey, Project>,
    ctx: &PlanContext,
) -> Vec<Operation> {
    let mut operations = Vec::new();

    let keys: BTreeSet<&ProjectKey> = locals.keys().chain(remotes.keys()).collect();

    for key in keys {
        let op = match (locals.get(key), remotes.get(key)) {
            (None, Some(remote)) => Operation::Create(OpPayload {
                project: remote.clone(),
                source: PathBuf::new(),
                destination: remote.path.clone(),
            }),
            (Some(local), None) => Operation::Delete {
                common: OpPayload {
                    project: local.project.clone(),
                    source: local.project.path.clone(),
                    destination: PathBuf::new(),
                },
                gc: ctx.gc,
            },
            (Some(local), Some(remote)) => classify(local, remote, ctx),
            (None, None) => unreachable!("key came from one of the maps"),
        };
        operations.push(op);
    }

    operations.sort_by(|a, b| {
        a.order()
            .cmp(&b.order())
            .then_with(|| a.payload().project.path.cmp(&b.payload().project.path))
    });
    operations
}

/// Decision table for keys present on both sides.
fn classify(local: &LocalProject, remote: &Project, ctx: &PlanContext) -> Operation {
    let common = OpPayload {
        project: remote.clone(),
        source: local.project.path.clone(),
        destination: remote.path.clone(),
    };

    if local.project.path != remote.path {
        return Operation::Move(common);
    }
    if ctx.snapshot_mode && local.current_revision != remote.revision {
        return Operation::Update(common);
    }
    if !local.on_branch && local.current_revision == remote.revision {
        return Operation::Null(common);
    }
    if ctx.remote_heads.get(&remote.key()) == Some(&local.current_revision) {
        return Operation::Null(common);
    }
    Operation::Update(common)
}

/// Test every operation in order before any of them runs.
pub fn test_operations(operations: &[Operation]) -> Result<(), PlanError> {
    let mut deleted = HashSet::new();
    for op in operations {
        op.test(&mut deleted)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const REV: &str = "4444444444444444444444444444444444444444";
    const OTHER_REV: &str = "5555555555555555555555555555555555555555";

    fn remote(name: &str, path: &str) -> Project {
        Project {
            name: name.to_string(),
            path: PathBuf::from(path),
            remote: format!("https://example.com/{}", name),
            remote_branch: "master".to_string(),
            revision: "HEAD".to_string(),
            ..Default::default()
        }
    }

    fn local(name: &str, path: &str, revision: &str, on_branch: bool) -> LocalProject {
        LocalProject {
            project: remote(name, path),
            current_revision: revision.to_string(),
            on_branch,
        }
    }

    fn to_map<T, F: Fn(&T) -> ProjectKey>(items: Vec<T>, key: F) -> BTreeMap<ProjectKey, T> {
        items.into_iter().map(|item| (key(&item), item)).collect()
    }

    #[test]
    fn test_remote_only_is_create() {
        let ops = plan_operations(
            &BTreeMap::new(),
            &to_map(vec![remote("app", "/w/app")], Project::key),
            &PlanContext::default(),
        );
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind_name(), "create");
        assert_eq!(ops[0].payload().destination, PathBuf::from("/w/app"));
    }

    #[test]
    fn test_local_only_is_delete_with_gc_flag() {
        let ops = plan_operations(
            &to_map(vec![local("app", "/w/app", REV, false)], LocalProject::key),
            &BTreeMap::new(),
            &PlanContext {
                gc: true,
                ..Default::default()
            },
        );
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], Operation::Delete { gc: true, .. }));
    }

    #[test]
    fn test_path_change_is_move() {
        let ops = plan_operations(
            &to_map(vec![local("app", "/w/old", REV, false)], LocalProject::key),
            &to_map(vec![remote("app", "/w/new")], Project::key),
            &PlanContext::default(),
        );
        assert_eq!(ops[0].kind_name(), "move");
        assert_eq!(ops[0].payload().source, PathBuf::from("/w/old"));
        assert_eq!(ops[0].payload().destination, PathBuf::from("/w/new"));
    }

    #[test]
    fn test_snapshot_revision_drift_is_update() {
        let mut pinned = remote("app", "/w/app");
        pinned.revision = OTHER_REV.to_string();
        let ops = plan_operations(
            &to_map(vec![local("app", "/w/app", REV, false)], LocalProject::key),
            &to_map(vec![pinned], Project::key),
            &PlanContext {
                snapshot_mode: true,
                ..Default::default()
            },
        );
        assert_eq!(ops[0].kind_name(), "update");
    }

    #[test]
    fn test_detached_at_pinned_revision_is_null() {
        let mut pinned = remote("app", "/w/app");
        pinned.revision = REV.to_string();
        let ops = plan_operations(
            &to_map(vec![local("app", "/w/app", REV, false)], LocalProject::key),
            &to_map(vec![pinned], Project::key),
            &PlanContext::default(),
        );
        assert_eq!(ops[0].kind_name(), "null");
    }

    #[test]
    fn test_tracking_tip_equal_is_null() {
        let remote_project = remote("app", "/w/app");
        let mut remote_heads = HashMap::new();
        remote_heads.insert(remote_project.key(), REV.to_string());

        let ops = plan_operations(
            &to_map(vec![local("app", "/w/app", REV, true)], LocalProject::key),
            &to_map(vec![remote_project], Project::key),
            &PlanContext {
                remote_heads,
                ..Default::default()
            },
        );
        assert_eq!(ops[0].kind_name(), "null");
    }

    #[test]
    fn test_everything_else_is_update() {
        let ops = plan_operations(
            &to_map(vec![local("app", "/w/app", REV, true)], LocalProject::key),
            &to_map(vec![remote("app", "/w/app")], Project::key),
            &PlanContext::default(),
        );
        assert_eq!(ops[0].kind_name(), "update");
    }

    #[test]
    fn test_operations_sort_by_kind_then_path() {
        let locals = to_map(
            vec![
                local("gone", "/w/zz-gone", REV, false),
                local("moved", "/w/moved-old", REV, false),
                local("same", "/w/same", REV, true),
            ],
            LocalProject::key,
        );
        let remotes = to_map(
            vec![
                remote("moved", "/w/moved-new"),
                remote("same", "/w/same"),
                remote("new-outer", "/w/new"),
                remote("new-inner", "/w/new/inner"),
            ],
            Project::key,
        );

        let ops = plan_operations(&locals, &remotes, &PlanContext::default());
        let kinds: Vec<_> = ops.iter().map(Operation::kind_name).collect();
        assert_eq!(kinds, vec!["delete", "move", "create", "create", "update"]);

        // Nested create comes after its parent.
        assert_eq!(ops[2].payload().destination, PathBuf::from("/w/new"));
        assert_eq!(ops[3].payload().destination, PathBuf::from("/w/new/inner"));
    }

    #[test]
    fn test_delete_then_create_at_same_path_passes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("proj");
        std::fs::create_dir(&path).unwrap();

        let delete = Operation::Delete {
            common: OpPayload {
                project: remote("old", path.to_str().unwrap()),
                source: path.clone(),
                destination: PathBuf::new(),
            },
            gc: true,
        };
        let create = Operation::Create(OpPayload {
            project: remote("new", path.to_str().unwrap()),
            source: PathBuf::new(),
            destination: path.clone(),
        });

        test_operations(&[delete, create]).unwrap();
    }

    #[test]
    fn test_create_into_existing_directory_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("proj");
        std::fs::create_dir(&path).unwrap();

        let create = Operation::Create(OpPayload {
            project: remote("new", path.to_str().unwrap()),
            source: PathBuf::new(),
            destination: path,
        });
        assert!(matches!(
            test_operations(&[create]),
            Err(PlanError::DestinationExists(_))
        ));
    }

    #[test]
    fn test_move_with_missing_source_fails() {
        let temp = TempDir::new().unwrap();
        let mv = Operation::Move(OpPayload {
            project: remote("app", "/w/app"),
            source: temp.path().join("missing"),
            destination: temp.path().join("dest"),
        });
        assert!(matches!(
            test_operations(&[mv]),
            Err(PlanError::SourceMissing(_, "move"))
        ));
    }
}
