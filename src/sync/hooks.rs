//! Post-update hook execution.
//!
//! Hooks run in parallel, one task per hook, each under a timeout
//! (default 5 minutes). Output is captured to temp files: stderr is
//! always shown on failure, stdout only when verbose. A timeout counts
//! as a failure and still prints the partial output.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;

use crate::cli::output::Output;
use crate::core::project::{Hook, HookKey};
use crate::util::MultiError;

/// Default per-hook deadline.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Outcome of one hook run.
#[derive(Debug)]
pub struct HookResult {
    pub name: String,
    pub success: bool,
    pub timed_out: bool,
    pub duration: Duration,
}

/// Run every hook concurrently; failures and timeouts accumulate into
/// a [`MultiError`].
pub async fn run_hooks(
    hooks: &BTreeMap<HookKey, Hook>,
    timeout: Duration,
    verbose: bool,
) -> Result<Vec<HookResult>, MultiError> {
    if hooks.is_empty() {
        return Ok(Vec::new());
    }

    let mut join_set: JoinSet<(HookResult, Option<anyhow::Error>)> = JoinSet::new();
    for hook in hooks.values() {
        let hook = hook.clone();
        join_set.spawn(async move { run_hook(hook, timeout, verbose).await });
    }

    let mut results = Vec::new();
    let mut errors = MultiError::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((result, error)) => {
                if let Some(error) = error {
                    errors.push(error);
                }
                results.push(result);
            }
            Err(e) => errors.push(anyhow::anyhow!("hook task panicked: {}", e)),
        }
    }

    errors.into_result()?;
    Ok(results)
}

async fn run_hook(
    hook: Hook,
    timeout: Duration,
    verbose: bool,
) -> (HookResult, Option<anyhow::Error>) {
    let name = hook.name.clone();
    let start = Instant::now();
    let fail = |timed_out: bool, duration: Duration, error: anyhow::Error| {
        (
            HookResult {
                name: name.clone(),
                success: false,
                timed_out,
                duration,
            },
            Some(error),
        )
    };

    let stdout_file = match tempfile::NamedTempFile::new() {
        Ok(f) => f,
        Err(e) => return fail(false, start.elapsed(), e.into()),
    };
    let stderr_file = match tempfile::NamedTempFile::new() {
        Ok(f) => f,
        Err(e) => return fail(false, start.elapsed(), e.into()),
    };

    let command_path = hook.command_path();
    let mut command = tokio::process::Command::new(&command_path);
    command
        .current_dir(&hook.action_path)
        .stdin(Stdio::null())
        .stdout(match stdout_file.as_file().try_clone() {
            Ok(f) => Stdio::from(f),
            Err(e) => return fail(false, start.elapsed(), e.into()),
        })
        .stderr(match stderr_file.as_file().try_clone() {
            Ok(f) => Stdio::from(f),
            Err(e) => return fail(false, start.elapsed(), e.into()),
        });

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return fail(
                false,
                start.elapsed(),
                anyhow::anyhow!("hook '{}' failed to start '{}': {}", name, command_path.display(), e),
            )
        }
    };

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => {
            if verbose {
                show_output(&name, "stdout", stdout_file.path());
            }
            (
                HookResult {
                    name: name.clone(),
                    success: true,
                    timed_out: false,
                    duration: start.elapsed(),
                },
                None,
            )
        }
        Ok(Ok(status)) => {
            show_output(&name, "stderr", stderr_file.path());
            if verbose {
                show_output(&name, "stdout", stdout_file.path());
            }
            fail(
                false,
                start.elapsed(),
                anyhow::anyhow!("hook '{}' exited with {}", name, status),
            )
        }
        Ok(Err(e)) => fail(false, start.elapsed(), e.into()),
        Err(_) => {
            let _ = child.kill().await;
            show_output(&name, "stderr", stderr_file.path());
            show_output(&name, "stdout", stdout_file.path());
            fail(
                true,
                start.elapsed(),
                anyhow::anyhow!("hook '{}' timed out after {:?}", name, timeout),
            )
        }
    }
}

fn show_output(name: &str, stream: &str, path: &std::path::Path) {
    match std::fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => {
            Output::subheader(&format!("{} {}:", name, stream));
            for line in content.lines() {
                println!("    {}", line);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn executable_hook(dir: &std::path::Path, name: &str, script: &str) -> Hook {
        let script_name = format!("{}.sh", name);
        let script_path = dir.join(&script_name);
        std::fs::write(&script_path, script).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755))
                .unwrap();
        }
        Hook {
            name: name.to_string(),
            action: script_name,
            project_name: "app".to_string(),
            action_path: dir.to_path_buf(),
        }
    }

    fn hook_map(hooks: Vec<Hook>) -> BTreeMap<HookKey, Hook> {
        hooks.into_iter().map(|h| (h.key(), h)).collect()
    }

    #[tokio::test]
    async fn test_successful_hooks_run_in_parallel() {
        let temp = TempDir::new().unwrap();
        let hooks = hook_map(vec![
            executable_hook(temp.path(), "one", "#!/bin/sh\nexit 0\n"),
            executable_hook(temp.path(), "two", "#!/bin/sh\nexit 0\n"),
        ]);

        let results = run_hooks(&hooks, DEFAULT_HOOK_TIMEOUT, false).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn test_failing_hook_aggregates_error() {
        let temp = TempDir::new().unwrap();
        let hooks = hook_map(vec![
            executable_hook(temp.path(), "ok", "#!/bin/sh\nexit 0\n"),
            executable_hook(temp.path(), "bad", "#!/bin/sh\necho boom >&2\nexit 3\n"),
        ]);

        let err = run_hooks(&hooks, DEFAULT_HOOK_TIMEOUT, false)
            .await
            .unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(err.to_string().contains("bad"));
    }

    #[tokio::test]
    async fn test_timeout_is_a_failure() {
        let temp = TempDir::new().unwrap();
        let hooks = hook_map(vec![executable_hook(
            temp.path(),
            "slow",
            "#!/bin/sh\nsleep 10\n",
        )]);

        let err = run_hooks(&hooks, Duration::from_millis(200), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_executable_fails() {
        let hooks = hook_map(vec![Hook {
            name: "ghost".to_string(),
            action: "does-not-exist.sh".to_string(),
            project_name: "app".to_string(),
            action_path: PathBuf::from("/nonexistent"),
        }]);

        let err = run_hooks(&hooks, DEFAULT_HOOK_TIMEOUT, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
