//! jiri CLI entry point

use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

use jiri::core::config::Config;
use jiri::sync::UpdateOptions;

#[derive(Parser)]
#[command(name = "jiri")]
#[command(author, version, about = "Multi-repo workspace manager", long_about = None)]
struct Cli {
    /// Worker budget for parallel operations
    #[arg(short = 'j', long, global = true, env = "JIRI_JOBS")]
    jobs: Option<usize>,

    /// Workspace root (discovered from the current directory by default)
    #[arg(long, global = true, env = "JIRI_ROOT")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Update the workspace to match the manifest
    Update {
        /// Delete projects no longer in the manifest
        #[arg(long)]
        gc: bool,
        /// Read manifests as checked out locally, without fetching
        #[arg(long)]
        local_manifest: bool,
        /// Rebase branches that do not track a remote
        #[arg(long)]
        rebase_untracked: bool,
        /// Skip post-update hooks
        #[arg(long)]
        no_hooks: bool,
        /// Per-hook timeout in minutes
        #[arg(long, default_value_t = 5)]
        hook_timeout: u64,
        /// Show hook stdout and extra progress
        #[arg(short, long)]
        verbose: bool,
        /// Update to a snapshot file instead of the root manifest
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// Bare-mirror cache directory
        #[arg(long, env = "JIRI_CACHE")]
        cache: Option<PathBuf>,
        /// Root manifest file
        #[arg(long, env = "JIRI_MANIFEST")]
        manifest: Option<PathBuf>,
    },
    /// Write a snapshot of every project's current revision
    Snapshot {
        /// Output file
        file: PathBuf,
    },
    /// Print the resolved manifest
    Manifest {
        /// Root manifest file
        #[arg(long, env = "JIRI_MANIFEST")]
        manifest: Option<PathBuf>,
    },
    /// Inspect installed profiles
    Profile {
        #[command(subcommand)]
        action: ProfileCommands,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// List installed profiles and targets
    List,
    /// Remove a target (and the profile when it was the last one)
    Uninstall {
        /// Profile name
        profile: String,
        /// Target tag
        #[arg(short, long)]
        target: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Update {
            gc,
            local_manifest,
            rebase_untracked,
            no_hooks,
            hook_timeout,
            verbose,
            snapshot,
            cache,
            manifest,
        } => {
            let mut config = load_config(cli.root.as_deref(), cli.jobs)?.with_cache(cache);
            if let Some(manifest) = manifest {
                config = config.with_manifest_file(manifest);
            }
            let opts = UpdateOptions {
                gc,
                local_manifest,
                rebase_untracked,
                run_hooks: !no_hooks,
                hook_timeout: Duration::from_secs(hook_timeout * 60),
                verbose,
                snapshot_file: snapshot,
            };
            jiri::cli::commands::update::run_update(config, opts).await?;
        }
        Commands::Snapshot { file } => {
            let config = load_config(cli.root.as_deref(), cli.jobs)?;
            jiri::cli::commands::snapshot::run_snapshot(&config, &file)?;
        }
        Commands::Manifest { manifest } => {
            let mut config = load_config(cli.root.as_deref(), cli.jobs)?;
            if let Some(manifest) = manifest {
                config = config.with_manifest_file(manifest);
            }
            jiri::cli::commands::manifest::run_manifest(&config)?;
        }
        Commands::Profile { action } => {
            let config = load_config(cli.root.as_deref(), cli.jobs)?;
            match action {
                ProfileCommands::List => {
                    jiri::cli::commands::profile::run_profile_list(&config)?;
                }
                ProfileCommands::Uninstall { profile, target } => {
                    jiri::cli::commands::profile::run_profile_uninstall(
                        &config, &profile, &target,
                    )?;
                }
            }
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "jiri", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Resolve the workspace configuration for commands that need one.
fn load_config(root: Option<&std::path::Path>, jobs: Option<usize>) -> anyhow::Result<Config> {
    let config = match root {
        Some(root) => Config::new(root.to_path_buf()),
        None => Config::discover(&std::env::current_dir()?)?,
    };
    Ok(match jobs {
        Some(jobs) => config.with_jobs(jobs),
        None => config,
    })
}
