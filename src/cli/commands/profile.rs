//! Profile command implementation

use std::path::PathBuf;

use crate::cli::output::{Output, Table};
use crate::core::config::Config;
use crate::core::profiles::{format_date, ProfileDb};

/// Location of the profile manifest within the workspace.
pub fn profiles_db_path(config: &Config) -> PathBuf {
    config.root_meta_dir().join("profiles.xml")
}

/// List installed profiles and their targets.
pub fn run_profile_list(config: &Config) -> anyhow::Result<()> {
    let db = ProfileDb::open(&profiles_db_path(config))?;
    let names = db.names();
    if names.is_empty() {
        Output::info("No profiles installed.");
        return Ok(());
    }

    for name in names {
        let Some(profile) = db.lookup(&name) else {
            continue;
        };
        Output::header(&Output::project_name(&profile.name));
        if !profile.root.is_empty() {
            Output::kv("root", &profile.root);
        }

        let mut table = Table::new(vec!["Tag", "Arch", "OS", "Version", "Updated"]);
        for target in &profile.targets {
            table.add_row(vec![
                &target.tag,
                &target.arch,
                &target.os,
                &target.version,
                &format_date(&target.date),
            ]);
        }
        table.print();
    }
    Ok(())
}

/// Remove one target, dropping the profile when it was the last.
pub fn run_profile_uninstall(config: &Config, profile: &str, tag: &str) -> anyhow::Result<()> {
    let db = ProfileDb::open(&profiles_db_path(config))?;
    db.remove_target(profile, tag)?;
    match db.lookup(profile) {
        Some(_) => Output::success(&format!("Removed target '{}' from '{}'.", tag, profile)),
        None => Output::success(&format!(
            "Removed target '{}'; profile '{}' had no targets left and was dropped.",
            tag, profile
        )),
    }
    Ok(())
}
