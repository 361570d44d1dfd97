//! Profile database.
//!
//! Profiles are named software suites, each holding installation
//! targets keyed by tag. The database is a separate XML manifest with
//! read/write-through persistence; every public operation holds one
//! mutex for its duration, so concurrency is coarse and
//! correctness-first.

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::de::from_str;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use crate::util::safe_write_keep_prev;

/// Errors from profile database operations
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse profiles XML: {0}")]
    Xml(String),

    #[error("failed to serialize profiles: {0}")]
    Serialize(String),

    #[error("profile '{0}' is not installed")]
    UnknownProfile(String),

    #[error("profile '{profile}' has no target '{tag}'")]
    UnknownTarget { profile: String, tag: String },

    #[error("profile '{profile}' already has a target tagged '{tag}'")]
    DuplicateTarget { profile: String, tag: String },
}

/// Environment variables a target contributes, as `KEY=VALUE` strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EnvVars {
    #[serde(rename = "var", default, skip_serializing_if = "Vec::is_empty")]
    pub vars: Vec<String>,
}

impl EnvVars {
    fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// One installation variant of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(rename = "@tag")]
    pub tag: String,

    #[serde(rename = "@arch", default, skip_serializing_if = "String::is_empty")]
    pub arch: String,

    #[serde(rename = "@os", default, skip_serializing_if = "String::is_empty")]
    pub os: String,

    #[serde(
        rename = "@installation-directory",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub installation_directory: String,

    #[serde(rename = "@version", default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// RFC3339 timestamp of the last install or update.
    #[serde(rename = "@date")]
    pub date: DateTime<Utc>,

    #[serde(rename = "envvars", default, skip_serializing_if = "EnvVars::is_empty")]
    pub env: EnvVars,
}

impl Target {
    pub fn new(tag: &str, arch: &str, os: &str) -> Self {
        Self {
            tag: tag.to_string(),
            arch: arch.to_string(),
            os: os.to_string(),
            installation_directory: String::new(),
            version: String::new(),
            date: Utc::now(),
            env: EnvVars::default(),
        }
    }
}

/// A named software suite with its installed targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Profile {
    #[serde(rename = "@name")]
    pub name: String,

    #[serde(rename = "@root", default, skip_serializing_if = "String::is_empty")]
    pub root: String,

    #[serde(rename = "target", default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<Target>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename = "profiles")]
struct ProfilesXml {
    #[serde(rename = "profile", default, skip_serializing_if = "Vec::is_empty")]
    profiles: Vec<Profile>,
}

/// Mutex-guarded profile store persisted to one XML file.
pub struct ProfileDb {
    path: PathBuf,
    inner: Mutex<BTreeMap<String, Profile>>,
}

impl ProfileDb {
    /// Open the database at `path`; a missing file is an empty
    /// database.
    pub fn open(path: &Path) -> Result<Self, ProfileError> {
        let profiles = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let doc: ProfilesXml =
                from_str(&content).map_err(|e| ProfileError::Xml(e.to_string()))?;
            doc.profiles
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect()
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(profiles),
        })
    }

    /// Install a profile; installing an existing name is a no-op.
    pub fn install_profile(&self, name: &str, root: &str) -> Result<(), ProfileError> {
        let mut profiles = self.inner.lock().expect("mutex poisoned");
        if !profiles.contains_key(name) {
            profiles.insert(
                name.to_string(),
                Profile {
                    name: name.to_string(),
                    root: root.to_string(),
                    targets: Vec::new(),
                },
            );
            self.persist(&profiles)?;
        }
        Ok(())
    }

    /// Add a target to an installed profile. A duplicate tag is
    /// rejected with no mutation observed.
    pub fn add_target(&self, profile_name: &str, target: Target) -> Result<(), ProfileError> {
        let mut profiles = self.inner.lock().expect("mutex poisoned");
        let profile = profiles
            .get_mut(profile_name)
            .ok_or_else(|| ProfileError::UnknownProfile(profile_name.to_string()))?;
        if profile.targets.iter().any(|t| t.tag == target.tag) {
            return Err(ProfileError::DuplicateTarget {
                profile: profile_name.to_string(),
                tag: target.tag,
            });
        }
        profile.targets.push(target);
        self.persist(&profiles)
    }

    /// Refresh a target's version and timestamp.
    pub fn update_target(
        &self,
        profile_name: &str,
        tag: &str,
        version: &str,
    ) -> Result<(), ProfileError> {
        let mut profiles = self.inner.lock().expect("mutex poisoned");
        let profile = profiles
            .get_mut(profile_name)
            .ok_or_else(|| ProfileError::UnknownProfile(profile_name.to_string()))?;
        let target = profile
            .targets
            .iter_mut()
            .find(|t| t.tag == tag)
            .ok_or_else(|| ProfileError::UnknownTarget {
                profile: profile_name.to_string(),
                tag: tag.to_string(),
            })?;
        target.version = version.to_string();
        target.date = Utc::now();
        self.persist(&profiles)
    }

    /// Remove a target; removing the last target removes the profile.
    pub fn remove_target(&self, profile_name: &str, tag: &str) -> Result<(), ProfileError> {
        let mut profiles = self.inner.lock().expect("mutex poisoned");
        let profile = profiles
            .get_mut(profile_name)
            .ok_or_else(|| ProfileError::UnknownProfile(profile_name.to_string()))?;
        let before = profile.targets.len();
        profile.targets.retain(|t| t.tag != tag);
        if profile.targets.len() == before {
            return Err(ProfileError::UnknownTarget {
                profile: profile_name.to_string(),
                tag: tag.to_string(),
            });
        }
        if profile.targets.is_empty() {
            profiles.remove(profile_name);
        }
        self.persist(&profiles)
    }

    pub fn lookup(&self, name: &str) -> Option<Profile> {
        self.inner.lock().expect("mutex poisoned").get(name).cloned()
    }

    /// Look up one target by `(profile name, tag)`.
    pub fn lookup_target(&self, name: &str, tag: &str) -> Option<Target> {
        self.lookup(name)?
            .targets
            .into_iter()
            .find(|t| t.tag == tag)
    }

    /// Installed profile names in lexicographic order.
    pub fn names(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("mutex poisoned")
            .keys()
            .cloned()
            .collect()
    }

    fn persist(&self, profiles: &BTreeMap<String, Profile>) -> Result<(), ProfileError> {
        let doc = ProfilesXml {
            profiles: profiles.values().cloned().collect(),
        };

        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let mut serializer = quick_xml::se::Serializer::new(&mut out);
        serializer.indent(' ', 2);
        doc.serialize(serializer)
            .map_err(|e| ProfileError::Serialize(e.to_string()))?;
        if !out.ends_with('\n') {
            out.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        safe_write_keep_prev(&self.path, out.as_bytes())?;
        Ok(())
    }
}

/// Serialize a timestamp the way the profile manifest stores it.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}
