//! Manifest model and XML codec.
//!
//! A manifest lists imports of other manifests, projects, and hooks.
//! Defaults are filled on read (`remotebranch` becomes `master`,
//! `revision` becomes `HEAD`) and unfilled on write so the serialized
//! form stays minimal: empty attributes are omitted, empty container
//! elements are elided, and empty elements are self-closing.

use quick_xml::de::from_str;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::core::project::{Hook, Project, ProjectError, DEFAULT_REMOTE_BRANCH};
use crate::util::safe_write;

/// Errors from reading or writing manifests
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest XML: {0}")]
    Xml(String),

    #[error("failed to serialize manifest: {0}")]
    Serialize(String),

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error("import is missing required attribute '{0}'")]
    ImportMissingAttribute(&'static str),
}

/// A reference to a manifest hosted inside another repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Import {
    /// Manifest file path relative to the hosting repository root.
    #[serde(rename = "@manifest", default, skip_serializing_if = "String::is_empty")]
    pub manifest: String,

    #[serde(rename = "@name", default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(rename = "@remote", default, skip_serializing_if = "String::is_empty")]
    pub remote: String,

    #[serde(
        rename = "@remotebranch",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub remote_branch: String,

    /// Prefix applied to the names and paths of everything the imported
    /// manifest declares.
    #[serde(rename = "@root", default, skip_serializing_if = "String::is_empty")]
    pub root: String,
}

impl Import {
    /// Key used for remote-import cycle detection.
    pub fn cycle_key(&self) -> String {
        format!("{} + {}", self.remote, self.manifest)
    }

    pub fn fill_defaults(&mut self) {
        if self.remote_branch.is_empty() {
            self.remote_branch = DEFAULT_REMOTE_BRANCH.to_string();
        }
    }

    pub fn unfill_defaults(&mut self) {
        if self.remote_branch == DEFAULT_REMOTE_BRANCH {
            self.remote_branch.clear();
        }
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.manifest.is_empty() {
            return Err(ManifestError::ImportMissingAttribute("manifest"));
        }
        if self.name.is_empty() {
            return Err(ManifestError::ImportMissingAttribute("name"));
        }
        if self.remote.is_empty() {
            return Err(ManifestError::ImportMissingAttribute("remote"));
        }
        Ok(())
    }
}

/// A reference to a manifest file next to the importing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LocalImport {
    /// File path relative to the importing manifest's directory.
    #[serde(rename = "@file", default, skip_serializing_if = "String::is_empty")]
    pub file: String,
}

impl LocalImport {
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.file.is_empty() {
            return Err(ManifestError::ImportMissingAttribute("file"));
        }
        Ok(())
    }
}

/// In-memory form of one manifest file, defaults filled.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Manifest {
    pub imports: Vec<Import>,
    pub local_imports: Vec<LocalImport>,
    pub projects: Vec<Project>,
    pub hooks: Vec<Hook>,
}

// ── XML document shape ─────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename = "manifest")]
struct ManifestXml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    imports: Option<ImportsXml>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    projects: Option<ProjectsXml>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    hooks: Option<HooksXml>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct ImportsXml {
    #[serde(rename = "import", default, skip_serializing_if = "Vec::is_empty")]
    imports: Vec<Import>,

    #[serde(rename = "localimport", default, skip_serializing_if = "Vec::is_empty")]
    local_imports: Vec<LocalImport>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct ProjectsXml {
    #[serde(rename = "project", default, skip_serializing_if = "Vec::is_empty")]
    projects: Vec<Project>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct HooksXml {
    #[serde(rename = "hook", default, skip_serializing_if = "Vec::is_empty")]
    hooks: Vec<Hook>,
}

// ── Implementation ─────────────────────────────────────────────────────────

impl Manifest {
    /// Parse from an XML string, filling defaults and validating every
    /// entry.
    pub fn parse(xml: &str) -> Result<Self, ManifestError> {
        let doc: ManifestXml = from_str(xml).map_err(|e| ManifestError::Xml(e.to_string()))?;

        let mut manifest = Manifest::default();
        if let Some(imports) = doc.imports {
            manifest.imports = imports.imports;
            manifest.local_imports = imports.local_imports;
        }
        if let Some(projects) = doc.projects {
            manifest.projects = projects.projects;
        }
        if let Some(hooks) = doc.hooks {
            manifest.hooks = hooks.hooks;
        }

        for import in &mut manifest.imports {
            import.validate()?;
            import.fill_defaults();
        }
        for local in &manifest.local_imports {
            local.validate()?;
        }
        for project in &mut manifest.projects {
            project.fill_defaults();
            project.validate()?;
        }
        for hook in &manifest.hooks {
            hook.validate()?;
        }

        Ok(manifest)
    }

    /// Parse from a file.
    pub fn parse_file(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Serialize to minimal XML: defaults unfilled, empty containers
    /// elided, empty elements self-closing, trailing newline.
    pub fn to_xml(&self) -> Result<String, ManifestError> {
        let mut manifest = self.clone();
        for import in &mut manifest.imports {
            import.unfill_defaults();
        }
        for project in &mut manifest.projects {
            project.unfill_defaults();
        }

        let doc = ManifestXml {
            imports: if manifest.imports.is_empty() && manifest.local_imports.is_empty() {
                None
            } else {
                Some(ImportsXml {
                    imports: manifest.imports,
                    local_imports: manifest.local_imports,
                })
            },
            projects: if manifest.projects.is_empty() {
                None
            } else {
                Some(ProjectsXml {
                    projects: manifest.projects,
                })
            },
            hooks: if manifest.hooks.is_empty() {
                None
            } else {
                Some(HooksXml {
                    hooks: manifest.hooks,
                })
            },
        };

        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let mut serializer = quick_xml::se::Serializer::new(&mut out);
        serializer.indent(' ', 2);
        doc.serialize(serializer)
            .map_err(|e| ManifestError::Serialize(e.to_string()))?;

        let mut out = self_close_empty_elements(out);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        Ok(out)
    }

    /// Write to a file with the tmp-then-rename protocol.
    pub fn write_file(&self, path: &Path) -> Result<(), ManifestError> {
        let xml = self.to_xml()?;
        safe_write(path, xml.as_bytes())?;
        Ok(())
    }

    /// A manifest holding exactly one project, used for per-project
    /// metadata files.
    pub fn single_project(project: Project) -> Self {
        Manifest {
            projects: vec![project],
            ..Default::default()
        }
    }
}

/// Rewrite `></elem>` into `/>` for the leaf elements of the schema.
///
/// Leaf elements never carry children, so the pattern only matches an
/// element closing itself immediately after its attributes.
fn self_close_empty_elements(xml: String) -> String {
    const LEAF_ELEMENTS: [&str; 4] = ["import", "localimport", "project", "hook"];
    let mut out = xml;
    for elem in LEAF_ELEMENTS {
        out = out.replace(&format!("></{}>", elem), "/>");
    }
    out
}
