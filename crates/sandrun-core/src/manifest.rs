//! Pyproject-style manifest rendering.
//!
//! The sandbox materializes a `pyproject.toml` inside the container so the
//! installer (`uv`) can resolve the declared dependencies before the code
//! runs. This module is the thin collaborator that turns a structured
//! dependency list into that manifest text; the orchestrator treats the
//! result as an opaque blob.

use serde::{Deserialize, Serialize};

/// One declared dependency: a package name and the version-constraint text
/// appended directly to it (`"requests>=2"`, `"typing-extensions<5"`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub version_constraints: String,
}

impl Dependency {
    pub fn new(name: impl Into<String>, version_constraints: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_constraints: version_constraints.into(),
        }
    }
}

/// Project description for the sandboxed environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PyprojectManifest {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_python_min_version")]
    pub python_min_version: String,
    #[serde(default = "default_python_max_version")]
    pub python_max_version: String,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

fn default_title() -> String {
    "my-project".to_string()
}

fn default_python_min_version() -> String {
    "3.13".to_string()
}

fn default_python_max_version() -> String {
    "4".to_string()
}

impl Default for PyprojectManifest {
    fn default() -> Self {
        Self {
            title: default_title(),
            python_min_version: default_python_min_version(),
            python_max_version: default_python_max_version(),
            dependencies: Vec::new(),
        }
    }
}

impl PyprojectManifest {
    pub fn new(title: impl Into<String>, dependencies: Vec<Dependency>) -> Self {
        Self {
            title: title.into(),
            dependencies,
            ..Self::default()
        }
    }

    /// Render the manifest text. The supported Python range is the half-open
    /// interval `>=min,<max`; each dependency entry concatenates the package
    /// name directly with its constraint string.
    pub fn render(&self) -> String {
        let deps = self
            .dependencies
            .iter()
            .map(|d| format!("    \"{}{}\",", d.name, d.version_constraints))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            r#"[project]
name = "{title}"
version = "0.1.0"
description = "Add your description here"
requires-python = ">={min},<{max}"
dependencies = [
{deps}
]
"#,
            title = self.title,
            min = self.python_min_version,
            max = self.python_max_version,
            deps = deps,
        )
    }
}
