//! Discovery Module for Classfile Compiler
//!
//! Finds classfile projects on disk. A project is a directory; which files in
//! it are templates and which are instances is decided by the caller's
//! extension convention.

#[cfg(feature = "napi")]
use napi_derive::napi;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{ClassfileError, Result};
use crate::parse::parse_source;
use crate::validate::{CompilerError, FileRole, SourceUnit, INV_PROJECT_LAYOUT};

// ═══════════════════════════════════════════════════════════════════════════════
// PROJECT CONVENTION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectConvention {
    pub template_extensions: Vec<String>,
    pub instance_extensions: Vec<String>,
}

impl Default for ProjectConvention {
    fn default() -> Self {
        ProjectConvention {
            template_extensions: vec!["gmx".to_string()],
            instance_extensions: vec!["spx".to_string()],
        }
    }
}

impl ProjectConvention {
    pub fn role_of(&self, path: &Path) -> Option<FileRole> {
        let ext = path.extension()?.to_str()?;
        if self.template_extensions.iter().any(|e| e == ext) {
            Some(FileRole::Template)
        } else if self.instance_extensions.iter().any(|e| e == ext) {
            Some(FileRole::Instance)
        } else {
            None
        }
    }
}

/// A loaded project: parsed units plus the raw sources they came from.
#[derive(Debug, Clone)]
pub struct Project {
    pub dir: PathBuf,
    pub template: SourceUnit,
    /// Ordered by file name.
    pub instances: Vec<SourceUnit>,
    /// `(path, text)` for every classfile, ordered by file name.
    pub sources: Vec<(String, String)>,
}

impl Project {
    pub fn key(&self) -> String {
        self.dir.to_string_lossy().to_string()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DISCOVERY
// ═══════════════════════════════════════════════════════════════════════════════

/// Every directory under `root` holding at least one classfile, sorted.
pub fn discover_projects(root: &Path, convention: &ProjectConvention) -> Vec<PathBuf> {
    let mut dirs = BTreeSet::new();
    if !root.exists() {
        return Vec::new();
    }

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry during discovery");
                continue;
            }
        };
        let path = entry.path();
        if entry.file_type().is_file() && convention.role_of(path).is_some() {
            if let Some(parent) = path.parent() {
                dirs.insert(parent.to_path_buf());
            }
        }
    }

    debug!(root = %root.display(), projects = dirs.len(), "discovered classfile projects");
    dirs.into_iter().collect()
}

/// Classfiles directly inside `dir` with their roles, sorted by file name.
pub fn find_project_files(
    dir: &Path,
    convention: &ProjectConvention,
) -> Result<Vec<(PathBuf, FileRole)>> {
    let io_err = |source: std::io::Error| ClassfileError::Io {
        path: dir.to_string_lossy().to_string(),
        source,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(role) = convention.role_of(&path) {
            files.push((path, role));
        }
    }
    files.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));
    Ok(files)
}

/// Reads and parses one project directory.
pub fn load_project(dir: &Path, convention: &ProjectConvention) -> Result<Project> {
    let files = find_project_files(dir, convention)?;
    let dir_str = dir.to_string_lossy().to_string();

    let templates: Vec<String> = files
        .iter()
        .filter(|(_, role)| *role == FileRole::Template)
        .map(|(path, _)| path.to_string_lossy().to_string())
        .collect();
    if templates.len() != 1 {
        let message = if templates.is_empty() {
            format!("{} has no template classfile.", dir_str)
        } else {
            format!("{} has {} template classfiles.", dir_str, templates.len())
        };
        let hints = if templates.is_empty() {
            vec![format!(
                "Add one file with extension {}.",
                convention.template_extensions.join(" or ")
            )]
        } else {
            templates
        };
        return Err(ClassfileError::InvalidClassfile(CompilerError::with_details(
            INV_PROJECT_LAYOUT,
            &message,
            &dir_str,
            0,
            0,
            None,
            hints,
        )));
    }

    let mut template = None;
    let mut instances = Vec::new();
    let mut sources = Vec::new();
    for (path, role) in files {
        let path_str = path.to_string_lossy().to_string();
        let text = fs::read_to_string(&path).map_err(|source| ClassfileError::Io {
            path: path_str.clone(),
            source,
        })?;
        let unit = parse_source(&path_str, role, &text).map_err(ClassfileError::Parse)?;
        match role {
            FileRole::Template => template = Some(unit),
            FileRole::Instance => instances.push(unit),
        }
        sources.push((path_str, text));
    }

    let template = template.ok_or_else(|| {
        ClassfileError::InvalidClassfile(CompilerError::new(
            INV_PROJECT_LAYOUT,
            &format!("{} has no template classfile.", dir_str),
            &dir_str,
            0,
            0,
        ))
    })?;

    Ok(Project {
        dir: dir.to_path_buf(),
        template,
        instances,
        sources,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAPI ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
#[napi]
pub fn discover_projects_native(root: String) -> Vec<String> {
    discover_projects(Path::new(&root), &ProjectConvention::default())
        .into_iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_role_of() {
        let convention = ProjectConvention::default();
        assert_eq!(convention.role_of(Path::new("a/index.gmx")), Some(FileRole::Template));
        assert_eq!(convention.role_of(Path::new("a/Kai.spx")), Some(FileRole::Instance));
        assert_eq!(convention.role_of(Path::new("a/main.go")), None);
        assert_eq!(convention.role_of(Path::new("a/Makefile")), None);
    }

    #[test]
    fn test_discover_groups_by_directory() {
        let root = tempdir().unwrap();
        let game = root.path().join("game");
        let nested = root.path().join("more/space");
        fs::create_dir_all(&game).unwrap();
        fs::create_dir_all(&nested).unwrap();
        fs::write(game.join("index.gmx"), "").unwrap();
        fs::write(game.join("Kai.spx"), "").unwrap();
        fs::write(nested.join("Ship.spx"), "").unwrap();
        fs::write(root.path().join("README.md"), "").unwrap();

        let dirs = discover_projects(root.path(), &ProjectConvention::default());
        assert_eq!(dirs, vec![game, nested]);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dirs = discover_projects(Path::new("/definitely/not/here"), &ProjectConvention::default());
        assert!(dirs.is_empty());
    }

    #[test]
    fn test_load_orders_instances_by_name() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("index.gmx"), "func onInit() {}\n").unwrap();
        fs::write(dir.path().join("b.spx"), "func onB() {}\n").unwrap();
        fs::write(dir.path().join("a.spx"), "func onA() {}\n").unwrap();

        let project = load_project(dir.path(), &ProjectConvention::default()).unwrap();
        let names: Vec<&str> = project
            .instances
            .iter()
            .map(|u| u.decls[0].name.as_deref().unwrap())
            .collect();
        assert_eq!(names, vec!["onA", "onB"]);
        assert_eq!(project.template.role, FileRole::Template);
        assert_eq!(project.sources.len(), 3);
    }

    #[test]
    fn test_two_templates_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("index.gmx"), "").unwrap();
        fs::write(dir.path().join("other.gmx"), "").unwrap();

        match load_project(dir.path(), &ProjectConvention::default()) {
            Err(ClassfileError::InvalidClassfile(d)) => {
                assert_eq!(d.code, INV_PROJECT_LAYOUT);
                assert_eq!(d.hints.len(), 2);
            }
            other => panic!("expected InvalidClassfile, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_failure_carries_path() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("index.gmx"), "func broken() {\n").unwrap();

        let err = load_project(dir.path(), &ProjectConvention::default()).unwrap_err();
        assert!(matches!(err, ClassfileError::Parse(_)));
        assert!(err.path().unwrap().ends_with("index.gmx"));
    }
}
