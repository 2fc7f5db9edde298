//! Compile Module for Classfile Compiler
//!
//! Drives the pipeline: validate → merge → backend. Also owns the compile
//! options and the parallel batch driver.

#[cfg(feature = "napi")]
use napi_derive::napi;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, info_span, warn};

use crate::backend::{generate, Backend, ImportEnv};
use crate::cache::IncrementalCache;
use crate::discovery::{discover_projects, load_project, ProjectConvention};
use crate::error::{ClassfileError, Result};
use crate::merge::merge;
use crate::validate::{validate_project, CompilerError, ImportPolicy, SourceUnit};

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOptions {
    /// Package clause of the generated file.
    pub package_name: String,
    pub imports: ImportPolicy,
    pub convention: ProjectConvention,
    /// Enables the incremental cache when set.
    pub cache_dir: Option<PathBuf>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            package_name: "main".to_string(),
            imports: ImportPolicy::default(),
            convention: ProjectConvention::default(),
            cache_dir: None,
        }
    }
}

impl CompileOptions {
    /// Empty text yields the defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| ClassfileError::Io {
            path: path.to_string_lossy().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Everything that changes generated output besides the sources.
    fn fingerprint(&self) -> String {
        format!("{}|{:?}", self.package_name, self.imports)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SINGLE PROJECT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResult {
    pub code: String,
    /// Class name after instance overrides.
    pub class_name: String,
    pub files: Vec<String>,
    #[serde(default)]
    pub cached: bool,
}

/// Compiles one template and its ordered instances.
///
/// Either the backend's output or a classified error; a failing project
/// never yields partial output.
pub fn compile_units(
    options: &CompileOptions,
    template: &SourceUnit,
    instances: &[SourceUnit],
    backend: &dyn Backend,
) -> Result<CompileResult> {
    let span = info_span!("compile_project", template = %template.path, instances = instances.len());
    let _enter = span.enter();

    let markers = validate_project(template, instances, &options.imports)?;
    let package = merge(&options.package_name, template, instances, &markers);
    debug!(items = package.items.len(), "merged classfile project");

    let env = ImportEnv::resolve(&package);
    let class_name = package.markers.class_name.clone();
    let code = generate(backend, package, &env)?;

    let files = std::iter::once(template)
        .chain(instances)
        .map(|u| u.path.clone())
        .collect();
    Ok(CompileResult {
        code,
        class_name,
        files,
        cached: false,
    })
}

/// Loads the project in `dir` and compiles it, consulting the cache.
///
/// Cache entries are keyed on the backend as well, so switching backends
/// never replays another backend's output.
pub fn compile_dir(
    options: &CompileOptions,
    dir: &Path,
    backend: &dyn Backend,
) -> Result<CompileResult> {
    let project = load_project(dir, &options.convention)?;
    let cache = options.cache_dir.as_ref().map(IncrementalCache::new);
    let key = project.key();
    let fingerprint = format!("{}|{}", options.fingerprint(), backend.id());
    let hash = IncrementalCache::compute_hash(&fingerprint, &project.sources);

    if let Some(hit) = cache.as_ref().and_then(|c| c.get(&key, &hash)) {
        return Ok(CompileResult {
            cached: true,
            ..hit
        });
    }

    let result = compile_units(options, &project.template, &project.instances, backend)?;
    if let Some(cache) = &cache {
        cache.set(&key, &hash, &result);
    }
    Ok(result)
}

// ═══════════════════════════════════════════════════════════════════════════════
// BATCH
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-project results in discovery order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub projects: Vec<(PathBuf, Result<CompileResult>)>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.projects.iter().all(|(_, r)| r.is_ok())
    }

    pub fn compiled(&self) -> impl Iterator<Item = (&PathBuf, &CompileResult)> {
        self.projects
            .iter()
            .filter_map(|(dir, r)| r.as_ref().ok().map(|result| (dir, result)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&PathBuf, &ClassfileError)> {
        self.projects
            .iter()
            .filter_map(|(dir, r)| r.as_ref().err().map(|err| (dir, err)))
    }

    pub fn outcomes(&self) -> Vec<ProjectOutcome> {
        self.projects
            .iter()
            .map(|(dir, r)| match r {
                Ok(result) => ProjectOutcome::compiled(dir, result.clone()),
                Err(err) => ProjectOutcome::failed(dir, err),
            })
            .collect()
    }
}

/// Serializable result of one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectOutcome {
    pub dir: String,
    pub result: Option<CompileResult>,
    pub error: Option<CompilerError>,
}

impl ProjectOutcome {
    pub fn compiled(dir: &Path, result: CompileResult) -> Self {
        ProjectOutcome {
            dir: dir.to_string_lossy().to_string(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(dir: &Path, err: &ClassfileError) -> Self {
        ProjectOutcome {
            dir: dir.to_string_lossy().to_string(),
            result: None,
            error: Some(err.to_diagnostic()),
        }
    }
}

/// Compiles every project under `root` in parallel.
///
/// A failing project is recorded and skipped; it never stops its siblings.
pub fn compile_projects(
    options: &CompileOptions,
    root: &Path,
    backend: &dyn Backend,
) -> BatchReport {
    let dirs = discover_projects(root, &options.convention);
    info!(root = %root.display(), projects = dirs.len(), "compiling classfile projects");

    let projects: Vec<(PathBuf, Result<CompileResult>)> = dirs
        .into_par_iter()
        .map(|dir| {
            let result = compile_dir(options, &dir, backend);
            (dir, result)
        })
        .collect();

    let report = BatchReport { projects };
    for (dir, e) in report.failed() {
        warn!(project = %dir.display(), error = %e, "skipping project");
    }
    info!(
        compiled = report.compiled().count(),
        failed = report.failed().count(),
        "batch finished"
    );
    report
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAPI ENTRY POINTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
#[napi]
pub fn compile_project_native(dir: String, options_json: String) -> napi::Result<String> {
    let options = CompileOptions::from_json(&options_json)
        .map_err(|e| napi::Error::from_reason(e.to_string()))?;
    let path = Path::new(&dir);
    let outcome = match compile_dir(&options, path, &crate::backend::GoSourceWriter) {
        Ok(result) => ProjectOutcome::compiled(path, result),
        Err(e) => ProjectOutcome::failed(path, &e),
    };
    serde_json::to_string(&outcome).map_err(|e| napi::Error::from_reason(e.to_string()))
}

#[cfg(feature = "napi")]
#[napi]
pub fn compile_projects_native(root: String, options_json: String) -> napi::Result<String> {
    let options = CompileOptions::from_json(&options_json)
        .map_err(|e| napi::Error::from_reason(e.to_string()))?;
    let report = compile_projects(&options, Path::new(&root), &crate::backend::GoSourceWriter);
    serde_json::to_string(&report.outcomes()).map_err(|e| napi::Error::from_reason(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults_from_empty_text() {
        let options = CompileOptions::from_json("  ").unwrap();
        assert_eq!(options, CompileOptions::default());
        assert_eq!(options.package_name, "main");
        assert!(options.imports.allow_stdlib);
    }

    #[test]
    fn test_options_partial_json() {
        let options = CompileOptions::from_json(
            r#"{
                "packageName": "game",
                "imports": { "allowed": ["github.com/acme/..."], "allowStdlib": false },
                "convention": { "instanceExtensions": ["spx", "sprite"] }
            }"#,
        )
        .unwrap();
        assert_eq!(options.package_name, "game");
        assert!(!options.imports.allow_stdlib);
        assert!(options.imports.allowed.contains("github.com/acme/..."));
        assert_eq!(options.convention.template_extensions, vec!["gmx"]);
        assert_eq!(options.convention.instance_extensions, vec!["spx", "sprite"]);
        assert_eq!(options.cache_dir, None);
    }

    #[test]
    fn test_bad_options_are_config_errors() {
        let err = CompileOptions::from_json("{\"packageName\": 3}").unwrap_err();
        assert!(matches!(err, ClassfileError::Config(_)));
        assert_eq!(err.to_diagnostic().error_type, "ConfigError");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_fingerprint_tracks_output_options() {
        let a = CompileOptions::default();
        let b = CompileOptions {
            package_name: "game".to_string(),
            ..CompileOptions::default()
        };
        let c = CompileOptions {
            cache_dir: Some(PathBuf::from("/tmp/x")),
            ..CompileOptions::default()
        };
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), c.fingerprint());
    }
}
