//! Backend Module for Classfile Compiler
//!
//! The semantic backend is pluggable. The adapter only passes the merged
//! package through and attributes failures to the file they came from.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::error::{BackendFailure, ClassfileError};
use crate::merge::MergedPackage;
use crate::validate::DeclKind;

/// Import/type environment handed to the backend alongside the package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportEnv {
    pub framework_package: String,
    pub receiver: String,
    /// Distinct imported paths, sorted.
    pub packages: Vec<String>,
}

impl ImportEnv {
    pub fn resolve(package: &MergedPackage) -> Self {
        let packages: BTreeSet<&str> = package.imports.iter().map(|i| i.path.as_str()).collect();
        ImportEnv {
            framework_package: package.markers.package_path.clone(),
            receiver: package.markers.this_name.clone(),
            packages: packages.into_iter().map(str::to_string).collect(),
        }
    }
}

pub trait Backend: Send + Sync {
    fn generate(&self, package: &MergedPackage, env: &ImportEnv) -> Result<String, BackendFailure>;

    /// Identifies the backend in cache keys. Backends whose output depends on
    /// their own configuration must fold it in here.
    fn id(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Runs `backend` over `package`, consuming it.
///
/// Output is returned untouched. A failure is tagged with the origin of the
/// item it points at, or the template when it points at nothing.
pub fn generate(
    backend: &dyn Backend,
    package: MergedPackage,
    env: &ImportEnv,
) -> Result<String, ClassfileError> {
    match backend.generate(&package, env) {
        Ok(code) => {
            debug!(bytes = code.len(), package = %package.name, "backend emitted package");
            Ok(code)
        }
        Err(failure) => {
            let path = failure
                .item
                .and_then(|i| package.items.get(i))
                .map(|item| item.origin.clone())
                .unwrap_or_else(|| package.template_path.clone());
            Err(ClassfileError::Backend { path, failure })
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GO SOURCE WRITER
// ═══════════════════════════════════════════════════════════════════════════════

/// Reference backend: writes the merged package back out as Go source.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoSourceWriter;

impl Backend for GoSourceWriter {
    fn generate(&self, package: &MergedPackage, _env: &ImportEnv) -> Result<String, BackendFailure> {
        check_redeclarations(package)?;
        Ok(render(package))
    }

    fn id(&self) -> String {
        "go-source-writer".to_string()
    }
}

/// Same-name package-level declarations are left to the backend to reject.
fn check_redeclarations(package: &MergedPackage) -> Result<(), BackendFailure> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (index, item) in package.items.iter().enumerate() {
        if item.decl.is_method() {
            continue;
        }
        for name in item.decl.declared_names() {
            if name == "_" || (item.decl.kind == DeclKind::Func && name == "init") {
                continue;
            }
            if let Some(first) = seen.insert(name, index) {
                let first_origin = &package.items[first].origin;
                return Err(BackendFailure::new(format!(
                    "{} redeclared in this block (previous declaration in {})",
                    name, first_origin
                ))
                .at_item(index));
            }
        }
    }
    Ok(())
}

fn render(package: &MergedPackage) -> String {
    let mut out = format!("package {}\n", package.name);

    let mut seen = HashSet::new();
    let imports: Vec<String> = package
        .imports
        .iter()
        .filter(|i| seen.insert((i.alias.as_deref(), i.path.as_str())))
        .map(|i| match &i.alias {
            Some(alias) => format!("{} \"{}\"", alias, i.path),
            None => format!("\"{}\"", i.path),
        })
        .collect();
    match imports.as_slice() {
        [] => {}
        [single] => out.push_str(&format!("\nimport {}\n", single)),
        many => {
            out.push_str("\nimport (\n");
            for spec in many {
                out.push_str(&format!("\t{}\n", spec));
            }
            out.push_str(")\n");
        }
    }

    for item in &package.items {
        if item.decl.kind == DeclKind::Import {
            continue;
        }
        out.push('\n');
        out.push_str(&item.decl.payload);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::ClassfileMarkers;
    use crate::merge::MergedItem;
    use crate::validate::{Declaration, ImportSpec, SourceLocation};

    fn item(decl: Declaration, origin: &str) -> MergedItem {
        MergedItem {
            decl,
            origin: origin.to_string(),
            receiver: None,
            synthesized: false,
        }
    }

    fn import(alias: Option<&str>, path: &str) -> ImportSpec {
        ImportSpec {
            alias: alias.map(str::to_string),
            path: path.to_string(),
            location: SourceLocation::start(),
        }
    }

    fn package(items: Vec<MergedItem>, imports: Vec<ImportSpec>) -> MergedPackage {
        MergedPackage {
            name: "main".to_string(),
            markers: ClassfileMarkers {
                package_path: "github.com/goplus/spx".to_string(),
                class_name: "Game".to_string(),
                this_name: "this".to_string(),
            },
            template_path: "index.gmx".to_string(),
            imports,
            items,
        }
    }

    #[test]
    fn test_imports_are_hoisted_and_deduplicated() {
        let pkg = package(
            vec![
                item(Declaration::func("onInit", "func onInit() {}"), "index.gmx"),
                item(Declaration::func("onMsg", "func onMsg() {}"), "kai.spx"),
            ],
            vec![
                import(None, "fmt"),
                import(Some("spx"), "github.com/goplus/spx"),
                import(None, "fmt"),
            ],
        );
        let env = ImportEnv::resolve(&pkg);
        assert_eq!(env.packages, vec!["fmt", "github.com/goplus/spx"]);

        let code = GoSourceWriter.generate(&pkg, &env).unwrap();
        assert_eq!(
            code,
            "package main\n\nimport (\n\t\"fmt\"\n\tspx \"github.com/goplus/spx\"\n)\n\nfunc onInit() {}\n\nfunc onMsg() {}\n"
        );
    }

    #[test]
    fn test_redeclaration_blames_second_origin() {
        let pkg = package(
            vec![
                item(Declaration::func("onInit", "func onInit() {}"), "index.gmx"),
                item(Declaration::func("onInit", "func onInit() {}"), "kai.spx"),
            ],
            vec![],
        );
        let env = ImportEnv::resolve(&pkg);
        match generate(&GoSourceWriter, pkg, &env) {
            Err(ClassfileError::Backend { path, failure }) => {
                assert_eq!(path, "kai.spx");
                assert_eq!(failure.item, Some(1));
                assert!(failure.message.contains("onInit redeclared"));
                assert!(failure.message.contains("index.gmx"));
            }
            other => panic!("expected backend error, got {:?}", other),
        }
    }

    #[test]
    fn test_init_and_methods_may_repeat() {
        let mut method = Declaration::func("Pos", "func (g *Game) Pos() {}");
        method.receiver = Some("(g *Game)".to_string());
        let mut other_method = Declaration::func("Pos", "func (k *Kai) Pos() {}");
        other_method.receiver = Some("(k *Kai)".to_string());
        let pkg = package(
            vec![
                item(Declaration::func("init", "func init() {}"), "index.gmx"),
                item(Declaration::func("init", "func init() {}"), "kai.spx"),
                item(method, "index.gmx"),
                item(other_method, "kai.spx"),
            ],
            vec![],
        );
        let env = ImportEnv::resolve(&pkg);
        assert!(GoSourceWriter.generate(&pkg, &env).is_ok());
    }

    struct FlakyBackend;

    impl Backend for FlakyBackend {
        fn generate(&self, _: &MergedPackage, _: &ImportEnv) -> Result<String, BackendFailure> {
            Err(BackendFailure::new("type checker unavailable").transient())
        }
    }

    #[test]
    fn test_unattributed_failure_blames_template() {
        let pkg = package(vec![], vec![]);
        let env = ImportEnv::resolve(&pkg);
        let err = generate(&FlakyBackend, pkg, &env).unwrap_err();
        assert_eq!(err.path(), Some("index.gmx"));
        assert!(err.is_retryable());
        assert_eq!(err.to_diagnostic().error_type, "BackendError");
    }
}
