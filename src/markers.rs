//! Marker Module for Classfile Compiler
//!
//! A template configures its class through three reserved constants:
//!
//! ```text
//! const (
//!     GopGamePkg = "github.com/goplus/spx"   // framework package
//!     GopClass   = "Game"                    // default class name
//!     GopThis    = "this"                    // implicit receiver
//! )
//! ```
//!
//! Names are matched exactly and case-sensitively. Values must be non-empty
//! string literals; anything else counts as absent.

use serde::{Deserialize, Serialize};

use crate::error::ClassfileError;
use crate::validate::{
    CompilerError, DeclKind, SourceLocation, SourceUnit, INV_MISSING_MARKER,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Marker {
    PackagePath,
    ClassName,
    Receiver,
}

impl Marker {
    pub const ALL: [Marker; 3] = [Marker::PackagePath, Marker::ClassName, Marker::Receiver];

    pub fn ident(self) -> &'static str {
        match self {
            Marker::PackagePath => "GopGamePkg",
            Marker::ClassName => "GopClass",
            Marker::Receiver => "GopThis",
        }
    }

    pub fn from_ident(name: &str) -> Option<Self> {
        Marker::ALL.into_iter().find(|m| m.ident() == name)
    }

    pub fn is_overridable(self) -> bool {
        matches!(self, Marker::ClassName)
    }
}

/// One reserved constant found in a unit's const declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerEntry {
    pub marker: Marker,
    /// `None` when the constant is not a non-empty string literal.
    pub value: Option<String>,
    pub decl_index: usize,
    pub location: SourceLocation,
}

/// Lookup table from reserved name to literal value, built once per unit.
#[derive(Debug, Clone, Default)]
pub struct MarkerTable {
    entries: Vec<MarkerEntry>,
}

impl MarkerTable {
    pub fn build(unit: &SourceUnit) -> Self {
        let mut entries = Vec::new();
        for (decl_index, decl) in unit.decls.iter().enumerate() {
            if decl.kind != DeclKind::Const {
                continue;
            }
            for spec in &decl.specs {
                if let Some(marker) = Marker::from_ident(&spec.name) {
                    entries.push(MarkerEntry {
                        marker,
                        value: spec.string_literal().filter(|v| !v.is_empty()),
                        decl_index,
                        location: decl.location.clone(),
                    });
                }
            }
        }
        MarkerTable { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in document order.
    pub fn entries(&self) -> &[MarkerEntry] {
        &self.entries
    }

    /// The last declaration of `marker` wins.
    pub fn last_entry(&self, marker: Marker) -> Option<&MarkerEntry> {
        self.entries.iter().rev().find(|e| e.marker == marker)
    }

    pub fn get(&self, marker: Marker) -> Option<&str> {
        self.last_entry(marker).and_then(|e| e.value.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassfileMarkers {
    pub package_path: String,
    pub class_name: String,
    pub this_name: String,
}

/// Resolves all three markers from a template, reporting every missing one.
pub fn extract_markers(template: &SourceUnit) -> Result<ClassfileMarkers, ClassfileError> {
    let table = MarkerTable::build(template);
    let resolve = |marker| table.get(marker).map(str::to_string);

    match (
        resolve(Marker::PackagePath),
        resolve(Marker::ClassName),
        resolve(Marker::Receiver),
    ) {
        (Some(package_path), Some(class_name), Some(this_name)) => Ok(ClassfileMarkers {
            package_path,
            class_name,
            this_name,
        }),
        _ => {
            let missing: Vec<&str> = Marker::ALL
                .into_iter()
                .filter(|m| table.get(*m).is_none())
                .map(Marker::ident)
                .collect();
            let location = table
                .entries()
                .first()
                .map(|e| e.location.clone())
                .unwrap_or_else(SourceLocation::start);

            let mut err = CompilerError::at(
                INV_MISSING_MARKER,
                &format!(
                    "{} is missing classfile marker(s): {}.",
                    template.path,
                    missing.join(", ")
                ),
                &template.path,
                &location,
            );
            for name in &missing {
                let declared_badly = Marker::from_ident(name)
                    .and_then(|m| table.last_entry(m))
                    .is_some();
                err = err.with_hint(if declared_badly {
                    format!("{} must be a non-empty string literal.", name)
                } else {
                    format!("Add {} = \"...\" to the template's const block.", name)
                });
            }
            Err(ClassfileError::MissingMarker(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::{Declaration, FileRole, ValueSpec};

    fn template(specs: &[(&str, &str)]) -> SourceUnit {
        let specs = specs
            .iter()
            .map(|&(name, value)| ValueSpec::new(name, Some(value)))
            .collect();
        SourceUnit::new(
            "index.gmx",
            FileRole::Template,
            vec![
                Declaration::value_block(DeclKind::Const, specs, SourceLocation { line: 2, column: 1 }),
                Declaration::func("onInit", "func onInit() {\n}"),
            ],
        )
    }

    #[test]
    fn test_extracts_all_markers() {
        let unit = template(&[
            ("GopGamePkg", "\"github.com/goplus/spx\""),
            ("GopClass", "\"Game\""),
            ("GopThis", "\"this\""),
        ]);
        let markers = extract_markers(&unit).unwrap();
        assert_eq!(markers.package_path, "github.com/goplus/spx");
        assert_eq!(markers.class_name, "Game");
        assert_eq!(markers.this_name, "this");
    }

    #[test]
    fn test_reports_every_missing_marker() {
        let unit = template(&[("GopClass", "\"Game\"")]);
        match extract_markers(&unit) {
            Err(ClassfileError::MissingMarker(d)) => {
                assert!(d.message.contains("GopGamePkg, GopThis"));
                assert_eq!(d.line, 2);
                assert_eq!(d.hints.len(), 2);
            }
            other => panic!("expected MissingMarker, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_and_non_literal_values_are_absent() {
        let unit = template(&[
            ("GopGamePkg", "\"\""),
            ("GopClass", "42"),
            ("GopThis", "\"this\""),
        ]);
        let table = MarkerTable::build(&unit);
        assert_eq!(table.entries().len(), 3);
        assert_eq!(table.get(Marker::PackagePath), None);
        assert_eq!(table.get(Marker::ClassName), None);
        assert_eq!(table.get(Marker::Receiver), Some("this"));

        let err = extract_markers(&unit).unwrap_err();
        let d = err.diagnostic().unwrap();
        assert!(d.hints.iter().all(|h| h.contains("non-empty string literal")));
    }

    #[test]
    fn test_names_are_case_sensitive() {
        assert_eq!(Marker::from_ident("GopClass"), Some(Marker::ClassName));
        assert_eq!(Marker::from_ident("gopclass"), None);
        assert_eq!(Marker::from_ident("GopClass "), None);
    }

    #[test]
    fn test_last_declaration_wins() {
        let mut unit = template(&[("GopClass", "\"Game\"")]);
        unit.decls.push(Declaration::value_block(
            DeclKind::Const,
            vec![ValueSpec::new("GopClass", Some("\"Stage\""))],
            SourceLocation { line: 9, column: 1 },
        ));
        let table = MarkerTable::build(&unit);
        assert_eq!(table.get(Marker::ClassName), Some("Stage"));
        assert_eq!(table.last_entry(Marker::ClassName).unwrap().decl_index, 2);
    }

    #[test]
    fn test_var_blocks_are_ignored() {
        let unit = SourceUnit::new(
            "index.gmx",
            FileRole::Template,
            vec![Declaration::value_block(
                DeclKind::Var,
                vec![ValueSpec::new("GopClass", Some("\"Game\""))],
                SourceLocation::start(),
            )],
        );
        assert!(MarkerTable::build(&unit).is_empty());
    }
}
