#[cfg(feature = "napi")]
use napi_derive::napi;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use tracing::debug;

use crate::error::ClassfileError;
use crate::markers::{extract_markers, ClassfileMarkers, Marker, MarkerTable};

// ═══════════════════════════════════════════════════════════════════════════════
// INVARIANT CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const INV_MISSING_MARKER: &str = "CLS001";
pub const INV_NOT_A_CLASSFILE: &str = "CLS002";
pub const INV_UNRESOLVED_IMPORT: &str = "CLS003";
pub const INV_MARKER_NOT_OVERRIDABLE: &str = "CLS004";
pub const INV_ROLE_MISMATCH: &str = "CLS005";
pub const INV_PROJECT_LAYOUT: &str = "CLS006";
pub const ERR_PARSE: &str = "CLS-PARSE";
pub const ERR_BACKEND: &str = "CLS-BACKEND";
pub const ERR_IO: &str = "CLS-IO";
pub const ERR_CONFIG: &str = "CLS-CONFIG";

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

fn get_guarantee(code: &str) -> &'static str {
    match code {
        INV_MISSING_MARKER => {
            "Every template declares GopGamePkg, GopClass and GopThis as non-empty string constants."
        }
        INV_NOT_A_CLASSFILE => {
            "Only projects that declare classfile markers are compiled with classfile semantics."
        }
        INV_UNRESOLVED_IMPORT => "Classfiles import only packages from the permitted import set.",
        INV_MARKER_NOT_OVERRIDABLE => "Instances may override GopClass and nothing else.",
        INV_ROLE_MISMATCH => "A project is compiled from one template and zero or more instances.",
        INV_PROJECT_LAYOUT => "Each project directory holds exactly one template classfile.",
        ERR_PARSE => "Classfiles consist of well-formed top-level declarations.",
        ERR_BACKEND => "Backend failures are reported against the file that produced them.",
        ERR_IO => "Project sources are readable.",
        ERR_CONFIG => "Compile options are valid JSON.",
        _ => "Unknown invariant.",
    }
}

fn get_error_type(code: &str) -> &'static str {
    match code {
        INV_MISSING_MARKER => "MissingMarkerError",
        INV_UNRESOLVED_IMPORT => "UnresolvedImportError",
        ERR_PARSE => "ParseError",
        ERR_BACKEND => "BackendError",
        ERR_IO => "IoError",
        ERR_CONFIG => "ConfigError",
        _ => "InvalidClassfileError",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "napi", napi(object))]
#[serde(rename_all = "camelCase")]
pub struct CompilerError {
    pub code: String,
    pub error_type: String,
    pub message: String,
    pub guarantee: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub context: Option<String>,
    pub hints: Vec<String>,
}

impl CompilerError {
    pub fn new(code: &str, message: &str, file: &str, line: u32, column: u32) -> Self {
        Self::with_details(code, message, file, line, column, None, vec![])
    }

    pub fn at(code: &str, message: &str, file: &str, location: &SourceLocation) -> Self {
        Self::new(code, message, file, location.line, location.column)
    }

    pub fn with_details(
        code: &str,
        message: &str,
        file: &str,
        line: u32,
        column: u32,
        context: Option<String>,
        hints: Vec<String>,
    ) -> Self {
        CompilerError {
            code: code.to_string(),
            error_type: get_error_type(code).to_string(),
            message: message.to_string(),
            guarantee: get_guarantee(code).to_string(),
            file: file.to_string(),
            line,
            column,
            context,
            hints,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(
                f,
                "{}:{}:{}: {} [{}]",
                self.file, self.line, self.column, self.message, self.code
            )
        } else {
            write!(f, "{}: {} [{}]", self.file, self.message, self.code)
        }
    }
}

impl std::error::Error for CompilerError {}

// ═══════════════════════════════════════════════════════════════════════════════
// IR TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "napi", napi(object))]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn start() -> Self {
        SourceLocation { line: 1, column: 1 }
    }
}

/// Role a classfile plays inside its project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileRole {
    Template,
    Instance,
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileRole::Template => f.write_str("template"),
            FileRole::Instance => f.write_str("instance"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSpec {
    pub alias: Option<String>,
    pub path: String,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeclKind {
    Import,
    Const,
    Var,
    Type,
    Func,
}

impl DeclKind {
    pub fn keyword(self) -> &'static str {
        match self {
            DeclKind::Import => "import",
            DeclKind::Const => "const",
            DeclKind::Var => "var",
            DeclKind::Type => "type",
            DeclKind::Func => "func",
        }
    }
}

/// One name inside a const/var/type declaration.
///
/// `ty` and `value` hold raw source text. Type specs only use `ty`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSpec {
    pub name: String,
    #[serde(default)]
    pub ty: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl ValueSpec {
    pub fn new(name: &str, value: Option<&str>) -> Self {
        ValueSpec {
            name: name.to_string(),
            ty: None,
            value: value.map(|v| v.to_string()),
        }
    }

    /// Unquoted value when the spec is initialized with a plain string literal.
    pub fn string_literal(&self) -> Option<String> {
        self.value.as_deref().and_then(unquote_go_string)
    }

    pub fn render(&self) -> String {
        let mut out = self.name.clone();
        if let Some(ty) = &self.ty {
            out.push(' ');
            out.push_str(ty);
        }
        if let Some(value) = &self.value {
            out.push_str(" = ");
            out.push_str(value);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Declaration {
    pub kind: DeclKind,
    pub name: Option<String>,
    /// Explicit receiver text for methods, e.g. `(g *Game)`.
    #[serde(default)]
    pub receiver: Option<String>,
    #[serde(default)]
    pub specs: Vec<ValueSpec>,
    /// Exact source text of the declaration; never inspected by the merge.
    pub payload: String,
    #[serde(default)]
    pub location: SourceLocation,
}

impl Declaration {
    pub fn func(name: &str, payload: &str) -> Self {
        Declaration {
            kind: DeclKind::Func,
            name: Some(name.to_string()),
            receiver: None,
            specs: vec![],
            payload: payload.to_string(),
            location: SourceLocation::default(),
        }
    }

    /// Builds a const/var block and renders its payload from the specs.
    pub fn value_block(kind: DeclKind, specs: Vec<ValueSpec>, location: SourceLocation) -> Self {
        let payload = match specs.as_slice() {
            [single] => format!("{} {}", kind.keyword(), single.render()),
            _ => {
                let body: Vec<String> = specs.iter().map(|s| format!("\t{}", s.render())).collect();
                format!("{} (\n{}\n)", kind.keyword(), body.join("\n"))
            }
        };
        let name = match specs.as_slice() {
            [single] => Some(single.name.clone()),
            _ => None,
        };
        Declaration {
            kind,
            name,
            receiver: None,
            specs,
            payload,
            location,
        }
    }

    pub fn is_method(&self) -> bool {
        self.kind == DeclKind::Func && self.receiver.is_some()
    }

    /// Names this declaration introduces at package level.
    pub fn declared_names(&self) -> Vec<&str> {
        match self.kind {
            DeclKind::Import => vec![],
            DeclKind::Func => self.name.as_deref().into_iter().collect(),
            DeclKind::Const | DeclKind::Var | DeclKind::Type => {
                self.specs.iter().map(|s| s.name.as_str()).collect()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceUnit {
    pub path: String,
    pub role: FileRole,
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default)]
    pub imports: Vec<ImportSpec>,
    pub decls: Vec<Declaration>,
}

impl SourceUnit {
    pub fn new(path: &str, role: FileRole, decls: Vec<Declaration>) -> Self {
        SourceUnit {
            path: path.to_string(),
            role,
            package_name: None,
            imports: vec![],
            decls,
        }
    }

    pub fn functions(&self) -> impl Iterator<Item = &Declaration> {
        self.decls.iter().filter(|d| d.kind == DeclKind::Func)
    }

    pub fn declared_names(&self) -> impl Iterator<Item = &str> {
        self.decls.iter().flat_map(|d| d.declared_names())
    }
}

/// Value of a single Go string literal. `None` for anything else, including
/// concatenations, unknown escapes and byte escapes that are not UTF-8.
pub(crate) fn unquote_go_string(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.len() >= 2 && raw.starts_with('`') && raw.ends_with('`') {
        let inner = &raw[1..raw.len() - 1];
        if inner.contains('`') {
            return None;
        }
        return Some(inner.replace('\r', ""));
    }
    if raw.len() < 2 || !raw.starts_with('"') || !raw.ends_with('"') {
        return None;
    }
    let inner = &raw[1..raw.len() - 1];
    let mut out: Vec<u8> = Vec::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            // `"a" + "b"` is an expression, not a literal
            '"' | '\n' => return None,
            '\\' => {}
            _ => {
                push_char(&mut out, c);
                continue;
            }
        }
        match chars.next()? {
            'a' => out.push(0x07),
            'b' => out.push(0x08),
            'f' => out.push(0x0c),
            'n' => out.push(b'\n'),
            'r' => out.push(b'\r'),
            't' => out.push(b'\t'),
            'v' => out.push(0x0b),
            '\\' => out.push(b'\\'),
            '"' => out.push(b'"'),
            'x' => out.push(u8::try_from(hex_digits(&mut chars, 2)?).ok()?),
            'u' => push_char(&mut out, char::from_u32(hex_digits(&mut chars, 4)?)?),
            'U' => push_char(&mut out, char::from_u32(hex_digits(&mut chars, 8)?)?),
            first @ '0'..='7' => {
                let mut value = first.to_digit(8)?;
                for _ in 0..2 {
                    value = value * 8 + chars.next()?.to_digit(8)?;
                }
                out.push(u8::try_from(value).ok()?);
            }
            _ => return None,
        }
    }
    String::from_utf8(out).ok()
}

fn push_char(out: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

fn hex_digits(chars: &mut std::str::Chars<'_>, count: usize) -> Option<u32> {
    (0..count).try_fold(0u32, |acc, _| Some(acc * 16 + chars.next()?.to_digit(16)?))
}

pub(crate) fn quote_go_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c.is_control() && (c as u32) < 0x80 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// IMPORT POLICY
// ═══════════════════════════════════════════════════════════════════════════════

/// Packages a classfile project may import.
///
/// Entries ending in `/...` admit every package below that prefix. The
/// template's `GopGamePkg` is always permitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportPolicy {
    pub allowed: BTreeSet<String>,
    pub allow_stdlib: bool,
}

impl Default for ImportPolicy {
    fn default() -> Self {
        ImportPolicy {
            allowed: BTreeSet::new(),
            allow_stdlib: true,
        }
    }
}

impl ImportPolicy {
    pub fn allow(mut self, path: &str) -> Self {
        self.allowed.insert(path.to_string());
        self
    }

    pub fn permits(&self, path: &str, markers: &ClassfileMarkers) -> bool {
        if path == markers.package_path || self.allowed.contains(path) {
            return true;
        }
        if self.allow_stdlib && is_stdlib_path(path) {
            return true;
        }
        self.allowed.iter().any(|entry| {
            entry
                .strip_suffix("/...")
                .map_or(false, |prefix| path == prefix || path.starts_with(&format!("{}/", prefix)))
        })
    }
}

/// Standard library paths have no dot in their first element (`fmt`, `net/http`).
pub fn is_stdlib_path(path: &str) -> bool {
    let first = path.split('/').next().unwrap_or("");
    !first.is_empty() && !first.contains('.')
}

// ═══════════════════════════════════════════════════════════════════════════════
// IMPLICIT CALL DETECTION
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    /// Strings, runes and comments; blanked before looking for calls.
    static ref LITERAL_OR_COMMENT_RE: Regex =
        Regex::new(r#"(?s)"(?:[^"\\\n]|\\.)*"|`[^`]*`|'(?:[^'\\\n]|\\.)*'|//[^\n]*|/\*.*?\*/"#).unwrap();

    static ref CALL_RE: Regex = Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap();

    static ref GO_PREDECLARED: HashSet<&'static str> = [
        // keywords that can precede `(`
        "func", "if", "for", "switch", "return", "go", "defer", "select", "case", "range",
        "chan", "map", "struct", "interface", "else", "var", "const", "type", "import",
        // builtins
        "append", "cap", "clear", "close", "complex", "copy", "delete", "imag", "len", "make",
        "max", "min", "new", "panic", "print", "println", "real", "recover",
        // conversions
        "any", "bool", "byte", "complex64", "complex128", "error", "float32", "float64", "int",
        "int8", "int16", "int32", "int64", "rune", "string", "uint", "uint8", "uint16", "uint32",
        "uint64", "uintptr",
    ]
    .into_iter()
    .collect();
}

/// Unqualified calls in `payload` that resolve to nothing the project
/// declares: candidates for implicit-receiver methods.
pub fn implicit_calls(payload: &str, declared: &HashSet<&str>) -> Vec<String> {
    let code = LITERAL_OR_COMMENT_RE.replace_all(payload, |caps: &regex::Captures| {
        if caps[0].starts_with('/') {
            " ".to_string()
        } else {
            "\"\"".to_string()
        }
    });
    let bytes = code.as_bytes();
    let mut calls = Vec::new();
    for cap in CALL_RE.captures_iter(&code) {
        let Some(m) = cap.get(1) else { continue };
        if m.start() > 0 && bytes[m.start() - 1] == b'.' {
            continue;
        }
        let name = m.as_str();
        if GO_PREDECLARED.contains(name) || declared.contains(name) {
            continue;
        }
        if !calls.iter().any(|c| c == name) {
            calls.push(name.to_string());
        }
    }
    calls
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALIDATION FUNCTIONS (Return Option, not Result)
// ═══════════════════════════════════════════════════════════════════════════════

fn validate_roles(template: &SourceUnit, instances: &[SourceUnit]) -> Option<CompilerError> {
    if template.role != FileRole::Template {
        return Some(CompilerError::new(
            INV_ROLE_MISMATCH,
            &format!("{} is passed as the template but is an {}.", template.path, template.role),
            &template.path,
            0,
            0,
        ));
    }
    instances
        .iter()
        .find(|unit| unit.role != FileRole::Instance)
        .map(|unit| {
            CompilerError::new(
                INV_ROLE_MISMATCH,
                &format!("{} is passed as an instance but is a {}.", unit.path, unit.role),
                &unit.path,
                0,
                0,
            )
        })
}

/// A project without any marker is not a classfile project. If its files
/// still lean on framework hooks or receiver calls they cannot compile.
fn validate_classfile_recognition(
    template: &SourceUnit,
    instances: &[SourceUnit],
) -> Option<CompilerError> {
    let units: Vec<&SourceUnit> = std::iter::once(template).chain(instances).collect();
    if units.iter().any(|unit| !MarkerTable::build(unit).is_empty()) {
        return None;
    }

    let declared: HashSet<&str> = units.iter().flat_map(|u| u.declared_names()).collect();
    for unit in &units {
        let calls: Vec<String> = unit
            .decls
            .iter()
            .flat_map(|d| implicit_calls(&d.payload, &declared))
            .collect();

        let hook = unit.functions().next();
        let (message, location) = match (hook, calls.first()) {
            (Some(func), _) => (
                format!(
                    "{} declares func {} but its project has no classfile markers.",
                    unit.path,
                    func.name.as_deref().unwrap_or("_")
                ),
                func.location.clone(),
            ),
            (None, Some(call)) => (
                format!(
                    "{} calls {}() through an implicit receiver but its project has no classfile markers.",
                    unit.path, call
                ),
                SourceLocation::start(),
            ),
            (None, None) => continue,
        };

        let mut err = CompilerError::at(INV_NOT_A_CLASSFILE, &message, &unit.path, &location)
            .with_hint(format!(
                "Declare {}, {} and {} in the template's const block.",
                Marker::PackagePath.ident(),
                Marker::ClassName.ident(),
                Marker::Receiver.ident()
            ));
        if !calls.is_empty() {
            err = err.with_hint(format!("Unresolved unqualified calls: {}", calls.join(", ")));
        }
        return Some(err);
    }
    None
}

fn validate_marker_overrides(instances: &[SourceUnit]) -> Option<CompilerError> {
    for unit in instances {
        let table = MarkerTable::build(unit);
        for entry in table.entries() {
            if !entry.marker.is_overridable() {
                return Some(
                    CompilerError::at(
                        INV_MARKER_NOT_OVERRIDABLE,
                        &format!(
                            "{} redeclares {}, which only the template may set.",
                            unit.path,
                            entry.marker.ident()
                        ),
                        &unit.path,
                        &entry.location,
                    )
                    .with_hint(format!(
                        "Only {} can be overridden per instance.",
                        Marker::ClassName.ident()
                    )),
                );
            }
            if entry.value.is_none() {
                return Some(CompilerError::at(
                    INV_MARKER_NOT_OVERRIDABLE,
                    &format!(
                        "{} overrides {} with something other than a non-empty string literal.",
                        unit.path,
                        entry.marker.ident()
                    ),
                    &unit.path,
                    &entry.location,
                ));
            }
        }
    }
    None
}

fn validate_import_sandbox(
    template: &SourceUnit,
    instances: &[SourceUnit],
    markers: &ClassfileMarkers,
    policy: &ImportPolicy,
) -> Option<CompilerError> {
    for unit in std::iter::once(template).chain(instances) {
        for import in &unit.imports {
            if policy.permits(&import.path, markers) {
                continue;
            }
            let mut err = CompilerError::at(
                INV_UNRESOLVED_IMPORT,
                &format!(
                    "{} imports \"{}\", which is outside the permitted import set.",
                    unit.path, import.path
                ),
                &unit.path,
                &import.location,
            )
            .with_context(format!("import \"{}\"", import.path))
            .with_hint(format!("Framework package: {}", markers.package_path));
            if !policy.allowed.is_empty() {
                let allowed: Vec<&str> = policy.allowed.iter().map(String::as_str).collect();
                err = err.with_hint(format!("Also permitted: {}", allowed.join(", ")));
            }
            return Some(err);
        }
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs every structural check and returns the template's markers.
///
/// Short-circuits on the first violation; nothing is merged or generated
/// for a project that fails here.
pub fn validate_project(
    template: &SourceUnit,
    instances: &[SourceUnit],
    policy: &ImportPolicy,
) -> Result<ClassfileMarkers, ClassfileError> {
    if let Some(e) = validate_roles(template, instances) {
        return Err(ClassfileError::from_diagnostic(e));
    }

    if let Some(e) = validate_classfile_recognition(template, instances) {
        return Err(ClassfileError::from_diagnostic(e));
    }

    let markers = extract_markers(template)?;
    debug!(
        class = %markers.class_name,
        package = %markers.package_path,
        "classfile markers resolved"
    );

    if let Some(e) = validate_marker_overrides(instances) {
        return Err(ClassfileError::from_diagnostic(e));
    }

    if let Some(e) = validate_import_sandbox(template, instances, &markers, policy) {
        return Err(ClassfileError::from_diagnostic(e));
    }

    Ok(markers)
}
