//! Parse Module for Classfile Compiler
//!
//! Splits classfile source into top-level declarations. Function bodies and
//! initializers stay opaque text; only names, value specs and import paths are
//! lifted out for the marker, validation and merge stages.

use std::borrow::Cow;

use crate::validate::{
    unquote_go_string, CompilerError, DeclKind, Declaration, FileRole, ImportSpec,
    SourceLocation, SourceUnit, ValueSpec, ERR_PARSE,
};

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

pub fn parse_source(path: &str, role: FileRole, source: &str) -> Result<SourceUnit, CompilerError> {
    let scanner = Scanner::new(path, source);
    let len = source.len();
    let mut unit = SourceUnit::new(path, role, Vec::new());
    let mut pos = 0;

    loop {
        pos = scanner.skip_trivia(pos, len);
        if pos >= len {
            break;
        }
        let start = pos;
        let keyword = scanner.ident_at(pos);
        pos += keyword.len();

        match keyword {
            "package" => {
                let name_start = scanner.skip_trivia(pos, len);
                let name = scanner.ident_at(name_start);
                if name.is_empty() {
                    return Err(scanner.error(name_start, "expected package name"));
                }
                unit.package_name = Some(name.to_string());
                pos = name_start + name.len();
            }
            "import" => {
                let (end, statements) = scanner.declaration_body(pos)?;
                for (s, e) in statements {
                    unit.imports.push(scanner.import_spec(s, e)?);
                }
                unit.decls
                    .push(scanner.declaration(DeclKind::Import, None, None, vec![], start, end));
                pos = end;
            }
            "const" | "var" | "type" => {
                let kind = match keyword {
                    "const" => DeclKind::Const,
                    "var" => DeclKind::Var,
                    _ => DeclKind::Type,
                };
                let (end, statements) = scanner.declaration_body(pos)?;
                let mut specs = Vec::new();
                for (s, e) in statements {
                    let text = strip_comments(&source[s..e]);
                    let parsed: Vec<ValueSpec> = match kind {
                        DeclKind::Type => parse_type_spec(&text).into_iter().collect(),
                        _ => parse_value_spec(&text),
                    };
                    if parsed.is_empty() {
                        return Err(scanner.error(s, &format!("expected identifier in {} declaration", keyword)));
                    }
                    specs.extend(parsed);
                }
                let name = match (specs.as_slice(), source[pos..end].trim_start().starts_with('(')) {
                    ([single], false) => Some(single.name.clone()),
                    _ => None,
                };
                unit.decls.push(scanner.declaration(kind, name, None, specs, start, end));
                pos = end;
            }
            "func" => {
                let mut p = scanner.skip_trivia(pos, len);
                let mut receiver = None;
                if p < len && scanner.bytes[p] == b'(' {
                    let end = scanner.skip_group(p)?;
                    receiver = Some(source[p..end].to_string());
                    p = scanner.skip_trivia(end, len);
                }
                let name = scanner.ident_at(p);
                if name.is_empty() {
                    return Err(scanner.error(p, "expected function name"));
                }
                let end = scanner.func_end(p + name.len())?;
                unit.decls.push(scanner.declaration(
                    DeclKind::Func,
                    Some(name.to_string()),
                    receiver,
                    vec![],
                    start,
                    end,
                ));
                pos = end;
            }
            "" => {
                let c = source[pos..].chars().next().unwrap_or(' ');
                return Err(scanner.error(pos, &format!("unexpected character {:?}", c)));
            }
            other => {
                return Err(scanner.error(
                    start,
                    &format!("unexpected top-level token `{}`", other),
                ));
            }
        }
    }

    Ok(unit)
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCANNER
// ═══════════════════════════════════════════════════════════════════════════════

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

fn closer(open: u8) -> u8 {
    match open {
        b'(' => b')',
        b'[' => b']',
        _ => b'}',
    }
}

struct Scanner<'a> {
    path: &'a str,
    src: &'a str,
    bytes: &'a [u8],
}

impl<'a> Scanner<'a> {
    fn new(path: &'a str, src: &'a str) -> Self {
        Scanner {
            path,
            src,
            bytes: src.as_bytes(),
        }
    }

    fn location(&self, offset: usize) -> SourceLocation {
        let before = &self.src[..offset];
        let line = before.matches('\n').count() as u32 + 1;
        let line_start = before.rfind('\n').map_or(0, |nl| nl + 1);
        let column = before[line_start..].chars().count() as u32 + 1;
        SourceLocation { line, column }
    }

    fn error(&self, offset: usize, message: &str) -> CompilerError {
        CompilerError::at(ERR_PARSE, message, self.path, &self.location(offset))
    }

    fn ident_at(&self, pos: usize) -> &'a str {
        let len = self.bytes[pos..]
            .iter()
            .take_while(|b| is_ident_byte(**b))
            .count();
        &self.src[pos..pos + len]
    }

    fn is_comment_start(&self, pos: usize) -> bool {
        self.bytes[pos] == b'/' && matches!(self.bytes.get(pos + 1), Some(b'/') | Some(b'*'))
    }

    fn is_line_comment(&self, pos: usize) -> bool {
        self.bytes[pos] == b'/' && self.bytes.get(pos + 1) == Some(&b'/')
    }

    fn skip_comment(&self, pos: usize) -> usize {
        if self.is_line_comment(pos) {
            return self.src[pos..].find('\n').map_or(self.src.len(), |i| pos + i);
        }
        self.src[pos + 2..]
            .find("*/")
            .map_or(self.src.len(), |i| pos + 2 + i + 2)
    }

    /// Skips whitespace, semicolons and comments.
    fn skip_trivia(&self, mut pos: usize, limit: usize) -> usize {
        while pos < limit {
            match self.bytes[pos] {
                b' ' | b'\t' | b'\r' | b'\n' | b';' => pos += 1,
                b'/' if self.is_comment_start(pos) => pos = self.skip_comment(pos),
                _ => break,
            }
        }
        pos.min(limit)
    }

    fn skip_string(&self, pos: usize) -> Result<usize, CompilerError> {
        let quote = self.bytes[pos];
        let mut i = pos + 1;
        while i < self.bytes.len() {
            let b = self.bytes[i];
            if quote == b'`' {
                if b == b'`' {
                    return Ok(i + 1);
                }
            } else if b == b'\\' {
                i += 2;
                continue;
            } else if b == quote {
                return Ok(i + 1);
            } else if b == b'\n' {
                break;
            }
            i += 1;
        }
        Err(self.error(pos, "unterminated string literal"))
    }

    /// `pos` sits on an opening bracket; returns the offset past its match.
    fn skip_group(&self, pos: usize) -> Result<usize, CompilerError> {
        let mut stack = vec![closer(self.bytes[pos])];
        let mut i = pos + 1;
        while i < self.bytes.len() {
            match self.bytes[i] {
                b'"' | b'\'' | b'`' => {
                    i = self.skip_string(i)?;
                    continue;
                }
                b'/' if self.is_comment_start(i) => {
                    i = self.skip_comment(i);
                    continue;
                }
                open @ (b'(' | b'[' | b'{') => stack.push(closer(open)),
                close @ (b')' | b']' | b'}') => {
                    if stack.pop() != Some(close) {
                        return Err(self.error(i, &format!("unexpected `{}`", close as char)));
                    }
                    if stack.is_empty() {
                        return Ok(i + 1);
                    }
                }
                _ => {}
            }
            i += 1;
        }
        Err(self.error(pos, &format!("unclosed `{}`", self.bytes[pos] as char)))
    }

    /// End of a simple statement at depth 0: `;`, or a newline after an
    /// operand. A line ending in an operator or comma continues. Trailing
    /// comments are not part of the statement.
    fn statement_end(&self, pos: usize, limit: usize) -> Result<usize, CompilerError> {
        let mut i = pos;
        let mut content_end = pos;
        let mut after_operand = false;
        while i < limit {
            match self.bytes[i] {
                b';' => return Ok(content_end),
                b'\n' if after_operand => return Ok(content_end),
                b' ' | b'\t' | b'\r' | b'\n' => {
                    i += 1;
                    continue;
                }
                b'/' if self.is_comment_start(i) => {
                    i = self.skip_comment(i);
                    continue;
                }
                b'"' | b'\'' | b'`' => {
                    i = self.skip_string(i)?;
                    after_operand = true;
                }
                b'(' | b'[' | b'{' => {
                    i = self.skip_group(i)?;
                    after_operand = true;
                }
                b')' | b']' | b'}' => {
                    return Err(self.error(i, &format!("unexpected `{}`", self.bytes[i] as char)))
                }
                b if is_ident_byte(b) => {
                    i += self.ident_at(i).len();
                    after_operand = true;
                }
                _ => {
                    i += 1;
                    after_operand = false;
                }
            }
            content_end = i;
        }
        Ok(content_end)
    }

    fn trim_end(&self, start: usize, end: usize) -> usize {
        start + self.src[start..end].trim_end().len()
    }

    /// Statement spans in `[from, to)`, trailing whitespace trimmed.
    fn statements(&self, from: usize, to: usize) -> Result<Vec<(usize, usize)>, CompilerError> {
        let mut out = Vec::new();
        let mut pos = from;
        loop {
            pos = self.skip_trivia(pos, to);
            if pos >= to {
                break;
            }
            let end = self.statement_end(pos, to)?;
            let trimmed = self.trim_end(pos, end);
            if trimmed > pos {
                out.push((pos, trimmed));
            }
            pos = end.max(pos + 1);
        }
        Ok(out)
    }

    /// Body of an import/const/var/type declaration, single or grouped.
    fn declaration_body(&self, pos: usize) -> Result<(usize, Vec<(usize, usize)>), CompilerError> {
        let len = self.src.len();
        let p = self.skip_trivia(pos, len);
        if p < len && self.bytes[p] == b'(' {
            let end = self.skip_group(p)?;
            return Ok((end, self.statements(p + 1, end - 1)?));
        }
        let end = self.statement_end(p, len)?;
        let end = self.trim_end(p, end);
        if end <= p {
            return Err(self.error(pos, "expected declaration body"));
        }
        Ok((end, vec![(p, end)]))
    }

    /// Scans a function signature up to the end of its body.
    fn func_end(&self, mut i: usize) -> Result<usize, CompilerError> {
        let mut last_word = "";
        while i < self.bytes.len() {
            match self.bytes[i] {
                b'{' => {
                    let end = self.skip_group(i)?;
                    if last_word == "struct" || last_word == "interface" {
                        i = end;
                        last_word = "";
                        continue;
                    }
                    return Ok(end);
                }
                b'(' | b'[' => {
                    i = self.skip_group(i)?;
                    last_word = "";
                }
                b'"' | b'\'' | b'`' => i = self.skip_string(i)?,
                // bodyless declaration
                b'\n' => return Ok(self.trim_end(0, i)),
                b'/' if self.is_line_comment(i) => return Ok(self.trim_end(0, i)),
                b'/' if self.is_comment_start(i) => i = self.skip_comment(i),
                b')' | b']' | b'}' => {
                    return Err(self.error(i, &format!("unexpected `{}`", self.bytes[i] as char)))
                }
                b if is_ident_byte(b) => {
                    last_word = self.ident_at(i);
                    i += last_word.len();
                }
                _ => i += 1,
            }
        }
        Ok(self.bytes.len())
    }

    fn declaration(
        &self,
        kind: DeclKind,
        name: Option<String>,
        receiver: Option<String>,
        specs: Vec<ValueSpec>,
        start: usize,
        end: usize,
    ) -> Declaration {
        Declaration {
            kind,
            name,
            receiver,
            specs,
            payload: self.src[start..end].trim_end().to_string(),
            location: self.location(start),
        }
    }

    fn import_spec(&self, start: usize, end: usize) -> Result<ImportSpec, CompilerError> {
        let text = &self.src[start..end];
        let (alias, literal) = if text.starts_with('"') || text.starts_with('`') {
            (None, text)
        } else {
            match text.split_once(char::is_whitespace) {
                Some((alias, rest)) => (Some(alias), rest.trim()),
                None => (None, text),
            }
        };
        let path = unquote_go_string(literal)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| self.error(start, &format!("malformed import spec `{}`", text)))?;
        Ok(ImportSpec {
            alias: alias.map(str::to_string),
            path,
            location: self.location(start),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DECLARATION HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn skip_quoted(bytes: &[u8], pos: usize) -> usize {
    let quote = bytes[pos];
    let mut i = pos + 1;
    while i < bytes.len() {
        if quote != b'`' && bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Replaces each comment with a single space.
fn strip_comments(text: &str) -> Cow<'_, str> {
    if !text.contains("//") && !text.contains("/*") {
        return Cow::Borrowed(text);
    }
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        match (bytes[i], bytes.get(i + 1)) {
            (b'"' | b'\'' | b'`', _) => {
                i = skip_quoted(bytes, i);
                continue;
            }
            (b'/', Some(b'/')) | (b'/', Some(b'*')) => {
                let end = if bytes[i + 1] == b'/' {
                    text[i..].find('\n').map_or(text.len(), |n| i + n)
                } else {
                    text[i + 2..].find("*/").map_or(text.len(), |n| i + 2 + n + 2)
                };
                out.push_str(&text[copied..i]);
                out.push(' ');
                copied = end;
                i = end;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    out.push_str(&text[copied..]);
    Cow::Owned(out)
}

/// Offset of the `=` separating names from values, ignoring `==`, `!=`,
/// `<=`, `>=` and `:=`.
fn find_assign(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => {
                i = skip_quoted(bytes, i);
                continue;
            }
            b'=' => {
                let next_is_eq = bytes.get(i + 1) == Some(&b'=');
                let prev = if i > 0 { bytes[i - 1] } else { b' ' };
                if next_is_eq {
                    i += 2;
                    continue;
                }
                if !matches!(prev, b'!' | b'<' | b'>' | b':' | b'=') {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn split_top_level(text: &str, sep: u8) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => {
                i = skip_quoted(bytes, i);
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b if b == sep && depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(text[start..].trim());
    parts
}

/// `a, b int = 1, 2` becomes two specs sharing the type.
fn parse_value_spec(text: &str) -> Vec<ValueSpec> {
    let (lhs, rhs) = match find_assign(text) {
        Some(i) => (&text[..i], Some(text[i + 1..].trim())),
        None => (text, None),
    };

    let mut names = Vec::new();
    let mut rest = lhs.trim();
    loop {
        let len = rest.bytes().take_while(|b| is_ident_byte(*b)).count();
        if len == 0 {
            break;
        }
        names.push(&rest[..len]);
        rest = rest[len..].trim_start();
        match rest.strip_prefix(',') {
            Some(after) => rest = after.trim_start(),
            None => break,
        }
    }

    let ty = Some(rest.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    let values = rhs.map(|r| split_top_level(r, b',')).unwrap_or_default();

    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| ValueSpec {
            name: name.to_string(),
            ty: ty.clone(),
            value: values.get(i).map(|v| v.to_string()),
        })
        .collect()
}

fn parse_type_spec(text: &str) -> Option<ValueSpec> {
    let len = text.bytes().take_while(|b| is_ident_byte(*b)).count();
    if len == 0 {
        return None;
    }
    let ty = text[len..].trim();
    Some(ValueSpec {
        name: text[..len].to_string(),
        ty: Some(ty.to_string()).filter(|t| !t.is_empty()),
        value: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAME_GMX: &str = r#"
const (
	GopGamePkg = "github.com/goplus/gop/cl/internal/spx"
	GopClass = "Game"
	GopThis = "this"
)

func onInit() {
}
"#;

    #[test]
    fn test_parse_template_markers_and_hook() {
        let unit = parse_source("index.gmx", FileRole::Template, GAME_GMX).unwrap();
        assert_eq!(unit.decls.len(), 2);

        let consts = &unit.decls[0];
        assert_eq!(consts.kind, DeclKind::Const);
        assert_eq!(consts.name, None);
        assert_eq!(consts.location, SourceLocation { line: 2, column: 1 });
        let names: Vec<&str> = consts.specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["GopGamePkg", "GopClass", "GopThis"]);
        assert_eq!(consts.specs[1].string_literal().as_deref(), Some("Game"));

        let hook = &unit.decls[1];
        assert_eq!(hook.kind, DeclKind::Func);
        assert_eq!(hook.name.as_deref(), Some("onInit"));
        assert_eq!(hook.payload, "func onInit() {\n}");
        assert_eq!(hook.location.line, 8);
    }

    #[test]
    fn test_parse_imports() {
        let source = "package main\n\nimport (\n\t\"fmt\"\n\tspx \"github.com/goplus/spx\" // engine\n)\nimport \"strings\"\n";
        let unit = parse_source("a.spx", FileRole::Instance, source).unwrap();
        assert_eq!(unit.package_name.as_deref(), Some("main"));
        assert_eq!(unit.decls.len(), 2);
        assert!(unit.decls.iter().all(|d| d.kind == DeclKind::Import));

        let paths: Vec<&str> = unit.imports.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["fmt", "github.com/goplus/spx", "strings"]);
        assert_eq!(unit.imports[1].alias.as_deref(), Some("spx"));
        assert_eq!(unit.imports[2].location.line, 7);
    }

    #[test]
    fn test_parse_method_with_struct_result() {
        let source = "func (g *Game) Pos() struct{ X int } {\n\treturn struct{ X int }{}\n}\n";
        let unit = parse_source("index.gmx", FileRole::Template, source).unwrap();
        let method = &unit.decls[0];
        assert_eq!(method.name.as_deref(), Some("Pos"));
        assert_eq!(method.receiver.as_deref(), Some("(g *Game)"));
        assert!(method.is_method());
        assert_eq!(method.payload, source.trim_end());
    }

    #[test]
    fn test_braces_inside_literals_and_comments() {
        let source = "func onMsg(msg string) {\n\tprintln(\"}\", '{', `}`) // }\n\t/* { */\n}\n\nfunc next() {}\n";
        let unit = parse_source("a.spx", FileRole::Instance, source).unwrap();
        assert_eq!(unit.decls.len(), 2);
        assert!(unit.decls[0].payload.ends_with("/* { */\n}"));
        assert_eq!(unit.decls[1].payload, "func next() {}");
    }

    #[test]
    fn test_parse_value_specs() {
        let source = "var a, b int = 1, f(2, 3)\nconst Limit = 10 // max\nvar ready bool\n";
        let unit = parse_source("a.spx", FileRole::Instance, source).unwrap();

        let specs = &unit.decls[0].specs;
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].ty.as_deref(), Some("int"));
        assert_eq!(specs[1].value.as_deref(), Some("f(2, 3)"));
        assert_eq!(unit.decls[0].name, None);

        assert_eq!(unit.decls[1].name.as_deref(), Some("Limit"));
        assert_eq!(unit.decls[1].payload, "const Limit = 10");

        assert_eq!(unit.decls[2].specs[0].value, None);
        assert_eq!(unit.decls[2].specs[0].ty.as_deref(), Some("bool"));
    }

    #[test]
    fn test_comments_around_values_are_dropped() {
        let source = "const (\n\tGopClass = \"Game\" /* default */\n\tSpeed = /* px */ 4 // per tick\n)\nconst Solo = `x` /* note */\n";
        let unit = parse_source("index.gmx", FileRole::Template, source).unwrap();

        let specs = &unit.decls[0].specs;
        assert_eq!(specs[0].value.as_deref(), Some("\"Game\""));
        assert_eq!(specs[0].string_literal().as_deref(), Some("Game"));
        assert_eq!(specs[1].value.as_deref(), Some("4"));

        assert_eq!(unit.decls[1].payload, "const Solo = `x`");
        assert_eq!(unit.decls[1].specs[0].string_literal().as_deref(), Some("x"));
    }

    #[test]
    fn test_trailing_operator_continues_statement() {
        let source = "const X = 1 +\n\t2\nconst (\n\tA = 1 |\n\t\t2 // mask\n\tB, C = 3,\n\t\t4\n)\n";
        let unit = parse_source("a.spx", FileRole::Instance, source).unwrap();
        assert_eq!(unit.decls.len(), 2);

        assert_eq!(unit.decls[0].name.as_deref(), Some("X"));
        assert_eq!(unit.decls[0].payload, "const X = 1 +\n\t2");

        let names: Vec<&str> = unit.decls[1].declared_names();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(unit.decls[1].specs[0].value.as_deref(), Some("1 |\n\t\t2"));
        assert_eq!(unit.decls[1].specs[2].value.as_deref(), Some("4"));
    }

    #[test]
    fn test_comparison_is_not_assignment() {
        assert_eq!(find_assign("ok = a == b"), Some(3));
        assert_eq!(find_assign("x int"), None);
        assert_eq!(find_assign("s = \"a=b\""), Some(2));
    }

    #[test]
    fn test_parse_type_decls() {
        let source = "type Point struct {\n\tX, Y int\n}\n\ntype (\n\tID int\n\tName = string\n)\n";
        let unit = parse_source("a.spx", FileRole::Instance, source).unwrap();
        assert_eq!(unit.decls[0].name.as_deref(), Some("Point"));
        let names: Vec<&str> = unit.decls[1].declared_names();
        assert_eq!(names, vec!["ID", "Name"]);
    }

    #[test]
    fn test_unclosed_body_reports_location() {
        let err = parse_source("a.spx", FileRole::Instance, "\nfunc broken() {\n\tsay(1)\n").unwrap_err();
        assert_eq!(err.code, ERR_PARSE);
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unclosed"));
    }

    #[test]
    fn test_unknown_top_level_token() {
        let err = parse_source("a.spx", FileRole::Instance, "const A = 1\nonStart()\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("onStart"));
    }

    #[test]
    fn test_empty_source() {
        let unit = parse_source("a.spx", FileRole::Instance, "\n// nothing here\n").unwrap();
        assert!(unit.decls.is_empty());
        assert!(unit.imports.is_empty());
    }
}
