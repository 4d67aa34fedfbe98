//! Tag Ingestor — reads the external tag extractor's output (spec §3/§4.B)
//! and populates the Symbol Table.
//!
//! Format (spec §6): line-oriented, tab-separated `name`, `file`,
//! `search_pattern_or_line`, followed by zero or more `key:value` fields.
//! Recognized keys: `kind`, `line`, `end`, `signature`, `scope`, `typeref`,
//! `file` (a bare `file:` field marks static/file-scope visibility).
//! Unknown fields are ignored. A malformed line is skipped with a
//! `tracing::warn!` — never fatal (spec §7 error class 2).

use tracing::warn;

use crate::symtab::{Kind, PuKey, Symbol, SymbolTable};

/// One parsed tag-stream line.
#[derive(Debug, Clone)]
pub struct TagRecord {
    pub name: String,
    pub file: String,
    pub kind: Kind,
    pub line_start: usize,
    pub line_end: Option<usize>,
    pub signature: Option<String>,
    pub scope: Option<String>,
    pub typeref: Option<String>,
    pub is_static: bool,
}

/// Parse one line of the tag stream. Returns `None` (with a logged warning)
/// for anything that doesn't have at least the three positional fields and
/// a recognizable `kind:`.
fn parse_line(line: &str) -> Option<TagRecord> {
    if line.trim().is_empty() || line.starts_with('!') {
        return None; // ctags header/comment lines
    }
    let mut fields = line.split('\t');
    let name = fields.next()?.to_string();
    let file = fields.next()?.to_string();
    let _pattern = fields.next()?; // search pattern or line number, unused directly

    let mut kind = None;
    let mut line_start = None;
    let mut line_end = None;
    let mut signature = None;
    let mut scope = None;
    let mut typeref = None;
    let mut is_static = false;

    for field in fields {
        let field = field.trim_end_matches(';').trim_end_matches('"');
        let Some((key, value)) = field.split_once(':') else {
            continue; // unknown bare field, ignored
        };
        match key {
            "kind" => kind = Kind::parse(value),
            "line" => line_start = value.parse().ok(),
            "end" => line_end = value.parse().ok(),
            "signature" => signature = Some(value.to_string()),
            "scope" => scope = Some(value.to_string()),
            "typeref" => typeref = Some(value.to_string()),
            "file" => is_static = true,
            _ => {} // unrecognized key, ignored per spec §6
        }
    }

    let kind = kind?;
    let line_start = line_start?;

    Some(TagRecord {
        name,
        file,
        kind,
        line_start,
        line_end,
        signature,
        scope,
        typeref,
        is_static,
    })
}

/// Parse the whole tag stream, logging and skipping malformed lines.
pub fn parse_tag_stream(stream: &str) -> Vec<TagRecord> {
    let mut records = Vec::new();
    for (i, line) in stream.lines().enumerate() {
        match parse_line(line) {
            Some(r) => records.push(r),
            None if line.trim().is_empty() || line.starts_with('!') => {}
            None => warn!(line = i + 1, text = %line, "skipping malformed tag record"),
        }
    }
    records
}

/// Source text split by (1-indexed) line number, used to recover each
/// symbol's verbatim code span.
pub struct SourceLines<'a> {
    lines: Vec<&'a str>,
}

impl<'a> SourceLines<'a> {
    pub fn new(source: &'a str) -> Self {
        SourceLines {
            lines: source.lines().collect(),
        }
    }

    /// Verbatim text for 1-indexed lines `[start, end]`, inclusive.
    pub fn span(&self, start: usize, end: usize) -> String {
        let start = start.saturating_sub(1).min(self.lines.len());
        let end = end.min(self.lines.len());
        if start >= end {
            return self.lines.get(start).map(|s| s.to_string()).unwrap_or_default();
        }
        self.lines[start..end].join("\n")
    }
}

/// Ingest all tag records into `table`, recovering each symbol's raw text
/// from `source`. This is component B: the primary (but incomplete —
/// component C fills the rest) population pass over the tag stream.
pub fn ingest(table: &mut SymbolTable, records: &[TagRecord], source: &SourceLines) {
    for rec in records {
        let line_end = rec.line_end.unwrap_or(rec.line_start);
        let raw_text = source.span(rec.line_start, line_end);

        let key = PuKey::new(rec.kind, rec.name.clone(), rec.file.clone());
        let mut symbol = Symbol::new(key.clone(), rec.line_start, line_end, raw_text);
        symbol.is_static = rec.is_static;
        symbol.is_variadic = rec
            .signature
            .as_deref()
            .map(|s| s.contains("..."))
            .unwrap_or(false);
        symbol.is_always_inline = symbol.raw_text.contains("always_inline");
        symbol.return_type_text = rec.typeref.clone();

        if let Some(scope) = &rec.scope {
            if let Some((scope_kind, scope_name)) = scope.split_once(':') {
                if let Some(k) = Kind::parse(scope_kind) {
                    symbol.scope = Some(PuKey::new(k, scope_name, rec.file.clone()));
                }
            }
        }

        // spec §4.B: a struct captured only as an externvar whose raw text
        // is a bare forward declaration is a Pass-0 candidate.
        if rec.kind == Kind::ExternVar {
            let trimmed = symbol.raw_text.trim();
            if (trimmed.starts_with("struct ") || trimmed.starts_with("union "))
                && trimmed.ends_with(';')
            {
                symbol.is_forward_decl_candidate = true;
            }
        }

        table.insert(symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_record() {
        let line = "some_handler\tbug62.i\t35;\"\tkind:function\tline:35\tend:38";
        let rec = parse_line(line).expect("should parse");
        assert_eq!(rec.name, "some_handler");
        assert_eq!(rec.kind, Kind::Function);
        assert_eq!(rec.line_start, 35);
        assert_eq!(rec.line_end, Some(38));
        assert!(!rec.is_static);
    }

    #[test]
    fn static_flag_from_bare_file_field() {
        let line = "some_handler\tbug62.i\t35;\"\tkind:function\tline:35\tfile:";
        let rec = parse_line(line).expect("should parse");
        assert!(rec.is_static);
    }

    #[test]
    fn unknown_fields_are_ignored_not_fatal() {
        let line = "foo\tf.i\t1;\"\tkind:function\tline:1\tunknownfield:whatever";
        let rec = parse_line(line).expect("should still parse");
        assert_eq!(rec.name, "foo");
    }

    #[test]
    fn malformed_line_returns_none() {
        assert!(parse_line("not enough fields").is_none());
    }
}
