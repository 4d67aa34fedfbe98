//! Source Scanner — a second pass over the preprocessed source that fills
//! gaps the external tag extractor misses (spec §4.C): anonymous-enum
//! enumerators, static function-pointer variables, K&R-style headers,
//! multi-name typedefs, nested struct tags, and inline struct aliases.
//!
//! Every pass here is a targeted text scan, not a parser — consistent with
//! the Lexer's "no AST" contract. Each pass is conservative: missing a gap
//! costs a K&R `int NAME();` fallback later, never a compile failure, so
//! when a pattern is ambiguous these scans prefer to skip it rather than
//! guess wrong (spec §7's "never abort" propagation policy, applied here to
//! scanning rather than closure).

use regex::Regex;
use std::sync::LazyLock;

use crate::lexer::{find_top_level_char, scan_balanced};
use crate::symtab::{Kind, PuKey, Symbol, SymbolTable};

static ANON_ENUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\benum\s*\{").unwrap());
static STATIC_FNPTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*static\b[^;{}()]*\*\s*\(\s*\(\s*\*\s*([A-Za-z_]\w*)\s*\)\s*\(").unwrap()
});
static STRUCT_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bstruct\s+([A-Za-z_]\w*)\s*\{").unwrap());
static TYPEDEF_START: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\btypedef\b").unwrap());
static TRAILING_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z_]\w*)\s*(?:\[[^\]]*\])?\s*(?:=.*)?$").unwrap());

/// Run every gap-filling pass for one file's source text.
pub fn scan(table: &mut SymbolTable, source: &str, file: &str) {
    scan_anonymous_enums(table, source, file);
    scan_static_fn_ptr_vars(table, source, file);
    scan_kr_headers(table, source, file);
    scan_multi_name_typedefs(table, source, file);
    scan_nested_structs(table, source, file);
    scan_inline_struct_aliases(table, source, file);
    repair_merged_function_spans(table, file);
}

fn line_of(source: &str, byte_pos: usize) -> usize {
    source[..byte_pos].matches('\n').count() + 1
}

// ---------------------------------------------------------------------------
// 4.C.1 — anonymous-enum enumerators
// ---------------------------------------------------------------------------

fn scan_anonymous_enums(table: &mut SymbolTable, source: &str, file: &str) {
    for m in ANON_ENUM.find_iter(source) {
        let open_brace = match source[m.start()..].find('{') {
            Some(off) => m.start() + off,
            None => continue,
        };
        let Some(close) = scan_balanced(source, open_brace, '{', '}') else {
            continue;
        };
        let body = &source[open_brace + 1..close - 1];
        let line = line_of(source, m.start());
        let enum_key = PuKey::new(Kind::Enum, format!("__anon_{line}"), file);

        if !table.symbols.contains_key(&enum_key) {
            let full_text = source[m.start()..close].to_string();
            let mut enum_sym = Symbol::new(enum_key.clone(), line, line_of(source, close), full_text);
            enum_sym.is_static = false;
            table.insert(enum_sym);
        }

        for part in split_top_level(body, ',') {
            let name_end = part
                .find(|c: char| c == '=' || c.is_whitespace())
                .unwrap_or(part.len());
            let name = part[..name_end].trim();
            if name.is_empty() {
                continue;
            }
            let enumerator_key = PuKey::new(Kind::Enumerator, name, file);
            let mut sym = Symbol::new(enumerator_key.clone(), line, line, part.trim().to_string());
            sym.scope = Some(enum_key.clone());
            table.insert(sym);
            table.enumerator_to_enum.insert(name.to_string(), enum_key.clone());
        }
    }
}

/// Split on a separator at bracket depth 0, ignoring separators inside
/// `()`/`[]`/`{}` — used for enumerator lists and typedef declarator lists.
fn split_top_level(text: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(text[start..i].to_string());
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(text[start..].to_string());
    parts
}

// ---------------------------------------------------------------------------
// 4.C.2 — static function-pointer variables
// ---------------------------------------------------------------------------

fn scan_static_fn_ptr_vars(table: &mut SymbolTable, source: &str, file: &str) {
    for caps in STATIC_FNPTR.captures_iter(source) {
        let whole = caps.get(0).unwrap();
        let name = caps.get(1).unwrap().as_str().to_string();
        let key = PuKey::new(Kind::Variable, &name, file);
        if table.symbols.contains_key(&key) {
            continue; // ctags already has it
        }
        let Some(semi) = find_top_level_char(source, whole.start(), ';') else {
            continue;
        };
        let raw_text = source[whole.start()..=semi].to_string();
        let line = line_of(source, whole.start());
        let mut sym = Symbol::new(key, line, line_of(source, semi), raw_text);
        sym.is_static = true;
        table.insert(sym);
    }
}

// ---------------------------------------------------------------------------
// 4.C.3 — K&R-style return type on the previous line
// ---------------------------------------------------------------------------

fn scan_kr_headers(table: &mut SymbolTable, source: &str, file: &str) {
    let lines: Vec<&str> = source.lines().collect();
    static KR_HEADER: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^([A-Za-z_]\w*)\s*\(").unwrap());

    for (idx, line) in lines.iter().enumerate() {
        let Some(caps) = KR_HEADER.captures(line) else {
            continue;
        };
        let name = caps.get(1).unwrap().as_str();
        let key = PuKey::new(Kind::Function, name, file);
        let Some(symbol) = table.symbols.get(&key) else {
            continue;
        };
        // Only a K&R header if this function's own tagged line is this line
        // (1-indexed) and the previous non-preprocessor, non-blank line
        // does not itself end with `;`, `{`, or `}` (which would mean it's
        // unrelated code, not a return-type line).
        if symbol.line_start != idx + 1 {
            continue;
        }
        let mut prev_idx = idx;
        let mut prefix = None;
        while prev_idx > 0 {
            prev_idx -= 1;
            let prev = lines[prev_idx].trim();
            if prev.is_empty() || prev.starts_with('#') {
                continue;
            }
            if !prev.ends_with(';') && !prev.ends_with('{') && !prev.ends_with('}') {
                prefix = Some(prev.to_string());
            }
            break;
        }
        if let Some(prefix) = prefix {
            let sym = table.symbols.get_mut(&key).unwrap();
            // Fold the recovered return-type line into raw_text itself (not
            // just the side-band `signature_prefix` field) so both the
            // owned body and any declaration synthesized from it carry the
            // real return type — without this, `void\nf(void){...}`'s
            // tagged span starts at `f(void)` and a synthesized declaration
            // would default to implicit `int`, which is exactly the
            // conflict this gap-fill pass exists to prevent (spec §8
            // scenario 2).
            sym.raw_text = format!("{prefix}\n{}", sym.raw_text);
            sym.line_start -= 1;
            sym.signature_prefix = Some(prefix);
            sym.is_kr_style = true;
        }
    }
}

// ---------------------------------------------------------------------------
// 4.C.4 — multi-name typedefs
// ---------------------------------------------------------------------------

fn scan_multi_name_typedefs(table: &mut SymbolTable, source: &str, file: &str) {
    for m in TYPEDEF_START.find_iter(source) {
        let Some(semi) = find_top_level_char(source, m.start(), ';') else {
            continue;
        };
        let raw_text = source[m.start()..=semi].to_string();
        let body = &source[m.end()..semi];
        let declarators = split_top_level(body, ',');
        if declarators.len() < 2 {
            continue; // single-name typedef, ctags already handles it
        }
        let line = line_of(source, m.start());

        // First segment: `BASE *A` or `BASE A` — its trailing identifier is
        // the first declared name. Remaining segments are bare declarators
        // (`*B`, `C[4]`, ...), each contributing one more name.
        let mut names = Vec::new();
        if let Some(caps) = TRAILING_IDENT.captures(declarators[0].trim()) {
            names.push(caps.get(1).unwrap().as_str().to_string());
        }
        for decl in &declarators[1..] {
            if let Some(caps) = TRAILING_IDENT.captures(decl.trim()) {
                names.push(caps.get(1).unwrap().as_str().to_string());
            }
        }

        for name in names {
            let key = PuKey::new(Kind::Typedef, &name, file);
            if table.symbols.contains_key(&key) {
                continue;
            }
            let sym = Symbol::new(key, line, line_of(source, semi), raw_text.clone());
            table.insert(sym);
        }
    }
}

// ---------------------------------------------------------------------------
// 4.C.5 / 4.C.6 — nested struct tags and inline struct aliases
// ---------------------------------------------------------------------------

fn scan_nested_structs(table: &mut SymbolTable, source: &str, file: &str) {
    for caps in STRUCT_OPEN.captures_iter(source) {
        let whole = caps.get(0).unwrap();
        let tag = caps.get(1).unwrap().as_str().to_string();
        let Some(open) = source[whole.start()..].find('{').map(|o| whole.start() + o) else {
            continue;
        };
        let Some(close) = scan_balanced(source, open, '{', '}') else {
            continue;
        };
        let line_start = line_of(source, whole.start());
        let line_end = line_of(source, close);

        // Find the tightest enclosing existing symbol in this file whose
        // span strictly contains this struct's span.
        let parent = table
            .symbols
            .values()
            .filter(|s| {
                s.key.file == file
                    && s.key.name != tag
                    && s.line_start <= line_start
                    && s.line_end >= line_end
                    && (s.line_start < line_start || s.line_end > line_end)
            })
            .min_by_key(|s| s.line_end.saturating_sub(s.line_start))
            .map(|s| s.key.clone());

        if let Some(parent_key) = parent {
            table
                .nested_struct_to_parent
                .insert(tag.clone(), parent_key.clone());
            table.interner.insert(&tag, parent_key);
        }
    }
}

fn scan_inline_struct_aliases(table: &mut SymbolTable, source: &str, file: &str) {
    for caps in STRUCT_OPEN.captures_iter(source) {
        let whole = caps.get(0).unwrap();
        let tag = caps.get(1).unwrap().as_str().to_string();

        let struct_key = PuKey::new(Kind::Struct, &tag, file);
        if table.symbols.contains_key(&struct_key) {
            continue; // has a direct tag, no alias needed
        }
        if table.struct_alias.contains_key(&tag) {
            continue;
        }
        if table.nested_struct_to_parent.contains_key(&tag) {
            // already resolves through its enclosing symbol; the "typedef
            // appears somewhere earlier in the file" heuristic below can't
            // tell a nested member's own declarator (`directive` here) from
            // a real typedef alias, so defer to the scan pass that already
            // got this tag right.
            continue;
        }

        let Some(open) = source[whole.start()..].find('{').map(|o| whole.start() + o) else {
            continue;
        };
        let Some(close) = scan_balanced(source, open, '{', '}') else {
            continue;
        };
        let Some(semi) = find_top_level_char(source, close, ';') else {
            continue;
        };
        let tail = source[close..semi].trim();
        let Some(ident_caps) = TRAILING_IDENT.captures(tail) else {
            continue;
        };
        let alias_name = ident_caps.get(1).unwrap().as_str().to_string();

        // Does `typedef` precede this `struct` on the same statement?
        let stmt_start = source[..whole.start()]
            .rfind(|c| c == ';' || c == '}')
            .map(|p| p + 1)
            .unwrap_or(0);
        let prefix = &source[stmt_start..whole.start()];
        let is_typedef = prefix.trim_start().starts_with("typedef");

        let owner_kind = if is_typedef {
            Kind::Typedef
        } else {
            Kind::Variable
        };
        let owner_key = PuKey::new(owner_kind, &alias_name, file);
        table.struct_alias.insert(tag, owner_key);
    }
}

// ---------------------------------------------------------------------------
// 4.F "multiple-function code spans" — ctags occasionally merges two
// adjacent function definitions into one tag's line range when a
// function-pointer return type confuses its parser (the unixDlSym/
// unixDlClose pattern). This pass splits such a merged span back into one
// symbol per function so each gets its own raw_text and declaration.
// ---------------------------------------------------------------------------

const CONTROL_KEYWORDS: &[&str] = &["if", "for", "while", "switch", "do", "else"];

/// Find the byte offset of the next brace that opens at top level (outside
/// any string/char literal or comment), scanning forward from `from`.
fn find_top_level_open_brace(text: &str, from: usize) -> Option<usize> {
    #[derive(Clone, Copy, PartialEq)]
    enum St {
        Normal,
        Char,
        Str,
        Line,
        Block,
    }
    let mut state = St::Normal;
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut i = chars.iter().position(|&(b, _)| b >= from)?;
    while i < chars.len() {
        let (pos, c) = chars[i];
        match state {
            St::Line => {
                if c == '\n' {
                    state = St::Normal;
                }
            }
            St::Block => {
                if c == '*' && chars.get(i + 1).map(|&(_, c2)| c2) == Some('/') {
                    state = St::Normal;
                    i += 1;
                }
            }
            St::Char | St::Str => {
                let quote = if state == St::Char { '\'' } else { '"' };
                if c == '\\' {
                    i += 1;
                } else if c == quote {
                    state = St::Normal;
                }
            }
            St::Normal => match c {
                '/' if chars.get(i + 1).map(|&(_, c2)| c2) == Some('/') => state = St::Line,
                '/' if chars.get(i + 1).map(|&(_, c2)| c2) == Some('*') => state = St::Block,
                '\'' => state = St::Char,
                '"' => state = St::Str,
                '{' => return Some(pos),
                _ => {}
            },
        }
        i += 1;
    }
    None
}

/// Every top-level `{...}` span in `text`, in order.
fn find_top_level_braces(text: &str) -> Vec<(usize, usize)> {
    let mut blocks = Vec::new();
    let mut from = 0usize;
    while let Some(open) = find_top_level_open_brace(text, from) {
        let Some(close) = scan_balanced(text, open, '{', '}') else {
            break;
        };
        blocks.push((open, close));
        from = close;
    }
    blocks
}

/// The function name a signature `head` declares — the first identifier
/// directly followed by `(` that isn't a control-flow keyword. This finds
/// the right name even for a function-pointer-returning signature like
/// `void (*unixDlSym(int *NotUsed, void *p, const char *zSym))(void)`,
/// since `unixDlSym` is still the first identifier adjacent to its own
/// parameter list reading left to right.
fn function_name_in_head(head: &str) -> Option<String> {
    static FN_HEAD_IDENT: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"([A-Za-z_]\w*)\s*\(").unwrap());
    for caps in FN_HEAD_IDENT.captures_iter(head) {
        let name = caps.get(1).unwrap().as_str();
        if !CONTROL_KEYWORDS.contains(&name) && !crate::lexer::C_KEYWORDS.contains(&name) {
            return Some(name.to_string());
        }
    }
    None
}

fn repair_merged_function_spans(table: &mut SymbolTable, file: &str) {
    let mut updates: Vec<(PuKey, usize, usize, String)> = Vec::new();
    let mut new_symbols: Vec<Symbol> = Vec::new();

    for symbol in table.symbols.values() {
        if symbol.key.kind != Kind::Function || symbol.key.file != file {
            continue;
        }
        let blocks = find_top_level_braces(&symbol.raw_text);
        if blocks.len() <= 1 {
            continue; // the common case: one function, nothing to repair
        }

        let mut found_self = false;
        for &(open, close) in &blocks {
            let head_start = symbol.raw_text[..open]
                .rfind('}')
                .map(|p| p + 1)
                .unwrap_or(0);
            let head = &symbol.raw_text[head_start..open];
            let Some(name) = function_name_in_head(head) else {
                continue;
            };
            let text = symbol.raw_text[head_start..close].trim().to_string();
            let line_start =
                symbol.line_start + symbol.raw_text[..head_start].matches('\n').count();
            let line_end = symbol.line_start + symbol.raw_text[..close].matches('\n').count();

            if name == symbol.key.name {
                found_self = true;
                updates.push((symbol.key.clone(), line_start, line_end, text));
            } else {
                let key = PuKey::new(Kind::Function, &name, file);
                if table.symbols.contains_key(&key) {
                    continue; // already has its own tag; nothing to recover
                }
                let mut sym = Symbol::new(key, line_start, line_end, text);
                sym.is_static = symbol.is_static;
                new_symbols.push(sym);
            }
        }
        if !found_self {
            updates.retain(|(k, ..)| k != &symbol.key);
        }
    }

    for (key, line_start, line_end, text) in updates {
        if let Some(sym) = table.symbols.get_mut(&key) {
            sym.line_start = line_start;
            sym.line_end = line_end;
            sym.raw_text = text;
        }
    }
    for sym in new_symbols {
        table.insert(sym);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symtab::SymbolTable;

    #[test]
    fn anonymous_enum_enumerators_link_to_synthetic_parent() {
        let src = "enum {\n DRCTV_NONE,\n DRCTV_DEFINE,\n DRCTV_HASH\n};\n";
        let mut table = SymbolTable::default();
        scan(&mut table, src, "bug2.i");
        let enum_key = table
            .enumerator_to_enum
            .get("DRCTV_DEFINE")
            .cloned()
            .expect("enumerator should be linked");
        assert_eq!(enum_key.kind, Kind::Enum);
        assert!(table.symbols.contains_key(&enum_key));
    }

    #[test]
    fn multi_name_typedef_produces_two_symbols() {
        let src = "typedef struct X *A, *B;\n";
        let mut table = SymbolTable::default();
        scan(&mut table, src, "f.i");
        assert!(table
            .symbols
            .contains_key(&PuKey::new(Kind::Typedef, "A", "f.i")));
        assert!(table
            .symbols
            .contains_key(&PuKey::new(Kind::Typedef, "B", "f.i")));
    }

    #[test]
    fn nested_struct_registered_under_parent() {
        let src = "typedef struct sCppState {\n int x;\n struct sDirective {\n  int y;\n } directive;\n} cppState;\n";
        let mut table = SymbolTable::default();
        // seed the parent as a typedef symbol the way ctags would
        let outer = PuKey::new(Kind::Typedef, "cppState", "f.i");
        table.insert(Symbol::new(outer.clone(), 1, 6, src.to_string()));
        scan(&mut table, src, "f.i");
        let parent = table
            .nested_struct_to_parent
            .get("sDirective")
            .cloned()
            .expect("nested struct should resolve to parent");
        assert_eq!(parent, outer);
    }

    #[test]
    fn static_function_pointer_variable_is_captured() {
        let src = "static int *((*dispatch)(int, int));\n";
        let mut table = SymbolTable::default();
        scan(&mut table, src, "f.i");
        assert!(table
            .symbols
            .contains_key(&PuKey::new(Kind::Variable, "dispatch", "f.i")));
    }

    #[test]
    fn merged_function_pointer_return_span_splits_in_two() {
        // ctags misparses `unixDlSym`'s function-pointer return type and
        // tags its whole span (including unixDlClose's body) under
        // unixDlClose's name, starting at unixDlSym's signature.
        let src = "static void (*unixDlSym(int *NotUsed, void *p, const char*zSym))(void){\n  (void)(NotUsed);\n  return 0;\n}\n\nstatic void unixDlClose(int *NotUsed, void *pHandle){\n  (void)(NotUsed);\n}\n";
        let mut table = SymbolTable::default();
        let merged_key = PuKey::new(Kind::Function, "unixDlClose", "f.i");
        table.insert(Symbol::new(merged_key.clone(), 1, 7, src.trim_end().to_string()));
        scan(&mut table, src, "f.i");

        let recovered = table
            .symbols
            .get(&PuKey::new(Kind::Function, "unixDlSym", "f.i"))
            .expect("unixDlSym should be recovered as its own symbol");
        assert!(recovered.raw_text.starts_with("static void (*unixDlSym"));
        assert!(!recovered.raw_text.contains("unixDlClose"));

        let close = table.symbols.get(&merged_key).unwrap();
        assert!(close.raw_text.starts_with("static void unixDlClose"));
        assert!(!close.raw_text.contains("unixDlSym"));
    }

    #[test]
    fn nested_struct_is_not_also_registered_as_an_inline_alias() {
        let src = "typedef struct sCppState {\n int x;\n struct sDirective {\n  int y;\n } directive;\n} cppState;\n";
        let mut table = SymbolTable::default();
        let outer = PuKey::new(Kind::Typedef, "cppState", "f.i");
        table.insert(Symbol::new(outer.clone(), 1, 6, src.to_string()));
        scan(&mut table, src, "f.i");
        // "directive" is sDirective's field name inside cppState, not a
        // standalone typedef alias for it — resolving "sDirective" must
        // still land on its enclosing symbol, not a fabricated
        // `typedef:directive` key that was never actually defined.
        assert!(!table.struct_alias.contains_key("sDirective"));
        assert_eq!(
            table.nested_struct_to_parent.get("sDirective"),
            Some(&outer)
        );
    }

    #[test]
    fn kr_header_folds_return_type_line_into_raw_text() {
        let src = "void\nlimit_screen_size(void)\n{\n    int x = 1;\n}\n";
        let mut table = SymbolTable::default();
        let key = PuKey::new(Kind::Function, "limit_screen_size", "f.i");
        // ctags records the name line as line_start, never the return-type
        // line above it.
        table.insert(Symbol::new(key.clone(), 2, 5, "limit_screen_size(void)\n{\n    int x = 1;\n}".to_string()));
        scan(&mut table, src, "f.i");
        let sym = table.symbols.get(&key).unwrap();
        assert!(sym.is_kr_style);
        assert!(sym.raw_text.starts_with("void\nlimit_screen_size(void)"));
        assert_eq!(sym.line_start, 1);
    }
}
