//! Declaration Synthesizer — turns a `Symbol` into the text that should
//! stand in for it when some other partial unit needs it declared but not
//! defined.
//!
//! The headline rule (source-of-truth prototype preferred): if the tag
//! stream or source scan already captured a hand-written prototype for a
//! function, its verbatim text is always used over anything this module
//! could derive from the function body — hand-written prototypes carry
//! qualifiers (`const`, array-decayed parameters, attribute macros) that a
//! mechanical body-to-declaration conversion would otherwise have to
//! reinvent, and would inevitably get wrong in some corner case.

use tracing::trace;

use crate::lexer::scan_balanced;
use crate::symtab::{Frozen, Kind, PuKey, PuKeySet, Symbol};

/// True for tag names the preprocessor or compiler generates internally
/// (e.g. an anonymous struct tag embedded in a typedef gets a `__foo_s`
/// placeholder name from some tag extractors). These never need their own
/// standalone declaration — they only ever appear nested inside the
/// declaration that already carries their full definition.
pub fn is_compiler_internal_tag(name: &str) -> bool {
    name.starts_with("__")
}

/// True when `symbol` (a typedef) mentions a `struct __foo` / `union __foo`
/// tag that has no definition anywhere in the table — a reserved
/// implementation type no tag extractor will ever index. Emitting the
/// typedef anyway would name a type the PU never declares, so it's skipped
/// entirely: the PU simply won't use it (spec §4.F "typedef-with-internal-
/// struct skip").
pub fn references_unavailable_internal_struct(table: &Frozen, symbol: &Symbol) -> bool {
    static STRUCT_OR_UNION: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
        regex::Regex::new(r"\b(?:struct|union)\s+(__\w+)\b").unwrap()
    });
    STRUCT_OR_UNION
        .captures_iter(&symbol.raw_text)
        .map(|c| c.get(1).unwrap().as_str())
        .any(|tag| {
            !table.symbols.contains_key(&PuKey::new(Kind::Struct, tag, &symbol.key.file))
                && !table.symbols.contains_key(&PuKey::new(Kind::Union, tag, &symbol.key.file))
                && !table.nested_struct_to_parent.contains_key(tag)
                && !table.struct_alias.contains_key(tag)
        })
}

/// Remove a leading `static` storage-class qualifier from a declaration
/// meant for a partial unit other than the one that owns the definition.
/// `static` gives a symbol file-scope linkage in its original translation
/// unit; once that file is split across several independently-compiled
/// `.pu.c` outputs, a PU that doesn't own the definition needs external
/// linkage to reach it at all — carrying `static` into the cross-PU
/// declaration would make the reference silently unresolvable at link
/// time instead of just re-declaring the name.
fn strip_leading_static(text: &str) -> String {
    let trimmed = text.trim_start();
    match trimmed.strip_prefix("static") {
        Some(rest) if rest.starts_with(char::is_whitespace) => rest.trim_start().to_string(),
        _ => text.to_string(),
    }
}

/// Strip an `always_inline`/`inline` qualifier from a declaration's text.
/// A function marked `always_inline` in its definition must not carry that
/// qualifier onto a declaration-only copy in another partial unit, since
/// that unit never sees the body to inline.
fn strip_inline_qualifiers(sig: &str) -> String {
    let mut out = sig.to_string();
    for kw in ["__always_inline__", "always_inline", "__inline__", "inline"] {
        out = out.replace(kw, "");
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Locate the `(` that opens this symbol's own parameter list by anchoring
/// on its own name rather than blindly taking the first `(` in `raw_text`.
/// A tag's code span can (rarely) still contain more than one function
/// after the scanner's merged-span repair misses a case (spec §4.F
/// "multiple-function code spans" — ctags merges two adjacent functions
/// when a function-pointer return type confuses its parser); anchoring on
/// the name means this still extracts *this* symbol's signature rather
/// than whichever function happens to come first in the span.
fn find_own_signature_paren(symbol: &Symbol) -> Option<usize> {
    let name = symbol.key.name.as_str();
    let mut from = 0usize;
    while let Some(rel) = symbol.raw_text[from..].find(name) {
        let at = from + rel;
        let before_ok = symbol.raw_text[..at]
            .chars()
            .next_back()
            .map(|c| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(true);
        let after = &symbol.raw_text[at + name.len()..];
        let trimmed = after.trim_start();
        if before_ok && trimmed.starts_with('(') {
            return Some(at + name.len() + (after.len() - trimmed.len()));
        }
        from = at + name.len();
    }
    symbol.raw_text.find('(')
}

/// Convert a function definition's raw text into a declaration, ending the
/// signature with a semicolon on the same line as the closing paren rather
/// than preserving the body's original line breaks — emitting the
/// semicolon on its own line after a multi-line signature produced
/// unparsable output from some downstream tools expecting one logical
/// declaration per line.
///
/// A function-pointer-returning declarator wraps the name in its own
/// parenthesized group with a trailing parameter list of its own, e.g.
/// `void (*unixDlSym(int *NotUsed, void *p, const char*zSym))(void)`: the
/// name's own parameter list closes well before the declarator does. After
/// that first `scan_balanced`, keep consuming an immediately-following `)`
/// (closing an enclosing group opened before the name) or `(...)` (a
/// trailing parameter list) until neither follows, so the declaration
/// keeps every paren the declarator actually needs instead of stopping at
/// the first closing one.
fn convert_body_to_declaration(symbol: &Symbol) -> Option<String> {
    let open = find_own_signature_paren(symbol)?;
    let mut end = scan_balanced(&symbol.raw_text, open, '(', ')')?;
    loop {
        let rest = &symbol.raw_text[end..];
        let trimmed = rest.trim_start();
        let skipped = rest.len() - trimmed.len();
        match trimmed.chars().next() {
            Some(')') => end += skipped + 1,
            Some('(') => end = scan_balanced(&symbol.raw_text, end + skipped, '(', ')')?,
            _ => break,
        }
    }
    let sig = &symbol.raw_text[..end];
    let sig = strip_inline_qualifiers(sig);
    Some(format!("{};", sig.trim()))
}

/// Derive an `extern` declaration for a variable definition by dropping any
/// initializer and ensuring an `extern` qualifier is present.
fn extern_variable_declaration(symbol: &Symbol) -> String {
    let body = symbol
        .raw_text
        .split('=')
        .next()
        .unwrap_or(&symbol.raw_text)
        .trim_end_matches(';')
        .trim();
    let body = strip_leading_static(body);
    if body.trim_start().starts_with("extern") {
        format!("{};", body)
    } else {
        format!("extern {};", body)
    }
}

/// A return-type-aware fallback for a function PUS can't otherwise find a
/// declaration for: `int NAME();` unless a typedef return type is already
/// known, matching the K&R-era convention of defaulting an unspecified
/// return type to `int`. Never falls back to `void *` when a real return
/// type is known — a caller dereferencing the result (`f(x)->field`) would
/// otherwise fail to compile even though the actual type was available.
pub fn kr_stub(name: &str, return_type: Option<&str>) -> String {
    match return_type {
        Some(ty) => format!("{} {}();", ty.trim(), name),
        None => format!("int {}();", name),
    }
}

/// The return-type typedef known for `key`'s symbol, but only when that
/// typedef is itself part of this PU's `necessary` set — otherwise the
/// stub would name a type this PU never declares.
fn known_return_type(table: &Frozen, key: &PuKey, necessary: &PuKeySet) -> Option<String> {
    let symbol = table.get(key)?;
    let ty = symbol.return_type_text.as_deref()?.trim();
    let ty_name = ty.trim_end_matches('*').trim();
    let ty_key = PuKey::new(Kind::Typedef, ty_name, &key.file);
    necessary.contains(&ty_key).then(|| ty.to_string())
}

/// Produce the declaration text that should be emitted for `key` when some
/// other partial unit needs it but doesn't own its definition. `necessary`
/// is the owning PU's closed dependency set, consulted only for the K&R
/// stub's return-type fallback (spec §4.F).
pub fn declaration_for(table: &Frozen, key: &PuKey, necessary: &PuKeySet) -> String {
    match key.kind {
        Kind::Function => {
            let proto_key = PuKey::new(Kind::Prototype, &key.name, &key.file);
            let decl = if let Some(proto) = table.get(&proto_key) {
                trace!(name = %key.name, "using source prototype verbatim over synthesized declaration");
                proto.raw_text.trim().to_string()
            } else {
                match table.get(key).and_then(convert_body_to_declaration) {
                    Some(decl) => decl,
                    None => kr_stub(&key.name, known_return_type(table, key, necessary).as_deref()),
                }
            };
            strip_leading_static(&decl)
        }
        Kind::Prototype => {
            let decl = table.get(key).map(|s| s.raw_text.trim().to_string()).unwrap_or_else(|| {
                kr_stub(&key.name, known_return_type(table, key, necessary).as_deref())
            });
            strip_leading_static(&decl)
        }
        Kind::Variable | Kind::ExternVar => table
            .get(key)
            .map(extern_variable_declaration)
            .unwrap_or_else(|| format!("extern int {};", key.name)),
        Kind::Typedef | Kind::Struct | Kind::Union | Kind::Enum | Kind::Macro => table
            .get(key)
            .map(|s| s.raw_text.trim().to_string())
            .unwrap_or_default(),
        Kind::Enumerator => {
            // An enumerator has no standalone declaration; its owning enum
            // (resolved by the dependency resolver's cascade rule) is what
            // gets declared.
            String::new()
        }
    }
}

/// Does `key`'s definition live in `pu_file`, i.e. is it something this
/// partial unit can emit as a body rather than a declaration?
pub fn is_owned_by(key: &PuKey, pu_file: &str) -> bool {
    key.file == pu_file
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symtab::{PuKey, Symbol, SymbolTable};

    #[test]
    fn converts_single_line_function_body() {
        let symbol = Symbol::new(
            PuKey::new(Kind::Function, "add", "f.i"),
            1,
            1,
            "int add(int a, int b) { return a + b; }".to_string(),
        );
        assert_eq!(
            convert_body_to_declaration(&symbol).unwrap(),
            "int add(int a, int b);"
        );
    }

    #[test]
    fn converts_multiline_kr_style_signature() {
        let symbol = Symbol::new(
            PuKey::new(Kind::Function, "replace_makeprg", "f.i"),
            1,
            4,
            "static char_u *\nreplace_makeprg(exarg_T *eap, char_u *p)\n{\n    return p;\n}"
                .to_string(),
        );
        assert_eq!(
            convert_body_to_declaration(&symbol).unwrap(),
            "static char_u * replace_makeprg(exarg_T *eap, char_u *p);"
        );
    }

    #[test]
    fn converts_function_pointer_returning_signature() {
        let symbol = Symbol::new(
            PuKey::new(Kind::Function, "unixDlSym", "f.i"),
            1,
            4,
            "static void (*unixDlSym(int *NotUsed, void *p, const char*zSym))(void){\n  (void)(NotUsed);\n  return 0;\n}"
                .to_string(),
        );
        assert_eq!(
            convert_body_to_declaration(&symbol).unwrap(),
            "static void (*unixDlSym(int *NotUsed, void *p, const char*zSym))(void);"
        );
    }

    #[test]
    fn strips_always_inline_from_declaration() {
        let symbol = Symbol::new(
            PuKey::new(Kind::Function, "fast", "f.i"),
            1,
            1,
            "static __always_inline__ int fast(void) { return 1; }".to_string(),
        );
        let decl = convert_body_to_declaration(&symbol).unwrap();
        assert!(!decl.contains("inline"));
    }

    #[test]
    fn prefers_verbatim_prototype_over_conversion() {
        let mut table = SymbolTable::default();
        table.insert(Symbol::new(
            PuKey::new(Kind::Prototype, "some_handler", "bug62.i"),
            1,
            1,
            "int some_handler(void *ctx, int flags);".to_string(),
        ));
        table.insert(Symbol::new(
            PuKey::new(Kind::Function, "some_handler", "bug62.i"),
            10,
            12,
            "int some_handler(void *c, int f) { return 0; }".to_string(),
        ));
        let frozen = table.freeze();
        let decl = declaration_for(
            &frozen,
            &PuKey::new(Kind::Function, "some_handler", "bug62.i"),
            &PuKeySet::new(),
        );
        assert_eq!(decl, "int some_handler(void *ctx, int flags);");
    }

    #[test]
    fn variadic_variable_declaration_drops_initializer() {
        let symbol = Symbol::new(
            PuKey::new(Kind::Variable, "g_count", "f.i"),
            1,
            1,
            "int g_count = 0;".to_string(),
        );
        assert_eq!(extern_variable_declaration(&symbol), "extern int g_count;");
    }

    #[test]
    fn static_variable_declaration_drops_static_not_just_initializer() {
        // "extern static X;" is a duplicate-storage-class compile error —
        // crossing a PU boundary has to drop `static`, not stack it with
        // `extern`.
        let symbol = Symbol::new(
            PuKey::new(Kind::Variable, "handlers", "f.i"),
            1,
            1,
            "static Handler handlers[] = { { some_handler, 1 } };".to_string(),
        );
        assert_eq!(
            extern_variable_declaration(&symbol),
            "extern Handler handlers[];"
        );
    }

    #[test]
    fn static_function_declaration_drops_static_for_other_pus() {
        let mut table = SymbolTable::default();
        table.insert(Symbol::new(
            PuKey::new(Kind::Function, "unixDlClose", "f.i"),
            1,
            3,
            "static void unixDlClose(int *NotUsed, void *pHandle){\n  (void)(NotUsed);\n}"
                .to_string(),
        ));
        let frozen = table.freeze();
        let decl = declaration_for(
            &frozen,
            &PuKey::new(Kind::Function, "unixDlClose", "f.i"),
            &PuKeySet::new(),
        );
        assert_eq!(decl, "void unixDlClose(int *NotUsed, void *pHandle);");
    }

    #[test]
    fn kr_stub_uses_known_return_type_typedef_when_available() {
        // Neither a prototype nor a parseable signature is available, but
        // the function's typeref names a project typedef this PU already
        // has in its necessary set — the stub must use it, never `int`
        // (which would break a caller doing `f(x)->field`) and never
        // `void *` (spec §4.F).
        let mut table = SymbolTable::default();
        let mut fn_sym = Symbol::new(
            PuKey::new(Kind::Function, "make_cfg", "f.i"),
            1,
            1,
            "garbled-span-with-no-parens".to_string(),
        );
        fn_sym.return_type_text = Some("cfg_t *".to_string());
        table.insert(fn_sym);
        table.insert(Symbol::new(
            PuKey::new(Kind::Typedef, "cfg_t", "f.i"),
            2,
            2,
            "typedef struct cfg cfg_t;".to_string(),
        ));
        let frozen = table.freeze();
        let mut necessary = PuKeySet::new();
        necessary.insert(PuKey::new(Kind::Typedef, "cfg_t", "f.i"));

        let decl = declaration_for(
            &frozen,
            &PuKey::new(Kind::Function, "make_cfg", "f.i"),
            &necessary,
        );
        assert_eq!(decl, "cfg_t * make_cfg();");
    }

    #[test]
    fn kr_stub_falls_back_to_int_when_return_type_not_in_necessary() {
        let mut table = SymbolTable::default();
        let mut fn_sym = Symbol::new(
            PuKey::new(Kind::Function, "make_cfg", "f.i"),
            1,
            1,
            "garbled-span-with-no-parens".to_string(),
        );
        fn_sym.return_type_text = Some("cfg_t *".to_string());
        table.insert(fn_sym);
        let frozen = table.freeze();
        let decl = declaration_for(
            &frozen,
            &PuKey::new(Kind::Function, "make_cfg", "f.i"),
            &PuKeySet::new(),
        );
        assert_eq!(decl, "int make_cfg();");
    }
}
