//! Dependency Resolver — for a PU's chosen root definitions, computes the
//! transitive `necessary` set of declarations required to compile them
//! (spec §4.E).
//!
//! The algorithm is a worklist closure over identifiers discovered in each
//! symbol's `raw_text`. It deliberately does not try to distinguish a call
//! from a bare value reference — a dispatch-table entry like
//! `{ some_handler, 1 }` is picked up by the very same identifier scan that
//! finds a call `some_handler(ctx)`, because `Symbol::references()` just
//! lists every identifier in the span (spec §4.F "function-pointer-value
//! captures" falls out of this for free, rather than needing a second pass).

use std::collections::{HashSet, VecDeque};

use regex::Regex;
use std::sync::LazyLock;
use tracing::{trace, warn};

use crate::symtab::{Frozen, Kind, PuKey, PuKeySet, Symbol};

static STRUCT_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bstruct\s+([A-Za-z_]\w*)\b").unwrap());
static UNION_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bunion\s+([A-Za-z_]\w*)\b").unwrap());

/// Resolve one identifier referenced from `from_file` to its candidate
/// `pu_key`s, deduplicated to at most one candidate per `Kind` (a function
/// and its prototype are different kinds of the same logical symbol and
/// both matter; two same-kind candidates surviving the interner's
/// same-file/static tie-break is the genuinely ambiguous case from spec §7
/// error class 4, and we log it and keep only the first).
fn resolve_identifier(table: &Frozen, id: &str, from_file: &str) -> Vec<PuKey> {
    let candidates = table.interner.lookup(id, from_file, table);
    let mut by_kind: Vec<(Kind, PuKey)> = Vec::new();
    for cand in candidates {
        if by_kind.iter().any(|(k, _)| *k == cand.kind) {
            warn!(name = id, file = from_file, kind = %cand.kind,
                "ambiguous reference, keeping first candidate by deterministic order");
            continue;
        }
        by_kind.push((cand.kind, cand));
    }
    by_kind.into_iter().map(|(_, k)| k).collect()
}

/// Compute the closed `necessary` set for `roots` (spec §4.E algorithm).
pub fn close_necessary(table: &Frozen, roots: &[PuKey]) -> PuKeySet {
    let mut necessary = PuKeySet::new();
    let mut seen: HashSet<PuKey> = roots.iter().cloned().collect();
    let mut worklist: VecDeque<PuKey> = roots.iter().cloned().collect();

    while let Some(key) = worklist.pop_front() {
        necessary.insert(key.clone());

        let Some(symbol) = table.get(&key) else {
            // spec §7 error class 3: unresolvable reference. The synthesizer
            // will fall back to a K&R stub for this name; closure just
            // continues.
            trace!(key = %key, "no symbol for necessary key, will stub at synth time");
            continue;
        };

        for id in symbol.references() {
            for resolved in resolve_identifier(table, id, &key.file) {
                if seen.insert(resolved.clone()) {
                    worklist.push_back(resolved);
                }
            }
        }

        cascade(table, &key, symbol, &mut seen, &mut worklist);
    }

    necessary
}

/// Cascading additions beyond direct identifier references (spec §4.E.5).
fn cascade(
    table: &Frozen,
    key: &PuKey,
    symbol: &Symbol,
    seen: &mut HashSet<PuKey>,
    worklist: &mut VecDeque<PuKey>,
) {
    let mut add = |k: PuKey| {
        if seen.insert(k.clone()) {
            worklist.push_back(k);
        }
    };

    match key.kind {
        Kind::Typedef => {
            for name in STRUCT_REF
                .captures_iter(&symbol.raw_text)
                .map(|c| c.get(1).unwrap().as_str())
            {
                for resolved in table.resolve_struct_or_union(Kind::Struct, name, &key.file) {
                    add(resolved);
                }
            }
            for name in UNION_REF
                .captures_iter(&symbol.raw_text)
                .map(|c| c.get(1).unwrap().as_str())
            {
                for resolved in table.resolve_struct_or_union(Kind::Union, name, &key.file) {
                    add(resolved);
                }
            }
        }
        Kind::Function | Kind::Prototype if symbol.is_variadic => {
            // A variadic function's original prototype must survive
            // verbatim wherever it's referenced (spec §8 scenario 6) — make
            // sure it's in `necessary` even if no other reference chain
            // reached it directly.
            let proto_key = PuKey::new(Kind::Prototype, &key.name, &key.file);
            if table.get(&proto_key).is_some() {
                add(proto_key);
            }
        }
        Kind::Enumerator => {
            if let Some(enum_key) = table.enumerator_to_enum.get(&key.name) {
                add(enum_key.clone());
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symtab::{PuKey, Symbol, SymbolTable};

    fn sym(table: &mut SymbolTable, kind: Kind, name: &str, file: &str, text: &str) {
        let key = PuKey::new(kind, name, file);
        table.insert(Symbol::new(key, 1, 1, text.to_string()));
    }

    #[test]
    fn closure_follows_dispatch_table_values() {
        let mut table = SymbolTable::default();
        sym(
            &mut table,
            Kind::Variable,
            "handlers",
            "f.i",
            "static Handler handlers[] = { { some_handler, 1 }, { other_handler, 2 } };",
        );
        sym(
            &mut table,
            Kind::Function,
            "some_handler",
            "f.i",
            "int some_handler(void *ctx) { return 1; }",
        );
        sym(
            &mut table,
            Kind::Function,
            "other_handler",
            "f.i",
            "int other_handler(void *ctx) { return 2; }",
        );
        let frozen = table.freeze();
        let root = PuKey::new(Kind::Variable, "handlers", "f.i");
        let necessary = close_necessary(&frozen, &[root]);
        assert!(necessary.contains(&PuKey::new(Kind::Function, "some_handler", "f.i")));
        assert!(necessary.contains(&PuKey::new(Kind::Function, "other_handler", "f.i")));
    }

    #[test]
    fn variadic_function_pulls_in_its_prototype() {
        let mut table = SymbolTable::default();
        sym(
            &mut table,
            Kind::Prototype,
            "f",
            "cfg.i",
            "int f(cfg*,int,...);",
        );
        let mut fn_sym = Symbol::new(
            PuKey::new(Kind::Function, "f", "cfg.i"),
            10,
            12,
            "int f(cfg *c, int n, ...) { return n; }".to_string(),
        );
        fn_sym.is_variadic = true;
        table.insert(fn_sym);
        sym(
            &mut table,
            Kind::Variable,
            "table",
            "cfg.i",
            "static Entry table[] = { { f, 1 } };",
        );
        let frozen = table.freeze();
        let root = PuKey::new(Kind::Variable, "table", "cfg.i");
        let necessary = close_necessary(&frozen, &[root]);
        assert!(necessary.contains(&PuKey::new(Kind::Prototype, "f", "cfg.i")));
    }

    #[test]
    fn cycle_terminates() {
        let mut table = SymbolTable::default();
        sym(&mut table, Kind::Function, "a", "f.i", "void a(void) { b(); }");
        sym(&mut table, Kind::Function, "b", "f.i", "void b(void) { a(); }");
        let frozen = table.freeze();
        let root = PuKey::new(Kind::Function, "a", "f.i");
        let necessary = close_necessary(&frozen, &[root]);
        assert_eq!(necessary.len(), 2);
    }
}
