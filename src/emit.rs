//! Emitter — renders one partial unit's closed `necessary` set as C source
//! text, in five passes:
//!
//!   0. forward struct/union declarations recovered from bare
//!      `struct X;` / `union X;` externvar tags
//!   1. full type definitions (typedefs, structs, unions, enums)
//!   2. prototypes for functions this PU doesn't own, whenever a real
//!      declaration (or a known non-`int` return type) is available
//!   3. extern variable declarations, skipped when their type isn't
//!      available in this PU
//!   4. any `int`-returning K&R stub still outstanding after pass 2,
//!      followed by this PU's own definitions — the stub goes first since
//!      a root body can reference that function as a bare value (a
//!      dispatch-table entry) rather than only calling it, and a value
//!      reference needs the name already declared
//!
//! Pass ordering matters: a typedef used by a pass-2 prototype's return
//! type has to already be on the page from pass 1, and a struct pass-3
//! needs the variable's type to have cleared pass 1 too. `already_written`
//! is carried across all five passes so nothing is emitted twice when the
//! same key is reachable by more than one path through `necessary` — this
//! was the fix for a real splitter that printed the same typedef twice
//! when it was reached both directly and through a struct member.

use std::collections::{HashMap, HashSet};

use crate::partition::Pu;
use crate::symtab::{Frozen, Kind, PuKey, Symbol};
use crate::synth::{self, is_compiler_internal_tag, references_unavailable_internal_struct};

pub struct RenderedPu {
    pub id: usize,
    pub text: String,
}

/// Order `keys` (all typedef/struct/union/enum kinds) so that a type used
/// as a field or element inside another of these keys' definitions comes
/// first — a plain discovery-order emission can print `typedef struct {
/// handler_func handler; } Handler;` before `typedef int
/// (*handler_func)(void*);`, which doesn't compile. Ties (and genuine
/// cycles, which Pass 0's forward declarations already cover) fall back to
/// the input order.
fn topo_sort_types(table: &Frozen, keys: &[PuKey]) -> Vec<PuKey> {
    let index: HashMap<&str, usize> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| (k.name.as_str(), i))
        .collect();
    let mut depends_on: Vec<Vec<usize>> = vec![Vec::new(); keys.len()];
    for (i, key) in keys.iter().enumerate() {
        let Some(symbol) = table.get(key) else {
            continue;
        };
        for id in crate::lexer::extract_identifiers(&symbol.raw_text) {
            if id == key.name {
                continue;
            }
            if let Some(&j) = index.get(id.as_str()) {
                depends_on[i].push(j);
            }
        }
    }

    let mut placed = vec![false; keys.len()];
    let mut order = Vec::with_capacity(keys.len());
    while order.len() < keys.len() {
        let mut progressed = false;
        for i in 0..keys.len() {
            if placed[i] {
                continue;
            }
            if depends_on[i].iter().all(|&j| j == i || placed[j]) {
                placed[i] = true;
                order.push(i);
                progressed = true;
            }
        }
        if !progressed {
            for (i, done) in placed.iter_mut().enumerate() {
                if !*done {
                    *done = true;
                    order.push(i);
                }
            }
        }
    }
    order.into_iter().map(|i| keys[i].clone()).collect()
}

/// True when `decl` declares a plain `int`-returning callable — checked at
/// a token boundary so `int *foo(...)` (a pointer return) or `int[...]`
/// never match just because they start with the three characters `int`.
fn returns_int(decl: &str) -> bool {
    let decl = decl.trim_start();
    let decl = match decl.strip_prefix("static") {
        Some(rest) if rest.starts_with(char::is_whitespace) => rest.trim_start(),
        _ => decl,
    };
    let Some(rest) = decl.strip_prefix("int") else {
        return false;
    };
    match rest.chars().next() {
        Some(c) if c.is_whitespace() => !rest.trim_start().starts_with('*'),
        Some('(') => true,
        _ => false,
    }
}

fn extern_var_type_available(table: &Frozen, symbol: &Symbol, written: &HashSet<PuKey>) -> bool {
    let type_part = symbol.raw_text.split('=').next().unwrap_or(&symbol.raw_text);
    for id in crate::lexer::extract_identifiers(type_part) {
        for kind in [Kind::Typedef, Kind::Struct, Kind::Union] {
            let candidate = PuKey::new(kind, &id, &symbol.key.file);
            if table.symbols.contains_key(&candidate) && !written.contains(&candidate) {
                return false;
            }
        }
    }
    true
}

pub fn render(table: &Frozen, pu: &Pu) -> RenderedPu {
    let mut written: HashSet<PuKey> = HashSet::new();
    let mut pass0 = Vec::new();
    let mut pass1 = Vec::new();
    let mut pass2 = Vec::new();
    let mut pass3 = Vec::new();
    let mut pass4 = Vec::new();
    let mut deferred_stub: Vec<PuKey> = Vec::new();

    // Pass 0: forward struct/union declarations.
    for key in &pu.necessary {
        if written.contains(key) {
            continue;
        }
        if let Some(symbol) = table.get(key) {
            if symbol.is_forward_decl_candidate {
                pass0.push(symbol.raw_text.trim().to_string());
                written.insert(key.clone());
            }
        }
    }

    // Pass 1: type definitions, topologically ordered so a type used as a
    // field or element inside another of this pass's definitions is always
    // declared first.
    let type_keys: Vec<PuKey> = pu
        .necessary
        .iter()
        .filter(|key| !written.contains(*key))
        .filter(|key| matches!(key.kind, Kind::Typedef | Kind::Struct | Kind::Union | Kind::Enum))
        .cloned()
        .collect();
    for key in topo_sort_types(table, &type_keys) {
        if is_compiler_internal_tag(&key.name) {
            // carried verbatim inside whatever typedef embeds it
            written.insert(key);
            continue;
        }
        if key.kind == Kind::Typedef {
            if let Some(symbol) = table.get(&key) {
                if references_unavailable_internal_struct(table, symbol) {
                    written.insert(key);
                    continue;
                }
            }
        }
        let decl = synth::declaration_for(table, &key, &pu.necessary);
        if !decl.is_empty() {
            pass1.push(decl);
        }
        written.insert(key);
    }

    // Pass 2: prototypes for functions not owned by this PU. A function and
    // its prototype are two distinct necessary keys for the same logical
    // name (spec §4.E considers both), so declare each distinct (name,
    // file) pair exactly once regardless of which kind triggers it.
    let mut declared_names: HashSet<(String, String)> = HashSet::new();
    for key in &pu.necessary {
        if written.contains(key) || pu.owns(key) {
            continue;
        }
        if !matches!(key.kind, Kind::Function | Kind::Prototype) {
            continue;
        }
        if !declared_names.insert((key.name.clone(), key.file.clone())) {
            continue;
        }
        let has_real_prototype = table
            .get(&PuKey::new(Kind::Prototype, &key.name, &key.file))
            .is_some();
        let decl = synth::declaration_for(table, key, &pu.necessary);
        if has_real_prototype || !returns_int(&decl) {
            pass2.push(decl);
            written.insert(key.clone());
        } else {
            // left out of `written` here on purpose — the stub isn't
            // actually emitted until pass 4 below, and marking it written
            // early would make that pass's own `written.contains` guard
            // skip it before it's ever written at all.
            deferred_stub.push(key.clone());
        }
    }

    // Pass 3: extern variable declarations, filtered by type availability.
    for key in &pu.necessary {
        if written.contains(key) || pu.owns(key) {
            continue;
        }
        if !matches!(key.kind, Kind::Variable | Kind::ExternVar) {
            continue;
        }
        if let Some(symbol) = table.get(key) {
            if extern_var_type_available(table, symbol, &written) {
                pass3.push(synth::declaration_for(table, key, &pu.necessary));
            }
            written.insert(key.clone());
        }
    }

    // Pass 4: stubs deferred from pass 2 first, then this PU's own bodies.
    // An int-returning function doesn't need a prototype before a *call*
    // (C's implicit-int rule covers that), but one of this PU's own root
    // bodies may still reference it as a bare value — a dispatch-table
    // entry like `{ some_handler, 1 }` — which does need the name already
    // declared. Emitting the stub first covers that case for free.
    for key in deferred_stub {
        if written.contains(&key) {
            continue;
        }
        pass4.push(synth::kr_stub(&key.name, None));
        written.insert(key);
    }
    for key in &pu.root_keys {
        if let Some(symbol) = table.get(key) {
            pass4.push(symbol.raw_text.trim().to_string());
        }
        written.insert(key.clone());
    }

    let mut text = String::new();
    for section in [pass0, pass1, pass2, pass3, pass4] {
        for line in section {
            text.push_str(&line);
            text.push('\n');
        }
    }

    RenderedPu { id: pu.id, text }
}
