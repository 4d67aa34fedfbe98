//! Symbol Table & Interner — the canonical index of every declaration PUS
//! knows about, keyed by `(kind, name, file)`.
//!
//! Populated by the Tag Ingestor and Source Scanner, then **frozen**: after
//! ingest completes this structure is read-only and is shared across the
//! worker threads that close and emit each partial unit. The freeze
//! boundary is a first-class lifecycle event, not a convention —
//! `SymbolTable::freeze` is the only way to get a `Frozen` handle, and
//! `Frozen` exposes no mutation methods.

use std::collections::HashMap;
use std::sync::OnceLock;

use indexmap::{IndexMap, IndexSet};
use string_interner::{DefaultSymbol, StringInterner, backend::StringBackend};

/// The kind of a declaration, matching the tag-record kinds the tag stream
/// uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Function,
    Prototype,
    Typedef,
    Struct,
    Union,
    Enum,
    Enumerator,
    Variable,
    ExternVar,
    Macro,
}

impl Kind {
    pub fn parse(s: &str) -> Option<Kind> {
        Some(match s {
            "function" | "f" => Kind::Function,
            "prototype" | "p" => Kind::Prototype,
            "typedef" | "t" => Kind::Typedef,
            "struct" | "s" => Kind::Struct,
            "union" | "u" => Kind::Union,
            "enum" | "g" => Kind::Enum,
            "enumerator" | "e" => Kind::Enumerator,
            "variable" | "v" => Kind::Variable,
            "externvar" | "x" => Kind::ExternVar,
            "macro" | "d" => Kind::Macro,
            _ => return None,
        })
    }

    fn as_str(self) -> &'static str {
        match self {
            Kind::Function => "function",
            Kind::Prototype => "prototype",
            Kind::Typedef => "typedef",
            Kind::Struct => "struct",
            Kind::Union => "union",
            Kind::Enum => "enum",
            Kind::Enumerator => "enumerator",
            Kind::Variable => "variable",
            Kind::ExternVar => "externvar",
            Kind::Macro => "macro",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `kind:name:file` — the stable identity of a declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PuKey {
    pub kind: Kind,
    pub name: String,
    pub file: String,
}

impl PuKey {
    pub fn new(kind: Kind, name: impl Into<String>, file: impl Into<String>) -> Self {
        PuKey {
            kind,
            name: name.into(),
            file: file.into(),
        }
    }
}

impl std::fmt::Display for PuKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.name, self.file)
    }
}

/// A fully interned declaration record.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub key: PuKey,
    pub line_start: usize,
    pub line_end: usize,
    pub raw_text: String,
    pub return_type_text: Option<String>,
    pub is_variadic: bool,
    pub is_always_inline: bool,
    pub is_static: bool,
    pub is_kr_style: bool,
    /// For K&R-style headers: the return-type line recovered from above
    /// the function name by the Source Scanner.
    pub signature_prefix: Option<String>,
    pub struct_alias_of: Option<PuKey>,
    pub scope: Option<PuKey>,
    /// True for an `externvar` tag whose raw text is actually a bare
    /// `struct X;` / `union Y;` forward declaration.
    pub is_forward_decl_candidate: bool,
    references: OnceLock<Vec<String>>,
}

impl Symbol {
    pub fn new(key: PuKey, line_start: usize, line_end: usize, raw_text: String) -> Self {
        Symbol {
            key,
            line_start,
            line_end,
            raw_text,
            return_type_text: None,
            is_variadic: false,
            is_always_inline: false,
            is_static: false,
            is_kr_style: false,
            signature_prefix: None,
            struct_alias_of: None,
            scope: None,
            is_forward_decl_candidate: false,
            references: OnceLock::new(),
        }
    }

    /// Identifiers syntactically mentioned in this symbol's code span,
    /// excluding the symbol's own parameter names (the conservative
    /// conservative approximation of "own brace-scope locals").
    /// Computed lazily and cached — safe to call from multiple worker
    /// threads since the table is frozen by the time closure runs.
    pub fn references(&self) -> &[String] {
        self.references.get_or_init(|| {
            let params = self.param_names();
            crate::lexer::extract_identifiers(&self.raw_text)
                .into_iter()
                .filter(|id| !params.contains(id))
                .collect()
        })
    }

    /// Parameter names parsed out of the first `(...)` in `raw_text`, used
    /// only to exclude them from `references()`.
    fn param_names(&self) -> Vec<String> {
        let Some(open) = self.raw_text.find('(') else {
            return Vec::new();
        };
        let Some(end) = crate::lexer::scan_balanced(&self.raw_text, open, '(', ')') else {
            return Vec::new();
        };
        let inside = &self.raw_text[open + 1..end - 1];
        inside
            .split(',')
            .filter_map(|param| {
                crate::lexer::extract_identifiers(param)
                    .into_iter()
                    .last()
            })
            .collect()
    }
}

/// Maps each distinct identifier string to its candidate `pu_key`s.
/// Interning the strings via `string-interner`
/// keeps the candidate map small even when the same name is referenced
/// thousands of times across a large translation unit.
pub struct NameInterner {
    interner: StringInterner<StringBackend<DefaultSymbol>>,
    candidates: HashMap<DefaultSymbol, Vec<PuKey>>,
}

impl Default for NameInterner {
    fn default() -> Self {
        NameInterner {
            interner: StringInterner::new(),
            candidates: HashMap::new(),
        }
    }
}

impl NameInterner {
    pub fn insert(&mut self, name: &str, key: PuKey) {
        let sym = self.interner.get_or_intern(name);
        let bucket = self.candidates.entry(sym).or_default();
        if !bucket.contains(&key) {
            bucket.push(key);
        }
    }

    /// Look up `name` as referenced from `from_file`, returning candidates
    /// ordered deterministically: same-file first, then statics whose file
    /// matches (duplicated for clarity with the above — kept as a distinct
    /// branch per spec wording), then any non-static, preserving insertion
    /// order within each bucket.
    pub fn lookup(&self, name: &str, from_file: &str, table: &SymbolTable) -> Vec<PuKey> {
        let Some(sym) = self.interner.get(name) else {
            return Vec::new();
        };
        let Some(candidates) = self.candidates.get(&sym) else {
            return Vec::new();
        };

        let mut same_file = Vec::new();
        let mut statics_visible = Vec::new();
        let mut globals = Vec::new();
        for key in candidates {
            if key.file == from_file {
                same_file.push(key.clone());
                continue;
            }
            let is_static = table
                .symbols
                .get(key)
                .map(|s| s.is_static)
                .unwrap_or(false);
            if is_static {
                statics_visible.push(key.clone());
            } else {
                globals.push(key.clone());
            }
        }
        same_file
            .into_iter()
            .chain(statics_visible)
            .chain(globals)
            .collect()
    }
}

/// The mutable, in-progress symbol table. Populated by the Tag Ingestor and
/// Source Scanner (components B and C), then handed to `freeze`.
#[derive(Default)]
pub struct SymbolTable {
    pub symbols: IndexMap<PuKey, Symbol>,
    pub interner: NameInterner,
    /// struct tag name → owning typedef/variable pu_key (spec §3 "struct_alias").
    pub struct_alias: HashMap<String, PuKey>,
    /// nested struct tag name → parent struct pu_key.
    pub nested_struct_to_parent: HashMap<String, PuKey>,
    /// enumerator name → owning (possibly synthetic) enum pu_key.
    pub enumerator_to_enum: HashMap<String, PuKey>,
}

impl SymbolTable {
    /// Insert a symbol, interning its name. Later insertions of the same
    /// `pu_key` overwrite earlier ones (the tag stream and source scanner
    /// are expected not to race on the same key; if they do, last write
    /// wins, which in practice is the scanner's richer gap-fill entry).
    pub fn insert(&mut self, symbol: Symbol) {
        let key = symbol.key.clone();
        self.interner.insert(&key.name, key.clone());
        self.symbols.insert(key, symbol);
    }

    pub fn get(&self, key: &PuKey) -> Option<&Symbol> {
        self.symbols.get(key)
    }

    /// All primary definitions — non-prototype function bodies and
    /// non-extern variables — in stable `(file, line_start)` order, per
    /// spec §4.G.1's partitioning order and §3 invariant 1.
    pub fn primary_definitions(&self) -> Vec<PuKey> {
        let mut defs: Vec<&Symbol> = self
            .symbols
            .values()
            .filter(|s| matches!(s.key.kind, Kind::Function | Kind::Variable))
            .collect();
        defs.sort_by(|a, b| {
            (a.key.file.as_str(), a.line_start).cmp(&(b.key.file.as_str(), b.line_start))
        });
        defs.into_iter().map(|s| s.key.clone()).collect()
    }

    /// Resolve a `struct FOO` / `union FOO` reference to the pu_key that
    /// actually owns its definition, following the chain named in spec
    /// §4.D: struct_map → struct_alias → nested_struct_to_parent → interner.
    pub fn resolve_struct_or_union(&self, kind: Kind, name: &str, from_file: &str) -> Vec<PuKey> {
        let direct = PuKey::new(kind, name, from_file);
        if self.symbols.contains_key(&direct) {
            return vec![direct];
        }
        if let Some(owner) = self.struct_alias.get(name) {
            return vec![owner.clone()];
        }
        if let Some(parent) = self.nested_struct_to_parent.get(name) {
            return vec![parent.clone()];
        }
        self.interner.lookup(name, from_file, self)
    }

    /// Every symbol currently known, in insertion order — used by
    /// reporting/tests, not by the hot resolution path.
    pub fn all(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }
}

/// A read-only handle to a frozen symbol table. Safe to share by reference
/// across threads; no method here can mutate `SymbolTable`.
pub struct Frozen(SymbolTable);

impl SymbolTable {
    pub fn freeze(self) -> Frozen {
        Frozen(self)
    }
}

impl std::ops::Deref for Frozen {
    type Target = SymbolTable;
    fn deref(&self) -> &SymbolTable {
        &self.0
    }
}

// Frozen is auto Send+Sync: every field is owned data built from String,
// HashMap, IndexMap and OnceLock<Vec<String>>, all of which are Sync.

/// Build a stable, deterministic `necessary` set — an `IndexSet` so
/// insertion order is preserved (first-reached wins for emission
/// ordering) while still giving O(1) membership tests.
pub type PuKeySet = IndexSet<PuKey>;
