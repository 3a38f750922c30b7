use crate::symbol::{SymId, SymKind, SymbolStore};
use hashbrown::HashMap;
use lasso::Spur;
use parking_lot::RwLock;
use rustc_hash::{FxHashSet, FxHasher};
use smallvec::SmallVec;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};

/// Unique identifier for a term in the term store.
/// TermIds are stable and can be compared for equality; the interning order
/// doubles as the total order used by ordered fact and activation sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TermId(u32);

impl TermId {
    /// Get the raw u32 value (for debugging/display).
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// A term is a variable, a literal, or a constructor application.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    /// A variable, identified by index.
    Var(u32),
    /// An integer literal.
    Int(i64),
    /// A string literal (interned in the symbol store's rodeo).
    Str(Spur),
    /// A constructor/operator application: symbol applied to children.
    App(SymId, SmallVec<[TermId; 4]>),
}

/// Classification of a term for the constraint compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Groundness {
    /// No variables anywhere.
    Ground,
    /// At least one variable occurs.
    HasVars,
    /// Ground, but the head symbol names a declared union type.
    TypeTerm,
}

struct Entry {
    term: Term,
    has_vars: bool,
}

/// Number of shards for hashcons maps (power of 2 for fast modulo).
const NUM_SHARDS: usize = 16;

/// Thread-safe term store with hashconsing.
///
/// Guarantees:
/// - Structurally equal terms get the same TermId
/// - TermId can be resolved back to the term
/// - All terms (including variables and literals) are hashconsed
/// - Whether a term contains variables is recorded at intern time
pub struct TermStore {
    /// Central storage of all terms, indexed by TermId.
    nodes: RwLock<Vec<Entry>>,
    /// Sharded hashcons maps for reducing contention.
    shards: [RwLock<HashMap<Term, TermId>>; NUM_SHARDS],
    /// Counter for generating unique TermIds.
    next_id: AtomicU32,
}

impl TermStore {
    /// Create a new empty term store.
    pub fn new() -> Self {
        let shards = std::array::from_fn(|_| RwLock::new(HashMap::new()));
        Self {
            nodes: RwLock::new(Vec::new()),
            shards,
            next_id: AtomicU32::new(0),
        }
    }

    /// Intern a term, returning its TermId.
    /// If the term already exists, returns the existing TermId.
    fn intern(&self, term: Term) -> TermId {
        let shard_idx = Self::shard_index(&term);
        let shard = &self.shards[shard_idx];

        // Fast path: check if term exists (read lock)
        {
            let map = shard.read();
            if let Some(&id) = map.get(&term) {
                return id;
            }
        }

        // Children are already interned, so their variable bits are final;
        // compute ours before taking any write lock.
        let has_vars = match &term {
            Term::Var(_) => true,
            Term::Int(_) | Term::Str(_) => false,
            Term::App(_, children) => {
                let nodes = self.nodes.read();
                children
                    .iter()
                    .any(|c| nodes.get(c.0 as usize).map_or(false, |e| e.has_vars))
            }
        };

        // Slow path: need to insert (write lock)
        let mut map = shard.write();

        // Double-check after acquiring write lock
        if let Some(&id) = map.get(&term) {
            return id;
        }

        // Allocate new TermId and store term
        let id = TermId(self.next_id.fetch_add(1, Ordering::Relaxed));
        {
            let mut nodes = self.nodes.write();
            let idx = id.0 as usize;
            if nodes.len() <= idx {
                nodes.resize_with(idx + 1, || Entry {
                    term: Term::Var(0), // placeholder
                    has_vars: true,
                });
            }
            nodes[idx] = Entry {
                term: term.clone(),
                has_vars,
            };
        }
        map.insert(term, id);
        id
    }

    /// Create a variable term.
    /// Variables are hashconsed: same index always returns same TermId.
    pub fn var(&self, index: u32) -> TermId {
        self.intern(Term::Var(index))
    }

    /// Create an integer literal term.
    pub fn int(&self, value: i64) -> TermId {
        self.intern(Term::Int(value))
    }

    /// Create a string literal term from an interned string.
    pub fn str_lit(&self, value: Spur) -> TermId {
        self.intern(Term::Str(value))
    }

    /// Create an application term.
    /// Hashconsed: same symbol and children always returns same TermId.
    pub fn app(&self, sym: SymId, children: SmallVec<[TermId; 4]>) -> TermId {
        self.intern(Term::App(sym, children))
    }

    /// Create a nullary (0-arity) application.
    pub fn app0(&self, sym: SymId) -> TermId {
        self.app(sym, SmallVec::new())
    }

    /// Create a unary (1-arity) application.
    pub fn app1(&self, sym: SymId, child: TermId) -> TermId {
        self.app(sym, smallvec::smallvec![child])
    }

    /// Create a binary (2-arity) application.
    pub fn app2(&self, sym: SymId, left: TermId, right: TermId) -> TermId {
        self.app(sym, smallvec::smallvec![left, right])
    }

    /// Resolve a TermId to its term.
    /// Returns None if the TermId is invalid.
    pub fn resolve(&self, id: TermId) -> Option<Term> {
        let nodes = self.nodes.read();
        nodes.get(id.0 as usize).map(|e| e.term.clone())
    }

    /// Check if a term is a variable.
    pub fn is_var(&self, id: TermId) -> Option<u32> {
        match self.resolve(id)? {
            Term::Var(idx) => Some(idx),
            _ => None,
        }
    }

    /// Check if a term is an application, returning symbol and children.
    pub fn is_app(&self, id: TermId) -> Option<(SymId, SmallVec<[TermId; 4]>)> {
        match self.resolve(id)? {
            Term::App(s, children) => Some((s, children)),
            _ => None,
        }
    }

    /// Whether any variable occurs in the term (recorded at intern time).
    pub fn has_vars(&self, id: TermId) -> bool {
        let nodes = self.nodes.read();
        nodes.get(id.0 as usize).map_or(false, |e| e.has_vars)
    }

    /// Whether the term is variable-free.
    pub fn is_ground(&self, id: TermId) -> bool {
        !self.has_vars(id)
    }

    /// Classify a term for the constraint compiler.
    pub fn groundness(&self, symbols: &SymbolStore, id: TermId) -> Groundness {
        if self.has_vars(id) {
            return Groundness::HasVars;
        }
        if let Some((sym, _)) = self.is_app(id) {
            if matches!(symbols.kind(sym), Some(SymKind::Type(_))) {
                return Groundness::TypeTerm;
            }
        }
        Groundness::Ground
    }

    /// Rebuild a term with application heads renamed through `renaming`
    /// (symbols absent from the map are kept). Variables and literals pass
    /// through unchanged. Used by rule cloning and relabel elimination.
    pub fn clone_with_renaming(
        &self,
        root: TermId,
        renaming: &rustc_hash::FxHashMap<SymId, SymId>,
    ) -> TermId {
        // Depth-first rebuild with explicit stacks; (term, children_done)
        // entries mirror the usual two-phase traversal.
        let mut work_stack: Vec<(TermId, bool)> = vec![(root, false)];
        let mut result_stack: Vec<TermId> = Vec::new();

        while let Some((tid, children_done)) = work_stack.pop() {
            if children_done {
                match self.resolve(tid) {
                    Some(Term::App(sym, children)) => {
                        let n = children.len();
                        let new_children: SmallVec<[TermId; 4]> =
                            result_stack.drain(result_stack.len() - n..).collect();
                        let new_sym = renaming.get(&sym).copied().unwrap_or(sym);
                        result_stack.push(self.app(new_sym, new_children));
                    }
                    _ => {
                        // Only App terms are re-pushed with children_done=true.
                        result_stack.push(tid);
                    }
                }
            } else {
                match self.resolve(tid) {
                    Some(Term::App(sym, children)) => {
                        if children.is_empty() {
                            let new_sym = renaming.get(&sym).copied().unwrap_or(sym);
                            result_stack.push(self.app0(new_sym));
                        } else {
                            work_stack.push((tid, true));
                            for child in children.iter().rev() {
                                work_stack.push((*child, false));
                            }
                        }
                    }
                    _ => {
                        // Vars, literals, and unknown ids pass through.
                        result_stack.push(tid);
                    }
                }
            }
        }

        debug_assert_eq!(result_stack.len(), 1);
        result_stack.pop().unwrap_or(root)
    }

    /// Get the shard index for a term (for hashconsing distribution).
    fn shard_index(term: &Term) -> usize {
        let mut hasher = FxHasher::default();
        term.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }
}

impl Default for TermStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Collect the distinct sub-terms of `root`, depth-first, root included.
/// Hashconsing makes the seen-check an id comparison.
pub fn subterms(root: TermId, terms: &TermStore) -> Vec<TermId> {
    let mut seen: FxHashSet<TermId> = FxHashSet::default();
    let mut out = Vec::new();
    let mut stack: SmallVec<[TermId; 16]> = smallvec::smallvec![root];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        out.push(id);
        if let Some(Term::App(_, children)) = terms.resolve(id) {
            for child in children.iter().rev() {
                stack.push(*child);
            }
        }
    }
    out
}

/// The symbol a ground value presents to type-bin membership checks:
/// an application's head, or the `#int`/`#str` family placeholder for
/// literals. Variables have no family.
pub fn family_symbol(id: TermId, terms: &TermStore, symbols: &SymbolStore) -> Option<SymId> {
    match terms.resolve(id)? {
        Term::App(sym, _) => Some(sym),
        Term::Int(_) => Some(symbols.int_family()),
        Term::Str(_) => Some(symbols.str_family()),
        Term::Var(_) => None,
    }
}

pub fn format_term(
    term: TermId,
    terms: &TermStore,
    symbols: &SymbolStore,
) -> Result<String, String> {
    fn render(
        term: TermId,
        terms: &TermStore,
        symbols: &SymbolStore,
        out: &mut String,
    ) -> Result<(), String> {
        match terms.resolve(term) {
            Some(Term::Var(idx)) => {
                out.push('$');
                out.push_str(&idx.to_string());
                Ok(())
            }
            Some(Term::Int(v)) => {
                out.push_str(&v.to_string());
                Ok(())
            }
            Some(Term::Str(s)) => {
                let text = symbols
                    .resolve(s)
                    .ok_or_else(|| format!("Unknown string for id {:?}", s))?;
                out.push('"');
                out.push_str(text);
                out.push('"');
                Ok(())
            }
            Some(Term::App(sym, children)) => {
                let name = symbols
                    .resolve(sym)
                    .ok_or_else(|| format!("Unknown symbol for sym id {:?}", sym))?;
                if children.is_empty() {
                    out.push_str(name);
                    Ok(())
                } else {
                    out.push('(');
                    out.push_str(name);
                    for child in children.iter() {
                        out.push(' ');
                        render(*child, terms, symbols, out)?;
                    }
                    out.push(')');
                    Ok(())
                }
            }
            None => Err(format!("Unknown term id {:?}", term)),
        }
    }

    let mut out = String::new();
    render(term, terms, symbols, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolStore;

    // Helper to create a test environment
    fn setup() -> (SymbolStore, TermStore) {
        (SymbolStore::new(), TermStore::new())
    }

    // ========== VARIABLES AND LITERALS ==========

    #[test]
    fn var_same_index_returns_same_id() {
        let (_, terms) = setup();
        let id1 = terms.var(42);
        let id2 = terms.var(42);
        assert_eq!(id1, id2, "Same variable index should return same TermId");
    }

    #[test]
    fn var_resolves_correctly() {
        let (_, terms) = setup();
        let id = terms.var(7);
        assert_eq!(terms.resolve(id), Some(Term::Var(7)));
    }

    #[test]
    fn int_literals_hashconsed() {
        let (_, terms) = setup();
        let a = terms.int(5);
        let b = terms.int(5);
        let c = terms.int(-5);
        assert_eq!(a, b, "Same integer should intern to same TermId");
        assert_ne!(a, c, "Different integers should differ");
        assert_eq!(terms.resolve(c), Some(Term::Int(-5)));
    }

    #[test]
    fn str_literals_hashconsed() {
        let (symbols, terms) = setup();
        let hello = symbols.intern("hello");
        let world = symbols.intern("world");
        let a = terms.str_lit(hello);
        let b = terms.str_lit(hello);
        let c = terms.str_lit(world);
        assert_eq!(a, b, "Same string should intern to same TermId");
        assert_ne!(a, c, "Different strings should differ");
    }

    #[test]
    fn is_var_distinguishes_kinds() {
        let (symbols, terms) = setup();
        let f = symbols.intern("F");
        assert_eq!(terms.is_var(terms.var(9)), Some(9));
        assert_eq!(terms.is_var(terms.int(9)), None);
        assert_eq!(terms.is_var(terms.app0(f)), None);
    }

    // ========== APPLICATIONS AND HASHCONSING ==========

    #[test]
    fn app2_creates_binary_term() {
        let (symbols, terms) = setup();
        let pair = symbols.intern("Pair");
        let a = terms.var(0);
        let b = terms.var(1);
        let pair_id = terms.app2(pair, a, b);
        assert_eq!(
            terms.resolve(pair_id),
            Some(Term::App(pair, smallvec::smallvec![a, b]))
        );
    }

    #[test]
    fn hashcons_same_app_with_children() {
        let (symbols, terms) = setup();
        let cons = symbols.intern("Cons");
        let x = terms.var(0);
        let y = terms.var(1);
        let id1 = terms.app2(cons, x, y);
        let id2 = terms.app2(cons, x, y);
        assert_eq!(id1, id2, "Same application should be hashconsed");
    }

    #[test]
    fn hashcons_child_order_matters() {
        let (symbols, terms) = setup();
        let pair = symbols.intern("Pair");
        let a = terms.var(0);
        let b = terms.var(1);
        assert_ne!(terms.app2(pair, a, b), terms.app2(pair, b, a));
    }

    #[test]
    fn hashcons_nested_terms() {
        let (symbols, terms) = setup();
        let f = symbols.intern("F");
        let g = symbols.intern("G");
        let x = terms.var(0);
        let gx1 = terms.app1(g, x);
        let gx2 = terms.app1(g, x);
        assert_eq!(gx1, gx2, "G(x) should be hashconsed");
        assert_eq!(terms.app1(f, gx1), terms.app1(f, gx2));
    }

    #[test]
    fn term_ids_are_ordered() {
        let (_, terms) = setup();
        let first = terms.var(0);
        let second = terms.var(1);
        assert!(first < second, "Interning order should order TermIds");
    }

    // ========== GROUNDNESS ==========

    #[test]
    fn literals_are_ground() {
        let (symbols, terms) = setup();
        let s = symbols.intern("s");
        assert!(terms.is_ground(terms.int(3)));
        assert!(terms.is_ground(terms.str_lit(s)));
        assert!(!terms.is_ground(terms.var(0)));
    }

    #[test]
    fn app_groundness_follows_children() {
        let (symbols, terms) = setup();
        let f = symbols.intern("F");
        let ground = terms.app1(f, terms.int(1));
        let open = terms.app1(f, terms.var(0));
        assert!(terms.is_ground(ground));
        assert!(terms.has_vars(open));
    }

    #[test]
    fn nested_var_marks_whole_term() {
        let (symbols, terms) = setup();
        let f = symbols.intern("F");
        let g = symbols.intern("G");
        let deep = terms.app1(f, terms.app1(g, terms.var(3)));
        assert!(terms.has_vars(deep), "Variable deep inside should be seen");
    }

    #[test]
    fn groundness_classifies_type_terms() {
        let (mut symbols, terms) = setup();
        let a = symbols.declare_con("A", 0);
        let t = symbols.declare_type("T", &[a], false, false);
        let tname = symbols.type_def(t).name;

        let type_const = terms.app0(tname);
        let plain = terms.app0(a);
        assert_eq!(
            terms.groundness(&symbols, type_const),
            Groundness::TypeTerm
        );
        assert_eq!(terms.groundness(&symbols, plain), Groundness::Ground);
        assert_eq!(
            terms.groundness(&symbols, terms.var(0)),
            Groundness::HasVars
        );
    }

    // ========== RENAMING CLONES ==========

    #[test]
    fn clone_with_renaming_rewrites_heads() {
        let (symbols, terms) = setup();
        let old = symbols.intern("old");
        let new = symbols.intern("new");
        let keep = symbols.intern("keep");
        let mut map = rustc_hash::FxHashMap::default();
        map.insert(old, new);

        let inner = terms.app1(old, terms.int(1));
        let root = terms.app2(keep, inner, terms.var(0));
        let renamed = terms.clone_with_renaming(root, &map);

        let expected_inner = terms.app1(new, terms.int(1));
        let expected = terms.app2(keep, expected_inner, terms.var(0));
        assert_eq!(renamed, expected, "Heads should rename, structure kept");
    }

    #[test]
    fn clone_with_empty_renaming_is_identity() {
        let (symbols, terms) = setup();
        let f = symbols.intern("F");
        let t = terms.app2(f, terms.var(0), terms.int(2));
        let map = rustc_hash::FxHashMap::default();
        assert_eq!(terms.clone_with_renaming(t, &map), t);
    }

    // ========== SUBTERM ENUMERATION ==========

    #[test]
    fn subterms_lists_each_distinct_once() {
        let (symbols, terms) = setup();
        let f = symbols.intern("F");
        let g = symbols.intern("G");
        let x = terms.var(0);
        let gx = terms.app1(g, x);
        // F(G(x), G(x)) shares the G(x) node
        let root = terms.app2(f, gx, gx);

        let subs = subterms(root, &terms);
        assert_eq!(subs.len(), 3, "root, G(x), x");
        assert_eq!(subs[0], root, "Root listed first");
        assert!(subs.contains(&gx));
        assert!(subs.contains(&x));
    }

    // ========== FORMATTING ==========

    #[test]
    fn format_renders_nested_terms() {
        let (symbols, terms) = setup();
        let edge = symbols.intern("edge");
        let a = symbols.intern("a");
        let t = terms.app2(edge, terms.app0(a), terms.int(3));
        assert_eq!(
            format_term(t, &terms, &symbols),
            Ok("(edge a 3)".to_string())
        );
    }

    #[test]
    fn format_renders_strings_quoted() {
        let (symbols, terms) = setup();
        let s = symbols.intern("hi");
        let t = terms.str_lit(s);
        assert_eq!(format_term(t, &terms, &symbols), Ok("\"hi\"".to_string()));
    }

    // ========== EDGE CASES ==========

    #[test]
    fn resolve_invalid_term_id() {
        let (_, terms) = setup();
        let invalid_id = TermId(999999);
        assert_eq!(terms.resolve(invalid_id), None);
    }

    #[test]
    fn var_max_index() {
        let (_, terms) = setup();
        let id = terms.var(u32::MAX);
        assert_eq!(terms.resolve(id), Some(Term::Var(u32::MAX)));
    }

    // ========== THREAD SAFETY ==========

    #[test]
    fn concurrent_app_creation() {
        use std::sync::Arc;
        use std::thread;

        let symbols = Arc::new(SymbolStore::new());
        let terms = Arc::new(TermStore::new());
        let f = symbols.intern("F");
        let x = terms.var(0);

        let mut handles = vec![];
        for _ in 0..10 {
            let terms_clone = Arc::clone(&terms);
            handles.push(thread::spawn(move || terms_clone.app1(f, x)));
        }
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let first = ids[0];
        assert!(
            ids.iter().all(|&id| id == first),
            "Concurrent F(x) should all return same TermId"
        );
    }

    #[test]
    fn concurrent_different_terms() {
        use std::sync::Arc;
        use std::thread;

        let symbols = Arc::new(SymbolStore::new());
        let terms = Arc::new(TermStore::new());
        let f = symbols.intern("F");

        let mut handles = vec![];
        for i in 0u32..10 {
            let terms_clone = Arc::clone(&terms);
            handles.push(thread::spawn(move || {
                let v = terms_clone.var(i);
                terms_clone.app1(f, v)
            }));
        }
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let id_set: std::collections::HashSet<_> = ids.iter().copied().collect();
        assert_eq!(id_set.len(), 10, "Distinct terms should stay distinct");
    }
}
