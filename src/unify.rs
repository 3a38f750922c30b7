//! Congruence-closure unification over labelled terms.
//!
//! Two terms unify when an equivalence relation over their sub-terms can be
//! closed under constructor decomposition without conflict or binding cycle.
//! Each side carries an integer label; standardizing the right side apart
//! (label 1) makes the variables of the two sides disjoint, so unifying a
//! term with itself asks whether it unifies with a renamed copy.
//!
//! Classes are tracked in a union-find. Every class records at most one
//! constructor/literal binding, plus the free occurrences (variables and
//! selector applications) inside that binding; after the worklist drains, an
//! occurs walk over free-occurrence edges between representatives rejects
//! any binding cycle. Not-unifiable is an ordinary boolean outcome.

use crate::symbol::{SymKind, SymbolStore};
use crate::term::{Term, TermId, TermStore};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

#[cfg(feature = "tracing")]
use crate::trace::{debug_span, trace};

/// A term under a standardization label. Variable-free terms are label-
/// insensitive and are canonicalized to label 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LTerm {
    pub term: TermId,
    pub label: u32,
}

impl LTerm {
    pub fn new(term: TermId, label: u32) -> Self {
        Self { term, label }
    }
}

struct Node {
    parent: u32,
    rank: u32,
    /// The unique constructor/literal binding of the class, if any.
    binding: Option<LTerm>,
    /// Free occurrences inside this class's binding(s); duplicates allowed.
    frees: SmallVec<[LTerm; 4]>,
}

/// Incremental congruence-closure state for one unification problem.
pub struct Unifier<'a> {
    terms: &'a TermStore,
    symbols: &'a SymbolStore,
    nodes: Vec<Node>,
    index: FxHashMap<LTerm, u32>,
    /// Fresh-variable assignments per class, filled during MGU rendering.
    names: FxHashMap<u32, TermId>,
    name_counter: usize,
}

impl<'a> Unifier<'a> {
    pub fn new(terms: &'a TermStore, symbols: &'a SymbolStore) -> Self {
        Self {
            terms,
            symbols,
            nodes: Vec::new(),
            index: FxHashMap::default(),
            names: FxHashMap::default(),
            name_counter: 0,
        }
    }

    /// Whether the term is free: a variable or a selector application.
    fn is_free(&self, id: TermId) -> bool {
        match self.terms.resolve(id) {
            Some(Term::Var(_)) => true,
            Some(Term::App(s, _)) => matches!(self.symbols.kind(s), Some(SymKind::Sel)),
            _ => false,
        }
    }

    /// Strip relabel operators by rewriting the argument into the target
    /// namespace; repeated in case the renaming exposes another relabel.
    fn eliminate_relabels(&self, mut lt: LTerm) -> LTerm {
        loop {
            match self.terms.resolve(lt.term) {
                Some(Term::App(s, args)) if args.len() == 1 => {
                    match self.symbols.kind(s) {
                        Some(&SymKind::Relabel(rid)) => {
                            let renaming = self.symbols.renaming(rid);
                            lt.term = self.terms.clone_with_renaming(args[0], renaming);
                        }
                        _ => return lt,
                    }
                }
                _ => return lt,
            }
        }
    }

    /// Variable-free terms mean the same thing under every label.
    fn canon(&self, lt: LTerm) -> LTerm {
        if self.terms.is_ground(lt.term) {
            LTerm::new(lt.term, 0)
        } else {
            lt
        }
    }

    fn node_of(&mut self, lt: LTerm) -> u32 {
        if let Some(&i) = self.index.get(&lt) {
            return i;
        }
        let i = self.nodes.len() as u32;
        self.nodes.push(Node {
            parent: i,
            rank: 0,
            binding: None,
            frees: SmallVec::new(),
        });
        self.index.insert(lt, i);
        i
    }

    fn find(&mut self, mut i: u32) -> u32 {
        // Path halving
        while self.nodes[i as usize].parent != i {
            let p = self.nodes[i as usize].parent;
            let gp = self.nodes[p as usize].parent;
            self.nodes[i as usize].parent = gp;
            i = gp;
        }
        i
    }

    fn union(&mut self, ra: u32, rb: u32, worklist: &mut SmallVec<[(LTerm, LTerm); 32]>) {
        if ra == rb {
            return;
        }
        let (hi, lo) = if self.nodes[ra as usize].rank >= self.nodes[rb as usize].rank {
            (ra, rb)
        } else {
            (rb, ra)
        };
        if self.nodes[hi as usize].rank == self.nodes[lo as usize].rank {
            self.nodes[hi as usize].rank += 1;
        }
        self.nodes[lo as usize].parent = hi;
        let lo_binding = self.nodes[lo as usize].binding.take();
        let lo_frees = std::mem::take(&mut self.nodes[lo as usize].frees);
        self.nodes[hi as usize].frees.extend(lo_frees);
        match (self.nodes[hi as usize].binding, lo_binding) {
            (Some(b1), Some(b2)) if b1 != b2 => worklist.push((b1, b2)),
            (None, Some(b2)) => self.nodes[hi as usize].binding = Some(b2),
            _ => {}
        }
    }

    /// Collect the free occurrences anywhere inside a bound term. Selector
    /// applications count as atoms and are not descended into.
    fn collect_frees(&self, t: LTerm) -> SmallVec<[LTerm; 8]> {
        let mut out: SmallVec<[LTerm; 8]> = SmallVec::new();
        let mut stack: SmallVec<[TermId; 16]> = smallvec::smallvec![t.term];
        while let Some(id) = stack.pop() {
            match self.terms.resolve(id) {
                Some(Term::Var(_)) => out.push(LTerm::new(id, t.label)),
                Some(Term::App(s, args)) => {
                    if matches!(self.symbols.kind(s), Some(SymKind::Sel)) {
                        out.push(self.canon(LTerm::new(id, t.label)));
                    } else {
                        for a in args.iter().rev() {
                            stack.push(*a);
                        }
                    }
                }
                _ => {}
            }
        }
        out
    }

    /// Bind the class of a free term to a constructor/literal term,
    /// pushing the implied equality when the class already carried a
    /// different binding.
    fn bind(&mut self, free: LTerm, bound: LTerm, worklist: &mut SmallVec<[(LTerm, LTerm); 32]>) {
        let rv = {
            let n = self.node_of(free);
            self.find(n)
        };
        let existing = self.nodes[rv as usize].binding;
        match existing {
            Some(b) if b != bound => worklist.push((b, bound)),
            Some(_) => {}
            None => {
                let frees = self.collect_frees(bound);
                let node = &mut self.nodes[rv as usize];
                node.binding = Some(bound);
                node.frees.extend(frees);
            }
        }
    }

    /// Drain equalities starting from one pending pair. Returns false on a
    /// constructor conflict; the occurs check runs separately.
    fn solve(&mut self, a: LTerm, b: LTerm) -> bool {
        #[cfg(feature = "tracing")]
        let _span = debug_span!("unify", a = ?a.term, b = ?b.term).entered();

        let mut worklist: SmallVec<[(LTerm, LTerm); 32]> = SmallVec::new();
        worklist.push((a, b));

        while let Some((x, y)) = worklist.pop() {
            let x = self.canon(self.eliminate_relabels(x));
            let y = self.canon(self.eliminate_relabels(y));
            if x == y {
                continue;
            }
            let x_free = self.is_free(x.term);
            let y_free = self.is_free(y.term);
            match (x_free, y_free) {
                (true, true) => {
                    let rx = {
                        let n = self.node_of(x);
                        self.find(n)
                    };
                    let ry = {
                        let n = self.node_of(y);
                        self.find(n)
                    };
                    self.union(rx, ry, &mut worklist);
                }
                (true, false) => self.bind(x, y, &mut worklist),
                (false, true) => self.bind(y, x, &mut worklist),
                (false, false) => {
                    match (self.terms.resolve(x.term), self.terms.resolve(y.term)) {
                        (Some(Term::App(f, xs)), Some(Term::App(g, ys)))
                            if f == g && xs.len() == ys.len() =>
                        {
                            for (cx, cy) in xs.iter().zip(ys.iter()) {
                                worklist
                                    .push((LTerm::new(*cx, x.label), LTerm::new(*cy, y.label)));
                            }
                        }
                        _ => {
                            #[cfg(feature = "tracing")]
                            trace!("unify_constructor_conflict");
                            return false;
                        }
                    }
                }
            }
        }
        true
    }

    /// Walk free-occurrence edges between representatives; any cycle means
    /// some variable is bound, directly or transitively, to a term
    /// containing itself.
    fn occurs_ok(&mut self) -> bool {
        // 0 = unvisited, 1 = on the current path, 2 = done
        let mut colors: Vec<u8> = vec![0; self.nodes.len()];
        let roots: Vec<u32> = (0..self.nodes.len() as u32)
            .filter(|&i| self.nodes[i as usize].parent == i)
            .collect();

        for start in roots {
            if colors[start as usize] != 0 || self.nodes[start as usize].binding.is_none() {
                continue;
            }
            let mut stack: Vec<(u32, SmallVec<[u32; 8]>, usize)> = Vec::new();
            colors[start as usize] = 1;
            let neigh = self.neighbors(start);
            // neighbors() interns classes for frees first seen here
            colors.resize(self.nodes.len(), 0);
            stack.push((start, neigh, 0));

            while let Some(top) = stack.len().checked_sub(1) {
                let next = {
                    let (_, neigh, cursor) = &mut stack[top];
                    if *cursor < neigh.len() {
                        let n = neigh[*cursor];
                        *cursor += 1;
                        Some(n)
                    } else {
                        None
                    }
                };
                match next {
                    Some(n) => match colors[n as usize] {
                        1 => {
                            #[cfg(feature = "tracing")]
                            trace!("unify_occurs_cycle");
                            return false;
                        }
                        0 => {
                            colors[n as usize] = 1;
                            let n_neigh = self.neighbors(n);
                            colors.resize(self.nodes.len(), 0);
                            stack.push((n, n_neigh, 0));
                        }
                        _ => {}
                    },
                    None => {
                        let node = stack[top].0;
                        colors[node as usize] = 2;
                        stack.pop();
                    }
                }
            }
        }
        true
    }

    fn neighbors(&mut self, i: u32) -> SmallVec<[u32; 8]> {
        let frees: SmallVec<[LTerm; 8]> = self.nodes[i as usize].frees.iter().copied().collect();
        let mut out: SmallVec<[u32; 8]> = SmallVec::new();
        for f in frees {
            let n = self.node_of(f);
            out.push(self.find(n));
        }
        out
    }

    /// Solve one labelled pair completely, including the occurs check.
    pub fn unify(&mut self, a: TermId, la: u32, b: TermId, lb: u32) -> bool {
        self.solve(LTerm::new(a, la), LTerm::new(b, lb)) && self.occurs_ok()
    }

    /// Re-walk a term substituting each free class by its binding, or by a
    /// caller-supplied fresh variable assigned on first encounter in
    /// left-to-right order. Ground sub-terms are kept untouched.
    pub fn render<F>(&mut self, t: TermId, label: u32, namer: &mut F) -> TermId
    where
        F: FnMut(usize) -> TermId,
    {
        let lt = self.canon(self.eliminate_relabels(LTerm::new(t, label)));
        if self.terms.is_ground(lt.term) && !self.is_free(lt.term) {
            return lt.term;
        }
        if self.is_free(lt.term) {
            let r = {
                let n = self.node_of(lt);
                self.find(n)
            };
            if let Some(b) = self.nodes[r as usize].binding {
                return self.render(b.term, b.label, namer);
            }
            if let Some(&n) = self.names.get(&r) {
                return n;
            }
            let fresh = namer(self.name_counter);
            self.name_counter += 1;
            self.names.insert(r, fresh);
            return fresh;
        }
        match self.terms.resolve(lt.term) {
            Some(Term::App(f, args)) => {
                let new_args: SmallVec<[TermId; 4]> = args
                    .iter()
                    .map(|&c| self.render(c, lt.label, namer))
                    .collect();
                self.terms.app(f, new_args)
            }
            // Literals are ground and were returned above
            _ => lt.term,
        }
    }
}

/// Decide unifiability of two terms sharing one variable namespace.
pub fn is_unifiable(terms: &TermStore, symbols: &SymbolStore, a: TermId, b: TermId) -> bool {
    Unifier::new(terms, symbols).unify(a, 0, b, 0)
}

/// Decide unifiability with `b` standardized apart, so the two sides'
/// variables are disjoint even when `a` and `b` share names.
pub fn is_unifiable_apart(terms: &TermStore, symbols: &SymbolStore, a: TermId, b: TermId) -> bool {
    Unifier::new(terms, symbols).unify(a, 0, b, 1)
}

/// Unify with `b` standardized apart and reconstruct the normalized
/// most-general unifier as the unified instance of `a`. Fresh variables are
/// drawn from `namer` in first-occurrence order.
pub fn mgu_apart<F>(
    terms: &TermStore,
    symbols: &SymbolStore,
    a: TermId,
    b: TermId,
    namer: &mut F,
) -> Option<TermId>
where
    F: FnMut(usize) -> TermId,
{
    let mut u = Unifier::new(terms, symbols);
    if !u.unify(a, 0, b, 1) {
        return None;
    }
    Some(u.render(a, 0, namer))
}

#[cfg(test)]
#[path = "tests/unify.rs"]
mod tests;
