//! Compiled rules and their incremental constraint graphs.
//!
//! A rule body compiles once into a graph with one node per distinct
//! sub-term, shared through a memo table. At runtime a match attempt binds a
//! find pattern to a candidate fact and propagates through the graph in both
//! directions: constructor applications decompose bindings down into their
//! arguments, and a node whose arguments are all bound evaluates and pushes
//! its value up through the use-list. Every binding lands on a chronological
//! trail tagged with the phase that produced it, so a failed attempt rewinds
//! with `undo` instead of re-deriving anything.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::builtin;
use crate::error::EngineError;
use crate::matching;
use crate::symbol::{SymId, SymKind, SymbolStore, TypeId};
use crate::term::{family_symbol, subterms, Term, TermId, TermStore};

#[cfg(feature = "tracing")]
use crate::trace::{debug, trace};

/// Identifier of a compiled rule; doubles as its index in the rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleId(pub u32);

/// What a find slot binds the matched fact to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binder {
    /// A variable bound to the whole matched fact.
    Var(TermId),
    /// No binder; the pattern stands for itself.
    Anon,
}

/// One of a rule's up to two sub-goals: a binder, a pattern to match
/// against facts, and an optional required type for bare-variable patterns.
#[derive(Debug, Clone)]
pub struct FindData {
    pub binder: Binder,
    pub pattern: TermId,
    pub required_type: Option<TypeId>,
}

impl FindData {
    pub fn new(binder: TermId, pattern: TermId, required_type: Option<TypeId>) -> Self {
        Self {
            binder: Binder::Var(binder),
            pattern,
            required_type,
        }
    }

    pub fn anon(pattern: TermId, required_type: Option<TypeId>) -> Self {
        Self {
            binder: Binder::Anon,
            pattern,
            required_type,
        }
    }
}

/// Handle into a rule's constraint-node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Evaluation phase at which a binding was recorded. The order matters:
/// `undo(level)` clears everything at or above `level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Unbound,
    /// Ground evaluation, once per runtime.
    Init,
    /// The activation's own find.
    First,
    /// The joined find, once per join candidate.
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    /// Fully ground sub-term, evaluated once at `Level::Init`.
    Ground,
    /// Contains variables; evaluated when all arguments are bound.
    Nonground,
    /// Binary equality; satisfied iff both operands bind the same term.
    Eq,
    /// Satisfied iff the argument's family symbol is in the type's bin.
    TypeRel(TypeId),
}

#[derive(Debug, Clone)]
struct ConstraintNode {
    term: TermId,
    kind: NodeKind,
    args: SmallVec<[NodeId; 4]>,
    /// Back-references (parent, argument slot): the propagation fan-out.
    uses: SmallVec<[(NodeId, u8); 4]>,
}

#[derive(Debug, Default)]
struct ConstraintGraph {
    nodes: Vec<ConstraintNode>,
    /// One node per distinct sub-term.
    memo: FxHashMap<TermId, NodeId>,
}

/// Per-run state of one constraint node.
#[derive(Debug, Clone, Copy)]
pub struct NodeState {
    pub binding: Option<TermId>,
    pub bound_at: Level,
    pub eval_at: Level,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            binding: None,
            bound_at: Level::Unbound,
            eval_at: Level::Unbound,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum TrailKind {
    Bind,
    Eval,
}

#[derive(Debug, Clone, Copy)]
struct TrailEntry {
    node: NodeId,
    level: Level,
    kind: TrailKind,
}

/// Whether a runtime's ground constraints have been evaluated, and how it
/// went. Write-once per runtime; a `Fail` rule never matches in that run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    Uninit,
    Success,
    Fail,
}

/// Per-run mutable state for one rule: node bindings plus the chronological
/// trail they rewind through. Separate runs over the same compiled rule get
/// separate runtimes, so a shared rule table needs no locking.
#[derive(Debug, Clone)]
pub struct RuleRuntime {
    states: Vec<NodeState>,
    trail: Vec<TrailEntry>,
    init: InitStatus,
}

impl RuleRuntime {
    pub fn init_status(&self) -> InitStatus {
        self.init
    }

    /// Current state of the node compiled for `term`, if the rule has one.
    pub fn state_of(&self, rule: &CoreRule, term: TermId) -> Option<NodeState> {
        let id = rule.graph.memo.get(&term)?;
        Some(self.states[id.idx()])
    }
}

enum Bound {
    Fresh,
    Same,
    Conflict,
}

/// Builder-side description of a rule, consumed by [`CoreRule::compile`].
#[derive(Debug, Clone)]
pub struct RuleDef {
    pub label: String,
    pub head: TermId,
    pub finds: [Option<FindData>; 2],
    pub constraints: Vec<TermId>,
    pub var_eqs: Vec<(TermId, TermId)>,
    pub compr_reads: Vec<SymId>,
}

impl RuleDef {
    pub fn new(label: impl Into<String>, head: TermId) -> Self {
        Self {
            label: label.into(),
            head,
            finds: [None, None],
            constraints: Vec::new(),
            var_eqs: Vec::new(),
            compr_reads: Vec::new(),
        }
    }

    /// Add a find slot. Panics when both slots are already taken.
    pub fn find(mut self, data: FindData) -> Self {
        let slot = self
            .finds
            .iter()
            .position(|f| f.is_none())
            .expect("a rule carries at most two finds");
        self.finds[slot] = Some(data);
        self
    }

    pub fn constraint(mut self, c: TermId) -> Self {
        self.constraints.push(c);
        self
    }

    pub fn var_eq(mut self, a: TermId, b: TermId) -> Self {
        self.var_eqs.push((a, b));
        self
    }

    /// Mark a comprehension symbol this rule reads; consumed by the
    /// stratifier to force a strict stratum bump.
    pub fn compr_read(mut self, sym: SymId) -> Self {
        self.compr_reads.push(sym);
        self
    }
}

/// A compiled rule: immutable after `compile` except for the write-once
/// stratum and the table-applied settings flags.
#[derive(Debug)]
pub struct CoreRule {
    pub id: RuleId,
    pub label: String,
    pub head: TermId,
    pub finds: [Option<FindData>; 2],
    pub constraints: Vec<TermId>,
    pub var_eqs: Vec<(TermId, TermId)>,
    pub compr_reads: Vec<SymId>,
    /// Comma-separated tags from configuration, merged across clones.
    pub classes: Vec<String>,
    pub is_watched: bool,
    /// Neither find's variables are determined by the other: the join is an
    /// unrestricted cross product.
    pub is_product_rule: bool,
    /// Per find, its trigger pattern with variables replaced by the
    /// `#bound`/`#free` markers; None when the pattern is a bare variable.
    pub canonical: [Option<TermId>; 2],
    /// Per find, the variables at `#bound` positions in pre-order; their
    /// runtime bindings form the projection key for sub-index queries.
    pub projections: [SmallVec<[TermId; 4]>; 2],
    stratum: Option<u32>,
    graph: ConstraintGraph,
    head_node: NodeId,
    entry: [Option<NodeId>; 2],
    /// Nodes that must all be bound for the rule to conclude: find patterns,
    /// synthesized equalities, type requirements, and explicit constraints.
    roots: Vec<NodeId>,
}

impl CoreRule {
    /// Compile a rule definition into its constraint graph. Per non-anonymous
    /// find a `binder = pattern` equality is synthesized; a find's required
    /// type becomes a type-relation node over its pattern. The head is
    /// compiled into the graph but is not a satisfaction root.
    pub fn compile(def: RuleDef, id: RuleId, terms: &TermStore, symbols: &SymbolStore) -> CoreRule {
        let RuleDef {
            label,
            head,
            finds,
            constraints,
            var_eqs,
            compr_reads,
        } = def;

        let mut graph = ConstraintGraph::default();
        let head_node = graph.add(head, terms, symbols);
        let mut entry = [None, None];
        let mut roots = Vec::new();

        for (slot, fd) in finds.iter().enumerate() {
            let Some(fd) = fd else { continue };
            let pat = graph.add(fd.pattern, terms, symbols);
            entry[slot] = Some(pat);
            roots.push(pat);
            if let Binder::Var(v) = fd.binder {
                let eq = terms.app2(symbols.eq_rel(), v, fd.pattern);
                roots.push(graph.add(eq, terms, symbols));
            }
            if let Some(tid) = fd.required_type {
                let trel = terms.app1(symbols.type_def(tid).name, fd.pattern);
                roots.push(graph.add(trel, terms, symbols));
            }
        }
        for &c in &constraints {
            roots.push(graph.add(c, terms, symbols));
        }
        for &(a, b) in &var_eqs {
            let eq = terms.app2(symbols.eq_rel(), a, b);
            roots.push(graph.add(eq, terms, symbols));
        }

        // Projection vectors and the product-rule flag both come from
        // forward-propagating which variables the other find determines.
        let base = graph.determined_vars(&FxHashSet::default(), terms, symbols);
        let mut canonical = [None, None];
        let mut projections: [SmallVec<[TermId; 4]>; 2] = [SmallVec::new(), SmallVec::new()];
        let mut enlarged = [false, false];
        for slot in 0..2 {
            let Some(fd) = &finds[slot] else { continue };
            let other_vars = match &finds[1 - slot] {
                Some(other) => pattern_vars(other.pattern, terms),
                None => FxHashSet::default(),
            };
            let det = graph.determined_vars(&other_vars, terms, symbols);
            let own = pattern_vars(fd.pattern, terms);
            enlarged[slot] = own.iter().any(|v| det.contains(v) && !base.contains(v));
            if terms.is_var(fd.pattern).is_none() {
                let (canon, proj) = matching::canonicalize_pattern(fd.pattern, &det, terms, symbols);
                canonical[slot] = Some(canon);
                projections[slot] = proj;
            }
        }
        let is_product_rule = finds[0].is_some() && finds[1].is_some() && !enlarged[0] && !enlarged[1];

        #[cfg(feature = "tracing")]
        debug!(
            rule = %label,
            nodes = graph.nodes.len(),
            product = is_product_rule,
            "rule_compiled"
        );

        CoreRule {
            id,
            label,
            head,
            finds,
            constraints,
            var_eqs,
            compr_reads,
            classes: Vec::new(),
            is_watched: false,
            is_product_rule,
            canonical,
            projections,
            stratum: None,
            graph,
            head_node,
            entry,
            roots,
        }
    }

    pub fn stratum(&self) -> Option<u32> {
        self.stratum
    }

    /// Assign the stratum. Write-once; a second assignment is a caller bug.
    pub fn set_stratum(&mut self, stratum: u32) -> Result<(), EngineError> {
        if self.stratum.is_some() {
            return Err(EngineError::StratumAlreadySet(self.id));
        }
        self.stratum = Some(stratum);
        Ok(())
    }

    pub fn find(&self, slot: usize) -> Option<&FindData> {
        self.finds[slot].as_ref()
    }

    /// A rule with no finds fires unconditionally once per stratum onset.
    pub fn is_untriggered(&self) -> bool {
        self.finds.iter().all(|f| f.is_none())
    }

    pub fn head_symbol(&self, terms: &TermStore) -> Option<SymId> {
        terms.is_app(self.head).map(|(sym, _)| sym)
    }

    /// Fresh per-run state, sized to this rule's graph.
    pub fn runtime(&self) -> RuleRuntime {
        RuleRuntime {
            states: vec![NodeState::default(); self.graph.nodes.len()],
            trail: Vec::new(),
            init: InitStatus::Uninit,
        }
    }

    /// Evaluate every ground node once and propagate the results. Memoized:
    /// later calls just report the recorded status. A false relational
    /// builtin or an invalid domain member fails the whole runtime.
    pub fn initialize(&self, rt: &mut RuleRuntime, terms: &TermStore, symbols: &SymbolStore) -> bool {
        match rt.init {
            InitStatus::Success => return true,
            InitStatus::Fail => return false,
            InitStatus::Uninit => {}
        }
        let mut work: SmallVec<[NodeId; 16]> = SmallVec::new();
        // Arena order puts children before parents, so ground arguments are
        // always bound before their parent evaluates.
        for i in 0..self.graph.nodes.len() {
            let id = NodeId(i as u32);
            if self.graph.nodes[i].kind != NodeKind::Ground {
                continue;
            }
            if !self.eval_ground(rt, id, terms, symbols) {
                rt.init = InitStatus::Fail;
                #[cfg(feature = "tracing")]
                debug!(rule = %self.label, node = i, "init_failed");
                return false;
            }
            work.push(id);
        }
        if !self.drain(rt, work, Level::Init, terms, symbols) {
            rt.init = InitStatus::Fail;
            #[cfg(feature = "tracing")]
            debug!(rule = %self.label, "init_propagation_failed");
            return false;
        }
        rt.init = InitStatus::Success;
        true
    }

    /// Bind `fact` to the find pattern at `slot` and propagate. Returns
    /// false on any conflict or failed evaluation; the caller unwinds with
    /// [`CoreRule::undo`].
    pub fn activate(
        &self,
        rt: &mut RuleRuntime,
        slot: usize,
        fact: TermId,
        level: Level,
        terms: &TermStore,
        symbols: &SymbolStore,
    ) -> bool {
        let Some(entry) = self.entry[slot] else {
            debug_assert!(false, "activated a find slot the rule does not have");
            return false;
        };
        #[cfg(feature = "tracing")]
        trace!(rule = %self.label, slot, fact = fact.raw(), "activate");
        match Self::set_binding(rt, entry, fact, level) {
            Bound::Conflict => false,
            Bound::Same => true,
            Bound::Fresh => {
                let work: SmallVec<[NodeId; 16]> = smallvec::smallvec![entry];
                self.drain(rt, work, level, terms, symbols)
            }
        }
    }

    /// Rewind every binding and evaluation recorded at or above `level`.
    pub fn undo(&self, rt: &mut RuleRuntime, level: Level) {
        while let Some(top) = rt.trail.last() {
            if top.level < level {
                break;
            }
            let entry = *top;
            rt.trail.pop();
            let st = &mut rt.states[entry.node.idx()];
            match entry.kind {
                TrailKind::Bind => {
                    st.binding = None;
                    st.bound_at = Level::Unbound;
                }
                TrailKind::Eval => st.eval_at = Level::Unbound,
            }
        }
    }

    /// The rule's conclusion for the current bindings: the head instance,
    /// provided every satisfaction root is bound. An unbound root means the
    /// current candidate never satisfied that constraint.
    pub fn conclusion(&self, rt: &RuleRuntime) -> Option<TermId> {
        for &r in &self.roots {
            rt.states[r.idx()].binding?;
        }
        rt.states[self.head_node.idx()].binding
    }

    /// Runtime binding of the node compiled for `term`, if any.
    pub fn binding_of(&self, rt: &RuleRuntime, term: TermId) -> Option<TermId> {
        let id = self.graph.memo.get(&term)?;
        rt.states[id.idx()].binding
    }

    // ---- propagation machinery ----

    fn set_binding(rt: &mut RuleRuntime, node: NodeId, value: TermId, level: Level) -> Bound {
        match rt.states[node.idx()].binding {
            Some(b) if b == value => Bound::Same,
            Some(_) => Bound::Conflict,
            None => {
                let st = &mut rt.states[node.idx()];
                st.binding = Some(value);
                st.bound_at = level;
                rt.trail.push(TrailEntry {
                    node,
                    level,
                    kind: TrailKind::Bind,
                });
                Bound::Fresh
            }
        }
    }

    fn mark_eval(rt: &mut RuleRuntime, node: NodeId, level: Level) {
        let st = &mut rt.states[node.idx()];
        if st.eval_at == Level::Unbound {
            st.eval_at = level;
            rt.trail.push(TrailEntry {
                node,
                level,
                kind: TrailKind::Eval,
            });
        }
    }

    /// Worklist drain shared by initialization and activation. Each popped
    /// node is freshly bound; constructor values decompose into argument
    /// nodes, then the use-list fans out to parents.
    fn drain(
        &self,
        rt: &mut RuleRuntime,
        mut work: SmallVec<[NodeId; 16]>,
        level: Level,
        terms: &TermStore,
        symbols: &SymbolStore,
    ) -> bool {
        let tru = terms.app0(symbols.tru());
        let fls = terms.app0(symbols.fls());

        while let Some(n) = work.pop() {
            let Some(value) = rt.states[n.idx()].binding else {
                debug_assert!(false, "worklist node lost its binding");
                continue;
            };
            let node = &self.graph.nodes[n.idx()];

            // Downward: a bound constructor application fixes its arguments.
            if node.kind == NodeKind::Nonground && !node.args.is_empty() {
                if let Some((sym, _)) = terms.is_app(node.term) {
                    if decomposes(symbols, sym) {
                        match terms.resolve(value) {
                            Some(Term::App(vsym, vargs))
                                if vsym == sym && vargs.len() == node.args.len() =>
                            {
                                for (child, &varg) in node.args.iter().zip(vargs.iter()) {
                                    match Self::set_binding(rt, *child, varg, level) {
                                        Bound::Conflict => return false,
                                        Bound::Same => {}
                                        Bound::Fresh => work.push(*child),
                                    }
                                }
                            }
                            _ => return false,
                        }
                    }
                }
            }

            // Upward: notify every parent reading this node.
            for &(parent, arg_slot) in &node.uses {
                let pnode = &self.graph.nodes[parent.idx()];
                if pnode.kind == NodeKind::Eq {
                    let sibling = pnode.args[1 - arg_slot as usize];
                    match Self::set_binding(rt, sibling, value, level) {
                        Bound::Conflict => return false,
                        Bound::Same => {}
                        Bound::Fresh => work.push(sibling),
                    }
                    Self::mark_eval(rt, parent, level);
                    match Self::set_binding(rt, parent, tru, level) {
                        Bound::Conflict => return false,
                        Bound::Same => {}
                        Bound::Fresh => work.push(parent),
                    }
                } else if !self.eval_node(rt, &mut work, parent, level, terms, symbols, tru, fls) {
                    return false;
                }
            }
        }
        true
    }

    /// Evaluate `node` if it is ready (all arguments bound) and not yet
    /// evaluated. Not-ready is success; a failed evaluation, a false
    /// relational builtin, or a binding conflict fails the attempt.
    #[allow(clippy::too_many_arguments)]
    fn eval_node(
        &self,
        rt: &mut RuleRuntime,
        work: &mut SmallVec<[NodeId; 16]>,
        node: NodeId,
        level: Level,
        terms: &TermStore,
        symbols: &SymbolStore,
        tru: TermId,
        fls: TermId,
    ) -> bool {
        if rt.states[node.idx()].eval_at != Level::Unbound {
            return true;
        }
        let pnode = &self.graph.nodes[node.idx()];
        match pnode.kind {
            // Ground nodes were evaluated at initialization.
            NodeKind::Ground => true,
            // Eq nodes are forwarded by the drain loop directly.
            NodeKind::Eq => true,
            NodeKind::TypeRel(tid) => {
                let Some(av) = rt.states[pnode.args[0].idx()].binding else {
                    return true;
                };
                let member = family_symbol(av, terms, symbols)
                    .map_or(false, |s| symbols.type_bin(tid).contains(&s));
                if !member {
                    return false;
                }
                Self::mark_eval(rt, node, level);
                match Self::set_binding(rt, node, tru, level) {
                    Bound::Conflict => false,
                    Bound::Same => true,
                    Bound::Fresh => {
                        work.push(node);
                        true
                    }
                }
            }
            NodeKind::Nonground => {
                let Some((sym, _)) = terms.is_app(pnode.term) else {
                    // Variable leaves have nothing to evaluate.
                    return true;
                };
                let mut vals: SmallVec<[TermId; 4]> = SmallVec::with_capacity(pnode.args.len());
                for a in &pnode.args {
                    match rt.states[a.idx()].binding {
                        Some(v) => vals.push(v),
                        None => return true,
                    }
                }
                let Some(out) = eval_app(sym, vals, terms, symbols, fls) else {
                    return false;
                };
                Self::mark_eval(rt, node, level);
                match Self::set_binding(rt, node, out, level) {
                    Bound::Conflict => false,
                    Bound::Same => true,
                    Bound::Fresh => {
                        work.push(node);
                        true
                    }
                }
            }
        }
    }

    /// Evaluate one ground node at `Level::Init`. Children sit earlier in
    /// the arena and are already bound.
    fn eval_ground(
        &self,
        rt: &mut RuleRuntime,
        node: NodeId,
        terms: &TermStore,
        symbols: &SymbolStore,
    ) -> bool {
        let fls = terms.app0(symbols.fls());
        let gnode = &self.graph.nodes[node.idx()];
        let value = match terms.resolve(gnode.term) {
            Some(Term::Int(_)) | Some(Term::Str(_)) => gnode.term,
            Some(Term::App(sym, _)) => {
                let mut vals: SmallVec<[TermId; 4]> = SmallVec::with_capacity(gnode.args.len());
                for a in &gnode.args {
                    match rt.states[a.idx()].binding {
                        Some(v) => vals.push(v),
                        None => {
                            debug_assert!(false, "ground child unbound during initialization");
                            return false;
                        }
                    }
                }
                match eval_app(sym, vals, terms, symbols, fls) {
                    Some(v) => v,
                    None => return false,
                }
            }
            _ => return false,
        };
        Self::mark_eval(rt, node, Level::Init);
        !matches!(
            Self::set_binding(rt, node, value, Level::Init),
            Bound::Conflict
        )
    }
}

/// Evaluate an application over bound argument values: builtins through
/// their evaluator (a false relational result is no result), relabels by
/// renaming, constructors by rebuilding after domain validation.
fn eval_app(
    sym: SymId,
    vals: SmallVec<[TermId; 4]>,
    terms: &TermStore,
    symbols: &SymbolStore,
    fls: TermId,
) -> Option<TermId> {
    match symbols.kind(sym) {
        Some(SymKind::Builtin(op)) => {
            let op = *op;
            let v = builtin::eval(op, &vals, terms, symbols)?;
            if op.is_relational() && v == fls {
                return None;
            }
            Some(v)
        }
        Some(SymKind::Relabel(rid)) => {
            let renaming = symbols.renaming(*rid);
            Some(terms.clone_with_renaming(*vals.first()?, renaming))
        }
        Some(SymKind::Con {
            domains: Some(ds), ..
        }) => {
            if !domains_admit(&vals, ds, terms, symbols) {
                return None;
            }
            Some(terms.app(sym, vals))
        }
        _ => Some(terms.app(sym, vals)),
    }
}

fn domains_admit(
    vals: &[TermId],
    domains: &[TypeId],
    terms: &TermStore,
    symbols: &SymbolStore,
) -> bool {
    if vals.len() != domains.len() {
        return false;
    }
    vals.iter().zip(domains.iter()).all(|(&v, &tid)| {
        family_symbol(v, terms, symbols).map_or(false, |s| symbols.type_bin(tid).contains(&s))
    })
}

/// Constructor-like symbols propagate a parent binding down into argument
/// nodes; operators and type heads do not.
fn decomposes(symbols: &SymbolStore, sym: SymId) -> bool {
    !matches!(
        symbols.kind(sym),
        Some(SymKind::Builtin(_))
            | Some(SymKind::Sel)
            | Some(SymKind::Relabel(_))
            | Some(SymKind::Type(_))
    )
}

fn pattern_vars(pattern: TermId, terms: &TermStore) -> FxHashSet<TermId> {
    subterms(pattern, terms)
        .into_iter()
        .filter(|&t| terms.is_var(t).is_some())
        .collect()
}

impl ConstraintGraph {
    /// Add the node for `root`, creating memoized nodes for every distinct
    /// sub-term and wiring use-list back-references.
    fn add(&mut self, root: TermId, terms: &TermStore, symbols: &SymbolStore) -> NodeId {
        if let Some(&found) = self.memo.get(&root) {
            return found;
        }
        let mut work: Vec<(TermId, bool)> = vec![(root, false)];
        let mut results: Vec<NodeId> = Vec::new();

        while let Some((t, children_done)) = work.pop() {
            if children_done {
                debug_assert!(
                    !self.memo.contains_key(&t),
                    "sub-term node created twice in one traversal"
                );
                let Some(Term::App(_, children)) = terms.resolve(t) else {
                    debug_assert!(false, "second-phase entry is always an application");
                    continue;
                };
                let args: SmallVec<[NodeId; 4]> =
                    results.drain(results.len() - children.len()..).collect();
                let id = self.push_node(t, classify(t, terms, symbols), args.clone());
                for (i, &a) in args.iter().enumerate() {
                    self.nodes[a.idx()].uses.push((id, i as u8));
                }
                results.push(id);
            } else {
                if let Some(&found) = self.memo.get(&t) {
                    results.push(found);
                    continue;
                }
                match terms.resolve(t) {
                    Some(Term::App(_, children)) if !children.is_empty() => {
                        work.push((t, true));
                        for child in children.iter().rev() {
                            work.push((*child, false));
                        }
                    }
                    _ => {
                        let id = self.push_node(t, classify(t, terms, symbols), SmallVec::new());
                        results.push(id);
                    }
                }
            }
        }

        debug_assert_eq!(results.len(), 1);
        results.pop().unwrap_or(NodeId(0))
    }

    fn push_node(&mut self, term: TermId, kind: NodeKind, args: SmallVec<[NodeId; 4]>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(ConstraintNode {
            term,
            kind,
            args,
            uses: SmallVec::new(),
        });
        self.memo.insert(term, id);
        id
    }

    /// Which variables become determined given ground nodes plus an assumed
    /// bound set: equalities spread sideways, a node with all arguments
    /// determined is determined, and a determined constructor determines its
    /// arguments. Runs the rules to a fixpoint.
    fn determined_vars(
        &self,
        assumed: &FxHashSet<TermId>,
        terms: &TermStore,
        symbols: &SymbolStore,
    ) -> FxHashSet<TermId> {
        let n = self.nodes.len();
        let mut det = vec![false; n];
        for (i, node) in self.nodes.iter().enumerate() {
            det[i] = node.kind == NodeKind::Ground || assumed.contains(&node.term);
        }
        loop {
            let mut changed = false;
            for i in 0..n {
                let node = &self.nodes[i];
                match node.kind {
                    NodeKind::Ground => {}
                    NodeKind::Eq => {
                        let a = node.args[0].idx();
                        let b = node.args[1].idx();
                        if det[a] || det[b] {
                            for j in [a, b, i] {
                                if !det[j] {
                                    det[j] = true;
                                    changed = true;
                                }
                            }
                        }
                    }
                    NodeKind::TypeRel(_) => {
                        if det[node.args[0].idx()] && !det[i] {
                            det[i] = true;
                            changed = true;
                        }
                    }
                    NodeKind::Nonground => {
                        if node.args.is_empty() {
                            continue;
                        }
                        if !det[i] && node.args.iter().all(|a| det[a.idx()]) {
                            det[i] = true;
                            changed = true;
                        }
                        if det[i] {
                            let down = terms
                                .is_app(node.term)
                                .map_or(false, |(sym, _)| decomposes(symbols, sym));
                            if down {
                                for a in &node.args {
                                    if !det[a.idx()] {
                                        det[a.idx()] = true;
                                        changed = true;
                                    }
                                }
                            }
                        }
                    }
                }
            }
            if !changed {
                break;
            }
        }
        let mut out = FxHashSet::default();
        for (i, node) in self.nodes.iter().enumerate() {
            if det[i] && terms.is_var(node.term).is_some() {
                out.insert(node.term);
            }
        }
        out
    }
}

fn classify(term: TermId, terms: &TermStore, symbols: &SymbolStore) -> NodeKind {
    if let Some((sym, args)) = terms.is_app(term) {
        if sym == symbols.eq_rel() && args.len() == 2 {
            return NodeKind::Eq;
        }
        if let Some(SymKind::Type(tid)) = symbols.kind(sym) {
            if args.len() == 1 {
                return NodeKind::TypeRel(*tid);
            }
        }
    }
    if terms.is_ground(term) {
        NodeKind::Ground
    } else {
        NodeKind::Nonground
    }
}

#[cfg(test)]
#[path = "tests/rule.rs"]
mod tests;
