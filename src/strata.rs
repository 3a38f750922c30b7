//! Stratum assignment.
//!
//! Rules are layered so a consumer runs strictly after every rule whose
//! head it reads; only mutually recursive rules share a stratum. The
//! dependency graph has one node per rule and a producer-to-consumer edge
//! wherever a rule's head can land in another rule's find or comprehension
//! read. Strongly connected components collapse the graph to a DAG, which
//! is layered by longest path. Recursion through an ordinary find is fine
//! inside one component, but a component with an internal comprehension
//! edge has no valid layering and is reported with every rule on the
//! cycle.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::EngineError;
use crate::rule::RuleId;
use crate::symbol::{SymId, SymbolStore, TypeId};
use crate::term::{family_symbol, TermId, TermStore};
use crate::unify;

#[cfg(feature = "tracing")]
use crate::trace::debug;

/// What one find slot reads.
#[derive(Debug, Clone, Copy)]
pub enum ReadDep {
    /// A structural pattern; dependencies come from its head symbol,
    /// refined by a unifiability check against producer heads. A bare
    /// variable pattern reads every producer.
    Pattern(TermId),
    /// A bare-variable find with a declared type: reads every symbol in
    /// the type's bin.
    TypeScan(TypeId),
}

/// The stratification view of one rule. The table derives one of these
/// per core rule and per sub-rule.
#[derive(Debug, Clone)]
pub struct RuleDeps {
    pub id: RuleId,
    pub label: String,
    /// The head as a term, variables intact, for unifiability tests.
    pub head: TermId,
    /// Sub-rule heads fill comprehensions; a dependency cycle through one
    /// is unstratifiable.
    pub head_is_comprehension: bool,
    pub reads: SmallVec<[ReadDep; 2]>,
    /// Symbols read as aggregated sets rather than through a find.
    pub compr_reads: SmallVec<[SymId; 2]>,
}

/// A finished assignment: stratum per input rule, plus the layer count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strata {
    pub of_rule: Vec<u32>,
    pub count: u32,
}

struct Reader {
    consumer: usize,
    /// Some: symbol match must be confirmed by unifiability. None: the
    /// read was expanded from a type bin and the symbol match suffices.
    pattern: Option<TermId>,
}

/// Assign every rule a stratum, or report the comprehension cycle that
/// makes the set unstratifiable.
pub fn stratify(
    rules: &[RuleDeps],
    terms: &TermStore,
    symbols: &SymbolStore,
) -> Result<Strata, EngineError> {
    let n = rules.len();

    // Bin consumers by the symbols they read.
    let mut by_symbol: FxHashMap<SymId, Vec<Reader>> = FxHashMap::default();
    let mut open_reads: Vec<usize> = Vec::new();
    let mut compr_by_symbol: FxHashMap<SymId, Vec<usize>> = FxHashMap::default();
    for (c, rule) in rules.iter().enumerate() {
        for read in &rule.reads {
            match *read {
                ReadDep::Pattern(pat) => match family_symbol(pat, terms, symbols) {
                    Some(sym) => by_symbol.entry(sym).or_default().push(Reader {
                        consumer: c,
                        pattern: Some(pat),
                    }),
                    None => open_reads.push(c),
                },
                ReadDep::TypeScan(tid) => {
                    for &sym in symbols.type_bin(tid) {
                        by_symbol.entry(sym).or_default().push(Reader {
                            consumer: c,
                            pattern: None,
                        });
                    }
                }
            }
        }
        for &sym in &rule.compr_reads {
            compr_by_symbol.entry(sym).or_default().push(c);
        }
    }

    // Producer-to-consumer edges, weight true for comprehension edges.
    let mut adj: Vec<Vec<(usize, bool)>> = vec![Vec::new(); n];
    for (p, producer) in rules.iter().enumerate() {
        let Some(head_sym) = family_symbol(producer.head, terms, symbols) else {
            continue;
        };
        if let Some(readers) = by_symbol.get(&head_sym) {
            for reader in readers {
                let hit = reader
                    .pattern
                    .map_or(true, |pat| unify::is_unifiable_apart(terms, symbols, producer.head, pat));
                if hit {
                    adj[p].push((reader.consumer, producer.head_is_comprehension));
                }
            }
        }
        for &c in &open_reads {
            adj[p].push((c, producer.head_is_comprehension));
        }
        if let Some(readers) = compr_by_symbol.get(&head_sym) {
            for &c in readers {
                adj[p].push((c, true));
            }
        }
    }

    let (comp, comps) = condense(&adj);

    // A comprehension edge inside one component is a cycle no layering
    // can satisfy.
    for (u, edges) in adj.iter().enumerate() {
        for &(v, compr) in edges {
            if compr && comp[u] == comp[v] {
                let mut cycle: Vec<(RuleId, String)> = comps[comp[u] as usize]
                    .iter()
                    .map(|&r| (rules[r].id, rules[r].label.clone()))
                    .collect();
                cycle.sort();
                return Err(EngineError::Unstratifiable { cycle });
            }
        }
    }

    // Components complete in consumers-first order, so walking them in
    // reverse relaxes every producer before its consumers. Every edge that
    // leaves a component lifts its consumer one layer.
    let mut of_comp = vec![0u32; comps.len()];
    for cid in (0..comps.len()).rev() {
        for &u in &comps[cid] {
            for &(v, _) in &adj[u] {
                let target = comp[v] as usize;
                if target == cid {
                    continue;
                }
                let lifted = of_comp[cid] + 1;
                if lifted > of_comp[target] {
                    of_comp[target] = lifted;
                }
            }
        }
    }

    let of_rule: Vec<u32> = (0..n).map(|r| of_comp[comp[r] as usize]).collect();
    let count = of_rule.iter().copied().max().map_or(1, |m| m + 1);
    #[cfg(feature = "tracing")]
    debug!(rules = n, strata = count, "stratified");
    Ok(Strata { of_rule, count })
}

/// Iterative Tarjan: component id per node plus member lists in emit
/// order (every component's successors emitted before it).
fn condense(adj: &[Vec<(usize, bool)>]) -> (Vec<u32>, Vec<Vec<usize>>) {
    const UNDEF: u32 = u32::MAX;
    let n = adj.len();
    let mut index = vec![UNDEF; n];
    let mut low = vec![0u32; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut comp = vec![UNDEF; n];
    let mut comps: Vec<Vec<usize>> = Vec::new();
    let mut next = 0u32;
    let mut call: Vec<(usize, usize)> = Vec::new();

    for root in 0..n {
        if index[root] != UNDEF {
            continue;
        }
        index[root] = next;
        low[root] = next;
        next += 1;
        on_stack[root] = true;
        stack.push(root);
        call.push((root, 0));

        while let Some(frame) = call.last_mut() {
            let v = frame.0;
            if frame.1 < adj[v].len() {
                let w = adj[v][frame.1].0;
                frame.1 += 1;
                if index[w] == UNDEF {
                    index[w] = next;
                    low[w] = next;
                    next += 1;
                    on_stack[w] = true;
                    stack.push(w);
                    call.push((w, 0));
                } else if on_stack[w] && index[w] < low[v] {
                    low[v] = index[w];
                }
            } else {
                call.pop();
                if low[v] == index[v] {
                    let cid = comps.len() as u32;
                    let mut members = Vec::new();
                    loop {
                        let w = stack.pop().expect("component member on stack");
                        on_stack[w] = false;
                        comp[w] = cid;
                        members.push(w);
                        if w == v {
                            break;
                        }
                    }
                    comps.push(members);
                }
                if let Some(parent) = call.last_mut() {
                    if low[v] < low[parent.0] {
                        low[parent.0] = low[v];
                    }
                }
            }
        }
    }
    (comp, comps)
}

#[cfg(test)]
#[path = "tests/strata.rs"]
mod tests;
