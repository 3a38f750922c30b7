//! One-way structural matching of patterns against subjects.
//!
//! Pattern variables bind to subject sub-terms; the subject is never
//! rewritten, so no occurs check is needed. Repeated pattern variables must
//! match identical sub-terms, which hashconsing reduces to an id comparison.

use crate::symbol::SymbolStore;
use crate::term::{subterms, Term, TermId, TermStore};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

#[cfg(feature = "tracing")]
use crate::trace::trace;

/// Bindings from a successful match: pattern variable index paired with the
/// matched subject sub-term, in first-binding order.
pub type PatBinds = SmallVec<[(u32, TermId); 8]>;

/// Look up a pattern variable in the binding rows.
pub fn bound_to(binds: &PatBinds, var: u32) -> Option<TermId> {
    binds.iter().find(|(v, _)| *v == var).map(|(_, t)| *t)
}

/// Match `pattern` against `subject` one-way.
///
/// Uses an explicit worklist to avoid recursion.
pub fn match_pattern(pattern: TermId, subject: TermId, terms: &TermStore) -> Option<PatBinds> {
    let mut binds: PatBinds = SmallVec::new();
    let mut worklist: SmallVec<[(TermId, TermId); 32]> = SmallVec::new();
    worklist.push((pattern, subject));

    while let Some((p, s)) = worklist.pop() {
        if p == s {
            // Identical interned terms, including equal literals
            continue;
        }
        match terms.resolve(p) {
            Some(Term::Var(idx)) => match bound_to(&binds, idx) {
                Some(prev) if prev != s => {
                    #[cfg(feature = "tracing")]
                    trace!(var = idx, "match_nonlinear_mismatch");
                    return None;
                }
                Some(_) => {}
                None => binds.push((idx, s)),
            },
            Some(Term::App(f1, args1)) => match terms.resolve(s) {
                Some(Term::App(f2, args2)) if f1 == f2 && args1.len() == args2.len() => {
                    for (c1, c2) in args1.iter().zip(args2.iter()) {
                        worklist.push((*c1, *c2));
                    }
                }
                _ => {
                    #[cfg(feature = "tracing")]
                    trace!("match_head_mismatch");
                    return None;
                }
            },
            // Literals match only themselves, which the id check caught
            Some(_) => return None,
            None => return None,
        }
    }

    #[cfg(feature = "tracing")]
    trace!(bindings = binds.len(), "match_success");

    Some(binds)
}

/// A disjunctive pattern set matched against every distinct sub-term of a
/// subject. Backs sub-term matcher rules.
#[derive(Debug, Clone)]
pub struct SubtermMatcher {
    patterns: SmallVec<[TermId; 4]>,
}

impl SubtermMatcher {
    pub fn new(patterns: impl IntoIterator<Item = TermId>) -> Self {
        Self {
            patterns: patterns.into_iter().collect(),
        }
    }

    pub fn patterns(&self) -> &[TermId] {
        &self.patterns
    }

    /// Enumerate the distinct sub-terms of `subject` matched by any pattern.
    /// Each sub-term is yielded at most once even when several patterns
    /// match it; hashconsing dedups structurally repeated sub-terms.
    pub fn matches<'a>(
        &'a self,
        subject: TermId,
        terms: &'a TermStore,
    ) -> impl Iterator<Item = TermId> + 'a {
        subterms(subject, terms).into_iter().filter(move |&st| {
            self.patterns
                .iter()
                .any(|&p| match_pattern(p, st, terms).is_some())
        })
    }
}

/// Rebuild `pattern` with every variable replaced by the `#bound` or `#free`
/// marker according to membership in `bound`. Also returns the variables
/// that sat at `#bound` positions, in depth-first pre-order — the same order
/// [`bound_projection`] collects values, so the write side and the query
/// side of a sub-index agree on bucket keys.
pub fn canonicalize_pattern(
    pattern: TermId,
    bound: &FxHashSet<TermId>,
    terms: &TermStore,
    symbols: &SymbolStore,
) -> (TermId, SmallVec<[TermId; 4]>) {
    let bound_marker = terms.app0(symbols.bound_marker());
    let free_marker = terms.app0(symbols.free_marker());
    let mut work: Vec<(TermId, bool)> = vec![(pattern, false)];
    let mut results: Vec<TermId> = Vec::new();
    let mut proj: SmallVec<[TermId; 4]> = SmallVec::new();

    while let Some((t, children_done)) = work.pop() {
        if children_done {
            if let Some(Term::App(sym, children)) = terms.resolve(t) {
                let n = children.len();
                let new_children: SmallVec<[TermId; 4]> =
                    results.drain(results.len() - n..).collect();
                results.push(terms.app(sym, new_children));
            }
        } else {
            match terms.resolve(t) {
                Some(Term::Var(_)) => {
                    if bound.contains(&t) {
                        proj.push(t);
                        results.push(bound_marker);
                    } else {
                        results.push(free_marker);
                    }
                }
                Some(Term::App(_, children)) if !children.is_empty() => {
                    work.push((t, true));
                    for child in children.iter().rev() {
                        work.push((*child, false));
                    }
                }
                _ => results.push(t),
            }
        }
    }

    debug_assert_eq!(results.len(), 1);
    (results.pop().unwrap_or(pattern), proj)
}

/// Match a fact against a canonical pattern, collecting the fact's sub-terms
/// at `#bound` marker positions in depth-first pre-order. `#free` positions
/// match any sub-term. Returns None on structural mismatch.
pub fn bound_projection(
    fact: TermId,
    canon: TermId,
    terms: &TermStore,
    symbols: &SymbolStore,
) -> Option<SmallVec<[TermId; 4]>> {
    let bound_marker = terms.app0(symbols.bound_marker());
    let free_marker = terms.app0(symbols.free_marker());
    let mut out: SmallVec<[TermId; 4]> = SmallVec::new();
    let mut work: SmallVec<[(TermId, TermId); 32]> = SmallVec::new();
    work.push((canon, fact));

    while let Some((c, f)) = work.pop() {
        if c == bound_marker {
            out.push(f);
            continue;
        }
        if c == free_marker || c == f {
            continue;
        }
        match (terms.resolve(c)?, terms.resolve(f)?) {
            (Term::App(cs, cargs), Term::App(fs, fargs))
                if cs == fs && cargs.len() == fargs.len() =>
            {
                // Reversed pushes keep the pop order depth-first pre-order.
                for (cc, fc) in cargs.iter().zip(fargs.iter()).rev() {
                    work.push((*cc, *fc));
                }
            }
            _ => return None,
        }
    }

    Some(out)
}

#[cfg(test)]
#[path = "tests/matching.rs"]
mod tests;
