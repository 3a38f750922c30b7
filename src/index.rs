//! Trigger and fact indexing.
//!
//! The compile-time half ([`TriggerIndex`]) registers every canonical
//! trigger pattern once, shared by all (rule, find-slot) pairs that use it,
//! and dispatches facts to candidate patterns by head symbol. The per-run
//! half ([`FactIndex`]) owns the fact store and, per pattern, buckets of
//! facts keyed by projection vector, so a join activation reaches its
//! candidates with one hash lookup.

use hashbrown::HashMap;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::collections::BTreeSet;

use crate::matching;
use crate::proof::Derivation;
use crate::rule::RuleId;
use crate::symbol::{SymId, SymbolStore, TypeId};
use crate::term::{family_symbol, TermId, TermStore};

#[cfg(feature = "tracing")]
use crate::trace::trace;

/// Find slot of an activation for a rule with no finds at all.
pub const UNTRIGGERED_SLOT: i8 = -1;

/// One unit of fixpoint work. Ordered by (binding, rule, slot) so a
/// `BTreeSet` of activations is a proper set with a deterministic pop
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PendingActivation {
    pub binding: TermId,
    pub rule: RuleId,
    pub slot: i8,
}

/// Handle to a registered canonical pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatternId(u32);

impl PatternId {
    fn idx(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
struct CanonPattern {
    canon: TermId,
    /// Per stratum, the (rule, slot) pairs to pend when a fact lands here.
    registrations: Vec<Vec<(RuleId, i8)>>,
}

/// Compile-time trigger registry, built once by the rule table and shared
/// read-only by every run.
#[derive(Debug)]
pub struct TriggerIndex {
    patterns: Vec<CanonPattern>,
    by_canon: FxHashMap<TermId, PatternId>,
    by_symbol: FxHashMap<SymId, SmallVec<[PatternId; 4]>>,
    /// Per stratum, rules with no finds, pended once at stratum onset.
    untriggered: Vec<Vec<RuleId>>,
    strata_count: u32,
}

impl TriggerIndex {
    pub fn new(strata_count: u32) -> Self {
        Self {
            patterns: Vec::new(),
            by_canon: FxHashMap::default(),
            by_symbol: FxHashMap::default(),
            untriggered: vec![Vec::new(); strata_count as usize],
            strata_count,
        }
    }

    pub fn strata_count(&self) -> u32 {
        self.strata_count
    }

    /// Register a (rule, slot) pair under a canonical pattern for the given
    /// stratum. Structurally identical canonical patterns share one entry.
    pub fn register(
        &mut self,
        canon: TermId,
        stratum: u32,
        rule: RuleId,
        slot: i8,
        terms: &TermStore,
    ) -> PatternId {
        debug_assert!(stratum < self.strata_count, "stratum out of range");
        let pid = match self.by_canon.get(&canon) {
            Some(&pid) => pid,
            None => {
                let pid = PatternId(self.patterns.len() as u32);
                self.patterns.push(CanonPattern {
                    canon,
                    registrations: vec![Vec::new(); self.strata_count as usize],
                });
                self.by_canon.insert(canon, pid);
                let head = terms
                    .is_app(canon)
                    .map(|(sym, _)| sym)
                    .expect("canonical patterns are applications");
                self.by_symbol.entry(head).or_default().push(pid);
                pid
            }
        };
        self.patterns[pid.idx()].registrations[stratum as usize].push((rule, slot));
        pid
    }

    /// Record a find-less rule; it activates once per stratum onset.
    pub fn register_untriggered(&mut self, stratum: u32, rule: RuleId) {
        debug_assert!(stratum < self.strata_count, "stratum out of range");
        self.untriggered[stratum as usize].push(rule);
    }

    /// The pattern id a canonical term was registered under, if any.
    pub fn pattern_id(&self, canon: TermId) -> Option<PatternId> {
        self.by_canon.get(&canon).copied()
    }

    fn candidates_for(&self, sym: SymId) -> &[PatternId] {
        self.by_symbol.get(&sym).map_or(&[], |v| v.as_slice())
    }
}

/// Per-pattern bucket state: projection vector to matching facts.
#[derive(Debug, Default)]
struct SubIndex {
    buckets: HashMap<SmallVec<[TermId; 4]>, FxHashSet<TermId>>,
}

/// The per-run fact store plus sub-index bucket state. Append-only within
/// one run; a fact is derived the instant it first enters `facts`.
#[derive(Debug)]
pub struct FactIndex<'a> {
    triggers: &'a TriggerIndex,
    /// Fact to its derivation set; the inner Option is None for every fact
    /// when derivation tracking is off.
    facts: HashMap<TermId, Option<BTreeSet<Derivation>>>,
    /// Stored facts grouped by family symbol, for type scans.
    by_family: FxHashMap<SymId, FxHashSet<TermId>>,
    subs: Vec<SubIndex>,
    track_derivations: bool,
    /// Placeholder binding for untriggered activations.
    unit: TermId,
}

impl<'a> FactIndex<'a> {
    pub fn new(
        triggers: &'a TriggerIndex,
        track_derivations: bool,
        terms: &TermStore,
        symbols: &SymbolStore,
    ) -> Self {
        let mut subs = Vec::with_capacity(triggers.patterns.len());
        subs.resize_with(triggers.patterns.len(), SubIndex::default);
        Self {
            triggers,
            facts: HashMap::new(),
            by_family: FxHashMap::default(),
            subs,
            track_derivations,
            unit: terms.app0(symbols.tru()),
        }
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn contains(&self, fact: TermId) -> bool {
        self.facts.contains_key(&fact)
    }

    pub fn facts(&self) -> impl Iterator<Item = TermId> + '_ {
        self.facts.keys().copied()
    }

    /// The recorded derivations of a fact. None when the fact is absent or
    /// the run does not track derivations.
    pub fn derivations(&self, fact: TermId) -> Option<&BTreeSet<Derivation>> {
        self.facts.get(&fact)?.as_ref()
    }

    pub fn tracks_derivations(&self) -> bool {
        self.track_derivations
    }

    /// Insert a fact. Returns true when the fact is novel; only then is it
    /// routed through the trigger patterns, pending an activation for every
    /// (rule, slot) registered at `stratum`. A repeat insert records the new
    /// derivation (when tracked) without re-triggering anything.
    pub fn try_add(
        &mut self,
        fact: TermId,
        derivation: Option<Derivation>,
        mut pending: Option<&mut BTreeSet<PendingActivation>>,
        stratum: u32,
        terms: &TermStore,
        symbols: &SymbolStore,
    ) -> bool {
        debug_assert!(terms.is_ground(fact), "facts are ground");
        match self.facts.entry(fact) {
            hashbrown::hash_map::Entry::Occupied(mut entry) => {
                if let (true, Some(d)) = (self.track_derivations, derivation) {
                    if let Some(set) = entry.get_mut() {
                        set.insert(d);
                    }
                }
                return false;
            }
            hashbrown::hash_map::Entry::Vacant(entry) => {
                if self.track_derivations {
                    entry.insert(Some(derivation.into_iter().collect()));
                } else {
                    entry.insert(None);
                }
            }
        }

        let Some(sym) = family_symbol(fact, terms, symbols) else {
            return true;
        };
        self.by_family.entry(sym).or_default().insert(fact);

        for &pid in self.triggers.candidates_for(sym) {
            let pattern = &self.triggers.patterns[pid.idx()];
            let Some(proj) = project(fact, pattern.canon, terms, symbols) else {
                continue;
            };
            #[cfg(feature = "tracing")]
            trace!(fact = fact.raw(), pattern = pid.0, "fact_indexed");
            self.subs[pid.idx()]
                .buckets
                .entry(proj)
                .or_default()
                .insert(fact);
            if let Some(p) = pending.as_mut() {
                for &(rule, slot) in &pattern.registrations[stratum as usize] {
                    p.insert(PendingActivation {
                        binding: fact,
                        rule,
                        slot,
                    });
                }
            }
        }
        true
    }

    /// Facts in the bucket for one projection vector. O(1) to find the
    /// bucket; iteration is over its members only.
    pub fn query(
        &self,
        pattern: PatternId,
        projection: &[TermId],
    ) -> impl Iterator<Item = TermId> + '_ {
        self.subs[pattern.idx()]
            .buckets
            .get(projection)
            .into_iter()
            .flatten()
            .copied()
    }

    /// Stored facts admitted by a type. With a concrete candidate this is a
    /// single existence probe; without one it unions the family groups of
    /// every symbol in the type's bin.
    pub fn query_type(
        &self,
        tid: TypeId,
        candidate: Option<TermId>,
        terms: &TermStore,
        symbols: &SymbolStore,
    ) -> SmallVec<[TermId; 8]> {
        let bin = symbols.type_bin(tid);
        match candidate {
            Some(c) => {
                let member = family_symbol(c, terms, symbols).map_or(false, |s| bin.contains(&s));
                if member && self.contains(c) {
                    smallvec::smallvec![c]
                } else {
                    SmallVec::new()
                }
            }
            None => {
                let mut out: SmallVec<[TermId; 8]> = SmallVec::new();
                for sym in bin {
                    if let Some(group) = self.by_family.get(sym) {
                        out.extend(group.iter().copied());
                    }
                }
                out
            }
        }
    }

    /// Stratum-onset seeding: pend every untriggered rule at this stratum
    /// once, then replay every already-stored fact against the stratum's
    /// registrations.
    pub fn pend_stratum(&self, stratum: u32, pending: &mut BTreeSet<PendingActivation>) {
        for &rule in &self.triggers.untriggered[stratum as usize] {
            pending.insert(PendingActivation {
                binding: self.unit,
                rule,
                slot: UNTRIGGERED_SLOT,
            });
        }
        for (pattern, sub) in self.triggers.patterns.iter().zip(self.subs.iter()) {
            let regs = &pattern.registrations[stratum as usize];
            if regs.is_empty() {
                continue;
            }
            for bucket in sub.buckets.values() {
                for &fact in bucket {
                    for &(rule, slot) in regs {
                        pending.insert(PendingActivation {
                            binding: fact,
                            rule,
                            slot,
                        });
                    }
                }
            }
        }
    }
}

/// Match a fact against a canonical pattern, yielding its projection
/// vector. Family placeholder patterns (`#int`/`#str`) accept any literal
/// of their family with an empty projection.
fn project(
    fact: TermId,
    canon: TermId,
    terms: &TermStore,
    symbols: &SymbolStore,
) -> Option<SmallVec<[TermId; 4]>> {
    if let Some((sym, args)) = terms.is_app(canon) {
        if args.is_empty() && (sym == symbols.int_family() || sym == symbols.str_family()) {
            return if family_symbol(fact, terms, symbols) == Some(sym) {
                Some(SmallVec::new())
            } else {
                None
            };
        }
    }
    matching::bound_projection(fact, canon, terms, symbols)
}

#[cfg(test)]
#[path = "tests/index.rs"]
mod tests;
