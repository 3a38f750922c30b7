//! The fixpoint driver.
//!
//! An [`Executer`] runs one evaluation over a shared compiled
//! [`RuleTable`]:
//! 1. Axioms added before the run seed the fact store
//! 2. Per stratum, untriggered rules and every stored fact are pended
//! 3. The pending-activation set drains to fixpoint, one activation at a
//!    time
//! 4. The next stratum begins, until the last drains or the run is
//!    cancelled
//!
//! Everything mutable (fact store, sub-index buckets, rule runtimes, the
//! pending set) belongs to the run, so any number of executers can share
//! one table concurrently; the only cross-run state is the table's atomic
//! statistics.

use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::EngineError;
use crate::index::{FactIndex, PendingActivation, UNTRIGGERED_SLOT};
use crate::metrics::ActivationProbe;
use crate::proof::{Derivation, Proofs};
use crate::rule::{CoreRule, FindData, Level, RuleId, RuleRuntime};
use crate::symbol::SymbolStore;
use crate::table::{RuleTable, TableRule};
use crate::term::{format_term, TermId, TermStore};

#[cfg(feature = "tracing")]
use crate::trace::{debug, trace, warn};

/// Cooperative cancellation, shared between a run and its controller.
///
/// The driver checks it at stratum boundaries and after each activation;
/// watchers receive it so they can stop the run from a callback. An
/// in-flight activation always completes, so a cancelled run's stores are
/// consistent, just incomplete.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Callback invoked when a watched rule derives a novel fact.
pub trait FireWatcher {
    fn fire(&mut self, fact: TermId, program: &str, rule: &str, cancel: &CancelToken);
}

impl<F: FnMut(TermId, &str, &str, &CancelToken)> FireWatcher for F {
    fn fire(&mut self, fact: TermId, program: &str, rule: &str, cancel: &CancelToken) {
        self(fact, program, rule, cancel)
    }
}

/// One fixpoint run over a compiled rule table.
pub struct Executer<'a> {
    table: &'a RuleTable,
    terms: &'a TermStore,
    symbols: &'a SymbolStore,
    /// Program name passed to watch callbacks.
    program: String,
    facts: FactIndex<'a>,
    /// Lazily created per-rule runtimes; initialization status memoizes
    /// inside each.
    runtimes: Vec<Option<RuleRuntime>>,
    pending: BTreeSet<PendingActivation>,
    /// Conclusions of the activation in flight, indexed after it finishes.
    scratch: BTreeMap<TermId, SmallVec<[Derivation; 2]>>,
    watcher: Option<Box<dyn FireWatcher + 'a>>,
    cancel: CancelToken,
    fls: TermId,
}

impl<'a> Executer<'a> {
    pub fn new(
        table: &'a RuleTable,
        terms: &'a TermStore,
        symbols: &'a SymbolStore,
        track_derivations: bool,
    ) -> Self {
        Self {
            table,
            terms,
            symbols,
            program: String::new(),
            facts: FactIndex::new(table.triggers(), track_derivations, terms, symbols),
            runtimes: (0..table.len()).map(|_| None).collect(),
            pending: BTreeSet::new(),
            scratch: BTreeMap::new(),
            watcher: None,
            cancel: CancelToken::new(),
            fls: terms.app0(symbols.fls()),
        }
    }

    /// Name reported to watch callbacks.
    pub fn set_program(&mut self, name: impl Into<String>) {
        self.program = name.into();
    }

    pub fn set_watcher(&mut self, watcher: impl FireWatcher + 'a) {
        self.watcher = Some(Box::new(watcher));
    }

    /// A token controllers can keep to cancel this run.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record an input fact. Returns true when it was not already present.
    /// Axioms reach the rules through the stratum-onset replay, so adding
    /// them before `execute` is enough; no activations are pended here.
    pub fn add_axiom(&mut self, fact: TermId) -> bool {
        self.facts.try_add(
            fact,
            Some(Derivation::axiom(self.fls)),
            None,
            0,
            self.terms,
            self.symbols,
        )
    }

    pub fn facts(&self) -> &FactIndex<'a> {
        &self.facts
    }

    pub fn contains(&self, fact: TermId) -> bool {
        self.facts.contains(fact)
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    /// Enumerate proof trees for a goal over this run's recorded
    /// derivations. Requires the run to track derivations.
    pub fn proofs(&self, goal: TermId) -> Result<Proofs<'_>, EngineError> {
        Proofs::new(goal, &self.facts, self.terms, self.symbols)
    }

    /// Facts currently matching a registered canonical pattern under one
    /// projection vector. A pattern the table never registered is a caller
    /// bug and reports as [`EngineError::UnregisteredTrigger`].
    pub fn query(&self, canon: TermId, projection: &[TermId]) -> Result<Vec<TermId>, EngineError> {
        let pid = self.table.triggers().pattern_id(canon).ok_or_else(|| {
            EngineError::UnregisteredTrigger(
                format_term(canon, self.terms, self.symbols).unwrap_or_else(|e| e),
            )
        })?;
        Ok(self.facts.query(pid, projection).collect())
    }

    /// Run every stratum to fixpoint. Idempotent once drained: a second
    /// call replays stored facts but derives nothing new.
    pub fn execute(&mut self) {
        for stratum in 0..self.table.strata_count() {
            if self.cancel.is_cancelled() {
                #[cfg(feature = "tracing")]
                debug!(stratum, "run_cancelled");
                return;
            }
            #[cfg(feature = "tracing")]
            debug!(stratum, "stratum_begin");
            self.facts.pend_stratum(stratum, &mut self.pending);
            while let Some(act) = self.pending.pop_first() {
                self.step(act, stratum);
                if self.cancel.is_cancelled() {
                    #[cfg(feature = "tracing")]
                    debug!(stratum, "run_cancelled");
                    return;
                }
            }
        }
    }

    /// Execute one activation and index whatever it concluded.
    fn step(&mut self, act: PendingActivation, stratum: u32) {
        #[cfg(feature = "tracing")]
        trace!(
            rule = act.rule.0,
            slot = act.slot,
            binding = act.binding.raw(),
            "activation"
        );
        let table = self.table;
        match table.rule(act.rule) {
            TableRule::Sub(sub) => {
                let mut probe = ActivationProbe::new();
                let conclusions = sub.conclusions(act.binding, self.terms);
                if conclusions.is_empty() {
                    probe.record_fail();
                }
                for head in conclusions {
                    probe.record_pend();
                    self.scratch
                        .entry(head)
                        .or_default()
                        .push(Derivation::new(act.rule, act.binding, self.fls));
                }
                table.stats(act.rule).merge(&probe);
            }
            TableRule::Core(core) => {
                let mut probe = ActivationProbe::new();
                // Own the runtime for the duration of the activation so the
                // join can borrow the rest of the run state.
                let mut rt = self.runtimes[act.rule.0 as usize]
                    .take()
                    .unwrap_or_else(|| core.runtime());
                self.run_core(core, &mut rt, act, &mut probe);
                self.runtimes[act.rule.0 as usize] = Some(rt);
                table.stats(act.rule).merge(&probe);
            }
        }
        self.flush(act.rule, stratum);
    }

    fn run_core(
        &mut self,
        core: &CoreRule,
        rt: &mut RuleRuntime,
        act: PendingActivation,
        probe: &mut ActivationProbe,
    ) {
        if !core.initialize(rt, self.terms, self.symbols) {
            probe.record_fail();
            return;
        }

        if act.slot == UNTRIGGERED_SLOT {
            // No finds: the graph is fully determined by initialization.
            match core.conclusion(rt) {
                Some(head) => {
                    probe.record_pend();
                    self.scratch
                        .entry(head)
                        .or_default()
                        .push(Derivation::new(act.rule, self.fls, self.fls));
                }
                None => probe.record_fail(),
            }
            return;
        }

        let slot = act.slot as usize;
        if !core.activate(rt, slot, act.binding, Level::First, self.terms, self.symbols) {
            probe.record_fail();
            core.undo(rt, Level::First);
            return;
        }

        let other = 1 - slot;
        match core.find(other) {
            None => match core.conclusion(rt) {
                Some(head) => {
                    probe.record_pend();
                    self.scratch
                        .entry(head)
                        .or_default()
                        .push(Derivation::new(act.rule, act.binding, self.fls));
                }
                None => probe.record_fail(),
            },
            Some(fd) => {
                let candidates = self.join_candidates(core, rt, other, fd);
                #[cfg(feature = "tracing")]
                if core.is_product_rule {
                    warn!(
                        rule = %core.label,
                        candidates = candidates.len(),
                        "product_rule_cross_join"
                    );
                }
                for cand in candidates {
                    if core.activate(rt, other, cand, Level::Second, self.terms, self.symbols) {
                        match core.conclusion(rt) {
                            Some(head) => {
                                probe.record_pend();
                                let (b1, b2) = if slot == 0 {
                                    (act.binding, cand)
                                } else {
                                    (cand, act.binding)
                                };
                                self.scratch
                                    .entry(head)
                                    .or_default()
                                    .push(Derivation::new(act.rule, b1, b2));
                            }
                            None => probe.record_fail(),
                        }
                    } else {
                        probe.record_fail();
                    }
                    core.undo(rt, Level::Second);
                }
            }
        }

        core.undo(rt, Level::First);
    }

    /// Candidate facts for the joined find: a projection-bucket lookup when
    /// the other pattern canonicalizes, a type probe or full type scan when
    /// it is a bare variable.
    fn join_candidates(
        &self,
        core: &CoreRule,
        rt: &RuleRuntime,
        other: usize,
        fd: &FindData,
    ) -> SmallVec<[TermId; 8]> {
        match core.canonical[other] {
            Some(canon) => {
                let mut proj: SmallVec<[TermId; 4]> = SmallVec::new();
                for &v in &core.projections[other] {
                    match core.binding_of(rt, v) {
                        Some(val) => proj.push(val),
                        None => {
                            debug_assert!(
                                false,
                                "projection variable unbound after first-level activation"
                            );
                            return SmallVec::new();
                        }
                    }
                }
                let Some(pid) = self.table.triggers().pattern_id(canon) else {
                    debug_assert!(false, "join pattern was never registered");
                    return SmallVec::new();
                };
                self.facts.query(pid, &proj).collect()
            }
            None => {
                let Some(tid) = fd.required_type else {
                    debug_assert!(false, "bare-variable finds need a declared type");
                    return SmallVec::new();
                };
                // A binding the first find already fixed turns the scan into
                // one existence probe.
                let candidate = core.binding_of(rt, fd.pattern);
                self.facts.query_type(tid, candidate, self.terms, self.symbols)
            }
        }
    }

    /// Index the activation's conclusions: novel facts enter the store and
    /// fan out fresh activations; repeat facts only accumulate derivations.
    /// Novel facts of a watched rule fire the watcher.
    fn flush(&mut self, rule: RuleId, stratum: u32) {
        if self.scratch.is_empty() {
            return;
        }
        let table = self.table;
        let (watched, label) = match table.rule(rule) {
            TableRule::Core(c) => (c.is_watched, c.label.as_str()),
            TableRule::Sub(s) => (false, s.label.as_str()),
        };
        let terms = self.terms;
        let symbols = self.symbols;
        while let Some((fact, derivations)) = self.scratch.pop_first() {
            let mut novel = false;
            for d in derivations {
                novel |= self.facts.try_add(
                    fact,
                    Some(d),
                    Some(&mut self.pending),
                    stratum,
                    terms,
                    symbols,
                );
            }
            if novel && watched {
                #[cfg(feature = "tracing")]
                trace!(rule = label, fact = fact.raw(), "watch_fired");
                if let Some(w) = self.watcher.as_mut() {
                    w.fire(fact, &self.program, label, &self.cancel);
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/engine.rs"]
mod tests;
