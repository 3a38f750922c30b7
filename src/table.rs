//! Compiled rule tables.
//!
//! A table is built once: rule definitions and sub-rules go in, the
//! builder compiles constraint graphs, applies per-rule configuration,
//! assigns strata, and registers every trigger pattern. The finished
//! table is read-only and safe to share across concurrently running
//! engines; all mutable evaluation state lives in each run.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::{smallvec, SmallVec};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::index::TriggerIndex;
use crate::matching::{self, SubtermMatcher};
use crate::metrics::RuleStats;
use crate::rule::{Binder, CoreRule, FindData, RuleDef, RuleId};
use crate::strata::{self, ReadDep, RuleDeps};
use crate::subrule::SubRule;
use crate::symbol::{SymId, SymKind, SymbolStore};
use crate::term::{TermId, TermStore};

#[cfg(feature = "tracing")]
use crate::trace::debug;

/// One table entry: either a full constraint-graph rule or a sub-term
/// matcher feeding a comprehension.
#[derive(Debug)]
pub enum TableRule {
    Core(CoreRule),
    Sub(SubRule),
}

impl TableRule {
    pub fn label(&self) -> &str {
        match self {
            TableRule::Core(r) => &r.label,
            TableRule::Sub(r) => &r.label,
        }
    }

    pub fn stratum(&self) -> Option<u32> {
        match self {
            TableRule::Core(r) => r.stratum(),
            TableRule::Sub(r) => r.stratum(),
        }
    }

    pub fn as_core(&self) -> Option<&CoreRule> {
        match self {
            TableRule::Core(r) => Some(r),
            TableRule::Sub(_) => None,
        }
    }

    pub fn as_sub(&self) -> Option<&SubRule> {
        match self {
            TableRule::Core(_) => None,
            TableRule::Sub(r) => Some(r),
        }
    }
}

/// A compiled, stratified rule set plus its trigger registry and shared
/// per-rule statistics.
pub struct RuleTable {
    rules: Vec<TableRule>,
    stats: Vec<RuleStats>,
    triggers: TriggerIndex,
    strata_count: u32,
}

impl RuleTable {
    pub fn builder<'a>(terms: &'a TermStore, symbols: &'a SymbolStore) -> RuleTableBuilder<'a> {
        RuleTableBuilder {
            terms,
            symbols,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rule(&self, id: RuleId) -> &TableRule {
        &self.rules[id.0 as usize]
    }

    pub fn rules(&self) -> impl Iterator<Item = &TableRule> {
        self.rules.iter()
    }

    pub fn rule_by_label(&self, label: &str) -> Option<RuleId> {
        self.rules
            .iter()
            .position(|r| r.label() == label)
            .map(|i| RuleId(i as u32))
    }

    pub fn stats(&self, id: RuleId) -> &RuleStats {
        &self.stats[id.0 as usize]
    }

    pub fn triggers(&self) -> &TriggerIndex {
        &self.triggers
    }

    pub fn strata_count(&self) -> u32 {
        self.strata_count
    }
}

#[derive(Debug)]
enum EntryDef {
    Core(RuleDef),
    Sub {
        label: String,
        head_sym: SymId,
        trigger: FindData,
        patterns: Vec<TermId>,
    },
}

impl EntryDef {
    fn label(&self) -> &str {
        match self {
            EntryDef::Core(def) => &def.label,
            EntryDef::Sub { label, .. } => label,
        }
    }
}

#[derive(Debug)]
struct Entry {
    def: EntryDef,
    /// Labels whose configured settings this entry inherits (clone chain).
    inherits: Vec<String>,
}

/// Accumulates definitions, then compiles them into a [`RuleTable`].
pub struct RuleTableBuilder<'a> {
    terms: &'a TermStore,
    symbols: &'a SymbolStore,
    entries: Vec<Entry>,
}

impl<'a> RuleTableBuilder<'a> {
    /// Add a rule definition. The returned id is stable through `build`.
    pub fn rule(&mut self, def: RuleDef) -> RuleId {
        let id = RuleId(self.entries.len() as u32);
        self.entries.push(Entry {
            def: EntryDef::Core(def),
            inherits: Vec::new(),
        });
        id
    }

    /// Add a sub-term matcher rule: for each fact matching `trigger`, one
    /// `head_sym(fact, sub)` conclusion per distinct sub-term matching any
    /// of `patterns`.
    pub fn sub_rule(
        &mut self,
        label: impl Into<String>,
        head_sym: SymId,
        trigger: FindData,
        patterns: impl IntoIterator<Item = TermId>,
    ) -> RuleId {
        let id = RuleId(self.entries.len() as u32);
        self.entries.push(Entry {
            def: EntryDef::Sub {
                label: label.into(),
                head_sym,
                trigger,
                patterns: patterns.into_iter().collect(),
            },
            inherits: Vec::new(),
        });
        id
    }

    /// Clone an existing entry under a fresh id and label, rewriting its
    /// constructor symbols through `renaming`. The clone inherits the
    /// source's configured classes and watch flag on top of its own.
    pub fn clone_rule(
        &mut self,
        source: RuleId,
        label: impl Into<String>,
        renaming: &FxHashMap<SymId, SymId>,
    ) -> RuleId {
        let src = &self.entries[source.0 as usize];
        let mut inherits = src.inherits.clone();
        inherits.push(src.def.label().to_string());
        let label = label.into();

        let def = match &src.def {
            EntryDef::Core(def) => {
                let mut out =
                    RuleDef::new(label, self.terms.clone_with_renaming(def.head, renaming));
                for fd in def.finds.iter().flatten() {
                    out = out.find(self.rename_find(fd, renaming));
                }
                for &c in &def.constraints {
                    out = out.constraint(self.terms.clone_with_renaming(c, renaming));
                }
                for &(a, b) in &def.var_eqs {
                    out = out.var_eq(
                        self.terms.clone_with_renaming(a, renaming),
                        self.terms.clone_with_renaming(b, renaming),
                    );
                }
                for &sym in &def.compr_reads {
                    out = out.compr_read(rename_sym(sym, renaming));
                }
                EntryDef::Core(out)
            }
            EntryDef::Sub {
                head_sym,
                trigger,
                patterns,
                ..
            } => EntryDef::Sub {
                label,
                head_sym: rename_sym(*head_sym, renaming),
                trigger: self.rename_find(trigger, renaming),
                patterns: patterns
                    .iter()
                    .map(|&p| self.terms.clone_with_renaming(p, renaming))
                    .collect(),
            },
        };

        let id = RuleId(self.entries.len() as u32);
        self.entries.push(Entry { def, inherits });
        id
    }

    fn rename_find(&self, fd: &FindData, renaming: &FxHashMap<SymId, SymId>) -> FindData {
        let pattern = self.terms.clone_with_renaming(fd.pattern, renaming);
        match fd.binder {
            Binder::Var(v) => FindData::new(v, pattern, fd.required_type),
            Binder::Anon => FindData::anon(pattern, fd.required_type),
        }
    }

    /// Compile everything: duplicate-label check, stratification, graph
    /// compilation, configuration, trigger registration.
    pub fn build(self, config: &EngineConfig) -> Result<RuleTable, EngineError> {
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        for entry in &self.entries {
            if !seen.insert(entry.def.label()) {
                return Err(EngineError::DuplicateRuleLabel(
                    entry.def.label().to_string(),
                ));
            }
        }

        let deps: Vec<RuleDeps> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| self.deps_of(i, entry))
            .collect();
        let strata = strata::stratify(&deps, self.terms, self.symbols)?;

        let mut rules = Vec::with_capacity(self.entries.len());
        for (i, entry) in self.entries.iter().enumerate() {
            let id = RuleId(i as u32);
            let stratum = strata.of_rule[i];
            match &entry.def {
                EntryDef::Core(def) => {
                    let mut rule = CoreRule::compile(def.clone(), id, self.terms, self.symbols);
                    rule.set_stratum(stratum)?;
                    let (classes, watch) = settings_for(config, &entry.inherits, &rule.label);
                    rule.classes = classes;
                    rule.is_watched = watch;
                    rules.push(TableRule::Core(rule));
                }
                EntryDef::Sub {
                    label,
                    head_sym,
                    trigger,
                    patterns,
                } => {
                    let matcher = SubtermMatcher::new(patterns.iter().copied());
                    let mut sub =
                        SubRule::new(id, label.clone(), *head_sym, trigger.clone(), matcher);
                    sub.set_stratum(stratum)?;
                    rules.push(TableRule::Sub(sub));
                }
            }
        }

        let mut triggers = TriggerIndex::new(strata.count);
        for (i, rule) in rules.iter().enumerate() {
            let id = RuleId(i as u32);
            let stratum = strata.of_rule[i];
            match rule {
                TableRule::Core(core) => {
                    if core.is_untriggered() {
                        triggers.register_untriggered(stratum, id);
                        continue;
                    }
                    for slot in 0..2 {
                        let Some(fd) = core.find(slot) else { continue };
                        match core.canonical[slot] {
                            Some(canon) => {
                                triggers.register(canon, stratum, id, slot as i8, self.terms);
                            }
                            None => {
                                self.register_type_fan(&mut triggers, fd, stratum, id, slot as i8)
                            }
                        }
                    }
                }
                TableRule::Sub(sub) => {
                    if self.terms.is_var(sub.trigger.pattern).is_some() {
                        self.register_type_fan(&mut triggers, &sub.trigger, stratum, id, 0);
                    } else {
                        let (canon, _) = matching::canonicalize_pattern(
                            sub.trigger.pattern,
                            &FxHashSet::default(),
                            self.terms,
                            self.symbols,
                        );
                        triggers.register(canon, stratum, id, 0, self.terms);
                    }
                }
            }
        }

        #[cfg(feature = "tracing")]
        debug!(rules = rules.len(), strata = strata.count, "table_built");

        let stats = (0..rules.len()).map(|_| RuleStats::new()).collect();
        Ok(RuleTable {
            rules,
            stats,
            triggers,
            strata_count: strata.count,
        })
    }

    /// Register a bare-variable find under one generated pattern per
    /// symbol in its type bin: literal families as their placeholder,
    /// constructors as `sym(#free, ...)` at declared arity.
    fn register_type_fan(
        &self,
        triggers: &mut TriggerIndex,
        fd: &FindData,
        stratum: u32,
        rule: RuleId,
        slot: i8,
    ) {
        let Some(tid) = fd.required_type else {
            debug_assert!(false, "bare-variable finds need a declared type");
            return;
        };
        let free = self.terms.app0(self.symbols.free_marker());
        for &sym in self.symbols.type_bin(tid) {
            if sym == self.symbols.int_family() || sym == self.symbols.str_family() {
                triggers.register(self.terms.app0(sym), stratum, rule, slot, self.terms);
                continue;
            }
            let Some(SymKind::Con { arity, .. }) = self.symbols.kind(sym) else {
                continue;
            };
            let args: SmallVec<[TermId; 4]> = smallvec![free; *arity as usize];
            let canon = self.terms.app(sym, args);
            triggers.register(canon, stratum, rule, slot, self.terms);
        }
    }

    fn deps_of(&self, i: usize, entry: &Entry) -> RuleDeps {
        let id = RuleId(i as u32);
        match &entry.def {
            EntryDef::Core(def) => RuleDeps {
                id,
                label: def.label.clone(),
                head: def.head,
                head_is_comprehension: false,
                reads: def
                    .finds
                    .iter()
                    .flatten()
                    .map(|fd| self.read_of(fd))
                    .collect(),
                compr_reads: def.compr_reads.iter().copied().collect(),
            },
            EntryDef::Sub {
                label, head_sym, trigger, ..
            } => RuleDeps {
                id,
                label: label.clone(),
                head: self
                    .terms
                    .app2(*head_sym, self.terms.var(0), self.terms.var(1)),
                head_is_comprehension: true,
                reads: smallvec![self.read_of(trigger)],
                compr_reads: smallvec![],
            },
        }
    }

    fn read_of(&self, fd: &FindData) -> ReadDep {
        if self.terms.is_var(fd.pattern).is_some() {
            if let Some(tid) = fd.required_type {
                return ReadDep::TypeScan(tid);
            }
        }
        ReadDep::Pattern(fd.pattern)
    }
}

fn rename_sym(sym: SymId, renaming: &FxHashMap<SymId, SymId>) -> SymId {
    renaming.get(&sym).copied().unwrap_or(sym)
}

/// Classes and watch for a rule: its own configured settings merged with
/// everything its clone chain inherits. Tags are deduplicated, watch ORs.
fn settings_for(config: &EngineConfig, inherits: &[String], own: &str) -> (Vec<String>, bool) {
    let mut classes: Vec<String> = Vec::new();
    let mut watch = false;
    for label in inherits.iter().map(String::as_str).chain(std::iter::once(own)) {
        let Some(settings) = config.rule(label) else {
            continue;
        };
        if let Some(raw) = &settings.classes {
            for tag in EngineConfig::parse_classes(raw) {
                if !classes.contains(&tag) {
                    classes.push(tag);
                }
            }
        }
        watch |= settings.watch;
    }
    (classes, watch)
}

#[cfg(test)]
#[path = "tests/table.rs"]
mod tests;
