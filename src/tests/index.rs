use std::collections::BTreeSet;

use super::{FactIndex, PendingActivation, TriggerIndex, UNTRIGGERED_SLOT};
use crate::proof::Derivation;
use crate::rule::RuleId;
use crate::symbol::SymbolStore;
use crate::term::{TermId, TermStore};
use crate::test_utils::setup;

fn markers(terms: &TermStore, symbols: &SymbolStore) -> (TermId, TermId) {
    (
        terms.app0(symbols.bound_marker()),
        terms.app0(symbols.free_marker()),
    )
}

fn axiom(terms: &TermStore, symbols: &SymbolStore) -> Derivation {
    Derivation::axiom(terms.app0(symbols.fls()))
}

// ========== TRIGGER ROUTING ==========

#[test]
fn novel_fact_pends_registered_rules() {
    let (mut symbols, terms) = setup();
    let edge = symbols.declare_con("edge", 2);
    let a = terms.app0(symbols.declare_con("a", 0));
    let b = terms.app0(symbols.declare_con("b", 0));
    let (_, free) = markers(&terms, &symbols);

    let canon = terms.app2(edge, free, free);
    let mut triggers = TriggerIndex::new(1);
    triggers.register(canon, 0, RuleId(0), 0, &terms);
    triggers.register(canon, 0, RuleId(1), 1, &terms);

    let mut index = FactIndex::new(&triggers, false, &terms, &symbols);
    let mut pending = BTreeSet::new();
    let fact = terms.app2(edge, a, b);
    assert!(index.try_add(fact, None, Some(&mut pending), 0, &terms, &symbols));

    let got: Vec<_> = pending.iter().copied().collect();
    assert_eq!(
        got,
        vec![
            PendingActivation { binding: fact, rule: RuleId(0), slot: 0 },
            PendingActivation { binding: fact, rule: RuleId(1), slot: 1 },
        ]
    );
    assert!(index.contains(fact));
    assert_eq!(index.len(), 1);
}

#[test]
fn shared_canonical_pattern_registers_once() {
    let (mut symbols, terms) = setup();
    let edge = symbols.declare_con("edge", 2);
    let (bound, free) = markers(&terms, &symbols);

    let canon = terms.app2(edge, bound, free);
    let mut triggers = TriggerIndex::new(2);
    let p1 = triggers.register(canon, 0, RuleId(0), 0, &terms);
    let p2 = triggers.register(canon, 1, RuleId(3), 1, &terms);
    assert_eq!(p1, p2, "identical canonical patterns share one sub-index");
    assert_eq!(triggers.pattern_id(canon), Some(p1));
}

#[test]
fn stratum_scopes_registrations() {
    let (mut symbols, terms) = setup();
    let edge = symbols.declare_con("edge", 2);
    let a = terms.app0(symbols.declare_con("a", 0));
    let b = terms.app0(symbols.declare_con("b", 0));
    let (_, free) = markers(&terms, &symbols);

    let canon = terms.app2(edge, free, free);
    let mut triggers = TriggerIndex::new(2);
    triggers.register(canon, 0, RuleId(0), 0, &terms);
    triggers.register(canon, 1, RuleId(1), 0, &terms);

    let mut index = FactIndex::new(&triggers, false, &terms, &symbols);
    let mut pending = BTreeSet::new();
    index.try_add(terms.app2(edge, a, b), None, Some(&mut pending), 0, &terms, &symbols);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending.iter().next().unwrap().rule, RuleId(0));

    pending.clear();
    index.try_add(terms.app2(edge, b, a), None, Some(&mut pending), 1, &terms, &symbols);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending.iter().next().unwrap().rule, RuleId(1));
}

#[test]
fn mismatched_facts_skip_pattern() {
    let (mut symbols, terms) = setup();
    let item = symbols.declare_con("item", 2);
    let path = symbols.declare_con("path", 2);
    let a = terms.app0(symbols.declare_con("a", 0));
    let (_, free) = markers(&terms, &symbols);

    // Trigger keeps a ground child: only item(5, _) facts match.
    let canon = terms.app2(item, terms.int(5), free);
    let mut triggers = TriggerIndex::new(1);
    let pid = triggers.register(canon, 0, RuleId(0), 0, &terms);

    let mut index = FactIndex::new(&triggers, false, &terms, &symbols);
    let mut pending = BTreeSet::new();
    index.try_add(terms.app2(item, terms.int(6), a), None, Some(&mut pending), 0, &terms, &symbols);
    index.try_add(terms.app2(path, terms.int(5), a), None, Some(&mut pending), 0, &terms, &symbols);
    assert!(pending.is_empty(), "neither fact matches the trigger");
    assert_eq!(index.query(pid, &[]).count(), 0);

    let hit = terms.app2(item, terms.int(5), a);
    index.try_add(hit, None, Some(&mut pending), 0, &terms, &symbols);
    assert_eq!(pending.len(), 1);
    assert_eq!(index.query(pid, &[]).collect::<Vec<_>>(), vec![hit]);
}

// ========== PROJECTION BUCKETS ==========

#[test]
fn projection_buckets_isolate_candidates() {
    let (mut symbols, terms) = setup();
    let edge = symbols.declare_con("edge", 2);
    let a = terms.app0(symbols.declare_con("a", 0));
    let b = terms.app0(symbols.declare_con("b", 0));
    let c = terms.app0(symbols.declare_con("c", 0));
    let (bound, free) = markers(&terms, &symbols);

    let canon = terms.app2(edge, bound, free);
    let mut triggers = TriggerIndex::new(1);
    let pid = triggers.register(canon, 0, RuleId(0), 0, &terms);

    let mut index = FactIndex::new(&triggers, false, &terms, &symbols);
    let e_ab = terms.app2(edge, a, b);
    let e_ac = terms.app2(edge, a, c);
    let e_bc = terms.app2(edge, b, c);
    for f in [e_ab, e_ac, e_bc] {
        index.try_add(f, None, None, 0, &terms, &symbols);
    }

    let from_a: BTreeSet<_> = index.query(pid, &[a]).collect();
    assert_eq!(from_a, BTreeSet::from([e_ab, e_ac]));
    assert_eq!(index.query(pid, &[b]).collect::<Vec<_>>(), vec![e_bc]);
    assert_eq!(index.query(pid, &[c]).count(), 0);
}

#[test]
fn family_placeholder_routes_literals() {
    let (symbols, terms) = setup();
    let s = symbols.intern("label");
    let canon = terms.app0(symbols.int_family());
    let mut triggers = TriggerIndex::new(1);
    let pid = triggers.register(canon, 0, RuleId(0), 0, &terms);

    let mut index = FactIndex::new(&triggers, false, &terms, &symbols);
    let mut pending = BTreeSet::new();
    let n = terms.int(42);
    index.try_add(n, None, Some(&mut pending), 0, &terms, &symbols);
    index.try_add(terms.str_lit(s), None, Some(&mut pending), 0, &terms, &symbols);

    assert_eq!(pending.len(), 1, "only the int literal is routed");
    assert_eq!(pending.iter().next().unwrap().binding, n);
    assert_eq!(index.query(pid, &[]).collect::<Vec<_>>(), vec![n]);
}

// ========== AT-MOST-ONCE INSERTION ==========

#[test]
fn duplicate_insert_neither_pends_nor_reindexes() {
    let (mut symbols, terms) = setup();
    let edge = symbols.declare_con("edge", 2);
    let a = terms.app0(symbols.declare_con("a", 0));
    let b = terms.app0(symbols.declare_con("b", 0));
    let (_, free) = markers(&terms, &symbols);

    let canon = terms.app2(edge, free, free);
    let mut triggers = TriggerIndex::new(1);
    let pid = triggers.register(canon, 0, RuleId(0), 0, &terms);

    let mut index = FactIndex::new(&triggers, false, &terms, &symbols);
    let fact = terms.app2(edge, a, b);
    assert!(index.try_add(fact, None, None, 0, &terms, &symbols));

    let mut pending = BTreeSet::new();
    assert!(!index.try_add(fact, None, Some(&mut pending), 0, &terms, &symbols));
    assert!(pending.is_empty(), "a repeat insert must not re-trigger");
    assert_eq!(index.len(), 1);
    assert_eq!(index.query(pid, &[]).count(), 1);
}

#[test]
fn new_derivations_accumulate_without_retrigger() {
    let (mut symbols, terms) = setup();
    let goal_sym = symbols.declare_con("goal", 0);
    let x = terms.app0(symbols.declare_con("x", 0));
    let y = terms.app0(symbols.declare_con("y", 0));
    let fls = terms.app0(symbols.fls());

    let triggers = TriggerIndex::new(1);
    let mut index = FactIndex::new(&triggers, true, &terms, &symbols);
    let goal = terms.app0(goal_sym);
    let d1 = Derivation::new(RuleId(0), x, fls);
    let d2 = Derivation::new(RuleId(1), y, fls);

    assert!(index.try_add(goal, Some(d1), None, 0, &terms, &symbols));
    assert!(!index.try_add(goal, Some(d2), None, 0, &terms, &symbols));
    assert!(!index.try_add(goal, Some(d1), None, 0, &terms, &symbols));

    let derivs = index.derivations(goal).expect("tracked run");
    assert_eq!(derivs.len(), 2, "distinct justifications coexist");
    assert!(derivs.contains(&d1) && derivs.contains(&d2));
}

#[test]
fn untracked_run_stores_no_derivations() {
    let (mut symbols, terms) = setup();
    let goal = terms.app0(symbols.declare_con("goal", 0));
    let triggers = TriggerIndex::new(1);
    let mut index = FactIndex::new(&triggers, false, &terms, &symbols);
    index.try_add(goal, Some(axiom(&terms, &symbols)), None, 0, &terms, &symbols);
    assert!(index.contains(goal));
    assert!(index.derivations(goal).is_none());
}

// ========== TYPE QUERIES ==========

#[test]
fn type_query_probes_one_candidate() {
    let (mut symbols, terms) = setup();
    let a = symbols.declare_con("a", 0);
    let b = symbols.declare_con("b", 0);
    let c = symbols.declare_con("c", 0);
    let v = symbols.declare_type("V", &[a, b], false, false);

    let triggers = TriggerIndex::new(1);
    let mut index = FactIndex::new(&triggers, false, &terms, &symbols);
    let fa = terms.app0(a);
    let fc = terms.app0(c);
    index.try_add(fa, None, None, 0, &terms, &symbols);
    index.try_add(fc, None, None, 0, &terms, &symbols);

    assert_eq!(index.query_type(v, Some(fa), &terms, &symbols).into_vec(), vec![fa]);
    // Right type, never derived.
    let fb = terms.app0(b);
    assert!(index.query_type(v, Some(fb), &terms, &symbols).is_empty());
    // Derived, wrong type.
    assert!(index.query_type(v, Some(fc), &terms, &symbols).is_empty());
}

#[test]
fn type_query_unions_family_groups() {
    let (mut symbols, terms) = setup();
    let a = symbols.declare_con("a", 0);
    let b = symbols.declare_con("b", 0);
    let c = symbols.declare_con("c", 0);
    let v = symbols.declare_type("V", &[a, b], false, true);

    let triggers = TriggerIndex::new(1);
    let mut index = FactIndex::new(&triggers, false, &terms, &symbols);
    let fa = terms.app0(a);
    let fb = terms.app0(b);
    let fc = terms.app0(c);
    let hello = terms.str_lit(symbols.intern("hello"));
    let n = terms.int(7);
    for f in [fa, fb, fc, hello, n] {
        index.try_add(f, None, None, 0, &terms, &symbols);
    }

    let got: BTreeSet<_> = index.query_type(v, None, &terms, &symbols).into_iter().collect();
    assert_eq!(got, BTreeSet::from([fa, fb, hello]), "c and the int are outside the bin");
}

// ========== STRATUM SEEDING ==========

#[test]
fn pend_stratum_replays_stored_facts() {
    let (mut symbols, terms) = setup();
    let edge = symbols.declare_con("edge", 2);
    let a = terms.app0(symbols.declare_con("a", 0));
    let b = terms.app0(symbols.declare_con("b", 0));
    let (_, free) = markers(&terms, &symbols);

    let canon = terms.app2(edge, free, free);
    let mut triggers = TriggerIndex::new(2);
    triggers.register(canon, 1, RuleId(4), 0, &terms);

    let mut index = FactIndex::new(&triggers, false, &terms, &symbols);
    let mut pending = BTreeSet::new();
    let e_ab = terms.app2(edge, a, b);
    let e_ba = terms.app2(edge, b, a);
    index.try_add(e_ab, None, Some(&mut pending), 0, &terms, &symbols);
    index.try_add(e_ba, None, Some(&mut pending), 0, &terms, &symbols);
    assert!(pending.is_empty(), "the listener sits in a later stratum");

    index.pend_stratum(1, &mut pending);
    let got: Vec<_> = pending.iter().map(|p| (p.binding, p.rule, p.slot)).collect();
    let mut expect = vec![(e_ab, RuleId(4), 0), (e_ba, RuleId(4), 0)];
    expect.sort();
    assert_eq!(got, expect);
}

#[test]
fn untriggered_rules_pend_at_stratum_onset() {
    let (symbols, terms) = setup();
    let mut triggers = TriggerIndex::new(2);
    triggers.register_untriggered(0, RuleId(2));
    triggers.register_untriggered(1, RuleId(5));

    let index = FactIndex::new(&triggers, false, &terms, &symbols);
    let mut pending = BTreeSet::new();
    index.pend_stratum(0, &mut pending);
    assert_eq!(pending.len(), 1);
    let act = *pending.iter().next().unwrap();
    assert_eq!(act.rule, RuleId(2));
    assert_eq!(act.slot, UNTRIGGERED_SLOT);

    pending.clear();
    index.pend_stratum(1, &mut pending);
    assert_eq!(pending.iter().next().unwrap().rule, RuleId(5));
}
