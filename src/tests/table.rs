use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

use super::RuleTable;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::index::{FactIndex, UNTRIGGERED_SLOT};
use crate::rule::{FindData, RuleDef, RuleId};
use crate::test_utils::setup;

// ========== BUILDING ==========

#[test]
fn build_compiles_and_stratifies() {
    let (mut symbols, terms) = setup();
    let edge = symbols.declare_con("edge", 2);
    let path = symbols.declare_con("path", 2);
    let a = terms.app0(symbols.declare_con("a", 0));
    let b = terms.app0(symbols.declare_con("b", 0));
    let x = terms.var(0);
    let y = terms.var(1);
    let z = terms.var(2);

    let mut builder = RuleTable::builder(&terms, &symbols);
    let seed = builder.rule(RuleDef::new("seed", terms.app2(edge, a, b)));
    let close = builder.rule(
        RuleDef::new("close", terms.app2(path, x, z))
            .find(FindData::anon(terms.app2(edge, x, y), None))
            .find(FindData::anon(terms.app2(path, y, z), None)),
    );
    let table = builder.build(&EngineConfig::new()).unwrap();

    assert_eq!(table.len(), 2);
    assert_eq!(table.strata_count(), 2, "closure drains after its seeds");
    assert_eq!(table.rule_by_label("close"), Some(close));
    assert_eq!(table.rule(seed).label(), "seed");
    assert_eq!(table.rule(seed).stratum(), Some(0));
    assert_eq!(table.rule(close).stratum(), Some(1));
    assert!(table.rule(close).as_core().is_some());
    assert_eq!(table.stats(close).report().activations, 0);
}

#[test]
fn duplicate_labels_are_rejected() {
    let (mut symbols, terms) = setup();
    let t = terms.app0(symbols.declare_con("t", 0));
    let mut builder = RuleTable::builder(&terms, &symbols);
    builder.rule(RuleDef::new("twice", t));
    builder.rule(RuleDef::new("twice", t));
    let err = builder
        .build(&EngineConfig::new())
        .err()
        .expect("duplicate labels must fail the build");
    assert_eq!(err, EngineError::DuplicateRuleLabel("twice".to_string()));
}

#[test]
fn unstratifiable_rules_fail_the_build() {
    let (mut symbols, terms) = setup();
    let total = symbols.declare_con("total", 1);
    let parts = symbols.declare_con("parts", 2);
    let x = terms.var(0);

    let mut builder = RuleTable::builder(&terms, &symbols);
    builder.sub_rule(
        "collect",
        parts,
        FindData::anon(terms.app1(total, x), None),
        [x],
    );
    builder.rule(RuleDef::new("sum", terms.app1(total, x)).compr_read(parts));
    let err = builder
        .build(&EngineConfig::new())
        .err()
        .expect("a comprehension cycle must fail the build");
    assert!(matches!(err, EngineError::Unstratifiable { cycle } if cycle.len() == 2));
}

// ========== TRIGGER REGISTRATION ==========

#[test]
fn canonical_patterns_reach_the_trigger_registry() {
    let (mut symbols, terms) = setup();
    let edge = symbols.declare_con("edge", 2);
    let path = symbols.declare_con("path", 2);
    let x = terms.var(0);
    let y = terms.var(1);
    let z = terms.var(2);
    let bound = terms.app0(symbols.bound_marker());
    let free = terms.app0(symbols.free_marker());

    let mut builder = RuleTable::builder(&terms, &symbols);
    builder.rule(
        RuleDef::new("close", terms.app2(path, x, z))
            .find(FindData::anon(terms.app2(edge, x, y), None))
            .find(FindData::anon(terms.app2(path, y, z), None)),
    );
    let table = builder.build(&EngineConfig::new()).unwrap();

    let triggers = table.triggers();
    assert!(
        triggers.pattern_id(terms.app2(edge, free, bound)).is_some(),
        "slot 0 projects the join variable"
    );
    assert!(
        triggers.pattern_id(terms.app2(path, bound, free)).is_some(),
        "slot 1 projects the join variable"
    );
}

#[test]
fn bare_variable_find_fans_out_over_its_type_bin() {
    let (mut symbols, terms) = setup();
    let a = symbols.declare_con("a", 0);
    let w = symbols.declare_con("w", 2);
    let v = symbols.declare_type("V", &[a, w], true, false);
    let keep = symbols.declare_con("keep", 1);
    let x = terms.var(0);
    let binder = terms.var(1);
    let free = terms.app0(symbols.free_marker());

    let mut builder = RuleTable::builder(&terms, &symbols);
    builder.rule(
        RuleDef::new("scan", terms.app1(keep, binder)).find(FindData::new(binder, x, Some(v))),
    );
    let table = builder.build(&EngineConfig::new()).unwrap();

    let triggers = table.triggers();
    assert!(triggers.pattern_id(terms.app0(a)).is_some());
    assert!(triggers.pattern_id(terms.app2(w, free, free)).is_some());
    assert!(
        triggers.pattern_id(terms.app0(symbols.int_family())).is_some(),
        "the int family placeholder covers literal facts"
    );
}

#[test]
fn untriggered_rules_pend_through_the_built_registry() {
    let (mut symbols, terms) = setup();
    let item = symbols.declare_con("item", 1);
    let total = symbols.declare_con("total", 1);
    let feed = symbols.declare_con("feed", 1);
    let x = terms.var(0);

    let mut builder = RuleTable::builder(&terms, &symbols);
    builder.sub_rule("fill", item, FindData::anon(terms.app1(feed, x), None), [x]);
    let agg = builder.rule(RuleDef::new("agg", terms.app1(total, terms.int(0))).compr_read(item));
    let table = builder.build(&EngineConfig::new()).unwrap();

    assert_eq!(table.strata_count(), 2);
    assert_eq!(table.rule(agg).stratum(), Some(1));
    assert!(table.rule(agg).as_core().unwrap().is_untriggered());

    let facts = FactIndex::new(table.triggers(), false, &terms, &symbols);
    let mut pending = BTreeSet::new();
    facts.pend_stratum(1, &mut pending);
    let acts: Vec<_> = pending.iter().map(|p| (p.rule, p.slot)).collect();
    assert_eq!(acts, vec![(agg, UNTRIGGERED_SLOT)]);
}

// ========== CLONING ==========

#[test]
fn clone_renames_symbols_and_merges_settings() {
    let (mut symbols, terms) = setup();
    let edge = symbols.declare_con("edge", 2);
    let path = symbols.declare_con("path", 2);
    let edge2 = symbols.declare_con("edge2", 2);
    let path2 = symbols.declare_con("path2", 2);
    let x = terms.var(0);
    let y = terms.var(1);

    let mut config = EngineConfig::new();
    config.set_classes("lift", "core, derived");
    config.set_watch("lift");
    config.set_classes("liftB", "fast, core");

    let renaming: FxHashMap<_, _> = [(edge, edge2), (path, path2)].into_iter().collect();
    let mut builder = RuleTable::builder(&terms, &symbols);
    let original = builder.rule(
        RuleDef::new("lift", terms.app2(path, x, y))
            .find(FindData::anon(terms.app2(edge, x, y), None)),
    );
    let cloned = builder.clone_rule(original, "liftB", &renaming);
    assert_ne!(original, cloned);
    let table = builder.build(&config).unwrap();

    let orig = table.rule(original).as_core().unwrap();
    assert_eq!(orig.head_symbol(&terms), Some(path));
    assert_eq!(orig.classes, vec!["core".to_string(), "derived".to_string()]);
    assert!(orig.is_watched);

    let copy = table.rule(cloned).as_core().unwrap();
    assert_eq!(copy.id, cloned);
    assert_eq!(copy.label, "liftB");
    assert_eq!(copy.head_symbol(&terms), Some(path2));
    assert_eq!(
        terms.is_app(copy.find(0).unwrap().pattern).map(|(s, _)| s),
        Some(edge2),
        "the find pattern follows the renaming"
    );
    assert_eq!(
        copy.classes,
        vec!["core".to_string(), "derived".to_string(), "fast".to_string()],
        "clone classes union with the source's, deduplicated"
    );
    assert!(copy.is_watched, "watch inherits across the clone");
}

#[test]
fn clone_of_sub_rule_renames_its_matcher() {
    let (mut symbols, terms) = setup();
    let expr = symbols.declare_con("expr", 1);
    let expr2 = symbols.declare_con("expr2", 1);
    let parts = symbols.declare_con("parts", 2);
    let parts2 = symbols.declare_con("parts2", 2);
    let x = terms.var(0);

    let renaming: FxHashMap<_, _> = [(expr, expr2), (parts, parts2)].into_iter().collect();
    let mut builder = RuleTable::builder(&terms, &symbols);
    let original = builder.sub_rule(
        "split",
        parts,
        FindData::anon(terms.app1(expr, x), None),
        [terms.app1(expr, x)],
    );
    let cloned = builder.clone_rule(original, "splitB", &renaming);
    let table = builder.build(&EngineConfig::new()).unwrap();

    let copy = table.rule(cloned).as_sub().unwrap();
    assert_eq!(copy.head_sym, parts2);
    assert_eq!(
        terms.is_app(copy.trigger.pattern).map(|(s, _)| s),
        Some(expr2)
    );
    assert_eq!(copy.matcher.patterns(), &[terms.app1(expr2, x)]);
    assert_eq!(table.rule(original).as_sub().unwrap().head_sym, parts);
}

// ========== STRATA THROUGH THE TABLE ==========

#[test]
fn comprehension_consumers_sit_above_their_producers() {
    let (mut symbols, terms) = setup();
    let feed = symbols.declare_con("feed", 1);
    let cell = symbols.declare_con("cell", 2);
    let report = symbols.declare_con("report", 1);
    let x = terms.var(0);
    let binder = terms.var(1);

    let mut builder = RuleTable::builder(&terms, &symbols);
    let split = builder.sub_rule("split", cell, FindData::anon(terms.app1(feed, x), None), [x]);
    let read = builder.rule(
        RuleDef::new("read", terms.app1(report, binder))
            .find(FindData::new(binder, terms.app2(cell, x, x), None)),
    );
    let table = builder.build(&EngineConfig::new()).unwrap();

    assert_eq!(table.rule(split).stratum(), Some(0));
    assert_eq!(
        table.rule(read).stratum(),
        Some(1),
        "reading a comprehension's cells lifts the reader"
    );
    assert_eq!(table.strata_count(), 2);
}
