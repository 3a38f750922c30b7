use crate::symbol::SymbolStore;
use crate::term::{Term, TermId, TermStore};

/// Builtin operators evaluated over ground arguments.
///
/// Functional operators produce a term; relational operators produce the
/// `#true`/`#false` sentinels. Evaluation failure (type mismatch, division
/// by zero, overflow) is `None`, which callers treat as match failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Max,
    Min,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BuiltinOp {
    /// Number of arguments the operator expects.
    pub fn arity(self) -> u8 {
        2
    }

    /// Whether the operator is relational: its value is a truth sentinel
    /// rather than a data term.
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            BuiltinOp::Eq
                | BuiltinOp::Neq
                | BuiltinOp::Lt
                | BuiltinOp::Le
                | BuiltinOp::Gt
                | BuiltinOp::Ge
        )
    }
}

fn as_int(terms: &TermStore, id: TermId) -> Option<i64> {
    match terms.resolve(id)? {
        Term::Int(v) => Some(v),
        _ => None,
    }
}

fn truth(value: bool, terms: &TermStore, symbols: &SymbolStore) -> TermId {
    if value {
        terms.app0(symbols.tru())
    } else {
        terms.app0(symbols.fls())
    }
}

/// Compare two ground terms for the ordering relations. Integers compare
/// numerically, strings lexicographically; anything else has no order.
fn compare(
    terms: &TermStore,
    symbols: &SymbolStore,
    a: TermId,
    b: TermId,
) -> Option<std::cmp::Ordering> {
    match (terms.resolve(a)?, terms.resolve(b)?) {
        (Term::Int(x), Term::Int(y)) => Some(x.cmp(&y)),
        (Term::Str(x), Term::Str(y)) => {
            let sx = symbols.resolve(x)?;
            let sy = symbols.resolve(y)?;
            Some(sx.cmp(sy))
        }
        _ => None,
    }
}

/// Evaluate a builtin operator over ground arguments.
pub fn eval(
    op: BuiltinOp,
    args: &[TermId],
    terms: &TermStore,
    symbols: &SymbolStore,
) -> Option<TermId> {
    if args.len() != op.arity() as usize {
        return None;
    }
    debug_assert!(
        args.iter().all(|&a| terms.is_ground(a)),
        "builtin arguments must be ground"
    );
    let (a, b) = (args[0], args[1]);
    match op {
        BuiltinOp::Add => {
            let v = as_int(terms, a)?.checked_add(as_int(terms, b)?)?;
            Some(terms.int(v))
        }
        BuiltinOp::Sub => {
            let v = as_int(terms, a)?.checked_sub(as_int(terms, b)?)?;
            Some(terms.int(v))
        }
        BuiltinOp::Mul => {
            let v = as_int(terms, a)?.checked_mul(as_int(terms, b)?)?;
            Some(terms.int(v))
        }
        BuiltinOp::Div => {
            let v = as_int(terms, a)?.checked_div(as_int(terms, b)?)?;
            Some(terms.int(v))
        }
        BuiltinOp::Mod => {
            let v = as_int(terms, a)?.checked_rem(as_int(terms, b)?)?;
            Some(terms.int(v))
        }
        BuiltinOp::Max => {
            let x = as_int(terms, a)?;
            let y = as_int(terms, b)?;
            Some(terms.int(x.max(y)))
        }
        BuiltinOp::Min => {
            let x = as_int(terms, a)?;
            let y = as_int(terms, b)?;
            Some(terms.int(x.min(y)))
        }
        // Hashconsing makes structural equality an id comparison.
        BuiltinOp::Eq => Some(truth(a == b, terms, symbols)),
        BuiltinOp::Neq => Some(truth(a != b, terms, symbols)),
        BuiltinOp::Lt => {
            let ord = compare(terms, symbols, a, b)?;
            Some(truth(ord.is_lt(), terms, symbols))
        }
        BuiltinOp::Le => {
            let ord = compare(terms, symbols, a, b)?;
            Some(truth(ord.is_le(), terms, symbols))
        }
        BuiltinOp::Gt => {
            let ord = compare(terms, symbols, a, b)?;
            Some(truth(ord.is_gt(), terms, symbols))
        }
        BuiltinOp::Ge => {
            let ord = compare(terms, symbols, a, b)?;
            Some(truth(ord.is_ge(), terms, symbols))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (SymbolStore, TermStore) {
        (SymbolStore::new(), TermStore::new())
    }

    // ========== ARITHMETIC ==========

    #[test]
    fn add_produces_int_term() {
        let (symbols, terms) = setup();
        let a = terms.int(2);
        let b = terms.int(3);
        assert_eq!(
            eval(BuiltinOp::Add, &[a, b], &terms, &symbols),
            Some(terms.int(5))
        );
    }

    #[test]
    fn sub_and_mul() {
        let (symbols, terms) = setup();
        let a = terms.int(10);
        let b = terms.int(4);
        assert_eq!(
            eval(BuiltinOp::Sub, &[a, b], &terms, &symbols),
            Some(terms.int(6))
        );
        assert_eq!(
            eval(BuiltinOp::Mul, &[a, b], &terms, &symbols),
            Some(terms.int(40))
        );
    }

    #[test]
    fn div_by_zero_fails() {
        let (symbols, terms) = setup();
        let a = terms.int(1);
        let z = terms.int(0);
        assert_eq!(eval(BuiltinOp::Div, &[a, z], &terms, &symbols), None);
        assert_eq!(eval(BuiltinOp::Mod, &[a, z], &terms, &symbols), None);
    }

    #[test]
    fn overflow_fails() {
        let (symbols, terms) = setup();
        let a = terms.int(i64::MAX);
        let b = terms.int(1);
        assert_eq!(
            eval(BuiltinOp::Add, &[a, b], &terms, &symbols),
            None,
            "Overflowing arithmetic should fail, not wrap"
        );
    }

    #[test]
    fn max_min() {
        let (symbols, terms) = setup();
        let a = terms.int(-3);
        let b = terms.int(7);
        assert_eq!(
            eval(BuiltinOp::Max, &[a, b], &terms, &symbols),
            Some(terms.int(7))
        );
        assert_eq!(
            eval(BuiltinOp::Min, &[a, b], &terms, &symbols),
            Some(terms.int(-3))
        );
    }

    // ========== RELATIONS ==========

    #[test]
    fn lt_yields_truth_sentinels() {
        let (symbols, terms) = setup();
        let a = terms.int(1);
        let b = terms.int(2);
        let tru = terms.app0(symbols.tru());
        let fls = terms.app0(symbols.fls());
        assert_eq!(eval(BuiltinOp::Lt, &[a, b], &terms, &symbols), Some(tru));
        assert_eq!(eval(BuiltinOp::Lt, &[b, a], &terms, &symbols), Some(fls));
    }

    #[test]
    fn eq_on_constructed_terms() {
        let (symbols, terms) = setup();
        let f = symbols.intern("F");
        let t1 = terms.app1(f, terms.int(1));
        let t2 = terms.app1(f, terms.int(1));
        let t3 = terms.app1(f, terms.int(2));
        let tru = terms.app0(symbols.tru());
        let fls = terms.app0(symbols.fls());
        assert_eq!(eval(BuiltinOp::Eq, &[t1, t2], &terms, &symbols), Some(tru));
        assert_eq!(eval(BuiltinOp::Eq, &[t1, t3], &terms, &symbols), Some(fls));
        assert_eq!(eval(BuiltinOp::Neq, &[t1, t3], &terms, &symbols), Some(tru));
    }

    #[test]
    fn string_comparison_is_lexicographic() {
        let (symbols, terms) = setup();
        let a = terms.str_lit(symbols.intern("apple"));
        let b = terms.str_lit(symbols.intern("banana"));
        let tru = terms.app0(symbols.tru());
        assert_eq!(eval(BuiltinOp::Lt, &[a, b], &terms, &symbols), Some(tru));
    }

    // ========== FAILURES ==========

    #[test]
    fn type_mismatch_fails() {
        let (symbols, terms) = setup();
        let a = terms.int(1);
        let s = terms.str_lit(symbols.intern("x"));
        assert_eq!(eval(BuiltinOp::Add, &[a, s], &terms, &symbols), None);
        assert_eq!(eval(BuiltinOp::Lt, &[a, s], &terms, &symbols), None);
    }

    #[test]
    fn wrong_arity_fails() {
        let (symbols, terms) = setup();
        let a = terms.int(1);
        assert_eq!(eval(BuiltinOp::Add, &[a], &terms, &symbols), None);
    }

    #[test]
    fn relational_classification() {
        assert!(BuiltinOp::Lt.is_relational());
        assert!(BuiltinOp::Eq.is_relational());
        assert!(!BuiltinOp::Add.is_relational());
        assert!(!BuiltinOp::Max.is_relational());
    }
}
