//! Deterministic oracle over the free term algebra.
//!
//! Unification is sorted Robinson unification with occurs check. AC
//! applications are compared after flattening and sorting their arguments,
//! as if the symbol were free, so the oracle is sound but incomplete for AC
//! theories. Every rule instance is its own single variant.

use crate::oracle::{EquationalOracle, OracleError};
use crate::rule::RuleInstance;
use crate::term::{Apply, LVar, Subst, Term};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct SyntacticOracle;

impl SyntacticOracle {
    pub fn new() -> Self {
        Self
    }
}

fn bind(subst: &mut Subst, v: LVar, t: Term) -> bool {
    if t.occurs(&v) || !v.sort.subsumes(t.sort()) {
        return false;
    }
    *subst = subst.then(&Subst::singleton(v, t));
    true
}

/// Most general unifier of `pairs`, if any.
pub fn mgu(pairs: &[(Term, Term)]) -> Option<Subst> {
    let mut subst = Subst::new();
    let mut stack: Vec<(Term, Term)> = pairs
        .iter()
        .rev()
        .map(|(a, b)| (a.ac_normalize(), b.ac_normalize()))
        .collect();
    while let Some((a, b)) = stack.pop() {
        let a = a.apply(&subst);
        let b = b.apply(&subst);
        if a == b {
            continue;
        }
        let ok = match (a, b) {
            (Term::Var(x), Term::Var(y)) => {
                if x.sort.subsumes(y.sort) {
                    bind(&mut subst, x, Term::Var(y))
                } else {
                    bind(&mut subst, y, Term::Var(x))
                }
            }
            (Term::Var(x), t) | (t, Term::Var(x)) => bind(&mut subst, x, t),
            (Term::App(f, xs), Term::App(g, ys)) if f == g && xs.len() == ys.len() => {
                stack.extend(xs.into_iter().zip(ys).rev());
                true
            }
            _ => false,
        };
        if !ok {
            return None;
        }
    }
    Some(subst)
}

/// One-way matching of `pattern` against `term`, extending `bindings`.
///
/// Identity bindings are kept so that a later occurrence of the same
/// pattern variable is checked against them.
pub fn match_with(bindings: &mut BTreeMap<LVar, Term>, term: &Term, pattern: &Term) -> bool {
    match (pattern, term) {
        (Term::Var(v), _) => match bindings.get(v) {
            Some(bound) => bound == term,
            None => {
                if !v.sort.subsumes(term.sort()) {
                    return false;
                }
                bindings.insert(v.clone(), term.clone());
                true
            }
        },
        (Term::Name(k1, n1), Term::Name(k2, n2)) => k1 == k2 && n1 == n2,
        (Term::App(f, ps), Term::App(g, ts)) if f == g && ps.len() == ts.len() => {
            ps.iter().zip(ts).all(|(p, t)| match_with(bindings, t, p))
        }
        _ => false,
    }
}

impl EquationalOracle for SyntacticOracle {
    fn unify_terms(&self, pairs: &[(Term, Term)]) -> Result<Vec<Subst>, OracleError> {
        Ok(mgu(pairs).into_iter().collect())
    }

    fn match_term(&self, term: &Term, pattern: &Term) -> Result<Option<Subst>, OracleError> {
        let mut bindings = BTreeMap::new();
        if !match_with(&mut bindings, &term.ac_normalize(), &pattern.ac_normalize()) {
            return Ok(None);
        }
        Ok(Some(Subst::from_pairs(bindings)))
    }

    fn variants_of(&self, _ru: &RuleInstance) -> Result<Vec<Subst>, OracleError> {
        Ok(vec![Subst::new()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::{Fact, FactEq};
    use crate::term::FunSym;

    fn x() -> Term {
        Term::Var(LVar::msg("x", 0))
    }

    fn y() -> Term {
        Term::Var(LVar::msg("y", 0))
    }

    fn h(t: Term) -> Term {
        Term::app(FunSym::free("h"), vec![t])
    }

    #[test]
    fn unifies_nested_terms() {
        let oracle = SyntacticOracle::new();
        let us = oracle
            .unify_terms(&[(Term::pair(x(), h(y())), Term::pair(h(Term::pub_name("a")), h(x())))])
            .unwrap();
        assert_eq!(us.len(), 1);
        assert_eq!(y().apply(&us[0]), h(Term::pub_name("a")));
        let us = oracle
            .unify_terms(&[(
                Term::pair(x(), x()),
                Term::pair(h(Term::pub_name("a")), h(Term::pub_name("b"))),
            )])
            .unwrap();
        assert!(us.is_empty());
        let us = oracle
            .unify_terms(&[(Term::pair(x(), y()), Term::pair(h(y()), Term::pub_name("a")))])
            .unwrap();
        assert_eq!(us.len(), 1);
        assert_eq!(x().apply(&us[0]), h(Term::pub_name("a")));
    }

    #[test]
    fn occurs_check_and_sorts() {
        let oracle = SyntacticOracle::new();
        assert!(!oracle.unifiable_terms(&x(), &h(x())).unwrap());
        let fresh = Term::Var(LVar::fresh("n", 0));
        assert!(!oracle.unifiable_terms(&fresh, &h(x())).unwrap());
        assert!(oracle.unifiable_terms(&fresh, &x()).unwrap());
        assert!(!oracle.unifiable_terms(&fresh, &Term::pub_name("a")).unwrap());
    }

    #[test]
    fn facts_of_different_shape_never_unify() {
        let oracle = SyntacticOracle::new();
        let eq = FactEq::new(Fact::knows_up(x()), Fact::knows_down(x()));
        assert!(oracle.unify(&[eq]).unwrap().is_empty());
    }

    #[test]
    fn matching_is_one_way() {
        let oracle = SyntacticOracle::new();
        let m = oracle.match_term(&h(Term::pub_name("a")), &h(x())).unwrap();
        assert_eq!(m, Some(Subst::singleton(LVar::msg("x", 0), Term::pub_name("a"))));
        assert_eq!(oracle.match_term(&h(x()), &h(Term::pub_name("a"))).unwrap(), None);
        assert_eq!(oracle.match_term(&Term::pair(Term::pub_name("a"), Term::pub_name("b")), &Term::pair(x(), x())).unwrap(), None);
        assert_eq!(oracle.match_term(&Term::pair(x(), Term::pub_name("b")), &Term::pair(x(), x())).unwrap(), None);
    }
}
