//! Guarded trace formulas.
//!
//! Formulas are built over four atom kinds and the usual connectives.
//! Quantifiers are guarded: a universal reads `∀ vs. guards ⇒ body`, an
//! existential reads `∃ vs. guards ∧ body`.
//!
//! Bound variables are assumed to be distinct from every variable in the
//! substitutions applied to a formula; renaming apart is the caller's job.

use crate::core::NodeId;
use crate::fact::Fact;
use crate::term::{Apply, FreshSupply, HasVars, LVar, Subst, Term};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Atomic formula.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Atom {
    /// `fact @ i`
    Action(NodeId, Fact),
    /// `i < j`
    Less(NodeId, NodeId),
    /// `s = t`
    Equal(Term, Term),
    /// `last(i)`
    Last(NodeId),
}

impl Atom {
    /// Action and equality atoms can be discharged by matching.
    pub fn is_matchable(&self) -> bool {
        matches!(self, Atom::Action(..) | Atom::Equal(..))
    }
}

impl HasVars for Atom {
    fn visit_vars(&self, f: &mut dyn FnMut(&LVar)) {
        match self {
            Atom::Action(i, fact) => {
                i.visit_vars(f);
                fact.visit_vars(f);
            }
            Atom::Less(i, j) => {
                i.visit_vars(f);
                j.visit_vars(f);
            }
            Atom::Equal(s, t) => {
                s.visit_vars(f);
                t.visit_vars(f);
            }
            Atom::Last(i) => i.visit_vars(f),
        }
    }
}

impl Apply for Atom {
    fn apply(&self, subst: &Subst) -> Atom {
        match self {
            Atom::Action(i, fact) => Atom::Action(i.apply(subst), fact.apply(subst)),
            Atom::Less(i, j) => Atom::Less(i.apply(subst), j.apply(subst)),
            Atom::Equal(s, t) => Atom::Equal(s.apply(subst), t.apply(subst)),
            Atom::Last(i) => Atom::Last(i.apply(subst)),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Action(i, fact) => write!(f, "{} @ {}", fact, i),
            Atom::Less(i, j) => write!(f, "{} < {}", i, j),
            Atom::Equal(s, t) => write!(f, "{} = {}", s, t),
            Atom::Last(i) => write!(f, "last({})", i),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Quantifier {
    All,
    Ex,
}

/// A guarded formula.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Formula {
    Atom(Atom),
    Not(Box<Formula>),
    /// Conjunction; empty is true.
    Conj(Vec<Formula>),
    /// Disjunction; empty is false.
    Disj(Vec<Formula>),
    Guarded {
        quantifier: Quantifier,
        vars: Vec<LVar>,
        guards: Vec<Atom>,
        body: Box<Formula>,
    },
}

impl Formula {
    pub fn top() -> Self {
        Formula::Conj(Vec::new())
    }

    pub fn bot() -> Self {
        Formula::Disj(Vec::new())
    }

    pub fn atom(a: Atom) -> Self {
        Formula::Atom(a)
    }

    pub fn not(f: Formula) -> Self {
        Formula::Not(Box::new(f))
    }

    pub fn all(vars: Vec<LVar>, guards: Vec<Atom>, body: Formula) -> Self {
        Formula::Guarded {
            quantifier: Quantifier::All,
            vars,
            guards,
            body: Box::new(body),
        }
    }

    pub fn ex(vars: Vec<LVar>, guards: Vec<Atom>, body: Formula) -> Self {
        Formula::Guarded {
            quantifier: Quantifier::Ex,
            vars,
            guards,
            body: Box::new(body),
        }
    }

    pub fn is_disjunction(&self) -> bool {
        matches!(self, Formula::Disj(ds) if !ds.is_empty())
    }

    /// Negation pushed through connectives and quantifiers. Atoms are
    /// wrapped in `Not`, double negations cancel.
    pub fn negate(&self) -> Formula {
        match self {
            Formula::Atom(_) => Formula::not(self.clone()),
            Formula::Not(inner) => (**inner).clone(),
            Formula::Conj(fs) => Formula::Disj(fs.iter().map(Formula::negate).collect()),
            Formula::Disj(fs) => Formula::Conj(fs.iter().map(Formula::negate).collect()),
            Formula::Guarded {
                quantifier,
                vars,
                guards,
                body,
            } => Formula::Guarded {
                quantifier: match quantifier {
                    Quantifier::All => Quantifier::Ex,
                    Quantifier::Ex => Quantifier::All,
                },
                vars: vars.clone(),
                guards: guards.clone(),
                body: Box::new(body.negate()),
            },
        }
    }

    /// Free variables.
    pub fn frees(&self) -> BTreeSet<LVar> {
        match self {
            Formula::Atom(a) => a.vars(),
            Formula::Not(f) => f.frees(),
            Formula::Conj(fs) | Formula::Disj(fs) => fs.iter().flat_map(Formula::frees).collect(),
            Formula::Guarded {
                vars, guards, body, ..
            } => {
                let mut out = guards.vars();
                out.extend(body.frees());
                for v in vars {
                    out.remove(v);
                }
                out
            }
        }
    }
}

impl HasVars for Formula {
    fn visit_vars(&self, f: &mut dyn FnMut(&LVar)) {
        match self {
            Formula::Atom(a) => a.visit_vars(f),
            Formula::Not(inner) => inner.visit_vars(f),
            Formula::Conj(fs) | Formula::Disj(fs) => fs.visit_vars(f),
            Formula::Guarded {
                vars, guards, body, ..
            } => {
                vars.visit_vars(f);
                guards.visit_vars(f);
                body.visit_vars(f);
            }
        }
    }
}

impl Apply for Formula {
    fn apply(&self, subst: &Subst) -> Formula {
        match self {
            Formula::Atom(a) => Formula::Atom(a.apply(subst)),
            Formula::Not(inner) => Formula::not(inner.apply(subst)),
            Formula::Conj(fs) => Formula::Conj(fs.apply(subst)),
            Formula::Disj(fs) => Formula::Disj(fs.apply(subst)),
            Formula::Guarded {
                quantifier,
                vars,
                guards,
                body,
            } => {
                let bound: BTreeSet<LVar> = vars.iter().cloned().collect();
                let free_dom: BTreeSet<LVar> =
                    subst.dom().filter(|v| !bound.contains(*v)).cloned().collect();
                let inner = subst.restrict(&free_dom);
                let range = inner.range_vars();
                if !vars.iter().any(|v| range.contains(v)) {
                    return Formula::Guarded {
                        quantifier: *quantifier,
                        vars: vars.clone(),
                        guards: guards.apply(&inner),
                        body: Box::new(body.apply(&inner)),
                    };
                }
                // Bound variables that would capture the substituted terms
                // are renamed first.
                let mut supply = FreshSupply::avoiding(self);
                supply.also_avoid(&inner);
                let rename = supply.renaming(vars.iter().filter(|v| range.contains(*v)));
                let vars = vars
                    .iter()
                    .map(|v| rename.get(v).and_then(Term::as_var).unwrap_or(v).clone())
                    .collect();
                Formula::Guarded {
                    quantifier: *quantifier,
                    vars,
                    guards: guards.apply(&rename).apply(&inner),
                    body: Box::new(body.apply(&rename).apply(&inner)),
                }
            }
        }
    }
}

fn write_joined<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formula::Atom(a) => write!(f, "{}", a),
            Formula::Not(inner) => write!(f, "not({})", inner),
            Formula::Conj(fs) if fs.is_empty() => write!(f, "T"),
            Formula::Disj(fs) if fs.is_empty() => write!(f, "F"),
            Formula::Conj(fs) => {
                write!(f, "(")?;
                write_joined(f, fs, " & ")?;
                write!(f, ")")
            }
            Formula::Disj(fs) => {
                write!(f, "(")?;
                write_joined(f, fs, " | ")?;
                write!(f, ")")
            }
            Formula::Guarded {
                quantifier,
                vars,
                guards,
                body,
            } => {
                match quantifier {
                    Quantifier::All => write!(f, "All ")?,
                    Quantifier::Ex => write!(f, "Ex ")?,
                }
                write_joined(f, vars, " ")?;
                write!(f, ". ")?;
                write_joined(f, guards, " & ")?;
                match quantifier {
                    Quantifier::All => write!(f, " ==> {}", body),
                    Quantifier::Ex => write!(f, " & {}", body),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lemma() -> Formula {
        // All #i m. A(m) @ #i ==> Ex #j. B(m) @ #j
        let i = LVar::node("i", 0);
        let j = LVar::node("j", 0);
        let m = LVar::msg("m", 0);
        Formula::all(
            vec![i.clone(), m.clone()],
            vec![Atom::Action(
                NodeId::from(i),
                Fact::protocol("A", vec![Term::Var(m.clone())]),
            )],
            Formula::ex(
                vec![j.clone()],
                vec![Atom::Action(NodeId::from(j), Fact::protocol("B", vec![Term::Var(m)]))],
                Formula::top(),
            ),
        )
    }

    #[test]
    fn closed_formula_has_no_frees() {
        assert!(lemma().frees().is_empty());
        assert_eq!(lemma().vars().len(), 3);
    }

    #[test]
    fn substitution_skips_bound_variables() {
        let s = Subst::singleton(LVar::msg("m", 0), Term::pub_name("c"));
        assert_eq!(lemma().apply(&s), lemma());
    }

    #[test]
    fn substitution_renames_capturing_binders() {
        // Ex #j y. B(m, y) @ #j, with m := y
        let j = LVar::node("j", 0);
        let y = LVar::msg("y", 0);
        let m = LVar::msg("m", 0);
        let f = Formula::ex(
            vec![j.clone(), y.clone()],
            vec![Atom::Action(
                NodeId::from(j.clone()),
                Fact::protocol("B", vec![Term::Var(m.clone()), Term::Var(y.clone())]),
            )],
            Formula::top(),
        );
        let g = f.apply(&Subst::singleton(m, Term::Var(y.clone())));
        assert_eq!(g.frees(), BTreeSet::from([y.clone()]));
        match &g {
            Formula::Guarded { vars, .. } => {
                assert_eq!(vars[0], j);
                assert_ne!(vars[1], y);
                assert_eq!(vars[1].name, "y");
            }
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn negation_flips_quantifiers_and_cancels() {
        let neg = lemma().negate();
        assert!(matches!(neg, Formula::Guarded { quantifier: Quantifier::Ex, .. }));
        assert_eq!(neg.negate(), lemma());
        assert_eq!(Formula::top().negate(), Formula::bot());
    }

    #[test]
    fn display() {
        assert_eq!(
            lemma().to_string(),
            "All #i m. A(m) @ #i ==> Ex #j. B(m) @ #j & T"
        );
    }
}
