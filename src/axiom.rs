//! Three-valued evaluation of atoms and formulas, and lemma instantiation.
//!
//! A `True` or `False` valuation holds in every model of the constraint
//! system, not just under the committed substitution; everything else is
//! `Unknown`.

use crate::context::{DiffProofContext, ProofContext, Side};
use crate::core::{NodeId, System};
use crate::fact::Fact;
use crate::formula::{Atom, Formula, Quantifier};
use crate::oracle::{EquationalOracle, OracleError};
use crate::temporal::{is_in_trace, is_last, OrderIndex};
use crate::term::{Apply, FreshSupply, FunSym, HasVars, LVar, Subst, Term};
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// Kleene truth value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Valuation {
    True,
    False,
    Unknown,
}

impl Valuation {
    pub fn from_bool(b: bool) -> Self {
        if b {
            Valuation::True
        } else {
            Valuation::False
        }
    }

    pub fn and(self, other: Valuation) -> Valuation {
        match (self, other) {
            (Valuation::False, _) | (_, Valuation::False) => Valuation::False,
            (Valuation::True, Valuation::True) => Valuation::True,
            _ => Valuation::Unknown,
        }
    }

    pub fn or(self, other: Valuation) -> Valuation {
        match (self, other) {
            (Valuation::True, _) | (_, Valuation::True) => Valuation::True,
            (Valuation::False, Valuation::False) => Valuation::False,
            _ => Valuation::Unknown,
        }
    }

    pub fn not(self) -> Valuation {
        match self {
            Valuation::True => Valuation::False,
            Valuation::False => Valuation::True,
            Valuation::Unknown => Valuation::Unknown,
        }
    }
}

/// `i` and `j` are graph nodes whose rule instances cannot be made equal.
pub fn non_unifiable_nodes(
    ctxt: &ProofContext,
    sys: &System,
    i: &NodeId,
    j: &NodeId,
) -> Result<bool, OracleError> {
    let (Some(ri), Some(rj)) = (sys.lookup_node(i), sys.lookup_node(j)) else {
        return Ok(false);
    };
    match ri.equations_with(rj) {
        None => Ok(true),
        Some(eqs) => Ok(ctxt.oracle().unify(&eqs)?.is_empty()),
    }
}

pub fn partial_atom_valuation(
    ctxt: &ProofContext,
    sys: &System,
    atom: &Atom,
) -> Result<Valuation, OracleError> {
    let atom = sys.eq_store().apply(atom);
    let index = OrderIndex::new(sys);
    let v = match &atom {
        Atom::Action(i, fact) => match sys.lookup_node(i) {
            Some(ru) => {
                let actions: Vec<Fact> = ru.actions.iter().map(|a| sys.apply_subst_to_fact(a)).collect();
                if actions.contains(fact) {
                    Valuation::True
                } else {
                    let mut any = false;
                    for a in &actions {
                        if ctxt.oracle().unifiable_facts(a, fact)? {
                            any = true;
                            break;
                        }
                    }
                    if any {
                        Valuation::Unknown
                    } else {
                        Valuation::False
                    }
                }
            }
            None if sys.all_actions().iter().any(|(j, f)| j == i && f == fact) => Valuation::True,
            None => Valuation::Unknown,
        },
        Atom::Less(i, j) => {
            if i == j || index.always_before(j, i) {
                Valuation::False
            } else if index.always_before(i, j) {
                Valuation::True
            } else if is_last(sys, i) && is_in_trace(sys, j) {
                Valuation::False
            } else if is_last(sys, j) && is_in_trace(sys, i) && non_unifiable_nodes(ctxt, sys, i, j)? {
                Valuation::True
            } else {
                Valuation::Unknown
            }
        }
        Atom::Equal(s, t) => {
            if s == t {
                Valuation::True
            } else if let (Some(i), Some(j)) = (NodeId::from_term(s), NodeId::from_term(t)) {
                if index.always_before(&i, &j)
                    || index.always_before(&j, &i)
                    || non_unifiable_nodes(ctxt, sys, &i, &j)?
                {
                    Valuation::False
                } else {
                    Valuation::Unknown
                }
            } else if !ctxt.oracle().unifiable_terms(s, t)? {
                Valuation::False
            } else {
                Valuation::Unknown
            }
        }
        Atom::Last(i) => {
            if is_last(sys, i) {
                Valuation::True
            } else if index.nodes_after(i).iter().any(|k| is_in_trace(sys, k)) {
                Valuation::False
            } else {
                match sys.last_node() {
                    Some(l) if non_unifiable_nodes(ctxt, sys, l, i)? => Valuation::False,
                    _ => Valuation::Unknown,
                }
            }
        }
    };
    trace!(%atom, valuation = ?v, "atom valuation");
    Ok(v)
}

/// Kleene evaluation of a formula.
///
/// A guarded universal is `False` when one of its implied instances is;
/// a guarded existential is `True` when some witness makes its guards and
/// body `True`.
pub fn partial_formula_valuation(
    ctxt: &ProofContext,
    sys: &System,
    formula: &Formula,
) -> Result<Valuation, OracleError> {
    match formula {
        Formula::Atom(a) => partial_atom_valuation(ctxt, sys, a),
        Formula::Not(f) => Ok(partial_formula_valuation(ctxt, sys, f)?.not()),
        Formula::Conj(fs) => {
            let mut acc = Valuation::True;
            for f in fs {
                acc = acc.and(partial_formula_valuation(ctxt, sys, f)?);
                if acc == Valuation::False {
                    break;
                }
            }
            Ok(acc)
        }
        Formula::Disj(fs) => {
            let mut acc = Valuation::False;
            for f in fs {
                acc = acc.or(partial_formula_valuation(ctxt, sys, f)?);
                if acc == Valuation::True {
                    break;
                }
            }
            Ok(acc)
        }
        Formula::Guarded {
            quantifier,
            vars,
            guards,
            body,
        } if vars.is_empty() => {
            let guards = Formula::Conj(guards.iter().cloned().map(Formula::Atom).collect());
            let g = partial_formula_valuation(ctxt, sys, &guards)?;
            let b = partial_formula_valuation(ctxt, sys, body)?;
            Ok(match quantifier {
                Quantifier::All => g.not().or(b),
                Quantifier::Ex => g.and(b),
            })
        }
        Formula::Guarded {
            quantifier: Quantifier::All,
            ..
        } => {
            for instance in ImpliedInstances::new(ctxt.oracle(), sys, formula) {
                if partial_formula_valuation(ctxt, sys, &instance?)? == Valuation::False {
                    return Ok(Valuation::False);
                }
            }
            Ok(Valuation::Unknown)
        }
        Formula::Guarded {
            quantifier: Quantifier::Ex,
            vars,
            guards,
            body,
        } => {
            let matches = GuardMatches::new(ctxt.oracle(), sys, vars, guards);
            let remainder: Vec<&Atom> = guards.iter().filter(|a| !a.is_matchable()).collect();
            for sigma in matches {
                let sigma = sigma?;
                let mut parts: Vec<Formula> =
                    remainder.iter().map(|a| Formula::Atom(a.apply(&sigma))).collect();
                parts.push(body.apply(&sigma));
                if partial_formula_valuation(ctxt, sys, &Formula::Conj(parts))? == Valuation::True {
                    return Ok(Valuation::True);
                }
            }
            Ok(Valuation::Unknown)
        }
    }
}

fn action_term(i: &NodeId, fact: &Fact) -> Term {
    Term::App(FunSym::free("action"), vec![i.as_term(), fact.as_term()])
}

/// Substitutions for the quantified variables of a guard list that make
/// every action and equality guard hold in the system.
///
/// Action guards are matched against the system's actions first, then
/// equalities are matched towards the side without quantified variables.
/// Candidates with an equality that cannot be oriented, or that leave a
/// quantified variable unbound, are dropped. Produced lazily, depth first.
///
/// Matching runs on copies of the quantified variables renamed apart from
/// the system, so system variables may share their names.
pub struct GuardMatches<'a> {
    oracle: &'a dyn EquationalOracle,
    actions: Vec<(NodeId, Fact)>,
    bound: BTreeSet<LVar>,
    renaming: Subst,
    quantified: BTreeSet<LVar>,
    matchable: Vec<Atom>,
    stack: Vec<(Subst, usize)>,
    failed: bool,
}

impl<'a> GuardMatches<'a> {
    pub fn new(oracle: &'a dyn EquationalOracle, sys: &System, vars: &[LVar], guards: &[Atom]) -> Self {
        let mut supply = FreshSupply::avoiding(sys);
        supply.also_avoid(vars);
        supply.also_avoid(guards);
        let renaming = supply.renaming(vars);
        let mut matchable: Vec<Atom> = guards
            .iter()
            .filter(|a| matches!(a, Atom::Action(..)))
            .map(|a| a.apply(&renaming))
            .collect();
        matchable.extend(
            guards
                .iter()
                .filter(|a| matches!(a, Atom::Equal(..)))
                .map(|a| a.apply(&renaming)),
        );
        Self {
            oracle,
            actions: sys.all_actions(),
            bound: vars.iter().cloned().collect(),
            quantified: renaming.range_vars(),
            renaming,
            matchable,
            stack: vec![(Subst::new(), 0)],
            failed: false,
        }
    }

    fn has_quantified(&self, t: &Term) -> bool {
        t.vars().iter().any(|v| self.quantified.contains(v))
    }

    fn extend(&self, sigma: &Subst, m: Subst) -> Option<Subst> {
        m.dom()
            .all(|v| self.quantified.contains(v))
            .then(|| sigma.then(&m))
    }

    fn step(&mut self, sigma: Subst, k: usize) -> Result<(), OracleError> {
        match &self.matchable[k] {
            Atom::Action(i, fact) => {
                let pattern = action_term(&i.apply(&sigma), &fact.apply(&sigma));
                let mut next = Vec::new();
                for (j, f) in &self.actions {
                    if !f.same_shape(fact) {
                        continue;
                    }
                    if let Some(m) = self.oracle.match_term(&action_term(j, f), &pattern)? {
                        next.extend(self.extend(&sigma, m));
                    }
                }
                for s in next.into_iter().rev() {
                    self.stack.push((s, k + 1));
                }
            }
            Atom::Equal(a, b) => {
                let (a, b) = (a.apply(&sigma), b.apply(&sigma));
                let m = match (self.has_quantified(&a), self.has_quantified(&b)) {
                    (false, false) => (a == b).then(Subst::new),
                    (true, false) => self.oracle.match_term(&b, &a)?,
                    (false, true) => self.oracle.match_term(&a, &b)?,
                    (true, true) => None,
                };
                if let Some(s) = m.and_then(|m| self.extend(&sigma, m)) {
                    self.stack.push((s, k + 1));
                }
            }
            _ => self.stack.push((sigma, k + 1)),
        }
        Ok(())
    }
}

impl Iterator for GuardMatches<'_> {
    type Item = Result<Subst, OracleError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.failed {
            let (sigma, k) = self.stack.pop()?;
            if k == self.matchable.len() {
                if self.quantified.iter().all(|v| sigma.contains(v)) {
                    return Some(Ok(self.renaming.then(&sigma).restrict(&self.bound)));
                }
                trace!("dropping guard match with unbound variables");
                continue;
            }
            if let Err(e) = self.step(sigma, k) {
                self.failed = true;
                return Some(Err(e));
            }
        }
        None
    }
}

/// Lazily produced instances of a guarded universal formula.
///
/// Each substitution found by [`GuardMatches`] instantiates the body; guards
/// that are neither actions nor equalities stay as the antecedent of an
/// unquantified implication. Other formulas have no instances.
pub struct ImpliedInstances<'a> {
    matches: Option<GuardMatches<'a>>,
    remainder: Vec<&'a Atom>,
    body: Option<&'a Formula>,
}

impl<'a> ImpliedInstances<'a> {
    pub fn new(oracle: &'a dyn EquationalOracle, sys: &System, formula: &'a Formula) -> Self {
        match formula {
            Formula::Guarded {
                quantifier: Quantifier::All,
                vars,
                guards,
                body,
            } => Self {
                matches: Some(GuardMatches::new(oracle, sys, vars, guards)),
                remainder: guards.iter().filter(|a| !a.is_matchable()).collect(),
                body: Some(&**body),
            },
            _ => Self {
                matches: None,
                remainder: Vec::new(),
                body: None,
            },
        }
    }
}

impl Iterator for ImpliedInstances<'_> {
    type Item = Result<Formula, OracleError>;

    fn next(&mut self) -> Option<Self::Item> {
        let sigma = match self.matches.as_mut()?.next()? {
            Ok(s) => s,
            Err(e) => return Some(Err(e)),
        };
        let body = self.body?.apply(&sigma);
        if self.remainder.is_empty() {
            return Some(Ok(body));
        }
        let guards = self.remainder.iter().map(|a| a.apply(&sigma)).collect();
        Some(Ok(Formula::all(Vec::new(), guards, body)))
    }
}

/// All instances of a guarded universal implied by the system's actions.
pub fn implied_formulas(
    oracle: &dyn EquationalOracle,
    sys: &System,
    formula: &Formula,
) -> Result<BTreeSet<Formula>, OracleError> {
    let out = ImpliedInstances::new(oracle, sys, formula).collect::<Result<BTreeSet<_>, _>>()?;
    debug!(%formula, instances = out.len(), "implied formulas");
    Ok(out)
}

/// Diff axioms that apply on `side`.
pub fn relevant_diff_axioms(dctxt: &DiffProofContext, side: Side) -> Vec<&Formula> {
    dctxt
        .axioms
        .iter()
        .filter(|(s, _)| *s == side)
        .map(|(_, f)| f)
        .collect()
}

/// Conjunction of the valuations of the axioms relevant on `side`.
pub fn check_diff_axioms(
    dctxt: &DiffProofContext,
    side: Side,
    sys: &System,
) -> Result<Valuation, OracleError> {
    let ctxt = dctxt.context(side);
    let mut acc = Valuation::True;
    for axiom in relevant_diff_axioms(dctxt, side) {
        acc = acc.and(partial_formula_valuation(ctxt, sys, axiom)?);
        if acc == Valuation::False {
            break;
        }
    }
    Ok(acc)
}
