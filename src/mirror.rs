//! Mirror dependency graphs for diff-equivalence proofs.
//!
//! Given a constraint system built on one side, the mirror is a dependency
//! graph on the opposite side that uses, node for node, a rule with the same
//! name and connects the same premises and conclusions. Fresh and public
//! value generation is side-independent, so those nodes are reused as they
//! are.
//!
//! The search runs over one instance choice per remaining node, enumerated
//! lazily and stopped at the first choice whose edge equations unify and
//! whose opposite-side axioms do not evaluate to `False`.
//!
//! # Citations
//! - Diff equivalence: Basin, Dreier, Sasse, "Automated symbolic proofs of observational equivalence" (CCS 2015)

use crate::axiom::{check_diff_axioms, Valuation};
use crate::context::{DiffProofContext, ProofContext, Side};
use crate::core::{Edge, NodeId, System};
use crate::fact::FactEq;
use crate::oracle::OracleError;
use crate::rule::{IntrRule, RuleInfo, RuleInstance};
use crate::temporal::saturate_edges_with_less_relation;
use crate::term::{Apply, FreshSupply, HasVars, LSort, LVar, NameKind, Term};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Mirror of `sys` on the side opposite to `side`, if one exists.
///
/// `None` is an ordinary outcome: no instance choice satisfies the edge
/// equations. Oracle failures are propagated.
pub fn get_mirror_dg(
    dctxt: &DiffProofContext,
    side: Side,
    sys: &System,
) -> Result<Option<System>, OracleError> {
    let this = dctxt.context(side);
    let other_side = side.opposite();
    let other = dctxt.context(other_side);
    let mut supply = FreshSupply::avoiding(sys);

    let (fixed, rest): (Vec<_>, Vec<_>) = sys
        .nodes()
        .partition(|(_, ru)| ru.is_fresh_rule() || ru.is_pub_constr_rule());

    let mut choices: Vec<(NodeId, Vec<RuleInstance>)> = Vec::with_capacity(rest.len());
    for (i, ru) in rest {
        let instances = opposite_instances(dctxt, this, other, ru, &mut supply)?;
        if instances.is_empty() {
            debug!(node = %i, rule = %ru.info, side = %other_side, "no opposite rule instance");
            return Ok(None);
        }
        trace!(node = %i, instances = instances.len(), "opposite instances");
        choices.push((i.clone(), instances));
    }

    let edges: Vec<Edge> = saturate_edges_with_less_relation(sys).into_iter().collect();
    let sizes = choices.iter().map(|(_, c)| c.len()).collect();
    for (tried, pick) in CandidateProduct::new(sizes).enumerate() {
        let mut nodes: BTreeMap<NodeId, RuleInstance> = fixed
            .iter()
            .map(|(i, ru)| ((*i).clone(), (*ru).clone()))
            .collect();
        for ((i, instances), k) in choices.iter().zip(pick) {
            nodes.insert(i.clone(), instances[k].clone());
        }
        let Some(mirror) = unify_candidate(other, sys, nodes, &edges)? else {
            continue;
        };
        if check_diff_axioms(dctxt, other_side, &mirror)? == Valuation::False {
            trace!(candidate = tried, "mirror rejected by axioms");
            continue;
        }
        debug!(candidates = tried + 1, side = %other_side, "mirror found");
        return Ok(Some(mirror));
    }
    debug!(side = %other_side, "no mirror");
    Ok(None)
}

/// Every variant of every opposite-side instance usable for node rule `ru`.
fn opposite_instances(
    dctxt: &DiffProofContext,
    this: &ProofContext,
    other: &ProofContext,
    ru: &RuleInstance,
    supply: &mut FreshSupply,
) -> Result<Vec<RuleInstance>, OracleError> {
    let templates: Vec<RuleInstance> = match &ru.info {
        RuleInfo::Protocol(_) | RuleInfo::Fresh => {
            let fixing = fixing_subst(this, ru)?;
            other
                .rules()
                .rules_named(&ru.info)
                .map(|r| instantiate_fixed(r, &fixing, supply))
                .collect()
        }
        RuleInfo::Intruder(intr) => {
            let ac = match intr {
                IntrRule::Constr(name) => other.signature().ac_sym(name),
                _ => None,
            };
            match ac {
                Some(sym) => vec![RuleInstance::ac_constr(sym, ru.premises.len(), supply)],
                None => {
                    let shared: Vec<RuleInstance> = dctxt
                        .intruder_rules_named(&ru.info)
                        .map(|r| r.rename_apart(supply))
                        .collect();
                    if shared.is_empty() {
                        vec![ru.clone()]
                    } else {
                        shared
                    }
                }
            }
        }
    };
    let mut out = Vec::new();
    for t in templates {
        for v in other.oracle().variants_of(&t)? {
            out.push(t.apply(&v));
        }
    }
    Ok(out)
}

/// Bindings of the new variables of the first this-side rule that `ru` is
/// an instance of.
///
/// The template is renamed apart from `ru` before matching, so a binding of
/// a new variable to itself is kept.
fn fixing_subst(this: &ProofContext, ru: &RuleInstance) -> Result<BTreeMap<LVar, Term>, OracleError> {
    let term = ru.as_term();
    for template in this.rules().rules_named(&ru.info) {
        let mut supply = FreshSupply::avoiding(ru);
        supply.also_avoid(template);
        let apart = supply.renaming(&template.vars());
        let Some(m) = this.oracle().match_term(&term, &template.as_term().apply(&apart))? else {
            continue;
        };
        let mut fixing = BTreeMap::new();
        for v in template.new_vars() {
            if let Some(t) = apart.get(&v).map(|w| w.apply(&m)) {
                fixing.insert(v, t);
            }
        }
        return Ok(fixing);
    }
    Ok(BTreeMap::new())
}

/// `r` with the fixed variables bound and every other variable fresh.
fn instantiate_fixed(r: &RuleInstance, fixing: &BTreeMap<LVar, Term>, supply: &mut FreshSupply) -> RuleInstance {
    let vars = r.vars();
    let mut s = supply.renaming(vars.iter().filter(|v| !fixing.contains_key(v)));
    for (v, t) in fixing {
        s.insert(v.clone(), t.clone());
    }
    r.apply(&s)
}

/// Unifies the edge equations of one candidate node map.
///
/// Fresh and public new variables are abstracted to constants named after
/// the variable and its node before unification, and restored afterwards,
/// so one fresh value keeps its identity and stays distinct from others.
fn unify_candidate(
    other: &ProofContext,
    sys: &System,
    nodes: BTreeMap<NodeId, RuleInstance>,
    edges: &[Edge],
) -> Result<Option<System>, OracleError> {
    let mut abstraction: BTreeMap<Term, Term> = BTreeMap::new();
    for (i, ru) in &nodes {
        for v in ru.new_vars() {
            let kind = match v.sort {
                LSort::Fresh => NameKind::Fresh,
                LSort::Pub => NameKind::Pub,
                _ => continue,
            };
            let label = format!("{}@{}", v, i);
            abstraction
                .entry(Term::Var(v))
                .or_insert(Term::Name(kind, label));
        }
    }
    let abstracted: BTreeMap<NodeId, RuleInstance> = nodes
        .iter()
        .map(|(i, ru)| (i.clone(), ru.replace(&abstraction)))
        .collect();

    let mut eqs = Vec::with_capacity(edges.len());
    for e in edges {
        let conc = abstracted.get(&e.src.0).and_then(|ru| ru.conc(e.src.1));
        let prem = abstracted.get(&e.tgt.0).and_then(|ru| ru.prem(e.tgt.1));
        match (conc, prem) {
            (Some(c), Some(p)) if c.same_shape(p) => eqs.push(FactEq::new(c.clone(), p.clone())),
            _ => {
                trace!(%e, "candidate pruned on edge shape");
                return Ok(None);
            }
        }
    }

    let Some(sigma) = other.oracle().unify(&eqs)?.into_iter().next() else {
        return Ok(None);
    };
    let concretion: BTreeMap<Term, Term> = abstraction.into_iter().map(|(v, c)| (c, v)).collect();
    let mirrored = abstracted
        .into_iter()
        .map(|(i, ru)| (i, ru.apply(&sigma).replace(&concretion)))
        .collect();
    Ok(Some(sys.with_nodes(mirrored)))
}

/// Lazy odometer over one index per position, last position fastest.
#[derive(Debug, Clone)]
pub struct CandidateProduct {
    sizes: Vec<usize>,
    current: Vec<usize>,
    done: bool,
}

impl CandidateProduct {
    pub fn new(sizes: Vec<usize>) -> Self {
        let done = sizes.iter().any(|&n| n == 0);
        Self {
            current: vec![0; sizes.len()],
            sizes,
            done,
        }
    }
}

impl Iterator for CandidateProduct {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.done {
            return None;
        }
        let out = self.current.clone();
        self.done = true;
        for pos in (0..self.sizes.len()).rev() {
            self.current[pos] += 1;
            if self.current[pos] < self.sizes[pos] {
                self.done = false;
                break;
            }
            self.current[pos] = 0;
        }
        Some(out)
    }
}
