//! Rule instances and classified rule sets.
//!
//! A rule instance is one application of a multiset rewrite rule: ordered
//! premises, conclusions and actions, each a fact that may mention free
//! variables. Uninstantiated rules use the same representation.

use crate::fact::{Fact, FactEq};
use crate::term::{Apply, FreshSupply, FunSym, HasVars, LVar, Subst, Term};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Built-in intruder rule kinds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IntrRule {
    /// Construction rule for a function symbol.
    Constr(String),
    /// Destruction rule, identified by its name.
    Destr(String),
    /// Turns deconstructed knowledge into constructed knowledge.
    Coerce,
    /// Produces knowledge of a public value.
    Pub,
    /// Produces knowledge of a fresh value.
    FreshConstr,
    /// Intruder sends a message to the protocol.
    Send,
    /// Intruder receives a message from the protocol.
    Recv,
}

/// Logical rule name of an instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RuleInfo {
    /// The distinguished rule generating fresh values.
    Fresh,
    /// A protocol rule with its user-visible name.
    Protocol(String),
    Intruder(IntrRule),
}

impl fmt::Display for RuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleInfo::Fresh => write!(f, "Fresh"),
            RuleInfo::Protocol(name) => write!(f, "{}", name),
            RuleInfo::Intruder(IntrRule::Constr(sym)) => write!(f, "c_{}", sym),
            RuleInfo::Intruder(IntrRule::Destr(name)) => write!(f, "d_{}", name),
            RuleInfo::Intruder(IntrRule::Coerce) => write!(f, "coerce"),
            RuleInfo::Intruder(IntrRule::Pub) => write!(f, "pub"),
            RuleInfo::Intruder(IntrRule::FreshConstr) => write!(f, "fresh"),
            RuleInfo::Intruder(IntrRule::Send) => write!(f, "isend"),
            RuleInfo::Intruder(IntrRule::Recv) => write!(f, "irecv"),
        }
    }
}

/// A rule application.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleInstance {
    pub info: RuleInfo,
    pub premises: Vec<Fact>,
    pub conclusions: Vec<Fact>,
    pub actions: Vec<Fact>,
}

impl RuleInstance {
    pub fn new(info: RuleInfo, premises: Vec<Fact>, actions: Vec<Fact>, conclusions: Vec<Fact>) -> Self {
        Self {
            info,
            premises,
            conclusions,
            actions,
        }
    }

    /// `[] --> [Fr(~v)]`
    pub fn fresh(v: LVar) -> Self {
        Self::new(RuleInfo::Fresh, vec![], vec![], vec![Fact::fresh(Term::Var(v))])
    }

    /// `[] --[KU($v)]-> [KU($v)]`
    pub fn pub_constr(v: LVar) -> Self {
        let k = Fact::knows_up(Term::Var(v));
        Self::new(RuleInfo::Intruder(IntrRule::Pub), vec![], vec![k.clone()], vec![k])
    }

    /// Canonical construction rule of an AC symbol at a fixed arity:
    /// `[KU(x1), .., KU(xn)] --[KU(f(x1..xn))]-> [KU(f(x1..xn))]`.
    pub fn ac_constr(sym: &FunSym, arity: usize, supply: &mut FreshSupply) -> Self {
        let vars: Vec<Term> = (0..arity)
            .map(|_| Term::Var(supply.fresh_like(&LVar::msg("x", 0))))
            .collect();
        let result = Fact::knows_up(Term::app(sym.clone(), vars.clone()));
        Self::new(
            RuleInfo::Intruder(IntrRule::Constr(sym.name.clone())),
            vars.into_iter().map(Fact::knows_up).collect(),
            vec![result.clone()],
            vec![result],
        )
    }

    pub fn prem(&self, idx: PremIdx) -> Option<&Fact> {
        self.premises.get(idx.0)
    }

    pub fn conc(&self, idx: ConcIdx) -> Option<&Fact> {
        self.conclusions.get(idx.0)
    }

    pub fn prem_indices(&self) -> impl Iterator<Item = PremIdx> {
        (0..self.premises.len()).map(PremIdx)
    }

    pub fn is_fresh_rule(&self) -> bool {
        self.info == RuleInfo::Fresh
    }

    pub fn is_pub_constr_rule(&self) -> bool {
        self.info == RuleInfo::Intruder(IntrRule::Pub)
    }

    pub fn is_protocol_rule(&self) -> bool {
        matches!(self.info, RuleInfo::Protocol(_))
    }

    pub fn is_intruder_rule(&self) -> bool {
        matches!(self.info, RuleInfo::Intruder(_))
    }

    /// All facts: premises, then actions, then conclusions.
    pub fn facts(&self) -> impl Iterator<Item = &Fact> {
        self.premises
            .iter()
            .chain(self.actions.iter())
            .chain(self.conclusions.iter())
    }

    /// Variables of actions and conclusions that no premise binds.
    pub fn new_vars(&self) -> BTreeSet<LVar> {
        let bound = self.premises.vars();
        let mut out = self.actions.vars();
        out.extend(self.conclusions.vars());
        out.retain(|v| !bound.contains(v));
        out
    }

    /// A copy with every variable renamed to a fresh one.
    pub fn rename_apart(&self, supply: &mut FreshSupply) -> RuleInstance {
        let renaming = supply.renaming(&self.vars());
        self.apply(&renaming)
    }

    /// Encodes the whole instance as one term, premises, actions and
    /// conclusions in that order.
    pub fn as_term(&self) -> Term {
        Term::App(
            FunSym::free(format!("rule/{}", self.info)),
            self.facts().map(Fact::as_term).collect(),
        )
    }

    /// Replaces subterms in every fact, see [`Term::replace`].
    pub fn replace(&self, map: &BTreeMap<Term, Term>) -> RuleInstance {
        let go = |facts: &[Fact]| -> Vec<Fact> { facts.iter().map(|f| f.replace(map)).collect() };
        RuleInstance {
            info: self.info.clone(),
            premises: go(&self.premises),
            conclusions: go(&self.conclusions),
            actions: go(&self.actions),
        }
    }

    /// Fact equations that make `self` and `other` the same instance, if
    /// their names and shapes agree.
    pub fn equations_with(&self, other: &RuleInstance) -> Option<Vec<FactEq>> {
        if self.info != other.info
            || self.premises.len() != other.premises.len()
            || self.conclusions.len() != other.conclusions.len()
            || self.actions.len() != other.actions.len()
        {
            return None;
        }
        let mut eqs = Vec::new();
        for (a, b) in self.facts().zip(other.facts()) {
            if !a.same_shape(b) {
                return None;
            }
            eqs.push(FactEq::new(a.clone(), b.clone()));
        }
        Some(eqs)
    }
}

impl HasVars for RuleInstance {
    fn visit_vars(&self, f: &mut dyn FnMut(&LVar)) {
        self.facts().for_each(|fact| fact.visit_vars(f))
    }
}

impl Apply for RuleInstance {
    fn apply(&self, subst: &Subst) -> RuleInstance {
        RuleInstance {
            info: self.info.clone(),
            premises: self.premises.apply(subst),
            conclusions: self.conclusions.apply(subst),
            actions: self.actions.apply(subst),
        }
    }
}

fn write_facts(f: &mut fmt::Formatter<'_>, facts: &[Fact]) -> fmt::Result {
    write!(f, "[")?;
    for (i, fact) in facts.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", fact)?;
    }
    write!(f, "]")
}

impl fmt::Display for RuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.info)?;
        write_facts(f, &self.premises)?;
        if self.actions.is_empty() {
            write!(f, " --> ")?;
        } else {
            write!(f, " --")?;
            write_facts(f, &self.actions)?;
            write!(f, "-> ")?;
        }
        write_facts(f, &self.conclusions)
    }
}

/// Index of a premise within a rule instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PremIdx(pub usize);

/// Index of a conclusion within a rule instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConcIdx(pub usize);

/// Rules of a theory, classified by role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedRules {
    pub protocol: Vec<RuleInstance>,
    pub construction: Vec<RuleInstance>,
    pub destruction: Vec<RuleInstance>,
}

impl ClassifiedRules {
    /// Rules carrying the logical name `info`, in declaration order.
    pub fn rules_named<'a>(&'a self, info: &'a RuleInfo) -> impl Iterator<Item = &'a RuleInstance> + 'a {
        self.protocol
            .iter()
            .chain(self.construction.iter())
            .chain(self.destruction.iter())
            .filter(move |r| &r.info == info)
    }

    pub fn protocol_names(&self) -> BTreeSet<RuleInfo> {
        self.protocol.iter().map(|r| r.info.clone()).collect()
    }
}
