//! Core data structures for constraint systems.
//!
//! A constraint system is a partial dependency graph of rule instances
//! together with the temporal, equational and logical constraints that a
//! proof search has accumulated on one branch.
//!
//! # Citations
//! - Dependency graphs: Schmidt, Meier, Cremers, Basin, "Automated analysis of Diffie-Hellman protocols and advanced security properties" (CSF 2012)
//! - Guarded trace formulas: Meier, "Advancing automated security protocol verification" (PhD thesis, 2013)

use crate::codec::{EntityKind, Persist};
use crate::equation::{EqStore, SplitId};
use crate::fact::Fact;
use crate::formula::Formula;
use crate::rule::{ConcIdx, PremIdx, RuleInstance};
use crate::term::{Apply, HasVars, LSort, LVar, Subst, Term};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identifier of a trace position.
///
/// Wraps a node-sorted logical variable, so that unification may identify
/// two positions and quantifiers may range over positions.
///
/// # Invariant
/// - The wrapped variable always has sort [`LSort::Node`].
#[repr(transparent)]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(LVar);

impl NodeId {
    #[inline]
    pub fn new(name: impl Into<String>, idx: u64) -> Self {
        Self(LVar::node(name, idx))
    }

    /// The underlying variable.
    #[inline]
    pub fn var(&self) -> &LVar {
        &self.0
    }

    #[inline]
    pub fn as_term(&self) -> Term {
        Term::Var(self.0.clone())
    }

    /// Reads a node identifier back from a term.
    pub fn from_term(t: &Term) -> Option<NodeId> {
        t.as_var()
            .filter(|v| v.sort == LSort::Node)
            .map(|v| NodeId(v.clone()))
    }
}

impl From<LVar> for NodeId {
    /// # Panics
    /// If `v` is not node-sorted.
    fn from(v: LVar) -> Self {
        assert_eq!(v.sort, LSort::Node, "node identifier built from {}", v);
        NodeId(v)
    }
}

impl HasVars for NodeId {
    fn visit_vars(&self, f: &mut dyn FnMut(&LVar)) {
        f(&self.0)
    }
}

impl Apply for NodeId {
    /// Node variables are only ever renamed, never instantiated.
    fn apply(&self, subst: &Subst) -> NodeId {
        subst
            .get(&self.0)
            .and_then(NodeId::from_term)
            .unwrap_or_else(|| self.clone())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Locator of a premise: node and premise index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodePrem(pub NodeId, pub PremIdx);

/// Locator of a conclusion: node and conclusion index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeConc(pub NodeId, pub ConcIdx);

impl fmt::Display for NodePrem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, p{})", self.0, self.1 .0)
    }
}

impl fmt::Display for NodeConc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, c{})", self.0, self.1 .0)
    }
}

/// An edge from a producing conclusion to a consuming premise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub src: NodeConc,
    pub tgt: NodePrem,
}

impl Edge {
    pub fn new(src: NodeConc, tgt: NodePrem) -> Self {
        Self { src, tgt }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} >-> {}", self.src, self.tgt)
    }
}

/// `smaller` occurs strictly before `larger` in every trace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LessAtom {
    pub smaller: NodeId,
    pub larger: NodeId,
}

impl LessAtom {
    pub fn new(smaller: NodeId, larger: NodeId) -> Self {
        Self { smaller, larger }
    }
}

/// An open or solved proof obligation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Goal {
    /// A premise still needs a provider.
    Premise(NodePrem, Fact),
    /// An action must occur at a node.
    Action(NodeId, Fact),
    /// A conclusion must reach a premise through a deduction chain.
    Chain(NodeConc, NodePrem),
    /// An equation store split must be resolved.
    Split(SplitId),
    /// A disjunction must be decided.
    Disj(Vec<Formula>),
}

/// Variant of a goal, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GoalKind {
    Premise,
    Action,
    Chain,
    Split,
    Disj,
}

impl Goal {
    pub fn kind(&self) -> GoalKind {
        match self {
            Goal::Premise(..) => GoalKind::Premise,
            Goal::Action(..) => GoalKind::Action,
            Goal::Chain(..) => GoalKind::Chain,
            Goal::Split(_) => GoalKind::Split,
            Goal::Disj(_) => GoalKind::Disj,
        }
    }

    /// The node the obligation is attached to, if any.
    pub fn node(&self) -> Option<&NodeId> {
        match self {
            Goal::Premise(NodePrem(i, _), _) | Goal::Action(i, _) => Some(i),
            Goal::Chain(_, NodePrem(i, _)) => Some(i),
            Goal::Split(_) | Goal::Disj(_) => None,
        }
    }
}

impl HasVars for Goal {
    fn visit_vars(&self, f: &mut dyn FnMut(&LVar)) {
        match self {
            Goal::Premise(NodePrem(i, _), fact) | Goal::Action(i, fact) => {
                i.visit_vars(f);
                fact.visit_vars(f);
            }
            Goal::Chain(NodeConc(i, _), NodePrem(j, _)) => {
                i.visit_vars(f);
                j.visit_vars(f);
            }
            Goal::Split(_) => {}
            Goal::Disj(fs) => fs.visit_vars(f),
        }
    }
}

impl Apply for Goal {
    fn apply(&self, s: &Subst) -> Goal {
        match self {
            Goal::Premise(NodePrem(i, p), fact) => {
                Goal::Premise(NodePrem(i.apply(s), *p), fact.apply(s))
            }
            Goal::Action(i, fact) => Goal::Action(i.apply(s), fact.apply(s)),
            Goal::Chain(NodeConc(i, c), NodePrem(j, p)) => {
                Goal::Chain(NodeConc(i.apply(s), *c), NodePrem(j.apply(s), *p))
            }
            Goal::Split(id) => Goal::Split(*id),
            Goal::Disj(fs) => Goal::Disj(fs.apply(s)),
        }
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Goal::Premise(p, fact) => write!(f, "{} ▶ {}", fact, p),
            Goal::Action(i, fact) => write!(f, "{} @ {}", fact, i),
            Goal::Chain(c, p) => write!(f, "{} ~~> {}", c, p),
            Goal::Split(id) => write!(f, "{}", id),
            Goal::Disj(fs) => write!(f, "{}", Formula::Disj(fs.clone())),
        }
    }
}

/// Bookkeeping attached to each goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GoalStatus {
    pub solved: bool,
    /// Creation order; strictly increasing, never reused.
    pub nr: u64,
    /// Flagged by the driver as likely to loop if attacked first.
    pub loop_breaker: bool,
}

/// Whether case distinctions were computed with or without source lemmas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CaseDistKind {
    Untyped,
    Typed,
}

/// The constraint system of one proof branch.
///
/// # Invariants
/// - Every premise has at most one incoming edge.
/// - Less atoms together with edges form an acyclic relation.
/// - `unsolved_formulas` and `solved_formulas` are disjoint.
/// - Goal numbers are strictly increasing in insertion order.
/// - At most one node is designated last.
///
/// Values are never shared mutably between branches: the driver clones a
/// System and applies operations to the clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct System {
    nodes: BTreeMap<NodeId, RuleInstance>,
    edges: BTreeSet<Edge>,
    less_atoms: BTreeSet<LessAtom>,
    last_node: Option<NodeId>,
    eq_store: EqStore,
    unsolved_formulas: BTreeSet<Formula>,
    solved_formulas: BTreeSet<Formula>,
    lemmas: BTreeSet<Formula>,
    goals: BTreeMap<Goal, GoalStatus>,
    next_goal_nr: u64,
    case_dist_kind: CaseDistKind,
    is_diff: bool,
}

impl System {
    /// An empty system.
    pub fn empty(case_dist_kind: CaseDistKind, is_diff: bool) -> Self {
        Self {
            nodes: BTreeMap::new(),
            edges: BTreeSet::new(),
            less_atoms: BTreeSet::new(),
            last_node: None,
            eq_store: EqStore::new(),
            unsolved_formulas: BTreeSet::new(),
            solved_formulas: BTreeSet::new(),
            lemmas: BTreeSet::new(),
            goals: BTreeMap::new(),
            next_goal_nr: 0,
            case_dist_kind,
            is_diff,
        }
    }

    /// Nodes in identifier order.
    #[inline]
    pub fn nodes(&self) -> impl Iterator<Item = (&NodeId, &RuleInstance)> {
        self.nodes.iter()
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn contains_node(&self, i: &NodeId) -> bool {
        self.nodes.contains_key(i)
    }

    #[inline]
    pub fn lookup_node(&self, i: &NodeId) -> Option<&RuleInstance> {
        self.nodes.get(i)
    }

    /// The rule instance at `i`.
    ///
    /// # Panics
    /// If `i` is not a node of this system. The message carries the full
    /// rendering of the system.
    pub fn node_rule(&self, i: &NodeId) -> &RuleInstance {
        match self.nodes.get(i) {
            Some(ru) => ru,
            None => panic!("node_rule: node {} not present in system:\n{}", i, self),
        }
    }

    pub fn node_prem_fact(&self, p: &NodePrem) -> Option<&Fact> {
        self.nodes.get(&p.0).and_then(|ru| ru.prem(p.1))
    }

    pub fn node_conc_fact(&self, c: &NodeConc) -> Option<&Fact> {
        self.nodes.get(&c.0).and_then(|ru| ru.conc(c.1))
    }

    #[inline]
    pub fn edges(&self) -> &BTreeSet<Edge> {
        &self.edges
    }

    /// Edges ending in premise `p`.
    pub fn incoming_edges<'a>(&'a self, p: &'a NodePrem) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| &e.tgt == p)
    }

    #[inline]
    pub fn less_atoms(&self) -> &BTreeSet<LessAtom> {
        &self.less_atoms
    }

    #[inline]
    pub fn last_node(&self) -> Option<&NodeId> {
        self.last_node.as_ref()
    }

    #[inline]
    pub fn eq_store(&self) -> &EqStore {
        &self.eq_store
    }

    #[inline]
    pub fn unsolved_formulas(&self) -> &BTreeSet<Formula> {
        &self.unsolved_formulas
    }

    #[inline]
    pub fn solved_formulas(&self) -> &BTreeSet<Formula> {
        &self.solved_formulas
    }

    #[inline]
    pub fn lemmas(&self) -> &BTreeSet<Formula> {
        &self.lemmas
    }

    #[inline]
    pub fn goals(&self) -> &BTreeMap<Goal, GoalStatus> {
        &self.goals
    }

    #[inline]
    pub fn goal_status(&self, g: &Goal) -> Option<&GoalStatus> {
        self.goals.get(g)
    }

    #[inline]
    pub fn next_goal_nr(&self) -> u64 {
        self.next_goal_nr
    }

    #[inline]
    pub fn case_dist_kind(&self) -> CaseDistKind {
        self.case_dist_kind
    }

    #[inline]
    pub fn is_diff(&self) -> bool {
        self.is_diff
    }

    /// All actions the trace is known to contain: node actions and the
    /// facts of action goals, under the committed substitution, sorted and
    /// without duplicates.
    pub fn all_actions(&self) -> Vec<(NodeId, Fact)> {
        let mut out: BTreeSet<(NodeId, Fact)> = BTreeSet::new();
        for (i, ru) in &self.nodes {
            for a in &ru.actions {
                out.insert((i.clone(), self.eq_store.apply(a)));
            }
        }
        for g in self.goals.keys() {
            if let Goal::Action(i, fact) = g {
                out.insert((i.clone(), self.eq_store.apply(fact)));
            }
        }
        out.into_iter().collect()
    }

    /// Every fact of every node, with the node it belongs to.
    pub fn all_nodes_facts(&self) -> impl Iterator<Item = (&NodeId, &Fact)> {
        self.nodes
            .iter()
            .flat_map(|(i, ru)| ru.facts().map(move |f| (i, f)))
    }

    pub fn apply_subst_to_fact(&self, fact: &Fact) -> Fact {
        self.eq_store.apply(fact)
    }

    pub fn frees(&self) -> BTreeSet<LVar> {
        self.vars()
    }

    pub fn max_var_index(&self) -> Option<u64> {
        self.max_var_idx()
    }

    /// Applies `s` eagerly to every component. Nodes or goals identified by
    /// `s` collapse into one entry; goal statuses merge keeping the lower
    /// number and either solved flag.
    ///
    /// # Panics
    /// If `s` identifies two nodes whose rule instances still differ under
    /// `s`. Unifiers that equate nodes must equate their instances too.
    pub fn apply_subst(&self, s: &Subst) -> System {
        let mut nodes: BTreeMap<NodeId, RuleInstance> = BTreeMap::new();
        for (i, ru) in &self.nodes {
            let (i, ru) = (i.apply(s), ru.apply(s));
            match nodes.get(&i) {
                Some(prev) if *prev != ru => panic!(
                    "apply_subst: {} identifies node {} with both {} and {} in system:\n{}",
                    s, i, prev, ru, self
                ),
                Some(_) => {}
                None => {
                    nodes.insert(i, ru);
                }
            }
        }
        let mut goals: BTreeMap<Goal, GoalStatus> = BTreeMap::new();
        for (g, st) in &self.goals {
            goals
                .entry(g.apply(s))
                .and_modify(|old| {
                    old.solved |= st.solved;
                    old.loop_breaker |= st.loop_breaker;
                    old.nr = old.nr.min(st.nr);
                })
                .or_insert(*st);
        }
        let solved_formulas: BTreeSet<Formula> = self.solved_formulas.iter().map(|f| f.apply(s)).collect();
        System {
            nodes,
            edges: self
                .edges
                .iter()
                .map(|e| {
                    Edge::new(
                        NodeConc(e.src.0.apply(s), e.src.1),
                        NodePrem(e.tgt.0.apply(s), e.tgt.1),
                    )
                })
                .collect(),
            less_atoms: self
                .less_atoms
                .iter()
                .map(|l| LessAtom::new(l.smaller.apply(s), l.larger.apply(s)))
                .collect(),
            last_node: self.last_node.as_ref().map(|i| i.apply(s)),
            eq_store: self.eq_store.clone(),
            unsolved_formulas: self
                .unsolved_formulas
                .iter()
                .map(|f| f.apply(s))
                .filter(|f| !solved_formulas.contains(f))
                .collect(),
            solved_formulas,
            lemmas: self.lemmas.iter().map(|f| f.apply(s)).collect(),
            goals,
            next_goal_nr: self.next_goal_nr,
            case_dist_kind: self.case_dist_kind,
            is_diff: self.is_diff,
        }
    }

    /// A copy of this system with its node map replaced.
    pub(crate) fn with_nodes(&self, nodes: BTreeMap<NodeId, RuleInstance>) -> System {
        System {
            nodes,
            ..self.clone()
        }
    }

    pub(crate) fn insert_node_raw(&mut self, i: NodeId, ru: RuleInstance) {
        self.nodes.insert(i, ru);
    }

    pub(crate) fn insert_edge_raw(&mut self, e: Edge) -> bool {
        self.edges.insert(e)
    }

    /// Used for rollback of temporary additions.
    pub(crate) fn remove_edge_raw(&mut self, e: &Edge) -> bool {
        self.edges.remove(e)
    }

    pub(crate) fn insert_less_raw(&mut self, l: LessAtom) -> bool {
        self.less_atoms.insert(l)
    }

    pub(crate) fn remove_less_raw(&mut self, l: &LessAtom) -> bool {
        self.less_atoms.remove(l)
    }

    pub(crate) fn set_last_raw(&mut self, i: NodeId) {
        self.last_node = Some(i);
    }

    pub(crate) fn eq_store_mut(&mut self) -> &mut EqStore {
        &mut self.eq_store
    }

    /// Inserts a goal with a fresh number unless it is already present.
    pub(crate) fn insert_goal_raw(&mut self, g: Goal, loop_breaker: bool) -> GoalStatus {
        if let Some(st) = self.goals.get(&g) {
            return *st;
        }
        let st = GoalStatus {
            solved: false,
            nr: self.next_goal_nr,
            loop_breaker,
        };
        self.next_goal_nr += 1;
        self.goals.insert(g, st);
        st
    }

    pub(crate) fn goal_status_mut(&mut self, g: &Goal) -> Option<&mut GoalStatus> {
        self.goals.get_mut(g)
    }

    pub(crate) fn unsolved_formulas_mut(&mut self) -> &mut BTreeSet<Formula> {
        &mut self.unsolved_formulas
    }

    pub(crate) fn solved_formulas_mut(&mut self) -> &mut BTreeSet<Formula> {
        &mut self.solved_formulas
    }

    pub(crate) fn lemmas_mut(&mut self) -> &mut BTreeSet<Formula> {
        &mut self.lemmas
    }
}

impl Persist for System {
    const KIND: EntityKind = EntityKind::System;
}

impl HasVars for System {
    fn visit_vars(&self, f: &mut dyn FnMut(&LVar)) {
        for (i, ru) in &self.nodes {
            i.visit_vars(f);
            ru.visit_vars(f);
        }
        for l in &self.less_atoms {
            l.smaller.visit_vars(f);
            l.larger.visit_vars(f);
        }
        if let Some(i) = &self.last_node {
            i.visit_vars(f);
        }
        self.eq_store.visit_vars(f);
        for fm in self
            .unsolved_formulas
            .iter()
            .chain(&self.solved_formulas)
            .chain(&self.lemmas)
        {
            fm.visit_vars(f);
        }
        for g in self.goals.keys() {
            g.visit_vars(f);
        }
    }
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "nodes:")?;
        for (i, ru) in &self.nodes {
            writeln!(f, "  {} : {}", i, ru)?;
        }
        writeln!(f, "edges:")?;
        for e in &self.edges {
            writeln!(f, "  {}", e)?;
        }
        writeln!(f, "less:")?;
        for l in &self.less_atoms {
            writeln!(f, "  {} < {}", l.smaller, l.larger)?;
        }
        if let Some(i) = &self.last_node {
            writeln!(f, "last: {}", i)?;
        }
        writeln!(f, "equations: {}", self.eq_store)?;
        writeln!(f, "formulas:")?;
        for fm in &self.unsolved_formulas {
            writeln!(f, "  {}", fm)?;
        }
        writeln!(f, "solved formulas:")?;
        for fm in &self.solved_formulas {
            writeln!(f, "  {}", fm)?;
        }
        writeln!(f, "lemmas:")?;
        for fm in &self.lemmas {
            writeln!(f, "  {}", fm)?;
        }
        writeln!(f, "goals:")?;
        for (g, st) in &self.goals {
            let mark = if st.solved { "solved" } else { "open" };
            writeln!(f, "  #{} {} ({})", st.nr, g, mark)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleInfo;

    fn node(name: &str) -> NodeId {
        NodeId::new(name, 0)
    }

    #[test]
    fn node_ids_follow_substitution_only_for_node_variables() {
        let i = node("i");
        let s = Subst::singleton(i.var().clone(), NodeId::new("j", 1).as_term());
        assert_eq!(i.apply(&s), NodeId::new("j", 1));
    }

    #[test]
    #[should_panic(expected = "not present in system")]
    fn node_rule_of_absent_node_panics() {
        let sys = System::empty(CaseDistKind::Untyped, false);
        sys.node_rule(&node("i"));
    }

    #[test]
    fn goal_numbers_increase_and_are_stable() {
        let mut sys = System::empty(CaseDistKind::Untyped, false);
        let g1 = Goal::Action(node("i"), Fact::protocol("A", vec![]));
        let g2 = Goal::Action(node("j"), Fact::protocol("B", vec![]));
        let s1 = sys.insert_goal_raw(g1.clone(), false);
        let s2 = sys.insert_goal_raw(g2, false);
        assert!(s1.nr < s2.nr);
        assert_eq!(sys.insert_goal_raw(g1, true), s1);
    }

    #[test]
    fn apply_subst_merges_identified_nodes() {
        let mut sys = System::empty(CaseDistKind::Untyped, false);
        let ru = RuleInstance::new(RuleInfo::Protocol("R".into()), vec![], vec![], vec![]);
        sys.insert_node_raw(node("i"), ru.clone());
        sys.insert_node_raw(node("j"), ru);
        let s = Subst::singleton(node("j").var().clone(), node("i").as_term());
        let merged = sys.apply_subst(&s);
        assert_eq!(merged.node_count(), 1);
        assert!(merged.contains_node(&node("i")));
    }

    #[test]
    #[should_panic(expected = "identifies node")]
    fn apply_subst_rejects_identifying_different_instances() {
        let mut sys = System::empty(CaseDistKind::Untyped, false);
        let rule = |name: &str| RuleInstance::new(RuleInfo::Protocol(name.into()), vec![], vec![], vec![]);
        sys.insert_node_raw(node("i"), rule("R"));
        sys.insert_node_raw(node("j"), rule("S"));
        let s = Subst::singleton(node("j").var().clone(), node("i").as_term());
        sys.apply_subst(&s);
    }

    #[test]
    fn all_actions_include_action_goals() {
        let mut sys = System::empty(CaseDistKind::Untyped, false);
        let a = Fact::protocol("A", vec![Term::pub_name("x")]);
        sys.insert_goal_raw(Goal::Action(node("k"), a.clone()), false);
        assert_eq!(sys.all_actions(), vec![(node("k"), a)]);
    }
}
