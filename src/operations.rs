//! Mutation primitives on constraint systems.
//!
//! Each operation validates its preconditions before changing the system and
//! leaves the system untouched when it returns an error. Ordering changes
//! are added tentatively and rolled back if they close a cycle.

use crate::context::{ProofContext, TraceQuantifier};
use crate::core::{Edge, Goal, GoalStatus, LessAtom, NodeId, NodePrem, System};
use crate::equation::SplitId;
use crate::fact::{Fact, FactEq};
use crate::formula::Formula;
use crate::oracle::OracleError;
use crate::rule::RuleInstance;
use crate::temporal::is_acyclic;
use thiserror::Error;
use tracing::{debug, trace};

/// A rejected mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("node {0} is already present with a different rule instance")]
    NodeConflict(NodeId),
    #[error("node {0} is not present")]
    MissingNode(NodeId),
    #[error("premise {0} is out of range")]
    PremiseOutOfRange(NodePrem),
    #[error("conclusion {0} is out of range")]
    ConclusionOutOfRange(crate::core::NodeConc),
    #[error("premise {0} already has an incoming edge")]
    PremiseConnected(NodePrem),
    #[error("edge {edge} connects {conc} to {prem}")]
    FactMismatch { edge: Edge, conc: Fact, prem: Fact },
    #[error("ordering {0} < {1} closes a cycle")]
    Cycle(NodeId, NodeId),
    #[error("last node is already {0}")]
    LastAlreadySet(NodeId),
    #[error("unknown goal {0}")]
    UnknownGoal(Goal),
    #[error("formula {0} is not among the unsolved formulas")]
    FormulaNotUnsolved(Formula),
    #[error("unknown {0}")]
    UnknownSplit(SplitId),
}

/// Result of handing a batch of equations to the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnifyOutcome {
    /// No unifier: the branch is contradictory.
    Contradiction,
    /// Exactly one unifier, committed to the system.
    Committed,
    /// Several unifiers, recorded as a split with an open split goal.
    Split(SplitId),
}

/// Adds rule instance `ru` at node `i`.
///
/// Re-adding the same instance is a no-op.
pub fn add_rule_node(sys: &mut System, i: NodeId, ru: RuleInstance) -> Result<(), OperationError> {
    if let Some(existing) = sys.lookup_node(&i) {
        if *existing == ru {
            return Ok(());
        }
        debug!(node = %i, "rejected conflicting node");
        return Err(OperationError::NodeConflict(i));
    }
    trace!(node = %i, rule = %ru.info, "add node");
    sys.insert_node_raw(i, ru);
    Ok(())
}

/// Adds an edge.
///
/// Both endpoints must exist, the premise must be free, the two facts must
/// agree under the committed substitution and the ordering must stay acyclic.
pub fn add_edge(sys: &mut System, edge: Edge) -> Result<(), OperationError> {
    if sys.edges().contains(&edge) {
        return Ok(());
    }
    let src = &edge.src.0;
    let tgt = &edge.tgt.0;
    let conc = sys
        .lookup_node(src)
        .ok_or_else(|| OperationError::MissingNode(src.clone()))?
        .conc(edge.src.1)
        .ok_or_else(|| OperationError::ConclusionOutOfRange(edge.src.clone()))?;
    let prem = sys
        .lookup_node(tgt)
        .ok_or_else(|| OperationError::MissingNode(tgt.clone()))?
        .prem(edge.tgt.1)
        .ok_or_else(|| OperationError::PremiseOutOfRange(edge.tgt.clone()))?;
    if sys.incoming_edges(&edge.tgt).next().is_some() {
        return Err(OperationError::PremiseConnected(edge.tgt.clone()));
    }
    let conc = sys.apply_subst_to_fact(conc);
    let prem = sys.apply_subst_to_fact(prem);
    if conc != prem {
        return Err(OperationError::FactMismatch { edge, conc, prem });
    }
    let (src, tgt) = (src.clone(), tgt.clone());
    // Temporarily add the edge to check acyclicity
    sys.insert_edge_raw(edge.clone());
    if !is_acyclic(sys) {
        sys.remove_edge_raw(&edge);
        debug!(%edge, "rejected cyclic edge");
        return Err(OperationError::Cycle(src, tgt));
    }
    trace!(%edge, "add edge");
    Ok(())
}

/// Asserts that `i` occurs strictly before `j`.
pub fn add_less(sys: &mut System, i: NodeId, j: NodeId) -> Result<(), OperationError> {
    if i == j {
        return Err(OperationError::Cycle(i, j));
    }
    let atom = LessAtom::new(i, j);
    if !sys.insert_less_raw(atom.clone()) {
        return Ok(());
    }
    if !is_acyclic(sys) {
        sys.remove_less_raw(&atom);
        debug!(smaller = %atom.smaller, larger = %atom.larger, "rejected cyclic ordering");
        return Err(OperationError::Cycle(atom.smaller, atom.larger));
    }
    Ok(())
}

/// Designates `i` as the last node.
pub fn set_last(sys: &mut System, i: NodeId) -> Result<(), OperationError> {
    match sys.last_node() {
        Some(l) if *l != i => Err(OperationError::LastAlreadySet(l.clone())),
        _ => {
            sys.set_last_raw(i);
            Ok(())
        }
    }
}

/// Registers a goal. An existing goal keeps its status.
pub fn insert_goal(sys: &mut System, goal: Goal, loop_breaker: bool) -> GoalStatus {
    sys.insert_goal_raw(goal, loop_breaker)
}

pub fn mark_goal_solved(sys: &mut System, goal: &Goal) -> Result<(), OperationError> {
    let st = sys
        .goal_status_mut(goal)
        .ok_or_else(|| OperationError::UnknownGoal(goal.clone()))?;
    st.solved = true;
    Ok(())
}

/// Adds an unsolved formula unless it was already solved. A non-empty
/// disjunction also opens a disjunction goal.
///
/// Returns whether the formula was new.
pub fn insert_formula(sys: &mut System, f: Formula) -> bool {
    if sys.solved_formulas().contains(&f) {
        return false;
    }
    if let Formula::Disj(ds) = &f {
        if !ds.is_empty() {
            sys.insert_goal_raw(Goal::Disj(ds.clone()), false);
        }
    }
    sys.unsolved_formulas_mut().insert(f)
}

/// Moves a formula from the unsolved to the solved set.
pub fn solve_formula(sys: &mut System, f: &Formula) -> Result<(), OperationError> {
    if !sys.unsolved_formulas_mut().remove(f) {
        return Err(OperationError::FormulaNotUnsolved(f.clone()));
    }
    sys.solved_formulas_mut().insert(f.clone());
    Ok(())
}

pub fn insert_lemma(sys: &mut System, f: Formula) -> bool {
    sys.lemmas_mut().insert(f)
}

/// Asks the oracle for unifiers of `eqs` under the committed substitution
/// and records the answer in the system.
///
/// On [`UnifyOutcome::Contradiction`] the system is left unchanged.
pub fn add_unifiers(
    ctxt: &ProofContext,
    sys: &mut System,
    eqs: &[FactEq],
) -> Result<UnifyOutcome, OracleError> {
    let eqs: Vec<FactEq> = eqs
        .iter()
        .map(|e| FactEq::new(sys.apply_subst_to_fact(&e.lhs), sys.apply_subst_to_fact(&e.rhs)))
        .collect();
    let mut unifiers = ctxt.oracle().unify(&eqs)?;
    debug!(equations = eqs.len(), unifiers = unifiers.len(), "oracle unify");
    match unifiers.len() {
        0 => Ok(UnifyOutcome::Contradiction),
        1 => {
            let u = unifiers.remove(0);
            *sys = sys.apply_subst(&u);
            sys.eq_store_mut().commit(&u);
            Ok(UnifyOutcome::Committed)
        }
        _ => {
            let id = sys.eq_store_mut().add_split(unifiers);
            sys.insert_goal_raw(Goal::Split(id), false);
            Ok(UnifyOutcome::Split(id))
        }
    }
}

/// One system per disjunct of split `id`, with that disjunct committed and
/// the split goal solved.
pub fn split_on(sys: &System, id: SplitId) -> Result<Vec<System>, OperationError> {
    let disjuncts = sys
        .eq_store()
        .split(id)
        .ok_or(OperationError::UnknownSplit(id))?
        .to_vec();
    let goal = Goal::Split(id);
    let mut out = Vec::with_capacity(disjuncts.len());
    for d in disjuncts {
        let mut case = sys.clone();
        case.eq_store_mut().take_split(id);
        let mut case = case.apply_subst(&d);
        case.eq_store_mut().commit(&d);
        if let Some(st) = case.goal_status_mut(&goal) {
            st.solved = true;
        }
        out.push(case);
    }
    Ok(out)
}

/// The initial system for proving `formula` in `ctxt`.
///
/// For [`TraceQuantifier::ExistsNoTrace`] the search looks for a
/// counterexample, so the formula is negated.
pub fn formula_to_system(ctxt: &ProofContext, formula: &Formula) -> System {
    let config = ctxt.config();
    let goal = match config.trace_quantifier {
        TraceQuantifier::ExistsSomeTrace => formula.clone(),
        TraceQuantifier::ExistsNoTrace => formula.negate(),
    };
    let mut sys = System::empty(config.case_dist_kind, config.is_diff);
    insert_formula(&mut sys, goal);
    sys
}
