//! Goal registry queries and the independence fast path.
//!
//! The registry classifies and enumerates goals. Choosing which goal to
//! solve next is left to the search driver.

use crate::core::{Goal, GoalKind, GoalStatus, NodeId, NodePrem, System};
use crate::fact::Fact;
use crate::temporal::saturate_edges_with_less_relation;
use crate::term::{HasVars, LVar};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::trace;

/// Unsolved goals in goal order.
pub fn unsolved_goals(sys: &System) -> impl Iterator<Item = (&Goal, &GoalStatus)> {
    sys.goals().iter().filter(|(_, st)| !st.solved)
}

/// Unsolved goals of one variant.
pub fn unsolved_of_kind(sys: &System, kind: GoalKind) -> impl Iterator<Item = &Goal> {
    unsolved_goals(sys)
        .map(|(g, _)| g)
        .filter(move |g| g.kind() == kind)
}

pub fn unsolved_premise_goals(sys: &System) -> Vec<(&NodePrem, &Fact)> {
    unsolved_goals(sys)
        .filter_map(|(g, _)| match g {
            Goal::Premise(p, fact) => Some((p, fact)),
            _ => None,
        })
        .collect()
}

pub fn unsolved_action_goals(sys: &System) -> Vec<(&NodeId, &Fact)> {
    unsolved_goals(sys)
        .filter_map(|(g, _)| match g {
            Goal::Action(i, fact) => Some((i, fact)),
            _ => None,
        })
        .collect()
}

pub fn unsolved_chain_goals(sys: &System) -> Vec<&Goal> {
    unsolved_of_kind(sys, GoalKind::Chain).collect()
}

/// An open goal on constructed knowledge of an unconstrained message variable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TrivialGoal {
    pub node: NodeId,
    pub fact: Fact,
    pub vars: Vec<LVar>,
}

/// Unsolved premise and action goals whose fact is trivial.
pub fn unsolved_trivial_goals(sys: &System) -> Vec<TrivialGoal> {
    let mut out = Vec::new();
    for (g, _) in unsolved_goals(sys) {
        let (node, fact) = match g {
            Goal::Premise(NodePrem(i, _), fact) => (i, fact),
            Goal::Action(i, fact) if fact.is_knows_up() => (i, fact),
            _ => continue,
        };
        let fact = sys.apply_subst_to_fact(fact);
        if let Some(vars) = fact.trivial_vars() {
            out.push(TrivialGoal {
                node: node.clone(),
                fact,
                vars,
            });
        }
    }
    out
}

/// Every open goal is simple: a trivial premise fact or a trivial
/// constructed-knowledge action. Chain, split and disjunction goals must be
/// solved.
pub fn all_open_goals_are_simple_facts(sys: &System) -> bool {
    unsolved_goals(sys).all(|(g, _)| {
        let fact = match g {
            Goal::Premise(_, fact) => fact,
            Goal::Action(_, fact) if fact.is_knows_up() => fact,
            _ => return false,
        };
        sys.apply_subst_to_fact(fact).is_trivial()
    })
}

/// Nodes strictly backward-reachable from `start` over the saturated edges.
pub fn backward_support(
    preds: &BTreeMap<NodeId, BTreeSet<NodeId>>,
    start: &NodeId,
) -> BTreeSet<NodeId> {
    let mut visited = BTreeSet::new();
    let mut queue: VecDeque<&NodeId> = preds.get(start).into_iter().flatten().collect();
    while let Some(v) = queue.pop_front() {
        if visited.insert(v.clone()) {
            queue.extend(preds.get(v).into_iter().flatten());
        }
    }
    visited
}

/// The open trivial goals can all be discharged without constraining the
/// rest of the derivation.
///
/// Holds when no two trivial goals share a variable, their backward
/// supporting node sets are pairwise disjoint, and after deleting a goal's
/// node together with its support no remaining node mentions a variable of
/// that goal.
pub fn all_open_fact_goals_are_independent(sys: &System) -> bool {
    let goals = unsolved_trivial_goals(sys);

    let mut seen_vars: BTreeSet<&LVar> = BTreeSet::new();
    for g in &goals {
        for v in &g.vars {
            if !seen_vars.insert(v) {
                trace!(var = %v, "trivial goals share a variable");
                return false;
            }
        }
    }

    let mut preds: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
    for e in saturate_edges_with_less_relation(sys) {
        preds.entry(e.tgt.0).or_default().insert(e.src.0);
    }

    let mut claimed: BTreeSet<NodeId> = BTreeSet::new();
    for g in &goals {
        let support = backward_support(&preds, &g.node);
        if support.iter().any(|i| claimed.contains(i)) {
            trace!(node = %g.node, "supporting sets overlap");
            return false;
        }
        claimed.extend(support.iter().cloned());

        let goal_vars: BTreeSet<&LVar> = g.vars.iter().collect();
        let mut remaining = sys.nodes().map(|(i, ru)| (i.clone(), ru)).collect::<BTreeMap<_, _>>();
        remaining.remove(&g.node);
        for i in &support {
            remaining.remove(i);
        }
        let leaked = remaining.values().any(|ru| {
            ru.facts()
                .map(|f| sys.apply_subst_to_fact(f))
                .any(|f| f.vars().iter().any(|v| goal_vars.contains(v)))
        });
        if leaked {
            trace!(node = %g.node, "goal variable used outside its support");
            return false;
        }
    }
    true
}
