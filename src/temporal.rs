//! Temporal order queries over the nodes of a constraint system.
//!
//! The order is the transitive closure of the less atoms, the edges and the
//! unsolved chain goals. Acyclicity is maintained by the operations module;
//! queries here assume it.
//!
//! # Citations
//! - Reachability in directed graphs: Cormen et al., "Introduction to Algorithms", Section 22.2 (2009)
//! - Kahn's algorithm: Kahn, "Topological sorting of large networks" (1962)

use crate::core::{Edge, Goal, NodeConc, NodeId, NodePrem, System};
use crate::rule::{ConcIdx, PremIdx};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Explicit edges plus unsolved chain goals, as node pairs.
pub fn raw_edge_rel(sys: &System) -> Vec<(NodeId, NodeId)> {
    let mut rel: Vec<(NodeId, NodeId)> = sys
        .edges()
        .iter()
        .map(|e| (e.src.0.clone(), e.tgt.0.clone()))
        .collect();
    for (g, st) in sys.goals() {
        if let Goal::Chain(c, p) = g {
            if !st.solved {
                rel.push((c.0.clone(), p.0.clone()));
            }
        }
    }
    rel
}

/// Less atoms plus [`raw_edge_rel`].
pub fn raw_less_rel(sys: &System) -> Vec<(NodeId, NodeId)> {
    let mut rel: Vec<(NodeId, NodeId)> = sys
        .less_atoms()
        .iter()
        .map(|l| (l.smaller.clone(), l.larger.clone()))
        .collect();
    rel.extend(raw_edge_rel(sys));
    rel
}

/// Adjacency of the raw less relation, for repeated queries on one system.
#[derive(Debug, Clone, Default)]
pub struct OrderIndex {
    succ: BTreeMap<NodeId, BTreeSet<NodeId>>,
    pred: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl OrderIndex {
    pub fn new(sys: &System) -> Self {
        Self::from_pairs(raw_less_rel(sys))
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (NodeId, NodeId)>) -> Self {
        let mut index = Self::default();
        for (a, b) in pairs {
            index.succ.entry(a.clone()).or_default().insert(b.clone());
            index.pred.entry(b).or_default().insert(a);
        }
        index
    }

    /// Direct successors of `i`.
    pub fn successors_of<'a>(&'a self, i: &NodeId) -> impl Iterator<Item = &'a NodeId> + 'a {
        self.succ.get(i).into_iter().flatten()
    }

    /// All nodes reachable from `i` by one or more steps.
    pub fn nodes_after(&self, i: &NodeId) -> BTreeSet<NodeId> {
        closure(&self.succ, i)
    }

    /// All nodes from which `i` is reachable by one or more steps.
    pub fn nodes_before(&self, i: &NodeId) -> BTreeSet<NodeId> {
        closure(&self.pred, i)
    }

    /// `i` precedes `j` in every trace.
    pub fn always_before(&self, i: &NodeId, j: &NodeId) -> bool {
        let mut visited = BTreeSet::new();
        let mut queue: VecDeque<&NodeId> = self.successors_of(i).collect();
        while let Some(v) = queue.pop_front() {
            if v == j {
                return true;
            }
            if visited.insert(v) {
                queue.extend(self.successors_of(v));
            }
        }
        false
    }

    /// Kahn's algorithm over the indexed relation.
    pub fn is_acyclic(&self) -> bool {
        let mut indegree: BTreeMap<&NodeId, usize> = BTreeMap::new();
        for (a, bs) in &self.succ {
            indegree.entry(a).or_insert(0);
            for b in bs {
                *indegree.entry(b).or_insert(0) += 1;
            }
        }
        let mut queue: VecDeque<&NodeId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(v, _)| *v)
            .collect();
        let mut seen = 0;
        while let Some(v) = queue.pop_front() {
            seen += 1;
            for u in self.successors_of(v) {
                if let Some(d) = indegree.get_mut(u) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(u);
                    }
                }
            }
        }
        seen == indegree.len()
    }
}

fn closure(adj: &BTreeMap<NodeId, BTreeSet<NodeId>>, start: &NodeId) -> BTreeSet<NodeId> {
    let mut visited = BTreeSet::new();
    let mut queue: VecDeque<&NodeId> = adj.get(start).into_iter().flatten().collect();
    while let Some(v) = queue.pop_front() {
        if visited.insert(v.clone()) {
            queue.extend(adj.get(v).into_iter().flatten());
        }
    }
    visited
}

pub fn always_before(sys: &System, i: &NodeId, j: &NodeId) -> bool {
    sys.less_atoms()
        .iter()
        .any(|l| &l.smaller == i && &l.larger == j)
        || OrderIndex::new(sys).always_before(i, j)
}

pub fn is_last(sys: &System, i: &NodeId) -> bool {
    sys.last_node() == Some(i)
}

/// `i` certainly occupies a trace position: it is a node, the last node,
/// or the node of an unsolved action goal.
pub fn is_in_trace(sys: &System, i: &NodeId) -> bool {
    sys.contains_node(i)
        || is_last(sys, i)
        || sys
            .goals()
            .iter()
            .any(|(g, st)| !st.solved && matches!(g, Goal::Action(j, _) if j == i))
}

pub fn is_acyclic(sys: &System) -> bool {
    OrderIndex::new(sys).is_acyclic()
}

/// Explicit edges plus the edges implied by the ordering: a premise without
/// an incoming edge is linked to every conclusion of an earlier node that
/// carries the same fact under the committed substitution.
pub fn saturate_edges_with_less_relation(sys: &System) -> BTreeSet<Edge> {
    let mut edges = sys.edges().clone();
    let index = OrderIndex::new(sys);
    for (j, ru) in sys.nodes() {
        for p in ru.prem_indices() {
            let tgt = NodePrem(j.clone(), p);
            if sys.incoming_edges(&tgt).next().is_some() {
                continue;
            }
            let Some(prem) = ru.prem(p) else { continue };
            let prem = sys.apply_subst_to_fact(prem);
            for i in index.nodes_before(j) {
                let Some(src_rule) = sys.lookup_node(&i) else { continue };
                for (c, conc) in src_rule.conclusions.iter().enumerate() {
                    if sys.apply_subst_to_fact(conc) == prem {
                        edges.insert(Edge::new(NodeConc(i.clone(), ConcIdx(c)), tgt.clone()));
                    }
                }
            }
        }
    }
    edges
}
