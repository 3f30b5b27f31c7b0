//! Dependency graph well-formedness.
//!
//! A graph is correct when every premise of every node has exactly one
//! incoming edge whose source conclusion carries the same fact under the
//! committed substitution. Goals, axioms and ordering consistency are not
//! checked here.

use crate::core::{Edge, NodePrem, System};
use crate::fact::Fact;
use thiserror::Error;

/// A violation of dependency graph correctness.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DgViolation {
    #[error("premise {0} has no incoming edge")]
    MissingIncomingEdge(NodePrem),
    #[error("premise {premise} has {count} incoming edges")]
    DuplicateIncomingEdge { premise: NodePrem, count: usize },
    #[error("edge {edge} carries {conc} into premise {prem}")]
    FactMismatch { edge: Edge, conc: Fact, prem: Fact },
    #[error("edge {0} refers to a missing node or index")]
    DanglingEdge(Edge),
}

/// All violations, in node order.
pub fn dg_violations(sys: &System) -> Vec<DgViolation> {
    let mut out = Vec::new();
    for e in sys.edges() {
        let conc = sys.node_conc_fact(&e.src);
        let prem = sys.node_prem_fact(&e.tgt);
        match (conc, prem) {
            (Some(conc), Some(prem)) => {
                let conc = sys.apply_subst_to_fact(conc);
                let prem = sys.apply_subst_to_fact(prem);
                if conc != prem {
                    out.push(DgViolation::FactMismatch {
                        edge: e.clone(),
                        conc,
                        prem,
                    });
                }
            }
            _ => out.push(DgViolation::DanglingEdge(e.clone())),
        }
    }
    for (i, ru) in sys.nodes() {
        for p in ru.prem_indices() {
            let premise = NodePrem(i.clone(), p);
            match sys.incoming_edges(&premise).count() {
                0 => out.push(DgViolation::MissingIncomingEdge(premise)),
                1 => {}
                count => out.push(DgViolation::DuplicateIncomingEdge { premise, count }),
            }
        }
    }
    out
}

/// Returns the first violation, if any.
pub fn check_dg(sys: &System) -> Result<(), DgViolation> {
    match dg_violations(sys).into_iter().next() {
        Some(v) => Err(v),
        None => Ok(()),
    }
}

pub fn is_correct_dg(sys: &System) -> bool {
    dg_violations(sys).is_empty()
}
