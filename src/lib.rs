//! dgraph-constraints: the constraint-system core of a symbolic protocol
//! verifier.
//!
//! A [`System`] is a partial proof state: a dependency graph of rule
//! instances together with temporal, equational and logical constraints and
//! the open goals a backtracking search driver still has to solve. This
//! crate provides the values and the query/mutation primitives such a driver
//! needs:
//!
//! - dependency-graph well-formedness ([`validate`]),
//! - temporal reachability over edges and ordering atoms ([`temporal`]),
//! - goal queries and the independence fast path ([`goals`]),
//! - partial evaluation of axioms and lemma instances ([`axiom`]),
//! - mirror dependency graphs for diff equivalence ([`mirror`]),
//! - memoised case distinctions with a versioned on-disk format
//!   ([`case_dist`], [`codec`]).
//!
//! Equational reasoning is delegated to an [`EquationalOracle`]; the crate
//! ships a free-algebra [`SyntacticOracle`] for tests and tooling.
//!
//! # Mathematical Foundations
//!
//! States are constraint systems in the sense of Schmidt et al. Node
//! identifiers are node-sorted variables, so equalities between nodes are
//! ordinary substitutions and share the equation store with message terms.
//!
//! # References
//!
//! - Schmidt, Meier, Cremers, Basin. "Automated analysis of Diffie-Hellman protocols and advanced security properties" (CSF 2012)
//! - Meier, Schmidt, Cremers, Basin. "The TAMARIN prover for the symbolic analysis of security protocols" (CAV 2013)
//! - Basin, Dreier, Sasse. "Automated symbolic proofs of observational equivalence" (CCS 2015)
//!
//! # Example
//!
//! ```
//! use dgraph_constraints::prelude::*;
//!
//! let k = LVar::fresh("k", 0);
//! let mut sys = System::empty(CaseDistKind::Untyped, false);
//! add_rule_node(&mut sys, NodeId::new("f", 0), RuleInstance::fresh(k.clone())).unwrap();
//! let send = RuleInstance::new(
//!     RuleInfo::Protocol("Send".into()),
//!     vec![Fact::fresh(Term::var(k.clone()))],
//!     vec![],
//!     vec![Fact::output(Term::var(k))],
//! );
//! add_rule_node(&mut sys, NodeId::new("s", 0), send).unwrap();
//! assert!(!is_correct_dg(&sys));
//! add_edge(
//!     &mut sys,
//!     Edge::new(
//!         NodeConc(NodeId::new("f", 0), ConcIdx(0)),
//!         NodePrem(NodeId::new("s", 0), PremIdx(0)),
//!     ),
//! )
//! .unwrap();
//! assert!(is_correct_dg(&sys));
//! ```

pub mod axiom;
pub mod case_dist;
pub mod codec;
pub mod context;
pub mod core;
pub mod equation;
pub mod fact;
pub mod fingerprint;
pub mod formula;
pub mod goals;
pub mod mirror;
pub mod operations;
pub mod oracle;
pub mod rule;
pub mod temporal;
pub mod term;
pub mod validate;

pub use crate::context::{DiffProofContext, ProofContext, Side};
pub use crate::core::{Goal, NodeId, System};
pub use crate::oracle::syntactic::SyntacticOracle;
pub use crate::oracle::{EquationalOracle, OracleError};

/// Prelude for convenient usage.
pub mod prelude {
    pub use crate::axiom::{
        check_diff_axioms, implied_formulas, partial_atom_valuation, partial_formula_valuation,
        relevant_diff_axioms, ImpliedInstances, Valuation,
    };
    pub use crate::case_dist::{CaseDistStore, CaseDistinction};
    pub use crate::codec::{decode, encode, CodecError, Persist};
    pub use crate::context::{
        DiffProofContext, DiffProofType, DiffSystem, InductionHint, ProofConfig, ProofContext,
        Side, Signature, TraceQuantifier,
    };
    pub use crate::core::{
        CaseDistKind, Edge, Goal, GoalKind, GoalStatus, LessAtom, NodeConc, NodeId, NodePrem,
        System,
    };
    pub use crate::fact::{Fact, FactEq, FactTag, Multiplicity};
    pub use crate::fingerprint::{context_fingerprint, system_fingerprint, HashValue};
    pub use crate::formula::{Atom, Formula, Quantifier};
    pub use crate::goals::{
        all_open_fact_goals_are_independent, all_open_goals_are_simple_facts,
        unsolved_action_goals, unsolved_chain_goals, unsolved_premise_goals,
        unsolved_trivial_goals,
    };
    pub use crate::mirror::get_mirror_dg;
    pub use crate::operations::{
        add_edge, add_less, add_rule_node, add_unifiers, formula_to_system, insert_formula,
        insert_goal, insert_lemma, mark_goal_solved, set_last, solve_formula, split_on,
        OperationError, UnifyOutcome,
    };
    pub use crate::oracle::syntactic::SyntacticOracle;
    pub use crate::oracle::{EquationalOracle, OracleError};
    pub use crate::rule::{ClassifiedRules, ConcIdx, IntrRule, PremIdx, RuleInfo, RuleInstance};
    pub use crate::temporal::{always_before, is_in_trace, is_last, OrderIndex};
    pub use crate::term::{Apply, FunSym, HasVars, LSort, LVar, Subst, Term};
    pub use crate::validate::{check_dg, is_correct_dg, DgViolation};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn oracle() -> Arc<SyntacticOracle> {
        Arc::new(SyntacticOracle::new())
    }

    fn knows(t: Term) -> Fact {
        Fact::knows_up(t)
    }

    fn edge(src: &NodeId, c: usize, tgt: &NodeId, p: usize) -> Edge {
        Edge::new(NodeConc(src.clone(), ConcIdx(c)), NodePrem(tgt.clone(), PremIdx(p)))
    }

    fn diff_ctxt(name: &str, rules: Vec<RuleInstance>) -> ProofContext {
        let mut config = ProofConfig::new(name);
        config.is_diff = true;
        config.rules.protocol = rules;
        ProofContext::new(config, oracle())
    }

    fn st(t: Term) -> Fact {
        Fact::protocol("St", vec![t])
    }

    fn init_rule() -> RuleInstance {
        let k = Term::var(LVar::fresh("k", 0));
        RuleInstance::new(
            RuleInfo::Protocol("Init".into()),
            vec![Fact::fresh(k.clone())],
            vec![],
            vec![st(k)],
        )
    }

    fn fwd_rule(sym: &str) -> RuleInstance {
        let x = Term::var(LVar::msg("x", 0));
        RuleInstance::new(
            RuleInfo::Protocol("Fwd".into()),
            vec![st(x.clone())],
            vec![Fact::protocol("Step", vec![x.clone()])],
            vec![st(Term::app(FunSym::free(sym), vec![x]))],
        )
    }

    /// Fresh node, an `Init` node and `n` chained `Fwd` nodes applying `h`.
    fn chain_system(n: usize) -> System {
        let k = LVar::fresh("k", 1);
        let mut sys = System::empty(CaseDistKind::Untyped, true);
        let f = NodeId::new("f", 0);
        let init = NodeId::new("init", 0);
        add_rule_node(&mut sys, f.clone(), RuleInstance::fresh(k.clone())).unwrap();
        let to_k = Subst::singleton(LVar::fresh("k", 0), Term::var(k.clone()));
        add_rule_node(&mut sys, init.clone(), init_rule().apply(&to_k)).unwrap();
        add_edge(&mut sys, edge(&f, 0, &init, 0)).unwrap();

        let mut prev = init;
        let mut t = Term::var(k);
        for step in 0..n {
            let node = NodeId::new("fwd", step as u64);
            let inst = fwd_rule("h").apply(&Subst::singleton(LVar::msg("x", 0), t.clone()));
            add_rule_node(&mut sys, node.clone(), inst).unwrap();
            add_edge(&mut sys, edge(&prev, 0, &node, 0)).unwrap();
            t = Term::app(FunSym::free("h"), vec![t]);
            prev = node;
        }
        sys
    }

    fn chain_diff_ctxt() -> DiffProofContext {
        DiffProofContext::new(
            diff_ctxt("left", vec![init_rule(), fwd_rule("h")]),
            diff_ctxt("right", vec![init_rule(), fwd_rule("g")]),
        )
    }

    #[test]
    fn lone_fresh_node_mirrors_unchanged() {
        let dctxt = chain_diff_ctxt();
        let mut sys = System::empty(CaseDistKind::Untyped, true);
        add_rule_node(&mut sys, NodeId::new("f", 0), RuleInstance::fresh(LVar::fresh("k", 0))).unwrap();
        let mirror = get_mirror_dg(&dctxt, Side::Left, &sys).unwrap().unwrap();
        assert_eq!(mirror, sys);
    }

    #[test]
    fn single_edge_dg_correctness() {
        let x = Term::var(LVar::msg("x", 0));
        let a = NodeId::new("a", 0);
        let b = NodeId::new("b", 0);
        let src = RuleInstance::new(RuleInfo::Protocol("Src".into()), vec![], vec![], vec![knows(x.clone())]);
        let tgt = RuleInstance::new(RuleInfo::Protocol("Tgt".into()), vec![knows(x)], vec![], vec![]);

        let mut connected = System::empty(CaseDistKind::Untyped, false);
        add_rule_node(&mut connected, a.clone(), src.clone()).unwrap();
        add_rule_node(&mut connected, b.clone(), tgt.clone()).unwrap();
        let mut disconnected = connected.clone();
        add_edge(&mut connected, edge(&a, 0, &b, 0)).unwrap();

        assert!(is_correct_dg(&connected));
        assert!(!is_correct_dg(&disconnected));
        assert!(matches!(
            check_dg(&disconnected),
            Err(DgViolation::MissingIncomingEdge(_))
        ));
        add_edge(&mut disconnected, edge(&a, 0, &b, 0)).unwrap();
        assert_eq!(disconnected, connected);
    }

    #[test]
    fn solved_action_goal_leaves_unsolved_query() {
        let mut sys = System::empty(CaseDistKind::Untyped, false);
        let i = NodeId::new("i", 0);
        let goal = Goal::Action(i.clone(), Fact::protocol("A", vec![Term::pub_name("5")]));
        let status = insert_goal(&mut sys, goal.clone(), false);
        assert!(!status.solved);
        assert_eq!(status.nr, 0);
        assert_eq!(unsolved_action_goals(&sys).len(), 1);

        mark_goal_solved(&mut sys, &goal).unwrap();
        assert!(unsolved_action_goals(&sys).is_empty());
        assert!(sys.goal_status(&goal).unwrap().solved);
    }

    #[test]
    fn implied_formulas_instantiate_matching_actions_only() {
        let x = LVar::node("x", 0);
        let j = LVar::node("j", 0);
        let m = LVar::msg("m", 0);
        let body = Formula::ex(
            vec![j.clone()],
            vec![Atom::Action(NodeId::from(j.clone()), Fact::protocol("B", vec![Term::var(m.clone())]))],
            Formula::top(),
        );
        let formula = Formula::all(
            vec![x.clone(), m.clone()],
            vec![Atom::Action(NodeId::from(x), Fact::protocol("A", vec![Term::var(m)]))],
            body,
        );

        let mut sys = System::empty(CaseDistKind::Untyped, false);
        let five = Term::pub_name("5");
        let ru = RuleInstance::new(
            RuleInfo::Protocol("R".into()),
            vec![],
            vec![
                Fact::protocol("A", vec![five.clone()]),
                Fact::protocol("C", vec![Term::pub_name("6")]),
            ],
            vec![],
        );
        add_rule_node(&mut sys, NodeId::new("i", 0), ru).unwrap();

        let instances = implied_formulas(&SyntacticOracle::new(), &sys, &formula).unwrap();
        let expected = Formula::ex(
            vec![j.clone()],
            vec![Atom::Action(NodeId::from(j), Fact::protocol("B", vec![five]))],
            Formula::top(),
        );
        assert_eq!(instances.into_iter().collect::<Vec<_>>(), vec![expected]);
    }

    #[test]
    fn trivial_goals_on_disjoint_nodes_are_independent() {
        let mut sys = System::empty(CaseDistKind::Untyped, false);
        let (a, b) = (NodeId::new("a", 0), NodeId::new("b", 0));
        let (x, y) = (LVar::msg("x", 0), LVar::msg("y", 0));
        let needs = |v: &LVar| {
            RuleInstance::new(RuleInfo::Protocol("Need".into()), vec![knows(Term::var(v.clone()))], vec![], vec![])
        };
        add_rule_node(&mut sys, a.clone(), needs(&x)).unwrap();
        add_rule_node(&mut sys, b.clone(), needs(&y)).unwrap();
        insert_goal(&mut sys, Goal::Premise(NodePrem(a, PremIdx(0)), knows(Term::var(x))), false);
        insert_goal(&mut sys, Goal::Premise(NodePrem(b, PremIdx(0)), knows(Term::var(y))), false);
        assert!(all_open_goals_are_simple_facts(&sys));
        assert!(all_open_fact_goals_are_independent(&sys));
    }

    #[test]
    fn formula_to_system_negates_for_exists_no_trace() {
        let ctxt = ProofContext::new(ProofConfig::new("lemma"), oracle());
        let i = LVar::node("i", 0);
        let phi = Formula::ex(
            vec![i.clone()],
            vec![Atom::Action(NodeId::from(i), Fact::protocol("Secret", vec![]))],
            Formula::top(),
        );
        let sys = formula_to_system(&ctxt, &phi);
        assert!(sys.unsolved_formulas().contains(&phi.negate()));
        assert!(!sys.is_diff());
    }

    /// Oracle whose every call times out.
    #[derive(Debug)]
    struct UnreachableOracle;

    fn timeout() -> OracleError {
        OracleError::Timeout { elapsed_ms: 30_000 }
    }

    impl EquationalOracle for UnreachableOracle {
        fn unify_terms(&self, _pairs: &[(Term, Term)]) -> Result<Vec<Subst>, OracleError> {
            Err(timeout())
        }

        fn match_term(&self, _term: &Term, _pattern: &Term) -> Result<Option<Subst>, OracleError> {
            Err(timeout())
        }

        fn variants_of(&self, _ru: &RuleInstance) -> Result<Vec<Subst>, OracleError> {
            Err(timeout())
        }
    }

    #[test]
    fn oracle_failures_propagate_unchanged() {
        let unreachable = |name: &str, rules: Vec<RuleInstance>| {
            let mut config = ProofConfig::new(name);
            config.is_diff = true;
            config.rules.protocol = rules;
            ProofContext::new(config, Arc::new(UnreachableOracle))
        };
        let dctxt = DiffProofContext::new(
            unreachable("left", vec![init_rule(), fwd_rule("h")]),
            unreachable("right", vec![init_rule(), fwd_rule("g")]),
        );
        let sys = chain_system(2);
        assert_eq!(get_mirror_dg(&dctxt, Side::Left, &sys), Err(timeout()));

        // All #x m. Step(m) @ #x ==> T
        let x = LVar::node("x", 0);
        let m = LVar::msg("m", 0);
        let lemma = Formula::all(
            vec![x.clone(), m.clone()],
            vec![Atom::Action(NodeId::from(x), Fact::protocol("Step", vec![Term::var(m)]))],
            Formula::top(),
        );
        assert_eq!(implied_formulas(&UnreachableOracle, &sys, &lemma), Err(timeout()));

        let mut updated = sys.clone();
        let eq = FactEq::new(st(Term::var(LVar::msg("y", 0))), st(Term::pub_name("a")));
        assert_eq!(add_unifiers(&dctxt.left, &mut updated, &[eq]), Err(timeout()));
        assert_eq!(updated, sys);
    }

    proptest! {
        #[test]
        fn always_before_is_a_strict_order(pairs in prop::collection::vec((0u64..6, 0u64..6), 0..20)) {
            let mut sys = System::empty(CaseDistKind::Untyped, false);
            for (a, b) in pairs {
                // cyclic or reflexive atoms are rejected and leave the system unchanged
                let _ = add_less(&mut sys, NodeId::new("n", a), NodeId::new("n", b));
            }
            let nodes: Vec<NodeId> = (0..6).map(|k| NodeId::new("n", k)).collect();
            let index = OrderIndex::new(&sys);
            for i in &nodes {
                prop_assert!(!always_before(&sys, i, i));
                for j in &nodes {
                    prop_assert_eq!(always_before(&sys, i, j), index.always_before(i, j));
                    if always_before(&sys, i, j) {
                        prop_assert!(!always_before(&sys, j, i));
                        for k in &nodes {
                            if always_before(&sys, j, k) {
                                prop_assert!(always_before(&sys, i, k));
                            }
                        }
                    }
                }
            }
        }

        #[test]
        fn systems_round_trip_through_codec(
            n in 0usize..4,
            lesses in prop::collection::vec((0u64..4, 0u64..4), 0..6),
            last in prop::option::of(0u64..4),
        ) {
            let mut sys = chain_system(n);
            for (a, b) in lesses {
                let _ = add_less(&mut sys, NodeId::new("fwd", a), NodeId::new("fwd", b));
            }
            if let Some(l) = last {
                set_last(&mut sys, NodeId::new("fwd", l)).unwrap();
            }
            insert_goal(&mut sys, Goal::Action(NodeId::new("fwd", 0), Fact::protocol("Step", vec![])), true);
            let back: System = decode(&encode(&sys).unwrap()).unwrap();
            prop_assert_eq!(back, sys);
        }

        #[test]
        fn mirrors_are_correct_dgs_with_matching_rule_names(n in 0usize..5) {
            let dctxt = chain_diff_ctxt();
            let sys = chain_system(n);
            prop_assert!(is_correct_dg(&sys));
            let mirror = get_mirror_dg(&dctxt, Side::Left, &sys).unwrap();
            let mirror = mirror.expect("chain systems always have a mirror");
            prop_assert!(is_correct_dg(&mirror));
            prop_assert_eq!(mirror.node_count(), sys.node_count());
            for (i, ru) in sys.nodes() {
                prop_assert_eq!(&mirror.node_rule(i).info, &ru.info);
            }
            for step in 0..n {
                let out = &mirror.node_rule(&NodeId::new("fwd", step as u64)).conclusions[0];
                prop_assert!(matches!(&out.args[0], Term::App(sym, _) if sym.name == "g"));
            }
        }
    }
}
