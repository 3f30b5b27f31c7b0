//! Benchmarks for mirror dependency graph search and memo persistence.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dgraph_constraints::case_dist::{CaseDistStore, CaseDistinction};
use dgraph_constraints::context::{DiffProofContext, ProofConfig, ProofContext, Side};
use dgraph_constraints::core::{CaseDistKind, Edge, Goal, NodeConc, NodeId, NodePrem, System};
use dgraph_constraints::fact::Fact;
use dgraph_constraints::mirror::get_mirror_dg;
use dgraph_constraints::operations::{add_edge, add_rule_node};
use dgraph_constraints::oracle::syntactic::SyntacticOracle;
use dgraph_constraints::rule::{ConcIdx, PremIdx, RuleInfo, RuleInstance};
use dgraph_constraints::term::{Apply, FunSym, LVar, Subst, Term};
use std::sync::Arc;

fn st(t: Term) -> Fact {
    Fact::protocol("St", vec![t])
}

fn fwd_rule(sym: &str) -> RuleInstance {
    let x = Term::var(LVar::msg("x", 0));
    RuleInstance::new(
        RuleInfo::Protocol("Fwd".into()),
        vec![st(x.clone())],
        vec![],
        vec![st(Term::app(FunSym::free(sym), vec![x]))],
    )
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

fn side(name: &str, fwd: &str) -> ProofContext {
    let mut config = ProofConfig::new(name);
    config.is_diff = true;
    config.rules.protocol = vec![init_rule(), fwd_rule(fwd)];
    ProofContext::new(config, Arc::new(SyntacticOracle::new()))
}

fn link(sys: &mut System, src: &NodeId, tgt: &NodeId) {
    let e = Edge::new(NodeConc(src.clone(), ConcIdx(0)), NodePrem(tgt.clone(), PremIdx(0)));
    add_edge(sys, e).unwrap();
}

/// A fresh value threaded through `len` forwarding steps.
fn chain(len: u64) -> System {
    let k = LVar::fresh("k", 1);
    let mut sys = System::empty(CaseDistKind::Untyped, true);
    let f = NodeId::new("f", 0);
    let init = NodeId::new("init", 0);
    add_rule_node(&mut sys, f.clone(), RuleInstance::fresh(k.clone())).unwrap();
    let s = Subst::singleton(LVar::fresh("k", 0), Term::var(k.clone()));
    add_rule_node(&mut sys, init.clone(), init_rule().apply(&s)).unwrap();
    link(&mut sys, &f, &init);

    let mut prev = init;
    let mut t = Term::var(k);
    for step in 0..len {
        let node = NodeId::new("fwd", step);
        let s = Subst::singleton(LVar::msg("x", 0), t.clone());
        add_rule_node(&mut sys, node.clone(), fwd_rule("h").apply(&s)).unwrap();
        link(&mut sys, &prev, &node);
        t = Term::app(FunSym::free("h"), vec![t]);
        prev = node;
    }
    sys
}

fn bench_mirror_chain(c: &mut Criterion) {
    let dctxt = DiffProofContext::new(side("left", "h"), side("right", "g"));
    let mut group = c.benchmark_group("mirror_chain");
    for len in [4u64, 16, 64] {
        let sys = chain(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &sys, |b, sys| {
            b.iter(|| {
                let mirror = get_mirror_dg(black_box(&dctxt), Side::Left, black_box(sys)).unwrap();
                assert!(mirror.is_some());
            });
        });
    }
    group.finish();
}

/// Serialises and reloads a store of 32 memoised distinctions.
fn bench_case_dist_persistence(c: &mut Criterion) {
    use tempfile::NamedTempFile;

    let ctxt = side("left", "h");
    let mut store = CaseDistStore::new(&ctxt).unwrap();
    for k in 0..32 {
        let goal = Goal::Action(NodeId::new("i", k), Fact::protocol("Step", vec![]));
        store.insert(CaseDistinction::new(goal, vec![(vec![format!("case_{}", k)], chain(8))]));
    }
    let file = NamedTempFile::new().unwrap();

    let mut group = c.benchmark_group("case_dist_persistence");
    group.bench_function("save", |b| {
        b.iter(|| store.save(black_box(file.path())).unwrap());
    });
    store.save(file.path()).unwrap();
    group.bench_function("load", |b| {
        b.iter(|| {
            let back = CaseDistStore::load(black_box(file.path()), &ctxt).unwrap();
            assert_eq!(back.len(), 32);
        });
    });
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_mirror_chain, bench_case_dist_persistence
);
criterion_main!(benches);
