//! Precomputed case distinctions and their per-context memo store.
//!
//! A case distinction lists every way a goal can be solved, each case being
//! a path of case names together with the System it leads to. Computing one
//! is expensive, so the driver memoises them per proof context and may keep
//! the memo on disk between runs.

use crate::codec::{self, CodecError, EntityKind, Persist};
use crate::context::ProofContext;
use crate::core::{Goal, System};
use crate::fingerprint::HashValue;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, trace};

/// The cases that solve one goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseDistinction {
    pub goal: Goal,
    pub cases: Vec<(Vec<String>, System)>,
}

impl CaseDistinction {
    pub fn new(goal: Goal, cases: Vec<(Vec<String>, System)>) -> Self {
        Self { goal, cases }
    }

    /// Case names joined with `_`, in case order.
    pub fn case_names(&self) -> Vec<String> {
        self.cases.iter().map(|(path, _)| path.join("_")).collect()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn systems(&self) -> impl Iterator<Item = &System> {
        self.cases.iter().map(|(_, sys)| sys)
    }
}

impl Persist for CaseDistinction {
    const KIND: EntityKind = EntityKind::CaseDistinction;
}

/// Memo of case distinctions for one proof context.
///
/// # Invariants
/// - `context` is the fingerprint of the context every entry was computed in.
/// - Every entry is stored under its own goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseDistStore {
    context: HashValue,
    entries: BTreeMap<Goal, CaseDistinction>,
}

impl CaseDistStore {
    pub fn new(ctxt: &ProofContext) -> Result<Self, CodecError> {
        Ok(Self {
            context: ctxt.fingerprint()?,
            entries: BTreeMap::new(),
        })
    }

    pub fn context(&self) -> &HashValue {
        &self.context
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, goal: &Goal) -> Option<&CaseDistinction> {
        self.entries.get(goal)
    }

    /// Stores `cd` under its goal, returning the entry it replaces.
    pub fn insert(&mut self, cd: CaseDistinction) -> Option<CaseDistinction> {
        self.entries.insert(cd.goal.clone(), cd)
    }

    /// The memoised distinction for `goal`, computing and storing it on a miss.
    ///
    /// A failed computation stores nothing.
    pub fn get_or_compute<E>(
        &mut self,
        goal: &Goal,
        compute: impl FnOnce(&Goal) -> Result<CaseDistinction, E>,
    ) -> Result<&CaseDistinction, E> {
        match self.entries.entry(goal.clone()) {
            Entry::Occupied(e) => {
                trace!(%goal, "case distinction memo hit");
                Ok(e.into_mut())
            }
            Entry::Vacant(e) => {
                debug!(%goal, "case distinction memo miss");
                let cd = compute(goal)?;
                debug_assert_eq!(&cd.goal, goal);
                debug!(%goal, cases = cd.len(), "case distinction computed");
                Ok(e.insert(cd))
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), CodecError> {
        codec::save_to_file(self, path)
    }

    /// Loads a store written for `ctxt`.
    ///
    /// Stores written for any other context are rejected.
    pub fn load(path: &Path, ctxt: &ProofContext) -> Result<Self, CodecError> {
        let store: CaseDistStore = codec::load_from_file(path)?;
        let expected = ctxt.fingerprint()?;
        if store.context != expected {
            return Err(CodecError::ContextMismatch {
                found: store.context,
                expected,
            });
        }
        debug!(entries = store.len(), "case distinction store loaded");
        Ok(store)
    }
}

impl Persist for CaseDistStore {
    const KIND: EntityKind = EntityKind::CaseDistStore;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProofConfig;
    use crate::core::{CaseDistKind, NodeId};
    use crate::fact::Fact;
    use crate::operations::add_rule_node;
    use crate::oracle::syntactic::SyntacticOracle;
    use crate::rule::RuleInstance;
    use crate::term::{LVar, Term};
    use std::sync::Arc;

    fn ctxt(name: &str) -> ProofContext {
        ProofContext::new(ProofConfig::new(name), Arc::new(SyntacticOracle::new()))
    }

    fn goal() -> Goal {
        Goal::Action(
            NodeId::new("i", 0),
            Fact::protocol("Sent", vec![Term::Var(LVar::msg("m", 0))]),
        )
    }

    fn distinction() -> CaseDistinction {
        let mut sys = System::empty(CaseDistKind::Untyped, false);
        add_rule_node(&mut sys, NodeId::new("f", 0), RuleInstance::fresh(LVar::fresh("k", 0))).unwrap();
        CaseDistinction::new(
            goal(),
            vec![
                (vec!["Send".into(), "case_1".into()], sys),
                (vec!["Reply".into()], System::empty(CaseDistKind::Untyped, false)),
            ],
        )
    }

    #[test]
    fn case_names_join_paths() {
        let cd = distinction();
        assert_eq!(cd.case_names(), vec!["Send_case_1".to_string(), "Reply".to_string()]);
        assert_eq!(cd.len(), 2);
        assert_eq!(cd.systems().count(), 2);
    }

    #[test]
    fn distinction_round_trips() {
        let cd = distinction();
        let back: CaseDistinction = codec::decode(&codec::encode(&cd).unwrap()).unwrap();
        assert_eq!(back, cd);
    }

    #[test]
    fn get_or_compute_runs_once() {
        let mut store = CaseDistStore::new(&ctxt("p")).unwrap();
        let mut calls = 0;
        for _ in 0..3 {
            let cd = store
                .get_or_compute(&goal(), |_| {
                    calls += 1;
                    Ok::<_, ()>(distinction())
                })
                .unwrap();
            assert_eq!(cd.len(), 2);
        }
        assert_eq!(calls, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn failed_computation_stores_nothing() {
        let mut store = CaseDistStore::new(&ctxt("p")).unwrap();
        let res = store.get_or_compute(&goal(), |_| Err("oracle down"));
        assert_eq!(res.unwrap_err(), "oracle down");
        assert!(store.is_empty());
    }

    #[test]
    fn store_reloads_only_for_its_context() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path();
        let mut store = CaseDistStore::new(&ctxt("p")).unwrap();
        store.insert(distinction());
        store.save(path).unwrap();

        let back = CaseDistStore::load(path, &ctxt("p")).unwrap();
        assert_eq!(back, store);
        assert!(matches!(
            CaseDistStore::load(path, &ctxt("q")),
            Err(CodecError::ContextMismatch { .. })
        ));
    }
}
