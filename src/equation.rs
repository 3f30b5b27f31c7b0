//! Equation store: the committed substitution plus outstanding case splits.
//!
//! A split records the disjunction of unifiers the oracle returned for one
//! batch of equations. Each disjunct is a substitution over fresh variables;
//! resolving a split commits exactly one of them.

use crate::term::{Apply, HasVars, LVar, Subst};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a case split within one equation store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SplitId(pub u64);

impl fmt::Display for SplitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "split#{}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EqStore {
    subst: Subst,
    splits: BTreeMap<SplitId, Vec<Subst>>,
    next_split: u64,
}

impl EqStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The committed substitution.
    pub fn subst(&self) -> &Subst {
        &self.subst
    }

    /// Applies the committed substitution.
    pub fn apply<T: Apply>(&self, x: &T) -> T {
        x.apply(&self.subst)
    }

    pub fn splits(&self) -> impl Iterator<Item = (SplitId, &[Subst])> {
        self.splits.iter().map(|(id, ds)| (*id, ds.as_slice()))
    }

    pub fn split(&self, id: SplitId) -> Option<&[Subst]> {
        self.splits.get(&id).map(Vec::as_slice)
    }

    /// A split with no disjunct left is unsatisfiable.
    pub fn is_contradictory(&self) -> bool {
        self.splits.values().any(Vec::is_empty)
    }

    /// Composes `s` onto the committed substitution and propagates it into
    /// the disjuncts of every open split.
    pub fn commit(&mut self, s: &Subst) {
        self.subst = self.subst.then(s);
        for disjuncts in self.splits.values_mut() {
            for d in disjuncts.iter_mut() {
                *d = d.then(s);
            }
        }
    }

    /// Records a new split and returns its identifier.
    pub fn add_split(&mut self, disjuncts: Vec<Subst>) -> SplitId {
        let id = SplitId(self.next_split);
        self.next_split += 1;
        self.splits.insert(id, disjuncts);
        id
    }

    /// Removes a split, returning its disjuncts.
    pub fn take_split(&mut self, id: SplitId) -> Option<Vec<Subst>> {
        self.splits.remove(&id)
    }
}

impl HasVars for EqStore {
    fn visit_vars(&self, f: &mut dyn FnMut(&LVar)) {
        for (v, t) in self.subst.iter() {
            f(v);
            t.visit_vars(f);
        }
        for d in self.splits.values().flatten() {
            for (v, t) in d.iter() {
                f(v);
                t.visit_vars(f);
            }
        }
    }
}

impl fmt::Display for EqStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.subst)?;
        for (id, ds) in &self.splits {
            write!(f, "\n  {}:", id)?;
            for d in ds {
                write!(f, " {}", d)?;
            }
        }
        Ok(())
    }
}
