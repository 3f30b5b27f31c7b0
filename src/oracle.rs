//! Interface to the external equational reasoning engine.
//!
//! The constraint system never unifies terms itself. Every equality and
//! unifiability decision goes through an [`EquationalOracle`] reached via
//! the proof context. Implementations may run out of process and be slow;
//! failures surface as [`OracleError`] and are never retried here.

pub mod syntactic;

use crate::fact::{Fact, FactEq};
use crate::rule::RuleInstance;
use crate::term::{Subst, Term};
use std::fmt;
use thiserror::Error;

/// Fatal oracle failure, propagated unchanged to the driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("oracle crashed: {0}")]
    Crashed(String),
    #[error("oracle timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },
    #[error("oracle rejected malformed query: {0}")]
    Malformed(String),
}

/// Unification, matching and variant computation modulo the theory's
/// equations.
///
/// Calls must be free of observable side effects; an oracle shared across
/// threads must be reentrant.
pub trait EquationalOracle: fmt::Debug + Send + Sync {
    /// Most general simultaneous unifiers of the term pairs, over fresh
    /// variables. An empty result means the pairs are not unifiable.
    fn unify_terms(&self, pairs: &[(Term, Term)]) -> Result<Vec<Subst>, OracleError>;

    /// A substitution `σ` on the variables of `pattern` with
    /// `pattern σ = term`, if one exists. Variables of `term` are treated as
    /// constants.
    fn match_term(&self, term: &Term, pattern: &Term) -> Result<Option<Subst>, OracleError>;

    /// The variants of a rule instance. Each substitution, applied to the
    /// instance, yields one variant.
    fn variants_of(&self, ru: &RuleInstance) -> Result<Vec<Subst>, OracleError>;

    /// Unifiers of a list of fact equalities. Facts with different tags or
    /// arities never unify.
    fn unify(&self, eqs: &[FactEq]) -> Result<Vec<Subst>, OracleError> {
        let mut pairs = Vec::new();
        for eq in eqs {
            if !eq.lhs.same_shape(&eq.rhs) {
                return Ok(Vec::new());
            }
            pairs.extend(eq.lhs.args.iter().cloned().zip(eq.rhs.args.iter().cloned()));
        }
        self.unify_terms(&pairs)
    }

    fn unifiable_terms(&self, a: &Term, b: &Term) -> Result<bool, OracleError> {
        Ok(!self.unify_terms(&[(a.clone(), b.clone())])?.is_empty())
    }

    fn unifiable_facts(&self, a: &Fact, b: &Fact) -> Result<bool, OracleError> {
        Ok(!self.unify(&[FactEq::new(a.clone(), b.clone())])?.is_empty())
    }
}
