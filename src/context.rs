//! Proof contexts: the read-only configuration every query receives.
//!
//! A [`ProofContext`] pairs a serialisable [`ProofConfig`] with a handle to
//! the equational oracle. Diff-equivalence proofs use a
//! [`DiffProofContext`] holding one context per side.

use crate::codec::{self, CodecError, EntityKind, Persist};
use crate::core::System;
use crate::core::CaseDistKind;
use crate::fingerprint::HashValue;
use crate::formula::Formula;
use crate::oracle::{EquationalOracle, OracleError};
use crate::rule::{ClassifiedRules, RuleInfo, RuleInstance};
use crate::term::FunSym;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Function symbols of a theory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub fun_syms: BTreeSet<FunSym>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sym: FunSym) -> Self {
        self.fun_syms.insert(sym);
        self
    }

    /// Looks up an AC symbol by name.
    pub fn ac_sym(&self, name: &str) -> Option<&FunSym> {
        self.fun_syms.iter().find(|f| f.ac && f.name == name)
    }
}

/// Whether the property must hold on all traces or be witnessed by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraceQuantifier {
    ExistsSomeTrace,
    ExistsNoTrace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InductionHint {
    UseInduction,
    AvoidInduction,
}

/// Serialisable part of a proof context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofConfig {
    pub name: String,
    pub signature: Signature,
    pub rules: ClassifiedRules,
    /// Tags of facts that are known to be injective.
    pub injective_facts: BTreeSet<String>,
    pub case_dist_kind: CaseDistKind,
    pub induction_hint: InductionHint,
    pub trace_quantifier: TraceQuantifier,
    pub is_diff: bool,
}

impl ProofConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signature: Signature::new(),
            rules: ClassifiedRules::default(),
            injective_facts: BTreeSet::new(),
            case_dist_kind: CaseDistKind::Untyped,
            induction_hint: InductionHint::AvoidInduction,
            trace_quantifier: TraceQuantifier::ExistsNoTrace,
            is_diff: false,
        }
    }
}

impl Persist for ProofConfig {
    const KIND: EntityKind = EntityKind::ProofConfig;
}

/// Immutable configuration plus oracle handle.
#[derive(Debug, Clone)]
pub struct ProofContext {
    config: ProofConfig,
    oracle: Arc<dyn EquationalOracle>,
}

impl ProofContext {
    pub fn new(config: ProofConfig, oracle: Arc<dyn EquationalOracle>) -> Self {
        Self { config, oracle }
    }

    #[inline]
    pub fn config(&self) -> &ProofConfig {
        &self.config
    }

    #[inline]
    pub fn oracle(&self) -> &dyn EquationalOracle {
        self.oracle.as_ref()
    }

    /// A shared handle to the oracle, for building further contexts.
    pub fn oracle_handle(&self) -> Arc<dyn EquationalOracle> {
        Arc::clone(&self.oracle)
    }

    #[inline]
    pub fn rules(&self) -> &ClassifiedRules {
        &self.config.rules
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.config.signature
    }

    /// Encodes the configuration. The oracle handle is not persisted.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(&self.config)
    }

    /// Decodes a configuration and reattaches `oracle`.
    pub fn decode(bytes: &[u8], oracle: Arc<dyn EquationalOracle>) -> Result<Self, CodecError> {
        Ok(Self::new(codec::decode(bytes)?, oracle))
    }

    /// Content fingerprint of the configuration.
    pub fn fingerprint(&self) -> Result<HashValue, CodecError> {
        crate::fingerprint::context_fingerprint(self)
    }
}

/// Contexts compare by configuration only.
impl PartialEq for ProofContext {
    fn eq(&self, other: &Self) -> bool {
        self.config == other.config
    }
}

/// Side of a diff-equivalence proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// An inconsistent diff proof context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("protocol rule {rule} exists only on the {side} side")]
    UnmatchedRule { rule: String, side: Side },
    #[error("{0} context is not marked as a diff context")]
    NotDiff(Side),
    #[error("diff rule {rule} has no projection on the {side} side")]
    MissingProjection { rule: String, side: Side },
}

/// Contexts for both sides of a diff-equivalence proof.
#[derive(Debug, Clone)]
pub struct DiffProofContext {
    pub left: ProofContext,
    pub right: ProofContext,
    /// Rules of the diff theory before projection to a side.
    pub protocol_rules: Vec<RuleInstance>,
    pub construction_rules: Vec<RuleInstance>,
    pub destruction_rules: Vec<RuleInstance>,
    /// Restrictions that only apply on one side.
    pub axioms: Vec<(Side, Formula)>,
}

impl DiffProofContext {
    pub fn new(left: ProofContext, right: ProofContext) -> Self {
        Self {
            left,
            right,
            protocol_rules: Vec::new(),
            construction_rules: Vec::new(),
            destruction_rules: Vec::new(),
            axioms: Vec::new(),
        }
    }

    pub fn context(&self, side: Side) -> &ProofContext {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    /// Shared intruder rules with the given name.
    pub fn intruder_rules_named<'a>(&'a self, info: &'a RuleInfo) -> impl Iterator<Item = &'a RuleInstance> + 'a {
        self.construction_rules
            .iter()
            .chain(self.destruction_rules.iter())
            .filter(move |r| &r.info == info)
    }

    /// Both sides must be diff contexts with the same protocol rule names,
    /// and every rule of the diff theory must be projected on both sides.
    pub fn validate(&self) -> Result<(), ContextError> {
        for side in [Side::Left, Side::Right] {
            let projected = self.context(side).rules().protocol_names();
            if let Some(r) = self.protocol_rules.iter().find(|r| !projected.contains(&r.info)) {
                return Err(ContextError::MissingProjection {
                    rule: r.info.to_string(),
                    side,
                });
            }
        }
        for side in [Side::Left, Side::Right] {
            let here = self.context(side);
            if !here.config().is_diff {
                return Err(ContextError::NotDiff(side));
            }
            let there = self.context(side.opposite()).rules().protocol_names();
            for info in here.rules().protocol_names() {
                if !there.contains(&info) {
                    return Err(ContextError::UnmatchedRule {
                        rule: info.to_string(),
                        side,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Proof type of a diff proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiffProofType {
    RuleEquivalence,
    Unspecified,
}

/// State of a diff proof step: the side being explored, the rule under
/// consideration and the constraint system built on that side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffSystem {
    pub proof_type: DiffProofType,
    pub side: Option<Side>,
    pub current_rule: Option<String>,
    pub system: Option<System>,
}

impl DiffSystem {
    pub fn new(proof_type: DiffProofType) -> Self {
        Self {
            proof_type,
            side: None,
            current_rule: None,
            system: None,
        }
    }

    pub fn with_side(mut self, side: Side) -> Self {
        self.side = Some(side);
        self
    }

    pub fn with_current_rule(mut self, rule: impl Into<String>) -> Self {
        self.current_rule = Some(rule.into());
        self
    }

    pub fn with_system(mut self, sys: System) -> Self {
        self.system = Some(sys);
        self
    }

    /// The mirror of the current system on the opposite side. `None` when
    /// no side or system is set, or when no mirror exists.
    pub fn mirror(&self, dctxt: &DiffProofContext) -> Result<Option<System>, OracleError> {
        match (self.side, &self.system) {
            (Some(side), Some(sys)) => crate::mirror::get_mirror_dg(dctxt, side, sys),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::syntactic::SyntacticOracle;

    fn diff_config(name: &str, rules: &[&str]) -> ProofConfig {
        let mut config = ProofConfig::new(name);
        config.is_diff = true;
        config.rules.protocol = rules
            .iter()
            .map(|r| RuleInstance::new(RuleInfo::Protocol(r.to_string()), vec![], vec![], vec![]))
            .collect();
        config
    }

    fn ctxt(config: ProofConfig) -> ProofContext {
        ProofContext::new(config, Arc::new(SyntacticOracle::new()))
    }

    #[test]
    fn context_round_trips_through_encoding() {
        let mut config = diff_config("rt", &["A", "B"]);
        config.injective_facts.insert("St".into());
        config.signature = Signature::new().with(FunSym::ac("mult"));
        let original = ctxt(config);
        let bytes = original.encode().unwrap();
        let decoded = ProofContext::decode(&bytes, Arc::new(SyntacticOracle::new())).unwrap();
        assert_eq!(decoded, original);
        assert!(decoded.signature().ac_sym("mult").is_some());
    }

    #[test]
    fn validation_requires_shared_rule_names() {
        let ok = DiffProofContext::new(ctxt(diff_config("l", &["A"])), ctxt(diff_config("r", &["A"])));
        assert_eq!(ok.validate(), Ok(()));
        let bad = DiffProofContext::new(ctxt(diff_config("l", &["A", "B"])), ctxt(diff_config("r", &["A"])));
        assert_eq!(
            bad.validate(),
            Err(ContextError::UnmatchedRule {
                rule: "B".into(),
                side: Side::Left
            })
        );
        let plain = DiffProofContext::new(ctxt(ProofConfig::new("l")), ctxt(diff_config("r", &[])));
        assert_eq!(plain.validate(), Err(ContextError::NotDiff(Side::Left)));
    }

    #[test]
    fn diff_rules_must_be_projected_on_both_sides() {
        let mut dctxt = DiffProofContext::new(ctxt(diff_config("l", &["A"])), ctxt(diff_config("r", &["A"])));
        dctxt.protocol_rules = diff_config("diff", &["A"]).rules.protocol;
        assert_eq!(dctxt.validate(), Ok(()));
        dctxt.protocol_rules = diff_config("diff", &["A", "C"]).rules.protocol;
        assert_eq!(
            dctxt.validate(),
            Err(ContextError::MissingProjection {
                rule: "C".into(),
                side: Side::Left
            })
        );
    }

    #[test]
    fn diff_system_without_side_has_no_mirror() {
        let dctxt = DiffProofContext::new(ctxt(diff_config("l", &[])), ctxt(diff_config("r", &[])));
        let ds = DiffSystem::new(DiffProofType::RuleEquivalence)
            .with_current_rule("A")
            .with_system(System::empty(CaseDistKind::Untyped, true));
        assert_eq!(ds.mirror(&dctxt).unwrap(), None);
        assert_eq!(Side::Left.opposite(), Side::Right);
    }
}
