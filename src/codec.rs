//! Versioned CBOR encoding of persisted entities.
//!
//! Every entity is wrapped in an envelope carrying the format version, the
//! entity kind and a schema hash. Decoding rejects envelopes written by an
//! incompatible build instead of misreading them.

use crate::fingerprint::HashValue;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

/// Envelope format version (incremented on breaking changes).
pub const FORMAT_VERSION: u32 = 1;

/// Kind tag of a persisted entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    System,
    ProofConfig,
    CaseDistinction,
    CaseDistStore,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("CBOR error: {0}")]
    Cbor(#[from] serde_cbor::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("format version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },
    #[error("entity kind mismatch: found {found:?}, expected {expected:?}")]
    KindMismatch { found: EntityKind, expected: EntityKind },
    #[error("schema hash mismatch: found {found}, expected {expected}")]
    SchemaMismatch { found: HashValue, expected: HashValue },
    #[error("store belongs to context {found}, expected {expected}")]
    ContextMismatch { found: HashValue, expected: HashValue },
}

/// An entity with a stable persisted representation.
pub trait Persist: Serialize + DeserializeOwned {
    const KIND: EntityKind;
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    format_version: u32,
    kind: EntityKind,
    schema_hash: HashValue,
    payload: serde_cbor::Value,
}

static SCHEMA_HASH: OnceLock<HashValue> = OnceLock::new();

/// Hash of the serialised shape of all persisted types.
///
/// The descriptor must change whenever a persisted type changes shape.
pub fn schema_hash() -> HashValue {
    *SCHEMA_HASH.get_or_init(|| {
        const SCHEMA_DESCRIPTOR: &str = "\
            System:struct(nodes:BTreeMap<NodeId,RuleInstance>,edges:BTreeSet<Edge>,less_atoms:BTreeSet<LessAtom>,last_node:Option<NodeId>,eq_store:EqStore,unsolved_formulas:BTreeSet<Formula>,solved_formulas:BTreeSet<Formula>,lemmas:BTreeSet<Formula>,goals:BTreeMap<Goal,GoalStatus>,next_goal_nr:u64,case_dist_kind:CaseDistKind,is_diff:bool)\
            NodeId:struct(0:LVar)\
            LVar:struct(name:String,idx:u64,sort:LSort)\
            LSort:enum(Msg,Fresh,Pub,Node)\
            Term:enum(Var(LVar),Name(NameKind,String),App(FunSym,Vec<Term>))\
            NameKind:enum(Fresh,Pub)\
            FunSym:struct(name:String,ac:bool)\
            Fact:struct(tag:FactTag,args:Vec<Term>)\
            FactTag:enum(Fresh,In,Out,KnowsUp,KnowsDown,Protocol{name:String,arity:usize,multiplicity:Multiplicity})\
            Multiplicity:enum(Linear,Persistent)\
            RuleInstance:struct(info:RuleInfo,premises:Vec<Fact>,conclusions:Vec<Fact>,actions:Vec<Fact>)\
            RuleInfo:enum(Fresh,Protocol(String),Intruder(IntrRule))\
            IntrRule:enum(Constr(String),Destr(String),Coerce,Pub,FreshConstr,Send,Recv)\
            Edge:struct(src:NodeConc,tgt:NodePrem)\
            NodeConc:struct(0:NodeId,1:usize)\
            NodePrem:struct(0:NodeId,1:usize)\
            LessAtom:struct(smaller:NodeId,larger:NodeId)\
            EqStore:struct(subst:Subst,splits:BTreeMap<SplitId,Vec<Subst>>,next_split:u64)\
            Subst:struct(map:BTreeMap<LVar,Term>)\
            Formula:enum(Atom(Atom),Not(Formula),Conj(Vec<Formula>),Disj(Vec<Formula>),Guarded{quantifier:Quantifier,vars:Vec<LVar>,guards:Vec<Atom>,body:Formula})\
            Atom:enum(Action(NodeId,Fact),Less(NodeId,NodeId),Equal(Term,Term),Last(NodeId))\
            Quantifier:enum(All,Ex)\
            Goal:enum(Premise(NodePrem,Fact),Action(NodeId,Fact),Chain(NodeConc,NodePrem),Split(u64),Disj(Vec<Formula>))\
            GoalStatus:struct(solved:bool,nr:u64,loop_breaker:bool)\
            CaseDistKind:enum(Untyped,Typed)\
            ProofConfig:struct(name:String,signature:Signature,rules:ClassifiedRules,injective_facts:BTreeSet<String>,case_dist_kind:CaseDistKind,induction_hint:InductionHint,trace_quantifier:TraceQuantifier,is_diff:bool)\
            Signature:struct(fun_syms:BTreeSet<FunSym>)\
            ClassifiedRules:struct(protocol:Vec<RuleInstance>,construction:Vec<RuleInstance>,destruction:Vec<RuleInstance>)\
            InductionHint:enum(UseInduction,AvoidInduction)\
            TraceQuantifier:enum(ExistsSomeTrace,ExistsNoTrace)\
            CaseDistinction:struct(goal:Goal,cases:Vec<(Vec<String>,System)>)\
            CaseDistStore:struct(context:HashValue,entries:BTreeMap<Goal,CaseDistinction>)\
            HashValue:struct(0:[u8;32])\
            ";
        HashValue::hash_with_domain(b"SCHEMA_HASH", SCHEMA_DESCRIPTOR.as_bytes())
    })
}

pub fn encode<T: Persist>(x: &T) -> Result<Vec<u8>, CodecError> {
    let envelope = Envelope {
        format_version: FORMAT_VERSION,
        kind: T::KIND,
        schema_hash: schema_hash(),
        payload: serde_cbor::value::to_value(x)?,
    };
    Ok(serde_cbor::to_vec(&envelope)?)
}

pub fn decode<T: Persist>(bytes: &[u8]) -> Result<T, CodecError> {
    let envelope: Envelope = serde_cbor::from_slice(bytes)?;
    if envelope.format_version != FORMAT_VERSION {
        return Err(CodecError::VersionMismatch {
            found: envelope.format_version,
            expected: FORMAT_VERSION,
        });
    }
    if envelope.kind != T::KIND {
        return Err(CodecError::KindMismatch {
            found: envelope.kind,
            expected: T::KIND,
        });
    }
    if envelope.schema_hash != schema_hash() {
        return Err(CodecError::SchemaMismatch {
            found: envelope.schema_hash,
            expected: schema_hash(),
        });
    }
    Ok(serde_cbor::value::from_value(envelope.payload)?)
}

pub fn save_to_file<T: Persist>(x: &T, path: &Path) -> Result<(), CodecError> {
    let bytes = encode(x)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn load_from_file<T: Persist>(path: &Path) -> Result<T, CodecError> {
    let bytes = std::fs::read(path)?;
    decode(&bytes)
}
