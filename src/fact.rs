//! Facts: typed term tuples produced and consumed by rule instances.

use crate::term::{Apply, FunSym, HasVars, LVar, Subst, Term};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Multiplicity of a protocol fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Multiplicity {
    /// Consumed when used as a premise.
    Linear,
    /// May be used any number of times.
    Persistent,
}

/// Tag of a fact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FactTag {
    /// `Fr(~n)`, the output of the fresh rule.
    Fresh,
    /// Message received from the network.
    In,
    /// Message sent to the network.
    Out,
    /// Intruder knowledge, constructed ("up").
    KnowsUp,
    /// Intruder knowledge, deconstructed ("down").
    KnowsDown,
    /// Protocol-specific fact.
    Protocol {
        name: String,
        arity: usize,
        multiplicity: Multiplicity,
    },
}

impl FactTag {
    pub fn protocol(name: impl Into<String>, arity: usize) -> Self {
        FactTag::Protocol {
            name: name.into(),
            arity,
            multiplicity: Multiplicity::Linear,
        }
    }

    pub fn persistent(name: impl Into<String>, arity: usize) -> Self {
        FactTag::Protocol {
            name: name.into(),
            arity,
            multiplicity: Multiplicity::Persistent,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FactTag::Fresh => "Fr",
            FactTag::In => "In",
            FactTag::Out => "Out",
            FactTag::KnowsUp => "KU",
            FactTag::KnowsDown => "KD",
            FactTag::Protocol { name, .. } => name,
        }
    }

    pub fn is_persistent(&self) -> bool {
        match self {
            FactTag::KnowsUp | FactTag::KnowsDown => true,
            FactTag::Protocol { multiplicity, .. } => *multiplicity == Multiplicity::Persistent,
            _ => false,
        }
    }
}

/// A fact: a tag applied to an ordered list of terms.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fact {
    pub tag: FactTag,
    pub args: Vec<Term>,
}

impl Fact {
    pub fn new(tag: FactTag, args: Vec<Term>) -> Self {
        Self { tag, args }
    }

    pub fn fresh(t: Term) -> Self {
        Self::new(FactTag::Fresh, vec![t])
    }

    pub fn knows_up(t: Term) -> Self {
        Self::new(FactTag::KnowsUp, vec![t])
    }

    pub fn knows_down(t: Term) -> Self {
        Self::new(FactTag::KnowsDown, vec![t])
    }

    pub fn input(t: Term) -> Self {
        Self::new(FactTag::In, vec![t])
    }

    pub fn output(t: Term) -> Self {
        Self::new(FactTag::Out, vec![t])
    }

    /// A linear protocol fact; the arity is taken from `args`.
    pub fn protocol(name: impl Into<String>, args: Vec<Term>) -> Self {
        Self::new(FactTag::protocol(name, args.len()), args)
    }

    /// Public-knowledge fact: the intruder constructs this term.
    pub fn is_knows_up(&self) -> bool {
        self.tag == FactTag::KnowsUp
    }

    /// Returns the variables of a trivial fact: constructed knowledge of a
    /// single unconstrained message variable.
    pub fn trivial_vars(&self) -> Option<Vec<LVar>> {
        match (&self.tag, self.args.as_slice()) {
            (FactTag::KnowsUp, [t]) => t.as_msg_var().map(|v| vec![v.clone()]),
            _ => None,
        }
    }

    pub fn is_trivial(&self) -> bool {
        self.trivial_vars().is_some()
    }

    /// Whether tags and arities agree, the cheapest unifiability precheck.
    pub fn same_shape(&self, other: &Fact) -> bool {
        self.tag == other.tag && self.args.len() == other.args.len()
    }

    /// Encodes the fact as a term headed by a free symbol naming the tag,
    /// so facts can be handed to term-level matching.
    pub fn as_term(&self) -> Term {
        let head = match &self.tag {
            FactTag::Protocol { multiplicity: Multiplicity::Persistent, .. } => {
                format!("!{}/{}", self.tag.name(), self.args.len())
            }
            _ => format!("{}/{}", self.tag.name(), self.args.len()),
        };
        Term::App(FunSym::free(head), self.args.clone())
    }

    /// Replaces subterms of every argument, see [`Term::replace`].
    pub fn replace(&self, map: &BTreeMap<Term, Term>) -> Fact {
        Fact::new(self.tag.clone(), self.args.iter().map(|t| t.replace(map)).collect())
    }
}

impl HasVars for Fact {
    fn visit_vars(&self, f: &mut dyn FnMut(&LVar)) {
        self.args.visit_vars(f)
    }
}

impl Apply for Fact {
    fn apply(&self, subst: &Subst) -> Fact {
        Fact::new(self.tag.clone(), self.args.apply(subst))
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tag.is_persistent() && matches!(self.tag, FactTag::Protocol { .. }) {
            write!(f, "!")?;
        }
        write!(f, "{}(", self.tag.name())?;
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", a)?;
        }
        write!(f, ")")
    }
}

/// An equation between two facts, as submitted to the unification oracle.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FactEq {
    pub lhs: Fact,
    pub rhs: Fact,
}

impl FactEq {
    pub fn new(lhs: Fact, rhs: Fact) -> Self {
        Self { lhs, rhs }
    }
}
