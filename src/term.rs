//! Message terms, logical variables and substitutions.
//!
//! Terms are built from sorted logical variables, ground names (fresh or
//! public constants) and function applications. Node identifiers are
//! node-sorted variables, so the same substitution machinery that rewrites
//! messages also identifies trace positions.
//!
//! Substitutions are idempotent: applying one is a single simultaneous pass,
//! bindings are never chased.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Sort of a logical variable or term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LSort {
    /// Arbitrary message.
    Msg,
    /// Fresh value, only ever produced by the fresh rule.
    Fresh,
    /// Public value, known to everyone.
    Pub,
    /// Trace position.
    Node,
}

impl LSort {
    /// Returns `true` if a variable of this sort may be instantiated with a
    /// term of sort `other`.
    pub fn subsumes(self, other: LSort) -> bool {
        self == other || (self == LSort::Msg && matches!(other, LSort::Fresh | LSort::Pub))
    }

    fn prefix(self) -> &'static str {
        match self {
            LSort::Msg => "",
            LSort::Fresh => "~",
            LSort::Pub => "$",
            LSort::Node => "#",
        }
    }
}

/// A logical variable: a name, a disambiguating index and a sort.
///
/// Two variables are the same only if all three components agree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LVar {
    pub name: String,
    pub idx: u64,
    pub sort: LSort,
}

impl LVar {
    pub fn new(name: impl Into<String>, sort: LSort, idx: u64) -> Self {
        Self {
            name: name.into(),
            idx,
            sort,
        }
    }

    pub fn msg(name: impl Into<String>, idx: u64) -> Self {
        Self::new(name, LSort::Msg, idx)
    }

    pub fn fresh(name: impl Into<String>, idx: u64) -> Self {
        Self::new(name, LSort::Fresh, idx)
    }

    pub fn public(name: impl Into<String>, idx: u64) -> Self {
        Self::new(name, LSort::Pub, idx)
    }

    pub fn node(name: impl Into<String>, idx: u64) -> Self {
        Self::new(name, LSort::Node, idx)
    }
}

impl fmt::Display for LVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.idx == 0 {
            write!(f, "{}{}", self.sort.prefix(), self.name)
        } else {
            write!(f, "{}{}.{}", self.sort.prefix(), self.name, self.idx)
        }
    }
}

/// Kind of a ground name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NameKind {
    Fresh,
    Pub,
}

impl NameKind {
    pub fn sort(self) -> LSort {
        match self {
            NameKind::Fresh => LSort::Fresh,
            NameKind::Pub => LSort::Pub,
        }
    }
}

/// Function symbol. AC symbols are associative and commutative.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FunSym {
    pub name: String,
    pub ac: bool,
}

impl FunSym {
    pub fn free(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ac: false,
        }
    }

    pub fn ac(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ac: true,
        }
    }

    /// The free pairing symbol.
    pub fn pair() -> Self {
        Self::free("pair")
    }
}

/// A message term.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Term {
    Var(LVar),
    Name(NameKind, String),
    App(FunSym, Vec<Term>),
}

impl Term {
    pub fn var(v: LVar) -> Self {
        Term::Var(v)
    }

    pub fn fresh_name(name: impl Into<String>) -> Self {
        Term::Name(NameKind::Fresh, name.into())
    }

    pub fn pub_name(name: impl Into<String>) -> Self {
        Term::Name(NameKind::Pub, name.into())
    }

    pub fn app(sym: FunSym, args: Vec<Term>) -> Self {
        if sym.ac {
            Term::App(sym.clone(), flatten_ac(&sym, args))
        } else {
            Term::App(sym, args)
        }
    }

    pub fn pair(a: Term, b: Term) -> Self {
        Term::App(FunSym::pair(), vec![a, b])
    }

    /// Sort of the term. Applications are always messages.
    pub fn sort(&self) -> LSort {
        match self {
            Term::Var(v) => v.sort,
            Term::Name(kind, _) => kind.sort(),
            Term::App(..) => LSort::Msg,
        }
    }

    pub fn as_var(&self) -> Option<&LVar> {
        match self {
            Term::Var(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the variable if this term is a message-sorted variable.
    pub fn as_msg_var(&self) -> Option<&LVar> {
        self.as_var().filter(|v| v.sort == LSort::Msg)
    }

    pub fn is_ground(&self) -> bool {
        match self {
            Term::Var(_) => false,
            Term::Name(..) => true,
            Term::App(_, args) => args.iter().all(Term::is_ground),
        }
    }

    pub fn occurs(&self, v: &LVar) -> bool {
        match self {
            Term::Var(w) => w == v,
            Term::Name(..) => false,
            Term::App(_, args) => args.iter().any(|a| a.occurs(v)),
        }
    }

    /// Replaces every subterm that is a key of `map` by its image.
    ///
    /// The replacement is outermost-first and does not descend into images.
    pub fn replace(&self, map: &BTreeMap<Term, Term>) -> Term {
        if let Some(image) = map.get(self) {
            return image.clone();
        }
        match self {
            Term::App(sym, args) => {
                Term::app(sym.clone(), args.iter().map(|a| a.replace(map)).collect())
            }
            other => other.clone(),
        }
    }

    /// Flattens nested applications of AC symbols and sorts their arguments.
    pub fn ac_normalize(&self) -> Term {
        match self {
            Term::App(sym, args) => {
                Term::app(sym.clone(), args.iter().map(Term::ac_normalize).collect())
            }
            other => other.clone(),
        }
    }
}

fn flatten_ac(sym: &FunSym, args: Vec<Term>) -> Vec<Term> {
    let mut flat = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Term::App(inner, inner_args) if inner == *sym => flat.extend(inner_args),
            other => flat.push(other),
        }
    }
    flat.sort();
    flat
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(v) => write!(f, "{}", v),
            Term::Name(NameKind::Fresh, n) => write!(f, "~'{}'", n),
            Term::Name(NameKind::Pub, n) => write!(f, "'{}'", n),
            Term::App(sym, args) if sym.name == "pair" && args.len() == 2 => {
                write!(f, "<{}, {}>", args[0], args[1])
            }
            Term::App(sym, args) => {
                write!(f, "{}(", sym.name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Anything that mentions logical variables.
///
/// `visit_vars` visits every occurrence, bound ones included, so that
/// `max_var_idx` is safe to use for renaming apart.
pub trait HasVars {
    fn visit_vars(&self, f: &mut dyn FnMut(&LVar));

    fn vars(&self) -> BTreeSet<LVar> {
        let mut acc = BTreeSet::new();
        self.visit_vars(&mut |v| {
            acc.insert(v.clone());
        });
        acc
    }

    fn max_var_idx(&self) -> Option<u64> {
        let mut max = None;
        self.visit_vars(&mut |v| {
            max = Some(max.map_or(v.idx, |m: u64| m.max(v.idx)));
        });
        max
    }
}

impl HasVars for LVar {
    fn visit_vars(&self, f: &mut dyn FnMut(&LVar)) {
        f(self)
    }
}

impl HasVars for Term {
    fn visit_vars(&self, f: &mut dyn FnMut(&LVar)) {
        match self {
            Term::Var(v) => f(v),
            Term::Name(..) => {}
            Term::App(_, args) => args.iter().for_each(|a| a.visit_vars(f)),
        }
    }
}

impl<T: HasVars> HasVars for [T] {
    fn visit_vars(&self, f: &mut dyn FnMut(&LVar)) {
        self.iter().for_each(|x| x.visit_vars(f))
    }
}

impl<T: HasVars> HasVars for Vec<T> {
    fn visit_vars(&self, f: &mut dyn FnMut(&LVar)) {
        self.as_slice().visit_vars(f)
    }
}

/// Substitution application.
pub trait Apply {
    fn apply(&self, subst: &Subst) -> Self;
}

impl Apply for Term {
    fn apply(&self, subst: &Subst) -> Term {
        match self {
            Term::Var(v) => subst.get(v).cloned().unwrap_or_else(|| self.clone()),
            Term::Name(..) => self.clone(),
            Term::App(sym, args) => Term::app(sym.clone(), args.iter().map(|a| a.apply(subst)).collect()),
        }
    }
}

impl<T: Apply> Apply for Vec<T> {
    fn apply(&self, subst: &Subst) -> Self {
        self.iter().map(|x| x.apply(subst)).collect()
    }
}

/// An idempotent substitution from variables to terms.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Subst {
    map: BTreeMap<LVar, Term>,
}

impl Subst {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singleton(v: LVar, t: Term) -> Self {
        let mut s = Self::new();
        s.insert(v, t);
        s
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (LVar, Term)>) -> Self {
        let mut s = Self::new();
        for (v, t) in pairs {
            s.insert(v, t);
        }
        s
    }

    /// Binds `v` to `t`. Identity bindings are dropped.
    pub fn insert(&mut self, v: LVar, t: Term) {
        if t.as_var() == Some(&v) {
            self.map.remove(&v);
        } else {
            self.map.insert(v, t);
        }
    }

    pub fn get(&self, v: &LVar) -> Option<&Term> {
        self.map.get(v)
    }

    pub fn contains(&self, v: &LVar) -> bool {
        self.map.contains_key(v)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LVar, &Term)> {
        self.map.iter()
    }

    pub fn dom(&self) -> impl Iterator<Item = &LVar> {
        self.map.keys()
    }

    pub fn range_vars(&self) -> BTreeSet<LVar> {
        let mut acc = BTreeSet::new();
        for t in self.map.values() {
            t.visit_vars(&mut |v| {
                acc.insert(v.clone());
            });
        }
        acc
    }

    /// Sequential composition: applying the result equals applying `self`
    /// and then `next`.
    pub fn then(&self, next: &Subst) -> Subst {
        let mut out = Subst::new();
        for (v, t) in &self.map {
            out.insert(v.clone(), t.apply(next));
        }
        for (v, t) in &next.map {
            if !self.map.contains_key(v) {
                out.insert(v.clone(), t.clone());
            }
        }
        out
    }

    /// Keeps only the bindings for variables in `vars`.
    pub fn restrict(&self, vars: &BTreeSet<LVar>) -> Subst {
        Subst {
            map: self
                .map
                .iter()
                .filter(|(v, _)| vars.contains(*v))
                .map(|(v, t)| (v.clone(), t.clone()))
                .collect(),
        }
    }
}

impl HasVars for Subst {
    fn visit_vars(&self, f: &mut dyn FnMut(&LVar)) {
        for (v, t) in &self.map {
            f(v);
            t.visit_vars(f);
        }
    }
}

impl fmt::Display for Subst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (v, t)) in self.map.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} ↦ {}", v, t)?;
        }
        write!(f, "}}")
    }
}

/// Supply of variables that are fresh with respect to some context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshSupply {
    next: u64,
}

impl FreshSupply {
    pub fn starting_at(next: u64) -> Self {
        Self { next }
    }

    /// A supply whose variables avoid everything mentioned by `ctx`.
    pub fn avoiding(ctx: &(impl HasVars + ?Sized)) -> Self {
        Self::starting_at(ctx.max_var_idx().map_or(0, |m| m + 1))
    }

    /// Makes sure future variables also avoid `ctx`.
    pub fn also_avoid(&mut self, ctx: &(impl HasVars + ?Sized)) {
        if let Some(m) = ctx.max_var_idx() {
            self.next = self.next.max(m + 1);
        }
    }

    /// A new variable with the same name and sort as `v`.
    pub fn fresh_like(&mut self, v: &LVar) -> LVar {
        let idx = self.next;
        self.next += 1;
        LVar::new(v.name.clone(), v.sort, idx)
    }

    /// A renaming of `vars` to fresh variables.
    pub fn renaming<'a>(&mut self, vars: impl IntoIterator<Item = &'a LVar>) -> Subst {
        let mut s = Subst::new();
        for v in vars {
            let w = self.fresh_like(v);
            s.insert(v.clone(), Term::Var(w));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> LVar {
        LVar::msg("x", 0)
    }

    fn y() -> LVar {
        LVar::msg("y", 1)
    }

    #[test]
    fn apply_is_simultaneous() {
        let s = Subst::from_pairs([(x(), Term::Var(y())), (y(), Term::pub_name("a"))]);
        let t = Term::pair(Term::Var(x()), Term::Var(y()));
        assert_eq!(
            t.apply(&s),
            Term::pair(Term::Var(y()), Term::pub_name("a"))
        );
    }

    #[test]
    fn composition_matches_sequential_application() {
        let s1 = Subst::singleton(x(), Term::pair(Term::Var(y()), Term::Var(y())));
        let s2 = Subst::singleton(y(), Term::fresh_name("n"));
        let t = Term::pair(Term::Var(x()), Term::Var(y()));
        assert_eq!(t.apply(&s1.then(&s2)), t.apply(&s1).apply(&s2));
    }

    #[test]
    fn identity_bindings_are_dropped() {
        let mut s = Subst::new();
        s.insert(x(), Term::Var(x()));
        assert!(s.is_empty());
    }

    #[test]
    fn ac_arguments_are_flattened_and_sorted() {
        let mult = FunSym::ac("mult");
        let inner = Term::app(mult.clone(), vec![Term::pub_name("b"), Term::pub_name("a")]);
        let outer = Term::app(mult.clone(), vec![Term::pub_name("c"), inner]);
        assert_eq!(
            outer,
            Term::App(
                mult,
                vec![Term::pub_name("a"), Term::pub_name("b"), Term::pub_name("c")]
            )
        );
    }

    #[test]
    fn fresh_supply_avoids_context() {
        let t = Term::pair(Term::Var(LVar::msg("x", 7)), Term::Var(y()));
        let mut supply = FreshSupply::avoiding(&t);
        let v = supply.fresh_like(&x());
        assert_eq!(v.idx, 8);
        assert_eq!(v.name, "x");
        assert_eq!(supply.fresh_like(&x()).idx, 9);
    }

    #[test]
    fn display_uses_sort_prefixes() {
        assert_eq!(LVar::fresh("n", 0).to_string(), "~n");
        assert_eq!(LVar::public("A", 2).to_string(), "$A.2");
        assert_eq!(LVar::node("i", 1).to_string(), "#i.1");
        assert_eq!(
            Term::pair(Term::Var(x()), Term::pub_name("c")).to_string(),
            "<x, 'c'>"
        );
    }

    #[test]
    fn sort_subsumption() {
        assert!(LSort::Msg.subsumes(LSort::Fresh));
        assert!(LSort::Msg.subsumes(LSort::Pub));
        assert!(!LSort::Fresh.subsumes(LSort::Msg));
        assert!(!LSort::Msg.subsumes(LSort::Node));
    }
}
