//! Answer read-back
//!
//! After a solution, the bindings of the query frame are read back as
//! [`Term`] trees for the caller to print. Terms are occurs-check free, so a
//! binding can be cyclic; reading stops at [`MAX_TERM_DEPTH`] and inserts an
//! elision marker instead of looping.

use std::fmt;

use itertools::Itertools;

use super::word::Tag;
use super::{Addr, Machine, MachineError, MachineResult};

/// Depth cut for reading back (possibly cyclic) terms.
pub const MAX_TERM_DEPTH: usize = 64;

/// A fully dereferenced view of a term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// An unbound variable, identified by its cell address.
    Var(Addr),
    Atom(String),
    Compound(String, Vec<Term>),
    /// A subterm beyond the depth cut.
    Elided,
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(addr) => write!(f, "_G{}", addr),
            Term::Atom(name) => write!(f, "{}", name),
            Term::Compound(name, args) => {
                write!(
                    f,
                    "{}({})",
                    name,
                    args.iter().map(|arg| arg.to_string()).join(", ")
                )
            }
            Term::Elided => write!(f, "..."),
        }
    }
}

impl Machine {
    /// Read the binding of query variable `slot` from the query frame.
    pub fn read_binding(&self, slot: usize) -> MachineResult<Term> {
        let root = self
            .query_frame()
            .ok_or(MachineError::Precondition("no query has been reset"))?;
        self.term_at(self.var_addr(root, slot), MAX_TERM_DEPTH)
    }

    /// Read the term rooted at `addr`, eliding below `depth`.
    pub fn term_at(&self, addr: Addr, depth: usize) -> MachineResult<Term> {
        if depth == 0 {
            return Ok(Term::Elided);
        }
        let (at, word) = self.deref(addr)?;
        match word.tag() {
            Tag::Ref => Ok(Term::Var(at)),
            Tag::Con => Ok(Term::Atom(
                self.code().functor_at(word.payload())?.name.clone(),
            )),
            Tag::Str => {
                let functor_word = self.read_word(word.payload())?;
                if functor_word.tag() != Tag::Fun {
                    return Err(MachineError::CorruptTerm(word.payload()));
                }
                let functor = self.code().functor_at(functor_word.payload())?;
                let name = functor.name.clone();
                let arity = functor.arity as usize;
                if arity == 0 {
                    return Ok(Term::Atom(name));
                }
                let args = (0..arity)
                    .map(|k| self.term_at(word.payload() + 1 + k, depth - 1))
                    .collect::<MachineResult<Vec<_>>>()?;
                Ok(Term::Compound(name, args))
            }
            Tag::Fun | Tag::Int => Err(MachineError::CorruptTerm(at)),
        }
    }
}
