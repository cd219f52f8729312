//! Clause and query compilation
//!
//! Turns parsed clauses into machine code and constant-pool symbols. A
//! clause compiles to `enter np nv`, the head's argument instructions, one
//! `alloc .. call`/`unify` group per body goal, and `proceed`; head and goal
//! arguments emit identical instruction sequences, differentiated at run
//! time by the processor mode. Clause alternatives chain in source order.
//!
//! Queries compile as bodyless-head pseudo-clauses appended behind the
//! program, so the code memento taken before `compile_query` rolls the
//! provider back completely.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::machine::code::CodeStore;
use crate::machine::opcode::Opcode;
use crate::machine::symbol::ClauseSymbol;
use crate::machine::word::Word;
use crate::machine::{Addr, MachineError, MachineResult};
use crate::syntax::{self, Clause, ReadError, Term};

/// Compilation errors.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// The source did not parse.
    Read(ReadError),
    /// A clause head or goal was a variable.
    NonCallable(String),
    /// Code memory or constant pool trouble while emitting.
    Machine(MachineError),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(err) => write!(f, "{}", err),
            Self::NonCallable(name) => {
                write!(f, "variable {} cannot be used as a clause head or goal", name)
            }
            Self::Machine(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<ReadError> for CompileError {
    fn from(err: ReadError) -> Self {
        Self::Read(err)
    }
}

impl From<MachineError> for CompileError {
    fn from(err: MachineError) -> Self {
        Self::Machine(err)
    }
}

/// A compiled query: its entry address, frame size, and the named variables
/// with their frame slots in first-occurrence order.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub addr: Addr,
    pub nvars: usize,
    pub vars: Vec<(String, usize)>,
}

/// Variable slot allocation for one clause or query. Head top-level
/// first-occurrence variables take their parameter slot; every other named
/// variable, and each `_` occurrence, takes the next slot from the arity
/// upward.
struct Slots {
    map: HashMap<String, usize>,
    order: Vec<(String, usize)>,
    next: usize,
}

impl Slots {
    fn new(arity: usize) -> Self {
        Slots {
            map: HashMap::new(),
            order: Vec::new(),
            next: arity,
        }
    }

    fn assign_param(&mut self, name: &str, index: usize) {
        self.map.insert(name.to_string(), index);
        self.order.push((name.to_string(), index));
    }

    fn slot_of(&mut self, name: &str) -> usize {
        if name == "_" {
            let slot = self.next;
            self.next += 1;
            return slot;
        }
        if let Some(&slot) = self.map.get(name) {
            return slot;
        }
        let slot = self.next;
        self.next += 1;
        self.map.insert(name.to_string(), slot);
        self.order.push((name.to_string(), slot));
        slot
    }
}

fn emit_op(code: &mut CodeStore, op: Opcode) -> MachineResult<Addr> {
    code.append_code(Word::int(op.to_byte() as usize))
}

fn emit_int(code: &mut CodeStore, value: usize) -> MachineResult<Addr> {
    code.append_code(Word::int(value))
}

/// The functor of a callable term; variables are not callable.
fn functor_of(term: &Term) -> Result<(&str, u32), CompileError> {
    match term {
        Term::Atom(name) => Ok((name, 0)),
        Term::Compound(name, args) => Ok((name, args.len() as u32)),
        Term::Var(name) => Err(CompileError::NonCallable(name.clone())),
    }
}

/// Emit one argument position of a head or goal.
fn emit_arg(code: &mut CodeStore, slots: &mut Slots, term: &Term) -> Result<(), CompileError> {
    match term {
        Term::Var(name) => {
            emit_op(code, Opcode::Var)?;
            emit_int(code, slots.slot_of(name))?;
        }
        Term::Atom(name) => {
            let index = code.intern_functor(name, 0)?;
            emit_op(code, Opcode::Const)?;
            code.append_code(Word::constant(index))?;
        }
        Term::Compound(name, args) => {
            let index = code.intern_functor(name, args.len() as u32)?;
            emit_op(code, Opcode::Functor)?;
            code.append_code(Word::functor(index))?;
            for arg in args {
                emit_arg(code, slots, arg)?;
            }
            emit_op(code, Opcode::Pop)?;
        }
    }
    Ok(())
}

/// Emit one body goal: argument setup into a fresh target frame, then the
/// call, or the unification instruction for `=`/2.
fn emit_goal(code: &mut CodeStore, slots: &mut Slots, goal: &Term) -> Result<(), CompileError> {
    if let Term::Compound(name, args) = goal {
        if name == "=" && args.len() == 2 {
            emit_op(code, Opcode::Alloc)?;
            emit_arg(code, slots, &args[0])?;
            emit_arg(code, slots, &args[1])?;
            emit_op(code, Opcode::Unify)?;
            return Ok(());
        }
    }
    let (name, arity) = functor_of(goal)?;
    let pred = code.intern_predicate(name, arity)?;
    emit_op(code, Opcode::Alloc)?;
    if let Term::Compound(_, args) = goal {
        for arg in args {
            emit_arg(code, slots, arg)?;
        }
    }
    emit_op(code, Opcode::Call)?;
    emit_int(code, pred)?;
    Ok(())
}

/// Append the last clause of `pred`'s chain, preserving source order.
fn link_clause(code: &mut CodeStore, pred: usize, clause: usize) -> MachineResult<()> {
    match code.predicate_at(pred)?.first_clause {
        None => code.set_predicate_first(pred, clause),
        Some(first) => {
            let mut at = first;
            loop {
                match code.clause_at(at)?.next {
                    Some(next) => at = next,
                    None => break,
                }
            }
            code.set_clause_next(at, clause)
        }
    }
}

fn compile_clause(code: &mut CodeStore, clause: &Clause) -> Result<(), CompileError> {
    let (name, arity) = functor_of(&clause.head)?;
    let name = name.to_string();
    let pred = code.intern_predicate(&name, arity)?;

    let mut slots = Slots::new(arity as usize);
    if let Term::Compound(_, args) = &clause.head {
        for (index, arg) in args.iter().enumerate() {
            if let Term::Var(var) = arg {
                if var != "_" && !slots.map.contains_key(var) {
                    slots.assign_param(var, index);
                }
            }
        }
    }

    let addr = code.code_size();
    emit_op(code, Opcode::Enter)?;
    emit_int(code, arity as usize)?;
    // The frame size is known only after the whole clause is emitted.
    let nvars_at = emit_int(code, 0)?;

    if let Term::Compound(_, args) = &clause.head {
        for arg in args {
            emit_arg(code, &mut slots, arg)?;
        }
    }
    for goal in &clause.body {
        emit_goal(code, &mut slots, goal)?;
    }
    emit_op(code, Opcode::Proceed)?;
    code.patch_code(nvars_at, Word::int(slots.next))?;

    let clause_index = code.push_clause(ClauseSymbol {
        addr,
        nparams: arity,
        nvars: slots.next as u32,
        next: None,
    })?;
    link_clause(code, pred, clause_index)?;
    debug!(
        target: "zipr::compiler",
        predicate = %format!("{}/{}", name, arity),
        addr,
        nvars = slots.next,
        "compiled clause"
    );
    Ok(())
}

/// Compile a program: every clause is appended to code memory and linked
/// into its predicate's chain in source order.
pub fn consult(code: &mut CodeStore, src: &str) -> Result<(), CompileError> {
    let clauses = syntax::parse_program(src)?;
    for clause in &clauses {
        compile_clause(code, clause)?;
    }
    debug!(target: "zipr::compiler", clauses = clauses.len(), "consulted program");
    Ok(())
}

/// Compile a query as a bodyless-head pseudo-clause appended to code
/// memory; returns the entry address and the named-variable slots.
pub fn compile_query(code: &mut CodeStore, src: &str) -> Result<CompiledQuery, CompileError> {
    let goals = syntax::parse_query(src)?;
    let mut slots = Slots::new(0);

    let addr = code.code_size();
    emit_op(code, Opcode::Enter)?;
    emit_int(code, 0)?;
    let nvars_at = emit_int(code, 0)?;
    for goal in &goals {
        emit_goal(code, &mut slots, goal)?;
    }
    emit_op(code, Opcode::Proceed)?;
    code.patch_code(nvars_at, Word::int(slots.next))?;

    Ok(CompiledQuery {
        addr,
        nvars: slots.next,
        vars: slots.order,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clause_chain_follows_source_order() {
        let mut code = CodeStore::new();
        consult(
            &mut code,
            "parent(tom, bob). parent(tom, liz). parent(bob, ann).",
        )
        .unwrap();

        let pred = code.intern_predicate("parent", 2).unwrap();
        let c1 = code.predicate_at(pred).unwrap().first_clause.unwrap();
        let c2 = code.clause_at(c1).unwrap().next.unwrap();
        let c3 = code.clause_at(c2).unwrap().next.unwrap();
        assert_eq!(code.clause_at(c3).unwrap().next, None);

        let a1 = code.clause_at(c1).unwrap().addr;
        let a2 = code.clause_at(c2).unwrap().addr;
        let a3 = code.clause_at(c3).unwrap().addr;
        assert!(a1 < a2 && a2 < a3, "chain walks the clauses in source order");
    }

    #[test]
    fn test_head_variables_map_to_parameter_slots() {
        let mut code = CodeStore::new();
        consult(&mut code, "r(X, Y, X) :- s(Y, Z, Z).").unwrap();

        let pred = code.intern_predicate("r", 3).unwrap();
        let clause = code
            .clause_at(code.predicate_at(pred).unwrap().first_clause.unwrap())
            .unwrap();
        assert_eq!(clause.nparams, 3);
        // X and Y take parameter slots 0 and 1; Z is the only extra slot.
        assert_eq!(clause.nvars, 4);
    }

    #[test]
    fn test_disassembly_of_compiled_clause() {
        let mut code = CodeStore::new();
        consult(&mut code, "+(zero, N, N).").unwrap();
        let listing = code.disassemble_program();
        assert!(listing.contains("enter 3 3"));
        assert!(listing.contains("const zero"));
        assert!(listing.contains("var 1"));
        assert!(listing.contains("proceed"));
    }

    #[test]
    fn test_rule_emits_call_groups() {
        let mut code = CodeStore::new();
        consult(&mut code, "anc(X, Y) :- parent(X, Z), anc(Z, Y).").unwrap();
        let listing = code.disassemble_program();
        assert!(listing.contains("alloc"));
        assert!(listing.contains("call parent/2"));
        assert!(listing.contains("call anc/2"));
    }

    #[test]
    fn test_query_variable_slots() {
        let mut code = CodeStore::new();
        let query = compile_query(&mut code, "?- p(X, f(Y), X).").unwrap();
        assert_eq!(query.nvars, 2);
        assert_eq!(
            query.vars,
            vec![("X".to_string(), 0), ("Y".to_string(), 1)]
        );
    }

    #[test]
    fn test_equals_goal_compiles_to_unify() {
        let mut code = CodeStore::new();
        let query = compile_query(&mut code, "X = f(X)").unwrap();
        assert_eq!(query.nvars, 1);
        let listing = code.disassemble_range(query.addr, code.code_size());
        assert!(listing.contains("unify"));
        assert!(listing.contains("functor f/1"));
        assert!(!listing.contains("call"));
    }

    #[test]
    fn test_variable_head_is_rejected() {
        let mut code = CodeStore::new();
        let err = consult(&mut code, "X.").unwrap_err();
        assert!(matches!(err, CompileError::NonCallable(name) if name == "X"));

        let err = compile_query(&mut code, "Goal").unwrap_err();
        assert!(matches!(err, CompileError::NonCallable(_)));
    }

    #[test]
    fn test_anonymous_variables_get_fresh_slots() {
        let mut code = CodeStore::new();
        consult(&mut code, "ignore(_, _).").unwrap();
        let pred = code.intern_predicate("ignore", 2).unwrap();
        let clause = code
            .clause_at(code.predicate_at(pred).unwrap().first_clause.unwrap())
            .unwrap();
        // Each underscore occupies its own slot above the parameters.
        assert_eq!(clause.nvars, 4);
    }
}
