//! Code memory and the constant pool
//!
//! `CodeStore` is the bytecode provider: an append-only word vector holding
//! program code (queries are appended behind it), plus the constant pool of
//! functor, predicate and clause symbols. Functors and predicates are
//! interned, so pool-index equality is symbol equality.
//!
//! A `Memento` snapshots the code and pool lengths. Query compilation only
//! ever appends, so restoring a memento (truncating both and dropping the
//! interning entries above the mark) rolls the provider back to the
//! program-only state on every query exit path.

use std::collections::HashMap;

use itertools::Itertools;

use super::opcode::Opcode;
use super::symbol::{ClauseSymbol, FunctorSymbol, PredicateSymbol, Symbol};
use super::word::{Tag, Word};
use super::{Addr, MachineError, MachineResult};

/// Default capacity of code memory, in words.
pub const DEFAULT_CODE_CAPACITY: usize = 1 << 16;

/// Default capacity of the constant pool, in symbols.
pub const DEFAULT_POOL_CAPACITY: usize = 1 << 14;

/// Opaque snapshot of the bytecode provider, used to roll the code segment
/// and constant pool back after a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Memento {
    code_len: usize,
    pool_len: usize,
}

/// Code memory plus constant pool.
#[derive(Debug)]
pub struct CodeStore {
    code: Vec<Word>,
    pool: Vec<Symbol>,
    functors: HashMap<(String, u32), usize>,
    predicates: HashMap<(String, u32), usize>,
    code_limit: usize,
    pool_limit: usize,
}

impl CodeStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CODE_CAPACITY, DEFAULT_POOL_CAPACITY)
    }

    pub fn with_limits(code_limit: usize, pool_limit: usize) -> Self {
        CodeStore {
            code: Vec::new(),
            pool: Vec::new(),
            functors: HashMap::new(),
            predicates: HashMap::new(),
            code_limit,
            pool_limit,
        }
    }

    // === Code memory ===

    /// Number of words in code memory.
    #[inline]
    pub fn code_size(&self) -> usize {
        self.code.len()
    }

    /// Read one code word.
    pub fn read_code(&self, addr: Addr) -> MachineResult<Word> {
        self.code
            .get(addr)
            .copied()
            .ok_or(MachineError::CodeOutOfBounds(addr))
    }

    /// Append one code word, returning its address.
    pub fn append_code(&mut self, word: Word) -> MachineResult<Addr> {
        if self.code.len() >= self.code_limit {
            return Err(MachineError::RegionOverflow {
                region: "code memory",
                limit: self.code_limit,
            });
        }
        let addr = self.code.len();
        self.code.push(word);
        Ok(addr)
    }

    /// Overwrite an already-emitted word; used to patch forward operands.
    pub fn patch_code(&mut self, addr: Addr, word: Word) -> MachineResult<()> {
        match self.code.get_mut(addr) {
            Some(cell) => {
                *cell = word;
                Ok(())
            }
            None => Err(MachineError::CodeOutOfBounds(addr)),
        }
    }

    // === Constant pool ===

    /// Number of symbols in the pool.
    #[inline]
    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    fn push_symbol(&mut self, symbol: Symbol) -> MachineResult<usize> {
        if self.pool.len() >= self.pool_limit {
            return Err(MachineError::RegionOverflow {
                region: "constant pool",
                limit: self.pool_limit,
            });
        }
        let index = self.pool.len();
        self.pool.push(symbol);
        Ok(index)
    }

    /// Intern a functor, returning the pool index shared by every
    /// occurrence of the same name/arity.
    pub fn intern_functor(&mut self, name: &str, arity: u32) -> MachineResult<usize> {
        if let Some(&index) = self.functors.get(&(name.to_string(), arity)) {
            return Ok(index);
        }
        let index = self.push_symbol(Symbol::Functor(FunctorSymbol {
            name: name.to_string(),
            arity,
        }))?;
        self.functors.insert((name.to_string(), arity), index);
        Ok(index)
    }

    /// Intern a predicate, creating it with an empty clause chain on first
    /// sight.
    pub fn intern_predicate(&mut self, name: &str, arity: u32) -> MachineResult<usize> {
        if let Some(&index) = self.predicates.get(&(name.to_string(), arity)) {
            return Ok(index);
        }
        let index = self.push_symbol(Symbol::Predicate(PredicateSymbol {
            name: name.to_string(),
            arity,
            first_clause: None,
        }))?;
        self.predicates.insert((name.to_string(), arity), index);
        Ok(index)
    }

    /// Add a clause symbol to the pool.
    pub fn push_clause(&mut self, clause: ClauseSymbol) -> MachineResult<usize> {
        self.push_symbol(Symbol::Clause(clause))
    }

    /// Look up any pool entry.
    pub fn symbol(&self, index: usize) -> MachineResult<&Symbol> {
        self.pool
            .get(index)
            .ok_or(MachineError::PoolIndexOutOfBounds(index))
    }

    /// Look up a functor symbol; any other kind is a miscast.
    pub fn functor_at(&self, index: usize) -> MachineResult<&FunctorSymbol> {
        match self.symbol(index)? {
            Symbol::Functor(f) => Ok(f),
            other => Err(MachineError::PoolMiscast {
                index,
                expected: "functor",
                found: other.kind(),
            }),
        }
    }

    /// Look up a predicate symbol; any other kind is a miscast.
    pub fn predicate_at(&self, index: usize) -> MachineResult<&PredicateSymbol> {
        match self.symbol(index)? {
            Symbol::Predicate(p) => Ok(p),
            other => Err(MachineError::PoolMiscast {
                index,
                expected: "predicate",
                found: other.kind(),
            }),
        }
    }

    /// Look up a clause symbol; any other kind is a miscast.
    pub fn clause_at(&self, index: usize) -> MachineResult<ClauseSymbol> {
        match self.symbol(index)? {
            Symbol::Clause(c) => Ok(*c),
            other => Err(MachineError::PoolMiscast {
                index,
                expected: "clause",
                found: other.kind(),
            }),
        }
    }

    /// Set the head of a predicate's clause chain.
    pub fn set_predicate_first(&mut self, index: usize, clause: usize) -> MachineResult<()> {
        match self.pool.get_mut(index) {
            Some(Symbol::Predicate(p)) => {
                p.first_clause = Some(clause);
                Ok(())
            }
            Some(other) => Err(MachineError::PoolMiscast {
                index,
                expected: "predicate",
                found: other.kind(),
            }),
            None => Err(MachineError::PoolIndexOutOfBounds(index)),
        }
    }

    /// Link a clause to its next alternative.
    pub fn set_clause_next(&mut self, index: usize, next: usize) -> MachineResult<()> {
        match self.pool.get_mut(index) {
            Some(Symbol::Clause(c)) => {
                c.next = Some(next);
                Ok(())
            }
            Some(other) => Err(MachineError::PoolMiscast {
                index,
                expected: "clause",
                found: other.kind(),
            }),
            None => Err(MachineError::PoolIndexOutOfBounds(index)),
        }
    }

    // === Memento ===

    /// Snapshot the current code and pool extents.
    pub fn memento(&self) -> Memento {
        Memento {
            code_len: self.code.len(),
            pool_len: self.pool.len(),
        }
    }

    /// Roll back to a snapshot, discarding code, symbols and interning
    /// entries added after it was taken.
    pub fn restore(&mut self, memento: &Memento) {
        self.code.truncate(memento.code_len);
        self.pool.truncate(memento.pool_len);
        let len = memento.pool_len;
        self.functors.retain(|_, index| *index < len);
        self.predicates.retain(|_, index| *index < len);
    }

    // === Disassembly ===

    /// Render one instruction, returning the text and the next address.
    pub fn disassemble_instruction(&self, addr: Addr) -> (String, Addr) {
        let word = match self.read_code(addr) {
            Ok(w) => w,
            Err(_) => return ("<end>".to_string(), addr + 1),
        };
        if word.tag() != Tag::Int {
            return (format!("??? ({})", word), addr + 1);
        }
        let Some(opcode) = u8::try_from(word.payload())
            .ok()
            .and_then(Opcode::from_byte)
        else {
            return (format!("??? (0x{:02x})", word.payload()), addr + 1);
        };

        let next = addr + 1 + opcode.operand_count();
        let operands: Vec<String> = (addr + 1..next)
            .map(|at| match self.read_code(at) {
                Ok(w) => self.render_operand(opcode, w),
                Err(_) => "???".to_string(),
            })
            .collect();

        if operands.is_empty() {
            (opcode.mnemonic().to_string(), next)
        } else {
            (
                format!("{} {}", opcode.mnemonic(), operands.iter().join(" ")),
                next,
            )
        }
    }

    fn render_operand(&self, opcode: Opcode, word: Word) -> String {
        match (opcode, word.tag()) {
            (Opcode::Call, Tag::Int) => match self.predicate_at(word.payload()) {
                Ok(p) => format!("{}", p),
                Err(_) => format!("#{}", word.payload()),
            },
            (Opcode::Const, Tag::Con) | (Opcode::Functor, Tag::Fun) => {
                match self.functor_at(word.payload()) {
                    Ok(f) if f.arity == 0 => f.name.clone(),
                    Ok(f) => format!("{}", f),
                    Err(_) => format!("#{}", word.payload()),
                }
            }
            (_, Tag::Int) => format!("{}", word.payload()),
            _ => format!("({})", word),
        }
    }

    /// Render a half-open address range as one listing.
    pub fn disassemble_range(&self, from: Addr, to: Addr) -> String {
        let mut lines = Vec::new();
        let mut addr = from;
        while addr < to.min(self.code.len()) {
            let (text, next) = self.disassemble_instruction(addr);
            lines.push(format!("{:04} {}", addr, text));
            addr = next;
        }
        lines.iter().join("\n")
    }

    /// Render all of code memory.
    pub fn disassemble_program(&self) -> String {
        self.disassemble_range(0, self.code.len())
    }
}

impl Default for CodeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_functor_interning() {
        let mut code = CodeStore::new();
        let a = code.intern_functor("succ", 1).unwrap();
        let b = code.intern_functor("succ", 1).unwrap();
        let c = code.intern_functor("succ", 2).unwrap();
        assert_eq!(a, b, "same name/arity interns to one index");
        assert_ne!(a, c, "different arity is a different functor");
        assert_eq!(code.functor_at(a).unwrap().name, "succ");
    }

    #[test]
    fn test_pool_miscast() {
        let mut code = CodeStore::new();
        let f = code.intern_functor("a", 0).unwrap();
        let err = code.predicate_at(f).unwrap_err();
        assert!(matches!(
            err,
            MachineError::PoolMiscast {
                expected: "predicate",
                found: "functor",
                ..
            }
        ));
        assert!(matches!(
            code.symbol(99),
            Err(MachineError::PoolIndexOutOfBounds(99))
        ));
    }

    #[test]
    fn test_clause_chain_links() {
        let mut code = CodeStore::new();
        let p = code.intern_predicate("p", 1).unwrap();
        let c1 = code
            .push_clause(ClauseSymbol {
                addr: 0,
                nparams: 1,
                nvars: 1,
                next: None,
            })
            .unwrap();
        let c2 = code
            .push_clause(ClauseSymbol {
                addr: 10,
                nparams: 1,
                nvars: 2,
                next: None,
            })
            .unwrap();
        code.set_predicate_first(p, c1).unwrap();
        code.set_clause_next(c1, c2).unwrap();

        assert_eq!(code.predicate_at(p).unwrap().first_clause, Some(c1));
        assert_eq!(code.clause_at(c1).unwrap().next, Some(c2));
        assert_eq!(code.clause_at(c2).unwrap().next, None);
    }

    #[test]
    fn test_memento_roundtrip() {
        let mut code = CodeStore::new();
        code.intern_functor("zero", 0).unwrap();
        code.append_code(Word::int(Opcode::Proceed.to_byte() as usize))
            .unwrap();

        let memento = code.memento();
        let extra = code.intern_functor("extra", 0).unwrap();
        code.append_code(Word::int(Opcode::Nop.to_byte() as usize))
            .unwrap();

        code.restore(&memento);
        assert_eq!(code.code_size(), 1);
        assert_eq!(code.pool_size(), 1);
        assert!(code.symbol(extra).is_err());
        // The interning entry was rolled back too: re-interning allocates a
        // fresh index instead of resurrecting the truncated one.
        let again = code.intern_functor("extra", 0).unwrap();
        assert_eq!(again, 1);
    }

    #[test]
    fn test_disassemble_instruction() {
        let mut code = CodeStore::new();
        let zero = code.intern_functor("zero", 0).unwrap();
        code.append_code(Word::int(Opcode::Const.to_byte() as usize))
            .unwrap();
        code.append_code(Word::constant(zero)).unwrap();
        code.append_code(Word::int(Opcode::Proceed.to_byte() as usize))
            .unwrap();

        let (text, next) = code.disassemble_instruction(0);
        assert_eq!(text, "const zero");
        assert_eq!(next, 2);
        let listing = code.disassemble_program();
        assert!(listing.contains("const zero"));
        assert!(listing.contains("proceed"));
    }
}
