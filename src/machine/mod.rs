//! The ZIP abstract machine
//!
//! A stack-based Warren-style machine executing compiled clauses against a
//! compiled program. The machine owns its memory regions (code memory and
//! constant pool via [`CodeStore`], global/local stacks, trail and
//! scratchpad via the data store) and a small register file: program counter,
//! source and target frame pointers, the latest choice point, the argument
//! cursor and the processor mode.
//!
//! Execution is a fetch-decode-execute loop: `reset(query_addr)` prepares the
//! query frame, `run` steps until the query frame returns (a solution) or
//! backtracking exhausts the choice points (no more solutions), and
//! `next_solution` backtracks into the remaining alternatives.

pub mod code;
mod frames;
pub mod opcode;
pub mod store;
pub mod symbol;
pub mod term;
mod unify;
pub mod word;

use std::fmt;
use std::mem;

use tracing::trace;

use code::CodeStore;
use frames::FRAME_HEADER;
use opcode::{Mode, Opcode};
use store::{DataStore, PadEntry};
use word::{Tag, Word};

pub use code::{Memento, DEFAULT_CODE_CAPACITY, DEFAULT_POOL_CAPACITY};
pub use term::{Term, MAX_TERM_DEPTH};
pub use unify::BoundAddrs;

/// A cell address in the global or local region, or a code address.
pub type Addr = usize;

/// Result of machine operations.
pub type MachineResult<T> = Result<T, MachineError>;

/// Errors raised by the machine. Everything except the recoverable
/// no-more-solutions outcome (which is not an error, see [`Outcome`])
/// indicates corrupt bytecode, a resource limit, or a caller bug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineError {
    /// The fetched operator byte is not a known opcode.
    InvalidOpcode(u64),
    /// A code word had an unexpected tag for its position.
    CorruptCode(Addr),
    /// A term cell had an unexpected tag.
    CorruptTerm(Addr),
    /// Program counter or code operand outside code memory.
    CodeOutOfBounds(Addr),
    /// Data address outside every region's extent.
    AddressOutOfBounds(Addr),
    /// Constant-pool index out of range.
    PoolIndexOutOfBounds(usize),
    /// Pool entry is not the expected symbol kind.
    PoolMiscast {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
    /// A region's top exceeded its configured capacity.
    RegionOverflow {
        region: &'static str,
        limit: usize,
    },
    /// An operation's precondition was violated by the caller.
    Precondition(&'static str),
}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOpcode(b) => write!(f, "invalid opcode: 0x{:02x}", b),
            Self::CorruptCode(addr) => write!(f, "corrupt code word at {}", addr),
            Self::CorruptTerm(addr) => write!(f, "corrupt term cell at {}", addr),
            Self::CodeOutOfBounds(addr) => write!(f, "code address out of bounds: {}", addr),
            Self::AddressOutOfBounds(addr) => write!(f, "address out of bounds: {}", addr),
            Self::PoolIndexOutOfBounds(i) => write!(f, "constant pool index out of bounds: {}", i),
            Self::PoolMiscast {
                index,
                expected,
                found,
            } => write!(
                f,
                "constant {} is a {}, expected a {}",
                index, found, expected
            ),
            Self::RegionOverflow { region, limit } => {
                write!(f, "{} exhausted (capacity {})", region, limit)
            }
            Self::Precondition(msg) => write!(f, "precondition violated: {}", msg),
        }
    }
}

impl std::error::Error for MachineError {}

/// Result of driving the machine: one derivation, or none left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The query frame returned; bindings are readable from it.
    Solution,
    /// No live choice point remained; the canonical "no" answer.
    NoMoreSolutions,
}

/// Configuration for the machine's memory regions.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Maximum global-stack (heap) cells.
    pub global_capacity: usize,
    /// Maximum local-stack cells.
    pub local_capacity: usize,
    /// Maximum trail entries.
    pub trail_capacity: usize,
    /// Maximum scratchpad entries.
    pub scratch_capacity: usize,
    /// Dump each executed instruction to stderr.
    pub trace: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            global_capacity: 1 << 20,
            local_capacity: 1 << 20,
            trail_capacity: 1 << 16,
            scratch_capacity: 1 << 12,
            trace: false,
        }
    }
}

/// What a single instruction did to control flow.
enum Flow {
    Continue,
    Solution,
    Exhausted,
}

/// One ZIP machine instance. Nothing is shared between instances.
#[derive(Debug)]
pub struct Machine {
    code: CodeStore,
    store: DataStore,
    config: MachineConfig,
    /// Program counter.
    pc: Addr,
    /// Source frame: the currently executing activation.
    sf: Option<Addr>,
    /// Target frame: the frame being built for a pending call.
    tf: Option<Addr>,
    /// Latest choice point.
    cp: Option<Addr>,
    /// Argument cursor: next parameter slot (ARG), next structure cell
    /// (COPY), or next cell to match (MATCH).
    cursor: Addr,
    mode: Mode,
    /// The query frame, kept for binding read-back.
    root: Option<Addr>,
    /// Reusable undo buffer for internally triggered backtracks.
    undone: Vec<Addr>,
}

impl Machine {
    /// Create a machine over the given bytecode provider.
    pub fn new(code: CodeStore) -> Self {
        Self::with_config(code, MachineConfig::default())
    }

    pub fn with_config(code: CodeStore, config: MachineConfig) -> Self {
        let store = DataStore::new(&config);
        Machine {
            code,
            store,
            config,
            pc: 0,
            sf: None,
            tf: None,
            cp: None,
            cursor: 0,
            mode: Mode::Arg,
            root: None,
            undone: Vec::new(),
        }
    }

    #[inline]
    pub fn code(&self) -> &CodeStore {
        &self.code
    }

    #[inline]
    pub fn code_mut(&mut self) -> &mut CodeStore {
        &mut self.code
    }

    /// Prepare a fresh run of the query at `query_addr`: empty every data
    /// region, clear the registers and allocate the query frame.
    pub fn reset(&mut self, query_addr: Addr) -> MachineResult<()> {
        self.store.reset();
        self.pc = query_addr;
        self.sf = None;
        self.tf = None;
        self.cp = None;
        self.cursor = 0;
        self.mode = Mode::Arg;
        self.undone.clear();
        let root = self.push_target_frame()?;
        self.root = Some(root);
        Ok(())
    }

    /// Drive execution until a solution or exhaustion.
    pub fn run(&mut self) -> MachineResult<Outcome> {
        loop {
            match self.step()? {
                Flow::Continue => continue,
                Flow::Solution => return Ok(Outcome::Solution),
                Flow::Exhausted => return Ok(Outcome::NoMoreSolutions),
            }
        }
    }

    /// Request another derivation after a solution. Addresses of cells
    /// unbound by the backtrack are appended to `undone`, which must be
    /// empty on entry.
    pub fn next_solution(&mut self, undone: &mut Vec<Addr>) -> MachineResult<Outcome> {
        match self.backtrack(undone)? {
            None => Ok(Outcome::NoMoreSolutions),
            Some(pc) => {
                self.pc = pc;
                self.run()
            }
        }
    }

    // === Register and region views ===

    #[inline]
    pub fn global_top(&self) -> Addr {
        self.store.global_top()
    }

    #[inline]
    pub fn local_top(&self) -> Addr {
        self.store.local_top()
    }

    #[inline]
    pub fn trail_top(&self) -> usize {
        self.store.trail_top()
    }

    #[inline]
    pub fn local_base(&self) -> Addr {
        self.store.local_base()
    }

    #[inline]
    pub fn choice_point(&self) -> Option<Addr> {
        self.cp
    }

    /// Address of the query frame of the current run.
    #[inline]
    pub fn query_frame(&self) -> Option<Addr> {
        self.root
    }

    /// Absolute address of variable cell `index` in `frame`.
    #[inline]
    pub fn var_addr(&self, frame: Addr, index: usize) -> Addr {
        frame + FRAME_HEADER + index
    }

    /// Random access to a data cell; reference chains are not followed.
    pub fn read_word(&self, addr: Addr) -> MachineResult<Word> {
        self.store.read_word(addr)
    }

    /// Follow reference links from `addr` to the end of the chain.
    pub fn deref(&self, addr: Addr) -> MachineResult<(Addr, Word)> {
        self.store.deref(addr)
    }

    // === Fetch ===

    fn fetch_code_word(&mut self) -> MachineResult<Word> {
        let word = self.code.read_code(self.pc)?;
        self.pc += 1;
        Ok(word)
    }

    /// Read the operator word at the program counter and decode it together
    /// with the current mode.
    fn fetch_operator(&mut self) -> MachineResult<(Opcode, Mode)> {
        let at = self.pc;
        let word = self.fetch_code_word()?;
        if word.tag() != Tag::Int {
            return Err(MachineError::CorruptCode(at));
        }
        let opcode = u8::try_from(word.payload())
            .ok()
            .and_then(Opcode::from_byte)
            .ok_or(MachineError::InvalidOpcode(word.payload() as u64))?;
        Ok((opcode, self.mode))
    }

    fn fetch_int_operand(&mut self) -> MachineResult<usize> {
        let at = self.pc;
        let word = self.fetch_code_word()?;
        if word.tag() != Tag::Int {
            return Err(MachineError::CorruptCode(at));
        }
        Ok(word.payload())
    }

    fn fetch_pool_operand(&mut self, tag: Tag) -> MachineResult<usize> {
        let at = self.pc;
        let word = self.fetch_code_word()?;
        if word.tag() != tag {
            return Err(MachineError::CorruptCode(at));
        }
        Ok(word.payload())
    }

    /// Transfer control to `addr`; if a target frame exists, the old program
    /// counter becomes its continuation.
    pub(crate) fn jump(&mut self, addr: Addr) -> MachineResult<()> {
        if let Some(tf) = self.tf {
            self.set_frame_cont(tf, self.pc)?;
        }
        self.pc = addr;
        Ok(())
    }

    // === Execution ===

    /// Fetch, decode and execute one instruction.
    fn step(&mut self) -> MachineResult<Flow> {
        let at = self.pc;
        let (opcode, mode) = self.fetch_operator()?;
        if self.config.trace {
            let (text, _) = self.code.disassemble_instruction(at);
            eprintln!("[zipr] {:04} {:<20} | {}", at, text, mode);
        }
        trace!(target: "zipr::machine", pc = at, op = %opcode, mode = %mode, "execute");

        match opcode {
            Opcode::Nop => Ok(Flow::Continue),
            Opcode::Enter => self.op_enter(),
            Opcode::Alloc => self.op_alloc(),
            Opcode::Dealloc => {
                self.pop_target_frame()?;
                Ok(Flow::Continue)
            }
            Opcode::Proceed => self.op_proceed(),
            Opcode::Call => self.op_call(),
            Opcode::Fail => self.fail(),
            Opcode::Unify => self.op_unify(),
            Opcode::Var => self.op_var(),
            Opcode::Const => self.op_const(),
            Opcode::Functor => self.op_functor(),
            Opcode::Pop => self.op_pop(),
        }
    }

    /// Backtrack after a failure; exhaustion ends the run.
    fn fail(&mut self) -> MachineResult<Flow> {
        let mut buf = mem::take(&mut self.undone);
        buf.clear();
        let outcome = self.backtrack(&mut buf);
        self.undone = buf;
        match outcome? {
            Some(pc) => {
                self.pc = pc;
                Ok(Flow::Continue)
            }
            None => Ok(Flow::Exhausted),
        }
    }

    fn op_enter(&mut self) -> MachineResult<Flow> {
        let nparams = self.fetch_int_operand()?;
        let nvars = self.fetch_int_operand()?;
        let frame = self.push_source_frame(nparams, nvars)?;
        self.cursor = self.var_addr(frame, 0);
        self.mode = Mode::Match;
        Ok(Flow::Continue)
    }

    fn op_alloc(&mut self) -> MachineResult<Flow> {
        let frame = self.push_target_frame()?;
        self.cursor = self.var_addr(frame, 0);
        self.mode = Mode::Arg;
        Ok(Flow::Continue)
    }

    fn op_proceed(&mut self) -> MachineResult<Flow> {
        if self.pop_source_frame()? {
            Ok(Flow::Solution)
        } else {
            Ok(Flow::Continue)
        }
    }

    fn op_call(&mut self) -> MachineResult<Flow> {
        let pred_index = self.fetch_int_operand()?;
        if self.tf.is_none() {
            return Err(MachineError::Precondition("call without a target frame"));
        }
        let first = self.code.predicate_at(pred_index)?.first_clause;
        let Some(clause_index) = first else {
            // Empty clause chain: the call fails.
            return self.fail();
        };
        let clause = self.code.clause_at(clause_index)?;
        if let Some(next) = clause.next {
            self.push_choice_point(next)?;
        }
        self.jump(clause.addr)?;
        Ok(Flow::Continue)
    }

    fn op_unify(&mut self) -> MachineResult<Flow> {
        let frame = self
            .tf
            .ok_or(MachineError::Precondition("unify without a target frame"))?;
        let left = self.var_addr(frame, 0);
        let right = self.var_addr(frame, 1);
        match self.unifiable(left, right)? {
            Some(_) => {
                self.pop_target_frame()?;
                Ok(Flow::Continue)
            }
            None => self.fail(),
        }
    }

    fn op_var(&mut self) -> MachineResult<Flow> {
        let index = self.fetch_int_operand()?;
        let frame = self.sf.ok_or(MachineError::Precondition(
            "variable operand without a source frame",
        ))?;
        let var = self.var_addr(frame, index);
        self.store.touch(var)?;
        match self.mode {
            Mode::Arg => {
                let slot = self.cursor;
                self.store.touch(slot)?;
                self.store.write_word(slot, Word::reference(var))?;
                self.cursor += 1;
                Ok(Flow::Continue)
            }
            Mode::Copy => {
                let (at, word) = self.store.deref(var)?;
                let cell = self.cursor;
                if word.is_ref() {
                    // Unbound: the reserved cell becomes (or references) the
                    // variable, direction chosen by the binding rule.
                    self.bind(at, cell)?;
                } else {
                    self.store.write_word(cell, word)?;
                }
                self.cursor += 1;
                Ok(Flow::Continue)
            }
            Mode::Match => {
                let cell = self.cursor;
                self.cursor += 1;
                if self.unifiable(cell, var)?.is_some() {
                    Ok(Flow::Continue)
                } else {
                    self.fail()
                }
            }
        }
    }

    fn op_const(&mut self) -> MachineResult<Flow> {
        let index = self.fetch_pool_operand(Tag::Con)?;
        match self.mode {
            Mode::Arg => {
                let slot = self.cursor;
                self.store.touch(slot)?;
                self.store.write_word(slot, Word::constant(index))?;
                self.cursor += 1;
                Ok(Flow::Continue)
            }
            Mode::Copy => {
                self.store.write_word(self.cursor, Word::constant(index))?;
                self.cursor += 1;
                Ok(Flow::Continue)
            }
            Mode::Match => {
                let (at, word) = self.store.deref(self.cursor)?;
                self.cursor += 1;
                if word.is_ref() {
                    self.store.write_word(at, Word::constant(index))?;
                    self.trail(at)?;
                    Ok(Flow::Continue)
                } else if word.tag() == Tag::Con && word.payload() == index {
                    Ok(Flow::Continue)
                } else {
                    self.fail()
                }
            }
        }
    }

    fn op_functor(&mut self) -> MachineResult<Flow> {
        let index = self.fetch_pool_operand(Tag::Fun)?;
        let arity = self.code.functor_at(index)?.arity as usize;
        match self.mode {
            Mode::Arg | Mode::Copy => {
                let block = self.new_structure(index, arity)?;
                let slot = self.cursor;
                self.store.touch(slot)?;
                self.store.write_word(slot, Word::structure(block))?;
                self.store.pad_push(PadEntry::Resume {
                    at: slot + 1,
                    mode: self.mode,
                })?;
                self.cursor = block + 1;
                self.mode = Mode::Copy;
                Ok(Flow::Continue)
            }
            Mode::Match => {
                let (at, word) = self.store.deref(self.cursor)?;
                let resume = self.cursor + 1;
                match word.tag() {
                    Tag::Ref => {
                        // Unbound: build the structure and fill its
                        // arguments in write mode.
                        let block = self.new_structure(index, arity)?;
                        self.store.write_word(at, Word::structure(block))?;
                        self.trail(at)?;
                        self.store.pad_push(PadEntry::Resume {
                            at: resume,
                            mode: Mode::Match,
                        })?;
                        self.cursor = block + 1;
                        self.mode = Mode::Copy;
                        Ok(Flow::Continue)
                    }
                    Tag::Str => {
                        let functor = self.store.read_word(word.payload())?;
                        if functor.tag() == Tag::Fun && functor.payload() == index {
                            self.store.pad_push(PadEntry::Resume {
                                at: resume,
                                mode: Mode::Match,
                            })?;
                            self.cursor = word.payload() + 1;
                            Ok(Flow::Continue)
                        } else {
                            self.fail()
                        }
                    }
                    _ => self.fail(),
                }
            }
        }
    }

    fn op_pop(&mut self) -> MachineResult<Flow> {
        match self.store.pad_pop() {
            Some(PadEntry::Resume { at, mode }) => {
                self.cursor = at;
                self.mode = mode;
                Ok(Flow::Continue)
            }
            _ => Err(MachineError::Precondition("pop without a resume entry")),
        }
    }

    /// Push a functor cell plus `arity` unbound argument cells onto the
    /// global stack, returning the functor cell's address.
    fn new_structure(&mut self, index: usize, arity: usize) -> MachineResult<Addr> {
        let block = self.store.push_global(Word::functor(index))?;
        for _ in 0..arity {
            self.store.push_global_unbound()?;
        }
        Ok(block)
    }
}
