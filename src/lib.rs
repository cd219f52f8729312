//! zipr - ZIP abstract machine runtime for a Prolog dialect
//!
//! A stack-based Warren-style abstract machine together with the clause
//! compiler and interactive query REPL that feed it.
//!
//! # Architecture
//!
//! The pipeline has three stages:
//!
//! 1. **Reading** (`syntax` module)
//!    - Tokenizes and parses facts, rules and queries
//!    - Atoms, variables, compounds in functional notation, `:-`, `=`
//!    - `%` line comments
//!
//! 2. **Compilation** (`compiler` module)
//!    - Interns functors and predicates into the constant pool
//!    - Emits frame-control and term-building instructions per clause
//!    - Chains clause alternatives in source order
//!    - Queries append behind the program and roll back via a memento
//!
//! 3. **Execution** (`machine` module)
//!    - Tagged-word regions: global and local stacks, trail, scratchpad
//!    - Three processor modes refine the term-building opcodes
//!    - Occurs-check-free unification with a conditional trail
//!    - Frames double as choice points; backtracking truncates the stacks
//!      and replays the trail
//!
//! # Example
//!
//! ```
//! use zipr::machine::code::CodeStore;
//! use zipr::machine::{Machine, Outcome};
//! use zipr::{compile_query, consult};
//!
//! let mut code = CodeStore::new();
//! consult(&mut code, "parent(tom, bob). parent(tom, liz).").unwrap();
//! let query = compile_query(&mut code, "parent(tom, X)").unwrap();
//!
//! let mut machine = Machine::new(code);
//! machine.reset(query.addr).unwrap();
//! assert_eq!(machine.run().unwrap(), Outcome::Solution);
//! assert_eq!(machine.read_binding(0).unwrap().to_string(), "bob");
//! ```

pub mod compiler;
pub mod machine;
pub mod repl;
pub mod syntax;

pub use compiler::{compile_query, consult, CompileError, CompiledQuery};
pub use machine::{Machine, MachineConfig, MachineError, MachineResult, Outcome, Term};
