//! Machine opcodes and processor modes
//!
//! An operator word in code memory carries one opcode byte. The three
//! processor modes refine what the term-building opcodes (`var`, `const`,
//! `functor`) do: `ARG` writes goal arguments into the target frame's
//! parameter slots, `COPY` builds structure cells on the global stack, and
//! `MATCH` unifies against an existing term. Dispatch is over the
//! (opcode, mode) pair.

use std::fmt;

/// Processor mode; selects the semantics of the term-building opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Setting up the arguments of a call: operands land in the target
    /// frame's parameter slots.
    Arg,
    /// Building a compound term on the global stack (write mode).
    Copy,
    /// Structurally unifying against an existing term (read mode).
    Match,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Arg => write!(f, "ARG"),
            Mode::Copy => write!(f, "COPY"),
            Mode::Match => write!(f, "MATCH"),
        }
    }
}

/// Bytecode opcode enumeration
///
/// Frame-control opcodes occupy 0x10-0x1F, term-building opcodes 0x20-0x2F.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// No operation
    Nop = 0x00,

    // === Frame control (0x10-0x1F) ===
    /// Promote the target frame to the running source frame;
    /// operands are the parameter count and the frame's variable count
    Enter = 0x10,
    /// Allocate a target frame for the next call
    Alloc = 0x11,
    /// Discard an unpromoted target frame
    Dealloc = 0x12,
    /// Return from the current source frame; on the query frame, halt
    /// with a solution
    Proceed = 0x13,
    /// Call a predicate, operand is its constant-pool index
    Call = 0x14,
    /// Force backtracking
    Fail = 0x15,
    /// Unify the target frame's two parameter slots, then discard it
    Unify = 0x16,

    // === Term building (0x20-0x2F), refined by the mode ===
    /// Variable argument, operand is a frame-relative variable index
    Var = 0x20,
    /// Atom argument, operand is a constant-pool index
    Const = 0x21,
    /// Compound argument, operand is a functor constant-pool index;
    /// descends into the arguments until the matching `Pop`
    Functor = 0x22,
    /// Ascend after a compound's arguments: restore cursor and mode
    /// from the scratchpad
    Pop = 0x23,
}

impl Opcode {
    /// Convert a byte to an opcode, returns None if invalid
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Nop),
            0x10 => Some(Self::Enter),
            0x11 => Some(Self::Alloc),
            0x12 => Some(Self::Dealloc),
            0x13 => Some(Self::Proceed),
            0x14 => Some(Self::Call),
            0x15 => Some(Self::Fail),
            0x16 => Some(Self::Unify),
            0x20 => Some(Self::Var),
            0x21 => Some(Self::Const),
            0x22 => Some(Self::Functor),
            0x23 => Some(Self::Pop),
            _ => None,
        }
    }

    /// Convert the opcode to its byte encoding
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Number of operand words following the operator word
    #[inline]
    pub fn operand_count(self) -> usize {
        match self {
            Self::Nop | Self::Alloc | Self::Dealloc | Self::Proceed | Self::Fail
            | Self::Unify | Self::Pop => 0,
            Self::Call | Self::Var | Self::Const | Self::Functor => 1,
            Self::Enter => 2,
        }
    }

    /// Mnemonic name for disassembly
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Enter => "enter",
            Self::Alloc => "alloc",
            Self::Dealloc => "dealloc",
            Self::Proceed => "proceed",
            Self::Call => "call",
            Self::Fail => "fail",
            Self::Unify => "unify",
            Self::Var => "var",
            Self::Const => "const",
            Self::Functor => "functor",
            Self::Pop => "pop",
        }
    }

    /// True for opcodes whose semantics depend on the processor mode
    #[inline]
    pub fn is_mode_sensitive(self) -> bool {
        matches!(self, Self::Var | Self::Const | Self::Functor)
    }

    /// True for opcodes that can transfer control away from the next word
    #[inline]
    pub fn is_control(self) -> bool {
        matches!(self, Self::Call | Self::Proceed | Self::Fail | Self::Unify)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Opcode; 12] = [
        Opcode::Nop,
        Opcode::Enter,
        Opcode::Alloc,
        Opcode::Dealloc,
        Opcode::Proceed,
        Opcode::Call,
        Opcode::Fail,
        Opcode::Unify,
        Opcode::Var,
        Opcode::Const,
        Opcode::Functor,
        Opcode::Pop,
    ];

    #[test]
    fn test_opcode_roundtrip() {
        for op in ALL {
            let byte = op.to_byte();
            let decoded = Opcode::from_byte(byte).expect("valid opcode byte");
            assert_eq!(op, decoded, "opcode {:?} roundtrip failed", op);
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert!(Opcode::from_byte(0x01).is_none());
        assert!(Opcode::from_byte(0x17).is_none());
        assert!(Opcode::from_byte(0x24).is_none());
        assert!(Opcode::from_byte(0xFF).is_none());
    }

    #[test]
    fn test_operand_counts() {
        assert_eq!(Opcode::Nop.operand_count(), 0);
        assert_eq!(Opcode::Enter.operand_count(), 2);
        assert_eq!(Opcode::Call.operand_count(), 1);
        assert_eq!(Opcode::Var.operand_count(), 1);
        assert_eq!(Opcode::Pop.operand_count(), 0);
    }

    #[test]
    fn test_categories() {
        assert!(Opcode::Var.is_mode_sensitive());
        assert!(Opcode::Functor.is_mode_sensitive());
        assert!(!Opcode::Call.is_mode_sensitive());

        assert!(Opcode::Call.is_control());
        assert!(Opcode::Proceed.is_control());
        assert!(!Opcode::Pop.is_control());
    }

    #[test]
    fn test_mnemonic() {
        assert_eq!(Opcode::Enter.mnemonic(), "enter");
        assert_eq!(Opcode::Functor.mnemonic(), "functor");
        assert_eq!(format!("{}", Opcode::Proceed), "proceed");
    }
}
