//! Bytecode instruction values.
//!
//! A [`Bytecode`] is an immutable instruction value. Sequential instructions
//! have exactly one successor, terminal instructions ([`Bytecode::Return`])
//! have none; the two-successor branching comparisons live in
//! [`branch::Branch`] and appear only as block exits, never in a block's
//! instruction list.
//!
//! Instructions compose into blocks by *prepending*: given its designated
//! successor block, an instruction yields a new block whose head is the
//! instruction and whose tail is the successor (see
//! [`crate::cfg::BlockArena::prepend`]). The operation is pure; it never
//! mutates the successor.

mod branch;

pub use branch::{Branch, CompareKind};

use manul_core::{ClassId, Type};
use ordered_float::OrderedFloat;

use crate::cfg::{BlockArena, BlockId};
use crate::registry::SigId;

/// An arithmetic operation over a numeric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// A single sequential or terminal instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Bytecode {
    /// Push an integer constant. Booleans are pushed as `0`/`1`.
    Const(i32),
    /// Push a float constant.
    FConst(OrderedFloat<f32>),
    /// Push a string literal.
    PushString(String),

    /// Load a local-variable slot.
    Load { slot: u16, ty: Type },
    /// Store into a local-variable slot.
    Store { slot: u16, ty: Type },
    /// Load a two-slot long local (harness timestamps).
    LLoad { slot: u16 },
    /// Store a two-slot long local (harness timestamps).
    LStore { slot: u16 },

    /// Duplicate the top stack value.
    Dup,
    /// Discard the top stack value.
    Pop,

    /// Arithmetic over the two topmost values of the given numeric type.
    Arith { op: ArithOp, ty: Type },
    /// Long subtraction, used for millisecond time deltas.
    LSub,

    /// Allocate an uninitialized instance.
    New(ClassId),
    /// Read a field from the object on top of the stack.
    GetField {
        class: ClassId,
        name: String,
        ty: Type,
    },
    /// Write the top value into a field of the object below it.
    PutField {
        class: ClassId,
        name: String,
        ty: Type,
    },

    /// Invoke with runtime subtype dispatch on the receiver.
    VirtualCall(SigId),
    /// Invoke with a statically fixed receiver type (constructors, and the
    /// harness's internal calls).
    SpecialCall(SigId),
    /// Invoke without a stacked receiver (the harness's fixture/test
    /// methods, which take the receiver as an explicit parameter).
    StaticCall(SigId),

    /// Push the current wall-clock time in milliseconds (a long).
    CurrentTimeMillis,
    /// Print the string on top of the stack to standard output.
    PrintString,
    /// Print the integer on top of the stack to standard output.
    PrintInt,
    /// Print the long on top of the stack to standard output.
    PrintLong,

    /// Return to the caller, with a value unless `ty` is void. Terminal.
    Return(Type),
}

impl Bytecode {
    /// Whether this instruction ends its block with no successor.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Bytecode::Return(_))
    }

    /// Yield the block that executes this instruction and proceeds to
    /// `successor`.
    ///
    /// Pure: allocates a new block, leaving `successor` untouched.
    pub fn followed_by(self, arena: &mut BlockArena, successor: BlockId) -> BlockId {
        arena.prepend(self, successor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_return_is_terminal() {
        assert!(Bytecode::Return(Type::Int).is_terminal());
        assert!(Bytecode::Return(Type::Void).is_terminal());
        assert!(!Bytecode::Const(0).is_terminal());
        assert!(!Bytecode::Pop.is_terminal());
    }

    #[test]
    fn followed_by_builds_a_fresh_block() {
        let mut arena = BlockArena::new();
        let tail = arena.terminal(Bytecode::Return(Type::Void));
        let head = Bytecode::Const(7).followed_by(&mut arena, tail);

        assert_ne!(head, tail);
        assert_eq!(arena.block(head).instrs(), &[Bytecode::Const(7)]);
        // The successor is untouched.
        assert_eq!(
            arena.block(tail).instrs(),
            &[Bytecode::Return(Type::Void)]
        );
    }
}
