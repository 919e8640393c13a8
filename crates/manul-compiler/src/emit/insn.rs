//! The linear target instruction set.
//!
//! [`Insn`] is what the code generator produces: a flat instruction with
//! typed operands and, for jumps, an instruction-index target. Every
//! instruction maps to a stable opcode byte through [`Op`], which is what
//! an artifact writer serializes.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use ordered_float::OrderedFloat;

use manul_core::{ClassId, Type};

use crate::bytecode::CompareKind;
use crate::registry::SigId;

/// Opcode bytes, one per [`Insn`] shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Op {
    Iconst = 0x01,
    Fconst = 0x02,
    Ldc = 0x03,

    Iload = 0x10,
    Fload = 0x11,
    Aload = 0x12,
    Lload = 0x13,
    Istore = 0x14,
    Fstore = 0x15,
    Astore = 0x16,
    Lstore = 0x17,

    Dup = 0x20,
    Pop = 0x21,

    Iadd = 0x30,
    Isub = 0x31,
    Imul = 0x32,
    Idiv = 0x33,
    Fadd = 0x34,
    Fsub = 0x35,
    Fmul = 0x36,
    Fdiv = 0x37,
    Lsub = 0x38,

    New = 0x40,
    GetField = 0x41,
    PutField = 0x42,

    InvokeVirtual = 0x50,
    InvokeSpecial = 0x51,
    InvokeStatic = 0x52,

    CurrentTimeMillis = 0x60,
    PrintString = 0x61,
    PrintInt = 0x62,
    PrintLong = 0x63,

    Ireturn = 0x70,
    Freturn = 0x71,
    Areturn = 0x72,
    Return = 0x73,

    Goto = 0x80,
    IfIcmp = 0x81,
    IfFcmp = 0x82,
    IfAcmp = 0x83,
    If = 0x84,
}

/// One emitted instruction. Jump targets are instruction indices into the
/// enclosing method's stream, resolved before the stream is exposed.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    Iconst(i32),
    Fconst(OrderedFloat<f32>),
    /// Push a string constant.
    Ldc(String),

    Iload(u16),
    Fload(u16),
    Aload(u16),
    Lload(u16),
    Istore(u16),
    Fstore(u16),
    Astore(u16),
    Lstore(u16),

    Dup,
    Pop,

    Iadd,
    Isub,
    Imul,
    Idiv,
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    Lsub,

    New(ClassId),
    GetField {
        class: ClassId,
        name: String,
        ty: Type,
    },
    PutField {
        class: ClassId,
        name: String,
        ty: Type,
    },

    InvokeVirtual(SigId),
    InvokeSpecial(SigId),
    InvokeStatic(SigId),

    CurrentTimeMillis,
    PrintString,
    PrintInt,
    PrintLong,

    Ireturn,
    Freturn,
    Areturn,
    Return,

    Goto(usize),
    /// Compare the two topmost ints, jump to `target` on success.
    IfIcmp { kind: CompareKind, target: usize },
    /// Compare the two topmost floats, jump to `target` on success.
    IfFcmp { kind: CompareKind, target: usize },
    /// Reference identity test; only `Eq`/`Ne` occur.
    IfAcmp { kind: CompareKind, target: usize },
    /// Compare the topmost int against zero, jump to `target` on success.
    If { kind: CompareKind, target: usize },
}

impl Insn {
    /// The instruction's opcode byte tag.
    pub fn op(&self) -> Op {
        match self {
            Insn::Iconst(_) => Op::Iconst,
            Insn::Fconst(_) => Op::Fconst,
            Insn::Ldc(_) => Op::Ldc,
            Insn::Iload(_) => Op::Iload,
            Insn::Fload(_) => Op::Fload,
            Insn::Aload(_) => Op::Aload,
            Insn::Lload(_) => Op::Lload,
            Insn::Istore(_) => Op::Istore,
            Insn::Fstore(_) => Op::Fstore,
            Insn::Astore(_) => Op::Astore,
            Insn::Lstore(_) => Op::Lstore,
            Insn::Dup => Op::Dup,
            Insn::Pop => Op::Pop,
            Insn::Iadd => Op::Iadd,
            Insn::Isub => Op::Isub,
            Insn::Imul => Op::Imul,
            Insn::Idiv => Op::Idiv,
            Insn::Fadd => Op::Fadd,
            Insn::Fsub => Op::Fsub,
            Insn::Fmul => Op::Fmul,
            Insn::Fdiv => Op::Fdiv,
            Insn::Lsub => Op::Lsub,
            Insn::New(_) => Op::New,
            Insn::GetField { .. } => Op::GetField,
            Insn::PutField { .. } => Op::PutField,
            Insn::InvokeVirtual(_) => Op::InvokeVirtual,
            Insn::InvokeSpecial(_) => Op::InvokeSpecial,
            Insn::InvokeStatic(_) => Op::InvokeStatic,
            Insn::CurrentTimeMillis => Op::CurrentTimeMillis,
            Insn::PrintString => Op::PrintString,
            Insn::PrintInt => Op::PrintInt,
            Insn::PrintLong => Op::PrintLong,
            Insn::Ireturn => Op::Ireturn,
            Insn::Freturn => Op::Freturn,
            Insn::Areturn => Op::Areturn,
            Insn::Return => Op::Return,
            Insn::Goto(_) => Op::Goto,
            Insn::IfIcmp { .. } => Op::IfIcmp,
            Insn::IfFcmp { .. } => Op::IfFcmp,
            Insn::IfAcmp { .. } => Op::IfAcmp,
            Insn::If { .. } => Op::If,
        }
    }

    /// Whether execution never continues at the next instruction.
    pub fn ends_flow(&self) -> bool {
        matches!(
            self,
            Insn::Ireturn | Insn::Freturn | Insn::Areturn | Insn::Return | Insn::Goto(_)
        )
    }

    /// The jump target, for jump instructions.
    pub fn target(&self) -> Option<usize> {
        match self {
            Insn::Goto(target)
            | Insn::IfIcmp { target, .. }
            | Insn::IfFcmp { target, .. }
            | Insn::IfAcmp { target, .. }
            | Insn::If { target, .. } => Some(*target),
            _ => None,
        }
    }
}
