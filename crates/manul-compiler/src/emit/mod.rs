//! Linearizing block graphs into instruction streams.
//!
//! The generator walks a unit's graph depth-first. The first visit of a
//! block pins it to the current instruction offset and emits its code;
//! any later visit emits a `Goto` to that offset instead, so shared
//! blocks appear exactly once and cycles terminate. After a branching
//! exit the generator prefers falling through to the not-taken side; when
//! only the taken side is still unemitted the comparison is negated so
//! that side can fall through instead. Forward jump targets are
//! backpatched once every reachable block has an offset.

mod insn;

pub use insn::{Insn, Op};

use rustc_hash::FxHashMap;

use manul_core::{CompareCategory, CompileError, Type};

use crate::bytecode::{ArithOp, Branch, Bytecode, CompareKind};
use crate::cfg::{BlockId, Exit};
use crate::registry::{Cfg, SignatureTable};

type Result<T> = std::result::Result<T, CompileError>;

/// The linearized code of one method, with its frame requirements.
#[derive(Debug)]
pub struct MethodCode {
    pub insns: Vec<Insn>,
    pub max_stack: u16,
    pub max_locals: u16,
}

/// Linearizes unit graphs against the signature table (invoke stack
/// effects depend on the callee's signature).
pub struct CodeGenerator<'a> {
    sigs: &'a SignatureTable,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(sigs: &'a SignatureTable) -> Self {
        Self { sigs }
    }

    /// Produce the instruction stream for one unit graph.
    ///
    /// `reserved_slots` is the frame space the unit's parameters occupy;
    /// `max_locals` never reports less.
    pub fn linearize(&self, cfg: &Cfg, reserved_slots: u16) -> Result<MethodCode> {
        let mut emit = Emitter {
            arena: &cfg.arena,
            insns: Vec::new(),
            offsets: FxHashMap::default(),
            patches: Vec::new(),
            pending: Vec::new(),
        };
        emit.chain(cfg.entry)?;
        while let Some(block) = emit.pending.pop() {
            if !emit.offsets.contains_key(&block) {
                emit.chain(block)?;
            }
        }
        let insns = emit.resolve()?;

        let max_stack = self.max_stack(&insns)?;
        let max_locals = Self::max_locals(&insns).max(reserved_slots);
        Ok(MethodCode {
            insns,
            max_stack,
            max_locals,
        })
    }

    /// Deepest operand stack, by propagating depths along the stream and
    /// re-seeding at jump targets. Long values occupy two stack slots.
    fn max_stack(&self, insns: &[Insn]) -> Result<u16> {
        let mut depth: Vec<Option<i32>> = vec![None; insns.len()];
        let mut work = vec![(0usize, 0i32)];
        let mut deepest = 0i32;

        while let Some((at, entry_depth)) = work.pop() {
            let insn = match insns.get(at) {
                Some(insn) => insn,
                None => continue,
            };
            match depth[at] {
                Some(known) if known == entry_depth => continue,
                Some(known) => {
                    return Err(CompileError::Internal {
                        message: format!(
                            "inconsistent stack depth at instruction {at}: {known} vs {entry_depth}"
                        ),
                    });
                }
                None => depth[at] = Some(entry_depth),
            }

            let (pops, pushes) = self.stack_effect(insn);
            let after = entry_depth - pops + pushes;
            if entry_depth < pops || after < 0 {
                return Err(CompileError::Internal {
                    message: format!("operand stack underflow at instruction {at}"),
                });
            }
            deepest = deepest.max(entry_depth).max(after);

            if let Some(target) = insn.target() {
                work.push((target, after));
            }
            if !insn.ends_flow() {
                work.push((at + 1, after));
            }
        }
        Ok(deepest as u16)
    }

    /// Stack effect as (pops, pushes), in stack slots.
    fn stack_effect(&self, insn: &Insn) -> (i32, i32) {
        match insn {
            Insn::Iconst(_) | Insn::Fconst(_) | Insn::Ldc(_) => (0, 1),
            Insn::Iload(_) | Insn::Fload(_) | Insn::Aload(_) => (0, 1),
            Insn::Lload(_) => (0, 2),
            Insn::Istore(_) | Insn::Fstore(_) | Insn::Astore(_) => (1, 0),
            Insn::Lstore(_) => (2, 0),
            Insn::Dup => (1, 2),
            Insn::Pop => (1, 0),
            Insn::Iadd
            | Insn::Isub
            | Insn::Imul
            | Insn::Idiv
            | Insn::Fadd
            | Insn::Fsub
            | Insn::Fmul
            | Insn::Fdiv => (2, 1),
            Insn::Lsub => (4, 2),
            Insn::New(_) => (0, 1),
            Insn::GetField { .. } => (1, 1),
            Insn::PutField { .. } => (2, 0),
            // Every unit receives the instance: virtual and special calls
            // dispatch on it, static calls take it as the leading explicit
            // argument. All three pop it along with the declared parameters.
            Insn::InvokeVirtual(sid) | Insn::InvokeSpecial(sid) | Insn::InvokeStatic(sid) => {
                let sig = self.sigs.get(*sid);
                (1 + sig.params.len() as i32, ret_width(sig.ret))
            }
            Insn::CurrentTimeMillis => (0, 2),
            Insn::PrintString | Insn::PrintInt => (1, 0),
            Insn::PrintLong => (2, 0),
            Insn::Ireturn | Insn::Freturn | Insn::Areturn => (1, 0),
            Insn::Return => (0, 0),
            Insn::Goto(_) => (0, 0),
            Insn::IfIcmp { .. } | Insn::IfFcmp { .. } | Insn::IfAcmp { .. } => (2, 0),
            Insn::If { .. } => (1, 0),
        }
    }

    /// One past the highest frame slot any instruction touches.
    fn max_locals(insns: &[Insn]) -> u16 {
        insns
            .iter()
            .map(|insn| match insn {
                Insn::Iload(slot)
                | Insn::Fload(slot)
                | Insn::Aload(slot)
                | Insn::Istore(slot)
                | Insn::Fstore(slot)
                | Insn::Astore(slot) => slot + 1,
                // Longs occupy the slot pair (slot, slot + 1).
                Insn::Lload(slot) | Insn::Lstore(slot) => slot + 2,
                _ => 0,
            })
            .max()
            .unwrap_or(0)
    }
}

fn ret_width(ty: Type) -> i32 {
    if ty.is_void() { 0 } else { 1 }
}

/// In-progress linearization of one graph.
struct Emitter<'a> {
    arena: &'a crate::cfg::BlockArena,
    insns: Vec<Insn>,
    /// First-visit instruction offset of each emitted block.
    offsets: FxHashMap<BlockId, usize>,
    /// Jump instructions whose target block had no offset yet.
    patches: Vec<(usize, BlockId)>,
    /// Branch targets deferred in favor of a fallthrough.
    pending: Vec<BlockId>,
}

impl Emitter<'_> {
    /// Emit the chain starting at `block`, following fallthroughs until a
    /// terminal block or an already-emitted block ends it.
    fn chain(&mut self, block: BlockId) -> Result<()> {
        let mut at = block;
        loop {
            if let Some(&offset) = self.offsets.get(&at) {
                self.insns.push(Insn::Goto(offset));
                return Ok(());
            }
            self.offsets.insert(at, self.insns.len());

            let current = self.arena.block(at);
            for instr in current.instrs() {
                self.insns.push(lower(instr));
            }
            let terminated = matches!(current.instrs().last(), Some(last) if last.is_terminal());
            let exit = current.exit().clone();

            match exit {
                Exit::End => {
                    if terminated {
                        return Ok(());
                    }
                    return Err(CompileError::Internal {
                        message: "block ends without a terminator".to_string(),
                    });
                }
                Exit::Fall(next) => at = next,
                Exit::Branch { test, yes, no } => {
                    if !self.offsets.contains_key(&no) {
                        // Not-taken side falls through; taken side jumps.
                        self.jump(test, yes);
                        self.pending.push(yes);
                        at = no;
                    } else if !self.offsets.contains_key(&yes) {
                        // Only the taken side can still fall through, so
                        // invert the comparison and swap the roles.
                        self.jump(test.negate(), no);
                        at = yes;
                    } else {
                        self.jump(test, yes);
                        let no_offset = self.offsets[&no];
                        self.insns.push(Insn::Goto(no_offset));
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Emit a branching comparison whose target is patched later.
    fn jump(&mut self, test: Branch, target: BlockId) {
        let index = self.insns.len();
        self.patches.push((index, target));
        self.insns.push(lower_branch(test, 0));
    }

    /// Fill in patched jump targets and return the finished stream.
    fn resolve(mut self) -> Result<Vec<Insn>> {
        for (index, block) in self.patches {
            let offset = self.offsets.get(&block).copied().ok_or_else(|| {
                CompileError::Internal {
                    message: "jump to a block that was never emitted".to_string(),
                }
            })?;
            match &mut self.insns[index] {
                Insn::IfIcmp { target, .. }
                | Insn::IfFcmp { target, .. }
                | Insn::IfAcmp { target, .. }
                | Insn::If { target, .. }
                | Insn::Goto(target) => *target = offset,
                other => {
                    return Err(CompileError::Internal {
                        message: format!("patched instruction {other:?} is not a jump"),
                    });
                }
            }
        }
        Ok(self.insns)
    }
}

/// Lower one sequential or terminal instruction.
fn lower(instr: &Bytecode) -> Insn {
    match instr {
        Bytecode::Const(n) => Insn::Iconst(*n),
        Bytecode::FConst(f) => Insn::Fconst(*f),
        Bytecode::PushString(s) => Insn::Ldc(s.clone()),
        Bytecode::Load { slot, ty } => match ty {
            Type::Int | Type::Boolean => Insn::Iload(*slot),
            Type::Float => Insn::Fload(*slot),
            Type::String | Type::Class(_) => Insn::Aload(*slot),
            Type::Void => panic!("internal error: load of a void local"),
        },
        Bytecode::Store { slot, ty } => match ty {
            Type::Int | Type::Boolean => Insn::Istore(*slot),
            Type::Float => Insn::Fstore(*slot),
            Type::String | Type::Class(_) => Insn::Astore(*slot),
            Type::Void => panic!("internal error: store of a void local"),
        },
        Bytecode::LLoad { slot } => Insn::Lload(*slot),
        Bytecode::LStore { slot } => Insn::Lstore(*slot),
        Bytecode::Dup => Insn::Dup,
        Bytecode::Pop => Insn::Pop,
        Bytecode::Arith { op, ty } => match (op, ty) {
            (ArithOp::Add, Type::Int) => Insn::Iadd,
            (ArithOp::Sub, Type::Int) => Insn::Isub,
            (ArithOp::Mul, Type::Int) => Insn::Imul,
            (ArithOp::Div, Type::Int) => Insn::Idiv,
            (ArithOp::Add, Type::Float) => Insn::Fadd,
            (ArithOp::Sub, Type::Float) => Insn::Fsub,
            (ArithOp::Mul, Type::Float) => Insn::Fmul,
            (ArithOp::Div, Type::Float) => Insn::Fdiv,
            (_, other) => panic!("internal error: arithmetic over {other:?}"),
        },
        Bytecode::LSub => Insn::Lsub,
        Bytecode::New(class) => Insn::New(*class),
        Bytecode::GetField { class, name, ty } => Insn::GetField {
            class: *class,
            name: name.clone(),
            ty: *ty,
        },
        Bytecode::PutField { class, name, ty } => Insn::PutField {
            class: *class,
            name: name.clone(),
            ty: *ty,
        },
        Bytecode::VirtualCall(sid) => Insn::InvokeVirtual(*sid),
        Bytecode::SpecialCall(sid) => Insn::InvokeSpecial(*sid),
        Bytecode::StaticCall(sid) => Insn::InvokeStatic(*sid),
        Bytecode::CurrentTimeMillis => Insn::CurrentTimeMillis,
        Bytecode::PrintString => Insn::PrintString,
        Bytecode::PrintInt => Insn::PrintInt,
        Bytecode::PrintLong => Insn::PrintLong,
        Bytecode::Return(ty) => match ty {
            Type::Void => Insn::Return,
            Type::Int | Type::Boolean => Insn::Ireturn,
            Type::Float => Insn::Freturn,
            Type::String | Type::Class(_) => Insn::Areturn,
        },
    }
}

/// Lower a branching comparison with a provisional target.
fn lower_branch(test: Branch, target: usize) -> Insn {
    match test {
        Branch::Cmp { kind, category } => match category {
            CompareCategory::Int => Insn::IfIcmp { kind, target },
            CompareCategory::Float => Insn::IfFcmp { kind, target },
            CompareCategory::Reference => {
                assert!(
                    !kind.is_ordering(),
                    "internal error: ordering comparison over references"
                );
                Insn::IfAcmp { kind, target }
            }
        },
        Branch::If { kind } => Insn::If { kind, target },
    }
}
