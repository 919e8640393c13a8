//! Expression translation: value positions and test positions.
//!
//! An expression translates in one of two modes. In *value* mode it leaves
//! its result on the stack and falls into a continuation. In *test* mode a
//! boolean expression receives two continuations and routes control to one
//! of them, leaving nothing on the stack. Short-circuit operators exist
//! only in test mode; a boolean used as a value is translated as a test
//! whose two targets push `1` or `0` and rejoin the shared continuation.

use ordered_float::OrderedFloat;

use manul_core::Type;

use crate::ast::{Expr, ExprKind};
use crate::bytecode::{Branch, Bytecode, CompareKind};
use crate::cfg::BlockId;
use crate::registry::SigId;

use super::TranslateCx;

impl Expr {
    /// Translate in value mode: the returned block evaluates the
    /// expression, leaves its value on the stack, and proceeds to
    /// `continuation`.
    pub fn translate_value(&self, cx: &mut TranslateCx<'_>, continuation: BlockId) -> BlockId {
        match &self.kind {
            ExprKind::IntLit(n) => cx.arena.prepend(Bytecode::Const(*n), continuation),
            ExprKind::FloatLit(f) => cx
                .arena
                .prepend(Bytecode::FConst(OrderedFloat(*f)), continuation),
            ExprKind::BoolLit(b) => cx.arena.prepend(Bytecode::Const(*b as i32), continuation),
            ExprKind::StringLit(s) => cx
                .arena
                .prepend(Bytecode::PushString(s.clone()), continuation),

            ExprKind::This => cx.arena.prepend(
                Bytecode::Load {
                    slot: 0,
                    ty: self.static_type(),
                },
                continuation,
            ),

            ExprKind::Var { slot, .. } => {
                let slot = slot.get().unwrap_or_else(|| {
                    panic!("internal error: variable at {} not resolved", self.span)
                });
                cx.arena.prepend(
                    Bytecode::Load {
                        slot,
                        ty: self.static_type(),
                    },
                    continuation,
                )
            }

            ExprKind::Field { receiver, name, resolved } => {
                let (class, ty) = resolved.get().unwrap_or_else(|| {
                    panic!("internal error: field at {} not resolved", self.span)
                });
                let get = cx.arena.prepend(
                    Bytecode::GetField {
                        class,
                        name: name.clone(),
                        ty,
                    },
                    continuation,
                );
                receiver.translate_value(cx, get)
            }

            ExprKind::Arith { op, lhs, rhs } => {
                let apply = cx.arena.prepend(
                    Bytecode::Arith {
                        op: *op,
                        ty: self.static_type(),
                    },
                    continuation,
                );
                let rhs_code = rhs.translate_value(cx, apply);
                lhs.translate_value(cx, rhs_code)
            }

            // Boolean operators in value position: translate as a test
            // whose targets push the two boolean constants and rejoin.
            ExprKind::Compare { .. } | ExprKind::Not(_) | ExprKind::And(..) | ExprKind::Or(..) => {
                let yes = cx.arena.prepend(Bytecode::Const(1), continuation);
                let no = cx.arena.prepend(Bytecode::Const(0), continuation);
                self.translate_as_test(cx, yes, no)
            }

            ExprKind::Call { receiver, args, resolved, .. } => {
                let sid = self.resolved_call(resolved);
                let call = cx.arena.prepend(Bytecode::VirtualCall(sid), continuation);
                let args_code = args
                    .iter()
                    .rev()
                    .fold(call, |next, arg| arg.translate_value(cx, next));
                receiver.translate_value(cx, args_code)
            }

            ExprKind::New { args, resolved, .. } => {
                let Type::Class(class) = self.static_type() else {
                    panic!("internal error: 'new' at {} has no class type", self.span)
                };
                let sid = self.resolved_call(resolved);
                // new C; dup; <args>; specialcall C.<init> consumes the
                // duplicate and leaves the initialized instance.
                let call = cx.arena.prepend(Bytecode::SpecialCall(sid), continuation);
                let args_code = args
                    .iter()
                    .rev()
                    .fold(call, |next, arg| arg.translate_value(cx, next));
                let dup = cx.arena.prepend(Bytecode::Dup, args_code);
                cx.arena.prepend(Bytecode::New(class), dup)
            }
        }
    }

    /// Translate in test mode: the returned block routes control to `yes`
    /// if this boolean expression holds and to `no` otherwise.
    pub fn translate_as_test(
        &self,
        cx: &mut TranslateCx<'_>,
        yes: BlockId,
        no: BlockId,
    ) -> BlockId {
        match &self.kind {
            // Constant conditions route directly; no code.
            ExprKind::BoolLit(true) => yes,
            ExprKind::BoolLit(false) => no,

            ExprKind::Compare { kind, lhs, rhs } => {
                let category = lhs
                    .static_type()
                    .comparable_category()
                    .or_else(|| rhs.static_type().comparable_category())
                    .unwrap_or_else(|| {
                        panic!(
                            "internal error: comparison at {} over non-comparable operands",
                            self.span
                        )
                    });
                let test = cx.arena.branch(
                    Branch::Cmp {
                        kind: *kind,
                        category,
                    },
                    yes,
                    no,
                );
                let rhs_code = rhs.translate_value(cx, test);
                lhs.translate_value(cx, rhs_code)
            }

            // Negation swaps the targets; the operand's code is unchanged.
            ExprKind::Not(inner) => inner.translate_as_test(cx, no, yes),

            ExprKind::And(lhs, rhs) => {
                let rhs_test = rhs.translate_as_test(cx, yes, no);
                lhs.translate_as_test(cx, rhs_test, no)
            }

            ExprKind::Or(lhs, rhs) => {
                let rhs_test = rhs.translate_as_test(cx, yes, no);
                lhs.translate_as_test(cx, yes, rhs_test)
            }

            // Any other boolean-valued expression: evaluate it and branch
            // on the pushed value.
            _ => {
                let test = cx.arena.branch(
                    Branch::If {
                        kind: CompareKind::Ne,
                    },
                    yes,
                    no,
                );
                self.translate_value(cx, test)
            }
        }
    }

    fn resolved_call(&self, resolved: &std::cell::Cell<Option<SigId>>) -> SigId {
        resolved.get().unwrap_or_else(|| {
            panic!("internal error: call at {} not resolved", self.span)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{BlockArena, Exit};
    use crate::registry::SignatureTable;
    use manul_core::{ClassTable, CompareCategory, Span};
    use std::cell::Cell;

    fn expr(kind: ExprKind) -> Expr {
        Expr::new(Span::new(1, 1, 1), kind)
    }

    fn typed(kind: ExprKind, ty: Type) -> Expr {
        let e = expr(kind);
        e.set_type(ty);
        e
    }

    fn int_lit(n: i32) -> Expr {
        typed(ExprKind::IntLit(n), Type::Int)
    }

    /// Collect the instructions along an all-fallthrough chain.
    fn chain(arena: &BlockArena, mut at: BlockId) -> Vec<Bytecode> {
        let mut seen = Vec::new();
        loop {
            let block = arena.block(at);
            seen.extend(block.instrs().iter().cloned());
            match block.exit() {
                Exit::Fall(next) => at = *next,
                _ => return seen,
            }
        }
    }

    fn harness() -> (BlockArena, SignatureTable, ClassTable) {
        (BlockArena::new(), SignatureTable::new(), ClassTable::new())
    }

    #[test]
    fn arithmetic_evaluates_left_to_right() {
        let (mut arena, sigs, classes) = harness();
        let ret = arena.terminal(Bytecode::Return(Type::Int));
        let sum = typed(
            ExprKind::Arith {
                op: crate::bytecode::ArithOp::Add,
                lhs: Box::new(int_lit(2)),
                rhs: Box::new(int_lit(3)),
            },
            Type::Int,
        );
        let mut cx = TranslateCx {
            arena: &mut arena,
            sigs: &sigs,
            classes: &classes,
        };
        let entry = sum.translate_value(&mut cx, ret);
        assert_eq!(
            chain(&arena, entry),
            vec![
                Bytecode::Const(2),
                Bytecode::Const(3),
                Bytecode::Arith {
                    op: crate::bytecode::ArithOp::Add,
                    ty: Type::Int,
                },
                Bytecode::Return(Type::Int),
            ]
        );
    }

    #[test]
    fn comparison_as_value_pushes_constants_on_shared_join() {
        let (mut arena, sigs, classes) = harness();
        let ret = arena.terminal(Bytecode::Return(Type::Int));
        let join = arena.passthrough(ret);
        let cmp = typed(
            ExprKind::Compare {
                kind: CompareKind::Lt,
                lhs: Box::new(int_lit(1)),
                rhs: Box::new(int_lit(2)),
            },
            Type::Boolean,
        );
        let mut cx = TranslateCx {
            arena: &mut arena,
            sigs: &sigs,
            classes: &classes,
        };
        let entry = cmp.translate_value(&mut cx, join);

        // Walk to the branch.
        let mut at = entry;
        let (yes, no) = loop {
            match arena.block(at).exit() {
                Exit::Fall(next) => at = *next,
                Exit::Branch { test, yes, no } => {
                    assert_eq!(
                        *test,
                        Branch::Cmp {
                            kind: CompareKind::Lt,
                            category: CompareCategory::Int,
                        }
                    );
                    break (*yes, *no);
                }
                Exit::End => panic!("expected a branch"),
            }
        };
        assert_eq!(arena.block(yes).instrs(), &[Bytecode::Const(1)]);
        assert_eq!(arena.block(no).instrs(), &[Bytecode::Const(0)]);
        // Both constant blocks fall into the same join block.
        assert_eq!(arena.block(yes).exit(), &Exit::Fall(join));
        assert_eq!(arena.block(no).exit(), &Exit::Fall(join));
    }

    #[test]
    fn negation_swaps_branch_targets() {
        let (mut arena, sigs, classes) = harness();
        let yes = arena.terminal(Bytecode::Return(Type::Void));
        let no = arena.terminal(Bytecode::Return(Type::Void));

        let plain = typed(
            ExprKind::Compare {
                kind: CompareKind::Eq,
                lhs: Box::new(int_lit(1)),
                rhs: Box::new(int_lit(2)),
            },
            Type::Boolean,
        );
        let negated = typed(
            ExprKind::Not(Box::new(typed(
                ExprKind::Compare {
                    kind: CompareKind::Eq,
                    lhs: Box::new(int_lit(1)),
                    rhs: Box::new(int_lit(2)),
                },
                Type::Boolean,
            ))),
            Type::Boolean,
        );

        let mut cx = TranslateCx {
            arena: &mut arena,
            sigs: &sigs,
            classes: &classes,
        };
        let plain_entry = plain.translate_as_test(&mut cx, yes, no);
        let negated_entry = negated.translate_as_test(&mut cx, yes, no);

        let targets = |arena: &BlockArena, mut at: BlockId| loop {
            match arena.block(at).exit() {
                Exit::Fall(next) => at = *next,
                Exit::Branch { yes, no, .. } => return (*yes, *no),
                Exit::End => panic!("expected a branch"),
            }
        };
        let (py, pn) = targets(&arena, plain_entry);
        let (ny, nn) = targets(&arena, negated_entry);
        assert_eq!((py, pn), (nn, ny));
    }

    #[test]
    fn and_short_circuits_to_the_no_target() {
        let (mut arena, sigs, classes) = harness();
        let yes = arena.terminal(Bytecode::Return(Type::Void));
        let no = arena.terminal(Bytecode::Return(Type::Void));

        let both = typed(
            ExprKind::And(
                Box::new(typed(
                    ExprKind::Compare {
                        kind: CompareKind::Lt,
                        lhs: Box::new(int_lit(1)),
                        rhs: Box::new(int_lit(2)),
                    },
                    Type::Boolean,
                )),
                Box::new(typed(
                    ExprKind::Compare {
                        kind: CompareKind::Gt,
                        lhs: Box::new(int_lit(3)),
                        rhs: Box::new(int_lit(4)),
                    },
                    Type::Boolean,
                )),
            ),
            Type::Boolean,
        );
        let mut cx = TranslateCx {
            arena: &mut arena,
            sigs: &sigs,
            classes: &classes,
        };
        let entry = both.translate_as_test(&mut cx, yes, no);

        // First branch: yes edge leads to the second test, no edge goes
        // straight to the shared no target.
        let mut at = entry;
        let (first_yes, first_no) = loop {
            match arena.block(at).exit() {
                Exit::Fall(next) => at = *next,
                Exit::Branch { yes, no, .. } => break (*yes, *no),
                Exit::End => panic!("expected a branch"),
            }
        };
        assert_eq!(first_no, no);

        let mut at = first_yes;
        let (second_yes, second_no) = loop {
            match arena.block(at).exit() {
                Exit::Fall(next) => at = *next,
                Exit::Branch { yes, no, .. } => break (*yes, *no),
                Exit::End => panic!("expected a second branch"),
            }
        };
        assert_eq!((second_yes, second_no), (yes, no));
    }

    #[test]
    fn constant_conditions_emit_no_code() {
        let (mut arena, sigs, classes) = harness();
        let yes = arena.terminal(Bytecode::Return(Type::Void));
        let no = arena.terminal(Bytecode::Return(Type::Void));
        let before = arena.len();

        let t = typed(ExprKind::BoolLit(true), Type::Boolean);
        let f = typed(ExprKind::BoolLit(false), Type::Boolean);
        let mut cx = TranslateCx {
            arena: &mut arena,
            sigs: &sigs,
            classes: &classes,
        };
        assert_eq!(t.translate_as_test(&mut cx, yes, no), yes);
        assert_eq!(f.translate_as_test(&mut cx, yes, no), no);
        assert_eq!(arena.len(), before);
    }

    #[test]
    fn object_creation_dups_before_the_constructor_call() {
        use crate::registry::{SigKind, Signature, CTOR_NAME};

        let (mut arena, mut sigs, mut classes) = harness();
        let class = classes.add_class("Box", Some(classes.object()));
        let ctor = sigs.add(Signature::new(
            class,
            SigKind::Constructor,
            CTOR_NAME,
            vec![("n".to_string(), Type::Int)],
            Type::Void,
            Span::default(),
            None,
        ));

        let make = typed(
            ExprKind::New {
                class: "Box".to_string(),
                args: vec![int_lit(5)],
                resolved: Cell::new(Some(ctor)),
            },
            Type::Class(class),
        );
        let ret = arena.terminal(Bytecode::Return(Type::Void));
        let pop = arena.prepend(Bytecode::Pop, ret);
        let mut cx = TranslateCx {
            arena: &mut arena,
            sigs: &sigs,
            classes: &classes,
        };
        let entry = make.translate_value(&mut cx, pop);
        assert_eq!(
            chain(&arena, entry),
            vec![
                Bytecode::New(class),
                Bytecode::Dup,
                Bytecode::Const(5),
                Bytecode::SpecialCall(ctor),
                Bytecode::Pop,
                Bytecode::Return(Type::Void),
            ]
        );
    }
}
