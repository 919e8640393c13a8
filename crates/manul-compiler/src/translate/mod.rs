//! Back-to-front translation of command trees into block graphs.
//!
//! Every command translates against an explicit *continuation*: the block
//! that runs after the command completes normally. Translation starts from
//! the unit's implicit tail and walks the body backwards, so each command
//! prepends its code to an already-built continuation and returns the new
//! entry block. Building backwards is what lets join points share blocks
//! by identity: both arms of an `if` receive the same continuation id, and
//! the code after the `if` exists exactly once in the graph.
//!
//! Expression translation lives in [`expr`]; commands delegate to it for
//! value positions and test positions.

mod expr;

use manul_core::{ClassTable, Diagnostic};

use crate::ast::{Command, CommandKind, ExprKind};
use crate::bytecode::Bytecode;
use crate::cfg::{BlockArena, BlockId, Exit};
use crate::registry::{SignatureTable, TEST_FAILED};

/// Translation state for one unit body.
pub struct TranslateCx<'a> {
    pub arena: &'a mut BlockArena,
    pub sigs: &'a SignatureTable,
    pub classes: &'a ClassTable,
}

impl Command {
    /// Translate this command, returning the block that executes it and
    /// then proceeds to `continuation`.
    pub fn translate(&self, cx: &mut TranslateCx<'_>, continuation: BlockId) -> BlockId {
        match &self.kind {
            // Fold right-to-left: the last command translates against the
            // outer continuation, each earlier one against its successor.
            CommandKind::Block(cmds) => cmds
                .iter()
                .rev()
                .fold(continuation, |next, c| c.translate(cx, next)),

            CommandKind::Decl { init, slot, resolved, .. } => {
                let slot = slot.get().unwrap_or_else(|| {
                    panic!("internal error: declaration at {} has no slot", self.span)
                });
                let ty = resolved.get().unwrap_or_else(|| {
                    panic!("internal error: declaration at {} not resolved", self.span)
                });
                let store = cx.arena.prepend(Bytecode::Store { slot, ty }, continuation);
                init.translate_value(cx, store)
            }

            CommandKind::Assign { target, value } => match &target.kind {
                ExprKind::Var { slot, .. } => {
                    let slot = slot.get().unwrap_or_else(|| {
                        panic!("internal error: variable at {} not resolved", target.span)
                    });
                    let store = cx.arena.prepend(
                        Bytecode::Store {
                            slot,
                            ty: target.static_type(),
                        },
                        continuation,
                    );
                    value.translate_value(cx, store)
                }
                ExprKind::Field { receiver, name, resolved } => {
                    let (class, ty) = resolved.get().unwrap_or_else(|| {
                        panic!("internal error: field at {} not resolved", target.span)
                    });
                    let put = cx.arena.prepend(
                        Bytecode::PutField {
                            class,
                            name: name.clone(),
                            ty,
                        },
                        continuation,
                    );
                    let value_code = value.translate_value(cx, put);
                    receiver.translate_value(cx, value_code)
                }
                _ => panic!(
                    "internal error: assignment at {} to a non-lvalue",
                    target.span
                ),
            },

            CommandKind::Expr(expr) => {
                // Discard a produced value; void calls leave nothing.
                let next = if expr.static_type().is_void() {
                    continuation
                } else {
                    cx.arena.prepend(Bytecode::Pop, continuation)
                };
                expr.translate_value(cx, next)
            }

            CommandKind::If { cond, then_body, else_body } => {
                let then_block = then_body.translate(cx, continuation);
                let else_block = match else_body {
                    Some(body) => body.translate(cx, continuation),
                    None => continuation,
                };
                cond.translate_as_test(cx, then_block, else_block)
            }

            CommandKind::While { cond, body } => {
                // The guard is both the loop entry and the back-edge
                // target, so its block must exist before the body that
                // jumps to it. A placeholder closes the cycle: the body
                // falls into it, and it is patched to fall into the guard
                // once the guard exists.
                let pivot = cx.arena.placeholder();
                let body_block = body.translate(cx, pivot);
                let test = cond.translate_as_test(cx, body_block, continuation);
                cx.arena.set_exit(pivot, Exit::Fall(test));
                test
            }

            CommandKind::Return(value) => match value {
                Some(expr) => {
                    let ret = cx.arena.terminal(Bytecode::Return(expr.static_type()));
                    expr.translate_value(cx, ret)
                }
                None => cx.arena.terminal(Bytecode::Return(manul_core::Type::Void)),
            },

            CommandKind::Assert(cond) => {
                let failure = self.assert_failure(cx);
                cond.translate_as_test(cx, continuation, failure)
            }
        }
    }

    /// The block a failing `assert` jumps to: print the failure position,
    /// then leave the test with the failed value.
    fn assert_failure(&self, cx: &mut TranslateCx<'_>) -> BlockId {
        let message = format!("{}\n", Diagnostic::new(self.span, "> assert failed").render());
        let ret = cx.arena.terminal(Bytecode::Return(manul_core::Type::Int));
        let fail = cx.arena.prepend(Bytecode::Const(TEST_FAILED), ret);
        let print = cx
            .arena
            .prepend(Bytecode::VirtualCall(cx.sigs.string_output()), fail);
        cx.arena.prepend(Bytecode::PushString(message), print)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ClassDecl, Expr, MemberDecl, Program};
    use crate::bytecode::{Branch, CompareKind};
    use crate::check::check_signature;
    use crate::registry::{register, Registry, SigId, TEST_PASSED};
    use manul_core::{Span, Type};
    use std::cell::Cell;

    fn span(line: u32) -> Span {
        Span::new(line, 1, 1)
    }

    fn expr(line: u32, kind: ExprKind) -> Expr {
        Expr::new(span(line), kind)
    }

    fn cmd(line: u32, kind: CommandKind) -> Command {
        Command::new(span(line), kind)
    }

    fn var(line: u32, name: &str) -> Expr {
        expr(
            line,
            ExprKind::Var {
                name: name.to_string(),
                slot: Cell::new(None),
            },
        )
    }

    /// Register a single test named `probe` with the given body, check it,
    /// and return the registry and its id.
    fn checked_test(body: Command) -> (Registry, SigId) {
        let (registry, diagnostics) = register(Program {
            classes: vec![ClassDecl {
                span: Span::default(),
                name: "Probe".to_string(),
                superclass: None,
                members: vec![MemberDecl::Test {
                    span: span(1),
                    name: "probe".to_string(),
                    body,
                }],
            }],
        });
        assert!(diagnostics.is_empty());
        let class = registry.classes.lookup("Probe").unwrap();
        let id = registry.sigs.tests_of(class)[0];
        let diags = check_signature(&registry.sigs, &registry.classes, id);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        (registry, id)
    }

    #[test]
    fn empty_test_falls_into_implicit_pass() {
        let (registry, id) = checked_test(cmd(2, CommandKind::Block(vec![])));
        let cfg = registry.sigs.resolve_cfg(id, &registry.classes).unwrap();

        // Entry is the passthrough into `const 1; return int`.
        let mut at = cfg.entry;
        let mut seen = Vec::new();
        loop {
            let block = cfg.arena.block(at);
            seen.extend(block.instrs().iter().cloned());
            match block.exit() {
                Exit::Fall(next) => at = *next,
                Exit::End => break,
                Exit::Branch { .. } => panic!("no branch expected"),
            }
        }
        assert_eq!(
            seen,
            vec![Bytecode::Const(TEST_PASSED), Bytecode::Return(Type::Int)]
        );
    }

    #[test]
    fn if_arms_share_the_continuation_block() {
        // if (1 < 2) {} else {}  followed by the implicit tail.
        let body = cmd(
            2,
            CommandKind::Block(vec![cmd(
                2,
                CommandKind::If {
                    cond: expr(
                        2,
                        ExprKind::Compare {
                            kind: CompareKind::Lt,
                            lhs: Box::new(expr(2, ExprKind::IntLit(1))),
                            rhs: Box::new(expr(2, ExprKind::IntLit(2))),
                        },
                    ),
                    then_body: Box::new(cmd(3, CommandKind::Block(vec![]))),
                    else_body: Some(Box::new(cmd(4, CommandKind::Block(vec![])))),
                },
            )]),
        );
        let (registry, id) = checked_test(body);
        let cfg = registry.sigs.resolve_cfg(id, &registry.classes).unwrap();

        // Walk to the branch block.
        let mut at = cfg.entry;
        let (yes, no) = loop {
            match cfg.arena.block(at).exit() {
                Exit::Fall(next) => at = *next,
                Exit::Branch { test, yes, no } => {
                    assert_eq!(
                        *test,
                        Branch::Cmp {
                            kind: CompareKind::Lt,
                            category: manul_core::CompareCategory::Int,
                        }
                    );
                    break (*yes, *no);
                }
                Exit::End => panic!("expected a branch before the tail"),
            }
        };
        // Both empty arms are the same block: the shared continuation.
        assert_eq!(yes, no);
    }

    #[test]
    fn while_loop_closes_its_cycle() {
        // while (true) {}  -- the body must branch back to the guard.
        let body = cmd(
            2,
            CommandKind::Block(vec![
                cmd(
                    2,
                    CommandKind::Decl {
                        name: "going".to_string(),
                        ty: crate::ast::TypeExpr::named("boolean"),
                        init: expr(2, ExprKind::BoolLit(true)),
                        slot: Cell::new(None),
                        resolved: Cell::new(None),
                    },
                ),
                cmd(
                    3,
                    CommandKind::While {
                        cond: var(3, "going"),
                        body: Box::new(cmd(
                            4,
                            CommandKind::Assign {
                                target: var(4, "going"),
                                value: expr(4, ExprKind::BoolLit(false)),
                            },
                        )),
                    },
                ),
            ]),
        );
        let (registry, id) = checked_test(body);
        let cfg = registry.sigs.resolve_cfg(id, &registry.classes).unwrap();

        // Find the guard: the block branching on the loaded variable.
        let guard = cfg
            .arena
            .ids()
            .find(|&b| matches!(cfg.arena.block(b).exit(), Exit::Branch { .. }))
            .expect("loop guard exists");
        let Exit::Branch { yes, .. } = cfg.arena.block(guard).exit() else {
            unreachable!();
        };

        // Following the yes edge through the body returns to the guard.
        let mut at = *yes;
        let mut steps = 0;
        while at != guard {
            match cfg.arena.block(at).exit() {
                Exit::Fall(next) => at = *next,
                other => panic!("unexpected exit in loop body: {other:?}"),
            }
            steps += 1;
            assert!(steps < 16, "loop body never returned to the guard");
        }
    }

    #[test]
    fn assert_failure_prints_position_and_returns_failed() {
        let body = cmd(
            2,
            CommandKind::Block(vec![cmd(
                7,
                CommandKind::Assert(expr(7, ExprKind::BoolLit(false))),
            )]),
        );
        let (registry, id) = checked_test(body);
        let cfg = registry.sigs.resolve_cfg(id, &registry.classes).unwrap();

        // BoolLit(false) as a test goes straight to the failure block, so
        // the entry chain carries the failure code.
        let mut at = cfg.entry;
        let mut seen = Vec::new();
        loop {
            let block = cfg.arena.block(at);
            seen.extend(block.instrs().iter().cloned());
            match block.exit() {
                Exit::Fall(next) => at = *next,
                Exit::End => break,
                Exit::Branch { .. } => panic!("constant condition must not branch"),
            }
        }
        assert_eq!(
            seen,
            vec![
                Bytecode::PushString("7:1\t> assert failed\n".to_string()),
                Bytecode::VirtualCall(registry.sigs.string_output()),
                Bytecode::Const(TEST_FAILED),
                Bytecode::Return(Type::Int),
            ]
        );
    }

    #[test]
    fn translation_is_memoized() {
        let (registry, id) = checked_test(cmd(2, CommandKind::Block(vec![])));
        let first = registry.sigs.resolve_cfg(id, &registry.classes).unwrap() as *const _;
        let second = registry.sigs.resolve_cfg(id, &registry.classes).unwrap() as *const _;
        assert_eq!(first, second);
    }
}
