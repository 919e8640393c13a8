//! The per-unit checking pass.
//!
//! Each unit body is checked against a [`CheckContext`] carrying the
//! expected return type, whether `assert` is legal (only in test bodies),
//! and the variable environment seeded with `this`. Checking annotates the
//! AST in place with static types, variable slots, and resolved overloads,
//! and accumulates diagnostics instead of aborting, so one unit can
//! surface several errors and sibling units still compile.
//!
//! The pass ends with the dead-code check: any reachable code textually
//! following a command that always transfers control away is flagged, and
//! a non-void method whose body can fall off the end is rejected.

use manul_core::{ClassId, ClassTable, CompileError, Diagnostic, Span, Type};

use crate::ast::{Command, CommandKind, Expr, ExprKind};
use crate::overload::{resolve_call, resolve_ctor};
use crate::registry::{SigId, SigKind, SignatureTable};

/// The context threaded through checking of one unit body.
pub struct CheckContext<'a> {
    classes: &'a ClassTable,
    sigs: &'a SignatureTable,
    /// Expected return type of the enclosing unit.
    ret: Type,
    /// Whether `assert` commands are legal here.
    assert_allowed: bool,
    this_class: ClassId,
    /// Lexical scopes, innermost last: (name, slot, type).
    scopes: Vec<Vec<(String, u16, Type)>>,
    next_slot: u16,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> CheckContext<'a> {
    pub fn new(
        classes: &'a ClassTable,
        sigs: &'a SignatureTable,
        ret: Type,
        assert_allowed: bool,
        this_class: ClassId,
    ) -> Self {
        let mut cx = Self {
            classes,
            sigs,
            ret,
            assert_allowed,
            this_class,
            scopes: vec![Vec::new()],
            next_slot: 0,
            diagnostics: Vec::new(),
        };
        cx.declare("this", Type::Class(this_class));
        cx
    }

    /// Bind a name in the innermost scope, returning its slot.
    pub fn declare(&mut self, name: &str, ty: Type) -> u16 {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.scopes
            .last_mut()
            .expect("scope stack never empty")
            .push((name.to_string(), slot, ty));
        slot
    }

    fn lookup(&self, name: &str) -> Option<(u16, Type)> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| {
                scope
                    .iter()
                    .rev()
                    .find(|(n, _, _)| n == name)
                    .map(|(_, slot, ty)| (*slot, *ty))
            })
    }

    fn error(&mut self, err: CompileError) {
        self.diagnostics.push(err.into());
    }

    /// The diagnostics accumulated so far.
    pub fn finish(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    fn type_name(&self, ty: Type) -> String {
        ty.display(self.classes).to_string()
    }
}

/// Check one registered unit's body, returning its diagnostics.
///
/// Builtins have no body and check vacuously. Test and fixture bodies are
/// checked as void (a test's pass value is implicit); ordinary non-void
/// methods must return on every path.
pub fn check_signature(
    sigs: &SignatureTable,
    classes: &ClassTable,
    id: SigId,
) -> Vec<Diagnostic> {
    let sig = sigs.get(id);
    let Some(body) = sig.body() else {
        return Vec::new();
    };

    let expected_ret = match sig.kind {
        SigKind::Method => sig.ret,
        SigKind::Constructor | SigKind::Fixture | SigKind::Test => Type::Void,
    };
    let mut cx = CheckContext::new(
        classes,
        sigs,
        expected_ret,
        sig.kind == SigKind::Test,
        sig.class,
    );
    for (name, ty) in &sig.params {
        cx.declare(name, *ty);
    }

    check_command(&mut cx, body);
    let terminates = check_dead_code(&mut cx, body);

    if !expected_ret.is_void() && !terminates {
        cx.error(CompileError::BadReturn {
            span: sig.span,
            message: format!("not all code paths return a value in '{}'", sig.name),
        });
    }

    cx.finish()
}

fn check_command(cx: &mut CheckContext<'_>, cmd: &Command) {
    match &cmd.kind {
        CommandKind::Block(cmds) => {
            cx.scopes.push(Vec::new());
            for c in cmds {
                check_command(cx, c);
            }
            cx.scopes.pop();
        }
        CommandKind::Decl {
            name,
            ty,
            init,
            slot,
            resolved,
        } => {
            let declared = match ty.resolve(cx.classes) {
                Some(ty) if !ty.is_void() => ty,
                Some(_) => {
                    cx.error(CompileError::TypeMismatch {
                        span: cmd.span,
                        expected: "a value type".to_string(),
                        found: "void".to_string(),
                    });
                    Type::Int
                }
                None => {
                    cx.error(CompileError::UnknownClass {
                        span: cmd.span,
                        name: ty.0.clone(),
                    });
                    Type::Int
                }
            };
            let init_ty = check_expr(cx, init);
            if !init_ty.is_subtype_of(&declared, cx.classes) {
                cx.error(CompileError::TypeMismatch {
                    span: init.span,
                    expected: cx.type_name(declared),
                    found: cx.type_name(init_ty),
                });
            }
            resolved.set(Some(declared));
            slot.set(Some(cx.declare(name, declared)));
        }
        CommandKind::Assign { target, value } => {
            if !matches!(target.kind, ExprKind::Var { .. } | ExprKind::Field { .. }) {
                cx.error(CompileError::NotAssignable { span: target.span });
            }
            let target_ty = check_expr(cx, target);
            let value_ty = check_expr(cx, value);
            if !value_ty.is_subtype_of(&target_ty, cx.classes) {
                cx.error(CompileError::TypeMismatch {
                    span: value.span,
                    expected: cx.type_name(target_ty),
                    found: cx.type_name(value_ty),
                });
            }
        }
        CommandKind::Expr(expr) => {
            check_expr(cx, expr);
        }
        CommandKind::If {
            cond,
            then_body,
            else_body,
        } => {
            must_be_boolean(cx, cond);
            check_command(cx, then_body);
            if let Some(else_body) = else_body {
                check_command(cx, else_body);
            }
        }
        CommandKind::While { cond, body } => {
            must_be_boolean(cx, cond);
            check_command(cx, body);
        }
        CommandKind::Return(value) => match value {
            Some(expr) => {
                let ty = check_expr(cx, expr);
                if cx.ret.is_void() {
                    cx.error(CompileError::BadReturn {
                        span: cmd.span,
                        message: "cannot return a value from a void unit".to_string(),
                    });
                } else if !ty.is_subtype_of(&cx.ret, cx.classes) {
                    cx.error(CompileError::TypeMismatch {
                        span: expr.span,
                        expected: cx.type_name(cx.ret),
                        found: cx.type_name(ty),
                    });
                }
            }
            None => {
                if !cx.ret.is_void() {
                    cx.error(CompileError::BadReturn {
                        span: cmd.span,
                        message: "missing return value".to_string(),
                    });
                }
            }
        },
        CommandKind::Assert(cond) => {
            if !cx.assert_allowed {
                cx.error(CompileError::AssertNotAllowed { span: cmd.span });
            }
            must_be_boolean(cx, cond);
        }
    }
}

fn must_be_boolean(cx: &mut CheckContext<'_>, expr: &Expr) {
    let ty = check_expr(cx, expr);
    if !ty.is_boolean() {
        cx.error(CompileError::BooleanExpected {
            span: expr.span,
            found: cx.type_name(ty),
        });
    }
}

/// Check an expression, annotate it, and return its static type.
///
/// On error the expression is still annotated (with a recovery type) so
/// checking can continue past it.
fn check_expr(cx: &mut CheckContext<'_>, expr: &Expr) -> Type {
    let ty = match &expr.kind {
        ExprKind::IntLit(_) => Type::Int,
        ExprKind::FloatLit(_) => Type::Float,
        ExprKind::BoolLit(_) => Type::Boolean,
        ExprKind::StringLit(_) => Type::String,
        ExprKind::This => Type::Class(cx.this_class),
        ExprKind::Var { name, slot } => match cx.lookup(name) {
            Some((s, ty)) => {
                slot.set(Some(s));
                ty
            }
            None => {
                cx.error(CompileError::UnknownVariable {
                    span: expr.span,
                    name: name.clone(),
                });
                Type::Int
            }
        },
        ExprKind::Field {
            receiver,
            name,
            resolved,
        } => {
            let recv_ty = check_expr(cx, receiver);
            match recv_ty {
                Type::Class(class) => match cx.classes.field(class, name) {
                    Some((owner, ty)) => {
                        resolved.set(Some((owner, ty)));
                        ty
                    }
                    None => {
                        cx.error(CompileError::UnknownField {
                            span: expr.span,
                            name: name.clone(),
                        });
                        Type::Int
                    }
                },
                _ => {
                    cx.error(CompileError::UnknownField {
                        span: expr.span,
                        name: name.clone(),
                    });
                    Type::Int
                }
            }
        }
        ExprKind::Arith { lhs, rhs, .. } => {
            let lt = check_expr(cx, lhs);
            let rt = check_expr(cx, rhs);
            if !matches!(lt, Type::Int | Type::Float) {
                cx.error(CompileError::TypeMismatch {
                    span: lhs.span,
                    expected: "int or float".to_string(),
                    found: cx.type_name(lt),
                });
            } else if lt != rt {
                cx.error(CompileError::TypeMismatch {
                    span: rhs.span,
                    expected: cx.type_name(lt),
                    found: cx.type_name(rt),
                });
            }
            lt
        }
        ExprKind::Compare { kind, lhs, rhs } => {
            let lt = check_expr(cx, lhs);
            let rt = check_expr(cx, rhs);
            let comparable = match (lt.comparable_category(), rt.comparable_category()) {
                (Some(_), Some(_)) => {
                    lt.is_subtype_of(&rt, cx.classes) || rt.is_subtype_of(&lt, cx.classes)
                }
                _ => false,
            };
            if !comparable {
                cx.error(CompileError::TypeMismatch {
                    span: rhs.span,
                    expected: cx.type_name(lt),
                    found: cx.type_name(rt),
                });
            } else if kind.is_ordering() && !lt.is_ordered() {
                cx.error(CompileError::TypeMismatch {
                    span: lhs.span,
                    expected: "int or float".to_string(),
                    found: cx.type_name(lt),
                });
            }
            Type::Boolean
        }
        ExprKind::Not(inner) => {
            must_be_boolean(cx, inner);
            Type::Boolean
        }
        ExprKind::And(lhs, rhs) | ExprKind::Or(lhs, rhs) => {
            must_be_boolean(cx, lhs);
            must_be_boolean(cx, rhs);
            Type::Boolean
        }
        ExprKind::Call {
            receiver,
            name,
            args,
            resolved,
        } => {
            let recv_ty = check_expr(cx, receiver);
            let arg_tys: Vec<Type> = args.iter().map(|a| check_expr(cx, a)).collect();
            let receiver_class = match recv_ty {
                Type::Class(class) => Some(class),
                Type::String => cx.classes.lookup("String"),
                _ => {
                    cx.error(CompileError::TypeMismatch {
                        span: receiver.span,
                        expected: "a class instance".to_string(),
                        found: cx.type_name(recv_ty),
                    });
                    None
                }
            };
            match receiver_class {
                Some(class) => {
                    match resolve_call(cx.classes, cx.sigs, class, name, &arg_tys, expr.span) {
                        Ok(sid) => {
                            resolved.set(Some(sid));
                            cx.sigs.get(sid).ret
                        }
                        Err(err) => {
                            cx.error(err);
                            Type::Int
                        }
                    }
                }
                None => Type::Int,
            }
        }
        ExprKind::New {
            class,
            args,
            resolved,
        } => {
            let arg_tys: Vec<Type> = args.iter().map(|a| check_expr(cx, a)).collect();
            match cx.classes.lookup(class) {
                Some(id) => {
                    match resolve_ctor(cx.classes, cx.sigs, id, &arg_tys, expr.span) {
                        Ok(sid) => resolved.set(Some(sid)),
                        Err(err) => cx.error(err),
                    }
                    Type::Class(id)
                }
                None => {
                    cx.error(CompileError::UnknownClass {
                        span: expr.span,
                        name: class.clone(),
                    });
                    Type::Int
                }
            }
        }
    };
    expr.set_type(ty);
    ty
}

/// Whether `cmd` always transfers control away, flagging any reachable
/// code that textually follows such a command.
///
/// `assert` never counts as terminating: its failure path leaves the test,
/// but its success path always continues, so code after an assert is live.
pub fn check_dead_code(cx: &mut CheckContext<'_>, cmd: &Command) -> bool {
    match &cmd.kind {
        CommandKind::Block(cmds) => {
            for (i, c) in cmds.iter().enumerate() {
                if check_dead_code(cx, c) {
                    if let Some(next) = cmds.get(i + 1) {
                        cx.error(CompileError::DeadCode { span: next.span });
                    }
                    return true;
                }
            }
            false
        }
        CommandKind::If {
            then_body,
            else_body,
            ..
        } => {
            let then_ends = check_dead_code(cx, then_body);
            match else_body {
                Some(else_body) => {
                    let else_ends = check_dead_code(cx, else_body);
                    then_ends && else_ends
                }
                None => false,
            }
        }
        // The guard may fail on entry, so a loop never guarantees an exit
        // from the unit.
        CommandKind::While { body, .. } => {
            check_dead_code(cx, body);
            false
        }
        CommandKind::Return(_) => true,
        CommandKind::Assert(_)
        | CommandKind::Decl { .. }
        | CommandKind::Assign { .. }
        | CommandKind::Expr(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ClassDecl, MemberDecl, Program, TypeExpr};
    use crate::registry::register;
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

    fn assert_cmd(line: u32, cond: ExprKind) -> Command {
        cmd(line, CommandKind::Assert(expr(line, cond)))
    }

    fn registered(members: Vec<MemberDecl>) -> crate::registry::Registry {
        let (registry, diagnostics) = register(Program {
            classes: vec![ClassDecl {
                span: Span::default(),
                name: "Counter".to_string(),
                superclass: None,
                members,
            }],
        });
        assert!(diagnostics.is_empty());
        registry
    }

    #[test]
    fn assert_allowed_only_in_tests() {
        let registry = registered(vec![
            MemberDecl::Test {
                span: span(1),
                name: "ok".to_string(),
                body: cmd(2, CommandKind::Block(vec![assert_cmd(2, ExprKind::BoolLit(true))])),
            },
            MemberDecl::Method {
                span: span(4),
                name: "poke".to_string(),
                params: vec![],
                ret: TypeExpr::named("void"),
                body: cmd(5, CommandKind::Block(vec![assert_cmd(5, ExprKind::BoolLit(true))])),
            },
        ]);
        let class = registry.classes.lookup("Counter").unwrap();

        let test = registry.sigs.tests_of(class)[0];
        assert!(check_signature(&registry.sigs, &registry.classes, test).is_empty());

        let method = registry.sigs.members_named(class, "poke")[0];
        let diags = check_signature(&registry.sigs, &registry.classes, method);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("assert not allowed here"));
    }

    #[test]
    fn assert_condition_must_be_boolean() {
        let registry = registered(vec![MemberDecl::Test {
            span: span(1),
            name: "bad".to_string(),
            body: cmd(2, CommandKind::Block(vec![assert_cmd(2, ExprKind::IntLit(3))])),
        }]);
        let class = registry.classes.lookup("Counter").unwrap();
        let test = registry.sigs.tests_of(class)[0];
        let diags = check_signature(&registry.sigs, &registry.classes, test);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("boolean expected"));
    }

    #[test]
    fn dead_code_after_return_is_flagged() {
        let registry = registered(vec![MemberDecl::Method {
            span: span(1),
            name: "answer".to_string(),
            params: vec![],
            ret: TypeExpr::named("int"),
            body: cmd(
                2,
                CommandKind::Block(vec![
                    cmd(2, CommandKind::Return(Some(expr(2, ExprKind::IntLit(42))))),
                    cmd(3, CommandKind::Expr(expr(3, ExprKind::IntLit(0)))),
                ]),
            ),
        }]);
        let class = registry.classes.lookup("Counter").unwrap();
        let method = registry.sigs.members_named(class, "answer")[0];
        let diags = check_signature(&registry.sigs, &registry.classes, method);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("dead code"));
        assert_eq!(diags[0].span, span(3));
    }

    #[test]
    fn code_after_assert_is_live() {
        let registry = registered(vec![MemberDecl::Test {
            span: span(1),
            name: "two_asserts".to_string(),
            body: cmd(
                2,
                CommandKind::Block(vec![
                    assert_cmd(2, ExprKind::BoolLit(true)),
                    assert_cmd(3, ExprKind::BoolLit(true)),
                ]),
            ),
        }]);
        let class = registry.classes.lookup("Counter").unwrap();
        let test = registry.sigs.tests_of(class)[0];
        assert!(check_signature(&registry.sigs, &registry.classes, test).is_empty());
    }

    #[test]
    fn non_void_method_must_return_on_every_path() {
        let registry = registered(vec![MemberDecl::Method {
            span: span(1),
            name: "maybe".to_string(),
            params: vec![],
            ret: TypeExpr::named("int"),
            body: cmd(
                2,
                CommandKind::Block(vec![cmd(
                    2,
                    CommandKind::If {
                        cond: expr(2, ExprKind::BoolLit(true)),
                        then_body: Box::new(cmd(
                            3,
                            CommandKind::Return(Some(expr(3, ExprKind::IntLit(1)))),
                        )),
                        else_body: None,
                    },
                )]),
            ),
        }]);
        let class = registry.classes.lookup("Counter").unwrap();
        let method = registry.sigs.members_named(class, "maybe")[0];
        let diags = check_signature(&registry.sigs, &registry.classes, method);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("not all code paths return"));
    }

    #[test]
    fn both_arms_returning_terminates() {
        let registry = registered(vec![MemberDecl::Method {
            span: span(1),
            name: "either".to_string(),
            params: vec![],
            ret: TypeExpr::named("int"),
            body: cmd(
                2,
                CommandKind::Block(vec![cmd(
                    2,
                    CommandKind::If {
                        cond: expr(2, ExprKind::BoolLit(true)),
                        then_body: Box::new(cmd(
                            3,
                            CommandKind::Return(Some(expr(3, ExprKind::IntLit(1)))),
                        )),
                        else_body: Some(Box::new(cmd(
                            4,
                            CommandKind::Return(Some(expr(4, ExprKind::IntLit(0)))),
                        ))),
                    },
                )]),
            ),
        }]);
        let class = registry.classes.lookup("Counter").unwrap();
        let method = registry.sigs.members_named(class, "either")[0];
        assert!(check_signature(&registry.sigs, &registry.classes, method).is_empty());
    }

    #[test]
    fn variables_get_slots_after_this_and_params() {
        let registry = registered(vec![MemberDecl::Method {
            span: span(1),
            name: "sum".to_string(),
            params: vec![crate::ast::ParamDecl {
                span: span(1),
                name: "n".to_string(),
                ty: TypeExpr::named("int"),
            }],
            ret: TypeExpr::named("void"),
            body: cmd(
                2,
                CommandKind::Block(vec![cmd(
                    2,
                    CommandKind::Decl {
                        name: "total".to_string(),
                        ty: TypeExpr::named("int"),
                        init: expr(2, ExprKind::IntLit(0)),
                        slot: Cell::new(None),
                        resolved: Cell::new(None),
                    },
                )]),
            ),
        }]);
        let class = registry.classes.lookup("Counter").unwrap();
        let method = registry.sigs.members_named(class, "sum")[0];
        assert!(check_signature(&registry.sigs, &registry.classes, method).is_empty());

        // this = 0, n = 1, total = 2.
        let body = registry.sigs.get(method).body().unwrap();
        let CommandKind::Block(cmds) = &body.kind else {
            panic!("expected block body");
        };
        let CommandKind::Decl { slot, .. } = &cmds[0].kind else {
            panic!("expected declaration");
        };
        assert_eq!(slot.get(), Some(2));
    }

    #[test]
    fn unknown_variable_is_reported() {
        let registry = registered(vec![MemberDecl::Method {
            span: span(1),
            name: "oops".to_string(),
            params: vec![],
            ret: TypeExpr::named("void"),
            body: cmd(
                2,
                CommandKind::Block(vec![cmd(
                    2,
                    CommandKind::Expr(expr(
                        2,
                        ExprKind::Var {
                            name: "ghost".to_string(),
                            slot: Cell::new(None),
                        },
                    )),
                )]),
            ),
        }]);
        let class = registry.classes.lookup("Counter").unwrap();
        let method = registry.sigs.members_named(class, "oops")[0];
        let diags = check_signature(&registry.sigs, &registry.classes, method);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("unknown variable 'ghost'"));
    }
}
