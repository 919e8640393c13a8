//! The annotated abstract syntax consumed by the backend.
//!
//! Nodes are tagged enums with one variant per construct; the translation
//! protocol dispatches by matching on the variant. Each node carries
//! single-assignment caches (`Cell`s) that the checking pass fills in with
//! static types, resolved overloads, and variable slots, so translation
//! reads annotations instead of re-deriving them. A node whose cache is
//! read before checking indicates a defect in phase ordering and aborts.

use std::cell::Cell;

use manul_core::{ClassId, ClassTable, Span, Type};

use crate::bytecode::{ArithOp, CompareKind};
use crate::registry::SigId;

/// A surface type annotation, resolved against the class table during
/// registration or checking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeExpr(pub String);

impl TypeExpr {
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Resolve the annotation to a semantic type.
    pub fn resolve(&self, classes: &ClassTable) -> Option<Type> {
        match self.0.as_str() {
            "boolean" => Some(Type::Boolean),
            "int" => Some(Type::Int),
            "float" => Some(Type::Float),
            "void" => Some(Type::Void),
            "String" => Some(Type::String),
            name => classes.lookup(name).map(Type::Class),
        }
    }
}

/// An expression node with its checker-assigned static type.
#[derive(Debug)]
pub struct Expr {
    pub span: Span,
    pub kind: ExprKind,
    ty: Cell<Option<Type>>,
}

/// Expression variants.
#[derive(Debug)]
pub enum ExprKind {
    IntLit(i32),
    FloatLit(f32),
    BoolLit(bool),
    StringLit(String),
    /// The enclosing unit's receiver.
    This,
    /// A named local; the checker records its slot.
    Var {
        name: String,
        slot: Cell<Option<u16>>,
    },
    /// Field read; the checker records the declaring class and field type.
    Field {
        receiver: Box<Expr>,
        name: String,
        resolved: Cell<Option<(ClassId, Type)>>,
    },
    Arith {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Compare {
        kind: CompareKind,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    /// Method call; the checker records the resolved overload.
    Call {
        receiver: Box<Expr>,
        name: String,
        args: Vec<Expr>,
        resolved: Cell<Option<SigId>>,
    },
    /// Object creation; the checker records the resolved constructor.
    New {
        class: String,
        args: Vec<Expr>,
        resolved: Cell<Option<SigId>>,
    },
}

impl Expr {
    pub fn new(span: Span, kind: ExprKind) -> Self {
        Self {
            span,
            kind,
            ty: Cell::new(None),
        }
    }

    /// Record the checker's result. Single assignment.
    pub(crate) fn set_type(&self, ty: Type) {
        self.ty.set(Some(ty));
    }

    /// The checker-assigned static type.
    ///
    /// # Panics
    ///
    /// Panics if the expression was never type-checked; translation before
    /// checking is a phase-ordering defect.
    pub fn static_type(&self) -> Type {
        match self.ty.get() {
            Some(ty) => ty,
            None => panic!("internal error: expression at {} not type-checked", self.span),
        }
    }

    /// The static type if checking already ran.
    pub fn checked_type(&self) -> Option<Type> {
        self.ty.get()
    }
}

/// A command (statement) node.
#[derive(Debug)]
pub struct Command {
    pub span: Span,
    pub kind: CommandKind,
}

/// Command variants.
#[derive(Debug)]
pub enum CommandKind {
    /// A brace-delimited sequence.
    Block(Vec<Command>),
    /// Local declaration with initializer; the checker records the slot and
    /// the resolved declared type.
    Decl {
        name: String,
        ty: TypeExpr,
        init: Expr,
        slot: Cell<Option<u16>>,
        resolved: Cell<Option<Type>>,
    },
    /// Assignment to a variable or field lvalue.
    Assign { target: Expr, value: Expr },
    /// Expression evaluated for effect; a non-void result is discarded.
    Expr(Expr),
    If {
        cond: Expr,
        then_body: Box<Command>,
        else_body: Option<Box<Command>>,
    },
    While { cond: Expr, body: Box<Command> },
    Return(Option<Expr>),
    /// Test-only condition check; fails the enclosing test at run time.
    Assert(Expr),
}

impl Command {
    pub fn new(span: Span, kind: CommandKind) -> Self {
        Self { span, kind }
    }
}

/// A class member declaration.
#[derive(Debug)]
pub enum MemberDecl {
    Field {
        span: Span,
        name: String,
        ty: TypeExpr,
    },
    Constructor {
        span: Span,
        params: Vec<ParamDecl>,
        body: Command,
    },
    Method {
        span: Span,
        name: String,
        params: Vec<ParamDecl>,
        ret: TypeExpr,
        body: Command,
    },
    /// Anonymous setup unit run before every test of the class.
    Fixture { span: Span, body: Command },
    /// Named unit returning the pass/fail value, in which `assert` is legal.
    Test {
        span: Span,
        name: String,
        body: Command,
    },
}

/// A formal parameter.
#[derive(Debug)]
pub struct ParamDecl {
    pub span: Span,
    pub name: String,
    pub ty: TypeExpr,
}

/// A class declaration.
#[derive(Debug)]
pub struct ClassDecl {
    pub span: Span,
    pub name: String,
    pub superclass: Option<String>,
    pub members: Vec<MemberDecl>,
}

/// A whole type-checked compilation input.
#[derive(Debug, Default)]
pub struct Program {
    pub classes: Vec<ClassDecl>,
}
