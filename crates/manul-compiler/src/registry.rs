//! Signatures and the registration pass.
//!
//! A [`Signature`] identifies one compiled unit: its defining class, kind,
//! name, parameter types, and return type. It also carries the unit's body
//! AST and a single-assignment slot for the body's translated block graph,
//! computed at most once on first request and cached, so signatures
//! referenced from many call sites never re-translate.
//!
//! Registration is the first pass over a program: every class and every
//! member signature is interned before any checking or translation begins,
//! so forward references to later-declared members resolve correctly.

use std::rc::Rc;

use once_cell::unsync::OnceCell;
use rustc_hash::FxHashMap;

use manul_core::{ClassId, ClassTable, CompileError, Diagnostic, Span, Type};

use crate::ast::{ClassDecl, Command, CommandKind, MemberDecl, Program, TypeExpr};
use crate::bytecode::Bytecode;
use crate::cfg::{BlockArena, BlockId};
use crate::translate::TranslateCx;

/// The value a test returns when it passes.
///
/// A test body that runs to completion returns this implicitly; the
/// harness sums returned values into its passed count.
pub const TEST_PASSED: i32 = 1;

/// The sentinel a test returns when an `assert` fails.
pub const TEST_FAILED: i32 = 0;

/// The internal name of constructors.
pub const CTOR_NAME: &str = "<init>";

/// Identifies an interned signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SigId(u32);

impl SigId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What kind of unit a signature describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigKind {
    Constructor,
    Method,
    /// Anonymous setup unit run before every test of its class.
    Fixture,
    /// Named unit returning the pass/fail value.
    Test,
}

/// A translated unit body: its block arena and entry block.
#[derive(Debug)]
pub struct Cfg {
    pub arena: BlockArena,
    pub entry: BlockId,
}

/// The compile-time identity and cached translation of one unit.
#[derive(Debug)]
pub struct Signature {
    pub class: ClassId,
    pub kind: SigKind,
    pub name: String,
    /// Declared parameters, not counting the receiver.
    pub params: Vec<(String, Type)>,
    pub ret: Type,
    pub span: Span,
    /// The body AST; `None` for runtime-provided builtins.
    body: Option<Rc<Command>>,
    /// Lazily translated block graph. Written at most once.
    cfg: OnceCell<Cfg>,
}

impl Signature {
    /// Create a signature. `body` is `None` for runtime-provided builtins.
    pub fn new(
        class: ClassId,
        kind: SigKind,
        name: impl Into<String>,
        params: Vec<(String, Type)>,
        ret: Type,
        span: Span,
        body: Option<Rc<Command>>,
    ) -> Self {
        Self {
            class,
            kind,
            name: name.into(),
            params,
            ret,
            span,
            body,
            cfg: OnceCell::new(),
        }
    }

    /// The unit's body, absent for builtins.
    pub fn body(&self) -> Option<&Rc<Command>> {
        self.body.as_ref()
    }

    /// Whether this unit is runtime-provided (no body to compile).
    pub fn is_builtin(&self) -> bool {
        self.body.is_none()
    }

    /// Local slots occupied by the receiver plus the declared parameters.
    pub fn param_slots(&self) -> u16 {
        1 + self.params.len() as u16
    }

    /// Render as `Class.name(paramTypes)` for diagnostics.
    pub fn describe(&self, classes: &ClassTable) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|(_, ty)| ty.display(classes).to_string())
            .collect();
        format!(
            "{}.{}({})",
            classes.name(self.class),
            self.name,
            params.join(", ")
        )
    }
}

/// Interns all signatures of a program and owns their cached CFGs.
#[derive(Debug, Default)]
pub struct SignatureTable {
    sigs: Vec<Signature>,
    /// Constructors and methods, bucketed by declaring class and name.
    members: FxHashMap<(ClassId, String), Vec<SigId>>,
    /// Constructors and methods per class, in declaration order.
    unit_order: FxHashMap<ClassId, Vec<SigId>>,
    /// Fixtures per class, in declaration order.
    fixtures: FxHashMap<ClassId, Vec<SigId>>,
    /// Tests per class, in declaration order.
    tests: FxHashMap<ClassId, Vec<SigId>>,
    string_output: Option<SigId>,
}

impl SignatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a signature, indexing it by kind.
    pub fn add(&mut self, sig: Signature) -> SigId {
        let id = SigId(self.sigs.len() as u32);
        match sig.kind {
            SigKind::Constructor | SigKind::Method => {
                self.members
                    .entry((sig.class, sig.name.clone()))
                    .or_default()
                    .push(id);
                self.unit_order.entry(sig.class).or_default().push(id);
            }
            SigKind::Fixture => self.fixtures.entry(sig.class).or_default().push(id),
            SigKind::Test => self.tests.entry(sig.class).or_default().push(id),
        }
        self.sigs.push(sig);
        id
    }

    pub fn get(&self, id: SigId) -> &Signature {
        &self.sigs[id.index()]
    }

    /// All interned signature ids.
    pub fn ids(&self) -> impl Iterator<Item = SigId> {
        (0..self.sigs.len() as u32).map(SigId)
    }

    /// Constructors/methods declared directly on `class` under `name`.
    pub fn members_named(&self, class: ClassId, name: &str) -> &[SigId] {
        self.members
            .get(&(class, name.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Constructors and methods of `class`, in declaration order.
    pub fn units_of(&self, class: ClassId) -> &[SigId] {
        self.unit_order
            .get(&class)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Fixtures of `class`, in declaration order.
    pub fn fixtures_of(&self, class: ClassId) -> &[SigId] {
        self.fixtures.get(&class).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tests of `class`, in declaration order.
    pub fn tests_of(&self, class: ClassId) -> &[SigId] {
        self.tests.get(&class).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The builtin `String.output()` used by assert failure paths.
    ///
    /// # Panics
    ///
    /// Panics if builtins were never seeded; registration always seeds them
    /// before anything can translate.
    pub fn string_output(&self) -> SigId {
        match self.string_output {
            Some(id) => id,
            None => panic!("internal error: builtins not seeded"),
        }
    }

    /// The unit's block graph, translating the body on first request.
    ///
    /// The graph is computed at most once; later calls return the cached
    /// value. Re-entrant resolution of the same signature during its own
    /// translation panics, which is the desired fatal behavior for that
    /// phase-ordering defect.
    pub fn resolve_cfg(&self, id: SigId, classes: &ClassTable) -> Result<&Cfg, CompileError> {
        self.get(id)
            .cfg
            .get_or_try_init(|| self.translate_unit(id, classes))
    }

    fn translate_unit(&self, id: SigId, classes: &ClassTable) -> Result<Cfg, CompileError> {
        let sig = self.get(id);
        let body = sig.body.clone().ok_or_else(|| CompileError::Internal {
            message: format!("builtin '{}' has no body to translate", sig.name),
        })?;

        let mut arena = BlockArena::new();

        // The initial continuation: a passthrough into the unit's implicit
        // tail. Tests fall through to `return TEST_PASSED`; everything else
        // compiled here is checked as void and falls through to a bare
        // return. For a non-void method the checker has already verified
        // every path returns, so its continuation is never reachable.
        let tail = match sig.kind {
            SigKind::Test => {
                let ret = arena.terminal(Bytecode::Return(Type::Int));
                arena.prepend(Bytecode::Const(TEST_PASSED), ret)
            }
            _ => arena.terminal(Bytecode::Return(Type::Void)),
        };
        let continuation = arena.passthrough(tail);

        let mut cx = TranslateCx {
            arena: &mut arena,
            sigs: self,
            classes,
        };
        let body_entry = body.translate(&mut cx, continuation);
        let entry = self.add_prefix_to_code(id, classes, &mut arena, body_entry)?;

        Ok(Cfg { arena, entry })
    }

    /// Wrap a unit's translated body with kind-specific prologue code.
    ///
    /// Methods, fixtures, and tests need none. Constructors prepend the
    /// implicit superclass constructor call.
    pub fn add_prefix_to_code(
        &self,
        id: SigId,
        classes: &ClassTable,
        arena: &mut BlockArena,
        code: BlockId,
    ) -> Result<BlockId, CompileError> {
        let sig = self.get(id);
        match sig.kind {
            SigKind::Method | SigKind::Fixture | SigKind::Test => Ok(code),
            SigKind::Constructor => {
                let superclass = classes.superclass(sig.class).ok_or_else(|| {
                    CompileError::Internal {
                        message: "constructor of the root class".to_string(),
                    }
                })?;
                let super_ctor = self.no_arg_ctor(superclass, classes)?;
                let call = arena.prepend(Bytecode::SpecialCall(super_ctor), code);
                Ok(arena.prepend(
                    Bytecode::Load {
                        slot: 0,
                        ty: Type::Class(sig.class),
                    },
                    call,
                ))
            }
        }
    }

    /// The first no-argument constructor on `class` or above it.
    pub fn no_arg_ctor(
        &self,
        class: ClassId,
        classes: &ClassTable,
    ) -> Result<SigId, CompileError> {
        for owner in classes.chain(class) {
            for &sid in self.members_named(owner, CTOR_NAME) {
                if self.get(sid).params.is_empty() {
                    return Ok(sid);
                }
            }
        }
        Err(CompileError::Internal {
            message: format!(
                "class '{}' has no no-argument constructor",
                classes.name(class)
            ),
        })
    }
}

/// Registration output: the fully populated class and signature tables.
#[derive(Debug)]
pub struct Registry {
    pub classes: ClassTable,
    pub sigs: SignatureTable,
    /// Source classes in program order.
    pub class_order: Vec<ClassId>,
}

/// Register every class and member of a program.
///
/// Problems found while registering (unknown superclass or type names)
/// become diagnostics; registration recovers and continues so later phases
/// can surface further errors.
pub fn register(program: Program) -> (Registry, Vec<Diagnostic>) {
    let mut classes = ClassTable::new();
    let mut sigs = SignatureTable::new();
    let mut diagnostics = Vec::new();

    seed_builtins(&mut classes, &mut sigs);

    // Pass one: intern every class name, then link hierarchies, so a class
    // may extend one declared later in the program.
    let mut class_order = Vec::with_capacity(program.classes.len());
    for decl in &program.classes {
        class_order.push(classes.add_class(&decl.name, Some(classes.object())));
    }
    for (decl, &id) in program.classes.iter().zip(&class_order) {
        if let Some(super_name) = &decl.superclass {
            match classes.lookup(super_name) {
                Some(sup) => classes.set_superclass(id, Some(sup)),
                None => diagnostics.push(
                    CompileError::UnknownClass {
                        span: decl.span,
                        name: super_name.clone(),
                    }
                    .into(),
                ),
            }
        }
    }

    // Pass two: fields and member signatures.
    for (decl, &id) in program.classes.into_iter().zip(&class_order) {
        register_members(decl, id, &mut classes, &mut sigs, &mut diagnostics);
    }

    (
        Registry {
            classes,
            sigs,
            class_order,
        },
        diagnostics,
    )
}

/// Intern the runtime-provided classes and members: `Object` with its
/// no-argument constructor, and `String` with its `output` method.
fn seed_builtins(classes: &mut ClassTable, sigs: &mut SignatureTable) {
    let object = classes.object();
    sigs.add(Signature::new(
        object,
        SigKind::Constructor,
        CTOR_NAME,
        Vec::new(),
        Type::Void,
        Span::default(),
        None,
    ));

    let string = classes.add_class("String", Some(object));
    let output = sigs.add(Signature::new(
        string,
        SigKind::Method,
        "output",
        Vec::new(),
        Type::Void,
        Span::default(),
        None,
    ));
    sigs.string_output = Some(output);
}

fn register_members(
    decl: ClassDecl,
    class: ClassId,
    classes: &mut ClassTable,
    sigs: &mut SignatureTable,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let mut fixture_counter = 0u32;
    let mut has_ctor = false;
    let class_span = decl.span;

    for member in decl.members {
        match member {
            MemberDecl::Field { span, name, ty } => {
                if let Some(ty) = resolve_type(&ty, classes, span, diagnostics) {
                    classes.add_field(class, &name, ty);
                }
            }
            MemberDecl::Constructor { span, params, body } => {
                has_ctor = true;
                let params = resolve_params(params, classes, diagnostics);
                sigs.add(Signature::new(
                    class,
                    SigKind::Constructor,
                    CTOR_NAME,
                    params,
                    Type::Void,
                    span,
                    Some(Rc::new(body)),
                ));
            }
            MemberDecl::Method {
                span,
                name,
                params,
                ret,
                body,
            } => {
                let params = resolve_params(params, classes, diagnostics);
                let ret = resolve_type(&ret, classes, span, diagnostics).unwrap_or(Type::Void);
                sigs.add(Signature::new(
                    class,
                    SigKind::Method,
                    name,
                    params,
                    ret,
                    span,
                    Some(Rc::new(body)),
                ));
            }
            MemberDecl::Fixture { span, body } => {
                // Anonymous: named by an index local to this class's
                // registration, unique only within the class.
                let name = format!("fixture{fixture_counter}");
                fixture_counter += 1;
                sigs.add(Signature::new(
                    class,
                    SigKind::Fixture,
                    name,
                    Vec::new(),
                    Type::Void,
                    span,
                    Some(Rc::new(body)),
                ));
            }
            MemberDecl::Test { span, name, body } => {
                sigs.add(Signature::new(
                    class,
                    SigKind::Test,
                    name,
                    Vec::new(),
                    Type::Int,
                    span,
                    Some(Rc::new(body)),
                ));
            }
        }
    }

    // Every class can be instantiated by the harness, so a class without a
    // declared constructor gets the default one.
    if !has_ctor {
        sigs.add(Signature::new(
            class,
            SigKind::Constructor,
            CTOR_NAME,
            Vec::new(),
            Type::Void,
            class_span,
            Some(Rc::new(Command::new(
                class_span,
                CommandKind::Block(Vec::new()),
            ))),
        ));
    }
}

fn resolve_params(
    params: Vec<crate::ast::ParamDecl>,
    classes: &ClassTable,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<(String, Type)> {
    params
        .into_iter()
        .filter_map(|p| {
            resolve_type(&p.ty, classes, p.span, diagnostics).map(|ty| (p.name, ty))
        })
        .collect()
}

fn resolve_type(
    ty: &TypeExpr,
    classes: &ClassTable,
    span: Span,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<Type> {
    match ty.resolve(classes) {
        Some(ty) => Some(ty),
        None => {
            diagnostics.push(
                CompileError::UnknownClass {
                    span,
                    name: ty.0.clone(),
                }
                .into(),
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ParamDecl;

    fn empty_body() -> Command {
        Command::new(Span::default(), CommandKind::Block(Vec::new()))
    }

    fn program_with_members(members: Vec<MemberDecl>) -> Program {
        Program {
            classes: vec![ClassDecl {
                span: Span::default(),
                name: "Counter".to_string(),
                superclass: None,
                members,
            }],
        }
    }

    #[test]
    fn fixtures_get_local_indexed_names() {
        let (registry, diagnostics) = register(program_with_members(vec![
            MemberDecl::Fixture {
                span: Span::default(),
                body: empty_body(),
            },
            MemberDecl::Fixture {
                span: Span::default(),
                body: empty_body(),
            },
        ]));
        assert!(diagnostics.is_empty());

        let class = registry.classes.lookup("Counter").unwrap();
        let fixtures = registry.sigs.fixtures_of(class);
        assert_eq!(fixtures.len(), 2);
        assert_eq!(registry.sigs.get(fixtures[0]).name, "fixture0");
        assert_eq!(registry.sigs.get(fixtures[1]).name, "fixture1");
    }

    #[test]
    fn default_constructor_is_synthesized() {
        let (registry, _) = register(program_with_members(vec![]));
        let class = registry.classes.lookup("Counter").unwrap();
        let ctor = registry.sigs.no_arg_ctor(class, &registry.classes).unwrap();
        assert_eq!(registry.sigs.get(ctor).class, class);
        assert_eq!(registry.sigs.get(ctor).kind, SigKind::Constructor);
    }

    #[test]
    fn declared_constructor_suppresses_default() {
        let (registry, _) = register(program_with_members(vec![MemberDecl::Constructor {
            span: Span::default(),
            params: vec![ParamDecl {
                span: Span::default(),
                name: "n".to_string(),
                ty: TypeExpr::named("int"),
            }],
            body: empty_body(),
        }]));
        let class = registry.classes.lookup("Counter").unwrap();
        let ctors = registry.sigs.members_named(class, CTOR_NAME);
        assert_eq!(ctors.len(), 1);
        assert_eq!(registry.sigs.get(ctors[0]).params.len(), 1);
        // No no-arg ctor on the class itself; the chain finds Object's.
        let found = registry.sigs.no_arg_ctor(class, &registry.classes).unwrap();
        assert_eq!(
            registry.sigs.get(found).class,
            registry.classes.object()
        );
    }

    #[test]
    fn tests_return_int() {
        let (registry, _) = register(program_with_members(vec![MemberDecl::Test {
            span: Span::default(),
            name: "increments".to_string(),
            body: empty_body(),
        }]));
        let class = registry.classes.lookup("Counter").unwrap();
        let tests = registry.sigs.tests_of(class);
        assert_eq!(tests.len(), 1);
        let sig = registry.sigs.get(tests[0]);
        assert_eq!(sig.ret, Type::Int);
        assert_eq!(sig.kind, SigKind::Test);
        assert_eq!(sig.name, "increments");
    }

    #[test]
    fn builtins_are_seeded() {
        let (registry, _) = register(Program::default());
        let string = registry.classes.lookup("String").unwrap();
        let output = registry.sigs.string_output();
        assert_eq!(registry.sigs.get(output).class, string);
        assert!(registry.sigs.get(output).is_builtin());
    }

    #[test]
    fn unknown_superclass_is_reported_and_recovers() {
        let program = Program {
            classes: vec![ClassDecl {
                span: Span::new(1, 1, 5),
                name: "Orphan".to_string(),
                superclass: Some("Ghost".to_string()),
                members: vec![],
            }],
        };
        let (registry, diagnostics) = register(program);
        assert_eq!(diagnostics.len(), 1);
        let class = registry.classes.lookup("Orphan").unwrap();
        // Recovers to Object so later phases keep working.
        assert_eq!(
            registry.classes.superclass(class),
            Some(registry.classes.object())
        );
    }
}
