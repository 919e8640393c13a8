//! The synthesized test-runner artifact.
//!
//! For every source class declaring fixtures or tests, the backend emits a
//! companion `<Name>Test` artifact. Each fixture and test compiles to a
//! private static method taking the receiver as its single parameter, and
//! a generated `main` drives them: it constructs a fresh receiver per
//! test, runs every fixture against it, times the test call, accumulates
//! the returned pass value, and prints the console report:
//!
//! ```text
//! Test execution for class <Name>:
//!     --------------------------------
//!     - <testName>: passed [<T>ms]
//!     --------------------------------
//!     - <testName2>: failed [<T>ms]
//!     --------------------------------
//! <P> test(s) passed, <F> failed [<T>ms]
//! ```
//!
//! A separator line follows the header and each test line, so the totals
//! sit directly under the last test's ruling.
//!
//! `main` is assembled directly from block primitives, then linearized by
//! the same code generator as ordinary units.

use rustc_hash::FxHashSet;

use manul_core::{ClassId, ClassTable, CompileError, Type};

use crate::bytecode::{ArithOp, Branch, Bytecode, CompareKind};
use crate::cfg::{BlockArena, BlockId};
use crate::classfile::{GeneratedClass, GeneratedMethod, MethodFlags};
use crate::emit::CodeGenerator;
use crate::registry::{Cfg, SigId, SigKind, SignatureTable};

/// Frame layout of the generated `main`.
///
/// Slot 0 stays free for the entry arguments; longs occupy a slot pair.
const SLOT_PASS_COUNT: u16 = 1;
const SLOT_TEST_COUNT: u16 = 2;
const SLOT_RUN_START: u16 = 3;
const SLOT_TEST_START: u16 = 5;
const SLOT_RESULT: u16 = 7;
const SLOT_TEST_END: u16 = 8;

const SEPARATOR: &str = "\t--------------------------------\n";

/// Assembles the `<Name>Test` artifact for one source class.
pub struct TestClassGenerator<'a> {
    classes: &'a ClassTable,
    sigs: &'a SignatureTable,
    source_file: &'a str,
}

impl<'a> TestClassGenerator<'a> {
    pub fn new(classes: &'a ClassTable, sigs: &'a SignatureTable, source_file: &'a str) -> Self {
        Self {
            classes,
            sigs,
            source_file,
        }
    }

    /// Compile the fixtures, tests, and driving `main` of `class`.
    ///
    /// Units in `failed` are left out entirely; the report's test count
    /// covers only the tests that compiled.
    pub fn generate(
        &self,
        class: ClassId,
        failed: &FxHashSet<SigId>,
    ) -> Result<GeneratedClass, CompileError> {
        let generator = CodeGenerator::new(self.sigs);
        let mut methods = Vec::new();

        let fixtures: Vec<SigId> = self
            .sigs
            .fixtures_of(class)
            .iter()
            .copied()
            .filter(|id| !failed.contains(id))
            .collect();
        let tests: Vec<SigId> = self
            .sigs
            .tests_of(class)
            .iter()
            .copied()
            .filter(|id| !failed.contains(id))
            .collect();

        for &id in fixtures.iter().chain(&tests) {
            let sig = self.sigs.get(id);
            let cfg = self.sigs.resolve_cfg(id, self.classes)?;
            let code = generator.linearize(cfg, sig.param_slots())?;
            methods.push(GeneratedMethod {
                name: sig.name.clone(),
                flags: MethodFlags::PRIVATE | MethodFlags::STATIC,
                params: vec![Type::Class(class)],
                ret: match sig.kind {
                    SigKind::Test => Type::Int,
                    _ => Type::Void,
                },
                code,
            });
        }

        let main_cfg = self.build_main(class, &fixtures, &tests)?;
        let code = generator.linearize(&main_cfg, 1)?;
        methods.push(GeneratedMethod {
            name: "main".to_string(),
            flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
            params: vec![],
            ret: Type::Void,
            code,
        });

        Ok(GeneratedClass {
            name: format!("{}Test", self.classes.name(class)),
            superclass: Some("Object".to_string()),
            source_file: self.source_file.to_string(),
            methods,
        })
    }

    /// Build `main` as a block graph, back to front: the totals come
    /// first, then each test's code is prepended in reverse declaration
    /// order, then the prologue.
    fn build_main(
        &self,
        class: ClassId,
        fixtures: &[SigId],
        tests: &[SigId],
    ) -> Result<Cfg, CompileError> {
        let ctor = self.sigs.no_arg_ctor(class, self.classes)?;
        let mut arena = BlockArena::new();

        let ret = arena.terminal(Bytecode::Return(Type::Void));
        let totals = seq(
            &mut arena,
            vec![
                load_int(SLOT_PASS_COUNT),
                Bytecode::PrintInt,
                Bytecode::PushString(" test(s) passed, ".to_string()),
                Bytecode::PrintString,
                load_int(SLOT_TEST_COUNT),
                load_int(SLOT_PASS_COUNT),
                Bytecode::Arith {
                    op: ArithOp::Sub,
                    ty: Type::Int,
                },
                Bytecode::PrintInt,
                Bytecode::PushString(" failed [".to_string()),
                Bytecode::PrintString,
                // The run's end time reuses the per-test start slot.
                Bytecode::CurrentTimeMillis,
                Bytecode::LStore {
                    slot: SLOT_TEST_START,
                },
                Bytecode::LLoad {
                    slot: SLOT_TEST_START,
                },
                Bytecode::LLoad {
                    slot: SLOT_RUN_START,
                },
                Bytecode::LSub,
                Bytecode::PrintLong,
                Bytecode::PushString("ms]\n".to_string()),
                Bytecode::PrintString,
            ],
            ret,
        );

        let mut next = totals;
        for &test in tests.iter().rev() {
            next = self.one_test(&mut arena, class, ctor, fixtures, test, next);
        }

        let entry = seq(
            &mut arena,
            vec![
                Bytecode::Const(0),
                store_int(SLOT_PASS_COUNT),
                Bytecode::Const(tests.len() as i32),
                store_int(SLOT_TEST_COUNT),
                Bytecode::CurrentTimeMillis,
                Bytecode::LStore {
                    slot: SLOT_RUN_START,
                },
                Bytecode::PushString(format!(
                    "Test execution for class {}:\n",
                    self.classes.name(class)
                )),
                Bytecode::PrintString,
                Bytecode::PushString(SEPARATOR.to_string()),
                Bytecode::PrintString,
            ],
            next,
        );

        Ok(Cfg { arena, entry })
    }

    /// The code running one test and printing its report line, falling
    /// through to `next`.
    fn one_test(
        &self,
        arena: &mut BlockArena,
        class: ClassId,
        ctor: SigId,
        fixtures: &[SigId],
        test: SigId,
        next: BlockId,
    ) -> BlockId {
        // Shared tail of the report line: the elapsed time, the closer,
        // and the separator ruling off this test's line.
        let time = seq(
            arena,
            vec![
                Bytecode::LLoad {
                    slot: SLOT_TEST_END,
                },
                Bytecode::LLoad {
                    slot: SLOT_TEST_START,
                },
                Bytecode::LSub,
                Bytecode::PrintLong,
                Bytecode::PushString("ms]\n".to_string()),
                Bytecode::PrintString,
                Bytecode::PushString(SEPARATOR.to_string()),
                Bytecode::PrintString,
            ],
            next,
        );
        let passed = seq(
            arena,
            vec![
                Bytecode::PushString("passed [".to_string()),
                Bytecode::PrintString,
            ],
            time,
        );
        let failed = seq(
            arena,
            vec![
                Bytecode::PushString("failed [".to_string()),
                Bytecode::PrintString,
            ],
            time,
        );
        // A zero result means the test failed.
        let verdict = arena.branch(
            Branch::If {
                kind: CompareKind::Eq,
            },
            failed,
            passed,
        );
        let check = arena.prepend(load_int(SLOT_RESULT), verdict);

        let accumulate = seq(
            arena,
            vec![
                load_int(SLOT_PASS_COUNT),
                load_int(SLOT_RESULT),
                Bytecode::Arith {
                    op: ArithOp::Add,
                    ty: Type::Int,
                },
                store_int(SLOT_PASS_COUNT),
            ],
            check,
        );

        let mut run = vec![
            Bytecode::PushString(format!("\t- {}: ", self.sigs.get(test).name)),
            Bytecode::PrintString,
            Bytecode::New(class),
            Bytecode::Dup,
            Bytecode::SpecialCall(ctor),
        ];
        for &fixture in fixtures {
            run.push(Bytecode::Dup);
            run.push(Bytecode::StaticCall(fixture));
        }
        run.extend([
            Bytecode::CurrentTimeMillis,
            Bytecode::LStore {
                slot: SLOT_TEST_START,
            },
            Bytecode::StaticCall(test),
            Bytecode::CurrentTimeMillis,
            Bytecode::LStore {
                slot: SLOT_TEST_END,
            },
            store_int(SLOT_RESULT),
        ]);
        seq(arena, run, accumulate)
    }
}

fn load_int(slot: u16) -> Bytecode {
    Bytecode::Load { slot, ty: Type::Int }
}

fn store_int(slot: u16) -> Bytecode {
    Bytecode::Store { slot, ty: Type::Int }
}

/// Prepend a straight-line instruction sequence onto `continuation`.
fn seq(arena: &mut BlockArena, instrs: Vec<Bytecode>, continuation: BlockId) -> BlockId {
    instrs
        .into_iter()
        .rev()
        .fold(continuation, |next, instr| arena.prepend(instr, next))
}
