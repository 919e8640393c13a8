//! Manul Compiler
//!
//! The bytecode backend for Manul, a small statically typed class-based
//! language. The backend takes a parsed and name-complete program and
//! produces one class artifact per source class, plus a `<Name>Test`
//! runner artifact for every class declaring fixtures or tests.
//!
//! ## Architecture
//!
//! - **Pass 1 (Registration)**: Intern every class and member signature
//!   before anything is checked, so forward references resolve.
//! - **Pass 2 (Checking)**: Type-check each unit body, annotating the AST
//!   with static types, slots, and resolved overloads. Units that fail
//!   are reported and skipped; their siblings still compile.
//! - **Pass 3 (Generation)**: Translate each surviving unit into a block
//!   graph (continuation-passing, on first demand, cached per signature)
//!   and linearize it into an instruction stream.
//!
//! ## Modules
//!
//! - [`ast`]: The annotated abstract syntax consumed by the backend
//! - [`bytecode`]: Instruction values and branching comparisons
//! - [`cfg`]: Basic blocks and the per-unit block arena
//! - [`check`]: The per-unit checking pass
//! - [`classfile`]: Assembled class artifacts
//! - [`emit`]: Linearizing block graphs into instruction streams
//! - [`overload`]: Overload resolution for calls and object creation
//! - [`registry`]: Signatures, classes, and the registration pass
//! - [`testgen`]: The synthesized test-runner artifact
//! - [`translate`]: Back-to-front translation of commands into blocks

pub mod ast;
pub mod bytecode;
pub mod cfg;
pub mod check;
pub mod classfile;
pub mod emit;
pub mod overload;
pub mod registry;
pub mod testgen;
pub mod translate;

pub use classfile::{ClassGenerator, GeneratedClass, GeneratedMethod, MethodFlags};
pub use emit::{CodeGenerator, Insn, MethodCode, Op};
pub use overload::resolve_call;
pub use registry::{register, Registry, SigId, SigKind, Signature, SignatureTable};
pub use testgen::TestClassGenerator;

// Re-export the shared diagnostics types for convenience.
pub use manul_core::{CompileError, Diagnostic};

use rustc_hash::FxHashSet;

use crate::ast::Program;

/// Result of compiling one program.
pub struct CompiledProgram {
    /// One artifact per source class, followed by its test artifact when
    /// the class declares fixtures or tests. Program order.
    pub classes: Vec<GeneratedClass>,
    /// Everything reported by checking, in unit order.
    pub diagnostics: Vec<Diagnostic>,
}

impl CompiledProgram {
    /// Whether the whole program checked cleanly.
    pub fn is_success(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// The backend entry point.
pub struct Compiler;

impl Compiler {
    /// Compile a program into class artifacts.
    ///
    /// Diagnostics never abort the run: a unit that fails to check is
    /// skipped and every other unit still reaches code generation. Only
    /// an internal invariant violation surfaces as an `Err`.
    pub fn compile(program: Program, source_file: &str) -> Result<CompiledProgram, CompileError> {
        let (registry, mut diagnostics) = register(program);

        let mut failed: FxHashSet<SigId> = FxHashSet::default();
        for id in registry.sigs.ids() {
            if registry.sigs.get(id).is_builtin() {
                continue;
            }
            let unit_diags = check::check_signature(&registry.sigs, &registry.classes, id);
            if !unit_diags.is_empty() {
                failed.insert(id);
                diagnostics.extend(unit_diags);
            }
        }

        let class_gen = ClassGenerator::new(&registry.classes, &registry.sigs, source_file);
        let test_gen = TestClassGenerator::new(&registry.classes, &registry.sigs, source_file);

        let mut classes = Vec::new();
        for &class in &registry.class_order {
            classes.push(class_gen.generate(class, &failed)?);
            let has_harness = !registry.sigs.fixtures_of(class).is_empty()
                || !registry.sigs.tests_of(class).is_empty();
            if has_harness {
                classes.push(test_gen.generate(class, &failed)?);
            }
        }

        Ok(CompiledProgram {
            classes,
            diagnostics,
        })
    }
}
