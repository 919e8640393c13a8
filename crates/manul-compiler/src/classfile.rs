//! Assembled class artifacts.
//!
//! A [`GeneratedClass`] is the backend's output for one source class: its
//! linearized methods plus the metadata an artifact writer needs. The
//! companion test artifact is assembled in [`crate::testgen`].

use bitflags::bitflags;
use rustc_hash::FxHashSet;

use manul_core::{ClassId, ClassTable, CompileError, Type};

use crate::emit::{CodeGenerator, MethodCode};
use crate::registry::{SigId, SigKind, SignatureTable};

bitflags! {
    /// Access and dispatch flags of a generated method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const STATIC = 0x0008;
    }
}

/// One compiled method of an artifact.
#[derive(Debug)]
pub struct GeneratedMethod {
    pub name: String,
    pub flags: MethodFlags,
    pub params: Vec<Type>,
    pub ret: Type,
    pub code: MethodCode,
}

/// One output artifact: a compiled class.
#[derive(Debug)]
pub struct GeneratedClass {
    pub name: String,
    /// Absent only for the root class.
    pub superclass: Option<String>,
    pub source_file: String,
    pub methods: Vec<GeneratedMethod>,
}

/// Assembles the per-class artifact holding constructors and methods.
pub struct ClassGenerator<'a> {
    classes: &'a ClassTable,
    sigs: &'a SignatureTable,
    source_file: &'a str,
}

impl<'a> ClassGenerator<'a> {
    pub fn new(classes: &'a ClassTable, sigs: &'a SignatureTable, source_file: &'a str) -> Self {
        Self {
            classes,
            sigs,
            source_file,
        }
    }

    /// Compile every constructor and method of `class`, skipping units in
    /// `failed` (they did not check; their siblings still compile).
    pub fn generate(
        &self,
        class: ClassId,
        failed: &FxHashSet<SigId>,
    ) -> Result<GeneratedClass, CompileError> {
        let generator = CodeGenerator::new(self.sigs);
        let mut methods = Vec::new();

        for &id in self.sigs.units_of(class) {
            let sig = self.sigs.get(id);
            if failed.contains(&id)
                || !matches!(sig.kind, SigKind::Constructor | SigKind::Method)
            {
                continue;
            }
            let cfg = self.sigs.resolve_cfg(id, self.classes)?;
            let code = generator.linearize(cfg, sig.param_slots())?;
            methods.push(GeneratedMethod {
                name: sig.name.clone(),
                flags: MethodFlags::PUBLIC,
                params: sig.params.iter().map(|(_, ty)| *ty).collect(),
                ret: sig.ret,
                code,
            });
        }

        Ok(GeneratedClass {
            name: self.classes.name(class).to_string(),
            superclass: self
                .classes
                .superclass(class)
                .map(|sup| self.classes.name(sup).to_string()),
            source_file: self.source_file.to_string(),
            methods,
        })
    }
}
