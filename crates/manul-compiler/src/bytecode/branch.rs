//! Branching comparison instructions.
//!
//! A [`Branch`] is a two-successor instruction: it evaluates a comparison
//! and routes control to a "yes" or "no" block. Branches are polymorphic
//! over the operand [`CompareCategory`] because the target encoding differs
//! per category (integer compare-and-branch, reference identity
//! compare-and-branch, compare-then-branch for floats).
//!
//! Every branch exposes [`Branch::negate`], yielding the instruction with
//! "yes" and "no" meanings swapped. The code generator uses it to flip a
//! branch when only its yes side can become the structural fallthrough.

use manul_core::CompareCategory;

/// The comparison a branch performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareKind {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareKind {
    /// The logically complementary comparison.
    ///
    /// Applying this twice yields the original kind.
    pub fn negate(self) -> Self {
        match self {
            CompareKind::Eq => CompareKind::Ne,
            CompareKind::Ne => CompareKind::Eq,
            CompareKind::Lt => CompareKind::Ge,
            CompareKind::Ge => CompareKind::Lt,
            CompareKind::Gt => CompareKind::Le,
            CompareKind::Le => CompareKind::Gt,
        }
    }

    /// Whether this comparison requires an ordering on its operands.
    pub fn is_ordering(self) -> bool {
        !matches!(self, CompareKind::Eq | CompareKind::Ne)
    }

    /// The surface operator symbol, for diagnostics.
    pub fn symbol(self) -> &'static str {
        match self {
            CompareKind::Eq => "==",
            CompareKind::Ne => "!=",
            CompareKind::Lt => "<",
            CompareKind::Le => "<=",
            CompareKind::Gt => ">",
            CompareKind::Ge => ">=",
        }
    }
}

/// A branching comparison instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// Compare the two topmost stack values.
    Cmp {
        kind: CompareKind,
        category: CompareCategory,
    },
    /// Compare the topmost stack value against integer zero.
    ///
    /// Used where a boolean is already materialized on the stack, and by
    /// the generated harness to classify a test's returned pass/fail value.
    If { kind: CompareKind },
}

impl Branch {
    /// The equivalent instruction with "yes" and "no" swapped.
    pub fn negate(self) -> Self {
        match self {
            Branch::Cmp { kind, category } => Branch::Cmp {
                kind: kind.negate(),
                category,
            },
            Branch::If { kind } => Branch::If {
                kind: kind.negate(),
            },
        }
    }

    /// How many stack operands the branch consumes.
    pub fn pops(&self) -> u16 {
        match self {
            Branch::Cmp { .. } => 2,
            Branch::If { .. } => 1,
        }
    }
}
