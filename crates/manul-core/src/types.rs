//! The semantic type model.
//!
//! Types are either primitives or references to classes interned in a
//! [`ClassTable`]. Class types form a single-inheritance hierarchy rooted at
//! `Object`; the subtype relation and the hierarchy distance used by
//! overload ranking both walk the superclass chain.

use std::fmt;

use rustc_hash::FxHashMap;

/// Identifies an interned class in a [`ClassTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

/// A semantic type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Boolean,
    Int,
    Float,
    Void,
    /// The built-in string type. Strings are reference values with a
    /// runtime-provided `output` method.
    String,
    Class(ClassId),
}

/// The operand categories a branching comparison can be encoded for.
///
/// The target instruction set uses different encodings per category:
/// integer compare-and-branch for `Int` (booleans are integers in the
/// target encoding), a compare-then-branch pair for `Float`, and reference
/// identity compare-and-branch for `Reference`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareCategory {
    Int,
    Float,
    Reference,
}

impl Type {
    /// Whether this type is `Void`.
    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    /// Whether this type is `Boolean`.
    pub fn is_boolean(&self) -> bool {
        matches!(self, Type::Boolean)
    }

    /// The branching-comparison category for values of this type, if values
    /// of this type can be compared at all.
    pub fn comparable_category(&self) -> Option<CompareCategory> {
        match self {
            Type::Boolean | Type::Int => Some(CompareCategory::Int),
            Type::Float => Some(CompareCategory::Float),
            Type::String | Type::Class(_) => Some(CompareCategory::Reference),
            Type::Void => None,
        }
    }

    /// Whether this type can be ordered (`<`, `<=`, `>`, `>=`).
    ///
    /// Only numeric types have an ordering; references and booleans only
    /// support equality tests.
    pub fn is_ordered(&self) -> bool {
        matches!(self, Type::Int | Type::Float)
    }

    /// Subtype test, reflexive. Class types walk the superclass chain.
    pub fn is_subtype_of(&self, other: &Type, classes: &ClassTable) -> bool {
        match (self, other) {
            (Type::Class(sub), Type::Class(sup)) => classes.distance(*sub, *sup).is_some(),
            (a, b) => a == b,
        }
    }

    /// Render the type for diagnostics.
    pub fn display<'a>(&'a self, classes: &'a ClassTable) -> TypeDisplay<'a> {
        TypeDisplay {
            ty: self,
            classes,
        }
    }
}

/// Helper for rendering a [`Type`] with class names resolved.
pub struct TypeDisplay<'a> {
    ty: &'a Type,
    classes: &'a ClassTable,
}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            Type::Boolean => write!(f, "boolean"),
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Void => write!(f, "void"),
            Type::String => write!(f, "String"),
            Type::Class(id) => write!(f, "{}", self.classes.name(*id)),
        }
    }
}

/// A class definition: name, superclass link, declared fields.
#[derive(Debug)]
struct ClassDef {
    name: String,
    superclass: Option<ClassId>,
    fields: Vec<(String, Type)>,
}

/// Interns classes by name and answers hierarchy queries.
///
/// The table is fully populated by the registration pass before any type
/// checking or translation begins, so forward references between classes
/// resolve correctly.
#[derive(Debug, Default)]
pub struct ClassTable {
    defs: Vec<ClassDef>,
    by_name: FxHashMap<String, ClassId>,
}

impl ClassTable {
    /// Create a table seeded with the root `Object` class.
    pub fn new() -> Self {
        let mut table = Self::default();
        table.add_class("Object", None);
        table
    }

    /// The root class every class chain terminates at.
    pub fn object(&self) -> ClassId {
        self.by_name["Object"]
    }

    /// Intern a class. Re-registering an existing name returns the existing
    /// id unchanged.
    pub fn add_class(&mut self, name: &str, superclass: Option<ClassId>) -> ClassId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = ClassId(self.defs.len() as u32);
        self.defs.push(ClassDef {
            name: name.to_string(),
            superclass,
            fields: Vec::new(),
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Patch a class's superclass link.
    ///
    /// Registration adds all class names first and links hierarchies
    /// second, so forward references between classes resolve.
    pub fn set_superclass(&mut self, id: ClassId, superclass: Option<ClassId>) {
        self.defs[id.0 as usize].superclass = superclass;
    }

    /// Look a class up by name.
    pub fn lookup(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    /// The class's declared name.
    pub fn name(&self, id: ClassId) -> &str {
        &self.defs[id.0 as usize].name
    }

    /// The direct superclass, `None` for `Object`.
    pub fn superclass(&self, id: ClassId) -> Option<ClassId> {
        self.defs[id.0 as usize].superclass
    }

    /// Declare a field on a class.
    pub fn add_field(&mut self, class: ClassId, name: &str, ty: Type) {
        self.defs[class.0 as usize]
            .fields
            .push((name.to_string(), ty));
    }

    /// Look a field up by name, walking the superclass chain.
    pub fn field(&self, class: ClassId, name: &str) -> Option<(ClassId, Type)> {
        for owner in self.chain(class) {
            if let Some((_, ty)) = self.defs[owner.0 as usize]
                .fields
                .iter()
                .find(|(f, _)| f == name)
            {
                return Some((owner, *ty));
            }
        }
        None
    }

    /// Iterate the superclass chain starting at `class` itself.
    pub fn chain(&self, class: ClassId) -> impl Iterator<Item = ClassId> + '_ {
        let mut current = Some(class);
        std::iter::from_fn(move || {
            let id = current?;
            current = self.superclass(id);
            Some(id)
        })
    }

    /// Hierarchy distance from `sub` up to `sup`: 0 when equal, `None` when
    /// `sub` is not a subclass of `sup`.
    pub fn distance(&self, sub: ClassId, sup: ClassId) -> Option<u32> {
        self.chain(sub)
            .position(|id| id == sup)
            .map(|steps| steps as u32)
    }
}
