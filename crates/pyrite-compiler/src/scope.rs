//! Local variable tables for function compilation.
//!
//! This module provides:
//! - [`LocalTable`]: the WAT locals of one function body, in declaration order
//! - [`Binding`]: where a source-level variable lives in the current function
//! - [`mangle`]: conversion of source identifiers into WAT identifiers

use pyrite_core::NativeType;
use rustc_hash::FxHashMap;

// ============================================================================
// Types
// ============================================================================

/// The value type of a WAT local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalType {
    /// `(ref null eq)`, any boxed value
    Any,
    I32,
    I64,
    F64,
    /// `(ref null $PAIR)`, a one-slot mutable cell
    Cell,
    /// `(ref null $ENV)`
    Env,
    /// `(ref null $EXCEPTION)`
    Exception,
    /// `exnref`, an in-flight exception package
    Exn,
    /// `(ref null $GENERATOR)`
    Generator,
    /// `(ref null $ARRAY_ANY)`
    Array,
    /// `(ref null $CLASS)`
    Class,
}

impl LocalType {
    pub fn wasm(self) -> &'static str {
        match self {
            LocalType::Any => "(ref null eq)",
            LocalType::I32 => "i32",
            LocalType::I64 => "i64",
            LocalType::F64 => "f64",
            LocalType::Cell => "(ref null $PAIR)",
            LocalType::Env => "(ref null $ENV)",
            LocalType::Exception => "(ref null $EXCEPTION)",
            LocalType::Exn => "exnref",
            LocalType::Generator => "(ref null $GENERATOR)",
            LocalType::Array => "(ref null $ARRAY_ANY)",
            LocalType::Class => "(ref null $CLASS)",
        }
    }

    pub fn from_native(native: NativeType) -> Self {
        match native {
            NativeType::I32 => LocalType::I32,
            NativeType::I64 => LocalType::I64,
            NativeType::F64 => LocalType::F64,
        }
    }

    /// Whether a value of this type is a subtype of `eq`.
    pub fn is_eq_ref(self) -> bool {
        !matches!(
            self,
            LocalType::I32 | LocalType::I64 | LocalType::F64 | LocalType::Exn
        )
    }
}

/// Storage class of a source variable inside the function being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Uniform boxed value in a `(ref null eq)` local
    Boxed,
    /// Unboxed machine value
    Native(NativeType),
    /// Shared one-slot cell, visible to nested closures
    Cell,
}

/// A source variable bound to a WAT local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub wat: String,
    pub storage: Storage,
}

impl Binding {
    pub fn boxed(name: &str) -> Self {
        Self {
            wat: format!("$v_{}", mangle(name)),
            storage: Storage::Boxed,
        }
    }

    pub fn native(name: &str, native: NativeType) -> Self {
        Self {
            wat: format!("$n_{}", mangle(name)),
            storage: Storage::Native(native),
        }
    }

    pub fn cell(name: &str) -> Self {
        Self {
            wat: format!("$c_{}", mangle(name)),
            storage: Storage::Cell,
        }
    }

    pub fn local_type(&self) -> LocalType {
        match self.storage {
            Storage::Boxed => LocalType::Any,
            Storage::Native(n) => LocalType::from_native(n),
            Storage::Cell => LocalType::Cell,
        }
    }
}

// ============================================================================
// Local Table
// ============================================================================

/// The declared locals of one function body.
#[derive(Debug, Default)]
pub struct LocalTable {
    order: Vec<(String, LocalType)>,
    index: FxHashMap<String, LocalType>,
    counter: u32,
}

impl LocalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a named local. Re-declaring with the same type is a no-op.
    ///
    /// Returns `false` if the name already exists with a different type.
    pub fn declare(&mut self, name: &str, ty: LocalType) -> bool {
        match self.index.get(name) {
            Some(existing) => *existing == ty,
            None => {
                self.index.insert(name.to_string(), ty);
                self.order.push((name.to_string(), ty));
                true
            }
        }
    }

    /// Declare a fresh, uniquely named temporary.
    pub fn fresh(&mut self, prefix: &str, ty: LocalType) -> String {
        self.counter += 1;
        let name = format!("${prefix}_{}", self.counter);
        self.declare(&name, ty);
        name
    }

    pub fn get(&self, name: &str) -> Option<LocalType> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Locals in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, LocalType)> {
        self.order.iter().map(|(n, t)| (n.as_str(), *t))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// `(local ...)` declarations.
    pub fn declarations(&self) -> impl Iterator<Item = String> + '_ {
        self.order
            .iter()
            .map(|(name, ty)| format!("(local {name} {})", ty.wasm()))
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// Convert a source identifier into WAT identifier characters.
///
/// ASCII alphanumerics and `_` pass through; anything else becomes `.uXXXX`.
pub fn mangle(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
        } else {
            out.push_str(&format!(".u{:04x}", ch as u32));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_is_idempotent() {
        let mut locals = LocalTable::new();
        assert!(locals.declare("$v_x", LocalType::Any));
        assert!(locals.declare("$v_x", LocalType::Any));
        assert!(!locals.declare("$v_x", LocalType::I64));
        assert_eq!(locals.len(), 1);
    }

    #[test]
    fn fresh_names_are_unique() {
        let mut locals = LocalTable::new();
        let a = locals.fresh("tmp", LocalType::Any);
        let b = locals.fresh("tmp", LocalType::Any);
        assert_ne!(a, b);
        let decls: Vec<_> = locals.declarations().collect();
        assert_eq!(decls[0], format!("(local {a} (ref null eq))"));
    }

    #[test]
    fn mangling() {
        assert_eq!(mangle("total_2"), "total_2");
        assert_eq!(mangle("café"), "caf.u00e9");
    }

    #[test]
    fn binding_prefixes() {
        assert_eq!(Binding::boxed("x").wat, "$v_x");
        assert_eq!(Binding::native("i", NativeType::I64).local_type(), LocalType::I64);
        assert_eq!(Binding::cell("acc").wat, "$c_acc");
    }
}
