//! The Runtime Support Library contract.
//!
//! Generated code calls into a separately built runtime module (import
//! module `"rt"`). This file is the single source of truth for that ABI:
//! every operation the code generator may call is listed here with its
//! WebAssembly signature, and only the operations a module actually uses are
//! imported.
//!
//! Builtin callables (`print`, `len`, `ValueError`, ...) are imported with the
//! uniform closure signature and occupy the first slots of the shared
//! function table, in [`BUILTINS`] order.

use pyrite_core::{CompileError, Result, Span};
use rustc_hash::{FxHashMap, FxHashSet};

const EQ: &str = "(ref null eq)";
const EXC: &str = "(ref $EXCEPTION)";
const CLASS: &str = "(ref $CLASS)";

/// A runtime operation signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtFn {
    pub name: &'static str,
    pub params: &'static [&'static str],
    pub result: Option<&'static str>,
}

impl RtFn {
    const fn new(
        name: &'static str,
        params: &'static [&'static str],
        result: Option<&'static str>,
    ) -> Self {
        Self {
            name,
            params,
            result,
        }
    }

    /// The `(import ...)` declaration for this operation.
    pub fn import_decl(&self) -> String {
        let mut decl = format!("(import \"rt\" \"{0}\" (func ${0}", self.name);
        for param in self.params {
            decl.push_str(" (param ");
            decl.push_str(param);
            decl.push(')');
        }
        if let Some(result) = self.result {
            decl.push_str(" (result ");
            decl.push_str(result);
            decl.push(')');
        }
        decl.push_str("))");
        decl
    }
}

/// Every runtime operation generated code may call.
pub static RUNTIME_FUNCTIONS: &[RtFn] = &[
    // Numbers
    RtFn::new("pack_int", &["i64"], Some(EQ)),
    RtFn::new("to_i64", &[EQ], Some("i64")),
    RtFn::new("to_f64", &[EQ], Some("f64")),
    RtFn::new("is_truthy", &[EQ], Some("i32")),
    RtFn::new("i64_floordiv", &["i64", "i64"], Some("i64")),
    RtFn::new("i64_mod", &["i64", "i64"], Some("i64")),
    RtFn::new("i64_shl", &["i64", "i64"], Some("i64")),
    RtFn::new("i64_shr", &["i64", "i64"], Some("i64")),
    RtFn::new("f64_div", &["f64", "f64"], Some("f64")),
    RtFn::new("f64_floordiv", &["f64", "f64"], Some("f64")),
    RtFn::new("f64_mod", &["f64", "f64"], Some("f64")),
    RtFn::new("range_step_check", &["i64"], None),
    // Boxed arithmetic
    RtFn::new("binary_add", &[EQ, EQ], Some(EQ)),
    RtFn::new("binary_sub", &[EQ, EQ], Some(EQ)),
    RtFn::new("binary_mul", &[EQ, EQ], Some(EQ)),
    RtFn::new("binary_matmul", &[EQ, EQ], Some(EQ)),
    RtFn::new("binary_truediv", &[EQ, EQ], Some(EQ)),
    RtFn::new("binary_floordiv", &[EQ, EQ], Some(EQ)),
    RtFn::new("binary_mod", &[EQ, EQ], Some(EQ)),
    RtFn::new("binary_pow", &[EQ, EQ], Some(EQ)),
    RtFn::new("binary_lshift", &[EQ, EQ], Some(EQ)),
    RtFn::new("binary_rshift", &[EQ, EQ], Some(EQ)),
    RtFn::new("binary_or", &[EQ, EQ], Some(EQ)),
    RtFn::new("binary_xor", &[EQ, EQ], Some(EQ)),
    RtFn::new("binary_and", &[EQ, EQ], Some(EQ)),
    RtFn::new("inplace_add", &[EQ, EQ], Some(EQ)),
    RtFn::new("string_concat", &[EQ, EQ], Some(EQ)),
    RtFn::new("unary_neg", &[EQ], Some(EQ)),
    RtFn::new("unary_pos", &[EQ], Some(EQ)),
    RtFn::new("unary_invert", &[EQ], Some(EQ)),
    // Comparison
    RtFn::new("values_equal", &[EQ, EQ], Some("i32")),
    RtFn::new("compare_lt", &[EQ, EQ], Some("i32")),
    RtFn::new("compare_le", &[EQ, EQ], Some("i32")),
    RtFn::new("compare_gt", &[EQ, EQ], Some("i32")),
    RtFn::new("compare_ge", &[EQ, EQ], Some("i32")),
    // `item in container`, operands in source order
    RtFn::new("contains", &[EQ, EQ], Some("i32")),
    RtFn::new("isinstance", &[EQ, EQ], Some("i32")),
    RtFn::new("strings_equal", &[EQ, EQ], Some("i32")),
    // Objects and calls
    RtFn::new("object_getattr", &[EQ, EQ], Some(EQ)),
    RtFn::new("object_setattr", &[EQ, EQ, EQ], None),
    RtFn::new("object_delattr", &[EQ, EQ], None),
    RtFn::new("object_hasattr", &[EQ, EQ], Some("i32")),
    RtFn::new("call_value", &[EQ, EQ], Some(EQ)),
    RtFn::new("call_method", &[EQ, EQ, EQ], Some(EQ)),
    // Collections
    RtFn::new("list_new", &[], Some(EQ)),
    RtFn::new("list_append", &[EQ, EQ], None),
    RtFn::new("list_extend", &[EQ, EQ], None),
    RtFn::new("list_to_tuple", &[EQ], Some(EQ)),
    RtFn::new("list_sort", &[EQ, EQ, "i32"], None),
    RtFn::new("sorted_with_key", &[EQ, EQ, "i32"], Some(EQ)),
    RtFn::new("min_with_key", &[EQ, EQ], Some(EQ)),
    RtFn::new("max_with_key", &[EQ, EQ], Some(EQ)),
    RtFn::new("dict_new", &[], Some(EQ)),
    RtFn::new("dict_set", &[EQ, EQ, EQ], None),
    RtFn::new("dict_get", &[EQ, EQ], Some(EQ)),
    RtFn::new("dict_contains", &[EQ, EQ], Some("i32")),
    RtFn::new("dict_update", &[EQ, EQ], None),
    RtFn::new("dict_without_keys", &[EQ, EQ], Some(EQ)),
    RtFn::new("set_new", &[], Some(EQ)),
    RtFn::new("set_add", &[EQ, EQ], None),
    RtFn::new("print_with_sep_end", &[EQ, EQ, EQ], None),
    // Subscripts and sequences
    RtFn::new("subscript_get", &[EQ, EQ], Some(EQ)),
    RtFn::new("subscript_set", &[EQ, EQ, EQ], None),
    RtFn::new("subscript_delete", &[EQ, EQ], None),
    RtFn::new("slice_get", &[EQ, EQ, EQ, EQ], Some(EQ)),
    RtFn::new("slice_set", &[EQ, EQ, EQ, EQ, EQ], None),
    RtFn::new("slice_delete", &[EQ, EQ, EQ, EQ], None),
    RtFn::new("sequence_length", &[EQ], Some("i32")),
    RtFn::new("sequence_get", &[EQ, "i32"], Some(EQ)),
    RtFn::new("sequence_rest", &[EQ, "i32", "i32"], Some(EQ)),
    RtFn::new("is_sequence", &[EQ], Some("i32")),
    RtFn::new("is_mapping", &[EQ], Some("i32")),
    // Iteration and argument chains
    RtFn::new("iter_prepare", &[EQ], Some(EQ)),
    RtFn::new("iter_to_chain", &[EQ], Some(EQ)),
    RtFn::new("chain_concat", &[EQ, EQ], Some(EQ)),
    RtFn::new("chain_to_tuple", &[EQ], Some(EQ)),
    RtFn::new("unpack_sequence", &[EQ, "i32"], Some(EQ)),
    RtFn::new("unpack_sequence_star", &[EQ, "i32", "i32"], Some(EQ)),
    RtFn::new("extract_kwargs", &[EQ], Some(EQ)),
    RtFn::new("strip_kwargs", &[EQ], Some(EQ)),
    RtFn::new("missing_argument", &[EQ], None),
    RtFn::new("too_many_arguments", &[EQ], None),
    // Generators
    RtFn::new("generator_advance", &[EQ], Some("i32")),
    RtFn::new("generator_resume_value", &[EQ], Some(EQ)),
    // Exceptions
    RtFn::new("make_exception", &[EQ, EQ], Some(EXC)),
    RtFn::new("to_exception", &[EQ], Some(EXC)),
    RtFn::new("exception_set_cause", &[EXC, EQ], Some(EXC)),
    RtFn::new("exception_chain_context", &[EXC, EQ], Some(EXC)),
    RtFn::new("exception_matches", &[EXC, EQ], Some("i32")),
    RtFn::new("exception_class", &[EXC], Some(EQ)),
    RtFn::new("register_exception_class", &[EQ, EQ], None),
    // Classes
    RtFn::new("make_class", &[EQ, EQ], Some(CLASS)),
    RtFn::new("class_set_attr", &[CLASS, EQ, EQ], None),
    RtFn::new("class_get_attr", &[CLASS, EQ], Some(EQ)),
    RtFn::new("make_super", &[EQ, EQ], Some(EQ)),
    RtFn::new("match_positional", &[EQ, EQ, "i32"], Some(EQ)),
    // Strings and modules
    RtFn::new("to_str", &[EQ], Some(EQ)),
    RtFn::new("repr", &[EQ], Some(EQ)),
    RtFn::new("ascii", &[EQ], Some(EQ)),
    RtFn::new("format_value", &[EQ, EQ], Some(EQ)),
    RtFn::new("import_module", &[EQ], Some(EQ)),
];

/// Builtin callables, in function-table order.
pub static BUILTINS: &[&str] = &[
    "print",
    "len",
    "range",
    "int",
    "float",
    "str",
    "bool",
    "list",
    "dict",
    "set",
    "tuple",
    "frozenset",
    "bytes",
    "abs",
    "min",
    "max",
    "sum",
    "sorted",
    "reversed",
    "enumerate",
    "zip",
    "map",
    "filter",
    "any",
    "all",
    "isinstance",
    "issubclass",
    "hasattr",
    "getattr",
    "setattr",
    "delattr",
    "type",
    "repr",
    "ascii",
    "chr",
    "ord",
    "hex",
    "bin",
    "oct",
    "round",
    "pow",
    "divmod",
    "hash",
    "id",
    "iter",
    "next",
    "callable",
    "format",
    "object",
    "input",
    "BaseException",
    "Exception",
    "ArithmeticError",
    "AssertionError",
    "AttributeError",
    "GeneratorExit",
    "IndexError",
    "KeyError",
    "LookupError",
    "NameError",
    "NotImplementedError",
    "OverflowError",
    "RecursionError",
    "RuntimeError",
    "StopIteration",
    "TypeError",
    "UnboundLocalError",
    "ValueError",
    "ZeroDivisionError",
];

/// Singleton values the runtime exports as immutable `(ref eq)` globals.
///
/// `MISSING` marks a positional argument slot left for a keyword or default
/// to fill.
pub static RUNTIME_GLOBALS: &[&str] = &["TRUE", "FALSE", "ELLIPSIS", "MISSING"];

/// Declaration of every runtime global import.
pub fn global_imports() -> impl Iterator<Item = String> {
    RUNTIME_GLOBALS
        .iter()
        .map(|name| format!("(import \"rt\" \"{name}\" (global ${name} (ref eq)))"))
}

/// Modules the runtime can bind with `import`.
pub static RUNTIME_MODULES: &[&str] = &["math", "random", "time", "sys", "typing"];

/// Table index of a builtin callable.
pub fn builtin_index(name: &str) -> Option<u32> {
    BUILTINS.iter().position(|b| *b == name).map(|i| i as u32)
}

/// Whether `name` is a builtin exception class.
pub fn is_builtin_exception(name: &str) -> bool {
    builtin_index(name).is_some_and(|i| i as usize >= first_exception_index())
}

fn first_exception_index() -> usize {
    BUILTINS
        .iter()
        .position(|b| *b == "BaseException")
        .unwrap_or(BUILTINS.len())
}

/// The WAT function name of a builtin.
pub fn builtin_func_name(name: &str) -> String {
    format!("$builtin_{name}")
}

/// Declaration of every builtin import, in table order.
pub fn builtin_imports() -> impl Iterator<Item = String> {
    BUILTINS.iter().map(|name| {
        format!("(import \"rt\" \"builtin_{name}\" (func $builtin_{name} (type $FUNC)))")
    })
}

/// Tracks which runtime operations a module references.
#[derive(Debug)]
pub struct RuntimeUsage {
    index: FxHashMap<&'static str, &'static RtFn>,
    used: FxHashSet<&'static str>,
}

impl Default for RuntimeUsage {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeUsage {
    pub fn new() -> Self {
        let index = RUNTIME_FUNCTIONS.iter().map(|f| (f.name, f)).collect();
        Self {
            index,
            used: FxHashSet::default(),
        }
    }

    /// Record a use of `name`, failing if the runtime has no such operation.
    pub fn require(&mut self, name: &str, span: Span) -> Result<&'static RtFn> {
        let Some(&func) = self.index.get(name) else {
            return Err(CompileError::internal(
                format!("unknown runtime operation '{name}'"),
                span,
            ));
        };
        self.used.insert(func.name);
        Ok(func)
    }

    pub fn is_used(&self, name: &str) -> bool {
        self.used.contains(name)
    }

    pub fn used_count(&self) -> usize {
        self.used.len()
    }

    /// Import declarations for every used operation, in table order.
    pub fn imports(&self) -> impl Iterator<Item = String> + '_ {
        RUNTIME_FUNCTIONS
            .iter()
            .filter(|f| self.used.contains(f.name))
            .map(RtFn::import_decl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_declaration_shape() {
        let mut usage = RuntimeUsage::new();
        let func = usage.require("values_equal", Span::default()).unwrap();
        assert_eq!(
            func.import_decl(),
            "(import \"rt\" \"values_equal\" (func $values_equal (param (ref null eq)) (param (ref null eq)) (result i32)))"
        );
    }

    #[test]
    fn unknown_operation_is_internal_error() {
        let mut usage = RuntimeUsage::new();
        let err = usage.require("does_not_exist", Span::new(3, 1)).unwrap_err();
        assert_eq!(err.kind(), pyrite_core::ErrorKind::InternalInvariant);
    }

    #[test]
    fn only_used_operations_are_imported() {
        let mut usage = RuntimeUsage::new();
        usage.require("to_str", Span::default()).unwrap();
        usage.require("to_str", Span::default()).unwrap();
        usage.require("pack_int", Span::default()).unwrap();
        let imports: Vec<_> = usage.imports().collect();
        assert_eq!(imports.len(), 2);
        // Table order, not request order.
        assert!(imports[0].contains("$pack_int"));
        assert!(imports[1].contains("$to_str"));
    }

    #[test]
    fn builtin_table_layout() {
        assert_eq!(builtin_index("print"), Some(0));
        assert_eq!(builtin_index("len"), Some(1));
        assert_eq!(builtin_index("nope"), None);
        assert!(is_builtin_exception("ValueError"));
        assert!(!is_builtin_exception("len"));
        assert_eq!(builtin_func_name("print"), "$builtin_print");
    }

    #[test]
    fn singleton_globals_are_immutable_refs() {
        let imports: Vec<_> = global_imports().collect();
        assert_eq!(imports.len(), RUNTIME_GLOBALS.len());
        assert_eq!(imports[0], "(import \"rt\" \"TRUE\" (global $TRUE (ref eq)))");
    }

    #[test]
    fn runtime_table_has_no_duplicates() {
        let mut seen = FxHashSet::default();
        for func in RUNTIME_FUNCTIONS {
            assert!(seen.insert(func.name), "duplicate {}", func.name);
        }
        let mut seen = FxHashSet::default();
        for name in BUILTINS {
            assert!(seen.insert(*name), "duplicate builtin {name}");
        }
    }
}
