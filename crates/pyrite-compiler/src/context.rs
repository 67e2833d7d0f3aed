//! Module-wide compilation state.
//!
//! A [`ModuleContext`] lives for one module compile and is shared, through
//! `&mut` reborrows, by every [`FunctionCompiler`](crate::FunctionCompiler)
//! in it. It owns everything that ends up at module level: the function
//! list, the string pool, runtime and host import usage, the class registry
//! and the label counter.

use bitflags::bitflags;
use pyrite_ast::{Module, Stmt};
use rustc_hash::FxHashMap;

use crate::analysis::{NodeKey, ScopeTree};
use crate::classes::ClassRegistry;
use crate::config::CompilerConfig;
use crate::data::StringPool;
use crate::host::HostUsage;
use crate::infer::ModuleFacts;
use crate::runtime::{BUILTINS, RuntimeUsage};

bitflags! {
    /// Properties of one compiled function.
    ///
    /// Flags are decided before the body is compiled and drive the shape of
    /// its prologue and epilogue.
    ///
    /// ```ignore
    /// let flags = FunctionFlags::METHOD | FunctionFlags::HAS_FRAME;
    /// assert!(flags.contains(FunctionFlags::HAS_FRAME));
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FunctionFlags: u16 {
        /// The module body (`$user_func_0`).
        const MODULE_BODY = 1 << 0;
        /// A `lambda` expression.
        const LAMBDA = 1 << 1;
        /// Defined directly in a class body.
        const METHOD = 1 << 2;
        /// Body of a generator; resumable through a dispatch on `$resume`.
        const GENERATOR = 1 << 3;
        /// Allocates a closure frame for captured locals.
        const HAS_FRAME = 1 << 4;
        /// Also has a positional entry point for direct calls.
        const DIRECT = 1 << 5;
        /// Takes `*args`.
        const VARARGS = 1 << 6;
        /// Takes `**kwargs`.
        const KWARGS = 1 << 7;
        /// Has default values; its environment is wrapped.
        const DEFAULTS = 1 << 8;
        /// Has keyword-only parameters.
        const KWONLY = 1 << 9;
        /// Allocator of a slotted class.
        const SLOT_ALLOC = 1 << 10;
        /// Factory that creates a generator record.
        const GENERATOR_FACTORY = 1 << 11;
    }
}

/// A function ready for module assembly.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub index: u32,
    /// Source-level name, for comments and logs.
    pub name: String,
    /// Complete `(func ...)` text, including any direct entry point.
    pub text: String,
    pub flags: FunctionFlags,
    pub instructions: usize,
}

/// Counters reported alongside the generated text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleStats {
    pub functions: usize,
    pub instructions: usize,
    pub inlined_calls: usize,
    pub native_locals: usize,
    pub direct_functions: usize,
    pub slotted_classes: usize,
    pub generators: usize,
    pub runtime_imports: usize,
    pub data_bytes: usize,
}

/// A module function callable without closure dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectTarget {
    pub index: u32,
    pub arity: usize,
}

/// State shared by every function of one module.
pub struct ModuleContext<'c, 'ast> {
    pub config: &'c CompilerConfig,
    pub tree: &'c ScopeTree<'ast>,
    pub facts: &'c ModuleFacts<'ast>,
    pub classes: ClassRegistry<'ast>,
    pub strings: StringPool,
    pub runtime: RuntimeUsage,
    pub host: HostUsage,
    pub stats: ModuleStats,
    functions: Vec<Option<CompiledFunction>>,
    reserved: FxHashMap<NodeKey, u32>,
    direct: FxHashMap<&'ast str, DirectTarget>,
    labels: u32,
}

impl<'c, 'ast> ModuleContext<'c, 'ast> {
    pub fn new(
        config: &'c CompilerConfig,
        tree: &'c ScopeTree<'ast>,
        facts: &'c ModuleFacts<'ast>,
        module: &Module<'ast>,
    ) -> Self {
        let mut ctx = Self {
            config,
            tree,
            facts,
            classes: ClassRegistry::collect(module, tree, config),
            strings: StringPool::new(config.data_offset),
            runtime: RuntimeUsage::new(),
            host: HostUsage::new(module),
            stats: ModuleStats::default(),
            functions: Vec::new(),
            reserved: FxHashMap::default(),
            direct: FxHashMap::default(),
            labels: 0,
        };
        // Index 0 is always the module body.
        ctx.reserve_function();
        if config.direct_calls {
            ctx.reserve_direct_targets(module);
        }
        ctx
    }

    /// Module functions bound once, undecorated, with a fixed positional
    /// signature and no defaults get their index up front, so calls that
    /// precede the `def` can still be direct.
    fn reserve_direct_targets(&mut self, module: &Module<'ast>) {
        for stmt in module.body {
            let Stmt::FunctionDef(func) = stmt else {
                continue;
            };
            let Some(scope_id) = self.tree.scope_of(*func) else {
                continue;
            };
            let eligible = self.tree.module_binding_count(func.name) == 1
                && func.decorators.is_empty()
                && func.args.is_simple()
                && func.args.defaults.is_empty()
                && !self.tree.get(scope_id).is_generator;
            if !eligible {
                continue;
            }
            let index = self.reserve_function();
            self.reserved.insert(NodeKey::of(*func), index);
            self.direct.insert(
                func.name,
                DirectTarget {
                    index,
                    arity: func.args.args.len(),
                },
            );
            tracing::trace!(function = func.name, index, "direct call target");
        }
    }

    // ==========================================================================
    // Functions
    // ==========================================================================

    /// Allocate the next function index.
    pub fn reserve_function(&mut self) -> u32 {
        self.functions.push(None);
        (self.functions.len() - 1) as u32
    }

    /// The index for a `def` or `lambda` node, reserving one if needed.
    pub fn function_index(&mut self, node: NodeKey) -> u32 {
        if let Some(&index) = self.reserved.get(&node) {
            return index;
        }
        let index = self.reserve_function();
        self.reserved.insert(node, index);
        index
    }

    pub fn define_function(&mut self, function: CompiledFunction) {
        let slot = function.index as usize;
        self.stats.functions += 1;
        self.stats.instructions += function.instructions;
        if function.flags.contains(FunctionFlags::DIRECT) {
            self.stats.direct_functions += 1;
        }
        if function.flags.contains(FunctionFlags::GENERATOR) {
            self.stats.generators += 1;
        }
        if slot < self.functions.len() {
            self.functions[slot] = Some(function);
        }
    }

    /// Compiled functions in index order. Reserved but never defined
    /// indices are reported as `None`.
    pub fn functions(&self) -> impl Iterator<Item = (u32, Option<&CompiledFunction>)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (i as u32, f.as_ref()))
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn direct_target(&self, name: &str) -> Option<DirectTarget> {
        self.direct.get(name).copied()
    }

    /// Function-table slot of a user function; builtins come first.
    pub fn table_index(&self, index: u32) -> u32 {
        BUILTINS.len() as u32 + index
    }

    // ==========================================================================
    // Names
    // ==========================================================================

    /// A module-unique label with the given prefix.
    pub fn label(&mut self, prefix: &str) -> String {
        self.labels += 1;
        format!("${prefix}_{}", self.labels)
    }

    /// Intern a string constant, returning `(offset, length)`.
    pub fn string(&mut self, value: &str) -> (u32, u32) {
        self.strings.intern_str(value)
    }
}

/// The WAT name of user function `index`.
pub fn function_name(index: u32) -> String {
    format!("$user_func_{index}")
}

/// The WAT name of the positional entry point of user function `index`.
pub fn direct_name(index: u32) -> String {
    format!("$user_func_{index}_direct")
}

/// The WAT name of the global holding module variable `name`.
pub fn global_name(name: &str) -> String {
    format!("$global_{}", crate::scope::mangle(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;
    use pyrite_ast::AstBuilder;

    #[test]
    fn direct_targets_are_reserved_after_module_body() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[
            b.func("first", &["a"], &[b.ret(Some(b.name("a")))]),
            b.func_def(
                "decorated",
                b.params(&[]),
                &[b.pass()],
                &[b.name("staticmethod")],
            ),
            b.func("second", &[], &[b.pass()]),
        ]);
        let tree = ScopeTree::build(&module).unwrap();
        let facts = ModuleFacts::build(&module, &tree);
        let config = CompilerConfig::default();
        let ctx = ModuleContext::new(&config, &tree, &facts, &module);

        assert_eq!(ctx.direct_target("first"), Some(DirectTarget { index: 1, arity: 1 }));
        assert_eq!(ctx.direct_target("second").map(|t| t.index), Some(2));
        assert!(ctx.direct_target("decorated").is_none());
        assert_eq!(ctx.function_count(), 3);
    }

    #[test]
    fn direct_calls_can_be_disabled() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[b.func("f", &[], &[b.pass()])]);
        let tree = ScopeTree::build(&module).unwrap();
        let facts = ModuleFacts::build(&module, &tree);
        let config = CompilerConfig::unoptimized();
        let ctx = ModuleContext::new(&config, &tree, &facts, &module);
        assert!(ctx.direct_target("f").is_none());
        assert_eq!(ctx.function_count(), 1);
    }

    #[test]
    fn labels_and_table_slots() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[]);
        let tree = ScopeTree::build(&module).unwrap();
        let facts = ModuleFacts::build(&module, &tree);
        let config = CompilerConfig::default();
        let mut ctx = ModuleContext::new(&config, &tree, &facts, &module);
        assert_ne!(ctx.label("brk"), ctx.label("brk"));
        assert_eq!(ctx.table_index(0), BUILTINS.len() as u32);
        assert_eq!(global_name("total"), "$global_total");
        assert_eq!(direct_name(4), "$user_func_4_direct");
    }

    #[test]
    fn flags_compose() {
        let flags = FunctionFlags::METHOD | FunctionFlags::HAS_FRAME;
        assert!(flags.contains(FunctionFlags::HAS_FRAME));
        assert!(!flags.contains(FunctionFlags::GENERATOR));
    }
}
