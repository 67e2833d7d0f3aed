//! Whole-module compilation and assembly.
//!
//! [`compile`] runs the pipeline (inlining, scope analysis, module facts,
//! the module body and everything it defines) and then lays the pieces out
//! in a fixed order:
//!
//! ```text
//! (module
//!   (rec ...types...)           heap types, then one record per slotted class
//!   (import "rt" ...)           memory, heap pointer, exception tag,
//!                               used runtime operations, globals, builtins
//!   (import "env"/"js" ...)     host operations
//!   (global $global_x ...)      module names functions can observe
//!   (func $user_func_N ...)     index 0 is the module body
//!   (func $slotted_getattr ...) only with slotted classes
//!   (func $_start ...)
//!   (func $event_callback ...)  only with `import js`
//!   (table $table ...) (elem ...)
//!   (data ...))
//! ```

use bumpalo::Bump;
use pyrite_ast::Module;
use pyrite_core::{CompileError, Result, Span};

use crate::analysis::ScopeTree;
use crate::config::CompilerConfig;
use crate::context::{CompiledFunction, FunctionFlags, ModuleContext, ModuleStats, function_name, global_name};
use crate::function_compiler::{FunctionCompiler, uniform_header};
use crate::host::event_callback;
use crate::infer::ModuleFacts;
use crate::layout;
use crate::runtime::{BUILTINS, builtin_func_name, builtin_imports, global_imports};

/// The result of compiling one module.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    /// Complete WAT text.
    pub text: String,
    pub stats: ModuleStats,
    /// Every user function, in index order.
    pub functions: Vec<CompiledFunction>,
}

impl CompiledModule {
    /// Text of every function compiled from a source-level `name`.
    pub fn function_text(&self, name: &str) -> Option<String> {
        let texts: Vec<&str> = self
            .functions
            .iter()
            .filter(|f| f.name == name)
            .map(|f| f.text.as_str())
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        }
    }
}

/// Compile `module` to WebAssembly text.
///
/// Nodes created by the inliner are allocated in `arena`. The first error
/// aborts the compile; nothing is returned for a module that fails.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn compile<'ast>(
    module: &Module<'ast>,
    arena: &'ast Bump,
    config: &CompilerConfig,
) -> Result<CompiledModule> {
    let (module, inlined) = if config.inline {
        crate::inline::inline_module(module, arena)?
    } else {
        (*module, 0)
    };

    let tree = ScopeTree::build(&module)?;
    let facts = ModuleFacts::build(&module, &tree);
    let mut ctx = ModuleContext::new(config, &tree, &facts, &module);
    ctx.stats.inlined_calls = inlined;

    let mut body = FunctionCompiler::new(&mut ctx, 0, 0, "<module>", FunctionFlags::MODULE_BODY);
    body.analyze(None, module.body);
    body.emit_frame();
    body.compile_body(module.body)?;
    body.push_none();
    let flags = body.flags;
    let (text, instructions) = body.finish_text(&uniform_header(0));
    ctx.define_function(CompiledFunction {
        index: 0,
        name: "<module>".to_string(),
        text,
        flags,
        instructions,
    });

    assemble(ctx, &tree)
}

/// Lay out the module text from a fully compiled context.
fn assemble(mut ctx: ModuleContext<'_, '_>, tree: &ScopeTree<'_>) -> Result<CompiledModule> {
    let comments = ctx.config.comments;
    let dispatchers = ctx
        .classes
        .dispatchers(&mut ctx.strings, &mut ctx.runtime, comments)?;
    if ctx.host.enabled() {
        ctx.runtime.require("sequence_get", Span::default())?;
        ctx.runtime.require("call_value", Span::default())?;
    }

    let mut functions = Vec::with_capacity(ctx.function_count());
    for (index, function) in ctx.functions() {
        let Some(function) = function else {
            return Err(CompileError::internal(
                format!("function {index} was reserved but never defined"),
                Span::default(),
            ));
        };
        functions.push(function.clone());
    }

    let mut out = String::with_capacity(functions.iter().map(|f| f.text.len()).sum::<usize>() + 16 * 1024);
    out.push_str("(module\n");

    // ==========================================================================
    // Types
    // ==========================================================================
    out.push_str("  (rec\n");
    for def in layout::type_definitions().chain(ctx.classes.type_definitions()) {
        push_line(&mut out, 2, &def);
    }
    out.push_str("  )\n");

    // ==========================================================================
    // Imports
    // ==========================================================================
    push_line(&mut out, 1, "(import \"rt\" \"memory\" (memory 1))");
    push_line(&mut out, 1, "(import \"rt\" \"heap_ptr\" (global $heap_ptr (mut i32)))");
    push_line(&mut out, 1, "(import \"rt\" \"exception\" (tag $exc (param (ref $EXCEPTION))))");
    for decl in ctx.runtime.imports() {
        push_line(&mut out, 1, &decl);
    }
    for decl in global_imports() {
        push_line(&mut out, 1, &decl);
    }
    for decl in builtin_imports() {
        push_line(&mut out, 1, &decl);
    }
    for decl in ctx.host.imports() {
        push_line(&mut out, 1, &decl);
    }

    // ==========================================================================
    // Globals
    // ==========================================================================
    for decl in ctx.host.globals() {
        push_line(&mut out, 1, &decl);
    }
    for name in tree.module_globals() {
        push_line(
            &mut out,
            1,
            &format!("(global {} (mut (ref null eq)) (ref.null eq))", global_name(name)),
        );
    }

    // ==========================================================================
    // Functions
    // ==========================================================================
    for function in &functions {
        push_block(&mut out, &function.text);
    }
    for dispatcher in &dispatchers {
        push_block(&mut out, dispatcher);
    }
    let heap_start = align8(ctx.strings.end());
    push_block(&mut out, &start_function(heap_start));
    if ctx.host.enabled() {
        push_block(&mut out, &event_callback());
    }

    // ==========================================================================
    // Table and data
    // ==========================================================================
    let table_size = BUILTINS.len() + functions.len();
    push_line(&mut out, 1, &format!("(table $table {table_size} funcref)"));
    let mut elem = String::from("(elem (table $table) (i32.const 0) func");
    for name in BUILTINS {
        elem.push(' ');
        elem.push_str(&builtin_func_name(name));
    }
    for function in &functions {
        elem.push(' ');
        elem.push_str(&function_name(function.index));
    }
    elem.push(')');
    push_line(&mut out, 1, &elem);
    for segment in ctx.strings.segments() {
        push_line(&mut out, 1, &segment);
    }
    out.push(')');
    out.push('\n');

    ctx.stats.runtime_imports = ctx.runtime.used_count();
    ctx.stats.data_bytes = (ctx.strings.end() - ctx.strings.base()) as usize;
    ctx.stats.slotted_classes = ctx.classes.slotted_count();
    tracing::debug!(
        functions = ctx.stats.functions,
        instructions = ctx.stats.instructions,
        inlined = ctx.stats.inlined_calls,
        direct = ctx.stats.direct_functions,
        slotted = ctx.stats.slotted_classes,
        runtime_imports = ctx.stats.runtime_imports,
        data_bytes = ctx.stats.data_bytes,
        "module assembled"
    );

    Ok(CompiledModule {
        text: out,
        stats: ctx.stats,
        functions,
    })
}

/// `_start`: place the heap after the data section and run the module body.
fn start_function(heap_start: u32) -> String {
    [
        "(func $_start (export \"_start\") (result i32)".to_string(),
        format!("  i32.const {heap_start}"),
        "  global.set $heap_ptr".to_string(),
        "  ref.null eq".to_string(),
        "  ref.null $ENV".to_string(),
        format!("  call {}", function_name(0)),
        "  drop".to_string(),
        "  i32.const 0)".to_string(),
    ]
    .join("\n")
}

fn align8(offset: u32) -> u32 {
    (offset + 7) & !7
}

fn push_line(out: &mut String, indent: usize, line: &str) {
    for _ in 0..indent {
        out.push_str("  ");
    }
    out.push_str(line);
    out.push('\n');
}

/// Append a multi-line item, indenting every line one level.
fn push_block(out: &mut String, text: &str) {
    for line in text.lines() {
        push_line(out, 1, line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyrite_ast::*;

    fn config() -> CompilerConfig {
        CompilerConfig {
            inline: false,
            ..CompilerConfig::default()
        }
    }

    #[test]
    fn sections_appear_in_order() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[b.expr_stmt(b.call_name("print", &[b.str("hi")]))]);
        let compiled = compile(&module, &arena, &config()).unwrap();
        let text = &compiled.text;
        let position = |needle: &str| text.find(needle).unwrap_or_else(|| panic!("missing {needle}"));
        assert!(position("(rec") < position("(import \"rt\" \"memory\""));
        assert!(position("(import \"env\" \"format_float\"") < position("(func $user_func_0"));
        assert!(position("(func $user_func_0") < position("(func $_start"));
        assert!(position("(func $_start") < position("(table $table"));
        assert!(position("(elem") < position("(data (i32.const 2048)"));
        assert!(text.ends_with(")\n"));
    }

    #[test]
    fn table_lists_builtins_then_user_functions() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[b.func("f", &[], &[b.pass()])]);
        let compiled = compile(&module, &arena, &config()).unwrap();
        let elem = compiled
            .text
            .lines()
            .find(|l| l.trim_start().starts_with("(elem"))
            .unwrap();
        assert!(elem.contains(&format!("{} $user_func_0 $user_func_1)", builtin_func_name(BUILTINS[BUILTINS.len() - 1]))));
        assert!(compiled.text.contains(&format!("(table $table {} funcref)", BUILTINS.len() + 2)));
        assert_eq!(compiled.stats.functions, 2);
    }

    #[test]
    fn observed_module_names_become_globals() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[
            b.assign_name("limit", b.int(10)),
            b.assign_name("scratch", b.int(0)),
            b.func("get", &[], &[b.ret(Some(b.name("limit")))]),
        ]);
        let compiled = compile(&module, &arena, &config()).unwrap();
        assert!(compiled.text.contains("(global $global_limit (mut (ref null eq)) (ref.null eq))"));
        assert!(!compiled.text.contains("$global_scratch"));
    }

    #[test]
    fn only_used_runtime_operations_are_imported() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[b.assign_name("x", b.int(1))]);
        let compiled = compile(&module, &arena, &config()).unwrap();
        assert!(!compiled.text.contains("(func $call_method"));
        let rt_imports = compiled.text.matches("(import \"rt\" \"").count();
        let fixed = 3 + crate::runtime::RUNTIME_GLOBALS.len() + BUILTINS.len();
        assert_eq!(compiled.stats.runtime_imports, rt_imports - fixed);
    }

    #[test]
    fn heap_starts_after_data() {
        assert_eq!(align8(2048), 2048);
        assert_eq!(align8(2051), 2056);
        assert!(start_function(2056).contains("i32.const 2056\n  global.set $heap_ptr"));
    }

    #[test]
    fn host_interop_adds_event_callback() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[b.import(&["js"])]);
        let compiled = compile(&module, &arena, &config()).unwrap();
        assert!(compiled.text.contains("(func $event_callback (export \"event_callback\")"));
        assert!(compiled.text.contains("(global $js_callbacks"));
        assert!(compiled.text.contains("(func $call_value"));
    }

    #[test]
    fn inliner_runs_when_enabled() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[
            b.func("sq", &["x"], &[b.ret(Some(b.bin(b.name("x"), pyrite_core::BinaryOp::Mult, b.name("x"))))]),
            b.expr_stmt(b.call_name("print", &[b.call_name("sq", &[b.int(3)])])),
        ]);
        let compiled = compile(&module, &arena, &CompilerConfig::default()).unwrap();
        assert_eq!(compiled.stats.inlined_calls, 1);
    }
}
