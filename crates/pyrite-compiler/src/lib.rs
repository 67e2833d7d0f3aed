//! Pyrite Compiler
//!
//! Lowers a Python-like AST to WebAssembly text using the GC and
//! exception-handling proposals.
//!
//! ## Pipeline
//!
//! 1. **Inlining** ([`inline`]): small pure module functions are substituted
//!    into their call sites
//! 2. **Analysis** ([`analysis`], [`infer`]): lexical scopes, captures,
//!    module-wide return types and per-function escape and native-storage plans
//! 3. **Code generation** ([`FunctionCompiler`]): one forward pass per
//!    function body, with statements in `stmt`, expressions in `expr` and
//!    generators in [`generators`]
//! 4. **Assembly** ([`module`]): types, imports, globals, functions, the
//!    function table and the data section
//!
//! ## Modules
//!
//! - [`analysis`]: scope tree, effect summaries and yield points
//! - [`classes`]: class registry and slotted-attribute dispatchers
//! - [`config`]: optimization switches
//! - [`context`]: module-wide state shared by every function compile
//! - [`data`]: interned string and byte constants
//! - [`emit`]: WAT text emitter and structured jump bookkeeping
//! - [`host`]: `import js` interop
//! - [`layout`]: heap type definitions
//! - [`runtime`]: the runtime support library ABI
//! - [`scope`]: WAT locals

pub mod analysis;
pub mod classes;
pub mod config;
pub mod context;
pub mod data;
pub mod emit;
mod expr;
mod function_compiler;
pub mod generators;
pub mod host;
pub mod infer;
pub mod inline;
pub mod layout;
pub mod module;
pub mod runtime;
pub mod scope;
mod stmt;

pub use config::CompilerConfig;
pub use context::{CompiledFunction, FunctionFlags, ModuleContext, ModuleStats};
pub use function_compiler::FunctionCompiler;
pub use module::{CompiledModule, compile};

pub use pyrite_core::{CompileError, ErrorKind, Result};

#[cfg(test)]
pub(crate) mod test_support {
    //! Shared helpers for code generation tests.

    use pyrite_ast::{AstBuilder, Module, Stmt};

    use crate::{CompiledModule, CompilerConfig, Result};

    fn test_config() -> CompilerConfig {
        CompilerConfig {
            inline: false,
            comments: true,
            ..CompilerConfig::default()
        }
    }

    /// Compile `module` with inlining off and comments on.
    pub fn try_compile_module<'ast>(b: &AstBuilder<'ast>, module: Module<'ast>) -> Result<CompiledModule> {
        crate::compile(&module, b.arena(), &test_config())
    }

    pub fn compile_module_text<'ast>(b: &AstBuilder<'ast>, module: Module<'ast>) -> String {
        match try_compile_module(b, module) {
            Ok(compiled) => compiled.text,
            Err(err) => panic!("compile failed: {err}"),
        }
    }

    /// Compile a module holding just `def` and return the text of every
    /// function named `name`.
    pub fn compile_function_text<'ast>(b: &AstBuilder<'ast>, def: Stmt<'ast>, name: &str) -> String {
        let module = b.module(&[def]);
        let compiled = match try_compile_module(b, module) {
            Ok(compiled) => compiled,
            Err(err) => panic!("compile failed: {err}"),
        };
        match compiled.function_text(name) {
            Some(text) => text,
            None => panic!("no function named {name}"),
        }
    }
}
