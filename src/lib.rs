//! Pyrite: a Python-subset to WebAssembly compiler.
//!
//! The input is an AST built in a [`bumpalo::Bump`] arena (by a front-end
//! parser, or with [`AstBuilder`](pyrite_ast::AstBuilder)). The output is a
//! WebAssembly text module using the GC and exception-handling proposals,
//! linked at instantiation against a separately built runtime support
//! library.
//!
//! ```
//! use bumpalo::Bump;
//! use pyrite::prelude::*;
//!
//! let arena = Bump::new();
//! let b = AstBuilder::new(&arena);
//! let module = b.module(&[b.expr_stmt(b.call_name("print", &[b.int(3)]))]);
//!
//! let wat = compile_module(&module, &arena, &CompileOptions::default()).unwrap();
//! assert!(wat.text().starts_with("(module"));
//! ```
//!
//! Compilation either produces a complete module or fails with the first
//! [`CompileError`]; there is no partial output.

mod options;
mod wat;

use bumpalo::Bump;
use pyrite_ast::Module;
use pyrite_compiler::CompilerConfig;

pub use options::CompileOptions;
pub use pyrite_compiler::{FunctionFlags, ModuleStats};
pub use pyrite_core::{CompileError, ErrorKind, Result, Span};
pub use wat::{FunctionInfo, WatModule};

pub use pyrite_ast as ast;

/// Compile a module to WebAssembly text.
///
/// Nodes the optimizer creates are allocated in `arena`, which is usually
/// the arena that holds `module`.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn compile_module<'ast>(
    module: &Module<'ast>,
    arena: &'ast Bump,
    options: &CompileOptions,
) -> Result<WatModule> {
    let config = CompilerConfig::from(options);
    tracing::debug!(
        statements = module.body.len(),
        inline = config.inline,
        native_locals = config.native_locals,
        "compiling module"
    );
    let compiled = pyrite_compiler::compile(module, arena, &config)?;
    Ok(WatModule::from(compiled))
}

pub mod prelude {
    pub use crate::{CompileError, CompileOptions, Result, WatModule, compile_module};
    pub use pyrite_ast::{AstBuilder, Module};
}
