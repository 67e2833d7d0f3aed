//! The compiled module.

use std::fmt;

use pyrite_compiler::{CompiledModule, FunctionFlags, ModuleStats};

/// Summary of one compiled user function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    /// Index in the function table, after the builtins.
    pub index: u32,
    pub name: String,
    pub flags: FunctionFlags,
    pub instructions: usize,
}

/// WebAssembly text ready for an assembler, plus what went into it.
#[derive(Debug, Clone)]
pub struct WatModule {
    text: String,
    stats: ModuleStats,
    functions: Vec<FunctionInfo>,
}

impl WatModule {
    /// The complete `(module ...)` text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn stats(&self) -> &ModuleStats {
        &self.stats
    }

    /// User functions in index order. Index 0 is the module body.
    pub fn functions(&self) -> &[FunctionInfo] {
        &self.functions
    }

    /// The first function compiled from a source-level `name`.
    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn generator_count(&self) -> usize {
        self.functions
            .iter()
            .filter(|f| f.flags.contains(FunctionFlags::GENERATOR))
            .count()
    }
}

impl From<CompiledModule> for WatModule {
    fn from(compiled: CompiledModule) -> Self {
        let functions = compiled
            .functions
            .iter()
            .map(|f| FunctionInfo {
                index: f.index,
                name: f.name.clone(),
                flags: f.flags,
                instructions: f.instructions,
            })
            .collect();
        Self {
            text: compiled.text,
            stats: compiled.stats,
            functions,
        }
    }
}

impl fmt::Display for WatModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
