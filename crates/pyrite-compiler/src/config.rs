//! Compiler configuration.
//!
//! Every optimization tier can be switched off independently. Turning a tier
//! off only changes the shape of the generated code, never the behaviour of
//! the compiled program.

/// Flags controlling a single module compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
    /// Run the inlining optimizer before code generation.
    pub inline: bool,
    /// Allow unboxed `i32`/`i64`/`f64` storage for proven numeric locals.
    pub native_locals: bool,
    /// Call captureless module-level functions without closure dispatch.
    pub direct_calls: bool,
    /// Skip bounds checks for `c[i]` inside `for i in range(len(c))`.
    pub safe_bounds: bool,
    /// Compile `__slots__` classes to fixed-layout records.
    pub slotted_layouts: bool,
    /// Emit `;;` annotation comments.
    pub comments: bool,
    /// Linear-memory offset of the first interned constant.
    pub data_offset: u32,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            inline: true,
            native_locals: true,
            direct_calls: true,
            safe_bounds: true,
            slotted_layouts: true,
            comments: true,
            data_offset: 2048,
        }
    }
}

impl CompilerConfig {
    /// A configuration with every optimization tier disabled.
    ///
    /// Useful as the reference side of output-equivalence tests.
    pub fn unoptimized() -> Self {
        Self {
            inline: false,
            native_locals: false,
            direct_calls: false,
            safe_bounds: false,
            slotted_layouts: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_everything() {
        let config = CompilerConfig::default();
        assert!(config.inline);
        assert!(config.native_locals);
        assert!(config.direct_calls);
        assert!(config.safe_bounds);
        assert!(config.slotted_layouts);
        assert_eq!(config.data_offset, 2048);
    }

    #[test]
    fn unoptimized_keeps_output_settings() {
        let config = CompilerConfig::unoptimized();
        assert!(!config.inline);
        assert!(!config.slotted_layouts);
        assert!(config.comments);
        assert_eq!(config.data_offset, 2048);
    }
}
