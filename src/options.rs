//! Compile options.

use pyrite_compiler::CompilerConfig;

/// Options for [`compile_module`](crate::compile_module).
///
/// Every switch defaults to on. Turning an optimization off changes the
/// shape of the output but never what the compiled program does.
///
/// ```
/// use pyrite::CompileOptions;
///
/// let options = CompileOptions::new().inline(false).comments(false);
/// assert!(!options.inline);
/// assert!(options.native_locals);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Run the inlining optimizer.
    pub inline: bool,
    /// Allow unboxed numeric locals.
    pub native_locals: bool,
    /// Call eligible module functions without closure dispatch.
    pub direct_calls: bool,
    /// Elide bounds checks proven safe by a `range(len(...))` loop.
    pub safe_bounds: bool,
    /// Compile `__slots__` classes to fixed-layout records.
    pub slotted_layouts: bool,
    /// Emit `;;` annotation comments.
    pub comments: bool,
    /// Linear-memory offset of the first interned constant.
    pub data_offset: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self::from(&CompilerConfig::default())
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every optimization off.
    pub fn unoptimized() -> Self {
        Self::from(&CompilerConfig::unoptimized())
    }

    pub fn inline(mut self, enabled: bool) -> Self {
        self.inline = enabled;
        self
    }

    pub fn native_locals(mut self, enabled: bool) -> Self {
        self.native_locals = enabled;
        self
    }

    pub fn direct_calls(mut self, enabled: bool) -> Self {
        self.direct_calls = enabled;
        self
    }

    pub fn safe_bounds(mut self, enabled: bool) -> Self {
        self.safe_bounds = enabled;
        self
    }

    pub fn slotted_layouts(mut self, enabled: bool) -> Self {
        self.slotted_layouts = enabled;
        self
    }

    pub fn comments(mut self, enabled: bool) -> Self {
        self.comments = enabled;
        self
    }

    pub fn data_offset(mut self, offset: u32) -> Self {
        self.data_offset = offset;
        self
    }
}

impl From<&CompilerConfig> for CompileOptions {
    fn from(config: &CompilerConfig) -> Self {
        Self {
            inline: config.inline,
            native_locals: config.native_locals,
            direct_calls: config.direct_calls,
            safe_bounds: config.safe_bounds,
            slotted_layouts: config.slotted_layouts,
            comments: config.comments,
            data_offset: config.data_offset,
        }
    }
}

impl From<&CompileOptions> for CompilerConfig {
    fn from(options: &CompileOptions) -> Self {
        Self {
            inline: options.inline,
            native_locals: options.native_locals,
            direct_calls: options.direct_calls,
            safe_bounds: options.safe_bounds,
            slotted_layouts: options.slotted_layouts,
            comments: options.comments,
            data_offset: options.data_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_every_tier() {
        let options = CompileOptions::default();
        assert!(options.inline && options.native_locals && options.direct_calls);
        assert!(options.safe_bounds && options.slotted_layouts && options.comments);
        assert_eq!(options.data_offset, 2048);
    }

    #[test]
    fn unoptimized_round_trips_through_config() {
        let config = CompilerConfig::from(&CompileOptions::unoptimized());
        assert_eq!(config, CompilerConfig::unoptimized());
        assert!(!config.inline);
        assert!(!config.direct_calls);
    }

    #[test]
    fn setters_chain() {
        let options = CompileOptions::new().safe_bounds(false).data_offset(4096);
        assert!(!options.safe_bounds);
        assert_eq!(CompilerConfig::from(&options).data_offset, 4096);
    }
}
