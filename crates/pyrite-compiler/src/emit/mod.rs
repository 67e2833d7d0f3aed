//! WAT text emitter.
//!
//! The [`WatEmitter`] writes flat (unfolded) WebAssembly text, one
//! instruction per line, tracking indentation for structured control
//! instructions. Each function body gets its own emitter; nested functions
//! are compiled into fresh emitters and spliced into the module afterwards.
//!
//! # Example
//!
//! ```ignore
//! let mut emitter = WatEmitter::new(true);
//! emitter.block("$done", None);
//! emitter.emit("local.get $x");
//! emitter.emit("br_if $done");
//! emitter.end();
//! let body = emitter.finish();
//! ```

mod jumps;

pub use jumps::{JumpKind, JumpStack, Route};

/// Emits WAT instructions into a text buffer.
#[derive(Debug)]
pub struct WatEmitter {
    /// Emitted text
    out: String,
    /// Current structured-control depth
    depth: usize,
    /// Base indentation (function body level)
    base_indent: usize,
    /// Whether `;;` comments are written
    comments: bool,
    /// Instruction count, for statistics
    instructions: usize,
}

impl WatEmitter {
    /// Create an emitter for a function body.
    pub fn new(comments: bool) -> Self {
        Self {
            out: String::new(),
            depth: 0,
            base_indent: 2,
            comments,
            instructions: 0,
        }
    }

    // ==========================================================================
    // Basic Emission
    // ==========================================================================

    /// Emit a single instruction line.
    pub fn emit(&mut self, instr: impl AsRef<str>) {
        self.write_line(instr.as_ref());
        self.instructions += 1;
    }

    /// Emit a `;;` comment, if comments are enabled.
    pub fn comment(&mut self, text: impl AsRef<str>) {
        if self.comments {
            let line = format!(";; {}", text.as_ref());
            self.write_line(&line);
        }
    }

    fn write_line(&mut self, text: &str) {
        for _ in 0..(self.base_indent + self.depth * 2) {
            self.out.push(' ');
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    /// Append pre-rendered lines (already indented relative to column 0).
    pub fn splice(&mut self, text: &str) {
        self.out.push_str(text);
    }

    // ==========================================================================
    // Structured Control
    // ==========================================================================

    /// Open `block` with a label and optional result type.
    pub fn block(&mut self, label: &str, result: Option<&str>) {
        self.open("block", label, result);
    }

    /// Open `loop` with a label.
    pub fn loop_(&mut self, label: &str) {
        self.open("loop", label, None);
    }

    /// Open `if` with an optional result type.
    pub fn if_(&mut self, result: Option<&str>) {
        match result {
            Some(ty) => self.emit(format!("if (result {ty})")),
            None => self.emit("if"),
        }
        self.depth += 1;
    }

    /// Switch to the `else` arm of the innermost `if`.
    pub fn else_(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.emit("else");
        self.depth += 1;
    }

    /// Open a `try_table` with the given catch clauses.
    pub fn try_table(&mut self, catches: &str) {
        self.emit(format!("try_table {catches}"));
        self.depth += 1;
    }

    /// Close the innermost structured instruction.
    pub fn end(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.emit("end");
    }

    fn open(&mut self, kind: &str, label: &str, result: Option<&str>) {
        match result {
            Some(ty) => self.emit(format!("{kind} {label} (result {ty})")),
            None => self.emit(format!("{kind} {label}")),
        }
        self.depth += 1;
    }

    /// Current structured-control depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions
    }

    /// Take the emitted text.
    pub fn finish(self) -> String {
        self.out
    }
}

/// Format an `f64` constant as WAT accepts it.
pub fn format_f64(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        format!("{value:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_indentation() {
        let mut e = WatEmitter::new(true);
        e.block("$b", None);
        e.emit("nop");
        e.if_(Some("i32"));
        e.emit("i32.const 1");
        e.else_();
        e.emit("i32.const 0");
        e.end();
        e.end();
        assert_eq!(e.depth(), 0);
        let text = e.finish();
        let expected = "  block $b\n    nop\n    if (result i32)\n      i32.const 1\n    else\n      i32.const 0\n    end\n  end\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn comments_can_be_disabled() {
        let mut e = WatEmitter::new(false);
        e.comment("hidden");
        e.emit("nop");
        assert_eq!(e.finish(), "  nop\n");
    }

    #[test]
    fn float_formatting() {
        assert_eq!(format_f64(1.5), "1.5");
        assert_eq!(format_f64(2.0), "2.0");
        assert_eq!(format_f64(f64::NAN), "nan");
        assert_eq!(format_f64(f64::NEG_INFINITY), "-inf");
        assert_eq!(format_f64(1e300), "1e300");
    }
}
