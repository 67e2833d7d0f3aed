//! Source positions carried by AST nodes and errors.

use std::fmt;

/// Where a node starts in the source: 1-indexed line and byte column.
///
/// The front end stamps every node it parses. Nodes the compiler builds
/// itself (inlined bodies, desugarings) keep the default span, which has
/// line 0.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub line: u32,
    pub col: u32,
}

impl Span {
    #[inline]
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }

    /// Whether this span came from source rather than a compiler rewrite.
    #[inline]
    pub fn is_source(&self) -> bool {
        self.line != 0
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_source() {
            write!(f, "{}:{}", self.line, self.col)
        } else {
            f.write_str("<generated>")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_line_and_column() {
        assert_eq!(Span::new(3, 15).to_string(), "3:15");
        assert_eq!(format!("{:?}", Span::new(1, 1)), "1:1");
    }

    #[test]
    fn default_span_is_generated() {
        let span = Span::default();
        assert!(!span.is_source());
        assert_eq!(span.to_string(), "<generated>");
    }
}
