//! `match` statement patterns.

use pyrite_core::Span;

use crate::expr::{Constant, Expr};

/// A structural pattern.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pattern<'ast> {
    /// Compares by value equality (`case 1:`, `case Color.RED:`).
    Value(&'ast ValuePattern<'ast>),
    /// Compares by identity (`None`, `True`, `False`).
    Singleton(&'ast SingletonPattern<'ast>),
    /// `[a, b, *rest]` / `(a, b)`.
    Sequence(&'ast SequencePattern<'ast>),
    /// `{"k": p, **rest}`.
    Mapping(&'ast MappingPattern<'ast>),
    /// `Point(x, y=0)`.
    Class(&'ast ClassPattern<'ast>),
    /// `*name` / `*_` inside a sequence pattern.
    Star(&'ast StarPattern<'ast>),
    /// Capture (`x`), wildcard (`_`) or `p as x`.
    As(&'ast AsPattern<'ast>),
    /// `p1 | p2 | ...`.
    Or(&'ast OrPattern<'ast>),
}

impl<'ast> Pattern<'ast> {
    pub fn span(&self) -> Span {
        match self {
            Self::Value(p) => p.span,
            Self::Singleton(p) => p.span,
            Self::Sequence(p) => p.span,
            Self::Mapping(p) => p.span,
            Self::Class(p) => p.span,
            Self::Star(p) => p.span,
            Self::As(p) => p.span,
            Self::Or(p) => p.span,
        }
    }

    /// Whether this pattern matches every subject without binding.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::As(p) if p.pattern.is_none() && p.name.is_none())
    }

    /// Whether this pattern matches every subject (wildcard or bare capture).
    pub fn is_irrefutable(&self) -> bool {
        match self {
            Self::As(p) => p.pattern.is_none_or(|inner| inner.is_irrefutable()),
            Self::Or(p) => p.patterns.iter().any(|alt| alt.is_irrefutable()),
            _ => false,
        }
    }

    /// Names bound by this pattern, in left-to-right order.
    pub fn bindings(&self, out: &mut Vec<&'ast str>) {
        match self {
            Self::Value(_) | Self::Singleton(_) => {}
            Self::Sequence(p) => p.patterns.iter().for_each(|sub| sub.bindings(out)),
            Self::Mapping(p) => {
                p.patterns.iter().for_each(|sub| sub.bindings(out));
                out.extend(p.rest);
            }
            Self::Class(p) => {
                p.patterns.iter().for_each(|sub| sub.bindings(out));
                p.kwd_patterns.iter().for_each(|sub| sub.bindings(out));
            }
            Self::Star(p) => out.extend(p.name),
            Self::As(p) => {
                if let Some(inner) = p.pattern {
                    inner.bindings(out);
                }
                out.extend(p.name);
            }
            // Every alternative binds the same set; the first is representative.
            Self::Or(p) => {
                if let Some(first) = p.patterns.first() {
                    first.bindings(out);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValuePattern<'ast> {
    pub value: Expr<'ast>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SingletonPattern<'ast> {
    /// One of `Constant::None` or `Constant::Bool`.
    pub value: Constant<'ast>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequencePattern<'ast> {
    pub patterns: &'ast [Pattern<'ast>],
    pub span: Span,
}

impl<'ast> SequencePattern<'ast> {
    /// Position of the star sub-pattern, if any.
    pub fn star_index(&self) -> Option<usize> {
        self.patterns
            .iter()
            .position(|p| matches!(p, Pattern::Star(_)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MappingPattern<'ast> {
    pub keys: &'ast [Expr<'ast>],
    pub patterns: &'ast [Pattern<'ast>],
    pub rest: Option<&'ast str>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassPattern<'ast> {
    pub cls: Expr<'ast>,
    pub patterns: &'ast [Pattern<'ast>],
    pub kwd_attrs: &'ast [&'ast str],
    pub kwd_patterns: &'ast [Pattern<'ast>],
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StarPattern<'ast> {
    /// `None` for `*_`.
    pub name: Option<&'ast str>,
    pub span: Span,
}

/// `pattern as name`. Both `None` is the wildcard `_`; only `name` is a capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AsPattern<'ast> {
    pub pattern: Option<Pattern<'ast>>,
    pub name: Option<&'ast str>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrPattern<'ast> {
    pub patterns: &'ast [Pattern<'ast>],
    pub span: Span,
}
