//! Statement AST nodes.

use pyrite_core::{BinaryOp, Span};

use crate::expr::Expr;
use crate::pattern::Pattern;

/// A statement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stmt<'ast> {
    FunctionDef(&'ast FunctionDef<'ast>),
    ClassDef(&'ast ClassDef<'ast>),
    Return(&'ast ReturnStmt<'ast>),
    Delete(&'ast DeleteStmt<'ast>),
    Assign(&'ast AssignStmt<'ast>),
    AugAssign(&'ast AugAssignStmt<'ast>),
    AnnAssign(&'ast AnnAssignStmt<'ast>),
    For(&'ast ForStmt<'ast>),
    While(&'ast WhileStmt<'ast>),
    If(&'ast IfStmt<'ast>),
    With(&'ast WithStmt<'ast>),
    Match(&'ast MatchStmt<'ast>),
    Raise(&'ast RaiseStmt<'ast>),
    Try(&'ast TryStmt<'ast>),
    Assert(&'ast AssertStmt<'ast>),
    Import(&'ast ImportStmt<'ast>),
    ImportFrom(&'ast ImportFromStmt<'ast>),
    Global(&'ast NamesStmt<'ast>),
    Nonlocal(&'ast NamesStmt<'ast>),
    Expr(&'ast ExprStmt<'ast>),
    Pass(Span),
    Break(Span),
    Continue(Span),
}

impl<'ast> Stmt<'ast> {
    /// Get the span of this statement.
    pub fn span(&self) -> Span {
        match self {
            Self::FunctionDef(s) => s.span,
            Self::ClassDef(s) => s.span,
            Self::Return(s) => s.span,
            Self::Delete(s) => s.span,
            Self::Assign(s) => s.span,
            Self::AugAssign(s) => s.span,
            Self::AnnAssign(s) => s.span,
            Self::For(s) => s.span,
            Self::While(s) => s.span,
            Self::If(s) => s.span,
            Self::With(s) => s.span,
            Self::Match(s) => s.span,
            Self::Raise(s) => s.span,
            Self::Try(s) => s.span,
            Self::Assert(s) => s.span,
            Self::Import(s) => s.span,
            Self::ImportFrom(s) => s.span,
            Self::Global(s) | Self::Nonlocal(s) => s.span,
            Self::Expr(s) => s.span,
            Self::Pass(span) | Self::Break(span) | Self::Continue(span) => *span,
        }
    }

    /// Whether control never falls through this statement.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Return(_) | Self::Raise(_) | Self::Break(_) | Self::Continue(_)
        )
    }

    /// Whether this is a bare string expression (a docstring).
    pub fn is_docstring(&self) -> bool {
        matches!(self, Self::Expr(e) if e.value.as_str().is_some())
    }
}

/// A single parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arg<'ast> {
    pub name: &'ast str,
    pub annotation: Option<Expr<'ast>>,
    pub span: Span,
}

/// A parameter list.
///
/// `defaults` align with the *last* `defaults.len()` entries of `args`.
/// `kw_defaults` align one-to-one with `kwonlyargs`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Arguments<'ast> {
    pub args: &'ast [Arg<'ast>],
    pub vararg: Option<Arg<'ast>>,
    pub kwonlyargs: &'ast [Arg<'ast>],
    pub kw_defaults: &'ast [Option<Expr<'ast>>],
    pub kwarg: Option<Arg<'ast>>,
    pub defaults: &'ast [Expr<'ast>],
}

impl<'ast> Arguments<'ast> {
    /// Number of positional parameters that have no default.
    pub fn required(&self) -> usize {
        self.args.len() - self.defaults.len().min(self.args.len())
    }

    /// The default for positional parameter `index`, if any.
    pub fn default_for(&self, index: usize) -> Option<Expr<'ast>> {
        let first = self.required();
        if index >= first {
            self.defaults.get(index - first).copied()
        } else {
            None
        }
    }

    /// Every parameter name in binding order.
    pub fn names(&self) -> impl Iterator<Item = &'ast str> + '_ {
        self.args
            .iter()
            .map(|a| a.name)
            .chain(self.vararg.iter().map(|a| a.name))
            .chain(self.kwonlyargs.iter().map(|a| a.name))
            .chain(self.kwarg.iter().map(|a| a.name))
    }

    /// Whether the signature takes only fixed positional parameters.
    pub fn is_simple(&self) -> bool {
        self.vararg.is_none() && self.kwonlyargs.is_empty() && self.kwarg.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FunctionDef<'ast> {
    pub name: &'ast str,
    pub args: &'ast Arguments<'ast>,
    pub body: &'ast [Stmt<'ast>],
    pub decorators: &'ast [Expr<'ast>],
    pub returns: Option<Expr<'ast>>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassDef<'ast> {
    pub name: &'ast str,
    pub bases: &'ast [Expr<'ast>],
    pub keywords: &'ast [crate::expr::Keyword<'ast>],
    pub body: &'ast [Stmt<'ast>],
    pub decorators: &'ast [Expr<'ast>],
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReturnStmt<'ast> {
    pub value: Option<Expr<'ast>>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeleteStmt<'ast> {
    pub targets: &'ast [Expr<'ast>],
    pub span: Span,
}

/// `t0 = t1 = ... = value`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssignStmt<'ast> {
    pub targets: &'ast [Expr<'ast>],
    pub value: Expr<'ast>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AugAssignStmt<'ast> {
    pub target: Expr<'ast>,
    pub op: BinaryOp,
    pub value: Expr<'ast>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnAssignStmt<'ast> {
    pub target: Expr<'ast>,
    pub annotation: Expr<'ast>,
    pub value: Option<Expr<'ast>>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForStmt<'ast> {
    pub target: Expr<'ast>,
    pub iter: Expr<'ast>,
    pub body: &'ast [Stmt<'ast>],
    pub orelse: &'ast [Stmt<'ast>],
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WhileStmt<'ast> {
    pub test: Expr<'ast>,
    pub body: &'ast [Stmt<'ast>],
    pub orelse: &'ast [Stmt<'ast>],
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IfStmt<'ast> {
    pub test: Expr<'ast>,
    pub body: &'ast [Stmt<'ast>],
    pub orelse: &'ast [Stmt<'ast>],
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WithItem<'ast> {
    pub context_expr: Expr<'ast>,
    pub optional_vars: Option<Expr<'ast>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WithStmt<'ast> {
    pub items: &'ast [WithItem<'ast>],
    pub body: &'ast [Stmt<'ast>],
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchCase<'ast> {
    pub pattern: Pattern<'ast>,
    pub guard: Option<Expr<'ast>>,
    pub body: &'ast [Stmt<'ast>],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchStmt<'ast> {
    pub subject: Expr<'ast>,
    pub cases: &'ast [MatchCase<'ast>],
    pub span: Span,
}

/// `raise`, `raise exc`, `raise exc from cause`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaiseStmt<'ast> {
    pub exc: Option<Expr<'ast>>,
    pub cause: Option<Expr<'ast>>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExceptHandler<'ast> {
    /// `None` for a bare `except:`.
    pub typ: Option<Expr<'ast>>,
    pub name: Option<&'ast str>,
    pub body: &'ast [Stmt<'ast>],
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TryStmt<'ast> {
    pub body: &'ast [Stmt<'ast>],
    pub handlers: &'ast [ExceptHandler<'ast>],
    pub orelse: &'ast [Stmt<'ast>],
    pub finalbody: &'ast [Stmt<'ast>],
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssertStmt<'ast> {
    pub test: Expr<'ast>,
    pub msg: Option<Expr<'ast>>,
    pub span: Span,
}

/// `name as asname`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alias<'ast> {
    pub name: &'ast str,
    pub asname: Option<&'ast str>,
}

impl<'ast> Alias<'ast> {
    /// The name this import binds in the current scope.
    pub fn bound_name(&self) -> &'ast str {
        self.asname
            .unwrap_or_else(|| self.name.split('.').next().unwrap_or(self.name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportStmt<'ast> {
    pub names: &'ast [Alias<'ast>],
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportFromStmt<'ast> {
    pub module: Option<&'ast str>,
    pub names: &'ast [Alias<'ast>],
    pub level: u32,
    pub span: Span,
}

/// `global a, b` / `nonlocal a, b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NamesStmt<'ast> {
    pub names: &'ast [&'ast str],
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExprStmt<'ast> {
    pub value: Expr<'ast>,
    pub span: Span,
}

/// A whole source module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Module<'ast> {
    pub body: &'ast [Stmt<'ast>],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_bound_name() {
        let plain = Alias {
            name: "os.path",
            asname: None,
        };
        assert_eq!(plain.bound_name(), "os");
        let renamed = Alias {
            name: "math",
            asname: Some("m"),
        };
        assert_eq!(renamed.bound_name(), "m");
    }
}
