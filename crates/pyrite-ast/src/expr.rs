//! Expression AST nodes.
//!
//! Leaf nodes ([`ConstantExpr`], [`NameExpr`]) are stored inline; every other
//! node is an arena reference so that [`Expr`] stays two words and `Copy`.
//!
//! [`Expr::Let`] never comes from the front end. The inliner produces it to
//! bind each argument and callee local exactly once around an inlined body.

use ordered_float::OrderedFloat;
use pyrite_core::{BinaryOp, BoolOp, CmpOp, Span, UnaryOp};

use crate::stmt::Arguments;

/// An expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expr<'ast> {
    /// Literal constant
    Constant(ConstantExpr<'ast>),
    /// Variable reference
    Name(NameExpr<'ast>),
    /// `and` / `or` chain
    BoolOp(&'ast BoolOpExpr<'ast>),
    /// Assignment expression (`x := value`)
    NamedExpr(&'ast NamedExpr<'ast>),
    /// Binary arithmetic
    BinOp(&'ast BinOpExpr<'ast>),
    /// Unary operation
    UnaryOp(&'ast UnaryOpExpr<'ast>),
    /// Anonymous function
    Lambda(&'ast LambdaExpr<'ast>),
    /// Conditional expression (`a if c else b`)
    IfExp(&'ast IfExpr<'ast>),
    /// Dict display
    Dict(&'ast DictExpr<'ast>),
    /// Set display
    Set(&'ast SequenceExpr<'ast>),
    /// List display
    List(&'ast SequenceExpr<'ast>),
    /// Tuple display
    Tuple(&'ast SequenceExpr<'ast>),
    /// List comprehension
    ListComp(&'ast ComprehensionExpr<'ast>),
    /// Set comprehension
    SetComp(&'ast ComprehensionExpr<'ast>),
    /// Generator expression
    GeneratorExp(&'ast ComprehensionExpr<'ast>),
    /// Dict comprehension
    DictComp(&'ast DictCompExpr<'ast>),
    /// `yield` / `yield value`
    Yield(&'ast YieldExpr<'ast>),
    /// `yield from iterable`
    YieldFrom(&'ast YieldFromExpr<'ast>),
    /// Comparison chain
    Compare(&'ast CompareExpr<'ast>),
    /// Call
    Call(&'ast CallExpr<'ast>),
    /// f-string
    JoinedStr(&'ast JoinedStrExpr<'ast>),
    /// Attribute access (`value.attr`)
    Attribute(&'ast AttributeExpr<'ast>),
    /// Subscript (`value[slice]`)
    Subscript(&'ast SubscriptExpr<'ast>),
    /// Starred element (`*value`)
    Starred(&'ast StarredExpr<'ast>),
    /// Slice (`lower:upper:step`), only valid as a subscript
    Slice(&'ast SliceExpr<'ast>),
    /// Scoped single-evaluation bindings
    Let(&'ast LetExpr<'ast>),
}

impl<'ast> Expr<'ast> {
    /// Get the span of this expression.
    pub fn span(&self) -> Span {
        match self {
            Self::Constant(e) => e.span,
            Self::Name(e) => e.span,
            Self::BoolOp(e) => e.span,
            Self::NamedExpr(e) => e.span,
            Self::BinOp(e) => e.span,
            Self::UnaryOp(e) => e.span,
            Self::Lambda(e) => e.span,
            Self::IfExp(e) => e.span,
            Self::Dict(e) => e.span,
            Self::Set(e) | Self::List(e) | Self::Tuple(e) => e.span,
            Self::ListComp(e) | Self::SetComp(e) | Self::GeneratorExp(e) => e.span,
            Self::DictComp(e) => e.span,
            Self::Yield(e) => e.span,
            Self::YieldFrom(e) => e.span,
            Self::Compare(e) => e.span,
            Self::Call(e) => e.span,
            Self::JoinedStr(e) => e.span,
            Self::Attribute(e) => e.span,
            Self::Subscript(e) => e.span,
            Self::Starred(e) => e.span,
            Self::Slice(e) => e.span,
            Self::Let(e) => e.span,
        }
    }

    /// Short node-kind name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Constant(_) => "constant",
            Self::Name(_) => "name",
            Self::BoolOp(_) => "boolean operation",
            Self::NamedExpr(_) => "assignment expression",
            Self::BinOp(_) => "binary operation",
            Self::UnaryOp(_) => "unary operation",
            Self::Lambda(_) => "lambda",
            Self::IfExp(_) => "conditional expression",
            Self::Dict(_) => "dict display",
            Self::Set(_) => "set display",
            Self::List(_) => "list display",
            Self::Tuple(_) => "tuple display",
            Self::ListComp(_) => "list comprehension",
            Self::SetComp(_) => "set comprehension",
            Self::GeneratorExp(_) => "generator expression",
            Self::DictComp(_) => "dict comprehension",
            Self::Yield(_) => "yield",
            Self::YieldFrom(_) => "yield from",
            Self::Compare(_) => "comparison",
            Self::Call(_) => "call",
            Self::JoinedStr(_) => "f-string",
            Self::Attribute(_) => "attribute",
            Self::Subscript(_) => "subscript",
            Self::Starred(_) => "starred expression",
            Self::Slice(_) => "slice",
            Self::Let(_) => "let binding",
        }
    }

    /// The identifier if this is a plain name.
    pub fn as_name(&self) -> Option<&'ast str> {
        match self {
            Self::Name(n) => Some(n.id),
            _ => None,
        }
    }

    /// The integer value if this is an integer constant.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Constant(ConstantExpr {
                value: Constant::Int(v),
                ..
            }) => Some(*v),
            _ => None,
        }
    }

    /// The string value if this is a string constant.
    pub fn as_str(&self) -> Option<&'ast str> {
        match self {
            Self::Constant(ConstantExpr {
                value: Constant::Str(s),
                ..
            }) => Some(s),
            _ => None,
        }
    }

    /// Whether this is a constant (of any kind).
    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }

    /// If this is `name(args...)` with a plain-name callee, return the call.
    pub fn as_named_call(&self) -> Option<(&'ast str, &'ast CallExpr<'ast>)> {
        match self {
            Self::Call(call) => call.func.as_name().map(|name| (name, *call)),
            _ => None,
        }
    }
}

/// A literal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant<'ast> {
    None,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(&'ast str),
    Bytes(&'ast [u8]),
    Ellipsis,
}

/// A literal constant expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantExpr<'ast> {
    pub value: Constant<'ast>,
    pub span: Span,
}

/// A variable reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NameExpr<'ast> {
    pub id: &'ast str,
    pub span: Span,
}

/// `a and b and c` / `a or b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoolOpExpr<'ast> {
    pub op: BoolOp,
    pub values: &'ast [Expr<'ast>],
    pub span: Span,
}

/// `target := value`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NamedExpr<'ast> {
    pub target: &'ast str,
    pub value: Expr<'ast>,
    pub span: Span,
}

/// A binary operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinOpExpr<'ast> {
    pub left: Expr<'ast>,
    pub op: BinaryOp,
    pub right: Expr<'ast>,
    pub span: Span,
}

/// A unary operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnaryOpExpr<'ast> {
    pub op: UnaryOp,
    pub operand: Expr<'ast>,
    pub span: Span,
}

/// `lambda args: body`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LambdaExpr<'ast> {
    pub args: &'ast Arguments<'ast>,
    pub body: Expr<'ast>,
    pub span: Span,
}

/// `body if test else orelse`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IfExpr<'ast> {
    pub test: Expr<'ast>,
    pub body: Expr<'ast>,
    pub orelse: Expr<'ast>,
    pub span: Span,
}

/// Dict display. A `None` key marks a `**mapping` spread in `values`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DictExpr<'ast> {
    pub keys: &'ast [Option<Expr<'ast>>],
    pub values: &'ast [Expr<'ast>],
    pub span: Span,
}

/// List, tuple or set display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceExpr<'ast> {
    pub elts: &'ast [Expr<'ast>],
    pub span: Span,
}

/// One `for target in iter if cond...` clause of a comprehension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comprehension<'ast> {
    pub target: Expr<'ast>,
    pub iter: Expr<'ast>,
    pub ifs: &'ast [Expr<'ast>],
}

/// List/set comprehension or generator expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComprehensionExpr<'ast> {
    pub elt: Expr<'ast>,
    pub generators: &'ast [Comprehension<'ast>],
    pub span: Span,
}

/// Dict comprehension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DictCompExpr<'ast> {
    pub key: Expr<'ast>,
    pub value: Expr<'ast>,
    pub generators: &'ast [Comprehension<'ast>],
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YieldExpr<'ast> {
    pub value: Option<Expr<'ast>>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YieldFromExpr<'ast> {
    pub value: Expr<'ast>,
    pub span: Span,
}

/// `left op0 c0 op1 c1 ...`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompareExpr<'ast> {
    pub left: Expr<'ast>,
    pub ops: &'ast [CmpOp],
    pub comparators: &'ast [Expr<'ast>],
    pub span: Span,
}

/// A keyword argument. `arg == None` marks a `**mapping` spread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keyword<'ast> {
    pub arg: Option<&'ast str>,
    pub value: Expr<'ast>,
    pub span: Span,
}

/// A call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallExpr<'ast> {
    pub func: Expr<'ast>,
    pub args: &'ast [Expr<'ast>],
    pub keywords: &'ast [Keyword<'ast>],
    pub span: Span,
}

impl<'ast> CallExpr<'ast> {
    /// Whether any positional argument is `*iterable`.
    pub fn has_starred(&self) -> bool {
        self.args.iter().any(|a| matches!(a, Expr::Starred(_)))
    }

    /// Look up a keyword argument by name.
    pub fn keyword(&self, name: &str) -> Option<&'ast Keyword<'ast>> {
        self.keywords.iter().find(|k| k.arg == Some(name))
    }
}

/// The `!s` / `!r` / `!a` conversion of an f-string field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Conversion {
    #[default]
    None,
    Str,
    Repr,
    Ascii,
}

/// A replacement field inside an f-string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormattedValue<'ast> {
    pub value: Expr<'ast>,
    pub conversion: Conversion,
    /// Format spec; may itself contain nested replacement fields.
    pub format_spec: Option<&'ast [FStringPart<'ast>]>,
}

/// A segment of an f-string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FStringPart<'ast> {
    Literal(&'ast str),
    Formatted(FormattedValue<'ast>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoinedStrExpr<'ast> {
    pub values: &'ast [FStringPart<'ast>],
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributeExpr<'ast> {
    pub value: Expr<'ast>,
    pub attr: &'ast str,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubscriptExpr<'ast> {
    pub value: Expr<'ast>,
    pub slice: Expr<'ast>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StarredExpr<'ast> {
    pub value: Expr<'ast>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceExpr<'ast> {
    pub lower: Option<Expr<'ast>>,
    pub upper: Option<Expr<'ast>>,
    pub step: Option<Expr<'ast>>,
    pub span: Span,
}

/// One `name = value` binding of a [`LetExpr`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetBinding<'ast> {
    pub name: &'ast str,
    pub value: Expr<'ast>,
}

/// Evaluate `bindings` in order, each exactly once, then `body`.
///
/// Binding names are fresh and scoped to the expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetExpr<'ast> {
    pub bindings: &'ast [LetBinding<'ast>],
    pub body: Expr<'ast>,
    pub span: Span,
}
