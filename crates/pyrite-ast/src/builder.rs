//! Programmatic AST construction.
//!
//! The front end hands the compiler finished trees; [`AstBuilder`] exists for
//! everything else that needs to make nodes: unit tests, the inliner's
//! rewrites and the code generator's internal desugarings.
//!
//! # Example
//!
//! ```
//! use bumpalo::Bump;
//! use pyrite_ast::AstBuilder;
//! use pyrite_core::BinaryOp;
//!
//! let arena = Bump::new();
//! let b = AstBuilder::new(&arena);
//! // print(1 + 2)
//! let module = b.module(&[b.expr_stmt(b.call_name("print", &[b.bin(b.int(1), BinaryOp::Add, b.int(2))]))]);
//! assert_eq!(module.body.len(), 1);
//! ```

use bumpalo::Bump;
use ordered_float::OrderedFloat;
use pyrite_core::{BinaryOp, BoolOp, CmpOp, Span, UnaryOp};

use crate::expr::*;
use crate::pattern::*;
use crate::stmt::*;

/// Arena-backed node factory.
///
/// Every node receives the builder's current span; use [`AstBuilder::at`] to
/// derive a builder stamping a different location.
#[derive(Clone, Copy)]
pub struct AstBuilder<'ast> {
    arena: &'ast Bump,
    span: Span,
}

impl<'ast> AstBuilder<'ast> {
    pub fn new(arena: &'ast Bump) -> Self {
        Self {
            arena,
            span: Span::new(1, 1),
        }
    }

    /// A builder stamping nodes with `span`.
    pub fn with_span(self, span: Span) -> Self {
        Self { span, ..self }
    }

    /// A builder stamping nodes at `line:col`.
    pub fn at(self, line: u32, col: u32) -> Self {
        self.with_span(Span::new(line, col))
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn arena(&self) -> &'ast Bump {
        self.arena
    }

    /// Copy a string into the arena.
    pub fn intern(&self, s: &str) -> &'ast str {
        self.arena.alloc_str(s)
    }

    /// Copy a slice of nodes into the arena.
    pub fn slice<T: Copy>(&self, items: &[T]) -> &'ast [T] {
        self.arena.alloc_slice_copy(items)
    }

    fn alloc<T>(&self, value: T) -> &'ast T {
        self.arena.alloc(value)
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn constant(&self, value: Constant<'ast>) -> Expr<'ast> {
        Expr::Constant(ConstantExpr {
            value,
            span: self.span,
        })
    }

    pub fn int(&self, value: i64) -> Expr<'ast> {
        self.constant(Constant::Int(value))
    }

    pub fn float(&self, value: f64) -> Expr<'ast> {
        self.constant(Constant::Float(OrderedFloat(value)))
    }

    pub fn str(&self, value: &str) -> Expr<'ast> {
        self.constant(Constant::Str(self.intern(value)))
    }

    pub fn bytes(&self, value: &[u8]) -> Expr<'ast> {
        self.constant(Constant::Bytes(self.arena.alloc_slice_copy(value)))
    }

    pub fn bool(&self, value: bool) -> Expr<'ast> {
        self.constant(Constant::Bool(value))
    }

    pub fn none(&self) -> Expr<'ast> {
        self.constant(Constant::None)
    }

    pub fn name(&self, id: &str) -> Expr<'ast> {
        Expr::Name(NameExpr {
            id: self.intern(id),
            span: self.span,
        })
    }

    pub fn bin(&self, left: Expr<'ast>, op: BinaryOp, right: Expr<'ast>) -> Expr<'ast> {
        Expr::BinOp(self.alloc(BinOpExpr {
            left,
            op,
            right,
            span: self.span,
        }))
    }

    pub fn unary(&self, op: UnaryOp, operand: Expr<'ast>) -> Expr<'ast> {
        Expr::UnaryOp(self.alloc(UnaryOpExpr {
            op,
            operand,
            span: self.span,
        }))
    }

    pub fn bool_op(&self, op: BoolOp, values: &[Expr<'ast>]) -> Expr<'ast> {
        Expr::BoolOp(self.alloc(BoolOpExpr {
            op,
            values: self.slice(values),
            span: self.span,
        }))
    }

    /// A single comparison `left op right`.
    pub fn cmp(&self, left: Expr<'ast>, op: CmpOp, right: Expr<'ast>) -> Expr<'ast> {
        self.compare(left, &[op], &[right])
    }

    /// A comparison chain.
    pub fn compare(&self, left: Expr<'ast>, ops: &[CmpOp], comparators: &[Expr<'ast>]) -> Expr<'ast> {
        Expr::Compare(self.alloc(CompareExpr {
            left,
            ops: self.slice(ops),
            comparators: self.slice(comparators),
            span: self.span,
        }))
    }

    pub fn call(&self, func: Expr<'ast>, args: &[Expr<'ast>]) -> Expr<'ast> {
        self.call_kw(func, args, &[])
    }

    pub fn call_kw(
        &self,
        func: Expr<'ast>,
        args: &[Expr<'ast>],
        keywords: &[Keyword<'ast>],
    ) -> Expr<'ast> {
        Expr::Call(self.alloc(CallExpr {
            func,
            args: self.slice(args),
            keywords: self.slice(keywords),
            span: self.span,
        }))
    }

    /// `name(args...)`.
    pub fn call_name(&self, name: &str, args: &[Expr<'ast>]) -> Expr<'ast> {
        self.call(self.name(name), args)
    }

    /// `value.method(args...)`.
    pub fn method_call(&self, value: Expr<'ast>, method: &str, args: &[Expr<'ast>]) -> Expr<'ast> {
        self.call(self.attr(value, method), args)
    }

    pub fn keyword(&self, arg: &str, value: Expr<'ast>) -> Keyword<'ast> {
        Keyword {
            arg: Some(self.intern(arg)),
            value,
            span: self.span,
        }
    }

    /// `**value` keyword spread.
    pub fn keyword_spread(&self, value: Expr<'ast>) -> Keyword<'ast> {
        Keyword {
            arg: None,
            value,
            span: self.span,
        }
    }

    pub fn attr(&self, value: Expr<'ast>, attr: &str) -> Expr<'ast> {
        Expr::Attribute(self.alloc(AttributeExpr {
            value,
            attr: self.intern(attr),
            span: self.span,
        }))
    }

    pub fn subscript(&self, value: Expr<'ast>, slice: Expr<'ast>) -> Expr<'ast> {
        Expr::Subscript(self.alloc(SubscriptExpr {
            value,
            slice,
            span: self.span,
        }))
    }

    pub fn slice_expr(
        &self,
        lower: Option<Expr<'ast>>,
        upper: Option<Expr<'ast>>,
        step: Option<Expr<'ast>>,
    ) -> Expr<'ast> {
        Expr::Slice(self.alloc(SliceExpr {
            lower,
            upper,
            step,
            span: self.span,
        }))
    }

    pub fn starred(&self, value: Expr<'ast>) -> Expr<'ast> {
        Expr::Starred(self.alloc(StarredExpr {
            value,
            span: self.span,
        }))
    }

    fn sequence(&self, elts: &[Expr<'ast>]) -> &'ast SequenceExpr<'ast> {
        self.alloc(SequenceExpr {
            elts: self.slice(elts),
            span: self.span,
        })
    }

    pub fn list(&self, elts: &[Expr<'ast>]) -> Expr<'ast> {
        Expr::List(self.sequence(elts))
    }

    pub fn tuple(&self, elts: &[Expr<'ast>]) -> Expr<'ast> {
        Expr::Tuple(self.sequence(elts))
    }

    pub fn set(&self, elts: &[Expr<'ast>]) -> Expr<'ast> {
        Expr::Set(self.sequence(elts))
    }

    /// Dict display from key/value pairs.
    pub fn dict(&self, entries: &[(Expr<'ast>, Expr<'ast>)]) -> Expr<'ast> {
        let keys: Vec<_> = entries.iter().map(|(k, _)| Some(*k)).collect();
        let values: Vec<_> = entries.iter().map(|(_, v)| *v).collect();
        Expr::Dict(self.alloc(DictExpr {
            keys: self.slice(&keys),
            values: self.slice(&values),
            span: self.span,
        }))
    }

    pub fn if_exp(&self, test: Expr<'ast>, body: Expr<'ast>, orelse: Expr<'ast>) -> Expr<'ast> {
        Expr::IfExp(self.alloc(IfExpr {
            test,
            body,
            orelse,
            span: self.span,
        }))
    }

    pub fn lambda(&self, args: Arguments<'ast>, body: Expr<'ast>) -> Expr<'ast> {
        Expr::Lambda(self.alloc(LambdaExpr {
            args: self.alloc(args),
            body,
            span: self.span,
        }))
    }

    pub fn named(&self, target: &str, value: Expr<'ast>) -> Expr<'ast> {
        Expr::NamedExpr(self.alloc(NamedExpr {
            target: self.intern(target),
            value,
            span: self.span,
        }))
    }

    pub fn comprehension(
        &self,
        target: Expr<'ast>,
        iter: Expr<'ast>,
        ifs: &[Expr<'ast>],
    ) -> Comprehension<'ast> {
        Comprehension {
            target,
            iter,
            ifs: self.slice(ifs),
        }
    }

    fn comp(&self, elt: Expr<'ast>, generators: &[Comprehension<'ast>]) -> &'ast ComprehensionExpr<'ast> {
        self.alloc(ComprehensionExpr {
            elt,
            generators: self.slice(generators),
            span: self.span,
        })
    }

    pub fn list_comp(&self, elt: Expr<'ast>, generators: &[Comprehension<'ast>]) -> Expr<'ast> {
        Expr::ListComp(self.comp(elt, generators))
    }

    pub fn set_comp(&self, elt: Expr<'ast>, generators: &[Comprehension<'ast>]) -> Expr<'ast> {
        Expr::SetComp(self.comp(elt, generators))
    }

    pub fn gen_exp(&self, elt: Expr<'ast>, generators: &[Comprehension<'ast>]) -> Expr<'ast> {
        Expr::GeneratorExp(self.comp(elt, generators))
    }

    pub fn dict_comp(
        &self,
        key: Expr<'ast>,
        value: Expr<'ast>,
        generators: &[Comprehension<'ast>],
    ) -> Expr<'ast> {
        Expr::DictComp(self.alloc(DictCompExpr {
            key,
            value,
            generators: self.slice(generators),
            span: self.span,
        }))
    }

    pub fn yield_(&self, value: Option<Expr<'ast>>) -> Expr<'ast> {
        Expr::Yield(self.alloc(YieldExpr {
            value,
            span: self.span,
        }))
    }

    pub fn yield_from(&self, value: Expr<'ast>) -> Expr<'ast> {
        Expr::YieldFrom(self.alloc(YieldFromExpr {
            value,
            span: self.span,
        }))
    }

    pub fn fstring(&self, values: &[FStringPart<'ast>]) -> Expr<'ast> {
        Expr::JoinedStr(self.alloc(JoinedStrExpr {
            values: self.slice(values),
            span: self.span,
        }))
    }

    pub fn fstr_lit(&self, text: &str) -> FStringPart<'ast> {
        FStringPart::Literal(self.intern(text))
    }

    pub fn fstr_value(
        &self,
        value: Expr<'ast>,
        conversion: Conversion,
        format_spec: Option<&[FStringPart<'ast>]>,
    ) -> FStringPart<'ast> {
        FStringPart::Formatted(FormattedValue {
            value,
            conversion,
            format_spec: format_spec.map(|spec| self.slice(spec)),
        })
    }

    pub fn let_(&self, bindings: &[LetBinding<'ast>], body: Expr<'ast>) -> Expr<'ast> {
        Expr::Let(self.alloc(LetExpr {
            bindings: self.slice(bindings),
            body,
            span: self.span,
        }))
    }

    pub fn let_binding(&self, name: &str, value: Expr<'ast>) -> LetBinding<'ast> {
        LetBinding {
            name: self.intern(name),
            value,
        }
    }

    // ------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------

    pub fn arg(&self, name: &str) -> Arg<'ast> {
        Arg {
            name: self.intern(name),
            annotation: None,
            span: self.span,
        }
    }

    /// A parameter annotated with a plain type name.
    pub fn annotated_arg(&self, name: &str, annotation: &str) -> Arg<'ast> {
        Arg {
            annotation: Some(self.name(annotation)),
            ..self.arg(name)
        }
    }

    /// Plain positional parameters.
    pub fn params(&self, names: &[&str]) -> Arguments<'ast> {
        let args: Vec<_> = names.iter().map(|n| self.arg(n)).collect();
        Arguments {
            args: self.slice(&args),
            ..Arguments::default()
        }
    }

    /// Positional parameters with trailing defaults.
    pub fn params_with_defaults(&self, names: &[&str], defaults: &[Expr<'ast>]) -> Arguments<'ast> {
        Arguments {
            defaults: self.slice(defaults),
            ..self.params(names)
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    pub fn module(&self, body: &[Stmt<'ast>]) -> Module<'ast> {
        Module {
            body: self.slice(body),
        }
    }

    pub fn expr_stmt(&self, value: Expr<'ast>) -> Stmt<'ast> {
        Stmt::Expr(self.alloc(ExprStmt {
            value,
            span: self.span,
        }))
    }

    pub fn assign(&self, target: Expr<'ast>, value: Expr<'ast>) -> Stmt<'ast> {
        self.assign_multi(&[target], value)
    }

    /// `name = value`.
    pub fn assign_name(&self, name: &str, value: Expr<'ast>) -> Stmt<'ast> {
        self.assign(self.name(name), value)
    }

    pub fn assign_multi(&self, targets: &[Expr<'ast>], value: Expr<'ast>) -> Stmt<'ast> {
        Stmt::Assign(self.alloc(AssignStmt {
            targets: self.slice(targets),
            value,
            span: self.span,
        }))
    }

    pub fn aug_assign(&self, target: Expr<'ast>, op: BinaryOp, value: Expr<'ast>) -> Stmt<'ast> {
        Stmt::AugAssign(self.alloc(AugAssignStmt {
            target,
            op,
            value,
            span: self.span,
        }))
    }

    pub fn ann_assign(
        &self,
        target: Expr<'ast>,
        annotation: &str,
        value: Option<Expr<'ast>>,
    ) -> Stmt<'ast> {
        Stmt::AnnAssign(self.alloc(AnnAssignStmt {
            target,
            annotation: self.name(annotation),
            value,
            span: self.span,
        }))
    }

    pub fn ret(&self, value: Option<Expr<'ast>>) -> Stmt<'ast> {
        Stmt::Return(self.alloc(ReturnStmt {
            value,
            span: self.span,
        }))
    }

    pub fn pass(&self) -> Stmt<'ast> {
        Stmt::Pass(self.span)
    }

    pub fn brk(&self) -> Stmt<'ast> {
        Stmt::Break(self.span)
    }

    pub fn cont(&self) -> Stmt<'ast> {
        Stmt::Continue(self.span)
    }

    pub fn delete(&self, targets: &[Expr<'ast>]) -> Stmt<'ast> {
        Stmt::Delete(self.alloc(DeleteStmt {
            targets: self.slice(targets),
            span: self.span,
        }))
    }

    pub fn if_(&self, test: Expr<'ast>, body: &[Stmt<'ast>], orelse: &[Stmt<'ast>]) -> Stmt<'ast> {
        Stmt::If(self.alloc(IfStmt {
            test,
            body: self.slice(body),
            orelse: self.slice(orelse),
            span: self.span,
        }))
    }

    pub fn while_(&self, test: Expr<'ast>, body: &[Stmt<'ast>], orelse: &[Stmt<'ast>]) -> Stmt<'ast> {
        Stmt::While(self.alloc(WhileStmt {
            test,
            body: self.slice(body),
            orelse: self.slice(orelse),
            span: self.span,
        }))
    }

    pub fn for_(&self, target: Expr<'ast>, iter: Expr<'ast>, body: &[Stmt<'ast>]) -> Stmt<'ast> {
        self.for_else(target, iter, body, &[])
    }

    pub fn for_else(
        &self,
        target: Expr<'ast>,
        iter: Expr<'ast>,
        body: &[Stmt<'ast>],
        orelse: &[Stmt<'ast>],
    ) -> Stmt<'ast> {
        Stmt::For(self.alloc(ForStmt {
            target,
            iter,
            body: self.slice(body),
            orelse: self.slice(orelse),
            span: self.span,
        }))
    }

    /// `for var in range(args...):`.
    pub fn for_range(&self, var: &str, range_args: &[Expr<'ast>], body: &[Stmt<'ast>]) -> Stmt<'ast> {
        self.for_(self.name(var), self.call_name("range", range_args), body)
    }

    /// An undecorated function with plain positional parameters.
    pub fn func(&self, name: &str, params: &[&str], body: &[Stmt<'ast>]) -> Stmt<'ast> {
        self.func_def(name, self.params(params), body, &[])
    }

    pub fn func_def(
        &self,
        name: &str,
        args: Arguments<'ast>,
        body: &[Stmt<'ast>],
        decorators: &[Expr<'ast>],
    ) -> Stmt<'ast> {
        Stmt::FunctionDef(self.alloc(FunctionDef {
            name: self.intern(name),
            args: self.alloc(args),
            body: self.slice(body),
            decorators: self.slice(decorators),
            returns: None,
            span: self.span,
        }))
    }

    pub fn class(&self, name: &str, bases: &[Expr<'ast>], body: &[Stmt<'ast>]) -> Stmt<'ast> {
        Stmt::ClassDef(self.alloc(ClassDef {
            name: self.intern(name),
            bases: self.slice(bases),
            keywords: &[],
            body: self.slice(body),
            decorators: &[],
            span: self.span,
        }))
    }

    pub fn handler(
        &self,
        typ: Option<Expr<'ast>>,
        name: Option<&str>,
        body: &[Stmt<'ast>],
    ) -> ExceptHandler<'ast> {
        ExceptHandler {
            typ,
            name: name.map(|n| self.intern(n)),
            body: self.slice(body),
            span: self.span,
        }
    }

    pub fn try_(
        &self,
        body: &[Stmt<'ast>],
        handlers: &[ExceptHandler<'ast>],
        orelse: &[Stmt<'ast>],
        finalbody: &[Stmt<'ast>],
    ) -> Stmt<'ast> {
        Stmt::Try(self.alloc(TryStmt {
            body: self.slice(body),
            handlers: self.slice(handlers),
            orelse: self.slice(orelse),
            finalbody: self.slice(finalbody),
            span: self.span,
        }))
    }

    pub fn raise(&self, exc: Option<Expr<'ast>>, cause: Option<Expr<'ast>>) -> Stmt<'ast> {
        Stmt::Raise(self.alloc(RaiseStmt {
            exc,
            cause,
            span: self.span,
        }))
    }

    pub fn assert(&self, test: Expr<'ast>, msg: Option<Expr<'ast>>) -> Stmt<'ast> {
        Stmt::Assert(self.alloc(AssertStmt {
            test,
            msg,
            span: self.span,
        }))
    }

    pub fn import(&self, names: &[&str]) -> Stmt<'ast> {
        let aliases: Vec<_> = names
            .iter()
            .map(|n| Alias {
                name: self.intern(n),
                asname: None,
            })
            .collect();
        Stmt::Import(self.alloc(ImportStmt {
            names: self.slice(&aliases),
            span: self.span,
        }))
    }

    pub fn import_from(&self, module: &str, names: &[&str]) -> Stmt<'ast> {
        let aliases: Vec<_> = names
            .iter()
            .map(|n| Alias {
                name: self.intern(n),
                asname: None,
            })
            .collect();
        Stmt::ImportFrom(self.alloc(ImportFromStmt {
            module: Some(self.intern(module)),
            names: self.slice(&aliases),
            level: 0,
            span: self.span,
        }))
    }

    fn names_stmt(&self, names: &[&str]) -> &'ast NamesStmt<'ast> {
        let interned: Vec<&'ast str> = names.iter().map(|n| self.intern(n)).collect();
        self.alloc(NamesStmt {
            names: self.slice(&interned),
            span: self.span,
        })
    }

    pub fn global(&self, names: &[&str]) -> Stmt<'ast> {
        Stmt::Global(self.names_stmt(names))
    }

    pub fn nonlocal(&self, names: &[&str]) -> Stmt<'ast> {
        Stmt::Nonlocal(self.names_stmt(names))
    }

    pub fn with(&self, items: &[WithItem<'ast>], body: &[Stmt<'ast>]) -> Stmt<'ast> {
        Stmt::With(self.alloc(WithStmt {
            items: self.slice(items),
            body: self.slice(body),
            span: self.span,
        }))
    }

    pub fn with_item(&self, context_expr: Expr<'ast>, optional_vars: Option<Expr<'ast>>) -> WithItem<'ast> {
        WithItem {
            context_expr,
            optional_vars,
        }
    }

    pub fn match_(&self, subject: Expr<'ast>, cases: &[MatchCase<'ast>]) -> Stmt<'ast> {
        Stmt::Match(self.alloc(MatchStmt {
            subject,
            cases: self.slice(cases),
            span: self.span,
        }))
    }

    pub fn case(
        &self,
        pattern: Pattern<'ast>,
        guard: Option<Expr<'ast>>,
        body: &[Stmt<'ast>],
    ) -> MatchCase<'ast> {
        MatchCase {
            pattern,
            guard,
            body: self.slice(body),
        }
    }

    // ------------------------------------------------------------------
    // Patterns
    // ------------------------------------------------------------------

    pub fn p_value(&self, value: Expr<'ast>) -> Pattern<'ast> {
        Pattern::Value(self.alloc(ValuePattern {
            value,
            span: self.span,
        }))
    }

    pub fn p_singleton(&self, value: Constant<'ast>) -> Pattern<'ast> {
        Pattern::Singleton(self.alloc(SingletonPattern {
            value,
            span: self.span,
        }))
    }

    pub fn p_capture(&self, name: &str) -> Pattern<'ast> {
        Pattern::As(self.alloc(AsPattern {
            pattern: None,
            name: Some(self.intern(name)),
            span: self.span,
        }))
    }

    pub fn p_wildcard(&self) -> Pattern<'ast> {
        Pattern::As(self.alloc(AsPattern {
            pattern: None,
            name: None,
            span: self.span,
        }))
    }

    pub fn p_as(&self, pattern: Pattern<'ast>, name: &str) -> Pattern<'ast> {
        Pattern::As(self.alloc(AsPattern {
            pattern: Some(pattern),
            name: Some(self.intern(name)),
            span: self.span,
        }))
    }

    pub fn p_sequence(&self, patterns: &[Pattern<'ast>]) -> Pattern<'ast> {
        Pattern::Sequence(self.alloc(SequencePattern {
            patterns: self.slice(patterns),
            span: self.span,
        }))
    }

    pub fn p_star(&self, name: Option<&str>) -> Pattern<'ast> {
        Pattern::Star(self.alloc(StarPattern {
            name: name.map(|n| self.intern(n)),
            span: self.span,
        }))
    }

    pub fn p_mapping(
        &self,
        entries: &[(Expr<'ast>, Pattern<'ast>)],
        rest: Option<&str>,
    ) -> Pattern<'ast> {
        let keys: Vec<_> = entries.iter().map(|(k, _)| *k).collect();
        let patterns: Vec<_> = entries.iter().map(|(_, p)| *p).collect();
        Pattern::Mapping(self.alloc(MappingPattern {
            keys: self.slice(&keys),
            patterns: self.slice(&patterns),
            rest: rest.map(|r| self.intern(r)),
            span: self.span,
        }))
    }

    pub fn p_class(
        &self,
        cls: Expr<'ast>,
        patterns: &[Pattern<'ast>],
        keywords: &[(&str, Pattern<'ast>)],
    ) -> Pattern<'ast> {
        let attrs: Vec<&'ast str> = keywords.iter().map(|(a, _)| self.intern(a)).collect();
        let kwd_patterns: Vec<_> = keywords.iter().map(|(_, p)| *p).collect();
        Pattern::Class(self.alloc(ClassPattern {
            cls,
            patterns: self.slice(patterns),
            kwd_attrs: self.slice(&attrs),
            kwd_patterns: self.slice(&kwd_patterns),
            span: self.span,
        }))
    }

    pub fn p_or(&self, patterns: &[Pattern<'ast>]) -> Pattern<'ast> {
        Pattern::Or(self.alloc(OrPattern {
            patterns: self.slice(patterns),
            span: self.span,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_follow_builder() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena).at(7, 3);
        let e = b.bin(b.int(1), BinaryOp::Add, b.name("x"));
        assert_eq!(e.span(), Span::new(7, 3));
    }

    #[test]
    fn defaults_align_to_trailing_params() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let args = b.params_with_defaults(&["a", "b", "c"], &[b.int(1)]);
        assert_eq!(args.required(), 2);
        assert!(args.default_for(1).is_none());
        assert_eq!(args.default_for(2).and_then(|d| d.as_int()), Some(1));
    }

    #[test]
    fn pattern_bindings_in_order() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let p = b.p_sequence(&[b.p_capture("x"), b.p_wildcard(), b.p_star(Some("rest"))]);
        let mut names = Vec::new();
        p.bindings(&mut names);
        assert_eq!(names, vec!["x", "rest"]);
        assert!(b.p_capture("y").is_irrefutable());
        assert!(b.p_wildcard().is_wildcard());
        assert!(!p.is_irrefutable());
    }

    #[test]
    fn named_call_helper() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let call = b.call_name("len", &[b.name("xs")]);
        let (name, c) = call.as_named_call().expect("named call");
        assert_eq!(name, "len");
        assert_eq!(c.args.len(), 1);
    }
}
