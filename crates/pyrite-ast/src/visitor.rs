//! Visitor pattern for traversing the AST.
//!
//! [`Visitor`] has one `visit_*` method per interesting node kind. The
//! defaults call the matching `walk_*` function, which visits children in
//! source evaluation order. Override a method to observe a node; call the
//! `walk_*` function from the override to keep descending.
//!
//! Scope boundaries (`def`, `class`, `lambda`, comprehensions) have their own
//! hooks so analyses that must stop at a nested scope can do so by not
//! walking.
//!
//! # Example
//!
//! ```
//! use bumpalo::Bump;
//! use pyrite_ast::{AstBuilder, Expr, NameExpr, visitor::{Visitor, walk_module}};
//!
//! struct NameCounter(usize);
//!
//! impl<'ast> Visitor<'ast> for NameCounter {
//!     fn visit_name(&mut self, _name: &NameExpr<'ast>) {
//!         self.0 += 1;
//!     }
//! }
//!
//! let arena = Bump::new();
//! let b = AstBuilder::new(&arena);
//! let module = b.module(&[b.assign_name("x", b.name("y"))]);
//! let mut counter = NameCounter(0);
//! walk_module(&mut counter, &module);
//! assert_eq!(counter.0, 2);
//! ```

use crate::expr::*;
use crate::pattern::*;
use crate::stmt::*;

/// Read-only AST visitor.
pub trait Visitor<'ast>: Sized {
    // === Statements ===

    fn visit_stmt(&mut self, stmt: Stmt<'ast>) {
        walk_stmt(self, stmt);
    }

    /// A nested `def`. The default walks defaults, decorators and the body.
    fn visit_function_def(&mut self, func: &'ast FunctionDef<'ast>) {
        walk_function_def(self, func);
    }

    fn visit_class_def(&mut self, class: &'ast ClassDef<'ast>) {
        walk_class_def(self, class);
    }

    fn visit_except_handler(&mut self, handler: &'ast ExceptHandler<'ast>) {
        walk_except_handler(self, handler);
    }

    fn visit_match_case(&mut self, case: &'ast MatchCase<'ast>) {
        walk_match_case(self, case);
    }

    // === Expressions ===

    fn visit_expr(&mut self, expr: Expr<'ast>) {
        walk_expr(self, expr);
    }

    fn visit_name(&mut self, _name: &NameExpr<'ast>) {}

    fn visit_call(&mut self, call: &'ast CallExpr<'ast>) {
        walk_call(self, call);
    }

    fn visit_lambda(&mut self, lambda: &'ast LambdaExpr<'ast>) {
        walk_lambda(self, lambda);
    }

    /// List/set comprehension or generator expression.
    fn visit_comprehension_expr(&mut self, comp: &'ast ComprehensionExpr<'ast>) {
        walk_comprehension_expr(self, comp);
    }

    fn visit_dict_comp(&mut self, comp: &'ast DictCompExpr<'ast>) {
        walk_dict_comp(self, comp);
    }

    fn visit_comprehension(&mut self, clause: &'ast Comprehension<'ast>) {
        walk_comprehension(self, clause);
    }

    fn visit_arguments(&mut self, args: &'ast Arguments<'ast>) {
        walk_arguments(self, args);
    }

    // === Patterns ===

    fn visit_pattern(&mut self, pattern: Pattern<'ast>) {
        walk_pattern(self, pattern);
    }
}

pub fn walk_module<'ast, V: Visitor<'ast>>(visitor: &mut V, module: &Module<'ast>) {
    walk_body(visitor, module.body);
}

pub fn walk_body<'ast, V: Visitor<'ast>>(visitor: &mut V, body: &'ast [Stmt<'ast>]) {
    for stmt in body {
        visitor.visit_stmt(*stmt);
    }
}

pub fn walk_stmt<'ast, V: Visitor<'ast>>(visitor: &mut V, stmt: Stmt<'ast>) {
    match stmt {
        Stmt::FunctionDef(func) => visitor.visit_function_def(func),
        Stmt::ClassDef(class) => visitor.visit_class_def(class),
        Stmt::Return(ret) => {
            if let Some(value) = ret.value {
                visitor.visit_expr(value);
            }
        }
        Stmt::Delete(del) => walk_exprs(visitor, del.targets),
        Stmt::Assign(assign) => {
            visitor.visit_expr(assign.value);
            walk_exprs(visitor, assign.targets);
        }
        Stmt::AugAssign(aug) => {
            visitor.visit_expr(aug.target);
            visitor.visit_expr(aug.value);
        }
        Stmt::AnnAssign(ann) => {
            if let Some(value) = ann.value {
                visitor.visit_expr(value);
            }
            visitor.visit_expr(ann.target);
        }
        Stmt::For(f) => {
            visitor.visit_expr(f.iter);
            visitor.visit_expr(f.target);
            walk_body(visitor, f.body);
            walk_body(visitor, f.orelse);
        }
        Stmt::While(w) => {
            visitor.visit_expr(w.test);
            walk_body(visitor, w.body);
            walk_body(visitor, w.orelse);
        }
        Stmt::If(i) => {
            visitor.visit_expr(i.test);
            walk_body(visitor, i.body);
            walk_body(visitor, i.orelse);
        }
        Stmt::With(w) => {
            for item in w.items {
                visitor.visit_expr(item.context_expr);
                if let Some(vars) = item.optional_vars {
                    visitor.visit_expr(vars);
                }
            }
            walk_body(visitor, w.body);
        }
        Stmt::Match(m) => {
            visitor.visit_expr(m.subject);
            for case in m.cases {
                visitor.visit_match_case(case);
            }
        }
        Stmt::Raise(r) => {
            if let Some(exc) = r.exc {
                visitor.visit_expr(exc);
            }
            if let Some(cause) = r.cause {
                visitor.visit_expr(cause);
            }
        }
        Stmt::Try(t) => {
            walk_body(visitor, t.body);
            for handler in t.handlers {
                visitor.visit_except_handler(handler);
            }
            walk_body(visitor, t.orelse);
            walk_body(visitor, t.finalbody);
        }
        Stmt::Assert(a) => {
            visitor.visit_expr(a.test);
            if let Some(msg) = a.msg {
                visitor.visit_expr(msg);
            }
        }
        Stmt::Expr(e) => visitor.visit_expr(e.value),
        Stmt::Import(_)
        | Stmt::ImportFrom(_)
        | Stmt::Global(_)
        | Stmt::Nonlocal(_)
        | Stmt::Pass(_)
        | Stmt::Break(_)
        | Stmt::Continue(_) => {}
    }
}

pub fn walk_function_def<'ast, V: Visitor<'ast>>(visitor: &mut V, func: &'ast FunctionDef<'ast>) {
    walk_exprs(visitor, func.decorators);
    visitor.visit_arguments(func.args);
    walk_body(visitor, func.body);
}

pub fn walk_class_def<'ast, V: Visitor<'ast>>(visitor: &mut V, class: &'ast ClassDef<'ast>) {
    walk_exprs(visitor, class.decorators);
    walk_exprs(visitor, class.bases);
    for kw in class.keywords {
        visitor.visit_expr(kw.value);
    }
    walk_body(visitor, class.body);
}

pub fn walk_except_handler<'ast, V: Visitor<'ast>>(
    visitor: &mut V,
    handler: &'ast ExceptHandler<'ast>,
) {
    if let Some(typ) = handler.typ {
        visitor.visit_expr(typ);
    }
    walk_body(visitor, handler.body);
}

pub fn walk_match_case<'ast, V: Visitor<'ast>>(visitor: &mut V, case: &'ast MatchCase<'ast>) {
    visitor.visit_pattern(case.pattern);
    if let Some(guard) = case.guard {
        visitor.visit_expr(guard);
    }
    walk_body(visitor, case.body);
}

/// Visit parameter defaults (evaluated in the enclosing scope).
pub fn walk_arguments<'ast, V: Visitor<'ast>>(visitor: &mut V, args: &'ast Arguments<'ast>) {
    walk_exprs(visitor, args.defaults);
    for default in args.kw_defaults.iter().flatten() {
        visitor.visit_expr(*default);
    }
}

pub fn walk_exprs<'ast, V: Visitor<'ast>>(visitor: &mut V, exprs: &'ast [Expr<'ast>]) {
    for expr in exprs {
        visitor.visit_expr(*expr);
    }
}

pub fn walk_expr<'ast, V: Visitor<'ast>>(visitor: &mut V, expr: Expr<'ast>) {
    match expr {
        Expr::Constant(_) => {}
        Expr::Name(name) => visitor.visit_name(&name),
        Expr::BoolOp(b) => walk_exprs(visitor, b.values),
        Expr::NamedExpr(n) => visitor.visit_expr(n.value),
        Expr::BinOp(b) => {
            visitor.visit_expr(b.left);
            visitor.visit_expr(b.right);
        }
        Expr::UnaryOp(u) => visitor.visit_expr(u.operand),
        Expr::Lambda(l) => visitor.visit_lambda(l),
        Expr::IfExp(i) => {
            visitor.visit_expr(i.test);
            visitor.visit_expr(i.body);
            visitor.visit_expr(i.orelse);
        }
        Expr::Dict(d) => {
            for (key, value) in d.keys.iter().zip(d.values) {
                if let Some(key) = key {
                    visitor.visit_expr(*key);
                }
                visitor.visit_expr(*value);
            }
        }
        Expr::Set(s) | Expr::List(s) | Expr::Tuple(s) => walk_exprs(visitor, s.elts),
        Expr::ListComp(c) | Expr::SetComp(c) | Expr::GeneratorExp(c) => {
            visitor.visit_comprehension_expr(c)
        }
        Expr::DictComp(c) => visitor.visit_dict_comp(c),
        Expr::Yield(y) => {
            if let Some(value) = y.value {
                visitor.visit_expr(value);
            }
        }
        Expr::YieldFrom(y) => visitor.visit_expr(y.value),
        Expr::Compare(c) => {
            visitor.visit_expr(c.left);
            walk_exprs(visitor, c.comparators);
        }
        Expr::Call(c) => visitor.visit_call(c),
        Expr::JoinedStr(j) => walk_fstring_parts(visitor, j.values),
        Expr::Attribute(a) => visitor.visit_expr(a.value),
        Expr::Subscript(s) => {
            visitor.visit_expr(s.value);
            visitor.visit_expr(s.slice);
        }
        Expr::Starred(s) => visitor.visit_expr(s.value),
        Expr::Slice(s) => {
            for part in [s.lower, s.upper, s.step].into_iter().flatten() {
                visitor.visit_expr(part);
            }
        }
        Expr::Let(l) => {
            for binding in l.bindings {
                visitor.visit_expr(binding.value);
            }
            visitor.visit_expr(l.body);
        }
    }
}

pub fn walk_fstring_parts<'ast, V: Visitor<'ast>>(visitor: &mut V, parts: &'ast [FStringPart<'ast>]) {
    for part in parts {
        if let FStringPart::Formatted(formatted) = part {
            visitor.visit_expr(formatted.value);
            if let Some(spec) = formatted.format_spec {
                walk_fstring_parts(visitor, spec);
            }
        }
    }
}

pub fn walk_call<'ast, V: Visitor<'ast>>(visitor: &mut V, call: &'ast CallExpr<'ast>) {
    visitor.visit_expr(call.func);
    walk_exprs(visitor, call.args);
    for kw in call.keywords {
        visitor.visit_expr(kw.value);
    }
}

pub fn walk_lambda<'ast, V: Visitor<'ast>>(visitor: &mut V, lambda: &'ast LambdaExpr<'ast>) {
    visitor.visit_arguments(lambda.args);
    visitor.visit_expr(lambda.body);
}

pub fn walk_comprehension_expr<'ast, V: Visitor<'ast>>(
    visitor: &mut V,
    comp: &'ast ComprehensionExpr<'ast>,
) {
    for clause in comp.generators {
        visitor.visit_comprehension(clause);
    }
    visitor.visit_expr(comp.elt);
}

pub fn walk_dict_comp<'ast, V: Visitor<'ast>>(visitor: &mut V, comp: &'ast DictCompExpr<'ast>) {
    for clause in comp.generators {
        visitor.visit_comprehension(clause);
    }
    visitor.visit_expr(comp.key);
    visitor.visit_expr(comp.value);
}

pub fn walk_comprehension<'ast, V: Visitor<'ast>>(visitor: &mut V, clause: &'ast Comprehension<'ast>) {
    visitor.visit_expr(clause.iter);
    visitor.visit_expr(clause.target);
    walk_exprs(visitor, clause.ifs);
}

pub fn walk_pattern<'ast, V: Visitor<'ast>>(visitor: &mut V, pattern: Pattern<'ast>) {
    match pattern {
        Pattern::Value(p) => visitor.visit_expr(p.value),
        Pattern::Singleton(_) | Pattern::Star(_) => {}
        Pattern::Sequence(p) => {
            for sub in p.patterns {
                visitor.visit_pattern(*sub);
            }
        }
        Pattern::Mapping(p) => {
            walk_exprs(visitor, p.keys);
            for sub in p.patterns {
                visitor.visit_pattern(*sub);
            }
        }
        Pattern::Class(p) => {
            visitor.visit_expr(p.cls);
            for sub in p.patterns.iter().chain(p.kwd_patterns) {
                visitor.visit_pattern(*sub);
            }
        }
        Pattern::As(p) => {
            if let Some(inner) = p.pattern {
                visitor.visit_pattern(inner);
            }
        }
        Pattern::Or(p) => {
            for alt in p.patterns {
                visitor.visit_pattern(*alt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AstBuilder;
    use bumpalo::Bump;
    use pyrite_core::BinaryOp;

    /// Collects call names without entering nested functions.
    struct ShallowCalls<'ast> {
        names: Vec<&'ast str>,
    }

    impl<'ast> Visitor<'ast> for ShallowCalls<'ast> {
        fn visit_function_def(&mut self, _func: &'ast FunctionDef<'ast>) {}

        fn visit_call(&mut self, call: &'ast CallExpr<'ast>) {
            if let Some(name) = call.func.as_name() {
                self.names.push(name);
            }
            walk_call(self, call);
        }
    }

    #[test]
    fn stops_at_overridden_scope() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[
            b.func("inner", &[], &[b.expr_stmt(b.call_name("hidden", &[]))]),
            b.expr_stmt(b.call_name("outer", &[b.call_name("arg", &[])])),
        ]);
        let mut v = ShallowCalls { names: Vec::new() };
        walk_module(&mut v, &module);
        assert_eq!(v.names, vec!["outer", "arg"]);
    }

    #[test]
    fn walks_let_bindings_before_body() {
        struct Order<'ast>(Vec<&'ast str>);
        impl<'ast> Visitor<'ast> for Order<'ast> {
            fn visit_name(&mut self, name: &NameExpr<'ast>) {
                self.0.push(name.id);
            }
        }
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let e = b.let_(
            &[b.let_binding("t", b.name("a"))],
            b.bin(b.name("t"), BinaryOp::Add, b.name("b")),
        );
        let mut v = Order(Vec::new());
        v.visit_expr(e);
        assert_eq!(v.0, vec!["a", "t", "b"]);
    }
}
