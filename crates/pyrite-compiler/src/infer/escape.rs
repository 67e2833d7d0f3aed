//! Escape analysis.
//!
//! A variable escapes when its value may be observed as an object outside
//! the arithmetic that produced it: passed to a call, returned, stored in a
//! container or attribute, yielded, used as a receiver, compared by
//! identity, or captured by a nested scope. Escaping variables keep boxed
//! storage.
//!
//! Only names whose *value* flows to such a position escape. `f(x + 1)`
//! lets the sum escape, not `x`. The analysis over-approximates: when in
//! doubt a name escapes.

use pyrite_ast::visitor::{Visitor, walk_expr, walk_stmt};
use pyrite_ast::*;
use pyrite_core::CmpOp;
use rustc_hash::FxHashSet;

use crate::analysis::Scope;

/// Names of `scope` that escape anywhere in `body`.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn compute<'ast>(body: &'ast [Stmt<'ast>], scope: &Scope<'ast>) -> FxHashSet<&'ast str> {
    let mut finder = EscapeFinder::default();
    for stmt in body {
        finder.visit_stmt(*stmt);
    }
    let mut escapes = finder.escapes;
    escapes.extend(scope.captured.iter().copied());
    escapes.extend(scope.free.iter().copied());
    escapes.extend(scope.declared_globals.iter().copied());
    escapes.extend(scope.declared_nonlocals.iter().copied());
    escapes
}

/// Escapes of a single expression (lambda bodies).
pub fn compute_expr<'ast>(expr: Expr<'ast>) -> FxHashSet<&'ast str> {
    let mut finder = EscapeFinder::default();
    finder.escape_value(expr);
    finder.escapes
}

#[derive(Default)]
struct EscapeFinder<'ast> {
    escapes: FxHashSet<&'ast str>,
}

impl<'ast> EscapeFinder<'ast> {
    /// `expr` is stored or handed out as an object.
    fn escape_value(&mut self, expr: Expr<'ast>) {
        match expr {
            Expr::Name(n) => {
                self.escapes.insert(n.id);
            }
            Expr::IfExp(i) => {
                self.visit_expr(i.test);
                self.escape_value(i.body);
                self.escape_value(i.orelse);
            }
            Expr::BoolOp(b) => {
                for value in b.values {
                    self.escape_value(*value);
                }
            }
            Expr::NamedExpr(n) => {
                self.escapes.insert(n.target);
                self.escape_value(n.value);
            }
            Expr::Let(l) => {
                for binding in l.bindings {
                    self.visit_expr(binding.value);
                }
                self.escape_value(l.body);
            }
            Expr::Starred(s) => self.escape_value(s.value),
            other => self.visit_expr(other),
        }
    }

    fn escape_all(&mut self, exprs: &'ast [Expr<'ast>]) {
        for expr in exprs {
            self.escape_value(*expr);
        }
    }

    fn store_target(&mut self, target: Expr<'ast>, value: Option<Expr<'ast>>) {
        match target {
            Expr::Name(_) => {}
            Expr::Tuple(t) | Expr::List(t) => {
                for elt in t.elts {
                    self.store_target(*elt, None);
                }
            }
            Expr::Starred(s) => self.store_target(s.value, None),
            Expr::Attribute(a) => {
                self.escape_value(a.value);
                if let Some(value) = value {
                    self.escape_value(value);
                }
            }
            Expr::Subscript(s) => {
                self.escape_value(s.value);
                self.visit_expr(s.slice);
                if let Some(value) = value {
                    self.escape_value(value);
                }
            }
            other => self.visit_expr(other),
        }
    }
}

impl<'ast> Visitor<'ast> for EscapeFinder<'ast> {
    fn visit_stmt(&mut self, stmt: Stmt<'ast>) {
        match stmt {
            Stmt::Assign(a) => {
                let plain = a.targets.iter().all(|t| matches!(t, Expr::Name(_)));
                if plain {
                    self.visit_expr(a.value);
                } else {
                    // Unpacking and stores hand the value to the runtime.
                    self.escape_value(a.value);
                }
                for target in a.targets {
                    self.store_target(*target, None);
                }
            }
            Stmt::AugAssign(a) => match a.target {
                Expr::Name(_) => self.visit_expr(a.value),
                target => self.store_target(target, Some(a.value)),
            },
            Stmt::AnnAssign(a) => {
                if let Some(value) = a.value {
                    match a.target {
                        Expr::Name(_) => self.visit_expr(value),
                        target => self.store_target(target, Some(value)),
                    }
                }
            }
            Stmt::Return(r) => {
                if let Some(value) = r.value {
                    self.escape_value(value);
                }
            }
            Stmt::For(f) => {
                match f.iter.as_named_call() {
                    // Range bounds are consumed as numbers.
                    Some(("range", call)) => {
                        for arg in call.args {
                            self.visit_expr(*arg);
                        }
                    }
                    _ => self.escape_value(f.iter),
                }
                self.store_target(f.target, None);
                for s in f.body.iter().chain(f.orelse) {
                    self.visit_stmt(*s);
                }
            }
            Stmt::With(w) => {
                for item in w.items {
                    self.escape_value(item.context_expr);
                    if let Some(vars) = item.optional_vars {
                        self.store_target(vars, None);
                    }
                }
                for s in w.body {
                    self.visit_stmt(*s);
                }
            }
            Stmt::Raise(r) => {
                if let Some(exc) = r.exc {
                    self.escape_value(exc);
                }
                if let Some(cause) = r.cause {
                    self.escape_value(cause);
                }
            }
            Stmt::Assert(a) => {
                self.visit_expr(a.test);
                if let Some(msg) = a.msg {
                    self.escape_value(msg);
                }
            }
            Stmt::Match(m) => {
                self.escape_value(m.subject);
                walk_stmt(self, stmt);
            }
            Stmt::Delete(d) => {
                for target in d.targets {
                    self.store_target(*target, None);
                }
            }
            Stmt::FunctionDef(f) => {
                self.escape_all(f.decorators);
                self.escape_all(f.args.defaults);
                for default in f.args.kw_defaults.iter().flatten() {
                    self.escape_value(*default);
                }
            }
            Stmt::ClassDef(c) => {
                self.escape_all(c.bases);
                self.escape_all(c.decorators);
            }
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: Expr<'ast>) {
        match expr {
            Expr::Call(call) => {
                match call.func {
                    Expr::Attribute(attr) => self.escape_value(attr.value),
                    Expr::Name(_) => {}
                    callee => self.escape_value(callee),
                }
                self.escape_all(call.args);
                for keyword in call.keywords {
                    self.escape_value(keyword.value);
                }
            }
            Expr::List(seq) | Expr::Tuple(seq) | Expr::Set(seq) => self.escape_all(seq.elts),
            Expr::Dict(d) => {
                for key in d.keys.iter().flatten() {
                    self.escape_value(*key);
                }
                self.escape_all(d.values);
            }
            Expr::ListComp(c) | Expr::SetComp(c) | Expr::GeneratorExp(c) => {
                self.escape_value(c.elt);
                for clause in c.generators {
                    self.escape_value(clause.iter);
                    for cond in clause.ifs {
                        self.visit_expr(*cond);
                    }
                }
            }
            Expr::DictComp(c) => {
                self.escape_value(c.key);
                self.escape_value(c.value);
                for clause in c.generators {
                    self.escape_value(clause.iter);
                    for cond in clause.ifs {
                        self.visit_expr(*cond);
                    }
                }
            }
            Expr::Yield(y) => {
                if let Some(value) = y.value {
                    self.escape_value(value);
                }
            }
            Expr::YieldFrom(y) => self.escape_value(y.value),
            Expr::Attribute(a) => self.escape_value(a.value),
            Expr::Subscript(s) => {
                self.escape_value(s.value);
                self.visit_expr(s.slice);
            }
            Expr::Compare(c) => {
                let mut left = c.left;
                for (op, right) in c.ops.iter().zip(c.comparators) {
                    match op {
                        CmpOp::Is | CmpOp::IsNot => {
                            self.escape_value(left);
                            self.escape_value(*right);
                        }
                        CmpOp::In | CmpOp::NotIn => {
                            self.escape_value(*right);
                            self.visit_expr(left);
                        }
                        _ => {
                            self.visit_expr(left);
                            self.visit_expr(*right);
                        }
                    }
                    left = *right;
                }
            }
            Expr::Lambda(l) => {
                self.escape_all(l.args.defaults);
            }
            Expr::NamedExpr(n) => self.visit_expr(n.value),
            _ => walk_expr(self, expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ScopeTree;
    use bumpalo::Bump;
    use pyrite_core::BinaryOp;

    fn escapes_of<'ast>(module: &Module<'ast>) -> Vec<&'ast str> {
        let tree = ScopeTree::build(module).unwrap();
        let mut names: Vec<_> = compute(module.body, tree.module()).into_iter().collect();
        names.sort_unstable();
        names
    }

    #[test]
    fn arithmetic_does_not_escape_operands() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[
            b.assign_name("x", b.int(1)),
            b.assign_name("y", b.bin(b.name("x"), BinaryOp::Add, b.int(2))),
            b.expr_stmt(b.call_name("print", &[b.bin(b.name("y"), BinaryOp::Mult, b.int(3))])),
        ]);
        assert!(escapes_of(&module).is_empty());
    }

    #[test]
    fn call_arguments_and_returns_escape() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[
            b.assign_name("x", b.int(1)),
            b.expr_stmt(b.call_name("print", &[b.name("x")])),
            b.assign_name("pair", b.tuple(&[b.name("a"), b.int(0)])),
        ]);
        assert_eq!(escapes_of(&module), vec!["a", "x"]);
    }

    #[test]
    fn stores_and_receivers_escape() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[
            b.assign(b.subscript(b.name("xs"), b.name("i")), b.name("v")),
            b.expr_stmt(b.method_call(b.name("n"), "bit_length", &[])),
        ]);
        assert_eq!(escapes_of(&module), vec!["n", "v", "xs"]);
    }

    #[test]
    fn conditional_values_flow_through() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[b.expr_stmt(
            b.call_name("f", &[b.if_exp(b.name("c"), b.name("a"), b.name("z"))]),
        )]);
        assert_eq!(escapes_of(&module), vec!["a", "z"]);
    }

    #[test]
    fn captured_names_escape() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let inner = b.func("inner", &[], &[b.ret(Some(b.name("count")))]);
        let outer = b.func(
            "outer",
            &[],
            &[b.assign_name("count", b.int(0)), inner, b.ret(Some(b.int(0)))],
        );
        let module = b.module(&[outer]);
        let tree = ScopeTree::build(&module).unwrap();
        let Stmt::FunctionDef(def) = outer else {
            unreachable!()
        };
        let scope = tree.get(tree.scope_of(def).unwrap());
        assert!(compute(def.body, scope).contains("count"));
    }
}
