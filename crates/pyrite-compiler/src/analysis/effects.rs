//! Side-effect summaries.
//!
//! An [`Effects`] summary answers the questions later passes ask about a
//! body or expression without re-walking it: does it call anything, which
//! names does it assign, which methods does it invoke. Nested `def`s and
//! lambdas are recorded but not entered.

use pyrite_ast::visitor::{Visitor, walk_expr, walk_stmt};
use pyrite_ast::*;
use rustc_hash::FxHashSet;

/// What a statement list or expression may do when executed.
#[derive(Debug, Default, Clone)]
pub struct Effects<'ast> {
    /// Any call expression.
    pub calls: bool,
    /// Any `:=`.
    pub walrus: bool,
    /// Any `yield` / `yield from`.
    pub yields: bool,
    /// Any nested `def`, `class` or `lambda`.
    pub nested_scopes: bool,
    /// Any `try` or `with`.
    pub handlers: bool,
    /// Any `raise` or `assert`.
    pub raises: bool,
    /// Any `del`.
    pub deletes: bool,
    /// Any `global` / `nonlocal` declaration.
    pub declarations: bool,
    /// Any slice used as an assignment or `del` target.
    pub slice_stores: bool,
    /// Names bound by assignments, loops, imports and handlers.
    pub assigned: FxHashSet<&'ast str>,
    /// Names read.
    pub read: FxHashSet<&'ast str>,
    /// Method names invoked as `x.name(...)`.
    pub methods: FxHashSet<&'ast str>,
    /// Plain-name callees invoked as `name(...)`.
    pub callees: FxHashSet<&'ast str>,
}

impl<'ast> Effects<'ast> {
    pub fn of_body(body: &'ast [Stmt<'ast>]) -> Self {
        let mut effects = Effects::default();
        for stmt in body {
            effects.visit_stmt(*stmt);
        }
        effects
    }

    pub fn of_expr(expr: Expr<'ast>) -> Self {
        let mut effects = Effects::default();
        effects.visit_expr(expr);
        effects
    }

    /// Free of anything whose duplication or reordering could be observed.
    pub fn is_pure(&self) -> bool {
        !(self.calls || self.walrus || self.yields || self.raises || self.deletes)
    }

    /// Whether executing this code may change the length of a list it can
    /// reach.
    pub fn may_resize_lists(&self) -> bool {
        const RESIZING: &[&str] = &["pop", "remove", "clear", "insert", "extend", "append", "__delitem__"];
        self.deletes || self.slice_stores || RESIZING.iter().any(|m| self.methods.contains(m))
    }

    fn assign_target(&mut self, target: Expr<'ast>) {
        match target {
            Expr::Name(n) => {
                self.assigned.insert(n.id);
            }
            Expr::Tuple(t) | Expr::List(t) => {
                for elt in t.elts {
                    self.assign_target(*elt);
                }
            }
            Expr::Starred(s) => self.assign_target(s.value),
            Expr::Subscript(s) => {
                if matches!(s.slice, Expr::Slice(_)) {
                    self.slice_stores = true;
                }
                self.visit_expr(s.value);
                self.visit_expr(s.slice);
            }
            other => self.visit_expr(other),
        }
    }
}

impl<'ast> Visitor<'ast> for Effects<'ast> {
    fn visit_stmt(&mut self, stmt: Stmt<'ast>) {
        match stmt {
            Stmt::FunctionDef(f) => {
                self.nested_scopes = true;
                self.assigned.insert(f.name);
                for deco in f.decorators {
                    self.visit_expr(*deco);
                }
                for default in f.args.defaults {
                    self.visit_expr(*default);
                }
            }
            Stmt::ClassDef(c) => {
                self.nested_scopes = true;
                self.assigned.insert(c.name);
            }
            Stmt::Assign(a) => {
                self.visit_expr(a.value);
                for target in a.targets {
                    self.assign_target(*target);
                }
            }
            Stmt::AugAssign(a) => {
                self.visit_expr(a.value);
                if let Expr::Name(n) = a.target {
                    self.read.insert(n.id);
                }
                self.assign_target(a.target);
            }
            Stmt::AnnAssign(a) => {
                if let Some(value) = a.value {
                    self.visit_expr(value);
                    self.assign_target(a.target);
                }
            }
            Stmt::For(f) => {
                self.visit_expr(f.iter);
                self.assign_target(f.target);
                for s in f.body.iter().chain(f.orelse) {
                    self.visit_stmt(*s);
                }
            }
            Stmt::With(w) => {
                self.handlers = true;
                self.calls = true;
                for item in w.items {
                    self.visit_expr(item.context_expr);
                    if let Some(vars) = item.optional_vars {
                        self.assign_target(vars);
                    }
                }
                for s in w.body {
                    self.visit_stmt(*s);
                }
            }
            Stmt::Try(t) => {
                self.handlers = true;
                walk_stmt(self, stmt);
                for handler in t.handlers {
                    if let Some(name) = handler.name {
                        self.assigned.insert(name);
                    }
                }
            }
            Stmt::Raise(_) | Stmt::Assert(_) => {
                self.raises = true;
                walk_stmt(self, stmt);
            }
            Stmt::Delete(d) => {
                self.deletes = true;
                for target in d.targets {
                    self.assign_target(*target);
                }
            }
            Stmt::Import(i) => {
                self.calls = true;
                self.assigned.extend(i.names.iter().map(|a| a.bound_name()));
            }
            Stmt::ImportFrom(i) => {
                self.calls = true;
                self.assigned.extend(i.names.iter().map(|a| a.bound_name()));
            }
            Stmt::Global(_) | Stmt::Nonlocal(_) => self.declarations = true,
            Stmt::Match(m) => {
                self.visit_expr(m.subject);
                for case in m.cases {
                    let mut names = Vec::new();
                    case.pattern.bindings(&mut names);
                    self.assigned.extend(names);
                    // Class and mapping patterns call into the runtime.
                    if !case.pattern.is_irrefutable() {
                        self.calls = true;
                    }
                    if let Some(guard) = case.guard {
                        self.visit_expr(guard);
                    }
                    for s in case.body {
                        self.visit_stmt(*s);
                    }
                }
            }
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: Expr<'ast>) {
        match expr {
            Expr::Call(call) => {
                self.calls = true;
                match call.func {
                    Expr::Attribute(attr) => {
                        self.methods.insert(attr.attr);
                    }
                    Expr::Name(n) => {
                        self.callees.insert(n.id);
                    }
                    _ => {}
                }
                walk_expr(self, expr);
            }
            Expr::NamedExpr(n) => {
                self.walrus = true;
                self.assigned.insert(n.target);
                self.visit_expr(n.value);
            }
            Expr::Yield(_) | Expr::YieldFrom(_) => {
                self.yields = true;
                walk_expr(self, expr);
            }
            Expr::Lambda(l) => {
                self.nested_scopes = true;
                for default in l.args.defaults {
                    self.visit_expr(*default);
                }
            }
            Expr::Let(l) => {
                for binding in l.bindings {
                    self.visit_expr(binding.value);
                    self.assigned.insert(binding.name);
                }
                self.visit_expr(l.body);
            }
            _ => walk_expr(self, expr),
        }
    }

    fn visit_name(&mut self, name: &NameExpr<'ast>) {
        self.read.insert(name.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;
    use pyrite_core::BinaryOp;

    #[test]
    fn pure_arithmetic_body() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let body = b.slice(&[
            b.assign_name("t", b.bin(b.name("a"), BinaryOp::Mult, b.int(2))),
            b.ret(Some(b.bin(b.name("t"), BinaryOp::Add, b.name("b")))),
        ]);
        let effects = Effects::of_body(body);
        assert!(effects.is_pure());
        assert!(effects.assigned.contains("t"));
        assert!(effects.read.contains("a") && effects.read.contains("b"));
        assert!(!effects.nested_scopes);
    }

    #[test]
    fn calls_and_methods_are_recorded() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let body = b.slice(&[
            b.expr_stmt(b.method_call(b.name("xs"), "pop", &[])),
            b.expr_stmt(b.call_name("helper", &[b.int(1)])),
        ]);
        let effects = Effects::of_body(body);
        assert!(!effects.is_pure());
        assert!(effects.methods.contains("pop"));
        assert!(effects.callees.contains("helper"));
        assert!(effects.may_resize_lists());
    }

    #[test]
    fn walrus_is_impure() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let effects = Effects::of_expr(b.named("n", b.int(3)));
        assert!(effects.walrus);
        assert!(!effects.is_pure());
        assert!(effects.assigned.contains("n"));
    }

    #[test]
    fn nested_scopes_are_not_entered() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let body = b.slice(&[b.func("inner", &[], &[b.expr_stmt(b.call_name("g", &[]))])]);
        let effects = Effects::of_body(body);
        assert!(effects.nested_scopes);
        assert!(!effects.calls);
        assert!(effects.assigned.contains("inner"));
    }

    #[test]
    fn slice_assignment_resizes() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let target = b.subscript(b.name("xs"), b.slice_expr(Some(b.int(0)), Some(b.int(1)), None));
        let body = b.slice(&[b.assign(target, b.list(&[]))]);
        assert!(Effects::of_body(body).may_resize_lists());
    }
}
