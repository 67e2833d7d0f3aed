//! Native storage planning.
//!
//! A local is stored as a raw `i32`/`i64`/`f64` instead of a boxed
//! reference when all of these hold:
//!
//! - its inferred type is `int` or `float` (or it carries a native annotation)
//! - it never escapes (see [`super::escape`])
//! - it lives in a plain local: not a cell, free, declared global or deleted
//! - every binding of it is a plain assignment, augmented assignment,
//!   annotated assignment, `:=`, inliner let, or a `for ... in range(...)`
//! - it is not an unannotated parameter
//!
//! Integers get `i64`. `i32` is reserved for `range` counters whose bounds
//! are provably 32-bit: integer constants that fit, `len(...)`, or another
//! `i32` counter.

use pyrite_ast::visitor::{Visitor, walk_expr, walk_stmt};
use pyrite_ast::*;
use pyrite_core::{InferredType, NativeType, fits_i32};
use rustc_hash::{FxHashMap, FxHashSet};

use super::TypeInferencer;
use crate::analysis::Scope;

/// Chosen native storage for one function body.
#[derive(Debug, Default, Clone)]
pub struct NativePlan<'ast> {
    natives: FxHashMap<&'ast str, NativeType>,
}

impl<'ast> NativePlan<'ast> {
    pub fn get(&self, name: &str) -> Option<NativeType> {
        self.natives.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.natives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.natives.is_empty()
    }

    /// Native locals sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&'ast str, NativeType)> + '_ {
        let mut entries: Vec<_> = self.natives.iter().map(|(n, t)| (*n, *t)).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter()
    }
}

/// Decide native storage for the locals of `scope`.
///
/// `excluded` names keep boxed storage regardless (module globals read by
/// functions).
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn plan<'ast>(
    scope: &Scope<'ast>,
    body: &'ast [Stmt<'ast>],
    types: &TypeInferencer<'_, 'ast>,
    escapes: &FxHashSet<&'ast str>,
    excluded: &FxHashSet<&'ast str>,
) -> NativePlan<'ast> {
    let mut forms = BindingForms::default();
    for stmt in body {
        forms.visit_stmt(*stmt);
    }

    let mut plan = NativePlan::default();
    for &name in &scope.locals {
        if escapes.contains(name)
            || excluded.contains(name)
            || scope.deleted.contains(name)
            || scope.is_captured(name)
            || scope.free.contains(name)
            || forms.irregular.contains(name)
        {
            continue;
        }
        let annotated = types.annotated_native(name);
        if scope.params.contains(&name) && annotated.is_none() {
            continue;
        }
        let native = match (types.var_type(name), annotated) {
            (InferredType::Float, _) => NativeType::F64,
            (InferredType::Int, Some(NativeType::F64)) => continue,
            (InferredType::Int, _) => NativeType::I64,
            _ => continue,
        };
        plan.natives.insert(name, native);
    }

    // Counters narrow to i32 once their bounds are proven; a counter bounded
    // by another counter needs that one decided first.
    loop {
        let mut changed = false;
        for (name, range) in &forms.range_counters {
            if plan.get(name) != Some(NativeType::I64) || forms.bindings(name) != 1 {
                continue;
            }
            if range_is_i32(range, &plan, types) {
                plan.natives.insert(name, NativeType::I32);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    if !plan.is_empty() {
        tracing::trace!(scope = scope.name, natives = plan.len(), "planned native locals");
    }
    plan
}

fn range_is_i32(args: &[Expr<'_>], plan: &NativePlan<'_>, types: &TypeInferencer<'_, '_>) -> bool {
    if args.is_empty() || args.len() > 3 {
        return false;
    }
    if args.len() == 3 && !args[2].as_int().is_some_and(|s| s != 0 && fits_i32(s)) {
        return false;
    }
    args.iter().all(|arg| match arg {
        Expr::Constant(_) => arg.as_int().is_some_and(fits_i32),
        Expr::Name(n) => plan.get(n.id) == Some(NativeType::I32),
        Expr::Call(call) => matches!(call.func, Expr::Name(f) if f.id == "len" && types.is_builtin("len")),
        _ => false,
    })
}

/// How each name gets bound in a body.
#[derive(Default)]
struct BindingForms<'ast> {
    /// Names bound at least once by something other than a plain assignment.
    irregular: FxHashSet<&'ast str>,
    /// `for name in range(args)` loops, one entry per loop.
    range_counters: Vec<(&'ast str, &'ast [Expr<'ast>])>,
    counts: FxHashMap<&'ast str, u32>,
}

impl<'ast> BindingForms<'ast> {
    fn bindings(&self, name: &str) -> u32 {
        self.counts.get(name).copied().unwrap_or(0)
    }

    fn simple(&mut self, name: &'ast str) {
        *self.counts.entry(name).or_insert(0) += 1;
    }

    fn irregular_target(&mut self, target: Expr<'ast>) {
        match target {
            Expr::Name(n) => {
                self.simple(n.id);
                self.irregular.insert(n.id);
            }
            Expr::Tuple(t) | Expr::List(t) => {
                for elt in t.elts {
                    self.irregular_target(*elt);
                }
            }
            Expr::Starred(s) => self.irregular_target(s.value),
            other => self.visit_expr(other),
        }
    }

    fn target(&mut self, target: Expr<'ast>) {
        match target {
            Expr::Name(n) => self.simple(n.id),
            other => self.irregular_target(other),
        }
    }
}

impl<'ast> Visitor<'ast> for BindingForms<'ast> {
    fn visit_stmt(&mut self, stmt: Stmt<'ast>) {
        match stmt {
            Stmt::Assign(a) => {
                self.visit_expr(a.value);
                for target in a.targets {
                    self.target(*target);
                }
            }
            Stmt::AugAssign(a) => {
                self.visit_expr(a.value);
                self.target(a.target);
            }
            Stmt::AnnAssign(a) => {
                if let Some(value) = a.value {
                    self.visit_expr(value);
                    self.target(a.target);
                }
            }
            Stmt::For(f) => {
                match (f.target, f.iter.as_named_call()) {
                    (Expr::Name(n), Some(("range", call))) if call.keywords.is_empty() && !call.has_starred() => {
                        self.simple(n.id);
                        self.range_counters.push((n.id, call.args));
                        walk_exprs_of(self, call.args);
                    }
                    _ => {
                        self.visit_expr(f.iter);
                        self.irregular_target(f.target);
                    }
                }
                for s in f.body.iter().chain(f.orelse) {
                    self.visit_stmt(*s);
                }
            }
            Stmt::With(w) => {
                for item in w.items {
                    self.visit_expr(item.context_expr);
                    if let Some(vars) = item.optional_vars {
                        self.irregular_target(vars);
                    }
                }
                for s in w.body {
                    self.visit_stmt(*s);
                }
            }
            Stmt::Try(t) => {
                for handler in t.handlers {
                    if let Some(name) = handler.name {
                        self.irregular.insert(name);
                    }
                }
                walk_stmt(self, stmt);
            }
            Stmt::Match(m) => {
                for case in m.cases {
                    let mut names = Vec::new();
                    case.pattern.bindings(&mut names);
                    self.irregular.extend(names);
                }
                walk_stmt(self, stmt);
            }
            Stmt::Delete(d) => {
                for target in d.targets {
                    self.irregular_target(*target);
                }
            }
            Stmt::FunctionDef(f) => {
                self.irregular.insert(f.name);
            }
            Stmt::ClassDef(c) => {
                self.irregular.insert(c.name);
            }
            Stmt::Import(i) => self.irregular.extend(i.names.iter().map(|a| a.bound_name())),
            Stmt::ImportFrom(i) => self.irregular.extend(i.names.iter().map(|a| a.bound_name())),
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: Expr<'ast>) {
        match expr {
            Expr::NamedExpr(n) => {
                self.visit_expr(n.value);
                self.simple(n.target);
            }
            Expr::Let(l) => {
                for binding in l.bindings {
                    self.visit_expr(binding.value);
                    self.simple(binding.name);
                }
                self.visit_expr(l.body);
            }
            Expr::Lambda(_) => {}
            _ => walk_expr(self, expr),
        }
    }
}

fn walk_exprs_of<'ast>(forms: &mut BindingForms<'ast>, exprs: &'ast [Expr<'ast>]) {
    for expr in exprs {
        forms.visit_expr(*expr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ScopeTree;
    use crate::infer::{ModuleFacts, escape};
    use bumpalo::Bump;
    use pyrite_core::BinaryOp;

    fn plan_module<'ast>(module: &Module<'ast>) -> Vec<(&'ast str, NativeType)> {
        let tree = ScopeTree::build(module).unwrap();
        let facts = ModuleFacts::build(module, &tree);
        let mut types = TypeInferencer::new(&facts);
        let escapes = escape::compute(module.body, tree.module());
        types.analyze(module.body, &escapes);
        let excluded: FxHashSet<&str> = tree.module_globals().into_iter().collect();
        plan(tree.module(), module.body, &types, &escapes, &excluded)
            .iter()
            .collect()
    }

    #[test]
    fn accumulator_and_counter() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[
            b.assign_name("total", b.int(0)),
            b.for_range(
                "i",
                &[b.int(1000)],
                &[b.aug_assign(b.name("total"), BinaryOp::Add, b.bin(b.name("i"), BinaryOp::Mult, b.name("i")))],
            ),
            b.assign_name("result", b.bin(b.name("total"), BinaryOp::Mult, b.int(2))),
        ]);
        assert_eq!(
            plan_module(&module),
            vec![
                ("i", NativeType::I32),
                ("result", NativeType::I64),
                ("total", NativeType::I64)
            ]
        );
    }

    #[test]
    fn escaping_values_stay_boxed() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[
            b.assign_name("x", b.float(1.5)),
            b.assign_name("y", b.float(2.5)),
            b.expr_stmt(b.call_name("print", &[b.name("x")])),
        ]);
        assert_eq!(plan_module(&module), vec![("y", NativeType::F64)]);
    }

    #[test]
    fn unbounded_counter_uses_i64() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[
            b.assign_name("n", b.int(10)),
            b.for_range("i", &[b.name("n")], &[b.pass()]),
            b.for_range("j", &[b.int(1 << 40)], &[b.pass()]),
        ]);
        let planned = plan_module(&module);
        assert!(planned.contains(&("i", NativeType::I64)));
        assert!(planned.contains(&("j", NativeType::I64)));
    }

    #[test]
    fn nested_counter_bounded_by_outer_counter() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[b.for_range(
            "i",
            &[b.call_name("len", &[b.name("items")])],
            &[b.for_range("j", &[b.name("i")], &[b.pass()])],
        )]);
        assert_eq!(
            plan_module(&module),
            vec![("i", NativeType::I32), ("j", NativeType::I32)]
        );
    }

    #[test]
    fn unpacked_and_mixed_bindings_stay_boxed() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[
            b.assign(b.tuple(&[b.name("a"), b.name("c")]), b.tuple(&[b.int(1), b.int(2)])),
            b.assign_name("s", b.int(1)),
            b.assign_name("s", b.str("text")),
        ]);
        assert!(plan_module(&module).is_empty());
    }
}
