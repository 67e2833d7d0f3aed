//! Call-site substitution.
//!
//! The rewriter copies the module, replacing each eligible call of a
//! selected candidate with a [`LetExpr`] that binds renamed parameters to the
//! arguments, then the renamed locals, then evaluates the renamed return
//! expression:
//!
//! ```text
//! mix(x, 2)
//!   => let __inl3_a = x, __inl3_b = 2, __inl3_t = __inl3_a * 31
//!      in __inl3_t ^ __inl3_b
//! ```
//!
//! Only function bodies are rewritten. Module-level statements and lambda
//! bodies are copied unchanged.

use bumpalo::Bump;
use pyrite_ast::*;
use pyrite_core::Span;
use rustc_hash::FxHashMap;

use super::candidates::Candidate;
use crate::analysis::{ScopeId, ScopeTree};

/// Copies a module with inlined call sites.
pub struct Rewriter<'t, 'ast> {
    b: AstBuilder<'ast>,
    tree: &'t ScopeTree<'ast>,
    candidates: &'t FxHashMap<&'ast str, Candidate<'ast>>,
    /// Scope of the function being rewritten.
    scope: Option<ScopeId>,
    /// Name of the function being rewritten.
    caller: &'ast str,
    /// Comprehension targets in scope.
    comp_bound: Vec<&'ast str>,
    inlined: usize,
}

impl<'t, 'ast> Rewriter<'t, 'ast> {
    pub fn new(
        b: AstBuilder<'ast>,
        tree: &'t ScopeTree<'ast>,
        candidates: &'t FxHashMap<&'ast str, Candidate<'ast>>,
    ) -> Self {
        Self {
            b,
            tree,
            candidates,
            scope: None,
            caller: "",
            comp_bound: Vec::new(),
            inlined: 0,
        }
    }

    /// Number of call sites replaced so far.
    pub fn inlined(&self) -> usize {
        self.inlined
    }

    pub fn module(&mut self, module: &Module<'ast>) -> Module<'ast> {
        let body: Vec<Stmt<'ast>> = module
            .body
            .iter()
            .map(|stmt| match stmt {
                Stmt::FunctionDef(f) => Stmt::FunctionDef(self.function_def(f)),
                Stmt::ClassDef(c) => Stmt::ClassDef(self.class_methods(c)),
                other => *other,
            })
            .collect();
        Module {
            body: self.b.slice(&body),
        }
    }

    // ==========================================================================
    // Definitions
    // ==========================================================================

    fn function_def(&mut self, func: &'ast FunctionDef<'ast>) -> &'ast FunctionDef<'ast> {
        let Some(id) = self.tree.scope_of(func) else {
            return func;
        };
        let saved = (self.scope.replace(id), std::mem::replace(&mut self.caller, func.name));
        let saved_comp = std::mem::take(&mut self.comp_bound);
        let body = self.body(func.body);
        self.scope = saved.0;
        self.caller = saved.1;
        self.comp_bound = saved_comp;
        alloc(self.b.arena(), FunctionDef { body, ..*func })
    }

    /// Rewrites the methods of a class; other class-body statements are kept.
    fn class_methods(&mut self, class: &'ast ClassDef<'ast>) -> &'ast ClassDef<'ast> {
        let body: Vec<Stmt<'ast>> = class
            .body
            .iter()
            .map(|stmt| match stmt {
                Stmt::FunctionDef(f) => Stmt::FunctionDef(self.function_def(f)),
                other => *other,
            })
            .collect();
        alloc(self.b.arena(), ClassDef {
            body: self.b.slice(&body),
            ..*class
        })
    }

    // ==========================================================================
    // Statements
    // ==========================================================================

    fn body(&mut self, body: &'ast [Stmt<'ast>]) -> &'ast [Stmt<'ast>] {
        let out: Vec<Stmt<'ast>> = body.iter().map(|s| self.stmt(*s)).collect();
        self.b.slice(&out)
    }

    fn stmt(&mut self, stmt: Stmt<'ast>) -> Stmt<'ast> {
        match stmt {
            Stmt::FunctionDef(f) => {
                let decorators = self.exprs(f.decorators);
                let defaults = self.exprs(f.args.defaults);
                let args = alloc(self.b.arena(), Arguments { defaults, ..*f.args });
                let inner = self.function_def(f);
                Stmt::FunctionDef(alloc(self.b.arena(), FunctionDef {
                    decorators,
                    args,
                    ..*inner
                }))
            }
            Stmt::ClassDef(c) => Stmt::ClassDef(self.class_methods(c)),
            Stmt::Return(r) => Stmt::Return(alloc(self.b.arena(), ReturnStmt {
                value: self.opt(r.value),
                ..*r
            })),
            Stmt::Delete(d) => Stmt::Delete(alloc(self.b.arena(), DeleteStmt {
                targets: self.exprs(d.targets),
                ..*d
            })),
            Stmt::Assign(a) => {
                let value = self.expr(a.value);
                Stmt::Assign(alloc(self.b.arena(), AssignStmt {
                    targets: self.exprs(a.targets),
                    value,
                    ..*a
                }))
            }
            Stmt::AugAssign(a) => {
                let value = self.expr(a.value);
                Stmt::AugAssign(alloc(self.b.arena(), AugAssignStmt {
                    target: self.expr(a.target),
                    value,
                    ..*a
                }))
            }
            Stmt::AnnAssign(a) => Stmt::AnnAssign(alloc(self.b.arena(), AnnAssignStmt {
                value: self.opt(a.value),
                ..*a
            })),
            Stmt::For(f) => {
                let iter = self.expr(f.iter);
                Stmt::For(alloc(self.b.arena(), ForStmt {
                    iter,
                    body: self.body(f.body),
                    orelse: self.body(f.orelse),
                    ..*f
                }))
            }
            Stmt::While(w) => {
                let test = self.expr(w.test);
                Stmt::While(alloc(self.b.arena(), WhileStmt {
                    test,
                    body: self.body(w.body),
                    orelse: self.body(w.orelse),
                    ..*w
                }))
            }
            Stmt::If(i) => {
                let test = self.expr(i.test);
                Stmt::If(alloc(self.b.arena(), IfStmt {
                    test,
                    body: self.body(i.body),
                    orelse: self.body(i.orelse),
                    ..*i
                }))
            }
            Stmt::With(w) => {
                let items: Vec<WithItem<'ast>> = w
                    .items
                    .iter()
                    .map(|item| WithItem {
                        context_expr: self.expr(item.context_expr),
                        optional_vars: item.optional_vars,
                    })
                    .collect();
                Stmt::With(alloc(self.b.arena(), WithStmt {
                    items: self.b.slice(&items),
                    body: self.body(w.body),
                    ..*w
                }))
            }
            Stmt::Match(m) => {
                let subject = self.expr(m.subject);
                let cases: Vec<MatchCase<'ast>> = m
                    .cases
                    .iter()
                    .map(|case| MatchCase {
                        pattern: case.pattern,
                        guard: self.opt(case.guard),
                        body: self.body(case.body),
                    })
                    .collect();
                Stmt::Match(alloc(self.b.arena(), MatchStmt {
                    subject,
                    cases: self.b.slice(&cases),
                    ..*m
                }))
            }
            Stmt::Raise(r) => Stmt::Raise(alloc(self.b.arena(), RaiseStmt {
                exc: self.opt(r.exc),
                cause: self.opt(r.cause),
                ..*r
            })),
            Stmt::Try(t) => {
                let body = self.body(t.body);
                let handlers: Vec<ExceptHandler<'ast>> = t
                    .handlers
                    .iter()
                    .map(|h| ExceptHandler {
                        body: self.body(h.body),
                        ..*h
                    })
                    .collect();
                Stmt::Try(alloc(self.b.arena(), TryStmt {
                    body,
                    handlers: self.b.slice(&handlers),
                    orelse: self.body(t.orelse),
                    finalbody: self.body(t.finalbody),
                    ..*t
                }))
            }
            Stmt::Assert(a) => Stmt::Assert(alloc(self.b.arena(), AssertStmt {
                test: self.expr(a.test),
                msg: self.opt(a.msg),
                ..*a
            })),
            Stmt::Expr(e) => Stmt::Expr(alloc(self.b.arena(), ExprStmt {
                value: self.expr(e.value),
                ..*e
            })),
            Stmt::Import(_)
            | Stmt::ImportFrom(_)
            | Stmt::Global(_)
            | Stmt::Nonlocal(_)
            | Stmt::Pass(_)
            | Stmt::Break(_)
            | Stmt::Continue(_) => stmt,
        }
    }

    // ==========================================================================
    // Expressions
    // ==========================================================================

    fn opt(&mut self, expr: Option<Expr<'ast>>) -> Option<Expr<'ast>> {
        expr.map(|e| self.expr(e))
    }

    fn exprs(&mut self, exprs: &'ast [Expr<'ast>]) -> &'ast [Expr<'ast>] {
        if exprs.is_empty() {
            return exprs;
        }
        let out: Vec<Expr<'ast>> = exprs.iter().map(|e| self.expr(*e)).collect();
        self.b.slice(&out)
    }

    fn expr(&mut self, expr: Expr<'ast>) -> Expr<'ast> {
        match expr {
            Expr::Constant(_) | Expr::Name(_) | Expr::Lambda(_) => expr,
            Expr::Call(call) => {
                let args = self.exprs(call.args);
                let keywords: Vec<Keyword<'ast>> = call
                    .keywords
                    .iter()
                    .map(|k| Keyword {
                        value: self.expr(k.value),
                        ..*k
                    })
                    .collect();
                let func = self.expr(call.func);
                if let Some(candidate) = self.eligible(call) {
                    return self.substitute(candidate, args, call.span);
                }
                Expr::Call(alloc(self.b.arena(), CallExpr {
                    func,
                    args,
                    keywords: self.b.slice(&keywords),
                    ..*call
                }))
            }
            Expr::BoolOp(b) => Expr::BoolOp(alloc(self.b.arena(), BoolOpExpr {
                values: self.exprs(b.values),
                ..*b
            })),
            Expr::NamedExpr(n) => Expr::NamedExpr(alloc(self.b.arena(), NamedExpr {
                value: self.expr(n.value),
                ..*n
            })),
            Expr::BinOp(b) => {
                let left = self.expr(b.left);
                Expr::BinOp(alloc(self.b.arena(), BinOpExpr {
                    left,
                    right: self.expr(b.right),
                    ..*b
                }))
            }
            Expr::UnaryOp(u) => Expr::UnaryOp(alloc(self.b.arena(), UnaryOpExpr {
                operand: self.expr(u.operand),
                ..*u
            })),
            Expr::IfExp(i) => {
                let test = self.expr(i.test);
                let body = self.expr(i.body);
                Expr::IfExp(alloc(self.b.arena(), IfExpr {
                    test,
                    body,
                    orelse: self.expr(i.orelse),
                    ..*i
                }))
            }
            Expr::Dict(d) => {
                let mut keys = Vec::with_capacity(d.keys.len());
                let mut values = Vec::with_capacity(d.values.len());
                for (key, value) in d.keys.iter().zip(d.values) {
                    keys.push(self.opt(*key));
                    values.push(self.expr(*value));
                }
                Expr::Dict(alloc(self.b.arena(), DictExpr {
                    keys: self.b.slice(&keys),
                    values: self.b.slice(&values),
                    ..*d
                }))
            }
            Expr::Set(s) => Expr::Set(self.sequence(s)),
            Expr::List(s) => Expr::List(self.sequence(s)),
            Expr::Tuple(s) => Expr::Tuple(self.sequence(s)),
            Expr::ListComp(c) => Expr::ListComp(self.comprehension(c)),
            Expr::SetComp(c) => Expr::SetComp(self.comprehension(c)),
            Expr::GeneratorExp(c) => Expr::GeneratorExp(self.comprehension(c)),
            Expr::DictComp(c) => {
                let mark = self.comp_bound.len();
                let generators = self.generators(c.generators);
                let key = self.expr(c.key);
                let value = self.expr(c.value);
                self.comp_bound.truncate(mark);
                Expr::DictComp(alloc(self.b.arena(), DictCompExpr {
                    key,
                    value,
                    generators,
                    ..*c
                }))
            }
            Expr::Yield(y) => Expr::Yield(alloc(self.b.arena(), YieldExpr {
                value: self.opt(y.value),
                ..*y
            })),
            Expr::YieldFrom(y) => Expr::YieldFrom(alloc(self.b.arena(), YieldFromExpr {
                value: self.expr(y.value),
                ..*y
            })),
            Expr::Compare(c) => {
                let left = self.expr(c.left);
                Expr::Compare(alloc(self.b.arena(), CompareExpr {
                    left,
                    comparators: self.exprs(c.comparators),
                    ..*c
                }))
            }
            Expr::JoinedStr(j) => {
                let values = self.fstring_parts(j.values);
                Expr::JoinedStr(alloc(self.b.arena(), JoinedStrExpr { values, ..*j }))
            }
            Expr::Attribute(a) => Expr::Attribute(alloc(self.b.arena(), AttributeExpr {
                value: self.expr(a.value),
                ..*a
            })),
            Expr::Subscript(s) => {
                let value = self.expr(s.value);
                Expr::Subscript(alloc(self.b.arena(), SubscriptExpr {
                    value,
                    slice: self.expr(s.slice),
                    ..*s
                }))
            }
            Expr::Starred(s) => Expr::Starred(alloc(self.b.arena(), StarredExpr {
                value: self.expr(s.value),
                ..*s
            })),
            Expr::Slice(s) => {
                let lower = self.opt(s.lower);
                let upper = self.opt(s.upper);
                Expr::Slice(alloc(self.b.arena(), SliceExpr {
                    lower,
                    upper,
                    step: self.opt(s.step),
                    ..*s
                }))
            }
            Expr::Let(l) => {
                let bindings: Vec<LetBinding<'ast>> = l
                    .bindings
                    .iter()
                    .map(|binding| LetBinding {
                        name: binding.name,
                        value: self.expr(binding.value),
                    })
                    .collect();
                Expr::Let(alloc(self.b.arena(), LetExpr {
                    bindings: self.b.slice(&bindings),
                    body: self.expr(l.body),
                    ..*l
                }))
            }
        }
    }

    fn sequence(&mut self, seq: &'ast SequenceExpr<'ast>) -> &'ast SequenceExpr<'ast> {
        alloc(self.b.arena(), SequenceExpr {
            elts: self.exprs(seq.elts),
            ..*seq
        })
    }

    fn comprehension(&mut self, comp: &'ast ComprehensionExpr<'ast>) -> &'ast ComprehensionExpr<'ast> {
        let mark = self.comp_bound.len();
        let generators = self.generators(comp.generators);
        let elt = self.expr(comp.elt);
        self.comp_bound.truncate(mark);
        alloc(self.b.arena(), ComprehensionExpr {
            elt,
            generators,
            ..*comp
        })
    }

    /// Rewrites comprehension clauses, leaving their targets in `comp_bound`.
    fn generators(&mut self, generators: &'ast [Comprehension<'ast>]) -> &'ast [Comprehension<'ast>] {
        let mut out = Vec::with_capacity(generators.len());
        for clause in generators {
            let iter = self.expr(clause.iter);
            collect_target_names(clause.target, &mut self.comp_bound);
            let ifs = self.exprs(clause.ifs);
            out.push(Comprehension {
                target: clause.target,
                iter,
                ifs,
            });
        }
        self.b.slice(&out)
    }

    fn fstring_parts(&mut self, parts: &'ast [FStringPart<'ast>]) -> &'ast [FStringPart<'ast>] {
        let out: Vec<FStringPart<'ast>> = parts
            .iter()
            .map(|part| match part {
                FStringPart::Literal(_) => *part,
                FStringPart::Formatted(f) => FStringPart::Formatted(FormattedValue {
                    value: self.expr(f.value),
                    conversion: f.conversion,
                    format_spec: f.format_spec.map(|spec| self.fstring_parts(spec)),
                }),
            })
            .collect();
        self.b.slice(&out)
    }

    // ==========================================================================
    // Substitution
    // ==========================================================================

    /// The candidate a call may be replaced by, if the site qualifies.
    fn eligible(&self, call: &'ast CallExpr<'ast>) -> Option<&'t Candidate<'ast>> {
        let Expr::Name(callee) = call.func else {
            return None;
        };
        let candidate = self.candidates.get(callee.id)?;
        let scope = self.tree.get(self.scope?);
        if !call.keywords.is_empty() || call.has_starred() || call.args.len() != candidate.params.len() {
            return None;
        }
        if callee.id == self.caller {
            return None;
        }
        let shadowed = |name: &str| {
            scope.is_local(name) || scope.free.contains(name) || self.comp_bound.iter().any(|n| *n == name)
        };
        if shadowed(callee.id) || candidate.free.iter().any(|name| shadowed(name)) {
            return None;
        }
        Some(candidate)
    }

    fn substitute(&mut self, candidate: &Candidate<'ast>, args: &'ast [Expr<'ast>], span: Span) -> Expr<'ast> {
        let site = self.inlined;
        self.inlined += 1;
        tracing::trace!(
            callee = candidate.name,
            caller = self.caller,
            site,
            "inlining call site"
        );

        let mut renames: FxHashMap<&'ast str, &'ast str> = FxHashMap::default();
        let mut bindings = Vec::with_capacity(candidate.params.len() + candidate.locals.len());
        for (param, arg) in candidate.params.iter().zip(args) {
            let renamed = self.b.intern(&format!("__inl{site}_{param}"));
            renames.insert(param, renamed);
            bindings.push(LetBinding {
                name: renamed,
                value: *arg,
            });
        }
        for (local, value) in &candidate.locals {
            // Renamed before the local itself is visible.
            let value = self.rename(*value, &renames);
            let renamed = self.b.intern(&format!("__inl{site}_{local}"));
            renames.insert(local, renamed);
            bindings.push(LetBinding { name: renamed, value });
        }
        let body = self.rename(candidate.ret, &renames);
        Expr::Let(alloc(self.b.arena(), LetExpr {
            bindings: self.b.slice(&bindings),
            body,
            span,
        }))
    }

    /// Copy a substitutable expression with names replaced.
    fn rename(&self, expr: Expr<'ast>, renames: &FxHashMap<&'ast str, &'ast str>) -> Expr<'ast> {
        let all = |exprs: &'ast [Expr<'ast>]| -> &'ast [Expr<'ast>] {
            let out: Vec<Expr<'ast>> = exprs.iter().map(|e| self.rename(*e, renames)).collect();
            self.b.slice(&out)
        };
        let opt = |e: Option<Expr<'ast>>| e.map(|e| self.rename(e, renames));
        match expr {
            Expr::Name(n) => match renames.get(n.id) {
                Some(renamed) => Expr::Name(NameExpr { id: renamed, span: n.span }),
                None => expr,
            },
            Expr::Constant(_) => expr,
            Expr::BoolOp(b) => Expr::BoolOp(alloc(self.b.arena(), BoolOpExpr {
                values: all(b.values),
                ..*b
            })),
            Expr::BinOp(b) => Expr::BinOp(alloc(self.b.arena(), BinOpExpr {
                left: self.rename(b.left, renames),
                right: self.rename(b.right, renames),
                ..*b
            })),
            Expr::UnaryOp(u) => Expr::UnaryOp(alloc(self.b.arena(), UnaryOpExpr {
                operand: self.rename(u.operand, renames),
                ..*u
            })),
            Expr::IfExp(i) => Expr::IfExp(alloc(self.b.arena(), IfExpr {
                test: self.rename(i.test, renames),
                body: self.rename(i.body, renames),
                orelse: self.rename(i.orelse, renames),
                ..*i
            })),
            Expr::Dict(d) => {
                let keys: Vec<Option<Expr<'ast>>> = d.keys.iter().map(|k| opt(*k)).collect();
                Expr::Dict(alloc(self.b.arena(), DictExpr {
                    keys: self.b.slice(&keys),
                    values: all(d.values),
                    ..*d
                }))
            }
            Expr::Set(s) => Expr::Set(alloc(self.b.arena(), SequenceExpr { elts: all(s.elts), ..*s })),
            Expr::List(s) => Expr::List(alloc(self.b.arena(), SequenceExpr { elts: all(s.elts), ..*s })),
            Expr::Tuple(s) => Expr::Tuple(alloc(self.b.arena(), SequenceExpr { elts: all(s.elts), ..*s })),
            Expr::Compare(c) => Expr::Compare(alloc(self.b.arena(), CompareExpr {
                left: self.rename(c.left, renames),
                comparators: all(c.comparators),
                ..*c
            })),
            Expr::JoinedStr(j) => Expr::JoinedStr(alloc(self.b.arena(), JoinedStrExpr {
                values: self.rename_parts(j.values, renames),
                ..*j
            })),
            Expr::Attribute(a) => Expr::Attribute(alloc(self.b.arena(), AttributeExpr {
                value: self.rename(a.value, renames),
                ..*a
            })),
            Expr::Subscript(s) => Expr::Subscript(alloc(self.b.arena(), SubscriptExpr {
                value: self.rename(s.value, renames),
                slice: self.rename(s.slice, renames),
                ..*s
            })),
            Expr::Starred(s) => Expr::Starred(alloc(self.b.arena(), StarredExpr {
                value: self.rename(s.value, renames),
                ..*s
            })),
            Expr::Slice(s) => Expr::Slice(alloc(self.b.arena(), SliceExpr {
                lower: opt(s.lower),
                upper: opt(s.upper),
                step: opt(s.step),
                ..*s
            })),
            // Candidates never contain the remaining kinds.
            _ => expr,
        }
    }

    fn rename_parts(
        &self,
        parts: &'ast [FStringPart<'ast>],
        renames: &FxHashMap<&'ast str, &'ast str>,
    ) -> &'ast [FStringPart<'ast>] {
        let out: Vec<FStringPart<'ast>> = parts
            .iter()
            .map(|part| match part {
                FStringPart::Literal(_) => *part,
                FStringPart::Formatted(f) => FStringPart::Formatted(FormattedValue {
                    value: self.rename(f.value, renames),
                    conversion: f.conversion,
                    format_spec: f.format_spec.map(|spec| self.rename_parts(spec, renames)),
                }),
            })
            .collect();
        self.b.slice(&out)
    }
}

fn alloc<'ast, T>(arena: &'ast Bump, value: T) -> &'ast T {
    arena.alloc(value)
}

fn collect_target_names<'ast>(target: Expr<'ast>, out: &mut Vec<&'ast str>) {
    match target {
        Expr::Name(n) => out.push(n.id),
        Expr::Tuple(t) | Expr::List(t) => {
            for elt in t.elts {
                collect_target_names(*elt, out);
            }
        }
        Expr::Starred(s) => collect_target_names(s.value, out),
        _ => {}
    }
}
