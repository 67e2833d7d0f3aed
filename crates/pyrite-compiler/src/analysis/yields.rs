//! Generator suspension points.
//!
//! Every `yield` / `yield from` in a generator body gets a resume id, in
//! source order starting at `1` (`0` means "fresh start"). Because ids are
//! assigned in source order, the ids inside any statement list form a
//! contiguous range, which is what the resume dispatch relies on.
//!
//! Placement rules checked here:
//! - a suspension point must be a whole expression statement or the whole
//!   right-hand side of an assignment
//! - it may not appear in an `except` or `finally` body, nor in a `match` case

use pyrite_ast::visitor::{Visitor, walk_expr, walk_stmt};
use pyrite_ast::*;
use pyrite_core::{CompileError, Result};
use rustc_hash::FxHashMap;

use super::scopes::NodeKey;

/// Resume ids of one generator body.
#[derive(Debug, Default)]
pub struct YieldPoints {
    ids: FxHashMap<NodeKey, u32>,
    count: u32,
}

impl YieldPoints {
    /// Number and validate the suspension points of a generator body.
    pub fn collect(body: &[Stmt<'_>]) -> Result<Self> {
        let mut collector = Collector {
            points: YieldPoints::default(),
            restricted: None,
            error: None,
        };
        for stmt in body {
            collector.visit_stmt(*stmt);
        }
        match collector.error {
            Some(err) => Err(err),
            None => Ok(collector.points),
        }
    }

    /// Number of suspension points.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Resume id of a `yield` or `yield from` expression.
    pub fn id_of(&self, expr: Expr<'_>) -> Option<u32> {
        match expr {
            Expr::Yield(y) => self.ids.get(&NodeKey::of(y)).copied(),
            Expr::YieldFrom(y) => self.ids.get(&NodeKey::of(y)).copied(),
            _ => None,
        }
    }

    /// The inclusive id range inside a statement list, if it has any.
    pub fn range(&self, body: &[Stmt<'_>]) -> Option<(u32, u32)> {
        let mut finder = RangeFinder {
            points: self,
            range: None,
        };
        for stmt in body {
            finder.visit_stmt(*stmt);
        }
        finder.range
    }

    /// The inclusive id range inside one statement.
    pub fn range_of(&self, stmt: Stmt<'_>) -> Option<(u32, u32)> {
        self.range(std::slice::from_ref(&stmt))
    }
}

struct Collector {
    points: YieldPoints,
    /// Description of the enclosing construct that forbids suspension.
    restricted: Option<&'static str>,
    error: Option<CompileError>,
}

impl Collector {
    fn fail(&mut self, err: CompileError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn record<T>(&mut self, node: &T, span: pyrite_core::Span) {
        if let Some(place) = self.restricted {
            self.fail(CompileError::unsupported(format!("yield inside {place}"), span));
            return;
        }
        self.points.count += 1;
        self.points.ids.insert(NodeKey::of(node), self.points.count);
    }

    /// A statement-level suspension point, or an ordinary expression.
    fn visit_top(&mut self, expr: Expr<'_>) {
        match expr {
            Expr::Yield(y) => {
                if let Some(value) = y.value {
                    self.visit_expr(value);
                }
                self.record(y, y.span);
            }
            Expr::YieldFrom(y) => {
                self.visit_expr(y.value);
                self.record(y, y.span);
            }
            other => self.visit_expr(other),
        }
    }

    fn restricted_body(&mut self, place: &'static str, body: &[Stmt<'_>]) {
        let saved = self.restricted.replace(place);
        for stmt in body {
            self.visit_stmt(*stmt);
        }
        self.restricted = saved;
    }
}

impl<'ast> Visitor<'ast> for Collector {
    fn visit_stmt(&mut self, stmt: Stmt<'ast>) {
        match stmt {
            Stmt::Expr(e) => self.visit_top(e.value),
            Stmt::Assign(a) => {
                for target in a.targets {
                    self.visit_expr(*target);
                }
                self.visit_top(a.value);
            }
            Stmt::AnnAssign(a) => {
                self.visit_expr(a.target);
                if let Some(value) = a.value {
                    self.visit_top(value);
                }
            }
            Stmt::Try(t) => {
                for s in t.body {
                    self.visit_stmt(*s);
                }
                for handler in t.handlers {
                    if let Some(typ) = handler.typ {
                        self.visit_expr(typ);
                    }
                    self.restricted_body("an except handler", handler.body);
                }
                for s in t.orelse {
                    self.visit_stmt(*s);
                }
                self.restricted_body("a finally body", t.finalbody);
            }
            Stmt::Match(m) => {
                self.visit_expr(m.subject);
                for case in m.cases {
                    if let Some(guard) = case.guard {
                        self.visit_expr(guard);
                    }
                    self.restricted_body("a match case", case.body);
                }
            }
            // Nested functions have their own suspension points.
            Stmt::FunctionDef(_) | Stmt::ClassDef(_) => {}
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: Expr<'ast>) {
        match expr {
            Expr::Yield(y) => self.fail(CompileError::unsupported("yield inside an expression", y.span)),
            Expr::YieldFrom(y) => {
                self.fail(CompileError::unsupported("yield from inside an expression", y.span))
            }
            Expr::Lambda(_) => {}
            _ => walk_expr(self, expr),
        }
    }
}

struct RangeFinder<'p> {
    points: &'p YieldPoints,
    range: Option<(u32, u32)>,
}

impl RangeFinder<'_> {
    fn note(&mut self, id: u32) {
        self.range = Some(match self.range {
            Some((lo, hi)) => (lo.min(id), hi.max(id)),
            None => (id, id),
        });
    }
}

impl<'ast> Visitor<'ast> for RangeFinder<'_> {
    fn visit_stmt(&mut self, stmt: Stmt<'ast>) {
        match stmt {
            Stmt::FunctionDef(_) | Stmt::ClassDef(_) => {}
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: Expr<'ast>) {
        if let Some(id) = self.points.id_of(expr) {
            self.note(id);
        }
        match expr {
            Expr::Lambda(_) => {}
            _ => walk_expr(self, expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;

    #[test]
    fn ids_follow_source_order() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let first = b.expr_stmt(b.yield_(Some(b.int(1))));
        let loop_ = b.while_(
            b.bool(true),
            &[b.assign_name("x", b.yield_(Some(b.int(2)))), b.brk()],
            &[],
        );
        let last = b.expr_stmt(b.yield_from(b.name("other")));
        let body = [first, loop_, last];
        let points = YieldPoints::collect(&body).unwrap();
        assert_eq!(points.count(), 3);
        assert_eq!(points.range(&body), Some((1, 3)));
        assert_eq!(points.range_of(loop_), Some((2, 2)));
        assert_eq!(points.range(&body[2..]), Some((3, 3)));
        assert_eq!(points.range(&[b.pass()]), None);
    }

    #[test]
    fn yield_inside_expression_is_rejected() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let body = [b.expr_stmt(b.call_name("print", &[b.yield_(None)]))];
        let err = YieldPoints::collect(&body).unwrap_err();
        assert!(err.to_string().contains("yield inside an expression"));
    }

    #[test]
    fn yield_inside_finally_is_rejected() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let body = [b.try_(&[b.pass()], &[], &[], &[b.expr_stmt(b.yield_(None))])];
        let err = YieldPoints::collect(&body).unwrap_err();
        assert!(err.to_string().contains("finally"));
    }

    #[test]
    fn yield_inside_try_body_is_allowed() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let handler = b.handler(None, None, &[b.pass()]);
        let body = [b.try_(&[b.expr_stmt(b.yield_(Some(b.int(1))))], &[handler], &[], &[])];
        assert_eq!(YieldPoints::collect(&body).unwrap().count(), 1);
    }
}
