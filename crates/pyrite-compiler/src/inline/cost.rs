//! Inlining cost model.
//!
//! Every node kind has a fixed weight. The totals are only compared against
//! the thresholds in [`should_inline`], so the absolute numbers matter less
//! than their ratios: calls and loops are expensive, names and constants
//! nearly free.

use pyrite_ast::*;

/// Always inline at or below this cost.
pub const ALWAYS: u32 = 20;
/// Inline at or below this cost when there is at least one call site.
pub const WITH_ONE_SITE: u32 = 45;
/// Inline at or below this cost when there are at least three call sites.
pub const WITH_THREE_SITES: u32 = 70;

/// Whether a candidate of this cost should be inlined given its static call
/// site count.
pub fn should_inline(cost: u32, sites: usize) -> bool {
    cost <= ALWAYS
        || (cost <= WITH_ONE_SITE && sites >= 1)
        || (cost <= WITH_THREE_SITES && sites >= 3)
}

/// Cost of a function body.
pub fn body_cost(body: &[Stmt<'_>]) -> u32 {
    body.iter().map(|s| stmt_cost(*s)).sum()
}

pub fn stmt_cost(stmt: Stmt<'_>) -> u32 {
    match stmt {
        Stmt::Assign(a) => 1 + a.targets.iter().map(|t| expr_cost(*t)).sum::<u32>() + expr_cost(a.value),
        Stmt::AugAssign(a) => 3 + expr_cost(a.target) + expr_cost(a.value),
        Stmt::AnnAssign(a) => 1 + a.value.map_or(0, expr_cost),
        Stmt::Return(r) => 1 + r.value.map_or(0, expr_cost),
        Stmt::Expr(e) => expr_cost(e.value),
        Stmt::If(i) => 2 + expr_cost(i.test) + body_cost(i.body) + body_cost(i.orelse),
        Stmt::While(w) => 10 + expr_cost(w.test) + body_cost(w.body) + body_cost(w.orelse),
        Stmt::For(f) => 15 + expr_cost(f.iter) + body_cost(f.body) + body_cost(f.orelse),
        Stmt::Try(t) => {
            20 + body_cost(t.body)
                + t.handlers.iter().map(|h| 5 + body_cost(h.body)).sum::<u32>()
                + body_cost(t.orelse)
                + body_cost(t.finalbody)
        }
        Stmt::With(w) => 15 + body_cost(w.body),
        Stmt::Match(m) => 10 + m.cases.iter().map(|c| 5 + body_cost(c.body)).sum::<u32>(),
        Stmt::Raise(_) | Stmt::Assert(_) => 8,
        Stmt::FunctionDef(_) | Stmt::ClassDef(_) => 30,
        Stmt::Delete(_) | Stmt::Import(_) | Stmt::ImportFrom(_) => 5,
        Stmt::Global(_) | Stmt::Nonlocal(_) | Stmt::Pass(_) | Stmt::Break(_) | Stmt::Continue(_) => 0,
    }
}

pub fn expr_cost(expr: Expr<'_>) -> u32 {
    let sum = |exprs: &[Expr<'_>]| exprs.iter().map(|e| expr_cost(*e)).sum::<u32>();
    match expr {
        Expr::Constant(_) | Expr::Name(_) => 1,
        Expr::BinOp(b) => 3 + expr_cost(b.left) + expr_cost(b.right),
        Expr::UnaryOp(u) => 2 + expr_cost(u.operand),
        Expr::BoolOp(b) => 2 + sum(b.values),
        Expr::Compare(c) => 3 * c.ops.len() as u32 + expr_cost(c.left) + sum(c.comparators),
        Expr::IfExp(i) => 3 + expr_cost(i.test) + expr_cost(i.body) + expr_cost(i.orelse),
        Expr::Call(c) => {
            8 + expr_cost(c.func) + sum(c.args) + c.keywords.iter().map(|k| expr_cost(k.value)).sum::<u32>()
        }
        Expr::Attribute(a) => 4 + expr_cost(a.value),
        Expr::Subscript(s) => 4 + expr_cost(s.value) + expr_cost(s.slice),
        Expr::Slice(s) => {
            2 + s.lower.map_or(0, expr_cost) + s.upper.map_or(0, expr_cost) + s.step.map_or(0, expr_cost)
        }
        Expr::List(s) | Expr::Tuple(s) | Expr::Set(s) => 4 + sum(s.elts),
        Expr::Dict(d) => 6 + sum(d.values) + d.keys.iter().flatten().map(|k| expr_cost(*k)).sum::<u32>(),
        Expr::Starred(s) => 2 + expr_cost(s.value),
        Expr::JoinedStr(j) => {
            2 + j
                .values
                .iter()
                .map(|part| match part {
                    FStringPart::Literal(_) => 1,
                    FStringPart::Formatted(f) => 4 + expr_cost(f.value),
                })
                .sum::<u32>()
        }
        Expr::ListComp(c) | Expr::SetComp(c) | Expr::GeneratorExp(c) => {
            12 + expr_cost(c.elt) + c.generators.iter().map(|g| 10 + expr_cost(g.iter)).sum::<u32>()
        }
        Expr::DictComp(c) => {
            14 + expr_cost(c.key) + expr_cost(c.value) + c.generators.iter().map(|g| 10 + expr_cost(g.iter)).sum::<u32>()
        }
        Expr::NamedExpr(n) => 2 + expr_cost(n.value),
        Expr::Let(l) => l.bindings.iter().map(|b| 1 + expr_cost(b.value)).sum::<u32>() + expr_cost(l.body),
        Expr::Lambda(_) => 20,
        Expr::Yield(_) | Expr::YieldFrom(_) => 20,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;
    use pyrite_core::BinaryOp;

    #[test]
    fn thresholds() {
        assert!(should_inline(20, 0));
        assert!(!should_inline(21, 0));
        assert!(should_inline(45, 1));
        assert!(!should_inline(46, 2));
        assert!(should_inline(70, 3));
        assert!(!should_inline(71, 10));
    }

    #[test]
    fn small_helper_is_cheap() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        // return a * b + 1
        let body = [b.ret(Some(b.bin(
            b.bin(b.name("a"), BinaryOp::Mult, b.name("b")),
            BinaryOp::Add,
            b.int(1),
        )))];
        assert_eq!(body_cost(&body), 1 + 3 + 3 + 1 + 1 + 1);
        assert!(should_inline(body_cost(&body), 0));
    }

    #[test]
    fn loops_and_calls_dominate() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let call = b.call_name("f", &[b.int(1)]);
        assert_eq!(expr_cost(call), 8 + 1 + 1);
        let loop_ = b.for_range("i", &[b.int(3)], &[b.pass()]);
        assert!(stmt_cost(loop_) > expr_cost(call));
    }
}
