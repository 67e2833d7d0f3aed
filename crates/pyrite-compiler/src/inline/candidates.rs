//! Inline candidate selection.
//!
//! A module-level function is a candidate when its whole body is zero or
//! more pure single-name assignments followed by one `return expr`, it has a
//! plain positional signature without defaults, it is bound exactly once at
//! module level, and it is not decorated. Purity rules out calls, `:=`,
//! `yield`, lambdas and comprehensions, which also makes every candidate
//! trivially non-recursive; the call graph still checks recursion so the
//! rule does not depend on that.

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use pyrite_ast::visitor::{Visitor, walk_expr};
use pyrite_ast::*;
use rustc_hash::{FxHashMap, FxHashSet};

use super::cost;
use crate::analysis::{Effects, ScopeTree};

/// A function whose calls may be replaced by its body.
#[derive(Debug, Clone)]
pub struct Candidate<'ast> {
    pub name: &'ast str,
    pub params: Vec<&'ast str>,
    /// Local assignments in body order.
    pub locals: Vec<(&'ast str, Expr<'ast>)>,
    pub ret: Expr<'ast>,
    /// Names the body reads that are neither parameters nor locals.
    pub free: FxHashSet<&'ast str>,
    pub cost: u32,
    pub sites: usize,
}

/// Select the functions to inline.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn select<'ast>(module: &Module<'ast>, tree: &ScopeTree<'ast>) -> FxHashMap<&'ast str, Candidate<'ast>> {
    let functions = module_functions(module);
    let graph = CallGraph::build(&functions);

    let mut selected = FxHashMap::default();
    for stmt in module.body {
        let Stmt::FunctionDef(func) = stmt else {
            continue;
        };
        let Some(mut candidate) = shape_of(*func, tree) else {
            continue;
        };
        if graph.is_recursive(func.name) {
            continue;
        }
        candidate.sites = graph.call_sites(func.name);
        let decision = cost::should_inline(candidate.cost, candidate.sites);
        tracing::trace!(
            function = func.name,
            cost = candidate.cost,
            sites = candidate.sites,
            inline = decision,
            "inline candidate"
        );
        if decision {
            selected.insert(func.name, candidate);
        }
    }
    selected
}

/// Every `def` at module level, plus methods (which can call candidates but
/// are never candidates themselves).
fn module_functions<'ast>(module: &Module<'ast>) -> Vec<&'ast FunctionDef<'ast>> {
    let mut out = Vec::new();
    for stmt in module.body {
        match stmt {
            Stmt::FunctionDef(f) => out.push(*f),
            Stmt::ClassDef(c) => {
                for inner in c.body {
                    if let Stmt::FunctionDef(f) = inner {
                        out.push(*f);
                    }
                }
            }
            _ => {}
        }
    }
    out
}

fn shape_of<'ast>(func: &'ast FunctionDef<'ast>, tree: &ScopeTree<'ast>) -> Option<Candidate<'ast>> {
    if tree.module_binding_count(func.name) != 1
        || !func.decorators.is_empty()
        || !func.args.is_simple()
        || !func.args.defaults.is_empty()
    {
        return None;
    }
    let (last, init) = func.body.split_last()?;
    let Stmt::Return(ReturnStmt { value: Some(ret), .. }) = last else {
        return None;
    };

    let params: Vec<&str> = func.args.args.iter().map(|a| a.name).collect();
    let mut locals = Vec::new();
    for stmt in init {
        // Docstrings are dropped.
        if stmt.is_docstring() {
            continue;
        }
        let Stmt::Assign(assign) = stmt else {
            return None;
        };
        let [Expr::Name(target)] = assign.targets else {
            return None;
        };
        let rebinds = params.contains(&target.id) || locals.iter().any(|(n, _)| *n == target.id);
        if rebinds || !is_substitutable(assign.value) {
            return None;
        }
        locals.push((target.id, assign.value));
    }
    if !is_substitutable(*ret) {
        return None;
    }

    let effects = Effects::of_body(func.body);
    if effects.handlers || effects.declarations || effects.nested_scopes || effects.yields {
        return None;
    }

    let bound: FxHashSet<&str> = params.iter().copied().chain(locals.iter().map(|(n, _)| *n)).collect();
    let free = effects.read.iter().copied().filter(|n| !bound.contains(n)).collect();

    Some(Candidate {
        name: func.name,
        params,
        locals,
        ret: *ret,
        free,
        cost: cost::body_cost(func.body),
        sites: 0,
    })
}

/// Pure and built only from node kinds the rewriter can copy with renaming.
pub fn is_substitutable(expr: Expr<'_>) -> bool {
    let mut check = Substitutable { ok: true };
    check.visit_expr(expr);
    check.ok
}

struct Substitutable {
    ok: bool,
}

impl<'ast> Visitor<'ast> for Substitutable {
    fn visit_expr(&mut self, expr: Expr<'ast>) {
        match expr {
            Expr::Call(_)
            | Expr::NamedExpr(_)
            | Expr::Lambda(_)
            | Expr::Yield(_)
            | Expr::YieldFrom(_)
            | Expr::ListComp(_)
            | Expr::SetComp(_)
            | Expr::GeneratorExp(_)
            | Expr::DictComp(_)
            | Expr::Let(_) => self.ok = false,
            _ => walk_expr(self, expr),
        }
    }
}

// ============================================================================
// Call Graph
// ============================================================================

/// Static call graph between module functions. Edge weights count call sites.
struct CallGraph<'ast> {
    graph: DiGraph<&'ast str, usize>,
    nodes: FxHashMap<&'ast str, NodeIndex>,
    recursive: FxHashSet<&'ast str>,
}

impl<'ast> CallGraph<'ast> {
    fn build(functions: &[&'ast FunctionDef<'ast>]) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes = FxHashMap::default();
        for func in functions {
            nodes.entry(func.name).or_insert_with(|| graph.add_node(func.name));
        }
        for func in functions {
            let caller = nodes[func.name];
            let mut counter = SiteCounter::default();
            for stmt in func.body {
                counter.visit_stmt(*stmt);
            }
            for (callee, count) in counter.sites {
                if let Some(&target) = nodes.get(callee) {
                    graph.add_edge(caller, target, count);
                }
            }
        }

        let mut recursive = FxHashSet::default();
        for component in tarjan_scc(&graph) {
            let cyclic = component.len() > 1
                || component
                    .first()
                    .is_some_and(|&n| graph.find_edge(n, n).is_some());
            if cyclic {
                recursive.extend(component.iter().map(|&n| graph[n]));
            }
        }
        Self {
            graph,
            nodes,
            recursive,
        }
    }

    fn is_recursive(&self, name: &str) -> bool {
        self.recursive.contains(name)
    }

    fn call_sites(&self, name: &str) -> usize {
        let Some(&node) = self.nodes.get(name) else {
            return 0;
        };
        self.graph
            .edges_directed(node, petgraph::Direction::Incoming)
            .map(|e| *e.weight())
            .sum()
    }
}

/// Counts `name(...)` call sites, descending into nested functions.
#[derive(Default)]
struct SiteCounter<'ast> {
    sites: FxHashMap<&'ast str, usize>,
}

impl<'ast> Visitor<'ast> for SiteCounter<'ast> {
    fn visit_expr(&mut self, expr: Expr<'ast>) {
        if let Some((name, _)) = expr.as_named_call() {
            *self.sites.entry(name).or_insert(0) += 1;
        }
        walk_expr(self, expr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;
    use pyrite_core::BinaryOp;

    fn select_from<'ast>(module: &Module<'ast>) -> Vec<&'ast str> {
        let tree = ScopeTree::build(module).unwrap();
        let mut names: Vec<_> = select(module, &tree).into_keys().collect();
        names.sort_unstable();
        names
    }

    #[test]
    fn pure_helper_is_selected() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let helper = b.func(
            "mix",
            &["a", "b"],
            &[
                b.assign_name("t", b.bin(b.name("a"), BinaryOp::Mult, b.int(31))),
                b.ret(Some(b.bin(b.name("t"), BinaryOp::BitXor, b.name("b")))),
            ],
        );
        let caller = b.func("run", &[], &[b.ret(Some(b.call_name("mix", &[b.int(1), b.int(2)])))]);
        let module = b.module(&[helper, caller]);
        assert_eq!(select_from(&module), vec!["mix"]);
    }

    #[test]
    fn impure_or_decorated_functions_are_rejected() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let calls = b.func("calls", &["x"], &[b.ret(Some(b.call_name("len", &[b.name("x")])))]);
        let decorated = b.func_def(
            "decorated",
            b.params(&["x"]),
            &[b.ret(Some(b.name("x")))],
            &[b.name("staticmethod")],
        );
        let loops = b.func(
            "loops",
            &["n"],
            &[b.for_range("i", &[b.name("n")], &[b.pass()]), b.ret(Some(b.name("n")))],
        );
        let module = b.module(&[calls, decorated, loops]);
        assert!(select_from(&module).is_empty());
    }

    #[test]
    fn rebound_module_name_is_rejected() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[
            b.func("f", &["x"], &[b.ret(Some(b.name("x")))]),
            b.assign_name("f", b.none()),
        ]);
        assert!(select_from(&module).is_empty());
    }

    #[test]
    fn recursion_is_detected() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let a = b.func("a", &[], &[b.ret(Some(b.call_name("b", &[])))]);
        let bf = b.func("b", &[], &[b.ret(Some(b.call_name("a", &[])))]);
        let leaf = b.func("leaf", &[], &[b.ret(Some(b.int(1)))]);
        let functions: Vec<&FunctionDef> = [a, bf, leaf]
            .iter()
            .filter_map(|s| match s {
                Stmt::FunctionDef(f) => Some(*f),
                _ => None,
            })
            .collect();
        let graph = CallGraph::build(&functions);
        assert!(graph.is_recursive("a"));
        assert!(graph.is_recursive("b"));
        assert!(!graph.is_recursive("leaf"));
        assert_eq!(graph.call_sites("a"), 1);
    }
}
