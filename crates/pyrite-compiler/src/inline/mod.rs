//! Inlining optimizer.
//!
//! Runs before code generation on the whole module:
//!
//! 1. [`candidates::select`] picks small, pure, non-recursive module
//!    functions whose cost fits the [`cost`] thresholds.
//! 2. [`rewrite::Rewriter`] copies the module, replacing eligible call sites
//!    with let-expressions over uniquely renamed parameters and locals.
//!
//! The rewritten module is semantically identical to the input; the
//! original function definitions stay in place, since they may still be
//! called from sites that did not qualify or through a reference.

pub mod candidates;
pub mod cost;
pub mod rewrite;

use bumpalo::Bump;
use pyrite_ast::{AstBuilder, Module};
use pyrite_core::Result;

use crate::analysis::ScopeTree;
use rewrite::Rewriter;

/// Inline eligible call sites of `module`, allocating new nodes in `arena`.
///
/// Returns the rewritten module and the number of call sites replaced.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn inline_module<'ast>(module: &Module<'ast>, arena: &'ast Bump) -> Result<(Module<'ast>, usize)> {
    let tree = ScopeTree::build(module)?;
    let selected = candidates::select(module, &tree);
    if selected.is_empty() {
        tracing::debug!(candidates = 0, inlined = 0, "inliner finished");
        return Ok((*module, 0));
    }

    let mut rewriter = Rewriter::new(AstBuilder::new(arena), &tree, &selected);
    let rewritten = rewriter.module(module);
    tracing::debug!(
        candidates = selected.len(),
        inlined = rewriter.inlined(),
        "inliner finished"
    );
    Ok((rewritten, rewriter.inlined()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyrite_ast::*;
    use pyrite_core::BinaryOp;

    fn function<'ast>(module: &Module<'ast>, name: &str) -> &'ast FunctionDef<'ast> {
        module
            .body
            .iter()
            .find_map(|s| match s {
                Stmt::FunctionDef(f) if f.name == name => Some(*f),
                _ => None,
            })
            .unwrap()
    }

    fn returned<'ast>(func: &FunctionDef<'ast>) -> Expr<'ast> {
        match func.body.last() {
            Some(Stmt::Return(ReturnStmt { value: Some(v), .. })) => *v,
            other => panic!("expected return, got {other:?}"),
        }
    }

    fn helper_module<'ast>(b: &AstBuilder<'ast>, call: Expr<'ast>) -> Module<'ast> {
        let helper = b.func(
            "mix",
            &["a", "b"],
            &[
                b.assign_name("t", b.bin(b.name("a"), BinaryOp::Mult, b.int(31))),
                b.ret(Some(b.bin(b.name("t"), BinaryOp::BitXor, b.name("b")))),
            ],
        );
        let caller = b.func("run", &["x"], &[b.ret(Some(call))]);
        b.module(&[helper, caller])
    }

    #[test]
    fn call_becomes_let_with_renamed_names() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = helper_module(&b, b.call_name("mix", &[b.name("x"), b.int(2)]));
        let (rewritten, count) = inline_module(&module, &arena).unwrap();
        assert_eq!(count, 1);

        let Expr::Let(let_) = returned(function(&rewritten, "run")) else {
            panic!("call was not inlined");
        };
        let names: Vec<&str> = let_.bindings.iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["__inl0_a", "__inl0_b", "__inl0_t"]);
        assert_eq!(let_.bindings[0].value.as_name(), Some("x"));
        let Expr::BinOp(body) = let_.body else {
            panic!("unexpected body");
        };
        assert_eq!(body.left.as_name(), Some("__inl0_t"));
        assert_eq!(body.right.as_name(), Some("__inl0_b"));

        // The definition itself survives.
        assert!(matches!(returned(function(&rewritten, "mix")), Expr::BinOp(_)));
    }

    #[test]
    fn keyword_and_arity_mismatches_are_left_alone() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let kw = b.call_kw(b.name("mix"), &[b.name("x")], &[b.keyword("b", b.int(2))]);
        let module = helper_module(&b, kw);
        let (_, count) = inline_module(&module, &arena).unwrap();
        assert_eq!(count, 0);

        let short = b.call_name("mix", &[b.name("x")]);
        let module = helper_module(&b, short);
        let (_, count) = inline_module(&module, &arena).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn shadowed_callee_is_not_inlined() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let helper = b.func("double", &["v"], &[b.ret(Some(b.bin(b.name("v"), BinaryOp::Mult, b.int(2))))]);
        let caller = b.func(
            "run",
            &["double"],
            &[b.ret(Some(b.call_name("double", &[b.int(4)])))],
        );
        let module = b.module(&[helper, caller]);
        let (_, count) = inline_module(&module, &arena).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn comprehension_target_blocks_free_name() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        // def scaled(v): return v * k
        let helper = b.func("scaled", &["v"], &[b.ret(Some(b.bin(b.name("v"), BinaryOp::Mult, b.name("k"))))]);
        // def run(xs): return [scaled(k) for k in xs]
        let comp = b.list_comp(
            b.call_name("scaled", &[b.name("k")]),
            &[b.comprehension(b.name("k"), b.name("xs"), &[])],
        );
        let caller = b.func("run", &["xs"], &[b.ret(Some(comp))]);
        let module = b.module(&[b.assign_name("k", b.int(3)), helper, caller]);
        let (_, count) = inline_module(&module, &arena).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn module_level_calls_are_not_rewritten() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let helper = b.func("one", &[], &[b.ret(Some(b.int(1)))]);
        let module = b.module(&[helper, b.expr_stmt(b.call_name("print", &[b.call_name("one", &[])]))]);
        let (rewritten, count) = inline_module(&module, &arena).unwrap();
        assert_eq!(count, 0);
        assert_eq!(rewritten.body.len(), 2);
    }

    #[test]
    fn nested_calls_inline_inside_out() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let helper = b.func("inc", &["n"], &[b.ret(Some(b.bin(b.name("n"), BinaryOp::Add, b.int(1))))]);
        let call = b.call_name("inc", &[b.call_name("inc", &[b.name("x")])]);
        let caller = b.func("run", &["x"], &[b.ret(Some(call))]);
        let module = b.module(&[helper, caller]);
        let (rewritten, count) = inline_module(&module, &arena).unwrap();
        assert_eq!(count, 2);
        let Expr::Let(outer) = returned(function(&rewritten, "run")) else {
            panic!("outer call was not inlined");
        };
        assert!(matches!(outer.bindings[0].value, Expr::Let(_)));
    }
}
