//! `while` loops.

use pyrite_ast::*;
use pyrite_core::Result;

use crate::function_compiler::FunctionCompiler;

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    pub(crate) fn compile_while(&mut self, w: &'ast WhileStmt<'ast>) -> Result<()> {
        let body_resume = self.resume_range(w.body);
        let orelse_resume = self.resume_range(w.orelse);
        let always = is_always_true(w.test);

        let brk = self.label("brk");
        let exhausted = self.label("exhausted");
        let cont = self.label("cont");
        self.emitter.block(&brk, None);
        self.emitter.block(&exhausted, None);
        if orelse_resume.is_some() {
            self.emit_resume_in(orelse_resume);
            self.emit(format!("br_if {exhausted}"));
        }
        self.emitter.loop_(&cont);
        if !always {
            if body_resume.is_some() {
                // Resuming inside the body must not re-test the condition.
                self.emit("local.get $resume");
                self.emit("i32.eqz");
                self.emitter.if_(Some("i32"));
                self.compile_condition(w.test)?;
                self.emitter.else_();
                self.emit("i32.const 1");
                self.emitter.end();
            } else {
                self.compile_condition(w.test)?;
            }
            self.emit("i32.eqz");
            self.emit(format!("br_if {exhausted}"));
        }
        self.jumps.push_loop(&brk, &cont);
        let outcome = self.compile_body(w.body);
        self.jumps.pop_loop(w.span)?;
        outcome?;
        self.emit(format!("br {cont}"));
        self.emitter.end();
        self.emitter.end();
        self.compile_body(w.orelse)?;
        self.emitter.end();
        Ok(())
    }
}

fn is_always_true(test: Expr<'_>) -> bool {
    match test {
        Expr::Constant(c) => match c.value {
            Constant::Bool(b) => b,
            Constant::Int(v) => v != 0,
            _ => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::compile_function_text;
    use bumpalo::Bump;
    use pyrite_ast::*;
    use pyrite_core::{BinaryOp, CmpOp};

    #[test]
    fn condition_is_tested_each_iteration() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "halve",
            &["n"],
            &[
                b.while_(
                    b.cmp(b.name("n"), CmpOp::Gt, b.int(1)),
                    &[b.aug_assign(b.name("n"), BinaryOp::FloorDiv, b.int(2))],
                    &[],
                ),
                b.ret(Some(b.name("n"))),
            ],
        );
        let text = compile_function_text(&b, def, "halve");
        assert!(text.contains("loop $cont_"));
        assert!(text.contains("br_if $exhausted_"));
        assert!(text.contains("br $cont_"));
    }

    #[test]
    fn while_true_skips_the_test() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "spin",
            &["f"],
            &[b.while_(
                b.bool(true),
                &[b.if_(b.call(b.name("f"), &[]), &[b.brk()], &[])],
                &[],
            )],
        );
        let text = compile_function_text(&b, def, "spin");
        assert!(!text.contains("br_if $exhausted_"));
        assert!(text.contains("br $brk_"));
    }

    #[test]
    fn continue_branches_to_loop_head() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "skip",
            &["f"],
            &[b.while_(b.call(b.name("f"), &[]), &[b.cont()], &[b.pass()])],
        );
        let text = compile_function_text(&b, def, "skip");
        assert!(text.matches("br $cont_").count() >= 2);
    }
}
