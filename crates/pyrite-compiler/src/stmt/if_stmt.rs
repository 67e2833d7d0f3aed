//! `if` statements and `isinstance` narrowing.

use pyrite_ast::*;
use pyrite_core::Result;

use crate::analysis::Effects;
use crate::function_compiler::FunctionCompiler;

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    pub(crate) fn compile_if(&mut self, i: &'ast IfStmt<'ast>) -> Result<()> {
        let resumable = self
            .generator
            .as_ref()
            .is_some_and(|g| g.points.range_of(Stmt::If(i)).is_some());
        if resumable {
            // A resumed generator re-enters whichever branch holds its yield.
            let body_range = self.resume_range(i.body);
            self.emit("local.get $resume");
            self.emit("i32.eqz");
            self.emitter.if_(Some("i32"));
            self.compile_condition(i.test)?;
            self.emitter.else_();
            self.emit_resume_in(body_range);
            self.emitter.end();
        } else {
            self.compile_condition(i.test)?;
        }

        let narrowing = self.narrowing(i);
        self.emitter.if_(None);
        if let Some(pair) = narrowing {
            self.narrowed.push(pair);
        }
        let outcome = self.compile_body(i.body);
        if narrowing.is_some() {
            self.narrowed.pop();
        }
        outcome?;
        if !i.orelse.is_empty() {
            self.emitter.else_();
            self.compile_body(i.orelse)?;
        }
        self.emitter.end();
        Ok(())
    }

    /// `if isinstance(x, C):` with `C` slotted and `x` never rebound in the
    /// body lets the body access `x`'s slots directly.
    fn narrowing(&self, i: &'ast IfStmt<'ast>) -> Option<(&'ast str, &'ast str)> {
        if !self.ctx.config.slotted_layouts {
            return None;
        }
        let (callee, call) = i.test.as_named_call()?;
        if callee != "isinstance" || !call.keywords.is_empty() {
            return None;
        }
        let [object, class] = call.args else {
            return None;
        };
        let (object, class) = (object.as_name()?, class.as_name()?);
        if !self.is_builtin_name("isinstance", call.span) {
            return None;
        }
        self.ctx.classes.layout(class)?;
        if Effects::of_body(i.body).assigned.contains(object) {
            return None;
        }
        Some((object, class))
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{compile_function_text, compile_module_text};
    use bumpalo::Bump;
    use pyrite_ast::*;
    use pyrite_core::CmpOp;

    #[test]
    fn else_branch_is_emitted_only_when_present() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "sign",
            &["x"],
            &[b.if_(
                b.cmp(b.name("x"), CmpOp::Lt, b.int(0)),
                &[b.ret(Some(b.int(-1)))],
                &[b.ret(Some(b.int(1)))],
            )],
        );
        let text = compile_function_text(&b, def, "sign");
        assert!(text.lines().any(|l| l.trim() == "else"));

        let def = b.func("pos", &["x"], &[b.if_(b.name("x"), &[b.ret(Some(b.int(1)))], &[])]);
        let text = compile_function_text(&b, def, "pos");
        assert!(!text.lines().any(|l| l.trim() == "else"));
    }

    #[test]
    fn isinstance_narrows_slotted_receiver() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let class = b.class(
            "Point",
            &[],
            &[b.assign_name("__slots__", b.tuple(&[b.str("x")]))],
        );
        let read = b.func(
            "read",
            &["p"],
            &[
                b.if_(
                    b.call_name("isinstance", &[b.name("p"), b.name("Point")]),
                    &[b.ret(Some(b.attr(b.name("p"), "x")))],
                    &[],
                ),
                b.ret(Some(b.none())),
            ],
        );
        let text = compile_module_text(&b, b.module(&[class, read]));
        assert!(text.contains("struct.get $SLOTTED_Point $s_x"));
    }

    #[test]
    fn rebinding_in_body_disables_narrowing() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let class = b.class(
            "Point",
            &[],
            &[b.assign_name("__slots__", b.tuple(&[b.str("x")]))],
        );
        let read = b.func(
            "read",
            &["p", "q"],
            &[b.if_(
                b.call_name("isinstance", &[b.name("p"), b.name("Point")]),
                &[
                    b.assign_name("p", b.name("q")),
                    b.ret(Some(b.attr(b.name("p"), "x"))),
                ],
                &[],
            )],
        );
        let text = compile_module_text(&b, b.module(&[class, read]));
        assert!(!text.contains("struct.get $SLOTTED_Point $s_x"));
    }
}
