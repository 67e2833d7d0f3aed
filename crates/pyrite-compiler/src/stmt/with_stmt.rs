//! `with` statements.
//!
//! The body runs inside a `try_table` catching `$exc`. A caught exception is
//! offered to `__exit__`, which suppresses it by returning a true value.
//! Normal completion and jumps out of the body call `__exit__(None, None,
//! None)` before continuing.

use pyrite_ast::*;
use pyrite_core::{Result, Span};

use crate::function_compiler::FunctionCompiler;
use crate::scope::LocalType;

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    pub(crate) fn compile_with(&mut self, w: &'ast WithStmt<'ast>) -> Result<()> {
        let resumable = self.is_resumable(Stmt::With(w));
        self.compile_with_items(w.items, w.body, resumable, w.span)
    }

    /// `with a, b: body` is `with a: with b: body`.
    fn compile_with_items(
        &mut self,
        items: &'ast [WithItem<'ast>],
        body: &'ast [Stmt<'ast>],
        resumable: bool,
        span: Span,
    ) -> Result<()> {
        let Some((item, rest)) = items.split_first() else {
            return self.compile_part(body, resumable);
        };

        let mgr = self.named_temp("mgr", LocalType::Any);
        if resumable {
            self.emit("local.get $resume");
            self.emit("i32.eqz");
            self.emitter.if_(None);
        }
        self.compile_expr(item.context_expr)?;
        self.emit(format!("local.set {mgr}"));
        self.emit(format!("local.get {mgr}"));
        self.push_str("__enter__");
        self.push_none();
        self.rt("call_method", span)?;
        match item.optional_vars {
            Some(target) => {
                let entered = self.temp(LocalType::Any);
                self.emit(format!("local.set {entered}"));
                self.store_target(target, &entered, span)?;
            }
            None => self.emit("drop"),
        }
        if resumable {
            self.emitter.end();
        }

        let pending = self.named_temp("pending", LocalType::I32);
        let exc = self.named_temp("e", LocalType::Exception);
        let done = self.label("with_done");
        let entry = self.label("with_entry");
        let caught = self.label("caught");
        self.emit("i32.const 0");
        self.emit(format!("local.set {pending}"));
        self.emitter.block(&done, None);
        self.emitter.block(&entry, None);
        self.emitter.block(&caught, Some("(ref $EXCEPTION)"));
        self.emitter.try_table(&format!("(catch $exc {caught})"));
        self.jumps.push_cleanup(&pending, &entry);
        let outcome = self.compile_with_items(rest, body, resumable, span);
        let kinds = self.jumps.pop_cleanup(span)?;
        outcome?;
        self.emitter.end();
        self.emit(format!("br {entry}"));
        self.emitter.end();

        self.emit(format!("local.set {exc}"));
        self.emit(format!("local.get {mgr}"));
        self.push_str("__exit__");
        self.emit(format!("local.get {exc}"));
        self.emit("ref.as_non_null");
        self.rt("exception_class", span)?;
        self.emit(format!("local.get {exc}"));
        self.push_none();
        self.push_chain(3);
        self.rt("call_method", span)?;
        self.rt("is_truthy", span)?;
        self.emit("i32.eqz");
        self.emitter.if_(None);
        self.emit(format!("local.get {exc}"));
        self.emit("ref.as_non_null");
        self.emit("throw $exc");
        self.emitter.end();
        self.emit(format!("br {done}"));
        self.emitter.end();

        self.emit(format!("local.get {mgr}"));
        self.push_str("__exit__");
        self.push_none();
        self.push_none();
        self.push_none();
        self.push_chain(3);
        self.rt("call_method", span)?;
        self.emit("drop");
        self.dispatch_pending(&pending, kinds, span)?;
        self.emitter.end();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::compile_function_text;
    use bumpalo::Bump;
    use pyrite_ast::*;

    #[test]
    fn enter_and_exit_are_called() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "read",
            &["open_it"],
            &[
                b.with(
                    &[b.with_item(b.call(b.name("open_it"), &[]), Some(b.name("f")))],
                    &[b.ret(Some(b.method_call(b.name("f"), "read", &[])))],
                ),
                b.ret(Some(b.none())),
            ],
        );
        let text = compile_function_text(&b, def, "read");
        assert!(text.contains("try_table (catch $exc $caught_"));
        assert!(text.contains("call $exception_class"));
        assert!(text.contains("call $is_truthy"));
        // `__enter__`, `f.read()`, and `__exit__` on both paths.
        assert_eq!(text.matches("call $call_method").count(), 4);
        // The return inside the body is routed through the exit call.
        assert!(text.contains("local.set $retval"));
    }

    #[test]
    fn multiple_items_nest() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "both",
            &["a", "b"],
            &[b.with(
                &[b.with_item(b.name("a"), None), b.with_item(b.name("b"), None)],
                &[b.pass()],
            )],
        );
        let text = compile_function_text(&b, def, "both");
        assert_eq!(text.matches("try_table").count(), 2);
        assert_eq!(text.matches("call $call_method").count(), 6);
    }
}
