//! `try` and `raise`.
//!
//! Source exceptions travel as the payload of the `$exc` tag. A `try` with
//! handlers catches `$exc` into a block result and tests each handler in
//! order, rethrowing when none matches. `finally` catches everything with
//! `catch_all_ref`, so foreign exceptions also run the cleanup before being
//! rethrown unchanged.
//!
//! ```text
//! block $done
//!   block $caught (result (ref $EXCEPTION))
//!     try_table (catch $exc $caught)
//!       ;; body
//!     end
//!     ;; else
//!     br $done
//!   end
//!   local.set $e
//!   ;; handlers, each ending in `br $done`
//!   local.get $e
//!   throw $exc
//! end
//! ```

use pyrite_ast::*;
use pyrite_core::{CompileError, Result};

use crate::function_compiler::FunctionCompiler;
use crate::scope::LocalType;

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    pub(crate) fn compile_try(&mut self, t: &'ast TryStmt<'ast>) -> Result<()> {
        let resumable = self.is_resumable(Stmt::Try(t));
        if t.finalbody.is_empty() {
            return self.compile_try_except(t, resumable);
        }

        let pending = self.named_temp("pending", LocalType::I32);
        let entry = self.label("fin_entry");
        let caught = self.label("fin_exn");
        let exn = self.named_temp("exn", LocalType::Exn);
        self.emit("i32.const 0");
        self.emit(format!("local.set {pending}"));
        self.emitter.block(&entry, None);
        self.emitter.block(&caught, Some("exnref"));
        self.emitter.try_table(&format!("(catch_all_ref {caught})"));
        self.jumps.push_cleanup(&pending, &entry);
        let outcome = if t.handlers.is_empty() {
            self.compile_part(t.body, resumable)
                .and_then(|_| self.compile_part(t.orelse, resumable))
        } else {
            self.compile_try_except(t, resumable)
        };
        let kinds = self.jumps.pop_cleanup(t.span)?;
        outcome?;
        self.emitter.end();
        self.emit(format!("br {entry}"));
        self.emitter.end();

        // Exceptional exit: run the cleanup, then rethrow the original.
        self.emit(format!("local.set {exn}"));
        self.compile_body(t.finalbody)?;
        self.emit(format!("local.get {exn}"));
        self.emit("throw_ref");
        self.emitter.end();

        self.compile_body(t.finalbody)?;
        self.dispatch_pending(&pending, kinds, t.span)
    }

    fn compile_try_except(&mut self, t: &'ast TryStmt<'ast>, resumable: bool) -> Result<()> {
        let done = self.label("done");
        let caught = self.label("caught");
        let exc = self.named_temp("e", LocalType::Exception);
        self.emitter.block(&done, None);
        self.emitter.block(&caught, Some("(ref $EXCEPTION)"));
        self.emitter.try_table(&format!("(catch $exc {caught})"));
        self.compile_part(t.body, resumable)?;
        self.emitter.end();
        self.compile_part(t.orelse, resumable)?;
        self.emit(format!("br {done}"));
        self.emitter.end();
        self.emit(format!("local.set {exc}"));

        for handler in t.handlers {
            if let Some(typ) = handler.typ {
                self.emit(format!("local.get {exc}"));
                self.emit("ref.as_non_null");
                self.compile_expr(typ)?;
                self.rt("exception_matches", handler.span)?;
                self.emitter.if_(None);
            }
            if let Some(name) = handler.name {
                self.emit(format!("local.get {exc}"));
                self.store_name(name, handler.span)?;
            }
            self.handlers.push(exc.clone());
            let outcome = self.compile_body(handler.body);
            self.handlers.pop();
            outcome?;
            self.emit(format!("br {done}"));
            if handler.typ.is_some() {
                self.emitter.end();
            }
        }

        self.emit(format!("local.get {exc}"));
        self.emit("ref.as_non_null");
        self.emit("throw $exc");
        self.emitter.end();
        Ok(())
    }

    pub(crate) fn compile_raise(&mut self, r: &'ast RaiseStmt<'ast>) -> Result<()> {
        let Some(exc) = r.exc else {
            if r.cause.is_some() {
                return Err(CompileError::unsupported("'raise from' without an exception", r.span));
            }
            return match self.handlers.last().cloned() {
                Some(active) => {
                    self.emit(format!("local.get {active}"));
                    self.emit("ref.as_non_null");
                    self.emit("throw $exc");
                    Ok(())
                }
                None => self.raise_builtin("RuntimeError", Some("No active exception to reraise"), r.span),
            };
        };

        self.compile_expr(exc)?;
        self.rt("to_exception", r.span)?;
        if let Some(active) = self.handlers.last().cloned() {
            self.emit(format!("local.get {active}"));
            self.rt("exception_chain_context", r.span)?;
        }
        if let Some(cause) = r.cause {
            self.compile_expr(cause)?;
            self.rt("exception_set_cause", r.span)?;
        }
        self.emit("throw $exc");
        Ok(())
    }
}
