//! Statement lowering.
//!
//! Each statement kind is compiled by a further `impl` block on
//! [`FunctionCompiler`] in one of the submodules. This module holds the
//! dispatch and the handful of statements that need no structure of their
//! own.
//!
//! Inside a generator body, statements that contain no suspension point are
//! skipped while `$resume` is non-zero, so a resumed generator falls through
//! to the statement holding the `yield` it stopped at.

mod assign;
mod class_def;
mod for_stmt;
mod function_def;
mod if_stmt;
mod match_stmt;
mod try_stmt;
mod while_stmt;
mod with_stmt;

pub(crate) use for_stmt::IterState;

use pyrite_ast::*;
use pyrite_core::{CompileError, Result};

use crate::context::FunctionFlags;
use crate::emit::JumpKind;
use crate::function_compiler::FunctionCompiler;

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    /// Compile a statement list.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub(crate) fn compile_body(&mut self, body: &'ast [Stmt<'ast>]) -> Result<()> {
        let resumable = self
            .generator
            .as_ref()
            .is_some_and(|g| g.points.range(body).is_some());
        if !resumable {
            for stmt in body {
                self.compile_stmt(*stmt)?;
            }
            return Ok(());
        }

        // Runs of statements without suspension points share one guard.
        let mut guarded = false;
        for stmt in body {
            let suspends = self
                .generator
                .as_ref()
                .is_some_and(|g| g.points.range_of(*stmt).is_some());
            if suspends && guarded {
                self.emitter.end();
                guarded = false;
            } else if !suspends && !guarded {
                self.emit("local.get $resume");
                self.emit("i32.eqz");
                self.emitter.if_(None);
                guarded = true;
            }
            self.compile_stmt(*stmt)?;
        }
        if guarded {
            self.emitter.end();
        }
        Ok(())
    }

    pub(crate) fn compile_stmt(&mut self, stmt: Stmt<'ast>) -> Result<()> {
        let line = stmt.span().line;
        if line > 0 {
            self.comment(format!("line {line}"));
        }
        match stmt {
            Stmt::FunctionDef(f) => self.compile_function_def(f),
            Stmt::ClassDef(c) => self.compile_class_def(c),
            Stmt::Return(r) => {
                if self.flags.contains(FunctionFlags::MODULE_BODY) {
                    return Err(CompileError::unsupported("'return' outside function", r.span));
                }
                match r.value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.push_none(),
                }
                self.emit_return_value(r.span)
            }
            Stmt::Delete(d) => {
                for target in d.targets {
                    self.compile_delete(*target)?;
                }
                Ok(())
            }
            Stmt::Assign(a) => self.compile_assign(a),
            Stmt::AugAssign(a) => self.compile_aug_assign(a),
            Stmt::AnnAssign(a) => match a.value {
                Some(value) => self.compile_single_assign(a.target, value, a.span),
                None => Ok(()),
            },
            Stmt::For(f) => self.compile_for(f),
            Stmt::While(w) => self.compile_while(w),
            Stmt::If(i) => self.compile_if(i),
            Stmt::With(w) => self.compile_with(w),
            Stmt::Match(m) => self.compile_match(m),
            Stmt::Raise(r) => self.compile_raise(r),
            Stmt::Try(t) => self.compile_try(t),
            Stmt::Assert(a) => self.compile_assert(a),
            Stmt::Import(i) => self.compile_import(i),
            Stmt::ImportFrom(i) => self.compile_import_from(i),
            Stmt::Global(_) | Stmt::Nonlocal(_) | Stmt::Pass(_) => Ok(()),
            Stmt::Expr(e) => {
                if stmt.is_docstring() {
                    return Ok(());
                }
                self.compile_discard(e.value)
            }
            Stmt::Break(span) => self.emit_jump(JumpKind::Break, span),
            Stmt::Continue(span) => self.emit_jump(JumpKind::Continue, span),
        }
    }

    fn compile_delete(&mut self, target: Expr<'ast>) -> Result<()> {
        match target {
            Expr::Name(n) => {
                self.push_none();
                self.store_name(n.id, n.span)
            }
            Expr::Attribute(a) => self.delete_attribute(a),
            Expr::Subscript(s) => self.delete_subscript(s),
            Expr::Tuple(t) | Expr::List(t) => {
                for elt in t.elts {
                    self.compile_delete(*elt)?;
                }
                Ok(())
            }
            other => Err(CompileError::unsupported(
                format!("cannot delete {}", other.kind_name()),
                other.span(),
            )),
        }
    }

    fn compile_assert(&mut self, a: &'ast AssertStmt<'ast>) -> Result<()> {
        self.compile_condition(a.test)?;
        self.emit("i32.eqz");
        self.emitter.if_(None);
        self.push_str("AssertionError");
        match a.msg {
            Some(msg) => self.compile_expr(msg)?,
            None => self.push_none(),
        }
        self.rt("make_exception", a.span)?;
        self.emit("throw $exc");
        self.emitter.end();
        Ok(())
    }

    // ==========================================================================
    // Imports
    // ==========================================================================

    fn compile_import(&mut self, i: &'ast ImportStmt<'ast>) -> Result<()> {
        for alias in i.names {
            if alias.name == "js" {
                // Host interop is resolved statically; the name binds None.
                self.push_none();
            } else {
                let root = alias.name.split('.').next().unwrap_or(alias.name);
                let module = if alias.asname.is_some() { alias.name } else { root };
                self.push_str(module);
                self.rt("import_module", i.span)?;
            }
            self.store_name(alias.bound_name(), i.span)?;
        }
        Ok(())
    }

    fn compile_import_from(&mut self, i: &'ast ImportFromStmt<'ast>) -> Result<()> {
        let Some(module) = i.module.filter(|_| i.level == 0) else {
            return Err(CompileError::unsupported("relative import", i.span));
        };
        if i.names.iter().any(|a| a.name == "*") {
            return Err(CompileError::unsupported(
                format!("'from {module} import *'"),
                i.span,
            ));
        }
        let loaded = self.temp(crate::scope::LocalType::Any);
        self.push_str(module);
        self.rt("import_module", i.span)?;
        self.emit(format!("local.set {loaded}"));
        for alias in i.names {
            self.emit(format!("local.get {loaded}"));
            self.emit_getattr(alias.name, i.span)?;
            self.store_name(alias.bound_name(), i.span)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{compile_function_text, compile_module_text, try_compile_module};
    use bumpalo::Bump;
    use pyrite_ast::*;
    use pyrite_core::ErrorKind;

    #[test]
    fn assert_raises_assertion_error() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func("check", &["x"], &[b.assert(b.name("x"), Some(b.str("bad")))]);
        let text = compile_function_text(&b, def, "check");
        assert!(text.contains("call $make_exception"));
        assert!(text.contains("throw $exc"));
    }

    #[test]
    fn return_at_module_level_is_rejected() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[b.ret(None)]);
        let err = try_compile_module(&b, module).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedConstruct);
    }

    #[test]
    fn imports_bind_runtime_modules() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[
            b.import(&["math"]),
            b.import_from("random", &["randint"]),
            b.expr_stmt(b.call_name("print", &[b.name("randint")])),
        ]);
        let text = compile_module_text(&b, module);
        assert!(text.contains("call $import_module"));
        assert!(text.contains("call $object_getattr"));
    }

    #[test]
    fn star_import_is_rejected() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[b.import_from("math", &["*"])]);
        assert!(try_compile_module(&b, module).is_err());
    }

    #[test]
    fn delete_subscript_uses_runtime() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "drop_it",
            &["d"],
            &[b.delete(&[b.subscript(b.name("d"), b.str("k"))])],
        );
        let text = compile_function_text(&b, def, "drop_it");
        assert!(text.contains("call $subscript_delete"));
    }
}
