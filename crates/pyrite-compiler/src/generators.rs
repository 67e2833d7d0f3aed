//! Generator functions.
//!
//! A generator `def` compiles to two functions. The factory, at the def's
//! own index, only allocates a `$GENERATOR` record holding the arguments and
//! the environment. The body function is called by the runtime on every
//! advance with the record as `$args`:
//!
//! ```text
//! local.get $args
//! ref.cast (ref $GENERATOR)
//! local.set $gen
//! local.get $gen
//! struct.get $GENERATOR $state
//! local.tee $resume
//! i32.eqz
//! if
//!   ;; fresh start: bind parameters from the saved argument chain
//! else
//!   ;; restore every local from $gen.locals
//! end
//! ;; body
//! ```
//!
//! Each suspension point has a resume id (see [`YieldPoints`]). Statements
//! that contain no suspension point are skipped while `$resume` is set, and
//! compound statements steer into the branch that holds the target id. The
//! suspension point itself clears `$resume`, so execution continues
//! normally from there.
//!
//! Which locals to save is only known once the whole body is emitted, so
//! the body carries `@@save@@`/`@@restore@@` marker lines that
//! [`GeneratorState::expand_markers`] replaces when the function text is
//! finished.

use pyrite_ast::*;
use pyrite_core::{CompileError, Result};

use crate::analysis::{ScopeId, YieldPoints};
use crate::context::{CompiledFunction, FunctionFlags};
use crate::function_compiler::{FunctionCompiler, uniform_header};
use crate::scope::{LocalTable, LocalType};
use crate::stmt::IterState;

const SAVE_MARKER: &str = "@@save@@";
const RESTORE_MARKER: &str = "@@restore@@";

/// Locals the resume machinery owns; they are never saved.
const MACHINERY: &[&str] = &["$gen", "$resume", "$yv", "$saved"];

/// Per-function generator state.
#[derive(Debug)]
pub(crate) struct GeneratorState {
    pub points: YieldPoints,
}

impl GeneratorState {
    pub(crate) fn new(points: YieldPoints) -> Self {
        Self { points }
    }

    /// Replace the save and restore markers in a finished body.
    pub(crate) fn expand_markers(&self, body: &str, locals: &LocalTable) -> String {
        let saved: Vec<(&str, LocalType)> = locals
            .iter()
            .filter(|(name, ty)| is_saved(name, *ty))
            .collect();
        let mut out = String::with_capacity(body.len() + saved.len() * 64);
        for line in body.lines() {
            let trimmed = line.trim_start();
            let indent = &line[..line.len() - trimmed.len()];
            let expansion = match trimmed {
                SAVE_MARKER => save_sequence(&saved),
                RESTORE_MARKER => restore_sequence(&saved),
                _ => {
                    out.push_str(line);
                    out.push('\n');
                    continue;
                }
            };
            for instr in expansion {
                out.push_str(indent);
                out.push_str(&instr);
                out.push('\n');
            }
        }
        out
    }
}

fn is_saved(name: &str, ty: LocalType) -> bool {
    !MACHINERY.contains(&name) && !matches!(ty, LocalType::Exn | LocalType::I64 | LocalType::F64)
}

fn save_sequence(saved: &[(&str, LocalType)]) -> Vec<String> {
    let mut out = vec!["local.get $gen".to_string()];
    for (name, ty) in saved {
        out.push(format!("local.get {name}"));
        if *ty == LocalType::I32 {
            out.push("ref.i31".to_string());
        }
    }
    out.push(format!("array.new_fixed $ARRAY_ANY {}", saved.len()));
    out.push("struct.set $GENERATOR $locals".to_string());
    out
}

fn restore_sequence(saved: &[(&str, LocalType)]) -> Vec<String> {
    let mut out = vec![
        "local.get $gen".to_string(),
        "struct.get $GENERATOR $locals".to_string(),
        "local.set $saved".to_string(),
    ];
    for (i, (name, ty)) in saved.iter().enumerate() {
        out.push("local.get $saved".to_string());
        out.push(format!("i32.const {i}"));
        out.push("array.get $ARRAY_ANY".to_string());
        match ty {
            LocalType::I32 => {
                out.push("ref.cast (ref i31)".to_string());
                out.push("i31.get_s".to_string());
            }
            LocalType::Any => {}
            other => out.push(format!("ref.cast {}", other.wasm())),
        }
        out.push(format!("local.set {name}"));
    }
    out
}

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    // ==========================================================================
    // Resume Steering
    // ==========================================================================

    /// Resume ids inside `body`, when compiling a generator.
    pub(crate) fn resume_range(&self, body: &[Stmt<'_>]) -> Option<(u32, u32)> {
        self.generator.as_ref().and_then(|g| g.points.range(body))
    }

    pub(crate) fn is_resumable(&self, stmt: Stmt<'_>) -> bool {
        self.generator
            .as_ref()
            .is_some_and(|g| g.points.range_of(stmt).is_some())
    }

    /// Push whether `$resume` lies in `range` (`0` for no range).
    pub(crate) fn emit_resume_in(&mut self, range: Option<(u32, u32)>) {
        let Some((lo, hi)) = range else {
            self.emit("i32.const 0");
            return;
        };
        if lo == hi {
            self.emit("local.get $resume");
            self.emit(format!("i32.const {lo}"));
            self.emit("i32.eq");
            return;
        }
        self.emit("local.get $resume");
        self.emit(format!("i32.const {lo}"));
        self.emit("i32.ge_u");
        self.emit("local.get $resume");
        self.emit(format!("i32.const {hi}"));
        self.emit("i32.le_u");
        self.emit("i32.and");
    }

    /// One part of a compound statement. In a statement that holds a
    /// suspension point, a part that holds none is skipped while resuming.
    pub(crate) fn compile_part(&mut self, body: &'ast [Stmt<'ast>], resumable: bool) -> Result<()> {
        if !resumable || self.resume_range(body).is_some() {
            return self.compile_body(body);
        }
        self.emit("local.get $resume");
        self.emit("i32.eqz");
        self.emitter.if_(None);
        self.compile_body(body)?;
        self.emitter.end();
        Ok(())
    }

    // ==========================================================================
    // Suspension Points
    // ==========================================================================

    fn resume_id(&self, expr: Expr<'ast>) -> Result<u32> {
        let span = expr.span();
        let Some(generator) = &self.generator else {
            return Err(CompileError::unsupported("'yield' outside a generator function", span));
        };
        generator
            .points
            .id_of(expr)
            .ok_or_else(|| CompileError::internal("suspension point without a resume id", span))
    }

    /// Leave the body with the value in `$yv`, resuming at `id` next time.
    fn emit_suspend(&mut self, id: u32) {
        self.emit(SAVE_MARKER);
        self.emit("local.get $gen");
        self.emit(format!("i32.const {id}"));
        self.emit("struct.set $GENERATOR $state");
        self.emit("local.get $yv");
        self.emit("return");
    }

    /// `yield value`; evaluates to the value sent on resumption.
    pub(crate) fn compile_yield(&mut self, y: &'ast YieldExpr<'ast>) -> Result<()> {
        let id = self.resume_id(Expr::Yield(y))?;
        self.emit("local.get $resume");
        self.emit(format!("i32.const {id}"));
        self.emit("i32.eq");
        self.emitter.if_(Some("(ref null eq)"));
        self.emit("i32.const 0");
        self.emit("local.set $resume");
        self.emit("local.get $gen");
        self.rt("generator_resume_value", y.span)?;
        self.emitter.else_();
        match y.value {
            Some(value) => self.compile_expr(value)?,
            None => self.push_none(),
        }
        self.emit("local.set $yv");
        self.emit_suspend(id);
        self.emitter.end();
        Ok(())
    }

    /// `yield from iterable`; yields every item, then evaluates to None.
    pub(crate) fn compile_yield_from(&mut self, y: &'ast YieldFromExpr<'ast>) -> Result<()> {
        let id = self.resume_id(Expr::YieldFrom(y))?;
        let iter = IterState::new(self);
        let item = self.named_temp("item", LocalType::Any);
        let done = self.label("yf_done");

        self.emit("local.get $resume");
        self.emit(format!("i32.const {id}"));
        self.emit("i32.ne");
        self.emitter.if_(None);
        self.compile_expr(y.value)?;
        iter.emit_setup(self, y.span)?;
        self.emitter.end();

        self.emitter.block(&done, None);
        self.emit("i32.const 0");
        self.emit("local.set $resume");
        iter.emit_next(self, &item, &done, y.span)?;
        self.emit(format!("local.get {item}"));
        self.emit("local.set $yv");
        self.emit_suspend(id);
        self.emitter.end();
        self.push_none();
        Ok(())
    }

    // ==========================================================================
    // Generator Functions
    // ==========================================================================

    /// Compile the resumable body of generator `f`. The caller has run
    /// [`analyze`](Self::analyze) with the `GENERATOR` flag set.
    pub(crate) fn compile_generator_body(&mut self, f: &'ast FunctionDef<'ast>) -> Result<()> {
        let points = YieldPoints::collect(f.body)?;
        tracing::trace!(function = %self.name, points = points.count(), "generator body");
        self.generator = Some(GeneratorState::new(points));
        self.locals.declare("$gen", LocalType::Generator);
        self.locals.declare("$resume", LocalType::I32);
        self.locals.declare("$yv", LocalType::Any);
        self.locals.declare("$saved", LocalType::Array);

        self.emit("local.get $args");
        self.emit("ref.cast (ref $GENERATOR)");
        self.emit("local.set $gen");
        self.emit_unwrap_defaults();
        self.emit("local.get $gen");
        self.emit("struct.get $GENERATOR $state");
        self.emit("local.tee $resume");
        self.emit("i32.eqz");
        self.emitter.if_(None);
        self.emit("local.get $gen");
        self.emit("struct.get $GENERATOR $sent");
        self.emit("local.set $args");
        self.emit_frame();
        self.emit_prologue(f.args, None, f.span)?;
        self.emitter.else_();
        self.emit(RESTORE_MARKER);
        self.emitter.end();

        self.compile_body(f.body)?;
        self.push_none();
        self.emit_function_exit();
        Ok(())
    }

    /// Define the factory of generator function `index` whose body function
    /// is `body_index`.
    pub(crate) fn define_generator_factory(&mut self, scope_id: ScopeId, index: u32, body_index: u32, name: &str) {
        let slot = self.ctx.table_index(body_index);
        let mut factory = FunctionCompiler::new(
            &mut *self.ctx,
            scope_id,
            index,
            name,
            FunctionFlags::GENERATOR_FACTORY,
        );
        factory.emit("i32.const 0");
        factory.push_none();
        factory.emit("ref.null $ARRAY_ANY");
        factory.emit(format!("i32.const {slot}"));
        factory.emit("local.get $env");
        factory.emit("local.get $args");
        factory.push_none();
        factory.emit("struct.new $GENERATOR");
        let (text, instructions) = factory.finish_text(&uniform_header(index));
        self.ctx.define_function(CompiledFunction {
            index,
            name: name.to_string(),
            text,
            flags: FunctionFlags::GENERATOR_FACTORY,
            instructions,
        });
    }
}
