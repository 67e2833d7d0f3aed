//! `for` loops and the iteration protocol shared with comprehensions.
//!
//! `for i in range(...)` over a plain name compiles to a counted `i64` loop.
//! Every other iterable is dispatched once, at loop entry, on its runtime
//! representation: lists and tuples are walked by index, generators are
//! advanced in place and anything else is turned into a `$PAIR` chain by
//! the runtime.

use pyrite_ast::*;
use pyrite_core::{NativeType, Result, Span};

use crate::analysis::Effects;
use crate::function_compiler::{FunctionCompiler, SafeAccess};
use crate::scope::LocalType;

const MODE_LIST: i32 = 1;
const MODE_TUPLE: i32 = 2;
const MODE_CHAIN: i32 = 3;
const MODE_GENERATOR: i32 = 4;

/// Locals of one active iteration.
#[derive(Debug, Clone)]
pub(crate) struct IterState {
    /// The iterable, or the remaining chain in chain mode.
    it: String,
    mode: String,
    idx: String,
}

impl IterState {
    pub(crate) fn new(fc: &mut FunctionCompiler<'_, '_, '_>) -> Self {
        Self {
            it: fc.named_temp("it", LocalType::Any),
            mode: fc.named_temp("mode", LocalType::I32),
            idx: fc.named_temp("idx", LocalType::I32),
        }
    }

    /// Start iterating the value on the stack.
    pub(crate) fn emit_setup(&self, fc: &mut FunctionCompiler<'_, '_, '_>, span: Span) -> Result<()> {
        let it = &self.it;
        fc.emit(format!("local.set {it}"));
        for (ty, mode) in [("$LIST", MODE_LIST), ("$TUPLE", MODE_TUPLE), ("$GENERATOR", MODE_GENERATOR)] {
            fc.emit(format!("local.get {it}"));
            fc.emit(format!("ref.test (ref {ty})"));
            fc.emitter.if_(Some("i32"));
            fc.emit(format!("i32.const {mode}"));
            fc.emitter.else_();
        }
        fc.emit(format!("local.get {it}"));
        fc.rt("iter_prepare", span)?;
        fc.emit(format!("local.set {it}"));
        fc.emit(format!("i32.const {MODE_CHAIN}"));
        for _ in 0..3 {
            fc.emitter.end();
        }
        fc.emit(format!("local.set {}", self.mode));
        fc.emit("i32.const 0");
        fc.emit(format!("local.set {}", self.idx));
        Ok(())
    }

    /// Fetch the next item into `item`, or branch to `exhausted`.
    pub(crate) fn emit_next(
        &self,
        fc: &mut FunctionCompiler<'_, '_, '_>,
        item: &str,
        exhausted: &str,
        span: Span,
    ) -> Result<()> {
        let (it, idx) = (&self.it, &self.idx);
        let got = fc.label("got");
        fc.emitter.block(&got, None);
        for (ty, mode) in [("$LIST", MODE_LIST), ("$TUPLE", MODE_TUPLE)] {
            fc.emit(format!("local.get {}", self.mode));
            fc.emit(format!("i32.const {mode}"));
            fc.emit("i32.eq");
            fc.emitter.if_(None);
            fc.emit(format!("local.get {idx}"));
            fc.emit(format!("local.get {it}"));
            fc.emit(format!("ref.cast (ref {ty})"));
            fc.emit(format!("struct.get {ty} $len"));
            fc.emit("i32.ge_u");
            fc.emit(format!("br_if {exhausted}"));
            fc.emit(format!("local.get {it}"));
            fc.emit(format!("ref.cast (ref {ty})"));
            fc.emit(format!("struct.get {ty} $data"));
            fc.emit(format!("local.get {idx}"));
            fc.emit("array.get $ARRAY_ANY");
            fc.emit(format!("local.set {item}"));
            fc.emit(format!("local.get {idx}"));
            fc.emit("i32.const 1");
            fc.emit("i32.add");
            fc.emit(format!("local.set {idx}"));
            fc.emit(format!("br {got}"));
            fc.emitter.end();
        }

        fc.emit(format!("local.get {}", self.mode));
        fc.emit(format!("i32.const {MODE_GENERATOR}"));
        fc.emit("i32.eq");
        fc.emitter.if_(None);
        fc.emit(format!("local.get {it}"));
        fc.rt("generator_advance", span)?;
        fc.emit("i32.eqz");
        fc.emit(format!("br_if {exhausted}"));
        fc.emit(format!("local.get {it}"));
        fc.emit("ref.cast (ref $GENERATOR)");
        fc.emit("struct.get $GENERATOR $value");
        fc.emit(format!("local.set {item}"));
        fc.emit(format!("br {got}"));
        fc.emitter.end();

        fc.emit(format!("local.get {it}"));
        fc.emit("ref.is_null");
        fc.emit(format!("br_if {exhausted}"));
        fc.emit(format!("local.get {it}"));
        fc.emit("ref.cast (ref $PAIR)");
        fc.emit("struct.get $PAIR $car");
        fc.emit(format!("local.set {item}"));
        fc.emit(format!("local.get {it}"));
        fc.emit("ref.cast (ref $PAIR)");
        fc.emit("struct.get $PAIR $cdr");
        fc.emit(format!("local.set {it}"));
        fc.emitter.end();
        Ok(())
    }
}

/// Arguments of a `range(...)` loop.
struct RangeArgs<'ast> {
    start: Option<Expr<'ast>>,
    stop: Expr<'ast>,
    step: Option<Expr<'ast>>,
}

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    pub(crate) fn compile_for(&mut self, f: &'ast ForStmt<'ast>) -> Result<()> {
        match self.range_args(f) {
            Some(range) => self.compile_range_for(f, range),
            None => self.compile_iter_for(f),
        }
    }

    fn range_args(&self, f: &'ast ForStmt<'ast>) -> Option<RangeArgs<'ast>> {
        if self.generator.is_some() {
            return None;
        }
        let Expr::Name(target) = f.target else {
            return None;
        };
        let (name, call) = f.iter.as_named_call()?;
        if name != "range"
            || !self.is_builtin_name(name, call.span)
            || !call.keywords.is_empty()
            || call.has_starred()
            || self.is_comprehension_target(target.id)
        {
            return None;
        }
        match *call.args {
            [stop] => Some(RangeArgs {
                start: None,
                stop,
                step: None,
            }),
            [start, stop] => Some(RangeArgs {
                start: Some(start),
                stop,
                step: None,
            }),
            [start, stop, step] => Some(RangeArgs {
                start: Some(start),
                stop,
                step: Some(step),
            }),
            _ => None,
        }
    }

    /// `for i in range(start, stop, step)` as an `i64` counted loop.
    fn compile_range_for(&mut self, f: &'ast ForStmt<'ast>, range: RangeArgs<'ast>) -> Result<()> {
        let Expr::Name(target) = f.target else {
            return self.compile_iter_for(f);
        };
        let ctr = self.named_temp("ctr", LocalType::I64);
        let stop = self.named_temp("stop", LocalType::I64);
        self.comment(format!("for {} in range", target.id));

        match range.start {
            Some(start) => self.compile_native(start, NativeType::I64)?,
            None => self.emit("i64.const 0"),
        }
        self.emit(format!("local.set {ctr}"));
        self.compile_native(range.stop, NativeType::I64)?;
        self.emit(format!("local.set {stop}"));

        // A literal step fixes the direction; otherwise it is checked once.
        let literal_step = range.step.map_or(Some(1), constant_int);
        let step = match literal_step {
            Some(value) if value != 0 => format!("i64.const {value}"),
            _ => {
                let local = self.named_temp("step", LocalType::I64);
                if let Some(step) = range.step {
                    self.compile_native(step, NativeType::I64)?;
                } else {
                    self.emit("i64.const 1");
                }
                self.emit(format!("local.tee {local}"));
                self.rt("range_step_check", f.span)?;
                format!("local.get {local}")
            }
        };

        let safe = self.safe_access(f, &range, &ctr);

        let brk = self.label("brk");
        let exhausted = self.label("exhausted");
        let top = self.label("top");
        let cont = self.label("cont");
        self.emitter.block(&brk, None);
        self.emitter.block(&exhausted, None);
        self.emitter.loop_(&top);
        match literal_step {
            Some(value) if value != 0 => {
                self.emit(format!("local.get {ctr}"));
                self.emit(format!("local.get {stop}"));
                self.emit(if value > 0 { "i64.ge_s" } else { "i64.le_s" });
            }
            _ => {
                self.emit(step.as_str());
                self.emit("i64.const 0");
                self.emit("i64.gt_s");
                self.emitter.if_(Some("i32"));
                self.emit(format!("local.get {ctr}"));
                self.emit(format!("local.get {stop}"));
                self.emit("i64.ge_s");
                self.emitter.else_();
                self.emit(format!("local.get {ctr}"));
                self.emit(format!("local.get {stop}"));
                self.emit("i64.le_s");
                self.emitter.end();
            }
        }
        self.emit(format!("br_if {exhausted}"));

        match self.native_binding(target.id) {
            Some((wat, native)) if native.is_int() => {
                self.emit(format!("local.get {ctr}"));
                self.store_native_binding(&wat, native);
            }
            _ => {
                self.emit(format!("local.get {ctr}"));
                self.rt("pack_int", f.span)?;
                self.store_name(target.id, target.span)?;
            }
        }

        let pushed_safe = safe.is_some();
        if let Some(access) = safe {
            tracing::trace!(
                function = %self.name,
                container = access.container,
                index = access.index,
                "bounds checks elided"
            );
            self.safe.push(access);
        }
        self.emitter.block(&cont, None);
        self.jumps.push_loop(&brk, &cont);
        let outcome = self.compile_body(f.body);
        self.jumps.pop_loop(f.span)?;
        if pushed_safe {
            self.safe.pop();
        }
        outcome?;
        self.emitter.end();

        self.emit(format!("local.get {ctr}"));
        self.emit(step.as_str());
        self.emit("i64.add");
        self.emit(format!("local.set {ctr}"));
        self.emit(format!("br {top}"));
        self.emitter.end();
        self.emitter.end();
        self.compile_body(f.orelse)?;
        self.emitter.end();
        Ok(())
    }

    /// `c[i]` is provably in bounds inside `for i in range(len(c))` when the
    /// body can neither resize nor rebind `c` and never rebinds `i`.
    fn safe_access(&self, f: &'ast ForStmt<'ast>, range: &RangeArgs<'ast>, ctr: &str) -> Option<SafeAccess<'ast>> {
        if !self.ctx.config.safe_bounds || range.start.is_some() || range.step.is_some() {
            return None;
        }
        let Expr::Name(index) = f.target else {
            return None;
        };
        let (len, call) = range.stop.as_named_call()?;
        if len != "len" || !self.is_builtin_name(len, call.span) || call.args.len() != 1 || !call.keywords.is_empty() {
            return None;
        }
        let container = call.args[0].as_name()?;
        if !self.is_known_list(call.args[0]) || container == index.id {
            return None;
        }
        let effects = Effects::of_body(f.body);
        let opaque_calls = !effects.methods.is_empty()
            || effects
                .callees
                .iter()
                .any(|callee| !self.is_builtin_name(callee, f.span));
        if effects.may_resize_lists()
            || effects.walrus
            || effects.nested_scopes
            || opaque_calls
            || effects.assigned.contains(container)
            || effects.assigned.contains(index.id)
        {
            return None;
        }
        Some(SafeAccess {
            container,
            index: index.id,
            counter: ctr.to_string(),
        })
    }

    /// Any other iterable.
    fn compile_iter_for(&mut self, f: &'ast ForStmt<'ast>) -> Result<()> {
        let body_resume = self.resume_range(f.body);
        let orelse_resume = self.resume_range(f.orelse);
        let resumable = body_resume.is_some() || orelse_resume.is_some();

        let iter = IterState::new(self);
        if resumable {
            self.emit("local.get $resume");
            self.emit("i32.eqz");
            self.emitter.if_(None);
        }
        self.compile_expr(f.iter)?;
        iter.emit_setup(self, f.span)?;
        if resumable {
            self.emitter.end();
        }

        let element_type = self.types.element_type(f.iter);
        let shadows = self.types.shadow_target(f.target, element_type);

        let brk = self.label("brk");
        let exhausted = self.label("exhausted");
        let next = self.label("next");
        let item = self.named_temp("item", LocalType::Any);
        self.emitter.block(&brk, None);
        self.emitter.block(&exhausted, None);
        if orelse_resume.is_some() {
            self.emit_resume_in(orelse_resume);
            self.emit(format!("br_if {exhausted}"));
        }
        self.emitter.loop_(&next);
        if body_resume.is_some() {
            self.emit("local.get $resume");
            self.emit("i32.eqz");
            self.emitter.if_(None);
        }
        iter.emit_next(self, &item, &exhausted, f.span)?;
        self.store_target(f.target, &item, f.span)?;
        if body_resume.is_some() {
            self.emitter.end();
        }
        self.jumps.push_loop(&brk, &next);
        let outcome = self.compile_body(f.body);
        self.jumps.pop_loop(f.span)?;
        for _ in 0..shadows {
            self.types.pop_shadow();
        }
        outcome?;
        self.emit(format!("br {next}"));
        self.emitter.end();
        self.emitter.end();
        self.compile_body(f.orelse)?;
        self.emitter.end();
        Ok(())
    }
}

/// The value of an integer literal, possibly negated.
fn constant_int(expr: Expr<'_>) -> Option<i64> {
    match expr {
        Expr::UnaryOp(u) if u.op == pyrite_core::UnaryOp::USub => constant_int(u.operand)?.checked_neg(),
        other => other.as_int(),
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::compile_function_text;
    use bumpalo::Bump;
    use pyrite_ast::*;
    use pyrite_core::{BinaryOp, UnaryOp};

    #[test]
    fn range_loop_is_counted() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "total",
            &["n"],
            &[
                b.assign_name("s", b.int(0)),
                b.for_range("i", &[b.name("n")], &[b.aug_assign(b.name("s"), BinaryOp::Add, b.name("i"))]),
                b.ret(Some(b.name("s"))),
            ],
        );
        let text = compile_function_text(&b, def, "total");
        assert!(text.contains("i64.ge_s"));
        assert!(text.contains("i64.add"));
        assert!(!text.contains("call $iter_prepare"));
        assert!(!text.contains("range_step_check"));
    }

    #[test]
    fn negative_literal_step_counts_down() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "down",
            &[],
            &[b.for_range(
                "i",
                &[b.int(10), b.int(0), b.unary(UnaryOp::USub, b.int(1))],
                &[b.expr_stmt(b.call_name("print", &[b.name("i")]))],
            )],
        );
        let text = compile_function_text(&b, def, "down");
        assert!(text.contains("i64.le_s"));
        assert!(text.contains("i64.const -1"));
    }

    #[test]
    fn dynamic_step_is_checked_once() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "stepped",
            &["k"],
            &[b.for_range("i", &[b.int(0), b.int(10), b.name("k")], &[b.pass()])],
        );
        let text = compile_function_text(&b, def, "stepped");
        assert_eq!(text.matches("call $range_step_check").count(), 1);
        assert!(text.contains("i64.gt_s"));
    }

    #[test]
    fn len_loop_elides_bounds_checks() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let body = [b.aug_assign(
            b.name("s"),
            BinaryOp::Add,
            b.subscript(b.name("xs"), b.name("i")),
        )];
        let def = b.func(
            "sum_all",
            &[],
            &[
                b.assign_name("xs", b.list(&[b.int(1), b.int(2), b.int(3)])),
                b.assign_name("s", b.int(0)),
                b.for_range("i", &[b.call_name("len", &[b.name("xs")])], &body),
                b.ret(Some(b.name("s"))),
            ],
        );
        let text = compile_function_text(&b, def, "sum_all");
        assert!(text.contains("i32.wrap_i64\n"));
        assert!(!text.contains("call $subscript_get"));
    }

    #[test]
    fn resizing_body_keeps_bounds_checks() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let body = [
            b.expr_stmt(b.call_name("print", &[b.subscript(b.name("xs"), b.name("i"))])),
            b.expr_stmt(b.method_call(b.name("xs"), "pop", &[])),
        ];
        let def = b.func(
            "drain",
            &[],
            &[
                b.assign_name("xs", b.list(&[b.int(1), b.int(2)])),
                b.for_range("i", &[b.call_name("len", &[b.name("xs")])], &body),
            ],
        );
        let text = compile_function_text(&b, def, "drain");
        assert!(text.contains("i64.lt_u") || text.contains("call $subscript_get"));
    }

    #[test]
    fn generic_loop_with_else_and_break() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "find",
            &["xs"],
            &[
                b.for_else(
                    b.name("x"),
                    b.name("xs"),
                    &[b.if_(b.name("x"), &[b.brk()], &[])],
                    &[b.ret(Some(b.none()))],
                ),
                b.ret(Some(b.name("x"))),
            ],
        );
        let text = compile_function_text(&b, def, "find");
        assert!(text.contains("call $iter_prepare"));
        assert!(text.contains("br $brk_"));
        assert!(text.contains("br_if $exhausted_"));
    }

    #[test]
    fn tuple_target_unpacks() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "pairs",
            &["items"],
            &[b.for_(
                b.tuple(&[b.name("k"), b.name("v")]),
                b.name("items"),
                &[b.expr_stmt(b.call_name("print", &[b.name("k"), b.name("v")]))],
            )],
        );
        let text = compile_function_text(&b, def, "pairs");
        assert!(text.contains("call $unpack_sequence"));
    }
}
