//! Subscripts and slices.
//!
//! Reads and writes pick the first tier that applies:
//!
//! 1. Proven in bounds: `c[i]` inside `for i in range(len(c))` with nothing
//!    in the loop able to resize `c`. Direct `array.get`/`array.set`.
//! 2. Constant index on a known list or tuple. Inline length check,
//!    `subscript_get` on the out-of-range path for the error.
//! 3. Two-level read `a[i][j]` on a known list with native integer indices.
//!    Both levels are one inlined block; the row is `ref.test`ed before the
//!    inner access, so ragged or non-list rows still work.
//! 4. Native integer index on a known list. Negative indices are normalized
//!    and one unsigned comparison covers both bounds.
//! 5. Everything else: `subscript_get`/`subscript_set`.

use pyrite_ast::*;
use pyrite_core::{BinaryOp, InferredType, NativeType, Result, Span};

use super::binary::binary_runtime_name;
use crate::function_compiler::FunctionCompiler;
use crate::scope::LocalType;

/// Record type of a statically known sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sequence {
    List,
    Tuple,
}

impl Sequence {
    fn ty(self) -> &'static str {
        match self {
            Sequence::List => "$LIST",
            Sequence::Tuple => "$TUPLE",
        }
    }
}

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    pub(crate) fn compile_subscript(&mut self, s: &'ast SubscriptExpr<'ast>) -> Result<()> {
        if let Expr::Slice(slice) = s.slice {
            self.compile_expr(s.value)?;
            self.compile_slice_bounds(slice)?;
            return self.rt("slice_get", s.span);
        }
        if let Some(counter) = self.safe_counter(s.value, s.slice) {
            self.compile_expr(s.value)?;
            self.emit("ref.cast (ref $LIST)");
            self.emit("struct.get $LIST $data");
            self.emit(format!("local.get {counter}"));
            self.emit("i32.wrap_i64");
            self.emit("array.get $ARRAY_ANY");
            return Ok(());
        }
        let sequence = self.known_sequence(s.value);
        if let (Some(seq), Some(index)) = (sequence, s.slice.as_int()) {
            return self.compile_constant_index(s, seq, index);
        }
        if let Some(row) = self.nested_row(s) {
            return self.compile_nested_index(row, s);
        }
        if sequence == Some(Sequence::List) && self.native_type_of(s.slice).is_some_and(NativeType::is_int) {
            return self.compile_native_index(s);
        }
        self.compile_expr(s.value)?;
        self.compile_expr(s.slice)?;
        self.rt("subscript_get", s.span)
    }

    /// `obj[key] = <value in value_local>`.
    pub(crate) fn store_subscript(&mut self, s: &'ast SubscriptExpr<'ast>, value: &str) -> Result<()> {
        if let Expr::Slice(slice) = s.slice {
            self.compile_expr(s.value)?;
            self.compile_slice_bounds(slice)?;
            self.emit(format!("local.get {value}"));
            return self.rt("slice_set", s.span);
        }
        if let Some(counter) = self.safe_counter(s.value, s.slice) {
            self.compile_expr(s.value)?;
            self.emit("ref.cast (ref $LIST)");
            self.emit("struct.get $LIST $data");
            self.emit(format!("local.get {counter}"));
            self.emit("i32.wrap_i64");
            self.emit(format!("local.get {value}"));
            self.emit("array.set $ARRAY_ANY");
            return Ok(());
        }
        if self.known_sequence(s.value) == Some(Sequence::List)
            && self.native_type_of(s.slice).is_some_and(NativeType::is_int)
        {
            let list = self.temp(LocalType::Any);
            self.compile_expr(s.value)?;
            self.emit(format!("local.set {list}"));
            let (index, original) = self.normalized_native_index(&list, s.slice, Sequence::List)?;
            self.emit_index_in_bounds(&list, &index, Sequence::List);
            self.emitter.if_(None);
            self.emit(format!("local.get {list}"));
            self.emit("ref.cast (ref $LIST)");
            self.emit("struct.get $LIST $data");
            self.emit(format!("local.get {index}"));
            self.emit("i32.wrap_i64");
            self.emit(format!("local.get {value}"));
            self.emit("array.set $ARRAY_ANY");
            self.emitter.else_();
            self.emit(format!("local.get {list}"));
            self.emit(format!("local.get {original}"));
            self.rt("pack_int", s.span)?;
            self.emit(format!("local.get {value}"));
            self.rt("subscript_set", s.span)?;
            self.emitter.end();
            return Ok(());
        }
        self.compile_expr(s.value)?;
        self.compile_expr(s.slice)?;
        self.emit(format!("local.get {value}"));
        self.rt("subscript_set", s.span)
    }

    pub(crate) fn delete_subscript(&mut self, s: &'ast SubscriptExpr<'ast>) -> Result<()> {
        self.compile_expr(s.value)?;
        if let Expr::Slice(slice) = s.slice {
            self.compile_slice_bounds(slice)?;
            return self.rt("slice_delete", s.span);
        }
        self.compile_expr(s.slice)?;
        self.rt("subscript_delete", s.span)
    }

    /// `obj[key] op= value`, evaluating `obj` and `key` once.
    pub(crate) fn compile_subscript_aug(
        &mut self,
        s: &'ast SubscriptExpr<'ast>,
        op: BinaryOp,
        value: Expr<'ast>,
        span: Span,
    ) -> Result<()> {
        let container = self.temp(LocalType::Any);
        let key = self.temp(LocalType::Any);
        let result = self.temp(LocalType::Any);
        self.compile_expr(s.value)?;
        self.emit(format!("local.set {container}"));
        self.compile_expr(s.slice)?;
        self.emit(format!("local.set {key}"));
        self.emit(format!("local.get {container}"));
        self.emit(format!("local.get {key}"));
        self.rt("subscript_get", s.span)?;
        self.compile_expr(value)?;
        self.emit_inplace_op(op, span)?;
        self.emit(format!("local.set {result}"));
        self.emit(format!("local.get {container}"));
        self.emit(format!("local.get {key}"));
        self.emit(format!("local.get {result}"));
        self.rt("subscript_set", s.span)
    }

    /// Combine the two boxed values on the stack for `target op= value`.
    pub(crate) fn emit_inplace_op(&mut self, op: BinaryOp, span: Span) -> Result<()> {
        if op == BinaryOp::Add {
            self.rt("inplace_add", span)
        } else {
            self.rt(binary_runtime_name(op), span)
        }
    }

    fn compile_slice_bounds(&mut self, slice: &'ast SliceExpr<'ast>) -> Result<()> {
        for bound in [slice.lower, slice.upper, slice.step] {
            match bound {
                Some(expr) => self.compile_expr(expr)?,
                None => self.push_none(),
            }
        }
        Ok(())
    }

    // ==========================================================================
    // Fast Paths
    // ==========================================================================

    /// The loop counter proving `container[index]` in bounds, if any.
    fn safe_counter(&self, container: Expr<'ast>, index: Expr<'ast>) -> Option<String> {
        let (Expr::Name(c), Expr::Name(i)) = (container, index) else {
            return None;
        };
        if self.is_comprehension_target(c.id) || self.is_comprehension_target(i.id) {
            return None;
        }
        self.safe
            .iter()
            .rev()
            .find(|s| s.container == c.id && s.index == i.id)
            .map(|s| s.counter.clone())
    }

    fn known_sequence(&self, expr: Expr<'ast>) -> Option<Sequence> {
        if self.is_known_list(expr) {
            return Some(Sequence::List);
        }
        if let Expr::Name(n) = expr {
            if self.is_comprehension_target(n.id) {
                return None;
            }
        }
        match self.inferred(expr) {
            InferredType::Tuple(elems) if !elems.is_empty() && matches!(expr, Expr::Name(_)) => Some(Sequence::Tuple),
            _ => None,
        }
    }

    fn compile_constant_index(&mut self, s: &'ast SubscriptExpr<'ast>, seq: Sequence, index: i64) -> Result<()> {
        let ty = seq.ty();
        let obj = self.temp(LocalType::Any);
        let len = self.temp(LocalType::I32);
        self.compile_expr(s.value)?;
        self.emit(format!("local.tee {obj}"));
        self.emit(format!("ref.cast (ref {ty})"));
        self.emit(format!("struct.get {ty} $len"));
        self.emit(format!("local.set {len}"));
        // In bounds when index < len (index >= 0) or -index <= len (index < 0).
        let bound = index.checked_neg().filter(|_| index < 0).unwrap_or(index);
        if !(0..=i64::from(i32::MAX)).contains(&bound) {
            self.emit(format!("local.get {obj}"));
            self.push_int(index, s.span)?;
            return self.rt("subscript_get", s.span);
        }
        if index >= 0 {
            self.emit(format!("i32.const {index}"));
            self.emit(format!("local.get {len}"));
            self.emit("i32.lt_u");
        } else {
            self.emit(format!("i32.const {bound}"));
            self.emit(format!("local.get {len}"));
            self.emit("i32.le_u");
        }
        self.emitter.if_(Some("(ref null eq)"));
        self.emit(format!("local.get {obj}"));
        self.emit(format!("ref.cast (ref {ty})"));
        self.emit(format!("struct.get {ty} $data"));
        if index >= 0 {
            self.emit(format!("i32.const {index}"));
        } else {
            self.emit(format!("local.get {len}"));
            self.emit(format!("i32.const {bound}"));
            self.emit("i32.sub");
        }
        self.emit("array.get $ARRAY_ANY");
        self.emitter.else_();
        self.emit(format!("local.get {obj}"));
        self.push_int(index, s.span)?;
        self.rt("subscript_get", s.span)?;
        self.emitter.end();
        Ok(())
    }

    fn compile_native_index(&mut self, s: &'ast SubscriptExpr<'ast>) -> Result<()> {
        let list = self.temp(LocalType::Any);
        self.compile_expr(s.value)?;
        self.emit(format!("local.set {list}"));
        let (index, original) = self.normalized_native_index(&list, s.slice, Sequence::List)?;
        self.emit_index_in_bounds(&list, &index, Sequence::List);
        self.emitter.if_(Some("(ref null eq)"));
        self.emit(format!("local.get {list}"));
        self.emit("ref.cast (ref $LIST)");
        self.emit("struct.get $LIST $data");
        self.emit(format!("local.get {index}"));
        self.emit("i32.wrap_i64");
        self.emit("array.get $ARRAY_ANY");
        self.emitter.else_();
        self.emit(format!("local.get {list}"));
        self.emit(format!("local.get {original}"));
        self.rt("pack_int", s.span)?;
        self.rt("subscript_get", s.span)?;
        self.emitter.end();
        Ok(())
    }

    /// The inner subscript of `a[i][j]` when both levels can be inlined.
    fn nested_row(&self, s: &'ast SubscriptExpr<'ast>) -> Option<&'ast SubscriptExpr<'ast>> {
        let Expr::Subscript(row) = s.value else {
            return None;
        };
        let native_int = |index: Expr<'ast>| self.native_type_of(index).is_some_and(NativeType::is_int);
        if matches!(row.slice, Expr::Slice(_))
            || self.known_sequence(row.value) != Some(Sequence::List)
            || !native_int(row.slice)
            || !native_int(s.slice)
        {
            return None;
        }
        Some(row)
    }

    /// `a[i][j]` as one block. `j` is evaluated after the row is fetched.
    fn compile_nested_index(&mut self, row: &'ast SubscriptExpr<'ast>, s: &'ast SubscriptExpr<'ast>) -> Result<()> {
        self.comment("nested list read");
        let list = self.temp(LocalType::Any);
        let item = self.temp(LocalType::Any);
        self.compile_expr(row.value)?;
        self.emit(format!("local.set {list}"));
        let (outer, outer_original) = self.normalized_native_index(&list, row.slice, Sequence::List)?;
        self.emit_index_in_bounds(&list, &outer, Sequence::List);
        self.emitter.if_(Some("(ref null eq)"));
        self.emit(format!("local.get {list}"));
        self.emit("ref.cast (ref $LIST)");
        self.emit("struct.get $LIST $data");
        self.emit(format!("local.get {outer}"));
        self.emit("i32.wrap_i64");
        self.emit("array.get $ARRAY_ANY");
        self.emitter.else_();
        self.emit(format!("local.get {list}"));
        self.emit(format!("local.get {outer_original}"));
        self.rt("pack_int", row.span)?;
        self.rt("subscript_get", row.span)?;
        self.emitter.end();
        self.emit(format!("local.set {item}"));

        let inner_original = self.temp(LocalType::I64);
        self.compile_native(s.slice, NativeType::I64)?;
        self.emit(format!("local.set {inner_original}"));
        self.emit(format!("local.get {item}"));
        self.emit("ref.test (ref $LIST)");
        self.emitter.if_(Some("(ref null eq)"));
        let inner = self.normalize_index(&item, &inner_original, Sequence::List);
        self.emit_index_in_bounds(&item, &inner, Sequence::List);
        self.emitter.if_(Some("(ref null eq)"));
        self.emit(format!("local.get {item}"));
        self.emit("ref.cast (ref $LIST)");
        self.emit("struct.get $LIST $data");
        self.emit(format!("local.get {inner}"));
        self.emit("i32.wrap_i64");
        self.emit("array.get $ARRAY_ANY");
        self.emitter.else_();
        self.emit(format!("local.get {item}"));
        self.emit(format!("local.get {inner_original}"));
        self.rt("pack_int", s.span)?;
        self.rt("subscript_get", s.span)?;
        self.emitter.end();
        self.emitter.else_();
        self.emit(format!("local.get {item}"));
        self.emit(format!("local.get {inner_original}"));
        self.rt("pack_int", s.span)?;
        self.rt("subscript_get", s.span)?;
        self.emitter.end();
        Ok(())
    }

    /// Evaluate a native index into `(normalized, original)` `i64` locals.
    fn normalized_native_index(&mut self, seq_local: &str, index: Expr<'ast>, seq: Sequence) -> Result<(String, String)> {
        let original = self.temp(LocalType::I64);
        self.compile_native(index, NativeType::I64)?;
        self.emit(format!("local.set {original}"));
        let normalized = self.normalize_index(seq_local, &original, seq);
        Ok((normalized, original))
    }

    /// Copy `original` into a fresh `i64` local, adding the length when negative.
    fn normalize_index(&mut self, seq_local: &str, original: &str, seq: Sequence) -> String {
        let ty = seq.ty();
        let normalized = self.temp(LocalType::I64);
        self.emit(format!("local.get {original}"));
        self.emit(format!("local.set {normalized}"));
        self.emit(format!("local.get {original}"));
        self.emit("i64.const 0");
        self.emit("i64.lt_s");
        self.emitter.if_(None);
        self.emit(format!("local.get {original}"));
        self.emit(format!("local.get {seq_local}"));
        self.emit(format!("ref.cast (ref {ty})"));
        self.emit(format!("struct.get {ty} $len"));
        self.emit("i64.extend_i32_u");
        self.emit("i64.add");
        self.emit(format!("local.set {normalized}"));
        self.emitter.end();
        normalized
    }

    /// Push `0 <= index < len` as one unsigned comparison.
    fn emit_index_in_bounds(&mut self, seq_local: &str, index: &str, seq: Sequence) {
        let ty = seq.ty();
        self.emit(format!("local.get {index}"));
        self.emit(format!("local.get {seq_local}"));
        self.emit(format!("ref.cast (ref {ty})"));
        self.emit(format!("struct.get {ty} $len"));
        self.emit("i64.extend_i32_u");
        self.emit("i64.lt_u");
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::compile_function_text;
    use bumpalo::Bump;
    use pyrite_ast::*;
    use pyrite_core::BinaryOp;

    #[test]
    fn constant_index_on_list_checks_length_inline() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "last",
            &[],
            &[
                b.assign_name("xs", b.list(&[b.int(1), b.int(2)])),
                b.ret(Some(b.subscript(b.name("xs"), b.int(-1)))),
            ],
        );
        let text = compile_function_text(&b, def, "last");
        assert!(text.contains("struct.get $LIST $len"));
        assert!(text.contains("i32.le_u"));
        assert!(text.contains("array.get $ARRAY_ANY"));
        assert!(text.contains("call $subscript_get"));
    }

    #[test]
    fn nested_index_on_known_list_is_one_block() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let row = |x: i64, y: i64| b.list(&[b.int(x), b.int(y)]);
        let cell = b.subscript(b.subscript(b.name("grid"), b.name("i")), b.name("j"));
        let def = b.func(
            "walk",
            &[],
            &[
                b.assign_name("grid", b.list(&[row(1, 2), row(3, 4)])),
                b.for_range(
                    "i",
                    &[b.int(2)],
                    &[b.for_range("j", &[b.int(2)], &[b.expr_stmt(b.call_name("print", &[cell]))])],
                ),
            ],
        );
        let text = compile_function_text(&b, def, "walk");
        assert!(text.contains(";; nested list read"));
        assert!(text.contains("ref.test (ref $LIST)"));
        assert_eq!(text.matches("array.get $ARRAY_ANY").count(), 2);
        // The runtime is only reached from the out-of-range and non-list arms.
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        let first_get = lines.iter().position(|l| *l == "array.get $ARRAY_ANY").unwrap();
        let first_call = lines.iter().position(|l| *l == "call $subscript_get").unwrap();
        assert!(first_get < first_call);
        assert_eq!(text.matches("call $subscript_get").count(), 3);
    }

    #[test]
    fn nested_index_with_boxed_indices_uses_runtime() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "at",
            &["i", "j"],
            &[
                b.assign_name("grid", b.list(&[b.list(&[b.int(1)])])),
                b.ret(Some(b.subscript(b.subscript(b.name("grid"), b.name("i")), b.name("j")))),
            ],
        );
        let text = compile_function_text(&b, def, "at");
        assert!(!text.contains("nested list read"));
        assert!(text.contains("call $subscript_get"));
    }

    #[test]
    fn unknown_container_uses_runtime() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func("get", &["d", "k"], &[b.ret(Some(b.subscript(b.name("d"), b.name("k"))))]);
        let text = compile_function_text(&b, def, "get");
        assert!(text.contains("call $subscript_get"));
        assert!(!text.contains("array.get"));
    }

    #[test]
    fn slice_read_passes_missing_bounds_as_none() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "tail",
            &["xs"],
            &[b.ret(Some(b.subscript(b.name("xs"), b.slice_expr(Some(b.int(1)), None, None))))],
        );
        let text = compile_function_text(&b, def, "tail");
        assert!(text.contains("call $slice_get"));
        assert!(text.matches("ref.null eq").count() >= 2);
    }

    #[test]
    fn augmented_subscript_evaluates_key_once() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "bump",
            &["d", "f"],
            &[b.aug_assign(
                b.subscript(b.name("d"), b.call(b.name("f"), &[])),
                BinaryOp::Add,
                b.int(1),
            )],
        );
        let text = compile_function_text(&b, def, "bump");
        assert_eq!(text.matches("call_indirect").count(), 1);
        assert!(text.contains("call $inplace_add"));
        assert!(text.contains("call $subscript_set"));
    }
}
