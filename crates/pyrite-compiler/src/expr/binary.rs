//! Binary operators and comparisons.

use pyrite_ast::*;
use pyrite_core::{BinaryOp, CmpOp, CompileError, InferredType, NativeType, Result, Span};

use crate::function_compiler::FunctionCompiler;
use crate::scope::LocalType;

/// Runtime operation implementing a boxed binary operator.
pub(crate) fn binary_runtime_name(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "binary_add",
        BinaryOp::Sub => "binary_sub",
        BinaryOp::Mult => "binary_mul",
        BinaryOp::MatMult => "binary_matmul",
        BinaryOp::Div => "binary_truediv",
        BinaryOp::FloorDiv => "binary_floordiv",
        BinaryOp::Mod => "binary_mod",
        BinaryOp::Pow => "binary_pow",
        BinaryOp::LShift => "binary_lshift",
        BinaryOp::RShift => "binary_rshift",
        BinaryOp::BitOr => "binary_or",
        BinaryOp::BitXor => "binary_xor",
        BinaryOp::BitAnd => "binary_and",
    }
}

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    /// Boxed binary operation.
    pub(crate) fn compile_binop(&mut self, b: &'ast BinOpExpr<'ast>) -> Result<()> {
        let left = self.inferred(b.left).boxed();
        let right = self.inferred(b.right).boxed();
        self.compile_expr(b.left)?;
        self.compile_expr(b.right)?;
        let op = match (b.op, &left, &right) {
            (BinaryOp::Add, InferredType::Str, InferredType::Str) => "string_concat",
            (BinaryOp::Add, InferredType::List(_), InferredType::List(_)) => "list_concat",
            (op, _, _) => binary_runtime_name(op),
        };
        self.rt(op, b.span)
    }

    /// Native binary operation producing `native` (`i64` for integer widths).
    pub(crate) fn compile_native_binop(&mut self, b: &'ast BinOpExpr<'ast>, native: NativeType) -> Result<()> {
        self.compile_native(b.left, native)?;
        self.compile_native(b.right, native)?;
        self.emit_native_op(b.op, native, b.span)
    }

    /// Apply `op` to the two native operands on the stack.
    pub(crate) fn emit_native_op(&mut self, op: BinaryOp, native: NativeType, span: Span) -> Result<()> {
        if native == NativeType::F64 {
            match op {
                BinaryOp::Add => self.emit("f64.add"),
                BinaryOp::Sub => self.emit("f64.sub"),
                BinaryOp::Mult => self.emit("f64.mul"),
                BinaryOp::Div => self.rt("f64_div", span)?,
                BinaryOp::FloorDiv => self.rt("f64_floordiv", span)?,
                BinaryOp::Mod => self.rt("f64_mod", span)?,
                _ => {
                    return Err(CompileError::internal(
                        format!("no float lowering for '{}'", op.as_str()),
                        span,
                    ));
                }
            }
            return Ok(());
        }
        match op {
            BinaryOp::Add => self.emit("i64.add"),
            BinaryOp::Sub => self.emit("i64.sub"),
            BinaryOp::Mult => self.emit("i64.mul"),
            BinaryOp::FloorDiv => self.rt("i64_floordiv", span)?,
            BinaryOp::Mod => self.rt("i64_mod", span)?,
            BinaryOp::LShift => self.rt("i64_shl", span)?,
            BinaryOp::RShift => self.rt("i64_shr", span)?,
            BinaryOp::BitAnd => self.emit("i64.and"),
            BinaryOp::BitOr => self.emit("i64.or"),
            BinaryOp::BitXor => self.emit("i64.xor"),
            _ => {
                return Err(CompileError::internal(
                    format!("no integer lowering for '{}'", op.as_str()),
                    span,
                ));
            }
        }
        Ok(())
    }

    // ==========================================================================
    // Comparisons
    // ==========================================================================

    /// Compile a comparison chain to an `i32`.
    pub(crate) fn compile_compare(&mut self, c: &'ast CompareExpr<'ast>) -> Result<()> {
        if c.ops.len() != c.comparators.len() || c.ops.is_empty() {
            return Err(CompileError::internal("malformed comparison", c.span));
        }
        if c.ops.len() == 1 {
            return self.compile_compare_pair(c.left, c.ops[0], c.comparators[0], c.span);
        }

        let done = self.label("cmp");
        self.emitter.block(&done, Some("i32"));
        let mut prev = self.temp(LocalType::Any);
        self.compile_expr(c.left)?;
        self.emit(format!("local.set {prev}"));
        let last = c.ops.len() - 1;
        for (i, (op, right)) in c.ops.iter().zip(c.comparators).enumerate() {
            let cur = self.temp(LocalType::Any);
            self.compile_expr(*right)?;
            self.emit(format!("local.set {cur}"));
            self.emit_boxed_compare(&prev, *op, &cur, c.span)?;
            if i != last {
                self.emit("i32.eqz");
                self.emitter.if_(None);
                self.emit("i32.const 0");
                self.emit(format!("br {done}"));
                self.emitter.end();
            }
            prev = cur;
        }
        self.emitter.end();
        Ok(())
    }

    fn compile_compare_pair(&mut self, left: Expr<'ast>, op: CmpOp, right: Expr<'ast>, span: Span) -> Result<()> {
        if let Some(float) = self.native_compare_mode(left, op, right) {
            let native = if float { NativeType::F64 } else { NativeType::I64 };
            self.compile_native(left, native)?;
            self.compile_native(right, native)?;
            let prefix = if float { "f64" } else { "i64" };
            let suffix = match (op, float) {
                (CmpOp::Eq, _) => "eq",
                (CmpOp::NotEq, _) => "ne",
                (CmpOp::Lt, true) => "lt",
                (CmpOp::LtE, true) => "le",
                (CmpOp::Gt, true) => "gt",
                (CmpOp::GtE, true) => "ge",
                (CmpOp::Lt, false) => "lt_s",
                (CmpOp::LtE, false) => "le_s",
                (CmpOp::Gt, false) => "gt_s",
                (CmpOp::GtE, false) => "ge_s",
                _ => return Err(CompileError::internal("non-numeric native comparison", span)),
            };
            self.emit(format!("{prefix}.{suffix}"));
            return Ok(());
        }

        let is_none = |e: Expr<'_>| matches!(e, Expr::Constant(ConstantExpr { value: Constant::None, .. }));
        if matches!(op, CmpOp::Is | CmpOp::IsNot) && (is_none(left) || is_none(right)) {
            let other = if is_none(right) { left } else { right };
            self.compile_expr(other)?;
            self.emit("ref.is_null");
            if op == CmpOp::IsNot {
                self.emit("i32.eqz");
            }
            return Ok(());
        }

        self.compile_expr(left)?;
        self.compile_expr(right)?;
        self.emit_boxed_compare_stack(op, span)
    }

    /// `Some(is_float)` when both operands are numbers and at least one is
    /// stored natively.
    fn native_compare_mode(&self, left: Expr<'ast>, op: CmpOp, right: Expr<'ast>) -> Option<bool> {
        if !matches!(op, CmpOp::Eq | CmpOp::NotEq) && !op.is_ordering() {
            return None;
        }
        let l_native = self.native_type_of(left);
        let r_native = self.native_type_of(right);
        if l_native.is_none() && r_native.is_none() {
            return None;
        }
        let lt = self.inferred(left);
        let rt = self.inferred(right);
        let numeric = |t: &InferredType, e: Expr<'ast>| {
            t.is_numeric() || matches!(e, Expr::Constant(ConstantExpr { value: Constant::Int(_) | Constant::Float(_), .. }))
        };
        if !numeric(&lt, left) || !numeric(&rt, right) {
            return None;
        }
        let is_float = |t: &InferredType, n: Option<NativeType>| {
            n == Some(NativeType::F64) || matches!(t, InferredType::Float)
        };
        Some(is_float(&lt, l_native) || is_float(&rt, r_native))
    }

    fn emit_boxed_compare(&mut self, left: &str, op: CmpOp, right: &str, span: Span) -> Result<()> {
        self.emit(format!("local.get {left}"));
        self.emit(format!("local.get {right}"));
        self.emit_boxed_compare_stack(op, span)
    }

    /// Compare the two boxed values on the stack.
    fn emit_boxed_compare_stack(&mut self, op: CmpOp, span: Span) -> Result<()> {
        match op {
            CmpOp::Eq => self.rt("values_equal", span)?,
            CmpOp::NotEq => {
                self.rt("values_equal", span)?;
                self.emit("i32.eqz");
            }
            CmpOp::Lt => self.rt("compare_lt", span)?,
            CmpOp::LtE => self.rt("compare_le", span)?,
            CmpOp::Gt => self.rt("compare_gt", span)?,
            CmpOp::GtE => self.rt("compare_ge", span)?,
            CmpOp::Is => self.emit("ref.eq"),
            CmpOp::IsNot => {
                self.emit("ref.eq");
                self.emit("i32.eqz");
            }
            CmpOp::In => self.rt("contains", span)?,
            CmpOp::NotIn => {
                self.rt("contains", span)?;
                self.emit("i32.eqz");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::compile_function_text;
    use bumpalo::Bump;
    use pyrite_ast::*;
    use pyrite_core::{BinaryOp, CmpOp};

    #[test]
    fn chained_comparison_short_circuits() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let chain = b.compare(b.name("a"), &[CmpOp::Lt, CmpOp::Lt], &[b.name("b"), b.name("c")]);
        let def = b.func("between", &["a", "b", "c"], &[b.ret(Some(chain))]);
        let text = compile_function_text(&b, def, "between");
        assert_eq!(text.matches("call $compare_lt").count(), 2);
        assert!(text.contains("block $cmp_"));
        assert!(text.contains("br $cmp_"));
    }

    #[test]
    fn membership_passes_item_first() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let test = b.cmp(b.name("k"), CmpOp::NotIn, b.name("d"));
        let def = b.func("missing", &["k", "d"], &[b.ret(Some(test))]);
        let text = compile_function_text(&b, def, "missing");
        let k = text.find("local.get $v_k").unwrap();
        let d = text.find("local.get $v_d").unwrap();
        assert!(k < d);
        assert!(text.contains("call $contains\n"));
        assert!(text.contains("i32.eqz"));
    }

    #[test]
    fn is_none_tests_null() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func("empty", &["x"], &[b.ret(Some(b.cmp(b.name("x"), CmpOp::Is, b.none())))]);
        let text = compile_function_text(&b, def, "empty");
        assert!(text.contains("ref.is_null"));
    }

    #[test]
    fn string_concatenation_is_specialized() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func("greet", &[], &[b.ret(Some(b.bin(b.str("a"), BinaryOp::Add, b.str("b"))))]);
        let text = compile_function_text(&b, def, "greet");
        assert!(text.contains("call $string_concat"));
    }
}
