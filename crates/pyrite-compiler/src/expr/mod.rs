//! Expression lowering.
//!
//! Every expression can be compiled in three ways:
//!
//! - [`compile_expr`](FunctionCompiler::compile_expr) leaves a boxed
//!   `(ref null eq)` value on the stack.
//! - [`compile_condition`](FunctionCompiler::compile_condition) leaves an
//!   `i32` truth value, skipping the box for comparisons and logic.
//! - [`compile_native`](FunctionCompiler::compile_native) leaves an unboxed
//!   `i64` or `f64`, for expressions whose inferred type is native.
//!
//! Operator, call, member, subscript, collection and f-string lowering live
//! in the submodules.

mod binary;
mod calls;
mod collections;
mod fstring;
mod member;
mod subscript;

use pyrite_ast::*;
use pyrite_core::{BoolOp, CompileError, InferredType, NativeType, Result, UnaryOp};

use crate::function_compiler::{FunctionCompiler, NameSlot};
use crate::scope::{LocalType, Storage};

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    /// Compile an expression to a boxed value.
    pub(crate) fn compile_expr(&mut self, expr: Expr<'ast>) -> Result<()> {
        if let Some(native) = self.native_type_of(expr) {
            if !matches!(expr, Expr::Name(_) | Expr::Constant(_)) {
                self.compile_native_value(expr, native)?;
                return self.box_native(native, expr.span());
            }
        }
        match expr {
            Expr::Constant(c) => self.push_constant(&c.value, c.span),
            Expr::Name(n) => self.load_name(n.id, n.span),
            Expr::BoolOp(b) => self.compile_bool_op(b.op, b.values, b.span),
            Expr::NamedExpr(n) => {
                let tmp = self.temp(LocalType::Any);
                self.compile_expr(n.value)?;
                self.emit(format!("local.tee {tmp}"));
                self.store_name_scoped(n.target, n.span)?;
                self.emit(format!("local.get {tmp}"));
                Ok(())
            }
            Expr::BinOp(b) => self.compile_binop(b),
            Expr::UnaryOp(u) => self.compile_unary(u),
            Expr::Lambda(l) => self.compile_lambda(l),
            Expr::IfExp(i) => {
                self.compile_condition(i.test)?;
                self.emitter.if_(Some("(ref null eq)"));
                self.compile_expr(i.body)?;
                self.emitter.else_();
                self.compile_expr(i.orelse)?;
                self.emitter.end();
                Ok(())
            }
            Expr::Dict(d) => self.compile_dict(d),
            Expr::Set(s) => self.compile_set(s),
            Expr::List(s) => self.compile_list(s),
            Expr::Tuple(s) => self.compile_tuple(s),
            Expr::ListComp(c) => self.compile_list_comp(c),
            Expr::SetComp(c) => self.compile_set_comp(c),
            Expr::GeneratorExp(c) => {
                tracing::debug!(
                    function = %self.name,
                    line = c.span.line,
                    "generator expression materialized as a list"
                );
                self.compile_list_comp(c)
            }
            Expr::DictComp(c) => self.compile_dict_comp(c),
            Expr::Yield(y) => self.compile_yield(y),
            Expr::YieldFrom(y) => self.compile_yield_from(y),
            Expr::Compare(c) => {
                self.compile_compare(c)?;
                self.box_condition();
                Ok(())
            }
            Expr::Call(call) => self.compile_call(call),
            Expr::JoinedStr(j) => self.compile_fstring(j),
            Expr::Attribute(a) => self.compile_attribute(a),
            Expr::Subscript(s) => self.compile_subscript(s),
            Expr::Let(l) => {
                self.compile_let_bindings(l)?;
                self.compile_expr(l.body)
            }
            Expr::Starred(s) => Err(CompileError::unsupported(
                "starred expression outside a call or display",
                s.span,
            )),
            Expr::Slice(s) => Err(CompileError::unsupported("slice outside a subscript", s.span)),
        }
    }

    /// Compile an expression and discard its value.
    pub(crate) fn compile_discard(&mut self, expr: Expr<'ast>) -> Result<()> {
        if let Some(native) = self.native_type_of(expr) {
            self.compile_native_value(expr, native)?;
        } else {
            self.compile_expr(expr)?;
        }
        self.emit("drop");
        Ok(())
    }

    fn compile_let_bindings(&mut self, l: &'ast LetExpr<'ast>) -> Result<()> {
        for binding in l.bindings {
            let target = self.native_binding(binding.name);
            match (target, self.native_type_of(binding.value)) {
                (Some((wat, native)), Some(value)) if native.is_int() == value.is_int() => {
                    self.compile_native(binding.value, native)?;
                    self.store_native_binding(&wat, native);
                }
                _ => {
                    self.compile_expr(binding.value)?;
                    self.store_name(binding.name, l.span)?;
                }
            }
        }
        Ok(())
    }

    // ==========================================================================
    // Logic
    // ==========================================================================

    /// `and`/`or` yielding the deciding operand.
    fn compile_bool_op(&mut self, op: BoolOp, values: &'ast [Expr<'ast>], span: pyrite_core::Span) -> Result<()> {
        let Some((first, rest)) = values.split_first() else {
            return Err(CompileError::internal("empty boolean operation", span));
        };
        if rest.is_empty() {
            return self.compile_expr(*first);
        }
        let tmp = self.temp(LocalType::Any);
        self.compile_expr(*first)?;
        self.emit(format!("local.tee {tmp}"));
        self.rt("is_truthy", span)?;
        self.emitter.if_(Some("(ref null eq)"));
        match op {
            BoolOp::And => {
                self.compile_bool_op(op, rest, span)?;
                self.emitter.else_();
                self.emit(format!("local.get {tmp}"));
            }
            BoolOp::Or => {
                self.emit(format!("local.get {tmp}"));
                self.emitter.else_();
                self.compile_bool_op(op, rest, span)?;
            }
        }
        self.emitter.end();
        Ok(())
    }

    /// Compile an expression to an `i32` truth value.
    pub(crate) fn compile_condition(&mut self, expr: Expr<'ast>) -> Result<()> {
        match expr {
            Expr::Constant(c) => match c.value {
                Constant::Bool(b) => {
                    self.emit(format!("i32.const {}", b as i32));
                    return Ok(());
                }
                Constant::None => {
                    self.emit("i32.const 0");
                    return Ok(());
                }
                Constant::Int(v) => {
                    self.emit(format!("i32.const {}", (v != 0) as i32));
                    return Ok(());
                }
                _ => {}
            },
            Expr::Compare(c) => return self.compile_compare(c),
            Expr::BoolOp(b) => return self.compile_bool_condition(b.op, b.values),
            Expr::UnaryOp(u) if u.op == UnaryOp::Not => {
                self.compile_condition(u.operand)?;
                self.emit("i32.eqz");
                return Ok(());
            }
            Expr::Call(call) => {
                if self.compile_call_condition(call)? {
                    return Ok(());
                }
            }
            _ => {}
        }
        match self.native_type_of(expr) {
            Some(NativeType::F64) => {
                self.compile_native_value(expr, NativeType::F64)?;
                self.emit("f64.const 0");
                self.emit("f64.ne");
            }
            Some(native) => {
                self.compile_native_value(expr, native)?;
                self.emit("i64.const 0");
                self.emit("i64.ne");
            }
            None => {
                self.compile_expr(expr)?;
                self.rt("is_truthy", expr.span())?;
            }
        }
        Ok(())
    }

    fn compile_bool_condition(&mut self, op: BoolOp, values: &'ast [Expr<'ast>]) -> Result<()> {
        let Some((first, rest)) = values.split_first() else {
            self.emit(format!("i32.const {}", (op == BoolOp::And) as i32));
            return Ok(());
        };
        self.compile_condition(*first)?;
        if rest.is_empty() {
            return Ok(());
        }
        self.emitter.if_(Some("i32"));
        match op {
            BoolOp::And => {
                self.compile_bool_condition(op, rest)?;
                self.emitter.else_();
                self.emit("i32.const 0");
            }
            BoolOp::Or => {
                self.emit("i32.const 1");
                self.emitter.else_();
                self.compile_bool_condition(op, rest)?;
            }
        }
        self.emitter.end();
        Ok(())
    }

    // ==========================================================================
    // Native Values
    // ==========================================================================

    /// The native type `expr` evaluates to, if it has a native lowering.
    pub(crate) fn native_type_of(&self, expr: Expr<'ast>) -> Option<NativeType> {
        if !self.ctx.config.native_locals || self.natives.is_empty() || !self.class_bodies.is_empty() {
            return None;
        }
        match expr {
            Expr::Name(n) => self.native_binding(n.id).map(|(_, native)| native),
            Expr::BinOp(_) | Expr::UnaryOp(_) | Expr::IfExp(_) => self.types.infer(expr).native(),
            _ => None,
        }
    }

    /// The native local `name` is stored in, as seen from here.
    pub(crate) fn native_binding(&self, name: &str) -> Option<(String, NativeType)> {
        if self.is_comprehension_target(name) {
            return None;
        }
        match self.binding(name) {
            Some(binding) => match binding.storage {
                Storage::Native(native) => Some((binding.wat.clone(), native)),
                _ => None,
            },
            None => None,
        }
    }

    /// Push `expr` as `f64` (for `want == F64`) or `i64` (otherwise),
    /// converting boxed and mismatched native operands.
    pub(crate) fn compile_native(&mut self, expr: Expr<'ast>, want: NativeType) -> Result<()> {
        let want_float = want == NativeType::F64;
        if let Some(have) = self.native_type_of(expr) {
            self.compile_native_value(expr, have)?;
            if want_float && have.is_int() {
                self.emit("f64.convert_i64_s");
            } else if !want_float && !have.is_int() {
                return Err(CompileError::internal(
                    "float value in integer native context",
                    expr.span(),
                ));
            }
            return Ok(());
        }
        if let Expr::Constant(c) = expr {
            match c.value {
                Constant::Int(v) if want_float => {
                    self.emit(format!("f64.const {}", crate::emit::format_f64(v as f64)));
                    return Ok(());
                }
                Constant::Int(v) => {
                    self.emit(format!("i64.const {v}"));
                    return Ok(());
                }
                Constant::Float(v) if want_float => {
                    self.emit(format!("f64.const {}", crate::emit::format_f64(v.0)));
                    return Ok(());
                }
                Constant::Bool(b) if !want_float => {
                    self.emit(format!("i64.const {}", b as i64));
                    return Ok(());
                }
                _ => {}
            }
        }
        self.compile_expr(expr)?;
        self.unbox(want, expr.span())
    }

    /// Push the native value of an expression whose native type is `native`
    /// (`i64` for both integer widths).
    pub(crate) fn compile_native_value(&mut self, expr: Expr<'ast>, native: NativeType) -> Result<()> {
        match expr {
            Expr::Name(n) => match self.native_binding(n.id) {
                Some((wat, stored)) => {
                    self.load_native_binding(&wat, stored);
                    if native == NativeType::F64 && stored.is_int() {
                        self.emit("f64.convert_i64_s");
                    }
                    Ok(())
                }
                None => {
                    self.load_name(n.id, n.span)?;
                    self.unbox(native, n.span)
                }
            },
            Expr::BinOp(b) => self.compile_native_binop(b, native),
            Expr::UnaryOp(u) => match (u.op, native) {
                (UnaryOp::USub, NativeType::F64) => {
                    self.compile_native(u.operand, native)?;
                    self.emit("f64.neg");
                    Ok(())
                }
                (UnaryOp::USub, _) => {
                    self.emit("i64.const 0");
                    self.compile_native(u.operand, native)?;
                    self.emit("i64.sub");
                    Ok(())
                }
                (UnaryOp::Invert, NativeType::I32 | NativeType::I64) => {
                    self.compile_native(u.operand, native)?;
                    self.emit("i64.const -1");
                    self.emit("i64.xor");
                    Ok(())
                }
                (UnaryOp::UAdd, _) => self.compile_native(u.operand, native),
                _ => {
                    self.compile_unary_boxed(u)?;
                    self.unbox(native, u.span)
                }
            },
            Expr::IfExp(i) => {
                self.compile_condition(i.test)?;
                self.emitter.if_(Some(if native == NativeType::F64 { "f64" } else { "i64" }));
                self.compile_native(i.body, native)?;
                self.emitter.else_();
                self.compile_native(i.orelse, native)?;
                self.emitter.end();
                Ok(())
            }
            _ => {
                self.compile_expr(expr)?;
                self.unbox(native, expr.span())
            }
        }
    }

    // ==========================================================================
    // Unary
    // ==========================================================================

    fn compile_unary(&mut self, u: &'ast UnaryOpExpr<'ast>) -> Result<()> {
        match u.op {
            UnaryOp::Not => {
                self.compile_condition(u.operand)?;
                self.emit("i32.eqz");
                self.box_condition();
                Ok(())
            }
            UnaryOp::USub => match u.operand {
                Expr::Constant(ConstantExpr {
                    value: Constant::Int(v),
                    ..
                }) if v != i64::MIN => self.push_int(-v, u.span),
                Expr::Constant(ConstantExpr {
                    value: Constant::Float(v),
                    ..
                }) => {
                    self.push_float(-v.0);
                    Ok(())
                }
                _ => self.compile_unary_boxed(u),
            },
            _ => self.compile_unary_boxed(u),
        }
    }

    fn compile_unary_boxed(&mut self, u: &'ast UnaryOpExpr<'ast>) -> Result<()> {
        if u.op == UnaryOp::Not {
            return self.compile_unary(u);
        }
        self.compile_expr(u.operand)?;
        let op = match u.op {
            UnaryOp::USub => "unary_neg",
            UnaryOp::UAdd => "unary_pos",
            _ => "unary_invert",
        };
        self.rt(op, u.span)
    }

    /// Whether `expr` is statically known to produce a `$LIST`.
    pub(crate) fn is_known_list(&self, expr: Expr<'ast>) -> bool {
        if let Expr::Name(n) = expr {
            let Ok(Some(NameSlot::Local(binding))) = self.resolve(n.id, n.span) else {
                return false;
            };
            if binding.storage == Storage::Cell {
                return false;
            }
        }
        matches!(self.types.infer(expr), InferredType::List(_))
    }

    pub(crate) fn inferred(&self, expr: Expr<'ast>) -> InferredType {
        self.types.infer(expr)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::compile_function_text;
    use bumpalo::Bump;
    use pyrite_ast::*;
    use pyrite_core::{BinaryOp, BoolOp, UnaryOp};

    #[test]
    fn annotated_float_arithmetic_stays_native() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let args = Arguments {
            args: b.slice(&[b.annotated_arg("x", "f64"), b.annotated_arg("y", "f64")]),
            ..Default::default()
        };
        let def = b.func_def(
            "hyp",
            args,
            &[b.ret(Some(b.bin(
                b.bin(b.name("x"), BinaryOp::Mult, b.name("x")),
                BinaryOp::Add,
                b.bin(b.name("y"), BinaryOp::Mult, b.name("y")),
            )))],
            &[],
        );
        let text = compile_function_text(&b, def, "hyp");
        assert!(text.contains("f64.mul"));
        assert!(text.contains("f64.add"));
        assert!(text.contains("struct.new $FLOAT"));
        assert!(!text.contains("call $binary_mul"));
    }

    #[test]
    fn untyped_arithmetic_goes_through_runtime() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func("add", &["a", "b"], &[b.ret(Some(b.bin(b.name("a"), BinaryOp::Add, b.name("b"))))]);
        let text = compile_function_text(&b, def, "add");
        assert!(text.contains("call $binary_add"));
    }

    #[test]
    fn or_returns_the_deciding_operand() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "pick",
            &["a", "b"],
            &[b.ret(Some(b.bool_op(BoolOp::Or, &[b.name("a"), b.name("b")])))],
        );
        let text = compile_function_text(&b, def, "pick");
        assert!(text.contains("call $is_truthy"));
        assert!(text.contains("if (result (ref null eq))"));
        assert!(!text.contains("global.get $TRUE"));
    }

    #[test]
    fn negative_literals_fold() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func("neg", &[], &[b.ret(Some(b.unary(UnaryOp::USub, b.int(5))))]);
        let text = compile_function_text(&b, def, "neg");
        assert!(text.contains("i32.const -5"));
        assert!(!text.contains("unary_neg"));
    }
}
