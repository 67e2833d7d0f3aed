//! Assignment statements and assignment targets.

use pyrite_ast::*;
use pyrite_core::{BinaryOp, CompileError, NativeType, Result, Span};

use crate::function_compiler::FunctionCompiler;
use crate::scope::LocalType;

/// Whether `op` has a native lowering for `native` operands.
fn has_native_lowering(op: BinaryOp, native: NativeType) -> bool {
    match native {
        NativeType::F64 => matches!(
            op,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mult | BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod
        ),
        NativeType::I32 | NativeType::I64 => !matches!(op, BinaryOp::Div | BinaryOp::Pow | BinaryOp::MatMult),
    }
}

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    pub(crate) fn compile_assign(&mut self, a: &'ast AssignStmt<'ast>) -> Result<()> {
        if let [target] = a.targets {
            return self.compile_single_assign(*target, a.value, a.span);
        }
        let value = self.temp(LocalType::Any);
        self.compile_expr(a.value)?;
        self.emit(format!("local.set {value}"));
        for target in a.targets {
            self.store_target(*target, &value, a.span)?;
        }
        Ok(())
    }

    /// `target = value`.
    pub(crate) fn compile_single_assign(&mut self, target: Expr<'ast>, value: Expr<'ast>, span: Span) -> Result<()> {
        match target {
            Expr::Name(n) => {
                if let Some((wat, native)) = self.native_binding(n.id) {
                    if self.fits_native(value, native) {
                        let want = if native.is_int() { NativeType::I64 } else { NativeType::F64 };
                        self.compile_native(value, want)?;
                        self.store_native_binding(&wat, native);
                        return Ok(());
                    }
                }
                self.compile_expr(value)?;
                self.store_name(n.id, n.span)
            }
            Expr::Tuple(t) | Expr::List(t) => match value {
                Expr::Tuple(v) | Expr::List(v)
                    if v.elts.len() == t.elts.len()
                        && !t.elts.iter().chain(v.elts).any(|e| matches!(e, Expr::Starred(_))) =>
                {
                    // Parallel assignment: every value is read before any
                    // target is written.
                    let mut temps = Vec::with_capacity(v.elts.len());
                    for elt in v.elts {
                        let tmp = self.temp(LocalType::Any);
                        self.compile_expr(*elt)?;
                        self.emit(format!("local.set {tmp}"));
                        temps.push(tmp);
                    }
                    for (elt, tmp) in t.elts.iter().zip(&temps) {
                        self.store_target(*elt, tmp, span)?;
                    }
                    Ok(())
                }
                _ => self.assign_through_temp(target, value, span),
            },
            _ => self.assign_through_temp(target, value, span),
        }
    }

    fn assign_through_temp(&mut self, target: Expr<'ast>, value: Expr<'ast>, span: Span) -> Result<()> {
        let tmp = self.temp(LocalType::Any);
        self.compile_expr(value)?;
        self.emit(format!("local.set {tmp}"));
        self.store_target(target, &tmp, span)
    }

    /// Whether `value` can be computed natively for a `native` local.
    fn fits_native(&self, value: Expr<'ast>, native: NativeType) -> bool {
        let have = match value {
            Expr::Constant(c) => match c.value {
                Constant::Int(_) | Constant::Bool(_) => Some(NativeType::I64),
                Constant::Float(_) => Some(NativeType::F64),
                _ => None,
            },
            other => self.native_type_of(other),
        };
        match have {
            Some(have) => !native.is_int() || have.is_int(),
            None => false,
        }
    }

    /// Store the boxed value held in local `value` into an assignment target.
    pub(crate) fn store_target(&mut self, target: Expr<'ast>, value: &str, span: Span) -> Result<()> {
        match target {
            Expr::Name(n) => {
                self.emit(format!("local.get {value}"));
                self.store_name(n.id, n.span)
            }
            Expr::Attribute(a) => self.store_attribute(a.value, a.attr, value, a.span),
            Expr::Subscript(s) => self.store_subscript(s, value),
            Expr::Tuple(t) | Expr::List(t) => self.store_unpacked(t.elts, value, t.span),
            Expr::Starred(s) => Err(CompileError::unsupported(
                "starred assignment target must be in a list or tuple",
                s.span,
            )),
            other => Err(CompileError::unsupported(
                format!("cannot assign to {}", other.kind_name()),
                span,
            )),
        }
    }

    /// `a, *b, c = value`.
    fn store_unpacked(&mut self, elts: &'ast [Expr<'ast>], value: &str, span: Span) -> Result<()> {
        let mut stars = elts
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, Expr::Starred(_)))
            .map(|(i, _)| i);
        let star = stars.next();
        if stars.next().is_some() {
            return Err(CompileError::unsupported(
                "multiple starred expressions in assignment",
                span,
            ));
        }

        let parts = self.named_temp("parts", LocalType::Array);
        self.emit(format!("local.get {value}"));
        self.emit(format!("i32.const {}", elts.len()));
        match star {
            Some(k) => {
                self.emit(format!("i32.const {k}"));
                self.rt("unpack_sequence_star", span)?;
            }
            None => self.rt("unpack_sequence", span)?,
        }
        self.emit("ref.cast (ref $TUPLE)");
        self.emit("struct.get $TUPLE $data");
        self.emit(format!("local.set {parts}"));

        for (i, elt) in elts.iter().enumerate() {
            let item = self.temp(LocalType::Any);
            self.emit(format!("local.get {parts}"));
            self.emit(format!("i32.const {i}"));
            self.emit("array.get $ARRAY_ANY");
            self.emit(format!("local.set {item}"));
            let target = match elt {
                Expr::Starred(s) => s.value,
                other => *other,
            };
            self.store_target(target, &item, span)?;
        }
        Ok(())
    }

    // ==========================================================================
    // Augmented Assignment
    // ==========================================================================

    pub(crate) fn compile_aug_assign(&mut self, a: &'ast AugAssignStmt<'ast>) -> Result<()> {
        match a.target {
            Expr::Name(n) => {
                if let Some((wat, native)) = self.native_binding(n.id) {
                    let want = if native.is_int() { NativeType::I64 } else { NativeType::F64 };
                    if has_native_lowering(a.op, want) && self.fits_native(a.value, native) {
                        self.load_native_binding(&wat, native);
                        self.compile_native(a.value, want)?;
                        self.emit_native_op(a.op, want, a.span)?;
                        self.store_native_binding(&wat, native);
                        return Ok(());
                    }
                }
                self.load_name(n.id, n.span)?;
                self.compile_expr(a.value)?;
                self.emit_inplace_op(a.op, a.span)?;
                self.store_name(n.id, n.span)
            }
            Expr::Attribute(attr) => {
                let object = self.temp(LocalType::Any);
                let result = self.temp(LocalType::Any);
                self.compile_expr(attr.value)?;
                self.emit(format!("local.tee {object}"));
                self.emit_getattr(attr.attr, attr.span)?;
                self.compile_expr(a.value)?;
                self.emit_inplace_op(a.op, a.span)?;
                self.emit(format!("local.set {result}"));
                self.emit(format!("local.get {object}"));
                self.push_str(attr.attr);
                self.emit(format!("local.get {result}"));
                if self.ctx.classes.slotted_count() > 0 {
                    self.emit("call $slotted_setattr");
                    Ok(())
                } else {
                    self.rt("object_setattr", a.span)
                }
            }
            Expr::Subscript(s) => self.compile_subscript_aug(s, a.op, a.value, a.span),
            other => Err(CompileError::unsupported(
                format!("illegal target for augmented assignment: {}", other.kind_name()),
                a.span,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::compile_function_text;
    use bumpalo::Bump;
    use pyrite_ast::*;
    use pyrite_core::BinaryOp;

    #[test]
    fn swap_reads_both_values_first() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "swap",
            &["a", "b"],
            &[
                b.assign(
                    b.tuple(&[b.name("a"), b.name("b")]),
                    b.tuple(&[b.name("b"), b.name("a")]),
                ),
                b.ret(Some(b.tuple(&[b.name("a"), b.name("b")]))),
            ],
        );
        let text = compile_function_text(&b, def, "swap");
        assert!(!text.contains("unpack_sequence"));
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        let write_a = lines.iter().rposition(|l| *l == "local.set $v_a").unwrap();
        let read_a = lines.iter().position(|l| *l == "local.get $v_a").unwrap();
        let read_b = lines.iter().position(|l| *l == "local.get $v_b").unwrap();
        assert!(read_a < write_a);
        assert!(read_b < write_a);
    }

    #[test]
    fn starred_target_unpacks_with_rest() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "split",
            &["xs"],
            &[
                b.assign(
                    b.tuple(&[b.name("head"), b.starred(b.name("rest"))]),
                    b.name("xs"),
                ),
                b.ret(Some(b.name("rest"))),
            ],
        );
        let text = compile_function_text(&b, def, "split");
        assert!(text.contains("call $unpack_sequence_star"));
        assert!(text.contains("struct.get $TUPLE $data"));
    }

    #[test]
    fn chained_assignment_evaluates_once() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "both",
            &["f"],
            &[
                b.assign_multi(&[b.name("x"), b.name("y")], b.call(b.name("f"), &[])),
                b.ret(Some(b.tuple(&[b.name("x"), b.name("y")]))),
            ],
        );
        let text = compile_function_text(&b, def, "both");
        assert_eq!(text.matches("call_indirect").count(), 1);
    }

    #[test]
    fn native_counter_increments_in_place() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "count",
            &[],
            &[
                b.assign_name("n", b.int(0)),
                b.aug_assign(b.name("n"), BinaryOp::Add, b.int(1)),
                b.ret(Some(b.bin(b.name("n"), BinaryOp::Mult, b.int(2)))),
            ],
        );
        let text = compile_function_text(&b, def, "count");
        assert!(text.contains("i64.add"));
        assert!(!text.contains("call $inplace_add"));
    }

    #[test]
    fn attribute_augmented_assignment_reads_object_once() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "bump",
            &["f"],
            &[b.aug_assign(
                b.attr(b.call(b.name("f"), &[]), "hits"),
                BinaryOp::Add,
                b.int(1),
            )],
        );
        let text = compile_function_text(&b, def, "bump");
        assert_eq!(text.matches("call_indirect").count(), 1);
        assert!(text.contains("call $object_getattr"));
        assert!(text.contains("call $object_setattr"));
    }
}
