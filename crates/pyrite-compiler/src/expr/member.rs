//! Attribute access.
//!
//! Reads and writes of `self.x` inside methods of a slotted class, and of
//! names narrowed by an enclosing `isinstance(obj, C)` test, go straight to
//! the record field behind a `ref.test` guard. Everything else goes through
//! the generated `$slotted_getattr`/`$slotted_setattr` dispatchers when the
//! module has slotted classes, and through the runtime object protocol
//! otherwise.

use pyrite_ast::*;
use pyrite_core::{Result, Span};

use crate::function_compiler::FunctionCompiler;
use crate::layout::SlotLayout;
use crate::scope::LocalType;

/// A statically resolved slot: record type and field name.
struct SlotAccess {
    ty: String,
    field: String,
}

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    pub(crate) fn compile_attribute(&mut self, attr: &'ast AttributeExpr<'ast>) -> Result<()> {
        let Some(slot) = self.slot_access(attr.value, attr.attr) else {
            self.compile_expr(attr.value)?;
            return self.emit_getattr(attr.attr, attr.span);
        };
        let obj = self.temp(LocalType::Any);
        self.compile_expr(attr.value)?;
        self.emit(format!("local.tee {obj}"));
        self.emit(format!("ref.test (ref ${})", slot.ty));
        self.emitter.if_(Some("(ref null eq)"));
        self.emit(format!("local.get {obj}"));
        self.emit(format!("ref.cast (ref ${})", slot.ty));
        self.emit(format!("struct.get ${} {}", slot.ty, slot.field));
        self.emitter.else_();
        self.emit(format!("local.get {obj}"));
        self.emit_getattr(attr.attr, attr.span)?;
        self.emitter.end();
        Ok(())
    }

    /// `obj.name = <value in value_local>`.
    pub(crate) fn store_attribute(&mut self, object: Expr<'ast>, name: &str, value: &str, span: Span) -> Result<()> {
        if let Some(slot) = self.slot_access(object, name) {
            let obj = self.temp(LocalType::Any);
            self.compile_expr(object)?;
            self.emit(format!("local.tee {obj}"));
            self.emit(format!("ref.test (ref ${})", slot.ty));
            self.emitter.if_(None);
            self.emit(format!("local.get {obj}"));
            self.emit(format!("ref.cast (ref ${})", slot.ty));
            self.emit(format!("local.get {value}"));
            self.emit(format!("struct.set ${} {}", slot.ty, slot.field));
            self.emitter.else_();
            self.emit(format!("local.get {obj}"));
            self.push_str(name);
            self.emit(format!("local.get {value}"));
            self.emit_setattr(span)?;
            self.emitter.end();
            return Ok(());
        }
        if self.ctx.host.enabled() {
            return self.compile_host_setattr(object, name, value, span);
        }
        self.compile_expr(object)?;
        self.push_str(name);
        self.emit(format!("local.get {value}"));
        self.emit_setattr(span)
    }

    pub(crate) fn delete_attribute(&mut self, attr: &'ast AttributeExpr<'ast>) -> Result<()> {
        self.compile_expr(attr.value)?;
        self.push_str(attr.attr);
        self.rt("object_delattr", attr.span)
    }

    /// Read attribute `name` of the object on the stack.
    pub(crate) fn emit_getattr(&mut self, name: &str, span: Span) -> Result<()> {
        self.push_str(name);
        if self.ctx.classes.slotted_count() > 0 {
            self.emit("call $slotted_getattr");
            Ok(())
        } else {
            self.rt("object_getattr", span)
        }
    }

    /// Store with `(obj, name, value)` on the stack.
    fn emit_setattr(&mut self, span: Span) -> Result<()> {
        if self.ctx.classes.slotted_count() > 0 {
            self.emit("call $slotted_setattr");
            Ok(())
        } else {
            self.rt("object_setattr", span)
        }
    }

    fn slot_access(&self, object: Expr<'ast>, attr: &str) -> Option<SlotAccess> {
        if !self.ctx.config.slotted_layouts {
            return None;
        }
        let Expr::Name(n) = object else {
            return None;
        };
        let narrowed = self
            .narrowed
            .iter()
            .rev()
            .find(|(var, _)| *var == n.id)
            .map(|(_, class)| *class);
        let class = match narrowed {
            Some(class) => class,
            None if self.self_param == Some(n.id) => self.class_name?,
            None => return None,
        };
        let layout = self.ctx.classes.layout(class)?;
        layout.field_of(attr)?;
        Some(SlotAccess {
            ty: layout.type_name.clone(),
            field: SlotLayout::field_name(attr),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::compile_module_text;
    use bumpalo::Bump;
    use pyrite_ast::*;

    fn point_module<'ast>(b: &AstBuilder<'ast>) -> Module<'ast> {
        let init = b.func(
            "__init__",
            &["self", "x"],
            &[b.assign(b.attr(b.name("self"), "x"), b.name("x"))],
        );
        let get = b.func("get", &["self"], &[b.ret(Some(b.attr(b.name("self"), "x")))]);
        let class = b.class(
            "Point",
            &[],
            &[b.assign_name("__slots__", b.tuple(&[b.str("x")])), init, get],
        );
        let read = b.func("read", &["p"], &[b.ret(Some(b.attr(b.name("p"), "x")))]);
        b.module(&[class, read])
    }

    #[test]
    fn self_access_in_slotted_method_is_guarded_field() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let text = compile_module_text(&b, point_module(&b));
        assert!(text.contains("ref.test (ref $SLOTTED_Point)"));
        assert!(text.contains("struct.set $SLOTTED_Point $s_x"));
        assert!(text.contains("struct.get $SLOTTED_Point $s_x"));
    }

    #[test]
    fn other_receivers_use_dispatcher() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let text = compile_module_text(&b, point_module(&b));
        assert!(text.contains("call $slotted_getattr"));
        assert!(text.contains("(func $slotted_getattr"));
    }
}
