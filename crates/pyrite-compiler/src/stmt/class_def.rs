//! `class` statements.
//!
//! The class object is created first and the body then runs inline in the
//! defining function, with names the body binds routed to class attributes.
//! Slotted classes also get an allocator function, stored as `__alloc__`,
//! that the runtime calls with the class to create an empty record.

use pyrite_ast::*;
use pyrite_core::{CompileError, Result};

use crate::context::{CompiledFunction, FunctionFlags};
use crate::function_compiler::{ClassBody, FunctionCompiler, uniform_header};
use crate::scope::LocalType;

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub(crate) fn compile_class_def(&mut self, c: &'ast ClassDef<'ast>) -> Result<()> {
        if c.bases.len() > 1 {
            return Err(CompileError::unsupported("multiple inheritance", c.span));
        }
        if let Some(keyword) = c.keywords.first() {
            return Err(CompileError::unsupported(
                format!("class keyword '{}'", keyword.arg.unwrap_or("**")),
                c.span,
            ));
        }
        tracing::debug!(class = c.name, "compiling class");

        let cls = self.named_temp("cls", LocalType::Class);
        self.push_str(c.name);
        match c.bases.first() {
            Some(base) => self.compile_expr(*base)?,
            None => self.push_none(),
        }
        self.rt("make_class", c.span)?;
        self.emit(format!("local.set {cls}"));

        let tree = self.ctx.tree;
        self.class_bodies.push(ClassBody {
            name: c.name,
            cls: cls.clone(),
            attrs: tree.class_attrs(c),
            bound: Vec::new(),
        });
        let outcome = self.compile_body(c.body);
        self.class_bodies.pop();
        outcome?;

        if self.scope_id == 0 {
            self.emit_slot_allocator(c.name, &cls, c.span)?;
            if self.ctx.classes.is_exception(c.name) {
                self.push_str(c.name);
                self.emit(format!("local.get {cls}"));
                self.rt("register_exception_class", c.span)?;
            }
        }

        let value = self.temp(LocalType::Any);
        self.emit(format!("local.get {cls}"));
        self.emit(format!("local.set {value}"));
        self.apply_class_decorators(c, &value)?;
        self.emit(format!("local.get {value}"));
        self.store_name(c.name, c.span)
    }

    /// Define and attach the allocator of a slotted class.
    fn emit_slot_allocator(&mut self, name: &str, cls: &str, span: pyrite_core::Span) -> Result<()> {
        let Some(layout) = self.ctx.classes.layout(name).cloned() else {
            return Ok(());
        };
        let index = self.ctx.reserve_function();
        let mut alloc = FunctionCompiler::new(
            &mut *self.ctx,
            0,
            index,
            format!("{name}.__alloc__"),
            FunctionFlags::SLOT_ALLOC,
        );
        alloc.emit("local.get $args");
        alloc.emit("ref.cast (ref $PAIR)");
        alloc.emit("struct.get $PAIR $car");
        alloc.emit("ref.cast (ref $CLASS)");
        for _ in &layout.slots {
            alloc.push_none();
        }
        alloc.emit(format!("struct.new ${}", layout.type_name));
        let (text, instructions) = alloc.finish_text(&uniform_header(index));
        self.ctx.define_function(CompiledFunction {
            index,
            name: format!("{name}.__alloc__"),
            text,
            flags: FunctionFlags::SLOT_ALLOC,
            instructions,
        });

        let slot = self.ctx.table_index(index);
        self.emit(format!("local.get {cls}"));
        self.emit("ref.as_non_null");
        self.push_str("__alloc__");
        self.emit("ref.null $ENV");
        self.emit(format!("i32.const {slot}"));
        self.emit("struct.new $CLOSURE");
        self.rt("class_set_attr", span)
    }

    fn apply_class_decorators(&mut self, c: &'ast ClassDef<'ast>, value: &str) -> Result<()> {
        for decorator in c.decorators.iter().rev() {
            let func = self.temp(LocalType::Any);
            let args = self.temp(LocalType::Any);
            self.compile_expr(*decorator)?;
            self.emit(format!("local.set {func}"));
            self.emit(format!("local.get {value}"));
            self.push_chain(1);
            self.emit(format!("local.set {args}"));
            self.emit_dynamic_call(&func, &args, c.span)?;
            self.emit(format!("local.set {value}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{compile_module_text, try_compile_module};
    use bumpalo::Bump;
    use pyrite_ast::*;

    #[test]
    fn class_body_binds_attributes() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let class = b.class(
            "Config",
            &[],
            &[
                b.assign_name("limit", b.int(3)),
                b.assign_name("double", b.bin(b.name("limit"), pyrite_core::BinaryOp::Mult, b.int(2))),
            ],
        );
        let text = compile_module_text(&b, b.module(&[class]));
        assert!(text.contains("call $make_class"));
        assert_eq!(text.matches("call $class_set_attr").count(), 2);
        assert!(text.contains("call $class_get_attr"));
    }

    #[test]
    fn slotted_class_gets_allocator() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let class = b.class(
            "Pair",
            &[],
            &[b.assign_name("__slots__", b.tuple(&[b.str("a"), b.str("b")]))],
        );
        let text = compile_module_text(&b, b.module(&[class]));
        assert!(text.contains("struct.new $SLOTTED_Pair"));
        assert!(text.contains(";; Pair.__alloc__"));
    }

    #[test]
    fn exception_subclass_is_registered() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let class = b.class("ParseError", &[b.name("ValueError")], &[b.pass()]);
        let text = compile_module_text(&b, b.module(&[class]));
        assert!(text.contains("call $register_exception_class"));
    }

    #[test]
    fn multiple_bases_are_rejected() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let class = b.class("Both", &[b.name("int"), b.name("str")], &[b.pass()]);
        assert!(try_compile_module(&b, b.module(&[class])).is_err());
    }
}
