//! f-strings.
//!
//! Each part is turned into a string and the parts are folded left to right
//! with `string_concat`. A native float field without conversion or spec is
//! rendered by the host `format_float` straight into the heap.

use pyrite_ast::*;
use pyrite_core::{NativeType, Result, Span};

use crate::function_compiler::FunctionCompiler;
use crate::scope::LocalType;

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    pub(crate) fn compile_fstring(&mut self, j: &'ast JoinedStrExpr<'ast>) -> Result<()> {
        self.compile_fstring_parts(j.values, j.span)
    }

    /// Push the concatenation of `parts` as one string.
    fn compile_fstring_parts(&mut self, parts: &'ast [FStringPart<'ast>], span: Span) -> Result<()> {
        let mut pushed = 0usize;
        for part in parts {
            match part {
                FStringPart::Literal(text) if text.is_empty() => continue,
                FStringPart::Literal(text) => self.push_str(text),
                FStringPart::Formatted(field) => self.compile_formatted(field, span)?,
            }
            pushed += 1;
            if pushed > 1 {
                self.rt("string_concat", span)?;
            }
        }
        if pushed == 0 {
            self.push_str("");
        }
        Ok(())
    }

    fn compile_formatted(&mut self, field: &FormattedValue<'ast>, span: Span) -> Result<()> {
        if field.conversion == Conversion::None
            && field.format_spec.is_none()
            && self.native_type_of(field.value) == Some(NativeType::F64)
        {
            return self.compile_native_float_text(field.value);
        }

        self.compile_expr(field.value)?;
        match field.conversion {
            Conversion::Str => self.rt("to_str", span)?,
            Conversion::Repr => self.rt("repr", span)?,
            Conversion::Ascii => self.rt("ascii", span)?,
            Conversion::None => {}
        }
        match field.format_spec {
            Some(spec) => {
                self.compile_fstring_parts(spec, span)?;
                self.rt("format_value", span)
            }
            None if field.conversion == Conversion::None => self.rt("to_str", span),
            None => Ok(()),
        }
    }

    fn compile_native_float_text(&mut self, value: Expr<'ast>) -> Result<()> {
        let offset = self.temp(LocalType::I32);
        let len = self.temp(LocalType::I32);
        self.compile_native(value, NativeType::F64)?;
        self.emit("global.get $heap_ptr");
        self.emit(format!("local.tee {offset}"));
        self.emit("call $format_float");
        self.emit(format!("local.set {len}"));
        self.emit(format!("local.get {offset}"));
        self.emit(format!("local.get {len}"));
        self.emit("i32.add");
        self.emit("global.set $heap_ptr");
        self.emit(format!("local.get {offset}"));
        self.emit(format!("local.get {len}"));
        self.emit("struct.new $STRING");
        Ok(())
    }
}
