//! Host interop: `import js`.
//!
//! A module that imports `js` gets direct calls to the host's DOM, canvas and
//! console operations. Handles to host objects travel as `i31ref` values.
//! Strings are passed as `(offset, len)` into linear memory, numbers as
//! `f64`, and callbacks as an index into the module's `$js_callbacks` list,
//! which the exported `event_callback` consults.
//!
//! Two call shapes are lowered:
//!
//! ```text
//! js.fill_rect(ctx, 0, 0, 10, 10)    ; module function, first argument is the handle
//! ctx.fill_rect(0, 0, 10, 10)        ; method on a handle, guarded by ref.test (ref i31)
//! ```
//!
//! The method form falls back to the generic `call_method` when the receiver
//! is not a handle at run time, and attribute stores on handles become
//! `set_property`.

use pyrite_ast::*;
use pyrite_core::{CompileError, Result, Span};

use crate::function_compiler::FunctionCompiler;
use crate::scope::LocalType;

/// How a host operation receives one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostParam {
    /// Host object handle, one `i32`.
    Handle,
    /// String, as `i32 offset, i32 len`.
    Str,
    /// Number, as `f64`.
    Num,
    /// Callable, registered in `$js_callbacks` and passed by index.
    Callback,
}

impl HostParam {
    fn wasm(self) -> &'static [&'static str] {
        match self {
            HostParam::Handle | HostParam::Callback => &["i32"],
            HostParam::Str => &["i32", "i32"],
            HostParam::Num => &["f64"],
        }
    }
}

/// One `js.*` import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostFn {
    pub name: &'static str,
    pub params: &'static [HostParam],
    /// Whether the operation returns a handle.
    pub returns_handle: bool,
}

impl HostFn {
    const fn new(name: &'static str, params: &'static [HostParam], returns_handle: bool) -> Self {
        Self {
            name,
            params,
            returns_handle,
        }
    }

    pub fn import_decl(&self) -> String {
        let mut decl = format!("(import \"js\" \"{0}\" (func $js_{0}", self.name);
        for param in self.params {
            for ty in param.wasm() {
                decl.push_str(" (param ");
                decl.push_str(ty);
                decl.push(')');
            }
        }
        if self.returns_handle {
            decl.push_str(" (result i32)");
        }
        decl.push_str("))");
        decl
    }

    /// Whether this operation takes a handle first and can be called as a
    /// method on it.
    pub fn is_method(&self) -> bool {
        self.params.first() == Some(&HostParam::Handle)
    }
}

use HostParam::{Callback, Handle, Num, Str};

/// Host operations available to modules that import `js`.
pub static HOST_FUNCTIONS: &[HostFn] = &[
    // Console and DOM
    HostFn::new("console_log", &[Str], false),
    HostFn::new("get_element_by_id", &[Str], true),
    HostFn::new("create_element", &[Str], true),
    HostFn::new("document_body", &[], true),
    HostFn::new("append_child", &[Handle, Handle], false),
    HostFn::new("set_property", &[Handle, Str, Str], false),
    HostFn::new("get_context", &[Handle, Str], true),
    // Canvas
    HostFn::new("fill_rect", &[Handle, Num, Num, Num, Num], false),
    HostFn::new("stroke_rect", &[Handle, Num, Num, Num, Num], false),
    HostFn::new("clear_rect", &[Handle, Num, Num, Num, Num], false),
    HostFn::new("fill_text", &[Handle, Str, Num, Num], false),
    HostFn::new("set_fill_style", &[Handle, Str], false),
    HostFn::new("set_stroke_style", &[Handle, Str], false),
    HostFn::new("set_line_width", &[Handle, Num], false),
    HostFn::new("begin_path", &[Handle], false),
    HostFn::new("move_to", &[Handle, Num, Num], false),
    HostFn::new("line_to", &[Handle, Num, Num], false),
    HostFn::new("arc", &[Handle, Num, Num, Num, Num, Num], false),
    HostFn::new("stroke", &[Handle], false),
    HostFn::new("fill", &[Handle], false),
    // Events
    HostFn::new("add_event_listener", &[Handle, Str, Callback], false),
    HostFn::new("prevent_default", &[Handle], false),
    HostFn::new("call_method", &[Handle, Str], true),
];

pub fn host_function(name: &str) -> Option<&'static HostFn> {
    HOST_FUNCTIONS.iter().find(|f| f.name == name)
}

/// Float formatting, always imported.
pub const FORMAT_FLOAT_IMPORT: &str =
    "(import \"env\" \"format_float\" (func $format_float (param f64) (param i32) (result i32)))";

/// Whether and how a module uses the host interop family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostUsage {
    /// Name `js` is bound to, when imported.
    alias: Option<String>,
}

impl HostUsage {
    /// Detect a top-level `import js` (or `import js as name`).
    pub fn new(module: &Module<'_>) -> Self {
        let alias = module.body.iter().find_map(|stmt| match stmt {
            Stmt::Import(import) => import
                .names
                .iter()
                .find(|a| a.name == "js")
                .map(|a| a.bound_name().to_string()),
            _ => None,
        });
        if let Some(alias) = &alias {
            tracing::debug!(alias = %alias, "host interop enabled");
        }
        Self { alias }
    }

    pub fn enabled(&self) -> bool {
        self.alias.is_some()
    }

    /// Whether `name` is the module's binding of `js`.
    pub fn is_alias(&self, name: &str) -> bool {
        self.alias.as_deref() == Some(name)
    }

    /// Host import declarations.
    pub fn imports(&self) -> Vec<String> {
        let mut imports = vec![FORMAT_FLOAT_IMPORT.to_string()];
        if self.enabled() {
            imports.extend(HOST_FUNCTIONS.iter().map(HostFn::import_decl));
        }
        imports
    }

    /// Module globals the host family needs.
    pub fn globals(&self) -> Vec<String> {
        if self.enabled() {
            vec!["(global $js_callbacks (mut (ref null eq)) (ref.null eq))".to_string()]
        } else {
            Vec::new()
        }
    }
}

// ============================================================================
// Lowering
// ============================================================================

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    /// Lower `js.op(...)`. Returns `false` when `call` is not a host call.
    pub(crate) fn compile_host_call(&mut self, call: &'ast CallExpr<'ast>) -> Result<bool> {
        let Expr::Attribute(attr) = call.func else {
            return Ok(false);
        };
        let Some(receiver) = attr.value.as_name() else {
            return Ok(false);
        };
        if !self.ctx.host.is_alias(receiver) || !self.refers_to_module_binding(receiver, call.span) {
            return Ok(false);
        }
        let Some(func) = host_function(attr.attr) else {
            return Err(CompileError::unsupported(
                format!("unknown js operation '{}'", attr.attr),
                call.span,
            ));
        };
        self.check_host_arity(func, call, func.params.len())?;
        let temps = self.host_arguments(func.params, call.args, call.span)?;
        self.emit_host_invoke(func, &temps, call.span)?;
        Ok(true)
    }

    /// Lower `handle.op(...)` with a run-time handle check. Returns `false`
    /// when the method name is not a host operation.
    pub(crate) fn compile_host_method(&mut self, call: &'ast CallExpr<'ast>) -> Result<bool> {
        if !self.ctx.host.enabled() {
            return Ok(false);
        }
        let Expr::Attribute(attr) = call.func else {
            return Ok(false);
        };
        let Some(func) = host_function(attr.attr).filter(|f| f.is_method()) else {
            return Ok(false);
        };
        if !call.keywords.is_empty() || call.has_starred() || call.args.len() + 1 != func.params.len() {
            return Ok(false);
        }

        let receiver = self.temp(LocalType::Any);
        self.compile_expr(attr.value)?;
        self.emit(format!("local.set {receiver}"));
        let mut boxed = Vec::with_capacity(call.args.len());
        for arg in call.args {
            let tmp = self.temp(LocalType::Any);
            self.compile_expr(*arg)?;
            self.emit(format!("local.set {tmp}"));
            boxed.push(tmp);
        }

        self.emit(format!("local.get {receiver}"));
        self.emit("ref.test (ref i31)");
        self.emitter.if_(Some("(ref null eq)"));
        let mut temps = vec![self.host_handle_from(&receiver)];
        for (param, tmp) in func.params[1..].iter().zip(&boxed) {
            temps.push(self.host_convert(*param, tmp, call.span)?);
        }
        self.emit_host_invoke(func, &temps, call.span)?;
        self.emitter.else_();
        self.emit(format!("local.get {receiver}"));
        self.push_str(attr.attr);
        for tmp in &boxed {
            self.emit(format!("local.get {tmp}"));
        }
        self.push_chain(boxed.len());
        self.rt("call_method", call.span)?;
        self.emitter.end();
        Ok(true)
    }

    /// `handle.name = value` on a host handle, falling back to the object
    /// protocol. Expects the value in `value`.
    pub(crate) fn compile_host_setattr(&mut self, object: Expr<'ast>, name: &str, value: &str, span: Span) -> Result<()> {
        let receiver = self.temp(LocalType::Any);
        self.compile_expr(object)?;
        self.emit(format!("local.set {receiver}"));
        self.emit(format!("local.get {receiver}"));
        self.emit("ref.test (ref i31)");
        self.emitter.if_(None);
        let Some(func) = host_function("set_property") else {
            return Err(CompileError::internal("host table lacks set_property", span));
        };
        let handle = self.host_handle_from(&receiver);
        let name_tmp = self.temp(LocalType::Any);
        self.push_str(name);
        self.emit(format!("local.set {name_tmp}"));
        let key = self.host_convert(Str, &name_tmp, span)?;
        let text = self.host_convert(Str, value, span)?;
        self.emit_host_invoke(func, &[handle, key, text], span)?;
        self.emit("drop");
        self.emitter.else_();
        self.emit(format!("local.get {receiver}"));
        self.push_str(name);
        self.emit(format!("local.get {value}"));
        self.rt("object_setattr", span)?;
        self.emitter.end();
        Ok(())
    }

    fn refers_to_module_binding(&self, name: &str, span: Span) -> bool {
        use crate::function_compiler::NameSlot;
        match self.resolve(name, span) {
            Ok(Some(NameSlot::Global(_))) => true,
            Ok(Some(NameSlot::Local(_))) => self.scope_id == 0,
            _ => false,
        }
    }

    fn check_host_arity(&self, func: &HostFn, call: &CallExpr<'ast>, expected: usize) -> Result<()> {
        if !call.keywords.is_empty() || call.has_starred() {
            return Err(CompileError::unsupported(
                format!("js.{} takes positional arguments only", func.name),
                call.span,
            ));
        }
        if call.args.len() != expected {
            return Err(CompileError::unsupported(
                format!(
                    "js.{} takes {expected} arguments, got {}",
                    func.name,
                    call.args.len()
                ),
                call.span,
            ));
        }
        Ok(())
    }

    /// Evaluate arguments left to right, then convert each to its host form.
    /// Returns one group of locals per parameter.
    fn host_arguments(
        &mut self,
        params: &[HostParam],
        args: &'ast [Expr<'ast>],
        span: Span,
    ) -> Result<Vec<Vec<String>>> {
        let mut boxed = Vec::with_capacity(args.len());
        for arg in args {
            let tmp = self.temp(LocalType::Any);
            self.compile_expr(*arg)?;
            self.emit(format!("local.set {tmp}"));
            boxed.push(tmp);
        }
        params
            .iter()
            .zip(&boxed)
            .map(|(param, tmp)| self.host_convert(*param, tmp, span))
            .collect()
    }

    fn host_handle_from(&mut self, boxed: &str) -> Vec<String> {
        let handle = self.temp(LocalType::I32);
        self.emit(format!("local.get {boxed}"));
        self.emit("ref.cast (ref i31)");
        self.emit("i31.get_s");
        self.emit(format!("local.set {handle}"));
        vec![handle]
    }

    /// Convert the boxed value in `boxed` to the locals of one host argument.
    fn host_convert(&mut self, param: HostParam, boxed: &str, span: Span) -> Result<Vec<String>> {
        match param {
            Handle => Ok(self.host_handle_from(boxed)),
            Str => {
                let text = self.temp(LocalType::Any);
                let offset = self.temp(LocalType::I32);
                let len = self.temp(LocalType::I32);
                self.emit(format!("local.get {boxed}"));
                self.rt("to_str", span)?;
                self.emit(format!("local.tee {text}"));
                self.emit("ref.cast (ref $STRING)");
                self.emit("struct.get $STRING $offset");
                self.emit(format!("local.set {offset}"));
                self.emit(format!("local.get {text}"));
                self.emit("ref.cast (ref $STRING)");
                self.emit("struct.get $STRING $len");
                self.emit(format!("local.set {len}"));
                Ok(vec![offset, len])
            }
            Num => {
                let value = self.temp(LocalType::F64);
                self.emit(format!("local.get {boxed}"));
                self.rt("to_f64", span)?;
                self.emit(format!("local.set {value}"));
                Ok(vec![value])
            }
            Callback => {
                let index = self.temp(LocalType::I32);
                self.emit("global.get $js_callbacks");
                self.emit("ref.cast (ref $LIST)");
                self.emit("struct.get $LIST $len");
                self.emit(format!("local.set {index}"));
                self.emit("global.get $js_callbacks");
                self.emit(format!("local.get {boxed}"));
                self.rt("list_append", span)?;
                Ok(vec![index])
            }
        }
    }

    /// Call the import and leave a boxed result.
    fn emit_host_invoke(&mut self, func: &HostFn, args: &[Vec<String>], _span: Span) -> Result<()> {
        for group in args {
            for local in group {
                self.emit(format!("local.get {local}"));
            }
        }
        self.emit(format!("call $js_{}", func.name));
        if func.returns_handle {
            self.emit("ref.i31");
        } else {
            self.push_none();
        }
        Ok(())
    }
}

/// The exported `event_callback(idx, event)` entry point.
pub fn event_callback() -> String {
    [
        "(func $event_callback (export \"event_callback\") (param $idx i32) (param $event i32)",
        "  global.get $js_callbacks",
        "  local.get $idx",
        "  call $sequence_get",
        "  local.get $event",
        "  ref.i31",
        "  ref.null eq",
        "  struct.new $PAIR",
        "  call $call_value",
        "  drop)",
    ]
    .join("\n")
}
