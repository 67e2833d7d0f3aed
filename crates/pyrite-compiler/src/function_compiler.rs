//! Function compiler for generating WAT from function bodies.
//!
//! This module provides [`FunctionCompiler`], the state of one function
//! being compiled. It handles:
//!
//! - Choosing storage for every local (boxed, native or cell)
//! - Resolving names to locals, closure frames, module globals or builtins
//! - Boxing and unboxing values
//! - The argument prologue of the uniform calling convention
//! - Routing `return`, `break` and `continue` through cleanup regions
//!
//! Statement and expression lowering live in [`crate::stmt`] and
//! [`crate::expr`] as further `impl` blocks on the same type. Nested
//! functions are compiled by a fresh `FunctionCompiler` that reborrows the
//! shared [`ModuleContext`].
//!
//! # Calling convention
//!
//! Every compiled function has the type
//!
//! ```text
//! (func (param $args (ref null eq)) (param $env (ref null $ENV)) (result (ref null eq)))
//! ```
//!
//! where `$args` is a `$PAIR` chain of positional arguments, optionally
//! followed by one `$KWARGS` element holding keyword arguments by name. A
//! positional element equal to the runtime's `$MISSING` sentinel is treated
//! as not supplied.

use pyrite_core::{CompileError, NativeType, Result, Span, fits_i31};
use pyrite_ast::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::{Scope, ScopeId, ScopeKind};
use crate::context::{FunctionFlags, ModuleContext, global_name};
use crate::emit::{JumpKind, JumpStack, Route, WatEmitter, format_f64};
use crate::generators::GeneratorState;
use crate::infer::native::{self, NativePlan};
use crate::infer::{TypeInferencer, escape};
use crate::runtime::builtin_index;
use crate::scope::{Binding, LocalTable, LocalType, Storage, mangle};

/// Where a source name lives, from the point of view of the function being
/// compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NameSlot {
    /// Comprehension target held in a temporary.
    Comprehension(String),
    /// Attribute of the class whose body is being compiled.
    ClassAttr(String),
    Local(Binding),
    /// Cell in an enclosing frame.
    Free { depth: usize, slot: usize },
    Global(String),
    Builtin(u32),
}

/// A class body being compiled inside this function.
#[derive(Debug)]
pub(crate) struct ClassBody<'c, 'ast> {
    pub name: &'ast str,
    /// Local holding the class object.
    pub cls: String,
    /// Every name the class body binds.
    pub attrs: &'c [&'ast str],
    /// Class attributes assigned so far.
    pub bound: Vec<&'ast str>,
}

/// `container[index]` known to be in bounds inside a `range(len(...))` loop.
#[derive(Debug, Clone)]
pub(crate) struct SafeAccess<'ast> {
    pub container: &'ast str,
    pub index: &'ast str,
    /// Hidden `i64` loop counter equal to `index`.
    pub counter: String,
}

/// Compiles a single function body to WAT.
pub struct FunctionCompiler<'a, 'c, 'ast> {
    /// Module-wide state
    pub(crate) ctx: &'a mut ModuleContext<'c, 'ast>,
    /// Instruction output
    pub(crate) emitter: WatEmitter,
    /// Declared WAT locals
    pub(crate) locals: LocalTable,
    /// Enclosing loops and cleanup regions
    pub(crate) jumps: JumpStack,
    /// Variable types
    pub(crate) types: TypeInferencer<'c, 'ast>,
    /// Locals stored unboxed
    pub(crate) natives: NativePlan<'ast>,
    pub(crate) flags: FunctionFlags,
    pub(crate) scope_id: ScopeId,
    /// Function index
    pub(crate) index: u32,
    /// Source name, for comments and logs
    pub(crate) name: String,
    /// Class whose method this is (`super()` and slotted `self` access)
    pub(crate) class_name: Option<&'ast str>,
    /// First parameter of a method
    pub(crate) self_param: Option<&'ast str>,
    pub(crate) class_bodies: Vec<ClassBody<'c, 'ast>>,
    /// Names narrowed to a slotted class by an enclosing `isinstance` test
    pub(crate) narrowed: Vec<(&'ast str, &'ast str)>,
    pub(crate) safe: Vec<SafeAccess<'ast>>,
    /// Locals holding the exception of each enclosing handler
    pub(crate) handlers: Vec<String>,
    pub(crate) generator: Option<GeneratorState>,
    bindings: FxHashMap<&'ast str, Binding>,
    comprehension: Vec<(&'ast str, String)>,
    retval: Option<String>,
    store_tmp: Option<String>,
}

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    /// Create a compiler for function `index` of scope `scope_id`.
    pub fn new(
        ctx: &'a mut ModuleContext<'c, 'ast>,
        scope_id: ScopeId,
        index: u32,
        name: impl Into<String>,
        flags: FunctionFlags,
    ) -> Self {
        let types = TypeInferencer::new(ctx.facts);
        let emitter = WatEmitter::new(ctx.config.comments);
        Self {
            ctx,
            emitter,
            locals: LocalTable::new(),
            jumps: JumpStack::new(),
            types,
            natives: NativePlan::default(),
            flags,
            scope_id,
            index,
            name: name.into(),
            class_name: None,
            self_param: None,
            class_bodies: Vec::new(),
            narrowed: Vec::new(),
            safe: Vec::new(),
            handlers: Vec::new(),
            generator: None,
            bindings: FxHashMap::default(),
            comprehension: Vec::new(),
            retval: None,
            store_tmp: None,
        }
    }

    /// The scope being compiled.
    pub(crate) fn scope(&self) -> &'c Scope<'ast> {
        let tree = self.ctx.tree;
        tree.get(self.scope_id)
    }

    // ==========================================================================
    // Analysis
    // ==========================================================================

    /// Infer types, plan native storage and declare a binding for every
    /// local of a `def` or module body.
    pub(crate) fn analyze(&mut self, args: Option<&'ast Arguments<'ast>>, body: &'ast [Stmt<'ast>]) {
        let tree = self.ctx.tree;
        let scope = self.scope();
        if let Some(args) = args {
            self.types.seed_params(args);
        }
        self.types.seed_opaque(scope.opaque_names());
        let escapes = escape::compute(body, scope);
        self.types.analyze(body, &escapes);

        if self.ctx.config.native_locals && !self.flags.contains(FunctionFlags::GENERATOR) {
            let excluded: FxHashSet<&'ast str> = if scope.kind == ScopeKind::Module {
                scope.locals.iter().copied().filter(|n| tree.is_observed(n)).collect()
            } else {
                FxHashSet::default()
            };
            let plan = native::plan(scope, body, &self.types, &escapes, &excluded);
            for (name, ty) in plan.iter() {
                self.types.set_native(name, ty);
            }
            self.natives = plan;
        }
        self.declare_bindings();
        tracing::debug!(
            function = %self.name,
            index = self.index,
            locals = self.bindings.len(),
            natives = self.natives.len(),
            "planned local storage"
        );
    }

    /// Lambdas only infer their body; their locals stay boxed.
    pub(crate) fn analyze_lambda(&mut self, args: &'ast Arguments<'ast>, body: Expr<'ast>) {
        self.types.seed_params(args);
        self.types.analyze_expr(body);
        self.declare_bindings();
    }

    fn declare_bindings(&mut self) {
        let tree = self.ctx.tree;
        let scope = self.scope();
        let module = scope.kind == ScopeKind::Module;
        for &name in &scope.locals {
            if module && tree.is_observed(name) {
                continue;
            }
            let binding = if scope.is_captured(name) {
                Binding::cell(name)
            } else if let Some(native) = self.natives.get(name) {
                Binding::native(name, native)
            } else {
                Binding::boxed(name)
            };
            self.locals.declare(&binding.wat, binding.local_type());
            self.bindings.insert(name, binding);
        }
        self.ctx.stats.native_locals += self.natives.len();
    }

    pub(crate) fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    // ==========================================================================
    // Emission Helpers
    // ==========================================================================

    pub(crate) fn emit(&mut self, instr: impl AsRef<str>) {
        self.emitter.emit(instr);
    }

    pub(crate) fn comment(&mut self, text: impl AsRef<str>) {
        self.emitter.comment(text);
    }

    /// Call a runtime operation, recording the import.
    pub(crate) fn rt(&mut self, name: &str, span: Span) -> Result<()> {
        let func = self.ctx.runtime.require(name, span)?;
        self.emitter.emit(format!("call ${}", func.name));
        Ok(())
    }

    pub(crate) fn temp(&mut self, ty: LocalType) -> String {
        self.locals.fresh("t", ty)
    }

    pub(crate) fn named_temp(&mut self, prefix: &str, ty: LocalType) -> String {
        self.locals.fresh(prefix, ty)
    }

    pub(crate) fn label(&mut self, prefix: &str) -> String {
        self.ctx.label(prefix)
    }

    pub(crate) fn push_none(&mut self) {
        self.emit("ref.null eq");
    }

    pub(crate) fn push_bool(&mut self, value: bool) {
        self.emit(if value { "global.get $TRUE" } else { "global.get $FALSE" });
    }

    pub(crate) fn push_int(&mut self, value: i64, span: Span) -> Result<()> {
        if fits_i31(value) {
            self.emit(format!("i32.const {value}"));
            self.emit("ref.i31");
            Ok(())
        } else {
            self.emit(format!("i64.const {value}"));
            self.rt("pack_int", span)
        }
    }

    pub(crate) fn push_float(&mut self, value: f64) {
        self.emit(format!("f64.const {}", format_f64(value)));
        self.emit("struct.new $FLOAT");
    }

    pub(crate) fn push_str(&mut self, value: &str) {
        let (offset, len) = self.ctx.string(value);
        self.emit(format!("i32.const {offset}"));
        self.emit(format!("i32.const {len}"));
        self.emit("struct.new $STRING");
    }

    pub(crate) fn push_bytes(&mut self, value: &[u8]) {
        let (offset, len) = self.ctx.strings.intern(value);
        self.emit(format!("i32.const {offset}"));
        self.emit(format!("i32.const {len}"));
        self.emit("i32.const 0");
        self.emit("struct.new $BYTES");
    }

    pub(crate) fn push_constant(&mut self, value: &Constant<'ast>, span: Span) -> Result<()> {
        match value {
            Constant::None => self.push_none(),
            Constant::Bool(b) => self.push_bool(*b),
            Constant::Int(v) => self.push_int(*v, span)?,
            Constant::Float(v) => self.push_float(v.0),
            Constant::Str(s) => self.push_str(s),
            Constant::Bytes(b) => self.push_bytes(b),
            Constant::Ellipsis => self.emit("global.get $ELLIPSIS"),
        }
        Ok(())
    }

    /// Turn an `i32` truth value into `True`/`False`.
    pub(crate) fn box_condition(&mut self) {
        self.emitter.if_(Some("(ref null eq)"));
        self.emit("global.get $TRUE");
        self.emitter.else_();
        self.emit("global.get $FALSE");
        self.emitter.end();
    }

    /// Box a native value (`i64` for integers, `f64` for floats).
    pub(crate) fn box_native(&mut self, native: NativeType, span: Span) -> Result<()> {
        match native {
            NativeType::I32 | NativeType::I64 => self.rt("pack_int", span),
            NativeType::F64 => {
                self.emit("struct.new $FLOAT");
                Ok(())
            }
        }
    }

    /// Unbox to the native computation type of `native`.
    pub(crate) fn unbox(&mut self, native: NativeType, span: Span) -> Result<()> {
        match native {
            NativeType::I32 | NativeType::I64 => self.rt("to_i64", span),
            NativeType::F64 => self.rt("to_f64", span),
        }
    }

    /// Collect the top `count` stack values into a `$TUPLE`.
    pub(crate) fn push_tuple(&mut self, count: usize) {
        self.emit(format!("array.new_fixed $ARRAY_ANY {count}"));
        self.emit(format!("i32.const {count}"));
        self.emit("struct.new $TUPLE");
    }

    /// Collect the top `count` stack values into a `$PAIR` chain.
    pub(crate) fn push_chain(&mut self, count: usize) {
        self.emit("ref.null eq");
        for _ in 0..count {
            self.emit("struct.new $PAIR");
        }
    }

    /// Raise `kind(message)` unconditionally.
    pub(crate) fn raise_builtin(&mut self, kind: &str, message: Option<&str>, span: Span) -> Result<()> {
        self.push_str(kind);
        match message {
            Some(m) => self.push_str(m),
            None => self.push_none(),
        }
        self.rt("make_exception", span)?;
        self.emit("throw $exc");
        Ok(())
    }

    // ==========================================================================
    // Names
    // ==========================================================================

    /// Resolve a name for reading.
    pub(crate) fn resolve(&self, name: &str, span: Span) -> Result<Option<NameSlot>> {
        if let Some((_, local)) = self.comprehension.iter().rev().find(|(n, _)| *n == name) {
            return Ok(Some(NameSlot::Comprehension(local.clone())));
        }
        if let Some(body) = self.class_bodies.last() {
            if body.bound.contains(&name) {
                return Ok(Some(NameSlot::ClassAttr(body.cls.clone())));
            }
        }
        self.resolve_scoped(name, span)
    }

    /// Resolve ignoring comprehension targets and class bodies.
    pub(crate) fn resolve_scoped(&self, name: &str, span: Span) -> Result<Option<NameSlot>> {
        if let Some(binding) = self.bindings.get(name) {
            return Ok(Some(NameSlot::Local(binding.clone())));
        }
        let tree = self.ctx.tree;
        let scope = self.scope();
        if scope.free.contains(name) || scope.declared_nonlocals.contains(name) {
            let Some((depth, slot)) = tree.resolve_free(self.scope_id, name) else {
                return Err(CompileError::internal(
                    format!("free variable '{name}' has no enclosing frame"),
                    span,
                ));
            };
            return Ok(Some(NameSlot::Free { depth, slot }));
        }
        if scope.declared_globals.contains(name) || tree.is_module_bound(name) {
            return Ok(Some(NameSlot::Global(global_name(name))));
        }
        Ok(builtin_index(name).map(NameSlot::Builtin))
    }

    /// Whether `name` here refers to the builtin of that name.
    pub(crate) fn is_builtin_name(&self, name: &str, span: Span) -> bool {
        matches!(self.resolve(name, span), Ok(Some(NameSlot::Builtin(_))))
    }

    /// Push the value of a name.
    pub(crate) fn load_name(&mut self, name: &str, span: Span) -> Result<()> {
        let Some(slot) = self.resolve(name, span)? else {
            return Err(CompileError::unresolved(name, span));
        };
        match slot {
            NameSlot::Comprehension(local) => self.emit(format!("local.get {local}")),
            NameSlot::ClassAttr(cls) => {
                self.emit(format!("local.get {cls}"));
                self.emit("ref.as_non_null");
                self.push_str(name);
                self.rt("class_get_attr", span)?;
            }
            NameSlot::Local(binding) => match binding.storage {
                Storage::Boxed => self.emit(format!("local.get {}", binding.wat)),
                Storage::Native(native) => {
                    self.load_native_binding(&binding.wat, native);
                    self.box_native(native, span)?;
                }
                Storage::Cell => {
                    self.emit(format!("local.get {}", binding.wat));
                    self.emit("struct.get $PAIR $car");
                }
            },
            NameSlot::Free { depth, slot } => {
                self.push_free_cell(depth, slot);
                self.emit("struct.get $PAIR $car");
            }
            NameSlot::Global(global) => self.emit(format!("global.get {global}")),
            NameSlot::Builtin(index) => {
                self.emit("ref.null $ENV");
                self.emit(format!("i32.const {index}"));
                self.emit("struct.new $CLOSURE");
            }
        }
        Ok(())
    }

    /// Push a native local widened to its computation type.
    pub(crate) fn load_native_binding(&mut self, wat: &str, native: NativeType) {
        self.emit(format!("local.get {wat}"));
        if native == NativeType::I32 {
            self.emit("i64.extend_i32_s");
        }
    }

    /// Pop a native computation value into a native local.
    pub(crate) fn store_native_binding(&mut self, wat: &str, native: NativeType) {
        if native == NativeType::I32 {
            self.emit("i32.wrap_i64");
        }
        self.emit(format!("local.set {wat}"));
    }

    fn push_free_cell(&mut self, depth: usize, slot: usize) {
        self.emit("local.get $env");
        for _ in 0..depth {
            self.emit("struct.get $ENV $parent");
        }
        self.emit("struct.get $ENV $vars");
        self.emit(format!("i32.const {slot}"));
        self.emit("array.get $ARRAY_ANY");
        self.emit("ref.cast (ref $PAIR)");
    }

    fn store_tmp(&mut self) -> String {
        if let Some(tmp) = &self.store_tmp {
            return tmp.clone();
        }
        let tmp = "$store_tmp".to_string();
        self.locals.declare(&tmp, LocalType::Any);
        self.store_tmp = Some(tmp.clone());
        tmp
    }

    /// Pop the boxed value on the stack into a name.
    pub(crate) fn store_name(&mut self, name: &str, span: Span) -> Result<()> {
        if !self.is_comprehension_target(name) {
            if let Some(body) = self.class_bodies.last_mut() {
                if let Some(&attr) = body.attrs.iter().find(|a| **a == name) {
                    if !body.bound.contains(&attr) {
                        body.bound.push(attr);
                    }
                }
            }
        }
        let slot = self.resolve(name, span)?;
        self.store_slot(name, slot, span)
    }

    /// Like [`store_name`](Self::store_name) but skipping comprehension
    /// targets, as `:=` does.
    pub(crate) fn store_name_scoped(&mut self, name: &str, span: Span) -> Result<()> {
        let slot = self.resolve_scoped(name, span)?;
        self.store_slot(name, slot, span)
    }

    fn store_slot(&mut self, name: &str, slot: Option<NameSlot>, span: Span) -> Result<()> {
        match slot {
            Some(NameSlot::Comprehension(local)) => self.emit(format!("local.set {local}")),
            Some(NameSlot::ClassAttr(cls)) => self.store_class_attr(&cls, name, span)?,
            Some(NameSlot::Local(binding)) => match binding.storage {
                Storage::Boxed => self.emit(format!("local.set {}", binding.wat)),
                Storage::Native(native) => {
                    self.unbox(native, span)?;
                    self.store_native_binding(&binding.wat, native);
                }
                Storage::Cell => {
                    let tmp = self.store_tmp();
                    self.emit(format!("local.set {tmp}"));
                    self.emit(format!("local.get {}", binding.wat));
                    self.emit(format!("local.get {tmp}"));
                    self.emit("struct.set $PAIR $car");
                }
            },
            Some(NameSlot::Free { depth, slot }) => {
                let tmp = self.store_tmp();
                self.emit(format!("local.set {tmp}"));
                self.push_free_cell(depth, slot);
                self.emit(format!("local.get {tmp}"));
                self.emit("struct.set $PAIR $car");
            }
            Some(NameSlot::Global(global)) => self.emit(format!("global.set {global}")),
            Some(NameSlot::Builtin(_)) | None => {
                return Err(CompileError::internal(
                    format!("assignment to '{name}' has no storage"),
                    span,
                ));
            }
        }
        Ok(())
    }

    /// Pop a value into attribute `name` of the class held in `cls`.
    pub(crate) fn store_class_attr(&mut self, cls: &str, name: &str, span: Span) -> Result<()> {
        let tmp = self.store_tmp();
        self.emit(format!("local.set {tmp}"));
        self.emit(format!("local.get {cls}"));
        self.emit("ref.as_non_null");
        self.push_str(name);
        self.emit(format!("local.get {tmp}"));
        self.rt("class_set_attr", span)
    }

    /// Bind comprehension targets to fresh temporaries. Returns how many
    /// entries to pop afterwards.
    pub(crate) fn push_comprehension_target(&mut self, target: Expr<'ast>) -> usize {
        match target {
            Expr::Name(n) => {
                let local = self.named_temp(&format!("comp_{}", mangle(n.id)), LocalType::Any);
                self.comprehension.push((n.id, local));
                1
            }
            Expr::Tuple(t) | Expr::List(t) => t
                .elts
                .iter()
                .map(|e| self.push_comprehension_target(*e))
                .sum(),
            Expr::Starred(s) => self.push_comprehension_target(s.value),
            _ => 0,
        }
    }

    pub(crate) fn pop_comprehension_targets(&mut self, count: usize) {
        for _ in 0..count {
            self.comprehension.pop();
        }
    }

    pub(crate) fn is_comprehension_target(&self, name: &str) -> bool {
        self.comprehension.iter().any(|(n, _)| *n == name)
    }

    // ==========================================================================
    // Frames and Prologue
    // ==========================================================================

    /// Push the environment that closures created here should capture.
    pub(crate) fn push_closure_env(&mut self) {
        if self.flags.contains(FunctionFlags::HAS_FRAME) {
            self.emit("local.get $frame");
        } else {
            self.emit("local.get $env");
        }
    }

    /// Split a defaults-wrapped environment into `$defaults` and the real
    /// parent environment.
    pub(crate) fn emit_unwrap_defaults(&mut self) {
        if !self.flags.contains(FunctionFlags::DEFAULTS) {
            return;
        }
        self.locals.declare("$defaults", LocalType::Array);
        self.emit("local.get $env");
        self.emit("struct.get $ENV $vars");
        self.emit("local.set $defaults");
        self.emit("local.get $env");
        self.emit("struct.get $ENV $parent");
        self.emit("local.set $env");
    }

    /// Allocate cells for captured locals and the frame that exposes them.
    pub(crate) fn emit_frame(&mut self) {
        let scope = self.scope();
        if scope.captured.is_empty() {
            return;
        }
        self.flags |= FunctionFlags::HAS_FRAME;
        self.comment(format!("frame: {}", scope.captured.join(", ")));
        let cells: Vec<String> = scope
            .captured
            .iter()
            .filter_map(|name| self.bindings.get(name).map(|b| b.wat.clone()))
            .collect();
        for cell in &cells {
            self.emit("ref.null eq");
            self.emit("ref.null eq");
            self.emit("struct.new $PAIR");
            self.emit(format!("local.set {cell}"));
        }
        self.locals.declare("$frame", LocalType::Env);
        self.emit("local.get $env");
        for cell in &cells {
            self.emit(format!("local.get {cell}"));
        }
        self.emit(format!("array.new_fixed $ARRAY_ANY {}", cells.len()));
        self.emit("struct.new $ENV");
        self.emit("local.set $frame");
    }

    /// Bind parameters from the `$args` chain.
    ///
    /// With `targets`, parameter `i` (in [`Arguments::names`] order) is
    /// written to `targets[i]` instead of its source binding.
    pub(crate) fn emit_prologue(
        &mut self,
        args: &'ast Arguments<'ast>,
        targets: Option<&[String]>,
        span: Span,
    ) -> Result<()> {
        let chain = self.named_temp("argv", LocalType::Any);
        let kw = self.named_temp("kw", LocalType::Any);
        if args.is_simple() {
            self.emit("local.get $args");
            self.emit(format!("local.set {chain}"));
        } else {
            self.emit("local.get $args");
            self.rt("extract_kwargs", span)?;
            self.emit(format!("local.set {kw}"));
            self.emit("local.get $args");
            self.rt("strip_kwargs", span)?;
            self.emit(format!("local.set {chain}"));
        }

        let item = self.temp(LocalType::Any);
        let mut slot = 0;
        for (i, arg) in args.args.iter().enumerate() {
            let bound = self.label("bound");
            let missing = self.label("missing");
            self.emitter.block(&bound, None);
            self.emitter.block(&missing, None);
            self.emit(format!("local.get {chain}"));
            self.emit(format!("br_on_null {missing}"));
            self.emit("ref.cast (ref $PAIR)");
            self.emit("struct.get $PAIR $car");
            self.emit(format!("local.tee {item}"));
            self.emit("ref.test (ref $KWARGS)");
            self.emitter.if_(None);
            self.emit(format!("local.get {item}"));
            self.emit("ref.cast (ref $KWARGS)");
            self.emit("struct.get $KWARGS $dict");
            self.emit(format!("local.set {kw}"));
            self.emit(format!("br {missing}"));
            self.emitter.end();
            self.emit(format!("local.get {chain}"));
            self.emit("ref.cast (ref $PAIR)");
            self.emit("struct.get $PAIR $cdr");
            self.emit(format!("local.set {chain}"));
            self.emit(format!("local.get {item}"));
            self.emit("global.get $MISSING");
            self.emit("ref.eq");
            self.emit(format!("br_if {missing}"));
            self.emit(format!("local.get {item}"));
            self.store_param(arg.name, slot, targets, span)?;
            self.emit(format!("br {bound}"));
            self.emitter.end();

            self.emit_keyword_param(&kw, arg.name, slot, targets, &bound, span)?;
            let default = args.default_for(i).map(|_| i - args.required());
            self.emit_default_param(arg.name, default, slot, targets, span)?;
            self.emitter.end();
            slot += 1;
        }

        match args.vararg {
            Some(vararg) => {
                self.emit(format!("local.get {chain}"));
                self.rt("chain_to_tuple", span)?;
                self.store_param(vararg.name, slot, targets, span)?;
                slot += 1;
            }
            None => {
                self.emit(format!("local.get {chain}"));
                self.emit("ref.is_null");
                self.emit("i32.eqz");
                self.emitter.if_(None);
                self.emit(format!("local.get {chain}"));
                self.emit("ref.cast (ref $PAIR)");
                self.emit("struct.get $PAIR $car");
                self.emit("ref.test (ref $KWARGS)");
                self.emit("i32.eqz");
                self.emitter.if_(None);
                self.emit("local.get $args");
                self.rt("too_many_arguments", span)?;
                self.emitter.end();
                self.emitter.end();
            }
        }

        for (j, arg) in args.kwonlyargs.iter().enumerate() {
            let bound = self.label("bound");
            self.emitter.block(&bound, None);
            self.emit_keyword_param(&kw, arg.name, slot, targets, &bound, span)?;
            let default = args
                .kw_defaults
                .get(j)
                .copied()
                .flatten()
                .map(|_| args.defaults.len() + j);
            self.emit_default_param(arg.name, default, slot, targets, span)?;
            self.emitter.end();
            slot += 1;
        }

        if let Some(kwarg) = args.kwarg {
            self.emit(format!("local.get {kw}"));
            self.emit("ref.is_null");
            self.emitter.if_(Some("(ref null eq)"));
            self.rt("dict_new", span)?;
            self.emitter.else_();
            self.emit(format!("local.get {kw}"));
            let named: Vec<&str> = args
                .args
                .iter()
                .chain(args.kwonlyargs)
                .map(|a| a.name)
                .collect();
            for name in &named {
                self.push_str(name);
            }
            self.push_tuple(named.len());
            self.rt("dict_without_keys", span)?;
            self.emitter.end();
            self.store_param(kwarg.name, slot, targets, span)?;
        }
        Ok(())
    }

    fn emit_keyword_param(
        &mut self,
        kw: &str,
        name: &str,
        slot: usize,
        targets: Option<&[String]>,
        bound: &str,
        span: Span,
    ) -> Result<()> {
        self.emit(format!("local.get {kw}"));
        self.emit("ref.is_null");
        self.emit("i32.eqz");
        self.emitter.if_(None);
        self.emit(format!("local.get {kw}"));
        self.push_str(name);
        self.rt("dict_contains", span)?;
        self.emitter.if_(None);
        self.emit(format!("local.get {kw}"));
        self.push_str(name);
        self.rt("dict_get", span)?;
        self.store_param(name, slot, targets, span)?;
        self.emit(format!("br {bound}"));
        self.emitter.end();
        self.emitter.end();
        Ok(())
    }

    fn emit_default_param(
        &mut self,
        name: &str,
        default: Option<usize>,
        slot: usize,
        targets: Option<&[String]>,
        span: Span,
    ) -> Result<()> {
        match default {
            Some(index) => {
                self.emit("local.get $defaults");
                self.emit(format!("i32.const {index}"));
                self.emit("array.get $ARRAY_ANY");
                self.store_param(name, slot, targets, span)
            }
            None => {
                self.push_str(name);
                self.rt("missing_argument", span)?;
                self.emit("unreachable");
                Ok(())
            }
        }
    }

    fn store_param(&mut self, name: &str, slot: usize, targets: Option<&[String]>, span: Span) -> Result<()> {
        match targets.and_then(|t| t.get(slot)) {
            Some(local) => {
                self.emit(format!("local.set {local}"));
                Ok(())
            }
            None => self.store_name_scoped(name, span),
        }
    }

    // ==========================================================================
    // Jumps
    // ==========================================================================

    fn retval(&mut self) -> String {
        if let Some(r) = &self.retval {
            return r.clone();
        }
        self.locals.declare("$retval", LocalType::Any);
        self.retval = Some("$retval".to_string());
        "$retval".to_string()
    }

    /// Return the boxed value on the stack, running enclosing cleanups.
    pub(crate) fn emit_return_value(&mut self, span: Span) -> Result<()> {
        match self.jumps.route(JumpKind::Return) {
            Some(Route::ViaCleanup {
                pending,
                code,
                entry,
            }) => {
                let retval = self.retval();
                self.emit(format!("local.set {retval}"));
                self.emit(format!("i32.const {code}"));
                self.emit(format!("local.set {pending}"));
                self.emit(format!("br {entry}"));
                Ok(())
            }
            Some(Route::Branch(_)) => Err(CompileError::internal("return routed to a loop label", span)),
            Some(Route::Return) | None => {
                self.emit_function_exit();
                Ok(())
            }
        }
    }

    /// Leave the function with the value on the stack.
    pub(crate) fn emit_function_exit(&mut self) {
        if self.generator.is_some() {
            self.emit("local.set $yv");
            self.emit("local.get $gen");
            self.emit("i32.const -1");
            self.emit("struct.set $GENERATOR $state");
            self.emit("local.get $yv");
        }
        self.emit("return");
    }

    /// `break`, `continue`, or a `return` whose value is already in `$retval`.
    pub(crate) fn emit_jump(&mut self, kind: JumpKind, span: Span) -> Result<()> {
        if kind == JumpKind::Return {
            let retval = self.retval();
            self.emit(format!("local.get {retval}"));
            return self.emit_return_value(span);
        }
        match self.jumps.route(kind) {
            Some(Route::Branch(label)) => {
                self.emit(format!("br {label}"));
                Ok(())
            }
            Some(Route::ViaCleanup {
                pending,
                code,
                entry,
            }) => {
                self.emit(format!("i32.const {code}"));
                self.emit(format!("local.set {pending}"));
                self.emit(format!("br {entry}"));
                Ok(())
            }
            Some(Route::Return) | None => {
                let word = if kind == JumpKind::Break { "break" } else { "continue" };
                Err(CompileError::unsupported(format!("'{word}' outside loop"), span))
            }
        }
    }

    /// After a cleanup region, resume the jumps that were routed through it.
    pub(crate) fn dispatch_pending(&mut self, pending: &str, kinds: Vec<JumpKind>, span: Span) -> Result<()> {
        for kind in kinds {
            self.emit(format!("local.get {pending}"));
            self.emit(format!("i32.const {}", kind.code()));
            self.emit("i32.eq");
            self.emitter.if_(None);
            self.emit_jump(kind, span)?;
            self.emitter.end();
        }
        Ok(())
    }

    // ==========================================================================
    // Output
    // ==========================================================================

    /// Render the function with `header` as its `(func ...` line.
    ///
    /// Returns the text and the instruction count.
    pub(crate) fn finish_text(self, header: &str) -> (String, usize) {
        let instructions = self.emitter.instruction_count();
        let mut body = self.emitter.finish();
        if let Some(generator) = &self.generator {
            body = generator.expand_markers(&body, &self.locals);
        }
        let mut text = String::with_capacity(body.len() + 256);
        text.push_str(header);
        text.push('\n');
        if self.ctx.config.comments {
            text.push_str(&format!("  ;; {}\n", self.name));
        }
        for decl in self.locals.declarations() {
            text.push_str("  ");
            text.push_str(&decl);
            text.push('\n');
        }
        text.push_str(&body);
        text.push(')');
        (text, instructions)
    }
}

/// `(func ...` line of a function with the uniform closure signature.
pub(crate) fn uniform_header(index: u32) -> String {
    format!(
        "(func {} (type $FUNC) (param $args (ref null eq)) (param $env (ref null $ENV)) (result (ref null eq))",
        crate::context::function_name(index)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ScopeTree;
    use crate::config::CompilerConfig;
    use crate::infer::ModuleFacts;
    use bumpalo::Bump;

    fn with_compiler<'ast>(
        module: &Module<'ast>,
        scope: ScopeId,
        f: impl FnOnce(&mut FunctionCompiler<'_, '_, 'ast>),
    ) {
        let tree = ScopeTree::build(module).unwrap();
        let facts = ModuleFacts::build(module, &tree);
        let config = CompilerConfig::default();
        let mut ctx = ModuleContext::new(&config, &tree, &facts, module);
        let mut compiler = FunctionCompiler::new(&mut ctx, scope, 0, "test", FunctionFlags::empty());
        f(&mut compiler);
    }

    fn text(compiler: &mut FunctionCompiler<'_, '_, '_>) -> String {
        std::mem::replace(&mut compiler.emitter, WatEmitter::new(false)).finish()
    }

    #[test]
    fn small_and_large_int_constants() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[]);
        with_compiler(&module, 0, |c| {
            c.push_int(7, Span::default()).unwrap();
            c.push_int(1 << 40, Span::default()).unwrap();
            let out = text(c);
            assert!(out.contains("i32.const 7\n"));
            assert!(out.contains("ref.i31"));
            assert!(out.contains("i64.const 1099511627776"));
            assert!(out.contains("call $pack_int"));
            assert!(c.ctx.runtime.is_used("pack_int"));
        });
    }

    #[test]
    fn module_names_read_by_functions_are_globals() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[
            b.assign_name("shared", b.int(1)),
            b.assign_name("private", b.int(2)),
            b.func("f", &[], &[b.ret(Some(b.name("shared")))]),
        ]);
        with_compiler(&module, 0, |c| {
            c.analyze(None, module.body);
            assert_eq!(
                c.resolve("shared", Span::default()).unwrap(),
                Some(NameSlot::Global("$global_shared".into()))
            );
            assert!(matches!(
                c.resolve("private", Span::default()).unwrap(),
                Some(NameSlot::Local(_))
            ));
            assert_eq!(
                c.resolve("len", Span::default()).unwrap(),
                Some(NameSlot::Builtin(1))
            );
            assert_eq!(c.resolve("nowhere", Span::default()).unwrap(), None);
            assert!(c.load_name("nowhere", Span::default()).is_err());
        });
    }

    #[test]
    fn captured_locals_become_cells_in_a_frame() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let inner = b.func("inner", &[], &[b.ret(Some(b.name("count")))]);
        let outer = b.func("outer", &[], &[b.assign_name("count", b.int(0)), inner]);
        let module = b.module(&[outer]);
        let Stmt::FunctionDef(def) = module.body[0] else {
            unreachable!()
        };
        let tree = ScopeTree::build(&module).unwrap();
        let scope = tree.scope_of(def).unwrap();
        with_compiler(&module, scope, |c| {
            c.analyze(Some(def.args), def.body);
            assert_eq!(c.binding("count").map(|b| b.storage), Some(Storage::Cell));
            c.emit_frame();
            assert!(c.flags.contains(FunctionFlags::HAS_FRAME));
            let out = text(c);
            assert!(out.contains("array.new_fixed $ARRAY_ANY 1"));
            assert!(out.contains("local.set $frame"));
        });
    }

    #[test]
    fn return_inside_cleanup_goes_through_pending() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[]);
        with_compiler(&module, 0, |c| {
            c.jumps.push_cleanup("$pending_1", "$fin_1");
            c.push_none();
            c.emit_return_value(Span::default()).unwrap();
            let kinds = c.jumps.pop_cleanup(Span::default()).unwrap();
            assert_eq!(kinds, vec![JumpKind::Return]);
            let out = text(c);
            assert!(out.contains("local.set $retval"));
            assert!(out.contains("i32.const 3\n"));
            assert!(out.contains("br $fin_1"));
        });
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[]);
        with_compiler(&module, 0, |c| {
            let err = c.emit_jump(JumpKind::Break, Span::new(2, 1)).unwrap_err();
            assert_eq!(err.kind(), pyrite_core::ErrorKind::UnsupportedConstruct);
        });
    }

    #[test]
    fn prologue_binds_defaults_and_keywords() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func_def(
            "f",
            b.params_with_defaults(&["a", "b"], &[b.int(2)]),
            &[b.ret(Some(b.name("b")))],
            &[],
        );
        let module = b.module(&[def]);
        let Stmt::FunctionDef(def) = module.body[0] else {
            unreachable!()
        };
        let tree = ScopeTree::build(&module).unwrap();
        let scope = tree.scope_of(def).unwrap();
        with_compiler(&module, scope, |c| {
            c.flags |= FunctionFlags::DEFAULTS;
            c.analyze(Some(def.args), def.body);
            c.emit_unwrap_defaults();
            c.emit_prologue(def.args, None, def.span).unwrap();
            let out = text(c);
            assert!(out.contains("struct.get $ENV $parent"));
            assert!(out.contains("ref.test (ref $KWARGS)"));
            assert!(out.contains("global.get $MISSING"));
            assert!(out.contains("call $dict_get"));
            assert!(out.contains("call $missing_argument"));
            assert!(out.contains("call $too_many_arguments"));
            assert!(out.contains("local.get $defaults"));
        });
    }
}
