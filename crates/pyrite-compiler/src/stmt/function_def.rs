//! `def`, `lambda` and closure creation.
//!
//! Every function is compiled by its own [`FunctionCompiler`] into a
//! separate `(func ...)` and then referenced from the defining code as a
//! `$CLOSURE` of the current environment and the function's table slot.
//! Functions with defaults wrap that environment in one more `$ENV` whose
//! `$vars` are the evaluated defaults; the prologue unwraps it.
//!
//! A module function registered as a direct target additionally gets a
//! positional entry point, and its uniform entry only unpacks the argument
//! chain and calls it.

use pyrite_ast::*;
use pyrite_core::{CompileError, Result, Span};

use crate::analysis::{NodeKey, ScopeId};
use crate::context::{CompiledFunction, FunctionFlags, direct_name, function_name};
use crate::function_compiler::{FunctionCompiler, uniform_header};
use crate::scope::LocalType;

/// Flags implied by a parameter list.
fn signature_flags(args: &Arguments<'_>) -> FunctionFlags {
    let mut flags = FunctionFlags::empty();
    if args.vararg.is_some() {
        flags |= FunctionFlags::VARARGS;
    }
    if args.kwarg.is_some() {
        flags |= FunctionFlags::KWARGS;
    }
    if !args.kwonlyargs.is_empty() {
        flags |= FunctionFlags::KWONLY;
    }
    if has_defaults(args) {
        flags |= FunctionFlags::DEFAULTS;
    }
    flags
}

fn has_defaults(args: &Arguments<'_>) -> bool {
    !args.defaults.is_empty() || args.kw_defaults.iter().any(Option::is_some)
}

/// How a decorator in a class body changes the function value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MethodKind {
    Plain,
    Static,
    Class,
}

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub(crate) fn compile_function_def(&mut self, f: &'ast FunctionDef<'ast>) -> Result<()> {
        let tree = self.ctx.tree;
        let scope_id = tree
            .scope_of(f)
            .ok_or_else(|| CompileError::internal(format!("no scope for function '{}'", f.name), f.span))?;
        let index = self.ctx.function_index(NodeKey::of(f));
        let in_class = self.class_bodies.last().map(|body| body.name);
        let kind = method_kind(f, in_class.is_some());

        let mut flags = signature_flags(f.args);
        if in_class.is_some() {
            flags |= FunctionFlags::METHOD;
        }
        let direct = self
            .ctx
            .direct_target(f.name)
            .is_some_and(|target| target.index == index && self.scope_id == 0);
        if direct {
            flags |= FunctionFlags::DIRECT;
        }
        let self_param = match kind {
            MethodKind::Plain if in_class.is_some() => f.args.args.first().map(|a| a.name),
            _ => None,
        };
        tracing::debug!(function = f.name, index, ?flags, "compiling function");

        if tree.get(scope_id).is_generator {
            let body_index = self.ctx.reserve_function();
            let mut body = FunctionCompiler::new(
                &mut *self.ctx,
                scope_id,
                body_index,
                format!("{} (body)", f.name),
                flags | FunctionFlags::GENERATOR,
            );
            body.class_name = in_class;
            body.self_param = self_param;
            body.analyze(Some(f.args), f.body);
            body.compile_generator_body(f)?;
            let flags = body.flags;
            let (text, instructions) = body.finish_text(&uniform_header(body_index));
            self.ctx.define_function(CompiledFunction {
                index: body_index,
                name: f.name.to_string(),
                text,
                flags,
                instructions,
            });
            self.define_generator_factory(scope_id, index, body_index, f.name);
        } else {
            self.define_function_body(f, scope_id, index, flags, in_class, self_param)?;
        }

        let closure = self.temp(LocalType::Any);
        self.push_closure(index, f.args)?;
        self.emit(format!("local.set {closure}"));
        if in_class.is_some() {
            self.apply_method_decorators(f, &closure)?;
        } else {
            self.apply_decorators(f.decorators, &closure, f.span)?;
        }
        self.emit(format!("local.get {closure}"));
        self.store_name(f.name, f.span)
    }

    fn define_function_body(
        &mut self,
        f: &'ast FunctionDef<'ast>,
        scope_id: ScopeId,
        index: u32,
        flags: FunctionFlags,
        class_name: Option<&'ast str>,
        self_param: Option<&'ast str>,
    ) -> Result<()> {
        let mut fc = FunctionCompiler::new(&mut *self.ctx, scope_id, index, f.name, flags);
        fc.class_name = class_name;
        fc.self_param = self_param;
        fc.analyze(Some(f.args), f.body);

        if !flags.contains(FunctionFlags::DIRECT) {
            fc.emit_unwrap_defaults();
            fc.emit_frame();
            fc.emit_prologue(f.args, None, f.span)?;
            fc.compile_body(f.body)?;
            fc.push_none();
            let flags = fc.flags;
            let (text, instructions) = fc.finish_text(&uniform_header(index));
            self.ctx.define_function(CompiledFunction {
                index,
                name: f.name.to_string(),
                text,
                flags,
                instructions,
            });
            return Ok(());
        }

        // Positional entry point: parameters arrive as WAT params.
        let params: Vec<String> = (0..f.args.args.len()).map(|i| format!("$p_{i}")).collect();
        fc.locals.declare("$env", LocalType::Env);
        fc.emit_frame();
        for (param, arg) in params.iter().zip(f.args.args) {
            fc.emit(format!("local.get {param}"));
            fc.store_name_scoped(arg.name, arg.span)?;
        }
        fc.compile_body(f.body)?;
        fc.push_none();
        let mut header = format!("(func {}", direct_name(index));
        for param in &params {
            header.push_str(&format!(" (param {param} (ref null eq))"));
        }
        header.push_str(" (result (ref null eq))");
        let flags = fc.flags;
        let (direct_text, direct_instructions) = fc.finish_text(&header);

        // Uniform entry point: unpack the chain and forward.
        let mut entry = FunctionCompiler::new(&mut *self.ctx, scope_id, index, f.name, flags);
        let targets: Vec<String> = params
            .iter()
            .map(|_| entry.named_temp("arg", LocalType::Any))
            .collect();
        entry.emit_prologue(f.args, Some(&targets), f.span)?;
        for target in &targets {
            entry.emit(format!("local.get {target}"));
        }
        entry.emit(format!("call {}", direct_name(index)));
        let (entry_text, entry_instructions) = entry.finish_text(&uniform_header(index));

        self.ctx.define_function(CompiledFunction {
            index,
            name: f.name.to_string(),
            text: format!("{entry_text}\n{direct_text}"),
            flags,
            instructions: entry_instructions + direct_instructions,
        });
        Ok(())
    }

    /// Push a `$CLOSURE` for function `index` over the current environment,
    /// evaluating defaults here.
    fn push_closure(&mut self, index: u32, args: &'ast Arguments<'ast>) -> Result<()> {
        self.push_closure_env();
        if has_defaults(args) {
            for default in args.defaults {
                self.compile_expr(*default)?;
            }
            for default in args.kw_defaults {
                match default {
                    Some(value) => self.compile_expr(*value)?,
                    None => self.push_none(),
                }
            }
            let count = args.defaults.len() + args.kw_defaults.len();
            self.emit(format!("array.new_fixed $ARRAY_ANY {count}"));
            self.emit("struct.new $ENV");
        }
        let slot = self.ctx.table_index(index);
        self.comment(format!("closure {}", function_name(index)));
        self.emit(format!("i32.const {slot}"));
        self.emit("struct.new $CLOSURE");
        Ok(())
    }

    // ==========================================================================
    // Decorators
    // ==========================================================================

    /// `@d1 @d2 def f` binds `d1(d2(f))`.
    fn apply_decorators(&mut self, decorators: &'ast [Expr<'ast>], value: &str, span: Span) -> Result<()> {
        for decorator in decorators.iter().rev() {
            let func = self.temp(LocalType::Any);
            let args = self.temp(LocalType::Any);
            self.compile_expr(*decorator)?;
            self.emit(format!("local.set {func}"));
            self.emit(format!("local.get {value}"));
            self.push_chain(1);
            self.emit(format!("local.set {args}"));
            self.emit_dynamic_call(&func, &args, span)?;
            self.emit(format!("local.set {value}"));
        }
        Ok(())
    }

    /// Decorators of a method: descriptor builtins become records, anything
    /// else is called.
    fn apply_method_decorators(&mut self, f: &'ast FunctionDef<'ast>, value: &str) -> Result<()> {
        for decorator in f.decorators.iter().rev() {
            match decorator {
                Expr::Name(n) if n.id == "staticmethod" => {
                    self.emit(format!("local.get {value}"));
                    self.emit("struct.new $STATICMETHOD");
                }
                Expr::Name(n) if n.id == "classmethod" => {
                    self.emit(format!("local.get {value}"));
                    self.emit("struct.new $CLASSMETHOD");
                }
                Expr::Name(n) if n.id == "property" => {
                    self.emit(format!("local.get {value}"));
                    self.push_none();
                    self.push_none();
                    self.emit("struct.new $PROPERTY");
                }
                Expr::Attribute(a)
                    if matches!(a.attr, "setter" | "getter" | "deleter") && a.value.as_name().is_some() =>
                {
                    let property = self.temp(LocalType::Any);
                    self.compile_expr(a.value)?;
                    self.emit(format!("local.set {property}"));
                    self.emit(format!("local.get {property}"));
                    self.emit("ref.cast (ref $PROPERTY)");
                    self.emit(format!("local.get {value}"));
                    self.emit(format!("struct.set $PROPERTY ${}", a.attr));
                    self.emit(format!("local.get {property}"));
                }
                other => {
                    self.apply_decorators(std::slice::from_ref(other), value, f.span)?;
                    continue;
                }
            }
            self.emit(format!("local.set {value}"));
        }
        Ok(())
    }

    // ==========================================================================
    // Lambdas
    // ==========================================================================

    pub(crate) fn compile_lambda(&mut self, l: &'ast LambdaExpr<'ast>) -> Result<()> {
        let scope_id = self
            .ctx
            .tree
            .scope_of(l)
            .ok_or_else(|| CompileError::internal("no scope for lambda", l.span))?;
        let index = self.ctx.function_index(NodeKey::of(l));
        let flags = FunctionFlags::LAMBDA | signature_flags(l.args);

        let mut fc = FunctionCompiler::new(&mut *self.ctx, scope_id, index, "<lambda>", flags);
        fc.analyze_lambda(l.args, l.body);
        fc.emit_unwrap_defaults();
        fc.emit_frame();
        fc.emit_prologue(l.args, None, l.span)?;
        fc.compile_expr(l.body)?;
        let flags = fc.flags;
        let (text, instructions) = fc.finish_text(&uniform_header(index));
        self.ctx.define_function(CompiledFunction {
            index,
            name: "<lambda>".to_string(),
            text,
            flags,
            instructions,
        });
        self.push_closure(index, l.args)
    }
}

fn method_kind(f: &FunctionDef<'_>, in_class: bool) -> MethodKind {
    if !in_class {
        return MethodKind::Plain;
    }
    for decorator in f.decorators {
        match decorator.as_name() {
            Some("staticmethod") => return MethodKind::Static,
            Some("classmethod") => return MethodKind::Class,
            _ => {}
        }
    }
    MethodKind::Plain
}

#[cfg(test)]
mod tests {
    use crate::test_support::{compile_function_text, compile_module_text};
    use bumpalo::Bump;
    use pyrite_ast::*;

    #[test]
    fn nested_function_captures_enclosing_frame() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let outer = b.func(
            "counter",
            &[],
            &[
                b.assign_name("n", b.int(0)),
                b.func("get", &[], &[b.ret(Some(b.name("n")))]),
                b.ret(Some(b.name("get"))),
            ],
        );
        let text = compile_function_text(&b, outer, "counter");
        assert!(text.contains("local.get $frame"));
        assert!(text.contains("struct.new $CLOSURE"));
    }

    #[test]
    fn defaults_wrap_the_environment() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func_def(
            "greet",
            b.params_with_defaults(&["name", "greeting"], &[b.str("hi")]),
            &[b.ret(Some(b.name("greeting")))],
            &[],
        );
        let text = compile_module_text(&b, b.module(&[def]));
        assert!(text.contains("array.new_fixed $ARRAY_ANY 1"));
        assert!(text.contains("struct.new $ENV"));
        assert!(text.contains("local.get $defaults"));
    }

    #[test]
    fn module_function_gets_positional_entry() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[
            b.func("double", &["x"], &[b.ret(Some(b.bin(b.name("x"), pyrite_core::BinaryOp::Add, b.name("x"))))]),
            b.expr_stmt(b.call_name("print", &[b.call_name("double", &[b.int(4)])])),
        ]);
        let text = compile_module_text(&b, module);
        assert!(text.contains("(func $user_func_1_direct (param $p_0 (ref null eq)) (result (ref null eq))"));
        assert!(text.contains("call $user_func_1_direct"));
    }

    #[test]
    fn decorators_apply_innermost_first() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func_def(
            "wrapped",
            b.params(&[]),
            &[b.pass()],
            &[b.name("outer"), b.name("inner")],
        );
        let text = compile_function_text(
            &b,
            b.func("make", &["outer", "inner"], &[def, b.ret(Some(b.name("wrapped")))]),
            "make",
        );
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        let inner = lines.iter().position(|l| *l == "local.get $v_inner").unwrap();
        let outer = lines.iter().position(|l| *l == "local.get $v_outer").unwrap();
        assert!(inner < outer);
    }

    #[test]
    fn property_setter_updates_descriptor() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let getter = b.func_def("size", b.params(&["self"]), &[b.ret(Some(b.int(1)))], &[b.name("property")]);
        let setter = b.func_def(
            "size",
            b.params(&["self", "v"]),
            &[b.pass()],
            &[b.attr(b.name("size"), "setter")],
        );
        let class = b.class("Box", &[], &[getter, setter]);
        let text = compile_module_text(&b, b.module(&[class]));
        assert!(text.contains("struct.new $PROPERTY"));
        assert!(text.contains("struct.set $PROPERTY $setter"));
    }

    #[test]
    fn lambda_is_a_separate_function() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "adder",
            &["k"],
            &[b.ret(Some(b.lambda(b.params(&["x"]), b.bin(b.name("x"), pyrite_core::BinaryOp::Add, b.name("k")))))],
        );
        let text = compile_module_text(&b, b.module(&[def]));
        assert!(text.contains(";; <lambda>"));
        assert!(text.contains("call $binary_add"));
    }
}
